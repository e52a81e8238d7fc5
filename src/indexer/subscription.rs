// Per-forum subscription — one task reading a forum's update notifications.
//
// Each notification may start an update cycle. Only one cycle runs per
// forum at a time: a notification that arrives while a cycle is in flight
// is dropped, since the next notification carries a newer record anyway.
//
// A cycle compares the snapshot against the stored markers:
// - same updatedAt: nothing to do
// - same posts marker: only updatedAt is persisted
// - otherwise: crawl posts and mod queue, then record success
//
// Failures count against the forum; after MAX_CONSECUTIVE_ERRORS in a row
// the forum is disabled and its subscription ends.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fetcher::{CommentFetcher, CrawlStats};
use crate::db::Database;
use crate::plebbit::client::ForumHandle;
use crate::plebbit::types::{Pages, SubplebbitSnapshot};
use crate::util::unix_now;

/// Failed cycles in a row before a forum is disabled.
pub const MAX_CONSECUTIVE_ERRORS: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The forum is not in the crawl list.
    Unknown,
    Unchanged,
    MetadataOnly,
    Crawled(CrawlStats),
    Failed { consecutive_errors: i64 },
    Disabled,
}

/// Run one update cycle for `address` against a fresh snapshot.
///
/// Crawl errors are recorded against the forum and reported through the
/// outcome. Only store errors from the bookkeeping itself are returned.
pub async fn run_update_cycle(
    db: &dyn Database,
    fetcher: &CommentFetcher,
    address: &str,
    snapshot: &SubplebbitSnapshot,
    now: i64,
) -> Result<CycleOutcome> {
    let Some(forum) = db.get_subplebbit(address).await? else {
        return Ok(CycleOutcome::Unknown);
    };
    if !forum.indexing_enabled {
        return Ok(CycleOutcome::Disabled);
    }

    if snapshot.updated_at.is_some() && snapshot.updated_at == forum.last_subplebbit_updated_at {
        return Ok(CycleOutcome::Unchanged);
    }

    let marker = snapshot.posts_marker();
    if marker.is_some() && marker == forum.last_posts_page_cid_new {
        if let Some(updated_at) = snapshot.updated_at {
            db.set_subplebbit_updated_at(address, updated_at).await?;
        }
        debug!(subplebbit = address, "Forum metadata changed, posts unchanged");
        return Ok(CycleOutcome::MetadataOnly);
    }

    match crawl(fetcher, address, snapshot, now).await {
        Ok(stats) => {
            db.record_subplebbit_success(
                address,
                snapshot.public_key(),
                marker.as_deref(),
                snapshot.updated_at,
                now,
            )
            .await?;
            Ok(CycleOutcome::Crawled(stats))
        }
        Err(e) => {
            let consecutive_errors = db
                .record_subplebbit_failure(address, &format!("{e:#}"))
                .await?;
            warn!(
                subplebbit = address,
                consecutive_errors = consecutive_errors,
                error = %e,
                "Forum update failed"
            );

            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                db.disable_subplebbit(address).await?;
                warn!(
                    subplebbit = address,
                    consecutive_errors = consecutive_errors,
                    "Disabling forum after repeated failures"
                );
                return Ok(CycleOutcome::Disabled);
            }
            Ok(CycleOutcome::Failed { consecutive_errors })
        }
    }
}

async fn crawl(
    fetcher: &CommentFetcher,
    address: &str,
    snapshot: &SubplebbitSnapshot,
    now: i64,
) -> Result<CrawlStats> {
    let stats = match snapshot.posts.as_ref() {
        Some(posts) => fetcher.crawl_posts(address, posts, now).await?,
        None => CrawlStats::default(),
    };
    // A forum with an empty queue omits `modQueue`; anything still pending has left it.
    let empty = Pages::default();
    let mod_queue = snapshot.mod_queue.as_ref().unwrap_or(&empty);
    fetcher.crawl_mod_queue(address, mod_queue, now).await?;
    Ok(stats)
}

/// A running subscription. Dropping it without `stop` also ends the task.
pub struct Subscription {
    address: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl Subscription {
    /// Start receiving updates on `handle` and spawn the reader task.
    pub async fn start(
        mut handle: Box<dyn ForumHandle>,
        db: Arc<dyn Database>,
        fetcher: Arc<CommentFetcher>,
    ) -> Result<Self> {
        let address = handle.address().to_string();
        let updates = handle
            .update()
            .await
            .with_context(|| format!("Failed to start updates for {address}"))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(read_updates(handle, updates, stop_rx, db, fetcher));

        info!(subplebbit = address.as_str(), "Subscribed to forum");

        Ok(Self {
            address,
            stop_tx: Some(stop_tx),
            task,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// True once the reader task has ended, e.g. after the forum was disabled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the handle and wait for any in-flight cycle to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        (&mut self.task)
            .await
            .with_context(|| format!("Subscription task for {} panicked", self.address))?
    }
}

async fn read_updates(
    mut handle: Box<dyn ForumHandle>,
    mut updates: mpsc::Receiver<SubplebbitSnapshot>,
    mut stop_rx: oneshot::Receiver<()>,
    db: Arc<dyn Database>,
    fetcher: Arc<CommentFetcher>,
) -> Result<()> {
    let address = handle.address().to_string();
    let updating = Arc::new(Mutex::new(()));
    let (disable_tx, mut disable_rx) = mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = disable_rx.recv() => break,
            snapshot = updates.recv() => {
                let Some(snapshot) = snapshot else {
                    info!(subplebbit = address.as_str(), "Update stream closed");
                    break;
                };

                let Ok(guard) = updating.clone().try_lock_owned() else {
                    debug!(
                        subplebbit = address.as_str(),
                        "Update already in progress, dropping notification"
                    );
                    continue;
                };

                let db = db.clone();
                let fetcher = fetcher.clone();
                let disable_tx = disable_tx.clone();
                let address = address.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    match run_update_cycle(db.as_ref(), &fetcher, &address, &snapshot, unix_now())
                        .await
                    {
                        Ok(CycleOutcome::Disabled) => {
                            let _ = disable_tx.try_send(());
                        }
                        Ok(outcome) => {
                            debug!(subplebbit = address.as_str(), outcome = ?outcome, "Update cycle finished");
                        }
                        Err(e) => {
                            warn!(subplebbit = address.as_str(), error = %e, "Update cycle bookkeeping failed");
                        }
                    }
                });
            }
        }
    }

    let stopped = handle.stop().await;
    let _idle = updating.lock().await;
    info!(subplebbit = address.as_str(), "Unsubscribed from forum");
    stopped.with_context(|| format!("Failed to stop updates for {address}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::DiscoverySource;
    use crate::db::SqliteDatabase;
    use crate::plebbit::client::ForumClient;
    use crate::plebbit::fetch_queue::FetchQueue;
    use crate::plebbit::types::Page;
    use crate::testutil::{page_comment, snapshot, test_conn, wait_until, FakeForumClient};

    const SUB: &str = "forum.eth";

    async fn setup() -> (Arc<SqliteDatabase>, Arc<FakeForumClient>, Arc<CommentFetcher>) {
        let db = Arc::new(SqliteDatabase::new(test_conn()));
        db.add_subplebbit(SUB, None, DiscoverySource::Manual, 1)
            .await
            .unwrap();
        let client = Arc::new(FakeForumClient::default());
        let fetcher = Arc::new(CommentFetcher::new(
            db.clone(),
            client.clone(),
            FetchQueue::new(2),
        ));
        (db, client, fetcher)
    }

    fn posts_page(cid: &str) -> Page {
        Page {
            comments: vec![page_comment(cid, "pk", SUB, "post", 100)],
            next_cid: None,
        }
    }

    #[tokio::test]
    async fn test_cycle_crawls_then_skips_unchanged() {
        let (db, client, fetcher) = setup().await;
        client.add_page("QmPosts1", posts_page("QmA"));

        let snap = snapshot(SUB, 1000, Some("QmPosts1"));
        let outcome = run_update_cycle(db.as_ref(), &fetcher, SUB, &snap, 2000)
            .await
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::Crawled(ref s) if s.comments_stored == 1));

        let forum = db.get_subplebbit(SUB).await.unwrap().unwrap();
        assert_eq!(forum.last_posts_page_cid_new.as_deref(), Some("QmPosts1"));
        assert_eq!(forum.last_subplebbit_updated_at, Some(1000));
        assert_eq!(forum.public_key.as_deref(), Some("forum.eth-key"));

        let again = run_update_cycle(db.as_ref(), &fetcher, SUB, &snap, 2100)
            .await
            .unwrap();
        assert_eq!(again, CycleOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_mod_queue_resolves_pending_items() {
        let (db, client, fetcher) = setup().await;
        let mut queued = snapshot(SUB, 1000, None);
        let mut queue = Pages::default();
        queue.pages.insert(
            "new".into(),
            Page {
                comments: vec![
                    page_comment("QmApproved", "pk", SUB, "post", 100),
                    page_comment("QmDropped", "pk2", SUB, "spam", 100),
                ],
                next_cid: None,
            },
        );
        queued.mod_queue = Some(queue);
        run_update_cycle(db.as_ref(), &fetcher, SUB, &queued, 2000)
            .await
            .unwrap();
        assert_eq!(db.pending_modqueue_cids(SUB).await.unwrap().len(), 2);

        // The queue emptied out, so the next record has no modQueue at all.
        client.add_page("QmPosts1", posts_page("QmApproved"));
        let outcome = run_update_cycle(
            db.as_ref(),
            &fetcher,
            SUB,
            &snapshot(SUB, 1500, Some("QmPosts1")),
            2100,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, CycleOutcome::Crawled(_)));
        assert!(db.pending_modqueue_cids(SUB).await.unwrap().is_empty());
        assert!(db.is_comment_indexed("QmApproved").await.unwrap());
    }

    #[tokio::test]
    async fn test_cycle_metadata_only() {
        let (db, client, fetcher) = setup().await;
        client.add_page("QmPosts1", posts_page("QmA"));
        run_update_cycle(db.as_ref(), &fetcher, SUB, &snapshot(SUB, 1000, Some("QmPosts1")), 2000)
            .await
            .unwrap();

        let outcome = run_update_cycle(
            db.as_ref(),
            &fetcher,
            SUB,
            &snapshot(SUB, 1500, Some("QmPosts1")),
            2100,
        )
        .await
        .unwrap();
        assert_eq!(outcome, CycleOutcome::MetadataOnly);
        assert_eq!(client.fetched_pages().len(), 1);

        let forum = db.get_subplebbit(SUB).await.unwrap().unwrap();
        assert_eq!(forum.last_subplebbit_updated_at, Some(1500));
    }

    #[tokio::test]
    async fn test_cycle_unknown_forum() {
        let (db, _client, fetcher) = setup().await;
        let outcome = run_update_cycle(
            db.as_ref(),
            &fetcher,
            "other.eth",
            &snapshot("other.eth", 1, None),
            2,
        )
        .await
        .unwrap();
        assert_eq!(outcome, CycleOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_repeated_failures_disable_forum() {
        let (db, _client, fetcher) = setup().await;

        for i in 1..MAX_CONSECUTIVE_ERRORS {
            let outcome = run_update_cycle(
                db.as_ref(),
                &fetcher,
                SUB,
                &snapshot(SUB, 1000 + i, Some("QmMissing")),
                2000,
            )
            .await
            .unwrap();
            assert_eq!(outcome, CycleOutcome::Failed { consecutive_errors: i });
        }

        let last = run_update_cycle(
            db.as_ref(),
            &fetcher,
            SUB,
            &snapshot(SUB, 2000, Some("QmMissing")),
            2000,
        )
        .await
        .unwrap();
        assert_eq!(last, CycleOutcome::Disabled);
        assert!(db.list_subplebbits(true).await.unwrap().is_empty());

        let forum = db.get_subplebbit(SUB).await.unwrap().unwrap();
        assert!(forum.last_error.unwrap().contains("QmMissing"));
    }

    #[tokio::test]
    async fn test_subscription_processes_and_stops() {
        let (db, client, fetcher) = setup().await;
        client.add_page("QmPosts1", posts_page("QmA"));

        let handle = client.get_subplebbit(SUB).await.unwrap();
        let subscription = Subscription::start(handle, db.clone(), fetcher)
            .await
            .unwrap();
        assert!(client.push(snapshot(SUB, 1000, Some("QmPosts1"))));

        let db_check = db.clone();
        assert!(
            wait_until(|| {
                let db = db_check.clone();
                async move { db.is_comment_indexed("QmA").await.unwrap() }
            })
            .await
        );

        subscription.stop().await.unwrap();
        assert!(!client.is_subscribed(SUB));
    }

    #[tokio::test]
    async fn test_subscription_ends_when_forum_disabled() {
        let (db, client, fetcher) = setup().await;
        let handle = client.get_subplebbit(SUB).await.unwrap();
        let subscription = Subscription::start(handle, db.clone(), fetcher)
            .await
            .unwrap();

        // Keep notifying until the forum gets disabled; pushes that land
        // while a cycle is running are dropped.
        for i in 0..200 {
            if subscription.is_finished() {
                break;
            }
            client.push(snapshot(SUB, 1000 + i, Some("QmMissing")));
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert!(subscription.is_finished());
        assert!(!client.is_subscribed(SUB));
        let forum = db.get_subplebbit(SUB).await.unwrap().unwrap();
        assert!(!forum.indexing_enabled);
        subscription.stop().await.unwrap();
    }
}
