// Network indexer — keeps a local mirror of every known forum.
//
// The indexer subscribes to each enabled forum, crawls its listings when
// the published record changes, and follows authors' previous comment cids
// to discover forums nobody has told it about yet. Everything it writes
// goes through the Database trait; everything it reads from the network
// goes through one ForumClient and one shared FetchQueue.

pub mod fetcher;
pub mod queries;
pub mod subscription;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::models::DiscoverySource;
use crate::db::Database;
use crate::plebbit::client::ForumClient;
use crate::plebbit::fetch_queue::FetchQueue;
use crate::util::unix_now;

use self::fetcher::{CommentFetcher, DiscoveryLead};
use self::subscription::{Subscription, MAX_CONSECUTIVE_ERRORS};

/// Discovery leads buffered between the fetcher and the discovery task.
const DISCOVERY_BUFFER: usize = 1024;

/// Followed lead cids remembered before the set is reset.
const MAX_REMEMBERED_LEADS: usize = 100_000;

/// Handle to the indexer. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<dyn Database>,
    client: Arc<dyn ForumClient>,
    queue: FetchQueue,
    fetcher: Arc<CommentFetcher>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    leads: Mutex<Option<mpsc::Receiver<DiscoveryLead>>>,
    discovery: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
    running: AtomicBool,
}

impl Indexer {
    pub fn new(db: Arc<dyn Database>, client: Arc<dyn ForumClient>, queue: FetchQueue) -> Self {
        let (lead_tx, lead_rx) = mpsc::channel(DISCOVERY_BUFFER);
        let fetcher = CommentFetcher::new(db.clone(), client.clone(), queue.clone())
            .with_discovery(lead_tx);

        Self {
            inner: Arc::new(Inner {
                db,
                client,
                queue,
                fetcher: Arc::new(fetcher),
                subscriptions: Mutex::new(HashMap::new()),
                leads: Mutex::new(Some(lead_rx)),
                discovery: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Subscribe to every enabled forum and start following discovery leads.
    /// Returns the number of forums subscribed.
    pub async fn start(&self) -> Result<usize> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            bail!("Indexer is already running");
        }

        let Some(leads) = self.inner.leads.lock().await.take() else {
            self.inner.running.store(false, Ordering::SeqCst);
            bail!("Indexer cannot be restarted after it was stopped");
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_discovery(self.clone(), leads, stop_rx));
        *self.inner.discovery.lock().await = Some((stop_tx, task));

        let forums = self.inner.db.list_subplebbits(true).await?;
        let total = forums.len();
        let mut subscribed = 0;
        for forum in forums {
            if self.subscribe(&forum.address).await? {
                subscribed += 1;
            }
        }

        info!(
            forums = total,
            subscribed = subscribed,
            fetch_concurrency = self.inner.queue.max_concurrent(),
            "Indexer started"
        );
        Ok(subscribed)
    }

    /// Add a forum to the crawl list and, if the indexer is running,
    /// subscribe to it. Returns true when the forum was not known before.
    pub async fn add_subplebbit(&self, address: &str, source: DiscoverySource) -> Result<bool> {
        let added = self
            .inner
            .db
            .add_subplebbit(address, None, source, unix_now())
            .await?;

        if self.is_running() {
            let enabled = self
                .inner
                .db
                .get_subplebbit(address)
                .await?
                .is_some_and(|forum| forum.indexing_enabled);
            if enabled {
                self.subscribe(address).await?;
            }
        }

        Ok(added)
    }

    /// Addresses with a live subscription, sorted.
    pub async fn subscribed(&self) -> Vec<String> {
        let subscriptions = self.inner.subscriptions.lock().await;
        let mut addresses: Vec<String> = subscriptions
            .values()
            .filter(|s| !s.is_finished())
            .map(|s| s.address().to_string())
            .collect();
        addresses.sort();
        addresses
    }

    /// Stop discovery and every subscription, then release the client.
    ///
    /// A subscription that fails to stop is logged and the rest still stop.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some((stop_tx, task)) = self.inner.discovery.lock().await.take() {
            let _ = stop_tx.send(());
            if let Err(e) = task.await {
                warn!(error = %e, "Discovery task ended abnormally");
            }
        }

        let subscriptions: Vec<Subscription> = self
            .inner
            .subscriptions
            .lock()
            .await
            .drain()
            .map(|(_, s)| s)
            .collect();
        let total = subscriptions.len();

        let results = futures::future::join_all(subscriptions.into_iter().map(|s| async move {
            let address = s.address().to_string();
            (address, s.stop().await)
        }))
        .await;

        let mut failures = 0;
        for (address, result) in results {
            if let Err(e) = result {
                failures += 1;
                warn!(subplebbit = address.as_str(), error = %e, "Failed to stop subscription");
            }
        }

        self.inner
            .client
            .destroy()
            .await
            .context("Failed to release forum client")?;

        info!(
            subscriptions = total,
            failures = failures,
            "Indexer stopped"
        );
        Ok(())
    }

    /// Make sure `address` has a live subscription. Returns false when the
    /// forum could not be opened; that failure counts against the forum.
    async fn subscribe(&self, address: &str) -> Result<bool> {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        subscriptions.retain(|_, s| !s.is_finished());
        if subscriptions.contains_key(address) {
            return Ok(true);
        }

        let opened = match self.inner.client.get_subplebbit(address).await {
            Ok(handle) => {
                Subscription::start(handle, self.inner.db.clone(), self.inner.fetcher.clone())
                    .await
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(subscription) => {
                subscriptions.insert(address.to_string(), subscription);
                Ok(true)
            }
            Err(e) => {
                let consecutive_errors = self
                    .inner
                    .db
                    .record_subplebbit_failure(address, &format!("{e:#}"))
                    .await?;
                warn!(
                    subplebbit = address,
                    consecutive_errors = consecutive_errors,
                    error = %e,
                    "Failed to subscribe to forum"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    self.inner.db.disable_subplebbit(address).await?;
                    warn!(subplebbit = address, "Disabling unreachable forum");
                }
                Ok(false)
            }
        }
    }

    /// Resolve a lead's comment and add its forum if it is new.
    /// Returns the newly discovered address.
    async fn follow_lead(&self, lead: &DiscoveryLead) -> Result<Option<String>> {
        let db = &self.inner.db;
        if db.is_comment_indexed(&lead.comment_cid).await? {
            return Ok(None);
        }

        let comment = self
            .inner
            .queue
            .run(|| self.inner.client.get_comment(&lead.comment_cid))
            .await
            .with_context(|| format!("Failed to fetch comment {}", lead.comment_cid))?;

        let address = comment.subplebbit_address;
        if address == lead.seen_in {
            return Ok(None);
        }

        let added = db
            .add_subplebbit(&address, None, DiscoverySource::PreviousCommentCid, unix_now())
            .await?;
        if !added {
            return Ok(None);
        }

        info!(
            subplebbit = address.as_str(),
            via_comment = lead.comment_cid.as_str(),
            seen_in = lead.seen_in.as_str(),
            "Discovered forum"
        );
        self.subscribe(&address).await?;
        Ok(Some(address))
    }
}

async fn run_discovery(
    indexer: Indexer,
    mut leads: mpsc::Receiver<DiscoveryLead>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut followed = HashSet::new();

    loop {
        let lead = tokio::select! {
            _ = &mut stop_rx => break,
            lead = leads.recv() => match lead {
                Some(lead) => lead,
                None => break,
            },
        };

        if followed.len() >= MAX_REMEMBERED_LEADS {
            followed.clear();
        }
        if !followed.insert(lead.comment_cid.clone()) {
            continue;
        }

        if let Err(e) = indexer.follow_lead(&lead).await {
            debug!(
                cid = lead.comment_cid.as_str(),
                error = %e,
                "Failed to follow discovery lead"
            );
        }
    }
}
