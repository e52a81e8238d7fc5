// Comment fetcher — walks a forum's listings and stores what it finds.
//
// A crawl covers three things:
// 1. The posts listing: the first page chain (preferring "new"), or the
//    inlined page when the forum publishes no page cids
// 2. Reply trees: an explicit worklist instead of recursion, skipping any
//    comment whose replies marker has not moved since the last crawl
// 3. The moderation queue: items are stored, and items that left the queue
//    are resolved as accepted (now indexed) or rejected
//
// Every network call goes through the shared FetchQueue. Authors' previous
// comment cids are reported as discovery leads on a channel.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::plebbit::client::ForumClient;
use crate::plebbit::fetch_queue::FetchQueue;
use crate::plebbit::types::{PageComment, Pages};

/// A comment cid seen in an author's history, pointing at a possibly
/// unknown forum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryLead {
    pub comment_cid: String,
    pub seen_in: String,
}

/// What one posts crawl did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub comments_stored: usize,
    pub reply_trees_fetched: usize,
    pub reply_trees_unchanged: usize,
    pub reply_tree_failures: usize,
    /// Comments whose update was older than the one already stored.
    pub stale_updates: usize,
}

/// What one moderation queue crawl did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModQueueStats {
    pub in_queue: usize,
    pub accepted: usize,
    pub rejected: usize,
}

pub struct CommentFetcher {
    db: Arc<dyn Database>,
    client: Arc<dyn ForumClient>,
    queue: FetchQueue,
    leads: Option<mpsc::Sender<DiscoveryLead>>,
}

impl CommentFetcher {
    pub fn new(db: Arc<dyn Database>, client: Arc<dyn ForumClient>, queue: FetchQueue) -> Self {
        Self {
            db,
            client,
            queue,
            leads: None,
        }
    }

    /// Report discovery leads on `sender`. Leads are dropped when the channel is full.
    pub fn with_discovery(mut self, sender: mpsc::Sender<DiscoveryLead>) -> Self {
        self.leads = Some(sender);
        self
    }

    /// Load every comment of a listing. Returns the comments and the number
    /// of pages fetched over the network.
    pub async fn load_listing(
        &self,
        subplebbit_address: &str,
        pages: &Pages,
    ) -> Result<(Vec<PageComment>, usize)> {
        let mut comments = Vec::new();
        let mut fetched = 0;

        let mut next = match pages.preferred_page_cid() {
            Some(cid) => Some(cid.to_string()),
            None => {
                // Fully inlined listing; it may still continue in a chain.
                let Some(page) = pages.preferred_inline_page() else {
                    return Ok((comments, fetched));
                };
                comments.extend(page.comments.iter().cloned());
                page.next_cid.clone()
            }
        };

        let mut visited = HashSet::new();
        while let Some(page_cid) = next.take() {
            if !visited.insert(page_cid.clone()) {
                warn!(
                    subplebbit = subplebbit_address,
                    page_cid = page_cid.as_str(),
                    "Page chain loops back on itself, stopping"
                );
                break;
            }

            let page = self
                .queue
                .run(|| self.client.get_page(subplebbit_address, &page_cid))
                .await
                .with_context(|| format!("Failed to fetch page {page_cid}"))?;
            fetched += 1;

            debug!(
                subplebbit = subplebbit_address,
                page_cid = page_cid.as_str(),
                comments = page.comments.len(),
                "Fetched page"
            );

            comments.extend(page.comments);
            next = page.next_cid;
        }

        Ok((comments, fetched))
    }

    /// Crawl the posts listing and every reply tree that changed.
    ///
    /// A failure to load the posts listing fails the crawl. A failure to
    /// load one reply tree is recorded against that comment and the crawl
    /// goes on; its marker is left alone so the next crawl retries it.
    pub async fn crawl_posts(
        &self,
        subplebbit_address: &str,
        posts: &Pages,
        now: i64,
    ) -> Result<CrawlStats> {
        let mut stats = CrawlStats::default();
        let mut reported = HashSet::new();

        let (top_level, fetched) = self.load_listing(subplebbit_address, posts).await?;
        stats.pages_fetched += fetched;

        let mut worklist: VecDeque<(PageComment, u32)> =
            top_level.into_iter().map(|item| (item, 0)).collect();

        while let Some((item, depth)) = worklist.pop_front() {
            let cid = item.cid().to_string();
            let stored = self
                .db
                .store_page_comment(&item, now)
                .await
                .with_context(|| format!("Failed to store comment {cid}"))?;
            stats.comments_stored += 1;

            self.report_leads(&item, &mut reported);

            // Its replies belong to an older state than the one on record.
            if !stored.update_applied {
                stats.stale_updates += 1;
                continue;
            }

            let Some(replies) = item.comment_update.replies.as_ref() else {
                continue;
            };
            if replies.is_empty() {
                continue;
            }

            let marker = replies.marker();
            if marker.is_some() && marker == stored.previous_replies_marker {
                stats.reply_trees_unchanged += 1;
                continue;
            }

            match self.load_listing(subplebbit_address, replies).await {
                Ok((children, fetched)) => {
                    stats.pages_fetched += fetched;
                    stats.reply_trees_fetched += 1;
                    debug!(
                        cid = cid.as_str(),
                        depth = depth,
                        replies = children.len(),
                        "Loaded reply tree"
                    );
                    if let Some(marker) = marker.as_deref() {
                        self.db
                            .set_last_replies_page_cid(&cid, marker, item.comment_update.updated_at)
                            .await?;
                    }
                    worklist.extend(children.into_iter().map(|child| (child, depth + 1)));
                }
                Err(e) => {
                    stats.reply_tree_failures += 1;
                    warn!(
                        cid = cid.as_str(),
                        error = %e,
                        "Failed to load reply tree"
                    );
                    self.db
                        .record_comment_fetch_failure(&cid, &format!("{e:#}"))
                        .await?;
                }
            }
        }

        info!(
            subplebbit = subplebbit_address,
            pages = stats.pages_fetched,
            comments = stats.comments_stored,
            reply_trees = stats.reply_trees_fetched,
            unchanged = stats.reply_trees_unchanged,
            stale = stats.stale_updates,
            "Posts crawl complete"
        );

        Ok(stats)
    }

    /// Store the current moderation queue and resolve items that left it.
    ///
    /// Run this after the posts crawl: an item that left the queue counts
    /// as accepted only if it has been indexed by then.
    pub async fn crawl_mod_queue(
        &self,
        subplebbit_address: &str,
        mod_queue: &Pages,
        now: i64,
    ) -> Result<ModQueueStats> {
        let mut stats = ModQueueStats::default();

        let (items, _) = self.load_listing(subplebbit_address, mod_queue).await?;
        let mut in_queue = HashSet::new();
        for item in &items {
            self.db.upsert_modqueue_comment(item, now).await?;
            in_queue.insert(item.cid().to_string());
        }
        stats.in_queue = in_queue.len();

        for cid in self.db.pending_modqueue_cids(subplebbit_address).await? {
            if in_queue.contains(&cid) {
                continue;
            }
            let accepted = self.db.is_comment_indexed(&cid).await?;
            if self.db.resolve_modqueue_item(&cid, accepted, now).await? {
                if accepted {
                    stats.accepted += 1;
                } else {
                    stats.rejected += 1;
                }
            }
        }

        if stats.accepted + stats.rejected > 0 {
            info!(
                subplebbit = subplebbit_address,
                accepted = stats.accepted,
                rejected = stats.rejected,
                "Resolved mod queue items"
            );
        }

        Ok(stats)
    }

    fn report_leads(&self, item: &PageComment, reported: &mut HashSet<String>) {
        let Some(sender) = self.leads.as_ref() else {
            return;
        };

        let author = &item.comment.author;
        let candidates = [
            author.previous_comment_cid.as_deref(),
            author
                .subplebbit
                .as_ref()
                .and_then(|s| s.last_comment_cid.as_deref()),
            item.comment_update
                .author_subplebbit()
                .and_then(|s| s.last_comment_cid.as_deref()),
        ];

        for cid in candidates.into_iter().flatten() {
            if cid == item.cid() || !reported.insert(cid.to_string()) {
                continue;
            }
            let lead = DiscoveryLead {
                comment_cid: cid.to_string(),
                seen_in: item.comment.subplebbit_address.clone(),
            };
            if sender.try_send(lead).is_err() {
                debug!(cid = cid, "Discovery channel full, dropping lead");
            }
        }
    }
}
