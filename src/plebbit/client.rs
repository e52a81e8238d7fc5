// Remote forum client interface.
//
// The indexer never talks to the network directly; it goes through a
// ForumClient that is constructed once and passed in explicitly. Live
// forum updates arrive as snapshots on a channel owned by a ForumHandle,
// one handle per subscribed forum.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{CommentIpfs, Page, SubplebbitSnapshot};

#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Open a handle to a forum. Does not start receiving updates yet.
    async fn get_subplebbit(&self, address: &str) -> Result<Box<dyn ForumHandle>>;

    /// Fetch one page of a paginated listing by its cid.
    async fn get_page(&self, subplebbit_address: &str, page_cid: &str) -> Result<Page>;

    /// Fetch a single comment's immutable record.
    async fn get_comment(&self, cid: &str) -> Result<CommentIpfs>;

    /// Release client resources. Called once, after every handle is stopped.
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// A live connection to one forum.
#[async_trait]
pub trait ForumHandle: Send {
    fn address(&self) -> &str;

    /// Start the update loop and return the stream of snapshots.
    ///
    /// The channel closes when the handle is stopped or the remote side
    /// goes away for good.
    async fn update(&mut self) -> Result<mpsc::Receiver<SubplebbitSnapshot>>;

    /// Stop the update loop. Safe to call more than once.
    async fn stop(&mut self) -> Result<()>;
}
