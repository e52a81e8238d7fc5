// Database trait — async interface over the evidence, session and indexer stores.
//
// The async indexer tasks and the challenge flow both go through this
// trait. Implementations hold the connection behind an async mutex, so each
// method is one short critical section and every statement auto-commits.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    ChallengeSession, DbStats, DiscoverySource, IndexedSubplebbit, SessionStatus, StoredComment,
};
use crate::challenge::request::{DecryptedChallengeRequest, Publication};
use crate::plebbit::types::PageComment;
use crate::risk::{EvaluationInputs, RiskScoreResult};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Risk ---

    /// Score a request against everything currently stored.
    async fn calculate_risk(
        &self,
        request: &DecryptedChallengeRequest,
        now: i64,
        inputs: &EvaluationInputs,
    ) -> Result<RiskScoreResult>;

    // --- Challenge sessions ---

    /// Store a new session and its publication together.
    async fn record_evaluation(
        &self,
        session: &ChallengeSession,
        publication: &Publication,
    ) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChallengeSession>>;

    /// Update lifecycle fields. An `oauth_identity` of None keeps the current one.
    async fn update_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        captcha_completed: bool,
        oauth_identity: Option<&str>,
        completed_at: Option<i64>,
    ) -> Result<()>;

    /// Delete expired pending sessions; returns how many were removed.
    async fn purge_expired_sessions(&self, now: i64) -> Result<usize>;

    // --- Indexed forums ---

    /// Add a forum to the crawl list. Returns true when it was not known before.
    async fn add_subplebbit(
        &self,
        address: &str,
        public_key: Option<&str>,
        source: DiscoverySource,
        now: i64,
    ) -> Result<bool>;

    async fn get_subplebbit(&self, address: &str) -> Result<Option<IndexedSubplebbit>>;

    async fn list_subplebbits(&self, enabled_only: bool) -> Result<Vec<IndexedSubplebbit>>;

    /// Record a metadata-only change.
    async fn set_subplebbit_updated_at(&self, address: &str, updated_at: i64) -> Result<()>;

    /// Record a completed crawl and reset the error count.
    async fn record_subplebbit_success(
        &self,
        address: &str,
        public_key: Option<&str>,
        posts_marker: Option<&str>,
        updated_at: Option<i64>,
        now: i64,
    ) -> Result<()>;

    /// Record a failed crawl; returns the new consecutive error count.
    async fn record_subplebbit_failure(&self, address: &str, error: &str) -> Result<i64>;

    async fn disable_subplebbit(&self, address: &str) -> Result<()>;

    // --- Indexed comments ---

    /// Store a crawled comment and its latest update. Reports the replies
    /// marker stored before this call and whether the update was applied.
    async fn store_page_comment(&self, item: &PageComment, now: i64) -> Result<StoredComment>;

    async fn set_last_replies_page_cid(
        &self,
        cid: &str,
        page_cid: &str,
        updated_at: i64,
    ) -> Result<()>;

    async fn record_comment_fetch_failure(&self, cid: &str, error: &str) -> Result<()>;

    async fn is_comment_indexed(&self, cid: &str) -> Result<bool>;

    // --- Mod queue ---

    async fn upsert_modqueue_comment(&self, item: &PageComment, now: i64) -> Result<()>;

    async fn pending_modqueue_cids(&self, subplebbit_address: &str) -> Result<Vec<String>>;

    /// Mark a queue item accepted or rejected. Returns false if it was already resolved.
    async fn resolve_modqueue_item(&self, cid: &str, accepted: bool, now: i64) -> Result<bool>;

    // --- Stats ---

    async fn db_stats(&self) -> Result<DbStats>;
}
