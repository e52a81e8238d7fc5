// SqliteDatabase — rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.
//
// Risk evaluation runs under the same lock: it only reads, and it sees one
// consistent snapshot of both stores.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    ChallengeSession, DbStats, DiscoverySource, IndexedSubplebbit, SessionStatus, StoredComment,
};
use super::traits::Database;
use crate::challenge::request::{DecryptedChallengeRequest, Publication};
use crate::combined::CombinedDataService;
use crate::indexer::queries as indexer_queries;
use crate::plebbit::types::PageComment;
use crate::risk::{calculate_risk_score, EvaluationInputs, RiskContext, RiskScoreResult};

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn calculate_risk(
        &self,
        request: &DecryptedChallengeRequest,
        now: i64,
        inputs: &EvaluationInputs,
    ) -> Result<RiskScoreResult> {
        let conn = self.conn.lock().await;
        let ctx = RiskContext {
            request,
            now,
            data: CombinedDataService::new(&conn),
            inputs,
        };
        calculate_risk_score(&ctx)
    }

    async fn record_evaluation(
        &self,
        session: &ChallengeSession,
        publication: &Publication,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::record_evaluation(&conn, session, publication)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChallengeSession>> {
        let conn = self.conn.lock().await;
        super::queries::get_session(&conn, session_id)
    }

    async fn update_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        captcha_completed: bool,
        oauth_identity: Option<&str>,
        completed_at: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_session(
            &conn,
            session_id,
            status,
            captcha_completed,
            oauth_identity,
            completed_at,
        )
    }

    async fn purge_expired_sessions(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        super::queries::purge_expired_sessions(&conn, now)
    }

    async fn add_subplebbit(
        &self,
        address: &str,
        public_key: Option<&str>,
        source: DiscoverySource,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let added = indexer_queries::add_subplebbit(&conn, address, public_key, source, now)?;
        // A manual add is the intervention that brings a disabled forum back.
        if !added && source == DiscoverySource::Manual {
            indexer_queries::enable_subplebbit(&conn, address)?;
        }
        Ok(added)
    }

    async fn get_subplebbit(&self, address: &str) -> Result<Option<IndexedSubplebbit>> {
        let conn = self.conn.lock().await;
        indexer_queries::get_subplebbit(&conn, address)
    }

    async fn list_subplebbits(&self, enabled_only: bool) -> Result<Vec<IndexedSubplebbit>> {
        let conn = self.conn.lock().await;
        indexer_queries::list_subplebbits(&conn, enabled_only)
    }

    async fn set_subplebbit_updated_at(&self, address: &str, updated_at: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::set_subplebbit_updated_at(&conn, address, updated_at)
    }

    async fn record_subplebbit_success(
        &self,
        address: &str,
        public_key: Option<&str>,
        posts_marker: Option<&str>,
        updated_at: Option<i64>,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::record_subplebbit_success(
            &conn,
            address,
            public_key,
            posts_marker,
            updated_at,
            now,
        )
    }

    async fn record_subplebbit_failure(&self, address: &str, error: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        indexer_queries::record_subplebbit_failure(&conn, address, error)
    }

    async fn disable_subplebbit(&self, address: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::disable_subplebbit(&conn, address)
    }

    async fn store_page_comment(&self, item: &PageComment, now: i64) -> Result<StoredComment> {
        let conn = self.conn.lock().await;
        indexer_queries::store_page_comment(&conn, item, now)
    }

    async fn set_last_replies_page_cid(
        &self,
        cid: &str,
        page_cid: &str,
        updated_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::set_last_replies_page_cid(&conn, cid, page_cid, updated_at)
    }

    async fn record_comment_fetch_failure(&self, cid: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::record_comment_fetch_failure(&conn, cid, error)
    }

    async fn is_comment_indexed(&self, cid: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        indexer_queries::is_comment_indexed(&conn, cid)
    }

    async fn upsert_modqueue_comment(&self, item: &PageComment, now: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        indexer_queries::upsert_modqueue_comment(&conn, item, now)
    }

    async fn pending_modqueue_cids(&self, subplebbit_address: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        indexer_queries::pending_modqueue_cids(&conn, subplebbit_address)
    }

    async fn resolve_modqueue_item(&self, cid: &str, accepted: bool, now: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        indexer_queries::resolve_modqueue_item(&conn, cid, accepted, now)
    }

    async fn db_stats(&self) -> Result<DbStats> {
        let conn = self.conn.lock().await;
        super::queries::db_stats(&conn)
    }
}
