// Database schema — table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.
//
// All timestamps are unix seconds. Publication rows hang off their challenge
// session and disappear with it.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent; runs on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("Failed to enable foreign keys")?;

    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One evaluation lifecycle per publication
        CREATE TABLE IF NOT EXISTS challenge_sessions (
            session_id TEXT PRIMARY KEY,
            author_address TEXT NOT NULL,
            author_public_key TEXT NOT NULL,
            subplebbit_address TEXT NOT NULL,
            subplebbit_public_key TEXT,
            risk_score REAL NOT NULL,
            challenge_tier TEXT NOT NULL,      -- autoAccept / captchaOnly / captchaAndOauth / autoReject
            status TEXT NOT NULL,              -- pending / completed / failed
            captcha_completed INTEGER NOT NULL DEFAULT 0,
            oauth_identity TEXT,               -- 'provider:id'
            received_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            completed_at INTEGER
        );

        -- Publications received directly (local evidence)
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES challenge_sessions(session_id) ON DELETE CASCADE,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,         -- full author object, wallets included
            subplebbit_address TEXT NOT NULL,
            parent_cid TEXT,                   -- null for posts
            content TEXT,
            title TEXT,
            link TEXT,
            timestamp INTEGER NOT NULL,
            received_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES challenge_sessions(session_id) ON DELETE CASCADE,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,
            subplebbit_address TEXT NOT NULL,
            comment_cid TEXT NOT NULL,
            vote INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            received_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comment_edits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES challenge_sessions(session_id) ON DELETE CASCADE,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,
            subplebbit_address TEXT NOT NULL,
            comment_cid TEXT NOT NULL,
            content TEXT,
            deleted INTEGER,
            reason TEXT,
            timestamp INTEGER NOT NULL,
            received_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comment_moderations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES challenge_sessions(session_id) ON DELETE CASCADE,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,
            subplebbit_address TEXT NOT NULL,
            comment_cid TEXT NOT NULL,
            moderation_json TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            received_at INTEGER NOT NULL
        );

        -- Forums known to the indexer
        CREATE TABLE IF NOT EXISTS indexed_subplebbits (
            address TEXT PRIMARY KEY,
            public_key TEXT,
            discovered_via TEXT NOT NULL,      -- evaluation / previousCommentCid / manual
            discovered_at INTEGER NOT NULL,
            indexing_enabled INTEGER NOT NULL DEFAULT 1,
            last_posts_page_cid_new TEXT,      -- posts listing marker
            last_subplebbit_updated_at INTEGER,
            consecutive_errors INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        -- Crawled immutable comment records (write-once per cid)
        CREATE TABLE IF NOT EXISTS indexed_comments_ipfs (
            cid TEXT PRIMARY KEY,
            subplebbit_address TEXT NOT NULL,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,
            signature_json TEXT NOT NULL,
            parent_cid TEXT,
            post_cid TEXT,
            content TEXT,
            title TEXT,
            link TEXT,
            timestamp INTEGER NOT NULL,
            depth INTEGER,
            protocol_version TEXT,
            fetched_at INTEGER NOT NULL
        );

        -- Crawled mutable comment state
        CREATE TABLE IF NOT EXISTS indexed_comments_update (
            cid TEXT PRIMARY KEY REFERENCES indexed_comments_ipfs(cid) ON DELETE CASCADE,
            author_post_score INTEGER,
            author_reply_score INTEGER,
            author_ban_expires_at INTEGER,
            upvote_count INTEGER NOT NULL DEFAULT 0,
            downvote_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            removed INTEGER,
            deleted INTEGER,
            locked INTEGER,
            pinned INTEGER,
            approved INTEGER,
            updated_at INTEGER,
            last_replies_page_cid TEXT,        -- replies marker, gates reply re-fetch
            fetched_at INTEGER,
            fetch_failure_count INTEGER NOT NULL DEFAULT 0,
            last_fetch_error TEXT
        );

        -- Pending-approval submissions seen in forum moderation queues
        CREATE TABLE IF NOT EXISTS modqueue_comments_ipfs (
            cid TEXT PRIMARY KEY,
            subplebbit_address TEXT NOT NULL,
            author_public_key TEXT NOT NULL,
            author_address TEXT NOT NULL,
            author_json TEXT NOT NULL,
            parent_cid TEXT,
            content TEXT,
            title TEXT,
            link TEXT,
            timestamp INTEGER NOT NULL,
            first_seen_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS modqueue_comments_update (
            cid TEXT PRIMARY KEY REFERENCES modqueue_comments_ipfs(cid) ON DELETE CASCADE,
            author_post_score INTEGER,
            author_reply_score INTEGER,
            author_ban_expires_at INTEGER,
            pending_approval INTEGER NOT NULL DEFAULT 1,
            resolved INTEGER NOT NULL DEFAULT 0,
            accepted INTEGER,                  -- null until resolved
            resolved_at INTEGER,
            last_seen_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_author
            ON challenge_sessions(author_public_key);
        CREATE INDEX IF NOT EXISTS idx_sessions_oauth
            ON challenge_sessions(oauth_identity);
        CREATE INDEX IF NOT EXISTS idx_sessions_expiry
            ON challenge_sessions(status, expires_at);

        CREATE INDEX IF NOT EXISTS idx_comments_author
            ON comments(author_public_key, received_at);
        CREATE INDEX IF NOT EXISTS idx_comments_received
            ON comments(received_at);
        CREATE INDEX IF NOT EXISTS idx_votes_author
            ON votes(author_public_key, received_at);
        CREATE INDEX IF NOT EXISTS idx_edits_author
            ON comment_edits(author_public_key, received_at);
        CREATE INDEX IF NOT EXISTS idx_moderations_author
            ON comment_moderations(author_public_key, received_at);

        CREATE INDEX IF NOT EXISTS idx_indexed_author
            ON indexed_comments_ipfs(author_public_key, timestamp);
        CREATE INDEX IF NOT EXISTS idx_indexed_timestamp
            ON indexed_comments_ipfs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_modqueue_sub
            ON modqueue_comments_ipfs(subplebbit_address);
        CREATE INDEX IF NOT EXISTS idx_modqueue_author
            ON modqueue_comments_ipfs(author_public_key);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: track when each forum last completed a crawl cycle.
    // Shown by the status command; not used for change detection.
    run_migration(conn, 2, |c| {
        c.execute_batch("ALTER TABLE indexed_subplebbits ADD COLUMN last_indexed_at INTEGER;")
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
