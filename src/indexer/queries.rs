// Indexer store queries — forums, crawled comments, and moderation queues.
//
// Comment identity rows are write-once (a cid can never change content);
// update rows are upserted but never moved backwards in `updated_at`.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::db::models::{
    DiscoverySource, IndexedSubplebbit, KarmaRecord, LinkRecord, ModerationStats,
    StoredComment, SubplebbitBanRecord, TextField, TextRecord, VelocityCounts,
};
use crate::db::queries::{like_any, parse_column, window_params};
use crate::plebbit::types::{AuthorSubplebbit, CommentIpfs, PageComment};

// --- Forums ---

/// Register a forum. Returns false if it was already known.
pub fn add_subplebbit(
    conn: &Connection,
    address: &str,
    public_key: Option<&str>,
    source: DiscoverySource,
    now: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO indexed_subplebbits (address, public_key, discovered_via, discovered_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(address) DO NOTHING",
        params![address, public_key, source.as_str(), now],
    )?;
    Ok(inserted > 0)
}

const SUBPLEBBIT_COLUMNS: &str = "address, public_key, discovered_via, discovered_at,
    indexing_enabled, last_posts_page_cid_new, last_subplebbit_updated_at,
    consecutive_errors, last_error, last_indexed_at";

fn subplebbit_from_row(row: &Row<'_>) -> rusqlite::Result<IndexedSubplebbit> {
    let source: String = row.get(2)?;
    Ok(IndexedSubplebbit {
        address: row.get(0)?,
        public_key: row.get(1)?,
        discovered_via: parse_column(2, &source, DiscoverySource::parse)?,
        discovered_at: row.get(3)?,
        indexing_enabled: row.get(4)?,
        last_posts_page_cid_new: row.get(5)?,
        last_subplebbit_updated_at: row.get(6)?,
        consecutive_errors: row.get(7)?,
        last_error: row.get(8)?,
        last_indexed_at: row.get(9)?,
    })
}

pub fn get_subplebbit(conn: &Connection, address: &str) -> Result<Option<IndexedSubplebbit>> {
    let sql = format!("SELECT {SUBPLEBBIT_COLUMNS} FROM indexed_subplebbits WHERE address = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row(params![address], subplebbit_from_row)
        .optional()?;
    Ok(row)
}

/// All known forums, optionally only those still being indexed.
pub fn list_subplebbits(conn: &Connection, enabled_only: bool) -> Result<Vec<IndexedSubplebbit>> {
    let filter = if enabled_only {
        "WHERE indexing_enabled = 1"
    } else {
        ""
    };
    let sql = format!("SELECT {SUBPLEBBIT_COLUMNS} FROM indexed_subplebbits {filter} ORDER BY address");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], subplebbit_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Metadata-only change: remember the new updatedAt without touching the posts marker.
pub fn set_subplebbit_updated_at(conn: &Connection, address: &str, updated_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE indexed_subplebbits SET last_subplebbit_updated_at = ?2 WHERE address = ?1",
        params![address, updated_at],
    )?;
    Ok(())
}

/// A crawl cycle finished: store both markers and clear the error streak.
pub fn record_subplebbit_success(
    conn: &Connection,
    address: &str,
    public_key: Option<&str>,
    posts_marker: Option<&str>,
    updated_at: Option<i64>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE indexed_subplebbits SET
            public_key = COALESCE(?2, public_key),
            last_posts_page_cid_new = ?3,
            last_subplebbit_updated_at = COALESCE(?4, last_subplebbit_updated_at),
            consecutive_errors = 0,
            last_error = NULL,
            last_indexed_at = ?5
         WHERE address = ?1",
        params![address, public_key, posts_marker, updated_at, now],
    )?;
    Ok(())
}

/// A crawl cycle failed. Returns the new consecutive error count.
pub fn record_subplebbit_failure(conn: &Connection, address: &str, error: &str) -> Result<i64> {
    conn.execute(
        "UPDATE indexed_subplebbits SET
            consecutive_errors = consecutive_errors + 1,
            last_error = ?2
         WHERE address = ?1",
        params![address, error],
    )?;
    let count = conn
        .query_row(
            "SELECT consecutive_errors FROM indexed_subplebbits WHERE address = ?1",
            params![address],
            |row| row.get(0),
        )
        .with_context(|| format!("Subplebbit {address} is not registered"))?;
    Ok(count)
}

pub fn disable_subplebbit(conn: &Connection, address: &str) -> Result<()> {
    conn.execute(
        "UPDATE indexed_subplebbits SET indexing_enabled = 0 WHERE address = ?1",
        params![address],
    )?;
    Ok(())
}

/// Turn indexing back on and forget the error streak. Only manual adds do this.
pub fn enable_subplebbit(conn: &Connection, address: &str) -> Result<()> {
    conn.execute(
        "UPDATE indexed_subplebbits SET indexing_enabled = 1, consecutive_errors = 0
         WHERE address = ?1",
        params![address],
    )?;
    Ok(())
}

// --- Crawled comments ---

/// Insert a comment's immutable record. Returns false if the cid was already stored.
pub fn insert_comment_ipfs(
    conn: &Connection,
    cid: &str,
    comment: &CommentIpfs,
    now: i64,
) -> Result<bool> {
    let author_json = serde_json::to_string(&comment.author)?;
    let signature_json = serde_json::to_string(&comment.signature)?;
    let inserted = conn
        .execute(
            "INSERT INTO indexed_comments_ipfs (cid, subplebbit_address, author_public_key,
                author_address, author_json, signature_json, parent_cid, post_cid, content, title,
                link, timestamp, depth, protocol_version, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(cid) DO NOTHING",
            params![
                cid,
                comment.subplebbit_address,
                comment.signature.public_key,
                comment.author.address,
                author_json,
                signature_json,
                comment.parent_cid,
                comment.post_cid,
                comment.content,
                comment.title,
                comment.link,
                comment.timestamp,
                comment.depth,
                comment.protocol_version,
                now
            ],
        )
        .with_context(|| format!("Failed to store comment {cid}"))?;
    Ok(inserted > 0)
}

/// The author's per-forum state as of this item: the update's view wins
/// over whatever the immutable record carried.
fn item_author_subplebbit(item: &PageComment) -> Option<&AuthorSubplebbit> {
    item.comment_update
        .author_subplebbit()
        .or(item.comment.author.subplebbit.as_ref())
}

/// Upsert a comment's mutable state. Older updates never overwrite newer ones,
/// and the replies marker is left alone. Returns false when the update was
/// older than the stored one and dropped.
pub fn upsert_comment_update(conn: &Connection, item: &PageComment, now: i64) -> Result<bool> {
    let update = &item.comment_update;
    let author = item_author_subplebbit(item);
    let changed = conn.execute(
        "INSERT INTO indexed_comments_update (cid, author_post_score, author_reply_score,
            author_ban_expires_at, upvote_count, downvote_count, reply_count, removed, deleted,
            locked, pinned, approved, updated_at, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(cid) DO UPDATE SET
            author_post_score = excluded.author_post_score,
            author_reply_score = excluded.author_reply_score,
            author_ban_expires_at = excluded.author_ban_expires_at,
            upvote_count = excluded.upvote_count,
            downvote_count = excluded.downvote_count,
            reply_count = excluded.reply_count,
            removed = excluded.removed,
            deleted = excluded.deleted,
            locked = excluded.locked,
            pinned = excluded.pinned,
            approved = excluded.approved,
            updated_at = excluded.updated_at,
            fetched_at = excluded.fetched_at
         WHERE excluded.updated_at >= COALESCE(indexed_comments_update.updated_at, 0)",
        params![
            update.cid,
            author.map(|a| a.post_score),
            author.map(|a| a.reply_score),
            author.and_then(|a| a.ban_expires_at),
            update.upvote_count,
            update.downvote_count,
            update.reply_count,
            update.removed,
            update.deleted,
            update.locked,
            update.pinned,
            update.approved,
            update.updated_at,
            now
        ],
    )
    .with_context(|| format!("Failed to store update for {}", update.cid))?;
    Ok(changed > 0)
}

/// Store a crawled comment and its update. Reports the replies marker that
/// was stored before, so the caller can tell whether the reply tree moved,
/// and whether the update was newer than what was already known.
pub fn store_page_comment(conn: &Connection, item: &PageComment, now: i64) -> Result<StoredComment> {
    let previous_replies_marker = get_last_replies_page_cid(conn, item.cid())?;
    insert_comment_ipfs(conn, item.cid(), &item.comment, now)?;
    let update_applied = upsert_comment_update(conn, item, now)?;
    Ok(StoredComment {
        previous_replies_marker,
        update_applied,
    })
}

pub fn get_last_replies_page_cid(conn: &Connection, cid: &str) -> Result<Option<String>> {
    let marker: Option<Option<String>> = conn
        .query_row(
            "SELECT last_replies_page_cid FROM indexed_comments_update WHERE cid = ?1",
            params![cid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(marker.flatten())
}

/// Advance the replies marker after the reply tree of the update stamped
/// `updated_at` was fetched. Ignored if a newer update has been stored since.
pub fn set_last_replies_page_cid(
    conn: &Connection,
    cid: &str,
    page_cid: &str,
    updated_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE indexed_comments_update SET last_replies_page_cid = ?2, last_fetch_error = NULL
         WHERE cid = ?1 AND COALESCE(updated_at, 0) <= ?3",
        params![cid, page_cid, updated_at],
    )?;
    Ok(())
}

pub fn record_comment_fetch_failure(conn: &Connection, cid: &str, error: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO indexed_comments_update (cid, fetch_failure_count, last_fetch_error)
         VALUES (?1, 1, ?2)
         ON CONFLICT(cid) DO UPDATE SET
            fetch_failure_count = fetch_failure_count + 1,
            last_fetch_error = excluded.last_fetch_error",
        params![cid, error],
    )
    .with_context(|| format!("Failed to record fetch failure for {cid}"))?;
    Ok(())
}

pub fn is_comment_indexed(conn: &Connection, cid: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM indexed_comments_ipfs WHERE cid = ?1",
        params![cid],
        |row| row.get(0),
    )?;
    Ok(exists)
}

// --- Moderation queue ---

/// Store (or refresh) an item seen in a forum's moderation queue.
pub fn upsert_modqueue_comment(conn: &Connection, item: &PageComment, now: i64) -> Result<()> {
    let comment = &item.comment;
    let cid = item.cid();
    let author_json = serde_json::to_string(&comment.author)?;
    conn.execute(
        "INSERT INTO modqueue_comments_ipfs (cid, subplebbit_address, author_public_key,
            author_address, author_json, parent_cid, content, title, link, timestamp, first_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(cid) DO NOTHING",
        params![
            cid,
            comment.subplebbit_address,
            comment.signature.public_key,
            comment.author.address,
            author_json,
            comment.parent_cid,
            comment.content,
            comment.title,
            comment.link,
            comment.timestamp,
            now
        ],
    )?;

    let author = item_author_subplebbit(item);
    conn.execute(
        "INSERT INTO modqueue_comments_update (cid, author_post_score, author_reply_score,
            author_ban_expires_at, pending_approval, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(cid) DO UPDATE SET
            author_post_score = excluded.author_post_score,
            author_reply_score = excluded.author_reply_score,
            author_ban_expires_at = excluded.author_ban_expires_at,
            pending_approval = excluded.pending_approval,
            last_seen_at = excluded.last_seen_at
         WHERE modqueue_comments_update.resolved = 0",
        params![
            cid,
            author.map(|a| a.post_score),
            author.map(|a| a.reply_score),
            author.and_then(|a| a.ban_expires_at),
            item.comment_update.pending_approval.unwrap_or(true),
            now
        ],
    )
    .with_context(|| format!("Failed to store mod queue item {cid}"))?;
    Ok(())
}

/// Unresolved queue items of a forum.
pub fn pending_modqueue_cids(conn: &Connection, subplebbit_address: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT u.cid FROM modqueue_comments_update u
         JOIN modqueue_comments_ipfs i ON i.cid = u.cid
         WHERE i.subplebbit_address = ?1 AND u.resolved = 0
         ORDER BY u.cid",
    )?;
    let rows = stmt.query_map(params![subplebbit_address], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(Into::into)
}

/// Mark a queue item as accepted or rejected. Already-resolved items are left as is.
pub fn resolve_modqueue_item(conn: &Connection, cid: &str, accepted: bool, now: i64) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE modqueue_comments_update SET
            resolved = 1, accepted = ?2, resolved_at = ?3, pending_approval = 0
         WHERE cid = ?1 AND resolved = 0",
        params![cid, accepted, now],
    )?;
    Ok(updated > 0)
}

// --- Evidence reads ---

pub fn indexed_first_seen(conn: &Connection, public_key: &str) -> Result<Option<i64>> {
    let first_seen = conn.query_row(
        "SELECT MIN(timestamp) FROM indexed_comments_ipfs WHERE author_public_key = ?1",
        params![public_key],
        |row| row.get(0),
    )?;
    Ok(first_seen)
}

/// Karma snapshots from crawled updates, timestamped by when they were fetched.
pub fn indexed_karma_records(conn: &Connection, public_key: &str) -> Result<Vec<KarmaRecord>> {
    let mut stmt = conn.prepare(
        "SELECT i.subplebbit_address, u.author_post_score, COALESCE(u.author_reply_score, 0),
                u.fetched_at
         FROM indexed_comments_ipfs i
         JOIN indexed_comments_update u ON u.cid = i.cid
         WHERE i.author_public_key = ?1
           AND u.author_post_score IS NOT NULL
           AND u.fetched_at IS NOT NULL
         ORDER BY u.fetched_at DESC",
    )?;
    let rows = stmt.query_map(params![public_key], |row| {
        Ok(KarmaRecord {
            subplebbit_address: row.get(0)?,
            post_score: row.get(1)?,
            reply_score: row.get(2)?,
            observed_at: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Crawled posts and replies by the author since `since`. Only comments are crawlable.
pub fn indexed_velocity(conn: &Connection, public_key: &str, since: i64) -> Result<VelocityCounts> {
    let (post, reply) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN parent_cid IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN parent_cid IS NOT NULL THEN 1 ELSE 0 END), 0)
         FROM indexed_comments_ipfs
         WHERE author_public_key = ?1 AND timestamp >= ?2",
        params![public_key, since],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(VelocityCounts {
        post,
        reply,
        ..VelocityCounts::default()
    })
}

pub fn indexed_comment_texts(
    conn: &Connection,
    field: TextField,
    since: i64,
    terms: Option<&[String]>,
) -> Result<Vec<TextRecord>> {
    let column = field.column();
    let terms = terms.unwrap_or_default();
    let filter = if terms.is_empty() {
        String::new()
    } else {
        format!("AND {}", like_any(&[column], terms))
    };
    let sql = format!(
        "SELECT author_public_key, {column}, timestamp FROM indexed_comments_ipfs
         WHERE timestamp >= ?1 AND {column} IS NOT NULL AND {column} != '' {filter}
         ORDER BY timestamp DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(window_params(since, terms)), |row| {
        Ok(TextRecord {
            author_public_key: row.get(0)?,
            text: row.get(1)?,
            timestamp: row.get(2)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn indexed_link_records(
    conn: &Connection,
    since: i64,
    hosts: Option<&[String]>,
) -> Result<Vec<LinkRecord>> {
    let hosts = hosts.unwrap_or_default();
    let filter = if hosts.is_empty() {
        String::new()
    } else {
        format!("AND {}", like_any(&["link", "content", "title"], hosts))
    };
    let sql = format!(
        "SELECT author_public_key, link, content, title, timestamp FROM indexed_comments_ipfs
         WHERE timestamp >= ?1
           AND (link IS NOT NULL OR content LIKE '%http%' OR title LIKE '%http%') {filter}
         ORDER BY timestamp DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(window_params(since, hosts)), |row| {
        Ok(LinkRecord {
            author_public_key: row.get(0)?,
            link: row.get(1)?,
            content: row.get(2)?,
            title: row.get(3)?,
            timestamp: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn indexed_wallet_claimants(conn: &Connection, wallet_address: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT i.author_public_key
         FROM indexed_comments_ipfs i, json_each(i.author_json, '$.wallets') w
         WHERE lower(json_extract(w.value, '$.address')) = lower(?1)",
    )?;
    let rows = stmt.query_map(params![wallet_address], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(Into::into)
}

pub fn indexed_wallet_velocity(
    conn: &Connection,
    wallet_address: &str,
    since: i64,
) -> Result<VelocityCounts> {
    let (post, reply) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN i.parent_cid IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN i.parent_cid IS NOT NULL THEN 1 ELSE 0 END), 0)
         FROM indexed_comments_ipfs i
         WHERE i.timestamp >= ?2
           AND EXISTS (
               SELECT 1 FROM json_each(i.author_json, '$.wallets') w
               WHERE lower(json_extract(w.value, '$.address')) = lower(?1)
           )",
        params![wallet_address, since],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(VelocityCounts {
        post,
        reply,
        ..VelocityCounts::default()
    })
}

/// One row per forum the author posted in, with the ban state from the
/// most recently updated of their comments there.
pub fn ban_records(conn: &Connection, public_key: &str) -> Result<Vec<SubplebbitBanRecord>> {
    let mut stmt = conn.prepare(
        "SELECT sub, ban FROM (
            SELECT i.subplebbit_address AS sub,
                   u.author_ban_expires_at AS ban,
                   ROW_NUMBER() OVER (
                       PARTITION BY i.subplebbit_address
                       ORDER BY COALESCE(u.updated_at, 0) DESC
                   ) AS rn
            FROM indexed_comments_ipfs i
            LEFT JOIN indexed_comments_update u ON u.cid = i.cid
            WHERE i.author_public_key = ?1
         )
         WHERE rn = 1
         ORDER BY sub",
    )?;
    let rows = stmt.query_map(params![public_key], |row| {
        Ok(SubplebbitBanRecord {
            subplebbit_address: row.get(0)?,
            ban_expires_at: row.get(1)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

pub fn moderation_stats(conn: &Connection, public_key: &str) -> Result<ModerationStats> {
    let stats = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM indexed_comments_ipfs WHERE author_public_key = ?1),
            (SELECT COUNT(*) FROM indexed_comments_ipfs i
               JOIN indexed_comments_update u ON u.cid = i.cid
               WHERE i.author_public_key = ?1 AND u.removed = 1),
            (SELECT COUNT(*) FROM modqueue_comments_ipfs i
               JOIN modqueue_comments_update u ON u.cid = i.cid
               WHERE i.author_public_key = ?1 AND u.resolved = 1),
            (SELECT COUNT(*) FROM modqueue_comments_ipfs i
               JOIN modqueue_comments_update u ON u.cid = i.cid
               WHERE i.author_public_key = ?1 AND u.resolved = 1 AND u.accepted = 0)",
        params![public_key],
        |row| {
            Ok(ModerationStats {
                indexed_comments: row.get(0)?,
                removed_comments: row.get(1)?,
                resolved_queue_items: row.get(2)?,
                rejected_queue_items: row.get(3)?,
            })
        },
    )?;
    Ok(stats)
}
