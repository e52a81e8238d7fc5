// Database queries — challenge sessions and locally received publications.
//
// Every read of the local evidence store goes through this module. This
// keeps SQL contained in one place and gives the rest of the app clean Rust
// interfaces. Crawled data lives in indexer::queries.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::models::{
    ChallengeSession, ChallengeTier, DbStats, KarmaRecord, LinkRecord, SessionStatus, TextField,
    TextRecord, VelocityCounts,
};
use crate::challenge::request::Publication;

/// `(a LIKE ?k OR b LIKE ?k ...)` across every term, numbering terms from
/// `?2` (`?1` is the window start). Terms are matched as substrings.
pub(crate) fn like_any(columns: &[&str], terms: &[String]) -> String {
    let clauses: Vec<String> = (0..terms.len())
        .flat_map(|i| {
            columns
                .iter()
                .map(move |column| format!("{column} LIKE ?{}", i + 2))
        })
        .collect();
    format!("({})", clauses.join(" OR "))
}

/// Bind values for a windowed query filtered by `like_any`.
pub(crate) fn window_params(since: i64, terms: &[String]) -> Vec<Value> {
    std::iter::once(Value::Integer(since))
        .chain(terms.iter().map(|t| Value::Text(format!("%{t}%"))))
        .collect()
}

/// Map a stored enum string back to its type, failing the row on unknown values.
pub(crate) fn parse_column<T>(
    idx: usize,
    value: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value '{value}'").into(),
        )
    })
}

// --- Challenge sessions ---

pub fn insert_session(conn: &Connection, session: &ChallengeSession) -> Result<()> {
    conn.execute(
        "INSERT INTO challenge_sessions (session_id, author_address, author_public_key,
            subplebbit_address, subplebbit_public_key, risk_score, challenge_tier, status,
            captcha_completed, oauth_identity, received_at, expires_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            session.session_id,
            session.author_address,
            session.author_public_key,
            session.subplebbit_address,
            session.subplebbit_public_key,
            session.risk_score,
            session.challenge_tier.as_str(),
            session.status.as_str(),
            session.captcha_completed,
            session.oauth_identity,
            session.received_at,
            session.expires_at,
            session.completed_at,
        ],
    )
    .with_context(|| format!("Failed to insert session {}", session.session_id))?;
    Ok(())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ChallengeSession> {
    let tier: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(ChallengeSession {
        session_id: row.get(0)?,
        author_address: row.get(1)?,
        author_public_key: row.get(2)?,
        subplebbit_address: row.get(3)?,
        subplebbit_public_key: row.get(4)?,
        risk_score: row.get(5)?,
        challenge_tier: parse_column(6, &tier, ChallengeTier::parse)?,
        status: parse_column(7, &status, SessionStatus::parse)?,
        captcha_completed: row.get(8)?,
        oauth_identity: row.get(9)?,
        received_at: row.get(10)?,
        expires_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

pub fn get_session(conn: &Connection, session_id: &str) -> Result<Option<ChallengeSession>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, author_address, author_public_key, subplebbit_address,
                subplebbit_public_key, risk_score, challenge_tier, status, captcha_completed,
                oauth_identity, received_at, expires_at, completed_at
         FROM challenge_sessions WHERE session_id = ?1",
    )?;
    let session = stmt
        .query_row(params![session_id], session_from_row)
        .optional()?;
    Ok(session)
}

/// Update a session's lifecycle fields.
///
/// `oauth_identity` of None keeps whatever identity is already linked; only
/// a new value replaces it.
pub fn update_session(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
    captcha_completed: bool,
    oauth_identity: Option<&str>,
    completed_at: Option<i64>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE challenge_sessions SET
            status = ?2,
            captcha_completed = ?3,
            oauth_identity = COALESCE(?4, oauth_identity),
            completed_at = COALESCE(?5, completed_at)
         WHERE session_id = ?1",
        params![
            session_id,
            status.as_str(),
            captcha_completed,
            oauth_identity,
            completed_at
        ],
    )?;
    if updated == 0 {
        anyhow::bail!("Session {session_id} not found");
    }
    Ok(())
}

/// Delete pending sessions past their expiry. Their publication rows go with them.
pub fn purge_expired_sessions(conn: &Connection, now: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM challenge_sessions WHERE status = 'pending' AND expires_at < ?1",
        params![now],
    )?;
    Ok(deleted)
}

/// OAuth identities linked to an author through completed sessions.
pub fn oauth_identities_for_author(conn: &Connection, public_key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT oauth_identity FROM challenge_sessions
         WHERE author_public_key = ?1 AND status = 'completed' AND oauth_identity IS NOT NULL
         ORDER BY oauth_identity",
    )?;
    let rows = stmt.query_map(params![public_key], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(Into::into)
}

/// How many distinct authors have completed a session with this identity.
pub fn oauth_identity_author_count(conn: &Connection, identity: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(DISTINCT author_public_key) FROM challenge_sessions
         WHERE oauth_identity = ?1 AND status = 'completed'",
        params![identity],
        |row| row.get(0),
    )?;
    Ok(count)
}

// --- Publications ---

/// Store a received publication, linked to its session.
pub fn insert_publication(
    conn: &Connection,
    session_id: &str,
    publication: &Publication,
    received_at: i64,
) -> Result<()> {
    let author = publication.author();
    let author_json = serde_json::to_string(author)?;
    let public_key = publication.author_public_key();

    match publication {
        Publication::Comment(c) => conn.execute(
            "INSERT INTO comments (session_id, author_public_key, author_address, author_json,
                subplebbit_address, parent_cid, content, title, link, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session_id,
                public_key,
                author.address,
                author_json,
                c.subplebbit_address,
                c.parent_cid,
                c.content,
                c.title,
                c.link,
                c.timestamp,
                received_at
            ],
        ),
        Publication::Vote(v) => conn.execute(
            "INSERT INTO votes (session_id, author_public_key, author_address, author_json,
                subplebbit_address, comment_cid, vote, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session_id,
                public_key,
                author.address,
                author_json,
                v.subplebbit_address,
                v.comment_cid,
                v.vote,
                v.timestamp,
                received_at
            ],
        ),
        Publication::CommentEdit(e) => conn.execute(
            "INSERT INTO comment_edits (session_id, author_public_key, author_address, author_json,
                subplebbit_address, comment_cid, content, deleted, reason, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                session_id,
                public_key,
                author.address,
                author_json,
                e.subplebbit_address,
                e.comment_cid,
                e.content,
                e.deleted,
                e.reason,
                e.timestamp,
                received_at
            ],
        ),
        Publication::CommentModeration(m) => {
            let moderation_json = serde_json::to_string(&m.comment_moderation)?;
            conn.execute(
                "INSERT INTO comment_moderations (session_id, author_public_key, author_address,
                    author_json, subplebbit_address, comment_cid, moderation_json, timestamp,
                    received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session_id,
                    public_key,
                    author.address,
                    author_json,
                    m.subplebbit_address,
                    m.comment_cid,
                    moderation_json,
                    m.timestamp,
                    received_at
                ],
            )
        }
    }
    .with_context(|| format!("Failed to store {} for session {session_id}", publication.kind()))?;

    Ok(())
}

/// Store a freshly evaluated session and its publication in one transaction,
/// so a publication never exists without the session that scored it.
pub fn record_evaluation(
    conn: &Connection,
    session: &ChallengeSession,
    publication: &Publication,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    insert_session(&tx, session)?;
    insert_publication(&tx, &session.session_id, publication, session.received_at)?;
    tx.commit()
        .with_context(|| format!("Failed to commit session {}", session.session_id))?;
    Ok(())
}

// --- Local evidence reads ---

/// Every locally stored publication row with its author blob, across all four tables.
const ALL_LOCAL_PUBLICATIONS: &str = "
    SELECT author_public_key, author_json, subplebbit_address, received_at FROM comments
    UNION ALL
    SELECT author_public_key, author_json, subplebbit_address, received_at FROM votes
    UNION ALL
    SELECT author_public_key, author_json, subplebbit_address, received_at FROM comment_edits
    UNION ALL
    SELECT author_public_key, author_json, subplebbit_address, received_at FROM comment_moderations";

/// Earliest time this service received anything signed by the key.
pub fn local_first_seen(conn: &Connection, public_key: &str) -> Result<Option<i64>> {
    let first_seen = conn.query_row(
        "SELECT MIN(received_at) FROM (
            SELECT received_at FROM comments WHERE author_public_key = ?1
            UNION ALL
            SELECT received_at FROM votes WHERE author_public_key = ?1
            UNION ALL
            SELECT received_at FROM comment_edits WHERE author_public_key = ?1
         )",
        params![public_key],
        |row| row.get(0),
    )?;
    Ok(first_seen)
}

/// Every per-forum karma snapshot the author's publications carried.
pub fn local_karma_records(conn: &Connection, public_key: &str) -> Result<Vec<KarmaRecord>> {
    let sql = format!(
        "SELECT subplebbit_address,
                COALESCE(json_extract(author_json, '$.subplebbit.postScore'), 0),
                COALESCE(json_extract(author_json, '$.subplebbit.replyScore'), 0),
                received_at
         FROM ({ALL_LOCAL_PUBLICATIONS})
         WHERE author_public_key = ?1
           AND json_extract(author_json, '$.subplebbit') IS NOT NULL
         ORDER BY received_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
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

/// Publications of each type received from the author since `since`.
pub fn local_velocity(conn: &Connection, public_key: &str, since: i64) -> Result<VelocityCounts> {
    let counts = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM comments
               WHERE author_public_key = ?1 AND received_at >= ?2 AND parent_cid IS NULL),
            (SELECT COUNT(*) FROM comments
               WHERE author_public_key = ?1 AND received_at >= ?2 AND parent_cid IS NOT NULL),
            (SELECT COUNT(*) FROM votes WHERE author_public_key = ?1 AND received_at >= ?2),
            (SELECT COUNT(*) FROM comment_edits WHERE author_public_key = ?1 AND received_at >= ?2),
            (SELECT COUNT(*) FROM comment_moderations
               WHERE author_public_key = ?1 AND received_at >= ?2)",
        params![public_key, since],
        |row| {
            Ok(VelocityCounts {
                post: row.get(0)?,
                reply: row.get(1)?,
                vote: row.get(2)?,
                comment_edit: row.get(3)?,
                comment_moderation: row.get(4)?,
            })
        },
    )?;
    Ok(counts)
}

/// Non-empty comment texts (content or title) received since `since`.
///
/// With `terms`, only texts containing at least one of them are returned.
/// Rows are selected by when they arrived but carry the signed publication
/// timestamp, so the same comment seen again by the indexer dedupes.
pub fn local_comment_texts(
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
        "SELECT author_public_key, {column}, timestamp FROM comments
         WHERE received_at >= ?1 AND {column} IS NOT NULL AND {column} != '' {filter}
         ORDER BY received_at DESC"
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

/// Comments received since `since` that carry a link or mention a URL.
///
/// With `hosts`, only comments mentioning one of them anywhere are returned.
pub fn local_link_records(
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
        "SELECT author_public_key, link, content, title, timestamp FROM comments
         WHERE received_at >= ?1
           AND (link IS NOT NULL OR content LIKE '%http%' OR title LIKE '%http%') {filter}
         ORDER BY received_at DESC"
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

/// Public keys of every author whose publications claimed this wallet.
pub fn local_wallet_claimants(conn: &Connection, wallet_address: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT t.author_public_key
         FROM ({ALL_LOCAL_PUBLICATIONS}) t, json_each(t.author_json, '$.wallets') w
         WHERE lower(json_extract(w.value, '$.address')) = lower(?1)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![wallet_address], |row| row.get(0))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(Into::into)
}

/// Posts and replies received since `since` from any author claiming the wallet.
pub fn local_wallet_velocity(
    conn: &Connection,
    wallet_address: &str,
    since: i64,
) -> Result<VelocityCounts> {
    let (post, reply) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN c.parent_cid IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN c.parent_cid IS NOT NULL THEN 1 ELSE 0 END), 0)
         FROM comments c
         WHERE c.received_at >= ?2
           AND EXISTS (
               SELECT 1 FROM json_each(c.author_json, '$.wallets') w
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

// --- Stats ---

pub fn db_stats(conn: &Connection) -> Result<DbStats> {
    let stats = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM challenge_sessions),
            (SELECT COUNT(*) FROM challenge_sessions WHERE status = 'pending'),
            (SELECT COUNT(*) FROM comments) + (SELECT COUNT(*) FROM votes)
              + (SELECT COUNT(*) FROM comment_edits) + (SELECT COUNT(*) FROM comment_moderations),
            (SELECT COUNT(*) FROM indexed_subplebbits),
            (SELECT COUNT(*) FROM indexed_subplebbits WHERE indexing_enabled = 1),
            (SELECT COUNT(*) FROM indexed_comments_ipfs),
            (SELECT COUNT(*) FROM modqueue_comments_update WHERE resolved = 0)",
        [],
        |row| {
            Ok(DbStats {
                sessions: row.get(0)?,
                pending_sessions: row.get(1)?,
                local_publications: row.get(2)?,
                indexed_subplebbits: row.get(3)?,
                enabled_subplebbits: row.get(4)?,
                indexed_comments: row.get(5)?,
                pending_queue_items: row.get(6)?,
            })
        },
    )?;
    Ok(stats)
}
