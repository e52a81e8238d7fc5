// Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rusqlite::Connection;
use serde_json::{json, Value};

use spamward::challenge::DecryptedChallengeRequest;
use spamward::db::schema::create_tables;
use spamward::db::{Database, SqliteDatabase};
use spamward::plebbit::types::PageComment;

pub const FORUM: &str = "memes.eth";

/// A fixed "now" well after the unix epoch, so lookback windows stay positive.
pub const NOW: i64 = 1_700_000_000;

pub fn memory_db() -> Arc<dyn Database> {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    Arc::new(SqliteDatabase::new(conn))
}

pub fn author_json(public_key: &str) -> (Value, Value) {
    (
        json!({ "address": format!("addr-{public_key}") }),
        json!({ "publicKey": public_key, "signature": "sig", "type": "ed25519" }),
    )
}

/// Parse a challenge request from its wire JSON.
pub fn request(value: Value) -> DecryptedChallengeRequest {
    serde_json::from_value(value).unwrap()
}

pub fn comment_request(public_key: &str, content: &str, timestamp: i64) -> DecryptedChallengeRequest {
    let (author, signature) = author_json(public_key);
    request(json!({
        "comment": {
            "subplebbitAddress": FORUM,
            "author": author,
            "signature": signature,
            "timestamp": timestamp,
            "content": content
        }
    }))
}

pub fn link_request(public_key: &str, link: &str, timestamp: i64) -> DecryptedChallengeRequest {
    let (author, signature) = author_json(public_key);
    request(json!({
        "comment": {
            "subplebbitAddress": FORUM,
            "author": author,
            "signature": signature,
            "timestamp": timestamp,
            "title": "check this out",
            "link": link
        }
    }))
}

pub fn vote_request(public_key: &str, timestamp: i64) -> DecryptedChallengeRequest {
    let (author, signature) = author_json(public_key);
    request(json!({
        "vote": {
            "subplebbitAddress": FORUM,
            "author": author,
            "signature": signature,
            "timestamp": timestamp,
            "commentCid": "QmTarget",
            "vote": 1
        }
    }))
}

/// A crawled comment with an optional per-forum ban.
pub fn crawled(
    cid: &str,
    public_key: &str,
    forum: &str,
    timestamp: i64,
    ban_expires_at: Option<i64>,
) -> PageComment {
    let (author, signature) = author_json(public_key);
    serde_json::from_value(json!({
        "comment": {
            "subplebbitAddress": forum,
            "author": author,
            "signature": signature,
            "timestamp": timestamp,
            "content": format!("crawled comment {cid}")
        },
        "commentUpdate": {
            "cid": cid,
            "updatedAt": timestamp,
            "author": { "subplebbit": { "postScore": 0, "replyScore": 0, "banExpiresAt": ban_expires_at } }
        }
    }))
    .unwrap()
}
