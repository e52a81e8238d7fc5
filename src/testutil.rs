// Fixture builders shared by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::mpsc;

use crate::challenge::request::{DecryptedChallengeRequest, Publication, VotePublication};
use crate::combined::CombinedDataService;
use crate::db::models::{ChallengeSession, ChallengeTier, SessionStatus};
use crate::db::queries::{insert_publication, insert_session};
use crate::db::schema::create_tables;
use crate::indexer::queries::{insert_comment_ipfs, upsert_comment_update};
use crate::plebbit::client::{ForumClient, ForumHandle};
use crate::plebbit::types::{
    Author, CommentIpfs, CommentUpdate, Page, PageComment, Signature, SubplebbitSnapshot,
};
use crate::risk::context::{EvaluationInputs, RiskContext};

pub const TEST_SUBPLEBBIT: &str = "test.eth";

pub fn signature(public_key: &str) -> Signature {
    Signature {
        public_key: public_key.to_string(),
        signature: "sig".to_string(),
        signature_type: "ed25519".to_string(),
        signed_property_names: Vec::new(),
    }
}

pub fn author(public_key: &str) -> Author {
    Author {
        address: format!("addr-{public_key}"),
        display_name: None,
        previous_comment_cid: None,
        wallets: BTreeMap::new(),
        subplebbit: None,
    }
}

pub fn comment(public_key: &str, subplebbit: &str, content: &str, timestamp: i64) -> CommentIpfs {
    CommentIpfs {
        subplebbit_address: subplebbit.to_string(),
        author: author(public_key),
        signature: signature(public_key),
        timestamp,
        protocol_version: Some("1.0.0".to_string()),
        content: Some(content.to_string()),
        title: None,
        link: None,
        parent_cid: None,
        post_cid: None,
        depth: Some(0),
    }
}

pub fn comment_update(cid: &str, updated_at: i64) -> CommentUpdate {
    CommentUpdate {
        cid: cid.to_string(),
        upvote_count: 0,
        downvote_count: 0,
        reply_count: 0,
        removed: None,
        deleted: None,
        locked: None,
        pinned: None,
        approved: None,
        pending_approval: None,
        updated_at,
        author: None,
        replies: None,
    }
}

pub fn page_comment(
    cid: &str,
    public_key: &str,
    subplebbit: &str,
    content: &str,
    timestamp: i64,
) -> PageComment {
    PageComment {
        comment: comment(public_key, subplebbit, content, timestamp),
        comment_update: comment_update(cid, timestamp),
    }
}

pub fn comment_request(public_key: &str, content: &str) -> DecryptedChallengeRequest {
    DecryptedChallengeRequest::new(Publication::Comment(comment(
        public_key,
        TEST_SUBPLEBBIT,
        content,
        0,
    )))
}

pub fn vote_request(public_key: &str) -> DecryptedChallengeRequest {
    DecryptedChallengeRequest::new(Publication::Vote(VotePublication {
        subplebbit_address: TEST_SUBPLEBBIT.to_string(),
        author: author(public_key),
        signature: signature(public_key),
        timestamp: 0,
        comment_cid: "QmTarget".to_string(),
        vote: 1,
        protocol_version: None,
    }))
}

/// A pending session for the publication, expiring an hour after receipt.
pub fn session_for(session_id: &str, publication: &Publication, received_at: i64) -> ChallengeSession {
    ChallengeSession {
        session_id: session_id.to_string(),
        author_address: publication.author().address.clone(),
        author_public_key: publication.author_public_key().to_string(),
        subplebbit_address: publication.subplebbit_address().to_string(),
        subplebbit_public_key: None,
        risk_score: 0.5,
        challenge_tier: ChallengeTier::CaptchaOnly,
        status: SessionStatus::Pending,
        captcha_completed: false,
        oauth_identity: None,
        received_at,
        expires_at: received_at + 3600,
        completed_at: None,
    }
}

pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    conn
}

/// Store a publication as if it had been evaluated at `received_at`.
pub fn store_local(conn: &Connection, session_id: &str, publication: &Publication, received_at: i64) {
    insert_session(conn, &session_for(session_id, publication, received_at)).unwrap();
    insert_publication(conn, session_id, publication, received_at).unwrap();
}

/// Store a crawled comment with its update.
pub fn store_indexed(conn: &Connection, item: &PageComment, fetched_at: i64) {
    insert_comment_ipfs(conn, item.cid(), &item.comment, fetched_at).unwrap();
    upsert_comment_update(conn, item, fetched_at).unwrap();
}

pub fn context<'a>(
    conn: &'a Connection,
    request: &'a DecryptedChallengeRequest,
    inputs: &'a EvaluationInputs,
    now: i64,
) -> RiskContext<'a> {
    RiskContext {
        request,
        now,
        data: CombinedDataService::new(conn),
        inputs,
    }
}

// --- Fake forum network ---

type Senders = Arc<Mutex<HashMap<String, mpsc::Sender<SubplebbitSnapshot>>>>;

/// In-memory ForumClient. Pages and comments are served from maps; snapshots
/// are pushed by the test through `push`.
#[derive(Default)]
pub struct FakeForumClient {
    pages: Mutex<HashMap<String, Page>>,
    comments: Mutex<HashMap<String, CommentIpfs>>,
    fetched_pages: Mutex<Vec<String>>,
    unreachable: Mutex<Vec<String>>,
    senders: Senders,
    destroyed: AtomicBool,
}

impl FakeForumClient {
    pub fn add_page(&self, cid: &str, page: Page) {
        self.pages.lock().unwrap().insert(cid.to_string(), page);
    }

    pub fn add_comment(&self, cid: &str, comment: CommentIpfs) {
        self.comments.lock().unwrap().insert(cid.to_string(), comment);
    }

    /// Make `get_subplebbit` fail for this address.
    pub fn make_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().push(address.to_string());
    }

    pub fn fetched_pages(&self) -> Vec<String> {
        self.fetched_pages.lock().unwrap().clone()
    }

    pub fn is_subscribed(&self, address: &str) -> bool {
        self.senders.lock().unwrap().contains_key(address)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Deliver a snapshot to the forum's subscriber. False if nobody listens.
    pub fn push(&self, snapshot: SubplebbitSnapshot) -> bool {
        let sender = self.senders.lock().unwrap().get(&snapshot.address).cloned();
        match sender {
            Some(sender) => sender.try_send(snapshot).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ForumClient for FakeForumClient {
    async fn get_subplebbit(&self, address: &str) -> Result<Box<dyn ForumHandle>> {
        if self.unreachable.lock().unwrap().iter().any(|a| a == address) {
            return Err(anyhow!("Forum {address} cannot be resolved"));
        }
        Ok(Box::new(FakeForumHandle {
            address: address.to_string(),
            senders: self.senders.clone(),
        }))
    }

    async fn get_page(&self, _subplebbit_address: &str, page_cid: &str) -> Result<Page> {
        self.fetched_pages.lock().unwrap().push(page_cid.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(page_cid)
            .cloned()
            .ok_or_else(|| anyhow!("Page {page_cid} not found"))
    }

    async fn get_comment(&self, cid: &str) -> Result<CommentIpfs> {
        self.comments
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| anyhow!("Comment {cid} not found"))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeForumHandle {
    address: String,
    senders: Senders,
}

#[async_trait]
impl ForumHandle for FakeForumHandle {
    fn address(&self) -> &str {
        &self.address
    }

    async fn update(&mut self) -> Result<mpsc::Receiver<SubplebbitSnapshot>> {
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().insert(self.address.clone(), tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.senders.lock().unwrap().remove(&self.address);
        Ok(())
    }
}

/// A forum snapshot whose posts listing starts at `posts_page`.
pub fn snapshot(address: &str, updated_at: i64, posts_page: Option<&str>) -> SubplebbitSnapshot {
    let posts = posts_page.map(|cid| {
        let mut pages = crate::plebbit::types::Pages::default();
        pages.page_cids.insert("new".to_string(), cid.to_string());
        pages
    });
    SubplebbitSnapshot {
        address: address.to_string(),
        signature: Some(signature(&format!("{address}-key"))),
        updated_at: Some(updated_at),
        posts,
        mod_queue: None,
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
