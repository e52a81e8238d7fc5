// Typed plebbit wire payloads.
//
// These mirror the JSON the network actually serves (camelCase keys) but
// with explicit optional fields instead of untyped blobs. Several risk
// factors branch on whether a sub-field is present at all, e.g.
// `author.wallets` or `author.subplebbit.banExpiresAt`, so the presence of
// each field has to survive deserialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cryptographic signature attached to every publication and forum record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub public_key: String,
    #[serde(default)]
    pub signature: String,
    #[serde(rename = "type", default)]
    pub signature_type: String,
    #[serde(default)]
    pub signed_property_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSignature {
    pub signature: String,
    #[serde(rename = "type")]
    pub signature_type: String,
}

/// A wallet the author claims to own, keyed by chain ticker in `Author::wallets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub signature: Option<WalletSignature>,
}

/// Per-forum author state, as reported by that forum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSubplebbit {
    #[serde(default)]
    pub post_score: i64,
    #[serde(default)]
    pub reply_score: i64,
    #[serde(default)]
    pub ban_expires_at: Option<i64>,
    #[serde(default)]
    pub first_comment_timestamp: Option<i64>,
    #[serde(default)]
    pub last_comment_cid: Option<String>,
}

impl AuthorSubplebbit {
    pub fn net_karma(&self) -> i64 {
        self.post_score + self.reply_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub previous_comment_cid: Option<String>,
    #[serde(default)]
    pub wallets: BTreeMap<String, Wallet>,
    #[serde(default)]
    pub subplebbit: Option<AuthorSubplebbit>,
}

impl Author {
    /// Claimed wallet addresses, lowercased and deduplicated.
    pub fn wallet_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .wallets
            .values()
            .map(|w| w.address.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }
}

/// The immutable, content-addressed part of a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentIpfs {
    pub subplebbit_address: String,
    pub author: Author,
    pub signature: Signature,
    pub timestamp: i64,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub parent_cid: Option<String>,
    #[serde(default)]
    pub post_cid: Option<String>,
    #[serde(default)]
    pub depth: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentUpdateAuthor {
    #[serde(default)]
    pub subplebbit: Option<AuthorSubplebbit>,
}

/// The mutable moderation and vote-tally state published by the forum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentUpdate {
    pub cid: String,
    #[serde(default)]
    pub upvote_count: i64,
    #[serde(default)]
    pub downvote_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub removed: Option<bool>,
    #[serde(default)]
    pub deleted: Option<bool>,
    #[serde(default)]
    pub locked: Option<bool>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub pending_approval: Option<bool>,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub author: Option<CommentUpdateAuthor>,
    #[serde(default)]
    pub replies: Option<Pages>,
}

impl CommentUpdate {
    pub fn author_subplebbit(&self) -> Option<&AuthorSubplebbit> {
        self.author.as_ref().and_then(|a| a.subplebbit.as_ref())
    }
}

/// One entry of a page: the comment plus its latest update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageComment {
    pub comment: CommentIpfs,
    pub comment_update: CommentUpdate,
}

impl PageComment {
    pub fn cid(&self) -> &str {
        &self.comment_update.cid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub comments: Vec<PageComment>,
    #[serde(default)]
    pub next_cid: Option<String>,
}

/// A paginated listing: inlined first pages plus cids of the full chains,
/// both keyed by sort name ("new", "hot", "old", ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pages {
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
    #[serde(default)]
    pub page_cids: BTreeMap<String, String>,
}

pub const PREFERRED_SORT: &str = "new";

impl Pages {
    /// First page cid of the "new" chain, or of any sort if "new" is absent.
    pub fn preferred_page_cid(&self) -> Option<&str> {
        self.page_cids
            .get(PREFERRED_SORT)
            .or_else(|| self.page_cids.values().next())
            .map(String::as_str)
    }

    /// The inlined page to use when the listing has no separate page cids.
    pub fn preferred_inline_page(&self) -> Option<&Page> {
        self.pages
            .get(PREFERRED_SORT)
            .or_else(|| self.pages.values().next())
    }

    /// Change-detection marker for this listing. None for fully inlined listings.
    pub fn marker(&self) -> Option<String> {
        self.preferred_page_cid().map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.page_cids.is_empty() && self.pages.values().all(|p| p.comments.is_empty())
    }
}

/// A forum's published record as seen on one update notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubplebbitSnapshot {
    pub address: String,
    #[serde(default)]
    pub signature: Option<Signature>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub posts: Option<Pages>,
    #[serde(default)]
    pub mod_queue: Option<Pages>,
}

impl SubplebbitSnapshot {
    pub fn public_key(&self) -> Option<&str> {
        self.signature.as_ref().map(|s| s.public_key.as_str())
    }

    pub fn posts_marker(&self) -> Option<String> {
        self.posts.as_ref().and_then(Pages::marker)
    }
}
