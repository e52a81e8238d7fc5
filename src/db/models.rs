// Data models — Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use serde::{Deserialize, Serialize};

use crate::challenge::request::PublicationKind;

/// Score boundaries between challenge tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Below this, the publication is accepted without a challenge.
    pub auto_accept: f64,
    /// At or above this, a captcha alone is not enough and OAuth is required.
    pub oauth: f64,
    /// At or above this, the publication is rejected outright.
    pub auto_reject: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            auto_accept: 0.2,
            oauth: 0.4,
            auto_reject: 0.8,
        }
    }
}

/// What the publisher has to do before the publication is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeTier {
    AutoAccept,
    CaptchaOnly,
    CaptchaAndOauth,
    AutoReject,
}

impl ChallengeTier {
    /// Determine the tier from a risk score (0.0-1.0).
    pub fn from_score(score: f64, thresholds: &TierThresholds) -> Self {
        match score {
            s if s >= thresholds.auto_reject => ChallengeTier::AutoReject,
            s if s >= thresholds.oauth => ChallengeTier::CaptchaAndOauth,
            s if s >= thresholds.auto_accept => ChallengeTier::CaptchaOnly,
            _ => ChallengeTier::AutoAccept,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeTier::AutoAccept => "autoAccept",
            ChallengeTier::CaptchaOnly => "captchaOnly",
            ChallengeTier::CaptchaAndOauth => "captchaAndOauth",
            ChallengeTier::AutoReject => "autoReject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "autoAccept" => Some(ChallengeTier::AutoAccept),
            "captchaOnly" => Some(ChallengeTier::CaptchaOnly),
            "captchaAndOauth" => Some(ChallengeTier::CaptchaAndOauth),
            "autoReject" => Some(ChallengeTier::AutoReject),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChallengeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SessionStatus::Pending),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One evaluation lifecycle for a single publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSession {
    pub session_id: String,
    pub author_address: String,
    pub author_public_key: String,
    pub subplebbit_address: String,
    pub subplebbit_public_key: Option<String>,
    pub risk_score: f64,
    pub challenge_tier: ChallengeTier,
    pub status: SessionStatus,
    pub captcha_completed: bool,
    /// "provider:id" of the linked social account, if any.
    pub oauth_identity: Option<String>,
    pub received_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

/// How the indexer learned about a forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoverySource {
    Evaluation,
    PreviousCommentCid,
    Manual,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Evaluation => "evaluation",
            DiscoverySource::PreviousCommentCid => "previousCommentCid",
            DiscoverySource::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "evaluation" => Some(DiscoverySource::Evaluation),
            "previousCommentCid" => Some(DiscoverySource::PreviousCommentCid),
            "manual" => Some(DiscoverySource::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A forum known to the indexer, with its change-detection markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedSubplebbit {
    pub address: String,
    pub public_key: Option<String>,
    pub discovered_via: DiscoverySource,
    pub discovered_at: i64,
    pub indexing_enabled: bool,
    pub last_posts_page_cid_new: Option<String>,
    pub last_subplebbit_updated_at: Option<i64>,
    pub consecutive_errors: i64,
    pub last_error: Option<String>,
    pub last_indexed_at: Option<i64>,
}

/// Outcome of storing one crawled comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredComment {
    /// Replies marker held before this write.
    pub previous_replies_marker: Option<String>,
    /// False when a newer update was already stored and this one was dropped.
    pub update_applied: bool,
}

/// Per-forum karma snapshot for one author, from whichever source saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct KarmaRecord {
    pub subplebbit_address: String,
    pub post_score: i64,
    pub reply_score: i64,
    /// When this snapshot was observed (local receivedAt or indexer fetchedAt).
    pub observed_at: i64,
}

impl KarmaRecord {
    pub fn net(&self) -> i64 {
        self.post_score + self.reply_score
    }
}

/// A stored comment's text, as a candidate for duplicate detection.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRecord {
    pub author_public_key: String,
    pub text: String,
    pub timestamp: i64,
}

/// Which text column of a comment to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Content,
    Title,
}

impl TextField {
    pub fn column(&self) -> &'static str {
        match self {
            TextField::Content => "content",
            TextField::Title => "title",
        }
    }
}

/// The URL-bearing fields of a stored comment.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub author_public_key: String,
    pub link: Option<String>,
    pub content: Option<String>,
    pub title: Option<String>,
    pub timestamp: i64,
}

/// Hourly publication counts by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VelocityCounts {
    pub post: i64,
    pub reply: i64,
    pub vote: i64,
    pub comment_edit: i64,
    pub comment_moderation: i64,
}

impl VelocityCounts {
    pub fn get(&self, kind: PublicationKind) -> i64 {
        match kind {
            PublicationKind::Post => self.post,
            PublicationKind::Reply => self.reply,
            PublicationKind::Vote => self.vote,
            PublicationKind::CommentEdit => self.comment_edit,
            PublicationKind::CommentModeration => self.comment_moderation,
        }
    }

    /// Count one more publication of `kind`.
    pub fn record(&mut self, kind: PublicationKind) {
        match kind {
            PublicationKind::Post => self.post += 1,
            PublicationKind::Reply => self.reply += 1,
            PublicationKind::Vote => self.vote += 1,
            PublicationKind::CommentEdit => self.comment_edit += 1,
            PublicationKind::CommentModeration => self.comment_moderation += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.post + self.reply + self.vote + self.comment_edit + self.comment_moderation
    }
}

/// An author's ban state in one forum, from crawled comment updates.
#[derive(Debug, Clone, PartialEq)]
pub struct SubplebbitBanRecord {
    pub subplebbit_address: String,
    pub ban_expires_at: Option<i64>,
}

/// Crawled moderation outcomes for one author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModerationStats {
    pub indexed_comments: i64,
    pub removed_comments: i64,
    pub resolved_queue_items: i64,
    pub rejected_queue_items: i64,
}

/// Row counts shown by the status command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbStats {
    pub sessions: i64,
    pub pending_sessions: i64,
    pub local_publications: i64,
    pub indexed_subplebbits: i64,
    pub enabled_subplebbits: i64,
    pub indexed_comments: i64,
    pub pending_queue_items: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        let t = TierThresholds::default();
        assert_eq!(ChallengeTier::from_score(0.0, &t), ChallengeTier::AutoAccept);
        assert_eq!(ChallengeTier::from_score(0.19, &t), ChallengeTier::AutoAccept);
        assert_eq!(ChallengeTier::from_score(0.2, &t), ChallengeTier::CaptchaOnly);
        assert_eq!(ChallengeTier::from_score(0.4, &t), ChallengeTier::CaptchaAndOauth);
        assert_eq!(ChallengeTier::from_score(0.8, &t), ChallengeTier::AutoReject);
        assert_eq!(ChallengeTier::from_score(1.0, &t), ChallengeTier::AutoReject);
    }

    #[test]
    fn test_string_roundtrips() {
        for tier in [
            ChallengeTier::AutoAccept,
            ChallengeTier::CaptchaOnly,
            ChallengeTier::CaptchaAndOauth,
            ChallengeTier::AutoReject,
        ] {
            assert_eq!(ChallengeTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(
            DiscoverySource::parse("previousCommentCid"),
            Some(DiscoverySource::PreviousCommentCid)
        );
        assert_eq!(SessionStatus::parse("bogus"), None);
    }
}
