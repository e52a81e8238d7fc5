// Decrypted challenge request — the publication being evaluated.
//
// On the wire a request carries exactly one of `comment`, `vote`,
// `commentEdit` or `commentModeration`. Here it is parsed straight into a
// tagged union so nothing downstream has to re-check which field is set.

use serde::{Deserialize, Serialize};

use crate::plebbit::types::{Author, AuthorSubplebbit, CommentIpfs, Signature};

/// A comment publication has the same shape as the stored immutable record.
pub type CommentPublication = CommentIpfs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePublication {
    pub subplebbit_address: String,
    pub author: Author,
    pub signature: Signature,
    pub timestamp: i64,
    pub comment_cid: String,
    /// 1 = upvote, -1 = downvote, 0 = retract.
    pub vote: i64,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEditPublication {
    pub subplebbit_address: String,
    pub author: Author,
    pub signature: Signature,
    pub timestamp: i64,
    pub comment_cid: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub deleted: Option<bool>,
    #[serde(default)]
    pub spoiler: Option<bool>,
    #[serde(default)]
    pub nsfw: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

/// The moderation fields a moderator can set on a comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoiler: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentModerationPublication {
    pub subplebbit_address: String,
    pub author: Author,
    pub signature: Signature,
    pub timestamp: i64,
    pub comment_cid: String,
    pub comment_moderation: ModerationAction,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    Comment(CommentPublication),
    Vote(VotePublication),
    CommentEdit(CommentEditPublication),
    CommentModeration(CommentModerationPublication),
}

/// Publication type as used for velocity tracking. Comments split into
/// posts (top level) and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PublicationKind {
    Post,
    Reply,
    Vote,
    CommentEdit,
    CommentModeration,
}

impl PublicationKind {
    pub const ALL: [PublicationKind; 5] = [
        PublicationKind::Post,
        PublicationKind::Reply,
        PublicationKind::Vote,
        PublicationKind::CommentEdit,
        PublicationKind::CommentModeration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationKind::Post => "post",
            PublicationKind::Reply => "reply",
            PublicationKind::Vote => "vote",
            PublicationKind::CommentEdit => "commentEdit",
            PublicationKind::CommentModeration => "commentModeration",
        }
    }

    /// Whether the indexer crawls this type (only comments are crawlable).
    pub fn is_indexed(&self) -> bool {
        matches!(self, PublicationKind::Post | PublicationKind::Reply)
    }
}

impl std::fmt::Display for PublicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Publication {
    pub fn kind(&self) -> PublicationKind {
        match self {
            Publication::Comment(c) if c.parent_cid.is_some() => PublicationKind::Reply,
            Publication::Comment(_) => PublicationKind::Post,
            Publication::Vote(_) => PublicationKind::Vote,
            Publication::CommentEdit(_) => PublicationKind::CommentEdit,
            Publication::CommentModeration(_) => PublicationKind::CommentModeration,
        }
    }

    pub fn author(&self) -> &Author {
        match self {
            Publication::Comment(p) => &p.author,
            Publication::Vote(p) => &p.author,
            Publication::CommentEdit(p) => &p.author,
            Publication::CommentModeration(p) => &p.author,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Publication::Comment(p) => &p.signature,
            Publication::Vote(p) => &p.signature,
            Publication::CommentEdit(p) => &p.signature,
            Publication::CommentModeration(p) => &p.signature,
        }
    }

    pub fn subplebbit_address(&self) -> &str {
        match self {
            Publication::Comment(p) => &p.subplebbit_address,
            Publication::Vote(p) => &p.subplebbit_address,
            Publication::CommentEdit(p) => &p.subplebbit_address,
            Publication::CommentModeration(p) => &p.subplebbit_address,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Publication::Comment(p) => p.timestamp,
            Publication::Vote(p) => p.timestamp,
            Publication::CommentEdit(p) => p.timestamp,
            Publication::CommentModeration(p) => p.timestamp,
        }
    }

    pub fn as_comment(&self) -> Option<&CommentPublication> {
        match self {
            Publication::Comment(c) => Some(c),
            _ => None,
        }
    }

    /// The author's signing key, which is the identity everything is keyed on.
    pub fn author_public_key(&self) -> &str {
        &self.signature().public_key
    }

    /// Karma the forum reported for this author in the forum being published to.
    pub fn current_subplebbit_karma(&self) -> Option<&AuthorSubplebbit> {
        self.author().subplebbit.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChallengeRequest", into = "RawChallengeRequest")]
pub struct DecryptedChallengeRequest {
    pub publication: Publication,
    pub challenge_answers: Vec<String>,
    pub challenge_comment_cids: Vec<String>,
}

impl DecryptedChallengeRequest {
    pub fn new(publication: Publication) -> Self {
        Self {
            publication,
            challenge_answers: Vec::new(),
            challenge_comment_cids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChallengeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<CommentPublication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vote: Option<VotePublication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment_edit: Option<CommentEditPublication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment_moderation: Option<CommentModerationPublication>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    challenge_answers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    challenge_comment_cids: Vec<String>,
}

impl TryFrom<RawChallengeRequest> for DecryptedChallengeRequest {
    type Error = String;

    fn try_from(raw: RawChallengeRequest) -> Result<Self, Self::Error> {
        let mut found: Vec<Publication> = Vec::with_capacity(1);
        if let Some(p) = raw.comment {
            found.push(Publication::Comment(p));
        }
        if let Some(p) = raw.vote {
            found.push(Publication::Vote(p));
        }
        if let Some(p) = raw.comment_edit {
            found.push(Publication::CommentEdit(p));
        }
        if let Some(p) = raw.comment_moderation {
            found.push(Publication::CommentModeration(p));
        }

        if found.len() != 1 {
            return Err(format!(
                "challenge request must contain exactly one publication, found {}",
                found.len()
            ));
        }

        let publication = found.remove(0);
        Ok(Self {
            publication,
            challenge_answers: raw.challenge_answers,
            challenge_comment_cids: raw.challenge_comment_cids,
        })
    }
}

impl From<DecryptedChallengeRequest> for RawChallengeRequest {
    fn from(request: DecryptedChallengeRequest) -> Self {
        let mut raw = RawChallengeRequest {
            comment: None,
            vote: None,
            comment_edit: None,
            comment_moderation: None,
            challenge_answers: request.challenge_answers,
            challenge_comment_cids: request.challenge_comment_cids,
        };
        match request.publication {
            Publication::Comment(p) => raw.comment = Some(p),
            Publication::Vote(p) => raw.vote = Some(p),
            Publication::CommentEdit(p) => raw.comment_edit = Some(p),
            Publication::CommentModeration(p) => raw.comment_moderation = Some(p),
        }
        raw
    }
}
