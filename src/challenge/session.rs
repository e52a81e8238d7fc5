// Challenge sessions — evaluate a publication, then track the challenge
// the publisher was given until it completes, fails, or expires.
//
// The publication is stored only after it has been scored, so it never
// counts as evidence about itself.

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use super::request::DecryptedChallengeRequest;
use crate::db::models::{ChallengeSession, ChallengeTier, DiscoverySource, SessionStatus, TierThresholds};
use crate::db::Database;
use crate::risk::{EvaluationInputs, RiskScoreResult};

/// Default lifetime of a pending challenge.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

/// Per-forum settings and side inputs for one evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    pub thresholds: TierThresholds,
    pub session_ttl_secs: i64,
    /// Signing key of the forum that forwarded the request, if known.
    pub subplebbit_public_key: Option<String>,
    pub inputs: EvaluationInputs,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            subplebbit_public_key: None,
            inputs: EvaluationInputs::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub session: ChallengeSession,
    pub risk: RiskScoreResult,
}

impl Evaluation {
    pub fn tier(&self) -> ChallengeTier {
        self.session.challenge_tier
    }
}

/// Score a request, open its challenge session, and remember its forum.
pub async fn evaluate_publication(
    db: &dyn Database,
    request: &DecryptedChallengeRequest,
    options: &EvaluationOptions,
    now: i64,
) -> Result<Evaluation> {
    let publication = &request.publication;
    let risk = db
        .calculate_risk(request, now, &options.inputs)
        .await
        .context("Failed to score publication")?;
    let tier = ChallengeTier::from_score(risk.score, &options.thresholds);

    let (status, completed_at) = match tier {
        ChallengeTier::AutoAccept => (SessionStatus::Completed, Some(now)),
        ChallengeTier::AutoReject => (SessionStatus::Failed, Some(now)),
        ChallengeTier::CaptchaOnly | ChallengeTier::CaptchaAndOauth => (SessionStatus::Pending, None),
    };

    let session = ChallengeSession {
        session_id: Uuid::new_v4().to_string(),
        author_address: publication.author().address.clone(),
        author_public_key: publication.author_public_key().to_string(),
        subplebbit_address: publication.subplebbit_address().to_string(),
        subplebbit_public_key: options.subplebbit_public_key.clone(),
        risk_score: risk.score,
        challenge_tier: tier,
        status,
        captcha_completed: false,
        oauth_identity: None,
        received_at: now,
        expires_at: now + options.session_ttl_secs,
        completed_at,
    };

    db.record_evaluation(&session, publication).await?;
    let discovered = db
        .add_subplebbit(
            publication.subplebbit_address(),
            options.subplebbit_public_key.as_deref(),
            DiscoverySource::Evaluation,
            now,
        )
        .await?;
    if discovered {
        info!(address = %session.subplebbit_address, "New subplebbit from evaluation");
    }

    info!(
        session_id = %session.session_id,
        kind = %publication.kind(),
        score = risk.score,
        tier = %tier,
        "Publication evaluated"
    );

    Ok(Evaluation { session, risk })
}

async fn load_pending(db: &dyn Database, session_id: &str) -> Result<ChallengeSession> {
    let session = db
        .get_session(session_id)
        .await?
        .with_context(|| format!("Challenge session {session_id} not found"))?;
    if session.status != SessionStatus::Pending {
        bail!(
            "Challenge session {session_id} is already {}",
            session.status.as_str()
        );
    }
    Ok(session)
}

async fn reload(db: &dyn Database, session_id: &str) -> Result<ChallengeSession> {
    db.get_session(session_id)
        .await?
        .with_context(|| format!("Challenge session {session_id} disappeared"))
}

/// Record the captcha outcome for a pending session.
///
/// A captcha-and-OAuth session stays pending after a passed captcha until
/// an OAuth identity is linked.
pub async fn complete_challenge(
    db: &dyn Database,
    session_id: &str,
    captcha_passed: bool,
    now: i64,
) -> Result<ChallengeSession> {
    let session = load_pending(db, session_id).await?;

    let (status, captcha_completed, completed_at) = if session.expires_at < now || !captcha_passed {
        (SessionStatus::Failed, false, Some(now))
    } else if session.challenge_tier == ChallengeTier::CaptchaAndOauth
        && session.oauth_identity.is_none()
    {
        (SessionStatus::Pending, true, None)
    } else {
        (SessionStatus::Completed, true, Some(now))
    };

    db.update_session(session_id, status, captcha_completed, None, completed_at)
        .await?;
    info!(session_id, status = status.as_str(), "Challenge answered");
    reload(db, session_id).await
}

/// Link an OAuth identity ("provider:id") to a session. Completes the
/// session when the captcha was already passed.
pub async fn record_oauth_identity(
    db: &dyn Database,
    session_id: &str,
    identity: &str,
    now: i64,
) -> Result<ChallengeSession> {
    let valid = identity
        .split_once(':')
        .is_some_and(|(provider, id)| !provider.is_empty() && !id.is_empty());
    if !valid {
        bail!("OAuth identity must look like provider:id, got '{identity}'");
    }

    let session = db
        .get_session(session_id)
        .await?
        .with_context(|| format!("Challenge session {session_id} not found"))?;

    let completes = session.status == SessionStatus::Pending
        && session.captcha_completed
        && session.expires_at >= now;
    let (status, completed_at) = if completes {
        (SessionStatus::Completed, Some(now))
    } else {
        (session.status, None)
    };

    db.update_session(
        session_id,
        status,
        session.captcha_completed,
        Some(identity),
        completed_at,
    )
    .await?;
    reload(db, session_id).await
}

/// Drop pending sessions past their expiry, with their publications.
pub async fn purge_expired_sessions(db: &dyn Database, now: i64) -> Result<usize> {
    let purged = db.purge_expired_sessions(now).await?;
    if purged > 0 {
        info!(purged, "Purged expired challenge sessions");
    }
    Ok(purged)
}
