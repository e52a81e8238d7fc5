// Challenge flow tests — evaluation, captcha and OAuth completion, purging.
//
// Thresholds are set per test so the tier does not depend on the exact
// score an empty store produces.

mod common;

use common::{comment_request, memory_db, FORUM, NOW};
use spamward::challenge::{
    complete_challenge, evaluate_publication, purge_expired_sessions, record_oauth_identity,
    EvaluationOptions,
};
use spamward::db::models::{ChallengeTier, DiscoverySource, SessionStatus, TierThresholds};

fn options_for(tier: ChallengeTier) -> EvaluationOptions {
    let thresholds = match tier {
        ChallengeTier::AutoAccept => TierThresholds {
            auto_accept: 1.1,
            oauth: 1.1,
            auto_reject: 1.1,
        },
        ChallengeTier::CaptchaOnly => TierThresholds {
            auto_accept: 0.0,
            oauth: 1.1,
            auto_reject: 1.1,
        },
        ChallengeTier::CaptchaAndOauth => TierThresholds {
            auto_accept: 0.0,
            oauth: 0.0,
            auto_reject: 1.1,
        },
        ChallengeTier::AutoReject => TierThresholds {
            auto_accept: 0.0,
            oauth: 0.0,
            auto_reject: 0.0,
        },
    };
    EvaluationOptions {
        thresholds,
        ..Default::default()
    }
}

// ============================================================
// Evaluation
// ============================================================

#[tokio::test]
async fn auto_tiers_settle_immediately() {
    let db = memory_db();
    let request = comment_request("pk", "hello", NOW);

    let accepted = evaluate_publication(db.as_ref(), &request, &options_for(ChallengeTier::AutoAccept), NOW)
        .await
        .unwrap();
    assert_eq!(accepted.session.status, SessionStatus::Completed);
    assert_eq!(accepted.session.completed_at, Some(NOW));

    let rejected = evaluate_publication(db.as_ref(), &request, &options_for(ChallengeTier::AutoReject), NOW)
        .await
        .unwrap();
    assert_eq!(rejected.session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn evaluation_registers_the_forum() {
    let db = memory_db();
    evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaOnly),
        NOW,
    )
    .await
    .unwrap();

    let forum = db.get_subplebbit(FORUM).await.unwrap().unwrap();
    assert_eq!(forum.discovered_via, DiscoverySource::Evaluation);
    assert!(forum.indexing_enabled);
}

#[tokio::test]
async fn session_stores_score_and_expiry() {
    let db = memory_db();
    let evaluation = evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaOnly),
        NOW,
    )
    .await
    .unwrap();

    let stored = db
        .get_session(&evaluation.session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.risk_score, evaluation.risk.score);
    assert_eq!(stored.challenge_tier, ChallengeTier::CaptchaOnly);
    assert_eq!(stored.expires_at, NOW + 3600);
    assert_eq!(stored.status, SessionStatus::Pending);
}

// ============================================================
// Completion
// ============================================================

#[tokio::test]
async fn captcha_completes_captcha_only_session() {
    let db = memory_db();
    let evaluation = evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaOnly),
        NOW,
    )
    .await
    .unwrap();

    let session = complete_challenge(db.as_ref(), &evaluation.session.session_id, true, NOW + 30)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.captcha_completed);

    // A settled session cannot be completed again.
    assert!(
        complete_challenge(db.as_ref(), &evaluation.session.session_id, true, NOW + 60)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn oauth_tier_needs_both_steps() {
    let db = memory_db();
    let evaluation = evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaAndOauth),
        NOW,
    )
    .await
    .unwrap();
    let id = evaluation.session.session_id.as_str();

    let after_captcha = complete_challenge(db.as_ref(), id, true, NOW + 10).await.unwrap();
    assert_eq!(after_captcha.status, SessionStatus::Pending);

    let after_oauth = record_oauth_identity(db.as_ref(), id, "github:12345", NOW + 20)
        .await
        .unwrap();
    assert_eq!(after_oauth.status, SessionStatus::Completed);
    assert_eq!(after_oauth.oauth_identity.as_deref(), Some("github:12345"));
}

#[tokio::test]
async fn malformed_oauth_identity_is_rejected() {
    let db = memory_db();
    let evaluation = evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaAndOauth),
        NOW,
    )
    .await
    .unwrap();

    assert!(
        record_oauth_identity(db.as_ref(), &evaluation.session.session_id, "github", NOW)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn expired_session_fails_on_completion() {
    let db = memory_db();
    let evaluation = evaluate_publication(
        db.as_ref(),
        &comment_request("pk", "hello", NOW),
        &options_for(ChallengeTier::CaptchaOnly),
        NOW,
    )
    .await
    .unwrap();

    let session = complete_challenge(db.as_ref(), &evaluation.session.session_id, true, NOW + 7200)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

// ============================================================
// Purging
// ============================================================

#[tokio::test]
async fn purge_removes_only_expired_pending_sessions() {
    let db = memory_db();
    let pending = evaluate_publication(
        db.as_ref(),
        &comment_request("a", "hello", NOW),
        &options_for(ChallengeTier::CaptchaOnly),
        NOW,
    )
    .await
    .unwrap();
    let accepted = evaluate_publication(
        db.as_ref(),
        &comment_request("b", "hello", NOW),
        &options_for(ChallengeTier::AutoAccept),
        NOW,
    )
    .await
    .unwrap();

    assert_eq!(purge_expired_sessions(db.as_ref(), NOW + 60).await.unwrap(), 0);
    assert_eq!(purge_expired_sessions(db.as_ref(), NOW + 7200).await.unwrap(), 1);

    assert!(db.get_session(&pending.session.session_id).await.unwrap().is_none());
    assert!(db.get_session(&accepted.session.session_id).await.unwrap().is_some());
    assert_eq!(db.db_stats().await.unwrap().local_publications, 1);
}
