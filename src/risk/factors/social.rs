// Social verification — OAuth identities linked through completed challenges.
//
// Identities are stored as "provider:id". Each provider has a fixed
// credibility; an identity shared by N authors is worth 1/sqrt(N) of that.
// Providers combine with 0.7 decay per additional provider, capped at 2.5,
// then map onto the curve 1 - 0.75c + 0.15c².

use std::collections::BTreeMap;

use anyhow::Result;

use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

pub const MAX_CREDIBILITY: f64 = 2.5;
const PROVIDER_DECAY: f64 = 0.7;
const UNKNOWN_PROVIDER_CREDIBILITY: f64 = 0.5;

pub fn provider_credibility(provider: &str) -> f64 {
    match provider.to_ascii_lowercase().as_str() {
        "google" | "github" | "twitter" => 1.0,
        "discord" | "reddit" => 0.7,
        "tiktok" | "telegram" | "yandex" => 0.5,
        _ => UNKNOWN_PROVIDER_CREDIBILITY,
    }
}

/// Provider half of a "provider:id" identity.
pub fn provider_of(identity: &str) -> &str {
    identity.split_once(':').map(|(p, _)| p).unwrap_or(identity)
}

/// Combine per-provider credibilities with decay and cap.
pub fn combined_credibility(mut per_provider: Vec<f64>) -> f64 {
    per_provider.sort_by(|a, b| b.total_cmp(a));
    per_provider
        .iter()
        .enumerate()
        .map(|(i, c)| c * PROVIDER_DECAY.powi(i as i32))
        .sum::<f64>()
        .min(MAX_CREDIBILITY)
}

pub fn credibility_score(credibility: f64) -> f64 {
    1.0 - 0.75 * credibility + 0.15 * credibility * credibility
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    if ctx.inputs.enabled_oauth_providers.is_empty() {
        return Ok(FactorScore::skip("No OAuth providers enabled"));
    }

    let identities = ctx.data.oauth_identities(ctx.author_public_key())?;
    if identities.is_empty() {
        return Ok(FactorScore::new(1.0, weight, "No verification"));
    }

    // Best identity per provider, after discounting shared identities.
    let mut best: BTreeMap<String, f64> = BTreeMap::new();
    for identity in &identities {
        let sharers = ctx.data.oauth_identity_author_count(identity)?.max(1);
        let provider = provider_of(identity).to_ascii_lowercase();
        let credibility = provider_credibility(&provider) / (sharers as f64).sqrt();
        let entry = best.entry(provider).or_insert(0.0);
        if credibility > *entry {
            *entry = credibility;
        }
    }

    let providers: Vec<String> = best.keys().cloned().collect();
    let credibility = combined_credibility(best.into_values().collect());
    Ok(FactorScore::new(
        credibility_score(credibility),
        weight,
        format!(
            "Verified via {} (credibility {credibility:.2})",
            providers.join(", ")
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SessionStatus;
    use crate::db::queries::{insert_session, update_session};
    use crate::risk::context::EvaluationInputs;
    use crate::testutil::{comment_request, context, session_for, test_conn};

    fn link_identity(conn: &rusqlite::Connection, session_id: &str, pk: &str, identity: &str) {
        let publication = comment_request(pk, "hi").publication;
        insert_session(conn, &session_for(session_id, &publication, 100)).unwrap();
        update_session(conn, session_id, SessionStatus::Completed, true, Some(identity), Some(200)).unwrap();
    }

    fn enabled() -> EvaluationInputs {
        EvaluationInputs {
            enabled_oauth_providers: vec!["github".to_string(), "telegram".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_curve_values() {
        assert!((credibility_score(1.0) - 0.40).abs() < 1e-9);
        assert!((credibility_score(0.5) - 0.6625).abs() < 1e-9);
        assert!((credibility_score(MAX_CREDIBILITY) - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn test_decay_and_cap() {
        assert!((combined_credibility(vec![0.5, 1.0]) - 1.35).abs() < 1e-9);
        assert_eq!(combined_credibility(vec![1.0; 8]), MAX_CREDIBILITY);
    }

    #[test]
    fn test_skipped_without_providers() {
        let conn = test_conn();
        let request = comment_request("pk", "hi");
        let inputs = EvaluationInputs::default();
        assert!(compute(&context(&conn, &request, &inputs, 300), 0.08)
            .unwrap()
            .is_skipped());
    }

    #[test]
    fn test_unverified_is_max_risk() {
        let conn = test_conn();
        let request = comment_request("pk", "hi");
        let inputs = enabled();
        let factor = compute(&context(&conn, &request, &inputs, 300), 0.08).unwrap();
        assert_eq!(factor.score, 1.0);
    }

    #[test]
    fn test_strong_provider() {
        let conn = test_conn();
        link_identity(&conn, "s1", "pk", "github:42");
        let request = comment_request("pk", "hi");
        let inputs = enabled();
        let factor = compute(&context(&conn, &request, &inputs, 300), 0.08).unwrap();
        assert!((factor.score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_shared_identity_is_discounted() {
        let conn = test_conn();
        for (i, pk) in ["pk", "b", "c", "d"].iter().enumerate() {
            link_identity(&conn, &format!("s{i}"), pk, "github:42");
        }
        let request = comment_request("pk", "hi");
        let inputs = enabled();
        let factor = compute(&context(&conn, &request, &inputs, 300), 0.08).unwrap();
        // credibility 1 / sqrt(4) = 0.5
        assert!((factor.score - 0.6625).abs() < 1e-6);
    }
}
