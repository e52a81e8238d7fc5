// Risk scoring engine — runs every factor and blends them into one score.
//
// Each factor gets its nominal weight and either keeps it or returns
// weight 0 to say "not applicable here" or "no data". The final score is
// a weighted mean over the factors that kept their weight:
//
//   effective_i = weight_i / Σ weight_active
//   score       = Σ score_i × effective_i
//
// so skipped factors never drag the score toward 0 or 1, and the active
// factors keep their relative proportions exactly. If every factor skips,
// the score is the neutral 0.5.

use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::context::RiskContext;
use super::factors;

/// Score reported when no factor had anything to say.
pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FactorName {
    AccountAge,
    KarmaScore,
    CommentContentTitleRisk,
    CommentUrlRisk,
    VelocityRisk,
    IpRisk,
    NetworkBanHistory,
    NetworkRemovalRate,
    SocialVerification,
    WalletVerification,
    WalletVelocity,
}

impl FactorName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorName::AccountAge => "accountAge",
            FactorName::KarmaScore => "karmaScore",
            FactorName::CommentContentTitleRisk => "commentContentTitleRisk",
            FactorName::CommentUrlRisk => "commentUrlRisk",
            FactorName::VelocityRisk => "velocityRisk",
            FactorName::IpRisk => "ipRisk",
            FactorName::NetworkBanHistory => "networkBanHistory",
            FactorName::NetworkRemovalRate => "networkRemovalRate",
            FactorName::SocialVerification => "socialVerification",
            FactorName::WalletVerification => "walletVerification",
            FactorName::WalletVelocity => "walletVelocity",
        }
    }
}

impl std::fmt::Display for FactorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FactorName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        FACTORS
            .iter()
            .map(|entry| entry.name)
            .find(|name| name.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown risk factor: {s}"))
    }
}

/// What a single factor returns.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorScore {
    pub score: f64,
    /// The nominal weight if the factor applies, 0 if it skipped.
    pub weight: f64,
    pub explanation: String,
}

impl FactorScore {
    /// An active factor. The score is clamped to [0, 1] and rounded to six
    /// decimals so additive tables land on their documented values.
    pub fn new(score: f64, weight: f64, explanation: impl Into<String>) -> Self {
        let score = (score.clamp(0.0, 1.0) * 1e6).round() / 1e6;
        Self {
            score,
            weight,
            explanation: explanation.into(),
        }
    }

    /// A factor that does not apply or has no data.
    pub fn skip(explanation: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            weight: 0.0,
            explanation: explanation.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.weight <= 0.0
    }
}

type FactorFn = fn(&RiskContext<'_>, f64) -> Result<FactorScore>;

struct FactorEntry {
    name: FactorName,
    weight: f64,
    compute: FactorFn,
}

/// Every factor with its nominal weight. Weights sum to 1.0.
const FACTORS: &[FactorEntry] = &[
    FactorEntry {
        name: FactorName::AccountAge,
        weight: 0.10,
        compute: factors::account_age::compute,
    },
    FactorEntry {
        name: FactorName::KarmaScore,
        weight: 0.10,
        compute: factors::karma::compute,
    },
    FactorEntry {
        name: FactorName::CommentContentTitleRisk,
        weight: 0.14,
        compute: factors::comment_content::compute,
    },
    FactorEntry {
        name: FactorName::CommentUrlRisk,
        weight: 0.12,
        compute: factors::comment_url::compute,
    },
    FactorEntry {
        name: FactorName::VelocityRisk,
        weight: 0.10,
        compute: factors::velocity::compute,
    },
    FactorEntry {
        name: FactorName::IpRisk,
        weight: 0.10,
        compute: factors::ip::compute,
    },
    FactorEntry {
        name: FactorName::NetworkBanHistory,
        weight: 0.08,
        compute: factors::ban_history::compute,
    },
    FactorEntry {
        name: FactorName::NetworkRemovalRate,
        weight: 0.06,
        compute: factors::removal_rate::compute,
    },
    FactorEntry {
        name: FactorName::SocialVerification,
        weight: 0.08,
        compute: factors::social::compute,
    },
    FactorEntry {
        name: FactorName::WalletVerification,
        weight: 0.06,
        compute: factors::wallet::compute_verification,
    },
    FactorEntry {
        name: FactorName::WalletVelocity,
        weight: 0.06,
        compute: factors::wallet::compute_velocity,
    },
];

/// Nominal weight of a factor before overrides.
pub fn nominal_weight(name: FactorName) -> f64 {
    FACTORS
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.weight)
        .unwrap_or(0.0)
}

pub fn factor_names() -> impl Iterator<Item = FactorName> {
    FACTORS.iter().map(|entry| entry.name)
}

/// One factor's contribution to a finished evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub name: FactorName,
    pub score: f64,
    pub weight: f64,
    pub effective_weight: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScoreResult {
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

impl RiskScoreResult {
    pub fn factor(&self, name: FactorName) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.name == name)
    }
}

/// Run every factor against the context and blend the results.
pub fn calculate_risk_score(ctx: &RiskContext<'_>) -> Result<RiskScoreResult> {
    let mut scored = Vec::with_capacity(FACTORS.len());

    for entry in FACTORS {
        let weight = ctx
            .inputs
            .weight_overrides
            .get(&entry.name)
            .copied()
            .unwrap_or(entry.weight);

        let factor = if weight <= 0.0 {
            FactorScore::skip("Disabled by weight override")
        } else {
            (entry.compute)(ctx, weight)
                .with_context(|| format!("Risk factor {} failed", entry.name))?
        };
        scored.push((entry.name, factor));
    }

    Ok(redistribute(scored))
}

/// Turn raw factor results into effective weights and the final score.
pub fn redistribute(scored: Vec<(FactorName, FactorScore)>) -> RiskScoreResult {
    let active_weight: f64 = scored
        .iter()
        .filter(|(_, f)| !f.is_skipped())
        .map(|(_, f)| f.weight)
        .sum();

    let factors: Vec<RiskFactor> = scored
        .into_iter()
        .map(|(name, f)| {
            let effective_weight = if f.is_skipped() || active_weight <= 0.0 {
                0.0
            } else {
                f.weight / active_weight
            };
            RiskFactor {
                name,
                score: f.score,
                weight: if f.is_skipped() { 0.0 } else { f.weight },
                effective_weight,
                explanation: f.explanation,
            }
        })
        .collect();

    let score = if active_weight <= 0.0 {
        NEUTRAL_SCORE
    } else {
        factors
            .iter()
            .map(|f| f.score * f.effective_weight)
            .sum::<f64>()
            .clamp(0.0, 1.0)
    };

    RiskScoreResult { score, factors }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_weights_sum_to_one() {
        let total: f64 = FACTORS.iter().map(|entry| entry.weight).sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {total}");
    }

    #[test]
    fn test_factor_names_roundtrip() {
        for name in factor_names() {
            assert_eq!(name.as_str().parse::<FactorName>().unwrap(), name);
        }
        assert!("bogus".parse::<FactorName>().is_err());
    }

    #[test]
    fn test_all_skipped_is_neutral() {
        let result = redistribute(vec![
            (FactorName::AccountAge, FactorScore::skip("none")),
            (FactorName::IpRisk, FactorScore::skip("none")),
        ]);
        assert_eq!(result.score, NEUTRAL_SCORE);
        assert!(result.factors.iter().all(|f| f.effective_weight == 0.0));
    }

    #[test]
    fn test_redistribution_preserves_ratios() {
        let result = redistribute(vec![
            (FactorName::AccountAge, FactorScore::new(1.0, 0.10, "a")),
            (FactorName::CommentContentTitleRisk, FactorScore::skip("n/a")),
            (FactorName::VelocityRisk, FactorScore::new(0.0, 0.30, "b")),
        ]);
        let age = result.factor(FactorName::AccountAge).unwrap();
        let velocity = result.factor(FactorName::VelocityRisk).unwrap();
        assert!((age.effective_weight - 0.25).abs() < 1e-9);
        assert!((velocity.effective_weight - 0.75).abs() < 1e-9);
        assert!((result.score - 0.25).abs() < 1e-9);

        let total: f64 = result.factors.iter().map(|f| f.effective_weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_factor_score_is_clamped() {
        assert_eq!(FactorScore::new(1.7, 0.1, "x").score, 1.0);
        assert_eq!(FactorScore::new(-0.2, 0.1, "x").score, 0.0);
        assert!(FactorScore::new(0.2 + 0.35, 0.1, "x").score >= 0.55);
    }
}
