// Evaluation context handed to every risk factor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::challenge::request::{DecryptedChallengeRequest, Publication};
use crate::combined::CombinedDataService;

use super::engine::FactorName;

/// What the caller's IP lookup service knows about the publisher's address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpIntelligence {
    pub is_tor: bool,
    pub is_proxy: bool,
    pub is_vpn: bool,
    #[serde(alias = "isHosting")]
    pub is_datacenter: bool,
    pub country_code: Option<String>,
}

/// Side inputs supplied by the caller per evaluation. The engine never
/// looks any of these up itself.
#[derive(Debug, Clone, Default)]
pub struct EvaluationInputs {
    pub ip_intelligence: Option<IpIntelligence>,
    /// On-chain transaction counts keyed by wallet address.
    pub wallet_transaction_counts: HashMap<String, u64>,
    /// OAuth providers enabled for the forum ("github", "google", ...).
    pub enabled_oauth_providers: Vec<String>,
    /// Replacement nominal weights by factor.
    pub weight_overrides: HashMap<FactorName, f64>,
}

impl EvaluationInputs {
    /// Transaction count for a wallet; addresses compare case-insensitively.
    pub fn transaction_count(&self, wallet_address: &str) -> u64 {
        self.wallet_transaction_counts
            .iter()
            .find(|(address, _)| address.eq_ignore_ascii_case(wallet_address))
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn is_provider_enabled(&self, provider: &str) -> bool {
        self.enabled_oauth_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }
}

pub struct RiskContext<'a> {
    pub request: &'a DecryptedChallengeRequest,
    /// Evaluation time, unix seconds.
    pub now: i64,
    pub data: CombinedDataService<'a>,
    pub inputs: &'a EvaluationInputs,
}

impl<'a> RiskContext<'a> {
    pub fn publication(&self) -> &'a Publication {
        &self.request.publication
    }

    pub fn author_public_key(&self) -> &'a str {
        self.request.publication.author_public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_count_ignores_case() {
        let mut inputs = EvaluationInputs::default();
        inputs
            .wallet_transaction_counts
            .insert("0xAbC".to_string(), 12);
        assert_eq!(inputs.transaction_count("0xabc"), 12);
        assert_eq!(inputs.transaction_count("0xdef"), 0);
    }

    #[test]
    fn test_ip_intelligence_accepts_hosting_alias() {
        let intel: IpIntelligence = serde_json::from_str(r#"{"isHosting": true}"#).unwrap();
        assert!(intel.is_datacenter);
        assert!(!intel.is_tor);
    }
}
