use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::db::models::TierThresholds;
use crate::plebbit::gateway::DEFAULT_GATEWAY_URL;
use crate::risk::FactorName;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// setting has a default, so `spamward init` works with an empty env.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// IPFS HTTP gateway used by the gateway forum client.
    pub gateway_url: String,
    /// How often each subscribed forum's IPNS record is polled.
    pub poll_interval: Duration,
    /// Global bound on simultaneous page and comment fetches.
    pub fetch_concurrency: usize,
    /// OAuth providers the forum accepts ("github", "google", ...).
    pub oauth_providers: Vec<String>,
    pub thresholds: TierThresholds,
    pub session_ttl_secs: i64,
    /// Nominal weight replacements, e.g. `velocityRisk=0.2,ipRisk=0`.
    pub factor_weights: HashMap<FactorName, f64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. `load` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TierThresholds::default();
        let thresholds = TierThresholds {
            auto_accept: parse_var(&lookup, "SPAMWARD_AUTO_ACCEPT_THRESHOLD", defaults.auto_accept)?,
            oauth: parse_var(&lookup, "SPAMWARD_OAUTH_THRESHOLD", defaults.oauth)?,
            auto_reject: parse_var(&lookup, "SPAMWARD_AUTO_REJECT_THRESHOLD", defaults.auto_reject)?,
        };
        if !(thresholds.auto_accept <= thresholds.oauth && thresholds.oauth <= thresholds.auto_reject) {
            bail!(
                "Tier thresholds must be ordered: auto-accept ({}) <= oauth ({}) <= auto-reject ({})",
                thresholds.auto_accept,
                thresholds.oauth,
                thresholds.auto_reject
            );
        }

        let poll_secs: u64 = parse_var(&lookup, "SPAMWARD_POLL_INTERVAL_SECS", 60)?;

        let oauth_providers = lookup("SPAMWARD_OAUTH_PROVIDERS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let factor_weights = match lookup("SPAMWARD_FACTOR_WEIGHTS") {
            Some(raw) => parse_factor_weights(&raw).context("Invalid SPAMWARD_FACTOR_WEIGHTS")?,
            None => HashMap::new(),
        };

        Ok(Self {
            db_path: lookup("SPAMWARD_DB_PATH").unwrap_or_else(|| "./spamward.db".to_string()),
            gateway_url: lookup("SPAMWARD_GATEWAY_URL")
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            fetch_concurrency: parse_var(&lookup, "SPAMWARD_FETCH_CONCURRENCY", 8)?,
            oauth_providers,
            thresholds,
            session_ttl_secs: parse_var(&lookup, "SPAMWARD_SESSION_TTL_SECS", 3600)?,
            factor_weights,
        })
    }
}

/// Parse a numeric variable, falling back to `default` when unset or blank.
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a number, got {raw:?}: {e}")),
        _ => Ok(default),
    }
}

/// Parse `name=weight` pairs separated by commas.
pub fn parse_factor_weights(raw: &str) -> Result<HashMap<FactorName, f64>> {
    let mut weights = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Expected name=weight, got {pair:?}");
        };
        let factor: FactorName = name.trim().parse()?;
        let weight: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Weight for {factor} is not a number: {value:?}"))?;
        if !weight.is_finite() || weight < 0.0 {
            bail!("Weight for {factor} must be a non-negative number, got {weight}");
        }
        weights.insert(factor, weight);
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.db_path, "./spamward.db");
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.fetch_concurrency, 8);
        assert_eq!(config.thresholds, TierThresholds::default());
        assert_eq!(config.session_ttl_secs, 3600);
        assert!(config.oauth_providers.is_empty());
        assert!(config.factor_weights.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("SPAMWARD_DB_PATH", "/tmp/x.db"),
            ("SPAMWARD_FETCH_CONCURRENCY", "3"),
            ("SPAMWARD_OAUTH_PROVIDERS", "GitHub, google,,"),
            ("SPAMWARD_FACTOR_WEIGHTS", "velocityRisk=0.2, ipRisk=0"),
        ])
        .unwrap();
        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.fetch_concurrency, 3);
        assert_eq!(config.oauth_providers, vec!["github", "google"]);
        assert_eq!(config.factor_weights[&FactorName::VelocityRisk], 0.2);
        assert_eq!(config.factor_weights[&FactorName::IpRisk], 0.0);
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = from_pairs(&[("SPAMWARD_FETCH_CONCURRENCY", "lots")]).unwrap_err();
        assert!(err.to_string().contains("SPAMWARD_FETCH_CONCURRENCY"));
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        assert!(from_pairs(&[("SPAMWARD_OAUTH_THRESHOLD", "0.9")]).is_err());
    }

    #[test]
    fn test_factor_weight_errors() {
        assert!(parse_factor_weights("velocityRisk").is_err());
        assert!(parse_factor_weights("noSuchFactor=0.1").is_err());
        assert!(parse_factor_weights("ipRisk=-1").is_err());
        assert!(parse_factor_weights("ipRisk=abc").is_err());
        assert!(parse_factor_weights("").unwrap().is_empty());
    }
}
