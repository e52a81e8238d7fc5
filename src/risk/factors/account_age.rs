// Account age — how long this service has known the signing key.
//
// Age claims inside the request are ignored; a hostile forum could forge
// them. Only first-hand observations and crawled history count.

use anyhow::Result;

use super::DAY;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

/// Score and label for an account first seen `age_secs` ago.
pub fn age_score(age_secs: i64) -> (f64, &'static str) {
    let days = age_secs.max(0) as f64 / DAY as f64;
    if days < 1.0 {
        (0.9, "brand new")
    } else if days < 7.0 {
        (0.75, "very new")
    } else if days < 30.0 {
        (0.5, "new")
    } else if days < 90.0 {
        (0.35, "established")
    } else if days < 365.0 {
        (0.2, "old")
    } else {
        (0.1, "very established")
    }
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let Some(first_seen) = ctx.data.author_first_seen(ctx.author_public_key())? else {
        return Ok(FactorScore::new(1.0, weight, "No account history"));
    };

    let age = ctx.now - first_seen;
    let (score, label) = age_score(age);
    Ok(FactorScore::new(
        score,
        weight,
        format!("Account first seen {} days ago ({label})", age.max(0) / DAY),
    ))
}
