// IP risk — from caller-supplied intelligence about the publisher's address.

use anyhow::Result;

use crate::risk::context::{IpIntelligence, RiskContext};
use crate::risk::engine::FactorScore;

pub fn ip_score(intel: &IpIntelligence) -> (f64, &'static str) {
    if intel.is_tor {
        (1.0, "Tor exit node")
    } else if intel.is_proxy {
        (0.8, "proxy")
    } else if intel.is_vpn {
        (0.7, "VPN")
    } else if intel.is_datacenter {
        (0.6, "datacenter")
    } else {
        (0.2, "residential")
    }
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let Some(intel) = ctx.inputs.ip_intelligence.as_ref() else {
        return Ok(FactorScore::skip("No IP intelligence"));
    };
    let (score, label) = ip_score(intel);
    let explanation = match intel.country_code.as_deref() {
        Some(country) => format!("IP looks {label} ({country})"),
        None => format!("IP looks {label}"),
    };
    Ok(FactorScore::new(score, weight, explanation))
}
