// Network ban history — active bans across the forums the author posts in.
//
//   severity = sqrt(banned / total)
//   trust    = max(0, 0.4 - 0.1 * log2(clean + 1))
//   score    = min(1, severity + trust)
//
// The square root keeps a couple of bans in a large footprint from
// dominating; the trust term fades to zero at 15 clean forums.

use anyhow::Result;

use crate::db::models::SubplebbitBanRecord;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

/// (score, banned forums, total forums) for the author's ban records.
pub fn ban_score(records: &[SubplebbitBanRecord], now: i64) -> (f64, usize, usize) {
    let total = records.len();
    let banned = records
        .iter()
        .filter(|r| r.ban_expires_at.is_some_and(|expires| expires > now))
        .count();
    let clean = total - banned;

    let severity = if total == 0 {
        0.0
    } else {
        (banned as f64 / total as f64).sqrt()
    };
    let trust_penalty = (0.4 - 0.1 * ((clean + 1) as f64).log2()).max(0.0);

    ((severity + trust_penalty).min(1.0), banned, total)
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let records = ctx.data.ban_records(ctx.author_public_key())?;
    if records.is_empty() {
        return Ok(FactorScore::skip("No crawled posting history"));
    }

    let (score, banned, total) = ban_score(&records, ctx.now);
    Ok(FactorScore::new(
        score,
        weight,
        format!("Banned in {banned} of {total} forums"),
    ))
}
