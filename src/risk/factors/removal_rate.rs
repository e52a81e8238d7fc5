// Network removal rate — how often moderators elsewhere removed the author's
// comments or rejected them from a mod queue.

use anyhow::Result;

use crate::db::models::ModerationStats;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

/// Worse of the removal and rejection rates, or None without any data.
pub fn worst_rate(stats: &ModerationStats) -> Option<f64> {
    let removal = (stats.indexed_comments > 0)
        .then(|| stats.removed_comments as f64 / stats.indexed_comments as f64);
    let rejection = (stats.resolved_queue_items > 0)
        .then(|| stats.rejected_queue_items as f64 / stats.resolved_queue_items as f64);
    match (removal, rejection) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

pub fn rate_score(rate: f64) -> f64 {
    if rate <= 0.0 {
        0.1
    } else if rate < 0.1 {
        0.25
    } else if rate < 0.3 {
        0.5
    } else if rate < 0.5 {
        0.7
    } else {
        0.9
    }
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let stats = ctx.data.moderation_stats(ctx.author_public_key())?;
    let Some(rate) = worst_rate(&stats) else {
        return Ok(FactorScore::skip("No crawled moderation history"));
    };

    Ok(FactorScore::new(
        rate_score(rate),
        weight,
        format!(
            "{} of {} crawled comments removed, {} of {} queued comments rejected",
            stats.removed_comments,
            stats.indexed_comments,
            stats.rejected_queue_items,
            stats.resolved_queue_items
        ),
    ))
}
