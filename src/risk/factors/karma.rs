// Karma — standing across forums, counted per forum rather than summed.
//
// Each forum contributes one vote: positive when the author's net karma
// there is above zero, negative when below. A single forum reporting
// -1000 weighs the same as one reporting -1.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

/// Score for `positive` and `negative` forum counts.
pub fn karma_score(positive: usize, negative: usize) -> (f64, &'static str) {
    if positive == 0 && negative == 0 {
        return (0.5, "no karma signal");
    }
    let net = positive as i64 - negative as i64;
    match net {
        0 => (0.5, "mixed"),
        1..=2 => (0.35, "slightly positive"),
        3..=4 => (0.2, "positive"),
        n if n >= 5 => (0.1, "strongly positive"),
        -2..=-1 => (0.65, "slightly negative"),
        -4..=-3 => (0.8, "negative"),
        _ => (0.9, "strongly negative"),
    }
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let publication = ctx.publication();
    let mut net_by_sub: BTreeMap<String, i64> = ctx
        .data
        .author_karma_by_subplebbit(ctx.author_public_key())?
        .into_iter()
        .map(|(sub, record)| (sub, record.net()))
        .collect();

    // The request's own report replaces whatever is stored for this forum.
    if let Some(current) = publication.current_subplebbit_karma() {
        net_by_sub.insert(
            publication.subplebbit_address().to_string(),
            current.net_karma(),
        );
    }

    let positive = net_by_sub.values().filter(|net| **net > 0).count();
    let negative = net_by_sub.values().filter(|net| **net < 0).count();
    let (score, label) = karma_score(positive, negative);

    Ok(FactorScore::new(
        score,
        weight,
        format!("Karma {label}: {positive} positive, {negative} negative forums"),
    ))
}
