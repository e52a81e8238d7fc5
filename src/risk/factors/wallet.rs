// Wallet factors — on-chain history as a trust signal, and wallet reuse
// across many author keys as a bot-farm signal.

use anyhow::Result;

use super::velocity::{classify, ladder, VelocityTier};
use super::HOUR;
use crate::challenge::request::PublicationKind;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

pub fn transaction_score(tx_count: u64) -> f64 {
    match tx_count {
        0..=10 => 0.35,
        11..=50 => 0.25,
        51..=200 => 0.15,
        _ => 0.10,
    }
}

/// Trust from the busiest wallet the author alone has claimed.
pub fn compute_verification(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let author = ctx.author_public_key();
    let mut best: Option<(String, u64)> = None;

    for wallet in ctx.publication().author().wallet_addresses() {
        let tx_count = ctx.inputs.transaction_count(&wallet);
        if tx_count == 0 {
            continue;
        }
        let claimants = ctx.data.wallet_claimants(&wallet)?;
        if claimants.iter().any(|pk| pk != author) {
            continue;
        }
        if best.as_ref().map_or(true, |(_, count)| tx_count > *count) {
            best = Some((wallet, tx_count));
        }
    }

    let Some((wallet, tx_count)) = best else {
        return Ok(FactorScore::skip("No verified wallet with transactions"));
    };
    Ok(FactorScore::new(
        transaction_score(tx_count),
        weight,
        format!("Wallet {wallet} has {tx_count} transactions"),
    ))
}

/// Hourly posts and replies across every author using the same wallet.
pub fn compute_velocity(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let publication = ctx.publication();
    let wallets = publication.author().wallet_addresses();
    if wallets.is_empty() {
        return Ok(FactorScore::skip("No wallets"));
    }

    let kind = publication.kind();
    let mut worst: Option<(VelocityTier, String)> = None;
    for wallet in wallets {
        let mut counts = ctx.data.wallet_velocity(&wallet, ctx.now - HOUR)?;
        if kind.is_indexed() {
            counts.record(kind);
        }

        let posts = classify(counts.post, ladder(PublicationKind::Post));
        let replies = classify(counts.reply, ladder(PublicationKind::Reply));
        let tier = if replies.score() > posts.score() {
            replies
        } else {
            posts
        };
        if worst.as_ref().map_or(true, |(t, _)| tier.score() > t.score()) {
            let explanation = format!(
                "Wallet {wallet}: {} posts, {} replies in the last hour ({})",
                counts.post,
                counts.reply,
                tier.label()
            );
            worst = Some((tier, explanation));
        }
    }

    match worst {
        Some((tier, explanation)) => Ok(FactorScore::new(tier.score(), weight, explanation)),
        None => Ok(FactorScore::skip("No wallets")),
    }
}
