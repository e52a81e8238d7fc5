// Velocity — how fast the author is publishing right now.
//
// Three paths, highest wins:
// - per-type: hourly count of the type being published, on that type's ladder
// - aggregate: hourly count across all types, on a wider ladder
// - cross-type: any other type scoring higher pulls this one halfway up

use anyhow::Result;

use super::HOUR;
use crate::challenge::request::PublicationKind;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;

/// Hourly count boundaries. A count below `normal` is normal, below
/// `elevated` is elevated, and so on; at or above `bot_like` is bot-like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ladder {
    pub normal: i64,
    pub elevated: i64,
    pub suspicious: i64,
    pub bot_like: i64,
}

pub const AGGREGATE_LADDER: Ladder = Ladder {
    normal: 30,
    elevated: 80,
    suspicious: 150,
    bot_like: 200,
};

pub fn ladder(kind: PublicationKind) -> Ladder {
    match kind {
        PublicationKind::Post => Ladder {
            normal: 2,
            elevated: 6,
            suspicious: 10,
            bot_like: 12,
        },
        PublicationKind::Reply | PublicationKind::CommentEdit => Ladder {
            normal: 5,
            elevated: 15,
            suspicious: 25,
            bot_like: 30,
        },
        PublicationKind::Vote => Ladder {
            normal: 20,
            elevated: 50,
            suspicious: 80,
            bot_like: 100,
        },
        PublicationKind::CommentModeration => Ladder {
            normal: 10,
            elevated: 30,
            suspicious: 60,
            bot_like: 80,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocityTier {
    Normal,
    Elevated,
    Suspicious,
    HighlySuspicious,
    BotLike,
}

impl VelocityTier {
    pub fn score(&self) -> f64 {
        match self {
            VelocityTier::Normal => 0.1,
            VelocityTier::Elevated => 0.4,
            VelocityTier::Suspicious => 0.7,
            VelocityTier::HighlySuspicious => 0.85,
            VelocityTier::BotLike => 0.95,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VelocityTier::Normal => "normal",
            VelocityTier::Elevated => "elevated",
            VelocityTier::Suspicious => "suspicious",
            VelocityTier::HighlySuspicious => "highly suspicious",
            VelocityTier::BotLike => "bot-like",
        }
    }
}

pub fn classify(count: i64, ladder: Ladder) -> VelocityTier {
    if count < ladder.normal {
        VelocityTier::Normal
    } else if count < ladder.elevated {
        VelocityTier::Elevated
    } else if count < ladder.suspicious {
        VelocityTier::Suspicious
    } else if count < ladder.bot_like {
        VelocityTier::HighlySuspicious
    } else {
        VelocityTier::BotLike
    }
}

/// Pull `own` halfway toward `other` when `other` is higher.
pub fn cross_type_penalty(own: f64, other: f64) -> f64 {
    if other > own {
        own + (other - own) * 0.5
    } else {
        own
    }
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let kind = ctx.publication().kind();
    let mut counts = ctx
        .data
        .author_velocity(ctx.author_public_key(), ctx.now - HOUR)?;
    counts.record(kind);

    let own_count = counts.get(kind);
    let own = classify(own_count, ladder(kind));
    let mut score = own.score();
    let mut explanation = format!(
        "{own_count} {kind} publications in the last hour ({})",
        own.label()
    );

    let total = counts.total();
    let aggregate = classify(total, AGGREGATE_LADDER);
    if aggregate.score() > score {
        score = aggregate.score();
        explanation = format!(
            "{total} publications of all types in the last hour ({})",
            aggregate.label()
        );
    }

    for other in PublicationKind::ALL.into_iter().filter(|k| *k != kind) {
        let other_count = counts.get(other);
        let other_tier = classify(other_count, ladder(other));
        let penalized = cross_type_penalty(own.score(), other_tier.score());
        if penalized > score {
            score = penalized;
            explanation = format!(
                "{own_count} {kind} publications in the last hour, raised by {other_count} {other} publications ({})",
                other_tier.label()
            );
        }
    }

    Ok(FactorScore::new(score, weight, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::request::Publication;
    use crate::risk::context::EvaluationInputs;
    use crate::testutil::{comment_request, context, store_local, test_conn, vote_request};

    #[test]
    fn test_post_ladder() {
        let posts = ladder(PublicationKind::Post);
        assert_eq!(classify(1, posts), VelocityTier::Normal);
        assert_eq!(classify(2, posts), VelocityTier::Elevated);
        assert_eq!(classify(6, posts), VelocityTier::Suspicious);
        assert_eq!(classify(10, posts), VelocityTier::HighlySuspicious);
        assert_eq!(classify(12, posts), VelocityTier::BotLike);
    }

    #[test]
    fn test_votes_tolerate_more() {
        let votes = ladder(PublicationKind::Vote);
        assert_eq!(classify(12, votes), VelocityTier::Normal);
        assert_eq!(classify(100, votes), VelocityTier::BotLike);
    }

    #[test]
    fn test_cross_type_penalty() {
        assert!((cross_type_penalty(0.1, 0.95) - 0.525).abs() < 1e-9);
        assert_eq!(cross_type_penalty(0.7, 0.4), 0.7);
    }

    #[test]
    fn test_first_post_counts_itself() {
        let conn = test_conn();
        let request = comment_request("pk", "hello");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, 10_000), 0.1).unwrap();
        assert_eq!(factor.score, 0.1);
        assert!(factor.explanation.contains("1 post"));
    }

    fn reply_request(public_key: &str) -> Publication {
        let mut publication = comment_request(public_key, "reply").publication;
        if let Publication::Comment(c) = &mut publication {
            c.parent_cid = Some("QmParent".to_string());
        }
        publication
    }

    #[test]
    fn test_reply_burst_raises_vote_score() {
        let conn = test_conn();
        let now = 10_000;
        for i in 0..30 {
            store_local(&conn, &format!("s{i}"), &reply_request("pk"), now - 60);
        }

        let request = vote_request("pk");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, now), 0.1).unwrap();
        // own 0.1 pulled halfway toward bot-like 0.95
        assert!((factor.score - 0.525).abs() < 1e-9);
        assert!(factor.explanation.contains("30 reply"));
    }

    #[test]
    fn test_vote_flood_drives_aggregate() {
        let conn = test_conn();
        let now = 10_000;
        for i in 0..120 {
            store_local(&conn, &format!("s{i}"), &vote_request("pk").publication, now - 60);
        }

        let request = comment_request("pk", "first post");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, now), 0.1).unwrap();
        assert_eq!(factor.score, 0.7);
        assert!(factor.explanation.contains("121 publications of all types"));
    }

    #[test]
    fn test_own_type_path() {
        let conn = test_conn();
        let now = 10_000;
        for i in 0..90 {
            store_local(&conn, &format!("s{i}"), &vote_request("pk").publication, now - 10);
        }
        let request = vote_request("pk");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, now), 0.1).unwrap();
        assert_eq!(factor.score, 0.85);
        assert!(factor.explanation.contains("91 vote"));
    }

    #[test]
    fn test_old_activity_is_outside_window() {
        let conn = test_conn();
        let now = 10_000;
        for i in 0..20 {
            store_local(&conn, &format!("s{i}"), &reply_request("pk"), now - 2 * HOUR);
        }
        let request = comment_request("pk", "post");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, now), 0.1).unwrap();
        assert_eq!(factor.score, 0.1);
    }
}
