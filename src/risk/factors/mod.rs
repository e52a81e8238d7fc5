// Risk factors — one module per signal.
//
// Every factor exposes `compute(ctx, weight) -> Result<FactorScore>`. A
// factor that has nothing to say returns `FactorScore::skip`, never an error.

pub mod account_age;
pub mod ban_history;
pub mod comment_content;
pub mod comment_url;
pub mod ip;
pub mod karma;
pub mod removal_rate;
pub mod social;
pub mod velocity;
pub mod wallet;

/// Graduated increment for 1 / 3 / 5+ matches.
pub(crate) fn count_increment(count: usize, steps: [f64; 3]) -> f64 {
    match count {
        0 => 0.0,
        1..=2 => steps[0],
        3..=4 => steps[1],
        _ => steps[2],
    }
}

pub(crate) const HOUR: i64 = 3600;
pub(crate) const DAY: i64 = 24 * HOUR;
