// Shared helpers used by the risk factors: URL handling, text similarity,
// and basic statistics.

pub mod stats;
pub mod text;
pub mod url;

/// Current time as unix seconds, the unit every stored timestamp uses.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
