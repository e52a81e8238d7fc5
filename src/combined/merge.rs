// Merge policies for combining local evidence with crawled evidence.
//
// All functions here are pure: they take both sources by reference, never
// mutate them, and accept either side being empty.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use crate::db::models::{KarmaRecord, VelocityCounts};

/// Oldest timestamp wins.
pub fn oldest(local: Option<i64>, indexed: Option<i64>) -> Option<i64> {
    match (local, indexed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Latest observation wins, per forum.
///
/// Ties go to the local record, since this service saw it first-hand.
pub fn latest_karma_per_subplebbit(
    local: &[KarmaRecord],
    indexed: &[KarmaRecord],
) -> BTreeMap<String, KarmaRecord> {
    let mut merged: BTreeMap<String, KarmaRecord> = BTreeMap::new();
    for record in local.iter().chain(indexed.iter()) {
        match merged.get(&record.subplebbit_address) {
            Some(existing) if existing.observed_at >= record.observed_at => {}
            _ => {
                merged.insert(record.subplebbit_address.clone(), record.clone());
            }
        }
    }
    merged
}

/// Counts from both sources add up.
pub fn sum_counts(local: VelocityCounts, indexed: VelocityCounts) -> VelocityCounts {
    VelocityCounts {
        post: local.post + indexed.post,
        reply: local.reply + indexed.reply,
        vote: local.vote + indexed.vote,
        comment_edit: local.comment_edit + indexed.comment_edit,
        comment_moderation: local.comment_moderation + indexed.comment_moderation,
    }
}

/// Union of two record lists: duplicates (by `key`) dropped, newest first,
/// at most `limit` entries.
pub fn union_by_recency<T, K, FK, FT>(
    local: &[T],
    indexed: &[T],
    key: FK,
    timestamp: FT,
    limit: usize,
) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    FK: Fn(&T) -> K,
    FT: Fn(&T) -> i64,
{
    let mut seen: HashSet<K> = HashSet::new();
    let mut merged: Vec<T> = local
        .iter()
        .chain(indexed.iter())
        .filter(|item| seen.insert(key(*item)))
        .cloned()
        .collect();
    // Stable sort keeps local-before-indexed order among equal timestamps.
    merged.sort_by_key(|item| std::cmp::Reverse(timestamp(item)));
    merged.truncate(limit);
    merged
}

/// Sorted, deduplicated union of two string lists.
pub fn union_distinct(local: &[String], indexed: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = local.iter().chain(indexed.iter()).cloned().collect();
    merged.sort();
    merged.dedup();
    merged
}
