// Text similarity — word-set Jaccard and the shape heuristics used by
// content scoring.

use std::collections::{HashMap, HashSet};

/// Lowercased alphanumeric words of a text, as a set.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Jaccard similarity of two word sets: |A ∩ B| / |A ∪ B|.
///
/// Returns 0.0 when both sets are empty; an empty text is never a duplicate.
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Words of which a stored text must contain at least one to reach
/// `min_similarity` against `words`, or None when every candidate has to be
/// compared.
///
/// A Jaccard score of `m` needs `ceil(m * n)` of the `n` words in common, so
/// any `n - ceil(m * n) + 1` of them cover every match. The longest words
/// are chosen since they select the fewest rows. Only words SQLite's LIKE
/// folds correctly (ASCII or caseless) are eligible.
pub fn prefilter_terms(words: &HashSet<String>, min_similarity: f64) -> Option<Vec<String>> {
    if words.is_empty() || min_similarity <= 0.0 {
        return None;
    }
    let n = words.len();
    let required = ((min_similarity * n as f64) - 1e-9).ceil().max(1.0) as usize;
    let needed = n.checked_sub(required)? + 1;

    let mut eligible: Vec<&String> = words.iter().filter(|w| like_folds_case(w)).collect();
    if eligible.len() < needed {
        return None;
    }
    eligible.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });
    Some(eligible.into_iter().take(needed).cloned().collect())
}

fn like_folds_case(word: &str) -> bool {
    word.chars()
        .all(|c| c.is_ascii() || !(c.is_lowercase() || c.is_uppercase()))
}

/// Fraction of alphabetic characters that are uppercase, or None when the
/// text is too short to judge (under 20 chars or fewer than 10 letters).
pub fn uppercase_ratio(text: &str) -> Option<f64> {
    if text.chars().count() < 20 {
        return None;
    }
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 10 {
        return None;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    Some(upper as f64 / letters.len() as f64)
}

/// True when any character repeats `run` or more times consecutively.
pub fn has_char_run(text: &str, run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut count = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            count += 1;
        } else {
            prev = Some(c);
            count = 1;
        }
        if count >= run && !c.is_whitespace() {
            return true;
        }
    }
    false
}

/// True when a word of at least `min_len` chars occurs `times` or more.
pub fn has_repeated_word(text: &str, min_len: usize, times: usize) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < min_len {
            continue;
        }
        let entry = counts.entry(word.to_lowercase()).or_insert(0);
        *entry += 1;
        if *entry >= times {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn similarity(a: &str, b: &str) -> f64 {
        jaccard_similarity(&word_set(a), &word_set(b))
    }

    #[test]
    fn test_identical_texts_are_one() {
        assert!((similarity("Buy cheap pills now", "buy CHEAP pills, now!") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap() {
        // {a, b, c} vs {b, c, d}: 2 / 4
        assert!((similarity("a b c", "b c d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_texts() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("hello", ""), 0.0);
    }

    #[test]
    fn test_prefilter_picks_longest_covering_words() {
        // 5 words at 0.6 need 3 in common, so any 3 of them cover every match.
        let words = word_set("buy cheap tokens now friends");
        let terms = prefilter_terms(&words, 0.6).unwrap();
        assert_eq!(terms, vec!["friends", "tokens", "cheap"]);
    }

    #[test]
    fn test_prefilter_never_drops_a_match() {
        let target = word_set("buy cheap tokens now friends");
        let terms = prefilter_terms(&target, 0.6).unwrap();
        // Shares buy, now and cheap: 3 of 5 words, exactly 0.6.
        let stored = word_set("buy now cheap");
        assert!(jaccard_similarity(&target, &stored) >= 0.6);
        assert!(terms.iter().any(|t| stored.contains(t)));
    }

    #[test]
    fn test_prefilter_skips_cased_non_ascii_words() {
        let words = word_set("Éclair époque");
        assert!(prefilter_terms(&words, 0.6).is_none());
        let words = word_set("东京 大阪 weather");
        assert!(prefilter_terms(&words, 0.6).is_some());
    }

    #[test]
    fn test_prefilter_disabled_without_threshold() {
        assert!(prefilter_terms(&word_set("anything at all"), 0.0).is_none());
        assert!(prefilter_terms(&HashSet::new(), 0.6).is_none());
    }

    #[test]
    fn test_uppercase_ratio_requires_length() {
        assert!(uppercase_ratio("SHORT").is_none());
        let ratio = uppercase_ratio("THIS IS ALL SHOUTING TEXT").unwrap();
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_char_run() {
        assert!(has_char_run("wowwwww", 5));
        assert!(!has_char_run("wowww", 5));
        assert!(!has_char_run("a     b", 5));
    }

    #[test]
    fn test_repeated_word() {
        assert!(has_repeated_word("buy buy buy buy buy now", 3, 5));
        assert!(!has_repeated_word("a a a a a a", 3, 5));
    }
}
