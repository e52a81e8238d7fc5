// Comment content and title risk — near-duplicate text and spammy shape.
//
// Duplicates are found by word-set Jaccard similarity over the last day of
// comments from both stores. Copies from other authors weigh more than an
// author repeating themselves: many keys posting the same text is what a
// spam ring looks like.

use anyhow::Result;

use super::{count_increment, DAY};
use crate::db::models::TextField;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;
use crate::util::text::{has_char_run, has_repeated_word, uppercase_ratio};
use crate::util::url::count_urls;

pub const BASELINE_SCORE: f64 = 0.2;
pub const LOOKBACK_SECS: i64 = DAY;
pub const EXACT_MATCH_THRESHOLD: f64 = 0.95;
pub const SIMILAR_MATCH_THRESHOLD: f64 = 0.60;

const SAME_AUTHOR_EXACT: [f64; 3] = [0.15, 0.25, 0.35];
const SAME_AUTHOR_SIMILAR: [f64; 3] = [0.05, 0.10, 0.15];
const OTHER_AUTHOR_EXACT: [f64; 3] = [0.20, 0.35, 0.45];
const OTHER_AUTHOR_SIMILAR: [f64; 3] = [0.10, 0.20, 0.30];

/// Near-duplicate counts for one text, split by author and closeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateCounts {
    pub same_author_exact: usize,
    pub same_author_similar: usize,
    pub other_author_exact: usize,
    pub other_author_similar: usize,
}

impl DuplicateCounts {
    pub fn increment(&self) -> f64 {
        count_increment(self.same_author_exact, SAME_AUTHOR_EXACT)
            + count_increment(self.same_author_similar, SAME_AUTHOR_SIMILAR)
            + count_increment(self.other_author_exact, OTHER_AUTHOR_EXACT)
            + count_increment(self.other_author_similar, OTHER_AUTHOR_SIMILAR)
    }

    fn describe(&self, noun: &str, reasons: &mut Vec<String>) {
        let parts = [
            (self.same_author_exact, "duplicate", "same author"),
            (self.same_author_similar, "similar", "same author"),
            (self.other_author_exact, "duplicate", "other authors"),
            (self.other_author_similar, "similar", "other authors"),
        ];
        for (count, kind, whose) in parts {
            if count > 0 {
                reasons.push(format!("{count} {kind} {noun} from {whose}"));
            }
        }
    }
}

fn duplicate_counts(
    ctx: &RiskContext<'_>,
    field: TextField,
    text: &str,
) -> Result<DuplicateCounts> {
    let author = ctx.author_public_key();
    let matches = ctx.data.find_similar_texts(
        field,
        text,
        ctx.now - LOOKBACK_SECS,
        SIMILAR_MATCH_THRESHOLD,
    )?;

    let mut counts = DuplicateCounts::default();
    for m in matches {
        let exact = m.similarity >= EXACT_MATCH_THRESHOLD;
        match (m.author_public_key == author, exact) {
            (true, true) => counts.same_author_exact += 1,
            (true, false) => counts.same_author_similar += 1,
            (false, true) => counts.other_author_exact += 1,
            (false, false) => counts.other_author_similar += 1,
        }
    }
    Ok(counts)
}

/// Static heuristics on the raw text, independent of history.
pub fn shape_risk(content: &str) -> (f64, Vec<String>) {
    let mut risk = 0.0;
    let mut reasons = Vec::new();

    let urls = count_urls(content);
    if urls >= 5 {
        risk += 0.2;
        reasons.push(format!("{urls} URLs in content"));
    } else if urls >= 3 {
        risk += 0.1;
        reasons.push(format!("{urls} URLs in content"));
    }

    if uppercase_ratio(content).is_some_and(|ratio| ratio > 0.5) {
        risk += 0.15;
        reasons.push("excessive capitalization".to_string());
    }

    if has_char_run(content, 5) || has_repeated_word(content, 3, 5) {
        risk += 0.1;
        reasons.push("repetitive patterns".to_string());
    }

    (risk, reasons)
}

pub fn compute(ctx: &RiskContext<'_>, weight: f64) -> Result<FactorScore> {
    let publication = ctx.publication();
    let Some(comment) = publication.as_comment() else {
        return Ok(FactorScore::skip(format!(
            "Not applicable to {} publications",
            publication.kind()
        )));
    };

    let mut score = BASELINE_SCORE;
    let mut reasons = Vec::new();

    let fields = [
        (TextField::Content, comment.content.as_deref(), "comments"),
        (TextField::Title, comment.title.as_deref(), "titles"),
    ];
    for (field, text, noun) in fields {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let counts = duplicate_counts(ctx, field, text)?;
        score += counts.increment();
        counts.describe(noun, &mut reasons);
    }

    if let Some(content) = comment.content.as_deref() {
        let (risk, shape_reasons) = shape_risk(content);
        score += risk;
        reasons.extend(shape_reasons);
    }

    let explanation = if reasons.is_empty() {
        "No duplicate or suspicious content".to_string()
    } else {
        reasons.join("; ")
    };
    Ok(FactorScore::new(score, weight, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::factors::HOUR;
    use crate::challenge::request::Publication;
    use crate::risk::context::EvaluationInputs;
    use crate::testutil::{
        comment_request, context, page_comment, store_indexed, store_local, test_conn,
        vote_request,
    };

    const NOW: i64 = 10 * DAY;

    fn stored_comment(pk: &str, content: &str, timestamp: i64) -> Publication {
        let mut publication = comment_request(pk, content).publication;
        if let Publication::Comment(c) = &mut publication {
            c.timestamp = timestamp;
        }
        publication
    }

    #[test]
    fn test_vote_is_not_applicable() {
        let conn = test_conn();
        let request = vote_request("pk");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert!(factor.is_skipped());
    }

    #[test]
    fn test_clean_comment_is_baseline() {
        let conn = test_conn();
        let request = comment_request("pk", "An ordinary remark about the weather");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert_eq!(factor.score, BASELINE_SCORE);
    }

    #[test]
    fn test_five_self_duplicates() {
        let conn = test_conn();
        let text = "Join my channel for free crypto signals";
        for i in 0..5 {
            store_local(&conn, &format!("s{i}"), &stored_comment("pk", text, NOW - 100 + i), NOW - 100);
        }

        let request = comment_request("pk", text);
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert!(factor.score >= 0.55);
        assert!(factor.explanation.contains("5 duplicate comments from same author"));
    }

    #[test]
    fn test_self_duplicates_found_behind_newer_traffic() {
        let conn = test_conn();
        let text = "Join my channel for free crypto signals";
        for i in 0..5 {
            let cid = format!("QmDup{i}");
            store_indexed(&conn, &page_comment(&cid, "pk", "x.eth", text, NOW - 3 * HOUR + i), NOW);
        }
        for i in 0..2500 {
            let cid = format!("QmNoise{i}");
            let noise = format!("weather report number {i}");
            store_indexed(&conn, &page_comment(&cid, "busy", "x.eth", &noise, NOW - 60), NOW);
        }

        let request = comment_request("pk", text);
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert!(factor.score >= 0.55);
        assert!(factor.explanation.contains("5 duplicate comments from same author"));
    }

    #[test]
    fn test_other_authors_weigh_more() {
        let conn = test_conn();
        let text = "Join my channel for free crypto signals";
        store_indexed(&conn, &page_comment("Qm1", "other", "x.eth", text, NOW - 100), NOW);

        let request = comment_request("pk", text);
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert_eq!(factor.score, 0.4);
        assert!(factor.explanation.contains("other authors"));
    }

    #[test]
    fn test_duplicates_outside_lookback_ignored() {
        let conn = test_conn();
        let text = "Join my channel for free crypto signals";
        store_indexed(&conn, &page_comment("Qm1", "other", "x.eth", text, NOW - 2 * DAY), NOW - 2 * DAY);

        let request = comment_request("pk", text);
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.14).unwrap();
        assert_eq!(factor.score, BASELINE_SCORE);
    }

    #[test]
    fn test_shape_heuristics() {
        let (risk, reasons) = shape_risk("BUY NOW!!!!! BEST DEAL EVER FOR EVERYONE");
        assert!((risk - 0.25).abs() < 1e-9);
        assert_eq!(reasons.len(), 2);

        let links = "a https://a.com b https://b.com c https://c.com";
        assert!((shape_risk(links).0 - 0.1).abs() < 1e-9);
        assert_eq!(shape_risk("plain words").0, 0.0);
    }
}
