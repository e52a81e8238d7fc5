// Comment URL risk — reused links, raw-IP hosts, and rotating referral links.
//
// Exact reuse is judged on normalized URLs. Prefix clusters (domain plus the
// first two path segments) catch campaigns that rotate query parameters so
// no two links match exactly. How tightly a cluster is packed in time
// separates a coordinated burst from organic sharing over a day.

use std::collections::HashSet;

use anyhow::Result;

use super::{count_increment, DAY, HOUR};
use crate::db::models::LinkRecord;
use crate::risk::context::RiskContext;
use crate::risk::engine::FactorScore;
use crate::util::stats::standard_deviation;
use crate::util::url::{
    domain_of, extract_url_prefix, extract_urls, is_allowlisted_domain, is_ip_literal,
    normalize_url,
};

pub const LOOKBACK_SECS: i64 = 7 * DAY;
pub const NO_URL_SCORE: f64 = 0.1;
pub const BASE_SCORE: f64 = 0.2;

const SAME_AUTHOR_EXACT: [f64; 3] = [0.1, 0.2, 0.3];
const OTHER_AUTHOR_EXACT: [f64; 3] = [0.15, 0.3, 0.4];
const IP_LITERAL_RISK: f64 = 0.3;

/// A URL as compared across comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlKey {
    pub normalized: String,
    /// Lowercased host without "www.".
    pub domain: Option<String>,
    pub prefix: Option<String>,
    pub ip_literal: bool,
    /// False for allowlisted platforms, whose prefixes repeat organically.
    pub prefix_eligible: bool,
}

impl UrlKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_url(raw)?;
        let domain = domain_of(raw);
        let prefix_eligible = domain.as_deref().is_some_and(|d| !is_allowlisted_domain(d));
        Some(Self {
            normalized,
            domain,
            prefix: extract_url_prefix(raw),
            ip_literal: is_ip_literal(raw),
            prefix_eligible,
        })
    }
}

/// Every distinct URL in a comment's link, content and title.
pub fn comment_urls(link: Option<&str>, content: Option<&str>, title: Option<&str>) -> Vec<UrlKey> {
    let mut raw: Vec<String> = Vec::new();
    if let Some(link) = link.map(str::trim).filter(|l| !l.is_empty()) {
        raw.push(link.to_string());
    }
    for text in [content, title].into_iter().flatten() {
        raw.extend(extract_urls(text));
    }

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|r| UrlKey::parse(r))
        .filter(|key| seen.insert(key.normalized.clone()))
        .collect()
}

/// A URL previously seen in a stored comment.
#[derive(Debug, Clone)]
pub struct SeenUrl {
    pub author_public_key: String,
    pub timestamp: i64,
    pub key: UrlKey,
}

fn seen_urls(records: &[LinkRecord]) -> Vec<SeenUrl> {
    records
        .iter()
        .flat_map(|record| {
            comment_urls(
                record.link.as_deref(),
                record.content.as_deref(),
                record.title.as_deref(),
            )
            .into_iter()
            .map(|key| SeenUrl {
                author_public_key: record.author_public_key.clone(),
                timestamp: record.timestamp,
                key,
            })
        })
        .collect()
}

/// Hosts a stored comment must mention to share an exact URL or a prefix
/// with `urls`, or None when stored text may spell a host differently from
/// its parsed form (IP literals, internationalized names) and every link in
/// the window has to be read.
pub fn host_filter(urls: &[UrlKey]) -> Option<Vec<String>> {
    let mut hosts = Vec::new();
    for url in urls {
        let domain = url.domain.as_deref()?;
        if url.ip_literal || !domain.is_ascii() || domain.contains("xn--") {
            return None;
        }
        if !hosts.iter().any(|h: &String| h == domain) {
            hosts.push(domain.to_string());
        }
    }
    Some(hosts)
}

/// Extra risk from tightly clustered timestamps.
pub fn time_dispersion_risk(timestamps: &[i64]) -> f64 {
    let values: Vec<f64> = timestamps.iter().map(|t| *t as f64).collect();
    let spread = standard_deviation(&values);
    if spread < HOUR as f64 {
        0.3
    } else if spread < 3.0 * HOUR as f64 {
        0.2
    } else if spread < 6.0 * HOUR as f64 {
        0.1
    } else {
        0.0
    }
}

/// Risk added by one URL, with the reasons behind it.
pub fn url_risk(url: &UrlKey, author: &str, seen: &[SeenUrl]) -> (f64, Vec<String>) {
    let mut risk = 0.0;
    let mut reasons = Vec::new();

    let exact: Vec<&SeenUrl> = seen
        .iter()
        .filter(|s| s.key.normalized == url.normalized)
        .collect();
    let same_exact = exact.iter().filter(|s| s.author_public_key == author).count();
    let other_exact = exact.len() - same_exact;
    if same_exact > 0 {
        risk += count_increment(same_exact, SAME_AUTHOR_EXACT);
        reasons.push(format!("{same_exact} prior posts of {} by same author", url.normalized));
    }
    if other_exact > 0 {
        risk += count_increment(other_exact, OTHER_AUTHOR_EXACT);
        reasons.push(format!("{other_exact} prior posts of {} by other authors", url.normalized));
    }

    if url.ip_literal {
        risk += IP_LITERAL_RISK;
        reasons.push(format!("IP address link {}", url.normalized));
    }

    let Some(prefix) = url.prefix.as_deref().filter(|_| url.prefix_eligible) else {
        return (risk, reasons);
    };

    let prefix_matches: Vec<&SeenUrl> = seen
        .iter()
        .filter(|s| s.key.prefix.as_deref() == Some(prefix) && s.key.normalized != url.normalized)
        .collect();
    if prefix_matches.is_empty() {
        return (risk, reasons);
    }

    let authors: HashSet<&str> = prefix_matches
        .iter()
        .map(|s| s.author_public_key.as_str())
        .collect();
    let other_authors = authors.iter().filter(|a| **a != author).count();
    let own_reuse = prefix_matches
        .iter()
        .filter(|s| s.author_public_key == author)
        .count();

    if other_authors >= 4 {
        risk += 0.15;
    } else if other_authors >= 2 {
        risk += 0.1;
    }
    if other_authors >= 2 {
        reasons.push(format!("{other_authors} other authors posted links under {prefix}"));
    }
    if own_reuse >= 3 {
        risk += 0.05;
        reasons.push(format!("{own_reuse} own links under {prefix}"));
    }

    if authors.len() >= 2 {
        let timestamps: Vec<i64> = prefix_matches.iter().map(|s| s.timestamp).collect();
        let dispersion = time_dispersion_risk(&timestamps);
        if dispersion > 0.0 {
            risk += dispersion;
            reasons.push(format!("links under {prefix} tightly clustered in time"));
        }
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

    let urls = comment_urls(
        comment.link.as_deref(),
        comment.content.as_deref(),
        comment.title.as_deref(),
    );
    if urls.is_empty() {
        return Ok(FactorScore::new(NO_URL_SCORE, weight, "No URLs"));
    }

    let hosts = host_filter(&urls);
    let records = ctx
        .data
        .find_links(ctx.now - LOOKBACK_SECS, hosts.as_deref())?;
    let seen = seen_urls(&records);
    let author = ctx.author_public_key();

    let (worst, reasons) = urls
        .iter()
        .map(|url| url_risk(url, author, &seen))
        .fold((0.0, Vec::new()), |best, current| {
            if current.0 > best.0 {
                current
            } else {
                best
            }
        });

    let explanation = if reasons.is_empty() {
        format!("{} URLs, none seen before", urls.len())
    } else {
        reasons.join("; ")
    };
    Ok(FactorScore::new(BASE_SCORE + worst, weight, explanation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::context::EvaluationInputs;
    use crate::testutil::{comment_request, context, page_comment, store_indexed, test_conn, vote_request};

    const NOW: i64 = 30 * DAY;

    fn seen(author: &str, raw: &str, timestamp: i64) -> SeenUrl {
        SeenUrl {
            author_public_key: author.to_string(),
            timestamp,
            key: UrlKey::parse(raw).unwrap(),
        }
    }

    #[test]
    fn test_comment_urls_dedupe_after_normalization() {
        let urls = comment_urls(
            Some("https://www.example.com/a/"),
            Some("see http://example.com/a?utm_source=x and https://other.org"),
            None,
        );
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_no_urls() {
        let conn = test_conn();
        let request = comment_request("pk", "just words");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.12).unwrap();
        assert_eq!(factor.score, NO_URL_SCORE);
    }

    #[test]
    fn test_vote_is_not_applicable() {
        let conn = test_conn();
        let request = vote_request("pk");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.12).unwrap();
        assert_eq!(factor.weight, 0.0);
    }

    #[test]
    fn test_ip_literal_flagged() {
        let url = UrlKey::parse("http://203.0.113.9/login").unwrap();
        let (risk, reasons) = url_risk(&url, "pk", &[]);
        assert!((risk - 0.3).abs() < 1e-9);
        assert!(reasons[0].contains("IP address"));
    }

    #[test]
    fn test_exact_duplicates_by_other_authors() {
        let url = UrlKey::parse("https://scam.example/offer").unwrap();
        let history = vec![
            seen("a", "https://scam.example/offer", 1),
            seen("b", "https://www.scam.example/offer/", 2),
            seen("c", "https://scam.example/offer?utm_campaign=z", 3),
        ];
        let (risk, _) = url_risk(&url, "pk", &history);
        assert!((risk - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_allowlisted_prefix_ignored() {
        let url = UrlKey::parse("https://youtube.com/watch?v=1").unwrap();
        let history = vec![
            seen("a", "https://youtube.com/watch?v=2", 1),
            seen("b", "https://youtube.com/watch?v=3", 2),
            seen("c", "https://youtube.com/watch?v=4", 3),
        ];
        let (risk, _) = url_risk(&url, "pk", &history);
        assert_eq!(risk, 0.0);
    }

    #[test]
    fn test_time_dispersion_buckets() {
        assert_eq!(time_dispersion_risk(&[0, 60, 120, 180]), 0.3);
        assert_eq!(time_dispersion_risk(&[0, 4 * HOUR]), 0.2);
        assert_eq!(time_dispersion_risk(&[0, 10 * HOUR]), 0.1);
        assert_eq!(time_dispersion_risk(&[0, 22 * HOUR]), 0.0);
    }

    #[test]
    fn test_clustered_referral_campaign() {
        let conn = test_conn();
        for (i, author) in ["a", "b", "c", "d"].iter().enumerate() {
            let content = format!("great deal https://shop.example/ref/abc?code={i}");
            let cid = format!("Qm{i}");
            store_indexed(&conn, &page_comment(&cid, author, "x.eth", &content, NOW - 300 + i as i64 * 60), NOW);
        }

        let request = comment_request("pk", "great deal https://shop.example/ref/abc?code=99");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.12).unwrap();
        assert!((factor.score - 0.65).abs() < 1e-9);
        assert!(factor.explanation.contains("clustered"));
    }

    #[test]
    fn test_campaign_found_behind_newer_links() {
        let conn = test_conn();
        for (i, author) in ["a", "b", "c", "d"].iter().enumerate() {
            let content = format!("great deal https://shop.example/ref/abc?code={i}");
            let cid = format!("Qm{i}");
            store_indexed(&conn, &page_comment(&cid, author, "x.eth", &content, NOW - 2 * HOUR + i as i64 * 60), NOW);
        }
        for i in 0..2500 {
            let content = format!("read https://news{i}.example/story");
            let cid = format!("QmNews{i}");
            store_indexed(&conn, &page_comment(&cid, "busy", "x.eth", &content, NOW - 60), NOW);
        }

        let request = comment_request("pk", "great deal https://shop.example/ref/abc?code=99");
        let inputs = EvaluationInputs::default();
        let factor = compute(&context(&conn, &request, &inputs, NOW), 0.12).unwrap();
        assert!((factor.score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_host_filter_falls_back_for_ip_and_idn_hosts() {
        let plain = comment_urls(None, Some("https://www.Shop.example/a https://shop.example/b"), None);
        assert_eq!(host_filter(&plain), Some(vec!["shop.example".to_string()]));

        let ip = comment_urls(None, Some("http://203.0.113.9/login"), None);
        assert!(host_filter(&ip).is_none());

        let idn = comment_urls(None, Some("https://bücher.example/deal"), None);
        assert!(host_filter(&idn).is_none());
    }
}
