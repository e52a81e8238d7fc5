// URL utilities — extraction, normalization, and prefix keys for link analysis.
//
// Normalization collapses cosmetic variation (case, "www.", tracking params,
// param order, trailing slash) so exact-duplicate detection can't be dodged
// by it. Prefix keys go further and drop the query string entirely, keeping
// only the domain and the first two path segments. That is what exposes
// referral-link rotation: `shop.example/ref/abc?code=1` and `?code=2` share
// a prefix even though they never match exactly.

use std::sync::OnceLock;

use regex_lite::Regex;
use url::{Host, Url};

/// Query parameters that only carry tracking state and never change the target.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "dclid",
    "msclkid",
    "yclid",
    "mc_cid",
    "mc_eid",
    "igshid",
    "ref_src",
    "_ga",
];

/// Major platforms whose URLs share path prefixes organically (every YouTube
/// link starts with `youtube.com/watch`). Exempt from prefix-similarity
/// scoring, but still checked for exact duplicates.
const PREFIX_ALLOWLIST: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "twitter.com",
    "x.com",
    "reddit.com",
    "github.com",
    "gitlab.com",
    "wikipedia.org",
    "stackoverflow.com",
    "medium.com",
    "imgur.com",
    "instagram.com",
    "facebook.com",
    "tiktok.com",
    "linkedin.com",
    "twitch.tv",
    "etherscan.io",
    "bscscan.com",
    "polygonscan.com",
    "arbiscan.io",
    "basescan.org",
    "solscan.io",
    "blockchair.com",
    "mempool.space",
];

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s<>"'()\[\]{}|\\^`]+"#).expect("URL pattern is valid")
    })
}

/// Find every http(s) URL in free text, in order of appearance.
///
/// Trailing sentence punctuation is trimmed so "see https://a.com/x." yields
/// `https://a.com/x`.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_pattern()
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                .to_string()
        })
        .filter(|u| u.len() > "http://".len())
        .collect()
}

/// Count URLs in free text.
pub fn count_urls(text: &str) -> usize {
    extract_urls(text).len()
}

/// Lowercased host with any leading "www." removed.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(strip_www(&host).to_string())
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Produce the comparison key used for exact-duplicate URL detection.
///
/// Lowercases everything, strips "www.", drops the scheme and fragment,
/// removes tracking parameters, sorts the remaining parameters, and trims
/// any trailing slash from the path. Returns None for unparseable input.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let mut key = strip_www(&host).to_string();

    if let Some(port) = parsed.port() {
        key.push_str(&format!(":{port}"));
    }

    key.push_str(parsed.path().to_lowercase().trim_end_matches('/'));

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_str()))
        .collect();
    params.sort();

    if !params.is_empty() {
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect();
        key.push('?');
        key.push_str(&query.join("&"));
    }

    Some(key)
}

/// Domain plus the first two path segments, ignoring the query string.
///
/// `https://www.Shop.example/ref/abc/deep?x=1` → `shop.example/ref/abc`.
pub fn extract_url_prefix(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let mut prefix = strip_www(&host).to_string();

    let segments = parsed
        .path_segments()
        .map(|segs| {
            segs.filter(|s| !s.is_empty())
                .take(2)
                .map(|s| s.to_lowercase())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for segment in segments {
        prefix.push('/');
        prefix.push_str(&segment);
    }

    Some(prefix)
}

/// True when the URL's host is a raw IPv4 or IPv6 address.
pub fn is_ip_literal(raw: &str) -> bool {
    Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host().map(|h| matches!(h, Host::Ipv4(_) | Host::Ipv6(_))))
        .unwrap_or(false)
}

/// True when the domain (or a parent domain) is on the prefix allowlist.
pub fn is_allowlisted_domain(domain: &str) -> bool {
    let domain = strip_www(domain);
    PREFIX_ALLOWLIST
        .iter()
        .any(|allowed| domain == *allowed || domain.ends_with(&format!(".{allowed}")))
}
