//! Feed Discovery. Turns a user-supplied URL into a
//! canonical feed URL by Content-Type classification, XML sniffing, and a
//! scored scan of `<link rel="alternate">` tags when the URL points at an
//! HTML page rather than a feed directly.

use crate::infrastructure::ssrf::{self, SsrfError};
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_MAX_SIZE: usize = 5 * 1024 * 1024;
const SNIFF_WINDOW: usize = 4 * 1024;
const USER_AGENT: &str = "Feedman/1.0 RSS Reader";
const ATOM_NS: &str = "http://www.w3.org/2005/atom";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("URL blocked by SSRF guard: {0}")]
    SsrfBlocked(#[from] SsrfError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("no feed could be detected at this URL")]
    FeedNotDetected,
}

/// One `<link rel="alternate">` candidate found while scanning an HTML head.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    href: String,
    is_atom: bool,
    order: usize,
}

/// Run feed discovery end to end: validate, fetch, classify, and (for HTML
/// responses) pick the highest-scored `<link>` candidate. Returns the
/// canonical feed URL — the caller still has to fetch and parse it separately.
pub async fn discover_feed_url(client: &reqwest::Client, input_url: &str) -> Result<String, DiscoveryError> {
    if input_url.trim().is_empty() {
        return Err(DiscoveryError::FeedNotDetected);
    }
    ssrf::validate_url(input_url)?;

    let response = tokio::time::timeout(
        DISCOVERY_TIMEOUT,
        client
            .get(input_url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml, text/xml, text/html, */*",
            )
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send(),
    )
    .await
    .map_err(|_| DiscoveryError::Timeout)??;

    let response_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let body = ssrf::read_limited_body(response, DISCOVERY_MAX_SIZE)
        .await
        .map_err(|_| DiscoveryError::FeedNotDetected)?;

    classify(&content_type, &body, input_url, &response_url)
}

fn classify(
    content_type: &str,
    body: &[u8],
    input_url: &str,
    response_url: &str,
) -> Result<String, DiscoveryError> {
    if content_type.contains("application/rss+xml") || content_type.contains("application/atom+xml") {
        return Ok(input_url.to_string());
    }

    if content_type.contains("text/xml") || content_type.contains("application/xml") {
        if sniff_is_feed(body) {
            return Ok(input_url.to_string());
        }
        return Err(DiscoveryError::FeedNotDetected);
    }

    if content_type.contains("html") {
        let html = String::from_utf8_lossy(body);
        let candidates = scan_link_candidates(&html);
        return pick_best(candidates, input_url, response_url).ok_or(DiscoveryError::FeedNotDetected);
    }

    Err(DiscoveryError::FeedNotDetected)
}

fn sniff_is_feed(body: &[u8]) -> bool {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window).to_ascii_lowercase();
    text.contains("<rss") || text.contains("<rdf:rdf") || (text.contains("<feed") && text.contains(ATOM_NS))
}

/// Scan the `<head>` for `<link rel="alternate" type="application/(rss|atom)+xml">`
/// tags. `scraper` parses the whole document, but only links that appear
/// before `<body>` or `</head>` count, so candidates are gathered from
/// a `head link[rel=alternate]` selector, which only ever matches inside the
/// head regardless of how far the parser reads.
fn scan_link_candidates(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("head link[rel=alternate]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .enumerate()
        .filter_map(|(order, el)| {
            let type_attr = el.value().attr("type")?.to_ascii_lowercase();
            let is_atom = type_attr == "application/atom+xml";
            let is_rss = type_attr == "application/rss+xml";
            if !is_atom && !is_rss {
                return None;
            }
            let href = el.value().attr("href")?.to_string();
            Some(Candidate { href, is_atom, order })
        })
        .collect()
}

/// Score = `100*same_host(input) + 10*is_atom`, ties broken by first
/// appearance order.
fn pick_best(candidates: Vec<Candidate>, input_url: &str, response_url: &str) -> Option<String> {
    let input_host = Url::parse(input_url).ok().and_then(|u| u.host_str().map(str::to_string));

    let mut best: Option<(i64, usize, String)> = None;
    for candidate in candidates {
        let resolved = resolve_href(&candidate.href, response_url);
        let same_host = Url::parse(&resolved)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            == input_host;

        let score = 100 * i64::from(same_host) + 10 * i64::from(candidate.is_atom);
        let better = match &best {
            None => true,
            Some((best_score, best_order, _)) => {
                score > *best_score || (score == *best_score && candidate.order < *best_order)
            }
        };
        if better {
            best = Some((score, candidate.order, resolved));
        }
    }
    best.map(|(_, _, href)| href)
}

fn resolve_href(href: &str, base_url: &str) -> String {
    if let Ok(base) = Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }
    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_detects_rss_and_rdf_and_atom() {
        assert!(sniff_is_feed(b"<?xml version=\"1.0\"?><rss version=\"2.0\">"));
        assert!(sniff_is_feed(b"<rdf:RDF xmlns=\"x\">"));
        assert!(sniff_is_feed(
            b"<feed xmlns=\"http://www.w3.org/2005/Atom\">"
        ));
        assert!(!sniff_is_feed(b"<html><body>nope</body></html>"));
    }

    #[test]
    fn classify_xml_content_type_without_sniff_match_is_not_detected() {
        let result = classify("text/xml", b"<unrelated/>", "https://example.com/feed", "https://example.com/feed");
        assert!(matches!(result, Err(DiscoveryError::FeedNotDetected)));
    }

    #[test]
    fn classify_rss_content_type_returns_input_url_unchanged() {
        let result = classify(
            "application/rss+xml; charset=utf-8",
            b"<rss/>",
            "https://example.com/feed",
            "https://example.com/feed",
        )
        .unwrap();
        assert_eq!(result, "https://example.com/feed");
    }

    #[test]
    fn scan_finds_rss_and_atom_links_and_ignores_stylesheets() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="alternate" type="application/rss+xml" href="/rss.xml">
            <link rel="alternate" type="application/atom+xml" href="/atom.xml">
        </head><body></body></html>"#;
        let candidates = scan_link_candidates(html);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|c| c.href == "/rss.xml" && !c.is_atom));
        assert!(candidates.iter().any(|c| c.href == "/atom.xml" && c.is_atom));
    }

    // P4: discovered feed URL always matches the highest-scored candidate.
    #[test]
    fn p4_prefers_same_host_atom_over_cross_host_rss() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="https://cdn.example.net/rss.xml">
            <link rel="alternate" type="application/atom+xml" href="https://example.com/atom.xml">
        </head></html>"#;
        let result = classify("text/html", html.as_bytes(), "https://example.com/page", "https://example.com/page")
            .unwrap();
        assert_eq!(result, "https://example.com/atom.xml");
    }

    #[test]
    fn p4_breaks_ties_by_first_appearance() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/first.xml">
            <link rel="alternate" type="application/rss+xml" href="/second.xml">
        </head></html>"#;
        let result = classify("text/html", html.as_bytes(), "https://example.com/page", "https://example.com/page")
            .unwrap();
        assert_eq!(result, "https://example.com/first.xml");
    }

    #[test]
    fn resolves_relative_href_against_response_url() {
        let resolved = resolve_href("/feed.xml", "https://example.com/blog/index.html");
        assert_eq!(resolved, "https://example.com/feed.xml");
    }

    #[test]
    fn html_with_no_feed_links_is_not_detected() {
        let html = "<html><head><link rel=\"stylesheet\" href=\"/s.css\"></head></html>";
        let result = classify("text/html", html.as_bytes(), "https://example.com", "https://example.com");
        assert!(matches!(result, Err(DiscoveryError::FeedNotDetected)));
    }
}
