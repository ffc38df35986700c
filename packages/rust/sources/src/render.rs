//! Agenda HTML canonicalization and plain-text rendering.
//!
//! Agenda bodies are hashed, so the stored HTML must not change when the
//! upstream page only changes whitespace or relative link spelling. Every
//! fragment goes through the same steps: re-serialize, resolve anchors to
//! absolute URLs, trim every line and drop blank ones.

use std::sync::LazyLock;

use councilwatch_shared::{Agenda, CouncilWatchError, DocumentLinkPolicy, Result};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Turn an extracted agenda fragment into a stored [`Agenda`].
pub fn build_agenda(fragment_html: &str, base: &Url, policy: &DocumentLinkPolicy) -> Result<Agenda> {
    let serialized = serialize_fragment(fragment_html);
    let html = canonicalize(&resolve_hrefs(&serialized, base));
    if html.is_empty() {
        return Err(CouncilWatchError::parse(format!("url={base} agenda body is empty")));
    }

    let doc = Html::parse_fragment(&html);
    let hrefs: Vec<&str> = doc
        .select(&ANCHOR_SEL)
        .filter_map(|a| a.value().attr("href"))
        .collect();
    let document_urls = policy.select(hrefs);

    let text = render_text(&html)?;

    Ok(Agenda {
        html,
        text,
        document_urls,
    })
}

/// Parse and re-serialize an HTML fragment.
pub fn serialize_fragment(html: &str) -> String {
    Html::parse_fragment(html).root_element().inner_html()
}

/// Trim every line and drop blank lines.
pub fn canonicalize(html: &str) -> String {
    html.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite every anchor `href` in serialized HTML to an absolute URL.
///
/// Fragment-only, `javascript:` and `mailto:` links are left alone.
pub fn resolve_hrefs(html: &str, base: &Url) -> String {
    static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(<a\b[^>]*?\bhref=")([^"]*)(")"#).expect("valid regex")
    });

    HREF_RE
        .replace_all(html, |caps: &regex::Captures| {
            let raw = caps[2].replace("&amp;", "&");
            let href = raw.trim();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!(
                    "{}{}{}",
                    &caps[1],
                    resolved.as_str().replace('&', "&amp;"),
                    &caps[3]
                ),
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Remove every element matching `selector`.
pub fn remove_elements(html: &str, selector: &Selector) -> String {
    let serialized = serialize_fragment(html);
    let doc = Html::parse_fragment(&serialized);

    let mut result = serialized.clone();
    for el in doc.select(selector) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Replace every element matching `selector` with its children.
pub fn unwrap_elements(html: &str, selector: &Selector) -> String {
    let serialized = serialize_fragment(html);
    let doc = Html::parse_fragment(&serialized);

    let mut result = serialized.clone();
    for el in doc.select(selector) {
        result = result.replace(&el.html(), el.inner_html().trim());
    }
    result
}

/// Render HTML to Markdown text, trimming lines and collapsing blank runs.
pub fn render_text(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "img", "iframe", "noscript", "svg"])
        .build();

    let markdown = converter
        .convert(html)
        .map_err(|e| CouncilWatchError::parse(format!("htmd conversion failed: {e}")))?;

    let mut lines: Vec<&str> = Vec::new();
    for line in markdown.lines().map(str::trim) {
        if line.is_empty() && lines.last().is_none_or(|prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::policy;

    fn base() -> Url {
        Url::parse("https://www.halifax.ca/city-hall/regional-council/january-5-2026").unwrap()
    }

    #[test]
    fn canonicalize_ignores_indentation() {
        let a = "<div>\n    <p>Item 1</p>\n\n\n  <p>Item 2</p>\n</div>";
        let b = "<div>\n<p>Item 1</p>\n<p>Item 2</p>\n    </div>   ";
        assert_eq!(canonicalize(a), canonicalize(b));
        assert_eq!(canonicalize(a), "<div>\n<p>Item 1</p>\n<p>Item 2</p>\n</div>");
    }

    #[test]
    fn resolve_hrefs_makes_links_absolute() {
        let html = r##"<a href="/media/123">Report</a> <a href="#top">Top</a> <a href="javascript:void(0)">x</a> <a href="item?a=1&amp;b=2">q</a> <a href="https://example.com/x">abs</a>"##;
        let resolved = resolve_hrefs(html, &base());
        assert!(resolved.contains(r#"href="https://www.halifax.ca/media/123""#));
        assert!(resolved.contains(r##"href="#top""##));
        assert!(resolved.contains(r#"href="javascript:void(0)""#));
        assert!(resolved.contains(
            r#"href="https://www.halifax.ca/city-hall/regional-council/item?a=1&amp;b=2""#
        ));
        assert!(resolved.contains(r#"href="https://example.com/x""#));
    }

    #[test]
    fn remove_and_unwrap() {
        let sel = Selector::parse(".icons").unwrap();
        let html = r#"<div><span class="icons"><img src="a.svg"></span><p>Keep</p></div>"#;
        let removed = remove_elements(html, &sel);
        assert!(!removed.contains("icons"));
        assert!(removed.contains("<p>Keep</p>"));

        let sel = Selector::parse(r#"a[href^="javascript:"]"#).unwrap();
        let html = r#"<div><a href="javascript:toggle()"><b>Item 3</b></a></div>"#;
        let unwrapped = unwrap_elements(html, &sel);
        assert_eq!(unwrapped, "<div><b>Item 3</b></div>");
    }

    #[test]
    fn render_text_collapses_blank_lines() {
        let text = render_text("<h2>Call to Order</h2>\n<p>  First  </p>\n\n\n<p>Second</p>").unwrap();
        assert!(!text.contains("\n\n\n"));
        assert!(text.contains("Call to Order"));
        assert!(text.lines().all(|l| l == l.trim()));
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn build_agenda_collects_document_links() {
        let fragment = r#"
            <h2>Staff Reports</h2>
            <p><a href="/media/100">Staff report</a></p>
            <p><a href="https://cdn.halifax.ca/sites/default/files/100.pdf">Attachment</a></p>
            <p><a href="/media/100">Staff report (again)</a></p>
            <p><a href="/city-hall/other-page">Unrelated</a></p>
        "#;
        let agenda = build_agenda(fragment, &base(), &policy()).unwrap();
        assert_eq!(
            agenda.document_urls,
            vec![
                "https://www.halifax.ca/media/100".to_string(),
                "https://cdn.halifax.ca/sites/default/files/100.pdf".to_string(),
            ]
        );
        assert!(agenda.html.contains(r#"href="https://www.halifax.ca/media/100""#));
        assert!(agenda.text.contains("Staff Reports"));
    }

    #[test]
    fn build_agenda_is_stable_across_whitespace() {
        let a = build_agenda("<p><a href=\"/media/1\">A</a></p>\n\n<p>B</p>", &base(), &policy()).unwrap();
        let b = build_agenda("  <p><a href=\"/media/1\">A</a></p>\n<p>B</p>  ", &base(), &policy()).unwrap();
        assert_eq!(a.html, b.html);
    }

    #[test]
    fn build_agenda_rejects_empty_body() {
        assert!(build_agenda("   \n  ", &base(), &policy()).is_err());
    }
}
