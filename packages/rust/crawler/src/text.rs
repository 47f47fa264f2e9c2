//! HTML-to-text helpers shared by the fetchers.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static selector"));

/// Truncate to at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Readable text of a page: Markdown via `htmd`, or plain text lines when
/// conversion fails.
pub fn page_text(html: &str) -> String {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "head",
        ])
        .build();

    match converter.convert(html) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(e) => {
            debug!(error = %e, "htmd conversion failed, using plain text");
            document_lines(&Html::parse_document(html))
        }
    }
}

/// Every non-empty text node of the document, trimmed, one per line.
pub fn document_lines(doc: &Html) -> String {
    let root = doc
        .select(&BODY)
        .next()
        .unwrap_or_else(|| doc.root_element());
    element_lines(root)
}

fn element_lines(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whitespace-collapsed text of the first element matching `selector`.
pub fn select_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// Whitespace-collapsed text of one element.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The document `<title>`, if any.
pub fn page_title(doc: &Html) -> Option<String> {
    static TITLE: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("static selector"));
    select_text(doc, &TITLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("日本語", 1), "日");
    }

    #[test]
    fn page_text_drops_scripts() {
        let html = r#"<html><head><title>Acme</title><script>track()</script></head>
            <body><h1>About Acme</h1><p>We build widgets.</p></body></html>"#;
        let text = page_text(html);
        assert!(text.contains("About Acme"));
        assert!(text.contains("We build widgets."));
        assert!(!text.contains("track()"));
    }

    #[test]
    fn document_lines_keeps_line_structure() {
        let doc = Html::parse_document(
            "<body><p>Principal Executive Offices:</p><p> 100 Main St </p><p>Austin, TX</p></body>",
        );
        assert_eq!(
            document_lines(&doc),
            "Principal Executive Offices:\n100 Main St\nAustin, TX"
        );
    }

    #[test]
    fn select_text_collapses_whitespace() {
        let doc = Html::parse_document("<div class='d'>  Makes \n\n widgets  </div>");
        let sel = Selector::parse("div.d").unwrap();
        assert_eq!(select_text(&doc, &sel).as_deref(), Some("Makes widgets"));
        assert_eq!(page_title(&doc), None);
    }
}
