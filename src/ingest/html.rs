//! Plain-text and link extraction from fetched HTML pages.

use regex::Regex;
use url::Url;

use std::sync::LazyLock;

/// Elements whose content is never visible text.
const HIDDEN_ELEMENTS: [&str; 6] = ["head", "script", "style", "noscript", "template", "svg"];

/// One pattern per element so a block only ends at its own closing tag.
static HIDDEN_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    HIDDEN_ELEMENTS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("hidden block pattern")
        })
        .collect()
});
static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));
static BLOCK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|pre|section|article|header|footer|blockquote|dt|dd)\b[^>]*>")
        .expect("block tag pattern")
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\x0c\u{a0}]+").expect("space pattern"));
static HREFS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .expect("href pattern")
});

/// Visible text of an HTML document.
///
/// Script, style and head content is dropped, block-level elements become
/// line breaks, and runs of blank lines collapse to one.
pub fn extract_text(html: &str) -> String {
    let mut text = COMMENTS.replace_all(html, "").into_owned();
    for block in HIDDEN_BLOCKS.iter() {
        text = block.replace_all(&text, "").into_owned();
    }
    let text = BLOCK_TAGS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, " ");
    let text = decode_entities(&text);

    let mut output = String::new();
    let mut blank_pending = false;
    for line in text.lines() {
        let line = SPACES.replace_all(line, " ");
        let line = line.trim();
        if line.is_empty() {
            blank_pending = !output.is_empty();
            continue;
        }
        if blank_pending {
            output.push_str("\n\n");
            blank_pending = false;
        } else if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(line);
    }
    output
}

/// Absolute http(s) links found in `<a href>` attributes, resolved against
/// `base`, with fragments removed. Order of first appearance is kept and
/// duplicates are dropped.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();

    for captures in HREFS.captures_iter(html) {
        let Some(raw) = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))
            .map(|m| decode_entities(m.as_str().trim()))
        else {
            continue;
        };

        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }

        let Ok(mut resolved) = base.join(&raw) else {
            tracing::trace!(href = %raw, "skipping unresolvable link");
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);

        if !links.contains(&resolved) {
            links.push(resolved);
        }
    }

    links
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
