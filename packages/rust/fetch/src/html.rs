//! HTML-to-text cleaning and bot-wall detection.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// Phrases that mark a bot-block, captcha, or consent interstitial.
///
/// Checked against the start of the cleaned text only; a legitimate
/// article that merely mentions captchas deep in its body must not
/// trip the detector.
const BLOCK_MARKERS: &[&str] = &[
    "access denied",
    "are you a robot",
    "attention required",
    "captcha",
    "cloudflare",
    "enable javascript",
    "just a moment",
    "rate limit exceeded",
    "request blocked",
    "unusual traffic",
    "verify you are human",
];

/// How many leading characters of cleaned text the block check samples.
const BLOCK_SAMPLE_CHARS: usize = 2_000;

static MULTI_BLANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Strip an HTML document down to readable text.
///
/// Scripts, styles, and other non-content elements are removed; block
/// elements become paragraph breaks; runs of blank lines collapse to one.
pub fn clean_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Prefer the main content region when the page marks one.
    let text = ["main", "article", "body"]
        .iter()
        .find_map(|tag| {
            let sel = Selector::parse(tag).ok()?;
            let el = doc.select(&sel).next()?;
            Some(element_text(el))
        })
        .unwrap_or_else(|| {
            doc.root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" ")
        });

    normalize_whitespace(&text)
}

/// Collect text from an element, skipping non-content subtrees and
/// inserting paragraph breaks after block-level elements.
fn element_text(el: scraper::ElementRef<'_>) -> String {
    let mut out = String::new();
    walk(el, &mut out);
    out
}

fn walk(el: scraper::ElementRef<'_>, out: &mut String) {
    const SKIP: &[&str] = &["script", "style", "noscript", "svg", "iframe", "nav", "footer"];
    const BLOCK: &[&str] = &[
        "p", "div", "section", "br", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
        "pre", "tr",
    ];

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = scraper::ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIP.contains(&name) {
                continue;
            }
            walk(child_el, out);
            if BLOCK.contains(&name) {
                out.push_str("\n\n");
            }
        }
    }
}

/// Trim each line and collapse runs of blank lines to a single break.
pub fn normalize_whitespace(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    MULTI_BLANK
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Does the cleaned text look like a bot-block page rather than content?
pub fn looks_blocked(text: &str) -> bool {
    let sample: String = text
        .chars()
        .take(BLOCK_SAMPLE_CHARS)
        .collect::<String>()
        .to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| sample.contains(marker))
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"<html><head><style>p { color: red }</style></head>
            <body><main>
                <script>alert("no")</script>
                <h1>Title</h1>
                <p>First paragraph.</p>
                <p>Second paragraph.</p>
            </main></body></html>"#;
        let text = clean_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("First paragraph."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn block_elements_become_paragraph_breaks() {
        let html = "<body><p>One.</p><p>Two.</p></body>";
        let text = clean_html(html);
        assert_eq!(text, "One.\n\nTwo.");
    }

    #[test]
    fn prefers_main_over_chrome() {
        let html = r#"<body>
            <nav>Site menu</nav>
            <main><p>Actual content.</p></main>
            <footer>Copyright</footer>
        </body>"#;
        let text = clean_html(html);
        assert!(text.contains("Actual content."));
        assert!(!text.contains("Site menu"));
    }

    #[test]
    fn detects_block_walls() {
        assert!(looks_blocked("Just a moment... Checking your browser"));
        assert!(looks_blocked("Access Denied\nYou don't have permission"));
        assert!(looks_blocked("Please enable JavaScript to continue"));
        assert!(!looks_blocked("A long essay about distributed systems"));
    }

    #[test]
    fn block_check_only_samples_the_head() {
        let mut text = "word ".repeat(1_000);
        text.push_str("captcha");
        assert!(!looks_blocked(&text));
    }

    #[test]
    fn counts_words() {
        assert_eq!(word_count("one two  three\nfour"), 4);
        assert_eq!(word_count(""), 0);
    }
}
