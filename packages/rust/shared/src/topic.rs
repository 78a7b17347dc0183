//! Topic slug and keyword helpers.

use std::sync::LazyLock;

use regex::Regex;

/// Turn a topic name into a filesystem- and URL-safe slug.
pub fn slugify(value: &str) -> String {
    static NON_ALNUM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9\s-]").expect("valid regex"));
    static WHITESPACE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
    static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid regex"));

    let lowered = value.trim().to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lowered, "");
    let dashed = WHITESPACE.replace_all(&cleaned, "-");
    let slug = DASHES.replace_all(&dashed, "-").trim_matches('-').to_string();

    if slug.is_empty() { "topic".into() } else { slug }
}

/// Deduplicated search terms for a topic: the name first, then keywords,
/// preserving order of first appearance.
pub fn normalize_terms<'a>(
    topic_name: &'a str,
    keywords: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let name = topic_name.trim();
    if !name.is_empty() {
        terms.push(name.to_string());
    }
    for keyword in keywords {
        let trimmed = keyword.trim();
        if !trimmed.is_empty() && !terms.iter().any(|t| t == trimmed) {
            terms.push(trimmed.to_string());
        }
    }
    terms
}

/// Case-insensitive check that at least one term appears in the text.
///
/// An empty term list matches everything — a topic with no terms cannot
/// reject sources as off-topic.
pub fn text_mentions_term(text: &str, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let sample = text.to_lowercase();
    terms
        .iter()
        .any(|term| !term.is_empty() && sample.contains(&term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Rust for Embedded Devs"), "rust-for-embedded-devs");
        assert_eq!(slugify("  AI  &  Agents!  "), "ai-agents");
        assert_eq!(slugify("!!!"), "topic");
    }

    #[test]
    fn normalize_terms_dedups_in_order() {
        let terms = normalize_terms("Rust", ["async", "Rust", "", "tokio"]);
        assert_eq!(terms, vec!["Rust", "async", "tokio"]);
    }

    #[test]
    fn mentions_is_case_insensitive() {
        let terms = normalize_terms("Tokio", []);
        assert!(text_mentions_term("An intro to TOKIO runtimes", &terms));
        assert!(!text_mentions_term("Nothing relevant here", &terms));
    }

    #[test]
    fn empty_terms_match_everything() {
        assert!(text_mentions_term("anything", &[]));
    }
}
