//! Chunk classification and nugget extraction.
//!
//! Both operations are single model calls through the configured
//! classifier backend. An unparseable classification is not an error;
//! it defaults to silo 0 (unclassified).

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use bookforge_llm::{GenRequest, TextGenerator};
use bookforge_shared::{BookForgeError, Result, SILO_COUNT, SILO_TITLES, silo_title};

use crate::topicfs::TopicFs;

/// First standalone 0-10 token in a classifier response.
static SILO_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(10|[0-9])\b").expect("valid regex"));

/// Parse a silo number out of a model response, defaulting to 0.
pub fn parse_silo_response(response: &str) -> u8 {
    SILO_TOKEN_RE
        .captures(response)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|n| *n < SILO_COUNT)
        .unwrap_or(0)
}

/// Classify one chunk into a chapter silo.
pub async fn classify_chunk(
    backend: &dyn TextGenerator,
    topic_name: &str,
    chunk: &str,
) -> Result<u8> {
    let user = format!(
        "Classify this text into a chapter silo (0-10). Return only the silo number.\n\n\
         Topic: {topic_name}\n\nSilos:\n{}\n\nText:\n{}",
        silo_menu(),
        head(chunk, 3_000),
    );
    let request = GenRequest::new("You are a precise librarian.", user)
        .with_max_tokens(16)
        .with_temperature(0.0);

    let response = backend.generate(&request).await?;
    let silo = parse_silo_response(&response);
    debug!(silo, "classified chunk");
    Ok(silo)
}

/// Extract structured nuggets from a chunk for a chapter's draft pack.
pub async fn extract_nuggets(
    backend: &dyn TextGenerator,
    topic_name: &str,
    silo_number: u8,
    chunk: &str,
) -> Result<String> {
    let system = "You are building a structured draft pack for a book chapter. \
                  Output only the sectioned markdown below, no preamble.";
    let user = format!(
        "Rules:\n\
         - No filler phrases like 'Here are...' or 'In summary'.\n\
         - No verbatim copying; paraphrase into concise, actionable points.\n\
         - Prefer concrete facts, steps, gotchas, commands, examples.\n\
         - If data is thin, add 2-3 questions to research rather than invent.\n\n\
         Format (exact headings):\n\
         ## Chapter Goal\n\
         - 1 sentence on what the reader will achieve.\n\
         ## Key Facts\n\
         - 5-12 bullets of factual nuggets.\n\
         ## Process / Steps\n\
         - 3-10 bullets of steps or workflow.\n\
         ## Examples / Use Cases\n\
         - 3-8 bullets of real scenarios or applications.\n\
         ## Gotchas / Risks\n\
         - 3-8 bullets of failure modes, limits, or caveats.\n\
         ## Voice Hooks\n\
         - 3-6 bullets written as if from the author's voice (short, punchy).\n\
         ## Open Questions\n\
         - 1-5 bullets of gaps to fill later (if any).\n\n\
         Topic: {topic_name}\n\
         Silo: {}\n\n\
         Text:\n{}",
        silo_title(silo_number),
        head(chunk, 3_500),
    );
    let request = GenRequest::new(system, user).with_max_tokens(1_024);

    let nuggets = backend.generate(&request).await?;
    if nuggets.trim().is_empty() {
        return Err(BookForgeError::Provider("empty nugget extraction".into()));
    }
    Ok(nuggets)
}

/// Append extracted content to a chapter's draft accumulator. This is
/// the single ingestion-side mutation point for draft files.
pub fn append_to_silo(fs: &TopicFs, silo_number: u8, content: &str) -> Result<()> {
    use std::io::Write;

    let path = fs.draft_path(silo_number);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BookForgeError::io(&path, e))?;
    write!(file, "\n\n{}", content.trim()).map_err(|e| BookForgeError::io(&path, e))?;
    Ok(())
}

/// Numbered silo menu for classification prompts.
pub fn silo_menu() -> String {
    SILO_TITLES
        .iter()
        .enumerate()
        .map(|(n, title)| format!("{n}: {title}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Char-boundary-safe prefix of a prompt input.
fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parses_first_silo_token() {
        assert_eq!(parse_silo_response("7"), 7);
        assert_eq!(parse_silo_response("The best fit is silo 10."), 10);
        assert_eq!(parse_silo_response("3 or maybe 5"), 3);
        // No token defaults to unclassified.
        assert_eq!(parse_silo_response("none of these"), 0);
        assert_eq!(parse_silo_response(""), 0);
        // Out-of-range numbers don't match the token pattern.
        assert_eq!(parse_silo_response("42"), 0);
    }

    #[test]
    fn append_adds_leading_blank_line() {
        let root = std::env::temp_dir().join(format!("bf-classify-{}", Uuid::now_v7()));
        let fs = TopicFs::new(&root, "t");
        fs.ensure_structure().unwrap();

        append_to_silo(&fs, 3, "First nugget.\n").unwrap();
        append_to_silo(&fs, 3, "Second nugget.").unwrap();

        let content = fs.read_or_empty(&fs.draft_path(3));
        assert!(content.starts_with("# Core Concepts Without the Fluff\n"));
        assert!(content.contains("\n\nFirst nugget.\n\nSecond nugget."));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn head_respects_char_boundaries() {
        let text = "é".repeat(10);
        assert_eq!(head(&text, 3).chars().count(), 3);
        assert_eq!(head("short", 100), "short");
    }

    #[test]
    fn menu_lists_all_silos() {
        let menu = silo_menu();
        assert!(menu.starts_with("0: Unclassified"));
        assert!(menu.contains("10: Roadmap"));
        assert_eq!(menu.lines().count(), SILO_COUNT as usize);
    }
}
