//! Greedy paragraph chunker.
//!
//! Splits text on blank lines and packs consecutive paragraphs into
//! chunks of at most `max_chars`, never splitting inside a paragraph.
//! A single paragraph longer than the limit becomes its own oversized
//! chunk rather than being cut mid-sentence.

/// Pack paragraphs into chunks of at most `max_chars` characters.
///
/// Paragraph order is preserved and joining the chunks with `"\n\n"`
/// reconstructs the non-empty paragraphs of the input.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        // +2 accounts for the separator that would join this paragraph on.
        if !current.is_empty() && current.len() + para.len() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }

        if current.is_empty() {
            current.push_str(para);
        } else {
            current.push_str("\n\n");
            current.push_str(para);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_paragraphs_greedily() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        // Two 4-char paragraphs + separator = 10; limit 10 fits exactly.
        let chunks = chunk_text(text, 10);
        assert_eq!(chunks, vec!["aaaa\n\nbbbb", "cccc"]);
    }

    #[test]
    fn oversized_paragraph_stays_whole() {
        let long = "x".repeat(50);
        let text = format!("short\n\n{long}\n\ntail");
        let chunks = chunk_text(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], long);
    }

    #[test]
    fn empty_and_blank_input() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("\n\n\n\n", 100).is_empty());
    }

    #[test]
    fn rejoining_reconstructs_input() {
        let text = "First paragraph here.\n\nSecond one.\n\nThird, a bit longer than the others.\n\nFourth.";
        let chunks = chunk_text(text, 40);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join("\n\n"), text);
    }

    #[test]
    fn single_small_input_is_one_chunk() {
        let chunks = chunk_text("just one paragraph", 1_000);
        assert_eq!(chunks, vec!["just one paragraph"]);
    }
}
