use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

// Terminal punctuation, optional closing quotes/brackets, then the space that separates sentences.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?…]+["'”’)\]]* "#).expect("sentence boundary regex is valid")
});

/// Collapse whitespace runs into single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split already-normalized text into sentences. Joining the result with a
/// single space gives back the input.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // the match ends with the separating space
        let end = m.end() - 1;
        if end > start {
            sentences.push(&text[start..end]);
        }
        start = m.end();
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Greedily pack sentences into chunks of at most `max_chars` characters.
///
/// A sentence longer than `max_chars` is never split; it becomes a chunk of its own.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for s in split_sentences(&normalized) {
        let len = s.chars().count();
        if current.is_empty() {
            current.push_str(s);
            current_len = len;
        } else if current_len + 1 + len <= max_chars {
            current.push(' ');
            current.push_str(s);
            current_len += 1 + len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(s);
            current_len = len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    debug!(
        "Split {} chars into {} chunks (max {} chars)",
        normalized.chars().count(),
        chunks.len(),
        max_chars
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("", 300).is_empty());
        assert!(chunk_text("   \n\t ", 300).is_empty());
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let chunks = chunk_text("  Hello\n\nworld.   How   are\tyou?  ", 300);
        assert_eq!(chunks, vec!["Hello world. How are you?"]);
    }

    #[test]
    fn test_sentences_are_packed_greedily() {
        let text = "One two. Three four. Five six.";
        // "One two. Three four." is 20 chars
        assert_eq!(
            chunk_text(text, 20),
            vec!["One two. Three four.", "Five six."]
        );
        assert_eq!(
            chunk_text(text, 19),
            vec!["One two.", "Three four.", "Five six."]
        );
    }

    #[test]
    fn test_oversized_sentence_forms_its_own_chunk() {
        let long = "This sentence is definitely longer than the tiny budget allows.";
        let text = format!("Short. {} Tail.", long);
        let chunks = chunk_text(&text, 20);
        assert_eq!(chunks, vec!["Short.", long, "Tail."]);
    }

    #[test]
    fn test_chunks_rejoin_to_normalized_text() {
        let text = "Rust is fast!  Is it safe? Yes.\n\n\"Quoted sentence.\" Then (an aside.) \
                    Numbers like 3.14 stay whole... And e.g.this too. Last one";
        for budget in [1, 10, 25, 40, 80, 1000] {
            let chunks = chunk_text(text, budget);
            assert_eq!(chunks.join(" "), normalize_whitespace(text), "budget {}", budget);
            for chunk in &chunks {
                let oversized_single = split_sentences(chunk).len() == 1;
                assert!(chunk.chars().count() <= budget || oversized_single);
            }
        }
    }

    #[test]
    fn test_split_sentences_keeps_closing_quotes() {
        let sentences = split_sentences("He said \"stop.\" Then left! Done");
        assert_eq!(sentences, vec!["He said \"stop.\"", "Then left!", "Done"]);
    }

    #[test]
    fn test_decimal_points_do_not_split() {
        assert_eq!(split_sentences("Pi is 3.14 roughly."), vec!["Pi is 3.14 roughly."]);
    }

    #[test]
    fn test_budget_counts_characters_not_bytes() {
        let chunks = chunk_text("Café. Naïve.", 12);
        assert_eq!(chunks, vec!["Café. Naïve."]);
    }

    #[test]
    fn test_is_deterministic() {
        let text = "A b c. D e f! G h i? J k l.";
        assert_eq!(chunk_text(text, 12), chunk_text(text, 12));
    }
}
