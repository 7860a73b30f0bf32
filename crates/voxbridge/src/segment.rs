use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Candidate boundaries: a terminator followed by whitespace. Whether a
    // candidate is real depends on the character after the whitespace.
    static ref BOUNDARY_CANDIDATE: Regex = Regex::new(r"[.!?]\s+").unwrap();
}

fn opens_sentence(c: char) -> bool {
    c.is_uppercase() || matches!(c, '"' | '\'' | '\u{201C}' | '\u{2018}')
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split the available text into complete sentences and the unconsumed
/// remainder.
///
/// A boundary sits right after `.`, `!` or `?` when the terminator either
/// ends the available text or is followed by whitespace and then an uppercase
/// letter or opening quote. The uppercase check avoids false splits on
/// abbreviations followed by lowercase continuations; text like "Dr. Smith"
/// still splits, which callers accept as the documented behavior of this
/// heuristic.
pub fn split_sentences(buffer: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;

    for candidate in BOUNDARY_CANDIDATE.find_iter(buffer) {
        let follows = buffer[candidate.end()..].chars().next();
        if !follows.is_some_and(opens_sentence) {
            continue;
        }
        // terminators are ASCII, so the boundary lands on a char edge
        let sentence = buffer[start..candidate.start() + 1].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = candidate.end();
    }

    let mut remainder = buffer[start..].to_string();
    if remainder.ends_with(is_terminator) {
        let sentence = remainder.trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        remainder.clear();
    }

    (sentences, remainder)
}

/// Accumulates token deltas and yields complete sentences as soon as a
/// boundary is recognized, keeping the unterminated tail for later deltas.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the buffer with one delta and return any sentences it
    /// completed, in order.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let (sentences, remainder) = split_sentences(&self.buffer);
        self.buffer = remainder;
        sentences
    }

    /// End-of-stream flush: a non-empty trimmed remainder becomes one final
    /// sentence even without terminating punctuation.
    pub fn flush(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        let trimmed = remainder.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_before_uppercase() {
        let (sentences, remainder) = split_sentences("It is warm. Tomorrow looks");
        assert_eq!(sentences, vec!["It is warm."]);
        assert_eq!(remainder, "Tomorrow looks");
    }

    #[test]
    fn test_terminator_at_end_of_buffer() {
        let (sentences, remainder) = split_sentences("All done!");
        assert_eq!(sentences, vec!["All done!"]);
        assert_eq!(remainder, "");
    }

    #[test]
    fn test_lowercase_continuation_does_not_split() {
        let (sentences, remainder) = split_sentences("it costs 3.50 e.g. at most stores");
        assert!(sentences.is_empty());
        assert_eq!(remainder, "it costs 3.50 e.g. at most stores");
    }

    #[test]
    fn test_opening_quote_starts_a_sentence() {
        let (sentences, remainder) = split_sentences("She agreed. \"Sure thing");
        assert_eq!(sentences, vec!["She agreed."]);
        assert_eq!(remainder, "\"Sure thing");
    }

    #[test]
    fn test_abbreviation_before_capital_splits() {
        // Known heuristic behavior, kept as-is so downstream output is stable.
        let (sentences, remainder) = split_sentences("Ask Dr. Smith about it");
        assert_eq!(sentences, vec!["Ask Dr."]);
        assert_eq!(remainder, "Smith about it");
    }

    #[test]
    fn test_trailing_space_holds_the_boundary_open() {
        // "rainy. " could be followed by a lowercase continuation, so the
        // sentence is not released until the next word arrives.
        let (sentences, remainder) = split_sentences("It's rainy. ");
        assert!(sentences.is_empty());
        assert_eq!(remainder, "It's rainy. ");
    }

    #[test]
    fn test_incremental_example_stream() {
        let mut segmenter = SentenceSegmenter::new();
        let mut sentences = Vec::new();
        for delta in ["It's ", "58°F ", "and rainy. ", "Tomorrow ", "will be sunny."] {
            sentences.extend(segmenter.push(delta));
        }
        if let Some(tail) = segmenter.flush() {
            sentences.push(tail);
        }
        assert_eq!(
            sentences,
            vec!["It's 58°F and rainy.", "Tomorrow will be sunny."]
        );
    }

    #[test]
    fn test_flush_emits_unpunctuated_tail() {
        let mut segmenter = SentenceSegmenter::new();
        assert!(segmenter.push("no punctuation here").is_empty());
        assert_eq!(segmenter.flush(), Some("no punctuation here".to_string()));
        assert_eq!(segmenter.flush(), None);
    }

    #[test]
    fn test_multiple_sentences_in_one_delta() {
        let mut segmenter = SentenceSegmenter::new();
        let sentences = segmenter.push("One done. Two done! Three still going");
        assert_eq!(sentences, vec!["One done.", "Two done!"]);
        assert_eq!(segmenter.flush(), Some("Three still going".to_string()));
    }
}
