//! Streaming sentence chunker.
//!
//! LLM text arrives in arbitrary deltas; TTS wants sentence-sized units.
//! A sentence ends at a terminator (`.!?` and the CJK `。！？`) followed by
//! whitespace. A trailing terminator is held back until more text arrives
//! or the stream ends, so chunking is stable under re-segmentation of the
//! input.

const TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Returns the byte offset to split at (start of the whitespace after a
/// terminator), or `None` if the buffer holds no complete sentence.
pub type BoundaryFn = fn(&str) -> Option<usize>;

pub fn default_boundary(buf: &str) -> Option<usize> {
    let mut chars = buf.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if TERMINATORS.contains(&c) {
            if let Some(&(j, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(j);
                }
            }
        }
    }
    None
}

pub struct SentenceChunker {
    buf: String,
    boundary: BoundaryFn,
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::with_boundary(default_boundary)
    }

    pub fn with_boundary(boundary: BoundaryFn) -> Self {
        Self {
            buf: String::new(),
            boundary,
        }
    }

    /// Feed a delta, returning any completed sentences.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);

        let mut sentences = Vec::new();
        while let Some(split) = (self.boundary)(&self.buf) {
            let sentence: String = self.buf.drain(..split).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            let rest = self.buf.trim_start();
            if rest.len() != self.buf.len() {
                self.buf = rest.to_string();
            }
        }
        sentences
    }

    /// Close the stream: whatever remains is the final sentence, even
    /// without a terminator.
    pub fn flush(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.buf);
        let tail = tail.trim();
        (!tail.is_empty()).then(|| tail.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_all(chunker: &mut SentenceChunker, parts: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        for part in parts {
            out.extend(chunker.push(part));
        }
        out.extend(chunker.flush());
        out
    }

    #[test]
    fn splits_on_terminator_plus_space() {
        let mut c = SentenceChunker::new();
        let sentences = c.push("Hello there. How are you? ");
        assert_eq!(sentences, vec!["Hello there.", "How are you?"]);
    }

    #[test]
    fn trailing_terminator_waits_for_flush() {
        let mut c = SentenceChunker::new();
        assert!(c.push("It is sunny.").is_empty());
        assert_eq!(c.flush().as_deref(), Some("It is sunny."));
    }

    #[test]
    fn flush_emits_unterminated_tail() {
        let mut c = SentenceChunker::new();
        assert!(c.push("and that's everything").is_empty());
        assert_eq!(c.flush().as_deref(), Some("and that's everything"));
        assert_eq!(c.flush(), None);
    }

    #[test]
    fn cjk_terminators_split() {
        let mut c = SentenceChunker::new();
        let sentences = c.push("今日は晴れです。 明日は雨です。 ");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "今日は晴れです。");
    }

    #[test]
    fn terminator_runs_stay_together() {
        let mut c = SentenceChunker::new();
        let sentences = c.push("Really?! I had no idea. ");
        assert_eq!(sentences, vec!["Really?!", "I had no idea."]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let mut c = SentenceChunker::new();
        let sentences = c.push("It is 22.5 degrees outside. ");
        assert_eq!(sentences, vec!["It is 22.5 degrees outside."]);
    }

    #[test]
    fn chunking_is_stable_under_resegmentation() {
        let text = "First sentence. Second one! Third? And a tail";

        let mut whole = SentenceChunker::new();
        let expected = chunk_all(&mut whole, &[text]);

        // Same text split at every possible byte boundary pair.
        for i in (0..text.len()).filter(|i| text.is_char_boundary(*i)) {
            let mut c = SentenceChunker::new();
            let got = chunk_all(&mut c, &[&text[..i], &text[i..]]);
            assert_eq!(got, expected, "split at byte {i}");
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut c = SentenceChunker::new();
        assert!(c.push("").is_empty());
        assert_eq!(c.flush(), None);
    }
}
