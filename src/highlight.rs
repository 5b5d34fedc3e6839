//! Answer-span splicing and text-fragment URL construction.

use anyhow::Result;

/// A context passage split around an answer span.
///
/// Built by exact offset slicing of the raw passage text; nothing is
/// trimmed or renormalized, so concatenating the three parts reproduces the
/// original passage byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplicedPassage {
    /// Text preceding the answer span.
    pub before: String,
    /// The answer span itself.
    pub answer: String,
    /// Text following the answer span.
    pub after: String,
}

impl SplicedPassage {
    /// Splits `context` around the span at `[start, end)`.
    ///
    /// `start` and `end` are character offsets into `context`, matching the
    /// extractor's contract. Offsets past the end of the passage or an
    /// inverted range are an error.
    pub fn new(context: &str, start: usize, end: usize) -> Result<Self> {
        anyhow::ensure!(start <= end, "span start {} exceeds end {}", start, end);
        let char_count = context.chars().count();
        anyhow::ensure!(
            end <= char_count,
            "span end {} exceeds context length {}",
            end,
            char_count
        );
        let byte_start = char_to_byte_offset(context, start);
        let byte_end = char_to_byte_offset(context, end);
        Ok(Self {
            before: context[..byte_start].to_string(),
            answer: context[byte_start..byte_end].to_string(),
            after: context[byte_end..].to_string(),
        })
    }
}

/// Maps a character offset to the corresponding byte offset.
fn char_to_byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Appends a `#:~:text=` fragment to `base_url` so browsers scroll to and
/// highlight `answer` in the source document on page load.
pub fn fragment_url(base_url: &str, answer: &str) -> String {
    format!("{}#:~:text={}", base_url, urlencoding::encode(answer))
}
