/// Characters that end a sentence-like chunk.
const TERMINATORS: &[char] = &['.', '!', '?'];

/// Punctuation removed from words before display and length weighting.
pub(crate) const WORD_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// A sentence-sized piece of the source text, submitted to the engine as one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    text: String,
    start: usize,
    words: Vec<String>,
    char_count: usize,
}

impl Chunk {
    fn new(text: &str, start: usize) -> Self {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        Self {
            text: text.to_string(),
            start,
            words,
            char_count: text.chars().count(),
        }
    }

    /// Trimmed chunk text, terminator included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offset of the chunk within the source text.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Whitespace-separated tokens, punctuation still attached.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn char_count(&self) -> usize {
        self.char_count
    }

    /// The word a boundary callback at `char_index` points at.
    ///
    /// Takes the whitespace-delimited token starting at that byte offset and
    /// strips its punctuation. `None` if the offset is out of range, not on a
    /// character boundary, or lands on whitespace.
    pub fn word_at(&self, char_index: usize) -> Option<String> {
        let rest = self.text.get(char_index..)?;
        let token = rest.split(char::is_whitespace).next()?;
        if token.is_empty() {
            return None;
        }
        Some(strip_punctuation(token))
    }
}

/// Remove the punctuation that shouldn't be shown with a word.
pub fn strip_punctuation(word: &str) -> String {
    word.chars().filter(|c| !WORD_PUNCTUATION.contains(c)).collect()
}

/// Split text into sentence-like chunks.
///
/// A run of terminators (`?!`, `...`) stays with the sentence before it, and
/// trailing text without a terminator becomes the last chunk. Whitespace-only
/// pieces are dropped, so the result is empty only for blank input.
pub fn split(text: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut piece_start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if !TERMINATORS.contains(&ch) {
            continue;
        }
        while let Some(&(_, next)) = chars.peek() {
            if TERMINATORS.contains(&next) {
                chars.next();
            } else {
                break;
            }
        }
        let piece_end = chars.peek().map_or(text.len(), |&(i, _)| i);
        push_trimmed(&mut chunks, text, piece_start, piece_end);
        piece_start = piece_end;
    }
    push_trimmed(&mut chunks, text, piece_start, text.len());

    log::debug!("Split {} bytes of text into {} chunks", text.len(), chunks.len());
    chunks
}

fn push_trimmed(chunks: &mut Vec<Chunk>, text: &str, start: usize, end: usize) {
    let piece = &text[start..end];
    let trimmed = piece.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = piece.len() - piece.trim_start().len();
    chunks.push(Chunk::new(trimmed, start + leading));
}
