//! Size-bounded text chunker with overlap.
//!
//! Splits document text into [`TextSpan`]s of at most `max_chars`
//! characters. Each cut prefers the latest natural boundary inside the
//! window: a paragraph break (`\n\n`), then a sentence end (`.`, `!`, `?`
//! followed by whitespace), then any whitespace. Only when none qualifies
//! does it hard-cut at the window edge.
//!
//! Every span after the first starts `overlap` characters before the
//! previous cut, so context that straddles a boundary appears in both.
//!
//! # Algorithm
//!
//! 1. Trim the document. Empty text yields no spans.
//! 2. Text of at most `max_chars` characters yields one span, no overlap.
//! 3. Otherwise take a window of `max_chars` characters from the cursor
//!    and choose a cut inside it (see above). A boundary is only accepted
//!    if more than `overlap` characters precede it, which guarantees the
//!    cursor always advances.
//! 4. Emit the trimmed window text, move the cursor to `cut - overlap`
//!    characters and repeat until the cut reaches the end.
//!
//! The function is pure, so identical input always produces an identical
//! sequence. Fingerprints depend on that.
//!
//! # Example
//!
//! ```rust
//! use ait_index::chunk::chunk_text;
//!
//! let spans = chunk_text("Hello world.\n\nSecond paragraph.", 500, 50);
//! assert_eq!(spans.len(), 1);
//! assert_eq!(spans[0].sequence_index, 0);
//! ```

/// One chunk of a document with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Trimmed chunk text.
    pub text: String,
    /// Position within the document, contiguous from 0.
    pub sequence_index: usize,
    /// Byte offset of `text` in the original document.
    pub start: usize,
    /// Byte offset one past the end of `text` in the original document.
    pub end: usize,
}

/// Split `text` into overlapping spans of at most `max_chars` characters.
///
/// `max_chars` is clamped to at least 1 and `overlap` to at most
/// `max_chars - 1`.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<TextSpan> {
    let max_chars = max_chars.max(1);
    let overlap = overlap.min(max_chars - 1);

    let body = text.trim();
    if body.is_empty() {
        return Vec::new();
    }
    let base = text.len() - text.trim_start().len();

    if body.chars().count() <= max_chars {
        return vec![TextSpan {
            text: body.to_string(),
            sequence_index: 0,
            start: base,
            end: base + body.len(),
        }];
    }

    let mut spans = Vec::new();
    let mut cursor = 0usize;

    loop {
        let window_end = advance_chars(body, cursor, max_chars);
        let cut = if window_end == body.len() {
            body.len()
        } else {
            choose_cut(body, cursor, window_end, overlap)
        };

        let piece = &body[cursor..cut];
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            let lead = piece.len() - piece.trim_start().len();
            let start = base + cursor + lead;
            spans.push(TextSpan {
                text: trimmed.to_string(),
                sequence_index: spans.len(),
                start,
                end: start + trimmed.len(),
            });
        }

        if cut == body.len() {
            break;
        }
        cursor = retreat_chars(body, cut, overlap);
    }

    spans
}

/// Pick the cut position (byte offset into `body`) for the window
/// `body[start..window_end]`.
fn choose_cut(body: &str, start: usize, window_end: usize, overlap: usize) -> usize {
    let window = &body[start..window_end];
    let acceptable = |offset: usize| offset > 0 && window[..offset].chars().count() > overlap;

    let candidates = [
        window.rfind("\n\n").map(|pos| pos + 2),
        last_sentence_end(window),
        window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8()),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|&offset| acceptable(offset))
        .map(|offset| start + offset)
        .unwrap_or(window_end)
}

/// Byte offset just past the last `.`, `!` or `?` that is followed by
/// whitespace inside `window`.
fn last_sentence_end(window: &str) -> Option<usize> {
    let mut found = None;
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in window.char_indices() {
        if let Some((pi, pc)) = prev {
            if matches!(pc, '.' | '!' | '?') && c.is_whitespace() {
                found = Some(pi + pc.len_utf8());
            }
        }
        prev = Some((i, c));
    }
    found
}

/// Byte offset `n` characters after `from`, or the end of `s`.
fn advance_chars(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(s.len())
}

/// Byte offset `n` characters before `from`, or 0.
fn retreat_chars(s: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    s[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}
