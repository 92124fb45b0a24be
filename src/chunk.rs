//! Fixed-size overlapping window chunker.
//!
//! [`ChunkWindows`] lazily walks a section's text in windows of at most
//! `chunk_chars` characters, with consecutive windows overlapping by
//! `overlap_chars`. The final window may be shorter than `chunk_chars`
//! but trailing text is never dropped. Window boundaries are measured in
//! characters, so multi-byte text is never split mid code point.

/// Lazy iterator over `(window_text, char_offset)` pairs.
///
/// Stateless between calls: two iterations over the same input yield the
/// same windows.
pub struct ChunkWindows<'a> {
    text: &'a str,
    chunk_chars: usize,
    /// Chars to advance between window starts (`chunk_chars - overlap`).
    step: usize,
    byte_pos: usize,
    char_pos: usize,
    done: bool,
}

impl<'a> ChunkWindows<'a> {
    pub fn new(text: &'a str, chunk_chars: usize, overlap_chars: usize) -> Self {
        assert!(chunk_chars > 0, "chunk_chars must be > 0");
        assert!(
            overlap_chars < chunk_chars,
            "overlap_chars must be < chunk_chars"
        );
        Self {
            text,
            chunk_chars,
            step: chunk_chars - overlap_chars,
            byte_pos: 0,
            char_pos: 0,
            done: text.is_empty(),
        }
    }
}

impl<'a> Iterator for ChunkWindows<'a> {
    type Item = (&'a str, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let remaining = &self.text[self.byte_pos..];

        // Locate the byte offsets of the step-th and chunk_chars-th
        // characters in one pass.
        let mut step_byte = None;
        let mut end_byte = remaining.len();
        let mut window_is_full = false;

        for (n, (byte, _)) in remaining.char_indices().enumerate() {
            if n == self.step {
                step_byte = Some(byte);
            }
            if n == self.chunk_chars {
                end_byte = byte;
                window_is_full = true;
                break;
            }
        }

        let window = &remaining[..end_byte];
        let offset = self.char_pos;

        if window_is_full && end_byte < remaining.len() {
            // More text follows this window; advance by one step.
            self.byte_pos += step_byte.expect("step < chunk_chars");
            self.char_pos += self.step;
        } else {
            // This window reached the end of the text.
            self.done = true;
        }

        Some((window, offset))
    }
}
