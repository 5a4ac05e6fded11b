//! Fixed-size text chunking with overlap.
//!
//! Chunks are `chunk_size` characters long with `overlap` characters shared
//! between neighbours, so a phrase straddling a boundary still appears whole
//! in at least one chunk. When a boundary would split a word, the cut moves
//! back to the last space inside the slice. Sizes are in characters, not
//! bytes — slicing never lands inside a UTF-8 sequence.

/// One chunk of source text.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSlice {
    /// Character offset of the chunk start within the source text.
    pub position: usize,
    pub text: String,
}

/// Slice `text` into overlapping chunks.
///
/// Whitespace-only chunks are skipped. Text no longer than `chunk_size`
/// yields a single chunk. `overlap` must be smaller than `chunk_size`
/// (enforced at config load); a forced-progress guard keeps the loop
/// terminating even when the space cut lands inside the overlap window.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSlice> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, so char-unit arithmetic can slice safely.
    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let nchars = offsets.len();
    let byte_at = |ci: usize| if ci >= nchars { text.len() } else { offsets[ci] };

    if nchars <= chunk_size {
        let trimmed = text.trim();
        return vec![ChunkSlice { position: 0, text: trimmed.to_string() }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize; // char index

    while start < nchars {
        let mut end = (start + chunk_size).min(nchars);

        // Not the last chunk: prefer cutting at the last space in the slice.
        if end < nchars {
            let slice = &text[byte_at(start)..byte_at(end)];
            if let Some(space_byte) = slice.rfind(' ') {
                let cut_chars = slice[..space_byte].chars().count();
                if cut_chars > 0 {
                    end = start + cut_chars;
                }
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            chunks.push(ChunkSlice { position: start, text: piece.to_string() });
        }

        if end >= nchars {
            break;
        }

        let next = end.saturating_sub(overlap);
        // Forced progress: a short space-cut chunk must not rewind behind
        // where this chunk started.
        start = if next > start { next } else { end };
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = chunk_text("hello world", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 100, 20).is_empty());
        assert!(chunk_text("   \n\t ", 100, 20).is_empty());
    }

    #[test]
    fn long_text_is_split_with_overlap() {
        let word = "alpha ";
        let text = word.repeat(100); // 600 chars
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() > 1);

        // No chunk exceeds chunk_size.
        for c in &chunks {
            assert!(c.text.chars().count() <= 100, "chunk too long: {}", c.text.len());
        }

        // Consecutive chunks overlap: the next chunk starts before the
        // previous one ended.
        for pair in chunks.windows(2) {
            let prev_end = pair[0].position + pair[0].text.chars().count();
            assert!(pair[1].position < prev_end + 20);
            assert!(pair[1].position > pair[0].position);
        }
    }

    #[test]
    fn cuts_at_word_boundary() {
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh";
        let chunks = chunk_text(text, 12, 4);
        // No chunk should split a word: every chunk is made of whole tokens.
        for c in &chunks {
            for token in c.text.split(' ') {
                assert!(
                    ["aaaa", "bbbb", "cccc", "dddd", "eeee", "ffff", "gggg", "hhhh"]
                        .contains(&token),
                    "split word in chunk: {:?}",
                    c.text
                );
            }
        }
    }

    #[test]
    fn unbroken_text_still_terminates() {
        // No spaces at all: hard cuts every chunk_size chars.
        let text = "x".repeat(550);
        let chunks = chunk_text(&text, 100, 30);
        assert!(!chunks.is_empty());
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert!(total >= 550);
    }

    #[test]
    fn multibyte_text_never_panics() {
        let text = "día y noche — ñandú über café ".repeat(40);
        let chunks = chunk_text(&text, 50, 10);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn full_coverage_no_gaps() {
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let chunks = chunk_text(&text, 80, 20);
        // Every word of the source appears in at least one chunk.
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        for word in ["one", "five", "ten"] {
            assert!(joined.contains(word));
        }
        // Chunk start positions are strictly increasing.
        for pair in chunks.windows(2) {
            assert!(pair[1].position > pair[0].position);
        }
    }
}
