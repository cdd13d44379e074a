//! Character-window chunking for reference documents.

use serde::{Deserialize, Serialize};

/// How far back from a window end to look for a natural break.
const BOUNDARY_WINDOW: usize = 100;

/// Configuration for text chunking.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A chunk of text with its position in the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Start character position in original document.
    pub start_pos: usize,
    /// End character position in original document.
    pub end_pos: usize,
    pub index: usize,
}

/// Split text into overlapping chunks.
///
/// A window ends at the last paragraph break or sentence end within its
/// final 100 characters when there is one. Whitespace-only chunks are
/// dropped and every step advances by at least one character.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let text_len = chars.len();

    if text_len == 0 || config.chunk_size == 0 {
        return chunks;
    }

    let mut start = 0;
    let mut index = 0;

    while start < text_len {
        let end = (start + config.chunk_size).min(text_len);
        let final_end = if end < text_len {
            natural_break(&chars, start + config.chunk_overlap, end).unwrap_or(end)
        } else {
            end
        }
        .max(start + 1)
        .min(text_len);

        let chunk: String = chars[start..final_end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                start_pos: start,
                end_pos: final_end,
                index,
            });
            index += 1;
        }

        if final_end >= text_len {
            break;
        }

        let next_start = final_end.saturating_sub(config.chunk_overlap);
        start = if next_start <= start {
            start + 1
        } else {
            next_start
        };
    }

    chunks
}

/// Position just after the best break in `chars[end - 100..end]`.
///
/// Only breaks past `floor` count, so a chunk always reaches beyond the
/// overlap it shares with the previous one. Paragraph breaks win over
/// sentence ends.
fn natural_break(chars: &[char], floor: usize, end: usize) -> Option<usize> {
    let search_start = end.saturating_sub(BOUNDARY_WINDOW).max(floor + 1);
    if search_start >= end {
        return None;
    }

    let window = &chars[search_start..end];

    let paragraph = window
        .windows(2)
        .rposition(|pair| pair[0] == '\n' && pair[1] == '\n')
        .map(|pos| search_start + pos + 2);

    paragraph.or_else(|| {
        window
            .iter()
            .rposition(|c| matches!(c, '.' | '!' | '?'))
            .map(|pos| search_start + pos + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text() {
        let text = "This is a test. Another sentence here. And one more.";
        let config = ChunkConfig {
            chunk_size: 20,
            chunk_overlap: 5,
        };

        let chunks = chunk_text(text, &config);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(!chunk.text.is_empty());
            assert_eq!(chunk.index, i);
            assert!(chunk.end_pos - chunk.start_pos <= 20);
        }
        assert_eq!(chunks[0].text, "This is a test.");
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("Short note.", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short note.");
        assert_eq!(chunks[0].end_pos, 11);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}.\n\n{}", "a".repeat(40), "b".repeat(40));
        let config = ChunkConfig {
            chunk_size: 60,
            chunk_overlap: 0,
        };

        let chunks = chunk_text(&text, &config);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with('.'));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn test_overlap_repeats_text() {
        let text = "x".repeat(250);
        let config = ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 20,
        };

        let chunks = chunk_text(&text, &config);
        assert_eq!(chunks[1].start_pos, 80);
        assert_eq!(chunks.last().unwrap().end_pos, 250);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(chunk_text("", &ChunkConfig::default()).is_empty());
        assert!(chunk_text("   \n\n  ", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn test_always_progresses_with_large_overlap() {
        let config = ChunkConfig {
            chunk_size: 10,
            chunk_overlap: 50,
        };
        let chunks = chunk_text(&"word ".repeat(20), &config);
        assert!(!chunks.is_empty());
        assert_eq!(chunks.last().unwrap().end_pos, 100);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Grüezi mitenand. Wie gäht's? Äs gaht guet.";
        let config = ChunkConfig {
            chunk_size: 18,
            chunk_overlap: 4,
        };
        let chunks = chunk_text(text, &config);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }
}
