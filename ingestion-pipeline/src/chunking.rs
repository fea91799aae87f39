use common::{
    error::AppError,
    storage::types::chunk::{Chunk, DocumentCategory},
};

/// Splits text into overlapping windows, preferring to cut at a sentence
/// boundary near the end of each window. Boundaries are stable for
/// identical input, which keeps chunk ids deterministic.
///
/// Indexing is char-based so multi-byte text never splits inside a code
/// point.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Validation(
            "chunk_size must be greater than zero".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::Validation(format!(
            "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len <= chunk_size {
        return Ok(vec![text.to_string()]);
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let naive_end = (start + chunk_size).min(len);
        let mut end = naive_end;

        if naive_end < len {
            // Look for a period in the tail of the window. The floor keeps
            // the next window start strictly ahead of the current one.
            let search_floor = naive_end.saturating_sub(overlap).max(start + overlap + 1);
            for idx in (search_floor..naive_end).rev() {
                if chars[idx] == '.' {
                    end = idx + 1;
                    break;
                }
            }
        }

        chunks.push(chars[start..end].iter().collect());

        if end >= len {
            break;
        }

        let next_start = end - overlap;
        if len - next_start < overlap {
            // Only a degenerate trailing fragment would remain.
            break;
        }
        start = next_start;
    }

    Ok(chunks)
}

/// Runs the splitter and mints deterministic `Chunk`s for a document.
pub fn chunk_document(
    text: &str,
    source_document_id: &str,
    category: DocumentCategory,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    let pieces = split_text(text, chunk_size, overlap)?;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| Chunk::new(source_document_id, index, piece, category))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(split_text("text", 0, 0).is_err());
        assert!(split_text("text", 10, 10).is_err());
        assert!(split_text("text", 10, 15).is_err());

        let err = split_text("text", 10, 15).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split_text("", 100, 20).unwrap().is_empty());
        assert!(split_text("   \n\n  ", 100, 20).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_is_a_single_chunk() {
        let chunks = split_text("short text", 100, 20).unwrap();
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn test_text_shorter_than_overlap_is_a_single_chunk() {
        let chunks = split_text("hi", 100, 20).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_cuts_at_sentence_boundaries() {
        let text = "A. B. C. D. E. F.";
        let chunks = split_text(text, 10, 3).unwrap();
        assert_eq!(chunks[0], "A. B. C.");
        // Each chunk after a boundary cut ends with a period except
        // possibly the last.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'));
        }
    }

    #[test]
    fn test_no_periods_falls_back_to_fixed_cuts() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = split_text(text, 10, 3).unwrap();
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[0].len(), 10);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(10);
        let overlap = 7;
        let chunks = split_text(&text, 50, overlap).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(overlap).collect::<Vec<_>>().into_iter().rev().collect();
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn test_chunks_cover_the_whole_text() {
        let text = "One sentence here. Another sentence follows. ".repeat(40);
        let overlap = 50;
        let chunks = split_text(&text, 300, overlap).unwrap();

        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            let without_overlap: String = chunk.chars().skip(overlap).collect();
            rebuilt.push_str(&without_overlap);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_boundaries_are_stable() {
        let text = "Sentence number one. Sentence number two. ".repeat(50);
        let first = split_text(&text, 200, 40).unwrap();
        let second = split_text(&text, 200, 40).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let text = "§ 1983 straff­ansvar gäller. ".repeat(100);
        let chunks = split_text(&text, 120, 30).unwrap();
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_chunk_document_mints_deterministic_ids() {
        let text = "One sentence here. Another sentence follows. ".repeat(40);
        let first =
            chunk_document(&text, "doc1", DocumentCategory::Contract, 300, 50).unwrap();
        let second =
            chunk_document(&text, "doc1", DocumentCategory::Contract, 300, 50).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
        }
        for (index, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.sequence_index, index);
            assert_eq!(chunk.source_document_id, "doc1");
        }
    }
}
