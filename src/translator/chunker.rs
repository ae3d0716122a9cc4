//! Token-budget chunking for large chapters.
//!
//! Token counts are estimated at ~4 characters per token. When the whole
//! flat list exceeds the safe ceiling, it is split into sequential chunks;
//! each chunk after the first carries a few translations from its
//! predecessor as context so names and tone stay consistent.

/// Estimated characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// How many translations from the previous chunk are carried forward.
pub const CARRY_OVER_ITEMS: usize = 10;

/// Rough token estimate for a batch of texts.
pub fn estimate_tokens(texts: &[String]) -> usize {
    texts.iter().map(|t| t.len()).sum::<usize>() / CHARS_PER_TOKEN
}

/// Split `texts` into chunks of at most `chunk_tokens` (estimated) each.
/// A single text longer than the budget still forms its own chunk, so
/// every input lands in exactly one chunk and order is preserved.
pub fn split_into_chunks(texts: &[String], chunk_tokens: usize) -> Vec<Vec<String>> {
    let budget_chars = chunk_tokens * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for text in texts {
        let size = text.len();
        if current_size + size > budget_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(text.clone());
        current_size += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The context slice carried into the next chunk's prompt.
pub fn carry_over(previous_translations: &[String]) -> &[String] {
    &previous_translations[..previous_translations.len().min(CARRY_OVER_ITEMS)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts_of(sizes: &[usize]) -> Vec<String> {
        sizes.iter().map(|n| "x".repeat(*n)).collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&texts_of(&[400, 400])), 200);
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn test_split_preserves_order_and_membership() {
        let texts: Vec<String> = (0..10).map(|i| format!("text-{i}-{}", "y".repeat(30))).collect();
        let chunks = split_into_chunks(&texts, 20); // 80-char budget
        assert!(chunks.len() > 1);
        let flattened: Vec<String> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, texts);
    }

    #[test]
    fn test_oversized_single_text_gets_own_chunk() {
        let texts = texts_of(&[10, 500, 10]);
        let chunks = split_into_chunks(&texts, 25); // 100-char budget
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1][0].len(), 500);
    }

    #[test]
    fn test_small_input_is_one_chunk() {
        let texts = texts_of(&[10, 10]);
        let chunks = split_into_chunks(&texts, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
    }

    #[test]
    fn test_carry_over_cap() {
        let many: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(carry_over(&many).len(), CARRY_OVER_ITEMS);
        let few: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        assert_eq!(carry_over(&few).len(), 3);
    }
}
