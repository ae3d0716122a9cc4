//! Prompt construction for the LLM backend.
//!
//! The system prompt pins the role and the output contract (a JSON array
//! and nothing else). When a glossary is supplied it is appended as a
//! mandatory block, which keeps terminology consistent across chapters even
//! the first time a term is seen.

use crate::language::language_name;

/// Role and output contract for every request.
pub const SYSTEM_PROMPT: &str = "\
You are a professional webtoon and comic book translator.
Your tasks:
1. Translate texts naturally and fluently to the target language
2. Keep character names and honorifics consistent throughout the entire chapter
3. Understand and translate webtoon language (slang, special terms) correctly
4. Preserve the tone of speech and character personality
5. Output ONLY a JSON list: [\"translation1\", \"translation2\", ...]";

/// System prompt, optionally extended with the mandatory glossary block.
pub fn build_system_prompt(glossary: Option<&[(String, String)]>) -> String {
    let Some(pairs) = glossary.filter(|p| !p.is_empty()) else {
        return SYSTEM_PROMPT.to_string();
    };

    let mut items = String::new();
    for (original, translation) in pairs {
        items.push_str(&format!("  - \"{original}\" -> \"{translation}\"\n"));
    }

    format!(
        "{SYSTEM_PROMPT}\n\n\
         CRITICAL GLOSSARY RULES (MANDATORY):\n\
         The following terms MUST be translated EXACTLY as specified. \
         If you see these terms, use ONLY the provided translation:\n\
         {items}\
         When you encounter any of these terms in the source text, you MUST \
         translate them to the exact value shown above.\n\
         Do NOT use alternative translations, synonyms, or variations. \
         Consistency is critical."
    )
}

/// Position of a chunk within the chapter, for multi-part prompts.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPosition {
    pub index: usize,
    pub total: usize,
}

/// User prompt for one request. `previous_context` holds translations
/// carried over from the preceding chunk.
pub fn build_user_prompt(
    texts: &[String],
    source_lang: &str,
    target_lang: &str,
    position: Option<ChunkPosition>,
    previous_context: Option<&[String]>,
) -> String {
    let source_name = language_name(source_lang).unwrap_or(source_lang);
    let target_name = language_name(target_lang).unwrap_or(target_lang);

    let part_line = match position {
        Some(pos) => format!(
            "This is part {} of {} of a webtoon chapter.",
            pos.index + 1,
            pos.total
        ),
        None => "This is a webtoon chapter. Translate all texts consistently within context."
            .to_string(),
    };

    let context_block = match previous_context.filter(|c| !c.is_empty()) {
        Some(context) => format!(
            "\nPREVIOUS CONTEXT (for consistency):\n\
             The previous part of this chapter contained these translations:\n\
             {}\n\
             Maintain consistency with them, especially for character names \
             and special terms.\n",
            serde_json::to_string(context).unwrap_or_default()
        ),
        None => String::new(),
    };

    let input_list = serde_json::to_string_pretty(texts).unwrap_or_default();

    format!(
        "Translate the following text list from {source_name} ({source_lang}) \
         to {target_name} ({target_lang}).\n\
         {part_line}{context_block}\n\
         IMPORTANT RULES:\n\
         1. Keep character names consistent throughout the list\n\
         2. Maintain consistent honorifics and addressing styles\n\
         3. Preserve the tone of speech (formal, casual, rude, etc.)\n\
         4. Translate webtoon slang and special terms correctly\n\
         5. Output ONLY a JSON list, no other explanations\n\n\
         Input List:\n{input_list}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_system_prompt_without_glossary() {
        assert_eq!(build_system_prompt(None), SYSTEM_PROMPT);
        assert_eq!(build_system_prompt(Some(&[])), SYSTEM_PROMPT);
    }

    #[test]
    fn test_system_prompt_with_glossary_block() {
        let glossary = pairs(&[("Jin", "Cin"), ("Sung Guild", "Sung Loncasi")]);
        let prompt = build_system_prompt(Some(&glossary));
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.contains("CRITICAL GLOSSARY RULES"));
        assert!(prompt.contains("\"Jin\" -> \"Cin\""));
        assert!(prompt.contains("\"Sung Guild\" -> \"Sung Loncasi\""));
    }

    #[test]
    fn test_user_prompt_single_part() {
        let texts = vec!["Hello!".to_string()];
        let prompt = build_user_prompt(&texts, "en", "tr", None, None);
        assert!(prompt.contains("from English (en) to Turkish (tr)"));
        assert!(prompt.contains("\"Hello!\""));
        assert!(!prompt.contains("PREVIOUS CONTEXT"));
    }

    #[test]
    fn test_user_prompt_chunked_with_context() {
        let texts = vec!["Next line".to_string()];
        let context = vec!["Cin geldi".to_string()];
        let prompt = build_user_prompt(
            &texts,
            "en",
            "tr",
            Some(ChunkPosition { index: 1, total: 3 }),
            Some(&context),
        );
        assert!(prompt.contains("part 2 of 3"));
        assert!(prompt.contains("PREVIOUS CONTEXT"));
        assert!(prompt.contains("Cin geldi"));
    }

    #[test]
    fn test_unknown_language_code_falls_back_to_code() {
        let prompt = build_user_prompt(&["x".to_string()], "xx", "tr", None, None);
        assert!(prompt.contains("from xx (xx)"));
    }
}
