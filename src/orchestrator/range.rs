//! Chapter-range expressions: comma-separated items, each `N` or `A-B`.

use crate::error::{Result, ScanlateError};

/// Parse expressions like `1-10`, `5,7,9`, `1-5,10-15` into a sorted,
/// deduplicated chapter-number list. Chapter numbers start at 1.
pub fn parse_chapter_range(expression: &str) -> Result<Vec<u32>> {
    let mut chapters = Vec::new();

    for part in expression.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = parse_number(start)?;
                let end: u32 = parse_number(end)?;
                if start > end {
                    return Err(ScanlateError::Invariant(format!(
                        "invalid range {part}: start exceeds end"
                    )));
                }
                chapters.extend(start..=end);
            }
            None => chapters.push(parse_number(part)?),
        }
    }

    if chapters.is_empty() {
        return Err(ScanlateError::Invariant(format!(
            "no chapters in range expression {expression:?}"
        )));
    }

    chapters.sort_unstable();
    chapters.dedup();
    Ok(chapters)
}

fn parse_number(raw: &str) -> Result<u32> {
    let number: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ScanlateError::Invariant(format!("invalid chapter number {raw:?}")))?;
    if number == 0 {
        return Err(ScanlateError::Invariant(
            "chapter numbers start at 1".to_string(),
        ));
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_range() {
        assert_eq!(parse_chapter_range("1-10").unwrap(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_list() {
        assert_eq!(parse_chapter_range("5,7,9").unwrap(), vec![5, 7, 9]);
    }

    #[test]
    fn test_mixed_with_overlap_sorted_deduped() {
        assert_eq!(parse_chapter_range("1-3,5,2-4").unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_multiple_ranges() {
        assert_eq!(
            parse_chapter_range("1-5,10-15").unwrap(),
            vec![1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn test_whitespace_tolerated() {
        assert_eq!(parse_chapter_range(" 2 , 4 - 5 ").unwrap(), vec![2, 4, 5]);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(parse_chapter_range("").is_err());
        assert!(parse_chapter_range("abc").is_err());
        assert!(parse_chapter_range("5-2").is_err());
        assert!(parse_chapter_range("0-3").is_err());
    }
}
