use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// Case-insensitive matcher for the search term(s), longest first so that
/// overlapping terms highlight the widest match.
pub fn build_highlight_regex(tokens: &[String]) -> Option<Regex> {
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for token in tokens {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            unique.push(trimmed.to_string());
        }
    }
    if unique.is_empty() {
        return None;
    }
    unique.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = unique
        .iter()
        .map(|token| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Byte ranges of every highlight match in `text`.
pub fn match_ranges(regex: Option<&Regex>, text: &str) -> Vec<(usize, usize)> {
    regex
        .map(|re| re.find_iter(text).map(|m| (m.start(), m.end())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_terms_build_nothing() {
        assert!(build_highlight_regex(&[]).is_none());
        assert!(build_highlight_regex(&["  ".into()]).is_none());
    }

    #[test]
    fn matches_regardless_of_case() {
        let regex = build_highlight_regex(&["nepal".into()]);
        assert_eq!(match_ranges(regex.as_ref(), "From NEPAL"), vec![(5, 10)]);
    }

    #[test]
    fn search_metacharacters_are_literal() {
        let regex = build_highlight_regex(&["a.b".into()]);
        assert_eq!(match_ranges(regex.as_ref(), "axb a.b"), vec![(4, 7)]);
    }

    #[test]
    fn prefers_longer_tokens_first() {
        let regex = build_highlight_regex(&["kat".into(), "kathmandu".into()]);
        assert_eq!(match_ranges(regex.as_ref(), "Kathmandu"), vec![(0, 9)]);
    }
}
