//! Closest-match model lookup.

use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher};

/// Matches scoring below this are noise, not suggestions.
const MIN_SCORE: u32 = 50;

/// Maximum suggestions returned.
const MAX_SUGGESTIONS: usize = 3;

/// Fuzzy-search `candidates` (typically `provider/model` strings) for the
/// closest matches to `query`. Returns at most three, best first; empty
/// when nothing scores above the threshold.
pub fn suggestions(candidates: &[String], query: &str) -> Vec<String> {
    if query.is_empty() || candidates.is_empty() {
        return Vec::new();
    }

    let mut matcher = Matcher::new(Config::DEFAULT);
    let pattern = Pattern::parse(query, CaseMatching::Ignore, Normalization::Smart);

    let mut matches = pattern.match_list(candidates.iter(), &mut matcher);
    matches.retain(|(_, score)| *score >= MIN_SCORE);
    // match_list does not rank; order by score before taking the top.
    matches.sort_by(|a, b| b.1.cmp(&a.1));
    matches.truncate(MAX_SUGGESTIONS);
    matches
        .into_iter()
        .map(|(candidate, _)| candidate.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec![
            "anthropic/claude-sonnet-4-5".to_string(),
            "anthropic/claude-haiku-4-5".to_string(),
            "anthropic/claude-opus-4-5".to_string(),
            "openai/gpt-5".to_string(),
            "openai/gpt-5-mini".to_string(),
            "google/gemini-3-pro".to_string(),
            "ollama/llama3.1:8b-instruct".to_string(),
        ]
    }

    #[test]
    fn test_close_match_found() {
        let results = suggestions(&candidates(), "claude-sonet");
        assert!(!results.is_empty());
        assert_eq!(results[0], "anthropic/claude-sonnet-4-5");
    }

    #[test]
    fn test_at_most_three() {
        let results = suggestions(&candidates(), "claude");
        assert!(results.len() <= 3);
        assert!(!results.is_empty());
    }

    #[test]
    fn test_best_match_first_regardless_of_input_order() {
        // The strong (contiguous) match is listed after a weak
        // (scattered-subsequence) one; ranking must still put it first.
        let candidates = vec![
            "ide/heavy-mover".to_string(),
            "ide/hover".to_string(),
        ];
        let results = suggestions(&candidates, "hover");
        assert_eq!(results[0], "ide/hover");
    }

    #[test]
    fn test_garbage_query_empty() {
        let results = suggestions(&candidates(), "zzqqxxvv");
        assert!(results.is_empty());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(suggestions(&[], "claude").is_empty());
        assert!(suggestions(&candidates(), "").is_empty());
    }

    #[test]
    fn test_case_insensitive() {
        let results = suggestions(&candidates(), "GPT-5");
        assert!(results.iter().any(|r| r == "openai/gpt-5"));
    }
}
