//! Learning intent: the structured form of a learning goal.
//!
//! Natural-language understanding lives outside this crate; anything that can
//! turn a goal into keywords and a path scope implements [`IntentParser`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningIntent {
    /// The goal as the learner phrased it
    pub goal: String,
    /// Lower-cased terms the goal is about
    pub keywords: Vec<String>,
    /// Path prefixes the learner explicitly asked about
    pub scope: Vec<String>,
}

impl LearningIntent {
    pub fn new(goal: &str, keywords: &[&str], scope: &[&str]) -> Self {
        Self {
            goal: goal.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            scope: scope.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether the scope or keywords name this path explicitly
    pub fn names_path(&self, path: &str) -> bool {
        let lowered = path.to_lowercase();
        let file_name = lowered.rsplit('/').next().unwrap_or(&lowered);
        self.scope.iter().any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
            || self.keywords.iter().any(|k| k == file_name)
    }
}

pub trait IntentParser: Send + Sync {
    fn parse_intent(&self, goal: &str, scope: &[String]) -> LearningIntent;
}

/// Splits a goal into keywords, dropping stop words and short tokens
pub struct KeywordIntentParser {
    stop_words: Vec<&'static str>,
}

impl KeywordIntentParser {
    pub fn new() -> Self {
        Self {
            stop_words: vec![
                "a", "an", "and", "are", "as", "at", "be", "by", "code", "does", "for", "from",
                "how", "i", "in", "is", "it", "learn", "me", "of", "on", "or", "show", "the",
                "this", "to", "understand", "want", "what", "where", "which", "why", "with",
                "work", "works",
            ],
        }
    }
}

impl Default for KeywordIntentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentParser for KeywordIntentParser {
    fn parse_intent(&self, goal: &str, scope: &[String]) -> LearningIntent {
        let mut keywords: Vec<String> = Vec::new();
        for token in goal.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.')) {
            let token = token.trim_matches('.').to_lowercase();
            if token.len() < 3 || self.stop_words.contains(&token.as_str()) {
                continue;
            }
            if !keywords.contains(&token) {
                keywords.push(token);
            }
        }

        LearningIntent {
            goal: goal.to_string(),
            keywords,
            scope: scope.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_skip_stop_words_and_duplicates() {
        let intent = KeywordIntentParser::new()
            .parse_intent("How does the Parser build the AST? parser errors", &[]);
        assert_eq!(intent.keywords, vec!["parser", "build", "ast", "errors"]);
    }

    #[test]
    fn test_names_path_by_scope_or_file_name() {
        let intent = LearningIntent::new("build setup", &["cargo.toml"], &["config/"]);
        assert!(intent.names_path("config/settings.yaml"));
        assert!(intent.names_path("Cargo.toml"));
        assert!(!intent.names_path("src/main.rs"));
    }
}
