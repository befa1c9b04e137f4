//! Relevance scoring of candidate files against a learning goal.
//!
//! The total score is a weighted sum of four sub-scores. Every sub-score is
//! clamped to `[0, 1]` before weighting and the weights sum to one, so the total
//! stays in `[0, 1]` without a final clamp.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TrailError, Result};
use super::intent::LearningIntent;

pub const NAME_WEIGHT: f32 = 0.30;
pub const PATH_WEIGHT: f32 = 0.20;
pub const CONTENT_WEIGHT: f32 = 0.30;
pub const STRUCTURAL_WEIGHT: f32 = 0.20;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

const EXCLUDED_DIRS: &[&str] = &[
    "node_modules", "target", "dist", "build", "vendor", ".git", "__pycache__", ".venv", "venv",
    ".idea", ".vscode", ".tox",
];

const EXCLUDED_FILES: &[&str] = &[
    "cargo.toml", "cargo.lock", "package.json", "package-lock.json", "yarn.lock",
    "pnpm-lock.yaml", "requirements.txt", "setup.py", "setup.cfg", "pyproject.toml", "pipfile",
    "pipfile.lock", "poetry.lock", "makefile", "dockerfile", "docker-compose.yml",
    "tsconfig.json", "webpack.config.js", "babel.config.js", ".gitignore", ".editorconfig",
];

const EXCLUDED_EXTENSIONS: &[&str] = &["lock", "toml", "ini", "cfg", "yaml", "yml", "json", "xml"];

const ENTRY_STEMS: &[&str] = &["main", "__main__", "app", "index", "server", "cli", "lib"];

/// A file offered for selection, with its current text
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: String,
    pub content: String,
}

impl CandidateFile {
    pub fn new(path: &str, content: &str) -> Self {
        Self {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn stem(&self) -> String {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        file_name
            .split('.')
            .next()
            .unwrap_or(file_name)
            .to_lowercase()
    }
}

/// Repository-wide facts a single file cannot tell on its own
#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    /// How many other candidates import a file, keyed by file stem
    importer_counts: HashMap<String, usize>,
}

impl RepoContext {
    pub fn from_candidates(candidates: &[CandidateFile]) -> Self {
        let import_line = Regex::new(r"^\s*(import|from|use|mod|const|let|var)\b")
            .expect("Invalid import line regex");
        let stems: Vec<String> = candidates.iter().map(|c| c.stem()).collect();

        let mut importer_counts = HashMap::new();
        for stem in stems.iter().filter(|s| s.len() > 1) {
            let word = match Regex::new(&format!(r"\b{}\b", regex::escape(stem))) {
                Ok(word) => word,
                Err(_) => continue,
            };
            let importers = candidates
                .iter()
                .filter(|c| &c.stem() != stem)
                .filter(|c| {
                    c.content
                        .lines()
                        .any(|line| import_line.is_match(line) && word.is_match(line))
                })
                .count();
            importer_counts.insert(stem.clone(), importers);
        }

        Self { importer_counts }
    }

    pub fn importer_count(&self, stem: &str) -> usize {
        self.importer_counts.get(stem).copied().unwrap_or(0)
    }
}

/// Pluggable judgment of how relevant a file's content is to the intent
pub trait ContentRelevance: Send + Sync {
    /// Relevance in `[0, 1]`; out-of-range values are clamped by the scorer
    fn relevance(&self, file: &CandidateFile, intent: &LearningIntent) -> f32;
}

/// Fraction of intent keywords that occur in the file content
pub struct KeywordDensity;

impl ContentRelevance for KeywordDensity {
    fn relevance(&self, file: &CandidateFile, intent: &LearningIntent) -> f32 {
        if intent.keywords.is_empty() {
            return 0.0;
        }
        let content = file.content.to_lowercase();
        let found = intent
            .keywords
            .iter()
            .filter(|keyword| content.contains(keyword.as_str()))
            .count();
        found as f32 / intent.keywords.len() as f32
    }
}

/// Structural importance class; lower ranks win score ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralRole {
    EntryPoint,
    CoreLogic,
    Support,
    Peripheral,
}

impl StructuralRole {
    fn base_score(self) -> f32 {
        match self {
            StructuralRole::EntryPoint => 1.0,
            StructuralRole::CoreLogic => 0.7,
            StructuralRole::Support => 0.4,
            StructuralRole::Peripheral => 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub total: f32,
    pub name_match: f32,
    pub path_match: f32,
    pub content_match: f32,
    pub structural: f32,
    pub role: StructuralRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedFile {
    pub path: String,
    pub score: RelevanceScore,
    /// 1 is the most relevant file
    pub priority: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub selected: Vec<SelectedFile>,
    pub threshold: f32,
    /// Files that were scored but did not reach the threshold
    pub below_threshold: usize,
    /// Config/build/dependency paths removed before scoring
    pub excluded: Vec<String>,
}

impl Selection {
    pub fn paths(&self) -> Vec<String> {
        self.selected.iter().map(|f| f.path.clone()).collect()
    }
}

pub struct RelevanceScorer {
    content: Box<dyn ContentRelevance>,
    extra_excluded: Vec<String>,
    entry_marker: Regex,
    definition: Regex,
}

impl RelevanceScorer {
    pub fn new(content: Box<dyn ContentRelevance>) -> Self {
        Self {
            content,
            extra_excluded: Vec::new(),
            entry_marker: Regex::new(
                r#"(?m)(^\s*(pub\s+)?(async\s+)?fn\s+main\s*\(|^if\s+__name__\s*==|require\.main\s*===\s*module)"#,
            )
            .expect("Invalid entry marker regex"),
            definition: Regex::new(
                r"(?m)^\s*(export\s+)?(pub(\([^)]*\))?\s+)?(async\s+)?(def|fn|class|function|struct|trait|impl|enum)\b",
            )
            .expect("Invalid definition regex"),
        }
    }

    pub fn with_extra_excluded(mut self, fragments: &[String]) -> Self {
        self.extra_excluded = fragments.to_vec();
        self
    }

    /// Score one file against the intent
    pub fn score(&self, file: &CandidateFile, intent: &LearningIntent, ctx: &RepoContext) -> RelevanceScore {
        let name_match = unit_interval(self.name_match(file, intent));
        let path_match = unit_interval(self.path_match(file, intent));
        let content_match = unit_interval(self.content.relevance(file, intent));
        let role = self.structural_role(file, ctx);
        let structural = unit_interval(self.structural_importance(file, role, ctx));

        let total = NAME_WEIGHT * name_match
            + PATH_WEIGHT * path_match
            + CONTENT_WEIGHT * content_match
            + STRUCTURAL_WEIGHT * structural;

        RelevanceScore {
            total,
            name_match,
            path_match,
            content_match,
            structural,
            role,
        }
    }

    /// Keep files scoring at least `threshold`, ranked by score then structural role
    pub fn select(
        &self,
        candidates: &[CandidateFile],
        intent: &LearningIntent,
        ctx: &RepoContext,
        threshold: f32,
    ) -> Result<Selection> {
        let mut excluded = Vec::new();
        let mut scored = Vec::new();

        for file in candidates {
            if self.is_excluded_category(&file.path) && !intent.names_path(&file.path) {
                excluded.push(file.path.clone());
                continue;
            }
            let score = self.score(file, intent, ctx);
            debug!("Scored {}: {:.3} ({:?})", file.path, score.total, score.role);
            scored.push((file.path.clone(), score));
        }

        let best_score = scored.iter().map(|(_, s)| s.total).fold(0.0_f32, f32::max);
        let (mut kept, below): (Vec<_>, Vec<_>) =
            scored.into_iter().partition(|(_, score)| score.total >= threshold);

        if kept.is_empty() {
            return Err(TrailError::NoRelevantFiles {
                below_threshold: below.len(),
                excluded: excluded.len(),
                best_score,
            });
        }

        kept.sort_by(|(path_a, a), (path_b, b)| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(Ordering::Equal)
                .then(a.role.cmp(&b.role))
                .then(path_a.cmp(path_b))
        });

        let selected = kept
            .into_iter()
            .enumerate()
            .map(|(i, (path, score))| SelectedFile {
                path,
                score,
                priority: i + 1,
            })
            .collect();

        Ok(Selection {
            selected,
            threshold,
            below_threshold: below.len(),
            excluded,
        })
    }

    /// Recognized config/build/dependency paths
    pub fn is_excluded_category(&self, path: &str) -> bool {
        let lowered = path.to_lowercase();
        let segments: Vec<&str> = lowered.split('/').collect();
        let Some((file_name, dirs)) = segments.split_last() else {
            return false;
        };

        if dirs.iter().any(|dir| EXCLUDED_DIRS.contains(dir)) || EXCLUDED_FILES.contains(file_name) {
            return true;
        }
        if let Some((_, extension)) = file_name.rsplit_once('.') {
            if EXCLUDED_EXTENSIONS.contains(&extension) {
                return true;
            }
        }
        self.extra_excluded.iter().any(|fragment| lowered.contains(&fragment.to_lowercase()))
    }

    fn name_match(&self, file: &CandidateFile, intent: &LearningIntent) -> f32 {
        let stem = file.stem();
        let tokens: Vec<&str> = stem.split(['_', '-']).filter(|t| !t.is_empty()).collect();

        intent
            .keywords
            .iter()
            .map(|keyword| {
                if stem == *keyword || tokens.contains(&keyword.as_str()) {
                    1.0
                } else if keyword.len() >= 4 && (stem.contains(keyword.as_str()) || keyword.contains(stem.as_str())) {
                    0.6
                } else {
                    0.0
                }
            })
            .fold(0.0_f32, f32::max)
    }

    fn path_match(&self, file: &CandidateFile, intent: &LearningIntent) -> f32 {
        let lowered = file.path.to_lowercase();
        if !intent.scope.is_empty() {
            let in_scope = intent
                .scope
                .iter()
                .any(|prefix| lowered.starts_with(&prefix.to_lowercase()));
            return if in_scope { 1.0 } else { 0.0 };
        }

        let dirs: Vec<&str> = lowered.split('/').collect();
        let dirs = &dirs[..dirs.len().saturating_sub(1)];
        if dirs.iter().any(|dir| intent.keywords.iter().any(|k| k == dir)) {
            1.0
        } else {
            // No scope given: the whole repository is in scope, but nothing points here
            0.5
        }
    }

    fn structural_role(&self, file: &CandidateFile, ctx: &RepoContext) -> StructuralRole {
        let lowered = file.path.to_lowercase();
        let stem = file.stem();
        let peripheral = lowered
            .split('/')
            .any(|segment| matches!(segment, "test" | "tests" | "spec" | "docs" | "examples" | "benches"))
            || stem.starts_with("test_")
            || stem.ends_with("_test")
            || lowered.contains(".test.")
            || lowered.contains(".spec.");

        if peripheral {
            StructuralRole::Peripheral
        } else if self.entry_marker.is_match(&file.content) || ENTRY_STEMS.contains(&stem.as_str()) {
            StructuralRole::EntryPoint
        } else if self.definition.find_iter(&file.content).count() >= 3 || ctx.importer_count(&stem) >= 2 {
            StructuralRole::CoreLogic
        } else {
            StructuralRole::Support
        }
    }

    fn structural_importance(&self, file: &CandidateFile, role: StructuralRole, ctx: &RepoContext) -> f32 {
        let importers = ctx.importer_count(&file.stem()).min(3) as f32;
        (role.base_score() + 0.1 * importers).min(1.0)
    }
}

/// Clamp into `[0, 1]`; NaN and infinities count as no signal
fn unit_interval(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(Box::new(KeywordDensity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Content relevance that always answers out of range
    struct Overeager;

    impl ContentRelevance for Overeager {
        fn relevance(&self, _file: &CandidateFile, _intent: &LearningIntent) -> f32 {
            7.5
        }
    }

    struct Undefined;

    impl ContentRelevance for Undefined {
        fn relevance(&self, _file: &CandidateFile, _intent: &LearningIntent) -> f32 {
            f32::NAN
        }
    }

    fn repo() -> Vec<CandidateFile> {
        vec![
            CandidateFile::new("src/main.py", "from parser import parse\n\nif __name__ == '__main__':\n    parse('x')\n"),
            CandidateFile::new("src/parser.py", "\"\"\"Whitespace parser.\"\"\"\n\ndef parse(text):\n    return tokenize(text)\n\ndef tokenize(text):\n    return text.split()\n\nclass ParseError(Exception):\n    pass\n"),
            CandidateFile::new("src/colors.py", "RED = 1\n"),
            CandidateFile::new("tests/test_parser.py", "from parser import parse\n\ndef test_parse():\n    assert parse('a')\n"),
            CandidateFile::new("pyproject.toml", "[tool.parser]\n"),
        ]
    }

    #[test]
    fn test_score_is_bounded_even_with_misbehaving_content_relevance() {
        let scorer = RelevanceScorer::new(Box::new(Overeager));
        let files = repo();
        let ctx = RepoContext::from_candidates(&files);
        let intent = LearningIntent::new("parser parser parser", &["parser", "parse", "main"], &["src/"]);

        for file in &files {
            let score = scorer.score(file, &intent, &ctx);
            assert!((0.0..=1.0).contains(&score.total), "{} scored {}", file.path, score.total);
            assert_eq!(score.content_match, 1.0);
        }

        let not_a_number = RelevanceScorer::new(Box::new(Undefined));
        for file in &files {
            let score = not_a_number.score(file, &intent, &ctx);
            assert!((0.0..=1.0).contains(&score.total), "{} scored {}", file.path, score.total);
            assert_eq!(score.content_match, 0.0);
        }
    }

    #[test]
    fn test_select_ranks_and_counts() {
        let scorer = RelevanceScorer::default();
        let files = repo();
        let ctx = RepoContext::from_candidates(&files);
        let intent = LearningIntent::new("how the parser works", &["parser"], &[]);

        let selection = scorer.select(&files, &intent, &ctx, DEFAULT_THRESHOLD).unwrap();

        assert_eq!(selection.selected[0].path, "src/parser.py");
        assert_eq!(selection.selected[0].priority, 1);
        assert_eq!(selection.excluded, vec!["pyproject.toml".to_string()]);
        assert!(!selection.paths().contains(&"src/colors.py".to_string()));
        assert_eq!(
            selection.selected.len() + selection.below_threshold + selection.excluded.len(),
            files.len()
        );
        for pair in selection.selected.windows(2) {
            assert!(pair[0].score.total >= pair[1].score.total);
        }
    }

    #[test]
    fn test_entry_point_outranks_same_named_helper() {
        struct Flat;
        impl ContentRelevance for Flat {
            fn relevance(&self, _file: &CandidateFile, _intent: &LearningIntent) -> f32 {
                1.0
            }
        }

        let scorer = RelevanceScorer::new(Box::new(Flat));
        let files = vec![
            CandidateFile::new("a/helpers.py", "X = 1\n"),
            CandidateFile::new("b/helpers.py", "if __name__ == '__main__':\n    pass\n"),
        ];
        let ctx = RepoContext::default();
        let intent = LearningIntent::new("helpers", &["helpers"], &[]);

        let selection = scorer.select(&files, &intent, &ctx, 0.0).unwrap();
        assert_eq!(selection.selected[0].path, "b/helpers.py");
        assert_eq!(selection.selected[0].score.role, StructuralRole::EntryPoint);
    }

    #[test]
    fn test_nothing_relevant_is_an_explicit_error() {
        let scorer = RelevanceScorer::default();
        let files = repo();
        let ctx = RepoContext::from_candidates(&files);
        let intent = LearningIntent::new("quantum chromodynamics", &["quark", "gluon"], &["physics/"]);

        let err = scorer.select(&files, &intent, &ctx, DEFAULT_THRESHOLD).unwrap_err();
        match err {
            TrailError::NoRelevantFiles { below_threshold, excluded, .. } => {
                assert_eq!(below_threshold, 4);
                assert_eq!(excluded, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_excluded_category_kept_when_scope_names_it() {
        let scorer = RelevanceScorer::default();
        let files = vec![CandidateFile::new("pyproject.toml", "[tool.parser]\nname = 'parser'\n")];
        let ctx = RepoContext::default();
        let intent = LearningIntent::new("packaging", &["parser"], &["pyproject.toml"]);

        let selection = scorer.select(&files, &intent, &ctx, 0.1).unwrap();
        assert!(selection.excluded.is_empty());
        assert_eq!(selection.selected.len(), 1);
    }
}
