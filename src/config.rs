use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TrailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Source code parsing configuration
    pub parsing: ParsingConfig,

    /// File selection against a learning goal
    pub relevance: RelevanceConfig,

    /// Multi-file analysis limits
    pub analysis: AnalysisConfig,

    /// Traceability ledger persistence
    pub ledger: LedgerConfig,

    /// Artifact generation settings
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Directories, relative to the repository root, that candidate files are drawn from
    pub source_dirs: Vec<PathBuf>,

    /// Glob patterns to ignore in addition to .gitignore
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// Languages to support
    pub languages: Vec<String>,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Minimum score a file needs to be selected
    pub threshold: f32,

    /// Extra path fragments treated as config/build/dependency files
    pub extra_excluded_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum number of steps in one execution path
    pub max_depth: usize,

    /// Upper bound on execution paths traced from a single entry point
    pub max_paths_per_entry: usize,

    /// Per-file analysis timeout in milliseconds
    pub file_timeout_ms: u64,

    /// Worker pool size; defaults to available parallelism
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the persisted session state
    pub store_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Directory of `<name>.md.tera` files overriding the built-in templates
    pub template_dir: Option<PathBuf>,

    /// Where rendered artifacts are written
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                name: "Unnamed Project".to_string(),
                source_dirs: vec![PathBuf::from(".")],
                ignore_patterns: vec![
                    "target/".to_string(),
                    "node_modules/".to_string(),
                    ".git/".to_string(),
                    "*.tmp".to_string(),
                ],
            },
            parsing: ParsingConfig {
                languages: vec!["rust".to_string(), "python".to_string(), "javascript".to_string()],
                max_file_size: 1024 * 1024, // 1MB
            },
            relevance: RelevanceConfig {
                threshold: 0.5,
                extra_excluded_paths: vec![],
            },
            analysis: AnalysisConfig {
                max_depth: 5,
                max_paths_per_entry: 16,
                file_timeout_ms: 5_000,
                max_workers: None,
            },
            ledger: LedgerConfig {
                store_dir: PathBuf::from(".codetrail"),
            },
            generation: GenerationConfig {
                template_dir: None,
                output_dir: PathBuf::from(".codetrail/artifacts"),
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TrailError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TrailError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = [
                    "Codetrail.toml",
                    "codetrail.toml",
                    ".codetrail.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.relevance.threshold) {
            return Err(TrailError::Config(format!(
                "relevance.threshold must be within [0, 1], got {}",
                self.relevance.threshold
            )));
        }
        if self.analysis.max_depth == 0 {
            return Err(TrailError::Config("analysis.max_depth must be at least 1".to_string()));
        }
        if self.analysis.max_workers == Some(0) {
            return Err(TrailError::Config("analysis.max_workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codetrail.toml");

        let mut config = Config::default();
        config.project.name = "learning-kit".to_string();
        config.analysis.max_depth = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.project.name, "learning-kit");
        assert_eq!(loaded.analysis.max_depth, 7);
        assert_eq!(loaded.relevance.threshold, 0.5);
    }

    #[test]
    fn test_missing_explicit_path_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.analysis.max_depth, 5);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codetrail.toml");

        let mut config = Config::default();
        config.relevance.threshold = 1.5;
        config.save(&path).unwrap();

        assert!(matches!(Config::load(&path), Err(TrailError::Config(_))));
    }
}
