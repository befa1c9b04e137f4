use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TrailError;
use super::generation::{plan_artifacts, ContentGenerator, GeneratedArtifact, TemplateGenerator};
use super::intent::{IntentParser, KeywordIntentParser, LearningIntent};
use super::parser::CodeParser;
use super::relationships::{CompositeAnalysis, Orchestrator};
use super::relevance::{CandidateFile, RelevanceScorer, RepoContext, Selection};
use super::source::{FsSource, SourceProvider};
use super::traceability::{ArtifactTrace, JsonFileStore, TraceabilityLedger};

/// Main orchestration engine: goal in, verified learning artifacts out
pub struct Engine {
    config: Config,
    parser: Arc<CodeParser>,
    source: Arc<FsSource>,
    scorer: RelevanceScorer,
    intent_parser: Box<dyn IntentParser>,
    generator: Box<dyn ContentGenerator>,
    ledger: TraceabilityLedger,
    store: JsonFileStore,
}

impl Engine {
    /// Create an engine over the repository at `repo`, restoring any saved ledger
    pub async fn new(config_path: Option<&Path>, repo: &Path) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Self::with_config(config, repo)
    }

    pub fn with_config(config: Config, repo: &Path) -> Result<Self> {
        let parser = Arc::new(CodeParser::new(&config.parsing)?);
        let source = Arc::new(
            FsSource::new(repo)
                .with_ignore_patterns(&config.project.ignore_patterns)
                .with_max_file_size(config.parsing.max_file_size),
        );
        let scorer = RelevanceScorer::default().with_extra_excluded(&config.relevance.extra_excluded_paths);

        let generator: Box<dyn ContentGenerator> = match &config.generation.template_dir {
            Some(dir) => Box::new(TemplateGenerator::with_template_dir(dir)?),
            None => Box::new(TemplateGenerator::new()?),
        };

        let ledger = TraceabilityLedger::new(source.clone());
        let store = JsonFileStore::new(&config.ledger.store_dir);
        ledger
            .load(&store)
            .with_context(|| format!("Failed to load ledger from {}", config.ledger.store_dir.display()))?;
        debug!("Ledger holds {} artifacts", ledger.artifact_ids().len());

        Ok(Self {
            config,
            parser,
            source,
            scorer,
            intent_parser: Box::new(KeywordIntentParser::new()),
            generator,
            ledger,
            store,
        })
    }

    pub fn ledger(&self) -> &TraceabilityLedger {
        &self.ledger
    }

    /// Rank repository files against a learning goal
    pub async fn select(&self, goal: &str, scope: &[String]) -> Result<(LearningIntent, Selection)> {
        let intent = self.intent_parser.parse_intent(goal, scope);
        info!("🎯 Selecting files for \"{}\" (keywords: {})", goal, intent.keywords.join(", "));

        let candidates = self.candidates()?;
        let ctx = RepoContext::from_candidates(&candidates);
        let selection = self
            .scorer
            .select(&candidates, &intent, &ctx, self.config.relevance.threshold)?;

        info!(
            "Selected {} of {} files ({} below threshold, {} excluded)",
            selection.selected.len(),
            candidates.len(),
            selection.below_threshold,
            selection.excluded.len()
        );
        Ok((intent, selection))
    }

    /// Select, then run the multi-file analysis over the selection
    pub async fn analyze(&self, goal: &str, scope: &[String]) -> Result<(LearningIntent, CompositeAnalysis)> {
        let (intent, selection) = self.select(goal, scope).await?;

        info!("🔗 Analyzing {} selected files...", selection.selected.len());
        let orchestrator = Orchestrator::new(self.parser.clone(), self.source.clone(), &self.config.analysis);
        let analysis = orchestrator.analyze_selection(&selection).await?;

        let stats = &analysis.stats;
        info!("📊 Analysis finished in {:?} state:", analysis.state());
        info!("  - {} of {} files analyzed", stats.analyzed_files, stats.requested_files);
        info!("  - {} relationships, {} graph edges", stats.graph.relationships, stats.graph.edges);
        info!("  - {} data flows", stats.data_flows);
        info!("  - {} execution paths from {} entry points", stats.execution_paths, stats.entry_points);
        info!("  - {} patterns", stats.patterns);
        for failure in &analysis.failures {
            warn!("⚠️ Skipped {}", failure);
        }

        Ok((intent, analysis))
    }

    /// Generate one artifact per flow, path and pattern and register its evidence
    pub async fn explain(&self, goal: &str, scope: &[String], output: Option<PathBuf>) -> Result<Vec<GeneratedArtifact>> {
        let (intent, analysis) = self.analyze(goal, scope).await?;
        let output_dir = output.unwrap_or_else(|| self.config.generation.output_dir.clone());
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let requests = plan_artifacts(&analysis, &intent);
        info!("📝 Generating {} artifacts with the {} generator", requests.len(), self.generator.generator_name());

        let mut generated = Vec::new();
        for request in requests {
            // Evidence is checked before any text exists for the artifact
            match self.ledger.register(&request.artifact_id, request.kind, request.evidence.clone()) {
                Ok(trace) => debug!("{} backed by {} links", trace.artifact_id, trace.links.len()),
                Err(TrailError::Evidence { artifact_id, failure }) => {
                    warn!("⚠️ Dropping {}: {}", artifact_id, failure);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let content = self.generator.generate(&request).await?;
            let path = output_dir.join(format!("{}.md", request.artifact_id));
            std::fs::write(&path, &content).with_context(|| format!("Failed to write {}", path.display()))?;

            generated.push(GeneratedArtifact {
                artifact_id: request.artifact_id,
                kind: request.kind,
                title: request.title,
                content,
                evidence: request.evidence,
            });
        }

        self.save_ledger()?;
        info!("🎉 Wrote {} artifacts to {}", generated.len(), output_dir.display());
        Ok(generated)
    }

    pub fn trace(&self, artifact_id: &str) -> ArtifactTrace {
        self.ledger.get_trace(artifact_id)
    }

    /// Flag every artifact built on `file` as outdated
    pub fn invalidate(&self, file: &str) -> Result<Vec<String>> {
        let affected = self.ledger.invalidate(&repo_key(file));
        if !affected.is_empty() {
            self.save_ledger()?;
        }
        Ok(affected)
    }

    pub fn lookup(&self, file: &str, line: Option<usize>) -> Vec<String> {
        self.ledger.lookup_by_code(&repo_key(file), line)
    }

    /// Re-verify every valid link against the working tree
    pub fn check(&self) -> Result<Vec<String>> {
        let drifted = self.ledger.check_drift();
        if drifted.is_empty() {
            info!("✅ All evidence still matches the source");
        } else {
            warn!("⚠️ {} artifacts drifted from the source", drifted.len());
            self.save_ledger()?;
        }
        Ok(drifted)
    }

    pub fn revoke(&self, artifact_id: &str) -> Result<bool> {
        let revoked = self.ledger.revoke(artifact_id);
        if revoked {
            self.save_ledger()?;
        }
        Ok(revoked)
    }

    fn save_ledger(&self) -> Result<()> {
        self.ledger
            .save(&self.store)
            .with_context(|| format!("Failed to save ledger to {}", self.config.ledger.store_dir.display()))
    }

    /// Parseable files under the configured source directories
    fn candidates(&self) -> Result<Vec<CandidateFile>> {
        let mut candidates = Vec::new();
        for path in self.source.list_files()? {
            if !self.in_source_dirs(&path) || !self.parser.supports(&path) {
                continue;
            }
            match self.source.read_source(&path) {
                Ok(content) => candidates.push(CandidateFile::new(&path, &content)),
                Err(e) => debug!("Skipping unreadable candidate {}: {}", path, e),
            }
        }
        Ok(candidates)
    }

    fn in_source_dirs(&self, path: &str) -> bool {
        self.config.project.source_dirs.iter().any(|dir| {
            let prefix = repo_key(&dir.to_string_lossy());
            prefix.is_empty() || prefix == "." || path == prefix || path.starts_with(&format!("{}/", prefix))
        })
    }
}

/// Repository-relative key for a user-supplied path
fn repo_key(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized.trim_start_matches("./").trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traceability::TraceStatus;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Config) {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("a.py"), "import b\ndef main(payload):\n    return b.process(payload)\n").unwrap();
        std::fs::write(repo.join("b.py"), "def process(data):\n    return data\n").unwrap();

        let mut config = Config::default();
        config.relevance.threshold = 0.0;
        config.ledger.store_dir = temp_dir.path().join("session");
        config.generation.output_dir = temp_dir.path().join("artifacts");
        (temp_dir, config)
    }

    #[tokio::test]
    async fn test_explain_registers_and_persists_evidence() {
        let (temp_dir, config) = fixture();
        let repo = temp_dir.path().join("repo");

        let engine = Engine::with_config(config.clone(), &repo).unwrap();
        let artifacts = engine.explain("how payload gets processed", &[], None).await.unwrap();
        assert!(!artifacts.is_empty());

        for artifact in &artifacts {
            assert!(temp_dir.path().join("artifacts").join(format!("{}.md", artifact.artifact_id)).exists());
            assert_eq!(engine.trace(&artifact.artifact_id).status, TraceStatus::Valid);
        }
        assert!(!engine.lookup("./b.py", None).is_empty());

        // A fresh engine sees the saved ledger
        let reopened = Engine::with_config(config, &repo).unwrap();
        assert_eq!(reopened.ledger().artifact_ids(), engine.ledger().artifact_ids());

        let affected = reopened.invalidate("b.py").unwrap();
        assert!(!affected.is_empty());
        assert_eq!(reopened.trace(&affected[0]).status, TraceStatus::Outdated);

        // Explaining again re-verifies the same artifacts instead of piling up links
        let links_before = reopened.trace(&affected[0]).links.len();
        reopened.explain("how payload gets processed", &[], None).await.unwrap();
        let trace = reopened.trace(&affected[0]);
        assert_eq!(trace.status, TraceStatus::Valid);
        assert!(trace.links.len() <= links_before * 2);

        reopened.explain("how payload gets processed", &[], None).await.unwrap();
        assert_eq!(reopened.trace(&affected[0]).links.len(), trace.links.len());
    }

    #[tokio::test]
    async fn test_check_reports_edited_sources() {
        let (temp_dir, config) = fixture();
        let repo = temp_dir.path().join("repo");

        let engine = Engine::with_config(config, &repo).unwrap();
        engine.explain("how payload gets processed", &[], None).await.unwrap();
        assert!(engine.check().unwrap().is_empty());

        std::fs::write(repo.join("b.py"), "def process(data, strict):\n    return data\n").unwrap();
        let drifted = engine.check().unwrap();
        assert!(!drifted.is_empty());
        assert!(drifted.iter().all(|id| engine.trace(id).status == TraceStatus::Outdated));
    }

    #[test]
    fn test_repo_key_normalizes_user_paths() {
        assert_eq!(repo_key("./src/app.py"), "src/app.py");
        assert_eq!(repo_key("src\\app.py"), "src/app.py");
        assert_eq!(repo_key("src/"), "src");
    }
}
