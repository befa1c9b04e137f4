use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{FailureReason, FileFailure, Result, TrailError};
use super::super::parser::{FileAnalysis, FileAnalyzer};
use super::super::relevance::Selection;
use super::super::source::SourceProvider;
use super::super::traceability::CodeEvidence;
use super::{
    extract_data_flows, DataFlow, EntryPoint, EntryPointDetector, ExecutionPath, GraphStats, PathTracer, Pattern,
    PatternDetector, Relationship, RelationshipDetector, RelationshipGraph,
};

/// Stages a successful run passes through; total failure is reported as an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    PerFileAnalyzing,
    RelationshipDetecting,
    GraphBuilding,
    FlowExtracting,
    PatternDetecting,
    Complete,
    PartialComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub requested_files: usize,
    pub analyzed_files: usize,
    pub failed_files: usize,
    pub graph: GraphStats,
    pub data_flows: usize,
    pub entry_points: usize,
    pub execution_paths: usize,
    pub patterns: usize,
    pub analysis_time_ms: u64,
}

/// Everything one multi-file run produced; read-only once returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeAnalysis {
    /// Files the run was asked to analyze, sorted
    pub files: Vec<String>,
    pub analyses: BTreeMap<String, FileAnalysis>,
    pub failures: Vec<FileFailure>,
    pub relationships: Vec<Relationship>,
    pub graph: RelationshipGraph,
    pub data_flows: Vec<DataFlow>,
    pub entry_points: Vec<EntryPoint>,
    pub execution_paths: Vec<ExecutionPath>,
    pub patterns: Vec<Pattern>,
    pub state_history: Vec<AnalysisState>,
    pub stats: AnalysisStats,
}

impl CompositeAnalysis {
    pub fn state(&self) -> AnalysisState {
        self.state_history.last().copied().unwrap_or(AnalysisState::Pending)
    }

    pub fn data_flow(&self, id: &str) -> Option<&DataFlow> {
        self.data_flows.iter().find(|f| f.id == id)
    }

    pub fn execution_path(&self, id: &str) -> Option<&ExecutionPath> {
        self.execution_paths.iter().find(|p| p.id == id)
    }

    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    /// Cut evidence for `line_start..=line_end` of an analyzed file
    pub fn evidence(&self, file: &str, line_start: usize, line_end: usize, context: &str) -> Option<CodeEvidence> {
        let analysis = self.analyses.get(file)?;
        if line_start == 0 || line_start > line_end || line_end > analysis.line_count {
            return None;
        }
        Some(CodeEvidence::new(
            file,
            line_start,
            line_end,
            analysis.lines(line_start, line_end),
            context,
        ))
    }

    /// The call site and the definition it reaches
    pub fn evidence_for_flow(&self, flow: &DataFlow) -> Vec<CodeEvidence> {
        let definition_end = self
            .analyses
            .get(&flow.end.file)
            .and_then(|a| a.function_at(flow.end.line))
            .filter(|f| f.line_start == flow.end.line)
            .map(|f| f.line_end)
            .unwrap_or(flow.end.line);

        [
            self.evidence(&flow.start.file, flow.start.line, flow.start.line, &format!("Data leaves {}", flow.start.file)),
            self.evidence(&flow.end.file, flow.end.line, definition_end, &format!("Data arrives in {}", flow.end.file)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn evidence_for_path(&self, path: &ExecutionPath) -> Vec<CodeEvidence> {
        path.steps
            .iter()
            .filter_map(|step| self.evidence(&step.file, step.line, step.line, &step.description))
            .collect()
    }

    pub fn evidence_for_pattern(&self, pattern: &Pattern) -> Vec<CodeEvidence> {
        pattern
            .anchors
            .iter()
            .filter_map(|anchor| {
                self.evidence(&anchor.file, anchor.line, anchor.line, &format!("{} participant", pattern.kind))
            })
            .collect()
    }
}

/// Drives per-file analysis and the cross-file stages for one selection
pub struct Orchestrator {
    analyzer: Arc<dyn FileAnalyzer>,
    source: Arc<dyn SourceProvider>,
    detector: RelationshipDetector,
    entry_point_detector: EntryPointDetector,
    path_tracer: PathTracer,
    pattern_detector: PatternDetector,
    file_timeout: Duration,
    max_workers: usize,
}

impl Orchestrator {
    pub fn new(analyzer: Arc<dyn FileAnalyzer>, source: Arc<dyn SourceProvider>, config: &AnalysisConfig) -> Self {
        let max_workers = config
            .max_workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
            .max(1);

        Self {
            analyzer,
            source,
            detector: RelationshipDetector::new(),
            entry_point_detector: EntryPointDetector::new(),
            path_tracer: PathTracer::new(config.max_depth, config.max_paths_per_entry),
            pattern_detector: PatternDetector::new(),
            file_timeout: Duration::from_millis(config.file_timeout_ms),
            max_workers,
        }
    }

    pub fn with_pattern_detector(mut self, pattern_detector: PatternDetector) -> Self {
        self.pattern_detector = pattern_detector;
        self
    }

    pub async fn analyze_selection(&self, selection: &Selection) -> Result<CompositeAnalysis> {
        self.analyze_files(&selection.paths()).await
    }

    /// Analyze a batch; fails only when no file could be analyzed.
    ///
    /// There is no `Failed` state in the returned history: a run that fails
    /// outright returns `Err(TrailError::AnalysisFailed)` carrying every
    /// per-file failure instead of a `CompositeAnalysis`.
    pub async fn analyze_files(&self, paths: &[String]) -> Result<CompositeAnalysis> {
        let start_time = Instant::now();
        let mut history = vec![AnalysisState::Pending];
        let files: Vec<String> = paths.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();

        if files.is_empty() {
            return Err(TrailError::AnalysisFailed {
                failures: vec![FileFailure {
                    path: String::new(),
                    reason: FailureReason::EmptyBatch,
                    message: "no files were selected for analysis".to_string(),
                }],
            });
        }

        info!("🔍 Analyzing {} files with {} workers", files.len(), self.max_workers);
        history.push(AnalysisState::PerFileAnalyzing);
        let (analyses, failures) = self.analyze_each(&files).await;

        if analyses.is_empty() {
            warn!("Every file in the batch failed analysis");
            return Err(TrailError::AnalysisFailed { failures });
        }
        if !failures.is_empty() {
            info!("{} of {} files failed and are excluded", failures.len(), files.len());
        }

        history.push(AnalysisState::RelationshipDetecting);
        let relationships = self.detector.detect(&analyses);

        history.push(AnalysisState::GraphBuilding);
        let analyzed: Vec<String> = analyses.keys().cloned().collect();
        let graph = RelationshipGraph::build(relationships.clone(), &analyzed);
        let graph_stats = graph.stats();
        info!(
            "🕸️ Graph: {} files, {} edges, {} cyclic groups",
            graph_stats.nodes, graph_stats.edges, graph_stats.cyclic_groups
        );

        history.push(AnalysisState::FlowExtracting);
        let data_flows = extract_data_flows(&graph, &analyses);
        let entry_points = self.entry_point_detector.detect_entry_points(&graph, &analyses);
        let execution_paths = self.path_tracer.trace_all_paths(&graph, &analyses, &entry_points);
        debug!(
            "Extracted {} data flows and {} execution paths from {} entry points",
            data_flows.len(),
            execution_paths.len(),
            entry_points.len()
        );

        history.push(AnalysisState::PatternDetecting);
        let patterns = self.pattern_detector.detect(&graph, &analyses);

        history.push(if failures.is_empty() {
            AnalysisState::Complete
        } else {
            AnalysisState::PartialComplete
        });

        let stats = AnalysisStats {
            requested_files: files.len(),
            analyzed_files: analyses.len(),
            failed_files: failures.len(),
            graph: graph_stats,
            data_flows: data_flows.len(),
            entry_points: entry_points.len(),
            execution_paths: execution_paths.len(),
            patterns: patterns.len(),
            analysis_time_ms: start_time.elapsed().as_millis() as u64,
        };
        info!("✅ Analysis finished in {}ms", stats.analysis_time_ms);

        Ok(CompositeAnalysis {
            files,
            analyses,
            failures,
            relationships,
            graph,
            data_flows,
            entry_points,
            execution_paths,
            patterns,
            state_history: history,
            stats,
        })
    }

    /// Analyze every file on the bounded pool; each file lands in exactly one of the two outputs
    async fn analyze_each(&self, files: &[String]) -> (BTreeMap<String, FileAnalysis>, Vec<FileFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for path in files {
            let path = path.clone();
            let semaphore = Arc::clone(&semaphore);
            let analyzer = Arc::clone(&self.analyzer);
            let source = Arc::clone(&self.source);
            let file_timeout = self.file_timeout;

            tasks.spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (path.clone(), Err(failure(&path, FailureReason::Unreadable, e.to_string()))),
                };

                let job_path = path.clone();
                let job = tokio::task::spawn_blocking(move || -> Result<FileAnalysis> {
                    // A timed-out job keeps its worker slot until it actually returns
                    let _permit = permit;
                    let content = source.read_source(&job_path)?;
                    analyzer.analyze(&job_path, &content)
                });

                let outcome = match tokio::time::timeout(file_timeout, job).await {
                    Ok(Ok(Ok(analysis))) => Ok(analysis),
                    Ok(Ok(Err(e))) => Err(classify(&path, e)),
                    Ok(Err(join_error)) => Err(failure(&path, FailureReason::Unreadable, join_error.to_string())),
                    Err(_) => Err(failure(
                        &path,
                        FailureReason::Timeout,
                        format!("analysis exceeded {}ms", file_timeout.as_millis()),
                    )),
                };
                (path, outcome)
            });
        }

        let mut analyses = BTreeMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(analysis))) => {
                    debug!("Analyzed {}", path);
                    analyses.insert(path, analysis);
                }
                Ok((path, Err(file_failure))) => {
                    debug!("Failed {}: {}", path, file_failure.message);
                    failures.push(file_failure);
                }
                Err(e) => warn!("Analysis task aborted: {}", e),
            }
        }

        // A task that died without reporting still accounts for its file
        for path in files {
            if !analyses.contains_key(path) && !failures.iter().any(|f| &f.path == path) {
                failures.push(failure(path, FailureReason::Unreadable, "analysis task aborted".to_string()));
            }
        }
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        (analyses, failures)
    }
}

fn failure(path: &str, reason: FailureReason, message: String) -> FileFailure {
    FileFailure {
        path: path.to_string(),
        reason,
        message,
    }
}

fn classify(path: &str, error: TrailError) -> FileFailure {
    let reason = match &error {
        TrailError::Unsupported(_) => FailureReason::Unsupported,
        TrailError::Malformed { .. } | TrailError::Parser(_) => FailureReason::Malformed,
        _ => FailureReason::Unreadable,
    };
    failure(path, reason, error.to_string())
}
