use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for codetrail operations
#[derive(Error, Debug)]
pub enum TrailError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("Unsupported source file: {0}")]
    Unsupported(String),

    #[error("Malformed source at line {line}: {detail}")]
    Malformed { line: usize, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Source not available: {path}: {reason}")]
    Source { path: String, reason: String },

    #[error("No file reached the relevance threshold (best score {best_score:.2}, {below_threshold} below threshold, {excluded} excluded)")]
    NoRelevantFiles {
        below_threshold: usize,
        excluded: usize,
        best_score: f32,
    },

    #[error("Analysis failed for every file in the batch: {}", summarize_failures(.failures))]
    AnalysisFailed { failures: Vec<FileFailure> },

    #[error("Evidence rejected for artifact {artifact_id}: {failure}")]
    Evidence {
        artifact_id: String,
        failure: EvidenceFailure,
    },

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Content generation error: {0}")]
    Generation(String),
}

impl TrailError {
    /// Stable machine-readable code for the failure class
    pub fn reason_code(&self) -> &'static str {
        match self {
            TrailError::Config(_) => "config",
            TrailError::Parser(_) => "parser",
            TrailError::Unsupported(_) => "unsupported",
            TrailError::Malformed { .. } => "malformed",
            TrailError::Io(_) => "io",
            TrailError::Template(_) => "template",
            TrailError::Serialization(_) => "serialization",
            TrailError::FileSystem(_) => "file_system",
            TrailError::Source { .. } => "source_unavailable",
            TrailError::NoRelevantFiles { .. } => "no_relevant_files",
            TrailError::AnalysisFailed { .. } => "analysis_failed",
            TrailError::Evidence { failure, .. } => failure.reason_code(),
            TrailError::Store(_) => "store",
            TrailError::Generation(_) => "generation",
        }
    }
}

/// A file that could not be analyzed, with the reason it was excluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: FailureReason,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unreadable,
    Unsupported,
    Malformed,
    Timeout,
    EmptyBatch,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}: {})", self.path, self.reason, self.message)
    }
}

fn summarize_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a piece of evidence failed existence verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceFailure {
    EmptyEvidence,
    InvalidRange {
        file_path: String,
        line_start: usize,
        line_end: usize,
    },
    FileMissing {
        file_path: String,
    },
    RangeOutOfBounds {
        file_path: String,
        line_end: usize,
        line_count: usize,
    },
}

impl EvidenceFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            EvidenceFailure::EmptyEvidence => "evidence_empty",
            EvidenceFailure::InvalidRange { .. } => "evidence_invalid_range",
            EvidenceFailure::FileMissing { .. } => "evidence_file_missing",
            EvidenceFailure::RangeOutOfBounds { .. } => "evidence_out_of_bounds",
        }
    }
}

impl fmt::Display for EvidenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceFailure::EmptyEvidence => write!(f, "evidence list is empty"),
            EvidenceFailure::InvalidRange { file_path, line_start, line_end } => write!(
                f,
                "invalid line range {}-{} in {}",
                line_start, line_end, file_path
            ),
            EvidenceFailure::FileMissing { file_path } => {
                write!(f, "file {} is no longer present", file_path)
            }
            EvidenceFailure::RangeOutOfBounds { file_path, line_end, line_count } => write!(
                f,
                "line {} is past the end of {} ({} lines)",
                line_end, file_path, line_count
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrailError>;
