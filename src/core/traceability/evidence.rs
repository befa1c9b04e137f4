use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvidenceFailure;

/// A verified (file, line range, snippet) proving a claim about code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEvidence {
    pub file_path: String,
    /// 1-based, inclusive
    pub line_start: usize,
    /// 1-based, inclusive
    pub line_end: usize,
    pub snippet: String,
    pub context: String,
}

impl CodeEvidence {
    pub fn new(
        file_path: &str,
        line_start: usize,
        line_end: usize,
        snippet: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.to_string(),
            line_start,
            line_end,
            snippet: snippet.into(),
            context: context.into(),
        }
    }

    pub fn lines(&self) -> std::ops::RangeInclusive<usize> {
        self.line_start..=self.line_end
    }

    pub fn covers(&self, line: usize) -> bool {
        self.lines().contains(&line)
    }

    /// Range well-formedness, independent of the file
    pub fn check_range(&self) -> std::result::Result<(), EvidenceFailure> {
        if self.file_path.is_empty() || self.line_start == 0 || self.line_start > self.line_end {
            return Err(EvidenceFailure::InvalidRange {
                file_path: self.file_path.clone(),
                line_start: self.line_start,
                line_end: self.line_end,
            });
        }
        Ok(())
    }

    /// Text of the evidenced lines in `content`, or the failure if they are not there
    pub fn backing_text(&self, content: &str) -> std::result::Result<String, EvidenceFailure> {
        self.check_range()?;
        let line_count = content.lines().count();
        if self.line_end > line_count {
            return Err(EvidenceFailure::RangeOutOfBounds {
                file_path: self.file_path.clone(),
                line_end: self.line_end,
                line_count,
            });
        }

        Ok(content
            .lines()
            .skip(self.line_start - 1)
            .take(self.line_end - self.line_start + 1)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Explanation,
    DataFlow,
    ExecutionPath,
    Pattern,
    Diagram,
    Exercise,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Explanation => "explanation",
            ArtifactKind::DataFlow => "data_flow",
            ArtifactKind::ExecutionPath => "execution_path",
            ArtifactKind::Pattern => "pattern",
            ArtifactKind::Diagram => "diagram",
            ArtifactKind::Exercise => "exercise",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of evidence backing one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityLink {
    pub id: String,
    pub artifact_id: String,
    pub artifact_kind: ArtifactKind,
    pub evidence: CodeEvidence,
    pub created_at: DateTime<Utc>,
    pub valid: bool,
    /// Hash of the evidenced lines when the link was registered
    pub content_hash: String,
    /// Why the link stopped being valid
    pub stale_reason: Option<String>,
    /// Replaced by a later registration of the same artifact; kept as history only
    #[serde(default)]
    pub superseded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Valid,
    Outdated,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTrace {
    pub artifact_id: String,
    pub artifact_kind: Option<ArtifactKind>,
    pub links: Vec<TraceabilityLink>,
    pub status: TraceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_text_checks_bounds() {
        let content = "one\ntwo\nthree\n";
        let evidence = CodeEvidence::new("f.py", 2, 3, "", "");
        assert_eq!(evidence.backing_text(content).unwrap(), "two\nthree");
        assert!(evidence.covers(3));
        assert!(!evidence.covers(1));

        let past_end = CodeEvidence::new("f.py", 3, 4, "", "");
        assert_eq!(
            past_end.backing_text(content).unwrap_err(),
            EvidenceFailure::RangeOutOfBounds {
                file_path: "f.py".to_string(),
                line_end: 4,
                line_count: 3,
            }
        );

        let inverted = CodeEvidence::new("f.py", 3, 2, "", "");
        assert_eq!(inverted.backing_text(content).unwrap_err().reason_code(), "evidence_invalid_range");
        assert!(CodeEvidence::new("f.py", 0, 1, "", "").check_range().is_err());
    }
}
