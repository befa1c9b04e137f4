mod engine;
pub mod generation;
pub mod intent;
pub mod parser;
pub mod relevance;
pub mod source;

// Language-specific parsers
mod languages;

// Cross-file analysis and the evidence trail
pub mod relationships;
pub mod traceability;

pub use generation::{plan_artifacts, ContentGenerator, GeneratedArtifact, GenerationRequest, TemplateGenerator};
pub use intent::{IntentParser, KeywordIntentParser, LearningIntent};
pub use parser::{calculate_hash, CodeParser, FileAnalysis, FileAnalyzer};
pub use relevance::{CandidateFile, ContentRelevance, KeywordDensity, RelevanceScorer, RepoContext, Selection, SelectedFile};
pub use source::{FsSource, MemorySource, SourceProvider};
pub use relationships::{CompositeAnalysis, Orchestrator};
pub use traceability::{ArtifactTrace, CodeEvidence, TraceStatus, TraceabilityLedger};

// Export the main engine
pub use engine::Engine;
