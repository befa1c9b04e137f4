// Cross-file relationship analysis
pub mod detector;
pub mod entry_points;
pub mod flow;
pub mod graph;
pub mod orchestrator;
pub mod patterns;

pub use detector::{module_aliases, normalize_import, Relationship, RelationshipDetail, RelationshipDetector, RelationshipKind};
pub use entry_points::{EntryPoint, EntryPointDetector, EntryPointType};
pub use flow::{extract_data_flows, trace_flow, CodeLocation, DataFlow, ExecutionPath, FlowHop, PathStep, PathTracer};
pub use graph::{GraphStats, RelationshipGraph};
pub use orchestrator::{AnalysisState, AnalysisStats, CompositeAnalysis, Orchestrator};
pub use patterns::{Pattern, PatternDetector, PatternKind, PatternTemplate};

use super::parser::calculate_hash;

/// Deterministic id from content, e.g. `flow-1a2b3c4d`
pub(crate) fn short_id(prefix: &str, content: &str) -> String {
    let hash = calculate_hash(content);
    format!("{}-{}", prefix, &hash[..8])
}
