//! Data flows and execution paths over the relationship graph.
//!
//! Both are best-effort: a flow whose endpoints are not connected is simply not
//! produced, and path tracing is bounded by depth and per-entry path count.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::super::parser::FileAnalysis;
use super::detector::{Relationship, RelationshipKind};
use super::entry_points::EntryPoint;
use super::graph::RelationshipGraph;
use super::short_id;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: usize,
}

impl CodeLocation {
    pub fn new(file: &str, line: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowHop {
    pub from: String,
    pub to: String,
    /// First-detected relationship kind between the pair
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlow {
    pub id: String,
    pub start: CodeLocation,
    pub end: CodeLocation,
    pub description: String,
    /// Files from `start.file` to `end.file`, each consecutive pair connected
    pub path: Vec<String>,
    pub hops: Vec<FlowHop>,
    /// Data arguments carried into the target
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub file: String,
    pub symbol: String,
    pub line: usize,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPath {
    pub id: String,
    pub entry: String,
    pub steps: Vec<PathStep>,
}

impl ExecutionPath {
    pub fn files(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.file.as_str()).collect()
    }
}

/// Connect two code locations through the graph, or `None` when unreachable
pub fn trace_flow(
    graph: &RelationshipGraph,
    start: CodeLocation,
    end: CodeLocation,
    description: &str,
) -> Option<DataFlow> {
    let path = graph.shortest_path(&start.file, &end.file)?;

    let hops = path
        .windows(2)
        .map(|pair| {
            graph.first_kind(&pair[0], &pair[1]).map(|kind| FlowHop {
                from: pair[0].clone(),
                to: pair[1].clone(),
                kind,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    let id = short_id(
        "flow",
        &format!("{}:{}->{}:{}|{}", start.file, start.line, end.file, end.line, description),
    );

    Some(DataFlow {
        id,
        start,
        end,
        description: description.to_string(),
        path,
        hops,
        arguments: Vec::new(),
    })
}

/// One candidate flow per `calls`/`uses` relationship that carries data
pub fn extract_data_flows(graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<DataFlow> {
    let mut seen = BTreeSet::new();
    let mut flows = Vec::new();

    for relationship in graph.relationships() {
        if !matches!(relationship.kind, RelationshipKind::Calls | RelationshipKind::Uses)
            || relationship.detail.arguments.is_empty()
        {
            continue;
        }
        let Some(symbol) = relationship.detail.symbol.as_deref() else {
            continue;
        };

        let start = CodeLocation::new(&relationship.source, relationship.detail.line.unwrap_or(1));
        let end_line = analyses
            .get(&relationship.target)
            .and_then(|target| target.definition_line(symbol))
            .unwrap_or(1);
        let end = CodeLocation::new(&relationship.target, end_line);
        let description = format!(
            "{} passes {} to {} in {}",
            relationship.source,
            relationship.detail.arguments.join(", "),
            symbol,
            relationship.target
        );

        match trace_flow(graph, start, end, &description) {
            Some(mut flow) if seen.insert(flow.id.clone()) => {
                flow.arguments = relationship.detail.arguments.clone();
                flows.push(flow);
            }
            Some(_) => {}
            None => debug!("Discarded flow without a path: {}", description),
        }
    }

    flows
}

/// Follows `calls` relationships outward from entry points
pub struct PathTracer {
    /// Maximum steps per path, entry step included
    max_depth: usize,
    max_paths_per_entry: usize,
}

impl PathTracer {
    pub fn new(max_depth: usize, max_paths_per_entry: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            max_paths_per_entry: max_paths_per_entry.max(1),
        }
    }

    pub fn trace_all_paths(
        &self,
        graph: &RelationshipGraph,
        analyses: &BTreeMap<String, FileAnalysis>,
        entry_points: &[EntryPoint],
    ) -> Vec<ExecutionPath> {
        entry_points
            .iter()
            .flat_map(|entry| self.trace_from_entry_point(graph, analyses, entry))
            .collect()
    }

    /// One path per maximal chain reachable from the entry point
    pub fn trace_from_entry_point(
        &self,
        graph: &RelationshipGraph,
        analyses: &BTreeMap<String, FileAnalysis>,
        entry: &EntryPoint,
    ) -> Vec<ExecutionPath> {
        let entry_step = PathStep {
            file: entry.file.clone(),
            symbol: entry.symbol.clone().unwrap_or_else(|| file_stem(&entry.file)),
            line: entry.line,
            description: format!("Execution starts in {}", entry.file),
        };

        let mut chains = Vec::new();
        let mut chain = vec![entry_step];
        self.extend_chain(graph, analyses, &mut chain, &mut chains);

        chains
            .into_iter()
            .map(|steps| {
                let signature: Vec<String> = steps.iter().map(|s| format!("{}#{}", s.file, s.symbol)).collect();
                ExecutionPath {
                    id: short_id("path", &signature.join(">")),
                    entry: entry.file.clone(),
                    steps,
                }
            })
            .collect()
    }

    fn extend_chain(
        &self,
        graph: &RelationshipGraph,
        analyses: &BTreeMap<String, FileAnalysis>,
        chain: &mut Vec<PathStep>,
        chains: &mut Vec<Vec<PathStep>>,
    ) {
        if chains.len() >= self.max_paths_per_entry {
            return;
        }

        let Some(current) = chain.last().map(|step| step.file.clone()) else {
            return;
        };
        let next_calls: Vec<&Relationship> = if chain.len() >= self.max_depth {
            Vec::new()
        } else {
            graph
                .outgoing(&current, Some(RelationshipKind::Calls))
                .into_iter()
                .filter(|r| chain.iter().all(|step| step.file != r.target))
                .collect()
        };

        if next_calls.is_empty() {
            chains.push(chain.clone());
            return;
        }

        for call in next_calls {
            if chains.len() >= self.max_paths_per_entry {
                break;
            }
            let symbol = call.detail.symbol.clone().unwrap_or_else(|| file_stem(&call.target));
            let line = analyses
                .get(&call.target)
                .and_then(|target| target.definition_line(&symbol))
                .unwrap_or(1);

            chain.push(PathStep {
                file: call.target.clone(),
                symbol: symbol.clone(),
                line,
                description: format!("{} calls {}", current, symbol),
            });
            self.extend_chain(graph, analyses, chain, chains);
            chain.pop();
        }
    }
}

impl Default for PathTracer {
    fn default() -> Self {
        Self::new(5, 16)
    }
}

fn file_stem(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::parser::{CodeParser, FileAnalyzer};
    use crate::core::relationships::detector::{RelationshipDetail, RelationshipDetector};
    use crate::core::relationships::entry_points::EntryPointType;

    fn analyze(files: &[(&str, &str)]) -> (BTreeMap<String, FileAnalysis>, RelationshipGraph) {
        let parser = CodeParser::new(&Config::default().parsing).unwrap();
        let analyses: BTreeMap<String, FileAnalysis> = files
            .iter()
            .map(|(path, content)| (path.to_string(), parser.analyze(path, content).unwrap()))
            .collect();
        let relationships = RelationshipDetector::new().detect(&analyses);
        let paths: Vec<String> = analyses.keys().cloned().collect();
        let graph = RelationshipGraph::build(relationships, &paths);
        (analyses, graph)
    }

    fn sample_repo() -> (BTreeMap<String, FileAnalysis>, RelationshipGraph) {
        let b = format!("{}def process(items):\n    return sorted(items)\n", "# helpers\n".repeat(9));
        analyze(&[
            ("a.py", "import b\ndef main(payload):\n    return b.process(payload)\n"),
            ("b.py", &b),
            ("c.py", "def unrelated():\n    return 1\n"),
        ])
    }

    #[test]
    fn test_flow_between_connected_files() {
        let (analyses, graph) = sample_repo();

        assert_eq!(graph.targets("a.py"), &["b.py".to_string()]);
        assert_eq!(graph.out_degree("c.py") + graph.in_degree("c.py"), 0);

        let flow = trace_flow(&graph, CodeLocation::new("a.py", 3), CodeLocation::new("b.py", 10), "payload into process")
            .unwrap();
        assert_eq!(flow.path, vec!["a.py".to_string(), "b.py".to_string()]);
        assert_eq!(flow.hops[0].kind, RelationshipKind::Imports);
        assert!(flow.id.starts_with("flow-"));

        assert!(trace_flow(&graph, CodeLocation::new("c.py", 1), CodeLocation::new("b.py", 10), "none").is_none());

        let flows = extract_data_flows(&graph, &analyses);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].start, CodeLocation::new("a.py", 3));
        assert_eq!(flows[0].end, CodeLocation::new("b.py", 10));
        assert_eq!(flows[0].arguments, vec!["payload".to_string()]);
    }

    #[test]
    fn test_flow_paths_are_connected() {
        let rel = |source: &str, target: &str, kind| Relationship {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            detail: RelationshipDetail::default(),
        };
        let graph = RelationshipGraph::build(
            vec![
                rel("x", "y", RelationshipKind::Uses),
                rel("y", "z", RelationshipKind::Calls),
                rel("y", "z", RelationshipKind::Imports),
            ],
            &["x".to_string(), "y".to_string(), "z".to_string()],
        );

        let flow = trace_flow(&graph, CodeLocation::new("x", 1), CodeLocation::new("z", 2), "x to z").unwrap();
        assert_eq!(flow.path.first(), Some(&flow.start.file));
        assert_eq!(flow.path.last(), Some(&flow.end.file));
        for hop in &flow.hops {
            assert!(!graph.relationships_between(&hop.from, &hop.to).is_empty());
        }
        assert_eq!(flow.hops[1].kind, RelationshipKind::Calls);
    }

    #[test]
    fn test_execution_paths_respect_depth_and_cycles() {
        let (analyses, graph) = analyze(&[
            ("main.py", "from one import step_one\n\ndef main():\n    step_one()\n\nif __name__ == '__main__':\n    main()\n"),
            ("one.py", "from two import step_two\n\ndef step_one():\n    step_two()\n"),
            ("two.py", "from one import step_one\nfrom three import step_three\n\ndef step_two():\n    step_three()\n    step_one()\n"),
            ("three.py", "def step_three():\n    return 3\n"),
        ]);

        let entry = EntryPoint {
            file: "main.py".to_string(),
            symbol: Some("main".to_string()),
            line: 3,
            entry_type: EntryPointType::Main,
            confidence: 0.9,
            reasoning: String::new(),
        };

        let full = PathTracer::new(5, 16).trace_from_entry_point(&graph, &analyses, &entry);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].files(), vec!["main.py", "one.py", "two.py", "three.py"]);
        assert_eq!(full[0].steps[3].symbol, "step_three");
        assert_eq!(full[0].steps[3].line, 1);

        let shallow = PathTracer::new(2, 16).trace_from_entry_point(&graph, &analyses, &entry);
        assert_eq!(shallow[0].files(), vec!["main.py", "one.py"]);

        for path in full.iter().chain(shallow.iter()) {
            let unique: BTreeSet<&str> = path.files().into_iter().collect();
            assert_eq!(unique.len(), path.steps.len());
        }
    }
}
