use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::super::parser::FileAnalysis;
use super::detector::RelationshipKind;
use super::graph::RelationshipGraph;

/// Identifies the files execution starts from
pub struct EntryPointDetector {
    handler_words: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub file: String,
    /// Function execution starts in, when one stands out
    pub symbol: Option<String>,
    pub line: usize,
    pub entry_type: EntryPointType,
    pub confidence: f32,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPointType {
    /// Explicit program entry (`fn main`, `__main__` guard, `require.main`)
    Main,
    EventHandler,
    Test,
    /// Nothing calls into it but it calls out
    Inferred,
}

impl EntryPointDetector {
    pub fn new() -> Self {
        Self {
            handler_words: vec!["handle", "process", "run", "start", "execute", "serve", "dispatch"],
        }
    }

    /// Entry points of the graph, highest confidence first
    pub fn detect_entry_points(
        &self,
        graph: &RelationshipGraph,
        analyses: &BTreeMap<String, FileAnalysis>,
    ) -> Vec<EntryPoint> {
        let mut entry_points: Vec<EntryPoint> = analyses
            .values()
            .filter_map(|analysis| {
                if analysis.is_program_entry {
                    Some(self.program_entry(analysis))
                } else {
                    self.inferred_entry(graph, analysis)
                }
            })
            .collect();

        entry_points.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file.cmp(&b.file))
        });
        entry_points
    }

    fn program_entry(&self, analysis: &FileAnalysis) -> EntryPoint {
        let main = analysis
            .functions
            .iter()
            .find(|f| f.name == "main" && f.class_name.is_none());

        EntryPoint {
            file: analysis.path.clone(),
            symbol: main.map(|f| f.name.clone()),
            line: main.map(|f| f.line_start).unwrap_or(1),
            entry_type: EntryPointType::Main,
            confidence: 0.9,
            reasoning: "Marked as program entry".to_string(),
        }
    }

    /// In-degree 0, defines a function and calls into another file
    fn inferred_entry(&self, graph: &RelationshipGraph, analysis: &FileAnalysis) -> Option<EntryPoint> {
        let first_function = analysis.functions.first()?;
        if graph.in_degree(&analysis.path) > 0
            || graph.outgoing(&analysis.path, Some(RelationshipKind::Calls)).is_empty()
        {
            return None;
        }

        let mut confidence: f32 = 0.5;
        let mut reasoning = vec!["No incoming relationships, calls into other files".to_string()];
        let mut symbol = first_function;

        let entry_type = if let Some(handler) = analysis.functions.iter().find(|f| self.is_handler_function(&f.name)) {
            confidence += 0.3;
            reasoning.push(format!("{} is named like a handler", handler.name));
            symbol = handler;
            EntryPointType::EventHandler
        } else if let Some(test) = analysis.functions.iter().find(|f| is_test_function(&f.name)) {
            confidence += 0.2;
            reasoning.push(format!("{} is named like a test", test.name));
            symbol = test;
            EntryPointType::Test
        } else {
            EntryPointType::Inferred
        };

        let out_degree = graph.out_degree(&analysis.path);
        if out_degree > 3 {
            confidence += 0.1;
            reasoning.push(format!("Reaches {} files", out_degree));
        }

        Some(EntryPoint {
            file: analysis.path.clone(),
            symbol: Some(symbol.name.clone()),
            line: symbol.line_start,
            entry_type,
            confidence: confidence.min(1.0),
            reasoning: reasoning.join("; "),
        })
    }

    fn is_handler_function(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.handler_words.iter().any(|word| name.contains(word))
            || name.starts_with("on_")
            || name.ends_with("handler")
    }
}

fn is_test_function(name: &str) -> bool {
    let name = name.to_lowercase();
    name.starts_with("test") || name.ends_with("_test") || name.contains("should_")
}

impl Default for EntryPointDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::parser::{CodeParser, FileAnalyzer};
    use crate::core::relationships::detector::RelationshipDetector;

    #[test]
    fn test_program_and_inferred_entries() {
        let parser = CodeParser::new(&Config::default().parsing).unwrap();
        let analyses: BTreeMap<String, FileAnalysis> = [
            ("cli.py", "from worker import handle_job\n\ndef handle_request(req):\n    return handle_job(req)\n"),
            ("main.rs", "fn main() {\n    println!(\"hi\");\n}\n"),
            ("worker.py", "def handle_job(job):\n    return job\n"),
        ]
        .iter()
        .map(|(path, content)| (path.to_string(), parser.analyze(path, content).unwrap()))
        .collect();

        let relationships = RelationshipDetector::new().detect(&analyses);
        let paths: Vec<String> = analyses.keys().cloned().collect();
        let graph = RelationshipGraph::build(relationships, &paths);

        let entries = EntryPointDetector::new().detect_entry_points(&graph, &analyses);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file, "main.rs");
        assert_eq!(entries[0].entry_type, EntryPointType::Main);
        assert_eq!(entries[0].symbol.as_deref(), Some("main"));

        assert_eq!(entries[1].file, "cli.py");
        assert_eq!(entries[1].entry_type, EntryPointType::EventHandler);
        assert_eq!(entries[1].line, 3);
        assert!((entries[1].confidence - 0.8).abs() < 1e-6);
    }
}
