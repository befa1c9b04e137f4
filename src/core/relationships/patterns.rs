use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::super::parser::FileAnalysis;
use super::detector::RelationshipKind;
use super::flow::CodeLocation;
use super::graph::RelationshipGraph;
use super::short_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    ProducerConsumer,
    RepositoryModel,
    ParserPrinter,
    InheritanceHierarchy,
    Facade,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternKind::ProducerConsumer => "producer/consumer",
            PatternKind::RepositoryModel => "repository/model",
            PatternKind::ParserPrinter => "parser/printer",
            PatternKind::InheritanceHierarchy => "inheritance hierarchy",
            PatternKind::Facade => "facade",
        };
        f.write_str(name)
    }
}

/// A design pattern spanning at least two files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub kind: PatternKind,
    /// Participating files, sorted
    pub files: Vec<String>,
    pub detail: String,
    /// Lines that show the pattern, usable as evidence
    pub anchors: Vec<CodeLocation>,
}

impl Pattern {
    fn new(kind: PatternKind, files: BTreeSet<String>, detail: String, anchors: Vec<CodeLocation>) -> Self {
        let files: Vec<String> = files.into_iter().collect();
        Self {
            id: short_id("pattern", &format!("{:?}|{}", kind, files.join(","))),
            kind,
            files,
            detail,
            anchors,
        }
    }
}

/// One entry of the pattern catalogue
pub trait PatternTemplate: Send + Sync {
    fn kind(&self) -> PatternKind;

    fn find(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern>;
}

/// First symbol (or the file name) mentioning one of `words`, with its line
fn role_anchor(analysis: &FileAnalysis, words: &[&str]) -> Option<CodeLocation> {
    let mentions = |name: &str| {
        let lowered = name.to_lowercase();
        words.iter().any(|w| lowered.contains(w))
    };

    analysis
        .functions
        .iter()
        .map(|f| (f.name.as_str(), f.line_start))
        .chain(analysis.classes.iter().map(|c| (c.name.as_str(), c.line_start)))
        .filter(|(name, _)| mentions(*name))
        .min_by_key(|(_, line)| *line)
        .map(|(_, line)| CodeLocation::new(&analysis.path, line))
        .or_else(|| {
            let file_name = analysis.path.rsplit('/').next().unwrap_or(&analysis.path);
            mentions(file_name).then(|| CodeLocation::new(&analysis.path, 1))
        })
}

/// Pairs of files with complementary roles connected in either direction
fn complementary_pairs(
    kind: PatternKind,
    graph: &RelationshipGraph,
    analyses: &BTreeMap<String, FileAnalysis>,
    first_role: &[&str],
    second_role: &[&str],
    label: (&str, &str),
) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    for first in analyses.values() {
        let Some(first_anchor) = role_anchor(first, first_role) else {
            continue;
        };
        for second in analyses.values() {
            if first.path == second.path {
                continue;
            }
            let Some(second_anchor) = role_anchor(second, second_role) else {
                continue;
            };
            let connected = graph.targets(&first.path).contains(&second.path)
                || graph.targets(&second.path).contains(&first.path);
            if !connected {
                continue;
            }

            let files = [first.path.clone(), second.path.clone()].into_iter().collect();
            patterns.push(Pattern::new(
                kind,
                files,
                format!("{} in {} works with {} in {}", label.0, first.path, label.1, second.path),
                vec![first_anchor.clone(), second_anchor],
            ));
        }
    }

    patterns
}

pub struct ProducerConsumer;

impl PatternTemplate for ProducerConsumer {
    fn kind(&self) -> PatternKind {
        PatternKind::ProducerConsumer
    }

    fn find(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        complementary_pairs(
            self.kind(),
            graph,
            analyses,
            &["produce", "publish", "emit", "send", "enqueue", "push"],
            &["consume", "subscribe", "receive", "listen", "dequeue", "poll"],
            ("producer", "consumer"),
        )
    }
}

pub struct RepositoryModel;

impl PatternTemplate for RepositoryModel {
    fn kind(&self) -> PatternKind {
        PatternKind::RepositoryModel
    }

    fn find(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        complementary_pairs(
            self.kind(),
            graph,
            analyses,
            &["repository", "repo", "store", "dao"],
            &["model", "entity", "schema", "record"],
            ("repository", "model"),
        )
    }
}

pub struct ParserPrinter;

impl PatternTemplate for ParserPrinter {
    fn kind(&self) -> PatternKind {
        PatternKind::ParserPrinter
    }

    fn find(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        let mut patterns = complementary_pairs(
            self.kind(),
            graph,
            analyses,
            &["parse", "lex", "tokeniz", "decode", "read"],
            &["print", "render", "format", "emit", "encode", "write"],
            ("parser", "printer"),
        );

        // Also a pair when a common caller drives both sides
        for driver in graph.nodes() {
            let targets = graph.targets(driver);
            for parser in targets {
                let Some(parse_anchor) = analyses.get(parser).and_then(|a| role_anchor(a, &["parse", "decode"])) else {
                    continue;
                };
                for printer in targets.iter().filter(|t| *t != parser) {
                    let Some(print_anchor) = analyses.get(printer).and_then(|a| role_anchor(a, &["print", "render", "encode"])) else {
                        continue;
                    };
                    let files = [parser.clone(), printer.clone()].into_iter().collect();
                    patterns.push(Pattern::new(
                        self.kind(),
                        files,
                        format!("{} parses and {} prints, both driven by {}", parser, printer, driver),
                        vec![parse_anchor.clone(), print_anchor],
                    ));
                }
            }
        }

        patterns
    }
}

/// A base with at least two subclasses in other files
pub struct InheritanceHierarchy;

impl PatternTemplate for InheritanceHierarchy {
    fn kind(&self) -> PatternKind {
        PatternKind::InheritanceHierarchy
    }

    fn find(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        let mut subclasses: BTreeMap<(String, String), Vec<CodeLocation>> = BTreeMap::new();
        for relationship in graph.relationships() {
            if !matches!(relationship.kind, RelationshipKind::Extends | RelationshipKind::Implements) {
                continue;
            }
            let Some(base) = relationship.detail.symbol.clone() else {
                continue;
            };
            let line = relationship.detail.line.unwrap_or(1);
            let children = subclasses.entry((relationship.target.clone(), base)).or_default();
            if children.iter().all(|c| c.file != relationship.source) {
                children.push(CodeLocation::new(&relationship.source, line));
            }
        }

        subclasses
            .into_iter()
            .filter(|(_, children)| children.len() >= 2)
            .map(|((base_file, base), children)| {
                let base_line = analyses
                    .get(&base_file)
                    .and_then(|a| a.definition_line(&base))
                    .unwrap_or(1);
                let mut files: BTreeSet<String> = children.iter().map(|c| c.file.clone()).collect();
                files.insert(base_file.clone());

                let mut anchors = vec![CodeLocation::new(&base_file, base_line)];
                anchors.extend(children.iter().cloned());

                Pattern::new(
                    self.kind(),
                    files,
                    format!("{} in {} has {} subclasses in other files", base, base_file, children.len()),
                    anchors,
                )
            })
            .collect()
    }
}

/// One file that calls into at least three others
pub struct Facade {
    pub min_fan_out: usize,
}

impl PatternTemplate for Facade {
    fn kind(&self) -> PatternKind {
        PatternKind::Facade
    }

    fn find(&self, graph: &RelationshipGraph, _analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        let mut patterns = Vec::new();

        for node in graph.nodes() {
            let calls = graph.outgoing(node, Some(RelationshipKind::Calls));
            let mut anchors = Vec::new();
            let mut callees = BTreeSet::new();
            for call in calls {
                if callees.insert(call.target.clone()) {
                    anchors.push(CodeLocation::new(&call.source, call.detail.line.unwrap_or(1)));
                }
            }
            if callees.len() < self.min_fan_out {
                continue;
            }

            let detail = format!(
                "{} fronts {}",
                node,
                callees.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            let mut files = callees;
            files.insert(node.clone());
            patterns.push(Pattern::new(self.kind(), files, detail, anchors));
        }

        patterns
    }
}

/// Runs the pattern catalogue and keeps one pattern per kind and file set
pub struct PatternDetector {
    templates: Vec<Box<dyn PatternTemplate>>,
}

impl PatternDetector {
    pub fn new() -> Self {
        Self {
            templates: vec![
                Box::new(ProducerConsumer),
                Box::new(RepositoryModel),
                Box::new(ParserPrinter),
                Box::new(InheritanceHierarchy),
                Box::new(Facade { min_fan_out: 3 }),
            ],
        }
    }

    pub fn with_template(mut self, template: Box<dyn PatternTemplate>) -> Self {
        self.templates.push(template);
        self
    }

    pub fn detect(&self, graph: &RelationshipGraph, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Pattern> {
        let mut seen = BTreeSet::new();
        let mut patterns = Vec::new();

        for template in &self.templates {
            for pattern in template.find(graph, analyses) {
                let distinct: BTreeSet<&String> = pattern.files.iter().collect();
                if distinct.len() < 2 {
                    continue;
                }
                if seen.insert((pattern.kind, pattern.files.clone())) {
                    patterns.push(pattern);
                }
            }
        }

        patterns
    }
}

impl Default for PatternDetector {
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

    fn kinds(patterns: &[Pattern]) -> Vec<PatternKind> {
        patterns.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_inheritance_hierarchy_needs_two_subclass_files() {
        let (analyses, graph) = analyze(&[
            ("shapes/base.py", "class Shape:\n    pass\n"),
            ("shapes/circle.py", "from shapes.base import Shape\n\nclass Circle(Shape):\n    pass\n"),
            ("shapes/square.py", "from shapes.base import Shape\n\nclass Square(Shape):\n    pass\n"),
        ]);

        let patterns = PatternDetector::new().detect(&graph, &analyses);

        assert_eq!(kinds(&patterns), vec![PatternKind::InheritanceHierarchy]);
        assert_eq!(
            patterns[0].files,
            vec!["shapes/base.py".to_string(), "shapes/circle.py".to_string(), "shapes/square.py".to_string()]
        );
        assert_eq!(patterns[0].anchors[0], CodeLocation::new("shapes/base.py", 1));
        assert_eq!(patterns[0].anchors.len(), 3);
    }

    #[test]
    fn test_repository_model_and_facade() {
        let (analyses, graph) = analyze(&[
            ("app/service.py", "from app.user_repo import save_user\nfrom app.mailer import notify\nfrom app.audit import record_event\n\ndef register(user):\n    save_user(user)\n    notify(user)\n    record_event(user)\n"),
            ("app/user_repo.py", "from app.models import User\n\ndef save_user(user):\n    return User(user)\n"),
            ("app/models.py", "class User:\n    pass\n"),
            ("app/mailer.py", "def notify(user):\n    return user\n"),
            ("app/audit.py", "def record_event(user):\n    return user\n"),
        ]);

        let patterns = PatternDetector::new().detect(&graph, &analyses);
        let found = kinds(&patterns);

        assert!(found.contains(&PatternKind::RepositoryModel));
        assert!(found.contains(&PatternKind::Facade));

        let facade = patterns.iter().find(|p| p.kind == PatternKind::Facade).unwrap();
        assert_eq!(facade.files.len(), 4);
        assert!(facade.files.contains(&"app/service.py".to_string()));

        let repository = patterns.iter().find(|p| p.kind == PatternKind::RepositoryModel).unwrap();
        assert_eq!(repository.files, vec!["app/models.py".to_string(), "app/user_repo.py".to_string()]);

        for pattern in &patterns {
            let distinct: BTreeSet<&String> = pattern.files.iter().collect();
            assert!(distinct.len() >= 2);
        }
        let ids: BTreeSet<&String> = patterns.iter().map(|p| &p.id).collect();
        assert_eq!(ids.len(), patterns.len());
    }
}
