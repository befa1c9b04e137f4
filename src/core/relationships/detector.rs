use std::collections::{BTreeMap, HashSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::super::parser::{ClassKind, FileAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Imports,
    Calls,
    Extends,
    Implements,
    Uses,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Imports => "imports",
            RelationshipKind::Calls => "calls",
            RelationshipKind::Extends => "extends",
            RelationshipKind::Implements => "implements",
            RelationshipKind::Uses => "uses",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipDetail {
    /// Symbol of the target file involved, when there is one
    pub symbol: Option<String>,
    /// Line in the source file where the relationship shows up
    pub line: Option<usize>,
    /// Data arguments passed along with a call
    pub arguments: Vec<String>,
    pub note: String,
}

/// A directed, typed connection between two analyzed files
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub kind: RelationshipKind,
    pub detail: RelationshipDetail,
}

impl Relationship {
    fn new(source: &FileAnalysis, target: &FileAnalysis, kind: RelationshipKind, detail: RelationshipDetail) -> Self {
        Self {
            source: source.path.clone(),
            target: target.path.clone(),
            kind,
            detail,
        }
    }
}

/// Finds relationships between every ordered pair of analyzed files
pub struct RelationshipDetector {
    /// Callee names too generic to tie two files together
    ignored_symbols: HashSet<&'static str>,
    import_line: Regex,
}

impl RelationshipDetector {
    pub fn new() -> Self {
        let ignored_symbols = [
            "new", "default", "fmt", "from", "into", "clone", "main", "init", "run", "get", "set",
            "len", "constructor", "toString",
        ]
        .into_iter()
        .collect();

        Self {
            ignored_symbols,
            import_line: Regex::new(r"^\s*(import|from|use|mod|export\s+\*?\s*from)\b|require\s*\(")
                .expect("Invalid import line regex"),
        }
    }

    /// Detect relationships across the batch; pairs are visited in path order
    pub fn detect(&self, analyses: &BTreeMap<String, FileAnalysis>) -> Vec<Relationship> {
        let mut relationships = Vec::new();

        for source in analyses.values() {
            for target in analyses.values() {
                if source.path == target.path {
                    continue;
                }
                relationships.extend(self.detect_pair(source, target));
            }
        }

        debug!("Detected {} relationships across {} files", relationships.len(), analyses.len());
        relationships
    }

    /// Rules run in a fixed order: imports, calls, extends/implements, uses
    pub fn detect_pair(&self, source: &FileAnalysis, target: &FileAnalysis) -> Vec<Relationship> {
        let mut found = self.detect_imports(source, target);

        let calls = self.detect_calls(source, target);
        let inheritance = self.detect_inheritance(source, target);

        let reported: HashSet<String> = calls
            .iter()
            .chain(inheritance.iter())
            .filter_map(|r| r.detail.symbol.clone())
            .collect();

        found.extend(calls);
        found.extend(inheritance);
        found.extend(self.detect_uses(source, target, &reported));
        found
    }

    fn detect_imports(&self, source: &FileAnalysis, target: &FileAnalysis) -> Vec<Relationship> {
        let aliases = module_aliases(&target.path);
        let mut found = Vec::new();

        for import in &source.imports {
            let module = normalize_import(&import.module);
            let mut candidates = vec![module.clone()];
            candidates.extend(import.names.iter().map(|name| {
                if module.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", module, name)
                }
            }));

            let resolves = candidates.iter().filter(|c| !c.is_empty()).any(|candidate| {
                aliases
                    .iter()
                    .any(|alias| candidate == alias || candidate.starts_with(&format!("{}.", alias)))
            });

            if resolves {
                found.push(Relationship::new(
                    source,
                    target,
                    RelationshipKind::Imports,
                    RelationshipDetail {
                        symbol: None,
                        line: Some(import.line),
                        arguments: import.names.clone(),
                        note: format!("imports {}", import.module),
                    },
                ));
            }
        }

        found
    }

    /// One relationship per distinct target symbol called from a function body of `source`
    fn detect_calls(&self, source: &FileAnalysis, target: &FileAnalysis) -> Vec<Relationship> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for function in &source.functions {
            for call in &function.calls {
                let symbol = call.callee.as_str();
                if self.is_ignored(symbol) || !target.defines(symbol) || source.defines(symbol) {
                    continue;
                }
                if !seen.insert(symbol.to_string()) {
                    continue;
                }

                found.push(Relationship::new(
                    source,
                    target,
                    RelationshipKind::Calls,
                    RelationshipDetail {
                        symbol: Some(symbol.to_string()),
                        line: Some(call.line),
                        arguments: call.arguments.clone(),
                        note: format!("{} calls {}", function.name, symbol),
                    },
                ));
            }
        }

        found
    }

    fn detect_inheritance(&self, source: &FileAnalysis, target: &FileAnalysis) -> Vec<Relationship> {
        let mut found = Vec::new();

        for class in &source.classes {
            for base in &class.bases {
                if source.defines(base) {
                    continue;
                }
                let Some(parent) = target.class(base) else {
                    continue;
                };
                let kind = if parent.kind == ClassKind::Interface {
                    RelationshipKind::Implements
                } else {
                    RelationshipKind::Extends
                };

                found.push(Relationship::new(
                    source,
                    target,
                    kind,
                    RelationshipDetail {
                        symbol: Some(base.clone()),
                        line: Some(class.line_start),
                        arguments: vec![],
                        note: format!("{} {} {}", class.name, kind, base),
                    },
                ));
            }
        }

        found
    }

    /// Textual references to target symbols that no structural rule reported
    fn detect_uses(&self, source: &FileAnalysis, target: &FileAnalysis, reported: &HashSet<String>) -> Vec<Relationship> {
        let mut found = Vec::new();

        for symbol in target.defined_symbols() {
            if symbol.len() < 3
                || self.is_ignored(symbol)
                || reported.contains(symbol)
                || source.defines(symbol)
            {
                continue;
            }

            // Module-level invocations carry their data
            if let Some(call) = source.module_calls.iter().find(|c| c.callee == symbol) {
                found.push(Relationship::new(
                    source,
                    target,
                    RelationshipKind::Uses,
                    RelationshipDetail {
                        symbol: Some(symbol.to_string()),
                        line: Some(call.line),
                        arguments: call.arguments.clone(),
                        note: format!("invokes {} at module level", symbol),
                    },
                ));
                continue;
            }

            let Ok(word) = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))) else {
                continue;
            };
            let first_reference = source.source.lines().enumerate().find(|(_, line)| {
                let trimmed = line.trim_start();
                !trimmed.starts_with('#')
                    && !trimmed.starts_with("//")
                    && !self.import_line.is_match(line)
                    && word.is_match(line)
            });

            if let Some((index, _)) = first_reference {
                found.push(Relationship::new(
                    source,
                    target,
                    RelationshipKind::Uses,
                    RelationshipDetail {
                        symbol: Some(symbol.to_string()),
                        line: Some(index + 1),
                        arguments: vec![],
                        note: format!("references {}", symbol),
                    },
                ));
            }
        }

        found
    }

    fn is_ignored(&self, symbol: &str) -> bool {
        (symbol.starts_with("__") && symbol.ends_with("__")) || self.ignored_symbols.contains(symbol)
    }
}

impl Default for RelationshipDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Dotted names an import could use to reach the file at `path`
///
/// `src/pkg/b.py` is reachable as `src.pkg.b`, `pkg.b` and `b`; package index
/// files (`__init__.py`, `mod.rs`, `index.js`) stand for their directory.
pub fn module_aliases(path: &str) -> Vec<String> {
    let without_extension = match path.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() && !stem.ends_with('/') && !extension.contains('/') => stem,
        _ => path,
    };

    let mut segments: Vec<&str> = without_extension.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > 1 && matches!(segments.last(), Some(&"__init__") | Some(&"mod") | Some(&"index")) {
        segments.pop();
    }

    (0..segments.len())
        .map(|start| segments[start..].join("."))
        .collect()
}

/// Bring an import path from any supported language into dotted form
pub fn normalize_import(module: &str) -> String {
    let mut rest = module.trim();
    loop {
        let stripped = rest
            .strip_prefix("./")
            .or_else(|| rest.strip_prefix("../"))
            .or_else(|| rest.strip_prefix("crate::"))
            .or_else(|| rest.strip_prefix("self::"))
            .or_else(|| rest.strip_prefix("super::"));
        match stripped {
            Some(next) => rest = next,
            None => break,
        }
    }

    let rest = rest.trim_start_matches('.');
    let rest = [".js", ".jsx", ".mjs", ".cjs", ".py", ".rs"]
        .iter()
        .find_map(|ext| rest.strip_suffix(ext))
        .unwrap_or(rest);

    rest.replace("::", ".").replace('/', ".").trim_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::parser::{CodeParser, FileAnalyzer};

    fn analyze(files: &[(&str, &str)]) -> BTreeMap<String, FileAnalysis> {
        let parser = CodeParser::new(&Config::default().parsing).unwrap();
        files
            .iter()
            .map(|(path, content)| (path.to_string(), parser.analyze(path, content).unwrap()))
            .collect()
    }

    #[test]
    fn test_module_aliases() {
        assert_eq!(module_aliases("src/pkg/b.py"), vec!["src.pkg.b", "pkg.b", "b"]);
        assert_eq!(module_aliases("pkg/__init__.py"), vec!["pkg"]);
        assert_eq!(module_aliases("src/store/mod.rs"), vec!["src.store", "store"]);
    }

    #[test]
    fn test_normalize_import() {
        assert_eq!(normalize_import("../lib/store.js"), "lib.store");
        assert_eq!(normalize_import("crate::store::Repo"), "store.Repo");
        assert_eq!(normalize_import("..models"), "models");
        assert_eq!(normalize_import("."), "");
    }

    #[test]
    fn test_detects_imports_and_calls_with_arguments() {
        let analyses = analyze(&[
            ("a.py", "import b\n\ndef main(payload):\n    return b.process(payload)\n"),
            ("b.py", "def process(items):\n    return sorted(items)\n"),
            ("c.py", "def unrelated():\n    return 1\n"),
        ]);

        let relationships = RelationshipDetector::new().detect(&analyses);

        assert_eq!(relationships.len(), 2);
        assert_eq!(relationships[0].kind, RelationshipKind::Imports);
        assert_eq!((relationships[0].source.as_str(), relationships[0].target.as_str()), ("a.py", "b.py"));
        assert_eq!(relationships[1].kind, RelationshipKind::Calls);
        assert_eq!(relationships[1].detail.symbol.as_deref(), Some("process"));
        assert_eq!(relationships[1].detail.line, Some(4));
        assert_eq!(relationships[1].detail.arguments, vec!["payload".to_string()]);
        assert!(relationships.iter().all(|r| r.source != "c.py" && r.target != "c.py"));
    }

    #[test]
    fn test_extends_and_implements() {
        let analyses = analyze(&[
            ("shapes/base.py", "from abc import ABC\n\nclass Shape(ABC):\n    def area(self):\n        pass\n\nclass Named:\n    pass\n"),
            ("shapes/square.py", "from shapes.base import Shape, Named\n\nclass Square(Shape, Named):\n    def area(self):\n        return 4\n"),
        ]);

        let relationships = RelationshipDetector::new().detect(&analyses);
        let kinds: Vec<(RelationshipKind, Option<&str>)> = relationships
            .iter()
            .map(|r| (r.kind, r.detail.symbol.as_deref()))
            .collect();

        assert_eq!(
            kinds,
            vec![
                (RelationshipKind::Imports, None),
                (RelationshipKind::Implements, Some("Shape")),
                (RelationshipKind::Extends, Some("Named")),
            ]
        );
        assert!(relationships.iter().all(|r| r.source == "shapes/square.py"));
    }

    #[test]
    fn test_uses_skips_import_lines_and_reported_symbols() {
        let analyses = analyze(&[
            ("app.js", "const { Registry } = require('./registry');\n\nconst DEFAULT = Registry;\nsetup(DEFAULT);\n"),
            ("registry.js", "class Registry {}\nfunction setup(registry) { return registry; }\n"),
        ]);

        let relationships = RelationshipDetector::new().detect(&analyses);
        let uses: Vec<&Relationship> = relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Uses)
            .collect();

        assert_eq!(relationships[0].kind, RelationshipKind::Imports);
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].detail.symbol.as_deref(), Some("Registry"));
        assert_eq!(uses[0].detail.line, Some(3));
        assert_eq!(uses[1].detail.symbol.as_deref(), Some("setup"));
        assert_eq!(uses[1].detail.arguments, vec!["DEFAULT".to_string()]);
    }
}
