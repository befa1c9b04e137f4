use regex::Regex;
use tree_sitter::Node;

use crate::error::Result;
use super::super::parser::{ClassInfo, ClassKind, FileStructure, FunctionInfo, ImportInfo};
use super::{collect_calls, end_line, node_text, parse_tree, start_line, LanguageParser};

/// Python-specific parser using Tree-sitter
pub struct PythonParser {
    main_guard: Regex,
}

impl PythonParser {
    pub fn new() -> Self {
        Self {
            main_guard: Regex::new(r#"(?m)^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#)
                .expect("Invalid main guard regex"),
        }
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for PythonParser {
    fn parse(&self, content: &str) -> Result<FileStructure> {
        let tree = parse_tree(&tree_sitter_python::language(), content, "Python")?;

        let mut structure = FileStructure::default();
        self.extract_python_items(tree.root_node(), content, None, &mut structure);
        structure.is_program_entry = self.main_guard.is_match(content);

        Ok(structure)
    }

    fn file_extensions(&self) -> &[&str] {
        &["py"]
    }
}

impl PythonParser {
    /// Walk the AST and extract items; `class_name` is set inside class bodies
    fn extract_python_items(
        &self,
        node: Node,
        source: &str,
        class_name: Option<&str>,
        structure: &mut FileStructure,
    ) {
        let mut cursor = node.walk();

        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "import_statement" => self.parse_import(child, source, structure),
                "import_from_statement" => self.parse_import_from(child, source, structure),
                "class_definition" => self.parse_python_class(child, source, structure),
                "function_definition" => {
                    let function = self.parse_python_function(child, source, class_name);
                    structure.functions.push(function);
                }
                "call" => {
                    collect_calls(child, source, "call", &resolve_callee, &mut structure.module_calls);
                }
                _ => {
                    // Recursively check child nodes (decorators, if-blocks, expressions)
                    self.extract_python_items(child, source, class_name, structure);
                }
            }
        }
    }

    /// `import a.b, c as d`
    fn parse_import(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let module = match child.kind() {
                "dotted_name" => Some(node_text(child, source)),
                "aliased_import" => child.child_by_field_name("name").map(|n| node_text(n, source)),
                _ => None,
            };
            if let Some(module) = module {
                structure.imports.push(ImportInfo {
                    module,
                    names: vec![],
                    line: start_line(node),
                });
            }
        }
    }

    /// `from pkg.mod import x, y as z`
    fn parse_import_from(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = node_text(module_node, source);

        let mut names = Vec::new();
        let mut cursor = node.walk();
        for name_node in node.children_by_field_name("name", &mut cursor) {
            let name = match name_node.kind() {
                "aliased_import" => name_node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source)),
                _ => Some(node_text(name_node, source)),
            };
            names.extend(name);
        }

        structure.imports.push(ImportInfo {
            module,
            names,
            line: start_line(node),
        });
    }

    /// Parse a Python class definition and its methods
    fn parse_python_class(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);

        let mut bases = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                match base.kind() {
                    "identifier" => bases.push(node_text(base, source)),
                    "attribute" => {
                        if let Some(attr) = base.child_by_field_name("attribute") {
                            bases.push(node_text(attr, source));
                        }
                    }
                    // metaclass=ABCMeta and friends
                    "keyword_argument" => {
                        if let Some(value) = base.child_by_field_name("value") {
                            bases.push(node_text(value, source));
                        }
                    }
                    _ => {}
                }
            }
        }

        let kind = if bases
            .iter()
            .any(|b| matches!(b.as_str(), "ABC" | "ABCMeta" | "Protocol" | "Interface"))
        {
            ClassKind::Interface
        } else {
            ClassKind::Class
        };

        let first_method = structure.functions.len();
        if let Some(body) = node.child_by_field_name("body") {
            self.extract_python_items(body, source, Some(&name), structure);
        }
        let methods = structure.functions[first_method..]
            .iter()
            .filter(|f| f.class_name.as_deref() == Some(name.as_str()))
            .map(|f| f.name.clone())
            .collect();

        structure.classes.push(ClassInfo {
            name,
            kind,
            line_start: start_line(node),
            line_end: end_line(node),
            bases,
            methods,
        });
    }

    /// Parse a Python function definition
    fn parse_python_function(&self, node: Node, source: &str, class_name: Option<&str>) -> FunctionInfo {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, source))
            .unwrap_or_default();

        let mut params = Vec::new();
        if let Some(parameters) = node.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for param in parameters.named_children(&mut cursor) {
                let text = node_text(param, source);
                let bare = text
                    .split([':', '='])
                    .next()
                    .unwrap_or("")
                    .trim()
                    .trim_start_matches('*')
                    .to_string();
                if !bare.is_empty() && bare != "self" && bare != "cls" {
                    params.push(bare);
                }
            }
        }

        let mut calls = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            collect_calls(body, source, "call", &resolve_callee, &mut calls);
        }

        FunctionInfo {
            name,
            line_start: start_line(node),
            line_end: end_line(node),
            params,
            class_name: class_name.map(|s| s.to_string()),
            calls,
        }
    }
}

/// `f(...)` → ("f", None); `obj.f(...)` → ("f", Some("obj"))
fn resolve_callee(function: Node, source: &str) -> Option<(String, Option<String>)> {
    match function.kind() {
        "identifier" => Some((node_text(function, source), None)),
        "attribute" => {
            let attribute = function.child_by_field_name("attribute")?;
            let object = function.child_by_field_name("object").map(|o| node_text(o, source));
            Some((node_text(attribute, source), object))
        }
        _ => None,
    }
}
