use tree_sitter::Node;

use crate::error::Result;
use super::super::parser::{ClassInfo, ClassKind, FileStructure, FunctionInfo, ImportInfo};
use super::{collect_calls, end_line, node_text, parse_tree, start_line, LanguageParser};

/// Rust-specific parser using Tree-sitter
pub struct RustParser;

/// An `impl` block, merged into the matching type after the walk
struct ImplBlock {
    type_name: String,
    trait_name: Option<String>,
    methods: Vec<String>,
    line_range: (usize, usize),
}

impl RustParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for RustParser {
    fn parse(&self, content: &str) -> Result<FileStructure> {
        let tree = parse_tree(&tree_sitter_rust::language(), content, "Rust")?;

        let mut structure = FileStructure::default();
        let mut impls = Vec::new();
        self.extract_rust_items(tree.root_node(), content, None, &mut structure, &mut impls);
        merge_impls(&mut structure, impls);

        structure.is_program_entry = structure
            .functions
            .iter()
            .any(|f| f.name == "main" && f.class_name.is_none());

        Ok(structure)
    }

    fn file_extensions(&self) -> &[&str] {
        &["rs"]
    }
}

impl RustParser {
    /// Extract Rust language items from AST nodes
    fn extract_rust_items(
        &self,
        node: Node,
        source: &str,
        impl_target: Option<&str>,
        structure: &mut FileStructure,
        impls: &mut Vec<ImplBlock>,
    ) {
        let mut cursor = node.walk();

        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "use_declaration" => {
                    if let Some(argument) = child.child_by_field_name("argument") {
                        structure.imports.push(parse_use(&node_text(argument, source), start_line(child)));
                    }
                }
                "mod_item" => {
                    match child.child_by_field_name("body") {
                        Some(body) => self.extract_rust_items(body, source, None, structure, impls),
                        None => {
                            // `mod foo;` pulls in a sibling file
                            if let Some(name) = child.child_by_field_name("name") {
                                structure.imports.push(ImportInfo {
                                    module: node_text(name, source),
                                    names: vec![],
                                    line: start_line(child),
                                });
                            }
                        }
                    }
                }
                "function_item" => {
                    structure.functions.push(self.parse_rust_function(child, source, impl_target));
                }
                "struct_item" => self.push_type(child, source, ClassKind::Struct, structure),
                "enum_item" => self.push_type(child, source, ClassKind::Enum, structure),
                "trait_item" => self.parse_rust_trait(child, source, structure),
                "impl_item" => {
                    if let Some(block) = self.parse_rust_impl(child, source, structure, impls) {
                        impls.push(block);
                    }
                }
                "macro_invocation" | "macro_definition" | "attribute_item" => {}
                "call_expression" => {
                    collect_calls(child, source, "call_expression", &resolve_callee, &mut structure.module_calls);
                }
                _ => {
                    // Recursively check child nodes
                    self.extract_rust_items(child, source, impl_target, structure, impls);
                }
            }
        }
    }

    /// Parse a Rust function definition
    fn parse_rust_function(&self, node: Node, source: &str, impl_target: Option<&str>) -> FunctionInfo {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, source))
            .unwrap_or_default();

        let mut params = Vec::new();
        if let Some(parameters) = node.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for param in parameters.named_children(&mut cursor) {
                if param.kind() == "parameter" {
                    if let Some(pattern) = param.child_by_field_name("pattern") {
                        params.push(node_text(pattern, source).trim_start_matches("mut ").to_string());
                    }
                }
            }
        }

        let mut calls = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            collect_calls(body, source, "call_expression", &resolve_callee, &mut calls);
        }

        FunctionInfo {
            name,
            line_start: start_line(node),
            line_end: end_line(node),
            params,
            class_name: impl_target.map(|s| s.to_string()),
            calls,
        }
    }

    fn push_type(&self, node: Node, source: &str, kind: ClassKind, structure: &mut FileStructure) {
        if let Some(name) = node.child_by_field_name("name") {
            structure.classes.push(ClassInfo {
                name: node_text(name, source),
                kind,
                line_start: start_line(node),
                line_end: end_line(node),
                bases: vec![],
                methods: vec![],
            });
        }
    }

    /// Traits are recorded as interfaces; supertraits become bases
    fn parse_rust_trait(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };

        let bases = node
            .child_by_field_name("bounds")
            .map(|bounds| {
                let mut cursor = bounds.walk();
                let names: Vec<String> = bounds
                    .named_children(&mut cursor)
                    .map(|b| strip_generics(&node_text(b, source)))
                    .collect();
                names
            })
            .unwrap_or_default();

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for item in body.named_children(&mut cursor) {
                if matches!(item.kind(), "function_signature_item" | "function_item") {
                    if let Some(method) = item.child_by_field_name("name") {
                        methods.push(node_text(method, source));
                    }
                }
            }
        }

        structure.classes.push(ClassInfo {
            name: node_text(name, source),
            kind: ClassKind::Interface,
            line_start: start_line(node),
            line_end: end_line(node),
            bases,
            methods,
        });
    }

    /// Parse an impl block; its methods are recorded as functions owned by the type
    fn parse_rust_impl(
        &self,
        node: Node,
        source: &str,
        structure: &mut FileStructure,
        impls: &mut Vec<ImplBlock>,
    ) -> Option<ImplBlock> {
        let type_name = strip_generics(&node_text(node.child_by_field_name("type")?, source));
        let trait_name = node
            .child_by_field_name("trait")
            .map(|t| strip_generics(&node_text(t, source)));

        let first_method = structure.functions.len();
        if let Some(body) = node.child_by_field_name("body") {
            self.extract_rust_items(body, source, Some(&type_name), structure, impls);
        }
        let methods = structure.functions[first_method..]
            .iter()
            .map(|f| f.name.clone())
            .collect();

        Some(ImplBlock {
            type_name,
            trait_name,
            methods,
            line_range: (start_line(node), end_line(node)),
        })
    }
}

/// `crate::store::{Repo, load}` → module `crate::store`, names `[Repo, load]`
fn parse_use(argument: &str, line: usize) -> ImportInfo {
    let compact: String = argument.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((module, rest)) = compact.split_once("::{") {
        let names = rest
            .trim_end_matches('}')
            .split(',')
            .map(|name| name.split(" as ").next().unwrap_or("").trim().to_string())
            .filter(|name| !name.is_empty() && name != "self")
            .collect();
        return ImportInfo {
            module: module.to_string(),
            names,
            line,
        };
    }

    let path = compact.split(" as ").next().unwrap_or("").trim();
    ImportInfo {
        module: path.trim_end_matches("::*").to_string(),
        names: vec![],
        line,
    }
}

fn strip_generics(text: &str) -> String {
    let base = text.split('<').next().unwrap_or(text);
    base.rsplit("::").next().unwrap_or(base).trim().to_string()
}

/// Attach impl blocks to the types they implement; impls for foreign types become entries of their own
fn merge_impls(structure: &mut FileStructure, impls: Vec<ImplBlock>) {
    for block in impls {
        if let Some(class) = structure.classes.iter_mut().find(|c| c.name == block.type_name) {
            class.bases.extend(block.trait_name);
            class.methods.extend(block.methods);
        } else {
            structure.classes.push(ClassInfo {
                name: block.type_name,
                kind: ClassKind::Struct,
                line_start: block.line_range.0,
                line_end: block.line_range.1,
                bases: block.trait_name.into_iter().collect(),
                methods: block.methods,
            });
        }
    }
}

/// `f()` → ("f", None); `m::f()` → ("f", Some("m")); `x.f()` → ("f", Some("x"))
fn resolve_callee(function: Node, source: &str) -> Option<(String, Option<String>)> {
    match function.kind() {
        "identifier" => Some((node_text(function, source), None)),
        "scoped_identifier" => {
            let name = function.child_by_field_name("name")?;
            let path = function.child_by_field_name("path").map(|p| node_text(p, source));
            Some((node_text(name, source), path))
        }
        "field_expression" => {
            let field = function.child_by_field_name("field")?;
            let value = function.child_by_field_name("value").map(|v| node_text(v, source));
            Some((node_text(field, source), value))
        }
        "generic_function" => resolve_callee(function.child_by_field_name("function")?, source),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_uses_mods_and_main() {
        let source = r#"mod store;
use crate::store::{Repo, load as fetch};
use std::collections::HashMap;

fn main() {
    let repo = Repo::open("db");
    let items = fetch(&repo);
    report(items);
}

fn report(items: Vec<u32>) {}
"#;
        let structure = RustParser::new().parse(source).unwrap();

        assert_eq!(structure.imports.len(), 3);
        assert_eq!(structure.imports[0].module, "store");
        assert_eq!(structure.imports[1].module, "crate::store");
        assert_eq!(structure.imports[1].names, vec!["Repo".to_string(), "load".to_string()]);
        assert_eq!(structure.imports[2].module, "std::collections::HashMap");

        assert!(structure.is_program_entry);
        let main = &structure.functions[0];
        let callees: Vec<&str> = main.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["open", "fetch", "report"]);
        assert_eq!(main.calls[0].receiver.as_deref(), Some("Repo"));
        assert_eq!(main.calls[1].arguments, vec!["&repo".to_string()]);

        let report = &structure.functions[1];
        assert_eq!(report.params, vec!["items".to_string()]);
    }

    #[test]
    fn test_traits_and_impls() {
        let source = r#"pub trait Store {
    fn load(&self) -> Vec<u8>;
}

pub struct FileStore;

impl Store for FileStore {
    fn load(&self) -> Vec<u8> {
        read_all()
    }
}
"#;
        let structure = RustParser::new().parse(source).unwrap();

        let store = structure.classes.iter().find(|c| c.name == "Store").unwrap();
        assert_eq!(store.kind, ClassKind::Interface);
        assert_eq!(store.methods, vec!["load".to_string()]);

        let file_store = structure.classes.iter().find(|c| c.name == "FileStore").unwrap();
        assert_eq!(file_store.bases, vec!["Store".to_string()]);
        assert_eq!(file_store.methods, vec!["load".to_string()]);

        let load = structure.functions.iter().find(|f| f.name == "load").unwrap();
        assert_eq!(load.class_name.as_deref(), Some("FileStore"));
        assert!(!structure.is_program_entry);
    }
}
