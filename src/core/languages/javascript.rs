use tree_sitter::Node;

use crate::error::Result;
use super::super::parser::{CallSite, ClassInfo, ClassKind, FileStructure, FunctionInfo, ImportInfo};
use super::{argument_texts, collect_calls, end_line, node_text, parse_tree, start_line, LanguageParser};

/// JavaScript-specific parser using Tree-sitter
pub struct JavaScriptParser;

impl JavaScriptParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JavaScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for JavaScriptParser {
    fn parse(&self, content: &str) -> Result<FileStructure> {
        let tree = parse_tree(&tree_sitter_javascript::language(), content, "JavaScript")?;

        let mut structure = FileStructure::default();
        self.extract_javascript_items(tree.root_node(), content, &mut structure);

        // `require('x')` calls at module level are imports, not calls
        let (requires, calls): (Vec<CallSite>, Vec<CallSite>) = structure
            .module_calls
            .drain(..)
            .partition(|call| call.callee == "require" && call.receiver.is_none());
        structure.module_calls = calls;
        for call in requires {
            if let Some(module) = call.arguments.first() {
                structure.imports.push(ImportInfo {
                    module: unquote(module),
                    names: vec![],
                    line: call.line,
                });
            }
        }
        structure.imports.sort_by_key(|import| import.line);

        structure.is_program_entry = content.contains("require.main === module");

        Ok(structure)
    }

    fn file_extensions(&self) -> &[&str] {
        &["js", "jsx", "mjs", "cjs"]
    }
}

impl JavaScriptParser {
    /// Extract JavaScript language items from AST nodes
    fn extract_javascript_items(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let mut cursor = node.walk();

        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "import_statement" => self.parse_import(child, source, structure),
                "class_declaration" | "class" => self.parse_javascript_class(child, source, structure),
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let function = self.parse_javascript_function(child, node_text(name, source), None, source);
                        structure.functions.push(function);
                    }
                }
                "variable_declarator" => {
                    let value = child.child_by_field_name("value");
                    let is_function = value
                        .map(|v| matches!(v.kind(), "arrow_function" | "function" | "function_expression"))
                        .unwrap_or(false);
                    match (child.child_by_field_name("name"), value) {
                        (Some(name), Some(value)) if is_function => {
                            let function = self.parse_javascript_function(value, node_text(name, source), None, source);
                            structure.functions.push(function);
                        }
                        _ => self.extract_javascript_items(child, source, structure),
                    }
                }
                "call_expression" => {
                    collect_calls(child, source, "call_expression", &resolve_callee, &mut structure.module_calls);
                }
                _ => {
                    // Recursively check child nodes (exports, declarations, expressions)
                    self.extract_javascript_items(child, source, structure);
                }
            }
        }
    }

    /// `import Default, { A as B } from './module'`
    fn parse_import(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let Some(module) = node.child_by_field_name("source") else {
            return;
        };

        let mut names = Vec::new();
        let mut cursor = node.walk();
        for clause in node.named_children(&mut cursor) {
            if clause.kind() == "import_clause" {
                collect_import_names(clause, source, &mut names);
            }
        }

        structure.imports.push(ImportInfo {
            module: unquote(&node_text(module, source)),
            names,
            line: start_line(node),
        });
    }

    /// Parse a class declaration with its `extends` clause and methods
    fn parse_javascript_class(&self, node: Node, source: &str, structure: &mut FileStructure) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "class_heritage" {
                let mut heritage_cursor = child.walk();
                for base in child.named_children(&mut heritage_cursor) {
                    let text = node_text(base, source);
                    bases.push(text.rsplit('.').next().unwrap_or(&text).to_string());
                }
            }
        }

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut body_cursor = body.walk();
            for member in body.named_children(&mut body_cursor) {
                if member.kind() != "method_definition" {
                    continue;
                }
                if let Some(method_name) = member.child_by_field_name("name") {
                    let method_name = node_text(method_name, source);
                    methods.push(method_name.clone());
                    let function = self.parse_javascript_function(member, method_name, Some(&name), source);
                    structure.functions.push(function);
                }
            }
        }

        structure.classes.push(ClassInfo {
            name,
            kind: ClassKind::Class,
            line_start: start_line(node),
            line_end: end_line(node),
            bases,
            methods,
        });
    }

    /// Parse any function-like node (declaration, arrow function, method)
    fn parse_javascript_function(
        &self,
        node: Node,
        name: String,
        class_name: Option<&str>,
        source: &str,
    ) -> FunctionInfo {
        let params = node
            .child_by_field_name("parameters")
            .map(|parameters| {
                argument_texts(Some(parameters), source)
                    .into_iter()
                    .map(|p| p.split('=').next().unwrap_or("").trim().to_string())
                    .collect()
            })
            .or_else(|| {
                // Single bare parameter: `x => x + 1`
                node.child_by_field_name("parameter").map(|p| vec![node_text(p, source)])
            })
            .unwrap_or_default();

        let mut calls = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            collect_calls(body, source, "call_expression", &resolve_callee, &mut calls);
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

fn collect_import_names(node: Node, source: &str, names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => names.push(node_text(child, source)),
            "import_specifier" => {
                if let Some(name) = child.child_by_field_name("name") {
                    names.push(node_text(name, source));
                }
            }
            _ => collect_import_names(child, source, names),
        }
    }
}

fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

/// `f()` → ("f", None); `obj.f()` → ("f", Some("obj"))
fn resolve_callee(function: Node, source: &str) -> Option<(String, Option<String>)> {
    match function.kind() {
        "identifier" => Some((node_text(function, source), None)),
        "member_expression" => {
            let property = function.child_by_field_name("property")?;
            let object = function.child_by_field_name("object").map(|o| node_text(o, source));
            Some((node_text(property, source), object))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imports_and_requires() {
        let source = r#"import Parser, { tokenize as lex } from './parser';
const store = require('../lib/store');

function main(argv) {
  const tokens = lex(argv);
  store.save(tokens);
}

if (require.main === module) {
  main(process.argv);
}
"#;
        let structure = JavaScriptParser::new().parse(source).unwrap();

        assert_eq!(structure.imports.len(), 2);
        assert_eq!(structure.imports[0].module, "./parser");
        assert_eq!(structure.imports[0].names, vec!["Parser".to_string(), "tokenize".to_string()]);
        assert_eq!(structure.imports[1].module, "../lib/store");
        assert_eq!(structure.imports[1].line, 2);

        let main = structure.functions.iter().find(|f| f.name == "main").unwrap();
        assert_eq!(main.params, vec!["argv".to_string()]);
        let callees: Vec<&str> = main.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["lex", "save"]);

        assert!(structure.is_program_entry);
        assert!(structure.module_calls.iter().any(|c| c.callee == "main"));
        assert!(structure.module_calls.iter().all(|c| c.callee != "require"));
    }

    #[test]
    fn test_class_with_extends_and_arrow_functions() {
        let source = r#"class Printer extends Base {
  print(node) {
    return render(node);
  }
}

const render = (node) => format(node);
"#;
        let structure = JavaScriptParser::new().parse(source).unwrap();

        assert_eq!(structure.classes.len(), 1);
        assert_eq!(structure.classes[0].bases, vec!["Base".to_string()]);
        assert_eq!(structure.classes[0].methods, vec!["print".to_string()]);

        let print = structure.functions.iter().find(|f| f.name == "print").unwrap();
        assert_eq!(print.class_name.as_deref(), Some("Printer"));

        let render = structure.functions.iter().find(|f| f.name == "render").unwrap();
        assert_eq!(render.params, vec!["node".to_string()]);
        assert_eq!(render.calls[0].callee, "format");
    }
}
