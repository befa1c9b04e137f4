//! Language-specific structural parsers
//!
//! Each language gets its own module with a consistent interface for turning
//! source text into functions, classes, imports and call sites.

mod rust;
mod python;
mod javascript;

pub use rust::RustParser;
pub use python::PythonParser;
pub use javascript::JavaScriptParser;

use tree_sitter::{Language, Node, Parser, Tree};

use crate::error::{TrailError, Result};
use super::parser::{CallSite, FileStructure};

/// Deepest syntax tree accepted; real code stays far below this
pub(crate) const MAX_NESTING_DEPTH: usize = 400;

/// Trait that all language parsers must implement
pub trait LanguageParser: Send + Sync {
    /// Parse source code and extract its structure
    fn parse(&self, content: &str) -> Result<FileStructure>;

    /// Get the file extensions this parser handles
    fn file_extensions(&self) -> &[&str];
}

/// Parse `content` with a fresh tree-sitter parser, rejecting trees with syntax errors
pub(crate) fn parse_tree(language: &Language, content: &str, name: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| TrailError::Parser(format!("Failed to set {} language: {}", name, e)))?;

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| TrailError::Parser(format!("Failed to parse {} code", name)))?;

    // Extraction walks the tree recursively, so depth is capped before it starts
    if let Some(line) = exceeds_depth(&tree, MAX_NESTING_DEPTH) {
        return Err(TrailError::Malformed {
            line,
            detail: format!("{} nesting deeper than {} levels", name, MAX_NESTING_DEPTH),
        });
    }

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(1);
        return Err(TrailError::Malformed {
            line,
            detail: format!("{} syntax error", name),
        });
    }

    Ok(tree)
}

/// Line of the first node deeper than `max_depth`, if any
fn exceeds_depth(tree: &Tree, max_depth: usize) -> Option<usize> {
    let mut cursor = tree.walk();
    let mut depth = 0;
    loop {
        if cursor.goto_first_child() {
            depth += 1;
            if depth > max_depth {
                return Some(start_line(cursor.node()));
            }
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
            depth -= 1;
        }
    }
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(start_line(node));
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).filter(|child| child.has_error()).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

/// Extract text content of a node
pub(crate) fn node_text(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

pub(crate) fn start_line(node: Node) -> usize {
    node.start_position().row + 1
}

pub(crate) fn end_line(node: Node) -> usize {
    node.end_position().row + 1
}

/// Texts of the named children of an argument list, comments skipped
pub(crate) fn argument_texts(arguments: Option<Node>, source: &str) -> Vec<String> {
    let Some(arguments) = arguments else {
        return Vec::new();
    };
    let mut cursor = arguments.walk();
    let texts = arguments
        .named_children(&mut cursor)
        .filter(|arg| arg.kind() != "comment")
        .map(|arg| node_text(arg, source))
        .collect();
    texts
}

/// Collect every call expression in the subtree rooted at `node`.
///
/// `call_kind` is the grammar's call node kind; `resolve_callee` maps the call's
/// `function` child to `(callee, receiver)`.
pub(crate) fn collect_calls<F>(
    node: Node,
    source: &str,
    call_kind: &str,
    resolve_callee: &F,
    calls: &mut Vec<CallSite>,
) where
    F: Fn(Node, &str) -> Option<(String, Option<String>)>,
{
    // Pre-order, so calls come out in source order
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if node.kind() == call_kind {
            if let Some(function) = node.child_by_field_name("function") {
                if let Some((callee, receiver)) = resolve_callee(function, source) {
                    calls.push(CallSite {
                        callee,
                        receiver,
                        line: start_line(node),
                        arguments: argument_texts(node.child_by_field_name("arguments"), source),
                    });
                }
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
}
