use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ParsingConfig;
use crate::error::{TrailError, Result};
use super::languages::{JavaScriptParser, LanguageParser, PythonParser, RustParser};

/// Structural analysis of one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// File path relative to the repository root
    pub path: String,

    /// Programming language detected
    pub language: String,

    /// Content hash for change detection
    pub content_hash: String,

    pub line_count: usize,

    pub functions: Vec<FunctionInfo>,

    pub classes: Vec<ClassInfo>,

    pub imports: Vec<ImportInfo>,

    /// Calls made outside any function body (module level)
    pub module_calls: Vec<CallSite>,

    /// Explicitly marked program entry (`fn main`, `if __name__ == "__main__"`)
    pub is_program_entry: bool,

    /// Raw source content, used for textual reference detection and evidence
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
    pub params: Vec<String>,
    /// Owning class/impl target for methods
    pub class_name: Option<String>,
    /// Call sites inside the function body
    pub calls: Vec<CallSite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Class,
    Interface,
    Struct,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub kind: ClassKind,
    pub line_start: usize,
    pub line_end: usize,
    /// Base classes, implemented interfaces or traits
    pub bases: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInfo {
    /// Module path as written (`pkg.b`, `./b`, `crate::b`)
    pub module: String,
    /// Names imported from the module (`from m import x, y`)
    pub names: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    pub callee: String,
    /// Receiver or qualifier (`obj` in `obj.run()`, `b` in `b::run()`)
    pub receiver: Option<String>,
    pub line: usize,
    /// Argument expressions as written
    pub arguments: Vec<String>,
}

/// Raw structure returned by a language parser before file metadata is attached
#[derive(Debug, Clone, Default)]
pub struct FileStructure {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    pub module_calls: Vec<CallSite>,
    pub is_program_entry: bool,
}

impl FileAnalysis {
    /// Line where `symbol` is defined in this file (function, method or class)
    pub fn definition_line(&self, symbol: &str) -> Option<usize> {
        self.functions
            .iter()
            .find(|f| f.name == symbol)
            .map(|f| f.line_start)
            .or_else(|| self.classes.iter().find(|c| c.name == symbol).map(|c| c.line_start))
    }

    /// Names of every symbol this file defines
    pub fn defined_symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        symbols.extend(self.classes.iter().map(|c| c.name.as_str()));
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    pub fn defines(&self, symbol: &str) -> bool {
        self.functions.iter().any(|f| f.name == symbol) || self.classes.iter().any(|c| c.name == symbol)
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Function whose body contains `line`, innermost first
    pub fn function_at(&self, line: usize) -> Option<&FunctionInfo> {
        self.functions
            .iter()
            .filter(|f| f.line_start <= line && line <= f.line_end)
            .min_by_key(|f| f.line_end - f.line_start)
    }

    /// Lines `start..=end` (1-based) joined with newlines
    pub fn lines(&self, start: usize, end: usize) -> String {
        self.source
            .lines()
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start) + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Adapter seam for the single-file structural analyzer
pub trait FileAnalyzer: Send + Sync {
    fn analyze(&self, path: &str, content: &str) -> Result<FileAnalysis>;
}

/// Multi-language code parser that delegates to language-specific parsers
pub struct CodeParser {
    config: ParsingConfig,
    language_parsers: HashMap<String, Box<dyn LanguageParser>>,
}

impl CodeParser {
    pub fn new(config: &ParsingConfig) -> Result<Self> {
        let mut language_parsers: HashMap<String, Box<dyn LanguageParser>> = HashMap::new();

        for language in &config.languages {
            match language.as_str() {
                "rust" => {
                    language_parsers.insert("rust".to_string(), Box::new(RustParser::new()));
                }
                "python" => {
                    language_parsers.insert("python".to_string(), Box::new(PythonParser::new()));
                }
                "javascript" => {
                    language_parsers.insert("javascript".to_string(), Box::new(JavaScriptParser::new()));
                }
                other => {
                    return Err(TrailError::Config(format!("Unsupported language: {}", other)));
                }
            }
        }

        Ok(Self {
            config: config.clone(),
            language_parsers,
        })
    }

    /// Whether some registered parser handles this path's extension
    pub fn supports(&self, path: &str) -> bool {
        self.detect_language(path).is_ok()
    }

    /// Detect programming language from file path
    fn detect_language(&self, path: &str) -> Result<String> {
        if let Some(extension) = Path::new(path).extension().and_then(|ext| ext.to_str()) {
            let mut languages: Vec<&String> = self.language_parsers.keys().collect();
            languages.sort();
            for lang in languages {
                if self.language_parsers[lang].file_extensions().contains(&extension) {
                    return Ok(lang.clone());
                }
            }
        }

        Err(TrailError::Unsupported(format!("Could not detect language for file: {}", path)))
    }
}

impl FileAnalyzer for CodeParser {
    fn analyze(&self, path: &str, content: &str) -> Result<FileAnalysis> {
        let language = self.detect_language(path)?;

        if content.len() > self.config.max_file_size {
            return Err(TrailError::Unsupported(format!("File {} exceeds maximum size limit", path)));
        }

        let parser = &self.language_parsers[&language];
        let structure = parser.parse(content)?;

        Ok(FileAnalysis {
            path: path.to_string(),
            language,
            content_hash: calculate_hash(content),
            line_count: content.lines().count(),
            functions: structure.functions,
            classes: structure.classes,
            imports: structure.imports,
            module_calls: structure.module_calls,
            is_program_entry: structure.is_program_entry,
            source: content.to_string(),
        })
    }
}

/// Calculate SHA256 hash of content
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
