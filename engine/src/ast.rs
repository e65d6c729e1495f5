//! Language-agnostic facade over tree-sitter parsing.
//!
//! Owns the compiled grammars, the per-language timeout policy, partial-parse
//! acceptance, and incremental tree reuse. Knows nothing about what a class
//! or function looks like; that lives in the extractor.

use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use codequarry_core::Lang;

use crate::error::{Error, Result};
use crate::settings::ParsingSettings;

// ---------------------------------------------------------------------------
// Grammars and language detection
// ---------------------------------------------------------------------------

/// Compiled grammar for a code language.
pub fn grammar_for(language: Lang) -> Option<tree_sitter::Language> {
    match language {
        Lang::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Lang::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Lang::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Lang::Java => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

/// Detect the language of a file from its extension.
pub fn detect_language(path: &Path) -> Result<Lang> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    Lang::from_extension(&ext).ok_or_else(|| Error::UnsupportedLanguage(ext))
}

// ---------------------------------------------------------------------------
// Parse metrics
// ---------------------------------------------------------------------------

/// Quality metrics for a single parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseMetrics {
    pub total_nodes: usize,
    pub error_nodes: usize,
    pub has_errors: bool,
}

impl ParseMetrics {
    /// Ratio of valid (non-ERROR, non-missing) nodes.
    pub fn valid_ratio(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        1.0 - self.error_nodes as f64 / self.total_nodes as f64
    }
}

fn count_nodes(node: Node) -> (usize, usize) {
    let mut total = 1;
    let mut errors = usize::from(node.is_error() || node.is_missing());
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let (child_total, child_errors) = count_nodes(child);
        total += child_total;
        errors += child_errors;
    }
    (total, errors)
}

// ---------------------------------------------------------------------------
// Syntax parser
// ---------------------------------------------------------------------------

/// A parsed tree with its quality metrics.
#[derive(Debug)]
pub struct ParsedTree {
    pub tree: Tree,
    pub metrics: ParseMetrics,
}

/// Per-language parser with timeout, partial-parse gating, and optional
/// incremental reuse of the previously produced tree.
pub struct SyntaxParser {
    pub language: Lang,
    parser: Parser,
    previous: Option<Tree>,
    timeout_micros: u64,
    enable_error_recovery: bool,
    partial_parse_threshold: f64,
    enable_incremental: bool,
}

impl SyntaxParser {
    pub fn new(language: Lang, parsing: &ParsingSettings) -> Result<Self> {
        let grammar = grammar_for(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.as_str().to_string()))?;
        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| Error::Extraction {
                path: String::new(),
                reason: format!("grammar init failed for {}: {e}", language.as_str()),
            })?;
        let timeout_micros = parsing.timeout_for(language.as_str());
        #[allow(deprecated)]
        parser.set_timeout_micros(timeout_micros);

        tracing::debug!(
            language = language.as_str(),
            timeout_micros,
            error_recovery = parsing.enable_error_recovery,
            "syntax parser initialized"
        );

        Ok(SyntaxParser {
            language,
            parser,
            previous: None,
            timeout_micros,
            enable_error_recovery: parsing.enable_error_recovery,
            partial_parse_threshold: parsing.partial_parse_threshold,
            enable_incremental: parsing.enable_incremental_parsing,
        })
    }

    /// Parse source bytes, enforcing the timeout and partial-parse policy.
    ///
    /// With incremental parsing enabled, the previously returned tree is fed
    /// back to the backend and replaced by the new one on success.
    pub fn parse(&mut self, source: &[u8], path: &str) -> Result<ParsedTree> {
        let old_tree = if self.enable_incremental {
            self.previous.as_ref()
        } else {
            None
        };

        let tree = self
            .parser
            .parse(source, old_tree)
            .ok_or(Error::ParseTimeout {
                path: path.to_string(),
                timeout_micros: self.timeout_micros,
            })?;

        let root = tree.root_node();
        let metrics = if root.has_error() {
            let (total, errors) = count_nodes(root);
            ParseMetrics {
                total_nodes: total,
                error_nodes: errors,
                has_errors: true,
            }
        } else {
            ParseMetrics {
                total_nodes: 0,
                error_nodes: 0,
                has_errors: false,
            }
        };

        if metrics.has_errors {
            if !self.enable_error_recovery {
                return Err(Error::ParseSyntax {
                    path: path.to_string(),
                });
            }
            let valid_ratio = metrics.valid_ratio();
            if valid_ratio < self.partial_parse_threshold {
                tracing::warn!(
                    path,
                    valid_ratio,
                    threshold = self.partial_parse_threshold,
                    "partial parse quality below threshold"
                );
                return Err(Error::ParsePartialQualityTooLow {
                    path: path.to_string(),
                    valid_ratio,
                    threshold: self.partial_parse_threshold,
                });
            }
            tracing::warn!(
                path,
                error_nodes = metrics.error_nodes,
                total_nodes = metrics.total_nodes,
                "parsed with errors, using partial tree"
            );
        }

        if self.enable_incremental {
            self.previous = Some(tree.clone());
        }

        Ok(ParsedTree { tree, metrics })
    }

    /// Clear incremental state.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

// ---------------------------------------------------------------------------
// Traversal helpers
// ---------------------------------------------------------------------------

/// Collect all nodes whose kind is in `kinds`, in tree order.
pub fn collect_nodes<'tree>(root: Node<'tree>, kinds: &[&str]) -> Vec<Node<'tree>> {
    let mut out = Vec::new();
    collect_into(root, kinds, &mut out);
    out
}

fn collect_into<'tree>(node: Node<'tree>, kinds: &[&str], out: &mut Vec<Node<'tree>>) {
    if kinds.contains(&node.kind()) {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_into(child, kinds, out);
    }
}

/// First direct child with the given kind.
pub fn child_by_kind<'tree>(node: Node<'tree>, kind: &str) -> Option<Node<'tree>> {
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).find(|c| c.kind() == kind);
    result
}

/// Child bound to a grammar field name.
pub fn child_by_field<'tree>(node: Node<'tree>, field: &str) -> Option<Node<'tree>> {
    node.child_by_field_name(field)
}

/// 1-based inclusive line range of a node.
pub fn node_lines(node: Node) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

/// Source text backing a node.
pub fn node_text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
