//! Code extraction: turns parse trees into typed code objects, in-file
//! relationships, and import records.
//!
//! The extraction workflow is a fixed template — classes (with nested
//! methods), interfaces, top-level functions, enums — with language knowledge
//! confined to a tagged [`Profile`] variant. Relationship extraction walks the
//! tree with per-language node patterns; failures on individual nodes are
//! logged and skipped, never fatal.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tree_sitter::Node;

use codequarry_core::{
    AstMetadata, CodeObject, Lang, ObjectKind, RelationKind, Relationship,
};

use crate::ast::{
    child_by_field, child_by_kind, collect_nodes, detect_language, node_lines, node_text,
    SyntaxParser,
};
use crate::error::{Error, Result};
use crate::settings::ParsingSettings;

// Relationship confidences by extraction method.
const CONFIDENCE_CALLS: f32 = 0.9;
const CONFIDENCE_INHERITANCE: f32 = 0.95;
const CONFIDENCE_REFERENCES: f32 = 0.7;
const CONFIDENCE_CONTAINS: f32 = 1.0;
/// Cross-file import edges resolve by name only.
pub const CONFIDENCE_IMPORTS: f32 = 0.8;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// An unresolved import statement; the pipeline resolves it against the
/// batch-global name and module-path index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub imported_name: String,
    pub source_file: String,
}

/// A pattern match awaiting target resolution. The source context is always
/// in-file; the target may live anywhere in the batch.
#[derive(Debug, Clone)]
pub struct RelationCapture {
    pub source_id: String,
    pub source_name: String,
    pub source_kind: String,
    pub source_file: String,
    pub source_line: u32,
    pub target_name: String,
    pub relation: RelationKind,
    pub confidence: f32,
    /// 1-based line of the matched node, for closest-candidate selection.
    pub ref_line: u32,
}

/// Everything extracted from one source file.
///
/// `relationships` holds the edges resolvable at extraction time (CONTAINS);
/// `captures` are pattern matches resolved later against the batch-global
/// name map via [`resolve_captures`].
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub objects: Vec<CodeObject>,
    pub relationships: Vec<Relationship>,
    pub captures: Vec<RelationCapture>,
    pub imports: Vec<ImportRecord>,
}

// ---------------------------------------------------------------------------
// Language profiles
// ---------------------------------------------------------------------------

/// Per-language syntax knowledge: node kinds, field names, and the small pure
/// functions the extraction template dispatches into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Python,
    JavaScript,
    TypeScript,
    Java,
}

impl Profile {
    fn for_lang(lang: Lang) -> Option<Profile> {
        match lang {
            Lang::Python => Some(Profile::Python),
            Lang::JavaScript => Some(Profile::JavaScript),
            Lang::TypeScript => Some(Profile::TypeScript),
            Lang::Java => Some(Profile::Java),
            _ => None,
        }
    }

    fn class_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["class_definition"],
            Profile::JavaScript | Profile::TypeScript => &["class_declaration"],
            Profile::Java => &["class_declaration"],
        }
    }

    fn interface_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::TypeScript | Profile::Java => &["interface_declaration"],
            _ => &[],
        }
    }

    fn function_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["function_definition"],
            Profile::JavaScript | Profile::TypeScript => &["function_declaration"],
            Profile::Java => &[],
        }
    }

    fn method_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["function_definition"],
            Profile::JavaScript | Profile::TypeScript => &["method_definition"],
            Profile::Java => &["method_declaration", "constructor_declaration"],
        }
    }

    fn enum_kinds(self) -> &'static [&'static str] {
        match self {
            // Python enums are classes inheriting from Enum; see is_enum_node.
            Profile::Python => &["class_definition"],
            Profile::TypeScript | Profile::Java => &["enum_declaration"],
            Profile::JavaScript => &[],
        }
    }

    fn scope_root_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["module"],
            _ => &["program"],
        }
    }

    fn call_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["call"],
            Profile::JavaScript | Profile::TypeScript => &["call_expression"],
            Profile::Java => &["method_invocation"],
        }
    }

    fn reference_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &["identifier", "attribute"],
            Profile::JavaScript | Profile::TypeScript => &["identifier", "member_expression"],
            Profile::Java => &["identifier", "field_access"],
        }
    }

    fn decision_kinds(self) -> &'static [&'static str] {
        match self {
            Profile::Python => &[
                "if_statement",
                "for_statement",
                "while_statement",
                "except_clause",
            ],
            Profile::JavaScript | Profile::TypeScript => &[
                "if_statement",
                "for_statement",
                "while_statement",
                "catch_clause",
                "ternary_expression",
            ],
            Profile::Java => &[
                "if_statement",
                "for_statement",
                "while_statement",
                "catch_clause",
                "ternary_expression",
            ],
        }
    }

    /// Callee name for a call node, e.g. `foo` or `self.handler`.
    fn callee_text<'a>(self, call: Node, source: &'a [u8]) -> Option<&'a str> {
        let field = match self {
            Profile::Java => "name",
            _ => "function",
        };
        let callee = child_by_field(call, field)?;
        let text = node_text(callee, source);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Superclass identifiers for a class node.
    fn superclass_nodes<'t>(self, class_node: Node<'t>) -> Vec<Node<'t>> {
        match self {
            Profile::Python => child_by_field(class_node, "superclasses")
                .map(|args| {
                    named_children(args)
                        .into_iter()
                        .filter(|n| matches!(n.kind(), "identifier" | "attribute"))
                        .collect()
                })
                .unwrap_or_default(),
            Profile::JavaScript => child_by_kind(class_node, "class_heritage")
                .map(|heritage| {
                    named_children(heritage)
                        .into_iter()
                        .filter(|n| matches!(n.kind(), "identifier" | "member_expression"))
                        .collect()
                })
                .unwrap_or_default(),
            Profile::TypeScript => child_by_kind(class_node, "class_heritage")
                .map(|heritage| {
                    let mut out = Vec::new();
                    for clause in named_children(heritage) {
                        if clause.kind() == "extends_clause" {
                            out.extend(named_children(clause).into_iter().filter(|n| {
                                matches!(
                                    n.kind(),
                                    "identifier" | "member_expression" | "type_identifier"
                                )
                            }));
                        }
                    }
                    out
                })
                .unwrap_or_default(),
            Profile::Java => child_by_field(class_node, "superclass")
                .map(|sup| collect_nodes(sup, &["type_identifier"]))
                .unwrap_or_default(),
        }
    }

    /// Implemented-interface identifiers for a class node.
    fn implements_nodes<'t>(self, class_node: Node<'t>) -> Vec<Node<'t>> {
        match self {
            Profile::TypeScript => child_by_kind(class_node, "class_heritage")
                .map(|heritage| {
                    let mut out = Vec::new();
                    for clause in named_children(heritage) {
                        if clause.kind() == "implements_clause" {
                            out.extend(
                                named_children(clause)
                                    .into_iter()
                                    .filter(|n| n.kind() == "type_identifier"),
                            );
                        }
                    }
                    out
                })
                .unwrap_or_default(),
            Profile::Java => child_by_field(class_node, "interfaces")
                .map(|itf| collect_nodes(itf, &["type_identifier"]))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Python identifies enums by the textual presence of `Enum` in the
    /// superclass list, which also matches unrelated bases whose name merely
    /// contains it.
    fn is_enum_node(self, node: Node, source: &[u8]) -> bool {
        match self {
            Profile::Python => child_by_field(node, "superclasses")
                .map(|sup| node_text(sup, source).contains("Enum"))
                .unwrap_or(false),
            Profile::TypeScript | Profile::Java => node.kind() == "enum_declaration",
            Profile::JavaScript => false,
        }
    }

    fn enum_members(self, node: Node, source: &[u8]) -> Vec<String> {
        let Some(body) = child_by_field(node, "body") else {
            return Vec::new();
        };
        let mut members = Vec::new();
        match self {
            Profile::Python => {
                for child in named_children(body) {
                    if child.kind() != "expression_statement" {
                        continue;
                    }
                    for expr in named_children(child) {
                        if expr.kind() != "assignment" {
                            continue;
                        }
                        if let Some(left) = child_by_field(expr, "left") {
                            if left.kind() == "identifier" {
                                let name = node_text(left, source);
                                if !name.starts_with('_') {
                                    members.push(name.to_string());
                                }
                            }
                        }
                    }
                }
            }
            Profile::TypeScript => {
                for child in named_children(body) {
                    match child.kind() {
                        "property_identifier" => members.push(node_text(child, source).to_string()),
                        "enum_assignment" => {
                            if let Some(name) = child_by_field(child, "name") {
                                members.push(node_text(name, source).to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Profile::Java => {
                for child in named_children(body) {
                    if child.kind() == "enum_constant" {
                        if let Some(name) = child_by_field(child, "name") {
                            members.push(node_text(name, source).to_string());
                        }
                    }
                }
            }
            Profile::JavaScript => {}
        }
        members
    }

    fn docstring(self, node: Node, source: &[u8]) -> Option<String> {
        match self {
            Profile::Python => python_docstring(node, source),
            _ => doc_comment_before(node, source),
        }
    }

    fn signature(self, node: Node, source: &[u8], name: &str) -> String {
        match self {
            Profile::Python => {
                let keyword = if node.kind() == "class_definition" {
                    "class"
                } else {
                    "def"
                };
                if keyword == "class" {
                    match child_by_field(node, "superclasses") {
                        Some(sup) => format!("class {name}{}", node_text(sup, source)),
                        None => format!("class {name}"),
                    }
                } else {
                    match child_by_field(node, "parameters") {
                        Some(params) => format!("def {name}{}", node_text(params, source)),
                        None => format!("def {name}()"),
                    }
                }
            }
            _ => first_line_signature(node, source),
        }
    }

    /// Qualified name for an enum: Python uses the module path, others the
    /// bare name.
    fn enum_qualified_name(self, name: &str, relative_path: &str) -> String {
        match self {
            Profile::Python => {
                let trimmed = match relative_path.split_once("/src/") {
                    Some((_, tail)) => tail,
                    None => relative_path,
                };
                let module = trimmed.trim_end_matches(".py").replace('/', ".");
                format!("{module}.{name}")
            }
            _ => name.to_string(),
        }
    }

    /// Import capture: module names or import sources referenced by a file.
    fn collect_imports(self, root: Node, source: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            Profile::Python => {
                for node in collect_nodes(root, &["import_statement", "import_from_statement"]) {
                    if node.kind() == "import_statement" {
                        for child in named_children(node) {
                            match child.kind() {
                                "dotted_name" => out.push(node_text(child, source).to_string()),
                                "aliased_import" => {
                                    if let Some(name) = child_by_field(child, "name") {
                                        out.push(node_text(name, source).to_string());
                                    }
                                }
                                _ => {}
                            }
                        }
                    } else {
                        if let Some(module) = child_by_field(node, "module_name") {
                            out.push(node_text(module, source).to_string());
                        }
                        let mut cursor = node.walk();
                        for name in node.children_by_field_name("name", &mut cursor) {
                            let text = match name.kind() {
                                "aliased_import" => child_by_field(name, "name")
                                    .map(|n| node_text(n, source).to_string()),
                                _ => Some(node_text(name, source).to_string()),
                            };
                            if let Some(text) = text {
                                out.push(text);
                            }
                        }
                    }
                }
            }
            Profile::JavaScript | Profile::TypeScript => {
                for node in collect_nodes(root, &["import_statement"]) {
                    if let Some(src) = child_by_field(node, "source") {
                        let raw = node_text(src, source).trim_matches(['"', '\'']).to_string();
                        if !raw.is_empty() && raw != "." && raw != ".." {
                            out.push(raw);
                        }
                    }
                }
            }
            Profile::Java => {
                for node in collect_nodes(root, &["import_declaration"]) {
                    for child in named_children(node) {
                        if matches!(child.kind(), "scoped_identifier" | "identifier") {
                            out.push(node_text(child, source).to_string());
                        }
                    }
                }
            }
        }
        out.retain(|name| !name.is_empty());
        out.dedup();
        out
    }
}

// ---------------------------------------------------------------------------
// Node helpers
// ---------------------------------------------------------------------------

fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn first_line_signature(node: Node, source: &[u8]) -> String {
    let text = node_text(node, source);
    let first_line = text.lines().next().unwrap_or("").trim();
    match first_line.find('{') {
        Some(brace) => first_line[..brace].trim().to_string(),
        None => first_line.to_string(),
    }
}

fn python_docstring(node: Node, source: &[u8]) -> Option<String> {
    let body = child_by_field(node, "body")?;
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = named_children(first)
        .into_iter()
        .find(|n| n.kind() == "string")?;
    let mut text = node_text(string_node, source).trim().to_string();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if text.starts_with(quote) && text.ends_with(quote) && text.len() >= 2 * quote.len() {
            text = text[quote.len()..text.len() - quote.len()].to_string();
            break;
        }
    }
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Javadoc-style comment immediately preceding a declaration.
fn doc_comment_before(node: Node, source: &[u8]) -> Option<String> {
    let prev = node.prev_sibling()?;
    if !matches!(prev.kind(), "comment" | "block_comment" | "line_comment") {
        return None;
    }
    let raw = node_text(prev, source);
    if !raw.starts_with("/**") {
        return None;
    }
    let inner = raw.trim_start_matches("/**").trim_end_matches("*/");
    let cleaned: Vec<&str> = inner
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join("\n"))
    }
}

fn is_top_level(node: Node, class_kinds: &[&str], roots: &[&str]) -> bool {
    let mut parent = node.parent();
    while let Some(p) = parent {
        if class_kinds.contains(&p.kind()) {
            return false;
        }
        if roots.contains(&p.kind()) {
            return true;
        }
        parent = p.parent();
    }
    false
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Extracts code objects, relationships, and imports from source files.
pub struct Extractor {
    parsing: ParsingSettings,
}

struct FileCtx<'a> {
    profile: Profile,
    language: Lang,
    source: &'a [u8],
    file_path: &'a str,
    relative_path: &'a str,
}

impl Extractor {
    pub fn new(parsing: ParsingSettings) -> Self {
        Extractor { parsing }
    }

    /// Whether the extractor has a grammar for this path.
    pub fn supports(&self, path: &Path) -> bool {
        detect_language(path)
            .map(|lang| lang.is_code())
            .unwrap_or(false)
    }

    /// Read and extract a file from disk.
    pub fn extract_file(&self, file_path: &Path, relative_path: &str) -> Result<ExtractionOutcome> {
        let source = std::fs::read_to_string(file_path)
            .map_err(|e| Error::io(file_path.to_string_lossy(), e))?;
        self.extract_source(&file_path.to_string_lossy(), relative_path, &source)
    }

    /// Extract objects, relationships, and imports from in-memory source.
    pub fn extract_source(
        &self,
        file_path: &str,
        relative_path: &str,
        source: &str,
    ) -> Result<ExtractionOutcome> {
        let language = detect_language(Path::new(relative_path))?;
        let profile = Profile::for_lang(language)
            .ok_or_else(|| Error::UnsupportedLanguage(language.as_str().to_string()))?;

        let mut parser = SyntaxParser::new(language, &self.parsing)?;
        let parsed = parser.parse(source.as_bytes(), relative_path)?;
        let root = parsed.tree.root_node();
        let bytes = source.as_bytes();

        let ctx = FileCtx {
            profile,
            language,
            source: bytes,
            file_path,
            relative_path,
        };

        let mut objects = Vec::new();
        self.extract_classes(&ctx, root, &mut objects);
        self.extract_interfaces(&ctx, root, &mut objects);
        self.extract_functions(&ctx, root, &mut objects);
        self.extract_enums(&ctx, root, &mut objects);

        let captures = self.collect_captures(&ctx, root, &objects);
        let mut relationships = contains_relationships(&objects);
        dedup_relationships(&mut relationships);

        let imports = ctx
            .profile
            .collect_imports(root, bytes)
            .into_iter()
            .map(|imported_name| ImportRecord {
                imported_name,
                source_file: relative_path.to_string(),
            })
            .collect();

        tracing::debug!(
            path = relative_path,
            objects = objects.len(),
            captures = captures.len(),
            "file extracted"
        );

        Ok(ExtractionOutcome {
            objects,
            relationships,
            captures,
            imports,
        })
    }

    // -- template hooks ----------------------------------------------------

    fn extract_classes(&self, ctx: &FileCtx, root: Node, out: &mut Vec<CodeObject>) {
        for class_node in collect_nodes(root, ctx.profile.class_kinds()) {
            let Some(name_node) = child_by_field(class_node, "name") else {
                continue;
            };
            let name = node_text(name_node, ctx.source).to_string();
            let method_nodes = self.class_method_nodes(ctx, class_node);
            let class_text = node_text(class_node, ctx.source);

            let should_chunk = self.parsing.enable_chunking
                && (class_text.len() > self.parsing.chunking_threshold_bytes
                    || method_nodes.len() > self.parsing.chunking_threshold_methods);

            let class_obj = if should_chunk {
                self.build_class_summary(ctx, class_node, &name)
            } else {
                self.build_object(ctx, class_node, ObjectKind::Class, &name, None)
            };
            let Some(mut class_obj) = class_obj else {
                continue;
            };
            class_obj.qualified_name = Some(name.clone());
            let class_id = class_obj.id.clone();
            out.push(class_obj);

            for method_node in method_nodes {
                if let Some(method) = self.build_method(ctx, method_node, &name, &class_id) {
                    out.push(method);
                }
            }
        }
    }

    fn extract_interfaces(&self, ctx: &FileCtx, root: Node, out: &mut Vec<CodeObject>) {
        for node in collect_nodes(root, ctx.profile.interface_kinds()) {
            let Some(name_node) = child_by_field(node, "name") else {
                continue;
            };
            let name = node_text(name_node, ctx.source).to_string();
            if let Some(mut obj) = self.build_object(ctx, node, ObjectKind::Interface, &name, None)
            {
                obj.qualified_name = Some(name);
                out.push(obj);
            }
        }
    }

    fn extract_functions(&self, ctx: &FileCtx, root: Node, out: &mut Vec<CodeObject>) {
        let class_kinds: Vec<&str> = ctx
            .profile
            .class_kinds()
            .iter()
            .chain(ctx.profile.interface_kinds())
            .copied()
            .collect();
        for node in collect_nodes(root, ctx.profile.function_kinds()) {
            if !is_top_level(node, &class_kinds, ctx.profile.scope_root_kinds()) {
                continue;
            }
            let Some(name_node) = child_by_field(node, "name") else {
                continue;
            };
            let name = node_text(name_node, ctx.source).to_string();
            if let Some(mut obj) = self.build_object(ctx, node, ObjectKind::Function, &name, None) {
                obj.qualified_name = Some(name);
                out.push(obj);
            }
        }
    }

    fn extract_enums(&self, ctx: &FileCtx, root: Node, out: &mut Vec<CodeObject>) {
        for node in collect_nodes(root, ctx.profile.enum_kinds()) {
            if !ctx.profile.is_enum_node(node, ctx.source) {
                continue;
            }
            let Some(name_node) = child_by_field(node, "name") else {
                continue;
            };
            let name = node_text(name_node, ctx.source).to_string();
            let members = ctx.profile.enum_members(node, ctx.source);
            let signature = if members.is_empty() {
                format!("enum {name}")
            } else {
                format!("enum {name}: {}", members.join(", "))
            };
            let (start, end) = node_lines(node);
            let mut obj = CodeObject::new(
                ctx.file_path,
                ctx.relative_path,
                ObjectKind::Enum,
                &name,
                ctx.language,
                start,
                end,
                node_text(node, ctx.source),
            );
            obj.signature = Some(signature);
            obj.qualified_name = Some(ctx.profile.enum_qualified_name(&name, ctx.relative_path));
            obj.docstring = ctx.profile.docstring(node, ctx.source);
            out.push(obj);
        }
    }

    // -- object builders ---------------------------------------------------

    fn build_object(
        &self,
        ctx: &FileCtx,
        node: Node,
        kind: ObjectKind,
        name: &str,
        parent_id: Option<&str>,
    ) -> Option<CodeObject> {
        let (start, end) = node_lines(node);
        let mut obj = CodeObject::new(
            ctx.file_path,
            ctx.relative_path,
            kind,
            name,
            ctx.language,
            start,
            end,
            node_text(node, ctx.source),
        );
        obj.signature = Some(ctx.profile.signature(node, ctx.source, name));
        obj.docstring = ctx.profile.docstring(node, ctx.source);
        obj.parent_id = parent_id.map(str::to_string);
        obj.ast_metadata = Some(self.ast_metadata(ctx, node));
        Some(obj)
    }

    fn build_method(
        &self,
        ctx: &FileCtx,
        node: Node,
        class_name: &str,
        class_id: &str,
    ) -> Option<CodeObject> {
        let name_node = child_by_field(node, "name")?;
        let name = node_text(name_node, ctx.source).to_string();
        let mut obj = self.build_object(ctx, node, ObjectKind::Method, &name, Some(class_id))?;
        obj.qualified_name = Some(format!("{class_name}.{name}"));
        Some(obj)
    }

    fn class_method_nodes<'t>(&self, ctx: &FileCtx, class_node: Node<'t>) -> Vec<Node<'t>> {
        let Some(body) = child_by_field(class_node, "body") else {
            return Vec::new();
        };
        named_children(body)
            .into_iter()
            .filter(|n| ctx.profile.method_kinds().contains(&n.kind()))
            .collect()
    }

    /// Summary object for a class that exceeds the chunking thresholds:
    /// declaration line, docstring, field declarations, and method signatures
    /// without bodies.
    fn build_class_summary(&self, ctx: &FileCtx, class_node: Node, name: &str) -> Option<CodeObject> {
        let signature = first_declaration_line(class_node, ctx.source);
        let mut parts = vec![signature.clone()];
        if let Some(doc) = ctx.profile.docstring(class_node, ctx.source) {
            parts.push(doc);
        }
        if let Some(body) = child_by_field(class_node, "body") {
            for child in named_children(body) {
                match child.kind() {
                    "field_declaration" | "property_declaration" | "public_field_definition" => {
                        parts.push(node_text(child, ctx.source).to_string());
                    }
                    "expression_statement" => {
                        if named_children(child)
                            .iter()
                            .any(|n| n.kind() == "assignment")
                        {
                            parts.push(node_text(child, ctx.source).to_string());
                        }
                    }
                    kind if ctx.profile.method_kinds().contains(&kind) => {
                        parts.push(first_declaration_line(child, ctx.source));
                    }
                    _ => {}
                }
            }
        }

        let (start, end) = node_lines(class_node);
        let mut obj = CodeObject::new(
            ctx.file_path,
            ctx.relative_path,
            ObjectKind::Class,
            name,
            ctx.language,
            start,
            end,
            parts.join("\n\n"),
        );
        obj.signature = Some(signature);
        obj.docstring = ctx.profile.docstring(class_node, ctx.source);
        obj.ast_metadata = Some(AstMetadata {
            is_summary: true,
            has_chunked_methods: true,
            ..Default::default()
        });
        Some(obj)
    }

    fn ast_metadata(&self, ctx: &FileCtx, node: Node) -> AstMetadata {
        let mut calls = Vec::new();
        for call in collect_nodes(node, ctx.profile.call_kinds()) {
            if let Some(text) = ctx.profile.callee_text(call, ctx.source) {
                calls.push(text.to_string());
            }
        }
        calls.dedup();

        let reference_kinds: Vec<&str> = ctx
            .profile
            .reference_kinds()
            .iter()
            .copied()
            .filter(|k| *k != "identifier")
            .collect();
        let mut references: Vec<String> = collect_nodes(node, &reference_kinds)
            .into_iter()
            .map(|n| node_text(n, ctx.source).to_string())
            .collect();
        references.sort();
        references.dedup();

        let complexity = 1 + collect_nodes(node, ctx.profile.decision_kinds()).len() as u32;

        AstMetadata {
            calls,
            references,
            complexity,
            ..Default::default()
        }
    }

    // -- relationship captures ---------------------------------------------

    fn collect_captures(
        &self,
        ctx: &FileCtx,
        root: Node,
        objects: &[CodeObject],
    ) -> Vec<RelationCapture> {
        if objects.is_empty() {
            return Vec::new();
        }

        let name_map = build_name_map(objects);
        let mut captures = Vec::new();

        // CALLS
        for call in collect_nodes(root, ctx.profile.call_kinds()) {
            let Some(callee) = ctx.profile.callee_text(call, ctx.source) else {
                continue;
            };
            self.push_capture(
                ctx,
                call,
                callee,
                RelationKind::Calls,
                CONFIDENCE_CALLS,
                &name_map,
                &mut captures,
            );
        }

        // EXTENDS / IMPLEMENTS
        for class_node in collect_nodes(
            root,
            &[ctx.profile.class_kinds(), ctx.profile.interface_kinds()].concat(),
        ) {
            for parent in ctx.profile.superclass_nodes(class_node) {
                let text = node_text(parent, ctx.source);
                self.push_capture(
                    ctx,
                    parent,
                    text,
                    RelationKind::Extends,
                    CONFIDENCE_INHERITANCE,
                    &name_map,
                    &mut captures,
                );
            }
            for interface in ctx.profile.implements_nodes(class_node) {
                let text = node_text(interface, ctx.source);
                self.push_capture(
                    ctx,
                    interface,
                    text,
                    RelationKind::Implements,
                    CONFIDENCE_INHERITANCE,
                    &name_map,
                    &mut captures,
                );
            }
        }

        // REFERENCES: identifiers outside call position.
        for reference in collect_nodes(root, ctx.profile.reference_kinds()) {
            if let Some(parent) = reference.parent() {
                if ctx.profile.call_kinds().contains(&parent.kind()) {
                    continue;
                }
            }
            let text = node_text(reference, ctx.source);
            self.push_capture(
                ctx,
                reference,
                text,
                RelationKind::References,
                CONFIDENCE_REFERENCES,
                &name_map,
                &mut captures,
            );
        }

        captures
    }

    #[allow(clippy::too_many_arguments)]
    fn push_capture(
        &self,
        ctx: &FileCtx,
        node: Node,
        target_name: &str,
        relation: RelationKind,
        confidence: f32,
        name_map: &HashMap<&str, Vec<&CodeObject>>,
        out: &mut Vec<RelationCapture>,
    ) {
        if target_name.is_empty() {
            return;
        }
        let Some(source) = find_context(ctx, node, name_map) else {
            return;
        };
        out.push(RelationCapture {
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            source_kind: source.kind.as_str().to_string(),
            source_file: source.relative_path.clone(),
            source_line: source.start_line,
            target_name: target_name.to_string(),
            relation,
            confidence,
            ref_line: node.start_position().row as u32 + 1,
        });
    }
}

/// Resolve captures against a (batch-global) object set by exact name; with
/// multiple candidates the one closest to the capture site wins, ties break
/// by first-seen. REFERENCES edges never point back at their own source.
pub fn resolve_captures(
    captures: &[RelationCapture],
    objects: &[CodeObject],
) -> Vec<Relationship> {
    if captures.is_empty() || objects.is_empty() {
        return Vec::new();
    }
    let name_map = build_name_map(objects);
    let mut relationships = Vec::new();

    for capture in captures {
        let Some(targets) = name_map.get(capture.target_name.as_str()) else {
            continue;
        };
        if capture.relation == RelationKind::References
            && targets.iter().all(|t| t.id == capture.source_id)
        {
            continue;
        }
        let Some(target) = select_best_target(capture.ref_line, targets) else {
            continue;
        };
        if capture.relation == RelationKind::References && target.id == capture.source_id {
            continue;
        }
        relationships.push(Relationship {
            source_id: capture.source_id.clone(),
            source_name: capture.source_name.clone(),
            source_kind: capture.source_kind.clone(),
            source_file: capture.source_file.clone(),
            source_line: capture.source_line,
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            target_kind: target.kind.as_str().to_string(),
            target_file: target.relative_path.clone(),
            target_line: target.start_line,
            relation: capture.relation,
            confidence: capture.confidence,
        });
    }
    relationships
}

fn first_declaration_line(node: Node, source: &[u8]) -> String {
    let text = node_text(node, source);
    let line = text.lines().next().unwrap_or("");
    line.trim_end_matches('{').trim().to_string()
}

fn build_name_map(objects: &[CodeObject]) -> HashMap<&str, Vec<&CodeObject>> {
    let mut map: HashMap<&str, Vec<&CodeObject>> = HashMap::new();
    for obj in objects {
        map.entry(obj.name.as_str()).or_default().push(obj);
    }
    map
}

/// Enclosing object for a node: walk up to the nearest definition and match
/// it back to an extracted object by name, preferring exact start-line hits.
fn find_context<'o>(
    ctx: &FileCtx,
    node: Node,
    name_map: &HashMap<&str, Vec<&'o CodeObject>>,
) -> Option<&'o CodeObject> {
    const CONTEXT_KINDS: &[&str] = &[
        "function_definition",
        "method_definition",
        "function_declaration",
        "method_declaration",
        "constructor_declaration",
        "class_definition",
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
    ];
    let mut parent = node.parent();
    while let Some(p) = parent {
        if CONTEXT_KINDS.contains(&p.kind()) {
            let name = child_by_field(p, "name")
                .map(|n| node_text(n, ctx.source).to_string())?;
            let candidates = name_map.get(name.as_str())?;
            let start_line = p.start_position().row as u32 + 1;
            return candidates
                .iter()
                .find(|c| c.start_line == start_line)
                .or_else(|| candidates.first())
                .copied();
        }
        parent = p.parent();
    }
    None
}

/// With multiple same-name candidates, the one closest to the reference line
/// wins; ties break by first-seen.
fn select_best_target<'o>(ref_line: u32, candidates: &[&'o CodeObject]) -> Option<&'o CodeObject> {
    let mut best: Option<&CodeObject> = None;
    let mut best_distance = u32::MAX;
    for candidate in candidates {
        let distance = candidate.start_line.abs_diff(ref_line);
        if distance < best_distance {
            best = Some(candidate);
            best_distance = distance;
        }
    }
    best
}

/// CONTAINS edges synthesized from parent links; guaranteed for every child.
pub fn contains_relationships(objects: &[CodeObject]) -> Vec<Relationship> {
    let by_id: HashMap<&str, &CodeObject> =
        objects.iter().map(|o| (o.id.as_str(), o)).collect();
    let mut out = Vec::new();
    for obj in objects {
        let Some(parent_id) = obj.parent_id.as_deref() else {
            continue;
        };
        let Some(parent) = by_id.get(parent_id) else {
            continue;
        };
        out.push(Relationship::between(
            parent,
            obj,
            RelationKind::Contains,
            CONFIDENCE_CONTAINS,
        ));
    }
    out
}

/// Collapse duplicate edges by deterministic relationship id.
pub fn dedup_relationships(relationships: &mut Vec<Relationship>) {
    let mut unique: BTreeMap<String, Relationship> = BTreeMap::new();
    for rel in relationships.drain(..) {
        unique.entry(rel.id()).or_insert(rel);
    }
    *relationships = unique.into_values().collect();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
