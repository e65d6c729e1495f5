//! Core data model: code objects, document nodes, relationships, checksums,
//! and index state, plus their storage payload round-trips.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::identity;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Validation and payload-decoding failures for core model types.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("missing payload key: {0}")]
    MissingKey(&'static str),
    #[error("malformed payload value for {key}: {reason}")]
    Malformed { key: &'static str, reason: String },
}

fn str_key<'a>(payload: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, ModelError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or(ModelError::MissingKey(key))
}

fn opt_str(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u32_key(payload: &Map<String, Value>, key: &'static str) -> Result<u32, ModelError> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or(ModelError::MissingKey(key))
}

fn timestamp_key(
    payload: &Map<String, Value>,
    key: &'static str,
) -> Result<DateTime<Utc>, ModelError> {
    let raw = str_key(payload, key)?;
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| ModelError::Malformed { key, reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The kind of an indexed code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Class,
    Method,
    Interface,
    Function,
    Variable,
    Module,
    Enum,
    Struct,
    Document,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Class => "class",
            ObjectKind::Method => "method",
            ObjectKind::Interface => "interface",
            ObjectKind::Function => "function",
            ObjectKind::Variable => "variable",
            ObjectKind::Module => "module",
            ObjectKind::Enum => "enum",
            ObjectKind::Struct => "struct",
            ObjectKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(ObjectKind::Class),
            "method" => Some(ObjectKind::Method),
            "interface" => Some(ObjectKind::Interface),
            "function" => Some(ObjectKind::Function),
            "variable" => Some(ObjectKind::Variable),
            "module" => Some(ObjectKind::Module),
            "enum" => Some(ObjectKind::Enum),
            "struct" => Some(ObjectKind::Struct),
            "document" => Some(ObjectKind::Document),
            _ => None,
        }
    }
}

/// Supported source languages and document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Yaml,
    Json,
    Properties,
    Markdown,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Python => "python",
            Lang::JavaScript => "javascript",
            Lang::TypeScript => "typescript",
            Lang::Java => "java",
            Lang::Yaml => "yaml",
            Lang::Json => "json",
            Lang::Properties => "properties",
            Lang::Markdown => "markdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Lang::Python),
            "javascript" => Some(Lang::JavaScript),
            "typescript" => Some(Lang::TypeScript),
            "java" => Some(Lang::Java),
            "yaml" => Some(Lang::Yaml),
            "json" => Some(Lang::Json),
            "properties" => Some(Lang::Properties),
            "markdown" => Some(Lang::Markdown),
            _ => None,
        }
    }

    /// Languages the code extractor handles; everything else is a document format.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Lang::Python | Lang::JavaScript | Lang::TypeScript | Lang::Java
        )
    }

    /// Map a file extension (without dot, lower-case) to a language tag.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" | "pyw" => Some(Lang::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
            "java" => Some(Lang::Java),
            "yaml" | "yml" => Some(Lang::Yaml),
            "json" => Some(Lang::Json),
            "properties" => Some(Lang::Properties),
            "md" | "markdown" => Some(Lang::Markdown),
            _ => None,
        }
    }
}

/// The kind of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Markdown,
    Config,
    Comment,
    Docstring,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Markdown => "markdown",
            NodeKind::Config => "config",
            NodeKind::Comment => "comment",
            NodeKind::Docstring => "docstring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(NodeKind::Markdown),
            "config" => Some(NodeKind::Config),
            "comment" => Some(NodeKind::Comment),
            "docstring" => Some(NodeKind::Docstring),
            _ => None,
        }
    }
}

/// Typed relationship edge kinds, including auto-generated inverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    CalledBy,
    Extends,
    ExtendedBy,
    Implements,
    ImplementedBy,
    References,
    ReferencedBy,
    Contains,
    ContainedBy,
    Imports,
    ImportedBy,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Calls => "calls",
            RelationKind::CalledBy => "called_by",
            RelationKind::Extends => "extends",
            RelationKind::ExtendedBy => "extended_by",
            RelationKind::Implements => "implements",
            RelationKind::ImplementedBy => "implemented_by",
            RelationKind::References => "references",
            RelationKind::ReferencedBy => "referenced_by",
            RelationKind::Contains => "contains",
            RelationKind::ContainedBy => "contained_by",
            RelationKind::Imports => "imports",
            RelationKind::ImportedBy => "imported_by",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(RelationKind::Calls),
            "called_by" => Some(RelationKind::CalledBy),
            "extends" => Some(RelationKind::Extends),
            "extended_by" => Some(RelationKind::ExtendedBy),
            "implements" => Some(RelationKind::Implements),
            "implemented_by" => Some(RelationKind::ImplementedBy),
            "references" => Some(RelationKind::References),
            "referenced_by" => Some(RelationKind::ReferencedBy),
            "contains" => Some(RelationKind::Contains),
            "contained_by" => Some(RelationKind::ContainedBy),
            "imports" => Some(RelationKind::Imports),
            "imported_by" => Some(RelationKind::ImportedBy),
            _ => None,
        }
    }

    /// The inverse edge kind for a forward edge, `None` for inverses themselves.
    pub fn inverse(&self) -> Option<Self> {
        match self {
            RelationKind::Calls => Some(RelationKind::CalledBy),
            RelationKind::Extends => Some(RelationKind::ExtendedBy),
            RelationKind::Implements => Some(RelationKind::ImplementedBy),
            RelationKind::References => Some(RelationKind::ReferencedBy),
            RelationKind::Contains => Some(RelationKind::ContainedBy),
            RelationKind::Imports => Some(RelationKind::ImportedBy),
            _ => None,
        }
    }

    pub fn is_inverse(&self) -> bool {
        matches!(
            self,
            RelationKind::CalledBy
                | RelationKind::ExtendedBy
                | RelationKind::ImplementedBy
                | RelationKind::ReferencedBy
                | RelationKind::ContainedBy
                | RelationKind::ImportedBy
        )
    }
}

/// Lifecycle status of a project index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Idle,
    Indexing,
    Error,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Idle => "idle",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(IndexStatus::Idle),
            "indexing" => Some(IndexStatus::Indexing),
            "error" => Some(IndexStatus::Error),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AST metadata and code references
// ---------------------------------------------------------------------------

/// Structural metadata captured from the syntax tree of a code object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default)]
    pub complexity: u32,
    /// Set on class summary objects produced by large-class chunking.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_chunked_methods: bool,
}

/// A code reference extracted from markdown prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodeRef {
    InlineCode {
        #[serde(rename = "ref")]
        reference: String,
        context: String,
    },
    CodeBlock {
        language: String,
        code: String,
    },
    FileReference {
        text: String,
        file: String,
    },
}

// ---------------------------------------------------------------------------
// CodeObject
// ---------------------------------------------------------------------------

/// A semantic unit of code extracted from a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    pub file_path: String,
    pub relative_path: String,
    pub kind: ObjectKind,
    pub name: String,
    pub language: Lang,
    /// Inclusive 1-based line range.
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub checksum: String,
    /// Deterministic id; see [`identity::object_id`].
    pub id: String,
    pub parent_id: Option<String>,
    pub qualified_name: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub ast_metadata: Option<AstMetadata>,
    /// Per-object ranking multiplier applied after boosting.
    pub score_weight: f32,
}

impl CodeObject {
    /// Build a code object, deriving its deterministic id and content checksum.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: impl Into<String>,
        relative_path: impl Into<String>,
        kind: ObjectKind,
        name: impl Into<String>,
        language: Lang,
        start_line: u32,
        end_line: u32,
        content: impl Into<String>,
    ) -> Self {
        let relative_path = relative_path.into();
        let name = name.into();
        let content = content.into();
        let id = identity::object_id(&relative_path, &name, kind, start_line, end_line);
        let checksum = identity::content_checksum(content.as_bytes());
        CodeObject {
            file_path: file_path.into(),
            relative_path,
            kind,
            name,
            language,
            start_line,
            end_line,
            content,
            checksum,
            id,
            parent_id: None,
            qualified_name: None,
            signature: None,
            docstring: None,
            embedding: None,
            ast_metadata: None,
            score_weight: 1.0,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.start_line < 1 {
            return Err(ModelError::Invalid {
                field: "start_line",
                reason: "must be >= 1".into(),
            });
        }
        if self.end_line < self.start_line {
            return Err(ModelError::Invalid {
                field: "end_line",
                reason: format!(
                    "end_line ({}) must be >= start_line ({})",
                    self.end_line, self.start_line
                ),
            });
        }
        Ok(())
    }

    /// File name component of the file path, used as a BM25F field.
    pub fn filename(&self) -> &str {
        self.file_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.file_path)
    }

    /// Convert to a storage payload.
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("type".into(), json!("code"));
        payload.insert("object_type".into(), json!(self.kind.as_str()));
        payload.insert("name".into(), json!(self.name));
        payload.insert(
            "qualified_name".into(),
            json!(self.qualified_name.clone().unwrap_or_default()),
        );
        payload.insert(
            "signature".into(),
            json!(self.signature.clone().unwrap_or_default()),
        );
        payload.insert(
            "docstring".into(),
            json!(self.docstring.clone().unwrap_or_default()),
        );
        payload.insert("content".into(), json!(self.content));
        payload.insert("file_path".into(), json!(self.file_path));
        payload.insert("relative_path".into(), json!(self.relative_path));
        payload.insert("start_line".into(), json!(self.start_line));
        payload.insert("end_line".into(), json!(self.end_line));
        payload.insert("checksum".into(), json!(self.checksum));
        payload.insert("language".into(), json!(self.language.as_str()));
        payload.insert("score_weight".into(), json!(self.score_weight));
        payload.insert(
            "parent_id".into(),
            json!(self.parent_id.clone().unwrap_or_default()),
        );
        payload.insert("deterministic_id".into(), json!(self.id));
        let ast = self
            .ast_metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok())
            .unwrap_or_default();
        payload.insert("ast_metadata".into(), json!(ast));
        payload
    }

    /// Reconstruct from a storage payload; the stored deterministic id wins.
    pub fn from_metadata(payload: &Map<String, Value>) -> Result<Self, ModelError> {
        let kind_str = str_key(payload, "object_type")?;
        let kind = ObjectKind::parse(kind_str).ok_or(ModelError::Malformed {
            key: "object_type",
            reason: format!("unknown kind {kind_str:?}"),
        })?;
        let lang_str = str_key(payload, "language")?;
        let language = Lang::parse(lang_str).ok_or(ModelError::Malformed {
            key: "language",
            reason: format!("unknown language {lang_str:?}"),
        })?;
        let ast_metadata = match opt_str(payload, "ast_metadata") {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| ModelError::Malformed {
                key: "ast_metadata",
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(CodeObject {
            file_path: str_key(payload, "file_path")?.to_string(),
            relative_path: str_key(payload, "relative_path")?.to_string(),
            kind,
            name: str_key(payload, "name")?.to_string(),
            language,
            start_line: u32_key(payload, "start_line")?,
            end_line: u32_key(payload, "end_line")?,
            content: str_key(payload, "content")?.to_string(),
            checksum: str_key(payload, "checksum")?.to_string(),
            id: str_key(payload, "deterministic_id")?.to_string(),
            parent_id: opt_str(payload, "parent_id"),
            qualified_name: opt_str(payload, "qualified_name"),
            signature: opt_str(payload, "signature"),
            docstring: opt_str(payload, "docstring"),
            embedding: None,
            ast_metadata,
            score_weight: payload
                .get("score_weight")
                .and_then(Value::as_f64)
                .unwrap_or(1.0) as f32,
        })
    }
}

// ---------------------------------------------------------------------------
// DocumentNode
// ---------------------------------------------------------------------------

/// A bounded chunk of prose or configuration indexed alongside code.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentNode {
    pub file_path: String,
    pub relative_path: String,
    pub kind: NodeKind,
    pub content: String,
    pub checksum: String,
    /// Deterministic id; see [`identity::doc_id`].
    pub id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub parent_doc_id: Option<String>,
    pub title: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    pub language: Option<String>,
    pub related_code: Vec<CodeRef>,
    pub embedding: Option<Vec<f32>>,
    // Config-specific fields, populated for NodeKind::Config.
    pub config_keys: Vec<String>,
    pub config_format: Option<String>,
    pub env_references: Vec<String>,
    pub section_depth: Option<u32>,
    /// Free-form extra metadata (e.g. pre-translation original text).
    pub metadata: Map<String, Value>,
}

impl DocumentNode {
    pub fn new(
        file_path: impl Into<String>,
        relative_path: impl Into<String>,
        kind: NodeKind,
        content: impl Into<String>,
        chunk_index: usize,
    ) -> Self {
        let relative_path = relative_path.into();
        let content = content.into();
        let id = identity::doc_id(&relative_path, kind, chunk_index);
        let checksum = identity::content_checksum(content.as_bytes());
        DocumentNode {
            file_path: file_path.into(),
            relative_path,
            kind,
            content,
            checksum,
            id,
            chunk_index,
            total_chunks: 1,
            parent_doc_id: None,
            title: None,
            start_line: None,
            end_line: None,
            language: None,
            related_code: Vec::new(),
            embedding: None,
            config_keys: Vec::new(),
            config_format: None,
            env_references: Vec::new(),
            section_depth: None,
            metadata: Map::new(),
        }
    }

    /// Display name: the section title, falling back to the file name.
    pub fn display_name(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.file_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.file_path)
                .to_string()
        })
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut qualified_name = self.relative_path.clone();
        if let Some(title) = &self.title {
            qualified_name.push('#');
            qualified_name.push_str(title);
        }
        let docstring: String = self.content.chars().take(200).collect();

        let mut payload = Map::new();
        payload.insert("type".into(), json!("document"));
        payload.insert("node_type".into(), json!(self.kind.as_str()));
        payload.insert("object_type".into(), json!("document"));
        payload.insert("name".into(), json!(self.display_name()));
        payload.insert("qualified_name".into(), json!(qualified_name));
        payload.insert(
            "title".into(),
            json!(self.title.clone().unwrap_or_default()),
        );
        payload.insert("signature".into(), json!(""));
        payload.insert("docstring".into(), json!(docstring));
        payload.insert("content".into(), json!(self.content));
        payload.insert("file_path".into(), json!(self.file_path));
        payload.insert("relative_path".into(), json!(self.relative_path));
        payload.insert("start_line".into(), json!(self.start_line.unwrap_or(0)));
        payload.insert("end_line".into(), json!(self.end_line.unwrap_or(0)));
        payload.insert("checksum".into(), json!(self.checksum));
        payload.insert(
            "language".into(),
            json!(self.language.clone().unwrap_or_default()),
        );
        payload.insert("chunk_index".into(), json!(self.chunk_index));
        payload.insert("total_chunks".into(), json!(self.total_chunks));
        payload.insert(
            "parent_doc_id".into(),
            json!(self.parent_doc_id.clone().unwrap_or_default()),
        );
        payload.insert("deterministic_id".into(), json!(self.id));
        payload.insert(
            "related_code".into(),
            json!(serde_json::to_string(&self.related_code).unwrap_or_else(|_| "[]".into())),
        );
        payload.insert(
            "config_keys".into(),
            json!(serde_json::to_string(&self.config_keys).unwrap_or_else(|_| "[]".into())),
        );
        payload.insert(
            "config_format".into(),
            json!(self.config_format.clone().unwrap_or_default()),
        );
        payload.insert(
            "env_references".into(),
            json!(serde_json::to_string(&self.env_references).unwrap_or_else(|_| "[]".into())),
        );
        payload.insert(
            "section_depth".into(),
            json!(self.section_depth.unwrap_or(0)),
        );
        payload.insert(
            "custom_metadata".into(),
            json!(
                serde_json::to_string(&Value::Object(self.metadata.clone()))
                    .unwrap_or_else(|_| "{}".into())
            ),
        );
        payload
    }

    pub fn from_metadata(payload: &Map<String, Value>) -> Result<Self, ModelError> {
        let kind_str = str_key(payload, "node_type")?;
        let kind = NodeKind::parse(kind_str).ok_or(ModelError::Malformed {
            key: "node_type",
            reason: format!("unknown node kind {kind_str:?}"),
        })?;

        let related_code = match opt_str(payload, "related_code") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ModelError::Malformed {
                key: "related_code",
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };
        let config_keys = match opt_str(payload, "config_keys") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ModelError::Malformed {
                key: "config_keys",
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };
        let env_references = match opt_str(payload, "env_references") {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ModelError::Malformed {
                key: "env_references",
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };
        let metadata = match opt_str(payload, "custom_metadata") {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => Map::new(),
                Err(e) => {
                    return Err(ModelError::Malformed {
                        key: "custom_metadata",
                        reason: e.to_string(),
                    })
                }
            },
            None => Map::new(),
        };

        let line = |key: &str| -> Option<u32> {
            payload
                .get(key)
                .and_then(Value::as_u64)
                .filter(|v| *v > 0)
                .map(|v| v as u32)
        };
        let section_depth = payload
            .get("section_depth")
            .and_then(Value::as_u64)
            .filter(|v| *v > 0)
            .map(|v| v as u32);

        Ok(DocumentNode {
            file_path: str_key(payload, "file_path")?.to_string(),
            relative_path: str_key(payload, "relative_path")?.to_string(),
            kind,
            content: str_key(payload, "content")?.to_string(),
            checksum: str_key(payload, "checksum")?.to_string(),
            id: str_key(payload, "deterministic_id")?.to_string(),
            chunk_index: payload
                .get("chunk_index")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            total_chunks: payload
                .get("total_chunks")
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize,
            parent_doc_id: opt_str(payload, "parent_doc_id"),
            title: opt_str(payload, "title"),
            start_line: line("start_line"),
            end_line: line("end_line"),
            language: opt_str(payload, "language"),
            related_code,
            embedding: None,
            config_keys,
            config_format: opt_str(payload, "config_format"),
            env_references,
            section_depth,
            metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// A typed directed edge between two entities, referenced by deterministic id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub source_name: String,
    pub source_kind: String,
    pub source_file: String,
    pub source_line: u32,
    pub target_id: String,
    pub target_name: String,
    pub target_kind: String,
    pub target_file: String,
    pub target_line: u32,
    pub relation: RelationKind,
    pub confidence: f32,
}

impl Relationship {
    /// Edge between two code objects with full endpoint context.
    pub fn between(
        source: &CodeObject,
        target: &CodeObject,
        relation: RelationKind,
        confidence: f32,
    ) -> Self {
        Relationship {
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            source_kind: source.kind.as_str().to_string(),
            source_file: source.relative_path.clone(),
            source_line: source.start_line,
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            target_kind: target.kind.as_str().to_string(),
            target_file: target.relative_path.clone(),
            target_line: target.start_line,
            relation,
            confidence,
        }
    }

    /// Deterministic id; see [`identity::relationship_id`].
    pub fn id(&self) -> String {
        identity::relationship_id(&self.source_id, &self.target_id, self.relation)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ModelError::Invalid {
                field: "confidence",
                reason: format!("{} outside [0, 1]", self.confidence),
            });
        }
        Ok(())
    }

    /// The auto-generated inverse edge, carrying the same confidence.
    pub fn inverse(&self) -> Option<Relationship> {
        let relation = self.relation.inverse()?;
        Some(Relationship {
            source_id: self.target_id.clone(),
            source_name: self.target_name.clone(),
            source_kind: self.target_kind.clone(),
            source_file: self.target_file.clone(),
            source_line: self.target_line,
            target_id: self.source_id.clone(),
            target_name: self.source_name.clone(),
            target_kind: self.source_kind.clone(),
            target_file: self.source_file.clone(),
            target_line: self.source_line,
            relation,
            confidence: self.confidence,
        })
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_metadata(payload: &Map<String, Value>) -> Result<Self, ModelError> {
        serde_json::from_value(Value::Object(payload.clone())).map_err(|e| ModelError::Malformed {
            key: "relationship",
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// FileChecksum
// ---------------------------------------------------------------------------

/// Per-file checksum cache entry for the two-level change detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub file_path: String,
    /// SHA-256 of the whole file content.
    pub file_checksum: String,
    pub last_modified: DateTime<Utc>,
    /// Deterministic object id -> object content checksum.
    pub object_checksums: BTreeMap<String, String>,
}

impl FileChecksum {
    pub fn new(
        file_path: impl Into<String>,
        file_checksum: impl Into<String>,
        object_checksums: BTreeMap<String, String>,
    ) -> Self {
        FileChecksum {
            file_path: file_path.into(),
            file_checksum: file_checksum.into(),
            last_modified: Utc::now(),
            object_checksums,
        }
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_metadata(payload: &Map<String, Value>) -> Result<Self, ModelError> {
        serde_json::from_value(Value::Object(payload.clone())).map_err(|e| ModelError::Malformed {
            key: "file_checksum",
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// IndexState
// ---------------------------------------------------------------------------

/// Singleton per-project record describing the last completed index run.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexState {
    pub project_id: String,
    pub project_name: String,
    pub repository_path: String,
    /// Empty when the repository is not under git.
    pub last_commit_hash: String,
    pub last_indexed_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_objects: usize,
    pub total_documents: usize,
    pub languages: Vec<String>,
    pub index_version: String,
    pub status: IndexStatus,
}

impl IndexState {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.project_id.is_empty() {
            return Err(ModelError::Invalid {
                field: "project_id",
                reason: "must be non-empty".into(),
            });
        }
        Ok(())
    }

    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("project_id".into(), json!(self.project_id));
        payload.insert("project_name".into(), json!(self.project_name));
        payload.insert("repository_path".into(), json!(self.repository_path));
        payload.insert("last_commit_hash".into(), json!(self.last_commit_hash));
        payload.insert(
            "last_indexed_at".into(),
            json!(self.last_indexed_at.to_rfc3339()),
        );
        payload.insert("total_files".into(), json!(self.total_files));
        payload.insert("total_objects".into(), json!(self.total_objects));
        payload.insert("total_documents".into(), json!(self.total_documents));
        payload.insert("languages".into(), json!(self.languages.join(",")));
        payload.insert("index_version".into(), json!(self.index_version));
        payload.insert("status".into(), json!(self.status.as_str()));
        payload
    }

    pub fn from_metadata(payload: &Map<String, Value>) -> Result<Self, ModelError> {
        let status_str = str_key(payload, "status")?;
        let status = IndexStatus::parse(status_str).ok_or(ModelError::Malformed {
            key: "status",
            reason: format!("unknown status {status_str:?}"),
        })?;
        let languages_raw = str_key(payload, "languages")?;
        let languages = if languages_raw.is_empty() {
            Vec::new()
        } else {
            languages_raw.split(',').map(str::to_string).collect()
        };
        let count = |key: &'static str| -> Result<usize, ModelError> {
            payload
                .get(key)
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .ok_or(ModelError::MissingKey(key))
        };

        Ok(IndexState {
            project_id: str_key(payload, "project_id")?.to_string(),
            project_name: str_key(payload, "project_name")?.to_string(),
            repository_path: str_key(payload, "repository_path")?.to_string(),
            last_commit_hash: str_key(payload, "last_commit_hash")?.to_string(),
            last_indexed_at: timestamp_key(payload, "last_indexed_at")?,
            total_files: count("total_files")?,
            total_objects: count("total_objects")?,
            total_documents: count("total_documents")?,
            languages,
            index_version: str_key(payload, "index_version")?.to_string(),
            status,
        })
    }
}

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// A retrieval request against an indexed project.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query_text: String,
    pub limit: usize,
    pub type_filter: Option<String>,
    pub language_filter: Option<String>,
    pub file_filter: Option<String>,
    pub min_score: f32,
    /// Pre-computed query embedding; skips the embedding provider when set.
    pub query_embedding: Option<Vec<f32>>,
}

impl SearchQuery {
    pub fn new(query_text: impl Into<String>, limit: usize) -> Self {
        SearchQuery {
            query_text: query_text.into(),
            limit,
            ..Default::default()
        }
    }
}

/// Score components for a single search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchScoring {
    pub final_score: f32,
    #[serde(default)]
    pub graph_score: f32,
}

/// A single ranked retrieval result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_path: String,
    pub content: String,
    pub language: String,
    /// Object kind for code, node kind for documents.
    pub node_type: String,
    pub start_line: u32,
    pub end_line: u32,
    /// `"code"` or `"document"`.
    pub result_type: String,
    pub scoring: SearchScoring,
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    pub fn score(&self) -> f32 {
        self.scoring.final_score
    }

    pub fn is_document(&self) -> bool {
        self.result_type == "document"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object() -> CodeObject {
        let mut obj = CodeObject::new(
            "/repo/src/orders.py",
            "src/orders.py",
            ObjectKind::Class,
            "OrderService",
            Lang::Python,
            10,
            42,
            "class OrderService:\n    pass\n",
        );
        obj.qualified_name = Some("OrderService".into());
        obj.signature = Some("class OrderService(BaseService)".into());
        obj.docstring = Some("Handles orders.".into());
        obj.parent_id = Some("feedfacefeedfacefeedfacefeedface".into());
        obj.ast_metadata = Some(AstMetadata {
            calls: vec!["validate".into()],
            references: vec!["db".into()],
            complexity: 3,
            ..Default::default()
        });
        obj
    }

    #[test]
    fn code_object_round_trips_through_metadata() {
        let obj = sample_object();
        let payload = obj.to_metadata();
        let back = CodeObject::from_metadata(&payload).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn code_object_validation_rejects_inverted_range() {
        let mut obj = sample_object();
        obj.end_line = 5;
        assert!(obj.validate().is_err());
    }

    #[test]
    fn document_node_round_trips_through_metadata() {
        let mut doc = DocumentNode::new(
            "/repo/docs/setup.md",
            "docs/setup.md",
            NodeKind::Markdown,
            "## Install\nRun `pip install`.",
            2,
        );
        doc.total_chunks = 5;
        doc.parent_doc_id = Some("docs/setup.md".into());
        doc.title = Some("Install".into());
        doc.start_line = Some(12);
        doc.end_line = Some(13);
        doc.related_code = vec![CodeRef::InlineCode {
            reference: "pip install".into(),
            context: "Run `pip install`.".into(),
        }];

        let back = DocumentNode::from_metadata(&doc.to_metadata()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn config_node_round_trips_config_fields() {
        let mut doc = DocumentNode::new(
            "/repo/app.yaml",
            "app.yaml",
            NodeKind::Config,
            "Configuration: database\n\ndatabase:\n  host: ${DB_HOST}\n",
            0,
        );
        doc.config_keys = vec!["database.host".into()];
        doc.config_format = Some("yaml".into());
        doc.env_references = vec!["DB_HOST".into()];
        doc.section_depth = Some(1);

        let back = DocumentNode::from_metadata(&doc.to_metadata()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn relationship_inverse_swaps_endpoints_and_keeps_confidence() {
        let a = sample_object();
        let b = CodeObject::new(
            "/repo/src/base.py",
            "src/base.py",
            ObjectKind::Class,
            "BaseService",
            Lang::Python,
            1,
            4,
            "class BaseService:\n    pass\n",
        );
        let rel = Relationship::between(&a, &b, RelationKind::Extends, 0.9);
        let inv = rel.inverse().unwrap();
        assert_eq!(inv.relation, RelationKind::ExtendedBy);
        assert_eq!(inv.source_id, rel.target_id);
        assert_eq!(inv.target_id, rel.source_id);
        assert_eq!(inv.confidence, rel.confidence);
        assert!(inv.inverse().is_none());

        let back = Relationship::from_metadata(&rel.to_metadata()).unwrap();
        assert_eq!(back, rel);
    }

    #[test]
    fn file_checksum_round_trips_through_metadata() {
        let mut sums = BTreeMap::new();
        sums.insert("aaa".to_string(), "sum-a".to_string());
        sums.insert("bbb".to_string(), "sum-b".to_string());
        let fc = FileChecksum::new("src/orders.py", "filesum", sums);
        let back = FileChecksum::from_metadata(&fc.to_metadata()).unwrap();
        assert_eq!(back, fc);
    }

    #[test]
    fn index_state_round_trips_through_metadata() {
        let state = IndexState {
            project_id: "abc123".into(),
            project_name: "orders".into(),
            repository_path: "/repo".into(),
            last_commit_hash: "deadbeef".into(),
            last_indexed_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            total_files: 12,
            total_objects: 340,
            total_documents: 18,
            languages: vec!["python".into(), "yaml".into()],
            index_version: "0.3.0".into(),
            status: IndexStatus::Idle,
        };
        let back = IndexState::from_metadata(&state.to_metadata()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn index_state_round_trips_empty_languages() {
        let state = IndexState {
            project_id: "abc123".into(),
            project_name: "empty".into(),
            repository_path: "/repo".into(),
            last_commit_hash: String::new(),
            last_indexed_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            total_files: 0,
            total_objects: 0,
            total_documents: 0,
            languages: Vec::new(),
            index_version: "0.3.0".into(),
            status: IndexStatus::Idle,
        };
        let back = IndexState::from_metadata(&state.to_metadata()).unwrap();
        assert!(back.languages.is_empty());
    }

    #[test]
    fn lang_extension_map_covers_code_and_documents() {
        assert_eq!(Lang::from_extension("py"), Some(Lang::Python));
        assert_eq!(Lang::from_extension("tsx"), Some(Lang::TypeScript));
        assert_eq!(Lang::from_extension("yml"), Some(Lang::Yaml));
        assert_eq!(Lang::from_extension("exe"), None);
        assert!(Lang::Python.is_code());
        assert!(!Lang::Markdown.is_code());
    }
}
