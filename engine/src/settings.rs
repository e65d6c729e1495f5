//! Engine configuration surface.
//!
//! Mirrors the options the core recognizes; loading from disk and merging CLI
//! flags is the caller's concern. Every field has a serde default so partial
//! TOML documents deserialize cleanly.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub indexing: IndexingSettings,
    pub search: SearchSettings,
    pub storage: StorageSettings,
    pub project: ProjectSettings,
}

impl Settings {
    /// Deserialize settings from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidInput(format!("bad settings: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    /// Files per pipeline chunk.
    pub file_chunk_size: usize,
    /// Upsert batch size.
    pub batch_size: usize,
    /// Per-chunk extractor concurrency; 0 = min(cpu/2, 8).
    pub parallel_workers: usize,
    /// Allow-list of language tags; empty = all supported.
    pub languages: Vec<String>,
    /// Per-file size cap in megabytes.
    pub max_file_size_mb: u64,
    pub parsing: ParsingSettings,
    pub field_weights: FieldWeights,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        IndexingSettings {
            file_chunk_size: 30,
            batch_size: 64,
            parallel_workers: 0,
            languages: Vec::new(),
            max_file_size_mb: 5,
            parsing: ParsingSettings::default(),
            field_weights: FieldWeights::default(),
        }
    }
}

impl IndexingSettings {
    /// Effective extraction concurrency.
    pub fn effective_workers(&self) -> usize {
        if self.parallel_workers > 0 {
            return self.parallel_workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cpus / 2).clamp(1, 8)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParsingSettings {
    /// Default parse timeout in microseconds.
    pub timeout_micros: u64,
    /// Per-language timeout overrides keyed by language tag.
    pub language_overrides: HashMap<String, LanguageOverride>,
    /// Accept partial trees containing ERROR nodes.
    pub enable_error_recovery: bool,
    /// Minimum valid-node ratio for accepting a partial tree.
    pub partial_parse_threshold: f64,
    /// Reuse previous trees for incremental parsing.
    pub enable_incremental_parsing: bool,
    /// Split large classes into summary + methods.
    pub enable_chunking: bool,
    /// Characters before a class is split.
    pub chunking_threshold_bytes: usize,
    /// Method count before a class is split.
    pub chunking_threshold_methods: usize,
}

impl Default for ParsingSettings {
    fn default() -> Self {
        ParsingSettings {
            timeout_micros: 5_000_000,
            language_overrides: HashMap::new(),
            enable_error_recovery: true,
            partial_parse_threshold: 0.5,
            enable_incremental_parsing: false,
            enable_chunking: true,
            chunking_threshold_bytes: 2000,
            chunking_threshold_methods: 20,
        }
    }
}

impl ParsingSettings {
    pub fn timeout_for(&self, language: &str) -> u64 {
        self.language_overrides
            .get(&language.to_lowercase())
            .map(|o| o.timeout_micros)
            .unwrap_or(self.timeout_micros)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageOverride {
    pub timeout_micros: u64,
}

/// BM25F field weights and parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub name: f32,
    pub qualified_name: f32,
    pub signature: f32,
    pub docstring: f32,
    pub content: f32,
    pub filename: f32,
    pub file_path: f32,
    pub k1: f32,
    pub b: f32,
    pub avg_dl: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        FieldWeights {
            name: 15.0,
            qualified_name: 12.0,
            signature: 10.0,
            docstring: 8.0,
            content: 6.0,
            filename: 4.0,
            file_path: 2.0,
            k1: 1.2,
            b: 0.75,
            avg_dl: 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub enable_graph_expansion: bool,
    /// Reserved; the expander honors at most one hop.
    pub graph_max_hops: u32,
    pub graph_ppr_threshold: f32,
    pub graph_score_weight: f32,
    pub max_chunks_per_file: usize,
    pub diversity_preserve_top_n: usize,
    pub type_boosting: TypeBoosting,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            default_limit: 10,
            enable_graph_expansion: true,
            graph_max_hops: 1,
            graph_ppr_threshold: 0.4,
            graph_score_weight: 0.3,
            max_chunks_per_file: 2,
            diversity_preserve_top_n: 1,
            type_boosting: TypeBoosting::default(),
        }
    }
}

/// Additive per-kind boost constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypeBoosting {
    pub class: f32,
    pub method: f32,
    pub function: f32,
    pub interface: f32,
    pub r#enum: f32,
    pub r#struct: f32,
    pub variable: f32,
    pub module: f32,
    pub markdown: f32,
    pub config: f32,
    pub comment: f32,
    pub docstring: f32,
}

impl Default for TypeBoosting {
    fn default() -> Self {
        TypeBoosting {
            class: 0.12,
            method: 0.10,
            function: 0.10,
            interface: 0.06,
            r#enum: 0.08,
            r#struct: 0.06,
            variable: 0.02,
            module: 0.04,
            markdown: 0.07,
            config: 0.05,
            comment: 0.03,
            docstring: 0.04,
        }
    }
}

impl TypeBoosting {
    /// Boost for a node type tag (code object kind or document node kind).
    pub fn for_kind(&self, kind: &str) -> f32 {
        match kind {
            "class" => self.class,
            "method" => self.method,
            "function" => self.function,
            "interface" => self.interface,
            "enum" => self.r#enum,
            "struct" => self.r#struct,
            "variable" => self.variable,
            "module" => self.module,
            "markdown" => self.markdown,
            "config" => self.config,
            "comment" => self.comment,
            "docstring" => self.docstring,
            _ => 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub qdrant: QdrantSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QdrantSettings {
    /// `embedded` or `remote`.
    pub mode: String,
    pub fusion_method: FusionMethod,
    pub prefetch_ratio_dense: f32,
    pub prefetch_ratio_sparse: f32,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        QdrantSettings {
            mode: "embedded".into(),
            fusion_method: FusionMethod::Rrf,
            prefetch_ratio_dense: 7.0,
            prefetch_ratio_sparse: 3.0,
        }
    }
}

/// How the dense and sparse prefetch legs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    #[default]
    Rrf,
    Dbsf,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Gitignore-style include patterns; empty = include everything.
    pub include: Vec<String>,
    /// Gitignore-style exclude patterns applied on top of ignore files.
    pub exclude: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
