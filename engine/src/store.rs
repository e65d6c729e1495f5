//! Vector-store contract: a typed facade over a single dense+sparse
//! collection holding code objects, documents, relationships, checksum state,
//! and the index state record.
//!
//! The engine is written against this trait; the in-process implementation
//! lives in [`crate::memstore`]. Point ids are the deterministic ids from
//! `codequarry_core::identity`, so re-indexing unchanged content upserts
//! onto the same points.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};

use codequarry_core::{
    CodeObject, DocumentNode, FileChecksum, IndexState, RelationKind, Relationship,
};

use crate::error::Result;

/// State key under which the index state record is stored.
pub const INDEX_STATE_KEY: &str = "index_state";

/// State key for a file's checksum record.
pub fn checksum_state_key(file_path: &str) -> String {
    format!("checksum_{file_path}")
}

/// A sparse vector in index/value form; indices are 32-bit token hashes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// A scored point returned from hybrid search.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
    /// Dense vector, present when the search requested vectors.
    pub dense: Option<Vec<f32>>,
}

impl ScoredPoint {
    pub fn payload_str(&self, key: &str) -> &str {
        self.payload.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// Hybrid search request: one dense leg, one sparse (BM25F) leg.
#[derive(Debug, Clone, Default)]
pub struct HybridQuery {
    pub dense: Vec<f32>,
    pub text: String,
    pub limit: usize,
    pub type_filter: Option<String>,
    pub language_filter: Option<String>,
    pub file_filter: Option<String>,
}

/// Collection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub total_count: usize,
    pub code_count: usize,
    pub document_count: usize,
}

/// Single-collection vector store for one project.
///
/// Writes are atomic per call; a crash between calls leaves the collection
/// consistent but incomplete. Implementations must pin the dense dimension to
/// the first vector ever written.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create or open the collection.
    async fn initialize(&self) -> Result<()>;

    // -- writes ------------------------------------------------------------

    /// Upsert code objects with their relationships. Relationships are
    /// attached to each source object's payload as minimal records; objects
    /// without embeddings are skipped.
    async fn add_code_objects(
        &self,
        objects: &[CodeObject],
        relationships: &[Relationship],
    ) -> Result<()>;

    async fn add_documents(&self, documents: &[DocumentNode]) -> Result<()>;

    /// Delete points by deterministic id, returning how many existed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Delete all code objects extracted from one file.
    async fn delete_by_file(&self, file_path: &str) -> Result<usize>;

    async fn set_file_checksum(&self, checksum: &FileChecksum) -> Result<()>;

    /// Write the index state and verify it reads back.
    async fn update_index_state(&self, state: &IndexState) -> Result<()>;

    async fn set_state(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn delete_state(&self, key: &str) -> Result<()>;

    // -- reads -------------------------------------------------------------

    async fn get_code_object(&self, id: &str) -> Result<Option<CodeObject>>;

    /// Batch fetch; missing ids are skipped, not errors.
    async fn get_code_objects_batch(
        &self,
        ids: &[String],
        with_vectors: bool,
    ) -> Result<Vec<CodeObject>>;

    async fn get_code_objects_by_file(&self, file_path: &str) -> Result<Vec<CodeObject>>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentNode>>;

    async fn get_documents_batch(&self, ids: &[String]) -> Result<Vec<DocumentNode>>;

    async fn get_all_documents(&self, limit: usize) -> Result<Vec<DocumentNode>>;

    /// File paths that currently have indexed code objects.
    async fn get_indexed_file_paths(&self) -> Result<HashSet<String>>;

    async fn get_file_checksum(&self, file_path: &str) -> Result<Option<FileChecksum>>;

    /// Map of file path to whole-file checksum for the given paths.
    async fn get_file_checksums_batch(
        &self,
        file_paths: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Outgoing relationships for a source entity, optionally filtered.
    async fn get_relationships(
        &self,
        source_id: &str,
        relation: Option<RelationKind>,
    ) -> Result<Vec<Relationship>>;

    async fn get_index_state(&self) -> Result<Option<IndexState>>;

    async fn get_statistics(&self) -> Result<StoreStatistics>;

    async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // -- search ------------------------------------------------------------

    /// Two-leg prefetch hybrid search fused by the configured method and
    /// truncated to `limit`. The sparse leg applies store-side IDF so BM25
    /// scores reflect the live collection's document frequencies.
    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<ScoredPoint>>;

    /// Release any held resources.
    async fn close(&self) -> Result<()>;
}
