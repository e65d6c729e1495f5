//! In-process vector store backing the embedded storage mode and the test
//! suite.
//!
//! One collection of points, each carrying a dense vector, a BM25F sparse
//! vector, and a flattened payload. Hybrid search runs two prefetch legs
//! (dense cosine, sparse dot with live IDF) fused by RRF or DBSF. Ancillary
//! state lives in synthetic points keyed by a 64-bit hash of the state key.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use serde_json::{json, Map, Value};

use codequarry_core::{
    identity, CodeObject, DocumentNode, FileChecksum, IndexState, RelationKind, Relationship,
};

use crate::bm25::Bm25fEncoder;
use crate::error::{Error, Result};
use crate::settings::{FieldWeights, FusionMethod, QdrantSettings};
use crate::store::{
    checksum_state_key, HybridQuery, ScoredPoint, SparseVector, StoreStatistics, VectorStore,
    INDEX_STATE_KEY,
};

/// Reciprocal-rank-fusion constant.
const RRF_K: f32 = 60.0;

struct StoredPoint {
    dense: Vec<f32>,
    sparse: SparseVector,
    payload: Map<String, Value>,
}

/// Embedded single-collection store.
pub struct MemoryStore {
    points: DashMap<String, StoredPoint>,
    dimension: std::sync::RwLock<Option<usize>>,
    fusion: FusionMethod,
    prefetch_dense: f32,
    prefetch_sparse: f32,
    code_encoder: Bm25fEncoder,
    doc_encoder: Bm25fEncoder,
}

impl MemoryStore {
    pub fn new(storage: &QdrantSettings, weights: &FieldWeights) -> Self {
        MemoryStore {
            points: DashMap::new(),
            dimension: std::sync::RwLock::new(None),
            fusion: storage.fusion_method,
            prefetch_dense: storage.prefetch_ratio_dense,
            prefetch_sparse: storage.prefetch_ratio_sparse,
            code_encoder: Bm25fEncoder::for_code(weights),
            doc_encoder: Bm25fEncoder::for_documents(weights),
        }
    }

    /// All stored vectors share the dimension of the first one written.
    fn check_dimension(&self, dense: &[f32]) -> Result<()> {
        let mut pinned = self.dimension.write().expect("dimension lock");
        match *pinned {
            Some(dim) if dim != dense.len() => Err(Error::storage(format!(
                "embedding dimension mismatch: expected {dim}, got {}",
                dense.len()
            ))),
            Some(_) => Ok(()),
            None => {
                *pinned = Some(dense.len());
                Ok(())
            }
        }
    }

    fn payload_matches(payload: &Map<String, Value>, query: &HybridQuery) -> bool {
        let field = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or("");
        if let Some(type_filter) = &query.type_filter {
            if field("type") != type_filter {
                return false;
            }
        }
        if let Some(language_filter) = &query.language_filter {
            if field("language") != language_filter {
                return false;
            }
        }
        if let Some(file_filter) = &query.file_filter {
            if field("file_path") != file_filter && field("relative_path") != file_filter {
                return false;
            }
        }
        true
    }

    fn path_matches(payload: &Map<String, Value>, file_path: &str) -> bool {
        let field = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or("");
        field("file_path") == file_path || field("relative_path") == file_path
    }

    fn is_entity(payload: &Map<String, Value>) -> bool {
        matches!(
            payload.get("type").and_then(Value::as_str),
            Some("code") | Some("document")
        )
    }

    /// Dense leg: cosine similarity over filtered entity points.
    fn dense_leg(&self, query: &HybridQuery, limit: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .points
            .iter()
            .filter(|entry| {
                Self::is_entity(&entry.value().payload)
                    && Self::payload_matches(&entry.value().payload, query)
            })
            .map(|entry| {
                let score = cosine(&query.dense, &entry.value().dense);
                (entry.key().clone(), score)
            })
            .collect();
        sort_scored(&mut scored);
        scored.truncate(limit);
        scored
    }

    /// Sparse leg: dot product with per-term IDF computed from the live
    /// collection's document frequencies.
    fn sparse_leg(&self, query_sparse: &SparseVector, query: &HybridQuery, limit: usize) -> Vec<(String, f32)> {
        // Document frequency per queried term.
        let mut doc_freq: HashMap<u32, usize> = HashMap::new();
        let mut total_docs = 0usize;
        for entry in self.points.iter() {
            if !Self::is_entity(&entry.value().payload) {
                continue;
            }
            total_docs += 1;
            for index in &query_sparse.indices {
                if entry.value().sparse.indices.binary_search(index).is_ok() {
                    *doc_freq.entry(*index).or_insert(0) += 1;
                }
            }
        }
        if total_docs == 0 {
            return Vec::new();
        }

        let idf = |index: u32| -> f32 {
            let df = doc_freq.get(&index).copied().unwrap_or(0) as f32;
            let n = total_docs as f32;
            ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
        };

        let mut scored: Vec<(String, f32)> = Vec::new();
        for entry in self.points.iter() {
            let point = entry.value();
            if !Self::is_entity(&point.payload) || !Self::payload_matches(&point.payload, query) {
                continue;
            }
            let mut score = 0.0f32;
            for (qi, qv) in query_sparse.indices.iter().zip(&query_sparse.values) {
                if let Ok(pos) = point.sparse.indices.binary_search(qi) {
                    score += qv * point.sparse.values[pos] * idf(*qi);
                }
            }
            if score > 0.0 {
                scored.push((entry.key().clone(), score));
            }
        }
        sort_scored(&mut scored);
        scored.truncate(limit);
        scored
    }

    fn fuse(&self, legs: &[Vec<(String, f32)>]) -> Vec<(String, f32)> {
        let mut fused: HashMap<String, f32> = HashMap::new();
        match self.fusion {
            FusionMethod::Rrf => {
                for leg in legs {
                    for (rank, (id, _)) in leg.iter().enumerate() {
                        *fused.entry(id.clone()).or_insert(0.0) +=
                            1.0 / (RRF_K + rank as f32 + 1.0);
                    }
                }
            }
            FusionMethod::Dbsf => {
                for leg in legs {
                    let normalized = normalize_zscore(leg);
                    for (id, score) in normalized {
                        *fused.entry(id).or_insert(0.0) += score;
                    }
                }
            }
        }
        let mut combined: Vec<(String, f32)> = fused.into_iter().collect();
        sort_scored(&mut combined);
        combined
    }

    fn decode_code_object(point: &StoredPoint, with_vectors: bool) -> Result<CodeObject> {
        let mut obj = CodeObject::from_metadata(&point.payload)?;
        if with_vectors {
            obj.embedding = Some(point.dense.clone());
        }
        Ok(obj)
    }

    fn state_id(key: &str) -> String {
        identity::state_point_id(key).to_string()
    }
}

/// Z-score normalization mapped to `[0, 1]` through ±3σ bounds.
fn normalize_zscore(leg: &[(String, f32)]) -> Vec<(String, f32)> {
    if leg.is_empty() {
        return Vec::new();
    }
    let n = leg.len() as f32;
    let mean = leg.iter().map(|(_, s)| *s).sum::<f32>() / n;
    let variance = leg.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt();
    leg.iter()
        .map(|(id, score)| {
            let normalized = if std == 0.0 {
                0.5
            } else {
                (((score - mean) / std + 3.0) / 6.0).clamp(0.0, 1.0)
            };
            (id.clone(), normalized)
        })
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Descending by score with id as the stable tie-break.
fn sort_scored(scored: &mut [(String, f32)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn add_code_objects(
        &self,
        objects: &[CodeObject],
        relationships: &[Relationship],
    ) -> Result<()> {
        let mut rel_by_source: HashMap<&str, Vec<Value>> = HashMap::new();
        for rel in relationships {
            rel_by_source
                .entry(rel.source_id.as_str())
                .or_default()
                .push(Value::Object(rel.to_metadata()));
        }

        for obj in objects {
            let Some(embedding) = &obj.embedding else {
                tracing::warn!(id = %obj.id, name = %obj.name, "skipping object without embedding");
                continue;
            };
            self.check_dimension(embedding)?;
            let mut payload = obj.to_metadata();
            if let Some(rels) = rel_by_source.get(obj.id.as_str()) {
                payload.insert("relationships".into(), Value::Array(rels.clone()));
            }
            self.points.insert(
                obj.id.clone(),
                StoredPoint {
                    dense: embedding.clone(),
                    sparse: self.code_encoder.encode_code_object(obj),
                    payload,
                },
            );
        }
        Ok(())
    }

    async fn add_documents(&self, documents: &[DocumentNode]) -> Result<()> {
        for doc in documents {
            let Some(embedding) = &doc.embedding else {
                tracing::warn!(id = %doc.id, "skipping document without embedding");
                continue;
            };
            self.check_dimension(embedding)?;
            self.points.insert(
                doc.id.clone(),
                StoredPoint {
                    dense: embedding.clone(),
                    sparse: self.doc_encoder.encode_document(doc),
                    payload: doc.to_metadata(),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.points.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .points
            .iter()
            .filter(|entry| {
                let payload = &entry.value().payload;
                payload.get("type").and_then(Value::as_str) == Some("code")
                    && Self::path_matches(payload, file_path)
            })
            .map(|entry| entry.key().clone())
            .collect();
        self.delete(&ids).await
    }

    async fn set_file_checksum(&self, checksum: &FileChecksum) -> Result<()> {
        let data = serde_json::to_vec(&Value::Object(checksum.to_metadata()))
            .map_err(|e| Error::storage(format!("encode checksum: {e}")))?;
        self.set_state(&checksum_state_key(&checksum.file_path), &data)
            .await
    }

    async fn update_index_state(&self, state: &IndexState) -> Result<()> {
        let data = serde_json::to_vec(&Value::Object(state.to_metadata()))
            .map_err(|e| Error::storage(format!("encode index state: {e}")))?;
        self.set_state(INDEX_STATE_KEY, &data).await?;
        if self.get_state(INDEX_STATE_KEY).await?.is_none() {
            return Err(Error::storage("index state verification failed"));
        }
        tracing::info!(
            project = %state.project_id,
            commit = state.last_commit_hash.get(..8).unwrap_or(""),
            "index state updated"
        );
        Ok(())
    }

    async fn set_state(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        let mut payload = Map::new();
        payload.insert("type".into(), json!("state"));
        payload.insert("data".into(), json!(encoded));
        self.points.insert(
            Self::state_id(key),
            StoredPoint {
                dense: Vec::new(),
                sparse: SparseVector::default(),
                payload,
            },
        );
        Ok(())
    }

    async fn delete_state(&self, key: &str) -> Result<()> {
        self.points.remove(&Self::state_id(key));
        Ok(())
    }

    async fn get_code_object(&self, id: &str) -> Result<Option<CodeObject>> {
        match self.points.get(id) {
            Some(entry)
                if entry.value().payload.get("type").and_then(Value::as_str) == Some("code") =>
            {
                Ok(Some(Self::decode_code_object(entry.value(), true)?))
            }
            _ => Ok(None),
        }
    }

    async fn get_code_objects_batch(
        &self,
        ids: &[String],
        with_vectors: bool,
    ) -> Result<Vec<CodeObject>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(entry) = self.points.get(id) {
                if entry.value().payload.get("type").and_then(Value::as_str) == Some("code") {
                    out.push(Self::decode_code_object(entry.value(), with_vectors)?);
                }
            }
        }
        Ok(out)
    }

    async fn get_code_objects_by_file(&self, file_path: &str) -> Result<Vec<CodeObject>> {
        let mut out = Vec::new();
        for entry in self.points.iter() {
            let payload = &entry.value().payload;
            if payload.get("type").and_then(Value::as_str) == Some("code")
                && Self::path_matches(payload, file_path)
            {
                out.push(Self::decode_code_object(entry.value(), true)?);
            }
        }
        out.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentNode>> {
        match self.points.get(id) {
            Some(entry)
                if entry.value().payload.get("type").and_then(Value::as_str)
                    == Some("document") =>
            {
                let mut doc = DocumentNode::from_metadata(&entry.value().payload)?;
                doc.embedding = Some(entry.value().dense.clone());
                Ok(Some(doc))
            }
            _ => Ok(None),
        }
    }

    async fn get_documents_batch(&self, ids: &[String]) -> Result<Vec<DocumentNode>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(doc) = self.get_document(id).await? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    async fn get_all_documents(&self, limit: usize) -> Result<Vec<DocumentNode>> {
        let mut out = Vec::new();
        for entry in self.points.iter() {
            if entry.value().payload.get("type").and_then(Value::as_str) == Some("document") {
                out.push(DocumentNode::from_metadata(&entry.value().payload)?);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn get_indexed_file_paths(&self) -> Result<HashSet<String>> {
        let mut paths = HashSet::new();
        for entry in self.points.iter() {
            let payload = &entry.value().payload;
            if payload.get("type").and_then(Value::as_str) == Some("code") {
                if let Some(path) = payload.get("relative_path").and_then(Value::as_str) {
                    paths.insert(path.to_string());
                }
            }
        }
        Ok(paths)
    }

    async fn get_file_checksum(&self, file_path: &str) -> Result<Option<FileChecksum>> {
        let Some(raw) = self.get_state(&checksum_state_key(file_path)).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::storage(format!("decode checksum: {e}")))?;
        let Value::Object(map) = value else {
            return Err(Error::storage("checksum state is not an object"));
        };
        Ok(Some(FileChecksum::from_metadata(&map)?))
    }

    async fn get_file_checksums_batch(
        &self,
        file_paths: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for path in file_paths {
            if let Some(checksum) = self.get_file_checksum(path).await? {
                out.insert(path.clone(), checksum.file_checksum);
            }
        }
        Ok(out)
    }

    async fn get_relationships(
        &self,
        source_id: &str,
        relation: Option<RelationKind>,
    ) -> Result<Vec<Relationship>> {
        let Some(entry) = self.points.get(source_id) else {
            return Ok(Vec::new());
        };
        let Some(Value::Array(raw)) = entry.value().payload.get("relationships") else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for item in raw {
            let Value::Object(map) = item else { continue };
            match Relationship::from_metadata(map) {
                Ok(rel) => {
                    if relation.is_none() || relation == Some(rel.relation) {
                        out.push(rel);
                    }
                }
                Err(e) => tracing::warn!(source_id, error = %e, "malformed stored relationship"),
            }
        }
        Ok(out)
    }

    async fn get_index_state(&self) -> Result<Option<IndexState>> {
        let Some(raw) = self.get_state(INDEX_STATE_KEY).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::storage(format!("decode index state: {e}")))?;
        let Value::Object(map) = value else {
            return Err(Error::storage("index state is not an object"));
        };
        Ok(Some(IndexState::from_metadata(&map)?))
    }

    async fn get_statistics(&self) -> Result<StoreStatistics> {
        let mut stats = StoreStatistics::default();
        for entry in self.points.iter() {
            stats.total_count += 1;
            match entry.value().payload.get("type").and_then(Value::as_str) {
                Some("code") => stats.code_count += 1,
                Some("document") => stats.document_count += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.points.get(&Self::state_id(key)) else {
            return Ok(None);
        };
        let Some(encoded) = entry.value().payload.get("data").and_then(Value::as_str) else {
            return Ok(None);
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| Error::storage(format!("decode state {key}: {e}")))
    }

    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Vec<ScoredPoint>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let dense_limit = (query.limit as f32 * self.prefetch_dense).ceil() as usize;
        let sparse_limit = (query.limit as f32 * self.prefetch_sparse).ceil() as usize;

        let query_sparse = self.code_encoder.encode_query(&query.text);
        let dense_leg = self.dense_leg(query, dense_limit.max(query.limit));
        let sparse_leg = if query.text.is_empty() {
            Vec::new()
        } else {
            self.sparse_leg(&query_sparse, query, sparse_limit.max(query.limit))
        };

        let mut fused = self.fuse(&[dense_leg, sparse_leg]);
        fused.truncate(query.limit);

        let mut out = Vec::with_capacity(fused.len());
        for (id, score) in fused {
            if let Some(entry) = self.points.get(&id) {
                out.push(ScoredPoint {
                    id,
                    score,
                    payload: entry.value().payload.clone(),
                    dense: Some(entry.value().dense.clone()),
                });
            }
        }
        Ok(out)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
