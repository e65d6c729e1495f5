//! Hybrid retrieval: query embedding, fused dense+sparse fetch, graph
//! expansion, type and name boosting, stable ranking, and diversity
//! filtering.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use codequarry_core::{SearchQuery, SearchResult, SearchScoring};

use crate::bm25::tokenize;
use crate::embed::{EmbeddingProvider, InstructionType};
use crate::error::{Error, Result};
use crate::graph::{GraphExpander, DEFAULT_SEED_COUNT};
use crate::settings::SearchSettings;
use crate::store::{HybridQuery, ScoredPoint, VectorStore};

/// Over-fetch multiplier before boosting and diversity filtering.
const OVERFETCH: usize = 3;

/// Executes search queries end-to-end against an indexed project.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: SearchSettings,
    expander: Option<GraphExpander>,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: SearchSettings,
    ) -> Self {
        let expander = settings
            .enable_graph_expansion
            .then(|| GraphExpander::new(store.clone(), &settings));
        Retriever {
            store,
            embedder,
            settings,
            expander,
        }
    }

    /// Search with the default NL→code query instruction.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.search_with_instruction(query, InstructionType::Nl2CodeQuery)
            .await
    }

    pub async fn search_with_instruction(
        &self,
        query: &SearchQuery,
        instruction: InstructionType,
    ) -> Result<Vec<SearchResult>> {
        if query.query_text.trim().is_empty() {
            return Err(Error::InvalidInput("query text must be non-empty".into()));
        }
        if !(0.0..=1.0).contains(&query.min_score) {
            return Err(Error::InvalidInput(format!(
                "min_score {} outside [0, 1]",
                query.min_score
            )));
        }
        let limit = if query.limit == 0 {
            self.settings.default_limit
        } else {
            query.limit
        };

        let query_embedding = match &query.query_embedding {
            Some(embedding) => embedding.clone(),
            None => {
                self.embedder
                    .embed_text(&query.query_text, instruction)
                    .await?
            }
        };

        let points = self
            .store
            .hybrid_search(&HybridQuery {
                dense: query_embedding,
                text: query.query_text.clone(),
                limit: limit * OVERFETCH,
                type_filter: query.type_filter.clone(),
                language_filter: query.language_filter.clone(),
                file_filter: query.file_filter.clone(),
            })
            .await?;

        let mut results: Vec<SearchResult> = points.iter().map(point_to_result).collect();

        if let Some(expander) = &self.expander {
            expander.expand(&mut results, DEFAULT_SEED_COUNT).await;
        }

        self.apply_boosting(&mut results, &query.query_text);
        // Stable sort keeps insertion order for equal scores.
        results.sort_by(|a, b| {
            b.scoring
                .final_score
                .partial_cmp(&a.scoring.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut results = self.apply_diversity(results);

        if query.min_score > 0.0 {
            results.retain(|r| r.scoring.final_score >= query.min_score);
        }
        results.truncate(limit);
        Ok(results)
    }

    /// Additive type and name-match boosting, then the per-object weight.
    fn apply_boosting(&self, results: &mut [SearchResult], query_text: &str) {
        let query_lower = query_text.to_lowercase().trim().to_string();
        let query_tokens: HashSet<String> = tokenize(&query_lower).into_iter().collect();

        for result in results.iter_mut() {
            let base = result.scoring.final_score;
            let mut boost = self.settings.type_boosting.for_kind(&result.node_type);

            let name = result
                .metadata
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let qualified = result
                .metadata
                .get("qualified_name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let name_tokens: HashSet<String> = tokenize(&name).into_iter().collect();

            if query_lower == name {
                boost += 0.25;
            } else if !qualified.is_empty() && qualified.contains(&query_lower) {
                boost += 0.20;
            } else if !query_tokens.is_empty() && !name_tokens.is_empty() {
                if name_tokens.is_subset(&query_tokens) {
                    boost += 0.15;
                } else if query_tokens.is_subset(&name_tokens) {
                    boost += 0.12;
                } else {
                    let overlap = query_tokens.intersection(&name_tokens).count();
                    if overlap > 0 {
                        boost += overlap as f32 / query_tokens.len() as f32 * 0.05;
                    }
                }
            }

            let weight = result
                .metadata
                .get("score_weight")
                .and_then(Value::as_f64)
                .unwrap_or(1.0) as f32;
            result.scoring.final_score = base * (1.0 + boost) * weight;
        }
    }

    /// Keep the first `diversity_preserve_top_n` untouched; afterwards one
    /// chunk per parent document and at most `max_chunks_per_file` code hits
    /// per file.
    fn apply_diversity(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }
        let preserve = self.settings.diversity_preserve_top_n.min(results.len());
        let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
        let mut seen_docs: HashSet<String> = HashSet::new();
        let mut file_counts: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();

        let mut iter = results.into_iter();
        for _ in 0..preserve {
            if let Some(result) = iter.next() {
                kept.push(result);
            }
        }

        for result in iter {
            if result.is_document() {
                let parent = result
                    .metadata
                    .get("parent_doc_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(&result.file_path)
                    .to_string();
                if seen_docs.insert(parent) {
                    kept.push(result);
                }
            } else {
                let count = file_counts.entry(result.file_path.clone()).or_insert(0);
                if *count < self.settings.max_chunks_per_file {
                    *count += 1;
                    kept.push(result);
                }
            }
        }
        kept
    }
}

// ---------------------------------------------------------------------------
// Point decoding
// ---------------------------------------------------------------------------

fn normalize_path(path: &str) -> String {
    path.strip_prefix("../").unwrap_or(path).to_string()
}

fn parse_json_field(payload: &Map<String, Value>, key: &str, default: Value) -> Value {
    match payload.get(key).and_then(Value::as_str) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "malformed JSON in storage");
            default
        }),
        _ => default,
    }
}

/// Shape a scored point into a search result with type-appropriate metadata.
fn point_to_result(point: &ScoredPoint) -> SearchResult {
    let payload = &point.payload;
    let result_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("code")
        .to_string();
    let get = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or("");
    let get_u64 = |key: &str| payload.get(key).and_then(Value::as_u64).unwrap_or(0);

    let relative_path = normalize_path(if get("relative_path").is_empty() {
        get("file_path")
    } else {
        get("relative_path")
    });

    let mut metadata = Map::new();
    let node_type;
    if result_type == "document" {
        node_type = if get("node_type").is_empty() {
            "markdown".to_string()
        } else {
            get("node_type").to_string()
        };
        let display_name = if !get("title").is_empty() {
            get("title").to_string()
        } else {
            get("file_path")
                .rsplit('/')
                .next()
                .unwrap_or("Untitled")
                .to_string()
        };
        metadata.insert("name".into(), json!(display_name));
        metadata.insert("title".into(), json!(get("title")));
        metadata.insert("node_type".into(), json!(node_type));
        metadata.insert("chunk_index".into(), json!(get_u64("chunk_index")));
        metadata.insert("total_chunks".into(), json!(get_u64("total_chunks")));
        metadata.insert("start_line".into(), json!(get_u64("start_line")));
        metadata.insert("end_line".into(), json!(get_u64("end_line")));
        metadata.insert("parent_doc_id".into(), json!(get("parent_doc_id")));
        metadata.insert("relative_path".into(), json!(relative_path));
        if node_type == "markdown" {
            metadata.insert(
                "related_code".into(),
                parse_json_field(payload, "related_code", json!([])),
            );
        } else if node_type == "config" {
            metadata.insert(
                "config_keys".into(),
                parse_json_field(payload, "config_keys", json!([])),
            );
            metadata.insert(
                "env_references".into(),
                parse_json_field(payload, "env_references", json!([])),
            );
            metadata.insert("section_depth".into(), json!(get_u64("section_depth")));
            metadata.insert("config_format".into(), json!(get("config_format")));
        }
    } else {
        node_type = get("object_type").to_string();
        let display_name = if !get("qualified_name").is_empty() {
            get("qualified_name")
        } else if !get("name").is_empty() {
            get("name")
        } else {
            "Anonymous"
        };
        metadata.insert("name".into(), json!(display_name));
        metadata.insert("qualified_name".into(), json!(get("qualified_name")));
        metadata.insert("signature".into(), json!(get("signature")));
        metadata.insert("object_type".into(), json!(get("object_type")));
        metadata.insert("language".into(), json!(get("language")));
        metadata.insert("parent_id".into(), json!(get("parent_id")));
        metadata.insert(
            "ast_metadata".into(),
            parse_json_field(payload, "ast_metadata", json!({})),
        );
        metadata.insert(
            "score_weight".into(),
            payload.get("score_weight").cloned().unwrap_or(json!(1.0)),
        );
        metadata.insert("relative_path".into(), json!(relative_path));
    }

    SearchResult {
        chunk_id: point.id.clone(),
        file_path: get("file_path").to_string(),
        content: get("content").to_string(),
        language: get("language").to_string(),
        node_type,
        start_line: get_u64("start_line") as u32,
        end_line: get_u64("end_line") as u32,
        result_type,
        scoring: SearchScoring {
            final_score: point.score,
            graph_score: 0.0,
        },
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, node_type: &str, result_type: &str, score: f32) -> SearchResult {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(name));
        metadata.insert("qualified_name".into(), json!(name));
        SearchResult {
            chunk_id: name.to_string(),
            file_path: format!("src/{name}.py"),
            content: String::new(),
            language: "python".into(),
            node_type: node_type.to_string(),
            start_line: 1,
            end_line: 2,
            result_type: result_type.to_string(),
            scoring: SearchScoring {
                final_score: score,
                graph_score: 0.0,
            },
            metadata,
        }
    }

    fn retriever() -> Retriever {
        use crate::memstore::MemoryStore;
        use crate::settings::{FieldWeights, QdrantSettings};

        struct NoopEmbedder;
        #[async_trait::async_trait]
        impl EmbeddingProvider for NoopEmbedder {
            async fn initialize(&self) -> Result<()> {
                Ok(())
            }
            async fn cleanup(&self) -> Result<()> {
                Ok(())
            }
            async fn embed_text(
                &self,
                _text: &str,
                _instruction: InstructionType,
            ) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
            async fn embed_batch(
                &self,
                texts: &[String],
                _instruction: InstructionType,
            ) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
            fn batch_size(&self) -> usize {
                8
            }
            fn dimension(&self) -> usize {
                2
            }
        }

        let store = Arc::new(MemoryStore::new(
            &QdrantSettings::default(),
            &FieldWeights::default(),
        ));
        Retriever::new(store, Arc::new(NoopEmbedder), SearchSettings::default())
    }

    #[tokio::test]
    async fn empty_query_text_is_invalid() {
        let retriever = retriever();
        let err = retriever
            .search(&SearchQuery::new("   ", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn out_of_range_min_score_is_invalid() {
        let retriever = retriever();
        let mut query = SearchQuery::new("parse", 5);
        query.min_score = 1.5;
        let err = retriever.search(&query).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_index_returns_empty_list() {
        let retriever = retriever();
        let results = retriever.search(&SearchQuery::new("anything", 5)).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn exact_name_match_gets_strongest_boost() {
        let retriever = retriever();
        let mut results = vec![
            result("parse_json", "function", "code", 0.5),
            result("parse_yaml", "function", "code", 0.5),
        ];
        retriever.apply_boosting(&mut results, "parse_json");

        // Exact match: 0.5 * (1 + 0.10 + 0.25); partial: subset boost only.
        assert!(results[0].scoring.final_score > results[1].scoring.final_score);
        assert!((results[0].scoring.final_score - 0.5 * 1.35).abs() < 1e-6);
    }

    #[test]
    fn token_subset_boosts_are_ordered() {
        let retriever = retriever();
        let mut results = vec![
            result("parse", "function", "code", 1.0),
            result("parse_json_file_reader", "function", "code", 1.0),
        ];
        retriever.apply_boosting(&mut results, "parse json");
        // name tokens {parse} ⊆ query tokens → +0.15
        assert!((results[0].scoring.final_score - 1.0 * (1.0 + 0.10 + 0.15)).abs() < 1e-6);
        // query tokens ⊆ name tokens → +0.12
        assert!((results[1].scoring.final_score - 1.0 * (1.0 + 0.10 + 0.12)).abs() < 1e-6);
    }

    #[test]
    fn score_weight_multiplies_after_boost() {
        let retriever = retriever();
        let mut boosted = vec![result("other_name", "function", "code", 1.0)];
        boosted[0]
            .metadata
            .insert("score_weight".into(), json!(0.5));
        retriever.apply_boosting(&mut boosted, "unrelated_query");
        assert!((boosted[0].scoring.final_score - 1.0 * 1.10 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn diversity_keeps_head_and_dedups_document_parents() {
        let retriever = retriever();
        let mut results = Vec::new();
        for i in 0..3 {
            let mut r = result(&format!("chunk{i}"), "markdown", "document", 1.0 - i as f32 * 0.1);
            r.metadata
                .insert("parent_doc_id".into(), json!("docs/guide.md"));
            results.push(r);
        }
        let kept = retriever.apply_diversity(results);
        // Head preserved plus one more chunk from the same parent document.
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn diversity_caps_code_chunks_per_file() {
        let retriever = retriever();
        let mut results = Vec::new();
        for i in 0..5 {
            let mut r = result(&format!("fn{i}"), "function", "code", 1.0 - i as f32 * 0.1);
            r.file_path = "src/same.py".into();
            results.push(r);
        }
        let kept = retriever.apply_diversity(results);
        // 1 preserved + max_chunks_per_file (2) from the same file.
        assert_eq!(kept.len(), 3);
    }
}
