//! Graph-based result expansion: one-hop relationship traversal from the top
//! seeds with personalized-PageRank scoring.
//!
//! All traversal is one hop keyed by source id, so the routinely cyclic
//! relationship graph is harmless. Multi-hop expansion is reserved; the
//! config value is validated but anything above one hop is clamped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;

use codequarry_core::{RelationKind, SearchResult, SearchScoring};

use crate::settings::SearchSettings;
use crate::store::VectorStore;

/// Standard PageRank damping factor.
const PPR_ALPHA: f32 = 0.85;

/// Number of top results used as expansion seeds.
pub const DEFAULT_SEED_COUNT: usize = 5;

/// Edge weight for a relation kind; unweighted kinds are not traversed.
pub fn edge_weight(relation: RelationKind) -> Option<f32> {
    match relation {
        RelationKind::Contains | RelationKind::ContainedBy => Some(0.8),
        RelationKind::Calls | RelationKind::CalledBy => Some(0.7),
        RelationKind::References | RelationKind::ReferencedBy => Some(0.6),
        RelationKind::Extends | RelationKind::ExtendedBy => Some(0.5),
        RelationKind::Implements | RelationKind::ImplementedBy => Some(0.5),
        RelationKind::Imports | RelationKind::ImportedBy => Some(0.4),
    }
}

/// Expands hybrid-search results along stored relationships.
pub struct GraphExpander {
    store: Arc<dyn VectorStore>,
    ppr_threshold: f32,
    score_weight: f32,
}

impl GraphExpander {
    pub fn new(store: Arc<dyn VectorStore>, settings: &SearchSettings) -> Self {
        if settings.graph_max_hops > 1 {
            tracing::warn!(
                configured = settings.graph_max_hops,
                "multi-hop expansion is reserved; using one hop"
            );
        }
        GraphExpander {
            store,
            ppr_threshold: settings.graph_ppr_threshold,
            score_weight: settings.graph_score_weight,
        }
    }

    /// Expand the result list in place: the top `top_k` results seed a
    /// one-hop walk, and retained neighbors are appended with graph-scaled
    /// scores and `_graph_expanded` metadata.
    pub async fn expand(&self, results: &mut Vec<SearchResult>, top_k: usize) {
        if results.is_empty() {
            return;
        }
        let initial_ids: HashSet<String> = results.iter().map(|r| r.chunk_id.clone()).collect();

        // First pass: PPR scores for every neighbor, keeping the max per id.
        let mut neighbor_scores: HashMap<String, f32> = HashMap::new();
        for seed in results.iter().take(top_k) {
            let relationships = match self.store.get_relationships(&seed.chunk_id, None).await {
                Ok(rels) => rels,
                Err(e) => {
                    tracing::warn!(seed = %seed.chunk_id, error = %e, "relationship traversal failed");
                    continue;
                }
            };
            for rel in relationships {
                let Some(weight) = edge_weight(rel.relation) else {
                    continue;
                };
                if initial_ids.contains(&rel.target_id) {
                    continue;
                }
                let ppr = seed.scoring.final_score * weight * (1.0 - PPR_ALPHA);
                if ppr < self.ppr_threshold {
                    continue;
                }
                let entry = neighbor_scores.entry(rel.target_id.clone()).or_insert(0.0);
                if ppr > *entry {
                    *entry = ppr;
                }
            }
        }

        if neighbor_scores.is_empty() {
            return;
        }

        // Second pass: one batched fetch, code objects first, documents for
        // whatever ids remain.
        let ids: Vec<String> = neighbor_scores.keys().cloned().collect();
        let mut fetched: HashMap<String, SearchResult> = HashMap::new();

        match self.store.get_code_objects_batch(&ids, false).await {
            Ok(objects) => {
                for obj in objects {
                    fetched.insert(
                        obj.id.clone(),
                        SearchResult {
                            chunk_id: obj.id.clone(),
                            file_path: obj.relative_path.clone(),
                            content: obj.content,
                            language: obj.language.as_str().to_string(),
                            node_type: obj.kind.as_str().to_string(),
                            start_line: obj.start_line,
                            end_line: obj.end_line,
                            result_type: "code".into(),
                            scoring: SearchScoring::default(),
                            metadata: serde_json::Map::new(),
                        },
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch fetch of expanded code objects failed");
                return;
            }
        }

        let remaining: Vec<String> = ids
            .iter()
            .filter(|id| !fetched.contains_key(*id))
            .cloned()
            .collect();
        if !remaining.is_empty() {
            match self.store.get_documents_batch(&remaining).await {
                Ok(documents) => {
                    for doc in documents {
                        fetched.insert(
                            doc.id.clone(),
                            SearchResult {
                                chunk_id: doc.id.clone(),
                                file_path: doc.relative_path.clone(),
                                content: doc.content.clone(),
                                language: doc.language.clone().unwrap_or_default(),
                                node_type: doc.kind.as_str().to_string(),
                                start_line: doc.start_line.unwrap_or(0),
                                end_line: doc.end_line.unwrap_or(0),
                                result_type: "document".into(),
                                scoring: SearchScoring::default(),
                                metadata: serde_json::Map::new(),
                            },
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch fetch of expanded documents failed");
                }
            }
        }

        let mut expanded = 0usize;
        for (id, ppr) in neighbor_scores {
            let Some(mut result) = fetched.remove(&id) else {
                continue;
            };
            result.scoring.graph_score = ppr;
            result.scoring.final_score = ppr * self.score_weight;
            result
                .metadata
                .insert("_graph_expanded".into(), json!(true));
            result.metadata.insert("_ppr_score".into(), json!(ppr));
            results.push(result);
            expanded += 1;
        }

        results.sort_by(|a, b| {
            b.scoring
                .final_score
                .partial_cmp(&a.scoring.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(expanded, threshold = self.ppr_threshold, "graph expansion complete");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::MemoryStore;
    use crate::settings::{FieldWeights, QdrantSettings};
    use codequarry_core::{CodeObject, Lang, ObjectKind, Relationship};

    fn seed_result(id: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: id.to_string(),
            file_path: "src/a.py".into(),
            content: String::new(),
            language: "python".into(),
            node_type: "function".into(),
            start_line: 1,
            end_line: 2,
            result_type: "code".into(),
            scoring: SearchScoring {
                final_score: score,
                graph_score: 0.0,
            },
            metadata: serde_json::Map::new(),
        }
    }

    fn object(name: &str) -> CodeObject {
        let mut obj = CodeObject::new(
            "/repo/src/a.py",
            "src/a.py",
            ObjectKind::Function,
            name,
            Lang::Python,
            1,
            3,
            format!("def {name}():\n    pass\n"),
        );
        obj.embedding = Some(vec![1.0, 0.0]);
        obj
    }

    async fn store_with_call(
        caller: &CodeObject,
        callee: &CodeObject,
    ) -> Arc<dyn VectorStore> {
        let store = Arc::new(MemoryStore::new(
            &QdrantSettings::default(),
            &FieldWeights::default(),
        ));
        let rel = Relationship::between(caller, callee, RelationKind::Calls, 0.9);
        let inverse = rel.inverse().unwrap();
        store
            .add_code_objects(&[caller.clone(), callee.clone()], &[rel, inverse])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn expansion_appends_neighbors_above_threshold() {
        let caller = object("caller");
        let callee = object("callee");
        let store = store_with_call(&caller, &callee).await;

        let settings = SearchSettings {
            graph_ppr_threshold: 0.05,
            ..Default::default()
        };
        let expander = GraphExpander::new(store, &settings);

        let mut results = vec![seed_result(&caller.id, 1.0)];
        expander.expand(&mut results, DEFAULT_SEED_COUNT).await;

        assert_eq!(results.len(), 2);
        let expanded = results
            .iter()
            .find(|r| r.chunk_id == callee.id)
            .expect("callee expanded");
        assert_eq!(expanded.metadata.get("_graph_expanded"), Some(&json!(true)));
        assert!(expanded.scoring.graph_score > 0.0);
        // ppr = 1.0 * 0.7 * 0.15, scaled by graph_score_weight 0.3
        assert!((expanded.scoring.graph_score - 0.105).abs() < 1e-4);
        assert!((expanded.scoring.final_score - 0.0315).abs() < 1e-4);
    }

    #[tokio::test]
    async fn neighbors_below_threshold_are_dropped() {
        let caller = object("caller");
        let callee = object("callee");
        let store = store_with_call(&caller, &callee).await;

        let expander = GraphExpander::new(store, &SearchSettings::default());
        let mut results = vec![seed_result(&caller.id, 1.0)];
        // ppr = 0.105 < default threshold 0.4
        expander.expand(&mut results, DEFAULT_SEED_COUNT).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn neighbors_already_in_results_are_not_duplicated() {
        let caller = object("caller");
        let callee = object("callee");
        let store = store_with_call(&caller, &callee).await;

        let settings = SearchSettings {
            graph_ppr_threshold: 0.01,
            ..Default::default()
        };
        let expander = GraphExpander::new(store, &settings);
        let mut results = vec![seed_result(&caller.id, 1.0), seed_result(&callee.id, 0.5)];
        expander.expand(&mut results, DEFAULT_SEED_COUNT).await;
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn edge_weights_follow_relation_priorities() {
        assert_eq!(edge_weight(RelationKind::Contains), Some(0.8));
        assert_eq!(edge_weight(RelationKind::Calls), Some(0.7));
        assert_eq!(edge_weight(RelationKind::References), Some(0.6));
        assert_eq!(edge_weight(RelationKind::Extends), Some(0.5));
        assert_eq!(edge_weight(RelationKind::Imports), Some(0.4));
    }
}
