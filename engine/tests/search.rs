//! End-to-end retrieval scenarios: hybrid boosting, graph expansion,
//! diversity filtering, and query validation.

mod helpers;

use std::sync::Arc;

use codequarry_engine::core::SearchQuery;
use codequarry_engine::error::Error;
use codequarry_engine::retrieve::Retriever;
use codequarry_engine::settings::{FusionMethod, Settings};
use codequarry_engine::store::{HybridQuery, VectorStore};
use codequarry_engine::{EmbeddingProvider, InstructionType};

use helpers::{test_pipeline, write_file, StubEmbedder};

async fn indexed_retriever(
    settings: Settings,
    files: &[(&str, &str)],
) -> (
    Retriever,
    Arc<codequarry_engine::MemoryStore>,
    Arc<StubEmbedder>,
    tempfile::TempDir,
) {
    let repo = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        write_file(repo.path(), rel, content);
    }
    let search_settings = settings.search.clone();
    let (pipeline, store, embedder) = test_pipeline(settings);
    pipeline.index_full(repo.path()).await.unwrap();
    let retriever = Retriever::new(store.clone(), embedder.clone(), search_settings);
    (retriever, store, embedder, repo)
}

#[tokio::test]
async fn exact_name_query_outranks_the_sibling_function() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, store, embedder, _repo) = indexed_retriever(
        settings,
        &[
            (
                "src/json_tools.py",
                "def parse_json(raw):\n    return raw\n",
            ),
            (
                "src/yaml_tools.py",
                "def parse_yaml(raw):\n    return raw\n",
            ),
        ],
    )
    .await;

    let results = retriever
        .search(&SearchQuery::new("parse_json", 5))
        .await
        .unwrap();
    assert!(results.len() >= 2);
    assert_eq!(
        results[0].metadata.get("name").unwrap(),
        &serde_json::json!("parse_json")
    );
    assert!(results[0].scoring.final_score > results[1].scoring.final_score);

    // The exact-name boost lifts the hit strictly above its hybrid base.
    let dense = embedder
        .embed_text("parse_json", InstructionType::Nl2CodeQuery)
        .await
        .unwrap();
    let raw = store
        .hybrid_search(&HybridQuery {
            dense,
            text: "parse_json".into(),
            limit: 15,
            ..Default::default()
        })
        .await
        .unwrap();
    let base = raw
        .iter()
        .find(|p| p.payload_str("name") == "parse_json")
        .unwrap()
        .score;
    assert!(results[0].scoring.final_score > base);
}

#[tokio::test]
async fn graph_expansion_pulls_in_the_callee() {
    let mut settings = Settings::default();
    settings.storage.qdrant.fusion_method = FusionMethod::Dbsf;
    settings.search.graph_ppr_threshold = 0.1;
    let (retriever, store, _, _repo) = indexed_retriever(
        settings,
        &[
            (
                "caller.py",
                "from callee_mod import callee\n\ndef caller():\n    return callee()\n",
            ),
            ("callee_mod.py", "def callee():\n    return 1\n"),
        ],
    )
    .await;

    let callee = store
        .get_code_objects_by_file("callee_mod.py")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.name == "callee")
        .unwrap();

    // Restrict the initial fetch to the caller's file so the callee can only
    // arrive through the relationship walk.
    let mut query = SearchQuery::new("caller", 5);
    query.file_filter = Some("caller.py".into());
    let results = retriever.search(&query).await.unwrap();

    let expanded = results
        .iter()
        .find(|r| r.chunk_id == callee.id)
        .expect("callee reached through graph expansion");
    assert_eq!(
        expanded.metadata.get("_graph_expanded"),
        Some(&serde_json::json!(true))
    );
    assert!(expanded.scoring.graph_score > 0.0);
}

#[tokio::test]
async fn expansion_disabled_returns_only_direct_hits() {
    let mut settings = Settings::default();
    settings.storage.qdrant.fusion_method = FusionMethod::Dbsf;
    settings.search.enable_graph_expansion = false;
    let (retriever, _, _, _repo) = indexed_retriever(
        settings,
        &[
            (
                "caller.py",
                "from callee_mod import callee\n\ndef caller():\n    return callee()\n",
            ),
            ("callee_mod.py", "def callee():\n    return 1\n"),
        ],
    )
    .await;

    let mut query = SearchQuery::new("caller", 5);
    query.file_filter = Some("caller.py".into());
    let results = retriever.search(&query).await.unwrap();
    assert!(results
        .iter()
        .all(|r| !r.metadata.contains_key("_graph_expanded")));
}

#[tokio::test]
async fn diversity_filter_caps_chunks_of_one_document() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, _, _, _repo) = indexed_retriever(
        settings,
        &[(
            "docs/guide.md",
            "# Install\n\ninstall the indexer package now\n\n# Configure\n\nconfigure the indexer settings now\n\n# Run\n\nrun the indexer binary now\n",
        )],
    )
    .await;

    let results = retriever
        .search(&SearchQuery::new("indexer", 10))
        .await
        .unwrap();

    // Three chunks share one parent document: the preserved head plus at
    // most one more survive the diversity filter.
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.result_type == "document"));
}

#[tokio::test]
async fn min_score_of_one_empties_the_result_set() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, _, _, _repo) = indexed_retriever(
        settings,
        &[("a.py", "def target():\n    return 1\n")],
    )
    .await;

    let mut query = SearchQuery::new("target", 5);
    query.min_score = 1.0;
    let results = retriever.search(&query).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn filters_that_match_nothing_return_empty_not_error() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, _, _, _repo) = indexed_retriever(
        settings,
        &[("a.py", "def target():\n    return 1\n")],
    )
    .await;

    let mut query = SearchQuery::new("target", 5);
    query.language_filter = Some("java".into());
    let results = retriever.search(&query).await.unwrap();
    assert!(results.is_empty());

    let mut query = SearchQuery::new("target", 5);
    query.type_filter = Some("document".into());
    assert!(retriever.search(&query).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_query_is_rejected_end_to_end() {
    let (retriever, _, _, _repo) =
        indexed_retriever(Settings::default(), &[("a.py", "x = 1\n")]).await;
    let err = retriever.search(&SearchQuery::new("", 5)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn precomputed_query_embedding_skips_the_provider() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, _, embedder, _repo) = indexed_retriever(
        settings,
        &[("a.py", "def target():\n    return 1\n")],
    )
    .await;

    let embedded_before = embedder
        .texts_embedded
        .load(std::sync::atomic::Ordering::SeqCst);
    let mut query = SearchQuery::new("target", 5);
    query.query_embedding = Some(helpers::text_embedding("target"));
    let results = retriever.search(&query).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(
        embedder
            .texts_embedded
            .load(std::sync::atomic::Ordering::SeqCst),
        embedded_before
    );
}

#[tokio::test]
async fn document_results_carry_chunk_metadata() {
    let mut settings = Settings::default();
    settings.search.enable_graph_expansion = false;
    let (retriever, _, _, _repo) = indexed_retriever(
        settings,
        &[(
            "README.md",
            "# Overview\n\nThe retriever fuses dense and sparse search legs.\n",
        )],
    )
    .await;

    let mut query = SearchQuery::new("retriever fuses", 5);
    query.type_filter = Some("document".into());
    let results = retriever.search(&query).await.unwrap();
    assert!(!results.is_empty());

    let doc = &results[0];
    assert_eq!(doc.result_type, "document");
    assert_eq!(doc.metadata.get("node_type"), Some(&serde_json::json!("markdown")));
    assert!(doc.metadata.contains_key("chunk_index"));
    assert!(doc.metadata.contains_key("total_chunks"));
    assert_eq!(
        doc.metadata.get("name"),
        Some(&serde_json::json!("Overview"))
    );
}
