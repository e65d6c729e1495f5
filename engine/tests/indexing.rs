//! End-to-end indexing scenarios: full builds, incremental reuse, deletion
//! cleanup, checksum consistency, and document chunking.

mod helpers;

use std::sync::Arc;

use codequarry_engine::core::{identity, IndexStatus, ObjectKind, RelationKind};
use codequarry_engine::settings::Settings;
use codequarry_engine::store::VectorStore;

use helpers::{test_pipeline, write_file, FlakyEmbedder, StubTranslator};

fn small_class_settings() -> Settings {
    // Force class chunking so the class object is a body-free summary.
    let mut settings = Settings::default();
    settings.indexing.parsing.chunking_threshold_bytes = 10;
    settings.indexing.parsing.chunking_threshold_methods = 0;
    settings
}

#[tokio::test]
async fn full_index_of_a_small_python_file() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "m.py",
        "class A:\n    def f(self):\n        pass\n",
    );

    let (pipeline, store, _) = test_pipeline(Settings::default());
    let report = pipeline.index_full(repo.path()).await.unwrap();

    assert_eq!(report.state.status, IndexStatus::Idle);
    assert_eq!(report.state.total_files, 1);
    assert_eq!(report.state.total_objects, 2);
    assert!(report.state.languages.contains(&"python".to_string()));

    let objects = store.get_code_objects_by_file("m.py").await.unwrap();
    assert_eq!(objects.len(), 2);

    let class = objects.iter().find(|o| o.kind == ObjectKind::Class).unwrap();
    let method = objects.iter().find(|o| o.kind == ObjectKind::Method).unwrap();
    assert_eq!(class.name, "A");
    assert_eq!((class.start_line, class.end_line), (1, 3));
    assert_eq!(method.name, "f");
    assert_eq!((method.start_line, method.end_line), (2, 3));
    assert_eq!(method.parent_id.as_deref(), Some(class.id.as_str()));
    assert_eq!(
        class.id,
        identity::object_id("m.py", "A", ObjectKind::Class, 1, 3)
    );

    let contains = store
        .get_relationships(&class.id, Some(RelationKind::Contains))
        .await
        .unwrap();
    assert_eq!(contains.len(), 1);
    assert_eq!(contains[0].target_id, method.id);

    let contained_by = store
        .get_relationships(&method.id, Some(RelationKind::ContainedBy))
        .await
        .unwrap();
    assert_eq!(contained_by.len(), 1);
    assert_eq!(contained_by[0].target_id, class.id);
    assert_eq!(contained_by[0].confidence, contains[0].confidence);
}

#[tokio::test]
async fn cross_file_inheritance_produces_both_edge_directions() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "base.py", "class Base:\n    pass\n");
    write_file(repo.path(), "child.py", "class Child(Base):\n    pass\n");

    let (pipeline, store, _) = test_pipeline(Settings::default());
    pipeline.index_full(repo.path()).await.unwrap();

    let child = store
        .get_code_objects_by_file("child.py")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.name == "Child")
        .unwrap();
    assert_eq!(child.qualified_name.as_deref(), Some("Child"));

    let base = store
        .get_code_objects_by_file("base.py")
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.name == "Base")
        .unwrap();

    let extends = store
        .get_relationships(&child.id, Some(RelationKind::Extends))
        .await
        .unwrap();
    assert_eq!(extends.len(), 1);
    assert_eq!(extends[0].target_id, base.id);

    let extended_by = store
        .get_relationships(&base.id, Some(RelationKind::ExtendedBy))
        .await
        .unwrap();
    assert_eq!(extended_by.len(), 1);
    assert_eq!(extended_by[0].target_id, child.id);
    assert_eq!(extended_by[0].confidence, extends[0].confidence);
}

#[tokio::test]
async fn incremental_rerun_reuses_unchanged_embeddings() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "m.py",
        "class A:\n    def f(self):\n        pass\n",
    );

    let (pipeline, store, _) = test_pipeline(small_class_settings());
    let first = pipeline.index_full(repo.path()).await.unwrap();
    assert_eq!(first.stats.embeddings_generated, 2);

    let ids_before: Vec<String> = store
        .get_code_objects_by_file("m.py")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id.clone())
        .collect();

    // Modify only the method body, keeping line counts identical.
    write_file(
        repo.path(),
        "m.py",
        "class A:\n    def f(self):\n        return 1\n",
    );
    let second = pipeline.index_incremental(repo.path()).await.unwrap();

    // The class summary is body-free and unchanged, so its embedding is
    // reused; the method changed and is regenerated.
    assert_eq!(second.stats.embeddings_reused, 1);
    assert_eq!(second.stats.embeddings_generated, 1);

    let ids_after: Vec<String> = store
        .get_code_objects_by_file("m.py")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id.clone())
        .collect();
    assert_eq!(ids_before, ids_after);
}

#[tokio::test]
async fn incremental_without_changes_is_idempotent() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "a.py", "def f():\n    return 1\n");

    let (pipeline, _, _) = test_pipeline(Settings::default());
    let first = pipeline.index_full(repo.path()).await.unwrap();

    let second = pipeline.index_incremental(repo.path()).await.unwrap();
    assert_eq!(second.stats.embeddings_generated, 0);
    assert_eq!(second.stats.embeddings_reused, 0);
    assert_eq!(second.state.total_objects, first.state.total_objects);

    let third = pipeline.index_incremental(repo.path()).await.unwrap();
    assert_eq!(third.stats.embeddings_generated, 0);
    assert_eq!(third.state.total_objects, first.state.total_objects);
}

#[tokio::test]
async fn deleting_a_file_removes_its_objects_on_rerun() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "kept.py", "def kept():\n    return 1\n");
    write_file(repo.path(), "gone.py", "def gone():\n    return 2\n");

    let (pipeline, store, _) = test_pipeline(Settings::default());
    pipeline.index_full(repo.path()).await.unwrap();
    assert_eq!(store.get_code_objects_by_file("gone.py").await.unwrap().len(), 1);

    std::fs::remove_file(repo.path().join("gone.py")).unwrap();
    let report = pipeline.index_incremental(repo.path()).await.unwrap();

    assert!(report.stats.deleted_objects >= 1);
    assert!(store
        .get_code_objects_by_file("gone.py")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(store.get_code_objects_by_file("kept.py").await.unwrap().len(), 1);
}

#[tokio::test]
async fn removing_one_object_from_a_file_deletes_it_by_id() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "m.py",
        "def first():\n    return 1\n\ndef second():\n    return 2\n",
    );

    let (pipeline, store, _) = test_pipeline(Settings::default());
    pipeline.index_full(repo.path()).await.unwrap();
    assert_eq!(store.get_code_objects_by_file("m.py").await.unwrap().len(), 2);

    write_file(repo.path(), "m.py", "def first():\n    return 1\n");
    let report = pipeline.index_incremental(repo.path()).await.unwrap();

    assert_eq!(report.stats.deleted_objects, 1);
    let remaining = store.get_code_objects_by_file("m.py").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "first");
}

#[tokio::test]
async fn empty_repository_indexes_clean() {
    let repo = tempfile::tempdir().unwrap();
    let (pipeline, store, _) = test_pipeline(Settings::default());
    let report = pipeline.index_full(repo.path()).await.unwrap();

    assert_eq!(report.state.total_files, 0);
    assert_eq!(report.state.total_objects, 0);
    assert_eq!(report.state.total_documents, 0);
    assert_eq!(store.get_statistics().await.unwrap().code_count, 0);
}

#[tokio::test]
async fn checksums_match_file_content_after_a_run() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "a.py", "def f():\n    return 1\n");
    write_file(repo.path(), "README.md", "# Title\n\nSome prose.\n");

    let (pipeline, store, _) = test_pipeline(Settings::default());
    pipeline.index_full(repo.path()).await.unwrap();

    for rel in ["a.py", "README.md"] {
        let cached = store.get_file_checksum(rel).await.unwrap().unwrap();
        let on_disk = identity::file_checksum(&repo.path().join(rel)).unwrap();
        assert_eq!(cached.file_checksum, on_disk, "checksum for {rel}");
    }
}

#[tokio::test]
async fn reindexing_identical_content_yields_identical_ids() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "svc.py",
        "class Svc:\n    def run(self):\n        return 1\n",
    );

    let (first_pipeline, first_store, _) = test_pipeline(Settings::default());
    first_pipeline.index_full(repo.path()).await.unwrap();
    let (second_pipeline, second_store, _) = test_pipeline(Settings::default());
    second_pipeline.index_full(repo.path()).await.unwrap();

    let mut first_ids: Vec<String> = first_store
        .get_code_objects_by_file("svc.py")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id.clone())
        .collect();
    let mut second_ids: Vec<String> = second_store
        .get_code_objects_by_file("svc.py")
        .await
        .unwrap()
        .iter()
        .map(|o| o.id.clone())
        .collect();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);

    // No two distinct entities share an id.
    first_ids.dedup();
    assert_eq!(first_ids.len(), second_ids.len());
}

#[tokio::test]
async fn documents_are_chunked_and_stored_alongside_code() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "src/app.py", "def main():\n    return 0\n");
    write_file(
        repo.path(),
        "README.md",
        "# Project\n\nIntro.\n\n## Setup\n\nRun `pip install`.\n",
    );
    write_file(
        repo.path(),
        "conf/app.yaml",
        "database:\n  host: ${DB_HOST}\n  port: 5432\n",
    );

    let (pipeline, store, _) = test_pipeline(Settings::default());
    let report = pipeline.index_full(repo.path()).await.unwrap();

    assert_eq!(report.state.total_files, 3);
    assert!(report.state.total_documents >= 2);

    let documents = store.get_all_documents(100).await.unwrap();
    let markdown: Vec<_> = documents
        .iter()
        .filter(|d| d.relative_path == "README.md")
        .collect();
    assert!(markdown.len() >= 2);
    assert!(markdown
        .iter()
        .all(|d| d.parent_doc_id.as_deref() == Some("README.md")));

    let config: Vec<_> = documents
        .iter()
        .filter(|d| d.relative_path == "conf/app.yaml")
        .collect();
    assert_eq!(config.len(), 1);
    assert!(config[0]
        .env_references
        .contains(&"DB_HOST".to_string()));
}

#[tokio::test]
async fn non_english_documents_are_translated_before_embedding() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "docs/guide.md",
        "# 안내\n\n설정 파일을 변경하세요 그리고 서버를 다시 시작하세요\n",
    );

    let settings = Settings::default();
    let store = Arc::new(codequarry_engine::MemoryStore::new(
        &settings.storage.qdrant,
        &settings.indexing.field_weights,
    ));
    let embedder = helpers::StubEmbedder::new();
    let pipeline =
        codequarry_engine::IndexPipeline::new(settings, embedder, store.clone())
            .with_translator(Arc::new(StubTranslator));

    pipeline.index_full(repo.path()).await.unwrap();

    let documents = store.get_all_documents(10).await.unwrap();
    let translated = documents
        .iter()
        .find(|d| d.metadata.contains_key("original_lang"))
        .expect("at least one translated chunk");
    assert_eq!(
        translated.metadata.get("original_lang").unwrap(),
        &serde_json::json!("ko")
    );
    assert!(translated.content.starts_with("(ko->en)"));
}

#[tokio::test]
async fn embedding_failure_on_one_document_chunk_skips_it_and_continues() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "src/app.py", "def main():\n    return 0\n");
    write_file(repo.path(), "docs/good.md", "# Good\n\nPlain searchable prose.\n");
    write_file(
        repo.path(),
        "docs/poison.md",
        "# Poison\n\nUNEMBEDDABLE payload inside.\n",
    );

    // One file per chunk so the poisoned document fails in isolation.
    let mut settings = Settings::default();
    settings.indexing.file_chunk_size = 1;
    let store = Arc::new(codequarry_engine::MemoryStore::new(
        &settings.storage.qdrant,
        &settings.indexing.field_weights,
    ));
    let pipeline = codequarry_engine::IndexPipeline::new(
        settings,
        Arc::new(FlakyEmbedder {
            marker: "UNEMBEDDABLE",
        }),
        store.clone(),
    );

    let report = pipeline.index_full(repo.path()).await.unwrap();

    assert!(report.stats.failed_chunks >= 1);
    assert_eq!(report.state.status, IndexStatus::Idle);
    assert_eq!(
        store
            .get_code_objects_by_file("src/app.py")
            .await
            .unwrap()
            .len(),
        1
    );

    let documents = store.get_all_documents(100).await.unwrap();
    assert!(documents
        .iter()
        .any(|d| d.relative_path == "docs/good.md"));
    assert!(documents
        .iter()
        .all(|d| d.relative_path != "docs/poison.md"));

    // The failed chunk never reaches the checksum cache, so a later run
    // retries it.
    assert!(store
        .get_file_checksum("docs/poison.md")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get_file_checksum("docs/good.md")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn provider_failing_every_document_chunk_fails_the_run() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "docs/only.md",
        "# Only\n\nUNEMBEDDABLE payload.\n",
    );

    let settings = Settings::default();
    let store = Arc::new(codequarry_engine::MemoryStore::new(
        &settings.storage.qdrant,
        &settings.indexing.field_weights,
    ));
    let pipeline = codequarry_engine::IndexPipeline::new(
        settings,
        Arc::new(FlakyEmbedder {
            marker: "UNEMBEDDABLE",
        }),
        store.clone(),
    );

    let err = pipeline.index_full(repo.path()).await.unwrap_err();
    assert!(matches!(
        err,
        codequarry_engine::Error::EmbeddingProvider(_)
    ));
    // The run aborted before finalize, so no state record exists.
    assert!(store.get_index_state().await.unwrap().is_none());
}

#[tokio::test]
async fn unparseable_file_is_skipped_and_the_run_continues() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "good.py", "def ok():\n    return 1\n");
    write_file(repo.path(), "bad.py", "def broken(:\n    ((((\n");

    let mut settings = Settings::default();
    settings.indexing.parsing.partial_parse_threshold = 0.99;
    let (pipeline, store, _) = test_pipeline(settings);
    let report = pipeline.index_full(repo.path()).await.unwrap();

    assert!(report.stats.failed_files >= 1);
    assert_eq!(store.get_code_objects_by_file("good.py").await.unwrap().len(), 1);
    assert!(store.get_code_objects_by_file("bad.py").await.unwrap().is_empty());
}

#[tokio::test]
async fn inverse_completeness_holds_for_every_stored_edge() {
    let repo = tempfile::tempdir().unwrap();
    write_file(
        repo.path(),
        "m.py",
        "class Base:\n    pass\n\nclass Child(Base):\n    def act(self):\n        return helper()\n\ndef helper():\n    return 1\n",
    );

    let (pipeline, store, _) = test_pipeline(Settings::default());
    pipeline.index_full(repo.path()).await.unwrap();

    let objects = store.get_code_objects_by_file("m.py").await.unwrap();
    for obj in &objects {
        for rel in store.get_relationships(&obj.id, None).await.unwrap() {
            let Some(inverse_kind) = rel.relation.inverse() else {
                continue;
            };
            let inverse_edges = store
                .get_relationships(&rel.target_id, Some(inverse_kind))
                .await
                .unwrap();
            let paired = inverse_edges
                .iter()
                .find(|inv| inv.target_id == rel.source_id)
                .unwrap_or_else(|| {
                    panic!(
                        "missing inverse for {:?} {} -> {}",
                        rel.relation, rel.source_name, rel.target_name
                    )
                });
            assert_eq!(paired.confidence, rel.confidence);
        }
    }
}

#[tokio::test]
async fn git_commit_hash_lands_in_index_state() {
    let repo = tempfile::tempdir().unwrap();
    write_file(repo.path(), "a.py", "x = 1\n");

    // Without git: empty commit hash.
    let (pipeline, _, _) = test_pipeline(Settings::default());
    let report = pipeline.index_full(repo.path()).await.unwrap();
    assert!(report.state.last_commit_hash.is_empty());
    assert_eq!(report.state.index_version, "0.3.0");
}
