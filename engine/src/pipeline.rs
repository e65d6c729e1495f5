//! Memory-bounded chunked indexing pipeline.
//!
//! Each run is Scan → (per chunk: Extract → Embed → Persist → barrier) →
//! Finalize. Chunks are fixed-size slices of file paths; every chunk is
//! durable before the next one starts, so an interrupted run leaves the
//! collection consistent but incomplete and the index state unwritten.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use codequarry_core::{
    identity, CodeObject, DocumentNode, IndexState, IndexStatus, Relationship,
};

use crate::checksum::ChangeDetector;
use crate::config::ConfigChunker;
use crate::embed::{detect_text_language, EmbeddingProvider, InstructionType, TranslationProvider};
use crate::error::{Error, Result};
use crate::extract::{ExtractionOutcome, Extractor, ImportRecord, CONFIDENCE_IMPORTS};
use crate::git;
use crate::markdown::MarkdownChunker;
use crate::scan::{FileScanner, SourceFile};
use crate::settings::Settings;
use crate::store::VectorStore;

/// Schema version written into the index state.
pub const INDEX_VERSION: &str = "0.3.0";

// ---------------------------------------------------------------------------
// Run statistics
// ---------------------------------------------------------------------------

/// Counters for one pipeline chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStats {
    pub files_processed: usize,
    pub objects_count: usize,
    pub relationships_count: usize,
    pub embeddings_generated: usize,
    pub embeddings_reused: usize,
}

/// Aggregated counters for one run.
#[derive(Debug, Clone, Default)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub total_objects: usize,
    pub total_relationships: usize,
    pub embeddings_generated: usize,
    pub embeddings_reused: usize,
    pub total_chunks: usize,
    pub failed_files: usize,
    pub failed_chunks: usize,
    pub deleted_objects: usize,
    pub languages: BTreeSet<String>,
}

impl ProcessingStats {
    fn add_chunk(&mut self, chunk: ChunkStats) {
        self.total_files += chunk.files_processed;
        self.total_objects += chunk.objects_count;
        self.total_relationships += chunk.relationships_count;
        self.embeddings_generated += chunk.embeddings_generated;
        self.embeddings_reused += chunk.embeddings_reused;
    }
}

/// Outcome of one full or incremental run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: IndexState,
    pub stats: ProcessingStats,
    pub documents_indexed: usize,
}

struct FileExtraction {
    file: SourceFile,
    file_checksum: String,
    outcome: ExtractionOutcome,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives full and incremental index builds.
pub struct IndexPipeline {
    settings: Settings,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    translator: Option<Arc<dyn TranslationProvider>>,
    extractor: Arc<Extractor>,
    markdown: MarkdownChunker,
    config_chunker: ConfigChunker,
    detector: ChangeDetector,
}

impl IndexPipeline {
    pub fn new(
        settings: Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let extractor = Arc::new(Extractor::new(settings.indexing.parsing.clone()));
        let detector = ChangeDetector::new(store.clone());
        IndexPipeline {
            settings,
            embedder,
            store,
            translator: None,
            extractor,
            markdown: MarkdownChunker::default(),
            config_chunker: ConfigChunker::default(),
            detector,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn TranslationProvider>) -> Self {
        self.translator = Some(translator);
        self
    }

    // -- entry points ------------------------------------------------------

    /// Full build: every discovered file is extracted and embedded.
    pub async fn index_full(&self, repository_path: &Path) -> Result<RunReport> {
        tracing::info!(repo = %repository_path.display(), "starting full indexing");
        self.store.initialize().await?;

        let scanner = FileScanner::new(
            repository_path,
            &self.settings.indexing,
            &self.settings.project,
        );
        let scanned = scanner.scan()?;
        let scanned_total = scanned.code_files.len() + scanned.document_files.len();

        let mut stats = self
            .process_code_files(&scanned.code_files, false)
            .await?;
        let document_count = self
            .process_documents(&scanned.document_files, &mut stats)
            .await?;

        let state = self
            .finalize(repository_path, scanned_total, &stats, document_count, None)
            .await?;
        Ok(RunReport {
            state,
            stats,
            documents_indexed: document_count,
        })
    }

    /// Incremental build: only files whose checksum changed are processed,
    /// with embedding reuse. Falls through to a full build when no prior
    /// state exists.
    pub async fn index_incremental(&self, repository_path: &Path) -> Result<RunReport> {
        self.store.initialize().await?;
        let Some(previous) = self.store.get_index_state().await? else {
            tracing::warn!("no existing index state, falling back to full indexing");
            return self.index_full(repository_path).await;
        };

        let scanner = FileScanner::new(
            repository_path,
            &self.settings.indexing,
            &self.settings.project,
        );
        let scanned = scanner.scan()?;
        let scanned_total = scanned.code_files.len() + scanned.document_files.len();

        // File-level change detection for both streams.
        let (changed_code, unchanged_code) = self.detector.partition(&scanned.code_files).await?;
        let mut changed_docs = Vec::new();
        for doc in &scanned.document_files {
            if !self.detector.should_skip(doc).await {
                changed_docs.push(doc.clone());
            }
        }

        // Files that vanished from the workspace lose all their objects.
        let mut deleted_objects = 0usize;
        let scanned_paths: BTreeSet<&str> = scanned
            .code_files
            .iter()
            .map(|f| f.rel_path.as_str())
            .collect();
        for indexed in self.store.get_indexed_file_paths().await? {
            if !scanned_paths.contains(indexed.as_str()) {
                deleted_objects += self.store.delete_by_file(&indexed).await?;
                self.store
                    .delete_state(&crate::store::checksum_state_key(&indexed))
                    .await?;
            }
        }

        if changed_code.is_empty() && changed_docs.is_empty() && deleted_objects == 0 {
            tracing::info!("no changes detected");
            return Ok(RunReport {
                state: previous,
                stats: ProcessingStats::default(),
                documents_indexed: 0,
            });
        }
        tracing::info!(
            changed_code = changed_code.len(),
            unchanged_code = unchanged_code.len(),
            changed_docs = changed_docs.len(),
            deleted_objects,
            "incremental change detection complete"
        );

        let mut stats = self.process_code_files(&changed_code, true).await?;
        stats.deleted_objects += deleted_objects;
        let document_count = self.process_documents(&changed_docs, &mut stats).await?;

        let state = self
            .finalize(
                repository_path,
                scanned_total,
                &stats,
                document_count,
                Some(&previous),
            )
            .await?;
        Ok(RunReport {
            state,
            stats,
            documents_indexed: document_count,
        })
    }

    // -- code chunks -------------------------------------------------------

    async fn process_code_files(
        &self,
        files: &[SourceFile],
        reuse_embeddings: bool,
    ) -> Result<ProcessingStats> {
        let mut stats = ProcessingStats::default();
        if files.is_empty() {
            return Ok(stats);
        }

        let chunk_size = self.settings.indexing.file_chunk_size.max(1);
        tracing::info!(
            files = files.len(),
            chunk_size,
            reuse = reuse_embeddings,
            "processing code files"
        );

        for (chunk_index, chunk) in files.chunks(chunk_size).enumerate() {
            match self
                .process_code_chunk(chunk, reuse_embeddings, &mut stats)
                .await
            {
                Ok(chunk_stats) => {
                    stats.add_chunk(chunk_stats);
                    stats.total_chunks += 1;
                    tracing::info!(
                        chunk = chunk_index + 1,
                        objects = chunk_stats.objects_count,
                        total = stats.total_objects,
                        "chunk persisted"
                    );
                }
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    // Per-chunk embedding failures skip the chunk; the run
                    // continues after the memory barrier.
                    stats.failed_chunks += 1;
                    stats.total_chunks += 1;
                    tracing::warn!(chunk = chunk_index + 1, error = %e, "chunk failed");
                }
            }
            self.memory_barrier().await;
        }

        if stats.failed_chunks == stats.total_chunks && stats.total_chunks > 0 {
            return Err(Error::EmbeddingProvider(
                "embedding provider unreachable: every chunk failed".into(),
            ));
        }
        Ok(stats)
    }

    async fn process_code_chunk(
        &self,
        chunk: &[SourceFile],
        reuse_embeddings: bool,
        stats: &mut ProcessingStats,
    ) -> Result<ChunkStats> {
        let extractions = self.extract_chunk(chunk, stats).await;

        // Per-file deletion detection against the cached object maps.
        if reuse_embeddings {
            for extraction in &extractions {
                if let Some(cached) = self
                    .store
                    .get_file_checksum(&extraction.file.rel_path)
                    .await?
                {
                    let deleted =
                        ChangeDetector::deleted_ids(&cached, &extraction.outcome.objects);
                    if !deleted.is_empty() {
                        stats.deleted_objects += self.store.delete(&deleted).await?;
                    }
                }
            }
        }

        let mut objects: Vec<CodeObject> = Vec::new();
        let mut relationships: Vec<Relationship> = Vec::new();
        let mut captures = Vec::new();
        let mut imports: Vec<ImportRecord> = Vec::new();
        for extraction in &extractions {
            objects.extend(extraction.outcome.objects.iter().cloned());
            relationships.extend(extraction.outcome.relationships.iter().cloned());
            captures.extend(extraction.outcome.captures.iter().cloned());
            imports.extend(extraction.outcome.imports.iter().cloned());
        }
        for obj in &objects {
            stats.languages.insert(obj.language.as_str().to_string());
        }

        // Pattern captures and imports resolve against the chunk-global name
        // and path index, then every forward edge gets its inverse.
        relationships.extend(crate::extract::resolve_captures(&captures, &objects));
        relationships.extend(resolve_import_relationships(&imports, &objects));
        append_inverse_relationships(&mut relationships);
        crate::extract::dedup_relationships(&mut relationships);

        let (generated, reused) = self
            .embed_code_objects(&mut objects, reuse_embeddings)
            .await?;

        self.persist_objects(&objects, &relationships).await?;

        // Checksum cache updates land only after the chunk is durable.
        for extraction in &extractions {
            self.detector
                .update_cache(
                    &extraction.file.rel_path,
                    &extraction.file_checksum,
                    &extraction.outcome.objects,
                )
                .await?;
        }

        Ok(ChunkStats {
            files_processed: chunk.len(),
            objects_count: objects.len(),
            relationships_count: relationships.len(),
            embeddings_generated: generated,
            embeddings_reused: reused,
        })
    }

    /// Extract a chunk's files under the bounded concurrency semaphore.
    /// Single-file failures are logged and skipped.
    async fn extract_chunk(
        &self,
        chunk: &[SourceFile],
        stats: &mut ProcessingStats,
    ) -> Vec<FileExtraction> {
        let workers = self.settings.indexing.effective_workers();
        let semaphore = Arc::new(Semaphore::new(workers));

        let mut handles = Vec::with_capacity(chunk.len());
        for file in chunk {
            let file = file.clone();
            let extractor = self.extractor.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let source = match tokio::fs::read_to_string(&file.abs_path).await {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::warn!(path = %file.rel_path, error = %e, "read failed, skipping");
                        return None;
                    }
                };
                let file_checksum = identity::content_checksum(source.as_bytes());
                match extractor.extract_source(
                    &file.abs_path.to_string_lossy(),
                    &file.rel_path,
                    &source,
                ) {
                    Ok(outcome) => Some(FileExtraction {
                        file,
                        file_checksum,
                        outcome,
                    }),
                    Err(e) => {
                        tracing::warn!(path = %file.rel_path, error = %e, "extraction failed, skipping");
                        None
                    }
                }
            }));
        }

        let mut extractions = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Some(extraction)) => extractions.push(extraction),
                Ok(None) => stats.failed_files += 1,
                Err(e) => {
                    stats.failed_files += 1;
                    tracing::warn!(error = %e, "extraction task panicked");
                }
            }
        }
        // Deterministic downstream order regardless of task completion order.
        extractions.sort_by(|a, b| a.file.rel_path.cmp(&b.file.rel_path));
        extractions
    }

    // -- embedding ---------------------------------------------------------

    /// Embed code objects, splitting into a code-content group and a
    /// docstring group. In reuse mode a preliminary batch lookup copies
    /// cached embeddings for checksum-identical objects.
    async fn embed_code_objects(
        &self,
        objects: &mut [CodeObject],
        reuse: bool,
    ) -> Result<(usize, usize)> {
        if objects.is_empty() {
            return Ok((0, 0));
        }

        let mut reused = 0usize;
        if reuse {
            let ids: Vec<String> = objects.iter().map(|o| o.id.clone()).collect();
            let existing = self.store.get_code_objects_batch(&ids, true).await?;
            reused = ChangeDetector::reuse_embeddings(objects, &existing);
        }

        let mut content_group: Vec<usize> = Vec::new();
        let mut docstring_group: Vec<usize> = Vec::new();
        for (index, obj) in objects.iter().enumerate() {
            if obj.embedding.is_some() {
                continue;
            }
            if obj.docstring.as_deref().unwrap_or("").is_empty() {
                content_group.push(index);
            } else {
                docstring_group.push(index);
            }
        }
        let generated = content_group.len() + docstring_group.len();

        let content_texts: Vec<String> = content_group
            .iter()
            .map(|&i| objects[i].content.clone())
            .collect();
        self.embed_into(
            objects,
            &content_group,
            content_texts,
            InstructionType::Nl2CodePassage,
        )
        .await?;

        let docstring_texts: Vec<String> = docstring_group
            .iter()
            .map(|&i| objects[i].docstring.clone().unwrap_or_default())
            .collect();
        self.embed_into(
            objects,
            &docstring_group,
            docstring_texts,
            InstructionType::QaPassage,
        )
        .await?;

        tracing::debug!(generated, reused, "embeddings complete");
        Ok((generated, reused))
    }

    /// Stream `texts` through the provider in provider-sized batches and
    /// write the vectors back onto `objects[indices]` in order. Awaiting each
    /// yielded batch is the pipeline's back-pressure.
    async fn embed_into(
        &self,
        objects: &mut [CodeObject],
        indices: &[usize],
        texts: Vec<String>,
        instruction: InstructionType,
    ) -> Result<()> {
        if texts.is_empty() {
            return Ok(());
        }
        let batch_size = self.embedder.batch_size().max(1);
        let batches: Vec<Vec<String>> = texts
            .chunks(batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let mut stream = self
            .embedder
            .embed_stream(stream::iter(batches).boxed(), instruction);
        let mut cursor = 0usize;
        while let Some(batch) = stream.next().await {
            for embedding in batch? {
                let index = indices[cursor];
                objects[index].embedding = Some(embedding);
                cursor += 1;
            }
        }
        if cursor != indices.len() {
            return Err(Error::EmbeddingProvider(format!(
                "provider yielded {cursor} embeddings for {} texts",
                indices.len()
            )));
        }
        Ok(())
    }

    // -- persistence -------------------------------------------------------

    async fn persist_objects(
        &self,
        objects: &[CodeObject],
        relationships: &[Relationship],
    ) -> Result<()> {
        let batch_size = self.settings.indexing.batch_size.max(1);
        for batch in objects.chunks(batch_size) {
            self.store.add_code_objects(batch, relationships).await?;
        }
        Ok(())
    }

    // -- documents ---------------------------------------------------------

    /// Chunked document processing under the same failure policy as code
    /// chunks: a failed chunk is logged and skipped, the run continues after
    /// the memory barrier, and only a provider that fails every chunk fails
    /// the run. Storage failures abort immediately.
    async fn process_documents(
        &self,
        files: &[SourceFile],
        stats: &mut ProcessingStats,
    ) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.settings.indexing.file_chunk_size.max(1);
        let mut total_documents = 0usize;
        let mut total_chunks = 0usize;
        let mut failed_chunks = 0usize;

        for chunk in files.chunks(chunk_size) {
            total_chunks += 1;
            match self.process_document_chunk(chunk, stats).await {
                Ok(count) => total_documents += count,
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    failed_chunks += 1;
                    stats.failed_chunks += 1;
                    tracing::warn!(chunk = total_chunks, error = %e, "document chunk failed");
                }
            }
            self.memory_barrier().await;
        }

        if failed_chunks == total_chunks && total_chunks > 0 {
            return Err(Error::EmbeddingProvider(
                "embedding provider unreachable: every document chunk failed".into(),
            ));
        }

        tracing::info!(total_documents, "document indexing complete");
        Ok(total_documents)
    }

    async fn process_document_chunk(
        &self,
        chunk: &[SourceFile],
        stats: &mut ProcessingStats,
    ) -> Result<usize> {
        let mut documents: Vec<DocumentNode> = Vec::new();
        let mut checksums: Vec<(String, String)> = Vec::new();

        for file in chunk {
            let content = match tokio::fs::read_to_string(&file.abs_path).await {
                Ok(content) => content,
                Err(e) => {
                    stats.failed_files += 1;
                    tracing::warn!(path = %file.rel_path, error = %e, "read failed, skipping");
                    continue;
                }
            };
            let parsed = if MarkdownChunker::supports(&file.abs_path) {
                Ok(self.markdown.chunk_str(
                    &content,
                    &file.abs_path.to_string_lossy(),
                    &file.rel_path,
                ))
            } else {
                let format = file
                    .abs_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_string();
                self.config_chunker.chunk_str(
                    &content,
                    &file.abs_path.to_string_lossy(),
                    &file.rel_path,
                    &format,
                )
            };
            match parsed {
                Ok(nodes) => {
                    stats
                        .languages
                        .insert(file.language.as_str().to_string());
                    checksums.push((
                        file.rel_path.clone(),
                        identity::content_checksum(content.as_bytes()),
                    ));
                    documents.extend(nodes);
                }
                Err(e) => {
                    stats.failed_files += 1;
                    tracing::warn!(path = %file.rel_path, error = %e, "document chunking failed");
                }
            }
        }

        if documents.is_empty() {
            return Ok(0);
        }

        if self.translator.is_some() {
            self.translate_documents(&mut documents).await;
        }
        self.embed_documents(&mut documents).await?;

        let batch_size = self.settings.indexing.batch_size.max(1);
        for batch in documents.chunks(batch_size) {
            self.store.add_documents(batch).await?;
        }

        // Checksum cache updates land only after the chunk is durable.
        for (rel_path, checksum) in &checksums {
            self.detector.update_cache(rel_path, checksum, &[]).await?;
        }

        Ok(documents.len())
    }

    async fn embed_documents(&self, documents: &mut [DocumentNode]) -> Result<()> {
        let batch_size = self.embedder.batch_size().max(1);
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let batches: Vec<Vec<String>> = texts
            .chunks(batch_size)
            .map(|batch| batch.to_vec())
            .collect();

        let mut stream = self
            .embedder
            .embed_stream(stream::iter(batches).boxed(), InstructionType::QaPassage);
        let mut cursor = 0usize;
        while let Some(batch) = stream.next().await {
            for embedding in batch? {
                documents[cursor].embedding = Some(embedding);
                cursor += 1;
            }
        }
        Ok(())
    }

    /// Translate non-English document content, keeping the original text and
    /// language in the node's metadata. Failures leave the content as-is.
    async fn translate_documents(&self, documents: &mut [DocumentNode]) {
        let Some(translator) = &self.translator else {
            return;
        };
        let mut translated = 0usize;
        for doc in documents.iter_mut() {
            if doc.content.trim().is_empty() {
                continue;
            }
            let lang = detect_text_language(&doc.content);
            if lang == "en" {
                continue;
            }
            match translator.translate_text(&doc.content, lang, "en").await {
                Ok(text) => {
                    doc.metadata
                        .insert("original_text".into(), doc.content.clone().into());
                    doc.metadata.insert("original_lang".into(), lang.into());
                    doc.content = text;
                    translated += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %doc.id, error = %e, "translation failed");
                }
            }
        }
        if translated > 0 {
            tracing::info!(translated, total = documents.len(), "documents translated");
        }
    }

    // -- finalize ----------------------------------------------------------

    /// Release provider buffers between chunks; an entire run may be
    /// cancelled here with all persisted chunks still durable.
    async fn memory_barrier(&self) {
        if let Err(e) = self.embedder.cleanup().await {
            tracing::warn!(error = %e, "provider cleanup failed");
        }
        tracing::trace!("memory barrier");
    }

    /// Write the updated index state after all run data is durable.
    async fn finalize(
        &self,
        repository_path: &Path,
        scanned_files: usize,
        stats: &ProcessingStats,
        document_count: usize,
        previous: Option<&IndexState>,
    ) -> Result<IndexState> {
        let commit = git::current_commit(repository_path).unwrap_or_default();
        let store_stats = self.store.get_statistics().await?;

        let mut languages: BTreeSet<String> = stats.languages.clone();
        if let Some(previous) = previous {
            languages.extend(previous.languages.iter().cloned());
        }

        let abs = repository_path
            .canonicalize()
            .unwrap_or_else(|_| repository_path.to_path_buf());
        let project_name = abs
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".into());

        let state = IndexState {
            project_id: identity::project_id(repository_path),
            project_name,
            repository_path: abs.to_string_lossy().to_string(),
            last_commit_hash: commit,
            last_indexed_at: chrono::Utc::now(),
            total_files: scanned_files,
            total_objects: store_stats.code_count,
            total_documents: store_stats.document_count,
            languages: languages.into_iter().collect(),
            index_version: INDEX_VERSION.into(),
            status: IndexStatus::Idle,
        };
        self.store.update_index_state(&state).await?;

        tracing::info!(
            files = state.total_files,
            objects = state.total_objects,
            documents = state.total_documents,
            generated = stats.embeddings_generated,
            reused = stats.embeddings_reused,
            failed_files = stats.failed_files,
            deleted = stats.deleted_objects,
            documents_indexed = document_count,
            "indexing complete"
        );
        Ok(state)
    }

    /// Run counters for callers that want them alongside the state.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

// ---------------------------------------------------------------------------
// Import resolution and inverses
// ---------------------------------------------------------------------------

/// Resolve import statements against the batch-global name map and the
/// normalized module-path index (`dots.for.slashes`, source extension
/// stripped). Each match yields one IMPORTS edge with fixed confidence.
pub fn resolve_import_relationships(
    imports: &[ImportRecord],
    objects: &[CodeObject],
) -> Vec<Relationship> {
    if imports.is_empty() || objects.is_empty() {
        return Vec::new();
    }

    let mut name_map: HashMap<&str, Vec<&CodeObject>> = HashMap::new();
    let mut file_map: HashMap<&str, Vec<&CodeObject>> = HashMap::new();
    let mut path_index: HashMap<String, Vec<&CodeObject>> = HashMap::new();
    for obj in objects {
        name_map.entry(obj.name.as_str()).or_default().push(obj);
        file_map
            .entry(obj.relative_path.as_str())
            .or_default()
            .push(obj);
        let normalized = normalize_module_path(&obj.relative_path);
        path_index.entry(normalized).or_default().push(obj);
    }

    let mut relationships = Vec::new();
    for import in imports {
        let Some(source_objects) = file_map.get(import.source_file.as_str()) else {
            continue;
        };
        let source = source_objects[0];

        let mut matched: Vec<&CodeObject> = Vec::new();
        if let Some(by_name) = name_map.get(import.imported_name.as_str()) {
            matched.extend(by_name.iter().copied());
        }
        if import.imported_name.contains('.') {
            if let Some(last) = import.imported_name.rsplit('.').next() {
                if let Some(by_last) = name_map.get(last) {
                    matched.extend(by_last.iter().copied());
                }
            }
            if let Some(by_path) = path_index.get(import.imported_name.as_str()) {
                matched.extend(by_path.iter().copied());
            }
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for target in matched {
            if target.id == source.id || !seen.insert(target.id.as_str()) {
                continue;
            }
            relationships.push(Relationship::between(
                source,
                target,
                codequarry_core::RelationKind::Imports,
                CONFIDENCE_IMPORTS,
            ));
        }
    }
    relationships
}

fn normalize_module_path(relative_path: &str) -> String {
    let trimmed = relative_path
        .trim_end_matches(".py")
        .trim_end_matches(".ts")
        .trim_end_matches(".tsx")
        .trim_end_matches(".js")
        .trim_end_matches(".jsx")
        .trim_end_matches(".java");
    trimmed.replace('/', ".")
}

/// Append the auto-generated inverse for every forward edge.
pub fn append_inverse_relationships(relationships: &mut Vec<Relationship>) {
    let inverses: Vec<Relationship> = relationships
        .iter()
        .filter_map(Relationship::inverse)
        .collect();
    relationships.extend(inverses);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use codequarry_core::{Lang, ObjectKind, RelationKind};

    fn object(name: &str, path: &str) -> CodeObject {
        CodeObject::new(
            format!("/repo/{path}"),
            path,
            ObjectKind::Class,
            name,
            Lang::Python,
            1,
            3,
            format!("class {name}:\n    pass\n"),
        )
    }

    #[test]
    fn imports_resolve_by_name_and_module_path() {
        let base = object("Base", "pkg/base.py");
        let child = object("Child", "pkg/child.py");
        let objects = vec![base.clone(), child.clone()];

        let by_name = resolve_import_relationships(
            &[ImportRecord {
                imported_name: "Base".into(),
                source_file: "pkg/child.py".into(),
            }],
            &objects,
        );
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].relation, RelationKind::Imports);
        assert_eq!(by_name[0].source_id, child.id);
        assert_eq!(by_name[0].target_id, base.id);
        assert_eq!(by_name[0].confidence, CONFIDENCE_IMPORTS);

        let by_path = resolve_import_relationships(
            &[ImportRecord {
                imported_name: "pkg.base".into(),
                source_file: "pkg/child.py".into(),
            }],
            &objects,
        );
        assert_eq!(by_path.len(), 1);
        assert_eq!(by_path[0].target_id, base.id);
    }

    #[test]
    fn dotted_imports_also_match_last_segment() {
        let target = object("OrderedDict", "vendor/collections.py");
        let source = object("User", "app/user.py");
        let rels = resolve_import_relationships(
            &[ImportRecord {
                imported_name: "collections.OrderedDict".into(),
                source_file: "app/user.py".into(),
            }],
            &[target.clone(), source],
        );
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].target_id, target.id);
    }

    #[test]
    fn self_imports_are_skipped() {
        let only = object("Solo", "solo.py");
        let rels = resolve_import_relationships(
            &[ImportRecord {
                imported_name: "Solo".into(),
                source_file: "solo.py".into(),
            }],
            &[only],
        );
        assert!(rels.is_empty());
    }

    #[test]
    fn inverses_are_appended_for_every_forward_edge() {
        let a = object("A", "a.py");
        let b = object("B", "b.py");
        let mut rels = vec![
            Relationship::between(&a, &b, RelationKind::Calls, 0.9),
            Relationship::between(&a, &b, RelationKind::Contains, 1.0),
        ];
        append_inverse_relationships(&mut rels);
        assert_eq!(rels.len(), 4);
        assert!(rels.iter().any(|r| r.relation == RelationKind::CalledBy));
        assert!(rels.iter().any(|r| r.relation == RelationKind::ContainedBy));

        // Appending again only duplicates if called twice; inverses of
        // inverses are never generated.
        let inverse_only: Vec<&Relationship> =
            rels.iter().filter(|r| r.relation.is_inverse()).collect();
        assert_eq!(inverse_only.len(), 2);
    }

    #[test]
    fn module_path_normalization_strips_source_extensions() {
        assert_eq!(normalize_module_path("pkg/mod.py"), "pkg.mod");
        assert_eq!(normalize_module_path("src/app.ts"), "src.app");
        assert_eq!(normalize_module_path("a/b/C.java"), "a.b.C");
    }
}
