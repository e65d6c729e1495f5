//! Two-level checksum change detection.
//!
//! File level: skip a file when its whole-file SHA-256 matches the cached
//! record. Object level: after re-extracting a changed file, reuse embeddings
//! for objects whose content checksum is unchanged and report ids that
//! disappeared. Checksum errors degrade safely by treating the file as
//! changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use codequarry_core::{identity, CodeObject, FileChecksum};

use crate::error::Result;
use crate::scan::SourceFile;
use crate::store::VectorStore;

/// Default checksum worker-pool size.
pub const DEFAULT_CHECKSUM_WORKERS: usize = 8;

/// Checksum-based change detector over the vector store.
pub struct ChangeDetector {
    store: Arc<dyn VectorStore>,
    workers: usize,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        ChangeDetector {
            store,
            workers: DEFAULT_CHECKSUM_WORKERS,
        }
    }

    pub fn with_workers(store: Arc<dyn VectorStore>, workers: usize) -> Self {
        ChangeDetector {
            store,
            workers: workers.max(1),
        }
    }

    /// Fast path: true when the file's checksum matches the cached record.
    /// Hash or I/O errors mean "process normally".
    pub async fn should_skip(&self, file: &SourceFile) -> bool {
        let current = match identity::file_checksum(&file.abs_path) {
            Ok(checksum) => checksum,
            Err(e) => {
                tracing::warn!(path = %file.rel_path, error = %e, "checksum failed, not skipping");
                return false;
            }
        };
        match self.store.get_file_checksum(&file.rel_path).await {
            Ok(Some(cached)) => cached.file_checksum == current,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(path = %file.rel_path, error = %e, "checksum lookup failed");
                false
            }
        }
    }

    /// Batched change detection: checksums computed on a bounded worker pool,
    /// cached values fetched in one store call.
    pub async fn partition(
        &self,
        files: &[SourceFile],
    ) -> Result<(Vec<SourceFile>, Vec<SourceFile>)> {
        if files.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let inputs: Vec<SourceFile> = files.to_vec();
        let workers = self.workers;
        let current: Vec<(SourceFile, Option<String>)> =
            tokio::task::spawn_blocking(move || {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .expect("checksum pool");
                pool.install(|| {
                    inputs
                        .into_par_iter()
                        .map(|file| {
                            let checksum = identity::file_checksum(&file.abs_path).ok();
                            (file, checksum)
                        })
                        .collect()
                })
            })
            .await
            .map_err(|e| crate::error::Error::Extraction {
                path: String::new(),
                reason: format!("checksum pool join failed: {e}"),
            })?;

        let paths: Vec<String> = current
            .iter()
            .filter(|(_, checksum)| checksum.is_some())
            .map(|(file, _)| file.rel_path.clone())
            .collect();
        let cached = self.store.get_file_checksums_batch(&paths).await?;

        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        for (file, checksum) in current {
            match checksum {
                Some(checksum) if cached.get(&file.rel_path) == Some(&checksum) => {
                    unchanged.push(file);
                }
                // Checksum failure or cache miss: process normally.
                _ => changed.push(file),
            }
        }

        tracing::info!(
            changed = changed.len(),
            unchanged = unchanged.len(),
            "batch checksum check"
        );
        Ok((changed, unchanged))
    }

    /// Copy cached embeddings onto unchanged objects. Returns the reuse count;
    /// objects left without an embedding need fresh generation.
    pub fn reuse_embeddings(
        new_objects: &mut [CodeObject],
        old_objects: &[CodeObject],
    ) -> usize {
        let old_by_id: std::collections::HashMap<&str, &CodeObject> =
            old_objects.iter().map(|o| (o.id.as_str(), o)).collect();
        let mut reused = 0;
        for obj in new_objects.iter_mut() {
            let Some(old) = old_by_id.get(obj.id.as_str()) else {
                continue;
            };
            if old.checksum == obj.checksum {
                if let Some(embedding) = &old.embedding {
                    obj.embedding = Some(embedding.clone());
                    reused += 1;
                }
            }
        }
        reused
    }

    /// Ids present in the cached per-file map but absent from the freshly
    /// extracted set.
    pub fn deleted_ids(cached: &FileChecksum, new_objects: &[CodeObject]) -> Vec<String> {
        let new_ids: std::collections::HashSet<&str> =
            new_objects.iter().map(|o| o.id.as_str()).collect();
        cached
            .object_checksums
            .keys()
            .filter(|id| !new_ids.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Write the updated per-file record after successful extraction.
    pub async fn update_cache(
        &self,
        rel_path: &str,
        file_checksum: &str,
        objects: &[CodeObject],
    ) -> Result<()> {
        let object_checksums: BTreeMap<String, String> = objects
            .iter()
            .map(|o| (o.id.clone(), o.checksum.clone()))
            .collect();
        let record = FileChecksum::new(rel_path, file_checksum, object_checksums);
        self.store.set_file_checksum(&record).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
