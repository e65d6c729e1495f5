//! Shared fixtures for integration tests: deterministic stub providers and
//! a scratch-repository builder.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use codequarry_engine::bm25::tokenize;
use codequarry_engine::embed::{EmbeddingProvider, InstructionType, TranslationProvider};
use codequarry_engine::error::{Error, Result};
use codequarry_engine::memstore::MemoryStore;
use codequarry_engine::pipeline::IndexPipeline;
use codequarry_engine::settings::Settings;

pub const EMBED_DIM: usize = 8;

fn fnv64(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Deterministic embedding: each token contributes a signed unit bump to one
/// of the dimensions, so texts sharing tokens land near each other.
pub fn text_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIM];
    for token in tokenize(text) {
        let h = fnv64(&token);
        let index = (h % EMBED_DIM as u64) as usize;
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        v[index] += sign;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v[0] = 1.0;
    } else {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Hash-based embedding provider counting generated batches and texts.
pub struct StubEmbedder {
    pub texts_embedded: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(StubEmbedder {
            texts_embedded: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn embed_text(&self, text: &str, instruction: InstructionType) -> Result<Vec<f32>> {
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(text_embedding(&format!(
            "{}{text}",
            instruction.default_prefix()
        )))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        instruction: InstructionType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text, instruction).await?);
        }
        Ok(out)
    }

    fn batch_size(&self) -> usize {
        4
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

/// Embedder that rejects any text containing the marker, simulating a
/// transient provider failure on specific batches.
pub struct FlakyEmbedder {
    pub marker: &'static str,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn embed_text(&self, text: &str, instruction: InstructionType) -> Result<Vec<f32>> {
        if text.contains(self.marker) {
            return Err(Error::EmbeddingProvider("simulated device loss".into()));
        }
        Ok(text_embedding(&format!(
            "{}{text}",
            instruction.default_prefix()
        )))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        instruction: InstructionType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text, instruction).await?);
        }
        Ok(out)
    }

    fn batch_size(&self) -> usize {
        4
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

/// Translator that tags text instead of translating it.
pub struct StubTranslator;

#[async_trait]
impl TranslationProvider for StubTranslator {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn translate_text(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String> {
        Ok(format!("({source_lang}->{target_lang}) {text}"))
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate_text(text, source_lang, target_lang).await?);
        }
        Ok(out)
    }

    fn batch_size(&self) -> usize {
        4
    }
}

/// Write a file under the scratch repository, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Pipeline wired to a fresh in-memory store and stub embedder.
pub fn test_pipeline(
    settings: Settings,
) -> (IndexPipeline, Arc<MemoryStore>, Arc<StubEmbedder>) {
    let store = Arc::new(MemoryStore::new(
        &settings.storage.qdrant,
        &settings.indexing.field_weights,
    ));
    let embedder = StubEmbedder::new();
    let pipeline = IndexPipeline::new(settings, embedder.clone(), store.clone());
    (pipeline, store, embedder)
}
