//! Embedding and translation provider contracts.
//!
//! Providers own their device-memory lifecycle: `initialize` acquires,
//! `cleanup` releases, and the pipeline calls `cleanup` between chunks.
//! Streaming embeds batches one at a time, so awaiting each yielded batch
//! gives the pipeline natural back-pressure.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Instruction types
// ---------------------------------------------------------------------------

/// Task-specific instruction applied to a text before embedding, enabling
/// asymmetric query/passage encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionType {
    Nl2CodeQuery,
    Nl2CodePassage,
    Code2CodeQuery,
    Code2CodePassage,
    QaQuery,
    QaPassage,
    DocumentPassage,
}

impl InstructionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionType::Nl2CodeQuery => "nl2code_query",
            InstructionType::Nl2CodePassage => "nl2code_passage",
            InstructionType::Code2CodeQuery => "code2code_query",
            InstructionType::Code2CodePassage => "code2code_passage",
            InstructionType::QaQuery => "qa_query",
            InstructionType::QaPassage => "qa_passage",
            InstructionType::DocumentPassage => "document_passage",
        }
    }

    /// Default textual prefix realizing the instruction; providers may use
    /// another mechanism.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            InstructionType::Nl2CodeQuery => {
                "Find the most relevant code snippet given the following query:\n"
            }
            InstructionType::Nl2CodePassage | InstructionType::Code2CodePassage => {
                "Candidate code snippet:\n"
            }
            InstructionType::Code2CodeQuery => {
                "Find an equivalent code snippet given the following code snippet:\n"
            }
            InstructionType::QaQuery => {
                "Find the most relevant answer given the following question:\n"
            }
            InstructionType::QaPassage | InstructionType::DocumentPassage => "Candidate answer:\n",
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding provider
// ---------------------------------------------------------------------------

/// Dense embedding provider contract.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Acquire model and device resources.
    async fn initialize(&self) -> Result<()>;

    /// Release device resources; safe to call repeatedly.
    async fn cleanup(&self) -> Result<()>;

    /// Embed one text with the given instruction.
    async fn embed_text(&self, text: &str, instruction: InstructionType) -> Result<Vec<f32>>;

    /// Embed one batch of texts.
    async fn embed_batch(
        &self,
        texts: &[String],
        instruction: InstructionType,
    ) -> Result<Vec<Vec<f32>>>;

    /// Preferred batch size for streaming.
    fn batch_size(&self) -> usize;

    /// Embedding dimensionality.
    fn dimension(&self) -> usize;

    /// Stream embeddings for a sequence of batches; each yielded item is the
    /// embedding set for one input batch, in order.
    fn embed_stream<'a>(
        &'a self,
        batches: BoxStream<'a, Vec<String>>,
        instruction: InstructionType,
    ) -> BoxStream<'a, Result<Vec<Vec<f32>>>> {
        batches
            .then(move |texts| async move { self.embed_batch(&texts, instruction).await })
            .boxed()
    }
}

// ---------------------------------------------------------------------------
// Translation provider
// ---------------------------------------------------------------------------

/// Translation provider contract; target language defaults to English.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn cleanup(&self) -> Result<()>;

    async fn translate_text(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String>;

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>>;

    fn batch_size(&self) -> usize;

    fn translate_stream<'a>(
        &'a self,
        batches: BoxStream<'a, Vec<String>>,
        source_lang: &'a str,
        target_lang: &'a str,
    ) -> BoxStream<'a, Result<Vec<String>>> {
        batches
            .then(move |texts| async move {
                self.translate_batch(&texts, source_lang, target_lang).await
            })
            .boxed()
    }
}

// ---------------------------------------------------------------------------
// Language detection
// ---------------------------------------------------------------------------

/// Cheap script-based language guess for translation routing.
///
/// Returns an ISO 639-1 code; text that is predominantly ASCII is treated as
/// English.
pub fn detect_text_language(text: &str) -> &'static str {
    let mut ascii = 0usize;
    let mut hangul = 0usize;
    let mut kana = 0usize;
    let mut cjk = 0usize;
    let mut cyrillic = 0usize;
    let mut letters = 0usize;

    for ch in text.chars() {
        if !ch.is_alphabetic() {
            continue;
        }
        letters += 1;
        match ch as u32 {
            0x0000..=0x007F => ascii += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => hangul += 1,
            0x3040..=0x30FF => kana += 1,
            0x4E00..=0x9FFF => cjk += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ => {}
        }
    }

    if letters == 0 {
        return "en";
    }
    let dominant = |count: usize| count * 10 >= letters * 3;
    if dominant(hangul) {
        "ko"
    } else if dominant(kana) {
        "ja"
    } else if dominant(cjk) {
        "zh"
    } else if dominant(cyrillic) {
        "ru"
    } else if ascii * 10 >= letters * 9 {
        "en"
    } else {
        "unknown"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
