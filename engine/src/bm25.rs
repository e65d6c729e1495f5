//! Weighted-field BM25 (BM25F) sparse encoding.
//!
//! Token indices are 32-bit FNV-1a hashes, so no vocabulary needs to be
//! built ahead of time; IDF is applied store-side at query time against the
//! live collection's document frequencies.

use std::collections::HashMap;

use codequarry_core::{CodeObject, DocumentNode};

use crate::settings::FieldWeights;
use crate::store::SparseVector;

// ---------------------------------------------------------------------------
// Tokenization
// ---------------------------------------------------------------------------

/// Splits identifiers on non-identifier characters plus camelCase and
/// snake_case boundaries, lowercasing everything and preserving digits.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            word.push(ch);
        } else {
            split_word(&word, &mut tokens);
            word.clear();
        }
    }
    split_word(&word, &mut tokens);
    tokens
}

fn split_word(word: &str, out: &mut Vec<String>) {
    if word.is_empty() {
        return;
    }
    let chars: Vec<char> = word.chars().collect();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 {
            let prev = chars[i - 1];
            let camel_rise = prev.is_lowercase() && c.is_uppercase();
            let camel_fall = i + 1 < chars.len()
                && prev.is_uppercase()
                && c.is_uppercase()
                && chars[i + 1].is_lowercase();
            let digit_edge = prev.is_ascii_digit() != c.is_ascii_digit();
            if camel_rise || camel_fall || digit_edge {
                if !current.is_empty() {
                    out.push(current.to_lowercase());
                }
                current = String::new();
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current.to_lowercase());
    }
}

/// 32-bit FNV-1a hash of a token; stable across processes.
pub fn token_index(token: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in token.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// BM25F encoder over named fields with per-field weights.
#[derive(Debug, Clone)]
pub struct Bm25fEncoder {
    weights: Vec<(&'static str, f32)>,
    pub k1: f32,
    pub b: f32,
    pub avg_dl: f32,
}

impl Bm25fEncoder {
    /// Code-object field schema from the configured weights.
    pub fn for_code(weights: &FieldWeights) -> Self {
        Bm25fEncoder {
            weights: vec![
                ("name", weights.name),
                ("qualified_name", weights.qualified_name),
                ("signature", weights.signature),
                ("docstring", weights.docstring),
                ("content", weights.content),
                ("filename", weights.filename),
                ("file_path", weights.file_path),
            ],
            k1: weights.k1,
            b: weights.b,
            avg_dl: weights.avg_dl,
        }
    }

    /// Simpler three-field schema for documents.
    pub fn for_documents(weights: &FieldWeights) -> Self {
        Bm25fEncoder {
            weights: vec![("name", 5.0), ("content", 5.0), ("file_path", 2.0)],
            k1: weights.k1,
            b: weights.b,
            avg_dl: weights.avg_dl,
        }
    }

    /// Encode named fields into a sparse vector.
    pub fn encode(&self, fields: &[(&str, &str)]) -> SparseVector {
        let mut weighted_tf: HashMap<u32, f32> = HashMap::new();
        let mut doc_len = 0usize;

        for (field, weight) in &self.weights {
            let Some((_, text)) = fields.iter().find(|(name, _)| name == field) else {
                continue;
            };
            let tokens = tokenize(text);
            doc_len += tokens.len();
            for token in tokens {
                *weighted_tf.entry(token_index(&token)).or_insert(0.0) += weight;
            }
        }

        let norm = self.k1 * (1.0 - self.b + self.b * doc_len as f32 / self.avg_dl);
        let mut entries: Vec<(u32, f32)> = weighted_tf
            .into_iter()
            .map(|(index, tf)| (index, tf * (self.k1 + 1.0) / (tf + norm)))
            .collect();
        entries.sort_by_key(|(index, _)| *index);

        SparseVector {
            indices: entries.iter().map(|(i, _)| *i).collect(),
            values: entries.iter().map(|(_, v)| *v).collect(),
        }
    }

    /// Encode a query: unique token indices with unit values; the store's
    /// IDF modifier supplies term rarity.
    pub fn encode_query(&self, text: &str) -> SparseVector {
        let mut indices: Vec<u32> = tokenize(text).iter().map(|t| token_index(t)).collect();
        indices.sort_unstable();
        indices.dedup();
        let values = vec![1.0; indices.len()];
        SparseVector { indices, values }
    }

    /// Sparse encoding of a code object's weighted fields.
    pub fn encode_code_object(&self, obj: &CodeObject) -> SparseVector {
        self.encode(&[
            ("name", obj.name.as_str()),
            ("qualified_name", obj.qualified_name.as_deref().unwrap_or("")),
            ("signature", obj.signature.as_deref().unwrap_or("")),
            ("docstring", obj.docstring.as_deref().unwrap_or("")),
            ("content", obj.content.as_str()),
            ("filename", obj.filename()),
            ("file_path", obj.file_path.as_str()),
        ])
    }

    /// Sparse encoding of a document's three-field schema.
    pub fn encode_document(&self, doc: &DocumentNode) -> SparseVector {
        let name = doc.display_name();
        self.encode(&[
            ("name", name.as_str()),
            ("content", doc.content.as_str()),
            ("file_path", doc.file_path.as_str()),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
