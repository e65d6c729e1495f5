//! Configuration-file chunking: YAML (including multi-document), JSON, and
//! Java-style properties files.
//!
//! Strategy is hierarchical adaptive: top-level keys become chunks, oversized
//! map sections recurse into children up to a depth limit, and adjacent
//! sub-minimum chunks are merged afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use codequarry_core::{DocumentNode, NodeKind};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Chunk model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ConfChunk {
    path: String,
    key: String,
    content: String,
    depth: u32,
    size_tokens: usize,
    keys: Vec<String>,
    env_refs: Vec<String>,
    oversized: bool,
    merged_count: usize,
}

// ---------------------------------------------------------------------------
// Metadata helpers
// ---------------------------------------------------------------------------

/// Flattened dotted key paths for a config subtree.
pub fn flatten_keys(value: &Value, prefix: &str) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match child {
                    Value::Object(_) => out.extend(flatten_keys(child, &full)),
                    _ => out.push(full),
                }
            }
        }
        _ => {
            if !prefix.is_empty() {
                out.push(prefix.to_string());
            }
        }
    }
    out
}

/// Environment-variable references in `${VAR}`, `$VAR`, and `%VAR%` forms.
pub fn detect_env_references(text: &str) -> Vec<String> {
    let pattern = Regex::new(
        r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)|%([A-Za-z_][A-Za-z0-9_]*)%",
    )
    .expect("static regex");
    let mut seen = Vec::new();
    for cap in pattern.captures_iter(text) {
        let name = cap
            .get(1)
            .or_else(|| cap.get(2))
            .or_else(|| cap.get(3))
            .map(|m| m.as_str().to_string());
        if let Some(name) = name {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Hierarchical adaptive chunker for configuration files.
pub struct ConfigChunker {
    /// Target chunk size in tokens (~4 chars/token).
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub max_depth: u32,
    token_to_char_ratio: usize,
}

impl Default for ConfigChunker {
    fn default() -> Self {
        ConfigChunker {
            chunk_size: 512,
            min_chunk_size: 100,
            max_chunk_size: 1024,
            max_depth: 4,
            token_to_char_ratio: 4,
        }
    }
}

impl ConfigChunker {
    pub fn supports(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("json") | Some("properties")
        )
    }

    pub fn chunk_file(&self, file_path: &Path, relative_path: &str) -> Result<Vec<DocumentNode>> {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| Error::io(file_path.to_string_lossy(), e))?;
        let format = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.chunk_str(
            &content,
            &file_path.to_string_lossy(),
            relative_path,
            format,
        )
    }

    /// Chunk config content; `format` is the file extension (yaml/yml/json/properties).
    pub fn chunk_str(
        &self,
        content: &str,
        file_path: &str,
        relative_path: &str,
        format: &str,
    ) -> Result<Vec<DocumentNode>> {
        let (chunks, tag) = match format {
            "yaml" | "yml" => (self.chunk_yaml(content)?, "yaml"),
            "json" => (self.chunk_json(content)?, "json"),
            "properties" => (self.chunk_properties(content), "properties"),
            other => return Err(Error::UnsupportedLanguage(other.to_string())),
        };
        let merged = self.optimize(chunks);
        Ok(self.to_nodes(merged, content, file_path, relative_path, tag))
    }

    fn chunk_yaml(&self, content: &str) -> Result<Vec<ConfChunk>> {
        let mut chunks = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = Value::deserialize(document)
                .map_err(|e| Error::InvalidInput(format!("bad yaml: {e}")))?;
            let Value::Object(map) = value else {
                continue;
            };
            for (key, child) in &map {
                chunks.extend(self.chunk_section(key, child, 1, None));
            }
        }
        Ok(chunks)
    }

    fn chunk_json(&self, content: &str) -> Result<Vec<ConfChunk>> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::InvalidInput(format!("bad json: {e}")))?;
        let Value::Object(map) = value else {
            return Ok(Vec::new());
        };
        let mut chunks = Vec::new();
        for (key, child) in &map {
            chunks.extend(self.chunk_section(key, child, 1, None));
        }
        Ok(chunks)
    }

    /// Properties lines grouped by the first dot-separated key segment; a
    /// preceding comment block attaches to the group it introduces.
    fn chunk_properties(&self, content: &str) -> Vec<ConfChunk> {
        let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut pending_comments: Vec<String> = Vec::new();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                pending_comments.push(line.to_string());
                continue;
            }
            let Some((key, _)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let prefix = key.split('.').next().unwrap_or(key).to_string();
            let entry = sections.entry(prefix.clone()).or_insert_with(|| {
                order.push(prefix.clone());
                std::mem::take(&mut pending_comments)
            });
            pending_comments.clear();
            entry.push(line.to_string());
        }

        order
            .into_iter()
            .filter_map(|prefix| {
                let lines = sections.remove(&prefix)?;
                let body = lines.join("\n");
                let keys: Vec<String> = lines
                    .iter()
                    .filter(|l| !l.starts_with('#'))
                    .filter_map(|l| l.split_once('=').map(|(k, _)| k.trim().to_string()))
                    .collect();
                let env_refs = detect_env_references(&body);
                Some(ConfChunk {
                    path: prefix.clone(),
                    key: prefix,
                    size_tokens: body.len() / self.token_to_char_ratio,
                    content: body,
                    depth: 1,
                    keys,
                    env_refs,
                    oversized: false,
                    merged_count: 1,
                })
            })
            .collect()
    }

    /// Recursive adaptive split of one section.
    fn chunk_section(
        &self,
        key: &str,
        value: &Value,
        depth: u32,
        parent_path: Option<&str>,
    ) -> Vec<ConfChunk> {
        let current_path = match parent_path {
            Some(parent) => format!("{parent}.{key}"),
            None => key.to_string(),
        };
        let content = self.format_section(key, value);
        let size_tokens = content.len() / self.token_to_char_ratio;

        if size_tokens <= self.chunk_size {
            return vec![self.make_chunk(current_path, key, content, depth, value, size_tokens)];
        }

        if let Value::Object(map) = value {
            if depth < self.max_depth {
                let mut sub_chunks = Vec::new();
                for (sub_key, sub_value) in map {
                    sub_chunks.extend(self.chunk_section(
                        sub_key,
                        sub_value,
                        depth + 1,
                        Some(&current_path),
                    ));
                }
                if sub_chunks.len() > 1 {
                    return sub_chunks;
                }
            }
        }

        if size_tokens > self.max_chunk_size {
            tracing::warn!(
                path = %current_path,
                size_tokens,
                depth,
                "large config section cannot be split further"
            );
        }
        let mut chunk = self.make_chunk(current_path, key, content, depth, value, size_tokens);
        chunk.oversized = size_tokens > self.max_chunk_size;
        vec![chunk]
    }

    fn make_chunk(
        &self,
        path: String,
        key: &str,
        content: String,
        depth: u32,
        value: &Value,
        size_tokens: usize,
    ) -> ConfChunk {
        let keys = match value {
            Value::Object(_) => flatten_keys(value, key),
            _ => vec![key.to_string()],
        };
        let env_refs = detect_env_references(&content);
        ConfChunk {
            path,
            key: key.to_string(),
            content,
            depth,
            size_tokens,
            keys,
            env_refs,
            oversized: false,
            merged_count: 1,
        }
    }

    /// Render a section as searchable text: a YAML body plus a key list.
    fn format_section(&self, key: &str, value: &Value) -> String {
        let mut lines = vec![format!("Configuration: {key}"), String::new()];
        match value {
            Value::Object(_) => {
                let mut wrapper = serde_json::Map::new();
                wrapper.insert(key.to_string(), value.clone());
                if let Ok(body) = serde_yaml::to_string(&Value::Object(wrapper)) {
                    lines.push(body);
                }
                let all_keys = flatten_keys(value, key);
                if !all_keys.is_empty() {
                    lines.push(String::new());
                    lines.push(format!("Available settings: {}", all_keys.join(", ")));
                }
            }
            Value::Array(items) => {
                lines.push(format!("{key}:"));
                if items.len() <= 10 {
                    for item in items {
                        lines.push(format!("  - {}", render_scalar(item)));
                    }
                } else {
                    lines.push(format!("  [{} items]", items.len()));
                    let head: Vec<String> = items.iter().take(3).map(render_scalar).collect();
                    lines.push(format!("  First items: {}", head.join(", ")));
                }
            }
            scalar => lines.push(format!("{key}: {}", render_scalar(scalar))),
        }
        lines.join("\n")
    }

    /// Merge adjacent sub-minimum chunks; the trailing buffer may fold into
    /// the previous chunk when the sum stays under the maximum.
    fn optimize(&self, chunks: Vec<ConfChunk>) -> Vec<ConfChunk> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let mut optimized: Vec<ConfChunk> = Vec::new();
        let mut buffer: Vec<ConfChunk> = Vec::new();
        let mut buffer_size = 0usize;

        for chunk in chunks {
            if chunk.size_tokens < self.min_chunk_size {
                buffer_size += chunk.size_tokens;
                buffer.push(chunk);
                if buffer_size >= self.min_chunk_size {
                    optimized.push(self.merge(std::mem::take(&mut buffer)));
                    buffer_size = 0;
                }
            } else {
                if !buffer.is_empty() {
                    optimized.push(self.merge(std::mem::take(&mut buffer)));
                    buffer_size = 0;
                }
                optimized.push(chunk);
            }
        }

        if !buffer.is_empty() {
            if let Some(last) = optimized.last() {
                if last.size_tokens + buffer_size < self.max_chunk_size {
                    let last = optimized.pop().expect("checked non-empty");
                    buffer.insert(0, last);
                }
            }
            optimized.push(self.merge(buffer));
        }

        optimized
    }

    fn merge(&self, chunks: Vec<ConfChunk>) -> ConfChunk {
        if chunks.len() == 1 {
            return chunks.into_iter().next().expect("single chunk");
        }
        let content: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let content = content.join("\n\n");
        let mut keys = Vec::new();
        let mut env_refs = Vec::new();
        for chunk in &chunks {
            for key in &chunk.keys {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            for env in &chunk.env_refs {
                if !env_refs.contains(env) {
                    env_refs.push(env.clone());
                }
            }
        }
        let paths: Vec<&str> = chunks.iter().map(|c| c.path.as_str()).collect();
        let chunk_keys: Vec<&str> = chunks.iter().map(|c| c.key.as_str()).collect();
        ConfChunk {
            path: paths.join(" + "),
            key: chunk_keys.join(" + "),
            size_tokens: content.len() / self.token_to_char_ratio,
            content,
            depth: chunks[0].depth,
            keys,
            env_refs,
            oversized: false,
            merged_count: chunks.len(),
        }
    }

    fn to_nodes(
        &self,
        chunks: Vec<ConfChunk>,
        file_content: &str,
        file_path: &str,
        relative_path: &str,
        format: &str,
    ) -> Vec<DocumentNode> {
        let total = chunks.len();
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let (start_line, end_line) = find_chunk_lines(file_content, &chunk.content);
                let mut node = DocumentNode::new(
                    file_path,
                    relative_path,
                    NodeKind::Config,
                    chunk.content,
                    index,
                );
                node.total_chunks = total;
                node.parent_doc_id = Some(relative_path.to_string());
                node.title = Some(chunk.path);
                node.start_line = Some(start_line);
                node.end_line = Some(end_line);
                node.config_keys = chunk.keys;
                node.config_format = Some(format.to_string());
                node.env_references = chunk.env_refs;
                node.section_depth = Some(chunk.depth);
                if chunk.merged_count > 1 {
                    node.metadata
                        .insert("merged_count".into(), chunk.merged_count.into());
                }
                if chunk.oversized {
                    node.metadata.insert("oversized".into(), true.into());
                }
                node
            })
            .collect()
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn find_chunk_lines(full_text: &str, chunk: &str) -> (u32, u32) {
    let trimmed = chunk.trim();
    match full_text.find(trimmed) {
        Some(offset) => {
            let start = full_text[..offset].matches('\n').count() as u32 + 1;
            let end = start + chunk.matches('\n').count() as u32;
            (start, end)
        }
        None => (1, 1),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
