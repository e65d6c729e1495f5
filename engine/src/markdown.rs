//! Markdown chunking: heading-based splitting with recursive sub-splitting
//! for oversized sections, plus extraction of code references from prose.

use std::path::Path;

use regex::Regex;

use codequarry_core::{CodeRef, DocumentNode, NodeKind};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Header splitting
// ---------------------------------------------------------------------------

struct Section {
    content: String,
    h1: Option<String>,
    h2: Option<String>,
}

/// Split markdown into sections at heading levels 1..=max_level. Each section
/// carries the heading that opened it; heading lines stay in the content.
fn split_by_headings(text: &str, max_level: usize) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut h1: Option<String> = None;
    let mut h2: Option<String> = None;

    let flush = |lines: &mut Vec<&str>, sections: &mut Vec<Section>, h1: &Option<String>, h2: &Option<String>| {
        if lines.is_empty() {
            return;
        }
        let content = lines.join("\n");
        if !content.trim().is_empty() {
            sections.push(Section {
                content,
                h1: h1.clone(),
                h2: h2.clone(),
            });
        }
        lines.clear();
    };

    for line in text.lines() {
        match match_heading(line, max_level) {
            Some((level, heading)) => {
                flush(&mut current, &mut sections, &h1, &h2);
                // A new section carries only its own heading.
                h1 = None;
                h2 = None;
                match level {
                    1 => h1 = Some(heading),
                    2 => h2 = Some(heading),
                    _ => {}
                }
                current.push(line);
            }
            None => current.push(line),
        }
    }
    flush(&mut current, &mut sections, &h1, &h2);

    if sections.is_empty() {
        sections.push(Section {
            content: text.to_string(),
            h1: None,
            h2: None,
        });
    }
    sections
}

fn match_heading(line: &str, max_level: usize) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > max_level {
        return None;
    }
    let rest = &trimmed[hashes..];
    let heading = rest.strip_prefix(' ')?.trim();
    if heading.is_empty() {
        return None;
    }
    Some((hashes, heading.to_string()))
}

// ---------------------------------------------------------------------------
// Recursive splitting
// ---------------------------------------------------------------------------

/// Recursively split text with a separator hierarchy, carrying a character
/// overlap between adjacent chunks.
pub struct RecursiveTextSplitter {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        RecursiveTextSplitter {
            chunk_size,
            chunk_overlap,
            separators: vec!["\n\n".into(), "\n".into(), " ".into(), String::new()],
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        if text.len() <= self.chunk_size {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            };
        }
        let Some((separator, remaining)) = separators.split_first() else {
            return self.split_by_size(text);
        };

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator.as_str()).map(str::to_string).collect()
        };

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_size = 0usize;

        for split in splits {
            let split_size = split.len() + separator.len();

            if split_size > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(current.join(separator));
                    current.clear();
                    current_size = 0;
                }
                chunks.extend(self.split_recursive(&split, remaining));
                continue;
            }

            if current_size + split_size > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(separator));
                current = self.overlap_tail(&current, separator);
                current_size = current.iter().map(String::len).sum::<usize>()
                    + separator.len() * current.len().saturating_sub(1);
            }

            current_size += split_size;
            current.push(split);
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }
        chunks
    }

    fn overlap_tail(&self, parts: &[String], separator: &str) -> Vec<String> {
        if self.chunk_overlap == 0 {
            return Vec::new();
        }
        let mut tail: Vec<String> = Vec::new();
        let mut size = 0usize;
        for part in parts.iter().rev() {
            let part_size = part.len() + separator.len();
            if size + part_size > self.chunk_overlap {
                break;
            }
            tail.insert(0, part.clone());
            size += part_size;
        }
        tail
    }

    fn split_by_size(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start = if self.chunk_overlap > 0 && end > self.chunk_overlap {
                end - self.chunk_overlap
            } else {
                end
            };
        }
        chunks
    }
}

// ---------------------------------------------------------------------------
// Code reference extraction
// ---------------------------------------------------------------------------

/// Inline backtick expressions, fenced code blocks, and links to source files.
pub fn extract_code_references(content: &str) -> Vec<CodeRef> {
    let mut references = Vec::new();

    let inline = Regex::new(r"`([^`\n]+)`").expect("static regex");
    for cap in inline.captures_iter(content) {
        let whole = cap.get(0).expect("match");
        let start = whole.start().saturating_sub(50);
        let end = (whole.end() + 50).min(content.len());
        let start = floor_char_boundary(content, start);
        let end = floor_char_boundary(content, end);
        references.push(CodeRef::InlineCode {
            reference: cap[1].to_string(),
            context: content[start..end].to_string(),
        });
    }

    let block = Regex::new(r"(?s)```(\w+)?\n(.*?)\n```").expect("static regex");
    for cap in block.captures_iter(content) {
        let language = cap
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown".into());
        let code: String = cap[2].chars().take(200).collect();
        references.push(CodeRef::CodeBlock { language, code });
    }

    let link = Regex::new(r"\[([^\]]+)\]\(([^)]+\.(?:py|js|ts|java|kt|go|rs|cpp|c|h))\)")
        .expect("static regex");
    for cap in link.captures_iter(content) {
        references.push(CodeRef::FileReference {
            text: cap[1].to_string(),
            file: cap[2].to_string(),
        });
    }

    references
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Hybrid markdown chunker: heading sections, recursively sub-split when a
/// section exceeds the chunk size.
pub struct MarkdownChunker {
    pub chunk_size: usize,
    max_heading_level: usize,
    splitter: RecursiveTextSplitter,
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        MarkdownChunker::new(4096, 400, 3)
    }
}

impl MarkdownChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, max_heading_level: usize) -> Self {
        MarkdownChunker {
            chunk_size,
            max_heading_level,
            splitter: RecursiveTextSplitter::new(chunk_size, chunk_overlap),
        }
    }

    pub fn supports(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("markdown")
        )
    }

    pub fn chunk_file(&self, file_path: &Path, relative_path: &str) -> Result<Vec<DocumentNode>> {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| Error::io(file_path.to_string_lossy(), e))?;
        Ok(self.chunk_str(&content, &file_path.to_string_lossy(), relative_path))
    }

    pub fn chunk_str(
        &self,
        content: &str,
        file_path: &str,
        relative_path: &str,
    ) -> Vec<DocumentNode> {
        let file_title = content
            .lines()
            .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()));

        let mut pieces: Vec<(String, Option<String>)> = Vec::new();
        for section in split_by_headings(content, self.max_heading_level) {
            let title = section
                .h1
                .clone()
                .or(section.h2.clone())
                .or_else(|| file_title.clone());
            if section.content.len() > self.chunk_size {
                for sub in self.splitter.split(&section.content) {
                    pieces.push((sub, title.clone()));
                }
            } else {
                pieces.push((section.content, title));
            }
        }

        let total = pieces.len();
        pieces
            .into_iter()
            .enumerate()
            .map(|(index, (chunk, title))| {
                let (start_line, end_line) = find_chunk_lines(content, &chunk);
                let mut node =
                    DocumentNode::new(file_path, relative_path, NodeKind::Markdown, chunk, index);
                node.total_chunks = total;
                node.parent_doc_id = Some(relative_path.to_string());
                node.title = title;
                node.start_line = Some(start_line);
                node.end_line = Some(end_line);
                node.related_code = extract_code_references(&node.content);
                node
            })
            .collect()
    }
}

/// Locate a chunk in the original text by substring search, 1-based lines.
fn find_chunk_lines(full_text: &str, chunk: &str) -> (u32, u32) {
    match full_text.find(chunk) {
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

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Guide\n\nIntro text.\n\n## Install\n\nRun `cargo build` first.\n\n## Usage\n\nSee [parser](src/parser.py) for details.\n\n```python\nprint(1)\n```\n";

    #[test]
    fn splits_on_headings_with_titles() {
        let chunker = MarkdownChunker::default();
        let nodes = chunker.chunk_str(DOC, "/repo/README.md", "README.md");

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].title.as_deref(), Some("Guide"));
        assert_eq!(nodes[1].title.as_deref(), Some("Install"));
        assert_eq!(nodes[2].title.as_deref(), Some("Usage"));
        assert_eq!(nodes[0].chunk_index, 0);
        assert_eq!(nodes[2].chunk_index, 2);
        for node in &nodes {
            assert_eq!(node.total_chunks, 3);
            assert_eq!(node.parent_doc_id.as_deref(), Some("README.md"));
        }
    }

    #[test]
    fn line_ranges_point_into_the_source() {
        let chunker = MarkdownChunker::default();
        let nodes = chunker.chunk_str(DOC, "/repo/README.md", "README.md");
        assert_eq!(nodes[0].start_line, Some(1));
        assert_eq!(nodes[1].start_line, Some(5));
    }

    #[test]
    fn oversized_sections_are_sub_split_and_keep_title() {
        let long_body = "word ".repeat(300);
        let text = format!("# Big\n\n{long_body}\n");
        let chunker = MarkdownChunker::new(256, 32, 3);
        let nodes = chunker.chunk_str(&text, "/repo/big.md", "big.md");
        assert!(nodes.len() > 1);
        for node in &nodes {
            assert!(node.content.len() <= 256);
            assert_eq!(node.title.as_deref(), Some("Big"));
        }
    }

    #[test]
    fn code_references_cover_all_three_shapes() {
        let refs = extract_code_references(
            "Use `run()` here.\n\n```rust\nfn main() {}\n```\n\nSee [impl](src/lib.rs).",
        );
        assert!(refs.iter().any(|r| matches!(
            r,
            CodeRef::InlineCode { reference, .. } if reference == "run()"
        )));
        assert!(refs.iter().any(|r| matches!(
            r,
            CodeRef::CodeBlock { language, .. } if language == "rust"
        )));
        assert!(refs.iter().any(|r| matches!(
            r,
            CodeRef::FileReference { file, .. } if file == "src/lib.rs"
        )));
    }

    #[test]
    fn recursive_splitter_respects_size_and_overlap() {
        let splitter = RecursiveTextSplitter::new(20, 5);
        let chunks = splitter.split("aaaa bbbb cccc dddd eeee ffff gggg");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 20);
        }
    }

    #[test]
    fn headingless_text_is_a_single_chunk() {
        let chunker = MarkdownChunker::default();
        let nodes = chunker.chunk_str("just prose, no headings", "/r/notes.md", "notes.md");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].title, None);
    }

    #[test]
    fn doc_ids_are_stable_per_chunk_index() {
        let chunker = MarkdownChunker::default();
        let first = chunker.chunk_str(DOC, "/repo/README.md", "README.md");
        let second = chunker.chunk_str(DOC, "/repo/README.md", "README.md");
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
        }
    }
}
