//! Deterministic identity and content checksums.
//!
//! Every entity in a collection is addressed by a 32-char hex prefix of a
//! SHA-256 over its stable structural fields, so re-indexing unchanged code
//! always lands on the same point ids.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::{NodeKind, ObjectKind, RelationKind};

/// Length of truncated deterministic ids in hex characters.
pub const ID_HEX_LEN: usize = 32;

fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// SHA-256 of a byte slice, full 64 hex characters.
pub fn content_checksum(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

/// SHA-256 of a file's content, streamed in 64 KiB blocks.
pub fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}

/// Deterministic id for a code object.
///
/// Derived from `relative_path:name:kind:start:end` so the id survives
/// re-indexing as long as the object keeps its place in the file.
pub fn object_id(
    relative_path: &str,
    name: &str,
    kind: ObjectKind,
    start_line: u32,
    end_line: u32,
) -> String {
    let unique = format!(
        "{relative_path}:{name}:{}:{start_line}:{end_line}",
        kind.as_str()
    );
    let mut hex = sha256_hex(unique.as_bytes());
    hex.truncate(ID_HEX_LEN);
    hex
}

/// Deterministic id for a document chunk.
pub fn doc_id(relative_path: &str, kind: NodeKind, chunk_index: usize) -> String {
    let unique = format!("{relative_path}:{}:{chunk_index}", kind.as_str());
    let mut hex = sha256_hex(unique.as_bytes());
    hex.truncate(ID_HEX_LEN);
    hex
}

/// Deterministic id for a relationship edge.
pub fn relationship_id(source_id: &str, target_id: &str, relation: RelationKind) -> String {
    let unique = format!("{source_id}:{target_id}:{}", relation.as_str());
    let mut hex = sha256_hex(unique.as_bytes());
    hex.truncate(ID_HEX_LEN);
    hex
}

/// Synthetic point id for ancillary state entries.
///
/// 64-bit big-endian prefix of `sha256("state_" + key)`, matching the layout
/// used for non-entity points in the collection.
pub fn state_point_id(key: &str) -> u64 {
    let digest = Sha256::digest(format!("state_{key}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Collection id for a project, derived from its canonical repository path.
pub fn project_id(repository_path: &Path) -> String {
    let canonical = repository_path
        .canonicalize()
        .unwrap_or_else(|_| repository_path.to_path_buf());
    let mut hex = sha256_hex(canonical.to_string_lossy().as_bytes());
    hex.truncate(16);
    hex
}
