//! Project registry: name ↔ collection-id resolution with fuzzy suggestions.
//!
//! A read-through view over stored index states; nothing here persists on its
//! own.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use codequarry_core::{similar, IndexState};

use crate::error::{Error, Result};

/// Minimum similarity ratio for fuzzy suggestions.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;
/// Similarity assigned to substring matches.
const SUBSTRING_SIMILARITY: f64 = 0.8;

/// Registry entry for one indexed project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectInfo {
    pub collection_id: String,
    pub name: String,
    pub repository_path: String,
    pub last_indexed: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub total_objects: usize,
}

impl ProjectInfo {
    pub fn from_state(collection_id: impl Into<String>, state: &IndexState) -> Self {
        ProjectInfo {
            collection_id: collection_id.into(),
            name: state.project_name.clone(),
            repository_path: state.repository_path.clone(),
            last_indexed: Some(state.last_indexed_at),
            total_files: state.total_files,
            total_objects: state.total_objects,
        }
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.collection_id)
    }
}

/// Resolves user-supplied project strings to collection ids.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    projects: BTreeMap<String, ProjectInfo>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        ProjectRegistry::default()
    }

    pub fn register(&mut self, info: ProjectInfo) {
        self.projects.insert(info.collection_id.clone(), info);
    }

    pub fn register_state(&mut self, collection_id: &str, state: &IndexState) {
        self.register(ProjectInfo::from_state(collection_id, state));
    }

    /// Projects sorted by name.
    pub fn list(&self) -> Vec<&ProjectInfo> {
        let mut projects: Vec<&ProjectInfo> = self.projects.values().collect();
        projects.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        projects
    }

    pub fn get(&self, collection_id: &str) -> Option<&ProjectInfo> {
        self.projects.get(collection_id)
    }

    /// Resolve a name or collection id.
    ///
    /// Exact collection-id match wins; then case-insensitive exact name match
    /// (preferring higher object count, then newer index timestamp). Anything
    /// else fails with ranked fuzzy suggestions.
    pub fn resolve(&self, query: &str) -> Result<String> {
        if self.projects.contains_key(query) {
            return Ok(query.to_string());
        }

        let query_lower = query.to_lowercase();
        let mut name_matches: Vec<&ProjectInfo> = self
            .projects
            .values()
            .filter(|info| info.name.to_lowercase() == query_lower)
            .collect();
        if !name_matches.is_empty() {
            name_matches.sort_by(|a, b| {
                b.total_objects
                    .cmp(&a.total_objects)
                    .then_with(|| b.last_indexed.cmp(&a.last_indexed))
            });
            return Ok(name_matches[0].collection_id.clone());
        }

        let suggestions = self
            .find_similar(query, SIMILARITY_THRESHOLD)
            .into_iter()
            .map(|info| info.display_name())
            .collect();
        Err(Error::NotFound {
            query: query.to_string(),
            suggestions,
        })
    }

    /// Projects whose name or id is similar to the query, best first.
    pub fn find_similar(&self, query: &str, threshold: f64) -> Vec<&ProjectInfo> {
        let query_lower = query.to_lowercase();
        let mut matches: Vec<(f64, &ProjectInfo)> = Vec::new();

        for info in self.projects.values() {
            let name_lower = info.name.to_lowercase();
            let id_lower = info.collection_id.to_lowercase();
            let mut best = similar::ratio(&query_lower, &name_lower)
                .max(similar::ratio(&query_lower, &id_lower));
            if name_lower.contains(&query_lower) || id_lower.contains(&query_lower) {
                best = best.max(SUBSTRING_SIMILARITY);
            }
            if best >= threshold {
                matches.push((best, info));
            }
        }

        matches.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        matches.into_iter().map(|(_, info)| info).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
