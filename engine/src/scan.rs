//! Repository scanning: gitignore-aware file discovery split into code and
//! document streams, honoring include/exclude overrides and a per-file size
//! cap.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;

use codequarry_core::Lang;

use crate::error::{Error, Result};
use crate::settings::{IndexingSettings, ProjectSettings};

/// Ignore file honored alongside `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".codequarryignore";

/// Directory names never worth walking into.
fn default_skip_dirs() -> HashSet<&'static str> {
    [
        ".git",
        ".svn",
        ".hg",
        "node_modules",
        "__pycache__",
        "target",
        "dist",
        "build",
        "vendor",
        "venv",
        ".venv",
        ".idea",
        ".vscode",
        "htmlcov",
        "coverage",
    ]
    .into_iter()
    .collect()
}

/// A file discovered during the scan.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub language: Lang,
}

/// Scan result: code files (by extension map) and document files
/// (markdown plus structured config).
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub code_files: Vec<SourceFile>,
    pub document_files: Vec<SourceFile>,
}

/// Walks a repository honoring cascading ignore files and the engine's
/// include/exclude overrides.
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
    language_allowlist: HashSet<String>,
    project: ProjectSettings,
}

impl FileScanner {
    pub fn new(root: &Path, indexing: &IndexingSettings, project: &ProjectSettings) -> Self {
        FileScanner {
            root: root.to_path_buf(),
            max_file_size: indexing.max_file_size_mb * 1024 * 1024,
            language_allowlist: indexing.languages.iter().cloned().collect(),
            project: project.clone(),
        }
    }

    /// Walk the tree and classify every kept file.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let skip_dirs = default_skip_dirs();

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE_NAME)
            .filter_entry(move |entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !skip_dirs.contains(name.as_ref());
                }
                true
            });

        if !self.project.include.is_empty() || !self.project.exclude.is_empty() {
            let mut overrides = OverrideBuilder::new(&self.root);
            for pattern in &self.project.include {
                overrides
                    .add(pattern)
                    .map_err(|e| Error::InvalidInput(format!("bad include pattern: {e}")))?;
            }
            for pattern in &self.project.exclude {
                overrides
                    .add(&format!("!{pattern}"))
                    .map_err(|e| Error::InvalidInput(format!("bad exclude pattern: {e}")))?;
            }
            let overrides = overrides
                .build()
                .map_err(|e| Error::InvalidInput(format!("bad override patterns: {e}")))?;
            builder.overrides(overrides);
        }

        let results: Mutex<Vec<SourceFile>> = Mutex::new(Vec::new());
        let oversized = std::sync::atomic::AtomicUsize::new(0);

        builder.threads(rayon::current_num_threads().min(12));
        builder.build_parallel().run(|| {
            Box::new(|entry| {
                let Ok(entry) = entry else {
                    return ignore::WalkState::Continue;
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }
                let abs_path = entry.path().to_path_buf();
                let ext = abs_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_lowercase();
                let Some(language) = Lang::from_extension(&ext) else {
                    return ignore::WalkState::Continue;
                };
                if entry
                    .metadata()
                    .map(|m| m.len() > self.max_file_size)
                    .unwrap_or(false)
                {
                    oversized.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return ignore::WalkState::Continue;
                }
                let rel_path = abs_path
                    .strip_prefix(&self.root)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");
                results.lock().expect("scan lock").push(SourceFile {
                    abs_path,
                    rel_path,
                    language,
                });
                ignore::WalkState::Continue
            })
        });

        let mut files = results.into_inner().expect("scan lock");
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        let mut outcome = ScanOutcome::default();
        for file in files {
            if file.language.is_code() {
                if !self.language_allowlist.is_empty()
                    && !self.language_allowlist.contains(file.language.as_str())
                {
                    continue;
                }
                outcome.code_files.push(file);
            } else {
                outcome.document_files.push(file);
            }
        }

        tracing::debug!(
            code = outcome.code_files.len(),
            documents = outcome.document_files.len(),
            oversized = oversized.load(std::sync::atomic::Ordering::Relaxed),
            root = %self.root.display(),
            "scan complete"
        );

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
