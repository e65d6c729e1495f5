//! Engine-wide error type.
//!
//! Per-file extraction failures are logged and swallowed by the pipeline;
//! everything surfaced through this enum is either fatal to the current
//! operation or actionable by the caller.

use codequarry_core::ModelError;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported language for extension {0:?}")]
    UnsupportedLanguage(String),

    #[error("parse timed out after {timeout_micros}us for {path}")]
    ParseTimeout { path: String, timeout_micros: u64 },

    #[error("syntax errors in {path} and error recovery is disabled")]
    ParseSyntax { path: String },

    #[error("partial parse quality too low for {path}: {valid_ratio:.2} < {threshold:.2}")]
    ParsePartialQualityTooLow {
        path: String,
        valid_ratio: f64,
        threshold: f64,
    },

    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: String, reason: String },

    #[error("embedding provider failed: {0}")]
    EmbeddingProvider(String),

    #[error("translation provider failed: {0}")]
    TranslationProvider(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("project not found: {query:?}{}", suggestions_suffix(.suggestions))]
    NotFound {
        query: String,
        suggestions: Vec<String>,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl Error {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Error::Storage(reason.into())
    }
}

fn suggestions_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (similar: {})", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_suggestions() {
        let err = Error::NotFound {
            query: "ordrs".into(),
            suggestions: vec!["orders".into(), "orders-api".into()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("ordrs"));
        assert!(rendered.contains("orders-api"));
    }

    #[test]
    fn io_error_carries_path() {
        let err = Error::io(
            "src/a.py",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("src/a.py"));
    }
}
