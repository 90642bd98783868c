// ABOUTME: Error types for the beamer-preview application
// ABOUTME: Provides structured error handling for each stage of the incremental build

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreviewError {
    /// Unbalanced or unresolvable slide markers. Never ignorable.
    #[error("Structural parse error: {marker} at line {line}")]
    StructuralParse { marker: String, line: usize },

    /// The external compiler failed for one slide.
    #[error("Could not compile slide {index}: {message}{}", format_log(.log))]
    CompilerFailure {
        index: usize,
        message: String,
        log: Option<String>,
    },

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Cache I/O error on {path:?}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Build cancelled")]
    Cancelled,
}

fn format_log(log: &Option<String>) -> String {
    match log {
        Some(excerpt) => format!("\n{}", excerpt),
        None => String::new(),
    }
}

impl PreviewError {
    /// Whether a per-slide `ignore_errors` setting may downgrade this error.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, PreviewError::CompilerFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, PreviewError>;
