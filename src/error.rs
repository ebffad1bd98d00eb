//! Error taxonomy for marketplace and installation operations.
//!
//! Expected remote failures (401, 404, 5xx, unreachable marketplace, unmet
//! capabilities) are `InstallationOutcome` values, not errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Marketplace response is missing the '{field}' field")]
    SchemaViolation { field: String },

    #[error("Zip file not found: {}", path.display())]
    ZipNotFound { path: PathBuf },

    #[error("Could not open archive {}: {source}", path.display())]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task '{task}' failed for module {module}: {message}")]
    Task {
        task: String,
        module: String,
        message: String,
    },

    #[error("Module store error: {0}")]
    Store(String),
}

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
