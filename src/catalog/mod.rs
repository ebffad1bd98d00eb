//! Marketplace catalog access
//!
//! This module provides:
//! - The `CatalogClient` trait the installer is built against
//! - `InstallationOutcome`, the result shape for expected remote failures
//! - An HTTP implementation (`HttpCatalogClient`) in the `http` submodule

pub mod http;

pub use http::HttpCatalogClient;

use crate::error::Result;
use crate::types::{RemoteModuleDetail, RemoteModuleSummary, TokenCheck};
use async_trait::async_trait;
use serde_json::{json, Value};

/// API token sent as a bearer credential on every catalog call.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_token: Option<String>,
}

impl Credentials {
    pub fn new(api_token: Option<String>) -> Self {
        Self { api_token }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Result of a remote or staging step whose failure is expected and reportable.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallationOutcome<T> {
    Success(T),
    /// 401 from the marketplace; carries the decoded body untouched.
    AuthError { body: Value },
    /// 404, or a body that could not be decoded as the expected shape.
    NotFound { body: Option<Value> },
    ServerError { status: u16, body: Value },
    /// Transport or filesystem failure.
    IoError { cause: String },
    IncompatibleEnvironment { missing_capabilities: Vec<String> },
}

impl<T> InstallationOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> InstallationOutcome<U> {
        match self {
            Self::Success(value) => InstallationOutcome::Success(f(value)),
            Self::AuthError { body } => InstallationOutcome::AuthError { body },
            Self::NotFound { body } => InstallationOutcome::NotFound { body },
            Self::ServerError { status, body } => InstallationOutcome::ServerError { status, body },
            Self::IoError { cause } => InstallationOutcome::IoError { cause },
            Self::IncompatibleEnvironment {
                missing_capabilities,
            } => InstallationOutcome::IncompatibleEnvironment {
                missing_capabilities,
            },
        }
    }

    /// Payload a caller can surface to an operator for a non-success outcome.
    pub fn error_body(&self) -> Option<Value> {
        match self {
            Self::Success(_) => None,
            Self::AuthError { body } => Some(body.clone()),
            Self::NotFound { body } => Some(body.clone().unwrap_or_else(|| json!({"error": "not_found"}))),
            Self::ServerError { body, .. } => Some(body.clone()),
            Self::IoError { cause } => Some(json!({
                "success": false,
                "error": cause,
                "data": {"path": null},
            })),
            Self::IncompatibleEnvironment {
                missing_capabilities,
            } => Some(json!({
                "success": false,
                "error": "extension_required",
                "extensions": missing_capabilities,
            })),
        }
    }
}

/// Marketplace operations the installer depends on.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// `GET api/marketplace/modules`. A 2xx body without `modules` is an error.
    async fn list_modules(&self, dev_mode: bool)
        -> Result<InstallationOutcome<Vec<RemoteModuleSummary>>>;

    /// `GET api/marketplace/modules/{name}`.
    async fn get_module(
        &self,
        name: &str,
        dev_mode: bool,
    ) -> InstallationOutcome<RemoteModuleDetail>;

    /// `GET api/marketplace/modules/file/{name}?version={version}`; returns the archive bytes.
    async fn download_module(
        &self,
        name: &str,
        version: &str,
        dev_mode: bool,
    ) -> InstallationOutcome<Vec<u8>>;

    /// `GET api/marketplace/ping` with the given token rather than the stored one.
    async fn check_token(&self, token: &str) -> InstallationOutcome<TokenCheck>;
}

/// Appends the dev-mode flag to a catalog path.
pub fn with_dev_flag(path: &str, dev_mode: bool) -> String {
    if !dev_mode {
        return path.to_string();
    }
    if path.contains('?') {
        format!("{}&is_dev=1", path)
    } else {
        format!("{}?is_dev=1", path)
    }
}
