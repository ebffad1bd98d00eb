//! HTTP implementation of the marketplace catalog.

use super::{with_dev_flag, CatalogClient, Credentials, InstallationOutcome};
use crate::error::{InstallError, Result};
use crate::types::{RemoteModuleDetail, RemoteModuleSummary, TokenCheck};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use serde_json::{json, Value};

const USER_AGENT: &str = concat!("modctl/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the buffer reserved from a response's `Content-Length`.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

pub struct HttpCatalogClient {
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpCatalogClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client: reqwest::Client::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issues an authenticated GET. Transport failures come back as `InstallError::Transport`.
    async fn get_remote(&self, path: &str, token: Option<&str>) -> Result<reqwest::Response> {
        let url = self.url_for(path);
        tracing::debug!("GET {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map_err(|source| InstallError::Transport { url, source })
    }

    fn stored_token(&self) -> Option<&str> {
        self.credentials.api_token.as_deref()
    }
}

/// Decodes a response body as JSON; empty or malformed bodies decode to `Value::Null`.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

async fn read_body(response: reqwest::Response) -> Value {
    match response.bytes().await {
        Ok(bytes) => decode_body(&bytes),
        Err(e) => {
            tracing::warn!("Could not read marketplace response body: {}", e);
            Value::Null
        }
    }
}

fn invalid_token_body() -> Value {
    json!({"error": "invalid_token"})
}

fn auth_body(body: Value) -> Value {
    if body.is_null() {
        invalid_token_body()
    } else {
        body
    }
}

/// Maps a non-success status and its decoded body into an outcome.
fn classify_failure<T>(status: StatusCode, body: Value) -> InstallationOutcome<T> {
    match status {
        StatusCode::UNAUTHORIZED => InstallationOutcome::AuthError {
            body: auth_body(body),
        },
        StatusCode::NOT_FOUND => InstallationOutcome::NotFound {
            body: Some(body).filter(|b| !b.is_null()),
        },
        other => InstallationOutcome::ServerError {
            status: other.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_modules(
        &self,
        dev_mode: bool,
    ) -> Result<InstallationOutcome<Vec<RemoteModuleSummary>>> {
        let path = with_dev_flag("api/marketplace/modules", dev_mode);
        let response = match self.get_remote(&path, self.stored_token()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}", e);
                return Ok(InstallationOutcome::IoError {
                    cause: e.to_string(),
                });
            }
        };

        let status = response.status();
        let body = read_body(response).await;
        if !status.is_success() {
            return Ok(classify_failure(status, body));
        }

        let modules = body
            .get("modules")
            .cloned()
            .ok_or_else(|| InstallError::SchemaViolation {
                field: "modules".to_string(),
            })?;
        let modules: Vec<RemoteModuleSummary> = serde_json::from_value(modules)?;
        tracing::debug!("Marketplace listed {} module(s)", modules.len());
        Ok(InstallationOutcome::Success(modules))
    }

    async fn get_module(
        &self,
        name: &str,
        dev_mode: bool,
    ) -> InstallationOutcome<RemoteModuleDetail> {
        let path = with_dev_flag(&format!("api/marketplace/modules/{}", name), dev_mode);
        let response = match self.get_remote(&path, self.stored_token()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}", e);
                return InstallationOutcome::IoError {
                    cause: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = read_body(response).await;
        if !status.is_success() {
            return classify_failure(status, body);
        }

        match serde_json::from_value::<RemoteModuleDetail>(body.clone()) {
            Ok(detail) => InstallationOutcome::Success(detail),
            Err(e) => {
                tracing::warn!("Unexpected module detail shape for {}: {}", name, e);
                InstallationOutcome::NotFound { body: Some(body) }
            }
        }
    }

    async fn download_module(
        &self,
        name: &str,
        version: &str,
        dev_mode: bool,
    ) -> InstallationOutcome<Vec<u8>> {
        let path = with_dev_flag(
            &format!("api/marketplace/modules/file/{}?version={}", name, version),
            dev_mode,
        );
        let download_exception = || InstallationOutcome::IoError {
            cause: "Download Exception".to_string(),
        };

        let response = match self.get_remote(&path, self.stored_token()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}", e);
                return download_exception();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = read_body(response).await;
            return classify_failure(status, body);
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = if self.show_progress {
            ProgressBar::new(total_size)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Downloading {} {}", name, version));

        let mut bytes = Vec::with_capacity(total_size.min(MAX_PREALLOCATION) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    bytes.extend_from_slice(&chunk);
                    pb.set_position(bytes.len() as u64);
                }
                Err(e) => {
                    pb.abandon_with_message("Download failed");
                    tracing::error!("Download of {} {} interrupted: {}", name, version, e);
                    return download_exception();
                }
            }
        }

        pb.finish_with_message("Download complete");
        tracing::info!("Downloaded {} bytes for {} {}", bytes.len(), name, version);
        InstallationOutcome::Success(bytes)
    }

    async fn check_token(&self, token: &str) -> InstallationOutcome<TokenCheck> {
        let response = match self.get_remote("api/marketplace/ping", Some(token)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}", e);
                return InstallationOutcome::IoError {
                    cause: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = read_body(response).await;
        if status == StatusCode::UNAUTHORIZED {
            return InstallationOutcome::AuthError {
                body: auth_body(body),
            };
        }
        if status.is_server_error() {
            return classify_failure(status, body);
        }
        if !status.is_success() {
            return InstallationOutcome::AuthError {
                body: invalid_token_body(),
            };
        }

        match serde_json::from_value::<TokenCheck>(body) {
            Ok(check) => InstallationOutcome::Success(check),
            Err(_) => InstallationOutcome::AuthError {
                body: invalid_token_body(),
            },
        }
    }
}
