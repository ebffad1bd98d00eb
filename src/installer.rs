//! Module installation orchestration
//!
//! This module provides:
//! - `ModuleInstaller`, which sequences catalog, staging, module tree and lifecycle steps
//! - The capability gate deciding whether an available version may be installed
//! - The update driver walking fetch → gate → confirm → download → unzip → copy →
//!   delete obsolete files → complete, halting at the first failed stage

use crate::catalog::{CatalogClient, InstallationOutcome};
use crate::error::{InstallError, Result};
use crate::lifecycle::LifecycleRunner;
use crate::module_tree::ModuleTree;
use crate::staging::ArchiveStaging;
use crate::types::{Module, ModuleListing, RemoteModuleDetail, TokenCheck};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Idle,
    FetchingMetadata,
    Downloading,
    Extracting,
    Copying,
    DeletingObsoleteFiles,
    Migrating,
    Completed,
    Failed { reason: String },
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::Idle => write!(f, "idle"),
            InstallState::FetchingMetadata => write!(f, "fetching metadata"),
            InstallState::Downloading => write!(f, "downloading"),
            InstallState::Extracting => write!(f, "extracting"),
            InstallState::Copying => write!(f, "copying files"),
            InstallState::DeletingObsoleteFiles => write!(f, "deleting obsolete files"),
            InstallState::Migrating => write!(f, "migrating"),
            InstallState::Completed => write!(f, "completed"),
            InstallState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of checking the marketplace for a newer version.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheck {
    Available(RemoteModuleDetail),
    ExtensionRequired {
        extensions: BTreeMap<String, bool>,
        missing: Vec<String>,
    },
    UpToDate,
    /// The catalog could not describe the module; carries the failed lookup.
    Unavailable(InstallationOutcome<()>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Module),
    UpToDate,
    ExtensionRequired {
        extensions: BTreeMap<String, bool>,
        missing: Vec<String>,
    },
    Declined,
    Halted { stage: InstallState, reason: String },
}

/// Returns `IncompatibleEnvironment` iff at least one capability is unsatisfied.
pub fn evaluate_capabilities(detail: RemoteModuleDetail) -> InstallationOutcome<RemoteModuleDetail> {
    let missing = detail.missing_extensions();
    if missing.is_empty() {
        InstallationOutcome::Success(detail)
    } else {
        InstallationOutcome::IncompatibleEnvironment {
            missing_capabilities: missing,
        }
    }
}

/// Whether `remote` is a newer version than `installed`. Non-semver versions compare by inequality.
pub fn is_newer(remote: &str, installed: &str) -> bool {
    let remote_clean = remote.trim_start_matches('v');
    let installed_clean = installed.trim_start_matches('v');

    match (
        semver::Version::parse(remote_clean),
        semver::Version::parse(installed_clean),
    ) {
        (Ok(r), Ok(i)) => r > i,
        _ => remote_clean != installed_clean,
    }
}

pub fn validate_module_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let valid = NAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$"))
        .as_ref()
        .is_ok_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(InstallError::InvalidModuleName(name.to_string()))
    }
}

fn describe_failure<T>(outcome: &InstallationOutcome<T>) -> String {
    match outcome.error_body() {
        Some(body) => body.to_string(),
        None => "unexpected success".to_string(),
    }
}

pub struct ModuleInstaller {
    catalog: Arc<dyn CatalogClient>,
    staging: ArchiveStaging,
    tree: ModuleTree,
    lifecycle: LifecycleRunner,
    dev_mode: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModuleInstaller {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        staging: ArchiveStaging,
        tree: ModuleTree,
        lifecycle: LifecycleRunner,
    ) -> Self {
        Self {
            catalog,
            staging,
            tree,
            lifecycle,
            dev_mode: false,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    fn module_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Drops the map entry for `name` once no other caller holds or awaits it.
    fn release_module_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(name).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Marketplace listing merged with local installation records.
    ///
    /// Failed lookups come back as their outcome; a 2xx body without `modules` is an error.
    pub async fn get_modules(&self) -> Result<InstallationOutcome<Vec<ModuleListing>>> {
        let summaries = match self.catalog.list_modules(self.dev_mode).await? {
            InstallationOutcome::Success(summaries) => summaries,
            other => {
                tracing::error!("Module listing unavailable: {}", describe_failure(&other));
                return Ok(other.map(|_| Vec::new()));
            }
        };

        let records: HashMap<String, Module> = self
            .lifecycle
            .store()
            .all()?
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let listings = summaries
            .into_iter()
            .map(|summary| {
                let local = records.get(&summary.name).filter(|m| m.installed);
                let update_available = match (&summary.version, local) {
                    (Some(latest), Some(module)) => is_newer(latest, &module.version),
                    _ => false,
                };
                ModuleListing {
                    id: summary.id,
                    installed_version: local.map(|m| m.version.clone()),
                    installed: local.is_some(),
                    enabled: local.is_some_and(|m| m.enabled),
                    update_available,
                    latest_version: summary.version,
                    description: summary.description,
                    name: summary.name,
                }
            })
            .collect();

        Ok(InstallationOutcome::Success(listings))
    }

    pub async fn get_module(&self, name: &str) -> Result<InstallationOutcome<RemoteModuleDetail>> {
        validate_module_name(name)?;
        Ok(self.catalog.get_module(name, self.dev_mode).await)
    }

    pub async fn check_token(&self, token: &str) -> InstallationOutcome<TokenCheck> {
        self.catalog.check_token(token).await
    }

    /// Stages a local archive; returns its storage-relative path.
    pub fn upload(&self, file: &Path, module: &str) -> Result<PathBuf> {
        validate_module_name(module)?;
        self.staging.store_uploaded_file(file, module)
    }

    /// Downloads a module archive into a fresh staging directory.
    pub async fn download(&self, name: &str, version: &str) -> Result<InstallationOutcome<PathBuf>> {
        validate_module_name(name)?;
        tracing::info!("Downloading {} {}...", name, version);

        let bytes = match self.catalog.download_module(name, version, self.dev_mode).await {
            InstallationOutcome::Success(bytes) => bytes,
            other => return Ok(other.map(|_| PathBuf::new())),
        };

        match self.staging.write_downloaded_bytes(&bytes) {
            Ok(path) => Ok(InstallationOutcome::Success(path)),
            Err(e) => {
                tracing::error!("Could not stage download of {}: {}", name, e);
                Ok(InstallationOutcome::IoError {
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Extracts a staged archive. A missing archive is an error; any other extraction
    /// failure is logged and yields `None`.
    pub fn unzip(&self, name: &str, zip_path: &Path) -> Result<Option<PathBuf>> {
        validate_module_name(name)?;
        match self.staging.extract(zip_path) {
            Ok(dir) => {
                self.release_download_dir(zip_path);
                Ok(Some(dir))
            }
            Err(e @ InstallError::ZipNotFound { .. }) => Err(e),
            Err(e) => {
                tracing::error!("Unzipping {} failed: {}", name, e);
                Ok(None)
            }
        }
    }

    /// Removes the emptied `temp-*` directory that held a consumed archive.
    fn release_download_dir(&self, zip_path: &Path) {
        if let Some(dir) = zip_path.parent() {
            if dir.parent() == Some(self.staging.storage_root()) {
                self.staging.cleanup(dir);
            }
        }
    }

    pub fn copy_files(&self, name: &str, extracted_dir: &Path) -> Result<bool> {
        validate_module_name(name)?;
        Ok(self.tree.copy_into(name, extracted_dir))
    }

    pub fn delete_files(&self, file_list_json: &str) -> bool {
        self.tree.delete_removed_files(file_list_json)
    }

    pub fn complete(&self, name: &str, version: &str) -> Result<bool> {
        validate_module_name(name)?;
        self.lifecycle.complete(name, version)
    }

    /// Looks up the latest version of `name` and applies the capability gate.
    pub async fn check_for_update(&self, name: &str, installed: Option<&str>) -> Result<UpdateCheck> {
        let detail = match self.get_module(name).await? {
            InstallationOutcome::Success(detail) => detail,
            other => {
                tracing::error!("No update information for {}: {}", name, describe_failure(&other));
                return Ok(UpdateCheck::Unavailable(other.map(|_| ())));
            }
        };

        if let Some(installed) = installed {
            if !is_newer(&detail.version, installed) {
                tracing::info!("{} is already at {}", name, installed);
                return Ok(UpdateCheck::UpToDate);
            }
        }

        let extensions = detail.extensions.clone();
        Ok(match evaluate_capabilities(detail) {
            InstallationOutcome::Success(detail) => UpdateCheck::Available(detail),
            InstallationOutcome::IncompatibleEnvironment {
                missing_capabilities,
            } => UpdateCheck::ExtensionRequired {
                extensions,
                missing: missing_capabilities,
            },
            other => UpdateCheck::Unavailable(other.map(|_| ())),
        })
    }

    /// Installs or updates `name` to its latest marketplace version.
    ///
    /// `confirm` is asked once the version passed the capability gate; returning
    /// `false` stops before anything is downloaded.
    pub async fn install<F>(&self, name: &str, confirm: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&RemoteModuleDetail) -> bool,
    {
        validate_module_name(name)?;
        let lock = self.module_lock(name);
        let outcome = {
            let _guard = lock.lock().await;
            self.install_locked(name, confirm).await
        };
        self.release_module_lock(name, lock);
        outcome
    }

    async fn install_locked<F>(&self, name: &str, confirm: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&RemoteModuleDetail) -> bool,
    {
        self.transition(name, &InstallState::FetchingMetadata);
        let installed = self
            .lifecycle
            .store()
            .find(name)?
            .filter(|m| m.installed)
            .map(|m| m.version);

        let detail = match self.check_for_update(name, installed.as_deref()).await? {
            UpdateCheck::Available(detail) => detail,
            UpdateCheck::ExtensionRequired { extensions, missing } => {
                return Ok(UpdateOutcome::ExtensionRequired {
                    extensions,
                    missing,
                })
            }
            UpdateCheck::UpToDate => return Ok(UpdateOutcome::UpToDate),
            UpdateCheck::Unavailable(failure) => {
                return Ok(self.halt(
                    name,
                    InstallState::FetchingMetadata,
                    describe_failure(&failure),
                ))
            }
        };

        if !confirm(&detail) {
            tracing::info!("Installation of {} {} declined", name, detail.version);
            return Ok(UpdateOutcome::Declined);
        }

        self.run_pipeline(&detail).await
    }

    async fn run_pipeline(&self, detail: &RemoteModuleDetail) -> Result<UpdateOutcome> {
        let name = detail.name.as_str();
        let version = detail.version.as_str();

        self.transition(name, &InstallState::Downloading);
        let zip_path = match self.download(name, version).await? {
            InstallationOutcome::Success(path) => path,
            other => return Ok(self.halt(name, InstallState::Downloading, describe_failure(&other))),
        };

        self.transition(name, &InstallState::Extracting);
        let extracted = match self.unzip(name, &zip_path) {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                return Ok(self.halt(name, InstallState::Extracting, "Unzipping exception".to_string()))
            }
            Err(e) => return Ok(self.halt(name, InstallState::Extracting, e.to_string())),
        };

        self.finish_from_extracted(name, version, &extracted, &detail.deleted_files)
    }

    fn finish_from_extracted(
        &self,
        name: &str,
        version: &str,
        extracted: &Path,
        deleted_files: &[String],
    ) -> Result<UpdateOutcome> {
        self.transition(name, &InstallState::Copying);
        if !self.copy_files(name, extracted)? {
            return Ok(self.halt(
                name,
                InstallState::Copying,
                format!("could not copy files; staged tree kept at {}", extracted.display()),
            ));
        }

        if !deleted_files.is_empty() {
            self.transition(name, &InstallState::DeletingObsoleteFiles);
            if !self.tree.delete_files(deleted_files) {
                return Ok(self.halt(
                    name,
                    InstallState::DeletingObsoleteFiles,
                    "could not delete obsolete files".to_string(),
                ));
            }
        }

        self.transition(name, &InstallState::Migrating);
        if let Err(e) = self.complete(name, version) {
            return Ok(self.halt(name, InstallState::Migrating, e.to_string()));
        }

        self.transition(name, &InstallState::Completed);
        let module = self
            .lifecycle
            .store()
            .find(name)?
            .ok_or_else(|| InstallError::Store(format!("record for {} missing after install", name)))?;
        Ok(UpdateOutcome::Updated(module))
    }

    /// Installs a local archive as `name` at `version`.
    pub async fn install_upload(&self, file: &Path, name: &str, version: &str) -> Result<UpdateOutcome> {
        validate_module_name(name)?;
        let lock = self.module_lock(name);
        let outcome = {
            let _guard = lock.lock().await;
            self.install_upload_locked(file, name, version)
        };
        self.release_module_lock(name, lock);
        outcome
    }

    fn install_upload_locked(&self, file: &Path, name: &str, version: &str) -> Result<UpdateOutcome> {
        let relative = self.upload(file, name)?;
        let zip_path = self.staging.resolve(&relative);

        self.transition(name, &InstallState::Extracting);
        let extracted = match self.unzip(name, &zip_path) {
            Ok(Some(dir)) => dir,
            Ok(None) => {
                return Ok(self.halt(name, InstallState::Extracting, "Unzipping exception".to_string()))
            }
            Err(e) => return Ok(self.halt(name, InstallState::Extracting, e.to_string())),
        };

        self.finish_from_extracted(name, version, &extracted, &[])
    }

    fn transition(&self, name: &str, state: &InstallState) {
        tracing::debug!("[{}] -> {}", name, state);
    }

    fn halt(&self, name: &str, stage: InstallState, reason: String) -> UpdateOutcome {
        let failed = InstallState::Failed {
            reason: reason.clone(),
        };
        tracing::error!("[{}] {} halted: {}", name, stage, reason);
        self.transition(name, &failed);
        UpdateOutcome::Halted { stage, reason }
    }
}
