//! The live module directory: `{app_dir}/Modules/{name}`.

use crate::error::{InstallError, Result};
use crate::staging::ensure_dir;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const MODULES_DIR_NAME: &str = "Modules";

#[derive(Debug, Clone)]
pub struct ModuleTree {
    app_root: PathBuf,
}

impl ModuleTree {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
        }
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    pub fn modules_root(&self) -> PathBuf {
        self.app_root.join(MODULES_DIR_NAME)
    }

    pub fn module_path(&self, module_name: &str) -> PathBuf {
        self.modules_root().join(module_name)
    }

    /// Installs the contents of `extracted_dir` into the modules root, replacing any
    /// existing directory for `module_name`.
    ///
    /// Returns `false` and leaves `extracted_dir` in place when the copy fails. A failed
    /// copy also removes whatever was partially written for `module_name`.
    pub fn copy_into(&self, module_name: &str, extracted_dir: &Path) -> bool {
        let modules_root = self.modules_root();
        if let Err(e) = ensure_dir(&modules_root) {
            tracing::error!("{}", e);
            return false;
        }

        let module_path = self.module_path(module_name);
        if module_path.is_dir() {
            tracing::info!("Removing existing installation at {}", module_path.display());
            if let Err(e) = fs::remove_dir_all(&module_path) {
                tracing::error!("Could not remove {}: {}", module_path.display(), e);
                return false;
            }
        }

        if let Err(e) = copy_dir_contents(extracted_dir, &modules_root) {
            tracing::error!("Copying {} failed: {}", module_name, e);
            if module_path.exists() {
                if let Err(e) = fs::remove_dir_all(&module_path) {
                    tracing::warn!("Could not remove partial copy {}: {}", module_path.display(), e);
                }
            }
            return false;
        }

        if let Err(e) = fs::remove_dir_all(extracted_dir) {
            tracing::warn!(
                "Could not delete staging directory {}: {}",
                extracted_dir.display(),
                e
            );
        }

        tracing::info!("Copied {} into {}", module_name, modules_root.display());
        true
    }

    /// Deletes the files named by a JSON array of application-relative paths.
    /// Malformed JSON and an empty list are both treated as nothing to do.
    pub fn delete_removed_files(&self, file_list_json: &str) -> bool {
        match serde_json::from_str::<Vec<String>>(file_list_json) {
            Ok(files) => self.delete_files(&files),
            Err(e) => {
                tracing::debug!("Ignoring unparsable removal manifest: {}", e);
                true
            }
        }
    }

    /// Best-effort removal of obsolete files. Always returns `true`.
    pub fn delete_files(&self, files: &[String]) -> bool {
        for file in files {
            let relative = Path::new(file);
            if !is_contained(relative) {
                tracing::warn!("Skipping removal of path outside the application: {}", file);
                continue;
            }

            let path = self.app_root.join(relative);
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => tracing::debug!("Deleted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not delete {}: {}", path.display(), e),
            }
        }
        true
    }
}

/// Relative path without `..` components.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Recursively copies everything under `from` into `to`.
fn copy_dir_contents(from: &Path, to: &Path) -> Result<()> {
    if !from.is_dir() {
        return Err(InstallError::io(
            from,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source directory missing"),
        ));
    }

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            InstallError::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| {
                InstallError::io(
                    entry.path(),
                    std::io::Error::new(std::io::ErrorKind::Other, "entry outside source"),
                )
            })?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| InstallError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| InstallError::io(&target, e))?;
        }
    }

    Ok(())
}
