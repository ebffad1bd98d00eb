//! Disposable staging directories for module archives.

use crate::error::{InstallError, Result};
use rand::RngCore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DOWNLOAD_PREFIX: &str = "temp";
pub const EXTRACT_PREFIX: &str = "temp2";
pub const DOWNLOAD_FILE_NAME: &str = "upload.zip";

#[derive(Debug, Clone)]
pub struct ArchiveStaging {
    storage_root: PathBuf,
}

/// 32 lowercase hex characters from 16 random bytes.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Creates `path` unless it is already a directory. Returns whether it was created.
pub(crate) fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path).map_err(|e| InstallError::io(path, e))?;
    Ok(true)
}

impl ArchiveStaging {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Mints `{storage_root}/{prefix}-{32 hex}`.
    pub fn new_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        let path = self
            .storage_root
            .join(format!("{}-{}", prefix, random_token()));
        if ensure_dir(&path)? {
            tracing::debug!("Created staging directory {}", path.display());
        }
        Ok(path)
    }

    /// Copies an uploaded archive to `temp-{hex}/{module}.zip`; returns the storage-relative path.
    pub fn store_uploaded_file(&self, file: &Path, module_name: &str) -> Result<PathBuf> {
        let dir = self.new_temp_dir(DOWNLOAD_PREFIX)?;
        let target = dir.join(format!("{}.zip", module_name));
        fs::copy(file, &target).map_err(|e| InstallError::io(file, e))?;
        tracing::info!("Stored upload {} as {}", file.display(), target.display());

        target
            .strip_prefix(&self.storage_root)
            .map(Path::to_path_buf)
            .map_err(|_| {
                InstallError::io(
                    &target,
                    io::Error::new(io::ErrorKind::Other, "staged file escaped storage root"),
                )
            })
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.storage_root.join(relative)
    }

    /// Writes downloaded archive bytes to `temp-{hex}/upload.zip`.
    pub fn write_downloaded_bytes(&self, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.new_temp_dir(DOWNLOAD_PREFIX)?;
        let path = dir.join(DOWNLOAD_FILE_NAME);
        fs::write(&path, bytes).map_err(|e| InstallError::io(&path, e))?;
        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Extracts `zip_path` into a fresh `temp2-{hex}` directory and deletes the archive.
    ///
    /// Fails with `ZipNotFound` before touching the filesystem when the archive is
    /// missing. An archive that cannot be opened removes the empty target directory,
    /// keeps the archive, and fails with `CorruptArchive`.
    pub fn extract(&self, zip_path: &Path) -> Result<PathBuf> {
        if !zip_path.exists() {
            return Err(InstallError::ZipNotFound {
                path: zip_path.to_path_buf(),
            });
        }

        let target = self.new_temp_dir(EXTRACT_PREFIX)?;
        tracing::info!(
            "Extracting {} to {}",
            zip_path.display(),
            target.display()
        );

        let mut archive = match open_archive(zip_path) {
            Ok(archive) => archive,
            Err(e) => {
                remove_dir_quietly(&target);
                return Err(e);
            }
        };

        if let Err(e) = extract_entries(&mut archive, &target) {
            remove_dir_quietly(&target);
            return Err(e);
        }
        drop(archive);

        if let Err(e) = fs::remove_file(zip_path) {
            tracing::warn!("Could not delete archive {}: {}", zip_path.display(), e);
        }

        Ok(target)
    }

    /// Deletes a staged file or directory. Missing paths are not an error.
    pub fn cleanup(&self, path: &Path) {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else if path.exists() {
            fs::remove_file(path)
        } else {
            return;
        };
        if let Err(e) = result {
            tracing::warn!("Could not clean up {}: {}", path.display(), e);
        }
    }
}

fn open_archive(zip_path: &Path) -> Result<zip::ZipArchive<fs::File>> {
    let file = fs::File::open(zip_path).map_err(|e| InstallError::io(zip_path, e))?;
    zip::ZipArchive::new(file).map_err(|source| InstallError::CorruptArchive {
        path: zip_path.to_path_buf(),
        source,
    })
}

fn extract_entries(archive: &mut zip::ZipArchive<fs::File>, extract_dir: &Path) -> Result<()> {
    let corrupt = |source: zip::result::ZipError| InstallError::CorruptArchive {
        path: extract_dir.to_path_buf(),
        source,
    };

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("Skipping unsafe path in zip: {}", entry.name());
            continue;
        };
        let outpath = extract_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| InstallError::io(&outpath, e))?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
            }
            let mut outfile =
                fs::File::create(&outpath).map_err(|e| InstallError::io(&outpath, e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| InstallError::io(&outpath, e))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&outpath, fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}

fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        tracing::warn!("Could not remove {}: {}", path.display(), e);
    }
}
