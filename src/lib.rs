//! Installs marketplace-distributed modules into a host application.
//!
//! A module is fetched from the marketplace catalog as a zip archive, staged and
//! extracted under the storage directory, copied into `{app_dir}/Modules/{name}`, and
//! finished by the host's task runner (register, migrate, seed, enable).

pub mod catalog;
pub mod config;
pub mod error;
pub mod installer;
pub mod lifecycle;
pub mod module_tree;
pub mod staging;
pub mod types;

pub use catalog::{CatalogClient, Credentials, HttpCatalogClient, InstallationOutcome};
pub use error::{InstallError, Result};
pub use installer::{InstallState, ModuleInstaller, UpdateCheck, UpdateOutcome};
