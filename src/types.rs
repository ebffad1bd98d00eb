use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Locally persisted installation record, keyed by module name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub enabled: bool,
    pub installed_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallerSettings {
    #[serde(default = "default_marketplace_url")]
    pub marketplace_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_task_runner")]
    pub task_runner: String,
}

fn default_marketplace_url() -> String {
    "https://craterapp.com".to_string()
}
fn data_root() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("modctl")
}
fn default_storage_dir() -> String {
    data_root()
        .join("storage")
        .join("app")
        .to_string_lossy()
        .to_string()
}
fn default_app_dir() -> String {
    data_root().join("app").to_string_lossy().to_string()
}
fn default_task_runner() -> String {
    "php artisan".to_string()
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            marketplace_url: default_marketplace_url(),
            api_token: None,
            storage_dir: default_storage_dir(),
            app_dir: default_app_dir(),
            dev_mode: false,
            task_runner: default_task_runner(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InstallerConfig {
    #[serde(default)]
    pub modules: HashMap<String, Module>,
    #[serde(default)]
    pub settings: InstallerSettings,
}

/// One entry of the marketplace module listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteModuleSummary {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Descriptor of one module version, including its capability gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteModuleDetail {
    pub name: String,
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extensions: BTreeMap<String, bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted_files: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteModuleDetail {
    /// Capabilities this version requires that are not currently satisfied.
    pub fn missing_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter(|(_, satisfied)| !**satisfied)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Module listing entry enriched with the local installation state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModuleListing {
    pub id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub latest_version: Option<String>,
    pub installed_version: Option<String>,
    pub installed: bool,
    pub enabled: bool,
    pub update_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenCheck {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
