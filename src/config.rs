use crate::types::*;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;

pub const APP_NAME: &str = "modctl";
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const SETTING_KEYS: &[&str] = &[
    "marketplace_url",
    "api_token",
    "storage_dir",
    "app_dir",
    "dev_mode",
    "task_runner",
];

pub fn get_user_config_dir() -> Result<PathBuf> {
    let path = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join(APP_NAME);
    fs::create_dir_all(&path)?;
    Ok(path)
}

pub fn get_config_file_path() -> Result<PathBuf> {
    let path = match std::env::var("MODCTL_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => get_user_config_dir()?.join(CONFIG_FILE_NAME),
    };
    tracing::debug!("Config file path: {}", path.display());
    Ok(path)
}

/// Effective configuration: the stored file with environment overrides applied.
pub fn load_config() -> Result<InstallerConfig> {
    let mut config = load_stored_config()?;
    apply_env_overrides(&mut config.settings);
    Ok(config)
}

/// The configuration file as written, without environment overrides.
pub fn load_stored_config() -> Result<InstallerConfig> {
    let config_path = get_config_file_path()?;

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).with_context(|| {
            format!("Could not read config file at {}", config_path.display())
        })?;
        serde_json::from_str(&content).with_context(|| "Could not parse config file as JSON")?
    } else {
        InstallerConfig::default()
    };

    Ok(config)
}

fn apply_env_overrides(settings: &mut InstallerSettings) {
    if let Ok(url) = std::env::var("MODCTL_MARKETPLACE_URL") {
        settings.marketplace_url = url;
    }
    if let Ok(token) = std::env::var("MODCTL_API_TOKEN") {
        settings.api_token = Some(token);
    }
    if let Ok(dir) = std::env::var("MODCTL_STORAGE_DIR") {
        settings.storage_dir = dir;
    }
    if let Ok(dir) = std::env::var("MODCTL_APP_DIR") {
        settings.app_dir = dir;
    }
    if let Ok(runner) = std::env::var("MODCTL_TASK_RUNNER") {
        settings.task_runner = runner;
    }
    if let Ok(dev) = std::env::var("MODCTL_DEV_MODE") {
        settings.dev_mode = parse_bool(&dev);
    }
    if std::env::var("APP_ENV").is_ok_and(|env| env == "development") {
        settings.dev_mode = true;
    }
}

pub fn save_config(config: &InstallerConfig) -> Result<()> {
    let config_path = get_config_file_path()?;
    let config_dir = config_path
        .parent()
        .ok_or_else(|| anyhow!("Invalid config path"))?;

    fs::create_dir_all(config_dir)?;

    let content = serde_json::to_string_pretty(config)?;
    fs::write(&config_path, content)?;

    Ok(())
}

pub fn normalize_key(key: &str) -> String {
    key.replace('-', "_")
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                format!("_{}", c.to_lowercase())
            } else {
                c.to_string()
            }
        })
        .collect::<String>()
        .to_lowercase()
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

pub fn get_setting(settings: &InstallerSettings, key: &str) -> Option<String> {
    match normalize_key(key).as_str() {
        "marketplace_url" => Some(settings.marketplace_url.clone()),
        "api_token" => Some(settings.api_token.clone().unwrap_or_default()),
        "storage_dir" => Some(settings.storage_dir.clone()),
        "app_dir" => Some(settings.app_dir.clone()),
        "dev_mode" => Some(settings.dev_mode.to_string()),
        "task_runner" => Some(settings.task_runner.clone()),
        _ => None,
    }
}

pub fn set_setting(settings: &mut InstallerSettings, key: &str, value: &str) -> Result<()> {
    match normalize_key(key).as_str() {
        "marketplace_url" => settings.marketplace_url = value.trim_end_matches('/').to_string(),
        "api_token" => settings.api_token = Some(value.to_string()).filter(|t| !t.is_empty()),
        "storage_dir" => settings.storage_dir = value.to_string(),
        "app_dir" => settings.app_dir = value.to_string(),
        "dev_mode" => settings.dev_mode = parse_bool(value),
        "task_runner" => {
            if value.trim().is_empty() {
                return Err(anyhow!("task_runner cannot be empty"));
            }
            settings.task_runner = value.to_string();
        }
        other => {
            return Err(anyhow!(
                "'{}' is not a valid configuration setting. Valid settings: {}",
                other,
                SETTING_KEYS.join(", ")
            ))
        }
    }
    Ok(())
}

pub fn unset_setting(settings: &mut InstallerSettings, key: &str) -> Result<()> {
    let defaults = InstallerSettings::default();
    let key = normalize_key(key);
    match key.as_str() {
        "marketplace_url" => settings.marketplace_url = defaults.marketplace_url,
        "api_token" => settings.api_token = None,
        "storage_dir" => settings.storage_dir = defaults.storage_dir,
        "app_dir" => settings.app_dir = defaults.app_dir,
        "dev_mode" => settings.dev_mode = defaults.dev_mode,
        "task_runner" => settings.task_runner = defaults.task_runner,
        _ => {
            return Err(anyhow!(
                "'{}' is not a valid configuration setting. Valid settings: {}",
                key,
                SETTING_KEYS.join(", ")
            ))
        }
    }
    Ok(())
}
