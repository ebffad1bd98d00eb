//! Post-copy lifecycle: registration, migrate, seed, enable, record, notify.

use crate::error::{InstallError, Result};
use crate::types::{InstallerConfig, Module};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// External task runner that owns migrations, seeders and module activation.
pub trait TaskRunner: Send + Sync {
    fn register_module(&self, module: &str) -> Result<()>;
    fn migrate(&self, module: &str) -> Result<()>;
    fn seed(&self, module: &str) -> Result<()>;
    fn enable(&self, module: &str) -> Result<()>;
}

/// Persistence for `Module` records, keyed by name.
pub trait ModuleStore: Send + Sync {
    fn upsert(&self, name: &str, version: &str, installed: bool, enabled: bool) -> Result<Module>;
    fn find(&self, name: &str) -> Result<Option<Module>>;
    fn all(&self) -> Result<Vec<Module>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Installed(Module),
    Enabled(Module),
}

pub trait EventBus: Send + Sync {
    fn publish(&self, event: ModuleEvent);
}

/// Runs `{prefix} module:<task> <name>` commands, e.g. `php artisan module:migrate acme --force`.
#[derive(Debug, Clone)]
pub struct CommandTaskRunner {
    program: String,
    prefix_args: Vec<String>,
    app_root: PathBuf,
    modules_root: PathBuf,
}

impl CommandTaskRunner {
    pub fn new(command_line: &str, app_root: impl Into<PathBuf>, modules_root: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| InstallError::Task {
            task: "configure".to_string(),
            module: String::new(),
            message: "task runner command is empty".to_string(),
        })?;
        Ok(Self {
            program,
            prefix_args: parts.collect(),
            app_root: app_root.into(),
            modules_root: modules_root.into(),
        })
    }

    fn run(&self, task: &str, module: &str, extra: &[&str]) -> Result<()> {
        tracing::debug!(
            "Running {} {} {} {} {:?}",
            self.program,
            self.prefix_args.join(" "),
            task,
            module,
            extra
        );

        let output = Command::new(&self.program)
            .args(&self.prefix_args)
            .arg(task)
            .arg(module)
            .args(extra)
            .current_dir(&self.app_root)
            .output()
            .map_err(|e| InstallError::Task {
                task: task.to_string(),
                module: module.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(InstallError::Task {
                task: task.to_string(),
                module: module.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl TaskRunner for CommandTaskRunner {
    fn register_module(&self, module: &str) -> Result<()> {
        let path = self.modules_root.join(module);
        if !path.is_dir() {
            return Err(InstallError::Task {
                task: "register".to_string(),
                module: module.to_string(),
                message: format!("{} is not a module directory", path.display()),
            });
        }
        tracing::debug!("Registered module {} from {}", module, path.display());
        Ok(())
    }

    fn migrate(&self, module: &str) -> Result<()> {
        self.run("module:migrate", module, &["--force"])
    }

    fn seed(&self, module: &str) -> Result<()> {
        self.run("module:seed", module, &["--force"])
    }

    fn enable(&self, module: &str) -> Result<()> {
        self.run("module:enable", module, &[])
    }
}

/// Stores module records in the `modules` map of the JSON config file.
pub struct JsonModuleStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonModuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<InstallerConfig> {
        if !self.path.exists() {
            return Ok(InstallerConfig::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| InstallError::io(&self.path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, config: &InstallerConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content).map_err(|e| InstallError::io(&self.path, e))
    }
}

impl ModuleStore for JsonModuleStore {
    fn upsert(&self, name: &str, version: &str, installed: bool, enabled: bool) -> Result<Module> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| InstallError::Store("module store lock poisoned".to_string()))?;

        let mut config = self.load()?;
        let now = Utc::now().to_rfc3339();
        let module = match config.modules.get(name) {
            Some(existing) => Module {
                version: version.to_string(),
                installed,
                enabled,
                updated_at: now,
                ..existing.clone()
            },
            None => Module {
                name: name.to_string(),
                version: version.to_string(),
                installed,
                enabled,
                installed_at: now.clone(),
                updated_at: now,
            },
        };
        config.modules.insert(name.to_string(), module.clone());
        self.save(&config)?;
        Ok(module)
    }

    fn find(&self, name: &str) -> Result<Option<Module>> {
        Ok(self.load()?.modules.remove(name))
    }

    fn all(&self) -> Result<Vec<Module>> {
        let mut modules: Vec<Module> = self.load()?.modules.into_values().collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }
}

/// Fans module events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ModuleEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: ModuleEvent) {
        match &event {
            ModuleEvent::Installed(m) => tracing::info!("Module {} {} installed", m.name, m.version),
            ModuleEvent::Enabled(m) => tracing::info!("Module {} enabled", m.name),
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

pub struct LifecycleRunner {
    tasks: Arc<dyn TaskRunner>,
    store: Arc<dyn ModuleStore>,
    events: Arc<dyn EventBus>,
}

impl LifecycleRunner {
    pub fn new(
        tasks: Arc<dyn TaskRunner>,
        store: Arc<dyn ModuleStore>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            tasks,
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn ModuleStore> {
        &self.store
    }

    /// Registers, migrates, seeds and enables `module`, then records it as installed
    /// and enabled. Any step failing aborts the rest.
    pub fn complete(&self, module: &str, version: &str) -> Result<bool> {
        self.tasks.register_module(module)?;

        tracing::info!("Running migrations for {}", module);
        self.tasks.migrate(module)?;
        tracing::info!("Seeding {}", module);
        self.tasks.seed(module)?;
        tracing::info!("Enabling {}", module);
        self.tasks.enable(module)?;

        let record = self.store.upsert(module, version, true, true)?;

        self.events.publish(ModuleEvent::Installed(record.clone()));
        self.events.publish(ModuleEvent::Enabled(record));
        Ok(true)
    }
}
