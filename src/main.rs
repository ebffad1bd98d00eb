mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigAction, TokenAction};
use console::{style, Term};
use modctl::catalog::{Credentials, HttpCatalogClient, InstallationOutcome};
use modctl::config::{
    get_config_file_path, get_setting, load_config, load_stored_config, save_config,
    set_setting, unset_setting, SETTING_KEYS,
};
use modctl::installer::{ModuleInstaller, UpdateOutcome};
use modctl::lifecycle::{BroadcastEventBus, CommandTaskRunner, JsonModuleStore, LifecycleRunner};
use modctl::module_tree::ModuleTree;
use modctl::staging::ArchiveStaging;
use modctl::types::{InstallerConfig, InstallerSettings, ModuleListing, RemoteModuleDetail};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let mut config = load_config()?;
    if cli.dev {
        config.settings.dev_mode = true;
    }

    match cli.command {
        Commands::Version => {
            println!("modctl v{}", env!("CARGO_PKG_VERSION"));
        }

        Commands::Installed => {
            list_installed_modules(&config);
        }

        Commands::List { json } => {
            let installer = build_installer(&config.settings, cli.quiet)?;
            match installer.get_modules().await? {
                InstallationOutcome::Success(listings) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&listings)?);
                    } else {
                        print_listings(&listings);
                    }
                }
                other => exit_with_body("Could not list modules", &other),
            }
        }

        Commands::Info { name } => {
            let installer = build_installer(&config.settings, cli.quiet)?;
            match installer.get_module(&name).await? {
                InstallationOutcome::Success(detail) => {
                    println!("{} v{}", style(&detail.name).bold(), detail.version);
                    print_extensions(&detail.extensions);
                    if let Some(local) = config.modules.get(&detail.name) {
                        println!("  Installed: v{} (enabled: {})", local.version, local.enabled);
                    }
                }
                other => exit_with_body(&format!("Could not fetch {}", name), &other),
            }
        }

        Commands::Install { name, yes } => {
            let installer = build_installer(&config.settings, cli.quiet)?;
            let outcome = installer
                .install(&name, |detail| confirm_install(detail, yes))
                .await?;
            report_outcome(&name, outcome);
        }

        Commands::Upload {
            file,
            module,
            version,
        } => {
            if !file.is_file() {
                return Err(anyhow!("Archive not found: {}", file.display()));
            }
            let installer = build_installer(&config.settings, cli.quiet)?;
            let outcome = installer.install_upload(&file, &module, &version).await?;
            report_outcome(&module, outcome);
        }

        Commands::Token { action } => {
            let installer = build_installer(&config.settings, cli.quiet)?;
            match action {
                TokenAction::Check { token } => {
                    let token = token
                        .or_else(|| config.settings.api_token.clone())
                        .ok_or_else(|| anyhow!("No token given and none configured"))?;
                    match installer.check_token(&token).await {
                        InstallationOutcome::Success(_) => println!("{} Token is valid", style("✓").green()),
                        other => exit_with_body("Token rejected", &other),
                    }
                }
                TokenAction::Set { token } => match installer.check_token(&token).await {
                    InstallationOutcome::Success(_) => {
                        let mut stored = load_stored_config()?;
                        stored.settings.api_token = Some(token);
                        save_config(&stored)?;
                        println!("{} Token saved", style("✓").green());
                    }
                    other => exit_with_body("Token rejected; not saved", &other),
                },
            }
        }

        Commands::Config { action } => {
            handle_config(action, &config)?;
        }
    }

    Ok(())
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn build_installer(settings: &InstallerSettings, quiet: bool) -> Result<ModuleInstaller> {
    let catalog = HttpCatalogClient::new(
        &settings.marketplace_url,
        Credentials::new(settings.api_token.clone()),
    )
    .with_progress(!quiet);

    let tree = ModuleTree::new(&settings.app_dir);
    let tasks = CommandTaskRunner::new(&settings.task_runner, tree.app_root(), tree.modules_root())?;
    let store = JsonModuleStore::new(get_config_file_path()?);

    let lifecycle = LifecycleRunner::new(
        Arc::new(tasks),
        Arc::new(store),
        Arc::new(BroadcastEventBus::default()),
    );

    tracing::debug!(
        "Using marketplace {} (dev: {}), storage {}, app {}",
        settings.marketplace_url,
        settings.dev_mode,
        settings.storage_dir,
        settings.app_dir
    );

    Ok(ModuleInstaller::new(
        Arc::new(catalog),
        ArchiveStaging::new(&settings.storage_dir),
        tree,
        lifecycle,
    )
    .with_dev_mode(settings.dev_mode))
}

fn print_extensions(extensions: &BTreeMap<String, bool>) {
    if extensions.is_empty() {
        return;
    }
    println!("  Required extensions:");
    for (extension, available) in extensions {
        let mark = if *available { "✅" } else { "❌" };
        println!("    {} {}", mark, extension);
    }
}

fn confirm_install(detail: &RemoteModuleDetail, assume_yes: bool) -> bool {
    println!(
        "Module {} v{} is available",
        style(&detail.name).bold(),
        detail.version
    );
    print_extensions(&detail.extensions);

    if assume_yes {
        return true;
    }

    let term = Term::stdout();
    if !term.is_term() {
        tracing::warn!("Not a terminal; pass --yes to install non-interactively");
        return false;
    }
    if term.write_str("Do you want to install it? [y/N] ").is_err() {
        return false;
    }
    match term.read_line() {
        Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn report_outcome(name: &str, outcome: UpdateOutcome) {
    match outcome {
        UpdateOutcome::Updated(module) => {
            println!(
                "{} {} v{} installed and enabled",
                style("✓").green(),
                module.name,
                module.version
            );
        }
        UpdateOutcome::UpToDate => println!("{} is up to date", name),
        UpdateOutcome::Declined => println!("Installation cancelled"),
        UpdateOutcome::ExtensionRequired {
            extensions,
            missing,
        } => {
            eprintln!("{} {} cannot be installed yet", style("✗").red(), name);
            print_extensions(&extensions);
            eprintln!("Install the missing extensions first: {}", missing.join(", "));
            std::process::exit(1);
        }
        UpdateOutcome::Halted { stage, reason } => {
            eprintln!(
                "{} Installing {} failed while {}: {}",
                style("✗").red(),
                name,
                stage,
                reason
            );
            std::process::exit(1);
        }
    }
}

fn exit_with_body<T>(context: &str, outcome: &InstallationOutcome<T>) -> ! {
    let body = outcome
        .error_body()
        .map(|b| b.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    eprintln!("{} {}: {}", style("✗").red(), context, body);
    std::process::exit(1);
}

fn print_listings(listings: &[ModuleListing]) {
    println!("--- Marketplace Modules ---");
    if listings.is_empty() {
        println!("  No modules available.");
        return;
    }
    for listing in listings {
        let latest = listing.latest_version.as_deref().unwrap_or("?");
        let state = match (&listing.installed_version, listing.update_available) {
            (Some(installed), true) => format!("installed v{}, update available", installed),
            (Some(installed), false) => format!("installed v{}", installed),
            (None, _) => "not installed".to_string(),
        };
        println!("  - {} (v{}) [{}]", listing.name, latest, state);
        if let Some(description) = &listing.description {
            println!("    {}", description);
        }
    }
    println!("---------------------------");
}

fn list_installed_modules(config: &InstallerConfig) {
    println!("--- Installed Modules ---");
    if config.modules.is_empty() {
        println!("  No modules installed yet.");
        return;
    }

    let mut modules: Vec<_> = config.modules.values().collect();
    modules.sort_by_key(|m| &m.name);

    for module in modules {
        let status = if module.enabled { "enabled" } else { "disabled" };
        println!("  - {} (v{}) [{}]", module.name, module.version, status);
        println!("    Updated: {}\n", module.updated_at);
    }
    println!("-------------------------");
}

fn handle_config(action: ConfigAction, effective: &InstallerConfig) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            if let Some(key) = key {
                let value = get_setting(&effective.settings, &key)
                    .ok_or_else(|| anyhow!("Setting '{}' not found", key))?;
                println!("{}", value);
            } else {
                println!("--- modctl Settings ---");
                for key in SETTING_KEYS {
                    let value = get_setting(&effective.settings, key).unwrap_or_default();
                    println!("  {}: {}", key, value);
                }
            }
        }
        ConfigAction::Set { args } => {
            let (key, value) = match args.as_slice() {
                [pair] => pair
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| anyhow!("Invalid format. Use 'key=value' or 'key value'."))?,
                [key, rest @ ..] => (key.clone(), rest.join(" ")),
                [] => return Err(anyhow!("Missing key")),
            };
            let mut stored = load_stored_config()?;
            set_setting(&mut stored.settings, &key, &value)?;
            save_config(&stored)?;
            tracing::info!("Setting '{}' updated", key);
        }
        ConfigAction::Unset { key } => {
            let mut stored = load_stored_config()?;
            unset_setting(&mut stored.settings, &key)?;
            save_config(&stored)?;
            tracing::info!("Setting '{}' unset", key);
        }
        ConfigAction::Show { format } => {
            let stored = load_stored_config()?;
            let mut settings = serde_json::to_value(&stored.settings)?;
            if let Some(token) = settings.get_mut("api_token").filter(|t| !t.is_null()) {
                *token = serde_json::Value::String("********".to_string());
            }
            let shown = serde_json::json!({
                "config_file": get_config_file_path()?.display().to_string(),
                "settings": settings,
                "modules": stored.modules,
            });
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&shown)?),
                "yaml" => print!(
                    "{}",
                    serde_yaml::to_string(&shown).context("Could not render YAML")?
                ),
                other => return Err(anyhow!("Unsupported format '{}'. Use json or yaml.", other)),
            }
        }
    }
    Ok(())
}
