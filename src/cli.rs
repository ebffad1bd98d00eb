use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // Release builds carry just the tag
    if let Some(tag) = option_env!("MODCTL_GIT_TAG") {
        return tag;
    }

    let commit = option_env!("MODCTL_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("MODCTL_GIT_BRANCH").unwrap_or("unknown");

    // Leaked once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "modctl")]
#[command(about = "Install and update application modules from the marketplace")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Query the marketplace's development channel
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List modules available on the marketplace
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show marketplace details for a module
    Info {
        /// Module name (e.g., 'Payments')
        name: String,
    },

    /// Install a module, or update it to the latest version
    #[command(
        after_help = "Examples:\n  modctl install Payments\n  modctl install Payments --yes\n  modctl --dev -v install Payments"
    )]
    Install {
        /// Module name
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Install a module from a local zip archive
    #[command(disable_version_flag = true)]
    Upload {
        /// Path to the module archive
        file: PathBuf,
        /// Module name the archive installs
        #[arg(long)]
        module: String,
        /// Version recorded for the installation
        #[arg(long)]
        version: String,
    },

    /// List locally installed modules
    Installed,

    /// Manage the marketplace API token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Manage modctl's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum TokenAction {
    /// Validate a token against the marketplace (defaults to the configured token)
    Check { token: Option<String> },
    /// Validate a token and store it in the configuration
    Set { token: String },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration setting
    Get {
        /// Key to get (if omitted, shows all settings)
        key: Option<String>,
    },
    /// Set a configuration setting
    Set {
        /// Key and value (e.g., 'app-dir=/srv/app' or 'app-dir /srv/app')
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },
    /// Unset a configuration setting (restores the default)
    Unset {
        /// Key to unset (e.g., 'marketplace-url')
        key: String,
    },
    /// Show full configuration
    Show {
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: String,
    },
}
