//! datadb agent - command line entry point
//!
//! Reads the profile file (default `/etc/datadb.ini`) and runs one backup, restore
//! or status check for a single profile.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datadb_agent::config::{self, Profile, Settings};
use datadb_agent::hooks::HookPolicy;
use datadb_agent::utils::{self, binaries::Toolchain};
use datadb_agent::Executor;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Backup agent for datadb; profiles are read from /etc/datadb.ini")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Force the operation even if the local marker says otherwise
    #[arg(short, long, global = true)]
    force: bool,

    /// Don't run pre/post-exec commands
    #[arg(short = 'n', long, global = true)]
    no_exec: bool,

    /// Don't run pre-exec commands
    #[arg(short = 'b', long, global = true)]
    no_pre_exec: bool,

    /// Don't run post-exec commands
    #[arg(short = 'm', long, global = true)]
    no_post_exec: bool,

    /// Path to the profile file (overrides DATADB_CONF)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backup to datastore
    Backup { profile: String },
    /// Restore from datastore
    Restore { profile: String },
    /// Get info for profile
    Status { profile: String },
}

impl Commands {
    fn profile(&self) -> &str {
        match self {
            Commands::Backup { profile } | Commands::Restore { profile } | Commands::Status { profile } => profile,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = utils::logger::init(&cli.log_level) {
        eprintln!("failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = Settings::from_env()?;
    if let Some(path) = cli.config.clone() {
        settings.config_path = path;
    }

    let mut profiles = config::load_profiles(&settings.config_path)
        .with_context(|| format!("failed to load profiles from {}", settings.config_path.display()))?;
    let name = cli.command.profile();
    let profile = profiles.remove(name).ok_or_else(|| {
        let known: Vec<&String> = profiles.keys().collect();
        anyhow::anyhow!(
            "unknown profile '{}' (configured in {}: {:?})",
            name,
            settings.config_path.display(),
            known
        )
    })?;

    tracing::debug!("Starting datadb-agent v{} for profile '{}'", env!("CARGO_PKG_VERSION"), profile.name);

    let policy = HookPolicy::from_flags(cli.no_exec, cli.no_pre_exec, cli.no_post_exec);
    let executor = Executor::new(settings, Toolchain::detect())?;

    match cli.command {
        Commands::Status { .. } => {
            println!("{}", executor.status(&profile));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Restore { .. } => restore(&executor, &profile, cli.force, policy).await,
        Commands::Backup { .. } => backup(&executor, &profile, cli.force, policy).await,
    }
}

async fn restore(executor: &Executor, profile: &Profile, force: bool, policy: HookPolicy) -> Result<ExitCode> {
    let outcome = executor.restore_with_hooks(profile, force, policy).await?;
    Ok(ExitCode::from(outcome.exit_code()))
}

async fn backup(executor: &Executor, profile: &Profile, force: bool, policy: HookPolicy) -> Result<ExitCode> {
    let result = executor.backup_with_hooks(profile, force, policy).await;

    if let Err(e) = &result {
        if e.is_transfer() {
            tracing::error!("Backup of '{}' failed during transfer", profile.name);
        }
    }

    result?;
    Ok(ExitCode::SUCCESS)
}
