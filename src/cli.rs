use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::database::StateStore;
use crate::manifest::Manifest;
use crate::reconcile::{Action, RetryPolicy};
use crate::vault::{builtin_registry, VaultConfig, VaultTransports};
use crate::workspace::Workspace;

#[derive(Parser, Debug)]
#[command(
    name = "merka-reconcile",
    about = "Converge Vault mounts and transit keys on a declared state",
    version
)]
pub struct Cli {
    /// Vault server address.
    #[arg(
        long,
        default_value = "http://127.0.0.1:8200",
        global = true,
        env = "VAULT_ADDR"
    )]
    pub vault_addr: String,

    /// Vault token used for every request.
    #[arg(long, global = true, env = "VAULT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Vault Enterprise namespace.
    #[arg(long, global = true, env = "VAULT_NAMESPACE")]
    pub namespace: Option<String>,

    /// SQLite file holding the last-known state.
    #[arg(long, global = true, default_value = "merka-state.db", env = "MERKA_STATE_DB")]
    pub state_db: String,

    /// Attempts per API call before giving up on a transient failure.
    #[arg(long, global = true, default_value_t = 5)]
    pub max_attempts: u32,

    /// Base delay between attempts, in milliseconds. Grows linearly.
    #[arg(long, global = true, default_value_t = 500)]
    pub backoff_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show what apply would change, without writing anything.
    Plan {
        #[arg(long, short)]
        manifest: PathBuf,
    },
    /// Converge every resource in the manifest, in order.
    Apply {
        #[arg(long, short)]
        manifest: PathBuf,
    },
    /// Delete the manifest's recorded resources, in reverse order.
    Destroy {
        #[arg(long, short)]
        manifest: PathBuf,
    },
    /// List recorded resources.
    State,
}

impl Cli {
    pub fn vault_config(&self) -> VaultConfig {
        let mut config = VaultConfig::new(&self.vault_addr);
        if let Some(token) = &self.token {
            config = config.with_token(token);
        }
        if let Some(namespace) = &self.namespace {
            config = config.with_namespace(namespace);
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

pub async fn run_cli() -> Result<()> {
    run(Cli::parse()).await
}

pub async fn run(cli: Cli) -> Result<()> {
    let store = StateStore::new(&cli.state_db)
        .with_context(|| format!("Failed to open state database {}", cli.state_db))?;
    let workspace = Workspace::new(builtin_registry(), store, cli.retry_policy());

    match &cli.command {
        Commands::Plan { manifest } => {
            let manifest = load_manifest(manifest)?;
            let transports = connect(&cli)?;
            info!("Planning {} resource(s) against {}", manifest.resources.len(), cli.vault_addr);
            let plans = workspace
                .plan_all(&manifest, |kind: &str| transports.for_kind(kind))
                .await?;

            let pending = plans.iter().filter(|(_, plan)| !plan.is_noop()).count();
            for (address, plan) in &plans {
                if plan.actions().iter().any(Action::is_destructive) {
                    warn!("{} will be replaced", address);
                }
            }
            info!("Plan: {} of {} resource(s) to change", pending, plans.len());
        }

        Commands::Apply { manifest } => {
            let manifest = load_manifest(manifest)?;
            let transports = connect(&cli)?;
            info!("Applying {} resource(s) to {}", manifest.resources.len(), cli.vault_addr);
            match workspace
                .apply_all(&manifest, |kind: &str| transports.for_kind(kind))
                .await
            {
                Ok(outcomes) => info!("Apply complete: {} resource(s)", outcomes.len()),
                Err(e) => {
                    error!("Apply failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Commands::Destroy { manifest } => {
            let manifest = load_manifest(manifest)?;
            let transports = connect(&cli)?;
            let destroyed = workspace
                .destroy_all(&manifest, |kind: &str| transports.for_kind(kind))
                .await?;
            info!("Destroyed {} resource(s)", destroyed.len());
        }

        Commands::State => {
            let records = workspace.store().list()?;
            if records.is_empty() {
                info!("No resources recorded in {}", cli.state_db);
            }
            for record in records {
                info!(
                    "{} ({}) -> {} [{} field(s)]",
                    record.address,
                    record.kind,
                    record.remote_id,
                    record.fields.len()
                );
            }
        }
    }
    Ok(())
}

fn connect(cli: &Cli) -> Result<VaultTransports> {
    let config = cli.vault_config();
    if config.token.is_none() {
        warn!("No Vault token given; requests will be unauthenticated");
    }
    Ok(VaultTransports::from_config(&config)?)
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}
