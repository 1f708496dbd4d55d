//! # Command Line Interface
//!
//! Administrative commands for the credential vault: master key generation,
//! database migrations and credential rotation.

pub mod keys;
pub mod output;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::{DatabaseConfig, ObservabilityConfig, VaultConfig};
use crate::observability::{init_logging, log_config_info};
use crate::secrets::{EnvFallbackResolver, FallbackResolver, NoFallback};
use crate::services::{EnvelopeCodec, KeyManager, MASTER_KEY_VAR};
use crate::storage::{create_pool, run_migrations, IntegrationKeyRepository};

#[derive(Parser)]
#[command(name = "credvault")]
#[command(about = "Encrypted, versioned storage for third-party API credentials")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a fresh base64 master key for KEY_ENCRYPTION_SECRET
    GenMasterKey,

    /// Apply pending database migrations
    Migrate,

    /// Credential management commands
    Keys {
        /// Seed never-read slots from HUBSPOT_PRIVATE_APP_KEY / CREDVAULT_FALLBACK_*.
        /// Each seed stores a new version, replacing the active one.
        #[arg(long, global = true)]
        seed: bool,

        #[command(subcommand)]
        command: keys::KeyCommands,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&ObservabilityConfig::from_env(), cli.verbose)?;

    match cli.command {
        Commands::GenMasterKey => {
            let key = EnvelopeCodec::generate_master_key()?;
            eprintln!("Store this value in {}; it cannot be recovered.", MASTER_KEY_VAR);
            println!("{}", key);
        }

        Commands::Migrate => {
            let mut database = DatabaseConfig::from_env();
            if let Some(url) = cli.database_url {
                database.url = url;
            }
            database.auto_migrate = false;

            let pool = create_pool(&database).await?;
            println!("Running database migrations...");
            run_migrations(&pool).await?;
            println!("Migrations completed successfully!");
        }

        Commands::Keys { seed, command } => {
            let config = load_config(cli.database_url)?;
            log_config_info(&config);
            let manager = build_key_manager(&config, seed).await?;
            keys::handle_keys_command(command, &manager).await?;
        }
    }

    Ok(())
}

fn load_config(database_url: Option<String>) -> anyhow::Result<VaultConfig> {
    let mut config = VaultConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = database_url {
        config.database.url = url;
        config.validate()?;
    }
    Ok(config)
}

/// Wire the SQLite store and codec into a manager.
///
/// Every CLI invocation is a fresh process, so environment fallbacks are only
/// installed when `seed_from_env` is set; otherwise reads never write.
pub async fn build_key_manager(
    config: &VaultConfig,
    seed_from_env: bool,
) -> anyhow::Result<KeyManager> {
    let pool = create_pool(&config.database).await?;
    let codec = EnvelopeCodec::new(&config.encryption)?;

    let fallback: Arc<dyn FallbackResolver> = if seed_from_env {
        let resolver = config
            .key_manager
            .fallback_mappings()
            .into_iter()
            .fold(EnvFallbackResolver::with_defaults(), |resolver, (key, var)| {
                resolver.map(key, var)
            });
        Arc::new(resolver)
    } else {
        Arc::new(NoFallback)
    };

    let manager = KeyManager::builder()
        .store(Arc::new(IntegrationKeyRepository::new(pool)))
        .codec(codec)
        .fallback(fallback)
        .cache_ttl(config.key_manager.cache_ttl())
        .build()?;

    Ok(manager)
}
