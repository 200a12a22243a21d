use anyhow::{Context, Result};
use clap::Parser;
use watchtower::cli::{self, Cli, Commands};
use watchtower::config::AppConfig;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

fn load_config(dir: &std::path::Path) -> Result<AppConfig> {
    let config = match AppConfig::load_from(dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: failed to load config from {}: {}, using defaults", dir.display(), e);
            AppConfig::default_config()
        }
    };

    config
        .validate()
        .map_err(|errors| anyhow::anyhow!(errors.join("; ")))
        .with_context(|| format!("invalid configuration in {}", dir.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Uid {
            order,
            owner,
            chain_id,
            settlement,
        } => {
            init_logging_simple();
            cli::compute_uid(order, owner, *chain_id, settlement)?;
        }
        Commands::DecodeUid { uid } => {
            init_logging_simple();
            cli::decode_uid(uid)?;
        }
        Commands::Simulate { orders, seed } => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging);
            cli::simulate(&config, *orders, *seed).await?;
        }
    }

    Ok(())
}
