mod cli;
mod commands;
mod config;
mod storage;

use std::path::Path;

use clap::Parser;
use color_eyre::Result;
use hostkeys_core::store::SecretStore;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, SnapshotCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config, cli.config.as_deref())?,
        Command::Health => run_health_check(&config).await?,
        Command::Marker { target } => {
            let sentinel = storage::sentinel_from_config(&config)?;
            println!("{}", commands::marker(&sentinel, &target).await?);
        }
        Command::Read { target, reveal } => {
            let repo = storage::repository_from_config(&config)?;
            let cipher = storage::cipher_from_config(&config);
            let out = commands::read(&repo, cipher.as_ref(), &target, reveal, &cancel).await?;
            print!("{out}");
        }
        Command::Write {
            target,
            keys,
            system_keys,
            master,
        } => {
            let repo = storage::repository_from_config(&config)?;
            let cipher = storage::cipher_from_config(&config);
            let updates = commands::KeyUpdates {
                master,
                keys,
                system_keys,
            };
            let count = commands::write(&repo, cipher.as_ref(), &target, updates, &cancel).await?;
            println!("Wrote {count} keys");
        }
        Command::Purge { live } => {
            let repo = storage::repository_from_config(&config)?;
            println!("{}", commands::purge(&repo, &live, &cancel).await?);
        }
        Command::Snapshot(SnapshotCommand::Write { target }) => {
            let repo = storage::repository_from_config(&config)?;
            let id = commands::snapshot_write(&repo, &target, &cancel).await?;
            println!("Snapshot {id}");
        }
        Command::Snapshot(SnapshotCommand::List { target }) => {
            let repo = storage::repository_from_config(&config)?;
            let ids = commands::snapshot_list(&repo, &target, &cancel).await?;
            if ids.is_empty() {
                println!("No snapshots yet.");
            }
            for id in ids {
                println!("{id}");
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Token cancelled on the first Ctrl-C; in-flight repository calls return promptly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn print_version() {
    println!("hostkeys {}", env!("CARGO_PKG_VERSION"));
}

async fn run_health_check(config: &config::Config) -> Result<()> {
    let repo = storage::repository_from_config(config)?;
    let sentinel = storage::sentinel_from_config(config)?;
    commands::health(repo.store().as_ref(), &sentinel, &config.layout).await?;
    println!("Store ({}): ok", repo.store().name());
    println!("Sentinel: ok");
    Ok(())
}

fn init_config(config: &config::Config, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let path = config::write_default_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
