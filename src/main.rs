use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod address;
mod block_events;
mod coin;
mod config;
mod context;
mod db;
mod decoders;
mod denoms;
mod error;
mod events;
mod export;
mod processor;
mod retry;
mod rpc_client;

use crate::config::IndexerConfig;
use crate::context::CoreContext;
use crate::denoms::DenomRegistry;
use crate::retry::Backoff;

const NODE_CONNECT_MAX_WAIT_SECS: i64 = 300;

#[derive(Parser, Debug)]
#[command(version, about = "Index taxable movements from Cosmos SDK chains")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index blocks, block events or epochs as configured
    Index,
    /// Print an address's taxable history as JSON
    Export {
        #[arg(long)]
        address: String,
        /// Inclusive start, RFC 3339
        #[arg(long)]
        start: DateTime<Utc>,
        /// Exclusive end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn run(cli: Cli) -> Result<()> {
    // Load environment variables
    dotenv().ok();

    let config = IndexerConfig::load(&cli.config, env::vars())?;
    info!(
        "Loaded configuration for {} ({}) from {}",
        config.chain.name,
        config.chain.id,
        cli.config.display()
    );

    // Init DB connection
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool_size = u32::try_from(config.base.rpc_workers + 2).unwrap_or(u32::MAX);
    let db_pool = db::create_connection_pool(&database_url, pool_size)
        .context("Failed to create database connection pool")?;
    info!("Database connection pool created");

    let mut conn = db_pool
        .get()
        .context("Failed to get database connection for migrations")?;
    db::run_migrations(&mut conn).context("Failed to run database migrations")?;
    info!("Migrations completed");

    // Denom registry: asset list first, then the store mirror
    let denoms = Arc::new(DenomRegistry::new());
    match &config.assetlist.location {
        Some(location) => {
            denoms.refresh_catalog(location, &config.assetlist.blacklist)?;
            if config.base.dry {
                denoms.load_store(&mut conn)?;
            } else {
                let written = denoms.sync_store(&mut conn)?;
                info!("Synced {} denominations into the store", written);
            }
        }
        None => {
            warn!("No asset list location configured; using stored denominations only");
            denoms.load_store(&mut conn)?;
        }
    }

    match cli.command {
        Command::Export {
            address,
            start,
            end,
            output,
        } => {
            let rows = export::export(&mut conn, &denoms, &address, start.naive_utc(), end.naive_utc())?;
            info!("Exporting {} rows for {}", rows.len(), address);
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
                ),
                None => Box::new(io::stdout()),
            };
            let mut writer = BufWriter::new(writer);
            serde_json::to_writer_pretty(&mut writer, &rows).context("Failed to write export")?;
            writeln!(writer).context("Failed to write export")?;
            writer.flush().context("Failed to write export")?;
            Ok(())
        }
        Command::Index => {
            drop(conn);
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            rt.block_on(index(config, db_pool, denoms))
        }
    }
}

async fn index(config: IndexerConfig, db_pool: db::DbPool, denoms: Arc<DenomRegistry>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight heights");
            let _ = shutdown_tx.send(true);
        }
    });

    // Keep retrying the node until it answers or the user interrupts
    let connect = Backoff::new(-1, NODE_CONNECT_MAX_WAIT_SECS);
    let client = tokio::select! {
        client = connect.run("Node connection", || {
            rpc_client::RpcClient::connect(&config.node.rpc, &config.node.api, config.request_timeout())
        }) => client.context("Failed to connect to node")?,
        _ = processor::shutdown_requested(shutdown_rx.clone()) => {
            info!("Interrupted before the node became reachable");
            return Ok(());
        }
    };

    let ctx = Arc::new(CoreContext::new(config, client, db_pool, denoms).await?);
    let processor = processor::BlockProcessor::new(ctx);
    processor.run(shutdown_rx).await
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
    info!("Application has finished and is shutting down.");
}
