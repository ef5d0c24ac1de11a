//! Indexer configuration: a TOML file, overridden by `INDEXER_<SECTION>__<KEY>`
//! environment variables (`INDEXER_BASE__START_BLOCK=100` sets `base.start-block`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "INDEXER_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerConfig {
    pub chain: ChainConfig,
    pub node: NodeConfig,
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub assetlist: AssetListConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub id: String,
    pub name: String,
    pub account_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    pub rpc: String,
    pub api: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BaseConfig {
    /// First height to index; -1 resumes after the highest indexed height.
    pub start_block: i64,
    /// Last height to index; -1 follows the chain.
    pub end_block: i64,
    pub rpc_workers: usize,
    pub queue_size: usize,
    pub rpc_retry_attempts: i64,
    pub rpc_retry_max_wait: i64,
    pub wait_for_chain: bool,
    pub wait_for_chain_delay: u64,
    pub exit_when_caught_up: bool,
    pub index_chain: bool,
    pub index_block_events: bool,
    pub index_epoch_events: bool,
    pub block_events_start_block: i64,
    pub block_events_end_block: i64,
    pub epoch_indexing_identifier: String,
    pub epoch_events_start_epoch: i64,
    pub epoch_events_end_epoch: i64,
    pub dry: bool,
    pub reindex: bool,
    pub prevent_reattempts: bool,
    pub block_input_file: Option<PathBuf>,
    /// Seconds between dispatched heights.
    pub throttling: f64,
    /// Log elapsed time every this many committed heights; 0 disables.
    pub block_timer: u64,
    pub shutdown_grace: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            start_block: -1,
            end_block: -1,
            rpc_workers: 1,
            queue_size: 100,
            rpc_retry_attempts: 0,
            rpc_retry_max_wait: 30,
            wait_for_chain: false,
            wait_for_chain_delay: 10,
            exit_when_caught_up: true,
            index_chain: true,
            index_block_events: false,
            index_epoch_events: false,
            block_events_start_block: 0,
            block_events_end_block: -1,
            epoch_indexing_identifier: String::new(),
            epoch_events_start_epoch: 0,
            epoch_events_end_epoch: -1,
            dry: false,
            reindex: false,
            prevent_reattempts: false,
            block_input_file: None,
            throttling: 0.0,
            block_timer: 10_000,
            shutdown_grace: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AssetListConfig {
    /// Root of a chain-registry checkout. Empty skips the catalog.
    pub location: Option<PathBuf>,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContractsConfig {
    /// Extra code id -> handler name bindings, on top of the built-in ones.
    pub code_ids: BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    30
}

impl IndexerConfig {
    /// Read `path` and apply environment overrides from `env`.
    pub fn load<I>(path: &Path, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut builder = Config::builder().add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(true),
        );
        for (key, value) in env_overrides(env) {
            builder = builder
                .set_override(key.as_str(), value)
                .with_context(|| format!("Invalid override for {}", key))?;
        }

        let config: IndexerConfig = builder
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the indexer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.base;
        if self.chain.id.is_empty() {
            return Err(ConfigError("chain.id must be set".to_string()));
        }
        if self.chain.account_prefix.is_empty() {
            return Err(ConfigError("chain.account-prefix must be set".to_string()));
        }
        if self.node.rpc.is_empty() || self.node.api.is_empty() {
            return Err(ConfigError("node.rpc and node.api must be set".to_string()));
        }
        if base.rpc_workers == 0 {
            return Err(ConfigError("base.rpc-workers must be at least 1".to_string()));
        }
        if base.queue_size == 0 {
            return Err(ConfigError("base.queue-size must be at least 1".to_string()));
        }
        if base.end_block >= 0 && base.start_block > base.end_block {
            return Err(ConfigError(format!(
                "base.start-block {} is after base.end-block {}",
                base.start_block, base.end_block
            )));
        }
        if !base.index_chain && !base.index_block_events && !base.index_epoch_events {
            return Err(ConfigError(
                "nothing to index: enable base.index-chain, base.index-block-events or base.index-epoch-events"
                    .to_string(),
            ));
        }
        if base.index_epoch_events {
            if base.epoch_indexing_identifier.is_empty() {
                return Err(ConfigError(
                    "base.epoch-indexing-identifier is required for epoch indexing".to_string(),
                ));
            }
            if base.index_chain || base.index_block_events {
                return Err(ConfigError(
                    "epoch indexing runs on its own; disable base.index-chain and base.index-block-events".to_string(),
                ));
            }
        }
        if base.throttling < 0.0 || !base.throttling.is_finite() {
            return Err(ConfigError("base.throttling must be a non-negative number".to_string()));
        }
        for (code_id, handler) in &self.contracts.code_ids {
            if code_id.parse::<u64>().is_err() {
                return Err(ConfigError(format!("contracts.code-ids key {} is not a code id", code_id)));
            }
            if crate::decoders::wasm::known_handler(handler).is_none() {
                return Err(ConfigError(format!("unknown contract handler {} for code id {}", handler, code_id)));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.node.timeout)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_secs_f64(self.base.throttling)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.base.shutdown_grace)
    }

    /// Configured code id bindings, parsed.
    pub fn contract_code_ids(&self) -> Vec<(u64, String)> {
        self.contracts
            .code_ids
            .iter()
            .filter_map(|(id, handler)| id.parse().ok().map(|id| (id, handler.clone())))
            .collect()
    }
}

/// `INDEXER_BASE__START_BLOCK` -> `base.start-block`. Other variables are ignored.
pub fn env_overrides<I>(env: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut overrides: Vec<(String, String)> = env
        .into_iter()
        .filter_map(|(name, value)| {
            let key = name.strip_prefix(ENV_PREFIX)?;
            if !key.contains(ENV_SEPARATOR) {
                return None;
            }
            let key = key
                .split(ENV_SEPARATOR)
                .map(|part| part.to_lowercase().replace('_', "-"))
                .collect::<Vec<_>>()
                .join(".");
            Some((key, value))
        })
        .collect();
    overrides.sort();
    overrides
}
