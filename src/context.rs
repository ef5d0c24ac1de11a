use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::block_events::ChainEventHandlers;
use crate::config::IndexerConfig;
use crate::db::{ChainIdentity, DbPool};
use crate::decoders::wasm::known_handler;
use crate::decoders::{ContractRegistry, MessageRegistry};
use crate::denoms::DenomRegistry;
use crate::retry::Backoff;
use crate::rpc_client::RpcClient;

/// Process-wide state shared by every worker. Built once at startup; only the
/// denom registry changes afterwards, behind its own lock.
pub struct CoreContext {
    pub config: IndexerConfig,
    pub chain: ChainIdentity,
    pub client: RpcClient,
    pub db_pool: DbPool,
    pub denoms: Arc<DenomRegistry>,
    pub messages: Arc<MessageRegistry>,
    pub block_handlers: ChainEventHandlers,
    pub backoff: Backoff,
}

impl CoreContext {
    pub async fn new(
        config: IndexerConfig,
        client: RpcClient,
        db_pool: DbPool,
        denoms: Arc<DenomRegistry>,
    ) -> Result<Self> {
        let backoff = Backoff::new(config.base.rpc_retry_attempts, config.base.rpc_retry_max_wait);
        let contracts = build_contract_registry(&config, &client, backoff).await?;
        let messages = Arc::new(MessageRegistry::with_defaults(Arc::new(contracts)));
        let block_handlers = ChainEventHandlers::for_chain(&config.chain.id);
        if config.base.index_block_events && block_handlers.is_empty() {
            warn!(
                "Block event indexing is enabled but chain {} has no block event handlers",
                config.chain.id
            );
        }

        Ok(CoreContext {
            chain: ChainIdentity {
                chain_id: config.chain.id.clone(),
                name: config.chain.name.clone(),
            },
            config,
            client,
            db_pool,
            denoms,
            messages,
            block_handlers,
            backoff,
        })
    }

    pub fn account_prefix(&self) -> &str {
        &self.config.chain.account_prefix
    }
}

/// Bind configured code ids to their handlers and expand every code id into the
/// contract addresses instantiated from it.
async fn build_contract_registry(
    config: &IndexerConfig,
    client: &RpcClient,
    backoff: Backoff,
) -> Result<ContractRegistry> {
    let mut registry = ContractRegistry::with_builtin();
    for (code_id, handler_name) in config.contract_code_ids() {
        let handler = known_handler(&handler_name)
            .with_context(|| format!("Unknown contract handler {}", handler_name))?;
        registry.register_code_id(code_id, handler);
    }

    if !config.base.index_chain {
        return Ok(registry);
    }

    for code_id in registry.code_ids() {
        let label = format!("Contracts for code id {}", code_id);
        let contracts = backoff
            .run(&label, || client.contracts_by_code_id(code_id))
            .await;
        match contracts {
            Ok(contracts) => {
                let bound = registry.bind_contracts(code_id, &contracts);
                info!("Bound {} contracts instantiated from code id {}", bound, code_id);
            }
            // Chains without CosmWasm answer 404 or 501 here.
            Err(e) if !e.is_transient() => {
                warn!("Could not list contracts for code id {}: {}", code_id, e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list contracts for code id {}", code_id));
            }
        }
    }
    info!("Contract registry ready with {} addresses", registry.address_count());
    Ok(registry)
}
