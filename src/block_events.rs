//! Begin/end-block events that pay accounts outside any transaction, such as
//! Osmosis liquidity rewards and Tendermint liquidity batch settlements.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use bitcoin::hashes::{sha256, Hash};
use diesel::PgConnection;
use tracing::debug;

use crate::coin::Coin;
use crate::db::{self, models::NewTaxableEvent};
use crate::denoms::DenomRegistry;
use crate::error::DecodeError;
use crate::rpc_client::types::{BlockResults, Event};

pub mod liquidity;
pub mod osmosis;

pub const OSMOSIS_CHAIN_ID: &str = "osmosis-1";
pub const COSMOS_HUB_CHAIN_ID: &str = "cosmoshub-4";
pub const DAY_EPOCH: &str = "day";

/// Rows are written in chunks of this size.
const INSERT_BATCH_SIZE: usize = 1000;

/// Where a taxable event came from. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    OsmosisRewardDistribution = 0,
    LiquidityDepositCoinsToPool = 1,
    LiquidityDepositPoolCoinReceived = 2,
    LiquiditySwapCoinSent = 3,
    LiquiditySwapCoinReceived = 4,
    LiquidityWithdrawPoolCoinSent = 5,
    LiquidityWithdrawCoinsReceived = 6,
}

impl EventSource {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use EventSource::*;
        [
            OsmosisRewardDistribution,
            LiquidityDepositCoinsToPool,
            LiquidityDepositPoolCoinReceived,
            LiquiditySwapCoinSent,
            LiquiditySwapCoinReceived,
            LiquidityWithdrawPoolCoinSent,
            LiquidityWithdrawCoinsReceived,
        ]
        .into_iter()
        .find(|s| s.code() == code)
    }

    /// Whether the address gave the coin up rather than received it.
    pub fn is_outflow(self) -> bool {
        matches!(
            self,
            EventSource::LiquidityDepositCoinsToPool
                | EventSource::LiquiditySwapCoinSent
                | EventSource::LiquidityWithdrawPoolCoinSent
        )
    }
}

/// One coin moved to or from one address by a block event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEventRecord {
    pub source: EventSource,
    pub address: String,
    pub coin: Coin,
}

pub trait BlockEventHandler: fmt::Display + Send {
    fn handle_event(&mut self, event: &Event) -> Result<(), DecodeError>;

    fn parse_relevant_data(&self) -> Vec<BlockEventRecord>;
}

pub type EventHandlerFactory = fn() -> Box<dyn BlockEventHandler>;

/// Event type -> handler factories, tried in order.
#[derive(Default)]
pub struct HandlerTable {
    by_type: HashMap<&'static str, Vec<EventHandlerFactory>>,
}

impl HandlerTable {
    pub fn add(&mut self, event_type: &'static str, factory: EventHandlerFactory) {
        self.by_type.entry(event_type).or_default().push(factory);
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Records from every event with a registered type. An event no handler accepts fails the height.
    pub fn process(&self, height: i64, phase: &str, events: &[Event]) -> Result<Vec<BlockEventRecord>, DecodeError> {
        let mut records = Vec::new();
        for event in events {
            let Some(factories) = self.by_type.get(event.kind.as_str()) else {
                continue;
            };

            let mut last_error = None;
            for build in factories {
                let mut handler = build();
                match handler.handle_event(event) {
                    Ok(()) => {
                        debug!("[Block: {}] {} event of known type: {}", height, phase, handler);
                        records.extend(handler.parse_relevant_data());
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        debug!("[Block: {}] {} handler failed for {}: {}", height, phase, event.kind, e);
                        last_error = Some(e);
                    }
                }
            }
            if let Some(e) = last_error {
                return Err(DecodeError::log_format(
                    &event.kind,
                    format!("all {} handlers failed, last error: {}", phase, e),
                ));
            }
        }
        Ok(records)
    }
}

/// Begin- and end-block handler tables for one chain or epoch.
#[derive(Default)]
pub struct ChainEventHandlers {
    pub begin_block: HandlerTable,
    pub end_block: HandlerTable,
}

impl ChainEventHandlers {
    /// Handlers run on every height of `chain_id` inside the block-event window.
    pub fn for_chain(chain_id: &str) -> Self {
        let mut handlers = ChainEventHandlers::default();
        match chain_id {
            OSMOSIS_CHAIN_ID => osmosis::register_begin_block(&mut handlers.begin_block),
            COSMOS_HUB_CHAIN_ID => liquidity::register_end_block(&mut handlers.end_block),
            _ => {}
        }
        handlers
    }

    /// Handlers run at the start height of each epoch of `identifier`.
    pub fn for_epoch(chain_id: &str, identifier: &str) -> Option<Self> {
        match (chain_id, identifier) {
            (OSMOSIS_CHAIN_ID, DAY_EPOCH) => {
                let mut handlers = ChainEventHandlers::default();
                osmosis::register_begin_block(&mut handlers.begin_block);
                Some(handlers)
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin_block.is_empty() && self.end_block.is_empty()
    }

    pub fn process(&self, results: &BlockResults) -> Result<Vec<BlockEventRecord>, DecodeError> {
        let mut records = self
            .begin_block
            .process(results.height, "BeginBlocker", &results.begin_block_events)?;
        records.extend(
            self.end_block
                .process(results.height, "EndBlocker", &results.end_block_events)?,
        );
        Ok(records)
    }
}

/// hex(SHA-256(address || height || amount denom || source)), the dedup key of a taxable event.
pub fn event_hash(record: &BlockEventRecord, height: i64) -> String {
    let preimage = format!(
        "{}{}{}{}{}",
        record.address,
        height,
        record.coin.amount,
        record.coin.denom,
        record.source.code()
    );
    hex::encode(sha256::Hash::hash(preimage.as_bytes()).to_byte_array())
}

/// Insert `records` for the block row `block_id`, sorted by hash and batched.
/// Rows already present (same hash) are left alone. Returns the rows inserted.
pub fn persist_block_events(
    conn: &mut PgConnection,
    denoms: &DenomRegistry,
    block_id: i32,
    height: i64,
    records: &[BlockEventRecord],
) -> Result<usize> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let denom = denoms.ensure_denom(conn, &record.coin.denom)?;
        let address_id = db::get_or_create_address(conn, &record.address.to_lowercase())?;
        rows.push(NewTaxableEvent {
            source: record.source.code(),
            amount: record.coin.amount.clone(),
            denomination_id: denom.id,
            address_id,
            event_hash: event_hash(record, height),
            block_id,
        });
    }
    rows.sort_by(|a, b| a.event_hash.cmp(&b.event_hash));

    let mut inserted = 0;
    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        inserted += db::insert_taxable_events(conn, batch)
            .with_context(|| format!("Failed to store block events for height {}", height))?;
    }
    Ok(inserted)
}
