//! End-block settlement of Tendermint liquidity module batches on the Cosmos Hub.
//! The batch messages only record what the user offered; these events say what
//! actually changed hands.

use std::fmt;

use super::{BlockEventHandler, BlockEventRecord, EventSource, HandlerTable};
use crate::coin::{parse_amount, parse_coins, Coin};
use crate::decoders::join_coins;
use crate::error::DecodeError;
use crate::events::attr_first;
use crate::rpc_client::types::Event;

pub const DEPOSIT_TO_POOL: &str = "deposit_to_pool";
pub const SWAP_TRANSACTED: &str = "swap_transacted";
pub const WITHDRAW_FROM_POOL: &str = "withdraw_from_pool";

const SUCCESS: &str = "success";

pub fn register_end_block(table: &mut HandlerTable) {
    table.add(DEPOSIT_TO_POOL, deposit);
    table.add(SWAP_TRANSACTED, swap);
    table.add(WITHDRAW_FROM_POOL, withdraw);
}

fn deposit() -> Box<dyn BlockEventHandler> {
    Box::new(BatchSettlement::new(DEPOSIT_TO_POOL))
}

fn swap() -> Box<dyn BlockEventHandler> {
    Box::new(BatchSettlement::new(SWAP_TRANSACTED))
}

fn withdraw() -> Box<dyn BlockEventHandler> {
    Box::new(BatchSettlement::new(WITHDRAW_FROM_POOL))
}

fn required<'a>(event: &'a Event, key: &str) -> Result<&'a str, DecodeError> {
    match attr_first(event, key) {
        "" => Err(DecodeError::log_format(&event.kind, format!("missing attribute {}", key))),
        value => Ok(value),
    }
}

fn coin_from_parts(event: &Event, amount_key: &str, denom_key: &str) -> Result<Coin, DecodeError> {
    Ok(Coin::new(
        parse_amount(required(event, amount_key)?)?,
        required(event, denom_key)?,
    ))
}

/// One settled deposit, swap or withdrawal. Failed batch entries settle nothing.
#[derive(Debug)]
pub struct BatchSettlement {
    kind: &'static str,
    address: String,
    status: String,
    paid: Vec<Coin>,
    received: Vec<Coin>,
}

impl BatchSettlement {
    pub fn new(kind: &'static str) -> Self {
        BatchSettlement {
            kind,
            address: String::new(),
            status: String::new(),
            paid: Vec::new(),
            received: Vec::new(),
        }
    }

    fn sources(&self) -> (EventSource, EventSource) {
        match self.kind {
            DEPOSIT_TO_POOL => (
                EventSource::LiquidityDepositCoinsToPool,
                EventSource::LiquidityDepositPoolCoinReceived,
            ),
            SWAP_TRANSACTED => (
                EventSource::LiquiditySwapCoinSent,
                EventSource::LiquiditySwapCoinReceived,
            ),
            _ => (
                EventSource::LiquidityWithdrawPoolCoinSent,
                EventSource::LiquidityWithdrawCoinsReceived,
            ),
        }
    }
}

impl BlockEventHandler for BatchSettlement {
    fn handle_event(&mut self, event: &Event) -> Result<(), DecodeError> {
        let (address_key, paid, received) = match self.kind {
            DEPOSIT_TO_POOL => (
                "depositor",
                parse_coins(required(event, "accepted_coins")?)?,
                vec![coin_from_parts(event, "pool_coin_amount", "pool_coin_denom")?],
            ),
            SWAP_TRANSACTED => (
                "swap_requester",
                vec![coin_from_parts(event, "exchanged_offer_coin_amount", "offer_coin_denom")?],
                vec![coin_from_parts(event, "exchanged_demand_coin_amount", "demand_coin_denom")?],
            ),
            WITHDRAW_FROM_POOL => (
                "withdrawer",
                vec![coin_from_parts(event, "pool_coin_amount", "pool_coin_denom")?],
                parse_coins(required(event, "withdraw_coins")?)?,
            ),
            other => return Err(DecodeError::UnknownMessageType(other.to_string())),
        };

        self.address = required(event, address_key)?.to_string();
        self.status = attr_first(event, "success").to_string();
        self.paid = paid;
        self.received = received;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<BlockEventRecord> {
        if self.status != SUCCESS {
            return Vec::new();
        }
        let (paid_source, received_source) = self.sources();
        let record = |source, coin: &Coin| BlockEventRecord {
            source,
            address: self.address.clone(),
            coin: coin.clone(),
        };
        self.paid
            .iter()
            .map(|c| record(paid_source, c))
            .chain(self.received.iter().map(|c| record(received_source, c)))
            .collect()
    }
}

impl fmt::Display for BatchSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tendermint liquidity {}: {} paid {} and received {} with status {}",
            self.kind,
            self.address,
            join_coins(&self.paid),
            join_coins(&self.received),
            self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_events::{ChainEventHandlers, COSMOS_HUB_CHAIN_ID};
    use crate::rpc_client::types::{Attribute, BlockResults};
    use bigdecimal::BigDecimal;

    fn event(kind: &str, attrs: &[(&str, &str)]) -> Event {
        Event::new(kind, attrs.iter().map(|(k, v)| Attribute::new(*k, *v)).collect())
    }

    fn process(events: Vec<Event>) -> Vec<BlockEventRecord> {
        ChainEventHandlers::for_chain(COSMOS_HUB_CHAIN_ID)
            .process(&BlockResults {
                height: 5_000_000,
                begin_block_events: vec![],
                end_block_events: events,
            })
            .unwrap()
    }

    #[test]
    fn deposit_records_coins_in_and_pool_coin_out() {
        let records = process(vec![event(
            DEPOSIT_TO_POOL,
            &[
                ("pool_id", "1"),
                ("depositor", "cosmos1d"),
                ("accepted_coins", "10uatom,20uosmo"),
                ("pool_coin_denom", "pool1ABC"),
                ("pool_coin_amount", "7"),
                ("success", "success"),
            ],
        )]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].source, EventSource::LiquidityDepositCoinsToPool);
        assert_eq!(records[2].source, EventSource::LiquidityDepositPoolCoinReceived);
        assert_eq!(records[2].coin, Coin::new(BigDecimal::from(7), "pool1ABC"));
        assert!(records.iter().all(|r| r.address == "cosmos1d"));
    }

    #[test]
    fn swap_uses_exchanged_amounts() {
        let records = process(vec![event(
            SWAP_TRANSACTED,
            &[
                ("swap_requester", "cosmos1s"),
                ("offer_coin_denom", "uatom"),
                ("offer_coin_amount", "100"),
                ("exchanged_offer_coin_amount", "90"),
                ("demand_coin_denom", "uosmo"),
                ("exchanged_demand_coin_amount", "300"),
                ("success", "success"),
            ],
        )]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].coin, Coin::new(BigDecimal::from(90), "uatom"));
        assert_eq!(records[1].source, EventSource::LiquiditySwapCoinReceived);
        assert_eq!(records[1].coin.amount, BigDecimal::from(300));
    }

    #[test]
    fn failed_withdraw_settles_nothing() {
        let records = process(vec![event(
            WITHDRAW_FROM_POOL,
            &[
                ("withdrawer", "cosmos1w"),
                ("pool_coin_denom", "pool1ABC"),
                ("pool_coin_amount", "5"),
                ("withdraw_coins", "1uatom,2uosmo"),
                ("success", "failure"),
            ],
        )]);
        assert!(records.is_empty());
    }

    #[test]
    fn missing_depositor_fails_the_height() {
        let results = BlockResults {
            height: 1,
            begin_block_events: vec![],
            end_block_events: vec![event(DEPOSIT_TO_POOL, &[("accepted_coins", "1uatom")])],
        };
        assert!(ChainEventHandlers::for_chain(COSMOS_HUB_CHAIN_ID).process(&results).is_err());
    }
}
