//! Osmosis incentive distributions, emitted in the begin-block of each `day` epoch.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{BlockEventHandler, BlockEventRecord, EventSource, HandlerTable};
use crate::coin::{parse_coins, Coin};
use crate::decoders::join_coins;
use crate::error::DecodeError;
use crate::rpc_client::types::Event;

pub const DISTRIBUTION_EVENT: &str = "distribution";

pub fn register_begin_block(table: &mut HandlerTable) {
    table.add(DISTRIBUTION_EVENT, plain_distribution);
    table.add(DISTRIBUTION_EVENT, encoded_distribution);
}

fn plain_distribution() -> Box<dyn BlockEventHandler> {
    Box::new(RewardDistribution::new(false))
}

fn encoded_distribution() -> Box<dyn BlockEventHandler> {
    Box::new(RewardDistribution::new(true))
}

/// `receiver` got `amount` in rewards. Older nodes base64-encode attribute keys and values.
#[derive(Debug)]
pub struct RewardDistribution {
    base64_attributes: bool,
    receiver: String,
    rewards: Vec<Coin>,
}

impl RewardDistribution {
    pub fn new(base64_attributes: bool) -> Self {
        RewardDistribution {
            base64_attributes,
            receiver: String::new(),
            rewards: Vec::new(),
        }
    }

    fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        if !self.base64_attributes {
            return Ok(raw.to_string());
        }
        let bytes = STANDARD.decode(raw.as_bytes())?;
        String::from_utf8(bytes)
            .map_err(|e| DecodeError::log_format(DISTRIBUTION_EVENT, format!("attribute is not UTF-8: {}", e)))
    }
}

impl BlockEventHandler for RewardDistribution {
    fn handle_event(&mut self, event: &Event) -> Result<(), DecodeError> {
        let mut receiver = String::new();
        let mut amount = String::new();
        for attribute in &event.attributes {
            match self.decode(&attribute.key)?.as_str() {
                "receiver" => receiver = self.decode(&attribute.value)?,
                "amount" => amount = self.decode(&attribute.value)?,
                _ => {}
            }
        }

        if receiver.is_empty() || amount.is_empty() {
            return Err(DecodeError::log_format(
                DISTRIBUTION_EVENT,
                "rewards received or address were not present",
            ));
        }
        self.rewards = parse_coins(&amount)?;
        self.receiver = receiver;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<BlockEventRecord> {
        self.rewards
            .iter()
            .map(|coin| BlockEventRecord {
                source: EventSource::OsmosisRewardDistribution,
                address: self.receiver.clone(),
                coin: coin.clone(),
            })
            .collect()
    }
}

impl fmt::Display for RewardDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Osmosis incentives {}: {} received {} in rewards",
            DISTRIBUTION_EVENT,
            self.receiver,
            join_coins(&self.rewards)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_events::{ChainEventHandlers, OSMOSIS_CHAIN_ID};
    use crate::rpc_client::types::{Attribute, BlockResults};
    use bigdecimal::BigDecimal;

    fn results(events: Vec<Event>) -> BlockResults {
        BlockResults {
            height: 100,
            begin_block_events: events,
            end_block_events: vec![],
        }
    }

    #[test]
    fn plain_attributes() {
        let event = Event::new(
            DISTRIBUTION_EVENT,
            vec![
                Attribute::new("receiver", "osmo1r"),
                Attribute::new("amount", "10uosmo,3ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"),
            ],
        );
        let records = ChainEventHandlers::for_chain(OSMOSIS_CHAIN_ID)
            .process(&results(vec![event]))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, "osmo1r");
        assert_eq!(records[0].coin, Coin::new(BigDecimal::from(10), "uosmo"));
        assert!(records[1].coin.denom.starts_with("ibc/"));
    }

    #[test]
    fn base64_attributes_fall_through() {
        let event = Event::new(
            DISTRIBUTION_EVENT,
            vec![
                Attribute::new(STANDARD.encode("receiver"), STANDARD.encode("osmo1r")),
                Attribute::new(STANDARD.encode("amount"), STANDARD.encode("7uosmo")),
            ],
        );
        let records = ChainEventHandlers::for_chain(OSMOSIS_CHAIN_ID)
            .process(&results(vec![event]))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "osmo1r");
        assert_eq!(records[0].coin.amount, BigDecimal::from(7));
    }

    #[test]
    fn missing_receiver_is_rejected() {
        let mut handler = RewardDistribution::new(false);
        let event = Event::new(DISTRIBUTION_EVENT, vec![Attribute::new("amount", "1uosmo")]);
        assert!(handler.handle_event(&event).is_err());
    }
}
