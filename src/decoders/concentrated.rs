use std::fmt;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, require_action, require_log, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{parse_coins, Coin};
use crate::error::DecodeError;
use crate::events::{attr_all, coins_received, coins_spent, events_of_type};
use crate::rpc_client::types::LogEntry;

pub const MSG_CREATE_POSITION: &str = "/osmosis.concentratedliquidity.v1beta1.MsgCreatePosition";
pub const MSG_ADD_TO_POSITION: &str = "/osmosis.concentratedliquidity.v1beta1.MsgAddToPosition";
pub const MSG_WITHDRAW_POSITION: &str = "/osmosis.concentratedliquidity.v1beta1.MsgWithdrawPosition";
pub const MSG_TRANSFER_POSITIONS: &str = "/osmosis.concentratedliquidity.v1beta1.MsgTransferPositions";
pub const MSG_COLLECT_SPREAD_REWARDS: &str =
    "/osmosis.concentratedliquidity.v1beta1.MsgCollectSpreadRewards";
pub const MSG_COLLECT_INCENTIVES: &str = "/osmosis.concentratedliquidity.v1beta1.MsgCollectIncentives";
pub const MSG_CREATE_CONCENTRATED_POOL: &str =
    "/osmosis.concentratedliquidity.poolmodel.concentrated.v1beta1.MsgCreateConcentratedPool";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Spent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// `coin_spent` / `coin_received` events for the sender.
    CoinEvents { check_action: bool },
    /// Every `tokens_out` of the `total_collect_incentives` events.
    IncentiveTotals,
}

pub fn register(registry: &mut MessageRegistry) {
    let variants = [
        (MSG_CREATE_POSITION, Leg::Spent, Source::CoinEvents { check_action: true }),
        (MSG_ADD_TO_POSITION, Leg::Spent, Source::CoinEvents { check_action: true }),
        (MSG_WITHDRAW_POSITION, Leg::Received, Source::CoinEvents { check_action: true }),
        (MSG_TRANSFER_POSITIONS, Leg::Received, Source::CoinEvents { check_action: true }),
        (MSG_COLLECT_SPREAD_REWARDS, Leg::Received, Source::CoinEvents { check_action: false }),
        (MSG_CREATE_CONCENTRATED_POOL, Leg::Spent, Source::CoinEvents { check_action: false }),
        (MSG_COLLECT_INCENTIVES, Leg::Received, Source::IncentiveTotals),
    ];
    for (type_url, leg, source) in variants {
        registry.register_fn(type_url, move || PositionChange::new(type_url, leg, source));
    }
}

#[derive(Deserialize)]
struct SenderBody {
    sender: String,
}

/// A concentrated-liquidity message: coins the sender put into or took out of a position.
#[derive(Debug)]
pub struct PositionChange {
    type_url: &'static str,
    leg: Leg,
    source: Source,
    sender: String,
    coins: Vec<Coin>,
}

impl PositionChange {
    fn new(type_url: &'static str, leg: Leg, source: Source) -> Self {
        PositionChange {
            type_url,
            leg,
            source,
            sender: String::new(),
            coins: Vec::new(),
        }
    }

    fn collect(&self, type_url: &str, entry: &LogEntry) -> Result<Vec<Coin>, DecodeError> {
        match self.source {
            Source::IncentiveTotals => {
                let mut coins = Vec::new();
                for event in events_of_type(entry, "total_collect_incentives") {
                    for tokens in attr_all(event, "tokens_out") {
                        coins.extend(parse_coins(tokens)?);
                    }
                }
                Ok(coins)
            }
            Source::CoinEvents { .. } => {
                let kind = match self.leg {
                    Leg::Spent => "coin_spent",
                    Leg::Received => "coin_received",
                };
                let events = events_of_type(entry, kind);
                if events.is_empty() {
                    return Err(DecodeError::log_format(type_url, format!("no {} events", kind)));
                }
                match self.leg {
                    Leg::Spent => coins_spent(&self.sender, &events),
                    Leg::Received => coins_received(&self.sender, &events),
                }
            }
        }
    }
}

impl MessageDecoder for PositionChange {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = match self.source {
            Source::CoinEvents { check_action: true } => require_action(type_url, log)?,
            _ => require_log(type_url, log)?,
        };
        let parsed: SenderBody = body(msg)?;
        self.sender = parsed.sender;
        let zero = BigDecimal::from(0);
        self.coins = self
            .collect(type_url, entry)?
            .into_iter()
            .filter(|c| c.amount > zero)
            .collect();
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.coins
            .iter()
            .map(|coin| match self.leg {
                Leg::Spent => Movement::sent(&self.sender, coin),
                Leg::Received => Movement::received(&self.sender, coin),
            })
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for PositionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.leg {
            Leg::Spent => "sent",
            Leg::Received => "received",
        };
        write!(
            f,
            "{}: {} {} {}",
            super::short_name(self.type_url),
            self.sender,
            verb,
            join_coins(&self.coins)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;

    fn decode(type_url: &'static str, leg: Leg, source: Source, log: &LogEntry) -> Result<Vec<Movement>, DecodeError> {
        let mut decoder = PositionChange::new(type_url, leg, source);
        decoder.handle_msg(type_url, &json!({"sender": "osmo1s", "pool_id": "1"}), Some(log))?;
        Ok(decoder.parse_relevant_data())
    }

    #[test]
    fn create_position_skips_zero_legs() {
        let log = log_with_action(
            "create_position",
            vec![event(
                "coin_spent",
                &[("spender", "osmo1s"), ("amount", "0uatom,25uosmo"), ("spender", "osmo1x"), ("amount", "3uosmo")],
            )],
        );
        let rows = decode(MSG_CREATE_POSITION, Leg::Spent, Source::CoinEvents { check_action: true }, &log).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(25)));
        assert_eq!(rows[0].sender, "osmo1s");
    }

    #[test]
    fn withdraw_position_needs_coin_received() {
        let log = log_with_action("withdraw_position", vec![]);
        assert!(decode(MSG_WITHDRAW_POSITION, Leg::Received, Source::CoinEvents { check_action: true }, &log).is_err());
    }

    #[test]
    fn transfer_positions_records_claimed_coins() {
        let registry = MessageRegistry::with_defaults(std::sync::Arc::new(crate::decoders::ContractRegistry::with_builtin()));
        let log = log_with_action(
            "transfer_positions",
            vec![event("coin_received", &[("receiver", "osmo1s"), ("amount", "7uosmo,0uion")])],
        );
        let msg = json!({
            "@type": MSG_TRANSFER_POSITIONS,
            "sender": "osmo1s",
            "position_ids": ["12"],
            "new_owner": "osmo1n"
        });
        let decoded = registry.decode(MSG_TRANSFER_POSITIONS, &msg, Some(&log)).unwrap();
        assert_eq!(decoded.movements.len(), 1);
        assert_eq!(decoded.movements[0].receiver, "osmo1s");
        assert_eq!(decoded.movements[0].amount_received, Some(BigDecimal::from(7)));
        assert_eq!(decoded.movements[0].denom_received.as_deref(), Some("uosmo"));
    }

    #[test]
    fn collect_incentives_reads_every_total() {
        let log = log_with_action(
            "collect_incentives",
            vec![
                event("total_collect_incentives", &[("tokens_out", "1uosmo,2uion")]),
                event("total_collect_incentives", &[("tokens_out", "3uatom")]),
            ],
        );
        let rows = decode(MSG_COLLECT_INCENTIVES, Leg::Received, Source::IncentiveTotals, &log).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.receiver == "osmo1s" && r.amount_sent.is_none()));
    }
}
