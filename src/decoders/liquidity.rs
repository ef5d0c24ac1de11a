//! Tendermint liquidity module batch messages (Cosmos Hub). The payouts
//! happen at end-block and are picked up by the block-event indexer; the
//! messages themselves only record what the user handed over.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{Coin, JsonCoin};
use crate::error::DecodeError;
use crate::rpc_client::types::LogEntry;

pub const MSG_DEPOSIT_WITHIN_BATCH: &str = "/tendermint.liquidity.v1beta1.MsgDepositWithinBatch";
pub const MSG_WITHDRAW_WITHIN_BATCH: &str = "/tendermint.liquidity.v1beta1.MsgWithdrawWithinBatch";
pub const MSG_SWAP_WITHIN_BATCH: &str = "/tendermint.liquidity.v1beta1.MsgSwapWithinBatch";

pub fn register(registry: &mut MessageRegistry) {
    registry.register_fn(MSG_DEPOSIT_WITHIN_BATCH, || BatchRequest::new(MSG_DEPOSIT_WITHIN_BATCH));
    registry.register_fn(MSG_WITHDRAW_WITHIN_BATCH, || BatchRequest::new(MSG_WITHDRAW_WITHIN_BATCH));
    registry.register_fn(MSG_SWAP_WITHIN_BATCH, || BatchRequest::new(MSG_SWAP_WITHIN_BATCH));
}

#[derive(Deserialize)]
struct DepositBody {
    depositor_address: String,
    #[serde(default)]
    deposit_coins: Vec<JsonCoin>,
}

#[derive(Deserialize)]
struct WithdrawBody {
    withdrawer_address: String,
    pool_coin: JsonCoin,
}

#[derive(Deserialize)]
struct SwapBody {
    swap_requester_address: String,
    offer_coin: JsonCoin,
}

#[derive(Debug)]
pub struct BatchRequest {
    type_url: &'static str,
    address: String,
    coins: Vec<Coin>,
}

impl BatchRequest {
    pub fn new(type_url: &'static str) -> Self {
        BatchRequest {
            type_url,
            address: String::new(),
            coins: Vec::new(),
        }
    }
}

impl MessageDecoder for BatchRequest {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, _log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let (address, coins) = match type_url {
            MSG_DEPOSIT_WITHIN_BATCH => {
                let parsed: DepositBody = body(msg)?;
                let coins = parsed
                    .deposit_coins
                    .iter()
                    .map(Coin::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                (parsed.depositor_address, coins)
            }
            MSG_WITHDRAW_WITHIN_BATCH => {
                let parsed: WithdrawBody = body(msg)?;
                (parsed.withdrawer_address, vec![Coin::try_from(&parsed.pool_coin)?])
            }
            MSG_SWAP_WITHIN_BATCH => {
                let parsed: SwapBody = body(msg)?;
                (parsed.swap_requester_address, vec![Coin::try_from(&parsed.offer_coin)?])
            }
            other => return Err(DecodeError::UnknownMessageType(other.to_string())),
        };
        self.address = address;
        self.coins = coins;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.coins
            .iter()
            .map(|coin| Movement::sent(&self.address, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} sent {}",
            super::short_name(self.type_url),
            self.address,
            join_coins(&self.coins)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    #[test]
    fn deposit_sends_each_coin() {
        let mut decoder = BatchRequest::new(MSG_DEPOSIT_WITHIN_BATCH);
        decoder
            .handle_msg(
                MSG_DEPOSIT_WITHIN_BATCH,
                &json!({
                    "depositor_address": "cosmos1d",
                    "pool_id": "1",
                    "deposit_coins": [{"denom": "uatom", "amount": "10"}, {"denom": "ibc/ABC", "amount": "20"}]
                }),
                None,
            )
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].amount_sent, Some(BigDecimal::from(20)));
        assert!(rows[1].receiver.is_empty());
    }

    #[test]
    fn withdraw_sends_pool_coin() {
        let mut decoder = BatchRequest::new(MSG_WITHDRAW_WITHIN_BATCH);
        decoder
            .handle_msg(
                MSG_WITHDRAW_WITHIN_BATCH,
                &json!({"withdrawer_address": "cosmos1w", "pool_id": "1", "pool_coin": {"denom": "pool1ABC", "amount": "5"}}),
                None,
            )
            .unwrap();
        assert_eq!(decoder.to_string(), "MsgWithdrawWithinBatch: cosmos1w sent 5pool1ABC");
    }
}
