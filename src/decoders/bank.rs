use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{Coin, JsonCoin};
use crate::error::DecodeError;
use crate::rpc_client::types::LogEntry;

pub const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
pub const MSG_MULTI_SEND: &str = "/cosmos.bank.v1beta1.MsgMultiSend";

pub fn register(registry: &mut MessageRegistry) {
    registry.register_fn(MSG_SEND, MsgSend::default);
    registry.register_fn(MSG_MULTI_SEND, MsgMultiSend::default);
}

fn to_coins(coins: &[JsonCoin]) -> Result<Vec<Coin>, DecodeError> {
    coins.iter().map(Coin::try_from).collect()
}

#[derive(Deserialize)]
struct SendBody {
    from_address: String,
    to_address: String,
    #[serde(default)]
    amount: Vec<JsonCoin>,
}

#[derive(Debug, Default)]
pub struct MsgSend {
    from: String,
    to: String,
    amount: Vec<Coin>,
}

impl MessageDecoder for MsgSend {
    fn handle_msg(&mut self, _: &str, msg: &Value, _: Option<&LogEntry>) -> Result<(), DecodeError> {
        let parsed: SendBody = body(msg)?;
        self.from = parsed.from_address;
        self.to = parsed.to_address;
        self.amount = to_coins(&parsed.amount)?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.amount
            .iter()
            .map(|coin| Movement::transfer(&self.from, &self.to, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_SEND
    }
}

impl fmt::Display for MsgSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MsgSend: {} received {} from {}",
            self.to,
            join_coins(&self.amount),
            self.from
        )
    }
}

#[derive(Deserialize)]
struct MultiSendBody {
    #[serde(default)]
    inputs: Vec<MultiSendEntry>,
    #[serde(default)]
    outputs: Vec<MultiSendEntry>,
}

#[derive(Deserialize)]
struct MultiSendEntry {
    address: String,
    #[serde(default)]
    coins: Vec<JsonCoin>,
}

/// Outputs are attributed to the first input; the bank module only accepts one input.
#[derive(Debug, Default)]
pub struct MsgMultiSend {
    from: String,
    outputs: Vec<(String, Coin)>,
}

impl MessageDecoder for MsgMultiSend {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, _: Option<&LogEntry>) -> Result<(), DecodeError> {
        let parsed: MultiSendBody = body(msg)?;
        self.from = parsed
            .inputs
            .first()
            .map(|i| i.address.clone())
            .ok_or_else(|| DecodeError::log_format(type_url, "multi-send without inputs"))?;
        for output in parsed.outputs {
            for coin in to_coins(&output.coins)? {
                self.outputs.push((output.address.clone(), coin));
            }
        }
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.outputs
            .iter()
            .map(|(to, coin)| Movement::transfer(&self.from, to, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_MULTI_SEND
    }
}

impl fmt::Display for MsgMultiSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgMultiSend: {} sent to {} outputs", self.from, self.outputs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    #[test]
    fn send_emits_one_row_per_coin() {
        let mut decoder = MsgSend::default();
        let msg = json!({
            "from_address": "cosmos1a",
            "to_address": "cosmos1b",
            "amount": [{"denom": "uatom", "amount": "5"}, {"denom": "uosmo", "amount": "7"}]
        });
        decoder.handle_msg(MSG_SEND, &msg, None).unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].amount_sent, Some(BigDecimal::from(7)));
        assert_eq!(rows[1].receiver, "cosmos1b");
        assert_eq!(decoder.to_string(), "MsgSend: cosmos1b received 5uatom, 7uosmo from cosmos1a");
    }

    #[test]
    fn multi_send_fans_out_outputs() {
        let mut decoder = MsgMultiSend::default();
        let msg = json!({
            "inputs": [{"address": "cosmos1a", "coins": [{"denom": "uatom", "amount": "30"}]}],
            "outputs": [
                {"address": "cosmos1b", "coins": [{"denom": "uatom", "amount": "10"}]},
                {"address": "cosmos1c", "coins": [{"denom": "uatom", "amount": "20"}]}
            ]
        });
        decoder.handle_msg(MSG_MULTI_SEND, &msg, None).unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.sender == "cosmos1a"));
        assert_eq!(rows[1].receiver, "cosmos1c");

        let mut empty = MsgMultiSend::default();
        assert!(empty.handle_msg(MSG_MULTI_SEND, &json!({"inputs": [], "outputs": []}), None).is_err());
    }
}
