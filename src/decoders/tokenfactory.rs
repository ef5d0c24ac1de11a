use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, require_action, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{Coin, JsonCoin};
use crate::error::DecodeError;
use crate::rpc_client::types::LogEntry;

pub const MSG_MINT: &str = "/osmosis.tokenfactory.v1beta1.MsgMint";
pub const MSG_BURN: &str = "/osmosis.tokenfactory.v1beta1.MsgBurn";

pub fn register(registry: &mut MessageRegistry) {
    registry.register_fn(MSG_MINT, || Supply::new(MSG_MINT));
    registry.register_fn(MSG_BURN, || Supply::new(MSG_BURN));
}

#[derive(Deserialize)]
struct SupplyBody {
    sender: String,
    amount: JsonCoin,
    #[serde(default)]
    mint_to_address: String,
    #[serde(default)]
    burn_from_address: String,
}

/// Token-factory mint or burn. The explicit mint-to / burn-from address
/// overrides the sender when present.
#[derive(Debug)]
pub struct Supply {
    type_url: &'static str,
    address: String,
    coin: Option<Coin>,
}

impl Supply {
    pub fn new(type_url: &'static str) -> Self {
        Supply {
            type_url,
            address: String::new(),
            coin: None,
        }
    }

    fn is_mint(&self) -> bool {
        self.type_url == MSG_MINT
    }
}

impl MessageDecoder for Supply {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        require_action(type_url, log)?;
        let parsed: SupplyBody = body(msg)?;
        let target = if self.is_mint() {
            parsed.mint_to_address
        } else {
            parsed.burn_from_address
        };
        self.address = if target.is_empty() { parsed.sender } else { target };
        self.coin = Some(Coin::try_from(&parsed.amount)?);
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.coin
            .iter()
            .map(|coin| {
                if self.is_mint() {
                    Movement::received(&self.address, coin)
                } else {
                    Movement::sent(&self.address, coin)
                }
            })
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for Supply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coin = self.coin.as_ref().map(ToString::to_string).unwrap_or_default();
        if self.is_mint() {
            write!(f, "MsgMint: {} received {}", self.address, coin)
        } else {
            write!(f, "MsgBurn: {} sent {}", self.address, coin)
        }
    }
}
