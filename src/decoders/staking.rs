use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, require_action, MessageDecoder, MessageRegistry, Movement};
use crate::coin::Coin;
use crate::error::DecodeError;
use crate::events::{coins_received, events_of_type};
use crate::rpc_client::types::LogEntry;

pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";

pub fn register(registry: &mut MessageRegistry) {
    for type_url in [MSG_DELEGATE, MSG_UNDELEGATE, MSG_BEGIN_REDELEGATE] {
        registry.register_fn(type_url, move || StakingRewards::new(type_url));
    }
}

#[derive(Deserialize)]
struct StakingBody {
    delegator_address: String,
}

/// Changing a delegation withdraws the pending rewards. Those show up as
/// `coin_received` events for the delegator; the bonded principal is not a
/// taxable movement.
#[derive(Debug)]
pub struct StakingRewards {
    type_url: &'static str,
    delegator: String,
    rewards: Vec<Coin>,
}

impl StakingRewards {
    pub fn new(type_url: &'static str) -> Self {
        StakingRewards {
            type_url,
            delegator: String::new(),
            rewards: Vec::new(),
        }
    }
}

impl MessageDecoder for StakingRewards {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = require_action(type_url, log)?;
        let parsed: StakingBody = body(msg)?;
        self.delegator = parsed.delegator_address;
        self.rewards = coins_received(&self.delegator, &events_of_type(entry, "coin_received"))?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.rewards
            .iter()
            .map(|coin| Movement::received(&self.delegator, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for StakingRewards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = super::short_name(self.type_url);
        if self.rewards.is_empty() {
            write!(f, "{}: {} did not withdraw rewards", name, self.delegator)
        } else {
            write!(f, "{}: {} received rewards {}", name, self.delegator, join_coins(&self.rewards))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;

    #[test]
    fn undelegate_uses_begin_unbonding_action() {
        let mut decoder = StakingRewards::new(MSG_UNDELEGATE);
        let log = log_with_action(
            "begin_unbonding",
            vec![event(
                "coin_received",
                &[("receiver", "osmo1d"), ("amount", "12uosmo"), ("receiver", "osmo1x"), ("amount", "1uosmo")],
            )],
        );
        decoder
            .handle_msg(MSG_UNDELEGATE, &json!({"delegator_address": "osmo1d", "validator_address": "v"}), Some(&log))
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, "osmo1d");
        assert!(rows[0].sender.is_empty());
    }

    #[test]
    fn delegate_without_rewards() {
        let mut decoder = StakingRewards::new(MSG_DELEGATE);
        let log = log_with_action("delegate", vec![]);
        decoder
            .handle_msg(MSG_DELEGATE, &json!({"delegator_address": "osmo1d"}), Some(&log))
            .unwrap();
        assert!(decoder.parse_relevant_data().is_empty());
        assert_eq!(decoder.to_string(), "MsgDelegate: osmo1d did not withdraw rewards");
    }
}
