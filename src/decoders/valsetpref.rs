use std::fmt;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, require_action, MessageDecoder, MessageRegistry, Movement};
use crate::coin::Coin;
use crate::error::DecodeError;
use crate::events::{coins_received, events_of_type};
use crate::rpc_client::types::LogEntry;

pub const MSG_DELEGATE_TO_VALIDATOR_SET: &str = "/osmosis.valsetpref.v1beta1.MsgDelegateToValidatorSet";
pub const MSG_UNDELEGATE_FROM_VALIDATOR_SET: &str =
    "/osmosis.valsetpref.v1beta1.MsgUndelegateFromValidatorSet";
pub const MSG_REDELEGATE_VALIDATOR_SET: &str = "/osmosis.valsetpref.v1beta1.MsgRedelegateValidatorSet";
pub const MSG_WITHDRAW_DELEGATION_REWARDS: &str =
    "/osmosis.valsetpref.v1beta1.MsgWithdrawDelegationRewards";

pub fn register(registry: &mut MessageRegistry) {
    for type_url in [
        MSG_DELEGATE_TO_VALIDATOR_SET,
        MSG_UNDELEGATE_FROM_VALIDATOR_SET,
        MSG_REDELEGATE_VALIDATOR_SET,
        MSG_WITHDRAW_DELEGATION_REWARDS,
    ] {
        registry.register_fn(type_url, move || ValidatorSetRewards::new(type_url));
    }
}

#[derive(Deserialize)]
struct DelegatorBody {
    delegator: String,
}

/// Rewards paid out to the delegator while acting on a validator-set preference.
#[derive(Debug)]
pub struct ValidatorSetRewards {
    type_url: &'static str,
    delegator: String,
    rewards: Vec<Coin>,
}

impl ValidatorSetRewards {
    pub fn new(type_url: &'static str) -> Self {
        ValidatorSetRewards {
            type_url,
            delegator: String::new(),
            rewards: Vec::new(),
        }
    }
}

impl MessageDecoder for ValidatorSetRewards {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = require_action(type_url, log)?;
        let parsed: DelegatorBody = body(msg)?;
        self.delegator = parsed.delegator;
        let zero = BigDecimal::from(0);
        self.rewards = coins_received(&self.delegator, &events_of_type(entry, "coin_received"))?
            .into_iter()
            .filter(|c| c.amount > zero)
            .collect();
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

impl fmt::Display for ValidatorSetRewards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} received {}",
            super::short_name(self.type_url),
            self.delegator,
            join_coins(&self.rewards)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;

    #[test]
    fn rewards_for_delegator_only() {
        let mut decoder = ValidatorSetRewards::new(MSG_DELEGATE_TO_VALIDATOR_SET);
        let log = log_with_action(
            "delegate_to_validator_set",
            vec![event(
                "coin_received",
                &[("receiver", "osmo1d"), ("amount", "7uosmo"), ("receiver", "osmo1bonded"), ("amount", "100uosmo")],
            )],
        );
        decoder
            .handle_msg(
                MSG_DELEGATE_TO_VALIDATOR_SET,
                &json!({"delegator": "osmo1d", "coin": {"denom": "uosmo", "amount": "100"}}),
                Some(&log),
            )
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(7)));
    }

    #[test]
    fn wrong_action_rejected() {
        let mut decoder = ValidatorSetRewards::new(MSG_WITHDRAW_DELEGATION_REWARDS);
        let log = log_with_action("delegate", vec![]);
        assert!(decoder
            .handle_msg(MSG_WITHDRAW_DELEGATION_REWARDS, &json!({"delegator": "osmo1d"}), Some(&log))
            .is_err());
    }
}
