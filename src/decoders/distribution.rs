use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, require_action, MessageDecoder, MessageRegistry, Movement};
use crate::address::{address_prefix, module_address};
use crate::coin::{parse_coins, Coin, JsonCoin};
use crate::error::DecodeError;
use crate::events::{attr_first, event_of_type};
use crate::rpc_client::types::LogEntry;

pub const MSG_WITHDRAW_DELEGATOR_REWARD: &str =
    "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
pub const MSG_WITHDRAW_VALIDATOR_COMMISSION: &str =
    "/cosmos.distribution.v1beta1.MsgWithdrawValidatorCommission";
pub const MSG_FUND_COMMUNITY_POOL: &str = "/cosmos.distribution.v1beta1.MsgFundCommunityPool";

const DISTRIBUTION_MODULE: &str = "distribution";

pub fn register(registry: &mut MessageRegistry) {
    registry.register_fn(MSG_WITHDRAW_DELEGATOR_REWARD, || {
        WithdrawRewards::new(MSG_WITHDRAW_DELEGATOR_REWARD)
    });
    registry.register_fn(MSG_WITHDRAW_VALIDATOR_COMMISSION, || {
        WithdrawRewards::new(MSG_WITHDRAW_VALIDATOR_COMMISSION)
    });
    registry.register_fn(MSG_FUND_COMMUNITY_POOL, FundCommunityPool::default);
}

/// Delegator reward and validator commission withdrawals. The first
/// `coin_received` event names the receiver and the coins paid out.
#[derive(Debug)]
pub struct WithdrawRewards {
    type_url: &'static str,
    receiver: String,
    coins: Vec<Coin>,
}

impl WithdrawRewards {
    pub fn new(type_url: &'static str) -> Self {
        WithdrawRewards {
            type_url,
            receiver: String::new(),
            coins: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct WithdrawBody {
    #[serde(default)]
    delegator_address: String,
}

impl MessageDecoder for WithdrawRewards {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = require_action(type_url, log)?;
        let received = event_of_type(entry, "coin_received")
            .ok_or_else(|| DecodeError::log_format(type_url, "no coin_received event"))?;

        self.receiver = attr_first(received, "receiver").to_string();
        self.coins = parse_coins(attr_first(received, "amount"))?;

        let parsed: WithdrawBody = body(msg)?;
        if !parsed.delegator_address.is_empty() && parsed.delegator_address != self.receiver {
            return Err(DecodeError::log_format(
                type_url,
                format!(
                    "delegator {} does not match coin_received receiver {}",
                    parsed.delegator_address, self.receiver
                ),
            ));
        }
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.coins
            .iter()
            .map(|coin| Movement::received(&self.receiver, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for WithdrawRewards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} received {}",
            super::short_name(self.type_url),
            self.receiver,
            join_coins(&self.coins)
        )
    }
}

#[derive(Deserialize)]
struct FundBody {
    depositor: String,
    #[serde(default)]
    amount: Vec<JsonCoin>,
}

/// Funds move from the depositor to the distribution module account, derived
/// with the depositor's bech32 prefix.
#[derive(Debug, Default)]
pub struct FundCommunityPool {
    depositor: String,
    pool: String,
    funds: Vec<Coin>,
}

impl MessageDecoder for FundCommunityPool {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        require_action(type_url, log)?;
        let parsed: FundBody = body(msg)?;
        self.pool = address_prefix(&parsed.depositor)
            .and_then(|prefix| module_address(&prefix, DISTRIBUTION_MODULE).ok())
            .unwrap_or_default();
        self.depositor = parsed.depositor;
        self.funds = parsed
            .amount
            .iter()
            .map(Coin::try_from)
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.funds
            .iter()
            .map(|coin| Movement::transfer(&self.depositor, &self.pool, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_FUND_COMMUNITY_POOL
    }
}

impl fmt::Display for FundCommunityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgFundCommunityPool: {} gave {}", self.depositor, join_coins(&self.funds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;

    #[test]
    fn commission_goes_to_receiver() {
        let mut decoder = WithdrawRewards::new(MSG_WITHDRAW_VALIDATOR_COMMISSION);
        let log = log_with_action(
            MSG_WITHDRAW_VALIDATOR_COMMISSION,
            vec![event("coin_received", &[("receiver", "osmo1op"), ("amount", "42uosmo")])],
        );
        decoder
            .handle_msg(MSG_WITHDRAW_VALIDATOR_COMMISSION, &json!({"validator_address": "osmovaloper1"}), Some(&log))
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, "osmo1op");
    }

    #[test]
    fn mismatched_delegator_is_rejected() {
        let mut decoder = WithdrawRewards::new(MSG_WITHDRAW_DELEGATOR_REWARD);
        let log = log_with_action(
            MSG_WITHDRAW_DELEGATOR_REWARD,
            vec![event("coin_received", &[("receiver", "osmo1other"), ("amount", "1uosmo")])],
        );
        let err = decoder
            .handle_msg(MSG_WITHDRAW_DELEGATOR_REWARD, &json!({"delegator_address": "osmo1d"}), Some(&log))
            .unwrap_err();
        assert!(matches!(err, DecodeError::LogFormat { .. }));
    }

    #[test]
    fn missing_event_is_log_format_error() {
        let mut decoder = WithdrawRewards::new(MSG_WITHDRAW_DELEGATOR_REWARD);
        let log = log_with_action(MSG_WITHDRAW_DELEGATOR_REWARD, vec![]);
        assert!(decoder
            .handle_msg(MSG_WITHDRAW_DELEGATOR_REWARD, &json!({}), Some(&log))
            .is_err());
    }

    #[test]
    fn community_pool_deposit() {
        let depositor = crate::address::bech32_address("osmo", &[7u8; 20]).unwrap();
        let mut decoder = FundCommunityPool::default();
        let log = log_with_action("fund_community_pool", vec![]);
        decoder
            .handle_msg(
                MSG_FUND_COMMUNITY_POOL,
                &json!({"depositor": depositor, "amount": [{"denom": "uosmo", "amount": "9"}]}),
                Some(&log),
            )
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows[0].sender, depositor);
        assert_eq!(rows[0].receiver, module_address("osmo", DISTRIBUTION_MODULE).unwrap());
    }
}
