use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::{body, join_coins, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{parse_coins, Coin};
use crate::error::DecodeError;
use crate::events::{events_of_type, parse_transfer_event};
use crate::rpc_client::types::LogEntry;

pub const MSG_SUBMIT_PROPOSAL: &str = "/cosmos.gov.v1beta1.MsgSubmitProposal";
pub const MSG_SUBMIT_PROPOSAL_V1: &str = "/cosmos.gov.v1.MsgSubmitProposal";
pub const MSG_DEPOSIT: &str = "/cosmos.gov.v1beta1.MsgDeposit";
pub const MSG_DEPOSIT_V1: &str = "/cosmos.gov.v1.MsgDeposit";

pub fn register(registry: &mut MessageRegistry) {
    for type_url in [MSG_SUBMIT_PROPOSAL, MSG_SUBMIT_PROPOSAL_V1, MSG_DEPOSIT, MSG_DEPOSIT_V1] {
        registry.register_fn(type_url, move || GovDeposit::new(type_url));
    }
}

#[derive(Deserialize)]
struct GovBody {
    #[serde(default)]
    proposer: String,
    #[serde(default)]
    depositor: String,
}

/// Proposal submissions and deposits. The escrowed coins are read from the
/// `transfer` events sent by the proposer or depositor; a submission with no
/// initial deposit has no transfer and records nothing.
#[derive(Debug)]
pub struct GovDeposit {
    type_url: &'static str,
    depositor: String,
    deposits: Vec<(String, Coin)>,
}

impl GovDeposit {
    pub fn new(type_url: &'static str) -> Self {
        GovDeposit {
            type_url,
            depositor: String::new(),
            deposits: Vec::new(),
        }
    }
}

impl MessageDecoder for GovDeposit {
    fn handle_msg(&mut self, _: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let parsed: GovBody = body(msg)?;
        self.depositor = if parsed.depositor.is_empty() {
            parsed.proposer
        } else {
            parsed.depositor
        };

        let Some(entry) = log else {
            return Ok(());
        };
        for event in events_of_type(entry, "transfer") {
            for transfer in parse_transfer_event(event)? {
                if transfer.sender != self.depositor {
                    continue;
                }
                for coin in parse_coins(&transfer.amount)? {
                    self.deposits.push((transfer.recipient.clone(), coin));
                }
            }
        }
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.deposits
            .iter()
            .map(|(recipient, coin)| Movement::transfer(&self.depositor, recipient, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for GovDeposit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coins: Vec<Coin> = self.deposits.iter().map(|(_, c)| c.clone()).collect();
        if coins.is_empty() {
            write!(f, "{}: {} made no deposit", super::short_name(self.type_url), self.depositor)
        } else {
            write!(
                f,
                "{}: {} deposited {}",
                super::short_name(self.type_url),
                self.depositor,
                join_coins(&coins)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    #[test]
    fn deposit_reads_transfer_to_gov_account() {
        let mut decoder = GovDeposit::new(MSG_DEPOSIT);
        let log = log_with_action(
            "deposit",
            vec![event(
                "transfer",
                &[("recipient", "osmo1gov"), ("sender", "osmo1d"), ("amount", "500uosmo")],
            )],
        );
        decoder
            .handle_msg(MSG_DEPOSIT, &json!({"proposal_id": "3", "depositor": "osmo1d"}), Some(&log))
            .unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, "osmo1gov");
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(500)));
    }

    #[test]
    fn submission_without_log_is_empty() {
        let mut decoder = GovDeposit::new(MSG_SUBMIT_PROPOSAL_V1);
        decoder
            .handle_msg(MSG_SUBMIT_PROPOSAL_V1, &json!({"proposer": "osmo1p", "messages": []}), None)
            .unwrap();
        assert!(decoder.parse_relevant_data().is_empty());
        assert_eq!(decoder.to_string(), "MsgSubmitProposal: osmo1p made no deposit");
    }
}
