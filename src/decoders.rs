use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::coin::Coin;
use crate::error::DecodeError;
use crate::events::is_message_action_equals;
use crate::rpc_client::types::LogEntry;

pub mod bank;
pub mod calcfi;
pub mod concentrated;
pub mod distribution;
pub mod gamm;
pub mod gov;
pub mod ibc;
pub mod liquidity;
pub mod poolmanager;
pub mod staking;
pub mod tokenfactory;
pub mod valsetpref;
pub mod wasm;

pub use wasm::ContractRegistry;

/// A normalized taxable movement extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Movement {
    pub sender: String,
    pub receiver: String,
    pub amount_sent: Option<BigDecimal>,
    pub denom_sent: Option<String>,
    pub amount_received: Option<BigDecimal>,
    pub denom_received: Option<String>,
}

impl Movement {
    /// Same coin leaves `sender` and arrives at `receiver`.
    pub fn transfer(sender: &str, receiver: &str, coin: &Coin) -> Self {
        Movement {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount_sent: Some(coin.amount.clone()),
            denom_sent: Some(coin.denom.clone()),
            amount_received: Some(coin.amount.clone()),
            denom_received: Some(coin.denom.clone()),
        }
    }

    pub fn received(receiver: &str, coin: &Coin) -> Self {
        Movement {
            receiver: receiver.to_string(),
            amount_received: Some(coin.amount.clone()),
            denom_received: Some(coin.denom.clone()),
            ..Default::default()
        }
    }

    pub fn sent(sender: &str, coin: &Coin) -> Self {
        Movement {
            sender: sender.to_string(),
            amount_sent: Some(coin.amount.clone()),
            denom_sent: Some(coin.denom.clone()),
            ..Default::default()
        }
    }

    /// `address` gives up `sent` and gets `received` back.
    pub fn swap(address: &str, sent: &Coin, received: &Coin) -> Self {
        Movement {
            sender: address.to_string(),
            receiver: address.to_string(),
            amount_sent: Some(sent.amount.clone()),
            denom_sent: Some(sent.denom.clone()),
            amount_received: Some(received.amount.clone()),
            denom_received: Some(received.denom.clone()),
        }
    }
}

/// Decoder for one message family. A fresh instance is built per message.
pub trait MessageDecoder: fmt::Display + Send {
    fn handle_msg(
        &mut self,
        type_url: &str,
        msg: &Value,
        log: Option<&LogEntry>,
    ) -> Result<(), DecodeError>;

    fn parse_relevant_data(&self) -> Vec<Movement>;

    fn message_type(&self) -> &str;
}

pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn MessageDecoder> + Send + Sync>;

/// Result of decoding a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub type_url: String,
    pub description: String,
    pub movements: Vec<Movement>,
}

impl DecodedMessage {
    fn empty(type_url: &str) -> Self {
        DecodedMessage {
            type_url: type_url.to_string(),
            description: String::new(),
            movements: Vec::new(),
        }
    }
}

/// Type URL -> ordered decoder factories, plus the set of types we record but never decode.
#[derive(Default)]
pub struct MessageRegistry {
    factories: HashMap<String, Vec<DecoderFactory>>,
    ignored: HashSet<String>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("decoders", &self.factories.len())
            .field("ignored", &self.ignored.len())
            .finish()
    }
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_url: &str, factory: DecoderFactory) {
        self.factories
            .entry(type_url.to_string())
            .or_default()
            .push(factory);
    }

    /// Register a decoder constructor. Later registrations are tried after earlier ones.
    pub fn register_fn<D, F>(&mut self, type_url: &str, build: F)
    where
        D: MessageDecoder + 'static,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.register(type_url, Arc::new(move || Box::new(build()) as Box<dyn MessageDecoder>));
    }

    pub fn ignore(&mut self, type_url: &str) {
        self.ignored.insert(type_url.to_string());
    }

    /// Every decoder family this indexer understands. `contracts` routes contract executions.
    pub fn with_defaults(contracts: Arc<ContractRegistry>) -> Self {
        let mut registry = MessageRegistry::new();
        bank::register(&mut registry);
        distribution::register(&mut registry);
        gov::register(&mut registry);
        staking::register(&mut registry);
        ibc::register(&mut registry);
        tokenfactory::register(&mut registry);
        gamm::register(&mut registry);
        poolmanager::register(&mut registry);
        concentrated::register(&mut registry);
        valsetpref::register(&mut registry);
        liquidity::register(&mut registry);
        wasm::register(&mut registry, contracts);

        for type_url in IGNORED_MESSAGE_TYPES {
            registry.ignore(type_url);
        }
        registry
    }

    /// Run the registered decoders for `type_url` in order; the first success wins.
    pub fn decode(
        &self,
        type_url: &str,
        msg: &Value,
        log: Option<&LogEntry>,
    ) -> Result<DecodedMessage, DecodeError> {
        if self.ignored.contains(type_url) {
            return Ok(DecodedMessage::empty(type_url));
        }

        let factories = self
            .factories
            .get(type_url)
            .ok_or_else(|| DecodeError::UnknownMessageType(type_url.to_string()))?;

        let mut last_error = None;
        for factory in factories {
            let mut decoder = factory();
            match decoder.handle_msg(type_url, msg, log) {
                Ok(()) => {
                    return Ok(DecodedMessage {
                        type_url: type_url.to_string(),
                        description: decoder.to_string(),
                        movements: decoder.parse_relevant_data(),
                    })
                }
                Err(e) => {
                    debug!("Decoder for {} rejected message: {}", type_url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DecodeError::UnknownMessageType(type_url.to_string())))
    }
}

/// Recorded with no movements and without a warning.
const IGNORED_MESSAGE_TYPES: &[&str] = &[
    "/cosmos.gov.v1beta1.MsgVote",
    "/cosmos.gov.v1.MsgVote",
    "/cosmos.gov.v1beta1.MsgVoteWeighted",
    "/cosmos.gov.v1.MsgVoteWeighted",
    "/cosmos.authz.v1beta1.MsgGrant",
    "/cosmos.authz.v1beta1.MsgRevoke",
    "/cosmos.feegrant.v1beta1.MsgGrantAllowance",
    "/cosmos.feegrant.v1beta1.MsgRevokeAllowance",
    "/cosmos.distribution.v1beta1.MsgSetWithdrawAddress",
    "/cosmos.slashing.v1beta1.MsgUnjail",
    "/cosmos.staking.v1beta1.MsgCreateValidator",
    "/cosmos.staking.v1beta1.MsgEditValidator",
    "/ibc.core.client.v1.MsgUpdateClient",
    "/ibc.core.client.v1.MsgCreateClient",
    "/ibc.core.channel.v1.MsgTimeout",
    "/ibc.core.channel.v1.MsgTimeoutOnClose",
    "/ibc.core.channel.v1.MsgChannelOpenInit",
    "/ibc.core.channel.v1.MsgChannelOpenTry",
    "/ibc.core.channel.v1.MsgChannelOpenAck",
    "/ibc.core.channel.v1.MsgChannelOpenConfirm",
    "/ibc.core.connection.v1.MsgConnectionOpenInit",
    "/ibc.core.connection.v1.MsgConnectionOpenTry",
    "/ibc.core.connection.v1.MsgConnectionOpenAck",
    "/ibc.core.connection.v1.MsgConnectionOpenConfirm",
    "/osmosis.superfluid.MsgSuperfluidDelegate",
    "/osmosis.superfluid.MsgSuperfluidUndelegate",
    "/osmosis.superfluid.MsgSuperfluidUnbondLock",
    "/osmosis.superfluid.MsgLockAndSuperfluidDelegate",
    "/osmosis.superfluid.MsgUnPoolWhitelistedPool",
    "/osmosis.superfluid.MsgUnlockAndMigrateSharesToFullRangeConcentratedPosition",
    "/osmosis.lockup.MsgLockTokens",
    "/osmosis.lockup.MsgBeginUnlocking",
    "/osmosis.lockup.MsgBeginUnlockingAll",
    "/osmosis.valsetpref.v1beta1.MsgSetValidatorSetPreference",
    "/osmosis.tokenfactory.v1beta1.MsgCreateDenom",
    "/osmosis.tokenfactory.v1beta1.MsgSetDenomMetadata",
    "/osmosis.tokenfactory.v1beta1.MsgSetBeforeSendHook",
    "/osmosis.tokenfactory.v1beta1.MsgChangeAdmin",
    "/cosmwasm.wasm.v1.MsgInstantiateContract",
    "/cosmwasm.wasm.v1.MsgInstantiateContract2",
    "/cosmwasm.wasm.v1.MsgStoreCode",
    "/cosmwasm.wasm.v1.MsgMigrateContract",
    "/cosmwasm.wasm.v1.MsgUpdateAdmin",
    "/cosmwasm.wasm.v1.MsgClearAdmin",
    "/cosmwasm.wasm.v1.MsgUpdateInstantiateConfig",
    "/cosmwasm.wasm.v1.MsgSudoContract",
    "/cosmwasm.wasm.v1.MsgPinCodes",
    "/cosmwasm.wasm.v1.MsgUnpinCodes",
];

/// Deserialize a message body into the decoder's typed view of it.
pub(crate) fn body<T: DeserializeOwned>(msg: &Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(msg.clone())?)
}

/// Ids that arrive either as JSON strings or numbers.
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

pub(crate) fn require_log<'a>(
    type_url: &str,
    log: Option<&'a LogEntry>,
) -> Result<&'a LogEntry, DecodeError> {
    log.ok_or_else(|| DecodeError::log_format(type_url, "message has no log entry"))
}

/// The log entry, after checking its `message.action` names this type.
pub(crate) fn require_action<'a>(
    type_url: &str,
    log: Option<&'a LogEntry>,
) -> Result<&'a LogEntry, DecodeError> {
    let entry = require_log(type_url, log)?;
    if !is_message_action_equals(type_url, entry) {
        return Err(DecodeError::log_format(type_url, "message action does not match"));
    }
    Ok(entry)
}

pub(crate) fn join_coins(coins: &[Coin]) -> String {
    coins
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Short message name for display: `/cosmos.bank.v1beta1.MsgSend` -> `MsgSend`.
pub(crate) fn short_name(type_url: &str) -> &str {
    type_url.rsplit('.').next().unwrap_or(type_url)
}
