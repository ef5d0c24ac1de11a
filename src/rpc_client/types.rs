use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::coin::JsonCoin;

/// Null or missing strings become empty strings. Nodes are inconsistent here.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Integers that some endpoints encode as JSON strings.
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(0),
        Some(IntOrString::Int(i)) => Ok(i),
        Some(IntOrString::Str(s)) if s.is_empty() => Ok(0),
        Some(IntOrString::Str(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Attribute {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Event {
    pub fn new(kind: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Event {
            kind: kind.into(),
            attributes,
        }
    }
}

/// Per-message slice of a transaction's log.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LogEntry {
    #[serde(default, deserialize_with = "int_or_string")]
    pub msg_index: i64,
    #[serde(default)]
    pub events: Vec<Event>,
}

// REST gateway: /cosmos/tx/v1beta1/txs

#[derive(Debug, Clone, Deserialize)]
pub struct GetTxsEventResponse {
    #[serde(default)]
    pub txs: Vec<Tx>,
    #[serde(default)]
    pub tx_responses: Vec<TxResponse>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub next_key: Option<String>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tx {
    #[serde(default)]
    pub body: TxBody,
    #[serde(default)]
    pub auth_info: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxBody {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub signer_infos: Vec<SignerInfo>,
    #[serde(default)]
    pub fee: Fee,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerInfo {
    #[serde(default)]
    pub public_key: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fee {
    #[serde(default)]
    pub amount: Vec<JsonCoin>,
    #[serde(default, deserialize_with = "int_or_string")]
    pub gas_limit: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payer: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub granter: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxResponse {
    #[serde(default, deserialize_with = "int_or_string")]
    pub height: i64,
    #[serde(default)]
    pub txhash: String,
    #[serde(default, deserialize_with = "int_or_string")]
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub raw_log: String,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// A transaction joined with its response, ready for decoding.
#[derive(Debug, Clone, Default)]
pub struct MergedTx {
    pub tx: Tx,
    pub response: TxResponse,
}

impl MergedTx {
    /// Per-message logs. Newer nodes leave `logs` empty and tag `events` with `msg_index`.
    pub fn message_logs(&self) -> Vec<LogEntry> {
        if !self.response.logs.is_empty() {
            return self.response.logs.clone();
        }
        group_events_by_msg_index(&self.response.events)
    }
}

/// Rebuild per-message log entries from flat events carrying a `msg_index` attribute.
/// Events without the attribute (fees, signatures) belong to no message and are dropped.
/// Within a message, events of the same type are merged into one with their
/// attributes concatenated in emission order, the shape legacy `logs` had.
pub fn group_events_by_msg_index(events: &[Event]) -> Vec<LogEntry> {
    let mut grouped: BTreeMap<i64, Vec<Event>> = BTreeMap::new();
    for event in events {
        let index = event
            .attributes
            .iter()
            .find(|a| a.key == "msg_index")
            .and_then(|a| a.value.parse::<i64>().ok());
        let Some(index) = index else { continue };

        let attributes = event
            .attributes
            .iter()
            .filter(|a| a.key != "msg_index")
            .cloned();
        let merged = grouped.entry(index).or_default();
        match merged.iter_mut().find(|e| e.kind == event.kind) {
            Some(existing) => existing.attributes.extend(attributes),
            None => merged.push(Event::new(event.kind.clone(), attributes.collect())),
        }
    }
    grouped
        .into_iter()
        .map(|(msg_index, events)| LogEntry { msg_index, events })
        .collect()
}

// REST gateway: /cosmos/base/tendermint/v1beta1/blocks/{height}

#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockResponse {
    pub block: BlockData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockData {
    pub header: BlockHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub chain_id: String,
    #[serde(deserialize_with = "int_or_string")]
    pub height: i64,
    pub time: chrono::DateTime<chrono::Utc>,
}

// Tendermint RPC

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "int_or_string")]
    pub latest_block_height: i64,
    #[serde(default)]
    pub catching_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub catching_up: bool,
    pub latest_height: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBlockResults {
    #[serde(default, deserialize_with = "int_or_string")]
    pub height: i64,
    #[serde(default)]
    pub begin_block_events: Option<Vec<Event>>,
    #[serde(default)]
    pub end_block_events: Option<Vec<Event>>,
    #[serde(default)]
    pub finalize_block_events: Option<Vec<Event>>,
}

/// Block results split into begin and end block events regardless of node version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockResults {
    pub height: i64,
    pub begin_block_events: Vec<Event>,
    pub end_block_events: Vec<Event>,
}

// CosmWasm and Osmosis epochs

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsByCodeResponse {
    #[serde(default)]
    pub contracts: Vec<String>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpochsResponse {
    #[serde(default)]
    pub epochs: Vec<EpochInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EpochInfo {
    pub identifier: String,
    #[serde(deserialize_with = "int_or_string")]
    pub current_epoch: i64,
    #[serde(deserialize_with = "int_or_string")]
    pub current_epoch_start_height: i64,
}
