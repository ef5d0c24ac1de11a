//! Smart-contract executions. `MsgExecuteContract` is routed to a handler
//! chosen by contract address; handlers registered by code id are expanded
//! to addresses once at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{body, calcfi, MessageDecoder, MessageRegistry, Movement};
use crate::error::DecodeError;
use crate::rpc_client::types::LogEntry;

pub const MSG_EXECUTE_CONTRACT: &str = "/cosmwasm.wasm.v1.MsgExecuteContract";

/// A decoded `MsgExecuteContract` with its payload as JSON.
#[derive(Debug, Clone)]
pub struct ContractExecution {
    pub sender: String,
    pub contract: String,
    pub payload: Value,
}

#[derive(Deserialize)]
struct ExecuteContractBody {
    #[serde(default)]
    sender: String,
    contract: String,
    #[serde(default)]
    msg: Value,
}

impl ContractExecution {
    pub fn from_msg(msg: &Value) -> Result<Self, DecodeError> {
        let parsed: ExecuteContractBody = body(msg)?;
        // Amino JSON carries the payload inline; protobuf JSON carries base64 bytes.
        let payload = match parsed.msg {
            Value::String(encoded) => serde_json::from_slice(&STANDARD.decode(encoded.as_bytes())?)?,
            other => other,
        };
        Ok(ContractExecution {
            sender: parsed.sender,
            contract: parsed.contract,
            payload,
        })
    }

    /// Top-level keys of the payload, in payload order.
    pub fn payload_keys(&self) -> Vec<String> {
        match &self.payload {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Top-level keys that carry a value.
    pub fn present_fields(&self) -> Vec<&str> {
        match &self.payload {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One way of reading an execution against a known contract.
pub trait ContractParser: fmt::Display + Send {
    fn handle_execution(
        &mut self,
        execution: &ContractExecution,
        log: Option<&LogEntry>,
    ) -> Result<(), DecodeError>;

    fn parse_relevant_data(&self) -> Vec<Movement>;
}

pub type ContractParserFactory = fn() -> Box<dyn ContractParser>;

/// A family of contracts sharing one execute schema.
pub trait ContractHandler: Send + Sync {
    fn friendly_name(&self) -> &str;

    /// Top-level variant names of the execute payload.
    fn top_level_fields(&self) -> &[&'static str];

    /// Parsers tried in order; the first to succeed wins.
    fn parsers(&self) -> Vec<ContractParserFactory>;
}

/// Handlers that can be bound to extra code ids from configuration.
pub fn known_handler(name: &str) -> Option<Arc<dyn ContractHandler>> {
    match name {
        calcfi::HANDLER_NAME => Some(Arc::new(calcfi::DcaHandler)),
        _ => None,
    }
}

#[derive(Default)]
pub struct ContractRegistry {
    by_address: HashMap<String, Arc<dyn ContractHandler>>,
    by_code_id: HashMap<u64, Arc<dyn ContractHandler>>,
}

impl fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("addresses", &self.by_address.len())
            .field("code_ids", &self.by_code_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ContractRegistry {
    /// Registry with the built-in code id handlers and no addresses yet.
    pub fn with_builtin() -> Self {
        let mut registry = ContractRegistry::default();
        registry.register_code_id(calcfi::CODE_ID, Arc::new(calcfi::DcaHandler));
        registry
    }

    pub fn register_code_id(&mut self, code_id: u64, handler: Arc<dyn ContractHandler>) {
        self.by_code_id.insert(code_id, handler);
    }

    pub fn code_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.by_code_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Point every contract instantiated from `code_id` at that code's handler.
    pub fn bind_contracts(&mut self, code_id: u64, contracts: &[String]) -> usize {
        let Some(handler) = self.by_code_id.get(&code_id).cloned() else {
            return 0;
        };
        for contract in contracts {
            self.by_address.insert(contract.clone(), handler.clone());
        }
        contracts.len()
    }

    pub fn handler_for(&self, contract: &str) -> Option<Arc<dyn ContractHandler>> {
        self.by_address.get(contract).cloned()
    }

    pub fn address_count(&self) -> usize {
        self.by_address.len()
    }
}

pub fn register(registry: &mut MessageRegistry, contracts: Arc<ContractRegistry>) {
    registry.register_fn(MSG_EXECUTE_CONTRACT, move || ExecuteContract::new(contracts.clone()));
}

/// Routes an execution to its contract handler. Executions against contracts
/// without a handler decode successfully with no movements.
pub struct ExecuteContract {
    contracts: Arc<ContractRegistry>,
    contract: String,
    parsed: Option<Box<dyn ContractParser>>,
}

impl ExecuteContract {
    pub fn new(contracts: Arc<ContractRegistry>) -> Self {
        ExecuteContract {
            contracts,
            contract: String::new(),
            parsed: None,
        }
    }
}

impl MessageDecoder for ExecuteContract {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let execution = ContractExecution::from_msg(msg)?;
        self.contract = execution.contract.clone();

        let Some(handler) = self.contracts.handler_for(&execution.contract) else {
            return Ok(());
        };

        let known = handler.top_level_fields();
        if !execution.present_fields().iter().any(|f| known.iter().any(|k| k == f)) {
            return Err(DecodeError::ContractPayloadEmpty {
                keys: execution.payload_keys(),
                contract: execution.contract,
            });
        }

        for build in handler.parsers() {
            let mut parser = build();
            match parser.handle_execution(&execution, log) {
                Ok(()) => {
                    self.parsed = Some(parser);
                    return Ok(());
                }
                Err(e) => debug!(
                    "Parser failed for contract {} executed by {}: {}",
                    execution.contract, execution.sender, e
                ),
            }
        }

        Err(DecodeError::log_format(
            type_url,
            format!(
                "no parser succeeded for contract {} using handler {}",
                execution.contract,
                handler.friendly_name()
            ),
        ))
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.parsed
            .as_ref()
            .map(|p| p.parse_relevant_data())
            .unwrap_or_default()
    }

    fn message_type(&self) -> &str {
        MSG_EXECUTE_CONTRACT
    }
}

impl fmt::Display for ExecuteContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parsed {
            Some(parser) => parser.fmt(f),
            None => write!(f, "MsgExecuteContract: No handler found for contract address {}", self.contract),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DCA_CONTRACT: &str = "osmo1dca";

    fn contracts() -> Arc<ContractRegistry> {
        let mut registry = ContractRegistry::with_builtin();
        assert_eq!(registry.bind_contracts(calcfi::CODE_ID, &[DCA_CONTRACT.to_string()]), 1);
        assert_eq!(registry.bind_contracts(1, &["osmo1other".to_string()]), 0);
        Arc::new(registry)
    }

    fn execute(payload: Value) -> Result<ExecuteContract, DecodeError> {
        let mut decoder = ExecuteContract::new(contracts());
        let msg = json!({"sender": "osmo1s", "contract": DCA_CONTRACT, "msg": payload, "funds": []});
        decoder.handle_msg(MSG_EXECUTE_CONTRACT, &msg, None)?;
        Ok(decoder)
    }

    #[test]
    fn base64_payload_is_decoded() {
        let encoded = STANDARD.encode(br#"{"execute_trigger":{"trigger_id":"12","route":null}}"#);
        let decoder = execute(Value::String(encoded)).unwrap();
        assert!(decoder.parse_relevant_data().is_empty());
        assert!(decoder.to_string().ends_with("with execution parser execute_trigger"));
    }

    #[test]
    fn empty_payload_reports_keys() {
        match execute(json!({"swap": {}, "claim": null})) {
            Err(DecodeError::ContractPayloadEmpty { contract, keys }) => {
                assert_eq!(contract, DCA_CONTRACT);
                assert_eq!(keys, vec!["claim".to_string(), "swap".to_string()]);
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("expected an empty payload error"),
        }
    }

    #[test]
    fn known_handlers_by_name() {
        assert!(known_handler(calcfi::HANDLER_NAME).is_some());
        assert!(known_handler("nope").is_none());
    }
}
