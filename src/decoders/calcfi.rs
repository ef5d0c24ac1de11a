//! Calc.fi DCA vaults (code id 575 on Osmosis). Executions are recognised
//! but none of them move funds the indexer attributes to the caller.

use std::fmt;

use serde::Deserialize;

use super::id_string;
use super::wasm::{ContractExecution, ContractHandler, ContractParser, ContractParserFactory};
use super::Movement;
use crate::error::DecodeError;
use crate::rpc_client::types::LogEntry;

pub const CODE_ID: u64 = 575;
pub const FRIENDLY_NAME: &str = "Calcfi DCA - 575";
/// Name used to bind extra code ids to this handler in configuration.
pub const HANDLER_NAME: &str = "calcfi-dca";

const EXECUTE_FIELDS: &[&str] = &[
    "create_vault",
    "deposit",
    "update_vault",
    "cancel_vault",
    "execute_trigger",
    "update_config",
    "update_swap_adjustment",
    "disburse_escrow",
    "z_delegate",
    "receive",
];

pub struct DcaHandler;

impl ContractHandler for DcaHandler {
    fn friendly_name(&self) -> &str {
        FRIENDLY_NAME
    }

    fn top_level_fields(&self) -> &[&'static str] {
        EXECUTE_FIELDS
    }

    fn parsers(&self) -> Vec<ContractParserFactory> {
        vec![new_execution as ContractParserFactory]
    }
}

fn new_execution() -> Box<dyn ContractParser> {
    Box::new(DcaExecution::default())
}

#[derive(Deserialize)]
struct ExecuteTrigger {
    #[serde(deserialize_with = "id_string")]
    trigger_id: String,
}

#[derive(Debug, Default)]
pub struct DcaExecution {
    contract: String,
    execution: String,
}

impl ContractParser for DcaExecution {
    fn handle_execution(&mut self, execution: &ContractExecution, _log: Option<&LogEntry>) -> Result<(), DecodeError> {
        self.contract = execution.contract.clone();
        match execution.payload.get("execute_trigger").filter(|v| !v.is_null()) {
            Some(trigger) => {
                let trigger: ExecuteTrigger = serde_json::from_value(trigger.clone())?;
                if trigger.trigger_id.is_empty() {
                    return Err(DecodeError::log_format(FRIENDLY_NAME, "execute_trigger without trigger_id"));
                }
                self.execution = "execute_trigger".to_string();
            }
            None => {
                let unsupported: Vec<&str> = execution
                    .present_fields()
                    .into_iter()
                    .filter(|f| EXECUTE_FIELDS.iter().any(|known| known == f))
                    .collect();
                self.execution = format!("unsupported fields: [{}]", unsupported.join(" "));
            }
        }
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        Vec::new()
    }
}

impl fmt::Display for DcaExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MsgExecuteContract: Contract {} execution parsed as {} with execution parser {}",
            self.contract, FRIENDLY_NAME, self.execution
        )
    }
}
