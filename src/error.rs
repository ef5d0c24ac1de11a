use std::fmt;

use thiserror::Error;

/// Failures raised while turning a message or event into taxable movements.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no decoder registered for message type {0}")]
    UnknownMessageType(String),

    #[error("log format error for {message_type}: {reason}")]
    LogFormat {
        message_type: String,
        reason: String,
    },

    #[error("contract {contract} payload has no known variant, top-level keys: {keys:?}")]
    ContractPayloadEmpty { contract: String, keys: Vec<String> },

    #[error("invalid coin {0:?}")]
    InvalidCoin(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl DecodeError {
    pub fn log_format(message_type: &str, reason: impl Into<String>) -> Self {
        DecodeError::LogFormat {
            message_type: message_type.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DenomError {
    #[error("denom {0} not found")]
    NotFound(String),
}

/// Errors surfaced by the node client.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request to {url} failed: {source}")]
    Transient {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl RpcError {
    /// Network failures and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transient { .. } => true,
            RpcError::Status { status, .. } => status.is_server_error(),
            RpcError::Decode { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Coarse failure categories used when logging a height that could not be indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    TransientRpc,
    Rpc,
    DecodeFormat,
    StoreConflict,
    Store,
    FatalConfig,
    Other,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::TransientRpc => "TransientRPC",
            FailureCategory::Rpc => "RPC",
            FailureCategory::DecodeFormat => "DecodeFormat",
            FailureCategory::StoreConflict => "StoreConflict",
            FailureCategory::Store => "Store",
            FailureCategory::FatalConfig => "FatalConfig",
            FailureCategory::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Walk an error chain and classify the first cause we recognise.
pub fn failure_category(err: &anyhow::Error) -> FailureCategory {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    for cause in err.chain() {
        if let Some(rpc) = cause.downcast_ref::<RpcError>() {
            return if rpc.is_transient() {
                FailureCategory::TransientRpc
            } else {
                FailureCategory::Rpc
            };
        }
        if cause.downcast_ref::<DecodeError>().is_some() {
            return FailureCategory::DecodeFormat;
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return FailureCategory::FatalConfig;
        }
        if let Some(db) = cause.downcast_ref::<DieselError>() {
            return match db {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    FailureCategory::StoreConflict
                }
                _ => FailureCategory::Store,
            };
        }
        if cause.downcast_ref::<r2d2::Error>().is_some() {
            return FailureCategory::Store;
        }
    }
    FailureCategory::Other
}
