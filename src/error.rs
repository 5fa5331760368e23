//! Closed error classification for the relayer, covering every boundary the
//! process crosses: the ledger gRPC client, the chain RPC client, the store,
//! and the EVM facade's JSON-RPC surface.

use serde::Serialize;
use thiserror::Error;

/// A single closed error type routed by every internal caller. Each variant
/// carries exactly the context needed to log and to classify, never a raw
/// string stand-in for a kind that should have its own variant.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("ledger unavailable: {0}")]
    TransientLedger(String),

    #[error("chain unavailable: {0}")]
    TransientChain(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("user not registered: {0}")]
    UserNotRegistered(String),

    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("submission reverted: {0}")]
    SubmissionRevert(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("ledger rpc error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("internal error: {0}")]
    Internal(#[from] eyre::Error),
}

/// Stable short code for each error kind, used in logs and in the EVM
/// facade's JSON-RPC error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConfigInvalid,
    TransientLedger,
    TransientChain,
    NotFound,
    Conflict,
    InsufficientFunds,
    UserNotRegistered,
    RecipientNotFound,
    UnsupportedMethod,
    Validation,
    SubmissionRevert,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::TransientLedger => "TRANSIENT_LEDGER",
            ErrorCode::TransientChain => "TRANSIENT_CHAIN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::UserNotRegistered => "USER_NOT_REGISTERED",
            ErrorCode::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            ErrorCode::UnsupportedMethod => "UNSUPPORTED_METHOD",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::SubmissionRevert => "SUBMISSION_REVERT",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a caller one layer up should retry after backoff, mirroring
    /// the transient/permanent split of the retry-classification pattern
    /// this crate's error kinds replace.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::TransientLedger | ErrorCode::TransientChain)
    }
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            BridgeError::TransientLedger(_) => ErrorCode::TransientLedger,
            BridgeError::TransientChain(_) => ErrorCode::TransientChain,
            BridgeError::NotFound(_) => ErrorCode::NotFound,
            BridgeError::Conflict(_) => ErrorCode::Conflict,
            BridgeError::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            BridgeError::UserNotRegistered(_) => ErrorCode::UserNotRegistered,
            BridgeError::RecipientNotFound(_) => ErrorCode::RecipientNotFound,
            BridgeError::UnsupportedMethod(_) => ErrorCode::UnsupportedMethod,
            BridgeError::Validation(_) => ErrorCode::Validation,
            BridgeError::SubmissionRevert(_) => ErrorCode::SubmissionRevert,
            BridgeError::Database(e) => match e {
                sqlx::Error::RowNotFound => ErrorCode::NotFound,
                _ => ErrorCode::TransientLedger,
            },
            BridgeError::Http(_) => ErrorCode::TransientChain,
            BridgeError::Transport(_) => ErrorCode::TransientLedger,
            BridgeError::Grpc(status) => match status.code() {
                tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
                    ErrorCode::TransientLedger
                }
                tonic::Code::NotFound => ErrorCode::NotFound,
                tonic::Code::AlreadyExists => ErrorCode::Conflict,
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                    ErrorCode::TransientLedger
                }
                _ => ErrorCode::Internal,
            },
            BridgeError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Shape returned on the EVM Facade's JSON-RPC boundary.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl From<&BridgeError> for JsonRpcError {
    fn from(err: &BridgeError) -> Self {
        // JSON-RPC reserves -32768..-32000 for protocol-level errors; -32000
        // downward is free for server-defined codes, one slot per ErrorCode.
        let code = match err.code() {
            ErrorCode::Validation => -32602,
            ErrorCode::UnsupportedMethod => -32601,
            ErrorCode::NotFound | ErrorCode::RecipientNotFound => -32001,
            ErrorCode::UserNotRegistered => -32002,
            ErrorCode::InsufficientFunds => -32003,
            ErrorCode::Conflict => -32004,
            ErrorCode::SubmissionRevert => -32005,
            ErrorCode::TransientChain | ErrorCode::TransientLedger => -32006,
            ErrorCode::ConfigInvalid | ErrorCode::Internal => -32000,
        };
        JsonRpcError {
            code,
            message: err.to_string(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::TransientLedger.is_retryable());
        assert!(ErrorCode::TransientChain.is_retryable());
        assert!(!ErrorCode::Validation.is_retryable());
        assert!(!ErrorCode::Internal.is_retryable());
    }

    #[test]
    fn test_bridge_error_code_mapping() {
        let err = BridgeError::NotFound("transfer xyz".into());
        assert_eq!(err.code().as_str(), "NOT_FOUND");

        let err = BridgeError::InsufficientFunds("demo".into());
        assert_eq!(err.code().as_str(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: BridgeError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code().as_str(), "NOT_FOUND");
    }

    #[test]
    fn test_json_rpc_error_conversion() {
        let err = BridgeError::Validation("bad amount".into());
        let rpc_err: JsonRpcError = (&err).into();
        assert_eq!(rpc_err.code, -32602);
        assert!(rpc_err.message.contains("bad amount"));
    }

    #[test]
    fn test_json_rpc_unsupported_method_code() {
        let err = BridgeError::UnsupportedMethod("eth_mumble".into());
        let rpc_err: JsonRpcError = (&err).into();
        assert_eq!(rpc_err.code, -32601);
    }
}
