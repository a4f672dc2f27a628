//! Error taxonomy gateway.
//!
//! Setiap `GatewayError` punya JSON-RPC code lewat [`GatewayError::code`],
//! sehingga kegagalan apa pun di jalur trigger bisa diubah menjadi tepat
//! satu error response untuk user.

use dongate_common::{AuthError, ValidationError};
use dongate_proto::{codes, ProtoError};

use crate::aggregation::AggregationError;
use crate::don::DonError;

/// Pesan tetap untuk error internal. Detail hanya masuk log.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Internal server error occurred while processing the request";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Body tidak bisa di-parse.
    #[error("failed to parse request: {0}")]
    Parse(String),

    /// Request shape salah (ID, params, input).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid workflow selector: {0}")]
    Validation(#[from] ValidationError),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("workflow not found")]
    WorkflowNotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid auth token: {0}")]
    Auth(#[from] AuthError),

    #[error("auth token has already been used")]
    Replay,

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("request ID already in use: {0}")]
    Conflict(String),

    #[error("{0}")]
    Timeout(String),

    #[error("sender {0} is not a DON member")]
    UnknownNode(String),

    #[error("callback not found for request ID: {0}")]
    CallbackNotFound(String),

    #[error("node returned error: {0}")]
    NodeError(String),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Encoding(#[from] ProtoError),

    #[error(transparent)]
    Don(#[from] DonError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// JSON-RPC error code untuk error ini.
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::Parse(_) => codes::PARSE_ERROR,
            GatewayError::InvalidRequest(_) | GatewayError::Validation(_) => codes::INVALID_REQUEST,
            GatewayError::UnsupportedMethod(_) => codes::METHOD_NOT_FOUND,
            GatewayError::WorkflowNotFound
            | GatewayError::Unauthorized(_)
            | GatewayError::Auth(_)
            | GatewayError::Replay
            | GatewayError::UnknownNode(_) => codes::UNAUTHORIZED,
            GatewayError::RateLimited(_) => codes::LIMIT_EXCEEDED,
            GatewayError::Conflict(_) => codes::CONFLICT,
            GatewayError::Timeout(_) => codes::REQUEST_TIMEOUT,
            GatewayError::CallbackNotFound(_)
            | GatewayError::NodeError(_)
            | GatewayError::Aggregation(_)
            | GatewayError::Encoding(_)
            | GatewayError::Don(_)
            | GatewayError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Pesan yang aman dikirim ke user.
    pub fn user_message(&self) -> String {
        if self.code() == codes::INTERNAL_ERROR {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
