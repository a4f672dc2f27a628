//! Callback satu kali untuk response ke user.
//!
//! Pengirim dimiliki oleh handler (tersimpan di in-flight map), penerima
//! dipegang transport yang menunggu jawaban. `send` mengonsumsi callback,
//! jadi satu request ID tidak mungkin menerima dua response.

use tokio::sync::oneshot;
use tracing::debug;

use dongate_proto::{codes, Response};

use crate::error::GatewayError;

/// Klasifikasi hasil untuk transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    UserMessageParseError,
    UnsupportedMethodError,
    InvalidRequestError,
    UnauthorizedError,
    RequestTimeoutError,
    ConflictError,
    LimitExceededError,
    FatalError,
}

impl ErrorCode {
    /// Mapping dari JSON-RPC error code.
    pub fn from_jsonrpc(code: i64) -> Self {
        match code {
            codes::PARSE_ERROR => ErrorCode::UserMessageParseError,
            codes::METHOD_NOT_FOUND => ErrorCode::UnsupportedMethodError,
            codes::INVALID_REQUEST | codes::INVALID_PARAMS => ErrorCode::InvalidRequestError,
            codes::UNAUTHORIZED => ErrorCode::UnauthorizedError,
            codes::REQUEST_TIMEOUT => ErrorCode::RequestTimeoutError,
            codes::CONFLICT => ErrorCode::ConflictError,
            codes::LIMIT_EXCEEDED => ErrorCode::LimitExceededError,
            _ => ErrorCode::FatalError,
        }
    }
}

/// Payload yang dikirim ke callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCallbackPayload {
    /// Serialized JSON-RPC response.
    pub raw_response: Vec<u8>,
    pub error_code: ErrorCode,
}

impl UserCallbackPayload {
    /// Payload dari response yang sudah jadi.
    pub fn from_response(response: &Response) -> Result<Self, GatewayError> {
        let raw_response = serde_json::to_vec(response)
            .map_err(|e| GatewayError::Internal(format!("failed to marshal response: {}", e)))?;
        let error_code = response
            .error
            .as_ref()
            .map(|e| ErrorCode::from_jsonrpc(e.code))
            .unwrap_or(ErrorCode::NoError);
        Ok(Self {
            raw_response,
            error_code,
        })
    }

    /// Payload error untuk request `id`.
    pub fn from_error(id: &str, err: &GatewayError) -> Self {
        let response = Response::with_error(id, err.code(), err.user_message());
        Self {
            raw_response: serde_json::to_vec(&response).unwrap_or_default(),
            error_code: ErrorCode::from_jsonrpc(err.code()),
        }
    }
}

pub type CallbackReceiver = oneshot::Receiver<UserCallbackPayload>;

/// Sisi pengirim callback.
#[derive(Debug)]
pub struct Callback {
    tx: oneshot::Sender<UserCallbackPayload>,
}

impl Callback {
    pub fn new() -> (Self, CallbackReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Kirim payload. Penerima yang sudah pergi hanya dicatat.
    pub fn send(self, payload: UserCallbackPayload) {
        if self.tx.send(payload).is_err() {
            debug!("callback receiver dropped before response was delivered");
        }
    }

    pub fn send_error(self, id: &str, err: &GatewayError) {
        self.send(UserCallbackPayload::from_error(id, err));
    }
}
