//! # JSON-RPC 2.0 Envelope
//!
//! Envelope yang dipakai di semua jalur gateway: user → gateway,
//! gateway → node (broadcast), dan node → gateway (response).
//!
//! ## Semantik
//!
//! - `Request::digest()` adalah identitas konten request yang di-bind ke
//!   token otorisasi user. Field `auth` tidak ikut dihitung.
//! - `Response::digest()` adalah identitas konten response yang dipakai
//!   aggregator untuk mengelompokkan jawaban node.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::encoding::canonical_digest;
use crate::ProtoError;

/// Versi protokol yang selalu ditulis ke envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes yang dipakai gateway.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Request tidak selesai dalam batas waktu gateway.
    pub const REQUEST_TIMEOUT: i64 = -32000;
    /// Token tidak valid, signer tidak berwenang, atau replay.
    pub const UNAUTHORIZED: i64 = -32001;
    pub const LIMIT_EXCEEDED: i64 = -32005;
    /// Request ID sudah in-flight.
    pub const CONFLICT: i64 = -32009;
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST
// ════════════════════════════════════════════════════════════════════════════

/// JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Bearer token (compact JWT) yang mengikat digest request ke signer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
}

impl Request {
    /// Membuat request baru tanpa token.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.into(),
            method: method.into(),
            params,
            auth: String::new(),
        }
    }

    /// Hex SHA-256 dari canonical `{jsonrpc, id, method, params}`.
    pub fn digest(&self) -> Result<String, ProtoError> {
        canonical_digest(&json!({
            "jsonrpc": self.jsonrpc,
            "id": self.id,
            "method": self.method,
            "params": self.params,
        }))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RESPONSE
// ════════════════════════════════════════════════════════════════════════════

/// Error object di dalam response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jsonrpc error {}: {}", self.code, self.message)
    }
}

/// JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    /// Response sukses dengan result.
    pub fn with_result(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.into(),
            method: String::new(),
            result: Some(result),
            error: None,
        }
    }

    /// Response error.
    pub fn with_error(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.into(),
            method: String::new(),
            result: None,
            error: Some(WireError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Hex SHA-256 dari canonical `{id, result, error}`.
    ///
    /// `method` dan `jsonrpc` tidak ikut, sehingga dua node yang menjawab
    /// konten yang sama menghasilkan digest yang sama.
    pub fn digest(&self) -> Result<String, ProtoError> {
        canonical_digest(&json!({
            "id": self.id,
            "result": self.result,
            "error": self.error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_digest_ignores_auth() {
        let mut a = Request::new("r1", "workflows.execute", Some(json!({"input": {}})));
        let before = a.digest().unwrap();
        a.auth = "token".to_string();
        assert_eq!(before, a.digest().unwrap());
    }

    #[test]
    fn test_request_digest_changes_with_params() {
        let a = Request::new("r1", "workflows.execute", Some(json!({"input": {"a": 1}})));
        let b = Request::new("r1", "workflows.execute", Some(json!({"input": {"a": 2}})));
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_request_missing_params_is_none() {
        let req: Request = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1","method":"m"}"#).unwrap();
        assert!(req.params.is_none());
        let req: Request =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1","method":"m","params":null}"#).unwrap();
        assert!(req.params.is_none());
    }

    #[test]
    fn test_response_digest_ignores_method() {
        let mut a = Response::with_result("r1", json!({"ok": true}));
        let b = a.clone();
        a.method = "workflows.execute".to_string();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_error_response_serialization() {
        let resp = Response::with_error("r1", codes::CONFLICT, "in flight");
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("-32009"));
        assert!(!text.contains("result"));
    }
}
