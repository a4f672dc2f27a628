//! # Dongate Proto Crate
//!
//! Definisi wire format untuk DON gateway.
//!
//! ## Module Overview
//!
//! - [`jsonrpc`]: JSON-RPC 2.0 `Request`/`Response` envelope dan error codes
//! - [`gateway`]: payload per method (trigger, outbound HTTP, workflow metadata)
//! - [`encoding`]: canonical JSON, digest, dan serde adapters
//!
//! ## Arah Pesan
//!
//! ```text
//! User ──Request(workflows.execute)──▶ Gateway ──Request──▶ Node 1..N
//!                                        ▲                    │
//!                                        └──Response(result)──┘
//! ```
//!
//! Semua digest dihitung dari canonical JSON sehingga node yang jujur
//! menghasilkan identitas yang sama untuk konten yang sama.

pub mod encoding;
pub mod gateway;
pub mod jsonrpc;

pub use gateway::{
    AuthorizedKey, CacheSettings, HttpTriggerRequest, KeyType, OutboundHttpRequest,
    OutboundHttpResponse, WorkflowMetadata, WorkflowSelector,
};
pub use jsonrpc::{codes, Request, Response, WireError, JSONRPC_VERSION};

/// Error dari encoding payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("json encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
