//! # Dongate Ingress
//!
//! Control plane gateway di depan DON (decentralized oracle network).
//!
//! ## Architecture
//! ```text
//! User ──▶ GatewayRouter ──▶ HttpTriggerHandler ──broadcast──▶ DON nodes
//!              ▲                    ▲                               │
//!              │                    └── IdenticalResponseAggregator ◀┤
//!              │                                                    │
//!              ├── http_action ──▶ ResponseCache ──▶ HttpClient      │
//!              └── metadata push/pull ──▶ WorkflowMetadataHandler ◀──┘
//! ```
//!
//! ## Modules
//! - router: klasifikasi pesan node dan rate limit dua tier
//! - trigger_handler: trigger user sampai quorum
//! - metadata_handler: registry workflow hasil quorum F+1
//! - aggregation: quorum counter untuk response dan metadata
//! - response_cache / replay_cache: cache TTL
//! - retry: broadcast dengan exponential backoff
//! - don / http_client: kolaborator eksternal
//! - metrics: observability

pub mod aggregation;
pub mod callback;
pub mod don;
pub mod error;
pub mod http_client;
pub mod lifecycle;
pub mod metadata_handler;
pub mod metrics;
pub mod mock_don;
pub mod rate_limit;
pub mod replay_cache;
pub mod response_cache;
pub mod retry;
pub mod router;
pub mod trigger_handler;

#[cfg(test)]
mod test_support;

pub use callback::{Callback, CallbackReceiver, ErrorCode, UserCallbackPayload};
pub use don::{Don, DonError, HttpDon};
pub use error::GatewayError;
pub use http_client::{HttpClient, HttpClientError, ReqwestHttpClient};
pub use metadata_handler::{WorkflowMetadataHandler, WorkflowReference};
pub use metrics::GatewayMetrics;
pub use router::GatewayRouter;
pub use trigger_handler::HttpTriggerHandler;
