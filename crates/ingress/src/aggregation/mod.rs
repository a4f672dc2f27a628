//! # Quorum Aggregation
//!
//! Dua aggregator berbasis konten:
//!
//! - [`IdenticalResponseAggregator`]: jawaban trigger per request,
//!   threshold `floor((N + F) / 2) + 1`
//! - [`WorkflowMetadataAggregator`]: observasi metadata workflow,
//!   threshold `F + 1`
//!
//! Keduanya mengelompokkan berdasarkan digest konten dan menghitung node
//! yang berbeda. Satu node tidak pernah dihitung dua kali.

mod metadata;
mod response;

pub use metadata::WorkflowMetadataAggregator;
pub use response::IdenticalResponseAggregator;

use dongate_proto::ProtoError;

/// Error dari aggregator.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("threshold must be greater than 0")]
    InvalidThreshold,

    #[error("node address must not be empty")]
    EmptyNodeAddress,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("failed to compute digest: {0}")]
    Digest(#[from] ProtoError),
}
