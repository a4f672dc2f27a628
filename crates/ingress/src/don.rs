//! DON transport: pengiriman JSON-RPC request ke satu anggota DON.
//!
//! Gateway hanya butuh `send_to_node`. Jawaban node datang lewat jalur
//! terpisah (`POST /node/{address}`) dan masuk ke router.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use dongate_common::config::DonConfig;
use dongate_proto::Request;

/// Error transport DON.
#[derive(Debug, thiserror::Error)]
pub enum DonError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("failed to reach node {node}: {reason}")]
    Transport { node: String, reason: String },

    #[error("node {node} rejected request with status {status}")]
    Status { node: String, status: u16 },

    #[error("failed to build transport client: {0}")]
    Client(String),
}

/// Koneksi ke DON.
#[async_trait]
pub trait Don: Send + Sync {
    /// Address semua anggota.
    fn members(&self) -> Vec<String>;

    /// Jumlah node faulty yang ditoleransi.
    fn f(&self) -> usize;

    /// Kirim request ke satu node. Tidak ada jaminan delivery selain return value.
    async fn send_to_node(&self, node: &str, request: &Request) -> Result<(), DonError>;
}

/// Threshold konsensus trigger: `floor((N + F) / 2) + 1`.
pub fn trigger_threshold(n: usize, f: usize) -> usize {
    (n + f) / 2 + 1
}

/// `true` jika `node` terdaftar sebagai anggota DON.
pub fn is_member(don: &dyn Don, node: &str) -> bool {
    !node.is_empty() && don.members().iter().any(|m| m == node)
}

/// Threshold metadata: `F + 1`.
pub fn metadata_threshold(f: usize) -> usize {
    f + 1
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP DON
// ════════════════════════════════════════════════════════════════════════════

/// DON transport lewat HTTP POST ke endpoint tiap node.
#[derive(Debug, Clone)]
pub struct HttpDon {
    members: Vec<String>,
    urls: HashMap<String, String>,
    f: usize,
    client: Client,
}

impl HttpDon {
    pub fn new(config: &DonConfig, timeout: Duration) -> Result<Self, DonError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DonError::Client(e.to_string()))?;
        Ok(Self {
            members: config.member_addresses(),
            urls: config
                .members
                .iter()
                .map(|m| (m.address.clone(), m.url.clone()))
                .collect(),
            f: config.f,
            client,
        })
    }
}

#[async_trait]
impl Don for HttpDon {
    fn members(&self) -> Vec<String> {
        self.members.clone()
    }

    fn f(&self) -> usize {
        self.f
    }

    async fn send_to_node(&self, node: &str, request: &Request) -> Result<(), DonError> {
        let url = self
            .urls
            .get(node)
            .ok_or_else(|| DonError::UnknownNode(node.to_string()))?;
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| DonError::Transport {
                node: node.to_string(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DonError::Status {
                node: node.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
