//! Gateway config loader menggunakan TOML dan serde.
//!
//! Semua field numerik boleh 0 / tidak diisi di file; `with_defaults()`
//! mengganti nilai 0 dengan default sebelum config dipakai.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ════════════════════════════════════════════════════════════════════════════

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8088";
pub const DEFAULT_CLEAN_UP_PERIOD_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_MAX_TRIGGER_REQUEST_DURATION_MS: u64 = 60 * 1000;
pub const DEFAULT_RETRY_INITIAL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RETRY_MAX_INTERVAL_TIME_MS: u64 = 30 * 1000;
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_METADATA_PULL_INTERVAL_MS: u64 = 60 * 1000;
pub const DEFAULT_METADATA_AGGREGATION_INTERVAL_MS: u64 = 60 * 1000;
pub const DEFAULT_METADATA_PULL_REQUEST_TIMEOUT_MS: u64 = 30 * 1000;
pub const DEFAULT_OUTBOUND_REQUEST_CACHE_TTL_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_NODE_GLOBAL_RPS: u32 = 500;
pub const DEFAULT_NODE_GLOBAL_BURST: u32 = 1000;
pub const DEFAULT_NODE_PER_SENDER_RPS: u32 = 100;
pub const DEFAULT_NODE_PER_SENDER_BURST: u32 = 200;
pub const DEFAULT_WORKFLOW_RPS: u32 = 5;
pub const DEFAULT_WORKFLOW_BURST: u32 = 10;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5 * 1000;
pub const DEFAULT_HTTP_MAX_TIMEOUT_MS: u64 = 60 * 1000;
pub const DEFAULT_HTTP_MAX_RESPONSE_BYTES: u64 = 26_400;

fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Error saat load atau validasi config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ════════════════════════════════════════════════════════════════════════════
// SECTIONS
// ════════════════════════════════════════════════════════════════════════════

/// `[server]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Batas waktu handler HTTP menunggu response untuk user request.
    pub user_request_timeout_ms: u64,
}

/// Satu anggota DON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DonMember {
    /// Node address (identitas logis node).
    pub address: String,
    /// Endpoint tempat gateway mengirim JSON-RPC request ke node.
    pub url: String,
}

/// `[don]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonConfig {
    pub don_id: String,
    /// Jumlah node faulty yang ditoleransi.
    pub f: usize,
    pub members: Vec<DonMember>,
}

impl DonConfig {
    pub fn member_addresses(&self) -> Vec<String> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }
}

/// Token bucket limits untuk pesan dari node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRateLimiterConfig {
    pub global_rps: u32,
    pub global_burst: u32,
    pub per_sender_rps: u32,
    pub per_sender_burst: u32,
}

/// Token bucket limits per workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowRateLimiterConfig {
    pub rps: u32,
    pub burst: u32,
}

/// Backoff untuk broadcast trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub max_interval_time_ms: u64,
    pub multiplier: f64,
}

/// `[gateway]` section: konfigurasi service inti.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub node_rate_limiter: NodeRateLimiterConfig,
    pub workflow_rate_limiter: WorkflowRateLimiterConfig,
    pub max_trigger_request_duration_ms: u64,
    pub retry: RetryConfig,
    pub clean_up_period_ms: u64,
    pub metadata_pull_interval_ms: u64,
    pub metadata_aggregation_interval_ms: u64,
    pub metadata_pull_request_timeout_ms: u64,
    pub outbound_request_cache_ttl_ms: u64,
}

impl ServiceConfig {
    /// Ganti semua nilai 0 dengan default.
    pub fn with_defaults(mut self) -> Self {
        let nrl = &mut self.node_rate_limiter;
        nrl.global_rps = or_default(nrl.global_rps, DEFAULT_NODE_GLOBAL_RPS);
        nrl.global_burst = or_default(nrl.global_burst, DEFAULT_NODE_GLOBAL_BURST);
        nrl.per_sender_rps = or_default(nrl.per_sender_rps, DEFAULT_NODE_PER_SENDER_RPS);
        nrl.per_sender_burst = or_default(nrl.per_sender_burst, DEFAULT_NODE_PER_SENDER_BURST);

        let wrl = &mut self.workflow_rate_limiter;
        wrl.rps = or_default(wrl.rps, DEFAULT_WORKFLOW_RPS);
        wrl.burst = or_default(wrl.burst, DEFAULT_WORKFLOW_BURST);

        self.max_trigger_request_duration_ms = or_default(
            self.max_trigger_request_duration_ms,
            DEFAULT_MAX_TRIGGER_REQUEST_DURATION_MS,
        );
        self.retry.initial_interval_ms =
            or_default(self.retry.initial_interval_ms, DEFAULT_RETRY_INITIAL_INTERVAL_MS);
        self.retry.max_interval_time_ms =
            or_default(self.retry.max_interval_time_ms, DEFAULT_RETRY_MAX_INTERVAL_TIME_MS);
        if self.retry.multiplier <= 0.0 {
            self.retry.multiplier = DEFAULT_RETRY_MULTIPLIER;
        }
        self.clean_up_period_ms = or_default(self.clean_up_period_ms, DEFAULT_CLEAN_UP_PERIOD_MS);
        self.metadata_pull_interval_ms =
            or_default(self.metadata_pull_interval_ms, DEFAULT_METADATA_PULL_INTERVAL_MS);
        self.metadata_aggregation_interval_ms = or_default(
            self.metadata_aggregation_interval_ms,
            DEFAULT_METADATA_AGGREGATION_INTERVAL_MS,
        );
        self.metadata_pull_request_timeout_ms = or_default(
            self.metadata_pull_request_timeout_ms,
            DEFAULT_METADATA_PULL_REQUEST_TIMEOUT_MS,
        );
        self.outbound_request_cache_ttl_ms = or_default(
            self.outbound_request_cache_ttl_ms,
            DEFAULT_OUTBOUND_REQUEST_CACHE_TTL_MS,
        );
        self
    }

    pub fn max_trigger_request_duration(&self) -> Duration {
        Duration::from_millis(self.max_trigger_request_duration_ms)
    }

    pub fn clean_up_period(&self) -> Duration {
        Duration::from_millis(self.clean_up_period_ms)
    }

    pub fn metadata_pull_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_pull_interval_ms)
    }

    pub fn metadata_aggregation_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_aggregation_interval_ms)
    }

    pub fn metadata_pull_request_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_pull_request_timeout_ms)
    }

    pub fn outbound_request_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.outbound_request_cache_ttl_ms)
    }
}

/// `[http_client]` section untuk outbound HTTP action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_response_bytes: u64,
    /// Kosong = semua port diizinkan.
    pub allowed_ports: Vec<u16>,
    /// Kosong = `http` dan `https`.
    pub allowed_schemes: Vec<String>,
}

impl HttpClientConfig {
    pub fn with_defaults(mut self) -> Self {
        self.default_timeout_ms = or_default(self.default_timeout_ms, DEFAULT_HTTP_TIMEOUT_MS);
        self.max_timeout_ms = or_default(self.max_timeout_ms, DEFAULT_HTTP_MAX_TIMEOUT_MS);
        self.max_response_bytes =
            or_default(self.max_response_bytes, DEFAULT_HTTP_MAX_RESPONSE_BYTES);
        if self.allowed_schemes.is_empty() {
            self.allowed_schemes = vec!["http".to_string(), "https".to_string()];
        }
        self
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ROOT CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Root config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub don: DonConfig,
    pub gateway: ServiceConfig,
    pub http_client: HttpClientConfig,
}

impl GatewayConfig {
    /// Terapkan default ke semua section.
    pub fn with_defaults(mut self) -> Self {
        if self.server.listen_addr.is_empty() {
            self.server.listen_addr = DEFAULT_LISTEN_ADDR.to_string();
        }
        self.gateway = self.gateway.with_defaults();
        self.http_client = self.http_client.with_defaults();
        self.server.user_request_timeout_ms = or_default(
            self.server.user_request_timeout_ms,
            self.gateway.max_trigger_request_duration_ms,
        );
        self
    }

    /// Validasi membership DON.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let members = &self.don.members;
        if members.is_empty() {
            return Err(ConfigError::Invalid("don.members must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for m in members {
            if m.address.is_empty() {
                return Err(ConfigError::Invalid("don member address must not be empty".to_string()));
            }
            if !seen.insert(m.address.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate don member address: {}",
                    m.address
                )));
            }
        }
        if self.don.f >= members.len() {
            return Err(ConfigError::Invalid(format!(
                "don.f ({}) must be smaller than the number of members ({})",
                self.don.f,
                members.len()
            )));
        }
        Ok(())
    }
}

/// Load config dari file TOML, terapkan default, lalu validasi.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: GatewayConfig = toml::from_str(&s)?;
    let cfg = cfg.with_defaults();
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults_replace_zero() {
        let cfg = ServiceConfig::default().with_defaults();
        assert_eq!(cfg.clean_up_period_ms, DEFAULT_CLEAN_UP_PERIOD_MS);
        assert_eq!(cfg.max_trigger_request_duration_ms, 60_000);
        assert_eq!(cfg.retry.initial_interval_ms, 100);
        assert_eq!(cfg.retry.max_interval_time_ms, 30_000);
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert_eq!(cfg.metadata_pull_request_timeout_ms, 30_000);
        assert_eq!(cfg.outbound_request_cache_ttl_ms, 600_000);
        assert_eq!(cfg.node_rate_limiter.global_burst, DEFAULT_NODE_GLOBAL_BURST);
        assert_eq!(cfg.workflow_rate_limiter.rps, DEFAULT_WORKFLOW_RPS);
    }

    #[test]
    fn test_service_defaults_keep_explicit_values() {
        let mut cfg = ServiceConfig::default();
        cfg.max_trigger_request_duration_ms = 1234;
        cfg.retry.multiplier = 1.5;
        let cfg = cfg.with_defaults();
        assert_eq!(cfg.max_trigger_request_duration_ms, 1234);
        assert_eq!(cfg.retry.multiplier, 1.5);
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            [server]
            listen_addr = "0.0.0.0:9000"

            [don]
            don_id = "don-1"
            f = 1
            members = [
                { address = "0xn1", url = "http://127.0.0.1:7001/rpc" },
                { address = "0xn2", url = "http://127.0.0.1:7002/rpc" },
                { address = "0xn3", url = "http://127.0.0.1:7003/rpc" },
            ]

            [gateway]
            max_trigger_request_duration_ms = 5000

            [gateway.retry]
            initial_interval_ms = 50
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(cfg.server.user_request_timeout_ms, 5000);
        assert_eq!(cfg.don.members.len(), 3);
        assert_eq!(cfg.don.f, 1);
        assert_eq!(cfg.gateway.retry.initial_interval_ms, 50);
        assert_eq!(cfg.gateway.retry.max_interval_time_ms, DEFAULT_RETRY_MAX_INTERVAL_TIME_MS);
        assert_eq!(cfg.http_client.max_response_bytes, DEFAULT_HTTP_MAX_RESPONSE_BYTES);
    }

    #[test]
    fn test_validate_rejects_bad_membership() {
        let cfg = GatewayConfig::default().with_defaults();
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default().with_defaults();
        cfg.don.members = vec![
            DonMember { address: "a".into(), url: "http://a".into() },
            DonMember { address: "a".into(), url: "http://b".into() },
        ];
        assert!(cfg.validate().is_err());

        cfg.don.members[1].address = "b".into();
        cfg.don.f = 2;
        assert!(cfg.validate().is_err());

        cfg.don.f = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
