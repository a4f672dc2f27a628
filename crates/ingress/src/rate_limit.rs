//! # Rate Limiting Module
//!
//! Token bucket rate limiter untuk pesan node dan trigger per workflow.
//!
//! ## Prinsip
//!
//! - Thread-safe menggunakan parking_lot RwLock
//! - Token bucket algorithm dengan refill deterministik
//! - Dua tier untuk node (per-sender dan global), satu tier per workflow
//! - Request yang ditolak tidak mengonsumsi token di tier mana pun
//!
//! ## Semantik
//!
//! - `check_and_record()`: consume satu token secara atomik
//! - `allow_verbose()`: cek dua tier sekaligus, laporkan tier mana yang menolak
//! - Refill berdasarkan elapsed time sejak last refill

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use dongate_common::config::{NodeRateLimiterConfig, WorkflowRateLimiterConfig};

// ════════════════════════════════════════════════════════════════════════════
// RATE LIMIT KEY
// ════════════════════════════════════════════════════════════════════════════

/// Scope key untuk rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Per node address.
    Sender,
    /// Semua pesan node.
    Global,
    /// Per (owner, workflow ID).
    Workflow,
}

impl RateLimitKey {
    /// Bentuk key counter untuk scope ini.
    pub fn key(&self, id: &str) -> String {
        match self {
            RateLimitKey::Sender => format!("sender:{}", id),
            RateLimitKey::Global => "global".to_string(),
            RateLimitKey::Workflow => format!("workflow:{}", id),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RATE LIMIT ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Error dari rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for {key}, retry after {retry_after_ms}ms")]
    LimitExceeded { key: String, retry_after_ms: u64 },
}

// ════════════════════════════════════════════════════════════════════════════
// LIMIT CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Konfigurasi satu bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Steady rate.
    pub requests_per_second: u32,
    /// Token awal dan maksimum.
    pub burst_size: u32,
}

impl LimitConfig {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TOKEN BUCKET
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill_ms: u64,
    /// Tokens per millisecond.
    refill_rate: f64,
    max_tokens: f64,
}

impl TokenBucket {
    fn new(config: &LimitConfig, now_ms: u64) -> Self {
        Self {
            tokens: config.burst_size as f64,
            last_refill_ms: now_ms,
            refill_rate: config.requests_per_second as f64 / 1000.0,
            max_tokens: config.burst_size as f64,
        }
    }

    fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed_ms = now_ms - self.last_refill_ms;
        self.tokens = (self.tokens + elapsed_ms as f64 * self.refill_rate).min(self.max_tokens);
        self.last_refill_ms = now_ms;
    }

    fn has_token(&self) -> bool {
        self.tokens >= 1.0
    }

    fn is_full(&self) -> bool {
        self.tokens >= self.max_tokens
    }

    fn retry_after_ms(&self) -> u64 {
        if self.has_token() {
            return 0;
        }
        if self.refill_rate > 0.0 {
            ((1.0 - self.tokens) / self.refill_rate).ceil() as u64
        } else {
            u64::MAX
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RATE LIMITER
// ════════════════════════════════════════════════════════════════════════════

/// Thread-safe rate limiter menggunakan token bucket algorithm.
#[derive(Default)]
pub struct RateLimiter {
    counters: RwLock<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume satu token dari bucket `key`, buat bucket jika belum ada.
    pub fn check_and_record(&self, key: &str, config: &LimitConfig) -> Result<(), RateLimitError> {
        let now_ms = current_timestamp_ms();
        let mut counters = self.counters.write();
        let bucket = counters
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(config, now_ms));
        bucket.refill(now_ms);
        if bucket.has_token() {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(RateLimitError::LimitExceeded {
                key: key.to_string(),
                retry_after_ms: bucket.retry_after_ms(),
            })
        }
    }

    /// Cek dua bucket sekaligus. Token hanya dikonsumsi jika keduanya lolos.
    pub fn check_pair(
        &self,
        first: (&str, &LimitConfig),
        second: (&str, &LimitConfig),
    ) -> (bool, bool) {
        let now_ms = current_timestamp_ms();
        let mut counters = self.counters.write();

        let mut probe = |key: &str, config: &LimitConfig| {
            let bucket = counters
                .entry(key.to_string())
                .or_insert_with(|| TokenBucket::new(config, now_ms));
            bucket.refill(now_ms);
            bucket.has_token()
        };
        let first_ok = probe(first.0, first.1);
        let second_ok = probe(second.0, second.1);

        if first_ok && second_ok {
            for key in [first.0, second.0] {
                if let Some(bucket) = counters.get_mut(key) {
                    bucket.tokens -= 1.0;
                }
            }
        }
        (first_ok, second_ok)
    }

    /// Hapus bucket yang sudah penuh kembali. Bucket penuh identik dengan
    /// bucket baru, jadi menghapusnya tidak mengubah perilaku limiter.
    pub fn prune_idle(&self) -> usize {
        let now_ms = current_timestamp_ms();
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, bucket| {
            bucket.refill(now_ms);
            !bucket.is_full()
        });
        before - counters.len()
    }

    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.counters.read().get(key).map(|b| b.tokens)
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.read().len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NODE RATE LIMITER
// ════════════════════════════════════════════════════════════════════════════

/// Limiter dua tier untuk pesan dari node.
#[derive(Debug)]
pub struct NodeRateLimiter {
    limiter: RateLimiter,
    per_sender: LimitConfig,
    global: LimitConfig,
}

impl NodeRateLimiter {
    pub fn new(config: &NodeRateLimiterConfig) -> Self {
        Self {
            limiter: RateLimiter::new(),
            per_sender: LimitConfig::new(config.per_sender_rps, config.per_sender_burst),
            global: LimitConfig::new(config.global_rps, config.global_burst),
        }
    }

    /// Returns `(sender_allowed, global_allowed)`.
    pub fn allow_verbose(&self, sender: &str) -> (bool, bool) {
        let sender_key = RateLimitKey::Sender.key(sender);
        let global_key = RateLimitKey::Global.key("");
        let (global_ok, sender_ok) = self
            .limiter
            .check_pair((&global_key, &self.global), (&sender_key, &self.per_sender));
        if !(sender_ok && global_ok) {
            debug!(sender = %sender, sender_ok, global_ok, "node message throttled");
        }
        (sender_ok, global_ok)
    }

    pub fn prune_idle(&self) -> usize {
        self.limiter.prune_idle()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WORKFLOW RATE LIMITER
// ════════════════════════════════════════════════════════════════════════════

/// Limiter per workflow yang bisa diganti implementasinya.
pub trait WorkflowRateLimiter: Send + Sync {
    fn allow(&self, workflow_owner: &str, workflow_id: &str) -> Result<(), RateLimitError>;

    /// Housekeeping periodik. Default: tidak ada.
    fn prune(&self) {}
}

/// Token bucket per `(owner, workflow ID)`.
#[derive(Debug)]
pub struct TokenBucketWorkflowLimiter {
    limiter: RateLimiter,
    config: LimitConfig,
}

impl TokenBucketWorkflowLimiter {
    pub fn new(config: &WorkflowRateLimiterConfig) -> Self {
        Self {
            limiter: RateLimiter::new(),
            config: LimitConfig::new(config.rps, config.burst),
        }
    }
}

impl WorkflowRateLimiter for TokenBucketWorkflowLimiter {
    fn allow(&self, workflow_owner: &str, workflow_id: &str) -> Result<(), RateLimitError> {
        let key = RateLimitKey::Workflow.key(&format!("{}:{}", workflow_owner, workflow_id));
        self.limiter.check_and_record(&key, &self.config)
    }

    fn prune(&self) {
        self.limiter.prune_idle();
    }
}

// ════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ════════════════════════════════════════════════════════════════════════════

/// Get current timestamp in Unix milliseconds.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════
