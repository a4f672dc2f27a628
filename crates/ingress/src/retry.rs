//! # Broadcast dengan Retry
//!
//! Kirim satu request ke semua anggota DON dalam batas waktu total.
//!
//! ## Semantik
//!
//! - Setiap pass mengirim paralel ke node yang belum sukses.
//! - Node yang sudah sukses tidak pernah dikirimi ulang.
//! - Jeda antar pass: `min(initial * multiplier^attempt, max)` dengan jitter.
//! - Selesai sukses begitu semua node sukses; gagal saat deadline lewat.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

use dongate_common::config::RetryConfig;
use dongate_proto::Request;

use crate::don::Don;
use crate::error::GatewayError;

// ════════════════════════════════════════════════════════════════════════════
// BACKOFF
// ════════════════════════════════════════════════════════════════════════════

/// Exponential backoff dengan jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            min,
            max: max.max(min),
            factor,
            jitter,
            attempt: 0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_interval_ms),
            Duration::from_millis(config.max_interval_time_ms),
            config.multiplier,
            true,
        )
    }

    /// Jeda berikutnya; attempt naik satu setiap panggilan.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.min.as_nanos() as f64;
        let max = self.max.as_nanos() as f64;
        let exp = self.factor.powi(self.attempt.min(i32::MAX as u32) as i32);
        self.attempt = self.attempt.saturating_add(1);

        let mut delay = (min * exp).min(max);
        if !delay.is_finite() {
            delay = max;
        }
        if self.jitter && delay > min {
            delay = rand::thread_rng().gen_range(min..=delay);
        }
        Duration::from_nanos(delay.max(0.0) as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BROADCAST
// ════════════════════════════════════════════════════════════════════════════

/// Kirim `request` ke semua anggota DON sampai semua sukses atau deadline lewat.
///
/// Returns jumlah node yang sukses (selalu sama dengan jumlah anggota saat `Ok`).
pub async fn send_to_all_with_retry(
    don: Arc<dyn Don>,
    request: Arc<Request>,
    max_duration: Duration,
    mut backoff: Backoff,
) -> Result<usize, GatewayError> {
    let members = don.members();
    let total = members.len();
    let deadline = Instant::now() + max_duration;
    let mut succeeded: HashSet<String> = HashSet::with_capacity(total);

    loop {
        let mut pass = JoinSet::new();
        for node in members.iter().filter(|n| !succeeded.contains(*n)) {
            let don = Arc::clone(&don);
            let request = Arc::clone(&request);
            let node = node.clone();
            pass.spawn(async move {
                let result = timeout_at(deadline, don.send_to_node(&node, &request)).await;
                (node, result)
            });
        }
        while let Some(joined) = pass.join_next().await {
            match joined {
                Ok((node, Ok(Ok(())))) => {
                    succeeded.insert(node);
                }
                Ok((node, Ok(Err(e)))) => {
                    warn!(request_id = %request.id, node = %node, error = %e, "failed to send request to node");
                }
                Ok((node, Err(_))) => {
                    warn!(request_id = %request.id, node = %node, "send to node timed out");
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "send task failed");
                }
            }
        }

        if succeeded.len() == total {
            debug!(request_id = %request.id, nodes = total, attempts = backoff.attempt() + 1, "request sent to all nodes");
            return Ok(total);
        }

        let exceeded = || {
            GatewayError::Timeout(format!(
                "request retry time exceeded, successNodes={}, totalNodes={}",
                succeeded.len(),
                total
            ))
        };
        if Instant::now() >= deadline {
            return Err(exceeded());
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = sleep_until(deadline) => return Err(exceeded()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_don::MockDon;

    fn fixed_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(10), 1.0, false)
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 1: BACKOFF
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0, false);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_within_bounds() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(30), 2.0, true);
        for attempt in 0..10u32 {
            let d = b.next_delay();
            let upper = Duration::from_millis(100 * 2u64.pow(attempt)).min(Duration::from_secs(30));
            assert!(d >= Duration::from_millis(100), "attempt {}: {:?}", attempt, d);
            assert!(d <= upper, "attempt {}: {:?} > {:?}", attempt, d, upper);
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 2: BROADCAST
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_all_succeed_first_pass() {
        let don = Arc::new(MockDon::new(&["n1", "n2", "n3"], 1));
        let req = Arc::new(Request::new("r1", "m", None));
        let sent = send_to_all_with_retry(don.clone(), req, Duration::from_secs(1), fixed_backoff())
            .await
            .unwrap();
        assert_eq!(sent, 3);
        assert_eq!(don.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_retries_only_failed_nodes() {
        let don = Arc::new(MockDon::new(&["n1", "n2", "n3"], 1));
        don.fail_node("n2", 2);
        let req = Arc::new(Request::new("r1", "m", None));
        send_to_all_with_retry(don.clone(), req, Duration::from_secs(1), fixed_backoff())
            .await
            .unwrap();
        assert_eq!(don.sent_to("n1").len(), 1);
        assert_eq!(don.sent_to("n2").len(), 1);
        assert_eq!(don.sent_to("n3").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_deadline_reports_counts() {
        let don = Arc::new(MockDon::new(&["n1", "n2", "n3"], 1));
        don.fail_node_always("n3");
        let req = Arc::new(Request::new("r1", "m", None));
        let err = send_to_all_with_retry(don.clone(), req, Duration::from_millis(100), fixed_backoff())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("request retry time exceeded"), "{}", msg);
        assert!(msg.contains("successNodes=2, totalNodes=3"), "{}", msg);
        assert_eq!(don.sent_to("n1").len(), 1);
    }
}
