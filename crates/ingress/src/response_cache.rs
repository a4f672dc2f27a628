//! # Response Cache
//!
//! TTL cache untuk hasil outbound HTTP action, di-key dengan
//! `OutboundHttpRequest::hash()`.
//!
//! ## Semantik
//!
//! - Hanya status 2xx dan 4xx yang disimpan.
//! - Entry yang masih dalam TTL global tidak pernah ditimpa.
//! - `fetch` membaca cache hanya jika `maxAgeMs > 0` dan
//!   `stored_at + maxAge > now`.
//! - Seluruh map dijaga satu mutex. Lock tidak pernah ditahan saat
//!   `fetch_fn` berjalan.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use dongate_proto::{OutboundHttpRequest, OutboundHttpResponse};

use crate::metrics::GatewayMetrics;

/// Status yang boleh di-cache: [200, 300) dan [400, 500).
pub fn is_cacheable_status(status: u16) -> bool {
    (200..300).contains(&status) || (400..500).contains(&status)
}

#[derive(Debug, Clone)]
struct CachedResponse {
    response: OutboundHttpResponse,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedResponse>>,
    metrics: Arc<GatewayMetrics>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Simpan response jika cacheable dan tidak ada entry yang masih fresh.
    pub fn set(&self, workflow_id: &str, request: &OutboundHttpRequest, response: &OutboundHttpResponse) {
        if !is_cacheable_status(response.status_code) {
            return;
        }
        let key = match request.hash() {
            Ok(k) => k,
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "failed to hash outbound request");
                return;
            }
        };
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            if now.saturating_duration_since(existing.stored_at) < self.ttl {
                return;
            }
        }
        entries.insert(
            key,
            CachedResponse {
                response: response.clone(),
                stored_at: now,
            },
        );
        self.metrics.cache_stores.inc();
        debug!(workflow_id = %workflow_id, status = response.status_code, "cached outbound response");
    }

    /// Baca cache (jika `maxAgeMs > 0`) atau panggil `fetch_fn`.
    pub async fn fetch<F, Fut>(
        &self,
        workflow_id: &str,
        request: &OutboundHttpRequest,
        fetch_fn: F,
        store_on_fetch: bool,
    ) -> OutboundHttpResponse
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OutboundHttpResponse>,
    {
        let max_age = Duration::from_millis(request.cache_settings.max_age_ms);
        if !max_age.is_zero() {
            if let Ok(key) = request.hash() {
                let hit = {
                    let entries = self.entries.lock();
                    entries
                        .get(&key)
                        .filter(|c| c.stored_at + max_age > Instant::now())
                        .map(|c| c.response.clone())
                };
                if let Some(response) = hit {
                    self.metrics.cache_hits.inc();
                    debug!(workflow_id = %workflow_id, "outbound response served from cache");
                    return response;
                }
            }
            self.metrics.cache_misses.inc();
        }

        let response = fetch_fn().await;
        if store_on_fetch {
            self.set(workflow_id, request, &response);
        }
        response
    }

    /// Hapus semua entry yang melewati TTL global.
    pub fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, c| now.saturating_duration_since(c.stored_at) < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            self.metrics.cache_evictions.inc_by(removed as u64);
            debug!(removed, "evicted expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dongate_proto::CacheSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(max_age_ms: u64) -> OutboundHttpRequest {
        OutboundHttpRequest {
            method: "GET".to_string(),
            url: "https://example.com/data".to_string(),
            cache_settings: CacheSettings { store: true, max_age_ms },
            workflow_owner: "0xowner".to_string(),
            ..Default::default()
        }
    }

    fn response(status: u16, body: &str) -> OutboundHttpResponse {
        OutboundHttpResponse {
            status_code: status,
            body: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn cache(ttl: Duration) -> ResponseCache {
        ResponseCache::new(ttl, Arc::new(GatewayMetrics::new()))
    }

    #[test]
    fn test_cacheable_status_ranges() {
        for s in [200, 204, 299, 400, 404, 499] {
            assert!(is_cacheable_status(s), "{} should be cacheable", s);
        }
        for s in [0, 100, 199, 300, 302, 399, 500, 503, 600] {
            assert!(!is_cacheable_status(s), "{} should not be cacheable", s);
        }
    }

    #[test]
    fn test_set_skips_uncacheable_and_keeps_fresh_entry() {
        let c = cache(Duration::from_secs(60));
        c.set("wf", &request(0), &response(500, "err"));
        assert!(c.is_empty());

        c.set("wf", &request(0), &response(200, "first"));
        c.set("wf", &request(0), &response(200, "second"));
        assert_eq!(c.len(), 1);
        let entries = c.entries.lock();
        let cached = entries.values().next().unwrap();
        assert_eq!(cached.response.body, b"first".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_hit_skips_fetch_fn() {
        let c = cache(Duration::from_secs(60));
        c.set("wf", &request(0), &response(200, "cached"));

        let calls = AtomicUsize::new(0);
        let resp = c
            .fetch("other-wf", &request(10_000), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                response(200, "fresh")
            }, true)
            .await;
        assert_eq!(resp.body, b"cached".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.metrics.cache_hits.get(), 1);
    }

    #[tokio::test]
    async fn test_fetch_zero_max_age_never_reads() {
        let c = cache(Duration::from_secs(60));
        c.set("wf", &request(0), &response(200, "cached"));
        let resp = c
            .fetch("wf", &request(0), || async { response(200, "fresh") }, false)
            .await;
        assert_eq!(resp.body, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_stale_for_max_age_refetches() {
        let c = cache(Duration::from_secs(60));
        c.set("wf", &request(0), &response(200, "cached"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let resp = c
            .fetch("wf", &request(5), || async { response(200, "fresh") }, true)
            .await;
        assert_eq!(resp.body, b"fresh".to_vec());
        // Entry lama masih dalam TTL global: tidak ditimpa.
        let entries = c.entries.lock();
        assert_eq!(entries.values().next().unwrap().response.body, b"cached".to_vec());
    }

    #[tokio::test]
    async fn test_fetch_does_not_store_server_errors() {
        let c = cache(Duration::from_secs(60));
        let resp = c
            .fetch("wf", &request(1000), || async { response(500, "boom") }, true)
            .await;
        assert_eq!(resp.status_code, 500);
        assert!(c.is_empty());
    }

    #[test]
    fn test_delete_expired_zero_ttl() {
        let c = cache(Duration::ZERO);
        c.set("wf", &request(0), &response(200, "x"));
        assert_eq!(c.len(), 1);
        assert_eq!(c.delete_expired(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_delete_expired_keeps_fresh() {
        let c = cache(Duration::from_secs(60));
        c.set("wf", &request(0), &response(404, "missing"));
        assert_eq!(c.delete_expired(), 0);
        assert_eq!(c.len(), 1);
    }
}
