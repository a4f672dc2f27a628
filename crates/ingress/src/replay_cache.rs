//! Replay protection untuk token sekali pakai.
//!
//! Menyimpan `jti → first seen`. Entry dihapus setelah retention window;
//! token dengan `exp` maksimum 5 menit sudah kadaluarsa jauh sebelum itu.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
pub struct ReplayCache {
    retention: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl ReplayCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, jti: &str) -> bool {
        self.seen.lock().contains_key(jti)
    }

    /// Catat `jti`. `false` jika sudah pernah tercatat.
    pub fn try_record(&self, jti: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains_key(jti) {
            return false;
        }
        seen.insert(jti.to_string(), Instant::now());
        true
    }

    pub fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, at| now.saturating_duration_since(*at) < self.retention);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
