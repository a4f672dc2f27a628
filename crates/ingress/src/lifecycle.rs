//! Lifecycle background task gateway.
//!
//! Satu stop channel untuk semua loop, satu `TaskTracker` untuk semua task
//! (loop periodik dan outbound HTTP action yang sedang berjalan).
//! `close()` mengirim stop tepat sekali lalu menunggu semua task selesai.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Debug)]
pub struct Lifecycle {
    started: AtomicBool,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    tracker: TaskTracker,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_tx,
            tracker: TaskTracker::new(),
        }
    }

    /// `true` hanya untuk pemanggil pertama.
    pub fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spawn task yang ditunggu oleh `close()`.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Jalankan `tick` setiap `period` sampai stop.
    ///
    /// Tick pertama terjadi setelah satu `period`, bukan langsung.
    pub fn spawn_ticker<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return;
        }
        let mut stop = self.stop_tx.subscribe();
        let period = period.max(Duration::from_millis(1));
        self.tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = stop.changed() => break,
                }
            }
            debug!(task = name, "background loop stopped");
        });
    }

    /// Kirim stop sekali, lalu tunggu semua task yang di-track.
    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_tx.send_replace(true);
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticker_runs_until_close() {
        let lifecycle = Lifecycle::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        lifecycle.spawn_ticker("test", Duration::from_millis(10), move || {
            let t = Arc::clone(&t);
            async move {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        lifecycle.close().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_close_waits_for_tracked_tasks() {
        let lifecycle = Lifecycle::new();
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        lifecycle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            d.store(true, Ordering::SeqCst);
        });
        lifecycle.close().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mark_started_once() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.mark_started());
        assert!(!lifecycle.mark_started());
    }
}
