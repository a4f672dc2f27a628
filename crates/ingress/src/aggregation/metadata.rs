use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use dongate_proto::WorkflowMetadata;

use super::AggregationError;

#[derive(Debug)]
struct Observation {
    metadata: WorkflowMetadata,
    nodes: HashSet<String>,
    first_seen: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    /// digest → observation
    observations: HashMap<String, Observation>,
    /// node → digest → waktu terakhir dilaporkan
    observed_at: HashMap<String, HashMap<String, Instant>>,
}

impl Inner {
    fn detach(&mut self, node: &str, digest: &str) {
        if let Some(obs) = self.observations.get_mut(digest) {
            obs.nodes.remove(node);
            if obs.nodes.is_empty() {
                self.observations.remove(digest);
            }
        }
    }
}

/// Quorum counter untuk metadata workflow dari node.
///
/// Observasi dianggap valid jika dilaporkan identik oleh minimal
/// `threshold` node berbeda. Laporan node kadaluarsa setelah
/// `expiry`, sehingga node harus terus melaporkan ulang lewat push/pull.
#[derive(Debug)]
pub struct WorkflowMetadataAggregator {
    threshold: usize,
    expiry: Duration,
    inner: Mutex<Inner>,
}

impl WorkflowMetadataAggregator {
    pub fn new(threshold: usize, expiry: Duration) -> Result<Self, AggregationError> {
        if threshold == 0 {
            return Err(AggregationError::InvalidThreshold);
        }
        Ok(Self {
            threshold,
            expiry,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn collect(&self, metadata: &WorkflowMetadata, node: &str) -> Result<(), AggregationError> {
        self.collect_at(metadata, node, Instant::now())
    }

    pub(crate) fn collect_at(
        &self,
        metadata: &WorkflowMetadata,
        node: &str,
        now: Instant,
    ) -> Result<(), AggregationError> {
        let sel = &metadata.workflow_selector;
        if sel.workflow_id.is_empty() {
            return Err(AggregationError::EmptyField("workflowID"));
        }
        if sel.workflow_owner.is_empty() {
            return Err(AggregationError::EmptyField("workflowOwner"));
        }
        if sel.workflow_name.is_empty() {
            return Err(AggregationError::EmptyField("workflowName"));
        }
        if sel.workflow_tag.is_empty() {
            return Err(AggregationError::EmptyField("workflowTag"));
        }
        if node.is_empty() {
            return Err(AggregationError::EmptyNodeAddress);
        }
        let digest = metadata.digest()?;

        let mut inner = self.inner.lock();

        // Laporan baru untuk workflow yang sama menggantikan laporan lama node ini.
        let superseded: Vec<String> = inner
            .observed_at
            .get(node)
            .map(|seen| {
                seen.keys()
                    .filter(|d| **d != digest)
                    .filter(|d| {
                        inner
                            .observations
                            .get(*d)
                            .map(|o| o.metadata.workflow_selector.workflow_id == sel.workflow_id)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for old in &superseded {
            inner.detach(node, old);
            if let Some(seen) = inner.observed_at.get_mut(node) {
                seen.remove(old);
            }
        }

        inner
            .observations
            .entry(digest.clone())
            .or_insert_with(|| Observation {
                metadata: metadata.clone(),
                nodes: HashSet::new(),
                first_seen: now,
            })
            .nodes
            .insert(node.to_string());
        inner
            .observed_at
            .entry(node.to_string())
            .or_default()
            .insert(digest, now);
        Ok(())
    }

    /// Observasi yang sudah quorum, terbaru lebih dulu.
    pub fn aggregate(&self) -> Vec<WorkflowMetadata> {
        let inner = self.inner.lock();
        let mut quorate: Vec<&Observation> = inner
            .observations
            .values()
            .filter(|o| o.nodes.len() >= self.threshold)
            .collect();
        quorate.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        quorate.into_iter().map(|o| o.metadata.clone()).collect()
    }

    /// Hapus laporan node yang lebih tua dari `expiry`.
    pub fn reap_expired(&self) -> usize {
        self.reap_at(Instant::now())
    }

    pub(crate) fn reap_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        for (node, seen) in inner.observed_at.iter_mut() {
            seen.retain(|digest, at| {
                let keep = now.saturating_duration_since(*at) <= self.expiry;
                if !keep {
                    expired.push((node.clone(), digest.clone()));
                }
                keep
            });
        }
        inner.observed_at.retain(|_, seen| !seen.is_empty());
        for (node, digest) in &expired {
            inner.detach(node, digest);
        }
        if !expired.is_empty() {
            debug!(expired = expired.len(), "reaped stale metadata observations");
        }
        expired.len()
    }

    pub fn observation_count(&self) -> usize {
        self.inner.lock().observations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dongate_proto::{AuthorizedKey, WorkflowSelector};

    fn metadata(id_byte: &str, key_byte: &str) -> WorkflowMetadata {
        WorkflowMetadata {
            workflow_selector: WorkflowSelector {
                workflow_id: format!("0x{}", id_byte.repeat(32)),
                workflow_owner: format!("0x{}", "11".repeat(20)),
                workflow_name: "0x30313233343536373839".to_string(),
                workflow_tag: "v1".to_string(),
            },
            authorized_keys: vec![AuthorizedKey::evm(format!("0x{}", key_byte.repeat(20)))],
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 1: THRESHOLD
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_below_threshold_not_returned() {
        let agg = WorkflowMetadataAggregator::new(2, Duration::from_secs(60)).unwrap();
        let md = metadata("aa", "cc");
        agg.collect(&md, "n1").unwrap();
        assert!(agg.aggregate().is_empty());
        agg.collect(&md, "n1").unwrap();
        assert!(agg.aggregate().is_empty());
        agg.collect(&md, "n2").unwrap();
        assert_eq!(agg.aggregate(), vec![md]);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(matches!(
            WorkflowMetadataAggregator::new(0, Duration::from_secs(1)),
            Err(AggregationError::InvalidThreshold)
        ));
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 2: VALIDASI INPUT
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_rejects_empty_fields() {
        let agg = WorkflowMetadataAggregator::new(1, Duration::from_secs(60)).unwrap();
        let mut md = metadata("aa", "cc");
        md.workflow_selector.workflow_tag.clear();
        assert!(matches!(agg.collect(&md, "n1"), Err(AggregationError::EmptyField("workflowTag"))));
        assert!(matches!(
            agg.collect(&metadata("aa", "cc"), ""),
            Err(AggregationError::EmptyNodeAddress)
        ));
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 3: URUTAN TERBARU DULU
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_aggregate_newest_first() {
        let agg = WorkflowMetadataAggregator::new(1, Duration::from_secs(60)).unwrap();
        let t0 = Instant::now();
        let older = metadata("aa", "cc");
        let newer = metadata("bb", "cc");
        agg.collect_at(&older, "n1", t0).unwrap();
        agg.collect_at(&newer, "n1", t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(agg.aggregate(), vec![newer, older]);
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 4: REAP
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_reap_drops_stale_reports() {
        let agg = WorkflowMetadataAggregator::new(2, Duration::from_secs(10)).unwrap();
        let t0 = Instant::now();
        let md = metadata("aa", "cc");
        agg.collect_at(&md, "n1", t0).unwrap();
        agg.collect_at(&md, "n2", t0 + Duration::from_secs(8)).unwrap();
        assert_eq!(agg.aggregate().len(), 1);

        // n1 kadaluarsa, n2 belum: quorum hilang, observasi masih ada.
        assert_eq!(agg.reap_at(t0 + Duration::from_secs(15)), 1);
        assert!(agg.aggregate().is_empty());
        assert_eq!(agg.observation_count(), 1);

        assert_eq!(agg.reap_at(t0 + Duration::from_secs(30)), 1);
        assert_eq!(agg.observation_count(), 0);
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 5: LAPORAN BARU MENGGANTIKAN LAPORAN LAMA
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_new_keys_supersede_old_report_from_same_node() {
        let agg = WorkflowMetadataAggregator::new(2, Duration::from_secs(60)).unwrap();
        let v1 = metadata("aa", "cc");
        let v2 = metadata("aa", "dd");
        agg.collect(&v1, "n1").unwrap();
        agg.collect(&v1, "n2").unwrap();
        assert_eq!(agg.aggregate(), vec![v1.clone()]);

        agg.collect(&v2, "n1").unwrap();
        assert!(agg.aggregate().is_empty());
        agg.collect(&v2, "n2").unwrap();
        assert_eq!(agg.aggregate(), vec![v2]);
        assert_eq!(agg.observation_count(), 1);
    }
}
