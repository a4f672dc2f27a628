//! In-memory DON untuk testing dan local development.
//!
//! Semua request yang terkirim disimpan di outbox. Node bisa diatur agar
//! gagal N kali berturut-turut atau selalu gagal.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use dongate_proto::Request;

use crate::don::{Don, DonError};

#[derive(Debug, Default)]
pub struct MockDon {
    members: Vec<String>,
    f: usize,
    outbox: Mutex<Vec<(String, Request)>>,
    /// Sisa kegagalan per node. `usize::MAX` = selalu gagal.
    failures: Mutex<HashMap<String, usize>>,
}

impl MockDon {
    pub fn new(members: &[&str], f: usize) -> Self {
        Self {
            members: members.iter().map(|m| m.to_string()).collect(),
            f,
            ..Default::default()
        }
    }

    /// Node gagal `times` kali sebelum sukses.
    pub fn fail_node(&self, node: &str, times: usize) {
        self.failures.lock().insert(node.to_string(), times);
    }

    pub fn fail_node_always(&self, node: &str) {
        self.fail_node(node, usize::MAX);
    }

    /// Semua request yang berhasil terkirim, urut kirim.
    pub fn sent(&self) -> Vec<(String, Request)> {
        self.outbox.lock().clone()
    }

    pub fn sent_to(&self, node: &str) -> Vec<Request> {
        self.outbox
            .lock()
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.outbox.lock().clear();
    }
}

#[async_trait]
impl Don for MockDon {
    fn members(&self) -> Vec<String> {
        self.members.clone()
    }

    fn f(&self) -> usize {
        self.f
    }

    async fn send_to_node(&self, node: &str, request: &Request) -> Result<(), DonError> {
        if !self.members.iter().any(|m| m == node) {
            return Err(DonError::UnknownNode(node.to_string()));
        }
        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(node) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(DonError::Transport {
                        node: node.to_string(),
                        reason: "injected failure".to_string(),
                    });
                }
            }
        }
        self.outbox.lock().push((node.to_string(), request.clone()));
        Ok(())
    }
}
