//! # Workflow Metadata Handler
//!
//! Mempelajari dari DON signer mana yang boleh men-trigger workflow mana.
//!
//! ## Alur
//!
//! ```text
//! node ──push/pull response──▶ validate (semua item) ──▶ aggregator (F+1)
//!                                                           │
//!                                  sync periodik ◀──────────┘
//!                                       │
//!                                       ▼
//!                 id_to_ref / ref_to_id / authorized_keys (swap atomik)
//! ```
//!
//! ## Prinsip
//!
//! - Satu item invalid menolak seluruh push atau pull response.
//! - Tabel lookup diganti utuh di bawah satu write lock.
//! - Duplikat workflow ID atau reference dalam satu sync: yang pertama menang.
//! - `jti` dicatat hanya setelah signer terbukti berwenang.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use dongate_common::auth::{CLOCK_SKEW, MAX_TOKEN_LIFETIME};
use dongate_common::config::ServiceConfig;
use dongate_common::validation::validate_metadata;
use dongate_common::RequestAuthenticator;
use dongate_proto::gateway::{request_id, METHOD_PULL_WORKFLOW_METADATA};
use dongate_proto::{AuthorizedKey, Request, Response, WorkflowMetadata, WorkflowSelector};

use crate::aggregation::WorkflowMetadataAggregator;
use crate::don::{is_member, metadata_threshold, Don};
use crate::error::GatewayError;
use crate::lifecycle::Lifecycle;
use crate::metrics::GatewayMetrics;
use crate::replay_cache::ReplayCache;

/// Identitas workflow yang disusun manusia: owner + name hash + tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowReference {
    pub owner: String,
    pub name_hash: String,
    pub tag: String,
}

impl WorkflowReference {
    fn from_selector(sel: &WorkflowSelector) -> Self {
        Self {
            owner: sel.workflow_owner.clone(),
            name_hash: sel.workflow_name.clone(),
            tag: sel.workflow_tag.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    id_to_ref: HashMap<String, WorkflowReference>,
    ref_to_id: HashMap<WorkflowReference, String>,
    authorized_keys: HashMap<String, HashSet<AuthorizedKey>>,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Push,
    Pull,
}

pub struct WorkflowMetadataHandler {
    config: ServiceConfig,
    don: Arc<dyn Don>,
    authenticator: Arc<dyn RequestAuthenticator>,
    aggregator: WorkflowMetadataAggregator,
    replay: ReplayCache,
    tables: RwLock<Tables>,
    metrics: Arc<GatewayMetrics>,
    lifecycle: Arc<Lifecycle>,
}

impl WorkflowMetadataHandler {
    pub fn new(
        config: ServiceConfig,
        don: Arc<dyn Don>,
        authenticator: Arc<dyn RequestAuthenticator>,
        metrics: Arc<GatewayMetrics>,
        lifecycle: Arc<Lifecycle>,
    ) -> Result<Self, GatewayError> {
        // Laporan node harus bertahan minimal dua putaran pull.
        let expiry = config
            .metadata_aggregation_interval()
            .max(config.metadata_pull_interval() * 2);
        let aggregator = WorkflowMetadataAggregator::new(metadata_threshold(don.f()), expiry)?;
        // `jti` harus diingat selama token masih bisa lolos verifikasi.
        let replay = ReplayCache::new(config.clean_up_period().max(MAX_TOKEN_LIFETIME + CLOCK_SKEW));
        Ok(Self {
            config,
            don,
            authenticator,
            aggregator,
            replay,
            tables: RwLock::new(Tables::default()),
            metrics,
            lifecycle,
        })
    }

    /// Mulai loop pull, sync, reap aggregator, dan cleanup replay cache.
    pub fn start(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        self.lifecycle.spawn(async move { handler.pull_metadata().await });

        let handler = Arc::clone(self);
        self.lifecycle
            .spawn_ticker("metadata-pull", self.config.metadata_pull_interval(), move || {
                let handler = Arc::clone(&handler);
                async move { handler.pull_metadata().await }
            });

        let handler = Arc::clone(self);
        self.lifecycle.spawn_ticker(
            "metadata-sync",
            self.config.metadata_aggregation_interval(),
            move || {
                let handler = Arc::clone(&handler);
                async move {
                    handler.aggregator.reap_expired();
                    handler.sync_metadata();
                }
            },
        );

        let handler = Arc::clone(self);
        self.lifecycle
            .spawn_ticker("replay-cache-cleanup", self.config.clean_up_period(), move || {
                let handler = Arc::clone(&handler);
                async move {
                    let removed = handler.replay.delete_expired();
                    if removed > 0 {
                        debug!(removed, "evicted expired replay entries");
                    }
                }
            });
    }

    // ════════════════════════════════════════════════════════════════════════
    // LOOKUP
    // ════════════════════════════════════════════════════════════════════════

    pub fn get_workflow_id(&self, reference: &WorkflowReference) -> Option<String> {
        self.tables.read().ref_to_id.get(reference).cloned()
    }

    pub fn get_workflow_reference(&self, workflow_id: &str) -> Option<WorkflowReference> {
        self.tables.read().id_to_ref.get(workflow_id).cloned()
    }

    pub fn workflow_count(&self) -> usize {
        self.tables.read().id_to_ref.len()
    }

    // ════════════════════════════════════════════════════════════════════════
    // AUTHORIZATION
    // ════════════════════════════════════════════════════════════════════════

    /// Verifikasi token request dan pastikan signer berwenang untuk workflow.
    pub fn authorize(&self, workflow_id: &str, request: &Request) -> Result<AuthorizedKey, GatewayError> {
        let token = self.authenticator.authenticate(request)?;
        if self.replay.contains(&token.jti) {
            self.metrics.replay_rejected.inc();
            return Err(GatewayError::Replay);
        }

        let key = AuthorizedKey::evm(token.signer.clone());
        let allowed = self
            .tables
            .read()
            .authorized_keys
            .get(workflow_id)
            .map(|keys| keys.contains(&key))
            .unwrap_or(false);
        if !allowed {
            return Err(GatewayError::Unauthorized(format!(
                "signer {} is not authorized for workflow {}",
                token.signer, workflow_id
            )));
        }

        if !self.replay.try_record(&token.jti) {
            self.metrics.replay_rejected.inc();
            return Err(GatewayError::Replay);
        }
        Ok(key)
    }

    // ════════════════════════════════════════════════════════════════════════
    // NODE MESSAGES
    // ════════════════════════════════════════════════════════════════════════

    pub fn on_metadata_push(&self, response: &Response, node: &str) -> Result<(), GatewayError> {
        self.collect(response, node, Source::Push)
    }

    pub fn on_metadata_pull_response(&self, response: &Response, node: &str) -> Result<(), GatewayError> {
        self.collect(response, node, Source::Pull)
    }

    fn collect(&self, response: &Response, node: &str, source: Source) -> Result<(), GatewayError> {
        if !is_member(self.don.as_ref(), node) {
            return Err(GatewayError::UnknownNode(node.to_string()));
        }
        if let Some(err) = &response.error {
            return Err(GatewayError::NodeError(err.to_string()));
        }
        let result = response
            .result
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidRequest("empty metadata result".to_string()))?;
        let items = parse_metadata_items(result)?;

        for item in &items {
            validate_metadata(item)?;
        }

        let errors: Vec<String> = items
            .iter()
            .filter_map(|item| self.aggregator.collect(item, node).err())
            .map(|e| e.to_string())
            .collect();

        match source {
            Source::Push => self.metrics.metadata_pushes.inc(),
            Source::Pull => self.metrics.metadata_pull_responses.inc(),
        }
        debug!(node = %node, items = items.len(), ?source, "collected workflow metadata");

        if !errors.is_empty() {
            return Err(GatewayError::Internal(errors.join("; ")));
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // PULL & SYNC
    // ════════════════════════════════════════════════════════════════════════

    /// Broadcast pull request ke semua node. Tanpa retry.
    pub async fn pull_metadata(&self) {
        let request = Arc::new(Request::new(
            request_id(METHOD_PULL_WORKFLOW_METADATA),
            METHOD_PULL_WORKFLOW_METADATA,
            None,
        ));
        let timeout = self.config.metadata_pull_request_timeout();

        let mut sends = JoinSet::new();
        for node in self.don.members() {
            let don = Arc::clone(&self.don);
            let request = Arc::clone(&request);
            sends.spawn(async move {
                match tokio::time::timeout(timeout, don.send_to_node(&node, &request)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("timed out sending to node {}", node)),
                }
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(Some(e)) => errors.push(e),
                Ok(None) => {}
                Err(e) => errors.push(e.to_string()),
            }
        }

        self.metrics.metadata_pulls_sent.inc();
        if !errors.is_empty() {
            self.metrics.metadata_pull_errors.inc_by(errors.len() as u64);
            warn!(request_id = %request.id, errors = %errors.join("; "), "metadata pull failed for some nodes");
        }
    }

    /// Ganti tabel lookup dengan observasi yang sudah quorum.
    pub fn sync_metadata(&self) -> usize {
        let mut next = Tables::default();
        for md in self.aggregator.aggregate() {
            let id = md.workflow_selector.workflow_id.clone();
            let reference = WorkflowReference::from_selector(&md.workflow_selector);
            if next.id_to_ref.contains_key(&id) || next.ref_to_id.contains_key(&reference) {
                warn!(workflow_id = %id, "duplicate workflow in metadata sync, keeping first");
                continue;
            }
            next.id_to_ref.insert(id.clone(), reference.clone());
            next.ref_to_id.insert(reference, id.clone());
            next.authorized_keys
                .insert(id, md.authorized_keys.into_iter().collect());
        }

        let count = next.id_to_ref.len();
        *self.tables.write() = next;
        self.metrics.metadata_workflows.set(count as u64);
        info!(workflows = count, "workflow metadata synced");
        count
    }
}

/// Result berupa satu object atau array of object.
fn parse_metadata_items(result: &Value) -> Result<Vec<WorkflowMetadata>, GatewayError> {
    let parsed = match result {
        Value::Array(_) => serde_json::from_value::<Vec<WorkflowMetadata>>(result.clone()),
        _ => serde_json::from_value::<WorkflowMetadata>(result.clone()).map(|m| vec![m]),
    };
    parsed.map_err(|e| GatewayError::InvalidRequest(format!("failed to unmarshal workflow metadata: {}", e)))
}
