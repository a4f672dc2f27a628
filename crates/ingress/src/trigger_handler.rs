//! # HTTP Trigger Handler
//!
//! Menerima trigger `workflows.execute` dari user, meneruskannya ke
//! semua node DON, dan mengirim balik response begitu cukup node
//! menjawab identik.
//!
//! ## Alur
//!
//! ```text
//! user request
//!   │ validate → resolve workflow → authorize → rate limit
//!   ▼
//! register callback (request ID unik)
//!   │
//!   ▼
//! broadcast + retry ──▶ node response ──▶ aggregator
//!                                            │ quorum
//!                                            ▼
//!                                   callback (sekali saja)
//! ```
//!
//! Callback yang tidak pernah quorum dibuang oleh reaper setelah
//! `max_trigger_request_duration`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dongate_common::config::ServiceConfig;
use dongate_common::validation::{
    execution_id, normalize_hex, validate_selector, workflow_name_hash, WORKFLOW_ID_LEN,
    WORKFLOW_OWNER_LEN,
};
use dongate_proto::gateway::{ID_SEPARATOR, METHOD_WORKFLOW_EXECUTE};
use dongate_proto::{HttpTriggerRequest, Request, Response, WorkflowSelector, JSONRPC_VERSION};

use crate::aggregation::IdenticalResponseAggregator;
use crate::callback::{Callback, UserCallbackPayload};
use crate::don::{is_member, trigger_threshold, Don};
use crate::error::GatewayError;
use crate::lifecycle::Lifecycle;
use crate::metadata_handler::{WorkflowMetadataHandler, WorkflowReference};
use crate::metrics::GatewayMetrics;
use crate::rate_limit::WorkflowRateLimiter;
use crate::retry::{send_to_all_with_retry, Backoff};

struct SavedCallback {
    callback: Callback,
    request_start: Instant,
    created_at: Instant,
    aggregator: IdenticalResponseAggregator,
    workflow_id: String,
}

/// Hasil validasi request yang siap di-broadcast.
struct PreparedTrigger {
    workflow_id: String,
    execution_id: String,
    outgoing: Request,
}

pub struct HttpTriggerHandler {
    config: ServiceConfig,
    don: Arc<dyn Don>,
    metadata: Arc<WorkflowMetadataHandler>,
    limiter: Arc<dyn WorkflowRateLimiter>,
    callbacks: Mutex<HashMap<String, SavedCallback>>,
    metrics: Arc<GatewayMetrics>,
    lifecycle: Arc<Lifecycle>,
}

impl HttpTriggerHandler {
    pub fn new(
        config: ServiceConfig,
        don: Arc<dyn Don>,
        metadata: Arc<WorkflowMetadataHandler>,
        limiter: Arc<dyn WorkflowRateLimiter>,
        metrics: Arc<GatewayMetrics>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            config,
            don,
            metadata,
            limiter,
            callbacks: Mutex::new(HashMap::new()),
            metrics,
            lifecycle,
        }
    }

    pub fn start(self: &Arc<Self>) {
        let handler = Arc::clone(self);
        self.lifecycle
            .spawn_ticker("trigger-callback-reaper", self.config.clean_up_period(), move || {
                let handler = Arc::clone(&handler);
                async move {
                    handler.reap_expired_callbacks();
                    handler.limiter.prune();
                }
            });
    }

    /// Jumlah callback yang masih menunggu quorum.
    pub fn pending(&self) -> usize {
        self.callbacks.lock().len()
    }

    // ════════════════════════════════════════════════════════════════════════
    // USER SIDE
    // ════════════════════════════════════════════════════════════════════════

    /// Proses trigger dari user.
    ///
    /// Semua error sebelum broadcast langsung dikirim ke `callback`.
    /// Error broadcast hanya dikirim jika request belum quorum.
    pub async fn handle_user_trigger_request(
        &self,
        request: Request,
        callback: Callback,
        request_start: Instant,
    ) -> Result<(), GatewayError> {
        self.metrics.trigger_requests.inc();

        let prepared = match self.prepare(&request) {
            Ok(p) => p,
            Err(e) => {
                self.reject(&request.id, callback, &e);
                return Err(e);
            }
        };

        let threshold = trigger_threshold(self.don.members().len(), self.don.f());
        let aggregator = match IdenticalResponseAggregator::new(threshold) {
            Ok(a) => a,
            Err(e) => {
                let e = GatewayError::from(e);
                self.reject(&request.id, callback, &e);
                return Err(e);
            }
        };

        let rejected = {
            let mut callbacks = self.callbacks.lock();
            if callbacks.contains_key(&request.id) {
                Some(callback)
            } else {
                callbacks.insert(
                    request.id.clone(),
                    SavedCallback {
                        callback,
                        request_start,
                        created_at: Instant::now(),
                        aggregator,
                        workflow_id: prepared.workflow_id.clone(),
                    },
                );
                self.metrics.callbacks_pending.set(callbacks.len() as u64);
                None
            }
        };
        if let Some(callback) = rejected {
            let e = GatewayError::Conflict(request.id.clone());
            self.reject(&request.id, callback, &e);
            return Err(e);
        }

        info!(
            request_id = %request.id,
            workflow_id = %prepared.workflow_id,
            execution_id = %prepared.execution_id,
            threshold,
            "trigger request accepted"
        );

        let outgoing = Arc::new(prepared.outgoing);
        let result = send_to_all_with_retry(
            Arc::clone(&self.don),
            outgoing,
            self.config.max_trigger_request_duration(),
            Backoff::from_config(&self.config.retry),
        )
        .await;

        if let Err(e) = result {
            let saved = self.callbacks.lock().remove(&request.id);
            match saved {
                Some(saved) => self.reject(&request.id, saved.callback, &e),
                None => debug!(request_id = %request.id, "broadcast deadline passed after request resolved"),
            }
            return Err(e);
        }
        Ok(())
    }

    fn prepare(&self, request: &Request) -> Result<PreparedTrigger, GatewayError> {
        if request.id.is_empty() {
            return Err(GatewayError::InvalidRequest("request ID must not be empty".to_string()));
        }
        if request.id.contains(ID_SEPARATOR) {
            return Err(GatewayError::InvalidRequest(format!(
                "request ID must not contain '{}'",
                ID_SEPARATOR
            )));
        }
        if request.method != METHOD_WORKFLOW_EXECUTE {
            return Err(GatewayError::UnsupportedMethod(request.method.clone()));
        }

        let params = request
            .params
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidRequest("params are required".to_string()))?;
        let mut trigger: HttpTriggerRequest = serde_json::from_value(params.clone())
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        if !(trigger.input.is_object() || trigger.input.is_array()) {
            return Err(GatewayError::InvalidRequest(
                "input must be a JSON object or array".to_string(),
            ));
        }
        validate_selector(&trigger.workflow)?;

        let workflow_id = self.resolve_workflow_id(&trigger.workflow)?;
        let key = self.metadata.authorize(&workflow_id, request)?;

        let owner = self
            .metadata
            .get_workflow_reference(&workflow_id)
            .map(|r| r.owner)
            .unwrap_or_default();
        if let Err(e) = self.limiter.allow(&owner, &workflow_id) {
            self.metrics.workflow_throttled.inc();
            return Err(GatewayError::RateLimited(e.to_string()));
        }

        let execution_id = execution_id(&workflow_id, &request.id);

        trigger.workflow.workflow_id = workflow_id.clone();
        trigger.key = Some(key);
        let outgoing = Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id.clone(),
            method: request.method.clone(),
            params: Some(serde_json::to_value(&trigger).map_err(|e| {
                GatewayError::Internal(format!("failed to marshal trigger request: {}", e))
            })?),
            auth: String::new(),
        };

        Ok(PreparedTrigger {
            workflow_id,
            execution_id,
            outgoing,
        })
    }

    /// Workflow ID kanonik dari selector: ID langsung, atau owner + name + tag.
    fn resolve_workflow_id(&self, selector: &WorkflowSelector) -> Result<String, GatewayError> {
        if !selector.workflow_id.is_empty() {
            let id = normalize_hex(&selector.workflow_id, WORKFLOW_ID_LEN);
            return match self.metadata.get_workflow_reference(&id) {
                Some(_) => Ok(id),
                None => Err(GatewayError::WorkflowNotFound),
            };
        }

        let reference = WorkflowReference {
            owner: normalize_hex(&selector.workflow_owner, WORKFLOW_OWNER_LEN),
            name_hash: workflow_name_hash(&selector.workflow_name),
            tag: selector.workflow_tag.clone(),
        };
        self.metadata
            .get_workflow_id(&reference)
            .ok_or(GatewayError::WorkflowNotFound)
    }

    fn reject(&self, id: &str, callback: Callback, err: &GatewayError) {
        self.metrics.trigger_errors.inc(&err.code());
        warn!(request_id = %id, code = err.code(), error = %err, "trigger request failed");
        callback.send_error(id, err);
    }

    // ════════════════════════════════════════════════════════════════════════
    // NODE SIDE
    // ════════════════════════════════════════════════════════════════════════

    /// Catat response node. Callback dipanggil tepat sekali saat quorum.
    pub fn handle_node_trigger_response(&self, response: &Response, node: &str) -> Result<(), GatewayError> {
        if !is_member(self.don.as_ref(), node) {
            return Err(GatewayError::UnknownNode(node.to_string()));
        }
        let resolved = {
            let mut callbacks = self.callbacks.lock();
            let saved = callbacks
                .get_mut(&response.id)
                .ok_or_else(|| GatewayError::CallbackNotFound(response.id.clone()))?;
            match saved.aggregator.collect(response, node)? {
                Some(agreed) => {
                    let saved = callbacks.remove(&response.id);
                    self.metrics.callbacks_pending.set(callbacks.len() as u64);
                    saved.map(|s| (s, agreed))
                }
                None => None,
            }
        };

        let Some((saved, agreed)) = resolved else {
            debug!(request_id = %response.id, node = %node, "node response collected");
            return Ok(());
        };

        let elapsed = saved.request_start.elapsed();
        self.metrics.trigger_quorum_reached.inc();
        self.metrics.trigger_latency.observe(elapsed.as_millis() as u64);
        info!(
            request_id = %response.id,
            workflow_id = %saved.workflow_id,
            latency_ms = elapsed.as_millis() as u64,
            "trigger response reached quorum"
        );

        match UserCallbackPayload::from_response(&agreed) {
            Ok(payload) => saved.callback.send(payload),
            Err(e) => saved.callback.send_error(&response.id, &e),
        }
        Ok(())
    }

    /// Buang callback yang lebih tua dari batas durasi trigger tanpa mengirim apa pun.
    pub fn reap_expired_callbacks(&self) -> usize {
        let max_age = self.config.max_trigger_request_duration();
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|id, saved| {
            let keep = saved.created_at.elapsed() <= max_age;
            if !keep {
                debug!(request_id = %id, workflow_id = %saved.workflow_id, "reaping expired callback");
            }
            keep
        });
        let removed = before - callbacks.len();
        self.metrics.callbacks_pending.set(callbacks.len() as u64);
        self.metrics.callbacks_reaped.inc_by(removed as u64);
        removed
    }
}
