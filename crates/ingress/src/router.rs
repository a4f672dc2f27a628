//! # Gateway Router
//!
//! Titik masuk tunggal untuk pesan dari node DON dan request dari user.
//!
//! ## Klasifikasi pesan node
//!
//! | ID                                   | Tujuan                         |
//! |--------------------------------------|--------------------------------|
//! | `http_action/<workflowID>/<uuid>`    | Outbound HTTP (async, cached)  |
//! | `workflows.metadata.push/<uuid>`     | Metadata handler               |
//! | `workflows.metadata.pull/<uuid>`     | Metadata handler               |
//! | `<request ID>` (tanpa `/`)           | Trigger handler (quorum)       |
//!
//! Setiap pesan node melewati rate limit dua tier (per sender + global)
//! sebelum diproses. Pesan yang ditolak tidak punya efek samping.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use dongate_common::config::{ServiceConfig, DEFAULT_HTTP_MAX_TIMEOUT_MS};
use dongate_common::RequestAuthenticator;
use dongate_proto::gateway::{
    ID_SEPARATOR, METHOD_HTTP_ACTION, METHOD_PULL_WORKFLOW_METADATA, METHOD_PUSH_WORKFLOW_METADATA,
    METHOD_WORKFLOW_EXECUTE,
};
use dongate_proto::{OutboundHttpRequest, OutboundHttpResponse, Request, Response};

use crate::callback::Callback;
use crate::don::{is_member, Don};
use crate::error::GatewayError;
use crate::http_client::HttpClient;
use crate::lifecycle::Lifecycle;
use crate::metadata_handler::WorkflowMetadataHandler;
use crate::metrics::GatewayMetrics;
use crate::rate_limit::{NodeRateLimiter, TokenBucketWorkflowLimiter, WorkflowRateLimiter};
use crate::response_cache::ResponseCache;
use crate::trigger_handler::HttpTriggerHandler;

pub struct GatewayRouter {
    config: ServiceConfig,
    don: Arc<dyn Don>,
    http_client: Arc<dyn HttpClient>,
    node_limiter: Arc<NodeRateLimiter>,
    cache: Arc<ResponseCache>,
    metadata: Arc<WorkflowMetadataHandler>,
    trigger: Arc<HttpTriggerHandler>,
    metrics: Arc<GatewayMetrics>,
    lifecycle: Arc<Lifecycle>,
}

impl GatewayRouter {
    /// Router dengan workflow limiter token bucket dari config.
    pub fn new(
        config: ServiceConfig,
        don: Arc<dyn Don>,
        http_client: Arc<dyn HttpClient>,
        authenticator: Arc<dyn RequestAuthenticator>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, GatewayError> {
        let config = config.with_defaults();
        let limiter = Arc::new(TokenBucketWorkflowLimiter::new(&config.workflow_rate_limiter));
        Self::with_workflow_limiter(config, don, http_client, authenticator, limiter, metrics)
    }

    pub fn with_workflow_limiter(
        config: ServiceConfig,
        don: Arc<dyn Don>,
        http_client: Arc<dyn HttpClient>,
        authenticator: Arc<dyn RequestAuthenticator>,
        workflow_limiter: Arc<dyn WorkflowRateLimiter>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, GatewayError> {
        let config = config.with_defaults();
        let lifecycle = Arc::new(Lifecycle::new());

        let metadata = Arc::new(WorkflowMetadataHandler::new(
            config.clone(),
            Arc::clone(&don),
            authenticator,
            Arc::clone(&metrics),
            Arc::clone(&lifecycle),
        )?);
        let trigger = Arc::new(HttpTriggerHandler::new(
            config.clone(),
            Arc::clone(&don),
            Arc::clone(&metadata),
            workflow_limiter,
            Arc::clone(&metrics),
            Arc::clone(&lifecycle),
        ));
        let cache = Arc::new(ResponseCache::new(
            config.outbound_request_cache_ttl(),
            Arc::clone(&metrics),
        ));

        Ok(Self {
            node_limiter: Arc::new(NodeRateLimiter::new(&config.node_rate_limiter)),
            config,
            don,
            http_client,
            cache,
            metadata,
            trigger,
            metrics,
            lifecycle,
        })
    }

    /// Method yang ditangani router ini.
    pub fn methods(&self) -> Vec<&'static str> {
        vec![
            METHOD_WORKFLOW_EXECUTE,
            METHOD_PUSH_WORKFLOW_METADATA,
            METHOD_PULL_WORKFLOW_METADATA,
            METHOD_HTTP_ACTION,
        ]
    }

    pub fn metadata_handler(&self) -> &Arc<WorkflowMetadataHandler> {
        &self.metadata
    }

    pub fn trigger_handler(&self) -> &Arc<HttpTriggerHandler> {
        &self.trigger
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    // ════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ════════════════════════════════════════════════════════════════════════

    /// Mulai semua background loop. Panggilan kedua diabaikan.
    pub fn start(&self) {
        if !self.lifecycle.mark_started() {
            warn!("gateway router already started");
            return;
        }

        let cache = Arc::clone(&self.cache);
        let node_limiter = Arc::clone(&self.node_limiter);
        self.lifecycle
            .spawn_ticker("response-cache-cleanup", self.config.clean_up_period(), move || {
                let cache = Arc::clone(&cache);
                let node_limiter = Arc::clone(&node_limiter);
                async move {
                    let evicted = cache.delete_expired();
                    let pruned = node_limiter.prune_idle();
                    debug!(evicted, pruned, "response cache cleanup");
                }
            });

        self.metadata.start();
        self.trigger.start();
        info!(methods = ?self.methods(), "gateway router started");
    }

    /// Hentikan loop dan tunggu outbound HTTP action yang masih berjalan.
    pub async fn close(&self) {
        self.lifecycle.close().await;
        info!("gateway router stopped");
    }

    // ════════════════════════════════════════════════════════════════════════
    // USER REQUESTS
    // ════════════════════════════════════════════════════════════════════════

    /// Teruskan request user ke trigger handler.
    ///
    /// Error sudah dikirim ke `callback`; yang dikembalikan di sini hanya untuk log.
    pub async fn handle_user_request(&self, request: Request, callback: Callback) -> Result<(), GatewayError> {
        let id = request.id.clone();
        let result = self
            .trigger
            .handle_user_trigger_request(request, callback, Instant::now())
            .await;
        if let Err(e) = &result {
            debug!(request_id = %id, error = %e, "user request finished with error");
        }
        result
    }

    // ════════════════════════════════════════════════════════════════════════
    // NODE MESSAGES
    // ════════════════════════════════════════════════════════════════════════

    pub async fn handle_node_message(&self, response: &Response, node: &str) -> Result<(), GatewayError> {
        if response.id.is_empty() {
            return Err(GatewayError::InvalidRequest("empty request ID".to_string()));
        }
        // Hanya anggota DON yang boleh ikut dihitung untuk quorum.
        if !is_member(self.don.as_ref(), node) {
            self.metrics.node_unknown_sender.inc();
            return Err(GatewayError::UnknownNode(node.to_string()));
        }

        let (sender_ok, global_ok) = self.node_limiter.allow_verbose(node);
        if !sender_ok {
            self.metrics.node_throttled_sender.inc();
            return Err(GatewayError::RateLimited(format!("sender {} exceeded rate limit", node)));
        }
        if !global_ok {
            self.metrics.node_throttled_global.inc();
            return Err(GatewayError::RateLimited("global node rate limit exceeded".to_string()));
        }

        let mut parts = response.id.split(ID_SEPARATOR);
        let method = parts.next().unwrap_or_default();
        if !response.id.contains(ID_SEPARATOR) {
            self.metrics.node_messages.inc(&METHOD_WORKFLOW_EXECUTE.to_string());
            return self.trigger.handle_node_trigger_response(response, node);
        }

        self.metrics.node_messages.inc(&method.to_string());
        match method {
            METHOD_HTTP_ACTION => {
                let workflow_id = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| {
                    GatewayError::InvalidRequest(format!(
                        "http action ID must be http_action/<workflowID>/<id>: {}",
                        response.id
                    ))
                })?;
                self.handle_http_action(response, workflow_id.to_string(), node)
            }
            METHOD_PUSH_WORKFLOW_METADATA => self.metadata.on_metadata_push(response, node),
            METHOD_PULL_WORKFLOW_METADATA => self.metadata.on_metadata_pull_response(response, node),
            other => Err(GatewayError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Jadwalkan outbound HTTP call. Kembali segera setelah task di-spawn.
    fn handle_http_action(&self, response: &Response, workflow_id: String, node: &str) -> Result<(), GatewayError> {
        let payload = response
            .result
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidRequest("empty http action payload".to_string()))?;
        let request: OutboundHttpRequest = serde_json::from_value(payload.clone())
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to unmarshal HTTP request: {}", e)))?;

        let timeout = Duration::from_millis(if request.timeout_ms == 0 {
            DEFAULT_HTTP_MAX_TIMEOUT_MS
        } else {
            request.timeout_ms
        });
        let id = response.id.clone();
        let node = node.to_string();
        let client = Arc::clone(&self.http_client);
        let cache = Arc::clone(&self.cache);
        let don = Arc::clone(&self.don);
        let metrics = Arc::clone(&self.metrics);

        self.metrics.http_actions.inc();
        self.lifecycle.spawn(async move {
            let call = async {
                let fetch = || execute_outbound(client.as_ref(), &request, &metrics);
                if request.cache_settings.max_age_ms == 0 {
                    let fresh = fetch().await;
                    if request.cache_settings.store {
                        cache.set(&workflow_id, &request, &fresh);
                    }
                    fresh
                } else {
                    cache
                        .fetch(&workflow_id, &request, fetch, request.cache_settings.store)
                        .await
                }
            };
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(r) => r,
                Err(_) => {
                    metrics.http_action_failures.inc();
                    OutboundHttpResponse {
                        error_message: format!("outbound request timed out after {:?}", timeout),
                        is_external_endpoint_error: true,
                        external_endpoint_latency: timeout,
                        ..Default::default()
                    }
                }
            };

            let params = match serde_json::to_value(&outcome) {
                Ok(v) => v,
                Err(e) => {
                    error!(request_id = %id, error = %e, "failed to marshal http action response");
                    return;
                }
            };
            let reply = Request::new(id.clone(), METHOD_HTTP_ACTION, Some(params));
            if let Err(e) = don.send_to_node(&node, &reply).await {
                error!(request_id = %id, node = %node, error = %e, "failed to send http action response");
            }
        });
        Ok(())
    }
}

/// Panggil endpoint dan bungkus hasilnya sebagai `OutboundHttpResponse`.
async fn execute_outbound(
    client: &dyn HttpClient,
    request: &OutboundHttpRequest,
    metrics: &GatewayMetrics,
) -> OutboundHttpResponse {
    let started = Instant::now();
    let result = client.send(request).await;
    let latency = started.elapsed();
    metrics.http_action_latency.observe(latency.as_millis() as u64);

    match result {
        Ok(resp) => OutboundHttpResponse {
            status_code: resp.status_code,
            headers: resp.headers,
            body: resp.body,
            external_endpoint_latency: latency,
            ..Default::default()
        },
        Err(e) => {
            metrics.http_action_failures.inc();
            warn!(url = %request.url, error = %e, "outbound http request failed");
            OutboundHttpResponse {
                error_message: e.to_string(),
                is_external_endpoint_error: e.is_external_endpoint_error(),
                external_endpoint_latency: latency,
                ..Default::default()
            }
        }
    }
}
