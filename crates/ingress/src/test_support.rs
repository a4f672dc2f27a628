//! Helper bersama untuk unit test handler dan router.

use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::SigningKey;
use serde_json::{json, Value};

use dongate_common::auth::{evm_address, sign_request};
use dongate_common::config::{RetryConfig, ServiceConfig};
use dongate_common::validation::workflow_name_hash;
use dongate_common::{EthJwtAuthenticator, RequestAuthenticator};
use dongate_proto::gateway::{request_id, METHOD_PUSH_WORKFLOW_METADATA, METHOD_WORKFLOW_EXECUTE};
use dongate_proto::{AuthorizedKey, Request, Response, WorkflowMetadata, WorkflowSelector};

pub const OWNER: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn address(key: &SigningKey) -> String {
    evm_address(key.verifying_key())
}

/// `0x` + 32 kali `byte`.
pub fn workflow_id(byte: &str) -> String {
    format!("0x{}", byte.repeat(32))
}

pub fn authenticator() -> Arc<dyn RequestAuthenticator> {
    Arc::new(EthJwtAuthenticator::new())
}

/// Default config dengan retry cepat.
pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        retry: RetryConfig {
            initial_interval_ms: 10,
            max_interval_time_ms: 50,
            multiplier: 2.0,
        },
        max_trigger_request_duration_ms: 2_000,
        ..Default::default()
    }
    .with_defaults()
}

pub fn metadata(workflow_id: &str, name: &str, tag: &str, keys: &[&str]) -> WorkflowMetadata {
    WorkflowMetadata {
        workflow_selector: WorkflowSelector {
            workflow_id: workflow_id.to_string(),
            workflow_owner: OWNER.to_string(),
            workflow_name: workflow_name_hash(name),
            workflow_tag: tag.to_string(),
        },
        authorized_keys: keys.iter().map(|k| AuthorizedKey::evm(*k)).collect(),
    }
}

pub fn push_response(md: &WorkflowMetadata) -> Response {
    Response::with_result(
        request_id(METHOD_PUSH_WORKFLOW_METADATA),
        serde_json::to_value(md).unwrap(),
    )
}

pub fn selector_by_id(workflow_id: &str) -> Value {
    json!({ "workflowID": workflow_id })
}

pub fn signed_trigger(id: &str, workflow: Value, input: Value, key: &SigningKey, jti: &str) -> Request {
    let mut req = Request::new(
        id,
        METHOD_WORKFLOW_EXECUTE,
        Some(json!({ "workflow": workflow, "input": input })),
    );
    req.auth = sign_request(&req, key, jti, Duration::from_secs(60)).unwrap();
    req
}
