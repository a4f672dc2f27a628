//! # Gateway Payloads
//!
//! Payload yang dibawa di dalam envelope JSON-RPC untuk setiap method
//! gateway: trigger workflow, outbound HTTP action, dan workflow metadata.
//!
//! ## Semantik
//!
//! - `OutboundHttpRequest::hash()` adalah cache key. `cacheSettings` dan
//!   `workflowId` sengaja tidak ikut, sehingga request identik dari
//!   workflow berbeda berbagi entry cache.
//! - `WorkflowMetadata::digest()` tidak bergantung pada urutan
//!   authorized keys.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoding::{base64_bytes, canonical_digest, duration_nanos};
use crate::ProtoError;

// ════════════════════════════════════════════════════════════════════════════
// METHODS
// ════════════════════════════════════════════════════════════════════════════

pub const METHOD_WORKFLOW_EXECUTE: &str = "workflows.execute";
pub const METHOD_HTTP_ACTION: &str = "http_action";
pub const METHOD_PUSH_WORKFLOW_METADATA: &str = "workflows.metadata.push";
pub const METHOD_PULL_WORKFLOW_METADATA: &str = "workflows.metadata.pull";

/// Separator antara method dan correlation token di node-routed IDs.
pub const ID_SEPARATOR: char = '/';

/// ID untuk request yang diinisiasi gateway: `"<method>/<uuid v4>"`.
pub fn request_id(method: &str) -> String {
    format!("{}{}{}", method, ID_SEPARATOR, uuid::Uuid::new_v4())
}

// ════════════════════════════════════════════════════════════════════════════
// WORKFLOW IDENTITY
// ════════════════════════════════════════════════════════════════════════════

/// Selector workflow: by ID, atau by owner + name + tag.
///
/// Field kosong berarti tidak diisi.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowSelector {
    #[serde(rename = "workflowID", default, skip_serializing_if = "String::is_empty")]
    pub workflow_id: String,
    #[serde(rename = "workflowOwner", default, skip_serializing_if = "String::is_empty")]
    pub workflow_owner: String,
    #[serde(rename = "workflowName", default, skip_serializing_if = "String::is_empty")]
    pub workflow_name: String,
    #[serde(rename = "workflowTag", default, skip_serializing_if = "String::is_empty")]
    pub workflow_tag: String,
}

/// Tipe key yang boleh men-trigger workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    /// Alamat EVM 20-byte dari secp256k1 public key.
    #[serde(rename = "ecdsa_evm")]
    EcdsaEvm,
}

/// Signer yang diizinkan untuk satu workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizedKey {
    #[serde(rename = "keyType")]
    pub key_type: KeyType,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

impl AuthorizedKey {
    /// Membuat EVM authorized key.
    pub fn evm(address: impl Into<String>) -> Self {
        Self {
            key_type: KeyType::EcdsaEvm,
            public_key: address.into(),
        }
    }
}

/// Unit agreement yang di-push/pull dari node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(rename = "workflowSelector")]
    pub workflow_selector: WorkflowSelector,
    #[serde(rename = "authorizedKeys", default)]
    pub authorized_keys: Vec<AuthorizedKey>,
}

impl WorkflowMetadata {
    /// Digest konten metadata. Authorized keys di-sort dan di-dedup dulu.
    pub fn digest(&self) -> Result<String, ProtoError> {
        let mut keys = self.authorized_keys.clone();
        keys.sort();
        keys.dedup();
        canonical_digest(&WorkflowMetadata {
            workflow_selector: self.workflow_selector.clone(),
            authorized_keys: keys,
        })
    }
}

/// Params untuk `workflows.execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTriggerRequest {
    pub workflow: WorkflowSelector,
    #[serde(default)]
    pub input: Value,
    /// Diisi gateway setelah otorisasi, sebelum broadcast ke node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<AuthorizedKey>,
}

// ════════════════════════════════════════════════════════════════════════════
// OUTBOUND HTTP
// ════════════════════════════════════════════════════════════════════════════

/// Cache directives dari node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub store: bool,
    /// Umur maksimum entry cache yang masih boleh dipakai. 0 = jangan baca cache.
    #[serde(rename = "maxAgeMs", default)]
    pub max_age_ms: u64,
}

/// Instruksi node untuk melakukan HTTP call atas nama workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundHttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(rename = "timeoutMs", default)]
    pub timeout_ms: u64,
    #[serde(rename = "maxResponseBytes", default)]
    pub max_response_bytes: u64,
    #[serde(rename = "cacheSettings", default)]
    pub cache_settings: CacheSettings,
    #[serde(rename = "workflowId", default, skip_serializing_if = "String::is_empty")]
    pub workflow_id: String,
    #[serde(rename = "workflowOwner", default, skip_serializing_if = "String::is_empty")]
    pub workflow_owner: String,
}

impl OutboundHttpRequest {
    /// Cache key: digest tanpa `cacheSettings` dan `workflowId`.
    pub fn hash(&self) -> Result<String, ProtoError> {
        let keyed = OutboundHttpRequest {
            cache_settings: CacheSettings::default(),
            workflow_id: String::new(),
            ..self.clone()
        };
        canonical_digest(&keyed)
    }
}

/// Hasil HTTP call yang dikirim balik ke node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundHttpResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(rename = "isExternalEndpointError", default)]
    pub is_external_endpoint_error: bool,
    #[serde(rename = "externalEndpointLatency", default, with = "duration_nanos")]
    pub external_endpoint_latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> OutboundHttpRequest {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        OutboundHttpRequest {
            method: "POST".to_string(),
            url: "https://example.com/api".to_string(),
            headers,
            body: br#"{"a":1}"#.to_vec(),
            timeout_ms: 5000,
            max_response_bytes: 0,
            cache_settings: CacheSettings { store: true, max_age_ms: 1000 },
            workflow_id: "0x01".to_string(),
            workflow_owner: "0xowner".to_string(),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 1: HASH INVARIANT TERHADAP CACHE SETTINGS DAN WORKFLOW ID
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_hash_ignores_cache_settings_and_workflow_id() {
        let a = sample_request();
        let mut b = a.clone();
        b.cache_settings = CacheSettings { store: false, max_age_ms: 0 };
        b.workflow_id = "0x02".to_string();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 2: HASH BERUBAH JIKA KONTEN BERUBAH
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_hash_changes_with_content() {
        let base = sample_request().hash().unwrap();

        let mut m = sample_request();
        m.method = "GET".to_string();
        assert_ne!(base, m.hash().unwrap());

        let mut u = sample_request();
        u.url = "https://example.com/other".to_string();
        assert_ne!(base, u.hash().unwrap());

        let mut h = sample_request();
        h.headers.insert("x-extra".to_string(), "1".to_string());
        assert_ne!(base, h.hash().unwrap());

        let mut b = sample_request();
        b.body = b"other".to_vec();
        assert_ne!(base, b.hash().unwrap());

        let mut o = sample_request();
        o.workflow_owner = "0xsomeoneelse".to_string();
        assert_ne!(base, o.hash().unwrap());
    }

    #[test]
    fn test_body_wire_format_is_base64() {
        let value = serde_json::to_value(sample_request()).unwrap();
        assert_eq!(value["body"], json!("eyJhIjoxfQ=="));
        let back: OutboundHttpRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back.body, br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn test_response_null_body_decodes_empty() {
        let resp: OutboundHttpResponse =
            serde_json::from_value(json!({"statusCode": 204, "body": null})).unwrap();
        assert!(resp.body.is_empty());
        assert_eq!(resp.status_code, 204);
    }

    #[test]
    fn test_metadata_digest_ignores_key_order() {
        let selector = WorkflowSelector {
            workflow_id: "0x01".to_string(),
            ..Default::default()
        };
        let a = WorkflowMetadata {
            workflow_selector: selector.clone(),
            authorized_keys: vec![AuthorizedKey::evm("0xaa"), AuthorizedKey::evm("0xbb")],
        };
        let b = WorkflowMetadata {
            workflow_selector: selector,
            authorized_keys: vec![AuthorizedKey::evm("0xbb"), AuthorizedKey::evm("0xaa")],
        };
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_selector_wire_names() {
        let sel: WorkflowSelector = serde_json::from_value(json!({
            "workflowOwner": "0xab",
            "workflowName": "wf",
            "workflowTag": "v1"
        }))
        .unwrap();
        assert!(sel.workflow_id.is_empty());
        assert_eq!(sel.workflow_owner, "0xab");
        assert_eq!(sel.workflow_name, "wf");
        assert_eq!(sel.workflow_tag, "v1");
    }

    #[test]
    fn test_request_id_format() {
        let id = request_id(METHOD_PULL_WORKFLOW_METADATA);
        let (method, token) = id.split_once(ID_SEPARATOR).unwrap();
        assert_eq!(method, METHOD_PULL_WORKFLOW_METADATA);
        assert_eq!(token.len(), 36);
    }
}
