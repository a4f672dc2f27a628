//! # Outbound HTTP Client
//!
//! Klien untuk HTTP call yang diminta node atas nama workflow.
//!
//! ## Prinsip
//!
//! - Method terbatas: GET, POST, PUT, PATCH, DELETE
//! - Header hop-by-hop dan header yang bisa memalsukan origin ditolak
//! - Redirect tidak diikuti
//! - Timeout dan ukuran response dibatasi; request boleh memperketat, tidak melonggarkan
//!
//! ## Klasifikasi Error
//!
//! Error validasi request adalah kesalahan workflow. Error saat mengirim
//! atau membaca response adalah error external endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method, Url};

use dongate_common::config::HttpClientConfig;
use dongate_proto::OutboundHttpRequest;

const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

const BLOCKED_HEADERS: [&str; 14] = [
    "host",
    "content-length",
    "transfer-encoding",
    "user-agent",
    "upgrade",
    "expect",
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
];

/// Error outbound HTTP.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    #[error("failed to send request: {0}")]
    Send(String),

    #[error("failed to read response: {0}")]
    Read(String),

    #[error("response body exceeds {0} bytes")]
    ResponseTooLarge(u64),

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl HttpClientError {
    /// `true` jika kegagalan berasal dari endpoint tujuan.
    pub fn is_external_endpoint_error(&self) -> bool {
        matches!(
            self,
            HttpClientError::Send(_) | HttpClientError::Read(_) | HttpClientError::ResponseTooLarge(_)
        )
    }
}

/// Response mentah dari endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &OutboundHttpRequest) -> Result<HttpResponse, HttpClientError>;
}

// ════════════════════════════════════════════════════════════════════════════
// REQWEST CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// `HttpClient` berbasis reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl ReqwestHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let config = config.with_defaults();
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| HttpClientError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn timeout_for(&self, request: &OutboundHttpRequest) -> Duration {
        let ms = if request.timeout_ms == 0 {
            self.config.default_timeout_ms
        } else {
            request.timeout_ms.min(self.config.max_timeout_ms)
        };
        Duration::from_millis(ms)
    }

    fn max_bytes_for(&self, request: &OutboundHttpRequest) -> u64 {
        if request.max_response_bytes > 0 {
            request.max_response_bytes.min(self.config.max_response_bytes)
        } else {
            self.config.max_response_bytes
        }
    }

    fn validate(&self, request: &OutboundHttpRequest) -> Result<(Method, Url, HeaderMap), HttpClientError> {
        let upper = request.method.to_uppercase();
        if !ALLOWED_METHODS.contains(&upper.as_str()) {
            return Err(HttpClientError::InvalidRequest(format!(
                "method {} is not allowed",
                request.method
            )));
        }
        let method = Method::from_bytes(upper.as_bytes())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let url = Url::parse(&request.url)
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid url: {}", e)))?;
        if !self.config.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(HttpClientError::InvalidRequest(format!(
                "scheme {} is not allowed",
                url.scheme()
            )));
        }
        if !self.config.allowed_ports.is_empty() {
            let port = url.port_or_known_default().unwrap_or(0);
            if !self.config.allowed_ports.contains(&port) {
                return Err(HttpClientError::InvalidRequest(format!("port {} is not allowed", port)));
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let lower = name.to_lowercase();
            if BLOCKED_HEADERS.contains(&lower.as_str()) {
                return Err(HttpClientError::InvalidRequest(format!("header {} is not allowed", name)));
            }
            let name = HeaderName::from_bytes(lower.as_bytes())
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }
        Ok((method, url, headers))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: &OutboundHttpRequest) -> Result<HttpResponse, HttpClientError> {
        let (method, url, headers) = self.validate(request)?;
        let max_bytes = self.max_bytes_for(request);

        let mut resp = self
            .client
            .request(method, url)
            .headers(headers)
            .body(request.body.clone())
            .timeout(self.timeout_for(request))
            .send()
            .await
            .map_err(|e| HttpClientError::Send(e.to_string()))?;

        let status_code = resp.status().as_u16();
        let mut response_headers = BTreeMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                response_headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(v);
                    })
                    .or_insert_with(|| v.to_string());
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| HttpClientError::Read(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(HttpClientError::ResponseTooLarge(max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status_code,
            headers: response_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> ReqwestHttpClient {
        ReqwestHttpClient::new(HttpClientConfig::default()).unwrap()
    }

    fn get(url: String) -> OutboundHttpRequest {
        OutboundHttpRequest {
            method: "GET".to_string(),
            url,
            ..Default::default()
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 1: REQUEST SUKSES
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_send_success_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .and(header("x-api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-result", "ok")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let mut req = get(format!("{}/api", server.uri()));
        req.method = "post".to_string();
        req.headers.insert("X-Api-Key".to_string(), "secret".to_string());
        req.body = b"payload".to_vec();

        let resp = client().send(&req).await.unwrap();
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.body, b"created".to_vec());
        assert_eq!(resp.headers.get("x-result").map(String::as_str), Some("ok"));
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 2: VALIDASI
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_rejects_disallowed_method_scheme_and_header() {
        let c = client();

        let mut req = get("http://127.0.0.1:1/x".to_string());
        req.method = "TRACE".to_string();
        let err = c.send(&req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
        assert!(!err.is_external_endpoint_error());

        let req = get("ftp://example.com/file".to_string());
        assert!(matches!(c.send(&req).await, Err(HttpClientError::InvalidRequest(_))));

        let mut req = get("http://127.0.0.1:1/x".to_string());
        req.headers.insert("Host".to_string(), "evil".to_string());
        assert!(matches!(c.send(&req).await, Err(HttpClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_rejects_port_outside_allow_list() {
        let c = ReqwestHttpClient::new(HttpClientConfig {
            allowed_ports: vec![443],
            ..Default::default()
        })
        .unwrap();
        let req = get("http://example.com:8080/".to_string());
        assert!(matches!(c.send(&req).await, Err(HttpClientError::InvalidRequest(_))));
    }

    // ════════════════════════════════════════════════════════════════════════
    // TEST 3: BATAS RESPONSE
    // ════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 100]))
            .mount(&server)
            .await;

        let mut req = get(server.uri());
        req.max_response_bytes = 10;
        let err = client().send(&req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ResponseTooLarge(10)));
        assert!(err.is_external_endpoint_error());
    }

    #[tokio::test]
    async fn test_redirect_not_followed_and_5xx_returned() {
        let server = MockServer::start().await;
        Mock::given(path("/redirect"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
            .mount(&server)
            .await;
        Mock::given(path("/boom"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resp = client().send(&get(format!("{}/redirect", server.uri()))).await.unwrap();
        assert_eq!(resp.status_code, 302);
        let resp = client().send(&get(format!("{}/boom", server.uri()))).await.unwrap();
        assert_eq!(resp.status_code, 500);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_external_error() {
        let err = client().send(&get("http://127.0.0.1:1/".to_string())).await.unwrap_err();
        assert!(matches!(err, HttpClientError::Send(_)));
        assert!(err.is_external_endpoint_error());
    }

    #[test]
    fn test_timeout_and_size_caps() {
        let c = client();
        let mut req = get("http://x".to_string());
        assert_eq!(c.timeout_for(&req), Duration::from_millis(5_000));
        req.timeout_ms = 10 * 60 * 1000;
        assert_eq!(c.timeout_for(&req), Duration::from_millis(60_000));
        assert_eq!(c.max_bytes_for(&req), 26_400);
        req.max_response_bytes = 1_000_000;
        assert_eq!(c.max_bytes_for(&req), 26_400);
        req.max_response_bytes = 100;
        assert_eq!(c.max_bytes_for(&req), 100);
    }
}
