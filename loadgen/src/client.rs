use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use http_test_util::drain::DrainBodyFuture;
use hyper::header::CONTENT_LENGTH;
use hyper::{HeaderMap, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::RequestError;
use crate::request::RequestSpec;

/// Responses larger than this are reported as transport errors.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A fully received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }
}

/// Issues one request and returns the whole response.
///
/// Implementations do not enforce the request timeout themselves; the worker
/// bounds every call by [`RequestSpec::timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, spec: &RequestSpec) -> Result<HttpResponse, RequestError>;
}

/// Pooled HTTP/1 client shared by all workers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn issue(&self, spec: &RequestSpec) -> Result<HttpResponse, RequestError> {
        let resp = self
            .client
            .request(spec.to_request())
            .await
            .map_err(|e| RequestError::Transport(error_chain(&e)))?;
        let (parts, body) = resp.into_parts();
        let content_length: usize = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|hv| hv.to_str().ok())
            .and_then(|hv| hv.parse().ok())
            .unwrap_or(1024);
        let body = DrainBodyFuture::with_limit(body, content_length, MAX_BODY_BYTES)
            .await
            .map_err(|e| RequestError::Transport(format!("{e:#}")))?;
        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

/// `client error (Connect): tcp connect error: Connection refused (os error 111)`
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_test_util::{unused_local_addr, TargetBehavior, TargetServer};

    #[tokio::test]
    async fn receives_status_and_body() {
        let server = TargetServer::spawn(TargetBehavior::status(201)).await.unwrap();
        let spec = RequestSpec::new("POST", &server.url("/ask"))
            .unwrap()
            .with_body("hello");

        let response = HttpClient::new().issue(&spec).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        let body: http_test_util::AskResponse = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body.hit, 1);
        assert_eq!(body.received_bytes, 5);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let addr = unused_local_addr().unwrap();
        let spec = RequestSpec::new("GET", &format!("http://{addr}/")).unwrap();

        let err = HttpClient::new().issue(&spec).await.unwrap_err();
        let RequestError::Transport(message) = err else {
            panic!("expected transport error, got {err:?}");
        };
        assert!(message.contains("client error"), "{message}");
    }
}
