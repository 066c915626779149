use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use http_test_util::byte_body;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Request, Uri};

use crate::config::ConfigError;

/// One request, shared read-only by every worker of a run.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    timeout: Duration,
}

impl RequestSpec {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(method: &str, url: &str) -> Result<Self, ConfigError> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(method.to_owned()))?;
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidUrl(url.to_owned()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(_) => return Err(ConfigError::UnsupportedScheme(url.to_owned())),
            None => return Err(ConfigError::InvalidUrl(url.to_owned())),
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidUrl(url.to_owned()));
        }
        Ok(Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Appends a header; repeated names are kept, not replaced.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.to_owned()))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|_| ConfigError::InvalidHeader(format!("{name}: {value}")))?;
        self.headers.append(header_name, header_value);
        Ok(self)
    }

    #[must_use]
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds a fresh request. The body is reference counted, so this does
    /// not copy the payload.
    #[must_use]
    pub fn to_request(&self) -> Request<Full<Bytes>> {
        let mut request = Request::new(byte_body(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}
