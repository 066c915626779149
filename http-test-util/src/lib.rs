pub mod drain;
mod target;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;

pub use target::{TargetBehavior, TargetServer};

#[inline]
pub fn byte_body<B: Into<Bytes>>(bytes: B) -> Full<Bytes> {
    Full::new(bytes.into())
}

/// Counts requests served by a [`TargetServer`].
#[derive(Clone, Default)]
pub struct HitCounter {
    count: Arc<AtomicUsize>,
}

impl HitCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hit number assigned to this request, starting at 1.
    #[inline]
    pub fn hit(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct AskResponse {
    pub hit: usize,
    pub received_bytes: usize,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub hits: usize,
}

/// An address on loopback that nothing listens on, for connection-refused scenarios.
pub fn unused_local_addr() -> anyhow::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}
