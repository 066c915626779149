use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::{AskResponse, HealthResponse, HitCounter};

/// How the target answers every request that is not a health probe.
#[derive(Debug, Clone, Copy)]
pub struct TargetBehavior {
    pub status: StatusCode,
    pub delay: Duration,
}

impl TargetBehavior {
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for TargetBehavior {
    fn default() -> Self {
        Self::status(200)
    }
}

#[derive(Clone)]
struct TargetState {
    behavior: TargetBehavior,
    hits: HitCounter,
}

/// An axum server answering `GET /healthz` and anything else with the
/// configured [`TargetBehavior`]. Aborted on drop.
pub struct TargetServer {
    addr: SocketAddr,
    hits: HitCounter,
    handle: Option<JoinHandle<()>>,
}

impl TargetServer {
    /// Binds an ephemeral loopback port.
    pub async fn spawn(behavior: TargetBehavior) -> anyhow::Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), behavior).await
    }

    pub async fn bind(addr: SocketAddr, behavior: TargetBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind target server to {addr}"))?;
        let addr = listener.local_addr().context("Failed to read local addr")?;
        let hits = HitCounter::new();
        let router = router(TargetState {
            behavior,
            hits: hits.clone(),
        });
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Target server stopped");
            }
        });
        tracing::debug!(%addr, status = %behavior.status, "Target server listening");
        Ok(Self {
            addr,
            hits,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.get()
    }

    /// Serves until the task is aborted or the listener fails.
    pub async fn serve_forever(mut self) -> anyhow::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.context("Target server task failed"),
            None => Ok(()),
        }
    }
}

impl Drop for TargetServer {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

fn router(state: TargetState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(answer)
        .with_state(state)
}

async fn healthz(State(state): State<TargetState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        hits: state.hits.get(),
    })
}

async fn answer(State(state): State<TargetState>, body: Bytes) -> (StatusCode, Json<AskResponse>) {
    let hit = state.hits.hit();
    if !state.behavior.delay.is_zero() {
        tokio::time::sleep(state.behavior.delay).await;
    }
    (
        state.behavior.status,
        Json(AskResponse {
            hit,
            received_bytes: body.len(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_bound_address() {
        let server = TargetServer::spawn(TargetBehavior::status(503)).await.unwrap();
        assert_ne!(server.addr().port(), 0);
        assert_eq!(server.url("/ask"), format!("http://{}/ask", server.addr()));
        assert_eq!(server.hits(), 0);
    }

    #[test]
    fn invalid_status_falls_back_to_500() {
        assert_eq!(TargetBehavior::status(42).status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(TargetBehavior::default().status, StatusCode::OK);
    }
}
