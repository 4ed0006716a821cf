//! Static HTTP server for the web root.
//!
//! | Method | Path          | Description                                |
//! |--------|---------------|--------------------------------------------|
//! | GET    | `/api/health` | Liveness probe with pipeline status        |
//! | GET    | `/*`          | Files from the web root (PNG pages, briefing) |
//!
//! Every accepted connection runs on its own tokio task (`axum::serve`), so a
//! slow tablet never blocks another. Responses carry `Cache-Control:
//! no-cache` so clients revalidate pages after a regeneration.
//!
//! ## Path validation
//!
//! Requests with a `..` segment (raw or percent-encoded), a backslash, or a
//! null byte are rejected with 400 before reaching the file service.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::controller::PipelineStatus;
use crate::error::ServerBindError;

#[derive(Clone)]
struct ServerState {
    start_time: Instant,
    status: watch::Receiver<PipelineStatus>,
}

/// Build the router serving `web_root`.
pub fn router(web_root: &Path, status: watch::Receiver<PipelineStatus>) -> Router {
    let state = ServerState {
        start_time: Instant::now(),
        status,
    };
    Router::new()
        .route("/api/health", get(health))
        .fallback_service(ServeDir::new(web_root))
        .layer(middleware::from_fn(reject_traversal))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server. Dropping it without [`AssetServer::stop`] leaves the
/// task running until the runtime shuts down.
pub struct AssetServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl AssetServer {
    /// Bind `addr` and start serving. Returning `Ok` means the socket is bound
    /// and accepting.
    pub async fn start(
        addr: SocketAddr,
        web_root: &Path,
        status: watch::Receiver<PipelineStatus>,
    ) -> Result<Self, ServerBindError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerBindError { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerBindError { addr, source })?;

        let app = router(web_root, status);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        info!("Serving {} on {local}", web_root.display());
        Ok(Self {
            addr: local,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, let in-flight requests finish, release the socket, and
    /// wait for the serve loop to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        match self.task.await {
            Ok(Ok(())) => info!("Server on {} stopped", self.addr),
            Ok(Err(e)) => warn!("Server on {} exited with error: {e}", self.addr),
            Err(e) => warn!("Server task on {} failed: {e}", self.addr),
        }
    }
}

/// `GET /api/health` — liveness probe plus a pipeline summary.
async fn health(State(state): State<ServerState>) -> Json<Value> {
    let status = state.status.borrow().clone();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "state": status.state,
        "theater": status.theater,
        "theater_control_enabled": status.theater_control_enabled,
        "conversions": {
            "kneeboard": status.kneeboard_conversions,
            "briefing": status.briefing_conversions,
        },
        "last_error": status.last_error,
    }))
}

async fn reject_traversal(req: Request, next: Next) -> Response {
    if is_traversal(req.uri().path()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Path traversal (..) not allowed", "code": "INVALID_PATH"})),
        )
            .into_response();
    }
    next.run(req).await
}

fn is_traversal(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if lowered.contains('\\') || lowered.contains("%5c") || lowered.contains("%00") {
        return true;
    }
    lowered
        .split('/')
        .any(|segment| segment.replace("%2e", ".") == "..")
}
