pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::HttpServerConfig;
use crate::error::HostError;
use crate::modes::daemon::ControlMsg;
use crate::service::ServiceContext;

#[derive(Clone)]
pub struct HttpState {
    pub ctx: Arc<ServiceContext>,
    pub control_tx: mpsc::Sender<ControlMsg>,
}

impl HttpState {
    pub fn new(ctx: Arc<ServiceContext>, control_tx: mpsc::Sender<ControlMsg>) -> Self {
        Self { ctx, control_tx }
    }
}

/// Full application router with request counting applied.
pub fn router(state: HttpState) -> Router {
    api::router()
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
}

/// Bind the listener and serve in a background task until the shutdown
/// broadcast fires. Binding happens before this returns so a port conflict
/// fails the caller instead of a detached task.
pub async fn spawn_http_server(
    config: &HttpServerConfig,
    state: HttpState,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(SocketAddr, JoinHandle<()>), HostError> {
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| HostError::Http(format!("bind {}: {e}", config.bind)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| HostError::Http(format!("local addr: {e}")))?;
    tracing::info!("HTTP server listening on http://{}", addr);

    let app = router(state);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(err) = served {
            tracing::error!("http server error: {err}");
        }
    });
    Ok((addr, handle))
}

async fn count_requests(State(state): State<HttpState>, request: Request, next: Next) -> Response {
    let seq = state.ctx.note_request();
    tracing::debug!(seq, method = %request.method(), path = %request.uri().path(), "request");
    next.run(request).await
}
