// File: matchrig-core/src/telemetry/server.rs
//
// HTTP endpoint the game clients post telemetry to. Every client on the rig
// points its state integration at the same local port, so one server feeds
// the shared state machine. Malformed bodies are dropped with a debug log;
// the feed retries constantly and a single bad record carries no information.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, routing::post, Router};
use axum_server::{Handle, Server};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use matchrig_common::models::TelemetryPayload;
use matchrig_common::Error;

use super::state::TelemetryState;

/// Binds the telemetry listener and serves it in the background. The returned
/// sender shuts the server down gracefully when fired (or dropped).
pub async fn start_telemetry_server(
    state: Arc<TelemetryState>,
    bind: &str,
) -> Result<oneshot::Sender<()>, Error> {
    let addr: SocketAddr = bind.parse()?;

    let app = Router::new()
        .route("/", post(ingest))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    info!("telemetry endpoint listening on http://{}", addr);

    let handle = Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown_recv.await;
        handle_clone.graceful_shutdown(None);
    });

    let server = Server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("telemetry server error: {}", e);
        }
        info!("telemetry server shut down");
    });

    Ok(shutdown_send)
}

/// The integration posts whole-state snapshots as JSON. Responses are always
/// 200 "ok": the client treats anything else as a config problem and stops.
async fn ingest(State(state): State<Arc<TelemetryState>>, body: String) -> &'static str {
    match serde_json::from_str::<TelemetryPayload>(&body) {
        Ok(payload) => state.ingest(&payload).await,
        Err(e) => debug!("unparseable telemetry payload: {}", e),
    }
    "ok"
}
