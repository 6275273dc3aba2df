// matchrig-server/src/control.rs
//
// Operator-facing HTTP control surface. Each route maps to one rig command;
// long flows are spawned and report progress on the event bus, so responses
// only acknowledge that the command was taken.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::{Handle, Server};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use matchrig_core::Error;

use crate::context::ServerContext;

/// Binds the control listener and serves it in the background. The returned
/// sender shuts the server down gracefully when fired (or dropped).
pub async fn start_control_server(
    ctx: Arc<ServerContext>,
    bind: &str,
) -> Result<oneshot::Sender<()>, Error> {
    let addr: SocketAddr = bind.parse()?;

    let app = Router::new()
        .route("/status", get(status))
        .route("/search", post(search))
        .route("/disband", post(disband))
        .route("/shuffle", post(shuffle))
        .route("/launch", post(launch))
        .route("/stop", post(stop))
        .with_state(ctx)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    info!("control endpoint listening on http://{}", addr);

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
            error!("control server error: {}", e);
        }
        info!("control server shut down");
    });

    Ok(shutdown_send)
}

async fn status(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    let accounts: Vec<Value> = ctx
        .registry
        .all()
        .iter()
        .map(|a| {
            json!({
                "login": a.login(),
                "status": a.status().to_string(),
                "match_id": a.last_match_id(),
            })
        })
        .collect();

    Json(json!({
        "accounts": accounts,
        "valid_clients": ctx.registry.count_valid(),
        "search_running": ctx.search.is_running(),
        "round": ctx.telemetry.current_round(),
        "gameover": ctx.telemetry.is_gameover(),
    }))
}

/// Builds the lobby and starts searching. Runs in the background; refuses
/// to overlap an already-running search.
async fn search(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    if ctx.search.is_running() {
        return Json(json!({ "started": false, "reason": "search already running" }));
    }
    ctx.stop.clear();
    let search = ctx.search.clone();
    let stop = ctx.stop.clone();
    tokio::spawn(async move {
        search.run(Some(&stop)).await;
    });
    Json(json!({ "started": true }))
}

async fn disband(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    let ok = ctx.lobby.disband(Some(&ctx.stop)).await;
    Json(json!({ "ok": ok }))
}

async fn shuffle(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    let ok = ctx.lobby.shuffle(Some(&ctx.stop));
    Json(json!({ "ok": ok }))
}

#[derive(Debug, Deserialize)]
struct LaunchRequest {
    logins: Vec<String>,
}

async fn launch(
    State(ctx): State<Arc<ServerContext>>,
    Json(req): Json<LaunchRequest>,
) -> Json<Value> {
    let accepted = ctx.launch_queue.enqueue_batch(&req.logins).await;
    Json(json!({ "accepted": accepted }))
}

async fn stop(State(ctx): State<Arc<ServerContext>>) -> Json<Value> {
    info!("operator stop requested");
    ctx.stop.trigger();
    Json(json!({ "ok": true }))
}
