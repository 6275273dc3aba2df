//! matchrig-server/src/server.rs
//!
//! The main server logic: building the ServerContext and running the
//! telemetry + control endpoints alongside the background flows.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use matchrig_core::eventbus::MatchEvent;
use matchrig_core::tasks::spawn_auto_arrange;
use matchrig_core::telemetry::start_telemetry_server;
use matchrig_core::Error;

use crate::context::ServerContext;
use crate::control;
use crate::Args;

pub async fn run_server(args: Args) -> Result<(), Error> {
    // Build the global context
    let ctx = Arc::new(ServerContext::new(&args).await?);

    // 1) Re-adopt clients that were running before this process started
    for account in ctx.registry.adopt_running(&ctx.runtime).await {
        if let Some(handle) = ctx.resolver.resolve(&account) {
            ctx.arranger.fix_frame(handle);
            ctx.arranger.retitle(handle, account.login());
        }
        ctx.logwatch.spawn(account);
    }

    // 2) Background workers: launch queue, accept consensus, auto arrange
    let _launch_worker = ctx.launch_queue.spawn_worker();
    let _consensus_task = ctx.consensus.spawn();
    let _arrange_task = spawn_auto_arrange(
        ctx.registry.clone(),
        ctx.resolver.clone(),
        ctx.arranger.clone(),
        ctx.process.clone(),
        ctx.event_bus.clone(),
        &ctx.cfg,
        ctx.cfg.auto_search.then(|| ctx.search.clone()),
    );

    // 3) HTTP endpoints: client telemetry + operator control
    let telemetry_shutdown =
        start_telemetry_server(ctx.telemetry.clone(), &ctx.cfg.telemetry_bind).await?;
    let control_shutdown =
        control::start_control_server(ctx.clone(), &ctx.cfg.control_bind).await?;

    ctx.event_bus
        .publish(MatchEvent::SystemMessage("server started".to_string()))
        .await;

    // Ctrl-C => signal
    let eb_for_ctrlc = ctx.event_bus.clone();
    let _ctrlc_handle = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
        }
        info!("Ctrl-C detected; shutting down event bus...");
        eb_for_ctrlc.shutdown();
    });

    // 4) Main loop => send Tick events until we see shutdown
    let event_bus = ctx.event_bus.clone();
    let mut shutdown_rx = event_bus.shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = time::sleep(Duration::from_secs(10)) => {
                event_bus.publish(MatchEvent::Tick).await;
            }
            Ok(_) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signaled; exiting server loop.");
                    break;
                }
            }
        }
    }

    // Cleanup: cancel any in-flight flow, then drop the HTTP listeners
    ctx.stop.trigger();
    let _ = telemetry_shutdown.send(());
    let _ = control_shutdown.send(());
    info!("Server shutdown complete.");

    Ok(())
}
