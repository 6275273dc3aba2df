// File: matchrig-core/src/tasks/auto_arrange.rs
//
// Startup babysitter. While the operator (or the launch queue) is bringing
// clients up, this task watches the process table; once enough clients are
// alive it waits out a settle delay (login screens, intro movies), arranges
// every window into the tile row, optionally starts a search run, and exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::os::ProcessApi;
use crate::registry::AccountRegistry;
use crate::search::SearchOrchestrator;
use crate::windows::{WindowArranger, WindowResolver};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One-shot arrangement task. Pass a search orchestrator to chain straight
/// into lobby building once the windows are tiled.
pub fn spawn_auto_arrange(
    registry: Arc<AccountRegistry>,
    resolver: Arc<WindowResolver>,
    arranger: Arc<WindowArranger>,
    process: Arc<dyn ProcessApi>,
    event_bus: Arc<EventBus>,
    cfg: &AppConfig,
    search: Option<Arc<SearchOrchestrator>>,
) -> JoinHandle<()> {
    let client_exe = cfg.client_exe.clone();
    let min_clients = cfg.auto_arrange_min_clients;
    let delay = Duration::from_secs(cfg.auto_arrange_delay_secs);
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        let mut armed: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let count = process.processes_matching(&client_exe).len();
            if count < min_clients {
                // Clients dropped below the bar; the settle delay restarts
                // from scratch next time they come back.
                armed = None;
                continue;
            }
            let armed_at = match armed {
                Some(t) => t,
                None => {
                    info!(
                        "found {} clients, arranging windows in {}s",
                        count,
                        delay.as_secs()
                    );
                    let now = Instant::now();
                    armed = Some(now);
                    now
                }
            };
            if armed_at.elapsed() < delay {
                continue;
            }

            info!("auto-arranging {} client windows", count);
            arranger.arrange(&registry.all(), &resolver, None);
            info!("auto-arrange complete");
            event_bus
                .publish(MatchEvent::SystemMessage("auto-arrange complete".into()))
                .await;

            if let Some(search) = search {
                tokio::spawn(async move {
                    search.run(None).await;
                });
            }
            return;
        }
    })
}
