// File: matchrig-core/src/tasks/post_match.rs
//
// Post-match restart flow. A gameover report starts a long grace period (the
// scoreboard and MVP screens have to play out), then walks every live client
// back to the main menu and kicks off a fresh search run. Telemetry can
// repeat the gameover packet many times per second, so triggers are gated:
// one flow at a time, and duplicates inside a short window are dropped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cancel::{sleep_cancellable_step, StopSignal};
use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::input::Sequencer;
use crate::os::WindowSystem;
use crate::registry::RuntimeMap;
use crate::search::SearchOrchestrator;
use crate::windows::WindowResolver;

/// Identical gameover reports arriving within this window are one event.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(5);
/// Menu button that backs a finished client out to the lobby screen.
const MENU_EXIT_POINT: (i32, i32) = (374, 8);

#[derive(Default)]
struct Gate {
    running: bool,
    last: Option<Instant>,
}

pub struct PostMatchFlow {
    windows: Arc<dyn WindowSystem>,
    resolver: Arc<WindowResolver>,
    runtime: Arc<RuntimeMap>,
    sequencer: Arc<Sequencer>,
    search: Arc<SearchOrchestrator>,
    event_bus: Arc<EventBus>,
    stop: StopSignal,
    wait: Duration,
    gate: Mutex<Gate>,
}

impl PostMatchFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        resolver: Arc<WindowResolver>,
        runtime: Arc<RuntimeMap>,
        sequencer: Arc<Sequencer>,
        search: Arc<SearchOrchestrator>,
        event_bus: Arc<EventBus>,
        stop: StopSignal,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            windows,
            resolver,
            runtime,
            sequencer,
            search,
            event_bus,
            stop,
            wait: Duration::from_secs(cfg.post_match_wait_secs),
            gate: Mutex::new(Gate::default()),
        }
    }

    /// Starts the flow in the background unless one is already running or
    /// this gameover is a duplicate of a very recent one.
    pub fn trigger(self: &Arc<Self>) {
        {
            let mut gate = self.gate.lock();
            if gate.running {
                info!("post-match restart already running, gameover ignored");
                return;
            }
            if let Some(last) = gate.last {
                if last.elapsed() < DUPLICATE_WINDOW {
                    info!("duplicate gameover within 5 seconds, ignored");
                    return;
                }
            }
            gate.running = true;
            gate.last = Some(Instant::now());
        }
        let flow = self.clone();
        tokio::spawn(async move {
            flow.clone().run().await;
            flow.gate.lock().running = false;
        });
    }

    async fn run(self: Arc<Self>) {
        info!(
            "waiting {}s before the post-match restart",
            self.wait.as_secs()
        );
        if sleep_cancellable_step(self.wait, Some(&self.stop), Duration::from_millis(200)).await {
            info!("post-match restart cancelled during the wait");
            return;
        }

        let handles = match self.resolver.all_client_windows(&self.runtime) {
            Ok(handles) => handles,
            Err(e) => {
                warn!("window scan failed after the match: {}", e);
                return;
            }
        };
        if handles.is_empty() {
            warn!("no client windows left to reset after the match");
            return;
        }

        let mut reset = 0usize;
        for handle in handles {
            if self.stop.is_triggered() {
                info!("post-match restart cancelled");
                return;
            }
            if !self.windows.is_window(handle) {
                continue;
            }
            self.sequencer.focus_settled(handle).await;
            self.sequencer.send_escape(handle);
            if sleep_cancellable_step(
                Duration::from_millis(400),
                Some(&self.stop),
                Duration::from_millis(200),
            )
            .await
            {
                return;
            }
            self.sequencer
                .click_at(handle, MENU_EXIT_POINT.0, MENU_EXIT_POINT.1, Duration::from_millis(400))
                .await;
            if sleep_cancellable_step(
                Duration::from_millis(400),
                Some(&self.stop),
                Duration::from_millis(200),
            )
            .await
            {
                return;
            }
            self.sequencer
                .click_at(handle, MENU_EXIT_POINT.0, MENU_EXIT_POINT.1, Duration::from_millis(400))
                .await;
            if sleep_cancellable_step(
                Duration::from_millis(400),
                Some(&self.stop),
                Duration::from_millis(200),
            )
            .await
            {
                return;
            }
            self.sequencer.send_escape(handle);
            reset += 1;
        }
        info!("post-match reset done for {} clients", reset);
        self.event_bus
            .publish(MatchEvent::SystemMessage(format!(
                "post-match reset done for {} clients",
                reset
            )))
            .await;

        self.search.run(Some(&self.stop)).await;
    }
}
