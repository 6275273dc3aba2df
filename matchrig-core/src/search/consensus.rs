// File: matchrig-core/src/search/consensus.rs
//
// Match-found consensus detector. Each client's log watcher records the match
// id its server confirms; only when enough clients agree on the SAME id do we
// treat the search as matched, lift the fleet, and double-click accept on the
// agreeing windows. A single client's id is noise (stale logs, reconnects);
// four agreeing clients is our lobby actually matching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::input::Sequencer;
use crate::lobby::LobbyService;
use crate::os::WindowSystem;
use crate::registry::{AccountRegistry, ManagedAccount};
use crate::windows::{WindowArranger, WindowResolver};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Accept sits at the horizontal center, slightly above the vertical center.
const ACCEPT_Y_OFFSET: i32 = 20;

/// Most common id in the slice with its vote count. Ties break toward the
/// lexically smaller id so repeated polls stay stable.
pub fn plurality(ids: &[String]) -> Option<(String, usize)> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for id in ids {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(id, count)| (id.to_string(), count))
}

pub struct ConsensusDetector {
    registry: Arc<AccountRegistry>,
    lobby: Arc<LobbyService>,
    arranger: Arc<WindowArranger>,
    resolver: Arc<WindowResolver>,
    sequencer: Arc<Sequencer>,
    windows: Arc<dyn WindowSystem>,
    event_bus: Arc<EventBus>,
    threshold: usize,
    found: AtomicBool,
    last_announced: Mutex<Option<String>>,
}

impl ConsensusDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AccountRegistry>,
        lobby: Arc<LobbyService>,
        arranger: Arc<WindowArranger>,
        resolver: Arc<WindowResolver>,
        sequencer: Arc<Sequencer>,
        windows: Arc<dyn WindowSystem>,
        event_bus: Arc<EventBus>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            registry,
            lobby,
            arranger,
            resolver,
            sequencer,
            windows,
            event_bus,
            threshold: cfg.consensus_threshold,
            found: AtomicBool::new(false),
            last_announced: Mutex::new(None),
        }
    }

    /// Latched once a consensus fires; the search orchestrator polls this to
    /// bail out of its build cycles.
    pub fn match_found(&self) -> bool {
        self.found.load(Ordering::SeqCst)
    }

    /// Clears the latch for a fresh search run.
    pub fn reset(&self) {
        self.found.store(false, Ordering::SeqCst);
        self.last_announced.lock().take();
    }

    async fn register(&self, match_id: &str, agreeing: &[Arc<ManagedAccount>]) {
        self.found.store(true, Ordering::SeqCst);
        let fresh = {
            let mut last = self.last_announced.lock();
            if last.as_deref() == Some(match_id) {
                false
            } else {
                *last = Some(match_id.to_string());
                true
            }
        };
        if !fresh {
            return;
        }
        info!("lobby build & search cancelled");
        info!("match {} accepted by consensus", match_id);
        self.event_bus
            .publish(MatchEvent::MatchFound {
                match_id: match_id.to_string(),
                agreeing: agreeing.iter().map(|a| a.login().to_string()).collect(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Clients we count votes from: lobby members while teams are standing,
    /// otherwise every valid account.
    fn voters(&self) -> Vec<Arc<ManagedAccount>> {
        if self.lobby.is_valid() {
            self.lobby.members()
        } else {
            self.registry.valid_accounts()
        }
    }

    /// One detection pass. Threshold gates apply in order: enough voters,
    /// enough ids reported, enough votes behind one id.
    pub async fn poll_once(&self) {
        let members = self.voters();
        if members.len() < self.threshold {
            return;
        }
        let ids: Vec<String> = members.iter().filter_map(|m| m.last_match_id()).collect();
        if ids.len() < self.threshold {
            return;
        }
        let Some((top_id, top_count)) = plurality(&ids) else {
            return;
        };
        if top_count < self.threshold {
            return;
        }
        let matched: Vec<Arc<ManagedAccount>> = members
            .iter()
            .filter(|m| m.last_match_id().as_deref() == Some(top_id.as_str()))
            .cloned()
            .collect();

        info!("detected {} matching match ids ({})", top_count, top_id);
        self.register(&top_id, &matched).await;

        let lifted = self.arranger.lift_all().await;
        if lifted > 0 {
            sleep(Duration::from_millis(500)).await;
        }
        self.accept_for(&matched).await;
    }

    /// Double-click accept on every agreeing window. Ids are cleared first so
    /// the next poll does not re-fire until clients report a new match.
    async fn accept_for(&self, matched: &[Arc<ManagedAccount>]) {
        info!("waiting 1s, then double-clicking accept");
        sleep(Duration::from_secs(1)).await;
        for _ in 0..2 {
            for account in matched {
                account.clear_last_match_id();
                if let Some(handle) = self.resolver.resolve_member(account) {
                    if let Ok(rect) = self.windows.window_rect(handle) {
                        let x = rect.width() / 2;
                        let y = rect.height() / 2 - ACCEPT_Y_OFFSET;
                        if let Err(e) = self.sequencer.click_client(handle, x, y) {
                            warn!("[{}] accept click failed: {}", account.login(), e);
                        }
                    }
                }
                sleep(Duration::from_millis(200)).await;
            }
        }
    }

    /// Background poller. Runs until the event bus shuts down.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let detector = self.clone();
        let mut shutdown_rx = detector.event_bus.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(POLL_INTERVAL) => {
                        detector.poll_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("consensus detector stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{MockProcessApi, MockWindowSystem, ProcessApi};
    use crate::test_utils::ScriptedInput;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plurality_picks_the_most_common_id() {
        let votes = ids(&["m1", "m2", "m1", "m1", "m2"]);
        assert_eq!(plurality(&votes), Some(("m1".into(), 3)));
    }

    #[test]
    fn plurality_tie_breaks_deterministically() {
        let votes = ids(&["m2", "m1", "m1", "m2"]);
        assert_eq!(plurality(&votes), Some(("m1".into(), 2)));
    }

    #[test]
    fn plurality_of_nothing_is_none() {
        assert_eq!(plurality(&[]), None);
    }

    fn detector() -> (Arc<ConsensusDetector>, Arc<EventBus>) {
        let cfg = AppConfig::default();
        let mut windows = MockWindowSystem::new();
        windows
            .expect_enumerate_windows()
            .returning(|| Ok(Vec::new()));
        let windows: Arc<dyn WindowSystem> = Arc::new(windows);
        let process: Arc<dyn ProcessApi> = Arc::new(MockProcessApi::new());
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AccountRegistry::new(process.clone(), bus.clone(), &cfg));
        let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
        let arranger = Arc::new(WindowArranger::new(windows.clone(), process.clone(), &cfg));
        let sequencer = Arc::new(Sequencer::new(windows.clone(), Arc::new(ScriptedInput::new())));
        let lobby = Arc::new(LobbyService::new(
            registry.clone(),
            resolver.clone(),
            arranger.clone(),
            sequencer.clone(),
            windows.clone(),
            process.clone(),
            &cfg,
        ));
        let detector = Arc::new(ConsensusDetector::new(
            registry,
            lobby,
            arranger,
            resolver,
            sequencer,
            windows,
            bus.clone(),
            &cfg,
        ));
        (detector, bus)
    }

    #[tokio::test]
    async fn register_latches_and_announces_once_per_id() {
        let (detector, bus) = detector();
        let mut rx = bus.subscribe(None).await;
        assert!(!detector.match_found());

        detector.register("m1", &[]).await;
        assert!(detector.match_found());
        assert!(matches!(rx.try_recv().unwrap(), MatchEvent::MatchFound { .. }));

        detector.register("m1", &[]).await;
        assert!(rx.try_recv().is_err(), "same id must not re-announce");

        detector.register("m2", &[]).await;
        assert!(matches!(rx.try_recv().unwrap(), MatchEvent::MatchFound { .. }));

        detector.reset();
        assert!(!detector.match_found());
        detector.register("m2", &[]).await;
        assert!(
            matches!(rx.try_recv().unwrap(), MatchEvent::MatchFound { .. }),
            "reset must forget the announced id"
        );
    }

    #[tokio::test]
    async fn poll_skips_below_threshold() {
        let (detector, bus) = detector();
        let mut rx = bus.subscribe(None).await;
        // No accounts registered at all: every gate short-circuits.
        detector.poll_once().await;
        assert!(!detector.match_found());
        assert!(rx.try_recv().is_err());
    }
}
