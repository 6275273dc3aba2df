// File: matchrig-core/src/search/orchestrator.rs
//
// Serialized lobby-build-and-search driver. One run prepares the strict
// window layout, then cycles: escape out of stray menus, rebuild both
// parties, open matchmaking on the two leaders, start the search and babysit
// the play/cancel controls until either the consensus detector accepts a
// match or the cycle times out and we recover into a reshuffled retry.
//
// Only one run may be in flight; the control surface and the auto-arrange
// task both funnel through the same guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use matchrig_common::models::{ButtonState, WindowHandle, WindowRect};

use crate::cancel::{sleep_cancellable, StopSignal};
use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::input::Sequencer;
use crate::lobby::LobbyService;
use crate::oracle::AcceptOracle;
use crate::registry::ManagedAccount;
use crate::windows::WindowResolver;

use super::consensus::ConsensusDetector;

/// Play/cancel control, relative to the leader's window frame.
pub const SEARCH_CONTROL: (i32, i32) = (289, 271);
/// Clicks that walk the play menu open to the matchmaking page.
const MENU_OPEN_CLICKS: [(i32, i32); 3] = [(206, 8), (154, 23), (142, 33)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleResult {
    /// Consensus fired (or the leader windows went away, which means the
    /// match loaded). The run is done.
    Matched,
    /// Search ran its full timeout without a match; recover and try again.
    TimedOut,
    /// Cancelled or a precondition broke. The run is over, unsuccessfully.
    Failed,
}

pub struct SearchOrchestrator {
    lobby: Arc<LobbyService>,
    consensus: Arc<ConsensusDetector>,
    oracle: Arc<AcceptOracle>,
    resolver: Arc<WindowResolver>,
    sequencer: Arc<Sequencer>,
    event_bus: Arc<EventBus>,
    cycles: u32,
    search_timeout: Duration,
    green_wait: Duration,
    running: AtomicBool,
}

impl SearchOrchestrator {
    pub fn new(
        lobby: Arc<LobbyService>,
        consensus: Arc<ConsensusDetector>,
        oracle: Arc<AcceptOracle>,
        resolver: Arc<WindowResolver>,
        sequencer: Arc<Sequencer>,
        event_bus: Arc<EventBus>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            lobby,
            consensus,
            oracle,
            resolver,
            sequencer,
            event_bus,
            cycles: cfg.recovery_cycles,
            search_timeout: Duration::from_secs(cfg.search_timeout_secs),
            green_wait: Duration::from_secs(cfg.green_wait_secs),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Full search run. Returns true when a match was accepted.
    pub async fn run(&self, stop: Option<&StopSignal>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("search run already in progress");
            return false;
        }
        let mut cycles_used = 0;
        let success = self.run_inner(stop, &mut cycles_used).await;
        self.running.store(false, Ordering::SeqCst);
        self.event_bus
            .publish(MatchEvent::SearchFinished {
                success,
                cycles_used,
            })
            .await;
        success
    }

    async fn run_inner(&self, stop: Option<&StopSignal>, cycles_used: &mut u32) -> bool {
        self.consensus.reset();
        if !self.lobby.prepare_strict_four(stop).await {
            return false;
        }
        if cancelled(stop) {
            return false;
        }

        for cycle in 1..=self.cycles {
            *cycles_used = cycle;
            match self.run_cycle(cycle, stop).await {
                CycleResult::Matched => return true,
                CycleResult::Failed => return false,
                CycleResult::TimedOut => {
                    if self.consensus.match_found() {
                        return true;
                    }
                    if !self.recover(stop).await {
                        return false;
                    }
                }
            }
        }
        info!("match was not found after {} recovery cycles", self.cycles);
        false
    }

    /// One build-collect-search cycle end to end.
    async fn run_cycle(&self, cycle: u32, stop: Option<&StopSignal>) -> CycleResult {
        if self.consensus.match_found() {
            info!("match already accepted, search run complete");
            return CycleResult::Matched;
        }
        info!("lobby build & search cycle {}/{}", cycle, self.cycles);

        self.lobby.double_escape_all(stop).await;
        if cancelled(stop) {
            return CycleResult::Failed;
        }
        if !self.lobby.rebuild_strict_slots() {
            warn!("strict slot rebuild failed");
            return CycleResult::Failed;
        }
        if !self.lobby.collect(stop).await {
            return CycleResult::Failed;
        }
        if !self.lobby.strict_pairs_hold() {
            warn!("strict pairs broken after party collect");
            return CycleResult::Failed;
        }
        if self.consensus.match_found() {
            return CycleResult::Matched;
        }
        if !self.lobby.arrange_in_order(None, stop) {
            warn!("window arrange failed before search");
            return CycleResult::Failed;
        }
        if sleep_cancellable(Duration::from_millis(1500), stop).await {
            return CycleResult::Failed;
        }
        if !self.lobby.strict_pairs_hold() {
            warn!("strict pairs broken before search start");
            return CycleResult::Failed;
        }

        // Open matchmaking on both leaders.
        let Some((team1, team2)) = self.lobby.teams() else {
            return CycleResult::Failed;
        };
        for leader in [&team1.leader, &team2.leader] {
            if cancelled(stop) {
                return CycleResult::Failed;
            }
            if self.consensus.match_found() {
                return CycleResult::Matched;
            }
            let Some((handle, rect)) = self.resolver.window_with_rect(leader) else {
                warn!("[{}] leader window missing before search", leader.login());
                return CycleResult::Failed;
            };
            self.sequencer.focus(handle);
            if sleep_cancellable(Duration::from_millis(250), stop).await {
                return CycleResult::Failed;
            }
            for (x, y) in MENU_OPEN_CLICKS {
                if !self.sequencer.click_rel(handle, &rect, x, y, stop).await {
                    return CycleResult::Failed;
                }
                if sleep_cancellable(Duration::from_millis(250), stop).await {
                    return CycleResult::Failed;
                }
            }
        }
        if sleep_cancellable(Duration::from_millis(600), stop).await {
            return CycleResult::Failed;
        }

        self.wait_for_match(&team1.leader, &team2.leader, stop).await
    }

    async fn click_control(
        &self,
        handle: WindowHandle,
        rect: &WindowRect,
        stop: Option<&StopSignal>,
    ) -> bool {
        self.sequencer
            .click_rel(handle, rect, SEARCH_CONTROL.0, SEARCH_CONTROL.1, stop)
            .await
    }

    /// Babysits both leaders' play/cancel controls until consensus, timeout
    /// or cancellation. The two searches must run together: a lone searcher
    /// is cancelled and both are restarted in step.
    async fn wait_for_match(
        &self,
        leader1: &Arc<ManagedAccount>,
        leader2: &Arc<ManagedAccount>,
        stop: Option<&StopSignal>,
    ) -> CycleResult {
        let Some((h1, r1)) = self.resolver.window_with_rect(leader1) else {
            warn!("[{}] leader window missing at search start", leader1.login());
            return CycleResult::Failed;
        };
        let Some((h2, r2)) = self.resolver.window_with_rect(leader2) else {
            warn!("[{}] leader window missing at search start", leader2.login());
            return CycleResult::Failed;
        };

        // Kick off: click whichever control is already showing green.
        for (handle, rect) in [(h1, &r1), (h2, &r2)] {
            if self.oracle.state_at(rect, SEARCH_CONTROL) == Some(ButtonState::Green)
                && !self.click_control(handle, rect, stop).await
            {
                return CycleResult::Failed;
            }
        }

        let deadline = Instant::now() + self.search_timeout;
        while Instant::now() < deadline {
            if cancelled(stop) {
                return CycleResult::Failed;
            }
            if self.consensus.match_found() {
                return CycleResult::Matched;
            }
            let (Some((h1, r1)), Some((h2, r2))) = (
                self.resolver.window_with_rect(leader1),
                self.resolver.window_with_rect(leader2),
            ) else {
                info!("leader window lost during search, assuming the match was accepted");
                return CycleResult::Matched;
            };

            let s1 = self.oracle.state_at(&r1, SEARCH_CONTROL);
            let s2 = self.oracle.state_at(&r2, SEARCH_CONTROL);
            let (s1, s2) = match (s1, s2) {
                (Some(a), Some(b))
                    if a != ButtonState::Unknown && b != ButtonState::Unknown =>
                {
                    (a, b)
                }
                _ => {
                    if sleep_cancellable(Duration::from_millis(250), stop).await {
                        return CycleResult::Failed;
                    }
                    continue;
                }
            };

            match (s1, s2) {
                (ButtonState::Red, ButtonState::Green) => {
                    if !self.resync_pair(h1, &r1, h2, &r2, stop).await {
                        return CycleResult::Failed;
                    }
                }
                (ButtonState::Green, ButtonState::Red) => {
                    if !self.resync_pair(h2, &r2, h1, &r1, stop).await {
                        return CycleResult::Failed;
                    }
                }
                (ButtonState::Green, ButtonState::Green) => {
                    if !self.click_control(h1, &r1, stop).await
                        || !self.click_control(h2, &r2, stop).await
                    {
                        return CycleResult::Failed;
                    }
                }
                // Both red: both searching, nothing to fix.
                _ => {}
            }

            if sleep_cancellable(Duration::from_secs(1), stop).await {
                return CycleResult::Failed;
            }
        }
        CycleResult::TimedOut
    }

    /// One leader is searching while the other is idle. Cancel the search on
    /// the searching window, confirm it went idle, then start both together.
    async fn resync_pair(
        &self,
        searching: WindowHandle,
        searching_rect: &WindowRect,
        idle: WindowHandle,
        idle_rect: &WindowRect,
        stop: Option<&StopSignal>,
    ) -> bool {
        if !self.click_control(searching, searching_rect, stop).await {
            return false;
        }
        if sleep_cancellable(Duration::from_millis(150), stop).await {
            return false;
        }
        if self.oracle.state_at(searching_rect, SEARCH_CONTROL) == Some(ButtonState::Green) {
            if !self.click_control(searching, searching_rect, stop).await {
                return false;
            }
            if !self.click_control(idle, idle_rect, stop).await {
                return false;
            }
        }
        true
    }

    /// Timed-out cycle cleanup: stop both searches, escape every client out
    /// of its menus, break up the parties and reshuffle the teams.
    async fn recover(&self, stop: Option<&StopSignal>) -> bool {
        info!(
            "match was not found in {}s",
            self.search_timeout.as_secs()
        );
        info!("recovery: cancel search, leave parties, reshuffle teams");

        let leaders = self.lobby.press_members(true);
        if !self
            .oracle
            .force_green(
                &leaders,
                &self.resolver,
                &self.sequencer,
                SEARCH_CONTROL,
                true,
                self.green_wait,
                stop,
            )
            .await
        {
            return false;
        }
        if cancelled(stop) {
            return false;
        }

        let escaped = self.lobby.double_escape_all(stop).await;
        info!("pressed escape on {} clients", escaped);
        if cancelled(stop) {
            return false;
        }

        if !self.lobby.disband(stop).await {
            warn!("disband failed during recovery, continuing");
        }
        if cancelled(stop) {
            return false;
        }

        if !self.lobby.shuffle(stop) {
            warn!("team shuffle failed during recovery");
            return false;
        }
        !cancelled(stop)
    }
}

fn cancelled(stop: Option<&StopSignal>) -> bool {
    stop.map(|s| s.is_triggered()).unwrap_or(false)
}
