// File: matchrig-core/src/telemetry/state.rs
//
// Round/match state machines driven by client telemetry posts. Rounds are
// numbered from the score line (completed rounds plus one for a starting
// round), never trusted from any other field. Round-over signals are plain
// stop signals so every per-round worker can be cancelled the moment the
// round ends, and cleared wholesale when a new match begins.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use matchrig_common::models::{
    MapPhase, RoundPhase, TeamSide, TelemetryPayload, WindowHandle,
};

use crate::cancel::{StopSignal, sleep_cancellable};
use crate::config::AppConfig;
use crate::eventbus::{EventBus, MatchEvent};
use crate::input::{Sequencer, routes};
use crate::os::{ProcessApi, StatsProvider, WindowSystem};
use crate::registry::{AccountRegistry, RuntimeMap, SecretStore, login_from_title};
use crate::tasks::PostMatchFlow;
use crate::windows::WindowResolver;

/// Regulation rounds; the per-round signal pool covers exactly these.
pub const MAX_ROUNDS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStage {
    Idle,
    Live,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Waiting,
    Live,
    Gameover,
}

struct FsmState {
    round_stage: RoundStage,
    match_stage: MatchStage,
    current_round: Option<u32>,
    /// Per starting-round roster: login -> reported side.
    round_players: HashMap<u32, HashMap<String, TeamSide>>,
    announced_rounds: HashSet<u32>,
    routes_done: HashSet<u32>,
}

impl Default for FsmState {
    fn default() -> Self {
        Self {
            round_stage: RoundStage::Idle,
            match_stage: MatchStage::Waiting,
            current_round: None,
            round_players: HashMap::new(),
            announced_rounds: HashSet::new(),
            routes_done: HashSet::new(),
        }
    }
}

pub struct TelemetryState {
    fsm: Mutex<FsmState>,
    round_over: Vec<StopSignal>,
    secrets: Arc<SecretStore>,
    registry: Arc<AccountRegistry>,
    runtime: Arc<RuntimeMap>,
    resolver: Arc<WindowResolver>,
    sequencer: Arc<Sequencer>,
    stats: Arc<dyn StatsProvider>,
    windows: Arc<dyn WindowSystem>,
    process: Arc<dyn ProcessApi>,
    event_bus: Arc<EventBus>,
    title_tag: String,
    client_exe: String,
    refreshing_stats: AtomicBool,
    post_match: Mutex<Option<Arc<PostMatchFlow>>>,
}

impl TelemetryState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        secrets: Arc<SecretStore>,
        registry: Arc<AccountRegistry>,
        runtime: Arc<RuntimeMap>,
        resolver: Arc<WindowResolver>,
        sequencer: Arc<Sequencer>,
        stats: Arc<dyn StatsProvider>,
        windows: Arc<dyn WindowSystem>,
        process: Arc<dyn ProcessApi>,
        event_bus: Arc<EventBus>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            fsm: Mutex::new(FsmState::default()),
            round_over: (1..=MAX_ROUNDS).map(|_| StopSignal::new()).collect(),
            secrets,
            registry,
            runtime,
            resolver,
            sequencer,
            stats,
            windows,
            process,
            event_bus,
            title_tag: cfg.window_title_tag.clone(),
            client_exe: cfg.client_exe.to_lowercase(),
            refreshing_stats: AtomicBool::new(false),
            post_match: Mutex::new(None),
        }
    }

    /// Wires the post-match flow in after construction; the flow depends on
    /// services built later than this state.
    pub fn set_post_match(&self, flow: Arc<PostMatchFlow>) {
        *self.post_match.lock() = Some(flow);
    }

    pub fn round_over_signal(&self, round: u32) -> Option<&StopSignal> {
        self.round_over.get((round as usize).checked_sub(1)?)
    }

    pub fn round_over_triggered(&self, round: u32) -> bool {
        self.round_over_signal(round)
            .map(|s| s.is_triggered())
            .unwrap_or(false)
    }

    pub fn is_gameover(&self) -> bool {
        self.fsm.lock().match_stage == MatchStage::Gameover
    }

    pub fn round_stage(&self) -> RoundStage {
        self.fsm.lock().round_stage
    }

    pub fn match_stage(&self) -> MatchStage {
        self.fsm.lock().match_stage
    }

    pub fn current_round(&self) -> Option<u32> {
        self.fsm.lock().current_round
    }

    /// Applies one telemetry record: roster capture, round FSM, match FSM.
    /// Side effects (events, round workers, stats refresh, post-match flow)
    /// happen outside the state lock.
    pub async fn ingest(self: &Arc<Self>, payload: &TelemetryPayload) {
        let ct = payload.ct_score();
        let t = payload.t_score();
        let starting = payload.starting_round();
        let ending = payload.ending_round();

        if let Some(player) = &payload.player {
            if let (Some(steamid), Some(side)) = (&player.steamid, player.team) {
                if side != TeamSide::Unknown {
                    if let Some(login) = self.secrets.login_for_steamid(steamid) {
                        let mut fsm = self.fsm.lock();
                        fsm.round_players
                            .entry(starting)
                            .or_default()
                            .insert(login.to_lowercase(), side);
                    }
                }
            }
        }

        let mut announce: Option<(u32, Vec<(String, TeamSide)>)> = None;
        let mut ended: Option<(u32, Option<TeamSide>)> = None;
        {
            let mut fsm = self.fsm.lock();
            match payload.round_phase() {
                Some(RoundPhase::Live) => {
                    fsm.round_stage = RoundStage::Live;
                    fsm.current_round = Some(starting);
                    if fsm.announced_rounds.insert(starting) {
                        let roster = fsm
                            .round_players
                            .get(&starting)
                            .map(|players| {
                                players.iter().map(|(l, s)| (l.clone(), *s)).collect()
                            })
                            .unwrap_or_default();
                        announce = Some((starting, roster));
                    }
                }
                Some(RoundPhase::Over) if fsm.round_stage == RoundStage::Live => {
                    fsm.round_stage = RoundStage::Over;
                    let winner = payload
                        .round
                        .as_ref()
                        .and_then(|r| r.win_team.as_deref())
                        .map(parse_winner);
                    ended = Some((ending, winner));
                }
                _ => fsm.round_stage = RoundStage::Idle,
            }
        }

        if let Some((round, winner)) = ended {
            info!(
                "round {} over | CT {} : T {} | winner {}",
                round,
                ct,
                t,
                winner.map(|w| w.to_string()).unwrap_or_else(|| "?".into())
            );
            self.event_bus
                .publish(MatchEvent::RoundEnded {
                    round,
                    ct_score: ct,
                    t_score: t,
                    winner,
                })
                .await;
            if let Some(signal) = self.round_over_signal(round) {
                signal.trigger();
            }
        }

        if let Some((round, roster)) = announce {
            info!(
                "round {} live | CT: {} | T: {}",
                round,
                self.format_roster(&roster, TeamSide::Ct),
                self.format_roster(&roster, TeamSide::T)
            );
            self.event_bus
                .publish(MatchEvent::RoundStarted {
                    round,
                    ct_score: ct,
                    t_score: t,
                })
                .await;
            if (1..=MAX_ROUNDS).contains(&round) {
                tokio::spawn(self.clone().run_round_routes(round));
            }
        }

        let mut gameover_now = false;
        let mut reset_now = false;
        {
            let mut fsm = self.fsm.lock();
            match payload.map_phase() {
                Some(MapPhase::Gameover) if fsm.match_stage != MatchStage::Gameover => {
                    fsm.match_stage = MatchStage::Gameover;
                    gameover_now = true;
                }
                Some(MapPhase::Warmup | MapPhase::Waiting | MapPhase::Live)
                    if fsm.match_stage == MatchStage::Gameover =>
                {
                    fsm.match_stage = MatchStage::Live;
                    fsm.round_players.clear();
                    fsm.announced_rounds.clear();
                    fsm.routes_done.clear();
                    fsm.current_round = None;
                    reset_now = true;
                }
                _ => {}
            }
        }

        if reset_now {
            for signal in &self.round_over {
                signal.clear();
            }
            info!("match state reset for a new game");
        }

        if gameover_now {
            info!("match over | CT {} : T {}", ct, t);
            self.event_bus
                .publish(MatchEvent::MatchOver {
                    ct_score: ct,
                    t_score: t,
                })
                .await;
            tokio::spawn(self.clone().refresh_stats_after_match());
            let flow = self.post_match.lock().clone();
            if let Some(flow) = flow {
                flow.trigger();
            }
        }
    }

    fn format_roster(&self, roster: &[(String, TeamSide)], side: TeamSide) -> String {
        let mut names: Vec<String> = roster
            .iter()
            .filter(|(_, s)| *s == side)
            .map(|(login, _)| {
                match self.registry.get(login).and_then(|a| a.client_pid()) {
                    Some(pid) => format!("{}({})", login, pid),
                    None => login.clone(),
                }
            })
            .collect();
        names.sort();
        if names.is_empty() {
            "-".to_string()
        } else {
            names.join(", ")
        }
    }

    fn side_logins(&self, round: u32, side: TeamSide) -> Vec<String> {
        let fsm = self.fsm.lock();
        fsm.round_players
            .get(&round)
            .map(|players| {
                players
                    .iter()
                    .filter(|(_, s)| **s == side)
                    .map(|(login, _)| login.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Per-round input worker: one attacker strafes briefly, another runs
    /// the long route, defenders hold their spots, and the long-route window
    /// spams the attack key until the round ends. Cancelled by the round's
    /// own stop signal throughout.
    async fn run_round_routes(self: Arc<Self>, round: u32) {
        if self.fsm.lock().routes_done.contains(&round) {
            return;
        }
        let Some(stop) = self.round_over_signal(round).cloned() else {
            return;
        };
        if sleep_cancellable(Duration::from_secs(1), Some(&stop)).await {
            return;
        }

        // the roster can lag the round start by a packet or two
        let mut attackers = Vec::new();
        for attempt in 0..2 {
            attackers = self.side_logins(round, TeamSide::T);
            if !attackers.is_empty() {
                break;
            }
            if attempt == 0 && sleep_cancellable(Duration::from_secs(1), Some(&stop)).await {
                return;
            }
        }
        if attackers.is_empty() {
            debug!("round {}: no attackers reported, routes skipped", round);
            return;
        }
        if sleep_cancellable(Duration::from_secs(1), Some(&stop)).await {
            return;
        }

        self.runtime.reload();
        self.runtime.sync_from_titles(self.windows.as_ref(), &self.title_tag);

        let mut attacker_windows: Vec<(String, WindowHandle)> = Vec::new();
        for login in &attackers {
            let pid = self.runtime.client_pid(login);
            if let Some(handle) = self
                .resolver
                .find_for_login(login, pid, 6, Duration::from_millis(500))
                .await
            {
                attacker_windows.push((login.clone(), handle));
            }
            if stop.is_triggered() {
                return;
            }
        }
        if attacker_windows.is_empty() {
            warn!("round {}: no attacker windows found", round);
            return;
        }
        if sleep_cancellable(Duration::from_secs(1), Some(&stop)).await {
            return;
        }

        attacker_windows.shuffle(&mut rand::rng());
        let long_handle;
        if attacker_windows.len() == 1 {
            let handle = attacker_windows[0].1;
            self.sequencer.press_random_pre_key(handle, Some(&stop)).await;
            self.sequencer
                .run_sequence(handle, &routes::LONG_ATTACK_ROUTE, Some(&stop))
                .await;
            long_handle = Some(handle);
        } else {
            let strafe = attacker_windows[0].1;
            let long = attacker_windows[1].1;
            self.sequencer
                .run_sequence(strafe, &routes::SHORT_STRAFE, Some(&stop))
                .await;
            if sleep_cancellable(Duration::from_millis(300), Some(&stop)).await {
                return;
            }
            self.sequencer.press_random_pre_key(long, Some(&stop)).await;
            self.sequencer
                .run_sequence(long, &routes::LONG_ATTACK_ROUTE, Some(&stop))
                .await;
            long_handle = Some(long);
        }

        // defenders hold their spot; their short routes run to completion
        let mut defenders = self.side_logins(round, TeamSide::Ct);
        defenders.sort();
        for login in &defenders {
            let pid = self.runtime.client_pid(login);
            if let Some(handle) = self
                .resolver
                .find_for_login(login, pid, 1, Duration::ZERO)
                .await
            {
                self.sequencer
                    .run_sequence(handle, &routes::DEFENDER_HOLD_ROUTE, None)
                    .await;
            }
        }

        if let Some(handle) = long_handle {
            let sequencer = self.sequencer.clone();
            let state = self.clone();
            let spam_stop = stop.clone();
            tokio::spawn(async move {
                sequencer
                    .spam_attack_key(handle, move || {
                        spam_stop.is_triggered()
                            || (round == MAX_ROUNDS && state.is_gameover())
                    })
                    .await;
            });
        }

        self.fsm.lock().routes_done.insert(round);
        debug!("round {} routes complete", round);
    }

    async fn refresh_stats_after_match(self: Arc<Self>) {
        if self.refreshing_stats.swap(true, Ordering::SeqCst) {
            warn!("stats refresh already in progress, skipped");
            return;
        }

        let mut actives: BTreeSet<String> = BTreeSet::new();
        if let Ok(infos) = self.windows.enumerate_windows() {
            for info in infos {
                if let Some(login) = login_from_title(&info.title, &self.title_tag) {
                    actives.insert(login.to_lowercase());
                }
            }
        }
        for login in self.runtime.live_logins(self.process.as_ref(), &self.client_exe) {
            actives.insert(login.to_lowercase());
        }

        if actives.is_empty() {
            warn!("no active accounts for stats refresh");
            self.refreshing_stats.store(false, Ordering::SeqCst);
            return;
        }

        let mut refreshed = 0;
        for login in &actives {
            let Some(account) = self.registry.get(login) else {
                debug!("[{}] not in registry, stats skipped", login);
                continue;
            };
            match self.stats.refresh_stats(login).await {
                Ok(stats) => {
                    info!("[{}] level {} | xp {}", login, stats.level, stats.xp);
                    account.set_stats(stats);
                    refreshed += 1;
                }
                Err(e) => warn!("[{}] stats refresh failed: {}", login, e),
            }
        }
        info!("stats refreshed for {} accounts", refreshed);
        self.refreshing_stats.store(false, Ordering::SeqCst);
    }
}

fn parse_winner(raw: &str) -> TeamSide {
    if raw.eq_ignore_ascii_case("ct") {
        TeamSide::Ct
    } else if raw.eq_ignore_ascii_case("t") {
        TeamSide::T
    } else {
        TeamSide::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{MockProcessApi, MockStatsProvider, MockWindowSystem};
    use crate::test_utils::ScriptedInput;
    use matchrig_common::models::{MapBlock, RoundBlock, SideScore};

    fn deps() -> (Arc<TelemetryState>, Arc<EventBus>) {
        let cfg = AppConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let mut windows = MockWindowSystem::new();
        windows
            .expect_enumerate_windows()
            .returning(|| Ok(Vec::new()));
        let windows: Arc<dyn WindowSystem> = Arc::new(windows);
        let process: Arc<dyn ProcessApi> = Arc::new(MockProcessApi::new());
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(AccountRegistry::new(process.clone(), bus.clone(), &cfg));
        let resolver = Arc::new(WindowResolver::new(windows.clone(), process.clone(), &cfg));
        let sequencer = Arc::new(Sequencer::new(windows.clone(), Arc::new(ScriptedInput::new())));
        let state = Arc::new(TelemetryState::new(
            Arc::new(SecretStore::new(dir.path())),
            registry,
            Arc::new(RuntimeMap::load(dir.path().join("runtime.json"))),
            resolver,
            sequencer,
            Arc::new(MockStatsProvider::new()),
            windows,
            process,
            bus.clone(),
            &cfg,
        ));
        (state, bus)
    }

    fn payload(
        round_phase: Option<RoundPhase>,
        map_phase: Option<MapPhase>,
        ct: u32,
        t: u32,
        win_team: Option<&str>,
    ) -> TelemetryPayload {
        TelemetryPayload {
            player: None,
            round: Some(RoundBlock {
                phase: round_phase,
                win_team: win_team.map(String::from),
            }),
            map: Some(MapBlock {
                phase: map_phase,
                team_ct: Some(SideScore { score: ct }),
                team_t: Some(SideScore { score: t }),
            }),
        }
    }

    #[tokio::test]
    async fn live_round_is_announced_once() {
        let (state, bus) = deps();
        let mut rx = bus.subscribe(None).await;
        let live = payload(Some(RoundPhase::Live), Some(MapPhase::Live), 0, 0, None);
        state.ingest(&live).await;
        state.ingest(&live).await;

        assert_eq!(state.round_stage(), RoundStage::Live);
        assert_eq!(state.current_round(), Some(1));

        match rx.try_recv().unwrap() {
            MatchEvent::RoundStarted { round, .. } => assert_eq!(round, 1),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "second live packet must not re-announce");
    }

    #[tokio::test]
    async fn round_over_triggers_signal_and_event() {
        let (state, bus) = deps();
        let mut rx = bus.subscribe(None).await;
        state
            .ingest(&payload(Some(RoundPhase::Live), Some(MapPhase::Live), 0, 0, None))
            .await;
        let _ = rx.try_recv();

        state
            .ingest(&payload(Some(RoundPhase::Over), Some(MapPhase::Live), 1, 0, Some("CT")))
            .await;

        assert_eq!(state.round_stage(), RoundStage::Over);
        assert!(state.round_over_triggered(1));
        match rx.try_recv().unwrap() {
            MatchEvent::RoundEnded { round, winner, .. } => {
                assert_eq!(round, 1);
                assert_eq!(winner, Some(TeamSide::Ct));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn over_without_live_stays_idle() {
        let (state, bus) = deps();
        let mut rx = bus.subscribe(None).await;
        state
            .ingest(&payload(Some(RoundPhase::Over), Some(MapPhase::Live), 1, 0, Some("T")))
            .await;

        assert_eq!(state.round_stage(), RoundStage::Idle);
        assert!(!state.round_over_triggered(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn gameover_is_edge_triggered() {
        let (state, bus) = deps();
        let mut rx = bus.subscribe(None).await;
        let over = payload(Some(RoundPhase::Over), Some(MapPhase::Gameover), 13, 3, None);
        state.ingest(&over).await;
        state.ingest(&over).await;

        assert!(state.is_gameover());
        let mut match_over_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MatchEvent::MatchOver { .. }) {
                match_over_count += 1;
            }
        }
        assert_eq!(match_over_count, 1);
    }

    #[tokio::test]
    async fn warmup_after_gameover_resets_round_state() {
        let (state, _bus) = deps();
        state
            .ingest(&payload(Some(RoundPhase::Live), Some(MapPhase::Live), 0, 0, None))
            .await;
        state
            .ingest(&payload(Some(RoundPhase::Over), Some(MapPhase::Live), 1, 0, Some("CT")))
            .await;
        state
            .ingest(&payload(None, Some(MapPhase::Gameover), 13, 3, None))
            .await;
        assert!(state.is_gameover());
        assert!(state.round_over_triggered(1));

        state
            .ingest(&payload(None, Some(MapPhase::Warmup), 0, 0, None))
            .await;
        assert!(!state.is_gameover());
        assert_eq!(state.match_stage(), MatchStage::Live);
        assert!(!state.round_over_triggered(1), "signals must be cleared for the new match");
        assert_eq!(state.current_round(), None);
    }

    #[test]
    fn winner_strings_map_to_sides() {
        assert_eq!(parse_winner("CT"), TeamSide::Ct);
        assert_eq!(parse_winner("t"), TeamSide::T);
        assert_eq!(parse_winner("draw"), TeamSide::Unknown);
    }

    #[test]
    fn round_signal_pool_covers_regulation_rounds() {
        let (state, _bus) = deps();
        assert!(state.round_over_signal(1).is_some());
        assert!(state.round_over_signal(MAX_ROUNDS).is_some());
        assert!(state.round_over_signal(0).is_none());
        assert!(state.round_over_signal(MAX_ROUNDS + 1).is_none());
    }
}
