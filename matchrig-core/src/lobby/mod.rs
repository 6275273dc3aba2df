// File: matchrig-core/src/lobby/mod.rs
//
// Current team assignment plus every operation that acts on it: strict slot
// rebuilds, window arrangement in team order, party collect/disband, shuffle
// and the escape broadcast. The slot invariants are deliberately harsh: any
// ambiguity about which window is which aborts the operation instead of
// guessing, because every later click assumes the 1/2/3/4 layout.

pub mod builder;
pub mod party;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{info, warn};

pub use builder::Team;
pub use party::PartyChoreography;

use crate::cancel::{StopSignal, sleep_cancellable};
use crate::config::AppConfig;
use crate::input::Sequencer;
use crate::os::{ProcessApi, WindowSystem};
use crate::registry::{AccountRegistry, ManagedAccount};
use crate::windows::{WindowArranger, WindowResolver};

#[derive(Default)]
struct LobbyState {
    team1: Option<Team>,
    team2: Option<Team>,
    /// Login order the windows were last committed to, left to right.
    last_window_order: Vec<String>,
}

pub struct LobbyService {
    registry: Arc<AccountRegistry>,
    resolver: Arc<WindowResolver>,
    arranger: Arc<WindowArranger>,
    sequencer: Arc<Sequencer>,
    windows: Arc<dyn WindowSystem>,
    process: Arc<dyn ProcessApi>,
    party: PartyChoreography,
    client_exe: String,
    state: Mutex<LobbyState>,
}

impl LobbyService {
    pub fn new(
        registry: Arc<AccountRegistry>,
        resolver: Arc<WindowResolver>,
        arranger: Arc<WindowArranger>,
        sequencer: Arc<Sequencer>,
        windows: Arc<dyn WindowSystem>,
        process: Arc<dyn ProcessApi>,
        cfg: &AppConfig,
    ) -> Self {
        let party = PartyChoreography::new(sequencer.clone(), resolver.clone());
        Self {
            registry,
            resolver,
            arranger,
            sequencer,
            windows,
            process,
            party,
            client_exe: cfg.client_exe.to_lowercase(),
            state: Mutex::new(LobbyState::default()),
        }
    }

    pub fn teams(&self) -> Option<(Team, Team)> {
        let state = self.state.lock();
        match (&state.team1, &state.team2) {
            (Some(t1), Some(t2)) => Some((t1.clone(), t2.clone())),
            _ => None,
        }
    }

    pub fn set_teams(&self, team1: Team, team2: Team, window_order: Vec<String>) {
        let mut state = self.state.lock();
        state.team1 = Some(team1);
        state.team2 = Some(team2);
        state.last_window_order = window_order;
    }

    pub fn clear_teams(&self) {
        let mut state = self.state.lock();
        state.team1 = None;
        state.team2 = None;
    }

    /// Both teams assigned and every member still backed by a live client.
    pub fn is_valid(&self) -> bool {
        let members = self.members();
        if members.is_empty() {
            return false;
        }
        members.iter().all(|m| self.registry.is_account_valid(m))
    }

    /// All members of both teams, or empty when either team is missing.
    pub fn members(&self) -> Vec<Arc<ManagedAccount>> {
        let state = self.state.lock();
        let (Some(t1), Some(t2)) = (&state.team1, &state.team2) else {
            return Vec::new();
        };
        let mut all = t1.members();
        all.extend(t2.members());
        all
    }

    /// Accounts whose controls a corrective pass should press. Leaders when
    /// requested (with a positional slot-1/slot-3 fallback if no teams are
    /// built), otherwise all team members; with nothing assigned at all,
    /// every valid account.
    pub fn press_members(&self, leaders_only: bool) -> Vec<Arc<ManagedAccount>> {
        let mut members = {
            let state = self.state.lock();
            if leaders_only {
                let mut leaders = Vec::new();
                if let Some(t1) = &state.team1 {
                    leaders.push(t1.leader.clone());
                }
                if let Some(t2) = &state.team2 {
                    leaders.push(t2.leader.clone());
                }
                leaders
            } else {
                let mut all = Vec::new();
                if let Some(t1) = &state.team1 {
                    all.extend(t1.members());
                }
                if let Some(t2) = &state.team2 {
                    all.extend(t2.members());
                }
                all
            }
        };
        if leaders_only && members.is_empty() {
            let ordered = self.ordered_valid();
            if ordered.len() >= 3 {
                members = vec![ordered[0].clone(), ordered[2].clone()];
            }
        }
        if members.is_empty() {
            members = self.registry.valid_accounts();
        }
        members
    }

    /// Valid accounts in current screen order, left to right.
    fn ordered_valid(&self) -> Vec<Arc<ManagedAccount>> {
        self.resolver
            .ordered_by_position(&self.registry.valid_accounts())
            .into_iter()
            .map(|(account, _)| account)
            .collect()
    }

    /// Fixes the four leftmost windows as slots 1..4 and builds the strict
    /// leader/bot pairs from them.
    fn build_strict_slots(&self) -> bool {
        let top4 = match self.resolver.strict_four(&self.registry.valid_accounts()) {
            Ok(top4) => top4,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };
        let Some((team1, team2)) = builder::strict_pairs(&top4) else {
            return false;
        };
        let order = top4.iter().map(|a| a.login().to_string()).collect();
        self.set_teams(team1, team2, order);
        true
    }

    /// Strict rebuild plus the pair-layout check; the combination every
    /// search cycle runs before touching any window.
    pub fn rebuild_strict_slots(&self) -> bool {
        self.build_strict_slots() && self.strict_pairs_hold()
    }

    /// Verifies the strict layout still holds on screen: leader1, bot1,
    /// leader2, bot2 resolve to four distinct windows whose left-to-right
    /// order matches exactly.
    pub fn strict_pairs_hold(&self) -> bool {
        let members = {
            let state = self.state.lock();
            let (Some(t1), Some(t2)) = (&state.team1, &state.team2) else {
                return false;
            };
            let (Some(b1), Some(b2)) = (t1.primary_bot(), t2.primary_bot()) else {
                return false;
            };
            vec![t1.leader.clone(), b1.clone(), t2.leader.clone(), b2.clone()]
        };
        self.resolver.strict_order_holds(&members)
    }

    /// Tiles the current team members into a row. Order preference: the
    /// explicit list, then the last committed order, then registry order.
    /// Members missing from the order source are appended unordered only if
    /// nothing matched at all.
    pub fn arrange_in_order(&self, order: Option<&[String]>, stop: Option<&StopSignal>) -> bool {
        let (all_members, order_source) = {
            let state = self.state.lock();
            let (Some(t1), Some(t2)) = (&state.team1, &state.team2) else {
                return false;
            };
            let mut all = t1.members();
            all.extend(t2.members());
            let source: Vec<String> = match order {
                Some(o) if !o.is_empty() => o.to_vec(),
                _ if !state.last_window_order.is_empty() => state.last_window_order.clone(),
                _ => self
                    .registry
                    .all()
                    .iter()
                    .map(|a| a.login().to_string())
                    .collect(),
            };
            (all, source)
        };

        let by_login: HashMap<String, Arc<ManagedAccount>> = all_members
            .iter()
            .map(|m| (m.login().to_string(), m.clone()))
            .collect();
        let mut ordered: Vec<Arc<ManagedAccount>> = order_source
            .iter()
            .filter_map(|login| by_login.get(login).cloned())
            .collect();
        if ordered.is_empty() {
            ordered = all_members;
        }

        self.arranger.arrange(&ordered, &self.resolver, stop)
    }

    /// Random team split over all valid accounts, committed to screen.
    pub fn shuffle(&self, stop: Option<&StopSignal>) -> bool {
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return false;
        }
        let mut valid = self.registry.valid_accounts();
        if valid.len() < 4 {
            warn!("not enough running clients to shuffle teams");
            return false;
        }
        valid.shuffle(&mut rand::rng());
        let order: Vec<String> = valid.iter().map(|a| a.login().to_string()).collect();
        let Some((team1, team2)) = builder::split_at_midpoint(&valid) else {
            return false;
        };
        self.set_teams(team1, team2, order.clone());

        let moved = self.arrange_in_order(Some(&order), stop);
        if moved {
            info!("teams shuffled");
        }
        moved
    }

    /// Builds both parties from the strict slots: rebuild, align the row,
    /// verify the layout, then run the invite choreography per team.
    pub async fn collect(&self, stop: Option<&StopSignal>) -> bool {
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return false;
        }
        if !self.build_strict_slots() {
            return false;
        }
        if !self.arrange_in_order(None, stop) {
            return false;
        }
        if !self.strict_pairs_hold() {
            warn!("strict collect failed: full 1/2 and 3/4 window pairs required");
            return false;
        }
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return false;
        }
        let Some((team1, team2)) = self.teams() else {
            return false;
        };
        if !self.party.collect(&team1, stop).await {
            return false;
        }
        if !self.party.collect(&team2, stop).await {
            return false;
        }
        true
    }

    /// Breaks up both parties through their primary bots. Windows are NOT
    /// rearranged first so the leave click lands on the real bot window, not
    /// on whatever ends up second after a forced move.
    pub async fn disband(&self, stop: Option<&StopSignal>) -> bool {
        if stop.map(|s| s.is_triggered()).unwrap_or(false) {
            return false;
        }
        if !self.ensure_teams_for_disband() {
            return false;
        }
        let Some((team1, team2)) = self.teams() else {
            return false;
        };
        if !self.party.disband(&team1, stop).await {
            return false;
        }
        self.state.lock().team1 = None;
        if !self.party.disband(&team2, stop).await {
            return false;
        }
        self.state.lock().team2 = None;
        true
    }

    fn ensure_teams_for_disband(&self) -> bool {
        {
            let state = self.state.lock();
            if let (Some(t1), Some(t2)) = (&state.team1, &state.team2) {
                if !t1.bots.is_empty() && !t2.bots.is_empty() {
                    return true;
                }
            }
        }
        self.auto_create()
    }

    /// Builds teams from every windowed account by screen position, extras
    /// alternating between the teams.
    pub fn auto_create(&self) -> bool {
        let ordered = self.ordered_valid();
        let Some((team1, team2)) = builder::alternating(&ordered) else {
            warn!("need at least four clients with windows to build teams");
            return false;
        };
        let order = ordered.iter().map(|a| a.login().to_string()).collect();
        self.set_teams(team1, team2, order);
        true
    }

    /// One-time preparation before a search run: raise every client window,
    /// fix the strict slots, align the row and verify the layout.
    pub async fn prepare_strict_four(&self, stop: Option<&StopSignal>) -> bool {
        let lifted = self.arranger.lift_all().await;
        info!("window lift done: raised {} windows", lifted);

        if !self.build_strict_slots() {
            return false;
        }
        if !self.arrange_in_order(None, stop) {
            warn!("window arrange failed during strict preparation");
            return false;
        }
        if !self.strict_pairs_hold() {
            warn!("strict check failed after arranging: full 1/2 and 3/4 pairs required");
            return false;
        }
        true
    }

    pub async fn lift_all(&self) -> usize {
        self.arranger.lift_all().await
    }

    /// Sends a double escape to every visible window of every client
    /// process, deduplicated by handle. Returns how many windows were hit.
    pub async fn double_escape_all(&self, stop: Option<&StopSignal>) -> usize {
        let pids: HashSet<u32> = self
            .process
            .processes_matching(&self.client_exe)
            .into_iter()
            .collect();
        if pids.is_empty() {
            return 0;
        }
        let infos = match self.windows.enumerate_windows() {
            Ok(infos) => infos,
            Err(e) => {
                warn!("window enumeration failed: {}", e);
                return 0;
            }
        };

        let mut seen = HashSet::new();
        let mut count = 0;
        for info in infos {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return count;
            }
            if !pids.contains(&info.pid) || !seen.insert(info.handle) {
                continue;
            }
            self.sequencer.focus(info.handle);
            if sleep_cancellable(Duration::from_millis(100), stop).await {
                return count;
            }
            if !self.sequencer.double_escape(info.handle, stop).await {
                return count;
            }
            count += 1;
        }
        count
    }
}
