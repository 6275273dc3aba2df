// File: matchrig-core/src/lobby/party.rs
//
// Invite/accept choreography for one team's party. Every click is a
// client-area coordinate replayed through the sequencer against the member's
// focused window; any focus failure aborts the whole flow so a half-built
// party is never reported as success.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use matchrig_common::models::WindowHandle;

use crate::cancel::{StopSignal, sleep_cancellable};
use crate::input::Sequencer;
use crate::lobby::builder::Team;
use crate::registry::ManagedAccount;
use crate::windows::WindowResolver;

const FOCUS_RETRIES: u32 = 3;
const FOCUS_RETRY_DELAY: Duration = Duration::from_millis(120);

/// Hover position that keeps the social flyout open.
const PANEL_HOVER: (i32, i32) = (380, 100);
/// Player context-menu toggle; doubles as "leave party" once in a lobby.
const MENU_TOGGLE: (i32, i32) = (375, 8);
/// "Copy invite code" row in the bot's own menu.
const COPY_INVITE: (i32, i32) = (204, 157);
const DISMISS_COPIED: (i32, i32) = (237, 157);
/// Invite-code field in the leader's menu.
const INVITE_FIELD: (i32, i32) = (195, 140);
/// Result rows drift a few pixels between layouts; sweep the column.
const RESULT_COLUMN_X: i32 = 235;
const RESULT_SWEEP_TOP: i32 = 142;
const RESULT_SWEEP_BOTTOM: i32 = 221;
const RESULT_SWEEP_STEP: i32 = 5;
const RESULT_ROW_FALLBACK_Y: i32 = 165;
/// "Accept invite" position in the bot's client.
const ACCEPT_INVITE: (i32, i32) = (306, 37);

pub struct PartyChoreography {
    sequencer: Arc<Sequencer>,
    resolver: Arc<WindowResolver>,
}

impl PartyChoreography {
    pub fn new(sequencer: Arc<Sequencer>, resolver: Arc<WindowResolver>) -> Self {
        Self { sequencer, resolver }
    }

    /// Resolves and focuses one member's window, retrying briefly. Party
    /// clicks only land on the focused client.
    async fn focus_member(&self, member: &ManagedAccount) -> Option<WindowHandle> {
        for _ in 0..FOCUS_RETRIES {
            if let Some(handle) = self.resolver.resolve_member(member) {
                if self.sequencer.focus(handle) {
                    return Some(handle);
                }
            }
            tokio::time::sleep(FOCUS_RETRY_DELAY).await;
        }
        warn!("[{}] could not focus window for party step", member.login());
        None
    }

    async fn hover_then_wait(
        &self,
        handle: WindowHandle,
        point: (i32, i32),
        wait: Duration,
        stop: Option<&StopSignal>,
    ) -> bool {
        if let Err(e) = self.sequencer.move_client(handle, point.0, point.1) {
            warn!("party hover failed: {}", e);
            return false;
        }
        !sleep_cancellable(wait, stop).await
    }

    async fn click_then_wait(
        &self,
        handle: WindowHandle,
        point: (i32, i32),
        wait: Duration,
        stop: Option<&StopSignal>,
    ) -> bool {
        if let Err(e) = self.sequencer.click_client(handle, point.0, point.1) {
            warn!("party click failed: {}", e);
            return false;
        }
        !sleep_cancellable(wait, stop).await
    }

    /// Invites every bot into the leader's party, one at a time: copy the
    /// invite code from the bot's client, paste it into the leader's invite
    /// field, pick the result, then have each bot accept.
    pub async fn collect(&self, team: &Team, stop: Option<&StopSignal>) -> bool {
        if self.focus_member(&team.leader).await.is_none() {
            return false;
        }

        for bot in &team.bots {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }
            let Some(bot_handle) = self.focus_member(bot).await else {
                return false;
            };
            if sleep_cancellable(Duration::from_millis(100), stop).await {
                return false;
            }

            // copy the bot's invite code
            if !self.hover_then_wait(bot_handle, PANEL_HOVER, Duration::from_millis(500), stop).await {
                return false;
            }
            if !self.click_then_wait(bot_handle, MENU_TOGGLE, Duration::from_millis(500), stop).await {
                return false;
            }
            if !self.click_then_wait(bot_handle, MENU_TOGGLE, Duration::from_millis(500), stop).await {
                return false;
            }
            if !self.click_then_wait(bot_handle, COPY_INVITE, Duration::from_millis(500), stop).await {
                return false;
            }
            if !self.click_then_wait(bot_handle, DISMISS_COPIED, Duration::ZERO, stop).await {
                return false;
            }

            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }

            // paste it into the leader's invite field
            let Some(leader_handle) = self.focus_member(&team.leader).await else {
                return false;
            };
            if !self.hover_then_wait(leader_handle, PANEL_HOVER, Duration::from_millis(600), stop).await {
                return false;
            }
            if !self.click_then_wait(leader_handle, MENU_TOGGLE, Duration::from_secs(1), stop).await {
                return false;
            }
            self.sequencer.paste();
            if sleep_cancellable(Duration::from_secs(1), stop).await {
                return false;
            }
            if !self.click_then_wait(leader_handle, INVITE_FIELD, Duration::from_millis(1500), stop).await {
                return false;
            }
            let mut y = RESULT_SWEEP_TOP;
            while y < RESULT_SWEEP_BOTTOM {
                if self.sequencer.click_client(leader_handle, RESULT_COLUMN_X, y).is_err() {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                y += RESULT_SWEEP_STEP;
            }
            if self
                .sequencer
                .click_client(leader_handle, RESULT_COLUMN_X, RESULT_ROW_FALLBACK_Y)
                .is_err()
            {
                return false;
            }
        }

        if sleep_cancellable(Duration::from_millis(1500), stop).await {
            return false;
        }

        for bot in &team.bots {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }
            let Some(bot_handle) = self.focus_member(bot).await else {
                return false;
            };
            if !self.hover_then_wait(bot_handle, PANEL_HOVER, Duration::from_millis(600), stop).await {
                return false;
            }
            if self
                .sequencer
                .click_client(bot_handle, ACCEPT_INVITE.0, ACCEPT_INVITE.1)
                .is_err()
            {
                return false;
            }
        }

        true
    }

    /// Leaves the party from the primary bot's client; one leave is enough
    /// to break up the lobby.
    pub async fn disband(&self, team: &Team, stop: Option<&StopSignal>) -> bool {
        for bot in team.bots.iter().take(1) {
            if stop.map(|s| s.is_triggered()).unwrap_or(false) {
                return false;
            }
            let Some(handle) = self.focus_member(bot).await else {
                return false;
            };
            if sleep_cancellable(Duration::from_millis(100), stop).await {
                return false;
            }
            if !self.hover_then_wait(handle, PANEL_HOVER, Duration::from_millis(500), stop).await {
                return false;
            }
            if self
                .sequencer
                .click_client(handle, MENU_TOGGLE.0, MENU_TOGGLE.1)
                .is_err()
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppConfig;
    use crate::lobby::builder;
    use crate::os::{MockProcessApi, MockWindowSystem};
    use crate::test_utils::ScriptedInput;
    use matchrig_common::models::AccountRecord;

    fn account(login: &str) -> Arc<ManagedAccount> {
        Arc::new(ManagedAccount::new(AccountRecord::new(login, "pw", 76561198000000001)))
    }

    #[tokio::test]
    async fn collect_aborts_when_leader_has_no_window() {
        let mut windows = MockWindowSystem::new();
        windows.expect_enumerate_windows().returning(|| Ok(Vec::new()));

        let windows: Arc<dyn crate::os::WindowSystem> = Arc::new(windows);
        let resolver = Arc::new(WindowResolver::new(
            windows.clone(),
            Arc::new(MockProcessApi::new()),
            &AppConfig::default(),
        ));
        let sequencer = Arc::new(Sequencer::new(windows, Arc::new(ScriptedInput::new())));
        let party = PartyChoreography::new(sequencer, resolver);

        let accounts: Vec<_> = ["a", "b", "c", "d"].iter().map(|l| account(l)).collect();
        let (team, _) = builder::strict_pairs(&accounts).unwrap();
        assert!(!party.collect(&team, None).await);
    }

    #[tokio::test]
    async fn cancelled_disband_returns_false() {
        let windows: Arc<dyn crate::os::WindowSystem> = Arc::new(MockWindowSystem::new());
        let resolver = Arc::new(WindowResolver::new(
            windows.clone(),
            Arc::new(MockProcessApi::new()),
            &AppConfig::default(),
        ));
        let sequencer = Arc::new(Sequencer::new(windows, Arc::new(ScriptedInput::new())));
        let party = PartyChoreography::new(sequencer, resolver);

        let accounts: Vec<_> = ["a", "b", "c", "d"].iter().map(|l| account(l)).collect();
        let (team, _) = builder::strict_pairs(&accounts).unwrap();

        let stop = StopSignal::new();
        stop.trigger();
        assert!(!party.disband(&team, Some(&stop)).await);
    }
}
