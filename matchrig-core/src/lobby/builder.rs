// File: matchrig-core/src/lobby/builder.rs
//
// Pure team-plan construction. Nothing here touches windows or processes;
// callers pass accounts already ordered the way the plan expects (screen
// order for slot-based plans, shuffled order for the random split).

use std::sync::Arc;

use crate::registry::ManagedAccount;

/// One lobby side: a leader whose client drives the search and the bots
/// invited into the leader's party.
#[derive(Clone)]
pub struct Team {
    pub leader: Arc<ManagedAccount>,
    pub bots: Vec<Arc<ManagedAccount>>,
}

impl Team {
    pub fn new(leader: Arc<ManagedAccount>, bots: Vec<Arc<ManagedAccount>>) -> Self {
        Self { leader, bots }
    }

    /// Leader first, then bots in invite order.
    pub fn members(&self) -> Vec<Arc<ManagedAccount>> {
        let mut all = vec![self.leader.clone()];
        all.extend(self.bots.iter().cloned());
        all
    }

    pub fn logins(&self) -> Vec<String> {
        self.members().iter().map(|m| m.login().to_string()).collect()
    }

    pub fn primary_bot(&self) -> Option<&Arc<ManagedAccount>> {
        self.bots.first()
    }
}

/// Strict slot assignment from screen-ordered accounts: slot 1 leads team
/// one with slot 2 as its bot, slot 3 leads team two with slot 4 as its bot.
/// Anything past slot 4 is ignored. Needs at least four accounts.
pub fn strict_pairs(ordered: &[Arc<ManagedAccount>]) -> Option<(Team, Team)> {
    if ordered.len() < 4 {
        return None;
    }
    let team1 = Team::new(ordered[0].clone(), vec![ordered[1].clone()]);
    let team2 = Team::new(ordered[2].clone(), vec![ordered[3].clone()]);
    Some((team1, team2))
}

/// Slot plan that keeps every account: the first four take the strict slots,
/// extras alternate between the teams as additional bots.
pub fn alternating(ordered: &[Arc<ManagedAccount>]) -> Option<(Team, Team)> {
    if ordered.len() < 4 {
        return None;
    }
    let mut team1 = Team::new(ordered[0].clone(), vec![ordered[1].clone()]);
    let mut team2 = Team::new(ordered[2].clone(), vec![ordered[3].clone()]);
    for (index, account) in ordered.iter().enumerate().skip(4) {
        if index % 2 == 0 {
            team1.bots.push(account.clone());
        } else {
            team2.bots.push(account.clone());
        }
    }
    Some((team1, team2))
}

/// Random-split plan used after a shuffle: the first account leads team one
/// with everything up to the midpoint as bots, the midpoint account leads
/// team two with the rest.
pub fn split_at_midpoint(accounts: &[Arc<ManagedAccount>]) -> Option<(Team, Team)> {
    if accounts.len() < 4 {
        return None;
    }
    let mid = accounts.len() / 2;
    let team1 = Team::new(accounts[0].clone(), accounts[1..mid].to_vec());
    let team2 = Team::new(accounts[mid].clone(), accounts[mid + 1..].to_vec());
    Some((team1, team2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchrig_common::models::AccountRecord;

    fn account(login: &str) -> Arc<ManagedAccount> {
        Arc::new(ManagedAccount::new(AccountRecord::new(login, "pw", 76561198000000001)))
    }

    fn logins(team: &Team) -> Vec<String> {
        team.logins()
    }

    #[test]
    fn strict_pairs_assigns_slots() {
        let accounts: Vec<_> = ["a", "b", "c", "d"].iter().map(|l| account(l)).collect();
        let (t1, t2) = strict_pairs(&accounts).unwrap();
        assert_eq!(logins(&t1), ["a", "b"]);
        assert_eq!(logins(&t2), ["c", "d"]);
    }

    #[test]
    fn strict_pairs_needs_four() {
        let accounts: Vec<_> = ["a", "b", "c"].iter().map(|l| account(l)).collect();
        assert!(strict_pairs(&accounts).is_none());
    }

    #[test]
    fn alternating_distributes_extras() {
        let accounts: Vec<_> = ["a", "b", "c", "d", "e", "f", "g"]
            .iter()
            .map(|l| account(l))
            .collect();
        let (t1, t2) = alternating(&accounts).unwrap();
        // e (index 4) and g (index 6) land on team one, f (index 5) on team two
        assert_eq!(logins(&t1), ["a", "b", "e", "g"]);
        assert_eq!(logins(&t2), ["c", "d", "f"]);
    }

    #[test]
    fn split_at_midpoint_halves_the_list() {
        let accounts: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|l| account(l)).collect();
        let (t1, t2) = split_at_midpoint(&accounts).unwrap();
        assert_eq!(logins(&t1), ["a", "b"]);
        assert_eq!(logins(&t2), ["c", "d", "e"]);
    }

    #[test]
    fn primary_bot_is_first_invited() {
        let accounts: Vec<_> = ["a", "b", "c", "d"].iter().map(|l| account(l)).collect();
        let (t1, _) = strict_pairs(&accounts).unwrap();
        assert_eq!(t1.primary_bot().unwrap().login(), "b");
    }
}
