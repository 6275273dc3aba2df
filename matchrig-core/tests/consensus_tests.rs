// tests/consensus_tests.rs
//
// Consensus detector over a full fake rig: threshold gating, the accept
// double-click pass and the id clearing that stops repeat fires.

use std::time::Duration;

use matchrig_core::eventbus::MatchEvent;
use matchrig_core::test_utils::RigHarness;

const LOGINS: [&str; 4] = ["alpha", "bravo", "charlie", "delta"];

fn rig_with_clients() -> RigHarness {
    let rig = RigHarness::new();
    for (i, login) in LOGINS.iter().enumerate() {
        let seq = i as u32 + 1;
        rig.add_client(login, seq, i as i32 * rig.cfg.tile_width);
    }
    rig
}

#[tokio::test(start_paused = true)]
async fn four_agreeing_clients_trigger_the_accept() {
    let rig = rig_with_clients();
    let mut rx = rig.bus.subscribe(None).await;
    for login in LOGINS {
        rig.registry
            .get(login)
            .unwrap()
            .set_last_match_id("match-77");
    }

    rig.consensus.poll_once().await;

    assert!(rig.consensus.match_found());
    let mut found = None;
    while let Ok(event) = rx.try_recv() {
        if let MatchEvent::MatchFound {
            match_id, agreeing, ..
        } = event
        {
            found = Some((match_id, agreeing));
        }
    }
    let (match_id, mut agreeing) = found.expect("consensus publishes the accepted match");
    assert_eq!(match_id, "match-77");
    agreeing.sort();
    assert_eq!(agreeing, LOGINS);

    // Two click passes over four agreeing windows.
    assert_eq!(rig.input.click_count(), 8);
    for login in LOGINS {
        assert_eq!(rig.registry.get(login).unwrap().last_match_id(), None);
    }
}

#[tokio::test(start_paused = true)]
async fn cleared_ids_keep_the_next_poll_quiet() {
    let rig = rig_with_clients();
    for login in LOGINS {
        rig.registry.get(login).unwrap().set_last_match_id("match-5");
    }
    rig.consensus.poll_once().await;
    assert_eq!(rig.input.click_count(), 8);

    // Ids were consumed by the accept pass; polling again does nothing.
    rig.input.clear();
    rig.consensus.poll_once().await;
    assert_eq!(rig.input.click_count(), 0);
    assert!(rig.consensus.match_found());
}

#[tokio::test(start_paused = true)]
async fn three_votes_are_below_the_threshold() {
    let rig = rig_with_clients();
    let mut rx = rig.bus.subscribe(None).await;
    for login in &LOGINS[..3] {
        rig.registry.get(*login).unwrap().set_last_match_id("match-9");
    }

    // Three ids reported out of four voters.
    rig.consensus.poll_once().await;
    assert!(!rig.consensus.match_found());
    assert_eq!(rig.input.click_count(), 0);

    // A fourth id that disagrees still leaves the top count at three.
    rig.registry
        .get("delta")
        .unwrap()
        .set_last_match_id("match-1");
    rig.consensus.poll_once().await;
    assert!(!rig.consensus.match_found());
    assert_eq!(rig.input.click_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn late_fourth_vote_completes_the_consensus() {
    let rig = rig_with_clients();
    for login in &LOGINS[..3] {
        rig.registry.get(*login).unwrap().set_last_match_id("match-3");
    }
    rig.consensus.poll_once().await;
    assert!(!rig.consensus.match_found());

    rig.registry
        .get("delta")
        .unwrap()
        .set_last_match_id("match-3");
    rig.consensus.poll_once().await;
    assert!(rig.consensus.match_found());
    assert_eq!(rig.input.click_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn background_poller_fires_and_stops_on_shutdown() {
    let rig = rig_with_clients();
    for login in LOGINS {
        rig.registry.get(login).unwrap().set_last_match_id("match-8");
    }

    let poller = rig.consensus.spawn();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rig.consensus.match_found());

    rig.bus.shutdown();
    tokio::time::timeout(Duration::from_secs(5), poller)
        .await
        .expect("poller exits on shutdown")
        .unwrap();
}
