// tests/search_tests.rs
//
// Search orchestrator over a full fake rig: the bounded recovery loop when
// no match ever arrives, and the early exit when consensus fires mid-search.

use std::time::Duration;

use matchrig_core::eventbus::MatchEvent;
use matchrig_core::test_utils::RigHarness;
use matchrig_common::models::Rgb;

const LOGINS: [&str; 4] = ["alpha", "bravo", "charlie", "delta"];

fn searchable_rig() -> RigHarness {
    let rig = RigHarness::new();
    for (i, login) in LOGINS.iter().enumerate() {
        rig.add_client(login, i as u32 + 1, i as i32 * rig.cfg.tile_width);
    }
    // Every control reads green, so searches start and restart freely.
    rig.pixels.set_default(Rgb { r: 30, g: 210, b: 30 });
    rig
}

#[tokio::test(start_paused = true)]
async fn search_gives_up_after_the_configured_recovery_cycles() {
    let rig = searchable_rig();
    let mut rx = rig.bus.subscribe(None).await;

    assert!(!rig.search.run(None).await);
    assert!(!rig.search.is_running());

    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        if let MatchEvent::SearchFinished {
            success,
            cycles_used,
        } = event
        {
            finished = Some((success, cycles_used));
        }
    }
    let (success, cycles_used) = finished.expect("a finished run must be reported");
    assert!(!success);
    assert_eq!(cycles_used, rig.cfg.recovery_cycles);

    // A failed run leaves nothing behind: no background task keeps clicking.
    rig.input.clear();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rig.input.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn consensus_mid_search_completes_the_run() {
    let rig = searchable_rig();
    let mut rx = rig.bus.subscribe(None).await;

    let registry = rig.registry.clone();
    let consensus = rig.consensus.clone();
    tokio::spawn(async move {
        // All four clients report the same match shortly into the run.
        tokio::time::sleep(Duration::from_secs(1)).await;
        for login in LOGINS {
            registry.get(login).unwrap().set_last_match_id("match-42");
        }
        consensus.poll_once().await;
    });

    let search = rig.search.clone();
    let success = tokio::spawn(async move { search.run(None).await })
        .await
        .unwrap();
    assert!(success);
    assert!(rig.consensus.match_found());

    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        if let MatchEvent::SearchFinished {
            success,
            cycles_used,
        } = event
        {
            finished = Some((success, cycles_used));
        }
    }
    assert_eq!(finished, Some((true, 1)));
}
