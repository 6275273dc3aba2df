// File: matchrig-core/src/input/routes.rs
//
// Scripted movement routes the round automation replays. Each step is a
// key combo plus how long to hold it.

/// Full attacker run from spawn towards the far site, ending with two
/// quick weapon-slot taps.
pub const LONG_ATTACK_ROUTE: [(&str, f32); 19] = [
    ("A", 0.1),
    ("W", 1.7),
    ("A", 2.7),
    ("W", 5.2),
    ("S", 0.31),
    ("A", 0.4),
    ("E", 0.1),
    ("W+A", 2.3),
    ("D", 0.4),
    ("W+A", 0.7),
    ("W", 2.4),
    ("S", 0.3),
    ("A", 1.6),
    ("W", 1.8),
    ("D", 0.8),
    ("A+W", 4.8),
    ("S+A", 5.1),
    ("2", 0.0),
    ("1", 0.0),
];

/// Sidestep that clears the second attacker out of the first one's path.
pub const SHORT_STRAFE: [(&str, f32); 1] = [("D", 1.0)];

/// Defender hold pattern, run in place near spawn.
pub const DEFENDER_HOLD_ROUTE: [(&str, f32); 3] = [("A+S", 1.8), ("A+W", 1.8), ("S+A", 1.8)];

/// One of these is tapped before the long route starts, to knock the
/// client out of any lingering UI focus.
pub const PRE_ROUTE_KEYS: [char; 7] = ['z', 'x', 'c', 'v', 'n', ',', '.'];
