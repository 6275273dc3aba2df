// File: matchrig-common/src/models/telemetry.rs

use std::fmt;
use serde::{Deserialize, Serialize};

/// Inbound telemetry record pushed by the game client's state integration.
/// Every field is optional: the feed sends partial records freely, and a
/// missing block must degrade to a no-op, never an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default)]
    pub player: Option<PlayerBlock>,
    #[serde(default)]
    pub round: Option<RoundBlock>,
    #[serde(default)]
    pub map: Option<MapBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerBlock {
    #[serde(default)]
    pub steamid: Option<String>,
    #[serde(default)]
    pub team: Option<TeamSide>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoundBlock {
    #[serde(default)]
    pub phase: Option<RoundPhase>,
    #[serde(default)]
    pub win_team: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapBlock {
    #[serde(default)]
    pub phase: Option<MapPhase>,
    #[serde(default)]
    pub team_ct: Option<SideScore>,
    #[serde(default)]
    pub team_t: Option<SideScore>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SideScore {
    #[serde(default)]
    pub score: u32,
}

/// Side reported for a player. Anything the feed invents beyond T/CT decodes
/// to `Unknown` instead of failing the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamSide {
    #[serde(rename = "T")]
    T,
    #[serde(rename = "CT")]
    Ct,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TeamSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamSide::T => write!(f, "T"),
            TeamSide::Ct => write!(f, "CT"),
            TeamSide::Unknown => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Live,
    Over,
    Freezetime,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapPhase {
    Warmup,
    Waiting,
    Live,
    Gameover,
    #[serde(other)]
    Other,
}

impl TelemetryPayload {
    pub fn round_phase(&self) -> Option<RoundPhase> {
        self.round.as_ref().and_then(|r| r.phase)
    }

    pub fn map_phase(&self) -> Option<MapPhase> {
        self.map.as_ref().and_then(|m| m.phase)
    }

    pub fn ct_score(&self) -> u32 {
        self.map
            .as_ref()
            .and_then(|m| m.team_ct.as_ref())
            .map(|s| s.score)
            .unwrap_or(0)
    }

    pub fn t_score(&self) -> u32 {
        self.map
            .as_ref()
            .and_then(|m| m.team_t.as_ref())
            .map(|s| s.score)
            .unwrap_or(0)
    }

    /// Round number a "live" event belongs to: completed rounds plus one.
    pub fn starting_round(&self) -> u32 {
        self.ct_score() + self.t_score() + 1
    }

    /// Round number an "over" event closes out.
    pub fn ending_round(&self) -> u32 {
        self.ct_score() + self.t_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let json = r#"{
            "player": {"steamid": "76561198000000001", "team": "T"},
            "round": {"phase": "live"},
            "map": {
                "phase": "live",
                "team_ct": {"score": 3},
                "team_t": {"score": 4}
            }
        }"#;
        let payload: TelemetryPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.round_phase(), Some(RoundPhase::Live));
        assert_eq!(payload.map_phase(), Some(MapPhase::Live));
        assert_eq!(payload.starting_round(), 8);
        assert_eq!(payload.ending_round(), 7);
        assert_eq!(payload.player.unwrap().team, Some(TeamSide::T));
    }

    #[test]
    fn missing_blocks_default_cleanly() {
        let payload: TelemetryPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.round_phase().is_none());
        assert!(payload.map_phase().is_none());
        assert_eq!(payload.starting_round(), 1);
    }

    #[test]
    fn unknown_phases_decode_to_other() {
        let json = r#"{"round": {"phase": "bomb"}, "map": {"phase": "intermission"}}"#;
        let payload: TelemetryPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.round_phase(), Some(RoundPhase::Other));
        assert_eq!(payload.map_phase(), Some(MapPhase::Other));
    }

    #[test]
    fn unknown_team_side_decodes_to_unknown() {
        let json = r#"{"player": {"steamid": "1", "team": "SPEC"}}"#;
        let payload: TelemetryPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.player.unwrap().team, Some(TeamSide::Unknown));
    }
}
