// File: matchrig-common/src/models/ui.rs

use std::fmt;
use serde::{Deserialize, Serialize};

/// Discrete classification of a sampled control region. Recomputed on every
/// poll, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    Red,
    Green,
    Unknown,
}

impl ButtonState {
    pub fn is_green(&self) -> bool {
        matches!(self, ButtonState::Green)
    }
}

impl fmt::Display for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonState::Red => write!(f, "red"),
            ButtonState::Green => write!(f, "green"),
            ButtonState::Unknown => write!(f, "unknown"),
        }
    }
}
