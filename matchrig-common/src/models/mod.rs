// File: matchrig-common/src/models/mod.rs
pub mod account;
pub mod telemetry;
pub mod ui;
pub mod window;

pub use account::{AccountRecord, PlayerStats, RuntimeEntry, StatusColor};
pub use telemetry::{MapBlock, MapPhase, RoundBlock, RoundPhase, SideScore, TeamSide, TelemetryPayload};
pub use ui::ButtonState;
pub use window::{Rgb, WindowHandle, WindowInfo, WindowRect};
