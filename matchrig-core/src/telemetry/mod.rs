// File: matchrig-core/src/telemetry/mod.rs

pub mod server;
pub mod state;

pub use server::start_telemetry_server;
pub use state::{MatchStage, RoundStage, TelemetryState, MAX_ROUNDS};
