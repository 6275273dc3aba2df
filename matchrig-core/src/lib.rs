// src/lib.rs

pub mod cancel;
pub mod config;
pub mod eventbus;
pub mod input;
pub mod launch;
pub mod lobby;
pub mod logwatch;
pub mod oracle;
pub mod os;
pub mod registry;
pub mod search;
pub mod tasks;
pub mod telemetry;
pub mod test_utils;
pub mod windows;

pub use cancel::StopSignal;
pub use config::AppConfig;
pub use matchrig_common::Error;
