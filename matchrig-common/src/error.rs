// ================================================================
// File: matchrig-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("Window error: {0}")]
    Window(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Lobby error: {0}")]
    Lobby(String),

    /// Strict-order / duplicate-handle violations. These abort the enclosing
    /// flow instead of degrading to a partial layout.
    #[error("Layout violation: {0}")]
    Layout(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Platform not supported: {0}")]
    Unsupported(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
