//! src/eventbus/mod.rs
//!
//! Provides an in-process event bus that supports guaranteed delivery
//! to multiple subscribers via bounded MPSC queues. The control surface
//! and any future GUI observe account/lobby lifecycle through this bus.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use chrono::{DateTime, Utc};
use matchrig_common::models::{StatusColor, TeamSide};

/// Global event type the orchestration services publish.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    /// Periodic heartbeat from the server loop.
    Tick,

    /// System-wide informational message for operators.
    SystemMessage(String),

    /// An account's status color changed (queued, launching, running, ...).
    AccountStatusChanged {
        login: String,
        status: StatusColor,
        timestamp: DateTime<Utc>,
    },

    /// A telemetry-driven round went live.
    RoundStarted {
        round: u32,
        ct_score: u32,
        t_score: u32,
    },

    /// A telemetry-driven round finished.
    RoundEnded {
        round: u32,
        ct_score: u32,
        t_score: u32,
        winner: Option<TeamSide>,
    },

    /// The map phase reached gameover for the current match.
    MatchOver { ct_score: u32, t_score: u32 },

    /// The consensus detector saw enough accounts agree on one match id.
    MatchFound {
        match_id: String,
        agreeing: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The launch worker finished one account (successfully or not).
    LaunchFinished { login: String, success: bool },

    /// A full search-orchestrator run ended.
    SearchFinished { success: bool, cycles_used: u32 },
}

impl MatchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MatchEvent::Tick => "tick",
            MatchEvent::SystemMessage(_) => "system_message",
            MatchEvent::AccountStatusChanged { .. } => "account_status_changed",
            MatchEvent::RoundStarted { .. } => "round_started",
            MatchEvent::RoundEnded { .. } => "round_ended",
            MatchEvent::MatchOver { .. } => "match_over",
            MatchEvent::MatchFound { .. } => "match_found",
            MatchEvent::LaunchFinished { .. } => "launch_finished",
            MatchEvent::SearchFinished { .. } => "search_finished",
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<MatchEvent>` for guaranteed
/// delivery.
///
/// - If the subscriber's channel buffer fills, `publish` will await
///   until there's space (backpressure).
/// - If the subscriber has dropped the `Receiver`, the channel is closed
///   and sending returns an error.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<MatchEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber's buffer.
const DEFAULT_BUFFER_SIZE: usize = 10000;

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<MatchEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: MatchEvent) {
        let senders = {
            let subs = self.subscribers.lock().await;
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }

    /// Convenience method: publish an `AccountStatusChanged` event.
    pub async fn publish_status(&self, login: &str, status: StatusColor) {
        let event = MatchEvent::AccountStatusChanged {
            login: login.to_string(),
            status,
            timestamp: Utc::now(),
        };
        self.publish(event).await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
