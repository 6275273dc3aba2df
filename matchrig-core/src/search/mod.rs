// File: matchrig-core/src/search/mod.rs

pub mod consensus;
pub mod orchestrator;

pub use consensus::{plurality, ConsensusDetector};
pub use orchestrator::{SearchOrchestrator, SEARCH_CONTROL};
