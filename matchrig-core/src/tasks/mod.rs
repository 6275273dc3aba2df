// File: matchrig-core/src/tasks/mod.rs

pub mod auto_arrange;
pub mod post_match;

pub use auto_arrange::spawn_auto_arrange;
pub use post_match::PostMatchFlow;
