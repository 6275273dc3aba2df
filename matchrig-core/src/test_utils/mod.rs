// File: matchrig-core/src/test_utils/mod.rs
//
// Deterministic fake adapters plus a full-rig harness. Kept in the library
// proper (not behind cfg(test)) so the integration tests can drive whole
// service graphs without a desktop session.

pub mod helpers;

pub use helpers::{
    FakeDesktop, FakeLauncher, FakePixels, FakeProcs, FakeStats, InputEvent, RigHarness,
    ScriptedInput,
};
