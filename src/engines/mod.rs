//! Speech engines.
//!
//! Real engines (a browser's speech synthesis, a platform TTS service) live
//! with the host application and implement [`SpeechEngine`](crate::SpeechEngine).
//! This module carries the engines bundled with the crate.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `runtime` - [`simulated::SimulatedEngine`], a fixed-clock engine driven by tokio

#[cfg(feature = "runtime")]
pub mod simulated;
