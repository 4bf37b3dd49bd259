//! # floatywords
//!
//! Speech-to-word-event synchronization: drive a text-to-speech engine through
//! a block of text and reveal each spoken word as it is heard.
//!
//! ## Features
//!
//! - **Native timing**: follows the engine's word-boundary callbacks when it reports them
//! - **Estimated timing**: falls back to a word-length weighted schedule when it doesn't
//! - **Sync offset**: shift every reveal by a constant delay
//! - **Runtime** (default feature): a tokio event loop plus a simulated engine
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! floatywords = "2026.2"
//! ```
//!
//! ```ignore
//! use floatywords::{engines::simulated::{SimulatedEngine, SimulatedEngineConfig}, runtime::SyncRuntime, SyncConfig};
//!
//! let (engine, engine_events) = SimulatedEngine::new(SimulatedEngineConfig::default());
//! let (runtime, handle, mut words) = SyncRuntime::new(engine, engine_events, SyncConfig::default())?;
//! tokio::spawn(runtime.run());
//!
//! handle.play("Hello world. Second part!")?;
//! while let Some(word) = words.recv().await {
//!     println!("{} ({})", word.word, word.mode);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The synchronization core in [`sync`] is sans-IO: every entry point takes the
//! current time in milliseconds, so it can be driven by any event loop.

pub mod config;
pub mod engines;
#[cfg(feature = "runtime")]
pub mod runtime;
pub mod share;
pub mod sync;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::SyncConfig;
pub use sync::{
    PlayOutcome, SyncController, SyncMode, SyncState, WordMode, WordRevealEvent, WordSink,
};

/// Milliseconds on a monotonic clock chosen by the caller.
pub type Millis = u64;

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Speech rate {0} is outside the supported range 0.5–2.0")]
    RateOutOfRange(f32),
    #[error("Sync offset {0}s is outside the supported range -2s–+2s")]
    OffsetOutOfRange(f32),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Speech engine error: {0}")]
    Engine(String),
    #[error("Invalid share link: {0}")]
    InvalidShareLink(#[from] url::ParseError),
    #[error("Sync runtime is no longer running")]
    RuntimeClosed,
}

/// Identity of one playback session.
///
/// Incremented on every `play` and `stop`; anything tagged with an older
/// token belongs to a superseded session and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SessionToken(pub u64);

impl SessionToken {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one chunk submitted to the speech engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtteranceId {
    pub session: SessionToken,
    pub chunk: usize,
}

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.chunk)
    }
}

/// A single speech request.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    /// Text to speak; boundary indices are byte offsets into it.
    pub text: String,
    /// Speech rate multiplier (1.0 = normal).
    pub rate: f32,
}

/// What kind of unit a boundary callback marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Word,
    Sentence,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    Start,
    Boundary {
        /// Byte offset into the utterance text.
        char_index: usize,
        kind: BoundaryKind,
    },
    End,
    Error(String),
}

/// A callback from the speech engine, tagged with the utterance it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub utterance: UtteranceId,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(utterance: UtteranceId, kind: EngineEventKind) -> Self {
        Self { utterance, kind }
    }
}

/// Common interface for text-to-speech engines driven by the sync core.
///
/// Engines are fire-and-forget: `speak` submits and returns, and the engine
/// later reports progress as [`EngineEvent`]s through its own transport.
/// Boundary reporting is best-effort and may never happen.
pub trait SpeechEngine {
    /// Submit an utterance. An `Err` means the engine refused it outright.
    fn speak(&mut self, utterance: Utterance) -> Result<(), SyncError>;

    /// Stop any in-progress utterance. The engine may still deliver
    /// `End`/`Error` for it afterwards.
    fn cancel(&mut self);
}

impl<E: SpeechEngine + ?Sized> SpeechEngine for Box<E> {
    fn speak(&mut self, utterance: Utterance) -> Result<(), SyncError> {
        (**self).speak(utterance)
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}
