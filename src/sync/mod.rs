//! The synchronization core.
//!
//! Text is split into sentence-like [`Chunk`]s and spoken one at a time. For
//! each chunk a [`PlaybackDriver`] waits for the first timing signal: a native
//! word boundary from the engine, or the boundary deadline. The winner decides
//! whether the chunk's words are revealed on the engine's boundaries or on an
//! [`estimate`]d schedule. [`SyncController`] strings chunks together, owns
//! the timers, and guards everything with a [`SessionToken`](crate::SessionToken)
//! so that nothing from a stopped session is ever emitted.

pub mod chunker;
pub mod controller;
pub mod driver;
pub mod estimator;
pub mod events;
pub mod timers;

pub use chunker::{split, strip_punctuation, Chunk};
pub use controller::{PlayOutcome, SyncController};
pub use driver::{ChunkParams, ChunkPhase, PlaybackDriver};
pub use estimator::{baseline_interval_ms, estimate, Estimate, WordTiming};
pub use events::{SyncMode, SyncState, WordMode, WordRevealEvent, WordSink};
pub use timers::{TimerKey, TimerQueue};
