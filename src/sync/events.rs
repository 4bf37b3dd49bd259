use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Millis;

/// Where a revealed word's timing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordMode {
    /// The engine reported a word boundary.
    Native,
    /// The word-length estimator scheduled it.
    Estimated,
}

impl fmt::Display for WordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordMode::Native => f.pad("native"),
            WordMode::Estimated => f.pad("estimated"),
        }
    }
}

/// One spoken word, ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordRevealEvent {
    /// Word text with punctuation stripped.
    pub word: String,
    pub mode: WordMode,
    /// Index of the chunk the word was spoken in.
    pub chunk: usize,
    /// Controller time at which the word was emitted.
    pub at_ms: Millis,
}

/// The timing mode shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncMode {
    #[default]
    #[serde(rename = "Detecting...")]
    Detecting,
    #[serde(rename = "Browser Native")]
    Native,
    #[serde(rename = "Estimated")]
    Estimated,
}

impl SyncMode {
    pub fn label(self) -> &'static str {
        match self {
            SyncMode::Detecting => "Detecting...",
            SyncMode::Native => "Browser Native",
            SyncMode::Estimated => "Estimated",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl From<WordMode> for SyncMode {
    fn from(mode: WordMode) -> Self {
        match mode {
            WordMode::Native => SyncMode::Native,
            WordMode::Estimated => SyncMode::Estimated,
        }
    }
}

/// UI-facing playback state. Only the controller mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_playing: bool,
    pub sync_mode: SyncMode,
}

/// Receives revealed words and state changes; the rendering side.
pub trait WordSink {
    fn reveal(&mut self, event: WordRevealEvent);

    /// Called whenever `is_playing` or `sync_mode` changes.
    fn sync_state(&mut self, _state: &SyncState) {}
}

impl WordSink for Vec<WordRevealEvent> {
    fn reveal(&mut self, event: WordRevealEvent) {
        self.push(event);
    }
}

impl<S: WordSink + ?Sized> WordSink for &mut S {
    fn reveal(&mut self, event: WordRevealEvent) {
        (**self).reveal(event)
    }

    fn sync_state(&mut self, state: &SyncState) {
        (**self).sync_state(state)
    }
}
