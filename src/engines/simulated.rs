//! A speech engine that speaks into the void on a fixed word clock.
//!
//! Useful for demos, tests, and hosts without a platform speech service.
//! Events are delivered on an unbounded channel that the caller feeds into
//! [`SyncRuntime`](crate::runtime::SyncRuntime).

use std::time::Duration;

use derive_builder::Builder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::{BoundaryKind, EngineEvent, EngineEventKind, SpeechEngine, SyncError, Utterance, UtteranceId};

#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct SimulatedEngineConfig {
    /// Speaking speed at rate 1.0.
    pub words_per_minute: f32,
    /// Whether word boundaries are reported. Many voices don't.
    pub reports_boundaries: bool,
    /// Delay between `speak` and the start event.
    pub start_latency_ms: u64,
    /// Refuse every utterance, like a host with no speech service.
    pub unavailable: bool,
    /// Fail each utterance after this many words.
    #[builder(setter(strip_option))]
    pub error_after_words: Option<usize>,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 150.0,
            reports_boundaries: true,
            start_latency_ms: 20,
            unavailable: false,
            error_after_words: None,
        }
    }
}

pub struct SimulatedEngine {
    config: SimulatedEngineConfig,
    events: mpsc::UnboundedSender<EngineEvent>,
    active: Option<(UtteranceId, JoinHandle<()>)>,
}

impl SimulatedEngine {
    /// Create the engine and the receiver its events arrive on.
    pub fn new(config: SimulatedEngineConfig) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            events,
            active: None,
        };
        (engine, rx)
    }

    pub fn config(&self) -> &SimulatedEngineConfig {
        &self.config
    }

    fn word_duration(&self, rate: f32) -> Duration {
        let ms = 60_000.0 / (f64::from(self.config.words_per_minute) * f64::from(rate));
        Duration::from_millis(ms.round() as u64)
    }
}

impl SpeechEngine for SimulatedEngine {
    fn speak(&mut self, utterance: Utterance) -> Result<(), SyncError> {
        if self.config.unavailable {
            return Err(SyncError::Engine("speech synthesis unavailable".to_string()));
        }
        self.cancel();

        let id = utterance.id;
        let word_ms = self.word_duration(utterance.rate);
        let starts = word_starts(&utterance.text);
        let latency = Duration::from_millis(self.config.start_latency_ms);
        let reports_boundaries = self.config.reports_boundaries;
        let error_after = self.config.error_after_words;
        let tx = self.events.clone();
        log::debug!(
            "Simulating {id}: {} words at {}ms each",
            starts.len(),
            word_ms.as_millis()
        );

        let task = tokio::spawn(async move {
            let send = |kind| tx.send(EngineEvent::new(id, kind)).is_ok();

            let started = Instant::now() + latency;
            sleep_until(started).await;
            if !send(EngineEventKind::Start) {
                return;
            }

            let mut at = started;
            for (i, char_index) in starts.iter().copied().enumerate() {
                sleep_until(at).await;
                if error_after == Some(i) {
                    send(EngineEventKind::Error("synthesis-failed".to_string()));
                    return;
                }
                if reports_boundaries {
                    let kind = EngineEventKind::Boundary {
                        char_index,
                        kind: BoundaryKind::Word,
                    };
                    if !send(kind) {
                        return;
                    }
                }
                at += word_ms;
            }

            sleep_until(at).await;
            send(EngineEventKind::End);
        });
        self.active = Some((id, task));
        Ok(())
    }

    fn cancel(&mut self) {
        let Some((id, task)) = self.active.take() else {
            return;
        };
        if task.is_finished() {
            return;
        }
        task.abort();
        log::debug!("Simulated utterance {id} interrupted");
        let _ = self
            .events
            .send(EngineEvent::new(id, EngineEventKind::Error("interrupted".to_string())));
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        if let Some((_, task)) = self.active.take() {
            task.abort();
        }
    }
}

/// Byte offset of every whitespace-separated word in `text`.
pub fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(i);
            in_word = true;
        }
    }
    starts
}
