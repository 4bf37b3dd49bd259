//! Tokio event loop around [`SyncController`].
//!
//! [`SyncRuntime::run`] owns the controller and serializes everything that
//! touches it: commands from any number of [`SyncHandle`]s, engine callbacks,
//! and the controller's own timers. Revealed words come out on an unbounded
//! channel and the UI state on a `watch`.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::config::{validate_offset, validate_rate, SyncConfig};
use crate::sync::{PlayOutcome, SyncController, SyncState, WordRevealEvent, WordSink};
use crate::{EngineEvent, Millis, SpeechEngine, SyncError};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Play(String),
    Stop,
    SetRate(f32),
    SetOffset(f32),
}

/// Forwards controller output to the runtime's channels.
#[derive(Debug)]
pub struct ChannelSink {
    words: mpsc::UnboundedSender<WordRevealEvent>,
    state: watch::Sender<SyncState>,
}

impl WordSink for ChannelSink {
    fn reveal(&mut self, event: WordRevealEvent) {
        if self.words.send(event).is_err() {
            log::trace!("Word receiver dropped");
        }
    }

    fn sync_state(&mut self, state: &SyncState) {
        self.state.send_replace(*state);
    }
}

pub struct SyncRuntime<E> {
    controller: SyncController<E, ChannelSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    epoch: Instant,
}

impl<E: SpeechEngine> SyncRuntime<E> {
    /// Build a runtime for `engine`, whose callbacks arrive on `engine_events`.
    ///
    /// Returns the runtime (to be driven with [`run`](Self::run)), a handle
    /// for controlling it, and the stream of revealed words.
    pub fn new(
        engine: E,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        config: SyncConfig,
    ) -> Result<(Self, SyncHandle, mpsc::UnboundedReceiver<WordRevealEvent>), SyncError> {
        let (words_tx, words_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncState::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let sink = ChannelSink {
            words: words_tx,
            state: state_tx,
        };
        let controller = SyncController::new(engine, sink, config)?;

        let runtime = Self {
            controller,
            commands: command_rx,
            engine_events,
            epoch: Instant::now(),
        };
        let handle = SyncHandle {
            commands: command_tx,
            state: state_rx,
        };
        Ok((runtime, handle, words_rx))
    }

    /// Run until every [`SyncHandle`] is dropped, then stop playback.
    pub async fn run(mut self) {
        log::info!("Sync runtime started");
        loop {
            let deadline = self
                .controller
                .next_deadline()
                .map(|due| self.epoch + Duration::from_millis(due));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(event) = self.engine_events.recv() => {
                    let now = self.now();
                    self.controller.handle_engine_event(event, now);
                }
                _ = sleep_until(deadline.unwrap_or(self.epoch)), if deadline.is_some() => {
                    let now = self.now();
                    self.controller.fire_due(now);
                }
            }
        }

        let now = self.now();
        self.controller.stop(now);
        log::info!("Sync runtime stopped");
    }

    fn now(&self) -> Millis {
        Millis::try_from(self.epoch.elapsed().as_millis()).unwrap_or(Millis::MAX)
    }

    fn apply(&mut self, command: Command) {
        let now = self.now();
        let result = match command {
            Command::Play(text) => self.controller.play(&text, now).map(|outcome| {
                if outcome == PlayOutcome::Empty {
                    log::info!("Ignoring play with no text");
                }
            }),
            Command::Stop => {
                self.controller.stop(now);
                Ok(())
            }
            Command::SetRate(rate) => self.controller.set_rate(rate),
            Command::SetOffset(offset) => self.controller.set_offset(offset),
        };
        if let Err(e) = result {
            log::warn!("Command failed: {e}");
        }
    }
}

/// Cloneable control surface for a running [`SyncRuntime`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
}

impl SyncHandle {
    /// Start speaking `text`, or stop if already playing.
    pub fn play(&self, text: impl Into<String>) -> Result<(), SyncError> {
        self.send(Command::Play(text.into()))
    }

    pub fn stop(&self) -> Result<(), SyncError> {
        self.send(Command::Stop)
    }

    /// Takes effect from the next chunk.
    pub fn set_rate(&self, rate: f32) -> Result<(), SyncError> {
        validate_rate(rate)?;
        self.send(Command::SetRate(rate))
    }

    /// Takes effect from the next chunk.
    pub fn set_offset(&self, offset_secs: f32) -> Result<(), SyncError> {
        validate_offset(offset_secs)?;
        self.send(Command::SetOffset(offset_secs))
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch `is_playing` and `sync_mode` change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::RuntimeClosed)
    }
}
