use crate::config::{validate_offset, validate_rate, SyncConfig};
use crate::{EngineEvent, EngineEventKind, Millis, SessionToken, SpeechEngine, SyncError, UtteranceId};

use super::chunker::{self, Chunk};
use super::driver::{ChunkParams, ChunkPhase, DriverContext, PlaybackDriver, Timer, TimerKind};
use super::events::{SyncMode, SyncState, WordMode, WordRevealEvent, WordSink};
use super::timers::TimerQueue;

/// What a call to [`SyncController::play`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// A new session started.
    Started { token: SessionToken, chunks: usize },
    /// Playback was already running; it was stopped instead.
    Stopped,
    /// Nothing to speak.
    Empty,
}

/// The active speech run.
#[derive(Debug)]
struct PlaybackSession {
    token: SessionToken,
    chunks: Vec<Chunk>,
    index: usize,
    /// False once every chunk has been spoken, while offset-delayed reveals drain.
    playing: bool,
    params: ChunkParams,
    driver: Option<PlaybackDriver>,
    timers: TimerQueue<Timer>,
}

/// Owns the play/stop state machine and turns engine callbacks into an
/// ordered stream of [`WordRevealEvent`]s.
///
/// The controller is sans-IO: callers pass the current time to every entry
/// point, deliver engine events through [`handle_engine_event`], and call
/// [`fire_due`] once [`next_deadline`] has passed.
///
/// [`handle_engine_event`]: SyncController::handle_engine_event
/// [`fire_due`]: SyncController::fire_due
/// [`next_deadline`]: SyncController::next_deadline
pub struct SyncController<E, S> {
    engine: E,
    sink: S,
    config: SyncConfig,
    token: SessionToken,
    session: Option<PlaybackSession>,
    state: SyncState,
}

impl<E: SpeechEngine, S: WordSink> SyncController<E, S> {
    pub fn new(engine: E, sink: S, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            engine,
            sink,
            config,
            token: SessionToken::default(),
            session: None,
            state: SyncState::default(),
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    /// Token of the current (or most recently ended) session.
    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Phase of the chunk currently being spoken.
    pub fn chunk_phase(&self) -> Option<ChunkPhase> {
        self.session.as_ref()?.driver.as_ref().map(PlaybackDriver::phase)
    }

    /// Change the speech rate. Takes effect from the next chunk.
    pub fn set_rate(&mut self, rate: f32) -> Result<(), SyncError> {
        validate_rate(rate)?;
        log::debug!("Speech rate set to {rate}");
        self.config.rate = rate;
        Ok(())
    }

    /// Change the sync offset. Takes effect from the next chunk.
    pub fn set_offset(&mut self, offset_secs: f32) -> Result<(), SyncError> {
        validate_offset(offset_secs)?;
        log::debug!("Sync offset set to {offset_secs}s");
        self.config.offset_secs = offset_secs;
        Ok(())
    }

    /// Start speaking `text`, or stop if already playing.
    pub fn play(&mut self, text: &str, now: Millis) -> Result<PlayOutcome, SyncError> {
        if self.state.is_playing {
            self.stop(now);
            return Ok(PlayOutcome::Stopped);
        }

        let chunks = chunker::split(text);
        if chunks.is_empty() {
            log::debug!("Nothing to speak");
            return Ok(PlayOutcome::Empty);
        }

        self.discard_session(now);
        self.token = self.token.next();
        let token = self.token;
        let count = chunks.len();
        log::info!("Session {token} playing {count} chunks");

        self.session = Some(PlaybackSession {
            token,
            chunks,
            index: 0,
            playing: true,
            params: self.chunk_params(),
            driver: None,
            timers: TimerQueue::new(),
        });
        self.update_state(SyncState {
            is_playing: true,
            sync_mode: SyncMode::Detecting,
        });
        self.start_next_chunk(now);

        Ok(PlayOutcome::Started {
            token,
            chunks: count,
        })
    }

    /// Apply rate and offset, then [`play`](Self::play).
    pub fn play_with(
        &mut self,
        text: &str,
        rate: f32,
        offset_secs: f32,
        now: Millis,
    ) -> Result<PlayOutcome, SyncError> {
        validate_rate(rate)?;
        validate_offset(offset_secs)?;
        self.config.rate = rate;
        self.config.offset_secs = offset_secs;
        self.play(text, now)
    }

    /// Stop playback. Nothing further is emitted for the stopped session.
    pub fn stop(&mut self, now: Millis) {
        self.token = self.token.next();
        if self.discard_session(now) {
            self.engine.cancel();
        }
        if self.state.is_playing {
            self.update_state(SyncState {
                is_playing: false,
                ..self.state
            });
        }
    }

    /// Deliver an engine callback.
    ///
    /// Timers already due run first, so an `End` never overtakes a word
    /// that should have been revealed before it. Callbacks for anything but
    /// the chunk in flight are dropped, which absorbs late events from
    /// cancelled or superseded utterances.
    pub fn handle_engine_event(&mut self, event: EngineEvent, now: Millis) {
        self.fire_due(now);
        let Some(session) = self.session.as_mut() else {
            log::trace!("Dropping {:?} for {}: no session", event.kind, event.utterance);
            return;
        };
        let Some(driver) = session
            .driver
            .as_mut()
            .filter(|d| d.id() == event.utterance)
        else {
            log::trace!("Dropping stale {:?} for {}", event.kind, event.utterance);
            return;
        };

        let mut ctx = DriverContext {
            now,
            timers: &mut session.timers,
        };
        let finished = match event.kind {
            EngineEventKind::Start => {
                driver.on_start(&mut ctx);
                false
            }
            EngineEventKind::Boundary { char_index, kind } => {
                driver.on_boundary(char_index, kind, &mut ctx);
                false
            }
            EngineEventKind::End => driver.on_end(&mut ctx),
            EngineEventKind::Error(message) => driver.on_error(&message, &mut ctx),
        };

        if finished {
            session.driver = None;
            session.index += 1;
            self.start_next_chunk(now);
        }
        self.fire_due(now);
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.session.as_ref()?.timers.next_due()
    }

    /// Run every timer due at `now`, in order.
    pub fn fire_due(&mut self, now: Millis) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let Some((_, timer)) = session.timers.pop_due(now) else {
                break;
            };
            if timer.token != session.token {
                log::trace!("Dropping timer from session {}", timer.token);
                continue;
            }

            let current = session
                .driver
                .as_mut()
                .filter(|d| d.id().chunk == timer.chunk);
            let mut ctx = DriverContext {
                now,
                timers: &mut session.timers,
            };
            let reveal = match timer.kind {
                TimerKind::BoundaryDeadline => {
                    if let Some(driver) = current {
                        driver.on_deadline(&mut ctx);
                    }
                    None
                }
                TimerKind::Reveal(word) => Some((word, WordMode::Native)),
                TimerKind::Estimated(word) => {
                    if let Some(driver) = current {
                        driver.on_estimate_fired(&mut ctx);
                    }
                    Some((word, WordMode::Estimated))
                }
            };

            if let Some((word, mode)) = reveal {
                self.emit(WordRevealEvent {
                    word,
                    mode,
                    chunk: timer.chunk,
                    at_ms: now,
                });
            }
        }

        let drained = self
            .session
            .as_ref()
            .is_some_and(|s| !s.playing && s.timers.is_empty());
        if drained {
            log::debug!("Session {} drained", self.token);
            self.session = None;
        }
    }

    fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            rate: self.config.rate,
            offset_ms: self.config.offset_ms(),
            boundary_deadline_ms: self.config.boundary_deadline_ms,
            baseline_wpm: self.config.baseline_wpm,
        }
    }

    /// Submit chunks from the session's current index until one is accepted
    /// or none are left.
    fn start_next_chunk(&mut self, now: Millis) {
        let params = self.chunk_params();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.playing {
            return;
        }
        session.params = params;

        while let Some(chunk) = session.chunks.get(session.index) {
            let id = UtteranceId {
                session: session.token,
                chunk: session.index,
            };
            let mut driver = PlaybackDriver::new(id, chunk.clone(), session.params);
            match driver.begin(&mut self.engine) {
                Ok(()) => {
                    session.driver = Some(driver);
                    return;
                }
                Err(e) => {
                    log::warn!("Skipping chunk {}: {e}", id);
                    session.index += 1;
                }
            }
        }

        log::info!("Session {} finished speaking", session.token);
        session.playing = false;
        session.driver = None;
        let drained = session.timers.is_empty();
        if drained {
            self.session = None;
        }
        self.update_state(SyncState {
            is_playing: false,
            ..self.state
        });
        if !drained {
            log::debug!("Waiting for delayed reveals at {now}ms");
        }
    }

    /// Cancel and drop the session, if any. Returns whether one existed.
    fn discard_session(&mut self, now: Millis) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        if let Some(driver) = session.driver.as_mut() {
            driver.cancel(&mut DriverContext {
                now,
                timers: &mut session.timers,
            });
        }
        let dropped = session.timers.len();
        session.timers.clear();
        log::info!(
            "Session {} stopped at chunk {}/{} ({dropped} pending timers dropped)",
            session.token,
            session.index,
            session.chunks.len()
        );
        true
    }

    fn emit(&mut self, event: WordRevealEvent) {
        let mode = SyncMode::from(event.mode);
        if self.state.sync_mode != mode {
            self.update_state(SyncState {
                sync_mode: mode,
                ..self.state
            });
        }
        log::trace!("Reveal {:?} ({}) at {}ms", event.word, event.mode, event.at_ms);
        self.sink.reveal(event);
    }

    fn update_state(&mut self, state: SyncState) {
        if self.state == state {
            return;
        }
        log::debug!(
            "Sync state: playing={} mode={}",
            state.is_playing,
            state.sync_mode
        );
        self.state = state;
        self.sink.sync_state(&self.state);
    }
}
