use std::collections::VecDeque;

use crate::{BoundaryKind, Millis, SessionToken, SpeechEngine, SyncError, Utterance, UtteranceId};

use super::chunker::{strip_punctuation, Chunk};
use super::estimator::estimate;
use super::timers::{TimerKey, TimerQueue};

/// Per-chunk playback phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    Idle,
    /// Submitted; no timing signal seen yet.
    Speaking,
    /// Following native word boundaries for the rest of the chunk.
    Native,
    /// No boundary arrived in time; revealing on estimated timing.
    Estimating,
    Done,
    Cancelled,
    Errored,
}

impl ChunkPhase {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ChunkPhase::Done | ChunkPhase::Cancelled | ChunkPhase::Errored
        )
    }
}

/// Settings frozen for the lifetime of one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkParams {
    pub rate: f32,
    pub offset_ms: i64,
    pub boundary_deadline_ms: u64,
    pub baseline_wpm: f32,
}

/// A timer belonging to one chunk of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub token: SessionToken,
    pub chunk: usize,
    pub kind: TimerKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Fallback deadline for the first native boundary.
    BoundaryDeadline,
    /// A native-boundary word held back by the sync offset.
    Reveal(String),
    /// The next word of an estimated schedule.
    Estimated(String),
}

/// What a driver entry point needs from the session that owns it.
pub struct DriverContext<'a> {
    pub now: Millis,
    pub timers: &'a mut TimerQueue<Timer>,
}

#[derive(Debug)]
struct Estimation {
    anchor: Millis,
    plan: VecDeque<(String, f64)>,
    elapsed_ms: f64,
    pending: Option<TimerKey>,
}

/// Drives one chunk through the speech engine.
///
/// Whichever arrives first, a native word boundary or the boundary deadline,
/// decides how the chunk's words are timed; the other signal is ignored from
/// then on.
#[derive(Debug)]
pub struct PlaybackDriver {
    id: UtteranceId,
    chunk: Chunk,
    params: ChunkParams,
    phase: ChunkPhase,
    started_at: Option<Millis>,
    deadline: Option<TimerKey>,
    estimation: Option<Estimation>,
}

impl PlaybackDriver {
    pub fn new(id: UtteranceId, chunk: Chunk, params: ChunkParams) -> Self {
        Self {
            id,
            chunk,
            params,
            phase: ChunkPhase::Idle,
            started_at: None,
            deadline: None,
            estimation: None,
        }
    }

    pub fn id(&self) -> UtteranceId {
        self.id
    }

    pub fn phase(&self) -> ChunkPhase {
        self.phase
    }

    /// Submit the chunk to the engine.
    pub fn begin<E: SpeechEngine + ?Sized>(&mut self, engine: &mut E) -> Result<(), SyncError> {
        let utterance = Utterance {
            id: self.id,
            text: self.chunk.text().to_string(),
            rate: self.params.rate,
        };
        match engine.speak(utterance) {
            Ok(()) => {
                log::debug!(
                    "Utterance {} submitted ({} words, rate {})",
                    self.id,
                    self.chunk.words().len(),
                    self.params.rate
                );
                self.phase = ChunkPhase::Speaking;
                Ok(())
            }
            Err(e) => {
                self.phase = ChunkPhase::Errored;
                Err(e)
            }
        }
    }

    /// The engine started speaking: arm the boundary deadline.
    pub fn on_start(&mut self, ctx: &mut DriverContext<'_>) {
        if self.phase != ChunkPhase::Speaking || self.deadline.is_some() {
            log::trace!("Utterance {} start ignored in {:?}", self.id, self.phase);
            return;
        }
        self.started_at = Some(ctx.now);
        let due = ctx.now + self.params.boundary_deadline_ms;
        self.deadline = Some(ctx.timers.schedule(due, self.timer(TimerKind::BoundaryDeadline)));
    }

    pub fn on_boundary(&mut self, char_index: usize, kind: BoundaryKind, ctx: &mut DriverContext<'_>) {
        if kind != BoundaryKind::Word {
            return;
        }
        match self.phase {
            ChunkPhase::Speaking | ChunkPhase::Native => {}
            ChunkPhase::Estimating => {
                log::trace!("Utterance {} boundary ignored while estimating", self.id);
                return;
            }
            _ => return,
        }
        let Some(word) = self.chunk.word_at(char_index) else {
            log::debug!(
                "Utterance {} boundary at {char_index} does not start a word",
                self.id
            );
            return;
        };

        if self.phase == ChunkPhase::Speaking {
            if let Some(key) = self.deadline.take() {
                ctx.timers.cancel(key);
            }
            log::info!("Utterance {} reports native word boundaries", self.id);
            self.phase = ChunkPhase::Native;
        }

        if word.is_empty() {
            return;
        }
        let due = ctx.now + clamp_delay(self.params.offset_ms);
        ctx.timers.schedule(due, self.timer(TimerKind::Reveal(word)));
    }

    /// The boundary deadline fired. Switches to estimated timing unless a
    /// boundary already won.
    ///
    /// The schedule is anchored at the engine's start, so words that speech
    /// has already passed are revealed right away.
    pub fn on_deadline(&mut self, ctx: &mut DriverContext<'_>) {
        self.deadline = None;
        if self.phase != ChunkPhase::Speaking {
            return;
        }

        log::info!(
            "Utterance {}: no word boundary within {}ms, estimating",
            self.id,
            self.params.boundary_deadline_ms
        );
        self.start_estimation(ctx);
        self.schedule_next_estimate(ctx);
    }

    /// An estimated word was revealed; queue the one after it.
    pub fn on_estimate_fired(&mut self, ctx: &mut DriverContext<'_>) {
        if self.phase != ChunkPhase::Estimating {
            return;
        }
        if let Some(estimation) = self.estimation.as_mut() {
            estimation.pending = None;
        }
        self.schedule_next_estimate(ctx);
    }

    /// The engine finished the chunk. Returns `true` if this ended the chunk.
    ///
    /// Estimated words the schedule had not reached yet are revealed now,
    /// held back by the sync offset at most. A chunk that ends before any
    /// timing signal is treated as estimated and revealed the same way.
    pub fn on_end(&mut self, ctx: &mut DriverContext<'_>) -> bool {
        if self.phase.is_finished() {
            return false;
        }
        if self.phase == ChunkPhase::Speaking {
            if let Some(key) = self.deadline.take() {
                ctx.timers.cancel(key);
            }
            log::info!("Utterance {} ended before any word boundary", self.id);
            self.start_estimation(ctx);
        }
        self.flush_estimates(ctx);
        self.finish(ChunkPhase::Done, ctx)
    }

    /// The engine failed on the chunk. Unrevealed estimated words are dropped.
    pub fn on_error(&mut self, message: &str, ctx: &mut DriverContext<'_>) -> bool {
        if !self.phase.is_finished() {
            log::warn!("Utterance {} failed: {message}", self.id);
        }
        self.finish(ChunkPhase::Errored, ctx)
    }

    /// Stop the chunk and drop every timer it owns, queued reveals included.
    pub fn cancel(&mut self, ctx: &mut DriverContext<'_>) {
        let id = self.id;
        ctx.timers
            .retain(|t| !(t.token == id.session && t.chunk == id.chunk));
        self.deadline = None;
        self.estimation = None;
        if self.phase != ChunkPhase::Cancelled {
            log::debug!("Utterance {} cancelled in {:?}", self.id, self.phase);
            self.phase = ChunkPhase::Cancelled;
        }
    }

    fn finish(&mut self, phase: ChunkPhase, ctx: &mut DriverContext<'_>) -> bool {
        if self.phase.is_finished() {
            return false;
        }
        if let Some(key) = self.deadline.take() {
            ctx.timers.cancel(key);
        }
        if let Some(estimation) = self.estimation.take() {
            let mut unrevealed = estimation.plan.len();
            if let Some(key) = estimation.pending {
                ctx.timers.cancel(key);
                unrevealed += 1;
            }
            if unrevealed > 0 {
                log::debug!(
                    "Utterance {} ended with {unrevealed} estimated words unrevealed",
                    self.id
                );
            }
        }
        log::debug!("Utterance {} {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
        true
    }

    fn start_estimation(&mut self, ctx: &DriverContext<'_>) {
        let plan: VecDeque<(String, f64)> =
            estimate(&self.chunk, self.params.rate, self.params.baseline_wpm)
                .map(|t| (strip_punctuation(t.word), t.delay_ms))
                .collect();
        log::debug!("Utterance {} estimating {} words", self.id, plan.len());
        self.phase = ChunkPhase::Estimating;
        self.estimation = Some(Estimation {
            anchor: self.started_at.unwrap_or(ctx.now),
            plan,
            elapsed_ms: 0.0,
            pending: None,
        });
    }

    fn flush_estimates(&mut self, ctx: &mut DriverContext<'_>) {
        let latest = ctx.now + clamp_delay(self.params.offset_ms);
        let offset_ms = self.params.offset_ms;
        let Some(mut estimation) = self.estimation.take() else {
            return;
        };

        let mut flushed = 0;
        if let Some(key) = estimation.pending.take() {
            if let Some(timer) = ctx.timers.cancel(key) {
                ctx.timers.schedule(key.due().min(latest), timer);
                flushed += 1;
            }
        }
        while let Some((word, delay_ms)) = estimation.plan.pop_front() {
            let offset = clamp_delay(estimation.elapsed_ms.round() as i64 + offset_ms);
            estimation.elapsed_ms += delay_ms;
            if word.is_empty() {
                continue;
            }
            let due = (estimation.anchor + offset).max(ctx.now).min(latest);
            ctx.timers.schedule(due, self.timer(TimerKind::Estimated(word)));
            flushed += 1;
        }
        if flushed > 0 {
            log::debug!(
                "Utterance {} ended ahead of its estimate, revealing {flushed} words by {latest}ms",
                self.id
            );
        }
    }

    fn schedule_next_estimate(&mut self, ctx: &mut DriverContext<'_>) {
        let offset_ms = self.params.offset_ms;
        let token = self.id.session;
        let chunk = self.id.chunk;
        let Some(estimation) = self.estimation.as_mut() else {
            return;
        };

        while let Some((word, delay_ms)) = estimation.plan.pop_front() {
            let offset = clamp_delay(estimation.elapsed_ms.round() as i64 + offset_ms);
            estimation.elapsed_ms += delay_ms;
            // Punctuation-only tokens still take up time but show nothing.
            if word.is_empty() {
                continue;
            }
            let due = (estimation.anchor + offset).max(ctx.now);
            let timer = Timer {
                token,
                chunk,
                kind: TimerKind::Estimated(word),
            };
            estimation.pending = Some(ctx.timers.schedule(due, timer));
            return;
        }
    }

    fn timer(&self, kind: TimerKind) -> Timer {
        Timer {
            token: self.id.session,
            chunk: self.id.chunk,
            kind,
        }
    }
}

/// Negative offsets never schedule into the past.
fn clamp_delay(delay_ms: i64) -> Millis {
    delay_ms.max(0) as Millis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::chunker::split;

    #[derive(Default)]
    struct RecordingEngine {
        spoken: Vec<Utterance>,
        refuse: bool,
    }

    impl SpeechEngine for RecordingEngine {
        fn speak(&mut self, utterance: Utterance) -> Result<(), SyncError> {
            if self.refuse {
                return Err(SyncError::Engine("unavailable".to_string()));
            }
            self.spoken.push(utterance);
            Ok(())
        }

        fn cancel(&mut self) {}
    }

    const ID: UtteranceId = UtteranceId {
        session: SessionToken(1),
        chunk: 0,
    };

    fn params(offset_ms: i64) -> ChunkParams {
        ChunkParams {
            rate: 1.0,
            offset_ms,
            boundary_deadline_ms: 500,
            baseline_wpm: 150.0,
        }
    }

    fn driver(text: &str, offset_ms: i64) -> (PlaybackDriver, RecordingEngine) {
        let chunk = split(text).into_iter().next().unwrap();
        let mut driver = PlaybackDriver::new(ID, chunk, params(offset_ms));
        let mut engine = RecordingEngine::default();
        driver.begin(&mut engine).unwrap();
        (driver, engine)
    }

    /// Fire everything due up to `until`, letting the driver chain estimates.
    fn drain(
        driver: &mut PlaybackDriver,
        timers: &mut TimerQueue<Timer>,
        until: Millis,
    ) -> Vec<(Millis, TimerKind)> {
        let mut fired = Vec::new();
        while let Some(due) = timers.next_due().filter(|d| *d <= until) {
            let (at, timer) = timers.pop_due(due).unwrap();
            let mut ctx = DriverContext {
                now: at,
                timers: &mut *timers,
            };
            match timer.kind {
                TimerKind::BoundaryDeadline => driver.on_deadline(&mut ctx),
                TimerKind::Estimated(word) => {
                    driver.on_estimate_fired(&mut ctx);
                    fired.push((at, TimerKind::Estimated(word)));
                }
                TimerKind::Reveal(word) => fired.push((at, TimerKind::Reveal(word))),
            }
        }
        fired
    }

    #[test]
    fn begin_submits_chunk_text_at_rate() {
        let (driver, engine) = driver("Hello world.", 0);
        assert_eq!(driver.phase(), ChunkPhase::Speaking);
        assert_eq!(engine.spoken.len(), 1);
        assert_eq!(engine.spoken[0].text, "Hello world.");
        assert_eq!(engine.spoken[0].id, ID);
        assert_eq!(engine.spoken[0].rate, 1.0);
    }

    #[test]
    fn refused_submission_is_an_error() {
        let chunk = split("Hi.").into_iter().next().unwrap();
        let mut driver = PlaybackDriver::new(ID, chunk, params(0));
        let mut engine = RecordingEngine {
            refuse: true,
            ..Default::default()
        };
        assert!(driver.begin(&mut engine).is_err());
        assert_eq!(driver.phase(), ChunkPhase::Errored);
    }

    #[test]
    fn deadline_without_boundary_switches_to_estimation() {
        let (mut driver, _) = driver("Hello world.", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 10, timers: &mut timers });
        assert_eq!(timers.next_due(), Some(510));

        let fired = drain(&mut driver, &mut timers, 5_000);
        assert_eq!(driver.phase(), ChunkPhase::Estimating);
        // Timed from the start at 10: "world" was due at 410, already passed.
        assert_eq!(
            fired,
            vec![
                (510, TimerKind::Estimated("Hello".to_string())),
                (510, TimerKind::Estimated("world".to_string())),
            ]
        );
    }

    #[test]
    fn estimates_are_anchored_at_speech_start() {
        let (mut driver, _) = driver("one two three four five six", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 100, timers: &mut timers });
        let fired = drain(&mut driver, &mut timers, 5_000);
        let times: Vec<Millis> = fired.iter().map(|(at, _)| *at).collect();
        // Lengths 3 3 5 4 4 3, interval 400: due 100 427 755 1300 1736 2173.
        assert_eq!(times, vec![600, 600, 755, 1_300, 1_736, 2_173]);
    }

    #[test]
    fn first_boundary_wins_over_deadline() {
        let (mut driver, _) = driver("Hello world.", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        driver.on_boundary(0, BoundaryKind::Word, &mut DriverContext { now: 120, timers: &mut timers });
        assert_eq!(driver.phase(), ChunkPhase::Native);

        driver.on_boundary(6, BoundaryKind::Word, &mut DriverContext { now: 450, timers: &mut timers });
        let fired = drain(&mut driver, &mut timers, 5_000);
        assert_eq!(
            fired,
            vec![
                (120, TimerKind::Reveal("Hello".to_string())),
                (450, TimerKind::Reveal("world".to_string())),
            ]
        );
        assert_eq!(driver.phase(), ChunkPhase::Native);
    }

    #[test]
    fn boundaries_after_estimation_started_are_ignored() {
        let (mut driver, _) = driver("Hello world again.", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        let first = drain(&mut driver, &mut timers, 500);
        assert_eq!(first.len(), 2);

        driver.on_boundary(6, BoundaryKind::Word, &mut DriverContext { now: 600, timers: &mut timers });
        assert_eq!(driver.phase(), ChunkPhase::Estimating);
        let rest = drain(&mut driver, &mut timers, 5_000);
        assert_eq!(rest, vec![(800, TimerKind::Estimated("again".to_string()))]);
    }

    #[test]
    fn sentence_boundaries_and_bad_offsets_do_not_decide_mode() {
        let (mut driver, _) = driver("Hello world.", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        driver.on_boundary(0, BoundaryKind::Sentence, &mut DriverContext { now: 10, timers: &mut timers });
        driver.on_boundary(99, BoundaryKind::Word, &mut DriverContext { now: 20, timers: &mut timers });
        assert_eq!(driver.phase(), ChunkPhase::Speaking);

        drain(&mut driver, &mut timers, 500);
        assert_eq!(driver.phase(), ChunkPhase::Estimating);
    }

    #[test]
    fn positive_offset_delays_native_reveals() {
        let (mut driver, _) = driver("Hello world.", 250);
        let mut timers = TimerQueue::new();
        driver.on_boundary(0, BoundaryKind::Word, &mut DriverContext { now: 100, timers: &mut timers });
        assert_eq!(timers.next_due(), Some(350));
    }

    #[test]
    fn negative_offset_is_clamped_to_now() {
        let (mut driver, _) = driver("Hello world again.", -1_000);
        let mut timers = TimerQueue::new();
        driver.on_boundary(0, BoundaryKind::Word, &mut DriverContext { now: 100, timers: &mut timers });
        assert_eq!(timers.next_due(), Some(100));
        timers.clear();

        let (mut driver, _) = self::driver("Hello world again.", -1_000);
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        let fired = drain(&mut driver, &mut timers, 5_000);
        let times: Vec<Millis> = fired.iter().map(|(at, _)| *at).collect();
        // 400ms words shifted by -1s are all overdue at the deadline.
        assert_eq!(times, vec![500, 500, 500]);
    }

    #[test]
    fn early_end_reveals_remaining_estimates_at_once() {
        let (mut driver, _) = driver("one two three four", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        drain(&mut driver, &mut timers, 500);
        assert_eq!(timers.len(), 1);

        // Lengths 3 3 5 4: "three" due at 640, "four" at 1173.
        assert!(driver.on_end(&mut DriverContext { now: 600, timers: &mut timers }));
        assert_eq!(driver.phase(), ChunkPhase::Done);
        assert!(!driver.on_end(&mut DriverContext { now: 700, timers: &mut timers }));
        let rest = drain(&mut driver, &mut timers, 5_000);
        assert_eq!(
            rest,
            vec![
                (600, TimerKind::Estimated("three".to_string())),
                (600, TimerKind::Estimated("four".to_string())),
            ]
        );
    }

    #[test]
    fn flushed_estimates_still_honor_a_positive_offset() {
        let (mut driver, _) = driver("one two three four", 300);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        let first = drain(&mut driver, &mut timers, 700);
        assert_eq!(first.len(), 2);

        driver.on_end(&mut DriverContext { now: 800, timers: &mut timers });
        let times: Vec<Millis> = drain(&mut driver, &mut timers, 5_000)
            .iter()
            .map(|(at, _)| *at)
            .collect();
        // "three" keeps 940; "four" (1473) is pulled in to end + offset.
        assert_eq!(times, vec![940, 1_100]);
    }

    #[test]
    fn end_before_the_deadline_reveals_every_word() {
        let (mut driver, _) = driver("Hello world.", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        assert!(driver.on_end(&mut DriverContext { now: 300, timers: &mut timers }));
        assert_eq!(driver.phase(), ChunkPhase::Done);

        let fired = drain(&mut driver, &mut timers, 5_000);
        assert_eq!(
            fired,
            vec![
                (300, TimerKind::Estimated("Hello".to_string())),
                (300, TimerKind::Estimated("world".to_string())),
            ]
        );
    }

    #[test]
    fn native_reveals_survive_the_end() {
        let mut timers = TimerQueue::new();

        let (mut native, _) = driver("one two", 1_000);
        native.on_boundary(0, BoundaryKind::Word, &mut DriverContext { now: 10, timers: &mut timers });
        assert!(native.on_end(&mut DriverContext { now: 20, timers: &mut timers }));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn error_drops_unrevealed_estimates() {
        let (mut driver, _) = driver("one two three four", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        drain(&mut driver, &mut timers, 500);
        assert_eq!(timers.len(), 1);
        assert!(driver.on_error("synthesis-failed", &mut DriverContext { now: 600, timers: &mut timers }));
        assert_eq!(driver.phase(), ChunkPhase::Errored);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancel_clears_every_timer_of_the_chunk() {
        let (mut driver, _) = driver("Hello world.", 2_000);
        let mut timers = TimerQueue::new();
        timers.schedule(
            1,
            Timer {
                token: SessionToken(1),
                chunk: 7,
                kind: TimerKind::BoundaryDeadline,
            },
        );
        driver.on_boundary(0, BoundaryKind::Word, &mut DriverContext { now: 0, timers: &mut timers });
        driver.on_end(&mut DriverContext { now: 10, timers: &mut timers });
        assert_eq!(timers.len(), 2);

        driver.cancel(&mut DriverContext { now: 20, timers: &mut timers });
        assert_eq!(driver.phase(), ChunkPhase::Cancelled);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.pop_due(10).map(|(_, t)| t.chunk), Some(7));
    }

    #[test]
    fn punctuation_only_tokens_keep_rhythm_but_are_not_revealed() {
        let (mut driver, _) = driver("wait ; go", 0);
        let mut timers = TimerQueue::new();
        driver.on_start(&mut DriverContext { now: 0, timers: &mut timers });
        let fired = drain(&mut driver, &mut timers, 5_000);
        // Lengths 4, 0, 2 against an average of 2: delays 800, 0, 400.
        assert_eq!(
            fired,
            vec![
                (500, TimerKind::Estimated("wait".to_string())),
                (800, TimerKind::Estimated("go".to_string())),
            ]
        );
    }
}
