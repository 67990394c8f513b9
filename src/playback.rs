use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::cli::NarrateArgs;

/// Heuristic speech rate used whenever the narrator reports no boundary
/// events: elapsed seconds × 19 ≈ characters spoken.
pub const CHARS_PER_SECOND: f64 = 19.0;

/// Fallback estimator period while a segment is playing.
pub const COARSE_TICK: Duration = Duration::from_millis(400);

pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Narration provider boundary. Position feedback flows back into the engine
/// through [`PlaybackEngine::on_precise_boundary`] and the segment-end/error
/// notifications, so the trait itself stays one-directional.
pub trait Narrator: Send {
    fn speak(&mut self, text: &str);
    fn pause(&mut self);
    fn resume(&mut self);
    fn cancel(&mut self);
}

/// Narrator used by the CLI: reports transport calls via tracing instead of
/// an audio subsystem.
#[derive(Debug, Default)]
pub struct TracingNarrator;

impl Narrator for TracingNarrator {
    fn speak(&mut self, text: &str) {
        tracing::info!(chars = text.chars().count(), "narration segment started");
    }

    fn pause(&mut self) {
        tracing::debug!("narration paused");
    }

    fn resume(&mut self) {
        tracing::debug!("narration resumed");
    }

    fn cancel(&mut self) {
        tracing::debug!("narration cancelled");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackLifecycle {
    Idle,
    Playing,
    Paused,
}

/// Tracks a character offset through a text while a narration provider plays
/// it. Offsets are measured in characters, not bytes, and stay within
/// `[0, text_len]`. Once the provider emits a boundary event for the active
/// segment, the coarse estimator stops writing the offset.
pub struct PlaybackEngine<N, C = SystemClock> {
    text: String,
    text_len: usize,
    narrator: N,
    clock: C,
    lifecycle: PlaybackLifecycle,
    offset_chars: usize,
    uses_precise_events: bool,
    segment_base_offset: usize,
    segment_started_at: Option<Instant>,
}

impl<N: Narrator> PlaybackEngine<N, SystemClock> {
    pub fn new(text: String, narrator: N) -> Self {
        Self::with_clock(text, narrator, SystemClock)
    }
}

impl<N: Narrator, C: Clock> PlaybackEngine<N, C> {
    pub fn with_clock(text: String, narrator: N, clock: C) -> Self {
        let text_len = text.chars().count();
        Self {
            text,
            text_len,
            narrator,
            clock,
            lifecycle: PlaybackLifecycle::Idle,
            offset_chars: 0,
            uses_precise_events: false,
            segment_base_offset: 0,
            segment_started_at: None,
        }
    }

    /// Start a new segment at `offset`. Any prior narration is cancelled
    /// first; two segments must never overlap. Starting at or past the end of
    /// the text leaves the engine idle.
    pub fn start(&mut self, offset: usize) {
        self.narrator.cancel();

        let offset = offset.min(self.text_len);
        let segment: String = self.text.chars().skip(offset).collect();
        if segment.is_empty() {
            self.reset_to_idle();
            return;
        }

        self.offset_chars = offset;
        self.segment_base_offset = offset;
        self.segment_started_at = Some(self.clock.now());
        self.uses_precise_events = false;
        self.lifecycle = PlaybackLifecycle::Playing;
        self.narrator.speak(&segment);
    }

    pub fn pause(&mut self) {
        if self.lifecycle != PlaybackLifecycle::Playing {
            return;
        }
        self.narrator.pause();
        if !self.uses_precise_events {
            // Snapshot the estimate and rebase so resume continues from the
            // paused offset instead of double-counting elapsed time.
            let snapshot = self.coarse_offset();
            self.offset_chars = snapshot;
            self.segment_base_offset = snapshot;
        }
        self.lifecycle = PlaybackLifecycle::Paused;
    }

    pub fn resume(&mut self) {
        if self.lifecycle != PlaybackLifecycle::Paused {
            return;
        }
        self.narrator.resume();
        if !self.uses_precise_events {
            self.segment_started_at = Some(self.clock.now());
        }
        self.lifecycle = PlaybackLifecycle::Playing;
    }

    /// Jump by `delta_seconds` worth of speech and restart playback from the
    /// clamped offset. No-op on empty text.
    pub fn seek(&mut self, delta_seconds: f64) {
        if self.text_len == 0 {
            return;
        }
        let target = (self.offset_chars as f64 + delta_seconds * CHARS_PER_SECOND)
            .floor()
            .max(0.0) as usize;
        let target = target.min(self.text_len - 1);
        self.start(target);
    }

    /// Provider-reported character index within the active segment. Always
    /// wins over the coarse estimate; sticky for the rest of the segment.
    pub fn on_precise_boundary(&mut self, char_index: usize) {
        if self.lifecycle != PlaybackLifecycle::Playing {
            return;
        }
        self.uses_precise_events = true;
        self.offset_chars = (self.segment_base_offset + char_index).min(self.text_len);
    }

    /// Coarse estimator tick. Writes the offset only while playing without
    /// precise events; otherwise a no-op.
    pub fn tick(&mut self) {
        if self.lifecycle != PlaybackLifecycle::Playing || self.uses_precise_events {
            return;
        }
        self.offset_chars = self.coarse_offset();
    }

    pub fn on_segment_ended(&mut self) {
        self.reset_to_idle();
    }

    pub fn on_segment_errored(&mut self) {
        self.reset_to_idle();
    }

    /// Hard stop (navigation away, shutdown): cancel the narrator and reset.
    pub fn stop(&mut self) {
        self.narrator.cancel();
        self.reset_to_idle();
    }

    pub fn lifecycle(&self) -> PlaybackLifecycle {
        self.lifecycle
    }

    pub fn offset_chars(&self) -> usize {
        self.offset_chars
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn uses_precise_events(&self) -> bool {
        self.uses_precise_events
    }

    pub fn progress_percent(&self) -> u8 {
        if self.text_len == 0 {
            return 0;
        }
        ((self.offset_chars * 100) / self.text_len).min(100) as u8
    }

    pub fn narrator(&self) -> &N {
        &self.narrator
    }

    fn coarse_offset(&self) -> usize {
        let Some(started_at) = self.segment_started_at else {
            return self.offset_chars;
        };
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(started_at)
            .as_secs_f64();
        let added = (elapsed * CHARS_PER_SECOND).floor() as usize;
        (self.segment_base_offset + added).min(self.text_len)
    }

    fn reset_to_idle(&mut self) {
        self.lifecycle = PlaybackLifecycle::Idle;
        self.offset_chars = 0;
        self.segment_base_offset = 0;
        self.segment_started_at = None;
        self.uses_precise_events = false;
    }
}

pub async fn run(args: NarrateArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read narration input: {}", args.input))?;

    let mut engine = PlaybackEngine::new(text, TracingNarrator);
    engine.start(args.from_offset);
    if engine.lifecycle() != PlaybackLifecycle::Playing {
        anyhow::bail!("nothing to narrate at offset {}", args.from_offset);
    }

    let mut interval = tokio::time::interval(COARSE_TICK);
    let mut last_percent = engine.progress_percent();
    loop {
        interval.tick().await;
        engine.tick();

        let percent = engine.progress_percent();
        if percent != last_percent {
            tracing::info!(
                percent,
                offset = engine.offset_chars(),
                total = engine.text_len(),
                "narration progress"
            );
            last_percent = percent;
        }

        if engine.offset_chars() >= engine.text_len() {
            engine.on_segment_ended();
            tracing::info!("narration finished");
            return Ok(());
        }
    }
}
