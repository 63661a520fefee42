//! Playback Scheduler: a fixed-rate frame clock over the loaded frames.
//!
//! The scheduler is a plain state machine. It never sleeps; callers feed it
//! the real time that elapsed since the previous tick and receive the frame
//! steps that time paid for. See [`crate::session::spawn_frame_clock`] for
//! the async driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{DanceError, Result};

pub const DEFAULT_FRAME_RATE: f32 = 60.0;

/// Fixed-timestep accumulator. Each consumed period is subtracted exactly,
/// so the remainder carries into the next tick and the clock never drifts.
#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    accumulated: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / f64::from(DEFAULT_FRAME_RATE)),
            accumulated: Duration::ZERO,
        }
    }
}

impl FrameClock {
    /// Fails unless the rate is positive and finite and its period is at
    /// least one nanosecond.
    pub fn new(frame_rate: f32) -> Result<Self> {
        let period = (frame_rate > 0.0 && frame_rate.is_finite())
            .then(|| Duration::try_from_secs_f64(1.0 / f64::from(frame_rate)).ok())
            .flatten()
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                DanceError::range(format!("unusable frame rate {frame_rate}"))
            })?;
        Ok(Self {
            period,
            accumulated: Duration::ZERO,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
    }

    /// Adds elapsed time and returns how many whole periods are now due.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.accumulated += elapsed;
        let mut due = 0;
        while self.accumulated >= self.period {
            self.accumulated -= self.period;
            due += 1;
        }
        due
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_frame: usize,
    pub is_playing: bool,
    pub range_start: usize,
    pub range_end: usize,
    pub use_range: bool,
    pub frame_rate: f32,
}

/// One frame advance produced by [`PlaybackScheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStep {
    pub frame: usize,
    /// True when the advance jumped back to the start of the range or span.
    pub wrapped: bool,
}

#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    state: PlaybackState,
    total_frames: usize,
    clock: FrameClock,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

impl PlaybackScheduler {
    pub fn new(frame_rate: f32) -> Self {
        let (frame_rate, clock) = match FrameClock::new(frame_rate) {
            Ok(clock) => (frame_rate, clock),
            Err(err) => {
                warn!(%err, fallback = DEFAULT_FRAME_RATE, "using default frame rate");
                (DEFAULT_FRAME_RATE, FrameClock::default())
            }
        };
        Self {
            state: PlaybackState {
                current_frame: 0,
                is_playing: false,
                range_start: 0,
                range_end: 0,
                use_range: false,
                frame_rate,
            },
            total_frames: 0,
            clock,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn current_frame(&self) -> usize {
        self.state.current_frame
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn frame_rate(&self) -> f32 {
        self.state.frame_rate
    }

    pub fn frame_period(&self) -> Duration {
        self.clock.period()
    }

    pub fn set_frame_rate(&mut self, frame_rate: f32) -> Result<()> {
        self.clock = FrameClock::new(frame_rate)?;
        self.state.frame_rate = frame_rate;
        Ok(())
    }

    /// Audio cursor position matching a frame.
    pub fn frame_time(&self, frame: usize) -> f32 {
        frame as f32 / self.state.frame_rate
    }

    /// Arms the scheduler for a freshly loaded dance: stopped at frame 0 with
    /// the play range covering every frame.
    pub fn load(&mut self, total_frames: usize) {
        self.total_frames = total_frames;
        self.state.current_frame = 0;
        self.state.is_playing = false;
        self.state.range_start = 0;
        self.state.range_end = total_frames.saturating_sub(1);
        self.state.use_range = total_frames > 0;
        self.clock.reset();
    }

    pub fn unload(&mut self) {
        self.load(0);
    }

    /// Starts the frame clock. Returns false when nothing changed.
    pub fn play(&mut self) -> bool {
        if self.state.is_playing || self.total_frames == 0 {
            return false;
        }
        self.state.is_playing = true;
        self.clock.reset();
        true
    }

    /// Stops the frame clock. Returns false when it was not running.
    pub fn pause(&mut self) -> bool {
        if !self.state.is_playing {
            return false;
        }
        self.state.is_playing = false;
        true
    }

    /// Moves to a frame, clamped into `[0, total_frames - 1]`. Returns the
    /// frame actually selected, or `None` when nothing is loaded.
    pub fn seek(&mut self, frame: i64) -> Option<usize> {
        let last = self.total_frames.checked_sub(1)?;
        let target = clamp_index(frame, 0, last);
        self.state.current_frame = target;
        Some(target)
    }

    /// Restricts looping playback to `[start, end]` (clamped into the loaded
    /// frames, with `end >= start`).
    ///
    /// Returns the range start when the range is enabled and the current
    /// frame lies outside it; the caller is expected to seek there.
    pub fn set_play_range(&mut self, start: i64, end: i64, enabled: bool) -> Result<Option<usize>> {
        let last = self
            .total_frames
            .checked_sub(1)
            .ok_or_else(|| DanceError::range("no frames loaded"))?;
        let start = clamp_index(start, 0, last);
        let end = clamp_index(end, start, last);

        self.state.range_start = start;
        self.state.range_end = end;
        self.state.use_range = enabled;

        let current = self.state.current_frame;
        if enabled && (current < start || current > end) {
            Ok(Some(start))
        } else {
            Ok(None)
        }
    }

    /// Feeds elapsed real time into the clock and advances one frame per
    /// whole period that is due.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<FrameStep> {
        if !self.state.is_playing || self.total_frames == 0 {
            return Vec::new();
        }
        let due = self.clock.advance(elapsed);
        (0..due).map(|_| self.step()).collect()
    }

    /// Advances one frame across the full span, ignoring the play range.
    pub fn next_frame(&mut self) -> Option<usize> {
        let total = self.total_frames;
        (total > 0).then(|| {
            self.state.current_frame = (self.state.current_frame + 1) % total;
            self.state.current_frame
        })
    }

    pub fn previous_frame(&mut self) -> Option<usize> {
        let total = self.total_frames;
        (total > 0).then(|| {
            self.state.current_frame = (self.state.current_frame + total - 1) % total;
            self.state.current_frame
        })
    }

    fn step(&mut self) -> FrameStep {
        let state = &mut self.state;
        let step = if state.use_range && state.range_start <= state.range_end {
            if state.current_frame >= state.range_end {
                FrameStep {
                    frame: state.range_start,
                    wrapped: true,
                }
            } else {
                FrameStep {
                    frame: state.current_frame + 1,
                    wrapped: false,
                }
            }
        } else {
            let next = (state.current_frame + 1) % self.total_frames;
            FrameStep {
                frame: next,
                wrapped: next == 0,
            }
        };
        state.current_frame = step.frame;
        step
    }
}

fn clamp_index(value: i64, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min as i64, max as i64);
    clamped as usize
}
