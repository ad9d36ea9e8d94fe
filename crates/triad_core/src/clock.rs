//! # Frame Clock
//!
//! Variable-step frame timing plus a fixed-step accumulator for
//! deterministic simulation stepping.
//!
//! ```text
//! update():        real delta ──> unscaled_delta, delta, elapsed, frame_index, fps
//!
//! fixed_update():  real delta ──clamp(max_frame_delta)──x time_scale──> accumulator
//!                  accumulator ──clamp(fixed_step * max_fixed_steps)
//!                  while accumulator >= fixed_step { step; accumulator -= fixed_step }
//!                  fixed_alpha = accumulator / fixed_step
//! ```
//!
//! The accumulator is kept in time-source ticks. With a tick rate that is a
//! multiple of the fixed rate, a real delta of exactly `n` fixed steps
//! produces exactly `n` steps, with no floating-point drift.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Monotonic tick source sampled by the [`Clock`].
pub trait TimeSource: Send {
    /// Current time in ticks. Never decreases.
    fn now(&self) -> u64;

    /// Tick frequency.
    fn ticks_per_second(&self) -> u64;
}

/// Wall-clock source with nanosecond ticks.
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    /// Starts counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    #[inline]
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    #[inline]
    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// Explicitly advanced source for tests and replays.
///
/// Clones share the same counter, so a test can keep one handle and give
/// the other to a clock.
#[derive(Clone)]
pub struct ManualTime {
    ticks: Arc<AtomicU64>,
    ticks_per_second: u64,
}

impl ManualTime {
    /// Creates a source at tick 0.
    ///
    /// # Panics
    ///
    /// Panics if `ticks_per_second` is zero.
    #[must_use]
    pub fn new(ticks_per_second: u64) -> Self {
        assert!(ticks_per_second > 0, "tick rate must be non-zero");
        Self {
            ticks: Arc::new(AtomicU64::new(0)),
            ticks_per_second,
        }
    }

    /// Moves time forward.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTime {
    #[inline]
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    #[inline]
    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}

/// Clock tuning, loaded from the runtime config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Fixed simulation rate. `fixed_step = 1 / fixed_hz`.
    pub fixed_hz: u32,
    /// Upper bound on fixed steps owed at once.
    pub max_fixed_steps: u32,
    /// Real delta above this (seconds) is clamped, e.g. after a debugger stall.
    pub max_frame_delta: f64,
    /// Initial time scale.
    pub time_scale: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fixed_hz: 60,
            max_fixed_steps: 8,
            max_frame_delta: 0.25,
            time_scale: 1.0,
        }
    }
}

/// Variable + fixed step clock. One per kernel.
pub struct Clock {
    source: Box<dyn TimeSource>,
    seconds_per_tick: f64,
    last_sample: u64,
    last_fixed_sample: u64,

    unscaled_delta: f64,
    delta: f64,
    elapsed: f64,
    real_elapsed: f64,
    frame_index: u64,
    average_frame_time: f64,
    fps: f64,
    time_scale: f64,
    paused: bool,

    fixed_step: f64,
    fixed_step_ticks: f64,
    max_fixed_steps: u32,
    max_frame_delta_ticks: f64,
    accumulator: f64,
    fixed_alpha: f64,
    fixed_frame_index: u64,
}

/// Deltas at or below this (seconds) don't move the smoothed averages.
const NEGLIGIBLE_DELTA: f64 = 1e-6;

/// Smoothing rate of the average frame time, per second.
const SMOOTHING_RATE: f64 = 8.0;

impl Clock {
    /// Creates a clock over the given time source.
    ///
    /// # Panics
    ///
    /// Panics if `fixed_hz` is zero.
    #[must_use]
    pub fn new(config: &ClockConfig, source: Box<dyn TimeSource>) -> Self {
        assert!(config.fixed_hz > 0, "fixed_hz must be non-zero");

        let tps = source.ticks_per_second() as f64;
        let now = source.now();
        let fixed_step = 1.0 / f64::from(config.fixed_hz);

        Self {
            seconds_per_tick: 1.0 / tps,
            last_sample: now,
            last_fixed_sample: now,
            source,

            unscaled_delta: 0.0,
            delta: 0.0,
            elapsed: 0.0,
            real_elapsed: 0.0,
            frame_index: 0,
            average_frame_time: fixed_step,
            fps: 0.0,
            time_scale: config.time_scale,
            paused: false,

            fixed_step,
            fixed_step_ticks: tps / f64::from(config.fixed_hz),
            max_fixed_steps: config.max_fixed_steps.max(1),
            max_frame_delta_ticks: config.max_frame_delta * tps,
            accumulator: 0.0,
            fixed_alpha: 0.0,
            fixed_frame_index: 0,
        }
    }

    /// Creates a wall-clock driven clock.
    #[must_use]
    pub fn monotonic(config: &ClockConfig) -> Self {
        Self::new(config, Box::new(MonotonicTime::new()))
    }

    /// Variable step. Call once per loop iteration.
    pub fn update(&mut self) {
        let now = self.source.now();
        let ticks = now.saturating_sub(self.last_sample);
        self.last_sample = now;

        self.unscaled_delta = ticks as f64 * self.seconds_per_tick;
        self.delta = self.scaled(self.unscaled_delta);
        self.elapsed += self.delta;
        self.real_elapsed += self.unscaled_delta;
        self.frame_index += 1;

        if self.unscaled_delta > NEGLIGIBLE_DELTA {
            let alpha = 1.0 - (-self.unscaled_delta * SMOOTHING_RATE).exp();
            self.average_frame_time += (self.unscaled_delta - self.average_frame_time) * alpha;
            self.fps = 1.0 / self.unscaled_delta;
        }
    }

    /// Fixed step. Call in a loop; each `true` means run one fixed pass.
    pub fn fixed_update(&mut self) -> bool {
        let now = self.source.now();
        let raw = now.saturating_sub(self.last_fixed_sample) as f64;
        self.last_fixed_sample = now;

        let clamped = raw.min(self.max_frame_delta_ticks);
        let owed = self.accumulator + self.scaled(clamped);
        self.accumulator = owed.min(self.fixed_step_ticks * f64::from(self.max_fixed_steps));

        if self.accumulator >= self.fixed_step_ticks {
            self.accumulator -= self.fixed_step_ticks;
            self.fixed_frame_index += 1;
            self.fixed_alpha = (self.accumulator / self.fixed_step_ticks).clamp(0.0, 1.0);
            true
        } else {
            self.fixed_alpha = (self.accumulator / self.fixed_step_ticks).clamp(0.0, 1.0);
            false
        }
    }

    /// Restarts both samplers from now and drops owed fixed steps.
    ///
    /// Time since the last sample (startup, loading) is never seen as a
    /// frame delta. Counters and `elapsed` are kept.
    pub fn restart(&mut self) {
        let now = self.source.now();
        self.last_sample = now;
        self.last_fixed_sample = now;
        self.accumulator = 0.0;
        self.fixed_alpha = 0.0;
    }

    /// Drops any owed fixed steps and restarts fixed sampling from now.
    pub fn reset_fixed(&mut self) {
        self.accumulator = 0.0;
        self.fixed_alpha = 0.0;
        self.last_fixed_sample = self.source.now();
    }

    #[inline]
    fn scaled(&self, value: f64) -> f64 {
        if self.paused {
            0.0
        } else {
            value * self.time_scale
        }
    }

    /// Real seconds of the last variable step.
    #[inline]
    #[must_use]
    pub fn unscaled_delta(&self) -> f64 {
        self.unscaled_delta
    }

    /// Scaled seconds of the last variable step (0 while paused).
    #[inline]
    #[must_use]
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Scaled seconds since the clock started.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Real seconds since the clock started.
    #[inline]
    #[must_use]
    pub fn real_elapsed(&self) -> f64 {
        self.real_elapsed
    }

    /// Number of variable steps taken.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Exponentially smoothed frame time in seconds.
    #[inline]
    #[must_use]
    pub fn average_frame_time(&self) -> f64 {
        self.average_frame_time
    }

    /// Instantaneous frames per second of the last step.
    #[inline]
    #[must_use]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Fixed step length in seconds.
    #[inline]
    #[must_use]
    pub fn fixed_delta(&self) -> f64 {
        self.fixed_step
    }

    /// Leftover fraction of a fixed step, for interpolation. In `[0, 1]`.
    #[inline]
    #[must_use]
    pub fn fixed_alpha(&self) -> f64 {
        self.fixed_alpha
    }

    /// Number of fixed steps taken.
    #[inline]
    #[must_use]
    pub fn fixed_frame_index(&self) -> u64 {
        self.fixed_frame_index
    }

    /// Current time scale.
    #[inline]
    #[must_use]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Sets the time scale. Negative values are treated as 0.
    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale.max(0.0);
    }

    /// Returns whether scaled time is frozen.
    #[inline]
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Freezes scaled time. Real time keeps counting.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreezes scaled time.
    pub fn resume(&mut self) {
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 600 ticks/s: one 60 Hz step is exactly 10 ticks.
    const TPS: u64 = 600;
    const STEP: u64 = TPS / 60;

    fn manual_clock(config: &ClockConfig) -> (Clock, ManualTime) {
        let time = ManualTime::new(TPS);
        (Clock::new(config, Box::new(time.clone())), time)
    }

    fn count_steps(clock: &mut Clock) -> u32 {
        let mut steps = 0;
        while clock.fixed_update() {
            steps += 1;
        }
        steps
    }

    #[test]
    fn test_five_steps_for_five_step_delta() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());
        time.advance(5 * STEP);

        for _ in 0..5 {
            assert!(clock.fixed_update());
        }
        assert!(clock.fixed_alpha().abs() < 1e-9);
        assert!(!clock.fixed_update());
        assert_eq!(clock.fixed_frame_index(), 5);
    }

    #[test]
    fn test_partial_step_sets_alpha() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());
        time.advance(STEP + STEP / 2);

        assert_eq!(count_steps(&mut clock), 1);
        assert!((clock.fixed_alpha() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_stall_is_clamped() {
        let config = ClockConfig {
            max_frame_delta: 0.1,
            ..Default::default()
        };
        let (mut clock, time) = manual_clock(&config);

        // A 10 s stall only counts as 0.1 s = 6 steps.
        time.advance(10 * TPS);
        assert_eq!(count_steps(&mut clock), 6);
    }

    #[test]
    fn test_catch_up_bounded_by_max_steps() {
        let config = ClockConfig {
            max_fixed_steps: 3,
            max_frame_delta: 1.0,
            ..Default::default()
        };
        let (mut clock, time) = manual_clock(&config);

        time.advance(TPS / 2);
        assert_eq!(count_steps(&mut clock), 3);
    }

    #[test]
    fn test_pause_and_time_scale() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());

        clock.pause();
        time.advance(4 * STEP);
        assert_eq!(count_steps(&mut clock), 0);

        clock.resume();
        clock.set_time_scale(2.0);
        time.advance(2 * STEP);
        assert_eq!(count_steps(&mut clock), 4);
    }

    #[test]
    fn test_restart_forgets_time_before_it() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());

        time.advance(2 * TPS);
        clock.restart();
        clock.update();
        assert_eq!(count_steps(&mut clock), 0);
        assert!(clock.unscaled_delta().abs() < 1e-9);
        assert_eq!(clock.frame_index(), 1);

        time.advance(2 * STEP);
        clock.update();
        assert_eq!(count_steps(&mut clock), 2);
    }

    #[test]
    fn test_variable_step_counters() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());

        time.advance(TPS / 10);
        clock.update();
        assert!((clock.unscaled_delta() - 0.1).abs() < 1e-9);
        assert!((clock.fps() - 10.0).abs() < 1e-6);
        assert_eq!(clock.frame_index(), 1);

        clock.set_time_scale(0.5);
        time.advance(TPS / 10);
        clock.update();
        assert!((clock.delta() - 0.05).abs() < 1e-9);
        assert!((clock.elapsed() - 0.15).abs() < 1e-9);
        assert!((clock.real_elapsed() - 0.2).abs() < 1e-9);
        assert_eq!(clock.frame_index(), 2);
    }

    #[test]
    fn test_average_moves_toward_frame_time() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());
        let start = clock.average_frame_time();

        for _ in 0..50 {
            time.advance(TPS / 20);
            clock.update();
        }
        let avg = clock.average_frame_time();
        assert!(avg > start);
        assert!((avg - 0.05).abs() < 0.005);
    }

    #[test]
    fn test_negligible_delta_keeps_average() {
        let (mut clock, _time) = manual_clock(&ClockConfig::default());
        let before = clock.average_frame_time();
        clock.update();
        assert_eq!(clock.frame_index(), 1);
        assert!((clock.average_frame_time() - before).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_fixed_forgets_owed_steps() {
        let (mut clock, time) = manual_clock(&ClockConfig::default());
        time.advance(3 * STEP);
        clock.reset_fixed();
        assert_eq!(count_steps(&mut clock), 0);
    }

    #[test]
    fn test_monotonic_source_advances() {
        let mut clock = Clock::monotonic(&ClockConfig::default());
        std::thread::sleep(std::time::Duration::from_millis(2));
        clock.update();
        assert!(clock.unscaled_delta() > 0.0);
    }
}
