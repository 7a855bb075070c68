//! Clock and drift-correction configuration.
//!
//! Both configs are plain serde values so embedders can load them from
//! whatever settings format they already use. Constructors clamp every
//! field into a usable range rather than erroring.

use serde::{Deserialize, Serialize};

/// Fixed-step clock settings.
///
/// # Example
///
/// ```
/// use backstep_netcode::ClockConfig;
///
/// let config = ClockConfig::new(60).with_max_ticks_per_update(4);
/// assert_eq!(config.tick_rate(), 60);
/// assert_eq!(config.max_ticks_per_update(), 4);
/// assert!((config.fixed_dt() - 1.0 / 60.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Simulation rate in ticks per second.
    tick_rate: u32,
    /// Most ticks one `advance` call may produce; the rest stay queued
    /// in the accumulator.
    max_ticks_per_update: u32,
    /// Frame times above this many seconds are treated as a hitch and
    /// discarded instead of simulated.
    update_budget: f64,
}

impl ClockConfig {
    /// Creates a config for the given tick rate, clamped to 1..=1000.
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate: tick_rate.clamp(1, 1000),
            max_ticks_per_update: 8,
            update_budget: 0.5,
        }
    }

    /// Sets the per-update tick cap, clamped to at least 1.
    pub fn with_max_ticks_per_update(mut self, max_ticks: u32) -> Self {
        self.max_ticks_per_update = max_ticks.max(1);
        self
    }

    /// Sets the hitch threshold in seconds, clamped to at least 10ms.
    pub fn with_update_budget(mut self, seconds: f64) -> Self {
        self.update_budget = seconds.max(0.01);
        self
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds of simulated time per tick.
    pub fn fixed_dt(&self) -> f64 {
        1.0 / f64::from(self.tick_rate)
    }

    pub fn max_ticks_per_update(&self) -> u32 {
        self.max_ticks_per_update
    }

    pub fn update_budget(&self) -> f64 {
        self.update_budget
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new(60)
    }
}

/// Drift-correction settings for a clock chasing a remote authority.
///
/// # Example
///
/// ```
/// use backstep_netcode::SyncConfig;
///
/// let config = SyncConfig::default().with_snap_threshold(20);
/// assert_eq!(config.snap_threshold(), 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Weight of each new round-trip sample in the running averages.
    rtt_smoothing: f64,
    /// Upper bound on the input delay derived from the averages.
    max_delay_ticks: i64,
    /// Drift, in ticks, beyond which the clock jumps instead of pacing.
    snap_threshold: i64,
    /// Drift, in ticks, tolerated without any pacing change.
    nudge_band: i64,
    /// Rate multiplier while running ahead of the authority.
    slow_scale: f64,
    /// Rate multiplier while running behind the authority.
    fast_scale: f64,
}

impl SyncConfig {
    /// Sets the round-trip smoothing weight, clamped to (0, 1].
    pub fn with_rtt_smoothing(mut self, weight: f64) -> Self {
        self.rtt_smoothing = weight.clamp(0.001, 1.0);
        self
    }

    /// Sets the input delay ceiling, clamped to at least 1 tick.
    pub fn with_max_delay_ticks(mut self, ticks: i64) -> Self {
        self.max_delay_ticks = ticks.max(1);
        self
    }

    /// Sets the snap threshold, clamped to at least 2 ticks.
    pub fn with_snap_threshold(mut self, ticks: i64) -> Self {
        self.snap_threshold = ticks.max(2);
        self
    }

    /// Sets the no-correction band, clamped to 0..snap threshold.
    pub fn with_nudge_band(mut self, ticks: i64) -> Self {
        self.nudge_band = ticks.clamp(0, self.snap_threshold - 1);
        self
    }

    /// Sets both pacing multipliers, each clamped to within 25% of 1.
    pub fn with_pacing(mut self, slow: f64, fast: f64) -> Self {
        self.slow_scale = slow.clamp(0.75, 1.0);
        self.fast_scale = fast.clamp(1.0, 1.25);
        self
    }

    pub fn rtt_smoothing(&self) -> f64 {
        self.rtt_smoothing
    }

    pub fn max_delay_ticks(&self) -> i64 {
        self.max_delay_ticks
    }

    pub fn snap_threshold(&self) -> i64 {
        self.snap_threshold
    }

    pub fn nudge_band(&self) -> i64 {
        self.nudge_band
    }

    pub fn slow_scale(&self) -> f64 {
        self.slow_scale
    }

    pub fn fast_scale(&self) -> f64 {
        self.fast_scale
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rtt_smoothing: 0.1,
            max_delay_ticks: 32,
            snap_threshold: 10,
            nudge_band: 0,
            slow_scale: 0.98,
            fast_scale: 1.02,
        }
    }
}
