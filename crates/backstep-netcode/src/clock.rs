//! Fixed-step tick clocks.
//!
//! [`TickClock`] turns irregular frame times into a fixed simulation
//! step through an accumulator. [`PredictedClock`] wraps it with the
//! drift correction a predicting peer needs to stay a few ticks ahead
//! of a remote authority:
//!
//! - a round-trip estimate from echoed send times,
//! - an input delay derived from that estimate,
//! - gentle rate nudges while drift is small, a hard snap when it is not.

use crate::config::{ClockConfig, SyncConfig};
use crate::error::Result;
use backstep_core::Tick;

/// What an authoritative update did to a [`PredictedClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockAdjust {
    /// Drift inside the nudge band; running at the base rate.
    Steady,
    /// Running `drift` ticks ahead; rate lowered.
    Slowed { drift: i64 },
    /// Running `drift` ticks behind; rate raised.
    Hastened { drift: i64 },
    /// Drift beyond the snap threshold; the clock jumped.
    Snapped { from: Tick, to: Tick },
}

/// Fixed-step accumulator clock.
///
/// `advance` feeds wall-clock time in and runs a callback once per
/// produced tick. Ticks the clock has already dispatched are never
/// dispatched again, even if the clock is moved backwards.
#[derive(Debug, Clone)]
pub struct TickClock {
    config: ClockConfig,
    tick: Tick,
    accumulator: f64,
    /// Pacing multiplier from drift correction.
    rate_scale: f64,
    /// Rate multiplier requested by the remote authority.
    time_scale: f64,
    /// High-water mark of dispatched ticks.
    dispatched: Tick,
}

impl TickClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            tick: 0,
            accumulator: 0.0,
            rate_scale: 1.0,
            time_scale: 1.0,
            dispatched: 0,
        }
    }

    /// Last completed tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn rate_scale(&self) -> f64 {
        self.rate_scale
    }

    /// Sets the pacing multiplier, clamped to within 25% of 1.
    pub fn set_rate_scale(&mut self, scale: f64) {
        self.rate_scale = scale.clamp(0.75, 1.25);
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Sets the authority-requested rate multiplier, clamped to 0.25..=4.
    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale.clamp(0.25, 4.0);
    }

    /// Moves the clock to `tick` without dispatching the skipped range.
    ///
    /// After a backwards jump the clock steps through the revisited
    /// ticks silently and resumes dispatching past the old high-water
    /// mark.
    pub fn jump_to(&mut self, tick: Tick) {
        self.tick = tick;
        self.dispatched = self.dispatched.max(tick);
        self.accumulator = 0.0;
    }

    /// Feeds `elapsed` seconds in and runs `on_tick` per produced tick.
    ///
    /// Returns the number of ticks produced. Frame times above the
    /// configured update budget are treated as a hitch: the accumulator
    /// resets and nothing is simulated, so a debugger pause does not
    /// turn into a catch-up burst.
    pub fn advance<F>(&mut self, elapsed: f64, mut on_tick: F) -> Result<u32>
    where
        F: FnMut(Tick) -> Result<()>,
    {
        if elapsed > self.config.update_budget() {
            log::debug!(
                "frame hitch of {:.3}s exceeds budget {:.3}s; dropping accumulated time",
                elapsed,
                self.config.update_budget()
            );
            self.accumulator = 0.0;
            return Ok(0);
        }
        self.accumulator += elapsed.max(0.0);

        let step = self.config.fixed_dt() / (self.rate_scale * self.time_scale);
        let mut produced = 0;
        while self.accumulator >= step && produced < self.config.max_ticks_per_update() {
            self.accumulator -= step;
            self.tick += 1;
            produced += 1;
            if self.tick > self.dispatched {
                self.dispatched = self.tick;
                on_tick(self.tick)?;
            }
        }
        Ok(produced)
    }
}

/// Tick clock that chases a remote authoritative clock.
///
/// The clock aims to run `delay_ticks` ahead of the newest
/// authoritative tick, so input sent for a tick reaches the authority
/// just before the authority simulates that tick. The delay comes from
/// a smoothed round-trip estimate padded by twice its deviation.
#[derive(Debug, Clone)]
pub struct PredictedClock {
    clock: TickClock,
    sync: SyncConfig,
    rtt_mean: f64,
    rtt_deviation: f64,
    has_sample: bool,
    /// Seconds of local wall-clock time fed in so far; stamped on
    /// outgoing input and echoed back by the authority.
    local_time: f64,
}

impl PredictedClock {
    pub fn new(config: ClockConfig, sync: SyncConfig) -> Self {
        Self {
            clock: TickClock::new(config),
            sync,
            rtt_mean: 0.0,
            rtt_deviation: 0.0,
            has_sample: false,
            local_time: 0.0,
        }
    }

    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    pub fn config(&self) -> &ClockConfig {
        self.clock.config()
    }

    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    pub fn rtt_estimate(&self) -> f64 {
        self.rtt_mean
    }

    /// Sets the authority-requested rate multiplier.
    pub fn set_remote_time_scale(&mut self, scale: f64) {
        self.clock.set_time_scale(scale);
    }

    pub fn time_scale(&self) -> f64 {
        self.clock.time_scale()
    }

    /// Ticks of input delay implied by the current round-trip estimate.
    pub fn delay_ticks(&self) -> i64 {
        let rate = f64::from(self.clock.config().tick_rate());
        let padded = self.rtt_mean + 2.0 * self.rtt_deviation;
        let ticks = (padded * rate).round() as i64 + 1;
        ticks.clamp(1, self.sync.max_delay_ticks())
    }

    /// Advances local time and the underlying fixed-step clock.
    pub fn advance<F>(&mut self, elapsed: f64, on_tick: F) -> Result<u32>
    where
        F: FnMut(Tick) -> Result<()>,
    {
        self.local_time += elapsed.max(0.0);
        self.clock.advance(elapsed, on_tick)
    }

    /// Corrects the clock against a fresh authoritative tick.
    ///
    /// `echoed_time` is the local send time the authority echoed back;
    /// the difference to now is one round trip. Drift is measured as
    /// where the authority should be (our tick minus the input delay)
    /// against where it actually is.
    pub fn align_to(&mut self, authoritative_tick: Tick, echoed_time: f64) -> ClockAdjust {
        let rtt = self.local_time - echoed_time;
        if rtt.is_finite() && rtt >= 0.0 {
            self.observe_rtt(rtt);
        }

        let delay = self.delay_ticks();
        let drift = (self.clock.tick() - delay) - authoritative_tick;
        if drift.abs() > self.sync.snap_threshold() {
            let from = self.clock.tick();
            let to = authoritative_tick + delay;
            log::warn!("clock drifted {drift} ticks; snapping {from} -> {to}");
            self.clock.jump_to(to);
            self.clock.set_rate_scale(1.0);
            // a drift this large means the round-trip estimate no
            // longer describes the link; start sampling it fresh
            self.rtt_mean = 0.0;
            self.rtt_deviation = 0.0;
            self.has_sample = false;
            return ClockAdjust::Snapped { from, to };
        }

        if drift > self.sync.nudge_band() {
            self.clock.set_rate_scale(self.sync.slow_scale());
            ClockAdjust::Slowed { drift }
        } else if drift < -self.sync.nudge_band() {
            self.clock.set_rate_scale(self.sync.fast_scale());
            ClockAdjust::Hastened { drift: -drift }
        } else {
            self.clock.set_rate_scale(1.0);
            ClockAdjust::Steady
        }
    }

    fn observe_rtt(&mut self, rtt: f64) {
        if !self.has_sample {
            self.rtt_mean = rtt;
            self.rtt_deviation = 0.0;
            self.has_sample = true;
            return;
        }
        let weight = self.sync.rtt_smoothing();
        let deviation = (rtt - self.rtt_mean).abs();
        self.rtt_mean += weight * (rtt - self.rtt_mean);
        self.rtt_deviation += weight * (deviation - self.rtt_deviation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 64Hz keeps the fixed step exactly representable, so the
    // tick-count assertions cannot wobble on rounding
    #[test]
    fn test_accumulator_produces_fixed_ticks() {
        let config = ClockConfig::new(64).with_max_ticks_per_update(100);
        let mut clock = TickClock::new(config);
        let mut seen = Vec::new();
        let produced = clock.advance(1.0, |t| {
            seen.push(t);
            Ok(())
        });
        assert_eq!(produced.unwrap(), 64);
        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&64));
        assert_eq!(clock.tick(), 64);
    }

    #[test]
    fn test_small_frames_accumulate() {
        let mut clock = TickClock::new(ClockConfig::new(60));
        let mut total = 0;
        for _ in 0..6 {
            total += clock.advance(0.004, |_| Ok(())).unwrap();
        }
        // 24ms at 60Hz is one tick with 7.3ms left over
        assert_eq!(total, 1);
        assert_eq!(clock.tick(), 1);
    }

    #[test]
    fn test_max_ticks_per_update_caps_burst() {
        let config = ClockConfig::new(64).with_max_ticks_per_update(3);
        let mut clock = TickClock::new(config);
        assert_eq!(clock.advance(10.0 / 64.0, |_| Ok(())).unwrap(), 3);
        // the remainder stays queued
        assert_eq!(clock.advance(0.0, |_| Ok(())).unwrap(), 3);
        assert_eq!(clock.advance(0.0, |_| Ok(())).unwrap(), 3);
        assert_eq!(clock.advance(0.0, |_| Ok(())).unwrap(), 1);
        assert_eq!(clock.tick(), 10);
    }

    #[test]
    fn test_hitch_resets_accumulator() {
        let config = ClockConfig::new(60).with_update_budget(0.5);
        let mut clock = TickClock::new(config);
        clock.advance(0.01, |_| Ok(())).unwrap();
        assert_eq!(clock.advance(3.0, |_| Ok(())).unwrap(), 0);
        assert_eq!(clock.tick(), 0);
        // normal frames resume cleanly after the hitch
        assert_eq!(clock.advance(1.0 / 60.0, |_| Ok(())).unwrap(), 1);
    }

    #[test]
    fn test_backward_jump_does_not_redispatch() {
        let config = ClockConfig::new(64).with_max_ticks_per_update(100);
        let mut clock = TickClock::new(config);
        clock.advance(5.0 / 64.0, |_| Ok(())).unwrap();
        assert_eq!(clock.tick(), 5);

        clock.jump_to(2);
        let mut seen = Vec::new();
        clock
            .advance(5.0 / 64.0, |t| {
                seen.push(t);
                Ok(())
            })
            .unwrap();
        // ticks 3..=5 replay silently, dispatch resumes at 6
        assert_eq!(clock.tick(), 7);
        assert_eq!(seen, vec![6, 7]);
    }

    #[test]
    fn test_forward_jump_skips_dispatch() {
        let mut clock = TickClock::new(ClockConfig::new(64));
        clock.jump_to(100);
        let mut seen = Vec::new();
        clock
            .advance(1.0 / 64.0, |t| {
                seen.push(t);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![101]);
    }

    #[test]
    fn test_rate_scale_changes_output() {
        let config = ClockConfig::new(60).with_max_ticks_per_update(100);
        let mut fast = TickClock::new(config);
        let mut normal = TickClock::new(config);
        fast.set_rate_scale(1.25);
        for _ in 0..240 {
            fast.advance(1.0 / 60.0, |_| Ok(())).unwrap();
            normal.advance(1.0 / 60.0, |_| Ok(())).unwrap();
        }
        assert!(fast.tick() > normal.tick() + 40);
        assert_eq!(normal.tick(), 240);
    }

    #[test]
    fn test_delay_tracks_round_trip() {
        let mut clock = PredictedClock::new(ClockConfig::new(60), SyncConfig::default());
        assert_eq!(clock.delay_ticks(), 1);

        // constant 100ms round trip, sampled a few times
        for _ in 0..50 {
            clock.advance(0.05, |_| Ok(())).unwrap();
            clock.align_to(clock.tick(), clock.local_time() - 0.1);
        }
        // 0.1s at 60Hz rounds to 6 ticks, plus one for safety
        assert_eq!(clock.delay_ticks(), 7);
        assert!((clock.rtt_estimate() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_converges_ahead_of_authority() {
        let config = ClockConfig::new(60).with_max_ticks_per_update(4);
        let mut clock = PredictedClock::new(config, SyncConfig::default());
        let dt = 1.0 / 60.0;
        let mut authority: Tick = 0;
        let mut snapped = 0;
        let mut last = ClockAdjust::Steady;

        for _ in 0..2000 {
            clock.advance(dt, |_| Ok(())).unwrap();
            authority += 1;
            last = clock.align_to(authority, clock.local_time() - 0.1);
            if matches!(last, ClockAdjust::Snapped { .. }) {
                snapped += 1;
            }
        }

        // small initial drift is paced away without ever snapping
        assert_eq!(snapped, 0);
        let lead = clock.tick() - authority;
        assert!((6..=8).contains(&lead), "lead was {lead}");
        assert!(matches!(last, ClockAdjust::Steady));
    }

    #[test]
    fn test_snap_on_authority_jump() {
        let mut clock = PredictedClock::new(ClockConfig::new(60), SyncConfig::default());
        for _ in 0..50 {
            clock.advance(1.0 / 60.0, |_| Ok(())).unwrap();
            clock.align_to(clock.tick() - 7, clock.local_time() - 0.1);
        }

        let delay = clock.delay_ticks();
        let far_ahead = clock.tick() + 500;
        let adjust = clock.align_to(far_ahead, clock.local_time() - 0.1);
        match adjust {
            ClockAdjust::Snapped { to, .. } => {
                assert_eq!(to, far_ahead + delay);
                assert_eq!(clock.tick(), to);
            }
            other => panic!("expected snap, got {other:?}"),
        }
        // the round-trip estimate restarts from scratch after a snap
        assert_eq!(clock.rtt_estimate(), 0.0);
        assert_eq!(clock.delay_ticks(), 1);
    }

    #[test]
    fn test_nudges_point_back_toward_zero_drift() {
        let mut clock = PredictedClock::new(ClockConfig::new(60), SyncConfig::default());
        for _ in 0..600 {
            clock.advance(1.0 / 60.0, |_| Ok(())).unwrap();
        }
        let delay = clock.delay_ticks();

        // authority slightly behind where we guess it: we are ahead
        let ahead = clock.align_to(clock.tick() - delay - 3, clock.local_time());
        assert!(matches!(ahead, ClockAdjust::Slowed { drift: 3 }));

        // authority slightly past our guess: we are behind
        let behind = clock.align_to(clock.tick() - delay + 3, clock.local_time());
        assert!(matches!(behind, ClockAdjust::Hastened { drift: 3 }));

        let matched = clock.align_to(clock.tick() - delay, clock.local_time());
        assert!(matches!(matched, ClockAdjust::Steady));
    }
}
