//! Bright/dark state determination from charge-time samples.
//!
//! A longer charge time means a darker photoresistor. Two debounce
//! policies turn the noisy sample stream into a stable two-state signal:
//! a running average compared against hysteresis thresholds, and a
//! duration-based hysteresis where a reading must persist before the
//! state flips.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    Unknown,
    Bright,
    Dark,
}

impl LightState {
    /// Tag byte used in raw sample records.
    pub fn tag(self) -> u8 {
        match self {
            LightState::Unknown => 0,
            LightState::Bright => 1,
            LightState::Dark => 2,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LightState::Unknown => "unknown",
            LightState::Bright => "bright",
            LightState::Dark => "dark",
        })
    }
}

/// Running-average policy.
///
/// Keeps the last N samples in a circular buffer and compares their
/// integer average against the two thresholds. The buffer starts out
/// zero-filled, so the average climbs slowly during the first window.
pub struct RunningAverage {
    /// Averages above this value are considered dark
    high_threshold: u32,
    /// Averages below this value are considered bright
    low_threshold: u32,
    buf: Vec<u32>,
    index: usize,
    total: u64,
    average: u32,
    state: LightState,
}

impl RunningAverage {
    /// `window` must be nonzero; configuration validates this.
    pub fn new(window: usize, high_threshold: u32, low_threshold: u32) -> Self {
        Self {
            high_threshold,
            low_threshold,
            buf: vec![0; window],
            index: 0,
            total: 0,
            average: 0,
            state: LightState::Unknown,
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn average(&self) -> u32 {
        self.average
    }

    /// Fold one timing sample in and report a state transition, if any.
    pub fn observe(&mut self, timing_ms: u32) -> Option<LightState> {
        self.total -= u64::from(self.buf[self.index]);
        self.buf[self.index] = timing_ms;
        self.total += u64::from(timing_ms);
        self.index = (self.index + 1) % self.buf.len();
        self.average = (self.total / self.buf.len() as u64) as u32;

        match self.state {
            LightState::Bright if self.average > self.high_threshold => {
                self.state = LightState::Dark;
                Some(LightState::Dark)
            }
            LightState::Dark if self.average < self.low_threshold => {
                self.state = LightState::Bright;
                Some(LightState::Bright)
            }
            LightState::Unknown => {
                // The first sample seeds the state on its own, without
                // waiting for the average to become meaningful.
                let midpoint = (self.high_threshold + self.low_threshold) / 2;
                self.state = if timing_ms < midpoint {
                    LightState::Bright
                } else {
                    LightState::Dark
                };
                Some(self.state)
            }
            _ => None,
        }
    }
}

/// Duration-based hysteresis policy.
///
/// A reading past a threshold only flips the state once it has persisted
/// for the configured duration. Readings past the complete-darkness
/// threshold get a much shorter duration, so a lamp switching off is
/// distinguished from something briefly covering the sensor.
pub struct DurationHysteresis {
    /// Samples at or above this value count towards a dark transition
    high_threshold: u32,
    /// Samples below this value count towards a bright transition
    low_threshold: u32,
    /// Samples at or above this value qualify for the fast override
    darkness_threshold: u32,
    high_duration: Duration,
    low_duration: Duration,
    darkness_duration: Duration,
    state: LightState,
    /// When the current run of qualifying samples began
    run_started_at: Option<Instant>,
}

impl DurationHysteresis {
    pub fn new(
        high_threshold: u32,
        low_threshold: u32,
        darkness_threshold: u32,
        high_duration: Duration,
        low_duration: Duration,
        darkness_duration: Duration,
    ) -> Self {
        Self {
            high_threshold,
            low_threshold,
            darkness_threshold,
            high_duration,
            low_duration,
            darkness_duration,
            state: LightState::Unknown,
            run_started_at: None,
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    /// Fold one timing sample in and report a state transition, if any.
    pub fn observe(&mut self, timing_ms: u32, now: Instant) -> Option<LightState> {
        let elapsed = now.duration_since(self.run_started_at.unwrap_or(now));
        match self.state {
            LightState::Unknown => {
                // Seeding compares against the midpoint rather than the
                // high threshold used in steady state.
                let midpoint = (self.high_threshold + self.low_threshold) / 2;
                self.state = if timing_ms >= self.darkness_threshold || timing_ms >= midpoint {
                    LightState::Dark
                } else {
                    LightState::Bright
                };
                self.run_started_at = Some(now);
                Some(self.state)
            }
            LightState::Bright => {
                if timing_ms >= self.high_threshold {
                    let darkness_override = timing_ms >= self.darkness_threshold
                        && elapsed >= self.darkness_duration;
                    if darkness_override || elapsed >= self.high_duration {
                        self.state = LightState::Dark;
                        self.run_started_at = Some(now);
                        Some(LightState::Dark)
                    } else {
                        None
                    }
                } else {
                    // The qualifying run is broken; the debounce clock
                    // restarts from here.
                    self.run_started_at = Some(now);
                    None
                }
            }
            LightState::Dark => {
                if timing_ms < self.low_threshold {
                    if elapsed >= self.low_duration {
                        self.state = LightState::Bright;
                        self.run_started_at = Some(now);
                        Some(LightState::Bright)
                    } else {
                        None
                    }
                } else {
                    self.run_started_at = Some(now);
                    None
                }
            }
        }
    }
}

/// The debounce policy selected at configuration time.
pub enum DebouncePolicy {
    RunningAverage(RunningAverage),
    DurationHysteresis(DurationHysteresis),
}

impl DebouncePolicy {
    pub fn observe(&mut self, timing_ms: u32, now: Instant) -> Option<LightState> {
        match self {
            DebouncePolicy::RunningAverage(policy) => policy.observe(timing_ms),
            DebouncePolicy::DurationHysteresis(policy) => policy.observe(timing_ms, now),
        }
    }

    pub fn state(&self) -> LightState {
        match self {
            DebouncePolicy::RunningAverage(policy) => policy.state(),
            DebouncePolicy::DurationHysteresis(policy) => policy.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_no_transition {
        ($observed:expr) => {{
            assert_eq!($observed, None);
        }};
    }

    fn hysteresis() -> DurationHysteresis {
        // Dark after five minutes above 150 ms, bright after 30 s below
        // 50 ms, fast dark past 900 ms.
        DurationHysteresis::new(
            150,
            50,
            900,
            Duration::from_secs(300),
            Duration::from_secs(30),
            Duration::from_millis(900),
        )
    }

    #[test]
    fn test_running_sum_matches_buffer() {
        let mut policy = RunningAverage::new(4, 1000, 500);
        for timing in [10, 20, 30, 40] {
            policy.observe(timing);
        }
        assert_eq!(policy.total, 100);
        assert_eq!(policy.average(), 25);
    }

    #[test]
    fn test_average_uses_integer_division() {
        let mut policy = RunningAverage::new(4, 1000, 500);
        for timing in [10, 20, 30, 43] {
            policy.observe(timing);
        }
        // 103 / 4 truncates
        assert_eq!(policy.average(), 25);
    }

    #[test]
    fn test_running_average_seeds_from_first_sample() {
        let mut policy = RunningAverage::new(128, 200, 100);
        assert_eq!(policy.state(), LightState::Unknown);
        // Midpoint is 150; below seeds bright
        assert_eq!(policy.observe(100), Some(LightState::Bright));
        assert_eq!(policy.state(), LightState::Bright);

        let mut policy = RunningAverage::new(128, 200, 100);
        assert_eq!(policy.observe(160), Some(LightState::Dark));
    }

    #[test]
    fn test_running_average_single_transition_on_crossing() {
        let mut policy = RunningAverage::new(4, 180, 50);
        // Seeds bright (50 < midpoint 115)
        assert_eq!(policy.observe(50), Some(LightState::Bright));

        // Averages climb: 62, 112, 162, 200. Only the crossing call
        // transitions.
        assert_no_transition!(policy.observe(200));
        assert_no_transition!(policy.observe(200));
        assert_no_transition!(policy.observe(200));
        assert_eq!(policy.observe(200), Some(LightState::Dark));
        assert_eq!(policy.average(), 200);

        // Still above the threshold, but already dark
        assert_no_transition!(policy.observe(200));
        assert_no_transition!(policy.observe(200));
    }

    #[test]
    fn test_running_average_hysteresis_band_holds_state() {
        let mut policy = RunningAverage::new(1, 200, 100);
        assert_eq!(policy.observe(250), Some(LightState::Dark));
        // Between the thresholds: no flip in either direction
        assert_no_transition!(policy.observe(150));
        assert_eq!(policy.state(), LightState::Dark);
        assert_eq!(policy.observe(90), Some(LightState::Bright));
        assert_no_transition!(policy.observe(150));
        assert_eq!(policy.state(), LightState::Bright);
    }

    #[test]
    fn test_hysteresis_seeds_exactly_once() {
        let mut policy = hysteresis();
        let t0 = Instant::now();
        assert_eq!(policy.state(), LightState::Unknown);
        assert_eq!(policy.observe(40, t0), Some(LightState::Bright));
        // Second identical sample: no transition
        assert_no_transition!(policy.observe(40, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_hysteresis_seeding_uses_midpoint_not_high_threshold() {
        // Seeding is intentionally stricter than the steady-state rule:
        // a sample at the midpoint (100) seeds dark even though it would
        // not qualify towards dark (high threshold 150) afterwards.
        let mut policy = hysteresis();
        assert_eq!(policy.observe(120, Instant::now()), Some(LightState::Dark));

        let mut policy = hysteresis();
        assert_eq!(policy.observe(90, Instant::now()), Some(LightState::Bright));

        // At or past the darkness threshold always seeds dark
        let mut policy = hysteresis();
        assert_eq!(policy.observe(950, Instant::now()), Some(LightState::Dark));
    }

    #[test]
    fn test_darkness_override_beats_high_duration() {
        let mut policy = hysteresis();
        let t0 = Instant::now();
        assert_eq!(policy.observe(40, t0), Some(LightState::Bright));

        // 1000 ms sample held for one second: the darkness override
        // (900 ms) fires long before the five-minute high duration.
        assert_eq!(
            policy.observe(1000, t0 + Duration::from_millis(1000)),
            Some(LightState::Dark)
        );
    }

    #[test]
    fn test_high_sample_without_duration_does_not_transition() {
        let mut policy = hysteresis();
        let t0 = Instant::now();
        assert_eq!(policy.observe(40, t0), Some(LightState::Bright));

        // Above high, below darkness: must wait out the full duration
        assert_no_transition!(policy.observe(160, t0 + Duration::from_millis(1000)));
        assert_eq!(policy.state(), LightState::Bright);

        // ...and eventually transitions once the duration is met
        assert_eq!(
            policy.observe(160, t0 + Duration::from_secs(301)),
            Some(LightState::Dark)
        );
    }

    #[test]
    fn test_disqualifying_sample_resets_debounce_clock() {
        let mut policy = hysteresis();
        let t0 = Instant::now();
        assert_eq!(policy.observe(40, t0), Some(LightState::Bright));

        // Qualifying samples at t+200s and t+320s with a break at t+250s:
        // elapsed time never accumulates across the gap.
        assert_no_transition!(policy.observe(160, t0 + Duration::from_secs(200)));
        assert_no_transition!(policy.observe(40, t0 + Duration::from_secs(250)));
        assert_no_transition!(policy.observe(160, t0 + Duration::from_secs(320)));
        assert_eq!(policy.state(), LightState::Bright);

        // From the break at t+250s the run completes at t+551s
        assert_eq!(
            policy.observe(160, t0 + Duration::from_secs(551)),
            Some(LightState::Dark)
        );
    }

    #[test]
    fn test_dark_to_bright_needs_low_duration() {
        let mut policy = hysteresis();
        let t0 = Instant::now();
        assert_eq!(policy.observe(950, t0), Some(LightState::Dark));

        assert_no_transition!(policy.observe(40, t0 + Duration::from_secs(10)));
        // A sample back above the low threshold resets the run
        assert_no_transition!(policy.observe(60, t0 + Duration::from_secs(20)));
        assert_no_transition!(policy.observe(40, t0 + Duration::from_secs(40)));
        assert_eq!(
            policy.observe(40, t0 + Duration::from_secs(51)),
            Some(LightState::Bright)
        );
    }

    #[test]
    fn test_state_tags() {
        assert_eq!(LightState::Unknown.tag(), 0);
        assert_eq!(LightState::Bright.tag(), 1);
        assert_eq!(LightState::Dark.tag(), 2);
    }
}
