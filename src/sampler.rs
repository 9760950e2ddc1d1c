//! Charge-time sampling on the sensing line.
//!
//! The photoresistor charges a capacitor hanging off a single digital
//! line. One sample is one drain/charge cycle: drive the line low to
//! empty the capacitor, switch to input, and time how long the rising
//! edge takes to arrive. More light means less resistance means a faster
//! edge.

use std::thread;
use std::time::{Duration, Instant};

use crate::gpio::{Direction, Edge, GpioError, GpioLine, WaitResult};

/// How long the line is held low to drain the capacitor.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Minimum time between the starts of two samples.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

pub struct ChargeTimeSampler<L: GpioLine> {
    line: L,
    settle: Duration,
    min_interval: Duration,
    timeout: Option<Duration>,
    last_sample_at: Option<Instant>,
}

impl<L: GpioLine> ChargeTimeSampler<L> {
    /// A timeout of `None` waits for the edge indefinitely.
    pub fn new(line: L, timeout: Option<Duration>) -> Self {
        Self {
            line,
            settle: SETTLE_DELAY,
            min_interval: MIN_SAMPLE_INTERVAL,
            timeout,
            last_sample_at: None,
        }
    }

    #[cfg(test)]
    fn with_delays(line: L, timeout: Option<Duration>, settle: Duration, min_interval: Duration) -> Self {
        Self {
            line,
            settle,
            min_interval,
            timeout,
            last_sample_at: None,
        }
    }

    /// Run one drain/charge cycle.
    ///
    /// Returns the charge time in whole milliseconds, or `None` if the
    /// edge did not arrive within the timeout. A timeout just means the
    /// line stayed dark long enough; it is an expected outcome, not an
    /// error.
    pub fn sample(&mut self) -> Result<Option<u32>, GpioError> {
        let timing = self.run_cycle();
        // The interrupt must never stay armed across calls, or the next
        // drain cycle races with a stale pending edge.
        let disarm = self.line.set_edge(Edge::None);
        let timing = timing?;
        disarm?;
        Ok(timing)
    }

    fn run_cycle(&mut self) -> Result<Option<u32>, GpioError> {
        // Drain the capacitor
        self.line.set_direction(Direction::Out)?;
        self.line.write(false)?;
        thread::sleep(self.settle);

        // Bound the sampling rate
        if let Some(last) = self.last_sample_at {
            let since = last.elapsed();
            if since < self.min_interval {
                thread::sleep(self.min_interval - since);
            }
        }
        self.last_sample_at = Some(Instant::now());

        // Let the capacitor charge and time the rising edge
        self.line.set_direction(Direction::In)?;
        self.line.set_edge(Edge::Rising)?;
        let start = Instant::now();
        match self.line.wait_for_edge(self.timeout)? {
            WaitResult::Edge => Ok(Some(start.elapsed().as_millis() as u32)),
            WaitResult::Timeout => Ok(None),
        }
    }

    /// Release the underlying line reservation.
    pub fn release(&mut self) {
        self.line.release();
    }

    #[cfg(test)]
    pub(crate) fn line(&self) -> &L {
        &self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::mock::MockLine;

    fn sampler(line: MockLine) -> ChargeTimeSampler<MockLine> {
        ChargeTimeSampler::with_delays(
            line,
            Some(Duration::from_millis(5)),
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_sample_returns_timing_on_edge() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Edge));
        let mut sampler = sampler(line);

        let timing = sampler.sample().unwrap();
        assert!(timing.is_some());
        assert_eq!(sampler.line.direction, Some(Direction::In));
    }

    #[test]
    fn test_sample_returns_none_on_timeout() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Timeout));
        let mut sampler = sampler(line);

        assert!(sampler.sample().unwrap().is_none());
    }

    #[test]
    fn test_drain_drives_line_low() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Edge));
        let mut sampler = sampler(line);

        sampler.sample().unwrap();
        assert_eq!(sampler.line.writes, vec![false]);
    }

    #[test]
    fn test_edge_disarmed_after_success() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Edge));
        let mut sampler = sampler(line);

        sampler.sample().unwrap();
        assert_eq!(sampler.line.edge, Some(Edge::None));
    }

    #[test]
    fn test_edge_disarmed_after_timeout() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Timeout));
        let mut sampler = sampler(line);

        sampler.sample().unwrap();
        assert_eq!(sampler.line.edge, Some(Edge::None));
    }

    #[test]
    fn test_edge_disarmed_after_wait_error() {
        let mut line = MockLine::default();
        line.waits.push_back(Err(MockLine::io_error("value")));
        let mut sampler = sampler(line);

        assert!(sampler.sample().is_err());
        assert_eq!(sampler.line.edge, Some(Edge::None));
    }

    #[test]
    fn test_edge_disarmed_after_drain_error() {
        let mut line = MockLine::default();
        line.fail_set_direction = true;
        let mut sampler = sampler(line);

        assert!(sampler.sample().is_err());
        assert_eq!(sampler.line.edge, Some(Edge::None));
    }

    #[test]
    fn test_consecutive_samples() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Edge));
        line.waits.push_back(Ok(WaitResult::Timeout));
        line.waits.push_back(Ok(WaitResult::Edge));
        let mut sampler = sampler(line);

        assert!(sampler.sample().unwrap().is_some());
        assert!(sampler.sample().unwrap().is_none());
        assert!(sampler.sample().unwrap().is_some());
        assert_eq!(sampler.line.edge, Some(Edge::None));
    }
}
