//! The LDR sensor: one sensing line, one debounce policy, one optional
//! raw sample tap.

use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::gpio::{GpioError, GpioLine};
use crate::light::{DebouncePolicy, LightState};
use crate::sampler::ChargeTimeSampler;
use crate::sink::RawSampleSink;

pub struct LdrSensor<L: GpioLine> {
    sampler: ChargeTimeSampler<L>,
    policy: DebouncePolicy,
    sink: Option<RawSampleSink>,
    released: bool,
}

impl<L: GpioLine> LdrSensor<L> {
    pub fn new(
        line: L,
        timeout: Option<Duration>,
        policy: DebouncePolicy,
        sink: Option<RawSampleSink>,
    ) -> Self {
        Self {
            sampler: ChargeTimeSampler::new(line, timeout),
            policy,
            sink,
            released: false,
        }
    }

    pub fn state(&self) -> LightState {
        self.policy.state()
    }

    /// Run one sample/observe cycle.
    ///
    /// Returns the state transition, if this cycle caused one. A timed-out
    /// edge wait means no new sample and never causes a transition.
    pub fn read_once(&mut self) -> Result<Option<LightState>, GpioError> {
        let Some(timing) = self.sampler.sample()? else {
            trace!("edge wait timed out, no sample this cycle");
            return Ok(None);
        };

        let transition = self.policy.observe(timing, Instant::now());
        debug!("{} ms, state {}", timing, self.policy.state());

        // The raw log taps every sample, transition or not. It is a
        // diagnostic aid, so a failed append does not stop sensing.
        if let Some(sink) = &mut self.sink {
            if let Err(e) = sink.append(timing, self.policy.state()) {
                warn!("failed to append raw sample record: {}", e);
            }
        }

        Ok(transition)
    }

    /// Release the sensing line reservation. Calling this twice is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sampler.release();
        }
    }
}

impl<L: GpioLine> Drop for LdrSensor<L> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::mock::MockLine;
    use crate::gpio::WaitResult;
    use crate::light::RunningAverage;

    fn sensor(line: MockLine) -> LdrSensor<MockLine> {
        let policy = DebouncePolicy::RunningAverage(RunningAverage::new(4, 200, 100));
        LdrSensor::new(line, Some(Duration::from_millis(5)), policy, None)
    }

    #[test]
    fn test_first_sample_establishes_state() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Edge));
        let mut sensor = sensor(line);

        assert_eq!(sensor.state(), LightState::Unknown);
        // The mock edge fires immediately, so the timing is far below the
        // bright/dark midpoint.
        assert_eq!(sensor.read_once().unwrap(), Some(LightState::Bright));
        assert_eq!(sensor.state(), LightState::Bright);
    }

    #[test]
    fn test_timeout_produces_no_transition() {
        let mut line = MockLine::default();
        line.waits.push_back(Ok(WaitResult::Timeout));
        let mut sensor = sensor(line);

        assert_eq!(sensor.read_once().unwrap(), None);
        assert_eq!(sensor.state(), LightState::Unknown);
    }

    #[test]
    fn test_line_error_propagates() {
        let mut line = MockLine::default();
        line.fail_set_direction = true;
        let mut sensor = sensor(line);

        assert!(sensor.read_once().is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let line = MockLine::default();
        let mut sensor = sensor(line);
        sensor.release();
        sensor.release();
        assert_eq!(sensor.sampler.line().releases, 1);
    }
}
