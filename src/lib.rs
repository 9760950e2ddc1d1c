//! Ambient light sensing with a photoresistor on a single GPIO line.
//!
//! There is no ADC involved: the photoresistor charges a capacitor, and
//! the time until the line reads high again after a discharge is the
//! light reading. A debounce policy turns those readings into a stable
//! bright/dark state, which drives output lines and external commands.

pub mod config;
pub mod gpio;
pub mod light;
pub mod sampler;
pub mod sensor;
pub mod sink;
pub mod trigger;
pub mod words;

pub use config::{Config, OutputSpec, Policy, PolicyConfig, RawConfig};
pub use gpio::{Direction, Edge, GpioError, GpioLine, SysfsLine, WaitResult};
pub use light::{DebouncePolicy, DurationHysteresis, LightState, RunningAverage};
pub use sampler::ChargeTimeSampler;
pub use sensor::LdrSensor;
pub use sink::RawSampleSink;
pub use trigger::{OutputGpio, TransitionHandler, TriggerAction};
