//! Actuator outputs and transition commands.

use std::process::Command;

use log::{debug, error, info};

use crate::config::{Config, OutputSpec};
use crate::gpio::{Direction, GpioError, GpioLine, SysfsLine};
use crate::light::LightState;

/// Receiver of state-transition events.
pub trait TransitionHandler {
    fn on_transition(&mut self, new_state: LightState);
}

/// One configured actuator line.
pub struct OutputGpio<L: GpioLine> {
    pub gpio: u32,
    line: L,
}

impl<L: GpioLine> OutputGpio<L> {
    pub fn new(gpio: u32, line: L) -> Self {
        Self { gpio, line }
    }
}

impl OutputGpio<SysfsLine> {
    /// Reserve the pin and configure it as an output.
    fn open(spec: &OutputSpec) -> Result<Self, GpioError> {
        let mut line = SysfsLine::open(spec.gpio)?;
        line.set_direction(Direction::Out)?;
        if spec.active_low {
            line.set_active_low(true)?;
        }
        Ok(Self {
            gpio: spec.gpio,
            line,
        })
    }
}

/// Everything that happens on a state transition: the output lines to
/// write and the commands to launch.
pub struct TriggerAction<L: GpioLine> {
    outputs: Vec<OutputGpio<L>>,
    command_bright: Option<Vec<String>>,
    command_dark: Option<Vec<String>>,
    released: bool,
}

impl TriggerAction<SysfsLine> {
    pub fn from_config(config: &Config) -> Result<Self, GpioError> {
        let mut outputs = Vec::with_capacity(config.outputs.len());
        for spec in &config.outputs {
            outputs.push(OutputGpio::open(spec)?);
        }
        Ok(Self::new(
            outputs,
            config.command_bright.clone(),
            config.command_dark.clone(),
        ))
    }
}

impl<L: GpioLine> TriggerAction<L> {
    pub fn new(
        outputs: Vec<OutputGpio<L>>,
        command_bright: Option<Vec<String>>,
        command_dark: Option<Vec<String>>,
    ) -> Self {
        Self {
            outputs,
            command_bright,
            command_dark,
            released: false,
        }
    }

    /// Release all output line reservations. Calling this twice is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            for output in &mut self.outputs {
                output.line.release();
            }
        }
    }
}

impl<L: GpioLine> Drop for TriggerAction<L> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<L: GpioLine> TransitionHandler for TriggerAction<L> {
    fn on_transition(&mut self, new_state: LightState) {
        info!("light state: {new_state}");

        // Dark drives the outputs to logical low, bright to logical high.
        // Active-low polarity is inverted by the line driver, not here.
        let level = new_state == LightState::Bright;
        for output in &mut self.outputs {
            if let Err(e) = output.line.write(level) {
                error!("failed to write output gpio {}: {}", output.gpio, e);
            }
        }

        let command = match new_state {
            LightState::Bright => self.command_bright.as_deref(),
            LightState::Dark => self.command_dark.as_deref(),
            LightState::Unknown => None,
        };
        if let Some(argv) = command {
            spawn_detached(argv);
        }
    }
}

/// Launch a command without waiting for it to finish.
///
/// `argv` is non-empty (configuration rejects empty commands). The child
/// is never reaped; failure to launch is logged and nothing else.
fn spawn_detached(argv: &[String]) {
    match Command::new(&argv[0]).args(&argv[1..]).spawn() {
        Ok(child) => debug!("launched {} (pid {})", argv[0], child.id()),
        Err(e) => error!("failed to launch {}: {}", argv[0], e),
    }
}
