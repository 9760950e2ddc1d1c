//! Configuration handling.
//!
//! Settings come either from command line flags or from a TOML file; both
//! produce the same [`RawConfig`], which is then validated in one place
//! into a [`Config`]. Validation failures are startup errors: no GPIO is
//! touched before the configuration is known to be sound.

use std::{
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::light::{DebouncePolicy, DurationHysteresis, RunningAverage};
use crate::words::{self, WordsError};

/// Pins that may be used for sensing or output (BCM numbering).
pub const USABLE_GPIO_PINS: &[u32] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 32, 40,
];

pub const DEFAULT_HIGH_THRESHOLD_MS: u32 = 400;
pub const DEFAULT_LOW_THRESHOLD_MS: u32 = 150;
pub const DEFAULT_DARKNESS_THRESHOLD_MS: u32 = 2000;
pub const DEFAULT_HIGH_DURATION_SECS: u64 = 300;
pub const DEFAULT_LOW_DURATION_SECS: u64 = 30;
pub const DEFAULT_DARKNESS_DURATION_MS: u64 = 500;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_WINDOW: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    RunningAverage,
    DurationHysteresis,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Policy::RunningAverage => "running-average",
            Policy::DurationHysteresis => "duration-hysteresis",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid gpio pin {0}")]
    InvalidPin(u32),
    #[error("invalid output pin spec {0:?} (expected e.g. \"18\" or \"18i\")")]
    InvalidOutputSpec(String),
    #[error("output gpio pin {0} specified twice")]
    DuplicateOutput(u32),
    #[error("sensing gpio pin {0} is also used as output")]
    SensorPinIsOutput(u32),
    #[error("high threshold ({high} ms) must be greater than low threshold ({low} ms)")]
    ThresholdOrder { high: u32, low: u32 },
    #[error("darkness threshold ({darkness} ms) must be greater than high threshold ({high} ms)")]
    DarknessThresholdOrder { darkness: u32, high: u32 },
    #[error("sample window must not be zero")]
    ZeroWindow,
    #[error("bad {which} command: {source}")]
    BadCommand {
        which: &'static str,
        source: WordsError,
    },
    #[error("{which} command is empty")]
    EmptyCommand { which: &'static str },
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct RawConfig {
    pub sensor: Sensor,

    /// Output pins, optionally suffixed with `i` for active-low.
    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub commands: Commands,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct Sensor {
    /// The sensing pin (BCM numbering).
    pub gpio: u32,

    /// Debounce policy.
    #[serde(default = "default_policy")]
    pub policy: Policy,

    /// Edge-wait timeout in milliseconds; 0 waits forever.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sample window of the running-average policy.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Timings above this are considered dark.
    #[serde(default = "default_high_threshold")]
    pub high_threshold_ms: u32,

    /// Timings below this are considered bright.
    #[serde(default = "default_low_threshold")]
    pub low_threshold_ms: u32,

    /// Timings above this qualify for the fast dark transition.
    #[serde(default = "default_darkness_threshold")]
    pub darkness_threshold_ms: u32,

    #[serde(default = "default_high_duration")]
    pub high_duration_ms: u64,

    #[serde(default = "default_low_duration")]
    pub low_duration_ms: u64,

    #[serde(default = "default_darkness_duration")]
    pub darkness_duration_ms: u64,

    /// Append every raw sample record to this file.
    pub raw_log: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Commands {
    /// Command to run on a transition to bright.
    pub bright: Option<String>,

    /// Command to run on a transition to dark.
    pub dark: Option<String>,
}

fn default_policy() -> Policy {
    Policy::DurationHysteresis
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_window() -> usize {
    DEFAULT_WINDOW
}
fn default_high_threshold() -> u32 {
    DEFAULT_HIGH_THRESHOLD_MS
}
fn default_low_threshold() -> u32 {
    DEFAULT_LOW_THRESHOLD_MS
}
fn default_darkness_threshold() -> u32 {
    DEFAULT_DARKNESS_THRESHOLD_MS
}
fn default_high_duration() -> u64 {
    DEFAULT_HIGH_DURATION_SECS * 1000
}
fn default_low_duration() -> u64 {
    DEFAULT_LOW_DURATION_SECS * 1000
}
fn default_darkness_duration() -> u64 {
    DEFAULT_DARKNESS_DURATION_MS
}

impl RawConfig {
    /// Parse the config file at the specified path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file at {:?}", path))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read config file to string")?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn example() -> Self {
        Self {
            sensor: Sensor {
                gpio: 17,
                policy: Policy::DurationHysteresis,
                timeout_ms: 3000,
                window: DEFAULT_WINDOW,
                high_threshold_ms: DEFAULT_HIGH_THRESHOLD_MS,
                low_threshold_ms: DEFAULT_LOW_THRESHOLD_MS,
                darkness_threshold_ms: DEFAULT_DARKNESS_THRESHOLD_MS,
                high_duration_ms: DEFAULT_HIGH_DURATION_SECS * 1000,
                low_duration_ms: DEFAULT_LOW_DURATION_SECS * 1000,
                darkness_duration_ms: DEFAULT_DARKNESS_DURATION_MS,
                raw_log: None,
            },
            outputs: vec!["18".to_string(), "22i".to_string()],
            commands: Commands {
                bright: Some("aplay /usr/share/sounds/morning.wav".to_string()),
                dark: None,
            },
        }
    }
}

/// One actuator line: pin plus polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub gpio: u32,
    pub active_low: bool,
}

/// Fully validated policy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyConfig {
    RunningAverage {
        window: usize,
        high_threshold: u32,
        low_threshold: u32,
    },
    DurationHysteresis {
        high_threshold: u32,
        low_threshold: u32,
        darkness_threshold: u32,
        high_duration: Duration,
        low_duration: Duration,
        darkness_duration: Duration,
    },
}

impl PolicyConfig {
    /// Build a fresh engine for this policy, starting in the unknown state.
    pub fn build(&self) -> DebouncePolicy {
        match *self {
            PolicyConfig::RunningAverage {
                window,
                high_threshold,
                low_threshold,
            } => DebouncePolicy::RunningAverage(RunningAverage::new(
                window,
                high_threshold,
                low_threshold,
            )),
            PolicyConfig::DurationHysteresis {
                high_threshold,
                low_threshold,
                darkness_threshold,
                high_duration,
                low_duration,
                darkness_duration,
            } => DebouncePolicy::DurationHysteresis(DurationHysteresis::new(
                high_threshold,
                low_threshold,
                darkness_threshold,
                high_duration,
                low_duration,
                darkness_duration,
            )),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Config {
    pub sensor_gpio: u32,
    /// `None` waits for the edge indefinitely.
    pub timeout: Option<Duration>,
    pub policy: PolicyConfig,
    pub outputs: Vec<OutputSpec>,
    /// Tokenized transition commands.
    pub command_bright: Option<Vec<String>>,
    pub command_dark: Option<Vec<String>>,
    pub raw_log: Option<PathBuf>,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let sensor = raw.sensor;
        validate_pin(sensor.gpio)?;

        let mut outputs: Vec<OutputSpec> = Vec::with_capacity(raw.outputs.len());
        for spec in &raw.outputs {
            let output = parse_output_spec(spec)?;
            validate_pin(output.gpio)?;
            if outputs.iter().any(|o| o.gpio == output.gpio) {
                return Err(ConfigError::DuplicateOutput(output.gpio));
            }
            outputs.push(output);
        }
        if let Some(output) = outputs.iter().find(|o| o.gpio == sensor.gpio) {
            return Err(ConfigError::SensorPinIsOutput(output.gpio));
        }

        if sensor.high_threshold_ms <= sensor.low_threshold_ms {
            return Err(ConfigError::ThresholdOrder {
                high: sensor.high_threshold_ms,
                low: sensor.low_threshold_ms,
            });
        }

        let policy = match sensor.policy {
            Policy::RunningAverage => {
                if sensor.window == 0 {
                    return Err(ConfigError::ZeroWindow);
                }
                PolicyConfig::RunningAverage {
                    window: sensor.window,
                    high_threshold: sensor.high_threshold_ms,
                    low_threshold: sensor.low_threshold_ms,
                }
            }
            Policy::DurationHysteresis => {
                if sensor.darkness_threshold_ms <= sensor.high_threshold_ms {
                    return Err(ConfigError::DarknessThresholdOrder {
                        darkness: sensor.darkness_threshold_ms,
                        high: sensor.high_threshold_ms,
                    });
                }
                PolicyConfig::DurationHysteresis {
                    high_threshold: sensor.high_threshold_ms,
                    low_threshold: sensor.low_threshold_ms,
                    darkness_threshold: sensor.darkness_threshold_ms,
                    high_duration: Duration::from_millis(sensor.high_duration_ms),
                    low_duration: Duration::from_millis(sensor.low_duration_ms),
                    darkness_duration: Duration::from_millis(sensor.darkness_duration_ms),
                }
            }
        };

        let command_bright = tokenize_command(raw.commands.bright.as_deref(), "bright")?;
        let command_dark = tokenize_command(raw.commands.dark.as_deref(), "dark")?;

        Ok(Config {
            sensor_gpio: sensor.gpio,
            timeout: match sensor.timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            policy,
            outputs,
            command_bright,
            command_dark,
            raw_log: sensor.raw_log,
        })
    }
}

fn validate_pin(pin: u32) -> Result<(), ConfigError> {
    if USABLE_GPIO_PINS.contains(&pin) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPin(pin))
    }
}

/// Parse an output pin spec like `"18"` or `"18i"` (inverted).
pub fn parse_output_spec(spec: &str) -> Result<OutputSpec, ConfigError> {
    lazy_static! {
        static ref OUTPUT_RE: Regex = Regex::new(r"^(?P<pin>[0-9]+)(?P<inverted>i)?$").unwrap();
    }
    let capture = OUTPUT_RE
        .captures(spec)
        .ok_or_else(|| ConfigError::InvalidOutputSpec(spec.to_string()))?;
    let gpio = capture["pin"]
        .parse()
        .map_err(|_| ConfigError::InvalidOutputSpec(spec.to_string()))?;
    Ok(OutputSpec {
        gpio,
        active_low: capture.name("inverted").is_some(),
    })
}

fn tokenize_command(
    command: Option<&str>,
    which: &'static str,
) -> Result<Option<Vec<String>>, ConfigError> {
    let Some(command) = command else {
        return Ok(None);
    };
    let argv = words::split(command).map_err(|source| ConfigError::BadCommand { which, source })?;
    if argv.is_empty() {
        return Err(ConfigError::EmptyCommand { which });
    }
    Ok(Some(argv))
}
