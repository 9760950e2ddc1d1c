use std::{
    io,
    path::PathBuf,
    process,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};

use anyhow::Context;
use clap::{ArgAction, Parser};
use log::{info, LevelFilter};

use ldr_reader::config::{self, Commands, Config, Policy, RawConfig, Sensor};
use ldr_reader::gpio::SysfsLine;
use ldr_reader::sensor::LdrSensor;
use ldr_reader::sink::RawSampleSink;
use ldr_reader::trigger::{TransitionHandler, TriggerAction};

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// LDR sensing GPIO pin (BCM numbering)
    #[arg(short = 'g', long, required_unless_present = "config")]
    gpio: Option<u32>,

    /// Output GPIO pin, driven high when bright; add 'i' to invert
    /// (e.g. 18 or 18i). Can be given multiple times
    #[arg(short = 'G', long = "output", value_name = "PIN[i]")]
    outputs: Vec<String>,

    /// Debounce policy
    #[arg(short = 'p', long, value_enum, default_value_t = Policy::DurationHysteresis)]
    policy: Policy,

    /// High threshold in milliseconds (dark when above)
    #[arg(short = 'H', long, default_value_t = config::DEFAULT_HIGH_THRESHOLD_MS)]
    high_threshold: u32,

    /// Low threshold in milliseconds (bright when below)
    #[arg(short = 'L', long, default_value_t = config::DEFAULT_LOW_THRESHOLD_MS)]
    low_threshold: u32,

    /// High threshold debounce duration in seconds
    #[arg(short = 'D', long, default_value_t = config::DEFAULT_HIGH_DURATION_SECS)]
    high_duration: u64,

    /// Low threshold debounce duration in seconds
    #[arg(short = 'd', long, default_value_t = config::DEFAULT_LOW_DURATION_SECS)]
    low_duration: u64,

    /// Complete darkness threshold in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_DARKNESS_THRESHOLD_MS)]
    darkness_threshold: u32,

    /// Complete darkness debounce duration in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_DARKNESS_DURATION_MS)]
    darkness_duration: u64,

    /// Sample window size of the running-average policy
    #[arg(short = 'w', long, default_value_t = config::DEFAULT_WINDOW)]
    window: usize,

    /// Edge-wait timeout in milliseconds; 0 waits forever
    #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_MS)]
    timeout: u64,

    /// Command to run when bright
    #[arg(short = 'x', long, value_name = "CMD")]
    cmd_bright: Option<String>,

    /// Command to run when dark
    #[arg(short = 'X', long, value_name = "CMD")]
    cmd_dark: Option<String>,

    /// Append raw 3-byte sample records to this file
    #[arg(long, value_name = "PATH")]
    raw_log: Option<PathBuf>,

    /// Read the configuration from a TOML file instead of the flags above
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run in the background
    #[arg(short = 'b', long)]
    background: bool,

    /// Increase verbosity (can be given multiple times)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn to_raw_config(&self) -> anyhow::Result<RawConfig> {
        Ok(RawConfig {
            sensor: Sensor {
                gpio: self.gpio.context("LDR GPIO pin not specified")?,
                policy: self.policy,
                timeout_ms: self.timeout,
                window: self.window,
                high_threshold_ms: self.high_threshold,
                low_threshold_ms: self.low_threshold,
                darkness_threshold_ms: self.darkness_threshold,
                high_duration_ms: self.high_duration * 1000,
                low_duration_ms: self.low_duration * 1000,
                darkness_duration_ms: self.darkness_duration,
                raw_log: self.raw_log.clone(),
            },
            outputs: self.outputs.clone(),
            commands: Commands {
                bright: self.cmd_bright.clone(),
                dark: self.cmd_dark.clone(),
            },
        })
    }
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    // Assemble and validate the configuration. Nothing below touches the
    // hardware until this succeeded.
    let raw_config = match &args.config {
        Some(path) => match RawConfig::load(path) {
            Ok(val) => val,
            Err(e) => {
                eprintln!("Error: Failed to load config: {:#}", e);
                eprintln!();
                eprintln!(
                    "Example config:\n\n{}",
                    toml::to_string(&RawConfig::example())?
                );
                process::exit(1);
            }
        },
        None => args.to_raw_config()?,
    };
    let config: Config = raw_config.try_into().context("Invalid configuration")?;

    if args.background {
        daemonize().context("Failed to daemonize")?;
    }

    // SIGINT and SIGTERM request a cooperative shutdown: the flag is
    // checked once per loop iteration and the running cycle completes.
    let term = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&term))
            .context("Failed to register signal handler")?;
    }

    run(&config, &term)
}

fn run(config: &Config, term: &AtomicBool) -> anyhow::Result<()> {
    let line = SysfsLine::open(config.sensor_gpio).context("Failed to set up the sensing line")?;
    let sink = match &config.raw_log {
        Some(path) => Some(
            RawSampleSink::open(path)
                .context(format!("Failed to open raw sample log at {:?}", path))?,
        ),
        None => None,
    };
    let mut sensor = LdrSensor::new(line, config.timeout, config.policy.build(), sink);
    let mut action =
        TriggerAction::from_config(config).context("Failed to set up the output lines")?;

    info!("watching gpio {}", config.sensor_gpio);

    // Main loop. Line reservations are released by drop on every exit
    // path, including a sampling failure.
    while !term.load(Ordering::Relaxed) {
        if let Some(new_state) = sensor.read_once().context("Sampling failed")? {
            action.on_transition(new_state);
        }
    }

    info!("terminated by signal");
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

/// Put the process in the background, the classic way.
fn daemonize() -> anyhow::Result<()> {
    // SAFETY: no threads exist this early; fork and setsid have no other
    // preconditions here.
    unsafe {
        match libc::fork() {
            -1 => anyhow::bail!("fork failed: {}", io::Error::last_os_error()),
            // Child carries on
            0 => {}
            // Parent is done
            _ => process::exit(0),
        }
        if libc::setsid() == -1 {
            anyhow::bail!("setsid failed: {}", io::Error::last_os_error());
        }
    }
    Ok(())
}
