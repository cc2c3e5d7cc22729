use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod emulate;
pub mod stream;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a driver and print the batches it streams.
    Stream(StreamArgs),
    /// Act as an emulated driver pushing synthetic frames to a port.
    Emulate(EmulateArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Stream(args) => stream::run(args, format),
        Command::Emulate(args) => emulate::run(args),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Device config file (JSON). Defaults to the BAlertX24 channel layout,
    /// driven by a sensorlink-framed bridge given with --driver.
    #[arg(long, env = "SENSORLINK_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Driver executable pushing sensorlink frames; overrides the config's.
    #[arg(long, env = "SENSORLINK_DRIVER", value_name = "PATH")]
    pub driver: Option<PathBuf>,
    /// License file passed to the driver as `--license`.
    #[arg(long, env = "SENSORLINK_LICENSE", value_name = "PATH")]
    pub license: Option<PathBuf>,
    /// Drop the driver's host OS requirement.
    #[arg(long)]
    pub any_os: bool,
    /// Delay between polls (e.g. 4ms, 1s).
    #[arg(long, default_value = "4ms")]
    pub interval: String,
    /// Stop after N polls.
    #[arg(long)]
    pub iterations: Option<u64>,
    /// Print batches with no samples and no messages too.
    #[arg(long)]
    pub show_empty: bool,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Port of the session channel to push to.
    pub port: u16,
    /// License file, accepted for command-line compatibility and ignored.
    #[arg(long, value_name = "PATH")]
    pub license: Option<PathBuf>,
    /// Number of channels per sample.
    #[arg(long, default_value = "24")]
    pub channels: usize,
    /// Samples per second.
    #[arg(long, default_value = "256")]
    pub rate: f64,
    /// Leads per channel; 0 sends flat (channel) frames.
    #[arg(long, default_value = "0")]
    pub leads: usize,
    /// Samples per message; above 1 sends chunks with per-row timestamps.
    #[arg(long, default_value = "1")]
    pub chunk: usize,
    /// Stop producing after N samples.
    #[arg(long)]
    pub count: Option<u64>,
    /// Event message to send after the last sample, then exit.
    #[arg(long, value_name = "TEXT")]
    pub fault: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "ms")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Clear `running` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
