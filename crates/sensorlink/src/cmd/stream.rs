use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sensorlink_session::{DeviceConfig, SessionController};
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, parse_duration, StreamArgs};
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_batch, print_summary, OutputFormat, StopReason, StreamSummary};

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let config = resolve_config(&args)?;

    let mut session =
        SessionController::new(config).map_err(|err| session_error("session setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    session
        .start()
        .map_err(|err| session_error("start failed", err))?;

    let mut summary = StreamSummary {
        kind: "summary",
        device: session.device_name().to_string(),
        polls: 0,
        samples: 0,
        messages: Vec::new(),
        dropped: 0,
        reason: StopReason::Interrupted,
    };

    summary.reason = loop {
        if !running.load(Ordering::SeqCst) {
            break StopReason::Interrupted;
        }
        if args.iterations.is_some_and(|max| summary.polls >= max) {
            break StopReason::Iterations;
        }

        let batch = session
            .poll()
            .map_err(|err| session_error("poll failed", err))?;
        summary.polls += 1;
        summary.samples += batch.sample_count() as u64;

        if args.show_empty || !batch.is_empty() || !batch.messages.is_empty() {
            print_batch(&batch, summary.polls, session.channel_names(), format);
        }
        summary.messages.extend(batch.messages);

        if !session.is_streaming() {
            break StopReason::DriverEvent;
        }
        std::thread::sleep(interval);
    };

    session.stop();
    summary.dropped = session.dropped_messages();
    info!(
        polls = summary.polls,
        samples = summary.samples,
        dropped = summary.dropped,
        "stream finished"
    );
    print_summary(&summary, format);

    Ok(SUCCESS)
}

/// Config file if given, else the BAlertX24 preset; flags override both.
fn resolve_config(args: &StreamArgs) -> CliResult<DeviceConfig> {
    let mut config = match (&args.config, &args.driver) {
        (Some(path), _) => DeviceConfig::from_path(path)
            .map_err(|err| session_error("failed to load device config", err))?,
        (None, Some(driver)) => DeviceConfig::balert_x24(driver),
        (None, None) => {
            return Err(CliError::new(
                USAGE,
                "either --config or --driver is required",
            ))
        }
    };

    if let Some(driver) = &args.driver {
        config.driver.executable = driver.clone();
    }
    if let Some(license) = &args.license {
        config.driver.license_path = Some(license.clone());
    }
    if args.any_os {
        config.driver.required_os = None;
    }

    debug!(
        device = %config.device_name,
        executable = %config.driver.executable.display(),
        "resolved device config"
    );
    Ok(config)
}
