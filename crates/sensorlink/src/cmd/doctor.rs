use std::path::PathBuf;
use std::time::{Duration, Instant};

use sensorlink_frame::FrameWriter;
use sensorlink_session::driver::check_platform;
use sensorlink_session::{ChannelEndpoint, DeviceConfig, InboundMessage, MessageSource};
use sensorlink_transport::IpcStream;
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    kind: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        host_check(),
        channel_bind_check(),
        loopback_delivery_check(),
        preset_platform_check(),
        driver_path_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        kind: "doctor",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("sensorlink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn host_check() -> CheckResult {
    CheckResult::new(
        "host",
        CheckStatus::Info,
        format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
    )
}

fn channel_bind_check() -> CheckResult {
    match ChannelEndpoint::open() {
        Ok(endpoint) => CheckResult::new(
            "channel_bind",
            CheckStatus::Pass,
            format!("ephemeral port {} bound", endpoint.port()),
        ),
        Err(err) => CheckResult::new("channel_bind", CheckStatus::Fail, err.to_string()),
    }
}

/// Push one event through a fresh channel and read it back.
fn loopback_delivery_check() -> CheckResult {
    const NAME: &str = "loopback_delivery";

    let mut endpoint = match ChannelEndpoint::open() {
        Ok(endpoint) => endpoint,
        Err(err) => return CheckResult::new(NAME, CheckStatus::Skip, format!("no channel: {err}")),
    };
    let sent = InboundMessage::event("doctor");
    let pushed = IpcStream::connect(endpoint.address())
        .map_err(|err| err.to_string())
        .and_then(|stream| {
            let payload = sent.to_vec().map_err(|err| err.to_string())?;
            FrameWriter::new(stream)
                .send(&payload)
                .map_err(|err| err.to_string())
        });
    if let Err(err) = pushed {
        return CheckResult::new(NAME, CheckStatus::Fail, err);
    }

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        match endpoint.try_receive() {
            Ok(Some(received)) if received == sent => {
                return CheckResult::new(
                    NAME,
                    CheckStatus::Pass,
                    format!("delivered in {:?}", start.elapsed()),
                )
            }
            Ok(Some(other)) => {
                return CheckResult::new(NAME, CheckStatus::Fail, format!("unexpected {other:?}"))
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(2)),
            Err(err) => return CheckResult::new(NAME, CheckStatus::Fail, err.to_string()),
        }
    }
    CheckResult::new(NAME, CheckStatus::Fail, "no message within 1s")
}

fn preset_platform_check() -> CheckResult {
    let preset = DeviceConfig::balert_x24("");
    match check_platform(preset.driver.required_os.as_deref(), std::env::consts::OS) {
        Ok(()) => CheckResult::new(
            "preset_platform",
            CheckStatus::Pass,
            format!("{} driver supported on this host", preset.device_name),
        ),
        Err(err) => CheckResult::new(
            "preset_platform",
            CheckStatus::Warn,
            format!("{}: {err}", preset.device_name),
        ),
    }
}

fn driver_path_check() -> CheckResult {
    let path = match std::env::var("SENSORLINK_DRIVER") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            return CheckResult::new(
                "driver_path",
                CheckStatus::Skip,
                "SENSORLINK_DRIVER not set",
            )
        }
    };

    if path.is_file() {
        CheckResult::new(
            "driver_path",
            CheckStatus::Pass,
            format!("{} exists", path.display()),
        )
    } else {
        CheckResult::new(
            "driver_path",
            CheckStatus::Fail,
            format!("{} is not a file", path.display()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            kind: "doctor",
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn loopback_delivery_passes_locally() {
        let check = loopback_delivery_check();
        assert!(
            matches!(check.status, CheckStatus::Pass),
            "detail: {}",
            check.detail
        );
    }

    #[test]
    fn channel_bind_passes_locally() {
        assert!(matches!(channel_bind_check().status, CheckStatus::Pass));
    }
}
