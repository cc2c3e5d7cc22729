//! The platform guard runs before the session binds its channel.

use std::io;
use std::sync::{Arc, Mutex};

use sensorlink_session::{DeviceConfig, DriverSpec, SessionController, SessionError};

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with every event on this thread recorded as plain text.
fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.text())
}

fn device(required_os: Option<&str>) -> DeviceConfig {
    let mut driver = DriverSpec::new("sensorlink-driver");
    driver.required_os = required_os.map(str::to_string);
    DeviceConfig {
        device_name: "bench".to_string(),
        device_type: "eeg".to_string(),
        nominal_sampling_rate: 256.0,
        channel_names: vec!["c0".to_string()],
        driver,
    }
}

#[test]
fn supported_host_binds_channel() {
    let (session, logs) = with_captured_logs(|| SessionController::new(device(None)));
    let session = session.unwrap();
    assert!(
        logs.contains("listening for driver connections"),
        "logs: {logs}"
    );
    assert!(logs.contains(&session.port().to_string()), "logs: {logs}");
}

#[test]
fn unsupported_host_fails_before_binding() {
    let (result, logs) = with_captured_logs(|| {
        SessionController::new(device(Some("definitely-not-this-os")))
    });
    assert!(matches!(
        result,
        Err(SessionError::UnsupportedPlatform { .. })
    ));
    assert!(
        !logs.contains("listening for driver connections"),
        "channel was bound: {logs}"
    );
}

#[test]
fn matching_required_os_is_accepted() {
    let (result, _) =
        with_captured_logs(|| SessionController::new(device(Some(std::env::consts::OS))));
    assert!(result.is_ok());
}
