//! Launching and stopping the external driver process.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DriverSpec;
use crate::error::{Result, SessionError};

/// Set-once cancellation token for one driver run.
///
/// A fresh token is allocated for every start and never reused. The session
/// controller is the only writer; the driver observes cancellation through
/// the signals [`DriverProcess::request_stop`] raises.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    cancelled: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token. Returns true only for the call that cancelled it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Fail unless the host OS satisfies the driver's requirement.
pub fn check_platform(required: Option<&str>, host: &str) -> Result<()> {
    match required {
        Some(required) if !required.eq_ignore_ascii_case(host) => {
            Err(SessionError::UnsupportedPlatform {
                required: required.to_string(),
                host: host.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Builds driver command lines and spawns driver processes.
#[derive(Debug, Clone)]
pub struct DriverLauncher {
    spec: DriverSpec,
}

impl DriverLauncher {
    /// Create a launcher, checking the platform requirement eagerly.
    pub fn new(spec: DriverSpec) -> Result<Self> {
        check_platform(spec.required_os.as_deref(), std::env::consts::OS)?;
        Ok(Self { spec })
    }

    pub fn executable(&self) -> &Path {
        &self.spec.executable
    }

    /// Arguments after the executable: `port [--license path] [extra...]`.
    pub fn args(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from(port.to_string())];
        if let Some(license) = &self.spec.license_path {
            args.push(OsString::from("--license"));
            args.push(license.as_os_str().to_os_string());
        }
        args.extend(self.spec.extra_args.iter().map(OsString::from));
        args
    }

    /// Full command line, executable first.
    pub fn command_line(&self, port: u16) -> Vec<OsString> {
        let mut line = vec![self.spec.executable.as_os_str().to_os_string()];
        line.extend(self.args(port));
        line
    }

    /// Launch the driver, telling it which port to push to.
    ///
    /// May block briefly while the OS creates the process.
    pub fn spawn(&self, port: u16, token: StopToken) -> Result<DriverProcess> {
        let mut child = Command::new(&self.spec.executable)
            .args(self.args(port))
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Launch {
                executable: self.spec.executable.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        info!(
            pid = child.id(),
            port,
            executable = %self.spec.executable.display(),
            "driver launched"
        );

        Ok(DriverProcess {
            child,
            stdin,
            token,
            status: None,
        })
    }
}

/// A launched driver process.
///
/// Stopping is cooperative: the driver sees its stdin close and, on Unix,
/// receives `SIGTERM`. Nothing here waits for it to exit.
#[derive(Debug)]
pub struct DriverProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    token: StopToken,
    status: Option<ExitStatus>,
}

impl DriverProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn token(&self) -> &StopToken {
        &self.token
    }

    /// True until a stop has been requested.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Exit status, once [`DriverProcess::try_reap`] has observed the exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Ask the driver to terminate without waiting for it.
    ///
    /// No-op if a stop was already requested.
    pub fn request_stop(&mut self) {
        if !self.token.cancel() {
            return;
        }
        drop(self.stdin.take());

        #[cfg(unix)]
        if !self.try_reap() {
            self.send_sigterm();
        }

        info!(pid = self.pid(), "driver stop requested");
    }

    /// Collect the exit status if the driver has exited. Never blocks.
    pub fn try_reap(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid(), %status, "driver exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(pid = self.pid(), error = %err, "failed to poll driver status");
                false
            }
        }
    }

    /// Forcefully terminate the driver and wait for it to exit.
    pub fn kill(&mut self) -> std::io::Result<()> {
        self.token.cancel();
        drop(self.stdin.take());
        if self.try_reap() {
            return Ok(());
        }
        self.child.kill()?;
        let status = self.child.wait()?;
        warn!(pid = self.pid(), %status, "driver killed");
        self.status = Some(status);
        Ok(())
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        let Ok(pid) = libc::pid_t::try_from(self.pid()) else {
            return;
        };
        // SAFETY: `kill` has no memory-safety preconditions. The child has
        // not been reaped, so `pid` still names our own child process.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            debug!(pid, error = %err, "SIGTERM not delivered");
        }
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.request_stop();
        if !self.try_reap() {
            debug!(pid = self.pid(), "driver still running after handle dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn spec(executable: &str) -> DriverSpec {
        DriverSpec {
            executable: PathBuf::from(executable),
            license_path: None,
            extra_args: Vec::new(),
            required_os: None,
        }
    }

    #[test]
    fn token_cancels_once() {
        let token = StopToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(observer.is_cancelled());
    }

    #[test]
    fn fresh_tokens_are_independent() {
        let first = StopToken::new();
        first.cancel();
        assert!(!StopToken::new().is_cancelled());
    }

    #[test]
    fn platform_check_matches_case_insensitively() {
        assert!(check_platform(None, "linux").is_ok());
        assert!(check_platform(Some("Windows"), "windows").is_ok());
        let err = check_platform(Some("windows"), "linux").unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedPlatform { ref required, ref host }
                if required == "windows" && host == "linux"
        ));
    }

    #[test]
    fn launcher_rejects_foreign_platform() {
        let mut spec = spec("driver.exe");
        spec.required_os = Some("plan9".to_string());
        assert!(matches!(
            DriverLauncher::new(spec),
            Err(SessionError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn command_line_without_license() {
        let launcher = DriverLauncher::new(spec("/opt/driver")).unwrap();
        assert_eq!(
            launcher.command_line(5555),
            vec![OsString::from("/opt/driver"), OsString::from("5555")]
        );
    }

    #[test]
    fn command_line_with_license_and_extra_args() {
        let mut spec = spec("/opt/driver");
        spec.license_path = Some(PathBuf::from("/etc/driver.lic"));
        spec.extra_args = vec!["--verbose".to_string()];
        let launcher = DriverLauncher::new(spec).unwrap();
        assert_eq!(
            launcher.command_line(41000),
            ["/opt/driver", "41000", "--license", "/etc/driver.lic", "--verbose"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn spawn_missing_executable_is_launch_error() {
        let launcher = DriverLauncher::new(spec("/nonexistent/sensorlink-driver")).unwrap();
        let err = launcher.spawn(1234, StopToken::new()).unwrap_err();
        assert!(matches!(err, SessionError::Launch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn request_stop_terminates_cooperative_child() {
        // `sleep <port>` stands in for a driver that runs until signalled.
        let launcher = DriverLauncher::new(spec("sleep")).unwrap();
        let mut process = launcher.spawn(30_000, StopToken::new()).unwrap();
        assert!(process.is_live());

        process.request_stop();
        assert!(!process.is_live());
        assert!(process.token().is_cancelled());
        process.request_stop();

        let start = std::time::Instant::now();
        while !process.try_reap() {
            assert!(start.elapsed() < std::time::Duration::from_secs(5));
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(process.exit_status().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn kill_reaps_child() {
        let launcher = DriverLauncher::new(spec("sleep")).unwrap();
        let mut process = launcher.spawn(30_000, StopToken::new()).unwrap();
        process.kill().unwrap();
        assert!(process.exit_status().is_some());
        assert!(!process.is_live());
    }
}
