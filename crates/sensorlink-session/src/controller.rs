use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::batch::{FrameBatch, FrameBatcher};
use crate::config::DeviceConfig;
use crate::driver::{DriverLauncher, DriverProcess, StopToken};
use crate::endpoint::ChannelEndpoint;
use crate::error::{Result, SessionError};

/// Lifecycle state of a [`SessionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Owns one device session: the channel, the driver process and the batcher.
///
/// The channel is bound in [`SessionController::new`] and released when the
/// controller is dropped, whatever state it is in. In between, any number of
/// `start`/`stop` cycles run on the same channel.
///
/// ```no_run
/// use std::time::Duration;
/// use sensorlink_session::{DeviceConfig, SessionController};
///
/// let config = DeviceConfig::balert_x24("C:/drivers/BAlertX24.exe");
/// let mut session = SessionController::new(config)?;
/// session.start()?;
/// for _ in 0..1000 {
///     let batch = session.poll()?;
///     println!("{} samples, {:?}", batch.sample_count(), batch.messages);
///     if !session.is_streaming() {
///         break;
///     }
///     std::thread::sleep(Duration::from_millis(4));
/// }
/// session.stop();
/// # Ok::<(), sensorlink_session::SessionError>(())
/// ```
#[derive(Debug)]
pub struct SessionController {
    config: DeviceConfig,
    launcher: DriverLauncher,
    endpoint: ChannelEndpoint,
    batcher: FrameBatcher,
    state: SessionState,
    available: bool,
    driver: Option<DriverProcess>,
    /// Drivers asked to stop that had not exited yet.
    stopping: Vec<DriverProcess>,
}

impl SessionController {
    /// Validate `config`, check the host platform and bind the channel.
    ///
    /// The platform check runs first, so an unsupported host never binds a
    /// port.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let launcher = DriverLauncher::new(config.driver.clone())?;
        let endpoint = ChannelEndpoint::open()?;
        info!(
            device = %config.device_name,
            address = %endpoint.address(),
            channels = config.channel_count(),
            "session channel bound"
        );

        Ok(Self {
            batcher: FrameBatcher::new(config.channel_count()),
            config,
            launcher,
            endpoint,
            state: SessionState::Idle,
            available: false,
            driver: None,
            stopping: Vec::new(),
        })
    }

    /// Launch the driver and begin streaming.
    ///
    /// Only valid while idle. On launch failure the controller stays idle.
    pub fn start(&mut self) -> Result<()> {
        self.require(SessionState::Idle, "start")?;
        self.reap_stopped();

        self.state = SessionState::Starting;
        self.available = false;

        let residue = self.endpoint.flush();
        if residue > 0 {
            debug!(residue, "discarded channel residue before start");
        }

        match self.launcher.spawn(self.endpoint.port(), StopToken::new()) {
            Ok(driver) => {
                info!(
                    device = %self.config.device_name,
                    pid = driver.pid(),
                    "session streaming"
                );
                self.driver = Some(driver);
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    /// Drain everything the driver has pushed since the last poll.
    ///
    /// Never blocks. If the batch carries an event message the session is
    /// stopped before the batch is returned.
    pub fn poll(&mut self) -> Result<FrameBatch> {
        self.require(SessionState::Streaming, "poll")?;

        let (batch, terminal) = self.batcher.drain(&mut self.endpoint);
        if !batch.is_empty() && !self.available {
            info!(device = %self.config.device_name, "first data received");
            self.available = true;
        }
        if terminal {
            info!(messages = ?batch.messages, "driver reported an event, stopping session");
            self.stop();
        }
        Ok(batch)
    }

    /// Ask the driver to stop and discard anything still queued.
    ///
    /// Does not wait for the driver to exit and never kills it. No-op while
    /// idle.
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }

        if let Some(mut driver) = self.driver.take() {
            driver.request_stop();
            if !driver.try_reap() {
                self.stopping.push(driver);
            }
        }
        self.available = false;

        let discarded = self.endpoint.flush();
        self.state = SessionState::Idle;
        info!(
            device = %self.config.device_name,
            discarded,
            "session stopped"
        );
    }

    /// Stop the session if needed, then forcefully kill every driver that
    /// has not exited yet.
    pub fn kill_driver(&mut self) -> std::io::Result<()> {
        self.stop();
        let mut first_err = None;
        for mut driver in self.stopping.drain(..) {
            if let Err(err) = driver.kill() {
                warn!(pid = driver.pid(), error = %err, "failed to kill driver");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// True once the current session has delivered at least one sample.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn get_sampling_rate(&self) -> f64 {
        self.config.nominal_sampling_rate
    }

    pub fn channel_names(&self) -> &[String] {
        &self.config.channel_names
    }

    pub fn channel_count(&self) -> usize {
        self.config.channel_count()
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    pub fn device_type(&self) -> &str {
        &self.config.device_type
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Address the driver dials.
    pub fn address(&self) -> SocketAddr {
        self.endpoint.address()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    /// PID of the live driver, if streaming.
    pub fn driver_pid(&self) -> Option<u32> {
        self.driver.as_ref().map(DriverProcess::pid)
    }

    /// Drivers that were asked to stop and have not been seen to exit.
    pub fn stopping_drivers(&mut self) -> usize {
        self.reap_stopped();
        self.stopping.len()
    }

    /// Malformed messages dropped over the controller's lifetime.
    pub fn dropped_messages(&self) -> u64 {
        self.batcher.dropped()
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn reap_stopped(&mut self) {
        self.stopping.retain_mut(|driver| !driver.try_reap());
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
        self.reap_stopped();
        if !self.stopping.is_empty() {
            warn!(
                count = self.stopping.len(),
                "drivers still running at session teardown"
            );
        }
        self.endpoint.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverSpec;

    fn config(executable: &str) -> DeviceConfig {
        DeviceConfig {
            device_name: "bench".to_string(),
            device_type: "test".to_string(),
            nominal_sampling_rate: 500.0,
            channel_names: vec!["a".to_string(), "b".to_string()],
            driver: DriverSpec::new(executable),
        }
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Starting.to_string(), "starting");
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
    }

    #[test]
    fn new_controller_is_idle_and_unavailable() {
        let session = SessionController::new(config("/nonexistent/driver")).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_available());
        assert_eq!(session.get_sampling_rate(), 500.0);
        assert_eq!(session.channel_names(), ["a", "b"]);
        assert_eq!(session.channel_count(), 2);
        assert_eq!(session.device_name(), "bench");
        assert_eq!(session.device_type(), "test");
        assert_ne!(session.port(), 0);
        assert_eq!(session.dropped_messages(), 0);
        assert!(session.driver_pid().is_none());
    }

    #[test]
    fn poll_while_idle_is_invalid_state() {
        let mut session = SessionController::new(config("/nonexistent/driver")).unwrap();
        let err = session.poll().unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "poll",
                state: SessionState::Idle
            }
        ));
        assert_eq!(err.to_string(), "cannot poll while session is idle");
    }

    #[test]
    fn stop_while_idle_is_noop() {
        let mut session = SessionController::new(config("/nonexistent/driver")).unwrap();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn launch_failure_leaves_session_idle() {
        let mut session = SessionController::new(config("/nonexistent/driver")).unwrap();
        let err = session.start().unwrap_err();
        assert!(matches!(err, SessionError::Launch { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.driver_pid().is_none());

        // The caller may retry.
        assert!(matches!(session.start(), Err(SessionError::Launch { .. })));
    }

    #[test]
    fn invalid_config_is_rejected_before_binding() {
        let mut bad = config("/nonexistent/driver");
        bad.channel_names.clear();
        assert!(matches!(
            SessionController::new(bad),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn unsupported_platform_is_rejected() {
        let mut foreign = config("/nonexistent/driver");
        foreign.driver.required_os = Some("definitely-not-this-os".to_string());
        assert!(matches!(
            SessionController::new(foreign),
            Err(SessionError::UnsupportedPlatform { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn start_stop_cycles_on_one_channel() {
        // `sleep <port>` outlives the test and exits on SIGTERM.
        let mut session = SessionController::new(config("sleep")).unwrap();
        let port = session.port();

        for _ in 0..3 {
            session.start().unwrap();
            assert_eq!(session.state(), SessionState::Streaming);
            assert!(session.driver_pid().is_some());
            assert!(!session.is_available());

            let err = session.start().unwrap_err();
            assert!(matches!(
                err,
                SessionError::InvalidState {
                    operation: "start",
                    state: SessionState::Streaming
                }
            ));

            let batch = session.poll().unwrap();
            assert!(batch.is_empty());
            assert_eq!(batch.data.shape(), &[2, 0]);

            session.stop();
            assert_eq!(session.state(), SessionState::Idle);
            assert!(session.driver_pid().is_none());
            assert_eq!(session.port(), port);
        }
    }

    #[cfg(unix)]
    #[test]
    fn kill_driver_clears_stopping_list() {
        let mut session = SessionController::new(config("sleep")).unwrap();
        session.start().unwrap();
        session.kill_driver().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.stopping_drivers(), 0);
    }
}
