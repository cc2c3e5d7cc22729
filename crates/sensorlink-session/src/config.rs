//! Device configuration supplied by the integrating application.
//!
//! ```json
//! {
//!   "device_name": "BAlertX24",
//!   "device_type": "eeg",
//!   "nominal_sampling_rate": 256.0,
//!   "channel_names": ["Fp1", "F7"],
//!   "driver": {
//!     "executable": "C:/drivers/BAlertX24.exe",
//!     "license_path": "C:/drivers/license.lic",
//!     "required_os": "windows"
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

const BALERT_X24_CHANNELS: [&str; 24] = [
    "Fp1", "F7", "F8", "T4", "T6", "T5", "T3", "Fp2", "O1", "P3", "Pz", "F3", "Fz", "F4", "C4",
    "P4", "POz", "C3", "Cz", "O2", "EKG", "AUX1", "AUX2", "AUX3",
];

/// Static description of one acquisition device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_name: String,
    #[serde(default)]
    pub device_type: String,
    pub nominal_sampling_rate: f64,
    pub channel_names: Vec<String>,
    pub driver: DriverSpec,
}

/// How to launch the device driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub executable: PathBuf,
    /// Passed as `--license <path>` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// Host OS the driver runs on, compared with `std::env::consts::OS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_os: Option<String>,
}

impl DriverSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            license_path: None,
            extra_args: Vec::new(),
            required_os: None,
        }
    }
}

impl DeviceConfig {
    /// Load and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SessionError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(SessionError::Config("device_name is empty".to_string()));
        }
        if !self.nominal_sampling_rate.is_finite() || self.nominal_sampling_rate <= 0.0 {
            return Err(SessionError::Config(format!(
                "nominal_sampling_rate must be a positive number, got {}",
                self.nominal_sampling_rate
            )));
        }
        if self.channel_names.is_empty() {
            return Err(SessionError::Config("channel_names is empty".to_string()));
        }
        if self.driver.executable.as_os_str().is_empty() {
            return Err(SessionError::Config("driver executable is empty".to_string()));
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    /// Channel layout of the ABM B-Alert X24 EEG headset: 24 channels at
    /// 256 Hz, Windows only.
    ///
    /// `executable` must be a driver that pushes sensorlink frames
    /// (`"SL"` magic, little-endian length, JSON payload) to the port it is
    /// given, such as a bridge built on the vendor SDK. The stock vendor
    /// executable speaks ZeroMQ and is rejected by the channel.
    pub fn balert_x24(executable: impl Into<PathBuf>) -> Self {
        let mut driver = DriverSpec::new(executable);
        driver.required_os = Some("windows".to_string());
        Self {
            device_name: "BAlertX24".to_string(),
            device_type: "eeg".to_string(),
            nominal_sampling_rate: 256.0,
            channel_names: BALERT_X24_CHANNELS.iter().map(|s| s.to_string()).collect(),
            driver,
        }
    }

    pub fn with_license(mut self, license_path: impl Into<PathBuf>) -> Self {
        self.driver.license_path = Some(license_path.into());
        self
    }
}
