//! Streaming session manager for external sensor drivers.
//!
//! A [`SessionController`] owns one pull channel for its whole lifetime and
//! runs any number of start/stop cycles on it. Each cycle launches the
//! driver executable with the channel port, and the caller pulls
//! [`FrameBatch`]es on its own schedule with [`SessionController::poll`].
//!
//! Nothing here spawns a background thread: every poll is a single
//! non-blocking sweep of whatever the driver has pushed so far.

pub mod batch;
pub mod config;
pub mod controller;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod shape;

pub use batch::{FrameBatch, FrameBatcher};
pub use config::{DeviceConfig, DriverSpec};
pub use controller::{SessionController, SessionState};
pub use driver::{DriverLauncher, DriverProcess, StopToken};
pub use endpoint::{ChannelEndpoint, MessageSource};
pub use error::{MalformedMessage, Result, SessionError};
pub use message::{DataMessage, EventMessage, InboundMessage};
