use std::path::PathBuf;

use crate::controller::SessionState;

/// Errors surfaced to the owner of a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The driver cannot run on this host. Raised before any resource exists.
    #[error("platform not supported: driver requires {required}, host is {host}")]
    UnsupportedPlatform { required: String, host: String },

    /// The driver process could not be created.
    #[error("failed to launch driver {executable}: {source}")]
    Launch {
        executable: PathBuf,
        source: std::io::Error,
    },

    /// The operation is not valid in the controller's current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The device configuration is unusable.
    #[error("invalid device config: {0}")]
    Config(String),

    /// The device configuration file could not be read.
    #[error("failed to read device config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The device configuration is not valid JSON for the expected shape.
    #[error("failed to parse device config: {0}")]
    ConfigJson(#[from] serde_json::Error),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sensorlink_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// A single inbound message that could not be decoded.
///
/// Never fatal: the batcher drops it and keeps draining.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMessage {
    /// The byte stream did not contain a valid frame.
    #[error("malformed frame: {0}")]
    Frame(#[from] sensorlink_frame::FrameError),

    /// The frame payload is not a valid tagged message.
    #[error("malformed message body: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field is not a rectangular array of numbers.
    #[error("malformed array: {0}")]
    Shape(String),
}
