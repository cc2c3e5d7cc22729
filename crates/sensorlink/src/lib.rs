//! Streaming acquisition from external sensor driver processes.
//!
//! A driver executable talks to the hardware and pushes tagged messages over
//! a local TCP channel; a [`session::SessionController`] launches it, drains
//! the channel without blocking and hands back (channel, time) batches.
//!
//! # Crate Structure
//!
//! - [`transport`]: non-blocking local TCP pull channel
//! - [`frame`]: length-prefixed message framing
//! - [`session`]: driver lifecycle, batching and shape normalization

/// Re-export transport types.
pub mod transport {
    pub use sensorlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sensorlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use sensorlink_session::*;
}

pub use sensorlink_session::{
    DeviceConfig, DriverSpec, FrameBatch, SessionController, SessionError, SessionState,
};
