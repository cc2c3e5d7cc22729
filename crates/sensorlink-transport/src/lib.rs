//! Local transport between a sensor driver process and its consumer.
//!
//! The consumer binds a pull-only listener on an ephemeral local TCP port and
//! hands the port to the driver, which dials in and pushes framed messages.
//! Everything on the consumer side is non-blocking so it can be drained from
//! a caller-paced polling loop.
//!
//! This is the lowest layer of sensorlink. Everything else builds on top of
//! the [`IpcStream`] and [`TcpPullListener`] types provided here.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::TcpPullListener;
pub use traits::IpcStream;
