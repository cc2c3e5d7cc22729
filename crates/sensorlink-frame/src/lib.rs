//! Length-prefixed message framing for driver streams.
//!
//! Every message pushed by a driver is framed with:
//! - A 2-byte magic number ("SL") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! Readers support both blocking reads and non-blocking polls, so a consumer
//! can sweep whatever has arrived without ever waiting on the driver.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
