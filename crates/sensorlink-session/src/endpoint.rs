use std::net::SocketAddr;

use sensorlink_frame::{FrameError, FrameReader};
use sensorlink_transport::{IpcStream, TcpPullListener};
use tracing::{debug, info, warn};

use crate::error::MalformedMessage;
use crate::message::InboundMessage;

/// Anything the frame batcher can drain without blocking.
pub trait MessageSource {
    /// Return the next available message, `Ok(None)` when nothing is
    /// currently queued, or the decode failure of one dropped message.
    fn try_receive(&mut self) -> Result<Option<InboundMessage>, MalformedMessage>;
}

/// Pull-only channel the driver process pushes into.
///
/// Bound once on an ephemeral local port for the lifetime of a session
/// controller. The driver dials [`ChannelEndpoint::address`]; more than one
/// connection may be open at a time (for example a stopping driver and its
/// replacement), and they are read in accept order.
pub struct ChannelEndpoint {
    listener: Option<TcpPullListener>,
    peers: Vec<FrameReader<IpcStream>>,
    address: SocketAddr,
}

impl ChannelEndpoint {
    /// Bind a new channel on all local interfaces with an OS-chosen port.
    pub fn open() -> sensorlink_transport::Result<Self> {
        let listener = TcpPullListener::bind_ephemeral()?;
        let address = listener.connect_addr();
        Ok(Self {
            listener: Some(listener),
            peers: Vec::new(),
            address,
        })
    }

    /// Loopback address the driver should dial.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Number of driver connections currently open.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    /// Discard everything currently queued and disconnect every driver.
    ///
    /// Bytes a stopping driver writes after this call never reach a later
    /// session because its connection is already gone. Returns the number of
    /// messages discarded, malformed ones included.
    pub fn flush(&mut self) -> usize {
        let mut discarded = 0usize;
        loop {
            match self.try_receive() {
                Ok(None) => break,
                Ok(Some(_)) | Err(_) => discarded += 1,
            }
        }

        for peer in self.peers.drain(..) {
            if let Err(err) = peer.get_ref().shutdown() {
                debug!(error = %err, "driver connection already gone");
            }
        }

        if discarded > 0 {
            debug!(discarded, "flushed channel backlog");
        }
        discarded
    }

    /// Release the listener and every connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.listener.take().is_none() {
            return;
        }
        for peer in self.peers.drain(..) {
            if let Err(err) = peer.get_ref().shutdown() {
                debug!(error = %err, "driver connection already gone");
            }
        }
        info!(address = %self.address, "channel closed");
    }

    fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.try_accept() {
                Ok(Some(stream)) => {
                    debug!(peer = ?stream.peer_addr(), "driver connected");
                    self.peers.push(FrameReader::new(stream));
                }
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "failed to accept driver connection");
                    return;
                }
            }
        }
    }
}

impl MessageSource for ChannelEndpoint {
    fn try_receive(&mut self) -> Result<Option<InboundMessage>, MalformedMessage> {
        if self.is_closed() {
            return Ok(None);
        }
        self.accept_pending();

        let mut index = 0;
        while index < self.peers.len() {
            match self.peers[index].try_read_frame() {
                Ok(Some(frame)) => return InboundMessage::from_slice(&frame.payload).map(Some),
                Ok(None) => index += 1,
                Err(FrameError::ConnectionClosed) => {
                    debug!("driver disconnected");
                    self.peers.remove(index);
                }
                Err(err) if err.is_desync() => {
                    // The stream can no longer be trusted to be frame-aligned.
                    warn!(error = %err, "dropping desynchronised driver connection");
                    let peer = self.peers.remove(index);
                    if let Err(err) = peer.get_ref().shutdown() {
                        debug!(error = %err, "driver connection already gone");
                    }
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(error = %err, "driver connection failed");
                    self.peers.remove(index);
                }
            }
        }
        Ok(None)
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("address", &self.address)
            .field("peers", &self.peers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use ndarray::arr1;
    use sensorlink_frame::FrameWriter;

    use super::*;

    fn driver(endpoint: &ChannelEndpoint) -> FrameWriter<IpcStream> {
        FrameWriter::new(IpcStream::connect(endpoint.address()).unwrap())
    }

    fn send(writer: &mut FrameWriter<IpcStream>, msg: &InboundMessage) {
        writer.send(&msg.to_vec().unwrap()).unwrap();
    }

    fn receive_within(
        endpoint: &mut ChannelEndpoint,
        timeout: Duration,
    ) -> Result<InboundMessage, MalformedMessage> {
        let start = Instant::now();
        loop {
            if let Some(msg) = endpoint.try_receive().transpose() {
                return msg;
            }
            assert!(start.elapsed() < timeout, "nothing received within {timeout:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn open_binds_ephemeral_loopback_address() {
        let endpoint = ChannelEndpoint::open().unwrap();
        assert_ne!(endpoint.port(), 0);
        assert!(endpoint.address().ip().is_loopback());
        assert!(!endpoint.is_closed());
    }

    #[test]
    fn try_receive_on_idle_channel_returns_none_immediately() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let start = Instant::now();
        assert!(endpoint.try_receive().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn receives_messages_in_push_order() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let mut writer = driver(&endpoint);
        for i in 0..5 {
            let msg = InboundMessage::data(arr1(&[i as f64]).into_dyn(), arr1(&[i as f64]).into_dyn());
            send(&mut writer, &msg);
        }
        send(&mut writer, &InboundMessage::event("done"));

        for i in 0..5 {
            let msg = receive_within(&mut endpoint, Duration::from_secs(3)).unwrap();
            let InboundMessage::Data(data) = msg else {
                panic!("expected data message");
            };
            assert_eq!(data.frame, arr1(&[i as f64]).into_dyn());
        }
        let last = receive_within(&mut endpoint, Duration::from_secs(3)).unwrap();
        assert_eq!(last, InboundMessage::event("done"));
        assert!(endpoint.try_receive().unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_reported_and_stream_continues() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let mut writer = driver(&endpoint);
        writer.send(b"not json").unwrap();
        send(&mut writer, &InboundMessage::event("after"));

        let first = receive_within(&mut endpoint, Duration::from_secs(3));
        assert!(matches!(first, Err(MalformedMessage::Json(_))));
        let second = receive_within(&mut endpoint, Duration::from_secs(3)).unwrap();
        assert_eq!(second, InboundMessage::event("after"));
    }

    #[test]
    fn corrupt_framing_drops_connection() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let mut writer = driver(&endpoint);
        writer.send_raw(b"XXXXXXXXXXXX").unwrap();

        let result = receive_within(&mut endpoint, Duration::from_secs(3));
        assert!(matches!(
            result,
            Err(MalformedMessage::Frame(FrameError::InvalidMagic))
        ));
        assert_eq!(endpoint.peer_count(), 0);
        assert!(endpoint.try_receive().unwrap().is_none());
    }

    #[test]
    fn zeromq_greeting_is_rejected() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let mut writer = driver(&endpoint);
        // ZMTP 3.x signature and version bytes.
        writer
            .send_raw(&[0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0x7F, 3, 0])
            .unwrap();

        let result = receive_within(&mut endpoint, Duration::from_secs(3));
        assert!(matches!(
            result,
            Err(MalformedMessage::Frame(FrameError::InvalidMagic))
        ));
        assert_eq!(endpoint.peer_count(), 0);
    }

    #[test]
    fn close_after_driver_hangup_releases_connections() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let writer = driver(&endpoint);
        assert!(endpoint.try_receive().unwrap().is_none());
        drop(writer);

        endpoint.close();
        assert_eq!(endpoint.peer_count(), 0);
        assert!(endpoint.is_closed());
    }

    #[test]
    fn flush_discards_backlog_and_disconnects_drivers() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let mut writer = driver(&endpoint);
        for i in 0..4 {
            let msg = InboundMessage::data(arr1(&[i as f64]).into_dyn(), arr1(&[0.0]).into_dyn());
            send(&mut writer, &msg);
        }

        // Wait until the first message is visible so the rest are queued too.
        receive_within(&mut endpoint, Duration::from_secs(3)).unwrap();
        assert_eq!(endpoint.flush(), 3);
        assert_eq!(endpoint.peer_count(), 0);

        // Late writes from the old driver land on a closed connection.
        let _ = writer.send(&InboundMessage::event("late").to_vec().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        assert!(endpoint.try_receive().unwrap().is_none());
    }

    #[test]
    fn close_is_idempotent_and_stops_receiving() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        endpoint.close();
        endpoint.close();
        assert!(endpoint.is_closed());
        assert!(endpoint.try_receive().unwrap().is_none());
        assert_eq!(endpoint.flush(), 0);
    }

    #[test]
    fn close_releases_port() {
        let mut endpoint = ChannelEndpoint::open().unwrap();
        let port = endpoint.port();
        endpoint.close();

        let rebound = TcpPullListener::bind(SocketAddr::from(([0, 0, 0, 0], port)));
        assert!(rebound.is_ok(), "port {port} should be free after close");
    }
}
