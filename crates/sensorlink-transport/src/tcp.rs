use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Pull-only TCP listener for driver connections.
///
/// Peers are expected to speak sensorlink framing. This is not a ZeroMQ
/// socket; a ZMTP peer is dropped on its first frame.
///
/// The listener never writes to its peers. It is always in non-blocking mode
/// so [`TcpPullListener::try_accept`] returns immediately, and every accepted
/// stream is switched to non-blocking mode as well.
pub struct TcpPullListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpPullListener {
    /// Bind on all local interfaces with an OS-chosen port.
    pub fn bind_ephemeral() -> Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// Bind on an explicit address.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening for driver connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when no connection is waiting.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).map_err(TransportError::Accept)?;
                    stream.set_nodelay(true).map_err(TransportError::Accept)?;
                    debug!(%peer, "accepted driver connection");
                    return Ok(Some(IpcStream::from_tcp(stream)));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// The resolved address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The resolved port this listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Loopback address a local driver should dial.
    ///
    /// The listener binds the unspecified address, which is not dialable on
    /// every platform.
    pub fn connect_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port()))
    }
}

impl std::fmt::Debug for TcpPullListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPullListener")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    fn accept_within(listener: &TcpPullListener, timeout: Duration) -> IpcStream {
        let start = Instant::now();
        loop {
            if let Some(stream) = listener.try_accept().unwrap() {
                return stream;
            }
            assert!(start.elapsed() < timeout, "no connection within {timeout:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bind_ephemeral_assigns_port() {
        let listener = TcpPullListener::bind_ephemeral().unwrap();
        assert_ne!(listener.port(), 0);
        assert!(listener.local_addr().ip().is_unspecified());
        assert!(listener.connect_addr().ip().is_loopback());
        assert_eq!(listener.connect_addr().port(), listener.port());
    }

    #[test]
    fn test_two_listeners_get_distinct_ports() {
        let a = TcpPullListener::bind_ephemeral().unwrap();
        let b = TcpPullListener::bind_ephemeral().unwrap();
        assert_ne!(a.port(), b.port());
    }

    #[test]
    fn test_try_accept_without_pending_connection() {
        let listener = TcpPullListener::bind_ephemeral().unwrap();
        let start = Instant::now();
        assert!(listener.try_accept().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_accept_connect_and_read() {
        let listener = TcpPullListener::bind_ephemeral().unwrap();
        let mut client = IpcStream::connect(listener.connect_addr()).unwrap();
        client.write_all(b"hello").unwrap();

        let mut server = accept_within(&listener, Duration::from_secs(3));
        server.set_nonblocking(false).unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(server.peer_addr().is_some());
    }

    #[test]
    fn test_accepted_stream_is_nonblocking() {
        let listener = TcpPullListener::bind_ephemeral().unwrap();
        let _client = IpcStream::connect(listener.connect_addr()).unwrap();
        let mut server = accept_within(&listener, Duration::from_secs(3));

        let mut buf = [0u8; 8];
        let err = server.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let first = TcpPullListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let result = TcpPullListener::bind(first.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { addr, .. }) if addr == first.local_addr()));
    }
}
