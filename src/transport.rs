//! Control-plane transport (§4.1): framing and addressed send/receive of
//! `ControlMessage`s over UDP.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tracing::warn;

use crate::wire::ControlMessage;

/// How often a blocked `recv_from` wakes up to re-check its caller's
/// shutdown flag (§5: receive loops must observe `stop_thread` promptly;
/// UDP sockets have no `shutdown()` to force a blocked read to return, so
/// a short read timeout stands in for it).
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A UDP control socket with a serialized send path (§4.1): only one
/// datagram is on the wire at a time per socket, so the priority/source
/// fields are never interleaved.
pub struct ControlTransport {
    socket: UdpSocket,
    send_lock: Mutex<()>,
}

impl ControlTransport {
    /// Bind a control socket at `local_addr` with `reuse_address` and
    /// `broadcast` both enabled (§4.1).
    pub fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
        let domain = if local_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&local_addr.into())?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        let socket: UdpSocket = socket.into();
        Ok(ControlTransport {
            socket,
            send_lock: Mutex::new(()),
        })
    }

    /// Send one `ControlMessage` to `dest`. The send path is serialized
    /// with a mutex (§4.1); failures are surfaced to the caller, which may
    /// retry at its discretion — the orchestrator does not (§7).
    pub fn send_to(&self, msg: &ControlMessage, dest: SocketAddr) -> anyhow::Result<()> {
        let bytes = msg.serialize()?;
        let _guard = self.send_lock.lock().unwrap();
        self.socket.send_to(&bytes, dest)?;
        Ok(())
    }

    /// Blocks until a datagram arrives or `RECV_POLL_INTERVAL` elapses,
    /// then returns the peer address along with the parsed message. Parse
    /// errors are logged and the datagram dropped; a timeout with nothing
    /// received is reported the same way as a dropped datagram (`Ok(None)`)
    /// so callers' receive loops re-check their shutdown flag instead of
    /// treating it as a fatal error (§4.1, §5, §7).
    pub fn recv_from(&self) -> std::io::Result<Option<(ControlMessage, SocketAddr)>> {
        let mut buf = [0u8; crate::wire::MAX_LENGTH];
        let (len, peer) = match self.socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        match ControlMessage::deserialize(&buf[..len]) {
            Ok(msg) => Ok(Some((msg, peer))),
            Err(err) => {
                warn!(peer = %peer, error = %err, "dropping malformed control datagram");
                Ok(None)
            }
        }
    }

    /// Closes the socket to force a pending `recv_from` to return with an
    /// error (§5 shutdown contract), by binding a throwaway socket with the
    /// same local port is not possible portably; instead callers drop the
    /// `ControlTransport` and the receive thread observes the resulting
    /// `WouldBlock`/closed-socket error on its own `try_clone`d handle.
    pub fn try_clone(&self) -> std::io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}
