//! C2 — Datagram I/O.
//!
//! Wraps a single bound `UdpSocket`. The connection that owns a [`DatagramIo`]
//! adopts its peer's address from the first datagram that arrives if it does
//! not already have one (spec §4.2), so a responder's listening socket can be
//! handed to a freshly allocated connection before the peer's address is
//! known.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;
use tracing::{trace, warn};

use crate::packet::{DecodeError, Packet, MAX_DATAGRAM_LEN};

/// How long `recv_any` should block.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Don't block; return immediately if nothing is queued.
    Poll,
    /// Block for up to this many milliseconds.
    Millis(u64),
    /// Block until a datagram arrives or the socket errors out.
    Indefinite,
}

impl Timeout {
    fn as_duration(self) -> Option<Duration> {
        match self {
            // `set_read_timeout` rejects an exact zero duration (`InvalidInput`);
            // one microsecond is close enough to "don't block" for polling.
            Timeout::Poll => Some(Duration::from_micros(1)),
            Timeout::Millis(ms) => Some(Duration::from_millis(ms)),
            Timeout::Indefinite => None,
        }
    }
}

/// Outcome of a single `recv_any` call. `Dropped` and `Timeout` are internal
/// sentinels (spec §7): callers above C2 treat them as "no packet arrived
/// this round" and keep polling.
#[derive(Debug)]
pub enum RecvOutcome {
    Packet(Packet, SocketAddr),
    /// Ingress loss simulation fired after a packet was decoded; its
    /// sequence number is carried through so the trace sink can log
    /// `DROP DATA SEQ=n` (spec §6.3) even though the packet itself is
    /// discarded.
    Dropped(u32),
    Timeout,
}

/// A bound UDP endpoint plus the simulated ingress-loss policy used by the
/// test harness (spec §4.2, §8 S4).
#[derive(Debug)]
pub struct DatagramIo {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    loss_rate: f64,
    dead: bool,
}

impl DatagramIo {
    pub fn bind(addr: SocketAddr, loss_rate: f64) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(DatagramIo {
            socket,
            peer: None,
            loss_rate,
            dead: false,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, addr: SocketAddr) {
        self.peer = Some(addr);
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Clone this endpoint's underlying socket for a freshly accepted
    /// connection (spec §5: "the listening connection and its accepted
    /// child share the socket" — there is only ever one peer at a time, so
    /// no demultiplexing by address is needed). The clone is pre-seeded
    /// with `peer` so it can reply immediately.
    pub fn try_clone_shared(&self, peer: SocketAddr) -> std::io::Result<Self> {
        Ok(DatagramIo {
            socket: self.socket.try_clone()?,
            peer: Some(peer),
            loss_rate: self.loss_rate,
            dead: false,
        })
    }

    /// Encode and transmit a single datagram to `peer`. Returns the number of
    /// bytes sent.
    pub fn send_to(&mut self, peer: SocketAddr, packet: &Packet) -> Result<usize, crate::Error> {
        let bytes = packet.encode().map_err(crate::Error::IoFatal)?;
        match self.socket.send_to(&bytes, peer) {
            Ok(n) => Ok(n),
            Err(e) if is_fatal(&e) => {
                self.dead = true;
                warn!(error = %e, "fatal send error, endpoint marked dead");
                Err(crate::Error::IoFatal(e))
            }
            Err(_) => Ok(0),
        }
    }

    /// Send to the already-adopted peer. Panics if no peer has been adopted
    /// yet — callers above C2 never invoke this before the handshake.
    pub fn send(&mut self, packet: &Packet) -> Result<usize, crate::Error> {
        let peer = self.peer.expect("send() called before peer address was known");
        self.send_to(peer, packet)
    }

    /// Block up to `timeout`, then return the decoded packet, a `Dropped`
    /// sentinel (ingress loss simulation fired), or `Timeout`.
    pub fn recv_any(&mut self, timeout: Timeout) -> Result<RecvOutcome, crate::Error> {
        if self.dead {
            return Err(crate::Error::IoFatal(std::io::Error::new(
                ErrorKind::NotConnected,
                "endpoint is dead",
            )));
        }

        self.socket
            .set_read_timeout(timeout.as_duration())
            .map_err(crate::Error::IoFatal)?;

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                if self.peer.is_none() {
                    self.peer = Some(src);
                }

                match Packet::decode(&buf[..n]) {
                    Ok(packet) => {
                        if rand::thread_rng().gen_bool(self.loss_rate.clamp(0.0, 1.0)) {
                            trace!(seq = packet.seq, "ingress loss simulation dropped packet");
                            return Ok(RecvOutcome::Dropped(packet.seq));
                        }
                        Ok(RecvOutcome::Packet(packet, src))
                    }
                    // Malformed datagrams are discarded silently (spec §7);
                    // from the caller's point of view nothing arrived.
                    Err(DecodeError::Malformed | DecodeError::Oversize) => Ok(RecvOutcome::Timeout),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(RecvOutcome::Timeout)
            }
            Err(e) if is_fatal(&e) => {
                self.dead = true;
                warn!(error = %e, "fatal recv error, endpoint marked dead");
                Err(crate::Error::IoFatal(e))
            }
            Err(_) => Ok(RecvOutcome::Timeout),
        }
    }
}

/// Conditions that mean the underlying socket can never make progress again,
/// as opposed to a transient condition that should just be retried.
fn is_fatal(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::AddrNotAvailable
    )
}
