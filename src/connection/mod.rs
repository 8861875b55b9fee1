//! C3/C4 — connection state machine, open/close handshakes, and the
//! sliding-window data path, wired together behind the public API (spec §6.2).

pub mod flow;
pub mod reassembly;
pub mod state;
pub mod window;

pub use state::State;

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::io::{DatagramIo, RecvOutcome, Timeout};
use crate::packet::{Flags, Packet, MSS};
use crate::trace::{Role, Trace};
use flow::FlowControl;
use reassembly::{Placement, Reassembly};
use tracing::{debug, trace, warn};
use window::{Admit, SendWindow};

/// Receive-buffer budget handed to [`FlowControl`] for every connection
/// (spec §4.5 leaves the exact size to the implementation).
const RECV_BUFFER_SIZE: u32 = 32 * 1024;

/// How long the open/close handshakes wait for a peer reply before giving up
/// (spec §4.3 ties this to the same RTO used for data retransmission).
const HANDSHAKE_TIMEOUT: Duration = window::RTO;

/// Backoff applied when the send window is full of unacknowledged segments.
const WINDOW_FULL_BACKOFF: Duration = Duration::from_millis(1);
/// Backoff applied when the peer's advertised window has no room.
const FLOW_GATED_BACKOFF: Duration = Duration::from_millis(10);

fn random_isn() -> u32 {
    rand::random()
}

/// One end of a reliable byte stream (spec §2 overview, §6.2 for the public
/// surface). `create`/`connect`/`listen`/`accept` are the only ways to build
/// one; everything else is a method.
pub struct Connection {
    io: DatagramIo,
    state: State,
    trace: Trace,

    send: Option<SendWindow>,
    recv: Option<Reassembly>,
    flow: FlowControl,

    /// Bytes delivered during a `send()` call's ACK-draining (spec's engine
    /// is cooperative and single-threaded per connection, so a segment that
    /// arrives while the caller is inside `send()` has nowhere else to go
    /// until the next `recv()` call drains this).
    pending: VecDeque<u8>,

    /// Set the first time a peer FIN is observed, however that happens (via
    /// `recv`/`send`'s ACK-draining or `close`'s own wait loop). This engine
    /// never enters `CloseWait` (spec.md's "symmetric responder path" only
    /// exercises `Established → FinWait1 → FinWait2 → Closed` on *both*
    /// sides): a FIN seen before the application calls `close()` just flags
    /// this so `recv` can report EOF and `close()` can skip waiting on a
    /// FIN that already arrived and will never be retransmitted.
    peer_fin_seen: bool,
}

impl Connection {
    fn new(io: DatagramIo, state: State, trace: Trace, iss: u32) -> Self {
        Connection {
            io,
            state,
            trace,
            send: Some(SendWindow::new(iss)),
            recv: None,
            flow: FlowControl::new(RECV_BUFFER_SIZE),
            pending: VecDeque::new(),
            peer_fin_seen: false,
        }
    }

    /// Allocate an unconnected, unbound-role connection handle in `Closed`
    /// (spec §6.2). Binds an ephemeral local port immediately since C2 has
    /// no separate "allocate but don't bind" state.
    pub fn create(loss_rate: f64) -> Result<Connection, Error> {
        let io = DatagramIo::bind("0.0.0.0:0".parse().unwrap(), loss_rate)
            .map_err(Error::IoFatal)?;
        Ok(Connection::new(io, State::Closed, Trace::disabled(), random_isn()))
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.io.local_addr().map_err(Error::IoFatal)
    }

    fn guard_established(&self) -> Result<(), Error> {
        if self.state.is_established() {
            Ok(())
        } else {
            Err(Error::WrongState(self.state))
        }
    }

    /// Active open (spec §4.3): resolve `host:port`, send a SYN carrying a
    /// random ISN, and block for up to one RTO for a matching SYN|ACK.
    pub fn connect(host: &str, port: u16, loss_rate: f64) -> Result<Connection, Error> {
        let peer = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::ResolveFailed(e.to_string()))?
            .next()
            .ok_or_else(|| Error::ResolveFailed(format!("{host}:{port}")))?;

        let io = DatagramIo::bind("0.0.0.0:0".parse().unwrap(), loss_rate)
            .map_err(Error::IoFatal)?;
        let iss = random_isn();
        let mut conn = Connection::new(io, State::SynSent, Trace::new(Role::Client), iss);

        let syn = Packet {
            seq: iss,
            ack: 0,
            flags: Flags::SYN,
            window: conn.flow.advertise(),
            payload: Vec::new(),
        };
        conn.io.send_to(peer, &syn)?;
        conn.trace.snd_syn(iss);

        match conn.io.recv_any(Timeout::Millis(HANDSHAKE_TIMEOUT.as_millis() as u64))? {
            RecvOutcome::Packet(p, src) if p.is_syn() && p.is_ack() && p.ack == iss.wrapping_add(1) => {
                conn.io.set_peer(src);
                let new_seq = iss.wrapping_add(1);
                conn.recv = Some(Reassembly::new(p.seq.wrapping_add(1)));
                conn.send.as_mut().unwrap().sync_after_control(new_seq);

                let ack = Packet {
                    seq: new_seq,
                    ack: conn.recv.as_ref().unwrap().recv_seq(),
                    flags: Flags::ACK,
                    window: conn.flow.advertise(),
                    payload: Vec::new(),
                };
                conn.io.send(&ack)?;
                conn.state = State::Established;
                debug!(iss, "state Established (active open)");
                Ok(conn)
            }
            _ => {
                conn.state = State::Closed;
                warn!(iss, "handshake failed, state Closed");
                Err(Error::HandshakeFailed("no SYN-ACK within one RTO"))
            }
        }
    }

    /// Passive open, listening half (spec §4.3): bind `port` and wait in
    /// `Listen` for incoming SYNs via [`accept`](Connection::accept).
    pub fn listen(port: u16, loss_rate: f64) -> Result<Connection, Error> {
        let addr: SocketAddr = format!("0.0.0.0:{port}").parse().expect("valid socket addr");
        let io = DatagramIo::bind(addr, loss_rate).map_err(Error::IoFatal)?;
        Ok(Connection::new(io, State::Listen, Trace::new(Role::Server), random_isn()))
    }

    /// Block until a peer completes the three-way handshake, returning a
    /// freshly allocated `Established` connection that shares this
    /// listener's socket (spec §4.3, §5). The listener itself stays in
    /// `Listen` and can be `accept`ed from again.
    pub fn accept(&mut self) -> Result<Connection, Error> {
        if self.state != State::Listen {
            return Err(Error::WrongState(self.state));
        }

        loop {
            let (syn, src) = match self.io.recv_any(Timeout::Indefinite)? {
                RecvOutcome::Packet(p, src) if p.is_syn() && !p.is_ack() => (p, src),
                _ => continue,
            };

            let child_io = self.io.try_clone_shared(src).map_err(Error::IoFatal)?;
            let iss = random_isn();
            let mut child = Connection::new(child_io, State::SynReceived, Trace::new(Role::Server), iss);
            child.recv = Some(Reassembly::new(syn.seq.wrapping_add(1)));

            let synack = Packet {
                seq: iss,
                ack: child.recv.as_ref().unwrap().recv_seq(),
                flags: Flags::SYN | Flags::ACK,
                window: child.flow.advertise(),
                payload: Vec::new(),
            };
            child.io.send_to(src, &synack)?;
            child.trace.snd_syn(iss);

            match child.io.recv_any(Timeout::Millis(HANDSHAKE_TIMEOUT.as_millis() as u64))? {
                RecvOutcome::Packet(p, _) if p.is_ack() && p.ack == iss.wrapping_add(1) => {
                    child.send.as_mut().unwrap().sync_after_control(iss.wrapping_add(1));
                    child.state = State::Established;
                    debug!(iss, "state Established (passive open)");
                    return Ok(child);
                }
                _ => continue, // handshake didn't complete; discard and keep listening
            }
        }
    }

    fn apply_ack_fields(&mut self, p: &Packet) {
        if let Some(send) = &mut self.send {
            send.process_ack(p.ack, p.window);
        }
        self.trace.rcv_ack(p.ack);
    }

    fn send_ack_now(&mut self) -> Result<(), Error> {
        let ack = Packet {
            seq: self.send.as_ref().map(|s| s.send_seq()).unwrap_or(0),
            ack: self.recv.as_ref().map(|r| r.recv_seq()).unwrap_or(0),
            flags: Flags::ACK,
            window: self.flow.advertise(),
            payload: Vec::new(),
        };
        self.io.send(&ack)?;
        if let Some(window) = self.flow.window_update_event() {
            self.trace.flow_window_update(window);
        }
        Ok(())
    }

    fn ingest_data(&mut self, packet: Packet) -> Result<(), Error> {
        let seq = packet.seq;
        let len = packet.data_len();

        // Worst case a single ooo-drain round releases everything the ring
        // can hold plus the segment that just filled the gap.
        let mut scratch = vec![0u8; (reassembly::OOO_SLOTS + 1) * MSS];
        let (delivered, received) = self
            .recv
            .as_mut()
            .expect("established connection always has a reassembly buffer")
            .accept_in_order(packet, &mut scratch);

        self.flow.charge(received as usize);
        self.flow.discharge(delivered);
        self.pending.extend(scratch[..delivered].iter().copied());
        self.trace.rcv_data(seq, len);

        self.send_ack_now()
    }

    /// Record a peer FIN exactly once (spec has no FIN retransmission, so a
    /// second observation would just be a stray duplicate). Advances
    /// `recv_seq` past it, acks it, and flags `peer_fin_seen` for
    /// `recv`/`close` to notice — never changes `self.state`, since this
    /// engine's symmetric close path only reaches `FinWait1`/`FinWait2` from
    /// `close()` itself, not from a bare arrival during `Established`.
    fn observe_peer_fin(&mut self, p: &Packet) -> Result<(), Error> {
        if self.peer_fin_seen {
            return Ok(());
        }

        let expected = self.recv.as_ref().map(|r| r.recv_seq()).unwrap_or(p.seq);
        if p.seq == expected {
            self.recv.as_mut().unwrap().force_advance(p.seq.wrapping_add(1));
        }
        self.peer_fin_seen = true;
        debug!(seq = p.seq, "observed peer FIN");
        self.send_ack_now()
    }

    /// Route one arrived segment during `Established`: ack/window feedback
    /// always applies, a FIN is recorded (but does not change state — see
    /// `observe_peer_fin`), a non-empty payload goes through reassembly
    /// regardless of its order (spec §9: any arrival with a payload gets
    /// acked, in-order or not).
    fn on_packet_established(&mut self, p: Packet) -> Result<(), Error> {
        self.apply_ack_fields(&p);

        if p.is_fin() {
            return self.observe_peer_fin(&p);
        }

        if p.data_len() == 0 {
            return Ok(());
        }

        match self.recv.as_ref().map(|r| r.classify(p.seq)) {
            Some(Placement::InOrder) => self.ingest_data(p),
            Some(Placement::Ahead) => {
                self.recv.as_mut().unwrap().store_ahead(p);
                self.send_ack_now()
            }
            Some(Placement::Behind) => self.send_ack_now(),
            None => Ok(()),
        }
    }

    fn drain_acks_and_retransmit(&mut self) -> Result<(), Error> {
        loop {
            match self.io.recv_any(Timeout::Poll)? {
                RecvOutcome::Packet(p, _) => self.on_packet_established(p)?,
                RecvOutcome::Dropped(seq) => self.trace.drop_data(seq),
                RecvOutcome::Timeout => break,
            }
        }

        match self
            .send
            .as_mut()
            .unwrap()
            .scan_retransmissions(Instant::now())
        {
            Ok(due) => {
                for r in due {
                    self.trace.timeout(r.packet.seq);
                    debug!(seq = r.packet.seq, "RTO expired, retransmitting");
                    self.io.send(&r.packet)?;
                    self.trace.retx_data(r.packet.seq, r.packet.data_len());
                }
                Ok(())
            }
            Err(retries) => {
                warn!(retries, "retransmission exhausted, connection unrecoverable");
                Err(Error::Unrecoverable(retries))
            }
        }
    }

    /// Write `bytes`, chunked to MSS, blocking while the window is full or
    /// the peer's advertised window won't admit the next chunk (spec §4.4.1).
    /// Returns once every chunk has been both sent and cumulatively ACKed.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.guard_established()?;

        for chunk in bytes.chunks(MSS) {
            loop {
                let admit = self.send.as_ref().unwrap().check_admit(chunk.len());
                match admit {
                    Admit::Go => break,
                    Admit::WindowFull => {
                        trace!(len = chunk.len(), "send window full, stalling");
                        self.drain_acks_and_retransmit()?;
                        std::thread::sleep(WINDOW_FULL_BACKOFF);
                    }
                    Admit::FlowGated => {
                        trace!(len = chunk.len(), "peer window closed, stalling");
                        self.drain_acks_and_retransmit()?;
                        std::thread::sleep(FLOW_GATED_BACKOFF);
                    }
                }
            }

            let piggyback_ack = self.recv.as_ref().map(|r| r.recv_seq()).unwrap_or(0);
            let window = self.flow.advertise();
            let packet = self.send.as_mut().unwrap().emit(chunk, piggyback_ack, window);
            self.io.send(&packet)?;
            self.trace.snd_data(packet.seq, packet.data_len());

            self.drain_acks_and_retransmit()?;
        }

        while !self.send.as_ref().unwrap().is_drained() {
            self.drain_acks_and_retransmit()?;
        }

        Ok(bytes.len())
    }

    /// Read up to `buf.len()` bytes, blocking until at least one byte is
    /// available, the peer has closed (returns `Ok(0)`), or a fatal I/O
    /// error occurs.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.guard_established()?;

        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                for (i, byte) in self.pending.drain(..n).enumerate() {
                    buf[i] = byte;
                }
                return Ok(n);
            }

            if self.peer_fin_seen {
                return Ok(0);
            }

            match self.io.recv_any(Timeout::Millis(100))? {
                RecvOutcome::Packet(p, _) => self.on_packet_established(p)?,
                RecvOutcome::Dropped(seq) => self.trace.drop_data(seq),
                RecvOutcome::Timeout => {}
            }
        }
    }

    /// Like [`recv`](Connection::recv) but gives up and returns `Ok(None)`
    /// if nothing arrives within `timeout`, instead of blocking forever.
    /// Used by collaborator applications that need to detect a stalled
    /// peer rather than hang (spec §2.4's file-transfer demo).
    pub fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, Error> {
        self.guard_established()?;

        let deadline = Instant::now() + timeout;
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                for (i, byte) in self.pending.drain(..n).enumerate() {
                    buf[i] = byte;
                }
                return Ok(Some(n));
            }

            if self.peer_fin_seen {
                return Ok(Some(0));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            match self.io.recv_any(Timeout::Millis(50))? {
                RecvOutcome::Packet(p, _) => self.on_packet_established(p)?,
                RecvOutcome::Dropped(seq) => self.trace.drop_data(seq),
                RecvOutcome::Timeout => {}
            }
        }
    }

    /// Active close (spec §4.3, simplified four-way): send a FIN, wait for
    /// the peer's ACK of it and its own FIN, ACK that FIN, and finish in
    /// `Closed`. No FIN retransmission — a lost FIN just means the wait
    /// keeps going until the peer's own FIN (and hence the local ACK of it)
    /// eventually lands. The wait is bounded to `MAX_RETRIES` RTOs (spec §9):
    /// past that deadline the connection is forced to `Closed` rather than
    /// hanging forever on a lost FIN/FIN-ACK.
    pub fn close(&mut self) -> Result<(), Error> {
        self.guard_established()?;

        let fin_seq = self.send.as_ref().unwrap().send_seq();
        let fin = Packet {
            seq: fin_seq,
            ack: self.recv.as_ref().unwrap().recv_seq(),
            flags: Flags::FIN,
            window: self.flow.advertise(),
            payload: Vec::new(),
        };
        self.io.send(&fin)?;
        self.send.as_mut().unwrap().bump_for_control();
        self.state = State::FinWait1;
        debug!(fin_seq, "state FinWait1");

        let mut our_fin_acked = false;
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT * window::MAX_RETRIES as u32;

        while !(our_fin_acked && self.peer_fin_seen) {
            if Instant::now() >= deadline {
                warn!("close timed out waiting for peer, forcing state Closed");
                break;
            }

            match self
                .io
                .recv_any(Timeout::Millis(HANDSHAKE_TIMEOUT.as_millis() as u64))?
            {
                RecvOutcome::Packet(p, _) => {
                    if p.is_ack() && !our_fin_acked && seq_acks(p.ack, fin_seq) {
                        our_fin_acked = true;
                        if self.state == State::FinWait1 {
                            self.state = State::FinWait2;
                            debug!("state FinWait2");
                        }
                    }

                    if p.is_fin() {
                        self.observe_peer_fin(&p)?;
                    }
                }
                RecvOutcome::Dropped(seq) => self.trace.drop_data(seq),
                RecvOutcome::Timeout => continue,
            }
        }

        self.state = State::Closed;
        self.peer_fin_seen = false;
        debug!("state Closed");
        Ok(())
    }

    /// Release the connection's resources unconditionally (spec §6.2). The
    /// socket and buffers are reclaimed by `Drop`; this exists so callers
    /// have an explicit symmetric counterpart to `create`/`connect`/`listen`.
    pub fn free(self) {
        drop(self);
    }
}

fn seq_acks(ack: u32, fin_seq: u32) -> bool {
    crate::seq::ge(ack, fin_seq.wrapping_add(1))
}
