//! C4.4.1 — the sender half of the reliable byte stream: sliding-window
//! admission, emission, cumulative-ACK processing, and RTO-driven
//! retransmission.
//!
//! The send window is a fixed-size ring of `W` slots (spec §3, §9): the
//! packet-count gate already bounds in-flight segments to `W`, so a ring is
//! sufficient and keeps cumulative-ACK advancement O(1) amortized instead of
//! needing a map keyed by sequence number.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::packet::{Flags, Packet, MSS};
use crate::seq;

/// W — the send window's slot count (spec §3).
pub const WINDOW_SLOTS: usize = 10;
/// RTO — fixed retransmission timeout (spec §5).
pub const RTO: Duration = Duration::from_millis(500);
/// Max retransmission attempts before a segment is declared unrecoverable.
pub const MAX_RETRIES: u32 = 5;

struct SendEntry {
    packet: Packet,
    sent_at: Instant,
    retries: u32,
}

impl SendEntry {
    fn end_seq(&self) -> u32 {
        self.packet.seq.wrapping_add(self.packet.data_len() as u32)
    }
}

/// What the caller should do after asking the sender to admit a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    /// Go ahead, the chunk was admitted and stamped into a `Packet`.
    Go,
    /// The `W`-entry window is full; yield briefly (~1ms) and re-poll ACKs.
    WindowFull,
    /// Peer-advertised window doesn't have room; yield longer (~10ms).
    FlowGated,
}

/// A segment whose RTO has elapsed and needs retransmitting.
pub struct Retransmit {
    pub packet: Packet,
}

pub struct SendWindow {
    entries: [Option<SendEntry>; WINDOW_SLOTS],
    window_start: usize,
    window_count: usize,

    send_seq: u32,
    send_base: u32,
    peer_window: u16,
    last_byte_sent: u32,
    last_byte_acked: u32,
}

impl SendWindow {
    pub fn new(iss: u32) -> Self {
        SendWindow {
            entries: std::array::from_fn(|_| None),
            window_start: 0,
            window_count: 0,
            send_seq: iss,
            send_base: iss,
            peer_window: MSS as u16,
            last_byte_sent: iss,
            last_byte_acked: iss,
        }
    }

    pub fn send_seq(&self) -> u32 {
        self.send_seq
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn window_count(&self) -> usize {
        self.window_count
    }

    pub fn is_drained(&self) -> bool {
        self.window_count == 0
    }

    /// Resync after a control segment (SYN or FIN) consumes one sequence
    /// number outside the data ring (spec §4.3): `new_seq` becomes the next
    /// byte to send, with nothing yet in flight.
    pub fn sync_after_control(&mut self, new_seq: u32) {
        self.send_seq = new_seq;
        self.send_base = new_seq;
        self.last_byte_sent = new_seq;
        self.last_byte_acked = new_seq;
    }

    /// Consume one sequence number for an outgoing control segment (FIN)
    /// without allocating a window slot for it.
    pub fn bump_for_control(&mut self) {
        self.send_seq = self.send_seq.wrapping_add(1);
        self.last_byte_sent = self.last_byte_sent.wrapping_add(1);
    }

    fn in_flight(&self) -> u32 {
        if seq::ge(self.last_byte_sent, self.last_byte_acked) {
            self.last_byte_sent.wrapping_sub(self.last_byte_acked)
        } else {
            // Defensive against reordered ACKs raising last_byte_acked past
            // last_byte_sent (spec §4.4.1).
            0
        }
    }

    /// Check admission for a chunk of `len` bytes without mutating state.
    pub fn check_admit(&self, len: usize) -> Admit {
        if self.window_count >= WINDOW_SLOTS {
            return Admit::WindowFull;
        }

        let budget = (self.peer_window as u32).saturating_sub(len as u32);
        if self.in_flight() > budget {
            return Admit::FlowGated;
        }

        Admit::Go
    }

    /// Stamp and insert a data segment of `data`, returning the packet to
    /// transmit. `ack`/`window` are the receiver-side piggyback values this
    /// connection currently advertises (spec §4.4.1: "ack piggybacks the
    /// current recv_seq; window is the sender's own advertised window").
    pub fn emit(&mut self, data: &[u8], piggyback_ack: u32, advertise_window: u16) -> Packet {
        let packet = Packet {
            seq: self.send_seq,
            ack: piggyback_ack,
            flags: Flags::empty(),
            window: advertise_window,
            payload: data.to_vec(),
        };

        let idx = (self.window_start + self.window_count) % WINDOW_SLOTS;
        self.entries[idx] = Some(SendEntry {
            packet: packet.clone(),
            sent_at: Instant::now(),
            retries: 0,
        });
        self.window_count += 1;

        self.send_seq = self.send_seq.wrapping_add(data.len() as u32);
        self.last_byte_sent = self.last_byte_sent.wrapping_add(data.len() as u32);

        packet
    }

    /// Process one cumulative ACK: advance `last_byte_acked`/`peer_window`
    /// and pop every window entry fully covered by it.
    pub fn process_ack(&mut self, ack: u32, peer_window: u16) {
        self.peer_window = peer_window;

        if seq::gt(ack, self.last_byte_acked) {
            self.last_byte_acked = ack;
        }

        while self.window_count > 0 {
            let idx = self.window_start;
            let Some(entry) = &self.entries[idx] else {
                break;
            };

            if seq::le(entry.end_seq(), ack) {
                self.send_base = entry.end_seq();
                self.entries[idx] = None;
                self.window_start = (self.window_start + 1) % WINDOW_SLOTS;
                self.window_count -= 1;
            } else {
                break;
            }
        }
    }

    /// Scan all in-window entries for RTO expiry. Returns the segments to
    /// retransmit, or `Err(retries)` the first time a segment's retry count
    /// would exceed `MAX_RETRIES`.
    pub fn scan_retransmissions(&mut self, now: Instant) -> Result<Vec<Retransmit>, u32> {
        let mut due = Vec::new();

        for i in 0..self.window_count {
            let idx = (self.window_start + i) % WINDOW_SLOTS;
            let Some(entry) = &mut self.entries[idx] else {
                continue;
            };

            if now.duration_since(entry.sent_at) >= RTO {
                if entry.retries >= MAX_RETRIES {
                    return Err(entry.retries);
                }

                entry.retries += 1;
                entry.sent_at = now;
                trace!(seq = entry.packet.seq, retries = entry.retries, "segment past RTO");
                due.push(Retransmit {
                    packet: entry.packet.clone(),
                });
            }
        }

        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SendWindow {
        let mut w = SendWindow::new(0);
        w.peer_window = u16::MAX;
        w
    }

    #[test]
    fn admits_until_full() {
        let mut w = window();
        for _ in 0..WINDOW_SLOTS {
            assert_eq!(w.check_admit(10), Admit::Go);
            w.emit(&[0u8; 10], 0, 1024);
        }
        assert_eq!(w.check_admit(10), Admit::WindowFull);
    }

    #[test]
    fn flow_gate_blocks_when_peer_window_small() {
        let mut w = window();
        w.peer_window = 5;
        assert_eq!(w.check_admit(10), Admit::FlowGated);
    }

    #[test]
    fn cumulative_ack_pops_fully_covered_entries() {
        let mut w = window();
        w.emit(&[0u8; 10], 0, 1024); // seq 0..10
        w.emit(&[0u8; 10], 0, 1024); // seq 10..20
        assert_eq!(w.window_count(), 2);

        w.process_ack(10, 1024);
        assert_eq!(w.window_count(), 1);
        assert_eq!(w.send_base(), 10);

        w.process_ack(20, 1024);
        assert_eq!(w.window_count(), 0);
        assert_eq!(w.send_base(), 20);
    }

    #[test]
    fn ack_is_idempotent_and_monotonic() {
        let mut w = window();
        w.emit(&[0u8; 10], 0, 1024);
        w.process_ack(10, 1024);
        let base_after_first = w.send_base();
        w.process_ack(5, 1024); // stale ACK, must not regress anything
        assert_eq!(w.send_base(), base_after_first);
        w.process_ack(10, 1024); // duplicate, no-op
        assert_eq!(w.send_base(), base_after_first);
    }

    #[test]
    fn retransmission_fires_after_rto_and_caps_at_max_retries() {
        let mut w = window();
        w.emit(&[0u8; 10], 0, 1024);

        let far_future = Instant::now() + RTO + Duration::from_millis(1);
        for attempt in 1..=MAX_RETRIES {
            let due = w.scan_retransmissions(far_future).unwrap();
            assert_eq!(due.len(), 1);
            let _ = attempt;
        }
        assert!(w.scan_retransmissions(far_future).is_err());
    }
}
