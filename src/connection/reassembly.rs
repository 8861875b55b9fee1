//! C4.4.2 — the receiver half of the reliable byte stream: in-order
//! delivery with out-of-order staging.
//!
//! The out-of-order buffer is `W` unordered slots (spec §3, §9) — adequate
//! because the sender is itself bounded to `W` in-flight segments, so no
//! more than `W` out-of-order segments can ever be outstanding at once.

use tracing::trace;

use crate::packet::Packet;
use crate::seq;

pub const OOO_SLOTS: usize = super::window::WINDOW_SLOTS;

/// Where an arriving segment's sequence number places it relative to the
/// receiver's in-order cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    InOrder,
    Ahead,
    Behind,
}

pub struct Reassembly {
    recv_seq: u32,
    ooo: [Option<Packet>; OOO_SLOTS],
}

impl Reassembly {
    pub fn new(irs: u32) -> Self {
        Reassembly {
            recv_seq: irs,
            ooo: std::array::from_fn(|_| None),
        }
    }

    pub fn recv_seq(&self) -> u32 {
        self.recv_seq
    }

    /// Force the cursor forward for a control segment (FIN) that consumes
    /// one sequence number outside the data stream.
    pub fn force_advance(&mut self, new_recv_seq: u32) {
        self.recv_seq = new_recv_seq;
    }

    pub fn classify(&self, seq_no: u32) -> Placement {
        if seq_no == self.recv_seq {
            Placement::InOrder
        } else if seq::gt(seq_no, self.recv_seq) {
            Placement::Ahead
        } else {
            Placement::Behind
        }
    }

    /// Store a segment that arrived ahead of `recv_seq`. Returns `false` (and
    /// drops the segment) if every slot is occupied — relies on the sender's
    /// retransmission to recover (spec §4.4.2 edge cases).
    pub fn store_ahead(&mut self, packet: Packet) -> bool {
        debug_assert_eq!(self.classify(packet.seq), Placement::Ahead);

        if self.ooo.iter().any(|slot| {
            slot.as_ref()
                .is_some_and(|p| p.seq == packet.seq)
        }) {
            return true; // already buffered, treat as handled
        }

        if let Some(slot) = self.ooo.iter_mut().find(|s| s.is_none()) {
            trace!(seq = packet.seq, "buffering out-of-order segment");
            *slot = Some(packet);
            true
        } else {
            trace!(seq = packet.seq, "out-of-order buffer full, dropping segment");
            false
        }
    }

    /// Deliver an in-order segment's payload into `out`, starting at
    /// `out[*out_pos..]`, truncating to whatever capacity remains. Advances
    /// `recv_seq` by the *full* segment length regardless of truncation
    /// (spec §4.4.2 edge cases — flagged as a possible footgun in §9, but
    /// preserved as specified). Returns the number of bytes actually copied.
    fn deliver(&mut self, packet: &Packet, out: &mut [u8], out_pos: &mut usize) -> usize {
        let remaining = out.len().saturating_sub(*out_pos);
        let copy_len = remaining.min(packet.data_len());
        out[*out_pos..*out_pos + copy_len].copy_from_slice(&packet.payload[..copy_len]);
        *out_pos += copy_len;

        self.recv_seq = self.recv_seq.wrapping_add(packet.data_len() as u32);
        copy_len
    }

    /// Accept an in-order segment, deliver it, then drain every
    /// now-contiguous segment sitting in the out-of-order buffer. Returns
    /// the total bytes copied into `out` and the total bytes the receiver
    /// considers "received" (for flow-control charge/discharge — the full
    /// segment lengths, not the truncated copy lengths).
    pub fn accept_in_order(&mut self, packet: Packet, out: &mut [u8]) -> (usize, u32) {
        debug_assert_eq!(self.classify(packet.seq), Placement::InOrder);

        let mut out_pos = 0;
        let mut total_received = packet.data_len() as u32;
        self.deliver(&packet, out, &mut out_pos);

        loop {
            let idx = self
                .ooo
                .iter()
                .position(|slot| slot.as_ref().is_some_and(|p| p.seq == self.recv_seq));

            let Some(idx) = idx else { break };
            let next = self.ooo[idx].take().unwrap();
            total_received += next.data_len() as u32;
            self.deliver(&next, out, &mut out_pos);
        }

        (out_pos, total_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Flags;

    fn data(seq_no: u32, bytes: &[u8]) -> Packet {
        Packet {
            seq: seq_no,
            ack: 0,
            flags: Flags::empty(),
            window: 1024,
            payload: bytes.to_vec(),
        }
    }

    #[test]
    fn classifies_in_order_ahead_behind() {
        let r = Reassembly::new(100);
        assert_eq!(r.classify(100), Placement::InOrder);
        assert_eq!(r.classify(110), Placement::Ahead);
        assert_eq!(r.classify(99), Placement::Behind);
    }

    #[test]
    fn in_order_segment_advances_cursor_and_delivers() {
        let mut r = Reassembly::new(0);
        let mut out = [0u8; 16];
        let (n, received) = r.accept_in_order(data(0, b"hello"), &mut out);
        assert_eq!(n, 5);
        assert_eq!(received, 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(r.recv_seq(), 5);
    }

    #[test]
    fn reordered_segments_drain_in_order_when_gap_fills() {
        let mut r = Reassembly::new(0);
        assert!(r.store_ahead(data(10, b"world")));

        let mut out = [0u8; 16];
        let (n, received) = r.accept_in_order(data(0, b"hello"), &mut out);
        assert_eq!(&out[..n], b"helloworld");
        assert_eq!(received, 10);
        assert_eq!(r.recv_seq(), 15);
    }

    #[test]
    fn truncated_delivery_still_advances_by_full_length() {
        let mut r = Reassembly::new(0);
        let mut out = [0u8; 3];
        let (n, received) = r.accept_in_order(data(0, b"hello"), &mut out);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], b"hel");
        assert_eq!(received, 5);
        assert_eq!(r.recv_seq(), 5); // full length, not truncated length
    }

    #[test]
    fn ooo_slot_exhaustion_drops_silently() {
        let mut r = Reassembly::new(0);
        for i in 0..OOO_SLOTS as u32 {
            assert!(r.store_ahead(data(10 + i * 10, b"x")));
        }
        assert!(!r.store_ahead(data(10 + OOO_SLOTS as u32 * 10, b"x")));
    }
}
