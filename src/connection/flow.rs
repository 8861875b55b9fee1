//! C5 — Flow Control.
//!
//! Cross-cutting advisory: the receiver side of a connection charges and
//! discharges a byte-accounted buffer and turns its occupancy into an
//! advertised window on every outgoing ACK (spec §4.5); the sender side
//! reads the peer's last-advertised window to gate emission (spec §4.4.1).

use tracing::trace;

use crate::packet::MSS;

/// Receive-buffer accounting and window advertisement for one connection.
#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    recv_buffer_size: u32,
    recv_buffer_used: u32,
    last_advertised: u16,
}

impl FlowControl {
    pub fn new(recv_buffer_size: u32) -> Self {
        FlowControl {
            recv_buffer_size,
            recv_buffer_used: 0,
            last_advertised: recv_buffer_size.min(u16::MAX as u32) as u16,
        }
    }

    /// `clamp(recv_buffer_size - recv_buffer_used, MSS, 65535)`. The MSS
    /// floor is mandatory: a zero-window advertisement would deadlock the
    /// sender since this design has no window-probe mechanism.
    pub fn advertise(&self) -> u16 {
        let free = self
            .recv_buffer_size
            .saturating_sub(self.recv_buffer_used) as u64;
        free.clamp(MSS as u64, u16::MAX as u64) as u16
    }

    /// Charge `len` bytes to the receive buffer on arrival of a data
    /// segment, before it has been copied out to the application.
    pub fn charge(&mut self, len: usize) {
        self.recv_buffer_used = self.recv_buffer_used.saturating_add(len as u32);
    }

    /// Discharge `len` bytes once they have been delivered to the caller's
    /// buffer. Saturates at zero rather than underflowing.
    pub fn discharge(&mut self, len: usize) {
        self.recv_buffer_used = self.recv_buffer_used.saturating_sub(len as u32);
    }

    pub fn used(&self) -> u32 {
        self.recv_buffer_used
    }

    /// Returns `Some(new_window)` if the advertised value has moved by more
    /// than one MSS since the last transmitted advertisement, for the
    /// "window update" observability event (spec §4.5).
    pub fn window_update_event(&mut self) -> Option<u16> {
        let current = self.advertise();
        let delta = (current as i32 - self.last_advertised as i32).unsigned_abs();
        if delta as usize > MSS {
            trace!(window = current, "advertised window moved");
            self.last_advertised = current;
            Some(current)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertises_free_space() {
        let mut fc = FlowControl::new(32 * 1024);
        assert_eq!(fc.advertise(), 32 * 1024);
        fc.charge(1000);
        assert_eq!(fc.advertise(), 32 * 1024 - 1000);
    }

    #[test]
    fn floors_at_mss_when_nearly_full() {
        let mut fc = FlowControl::new(32 * 1024);
        fc.charge(32 * 1024 - 10);
        assert_eq!(fc.advertise(), MSS as u16);
    }

    #[test]
    fn discharge_saturates_at_zero() {
        let mut fc = FlowControl::new(32 * 1024);
        fc.discharge(100);
        assert_eq!(fc.used(), 0);
    }

    #[test]
    fn window_update_event_fires_past_one_mss() {
        let mut fc = FlowControl::new(32 * 1024);
        assert_eq!(fc.window_update_event(), None);
        fc.charge(MSS + 1);
        assert!(fc.window_update_event().is_some());
        assert_eq!(fc.window_update_event(), None);
    }
}
