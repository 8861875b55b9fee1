/// Connection states (spec §3). All eleven RFC-793-flavored states exist as
/// variants even though this system's symmetric close handshake (§4.3) only
/// ever drives a connection through `Established → FinWait1 → FinWait2 →
/// Closed` on both sides — `CloseWait`, `Closing`, `LastAck`, and `TimeWait`
/// are reachable in a fuller redesign and are kept here so a caller matching
/// on `State` is future-proof against that redesign (§9). A peer FIN arriving
/// during `Established` never moves a connection into `CloseWait`; it is
/// only recorded via `Connection`'s `peer_fin_seen` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    pub fn is_established(self) -> bool {
        matches!(self, State::Established)
    }
}
