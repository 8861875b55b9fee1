/// Errors surfaced by the protocol engine to its callers (spec §7).
///
/// Transient conditions (malformed datagrams, simulated drops, timed-wait
/// expiry) never reach this type — they are absorbed internally and drive
/// retransmission/reassembly instead. Only handshake failure, retransmission
/// exhaustion, and fatal I/O conditions are worth a caller's attention.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation not valid in current state: {0:?}")]
    WrongState(crate::connection::State),

    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),

    #[error("retransmission exhausted after {0} attempts, connection is unrecoverable")]
    Unrecoverable(u32),

    #[error("could not resolve host: {0}")]
    ResolveFailed(String),

    #[error("socket error: {0}")]
    IoFatal(#[from] std::io::Error),
}
