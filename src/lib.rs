//! A reliable, ordered, bidirectional byte-stream transport layered over
//! unreliable UDP datagrams: sliding-window sender, cumulative-ACK receiver
//! with out-of-order reassembly, and a simplified TCP-style handshake pair.

pub mod connection;
pub mod error;
pub mod io;
pub mod packet;
pub mod seq;
pub mod trace;

pub use connection::{Connection, State};
pub use error::Error;
pub use packet::{Flags, Packet};
