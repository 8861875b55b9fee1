//! C1 — Packet Codec.
//!
//! Fixed 12-byte header followed by 0..=1024 payload bytes, all multi-byte
//! fields big-endian on the wire (spec §3, §6.1). Stateless: `encode` and
//! `decode` are free functions / inherent methods on [`Packet`], no shared
//! state between calls.

use bitflags::bitflags;
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{self, Cursor, Read};

/// Maximum segment size: the largest payload a single packet may carry.
pub const MSS: usize = 1024;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 12;

/// Largest a datagram on the wire may legally be.
pub const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MSS;

bitflags! {
    /// Control bits carried by a [`Packet`]. Unused bits are reserved and
    /// must be zero; [`decode`](Packet::decode) does not reject segments
    /// that set them, it simply never produces them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        const SYN = 0x1;
        const ACK = 0x2;
        const FIN = 0x4;
    }
}

/// A single RDP segment: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data_len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_syn(&self) -> bool {
        self.flags.contains(Flags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(Flags::FIN)
    }

    /// Encode the header and payload into a single datagram buffer.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.write_u32::<BE>(self.seq)?;
        buf.write_u32::<BE>(self.ack)?;
        buf.write_u16::<BE>(self.flags.bits())?;
        buf.write_u16::<BE>(self.window)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode a datagram into a [`Packet`].
    ///
    /// Fails with [`DecodeError::Malformed`] if the datagram is shorter than
    /// the header, and with [`DecodeError::Oversize`] if the derived payload
    /// exceeds [`MSS`]. Both are internal, never surfaced past C2 (spec §7).
    pub fn decode(datagram: &[u8]) -> Result<Packet, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::Malformed);
        }

        let payload_len = datagram.len() - HEADER_LEN;
        if payload_len > MSS {
            return Err(DecodeError::Oversize);
        }

        let mut cursor = Cursor::new(datagram);
        let seq = cursor.read_u32::<BE>().map_err(|_| DecodeError::Malformed)?;
        let ack = cursor.read_u32::<BE>().map_err(|_| DecodeError::Malformed)?;
        let raw_flags = cursor.read_u16::<BE>().map_err(|_| DecodeError::Malformed)?;
        let window = cursor.read_u16::<BE>().map_err(|_| DecodeError::Malformed)?;

        let mut payload = vec![0u8; payload_len];
        cursor
            .read_exact(&mut payload)
            .map_err(|_| DecodeError::Malformed)?;

        Ok(Packet {
            seq,
            ack,
            flags: Flags::from_bits_truncate(raw_flags),
            window,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram shorter than the 12-byte header")]
    Malformed,
    #[error("payload exceeds MSS ({MSS} bytes)")]
    Oversize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_data_segment() {
        let p = Packet {
            seq: 42,
            ack: 7,
            flags: Flags::ACK,
            window: 65535,
            payload: vec![1, 2, 3, 4, 5],
        };

        let bytes = p.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 5);

        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn encodes_big_endian() {
        let p = Packet {
            seq: 0x01020304,
            ack: 0,
            flags: Flags::SYN,
            window: 0x0506,
            payload: vec![],
        };
        let bytes = p.encode().unwrap();
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..10], &[0x00, 0x01]);
        assert_eq!(&bytes[10..12], &[0x05, 0x06]);
    }

    #[test]
    fn rejects_short_datagram() {
        let bytes = [0u8; HEADER_LEN - 1];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::Malformed));
    }

    #[test]
    fn rejects_oversize_payload() {
        let bytes = vec![0u8; HEADER_LEN + MSS + 1];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::Oversize));
    }

    #[test]
    fn empty_payload_round_trips() {
        let p = Packet {
            seq: 1,
            ack: 1,
            flags: Flags::empty(),
            window: 1024,
            payload: vec![],
        };
        let bytes = p.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(Packet::decode(&bytes).unwrap(), p);
    }
}
