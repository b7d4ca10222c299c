//! Packet Codec
//!
//! Wire format of the reliable layer. Pure and stateless.
//!
//! ```text
//!  0        1                 5
//! +--------+--------+--------+--------+--------+---------------
//! |  seq   |          digest (4 bytes)         |  payload ...
//! +--------+--------+--------+--------+--------+---------------
//! ```
//!
//! An acknowledgment is a single byte holding the acknowledged sequence
//! bit. Packets and acks share the socket and are told apart by length
//! alone: 1 byte is an ack, 5 or more bytes is a packet.

use crate::core::hash::{packet_digest, PacketDigest, DIGEST_LEN};

/// Size of the fixed header (sequence byte + digest).
pub const HEADER_LEN: usize = 1 + DIGEST_LEN;

/// Length of an acknowledgment datagram.
pub const ACK_LEN: usize = 1;

/// Datagram size ceiling of the reference deployment.
pub const DEFAULT_MTU: usize = 1024;

/// Largest payload that fits in [`DEFAULT_MTU`].
pub const MAX_PAYLOAD: usize = DEFAULT_MTU - HEADER_LEN;

/// Alternating-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeqBit {
    /// Bit 0. Both directions of a fresh channel start here.
    #[default]
    Zero,
    /// Bit 1.
    One,
}

impl SeqBit {
    /// The other bit.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            SeqBit::Zero => SeqBit::One,
            SeqBit::One => SeqBit::Zero,
        }
    }

    /// Wire representation.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            SeqBit::Zero => 0,
            SeqBit::One => 1,
        }
    }

    /// Parse a wire byte. Anything other than 0 or 1 is not a sequence bit.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SeqBit::Zero),
            1 => Some(SeqBit::One),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeqBit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_byte())
    }
}

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Datagram too short for a header, or the sequence byte is not 0/1.
    #[error("Malformed packet ({len} bytes)")]
    Malformed {
        /// Length of the rejected datagram.
        len: usize,
    },

    /// Payload does not fit in one datagram of [`DEFAULT_MTU`] bytes.
    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
        /// Largest accepted payload.
        max: usize,
    },
}

/// An immutable data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    seq: SeqBit,
    digest: PacketDigest,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, computing its digest.
    pub fn new(seq: SeqBit, payload: Vec<u8>) -> Self {
        let digest = packet_digest(seq.as_byte(), &payload);
        Self { seq, digest, payload }
    }

    /// Sequence bit.
    pub fn seq(&self) -> SeqBit {
        self.seq
    }

    /// Digest carried by this packet.
    pub fn digest(&self) -> PacketDigest {
        self.digest
    }

    /// Application payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.seq.as_byte());
        buf.extend_from_slice(&self.digest);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Result of decoding a well-sized datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Sequence bit found on the wire.
    pub seq: SeqBit,
    /// Payload bytes following the header.
    pub payload: Vec<u8>,
    /// Whether the carried digest matches the content.
    pub integrity_ok: bool,
}

/// Encode a packet for `seq` carrying `payload`.
pub fn encode(seq: SeqBit, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge { len: payload.len(), max: MAX_PAYLOAD });
    }
    Ok(Packet::new(seq, payload.to_vec()).to_bytes())
}

/// Decode a datagram.
///
/// Only a short datagram (or an invalid sequence byte) is an error. A digest
/// mismatch is reported through [`Decoded::integrity_ok`] so the caller can
/// decide to drop it.
pub fn decode(buf: &[u8]) -> Result<Decoded, PacketError> {
    if buf.len() < HEADER_LEN {
        return Err(PacketError::Malformed { len: buf.len() });
    }

    let seq = SeqBit::from_byte(buf[0]).ok_or(PacketError::Malformed { len: buf.len() })?;
    let carried = &buf[1..HEADER_LEN];
    let payload = buf[HEADER_LEN..].to_vec();
    let integrity_ok = carried == packet_digest(buf[0], &payload);

    Ok(Decoded { seq, payload, integrity_ok })
}

/// Encode an acknowledgment for `seq`.
#[inline]
pub fn encode_ack(seq: SeqBit) -> [u8; ACK_LEN] {
    [seq.as_byte()]
}

/// Interpret a datagram as an acknowledgment.
///
/// Returns `None` for anything that is not exactly one valid bit byte.
#[inline]
pub fn decode_ack(buf: &[u8]) -> Option<SeqBit> {
    match buf {
        [byte] => SeqBit::from_byte(*byte),
        _ => None,
    }
}
