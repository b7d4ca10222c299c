//! Content digests for the reliable-delivery layer.
//!
//! The packet digest is the first four bytes of SHA-256 over the sequence
//! byte followed by the payload. It detects corruption on the wire; it is
//! not an authenticator.

use sha2::{Digest, Sha256};

/// Length of the truncated digest carried in every packet.
pub const DIGEST_LEN: usize = 4;

/// Truncated packet digest.
pub type PacketDigest = [u8; DIGEST_LEN];

/// Compute the digest of `seq_byte ++ payload`.
pub fn packet_digest(seq_byte: u8, payload: &[u8]) -> PacketDigest {
    let mut hasher = Sha256::new();
    hasher.update([seq_byte]);
    hasher.update(payload);
    let full = hasher.finalize();

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&full[..DIGEST_LEN]);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(packet_digest(0, b"move up"), packet_digest(0, b"move up"));
    }

    #[test]
    fn test_digest_covers_sequence_byte() {
        assert_ne!(packet_digest(0, b"hint"), packet_digest(1, b"hint"));
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        assert_ne!(packet_digest(0, b"ab"), packet_digest(0, b"ba"));
    }
}
