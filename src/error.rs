use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong while dissecting a single reply.
///
/// Only the header-level variants are fatal for a packet. The quote-level
/// variants end up on the response record instead (see `ProbeEcho::issue`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum DissectError {
    #[error("packet truncated: need {needed} bytes at offset {offset}, have {available}")]
    TruncatedPacket {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    #[error("not an ICMP packet (next header {0})")]
    NotIcmp(u8),

    /// The quoted probe could not be decoded: its protocol is not one we
    /// send, the quote is cut short, or (IPv6) it carries an extension chain
    /// we do not unwind. `None` when even the quoted protocol is unreadable.
    #[error("unusable quote (protocol {})", .0.map_or_else(|| "unreadable".to_string(), |p| p.to_string()))]
    UnknownQuoteProtocol(Option<u8>),

    #[error("quoted destination checksum {computed:#06x} does not match port {port:#06x}")]
    ChecksumMismatch { computed: u16, port: u16 },

    #[error("fingerprint {index} outside node list of {len}")]
    FingerprintOutOfRange { index: u32, len: usize },
}

impl DissectError {
    /// Whether the packet must be dropped without producing a record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DissectError::TruncatedPacket { .. }
                | DissectError::UnsupportedVersion(_)
                | DissectError::NotIcmp(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DissectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let truncated = DissectError::TruncatedPacket {
            offset: 20,
            needed: 8,
            available: 3,
        };
        assert!(truncated.is_fatal());
        assert!(DissectError::NotIcmp(6).is_fatal());
        assert!(!DissectError::UnknownQuoteProtocol(Some(47)).is_fatal());
        assert!(!DissectError::ChecksumMismatch { computed: 1, port: 2 }.is_fatal());
    }

    #[test]
    fn test_unknown_quote_display() {
        assert_eq!(
            DissectError::UnknownQuoteProtocol(Some(47)).to_string(),
            "unusable quote (protocol 47)"
        );
        assert_eq!(
            DissectError::UnknownQuoteProtocol(None).to_string(),
            "unusable quote (protocol unreadable)"
        );
    }

    #[test]
    fn test_display() {
        let err = DissectError::ChecksumMismatch {
            computed: 0xbeef,
            port: 0x1234,
        };
        assert_eq!(
            err.to_string(),
            "quoted destination checksum 0xbeef does not match port 0x1234"
        );
    }
}
