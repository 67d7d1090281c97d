//! Internet checksum (RFC 1071) and quoted-destination validation.
//!
//! The prober encodes the checksum of each target address into the probe's
//! source port (or the ICMP checksum field). Roughly 2% of replies quote a
//! corrupted destination, and comparing the two catches that.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{DissectError, Result};

/// Ones'-complement sum of big-endian 16-bit words, folded and inverted.
/// An odd trailing byte is padded with zero on the right.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

pub fn ipv4_destination_checksum(dest: Ipv4Addr) -> u16 {
    internet_checksum(&dest.octets())
}

pub fn ipv6_destination_checksum(dest: Ipv6Addr) -> u16 {
    internet_checksum(&dest.octets())
}

/// Compare a quoted destination's checksum against the port value the prober
/// stamped from it. Returns the computed checksum on a match.
pub fn verify_port(computed: u16, port: u16) -> Result<u16> {
    if computed == port {
        Ok(computed)
    } else {
        Err(DissectError::ChecksumMismatch { computed, port })
    }
}
