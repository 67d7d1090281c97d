//! RFC 4884 ICMP extension parsing, MPLS label stack objects only (RFC 4950).

use tracing::trace;

use crate::probe::view::{ICMP_HEADER_LEN, IcmpHeader, PacketView};
use crate::state::MplsLabel;

/// Deepest label stack we decode
pub const MAX_MPLS_STACK_HEIGHT: usize = 4;

// Legacy ICMP implementations pad the original datagram to 128 bytes
const MIN_ORIGINAL_DATAGRAM: usize = 128;
// Version/reserved/checksum
const EXTENSION_HEADER_LEN: usize = 4;
// Object length field, skipped: we trust the bottom-of-stack bit instead
const OBJECT_LENGTH_LEN: usize = 2;
const MPLS_LABEL_STACK_CLASS: u8 = 1;
const MPLS_LABEL_STACK_TYPE: u8 = 1;

/// Extract the MPLS label stack from an ICMP error, if it carries one.
///
/// `icmp` must start at the ICMP header and run to the end of the received
/// buffer. `reply_size` is the outer IP total length; the extension is only
/// looked for when it says there are bytes past the quoted datagram.
///
/// Returns `None` when there is no extension, the first object is not an
/// MPLS label stack (class 1, type 1), or not a single entry fits.
pub fn parse_mpls_extension(
    icmp: &PacketView<'_>,
    header: &IcmpHeader,
    reply_size: u16,
) -> Option<Vec<MplsLabel>> {
    let length = header.extension_length();
    if length == 0 || reply_size as usize <= length + ICMP_HEADER_LEN {
        return None;
    }

    let object = ICMP_HEADER_LEN + length.max(MIN_ORIGINAL_DATAGRAM) + EXTENSION_HEADER_LEN;
    let class_offset = object + OBJECT_LENGTH_LEN;
    let class = icmp.u8_at(class_offset).ok()?;
    let ctype = icmp.u8_at(class_offset + 1).ok()?;
    if class != MPLS_LABEL_STACK_CLASS || ctype != MPLS_LABEL_STACK_TYPE {
        trace!(class, ctype, "ICMP extension object is not an MPLS label stack");
        return None;
    }

    let mut labels = Vec::with_capacity(MAX_MPLS_STACK_HEIGHT);
    let mut offset = class_offset + 2;
    for _ in 0..MAX_MPLS_STACK_HEIGHT {
        let Ok(entry) = icmp.bytes(offset, 4) else {
            break;
        };
        let label = MplsLabel::from_bytes(&[entry[0], entry[1], entry[2], entry[3]]);
        labels.push(label);
        if label.bottom {
            break;
        }
        offset += 4;
    }

    if labels.is_empty() { None } else { Some(labels) }
}
