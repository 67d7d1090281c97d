use crate::error::Result;
use crate::probe::view::PacketView;
use crate::state::ScanPayload;

/// Signature the prober writes at the start of every payload ("\x06Sca")
pub const SCAN_SIGNATURE: u32 = 0x0653_6361;

/// Decode a scan payload from the start of `view`
pub fn decode_payload(view: &PacketView<'_>) -> Result<ScanPayload> {
    let bytes = view.slice(0, ScanPayload::LEN)?;
    Ok(ScanPayload {
        signature: bytes.u32_at(0)?,
        target: bytes.ipv6_at(4)?,
        instance: bytes.u8_at(20)?,
        ttl: bytes.u8_at(21)?,
        diff: bytes.u32_at(24)?,
        fingerprint: bytes.u32_at(28)?,
    })
}
