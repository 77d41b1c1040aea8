//! In-memory wire pump between the two endpoints.
//!
//! Replaces the socket: pending output is drained from one endpoint in
//! 16 KiB chunks, each chunk is logged as a `wire_data` event with a hex
//! dump, and the bytes are staged on the peer's inbound buffer.

use crate::bridge::{SharedTrace, record};
use crate::endpoint::Endpoint;
use crate::error::SimError;

/// Largest slice moved (and logged) per pump step.
pub const PUMP_CHUNK: usize = 16 * 1024;

/// Hex dumps are elided beyond this many bytes.
pub const WIRE_DUMP_LIMIT: usize = 1024;

/// Move all pending wire bytes from `from` to `to`, logging one
/// `wire_data` event per chunk. Returns the number of bytes moved.
pub fn pump(from: &mut Endpoint, to: &mut Endpoint, trace: &SharedTrace) -> Result<usize, SimError> {
    let bytes = from.drain_outbound()?;
    for chunk in bytes.chunks(PUMP_CHUNK) {
        record(trace, from.side(), "wire_data", &hex_dump(chunk));
        to.push_inbound(chunk);
    }
    Ok(bytes.len())
}

/// Move pending bytes in both directions. Returns the combined count, so
/// the driver can detect a stalled handshake.
pub fn pump_both(
    client: &mut Endpoint,
    server: &mut Endpoint,
    trace: &SharedTrace,
) -> Result<usize, SimError> {
    let mut moved = pump(client, server, trace)?;
    moved += pump(server, client, trace)?;
    Ok(moved)
}

/// Space-separated uppercase hex dump, elided past [`WIRE_DUMP_LIMIT`].
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let shown = &bytes[..bytes.len().min(WIRE_DUMP_LIMIT)];
    // Three output chars per byte, plus the elision tail.
    let mut out = String::with_capacity(shown.len() * 3 + 32);
    for byte in shown {
        let _ = write!(out, "{byte:02X} ");
    }
    if bytes.len() > WIRE_DUMP_LIMIT {
        let _ = write!(out, "... ({} bytes)", bytes.len());
    }
    out
}
