// Newline-delimited line framing over TCP.
//
// Provides the wire format for the chat protocol: one logical command or
// notice per UTF-8 text line, terminated by `\n` (a trailing `\r` is
// tolerated for telnet-style clients). Both `write_line` and `read_line`
// operate on `std::io` traits — no async runtime, compatible with blocking
// TCP streams and buffered wrappers.
//
// A `MAX_LINE_BYTES` guard protects against unbounded buffering from a peer
// that never sends a newline. Chat lines are short; 4 KB is generous
// headroom for any command the protocol defines.
//
// Historically this protocol was framed by the transport itself: one
// fixed-size read was assumed to carry exactly one command, so pipelined
// commands arriving in a single segment were mis-parsed and split commands
// were lost. Reading up to a newline instead is a deliberate behavior
// change: several commands in one segment are each delivered, and a command
// split across segments is reassembled.

use std::io::{self, BufRead, Read, Write};

/// Maximum length of a single line, excluding the terminator. Reads are
/// capped slightly above this so an unterminated flood fails fast instead
/// of accumulating.
pub const MAX_LINE_BYTES: usize = 4096;

/// Write one line: the text followed by `\n`, then flush.
///
/// Rejects text containing an embedded newline — callers send multi-line
/// payloads (like the roster listing) as separate lines.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    if line.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("line too long: {} bytes (max {MAX_LINE_BYTES})", line.len()),
        ));
    }
    if line.contains('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "line contains an embedded newline",
        ));
    }
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read one line, stripping the trailing `\n` (and `\r`, if present).
///
/// Returns `Ok(None)` on clean EOF before any bytes arrive. A final line
/// terminated by EOF instead of a newline is still delivered. Returns
/// `InvalidData` for an over-long line or non-UTF-8 bytes.
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    // Cap the read; +2 leaves room for "\r\n" on a maximum-length line.
    let n = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 2)
        .read_until(b'\n', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    if buf.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line too long: over {MAX_LINE_BYTES} bytes"),
        ));
    }
    match String::from_utf8(buf) {
        Ok(line) => Ok(Some(line)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "line is not valid UTF-8",
        )),
    }
}
