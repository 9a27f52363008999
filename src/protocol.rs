//! Newline-delimited line protocol.
//!
//! Clients send arbitrary lines terminated by `\n`. Every line is accepted
//! and logged. The exact line `eof\n` is the sentinel and is acknowledged
//! with a fixed response; nothing else is ever answered.
//!
//! ```text
//! Request:  hello\n          (no response)
//! Request:  eof\n
//! Response: RESP: received all of the request\n
//! ```

/// Line that triggers the acknowledgment.
pub const SENTINEL: &[u8] = b"eof\n";

/// Acknowledgment written for every sentinel line.
pub const RESPONSE: &[u8] = b"RESP: received all of the request\n";

/// Parsed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// The sentinel line.
    Sentinel,
    /// Any other line.
    Line,
}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A full line with the bytes consumed, including the `\n`.
    Complete(Command, usize),
    /// No newline buffered yet.
    Incomplete,
}

/// Frame one line from the front of the input buffer.
///
/// The first `scanned` bytes are known to hold no newline and are not
/// searched again.
pub fn parse(input: &[u8], scanned: usize) -> ParseResult {
    let start = scanned.min(input.len());
    let line_end = match find_lf(&input[start..]) {
        Some(pos) => start + pos,
        None => return ParseResult::Incomplete,
    };

    let consumed = line_end + 1;
    let command = if &input[..consumed] == SENTINEL {
        Command::Sentinel
    } else {
        Command::Line
    };

    ParseResult::Complete(command, consumed)
}

fn find_lf(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}
