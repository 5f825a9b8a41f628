//! Frame handling: validate and decode one complete QGC frame.
//!
//! ```text
//! +------+------+-----+----+-----------+---------------+----------+
//! | 0x51 | 0x47 | grp | id | len (LE)  | payload (len) | ck_a ck_b|
//! +------+------+-----+----+-----------+---------------+----------+
//! ```
//!
//! The checksum covers `grp`, `id`, `len` and the payload. [`parse`] is stateless and
//! is used both by [`crate::QgcReader`] and on its own for frames assembled elsewhere.

use crate::codec::{Codec, FrameParts};
use crate::error::{ParseError, QgcError};
use crate::message::QgcMessage;
use crate::types::{calc_checksum, MsgMode};

/// Sync bytes, `b"QG"`.
pub const QGC_HDR: [u8; 2] = [0x51, 0x47];
/// Sync, group, id and length.
pub const HEADER_LEN: usize = 6;
pub const CHECKSUM_LEN: usize = 2;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Check sync bytes, declared length and checksum before decoding.
    pub validate: bool,
    /// Layout table to decode with; `SetPoll` infers SET or POLL from the length.
    pub mode: MsgMode,
    /// Split bitfields into their members rather than keeping them as byte blobs.
    pub parse_bitfields: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions { validate: true, mode: MsgMode::Get, parse_bitfields: true }
    }
}

impl ParseOptions {
    /// Options with the mode given by its numeric code (0 GET, 1 SET, 2 POLL, 3 SETPOLL).
    pub fn with_mode_code(self, code: u8) -> Result<Self, ParseError> {
        Ok(ParseOptions { mode: MsgMode::try_from(code)?, ..self })
    }
}

/// Parse one complete frame against the built-in catalogue.
pub fn parse(frame: &[u8], options: &ParseOptions) -> Result<QgcMessage, QgcError> {
    let codec = Codec::builtin().with_bitfields(options.parse_bitfields);
    parse_with(&codec, frame, options.validate, options.mode)
}

/// Parse one complete frame with the given codec.
pub fn parse_with(codec: &Codec<'_>, frame: &[u8], validate: bool, mode: MsgMode) -> Result<QgcMessage, QgcError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(ParseError::FrameTooShort(frame.len()).into());
    }
    let split = frame.len() - CHECKSUM_LEN;
    let parts = FrameParts {
        msg_grp: frame[2],
        msg_id: frame[3],
        length: [frame[4], frame[5]],
        payload: &frame[HEADER_LEN..split],
        checksum: [frame[split], frame[split + 1]],
    };
    if validate {
        let sync = [frame[0], frame[1]];
        if sync != QGC_HDR {
            return Err(ParseError::InvalidHeader { found: sync, expected: QGC_HDR }.into());
        }
        let actual = u16::try_from(parts.payload.len()).unwrap_or(u16::MAX);
        if u16::from_le_bytes(parts.length) as usize != parts.payload.len() {
            return Err(ParseError::InvalidLength { found: parts.length, expected: actual.to_le_bytes() }.into());
        }
        let expected = calc_checksum(&frame[2..split]);
        if parts.checksum != expected {
            return Err(ParseError::InvalidChecksum { found: parts.checksum, expected }.into());
        }
    }
    codec.decode(&parts, mode)
}

/// True if the trailing two bytes match the checksum of everything after the sync bytes.
pub fn is_valid_checksum(frame: &[u8]) -> bool {
    if frame.len() < MIN_FRAME_LEN {
        return false;
    }
    let split = frame.len() - CHECKSUM_LEN;
    calc_checksum(&frame[2..split]) == frame[split..]
}
