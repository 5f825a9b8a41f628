//! Error taxonomy for the codec, the frame parser and the stream reader.
//!
//! | Error | Raised when |
//! |-------|-------------|
//! | [`StreamError`] | the byte source ends part way through a read, or fails |
//! | [`ParseError`] | a frame has a bad header, length or checksum, or an invalid mode is requested |
//! | [`MessageError`] | a known identity has no layout for the requested mode |
//! | [`TypeError`] | an attribute value cannot be converted to or from its declared type |
//!
//! [`QgcError`] wraps all four so callers can match on the category.

use crate::types::{escape_all, AttrKind, MsgMode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QgcError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("serial stream terminated unexpectedly: {requested} bytes requested, {returned} bytes returned")]
    Truncated { requested: usize, returned: usize },
    #[error("serial stream terminated unexpectedly: line requested, {returned} bytes returned")]
    TruncatedLine { returned: usize },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid message header {} - should be {}", escape_all(.found), escape_all(.expected))]
    InvalidHeader { found: [u8; 2], expected: [u8; 2] },
    #[error("invalid payload length {} - should be {}", escape_all(.found), escape_all(.expected))]
    InvalidLength { found: [u8; 2], expected: [u8; 2] },
    #[error("message checksum {} invalid - should be {}", escape_all(.found), escape_all(.expected))]
    InvalidChecksum { found: [u8; 2], expected: [u8; 2] },
    #[error("unknown protocol header {}", escape_all(.0))]
    UnknownHeader([u8; 2]),
    #[error("invalid message mode {0} - must be 0, 1, 2 or 3")]
    InvalidMode(u8),
    #[error("frame of {0} bytes is shorter than the 8 byte minimum")]
    FrameTooShort(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error(
        "unknown message type {}, mode {mode}. Check the message mode setting is appropriate for data stream",
        escape_ids(.msg_grp, .msg_id)
    )]
    UnknownMessage { msg_grp: u8, msg_id: u8, mode: MsgMode },
    #[error("unknown message identity {0}")]
    UnknownIdentity(String),
    #[error("payload of {0} bytes exceeds the 65535 byte frame limit")]
    PayloadTooLong(usize),
}

/// Attribute-level failure, located by message identity, mode and attribute name.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{cause} for attribute '{field}' in {mode} message {identity}")]
pub struct TypeError {
    pub identity: String,
    pub mode: MsgMode,
    pub field: String,
    pub cause: ConversionError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("unknown attribute type {0}")]
    UnknownType(String),
    #[error("incorrect type (expected {expected}, got {found})")]
    WrongKind { expected: AttrKind, found: &'static str },
    #[error("overflow error ({value} does not fit in {width} bytes)")]
    Overflow { value: String, width: usize },
    #[error("truncated payload ({needed} bytes needed, {available} left)")]
    Truncated { needed: usize, available: usize },
    #[error("invalid reference to '{0}' (missing or not a non-negative integer)")]
    BadReference(String),
}

fn escape_ids(msg_grp: &u8, msg_id: &u8) -> String {
    escape_all(&[*msg_grp, *msg_id])
}
