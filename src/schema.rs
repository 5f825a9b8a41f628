//! The built-in message catalogue and identity helpers.
//!
//! The catalogue source ships inside the crate (`catalogue.qgc`) and is parsed and
//! resolved once, on first use.

use crate::ast::Catalogue;
use crate::parser;
use crate::types::MsgMode;
use std::sync::LazyLock;

/// Source of the built-in catalogue.
pub const BUILTIN_SOURCE: &str = include_str!("catalogue.qgc");

static BUILTIN: LazyLock<Catalogue> = LazyLock::new(|| {
    let defs = parser::parse(BUILTIN_SOURCE)
        .unwrap_or_else(|e| panic!("built-in catalogue does not parse: {}", e));
    Catalogue::resolve(defs).unwrap_or_else(|e| panic!("built-in catalogue is invalid: {}", e))
});

/// The resolved built-in catalogue.
pub fn builtin() -> &'static Catalogue {
    &BUILTIN
}

/// Parse and resolve catalogue source, e.g. a receiver-specific extension of [`BUILTIN_SOURCE`].
pub fn load(source: &str) -> Result<Catalogue, String> {
    Catalogue::resolve(parser::parse(source)?)
}

/// Identity synthesized for `(group, id)` pairs missing from the identity table.
pub fn nominal_identity(msg_grp: u8, msg_id: u8) -> String {
    format!("UNKNOWN-{:02x}{:02x}-NOMINAL", msg_grp, msg_id)
}

/// Identity of a `(group, id)` pair in the built-in catalogue, synthesized if unknown.
pub fn identity(msg_grp: u8, msg_id: u8) -> String {
    builtin()
        .identity(msg_grp, msg_id)
        .map(str::to_string)
        .unwrap_or_else(|| nominal_identity(msg_grp, msg_id))
}

pub fn msg_ids(identity: &str) -> Option<(u8, u8)> {
    builtin().msg_ids(identity)
}

/// Fixed payload length of a built-in layout, `None` if variable.
pub fn payload_len(name: &str, mode: MsgMode) -> Option<usize> {
    builtin().payload_len(name, mode)
}

/// SET or POLL, inferred from the payload length of an input message.
pub fn input_mode(msg_grp: u8, msg_id: u8, len: usize) -> MsgMode {
    builtin().input_mode(msg_grp, msg_id, len)
}
