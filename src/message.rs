//! Immutable QGC message values and the builder that encodes them.
//!
//! A [`QgcMessage`] is produced either by decoding a frame ([`crate::parse`],
//! [`crate::Codec::decode`]) or by encoding named values through a
//! [`MessageBuilder`]. It exposes read-only accessors only; nothing can change a
//! message after construction:
//!
//! ```compile_fail
//! use qgcproto::{MsgMode, QgcMessage};
//!
//! let mut msg = QgcMessage::builder(0x03, 0x02, MsgMode::Set).build().unwrap();
//! msg.fields.clear();
//! ```

use crate::codec::{Codec, Overrides};
use crate::error::{MessageError, QgcError};
use crate::frame::QGC_HDR;
use crate::schema;
use crate::types::{escape_all, MsgMode};
use crate::value::{FieldKey, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct QgcMessage {
    pub(crate) msg_grp: u8,
    pub(crate) msg_id: u8,
    pub(crate) mode: MsgMode,
    pub(crate) identity: String,
    pub(crate) nominal: bool,
    pub(crate) length: [u8; 2],
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) checksum: [u8; 2],
    pub(crate) fields: Vec<(FieldKey, Value)>,
}

impl QgcMessage {
    /// Start building a message for `(group, id)` in the given mode.
    pub fn builder(msg_grp: u8, msg_id: u8, mode: MsgMode) -> MessageBuilder {
        MessageBuilder::new(msg_grp, msg_id, mode)
    }

    /// Start building a message by identity name, e.g. `"CFG-CAN"`.
    pub fn builder_for(identity: &str, mode: MsgMode) -> Option<MessageBuilder> {
        schema::msg_ids(identity).map(|(grp, id)| MessageBuilder::new(grp, id, mode))
    }

    pub fn msg_grp(&self) -> u8 {
        self.msg_grp
    }

    pub fn msg_id(&self) -> u8 {
        self.msg_id
    }

    pub fn mode(&self) -> MsgMode {
        self.mode
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True when the identity was not in the catalogue and the payload was decoded
    /// with the nominal layout.
    pub fn is_nominal(&self) -> bool {
        self.nominal
    }

    pub fn length(&self) -> u16 {
        u16::from_le_bytes(self.length)
    }

    pub fn length_bytes(&self) -> [u8; 2] {
        self.length
    }

    pub fn checksum(&self) -> [u8; 2] {
        self.checksum
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Attribute by display name, e.g. `"prn"` or `"svid_03"`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.get_key(&FieldKey::parse(key))
    }

    pub fn get_key(&self, key: &FieldKey) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// All attributes in payload order.
    pub fn fields(&self) -> &[(FieldKey, Value)] {
        &self.fields
    }

    /// Every repetition of a grouped attribute, with its group indices.
    pub fn indexed<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a [u16], &'a Value)> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.name == name && !k.indices.is_empty())
            .map(|(k, v)| (k.indices.as_slice(), v))
    }

    /// Full frame bytes: sync, group, id, length, payload, checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let payload = self.payload.as_deref().unwrap_or_default();
        let mut out = Vec::with_capacity(payload.len() + 8);
        out.extend_from_slice(&QGC_HDR);
        out.push(self.msg_grp);
        out.push(self.msg_id);
        out.extend_from_slice(&self.length);
        out.extend_from_slice(payload);
        out.extend_from_slice(&self.checksum);
        out
    }
}

/// `<QGC(RAW-PPPB2B, msgver=1, prn=60, ...)>`; nominal messages show the escaped payload.
impl fmt::Display for QgcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<QGC({}", self.identity)?;
        match &self.payload {
            None => {}
            Some(payload) if self.nominal => write!(f, ", payload={}", escape_all(payload))?,
            Some(_) => {
                for (key, value) in &self.fields {
                    write!(f, ", {}={}", key, value)?;
                }
            }
        }
        f.write_str(")>")
    }
}

/// Named values plus optional explicit length/checksum, encoded on [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    msg_grp: u8,
    msg_id: u8,
    mode: MsgMode,
    values: HashMap<String, Value>,
    overrides: Overrides,
    parse_bitfields: bool,
}

impl MessageBuilder {
    pub fn new(msg_grp: u8, msg_id: u8, mode: MsgMode) -> Self {
        MessageBuilder {
            msg_grp,
            msg_id,
            mode,
            values: HashMap::new(),
            overrides: Overrides::default(),
            parse_bitfields: true,
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.values
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn length(mut self, length: u16) -> Self {
        self.overrides.length = Some(length);
        self
    }

    pub fn checksum(mut self, checksum: [u8; 2]) -> Self {
        self.overrides.checksum = Some(checksum);
        self
    }

    /// When off, bitfields are supplied whole as byte blobs under the bitfield's name.
    pub fn parse_bitfields(mut self, parse_bitfields: bool) -> Self {
        self.parse_bitfields = parse_bitfields;
        self
    }

    /// Encode against the built-in catalogue.
    pub fn build(&self) -> Result<QgcMessage, QgcError> {
        self.build_with(&Codec::builtin())
    }

    pub fn build_with(&self, codec: &Codec<'_>) -> Result<QgcMessage, QgcError> {
        codec.with_bitfields(self.parse_bitfields).encode_with(
            self.msg_grp,
            self.msg_id,
            self.mode,
            &self.values,
            self.overrides,
        )
    }
}

impl TryFrom<MessageBuilder> for QgcMessage {
    type Error = QgcError;

    fn try_from(builder: MessageBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Look up `(group, id)` for an identity in the built-in catalogue.
pub fn ids_for(identity: &str) -> Result<(u8, u8), MessageError> {
    schema::msg_ids(identity).ok_or(MessageError::UnknownIdentity(identity.to_string()))
}
