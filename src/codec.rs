//! Encode/decode QGC payloads by walking a [`MessageSchema`].
//!
//! Decoding turns payload bytes into an ordered list of `(FieldKey, Value)` pairs;
//! encoding goes the other way from named values, filling anything omitted with the
//! nominal zero/blank value of its type. Both walks track the byte offset, one
//! 1-based index per enclosing repeating group (appended to attribute names as
//! `_NN`), and the values produced so far, so counts and widths can refer back to
//! earlier attributes.
//!
//! A count or width reference resolves against the current group indices first,
//! then each enclosing level out to the top of the message.

use crate::ast::{
    fixed_size, group_declares, Bitfield, Catalogue, FieldSchema, Group, MessageSchema, RepeatCount, Scalar,
    NOMINAL_SCHEMA,
};
use crate::error::{ConversionError, MessageError, QgcError, TypeError};
use crate::message::QgcMessage;
use crate::schema::{self, nominal_identity};
use crate::types::{
    bytes_to_value, calc_checksum, nominal_value, scale_value, unscale, value_to_bytes, AttrKind, MsgMode, Width,
};
use crate::value::{FieldKey, Value};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use std::collections::HashMap;
use std::io::Cursor;

/// Raw sections of one frame, as split out by the frame parser.
#[derive(Debug, Clone, Copy)]
pub struct FrameParts<'a> {
    pub msg_grp: u8,
    pub msg_id: u8,
    pub length: [u8; 2],
    pub payload: &'a [u8],
    pub checksum: [u8; 2],
}

/// Length and checksum to use on encode instead of the computed ones. An explicit
/// length also picks length-selected variants and sizes `len - n` attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub length: Option<u16>,
    pub checksum: Option<[u8; 2]>,
}

#[derive(Debug, Clone, Copy)]
pub struct Codec<'c> {
    catalogue: &'c Catalogue,
    parse_bitfields: bool,
}

impl Codec<'static> {
    /// Codec over the built-in catalogue.
    pub fn builtin() -> Self {
        Codec::new(schema::builtin())
    }
}

impl Default for Codec<'static> {
    fn default() -> Self {
        Codec::builtin()
    }
}

impl<'c> Codec<'c> {
    pub fn new(catalogue: &'c Catalogue) -> Self {
        Codec { catalogue, parse_bitfields: true }
    }

    /// When off, each bitfield is kept whole as a byte blob under the bitfield's name.
    pub fn with_bitfields(mut self, parse_bitfields: bool) -> Self {
        self.parse_bitfields = parse_bitfields;
        self
    }

    pub fn catalogue(&self) -> &'c Catalogue {
        self.catalogue
    }

    pub fn parse_bitfields(&self) -> bool {
        self.parse_bitfields
    }

    /// Decode the payload of one frame. Length and checksum bytes are kept as given.
    pub fn decode(&self, parts: &FrameParts<'_>, mode: MsgMode) -> Result<QgcMessage, QgcError> {
        let declared = u16::from_le_bytes(parts.length) as usize;
        let target = self.resolve(parts.msg_grp, parts.msg_id, mode, Some(declared))?;
        let payload = if declared == 0 { &[][..] } else { parts.payload };
        let fields = if payload.is_empty() {
            Vec::new()
        } else {
            let mut ctx = DecodeContext::new(payload, declared);
            self.decode_fields(&target.schema.fields, &mut ctx, &target)?;
            if ctx.remaining() > 0 {
                debug!(
                    "{} {}: {} trailing payload bytes not covered by {}",
                    target.mode,
                    target.identity,
                    ctx.remaining(),
                    target.schema.name
                );
            }
            ctx.scope.fields
        };
        Ok(QgcMessage {
            msg_grp: parts.msg_grp,
            msg_id: parts.msg_id,
            mode: target.mode,
            identity: target.identity,
            nominal: target.nominal,
            length: parts.length,
            payload: (!payload.is_empty()).then(|| payload.to_vec()),
            checksum: parts.checksum,
            fields,
        })
    }

    /// Decode a bare payload, computing length and checksum.
    pub fn decode_payload(
        &self,
        msg_grp: u8,
        msg_id: u8,
        mode: MsgMode,
        payload: &[u8],
    ) -> Result<QgcMessage, QgcError> {
        let length = payload_length(payload)?.to_le_bytes();
        let checksum = frame_checksum(msg_grp, msg_id, length, payload);
        self.decode(&FrameParts { msg_grp, msg_id, length, payload, checksum }, mode)
    }

    /// Build a message from named values, e.g. `"svid_02"` for the second repetition.
    pub fn encode(
        &self,
        msg_grp: u8,
        msg_id: u8,
        mode: MsgMode,
        values: &HashMap<String, Value>,
    ) -> Result<QgcMessage, QgcError> {
        self.encode_with(msg_grp, msg_id, mode, values, Overrides::default())
    }

    pub fn encode_with(
        &self,
        msg_grp: u8,
        msg_id: u8,
        mode: MsgMode,
        values: &HashMap<String, Value>,
        overrides: Overrides,
    ) -> Result<QgcMessage, QgcError> {
        let declared = overrides.length.map(usize::from);
        let target = self.resolve(msg_grp, msg_id, mode, declared)?;
        let mut ctx = EncodeContext {
            supplied: values.iter().map(|(k, v)| (FieldKey::parse(k), v)).collect(),
            out: Vec::new(),
            declared_len: declared,
            scope: Scope::default(),
        };
        self.encode_fields(&target.schema.fields, &mut ctx, &target)?;

        let payload = ctx.out;
        let length = match overrides.length {
            Some(len) => len,
            None => payload_length(&payload)?,
        }
        .to_le_bytes();
        let checksum = overrides
            .checksum
            .unwrap_or_else(|| frame_checksum(msg_grp, msg_id, length, &payload));
        Ok(QgcMessage {
            msg_grp,
            msg_id,
            mode: target.mode,
            identity: target.identity,
            nominal: target.nominal,
            length,
            payload: (!payload.is_empty()).then_some(payload),
            checksum,
            fields: ctx.scope.fields,
        })
    }

    /// Identity, concrete mode and layout for a `(group, id)` pair.
    fn resolve(
        &self,
        msg_grp: u8,
        msg_id: u8,
        mode: MsgMode,
        declared_len: Option<usize>,
    ) -> Result<Target<'c>, QgcError> {
        let mode = match (mode, declared_len) {
            (MsgMode::SetPoll, Some(len)) => self.catalogue.input_mode(msg_grp, msg_id, len),
            (MsgMode::SetPoll, None) => MsgMode::Set,
            (m, _) => m,
        };
        let unknown = || MessageError::UnknownMessage { msg_grp, msg_id, mode };
        match self.catalogue.identity(msg_grp, msg_id) {
            Some(identity) => {
                let schema = self
                    .catalogue
                    .select(mode, identity, declared_len)
                    .ok_or_else(unknown)?;
                Ok(Target { identity: identity.to_string(), mode, schema, nominal: false })
            }
            None => {
                debug!("no identity for {:02x}{:02x}, using {}", msg_grp, msg_id, NOMINAL_SCHEMA);
                let schema = self
                    .catalogue
                    .get_schema(MsgMode::Get, NOMINAL_SCHEMA)
                    .ok_or_else(unknown)?;
                Ok(Target { identity: nominal_identity(msg_grp, msg_id), mode, schema, nominal: true })
            }
        }
    }

    fn decode_fields(
        &self,
        fields: &[FieldSchema],
        ctx: &mut DecodeContext<'_>,
        target: &Target<'_>,
    ) -> Result<(), QgcError> {
        for (i, field) in fields.iter().enumerate() {
            match field {
                FieldSchema::Scalar(s) => self.decode_scalar(s, ctx, target)?,
                FieldSchema::Bitfield(b) if self.parse_bitfields => self.decode_bitfield(b, ctx, target)?,
                FieldSchema::Bitfield(b) => {
                    let key = ctx.scope.key(&b.name);
                    let raw = ctx.take(b.size).map_err(|e| target.error(&key, e))?;
                    ctx.scope.set(key, Value::Bytes(raw.to_vec()));
                }
                FieldSchema::Group(g) => self.decode_group(g, &fields[i + 1..], ctx, target)?,
            }
        }
        Ok(())
    }

    fn decode_scalar(&self, s: &Scalar, ctx: &mut DecodeContext<'_>, target: &Target<'_>) -> Result<(), QgcError> {
        let key = ctx.scope.key(&s.name);
        let width = match &s.attr.width {
            Width::Fixed(n) => *n,
            Width::PerField { field, multiplier } => ctx
                .scope
                .count(field)
                .map_err(|e| target.error(&key, e))?
                .saturating_mul(*multiplier),
            Width::LengthMinus(offset) => ctx.declared_len.checked_sub(*offset).ok_or_else(|| {
                target.error(&key, ConversionError::Truncated { needed: *offset, available: ctx.declared_len })
            })?,
            Width::Remaining => ctx.remaining(),
        };
        let raw = ctx.take(width).map_err(|e| target.error(&key, e))?;
        let mut value = bytes_to_value(raw, s.attr.kind).map_err(|e| target.error(&key, e))?;
        if let Some(scale) = s.scale {
            value = unscale(&value, scale);
        }
        ctx.scope.set(key, value);
        Ok(())
    }

    fn decode_bitfield(&self, b: &Bitfield, ctx: &mut DecodeContext<'_>, target: &Target<'_>) -> Result<(), QgcError> {
        let key = ctx.scope.key(&b.name);
        let raw = ctx.take(b.size).map_err(|e| target.error(&key, e))?;
        let word = LittleEndian::read_uint(raw, b.size);
        let mut offset = 0u32;
        for member in &b.members {
            let bits = (word >> offset) & bit_mask(member.bits);
            offset += member.bits;
            if member.is_reserved() {
                continue;
            }
            let value = Value::UInt(bits.into());
            let value = match member.scale {
                Some(scale) => unscale(&value, scale),
                None => value,
            };
            let key = ctx.scope.key(&member.name);
            ctx.scope.set(key, value);
        }
        Ok(())
    }

    fn decode_group(
        &self,
        g: &Group,
        following: &[FieldSchema],
        ctx: &mut DecodeContext<'_>,
        target: &Target<'_>,
    ) -> Result<(), QgcError> {
        let count = match &g.count {
            RepeatCount::Fixed(n) => *n,
            RepeatCount::Field(name) => ctx.scope.count(name).map_err(|e| target.error(&g.name, e))?,
            RepeatCount::UntilExhausted => {
                let per_item = fixed_size(&g.fields).unwrap_or(1).max(1);
                let trailing = fixed_size(following).unwrap_or(0);
                ctx.remaining().saturating_sub(trailing) / per_item
            }
        };
        let count = group_count(count).map_err(|e| target.error(&g.name, e))?;
        ctx.scope.indices.push(0);
        for i in 1..=count {
            ctx.scope.enter(i);
            self.decode_fields(&g.fields, ctx, target)?;
        }
        ctx.scope.indices.pop();
        Ok(())
    }

    fn encode_fields(
        &self,
        fields: &[FieldSchema],
        ctx: &mut EncodeContext<'_>,
        target: &Target<'_>,
    ) -> Result<(), QgcError> {
        for field in fields {
            match field {
                FieldSchema::Scalar(s) => self.encode_scalar(s, ctx, target)?,
                FieldSchema::Bitfield(b) if self.parse_bitfields => self.encode_bitfield(b, ctx, target)?,
                FieldSchema::Bitfield(b) => {
                    let key = ctx.scope.key(&b.name);
                    let value = ctx
                        .supplied
                        .get(&key)
                        .map(|v| (*v).clone())
                        .unwrap_or_else(|| nominal_value(AttrKind::Bytes, b.size));
                    let bytes = value_to_bytes(&value, AttrKind::Bytes, b.size).map_err(|e| target.error(&key, e))?;
                    ctx.out.extend_from_slice(&bytes);
                    ctx.scope.set(key, value);
                }
                FieldSchema::Group(g) => self.encode_group(g, ctx, target)?,
            }
        }
        Ok(())
    }

    fn encode_scalar(&self, s: &Scalar, ctx: &mut EncodeContext<'_>, target: &Target<'_>) -> Result<(), QgcError> {
        let key = ctx.scope.key(&s.name);
        let supplied = ctx.supplied.get(&key).copied();
        let width = match &s.attr.width {
            Width::Fixed(n) => Some(*n),
            Width::PerField { field, multiplier } => Some(
                ctx.scope
                    .count(field)
                    .map_err(|e| target.error(&key, e))?
                    .saturating_mul(*multiplier),
            ),
            Width::LengthMinus(offset) => ctx.declared_len.map(|len| len.saturating_sub(*offset)),
            Width::Remaining => None,
        }
        .or(supplied.map(Value::byte_len))
        .unwrap_or(0);

        let value = supplied.cloned().unwrap_or_else(|| nominal_value(s.attr.kind, width));
        let wire = match s.scale {
            Some(scale) => scale_value(&value, scale, s.attr.kind).map_err(|e| target.error(&key, e))?,
            None => value.clone(),
        };
        let bytes = value_to_bytes(&wire, s.attr.kind, width).map_err(|e| target.error(&key, e))?;
        trace!("{} -> {} bytes", key, bytes.len());
        ctx.out.extend_from_slice(&bytes);
        ctx.scope.set(key, value);
        Ok(())
    }

    fn encode_bitfield(&self, b: &Bitfield, ctx: &mut EncodeContext<'_>, target: &Target<'_>) -> Result<(), QgcError> {
        let mut word = 0u64;
        let mut offset = 0u32;
        for member in &b.members {
            let key = ctx.scope.key(&member.name);
            let value = ctx.supplied.get(&key).map(|v| (*v).clone());
            let wire = match (&value, member.scale) {
                (None, _) => Value::UInt(0),
                (Some(v), Some(scale)) => scale_value(v, scale, AttrKind::Unsigned).map_err(|e| target.error(&key, e))?,
                (Some(v), None) => v.clone(),
            };
            let bits = match wire {
                Value::UInt(_) | Value::Int(_) => wire.as_u64().filter(|&v| v <= bit_mask(member.bits)),
                _ => {
                    let cause = ConversionError::WrongKind { expected: AttrKind::Unsigned, found: wire.kind_name() };
                    return Err(target.error(&key, cause));
                }
            }
            .ok_or_else(|| {
                let cause = ConversionError::Overflow {
                    value: format!("{} ({} bits)", wire, member.bits),
                    width: b.size,
                };
                target.error(&key, cause)
            })?;
            word |= bits << offset;
            offset += member.bits;
            if !member.is_reserved() {
                ctx.scope.set(key, value.unwrap_or(Value::UInt(0)));
            }
        }
        let mut buf = vec![0u8; b.size];
        LittleEndian::write_uint(&mut buf, word, b.size);
        ctx.out.extend_from_slice(&buf);
        Ok(())
    }

    fn encode_group(&self, g: &Group, ctx: &mut EncodeContext<'_>, target: &Target<'_>) -> Result<(), QgcError> {
        let count = match &g.count {
            RepeatCount::Fixed(n) => *n,
            RepeatCount::Field(name) => ctx.scope.count(name).map_err(|e| target.error(&g.name, e))?,
            RepeatCount::UntilExhausted => ctx.supplied_repeats(g),
        };
        let count = group_count(count).map_err(|e| target.error(&g.name, e))?;
        ctx.scope.indices.push(0);
        for i in 1..=count {
            ctx.scope.enter(i);
            self.encode_fields(&g.fields, ctx, target)?;
        }
        ctx.scope.indices.pop();
        Ok(())
    }
}

/// Where a walk is going: resolved identity, concrete mode and layout.
struct Target<'s> {
    identity: String,
    mode: MsgMode,
    schema: &'s MessageSchema,
    nominal: bool,
}

impl Target<'_> {
    fn error(&self, field: &dyn std::fmt::Display, cause: ConversionError) -> QgcError {
        TypeError { identity: self.identity.clone(), mode: self.mode, field: field.to_string(), cause }.into()
    }
}

/// Values produced so far, in walk order, addressable by key.
#[derive(Default)]
struct Scope {
    indices: Vec<u16>,
    fields: Vec<(FieldKey, Value)>,
    positions: HashMap<FieldKey, usize>,
}

impl Scope {
    fn key(&self, name: &str) -> FieldKey {
        FieldKey::new(name, self.indices.clone())
    }

    fn enter(&mut self, index: u16) {
        if let Some(last) = self.indices.last_mut() {
            *last = index;
        }
    }

    fn set(&mut self, key: FieldKey, value: Value) {
        match self.positions.get(&key) {
            Some(&i) => self.fields[i].1 = value,
            None => {
                self.positions.insert(key.clone(), self.fields.len());
                self.fields.push((key, value));
            }
        }
    }

    /// Innermost value named `name`, searching outwards through the group levels.
    fn get(&self, name: &str) -> Option<&Value> {
        (0..=self.indices.len()).rev().find_map(|depth| {
            let key = FieldKey::new(name, self.indices[..depth].to_vec());
            self.positions.get(&key).map(|&i| &self.fields[i].1)
        })
    }

    fn count(&self, name: &str) -> Result<usize, ConversionError> {
        self.get(name)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ConversionError::BadReference(name.to_string()))
    }
}

struct DecodeContext<'a> {
    cursor: Cursor<&'a [u8]>,
    declared_len: usize,
    scope: Scope,
}

impl<'a> DecodeContext<'a> {
    fn new(payload: &'a [u8], declared_len: usize) -> Self {
        DecodeContext { cursor: Cursor::new(payload), declared_len, scope: Scope::default() }
    }

    fn remaining(&self) -> usize {
        self.cursor
            .get_ref()
            .len()
            .saturating_sub(self.cursor.position() as usize)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ConversionError> {
        let available = self.remaining();
        if n > available {
            return Err(ConversionError::Truncated { needed: n, available });
        }
        let start = self.cursor.position() as usize;
        let buf: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + n) as u64);
        Ok(&buf[start..start + n])
    }
}

struct EncodeContext<'v> {
    supplied: HashMap<FieldKey, &'v Value>,
    out: Vec<u8>,
    declared_len: Option<usize>,
    scope: Scope,
}

impl EncodeContext<'_> {
    /// Highest index supplied for any attribute directly inside `g` at the current level.
    fn supplied_repeats(&self, g: &Group) -> usize {
        let depth = self.scope.indices.len();
        self.supplied
            .keys()
            .filter(|k| k.indices.len() == depth + 1 && k.indices[..depth] == self.scope.indices[..])
            .filter(|k| group_declares(g, &k.name))
            .map(|k| usize::from(k.indices[depth]))
            .max()
            .unwrap_or(0)
    }
}

fn bit_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn group_count(count: usize) -> Result<u16, ConversionError> {
    u16::try_from(count).map_err(|_| ConversionError::Overflow { value: count.to_string(), width: 2 })
}

fn payload_length(payload: &[u8]) -> Result<u16, MessageError> {
    u16::try_from(payload.len()).map_err(|_| MessageError::PayloadTooLong(payload.len()))
}

/// Checksum over group, id, length and payload.
pub(crate) fn frame_checksum(msg_grp: u8, msg_id: u8, length: [u8; 2], payload: &[u8]) -> [u8; 2] {
    let mut content = Vec::with_capacity(payload.len() + 4);
    content.extend_from_slice(&[msg_grp, msg_id, length[0], length[1]]);
    content.extend_from_slice(payload);
    calc_checksum(&content)
}
