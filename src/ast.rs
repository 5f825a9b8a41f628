//! Schema tree for QGC payloads, and the resolved [`Catalogue`] the codec walks.
//!
//! A catalogue source parses into [`Definitions`]: an identity table mapping
//! `(group, id)` byte pairs to names, plus message layouts declared per mode. Layouts
//! are either field lists or aliases of another mode's layout, and may be declared as
//! length-selected variants of a base layout. [`Catalogue::resolve`] validates all of it
//! and builds the lookup tables.

use crate::types::{AttrKind, MsgMode, Width};
use std::collections::HashMap;

/// Bitfield members starting with this prefix are decoded for offset correctness but
/// never exposed as attributes.
pub const RESERVED_PREFIX: &str = "reserved";

/// Layout used for any `(group, id)` missing from the identity table.
pub const NOMINAL_SCHEMA: &str = "QGC-NOMINAL";

/// Parsed, unvalidated catalogue source.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub identities: Vec<IdentityDecl>,
    pub messages: Vec<MessageDecl>,
}

#[derive(Debug, Clone)]
pub struct IdentityDecl {
    pub msg_grp: u8,
    pub msg_id: u8,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct MessageDecl {
    pub mode: MsgMode,
    pub name: String,
    /// Base layout this one stands in for when the payload length matches.
    pub variant_of: Option<String>,
    pub body: MessageBody,
}

#[derive(Debug, Clone)]
pub enum MessageBody {
    Fields(Vec<FieldSchema>),
    /// Reuse the layout declared under another mode/name.
    Alias { mode: MsgMode, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSchema {
    Scalar(Scalar),
    Bitfield(Bitfield),
    Group(Group),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub name: String,
    pub attr: crate::types::AttrType,
    /// Wire value = attribute value * scale.
    pub scale: Option<f64>,
}

/// Fixed-width byte field split into bit-level members, packed from the least
/// significant bit of the little-endian word.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitfield {
    pub name: String,
    pub size: usize,
    pub members: Vec<BitMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitMember {
    pub name: String,
    pub bits: u32,
    pub scale: Option<f64>,
}

impl BitMember {
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with(RESERVED_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepeatCount {
    Fixed(usize),
    /// Value of an earlier attribute in scope.
    Field(String),
    /// As many iterations as fit in what is left of the payload.
    UntilExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub count: RepeatCount,
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn name(&self) -> &str {
        match self {
            FieldSchema::Scalar(s) => &s.name,
            FieldSchema::Bitfield(b) => &b.name,
            FieldSchema::Group(g) => &g.name,
        }
    }

    /// Encoded size when it does not depend on payload contents.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldSchema::Scalar(s) => s.attr.fixed_size(),
            FieldSchema::Bitfield(b) => Some(b.size),
            FieldSchema::Group(g) => match g.count {
                RepeatCount::Fixed(n) => fixed_size(&g.fields).map(|s| s * n),
                _ => None,
            },
        }
    }

    /// Attribute names this field contributes at its own nesting level.
    fn declared_names(&self) -> Vec<&str> {
        match self {
            FieldSchema::Scalar(s) => vec![s.name.as_str()],
            FieldSchema::Bitfield(b) => std::iter::once(b.name.as_str())
                .chain(b.members.iter().map(|m| m.name.as_str()))
                .collect(),
            FieldSchema::Group(g) => vec![g.name.as_str()],
        }
    }
}

/// Total size of a field list, `None` if any member is variable.
pub fn fixed_size(fields: &[FieldSchema]) -> Option<usize> {
    fields.iter().map(FieldSchema::fixed_size).sum()
}

/// True if `name` is an attribute declared directly inside `group`.
pub fn group_declares(group: &Group, name: &str) -> bool {
    group.fields.iter().any(|f| f.declared_names().contains(&name))
}

/// One resolved payload layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    pub name: String,
    pub mode: MsgMode,
    pub variant_of: Option<String>,
    pub fields: Vec<FieldSchema>,
    fixed_len: Option<usize>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>, mode: MsgMode, fields: Vec<FieldSchema>) -> Self {
        let fixed_len = fixed_size(&fields);
        MessageSchema { name: name.into(), mode, variant_of: None, fields, fixed_len }
    }

    pub fn fixed_len(&self) -> Option<usize> {
        self.fixed_len
    }
}

/// Resolved catalogue: identity table plus layouts by mode and name.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    identities: HashMap<(u8, u8), String>,
    msg_ids: HashMap<String, (u8, u8)>,
    schemas: Vec<MessageSchema>,
    by_name: HashMap<(MsgMode, String), usize>,
    variants: HashMap<(MsgMode, String), Vec<usize>>,
}

impl Catalogue {
    pub fn resolve(defs: Definitions) -> Result<Self, String> {
        let mut cat = Catalogue::default();
        for decl in &defs.identities {
            let key = (decl.msg_grp, decl.msg_id);
            if let Some(prev) = cat.identities.insert(key, decl.identity.clone()) {
                return Err(format!(
                    "Duplicate identity {:02x}{:02x}: {} and {}",
                    key.0, key.1, prev, decl.identity
                ));
            }
            if cat.msg_ids.insert(decl.identity.clone(), key).is_some() {
                return Err(format!("Duplicate identity name: {}", decl.identity));
            }
        }

        let mut pending = Vec::new();
        for decl in &defs.messages {
            match &decl.body {
                MessageBody::Fields(fields) => {
                    validate_fields(fields, &mut Vec::new())
                        .map_err(|e| format!("{} {}: {}", decl.mode, decl.name, e))?;
                    let exhausting = count_exhausting(fields);
                    if exhausting > 1 {
                        return Err(format!(
                            "{} {}: at most one size-variable repeating group is allowed, found {}",
                            decl.mode, decl.name, exhausting
                        ));
                    }
                    cat.insert(MessageSchema::new(decl.name.clone(), decl.mode, fields.clone()))?;
                }
                MessageBody::Alias { mode, name } => pending.push((decl, *mode, name)),
            }
        }

        // Aliases may point at other aliases; resolve until no progress is made.
        while let Some(&(first, target_mode, target)) = pending.first() {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for (decl, mode, name) in pending {
                match cat.get_schema(mode, name) {
                    Some(schema) => {
                        let fields = schema.fields.clone();
                        cat.insert(MessageSchema::new(decl.name.clone(), decl.mode, fields))?;
                    }
                    None => unresolved.push((decl, mode, name)),
                }
            }
            if unresolved.len() == before {
                return Err(format!(
                    "{} {}: alias target {} {} is not declared",
                    first.mode, first.name, target_mode, target
                ));
            }
            pending = unresolved;
        }

        for decl in &defs.messages {
            if let Some(base) = &decl.variant_of {
                cat.link_variant(decl.mode, &decl.name, base)?;
            }
        }

        if cat.get_schema(MsgMode::Get, NOMINAL_SCHEMA).is_none() {
            log::warn!("catalogue has no GET {} layout; unknown identities cannot be decoded", NOMINAL_SCHEMA);
        }
        Ok(cat)
    }

    fn insert(&mut self, schema: MessageSchema) -> Result<(), String> {
        let key = (schema.mode, schema.name.clone());
        if self.by_name.contains_key(&key) {
            return Err(format!("Duplicate message: {} {}", schema.mode, schema.name));
        }
        self.by_name.insert(key, self.schemas.len());
        self.schemas.push(schema);
        Ok(())
    }

    fn link_variant(&mut self, mode: MsgMode, name: &str, base: &str) -> Result<(), String> {
        let base_len = self
            .get_schema(mode, base)
            .ok_or_else(|| format!("{} {}: variant of undeclared {}", mode, name, base))?
            .fixed_len;
        let idx = *self
            .by_name
            .get(&(mode, name.to_string()))
            .ok_or_else(|| format!("{} {}: variant is not declared", mode, name))?;
        let len = self.schemas[idx]
            .fixed_len
            .ok_or_else(|| format!("{} {}: variants must have a fixed length", mode, name))?;
        if base_len == Some(len) {
            return Err(format!("{} {}: variant has the same length as {}", mode, name, base));
        }
        let siblings = self.variants.entry((mode, base.to_string())).or_default();
        if siblings.iter().any(|&i| self.schemas[i].fixed_len == Some(len)) {
            return Err(format!("{} {}: another variant of {} has length {}", mode, name, base, len));
        }
        siblings.push(idx);
        self.schemas[idx].variant_of = Some(base.to_string());
        Ok(())
    }

    pub fn identity(&self, msg_grp: u8, msg_id: u8) -> Option<&str> {
        self.identities.get(&(msg_grp, msg_id)).map(String::as_str)
    }

    pub fn msg_ids(&self, identity: &str) -> Option<(u8, u8)> {
        self.msg_ids.get(identity).copied()
    }

    /// Layout declared under exactly this mode and name.
    pub fn get_schema(&self, mode: MsgMode, name: &str) -> Option<&MessageSchema> {
        self.by_name
            .get(&(mode, name.to_string()))
            .map(|&i| &self.schemas[i])
    }

    /// Mode whose table holds `name`: POLL falls back to SET, SETPOLL reads SET.
    fn table_mode(&self, mode: MsgMode, name: &str) -> MsgMode {
        match mode {
            MsgMode::Poll if self.get_schema(MsgMode::Poll, name).is_none() => MsgMode::Set,
            MsgMode::SetPoll => MsgMode::Set,
            m => m,
        }
    }

    /// Layout for `identity` in `mode`, swapping in a variant whose fixed length matches
    /// the declared payload length.
    pub fn select(&self, mode: MsgMode, identity: &str, declared_len: Option<usize>) -> Option<&MessageSchema> {
        let mode = self.table_mode(mode, identity);
        let base = self.get_schema(mode, identity)?;
        match declared_len {
            Some(len) if base.fixed_len != Some(len) => self
                .variants
                .get(&(mode, identity.to_string()))
                .and_then(|vs| vs.iter().map(|&i| &self.schemas[i]).find(|s| s.fixed_len == Some(len)))
                .or(Some(base)),
            _ => Some(base),
        }
    }

    /// Expected payload length of a layout (variant names included), `None` if variable
    /// or undeclared.
    pub fn payload_len(&self, name: &str, mode: MsgMode) -> Option<usize> {
        self.get_schema(self.table_mode(mode, name), name)?.fixed_len
    }

    /// SET if the payload length matches the SET layout (or one of its variants), else POLL.
    /// Unknown identities are taken as SET.
    pub fn input_mode(&self, msg_grp: u8, msg_id: u8, len: usize) -> MsgMode {
        let Some(identity) = self.identity(msg_grp, msg_id) else {
            return MsgMode::Set;
        };
        match self.select(MsgMode::Set, identity, Some(len)) {
            Some(schema) if schema.fixed_len == Some(len) => MsgMode::Set,
            _ => MsgMode::Poll,
        }
    }

    /// All layouts in declaration order.
    pub fn schemas(&self) -> impl Iterator<Item = &MessageSchema> {
        self.schemas.iter()
    }

    /// All identities, sorted by `(group, id)`.
    pub fn identities(&self) -> Vec<((u8, u8), &str)> {
        let mut ids: Vec<_> = self.identities.iter().map(|(k, v)| (*k, v.as_str())).collect();
        ids.sort();
        ids
    }
}

/// Checks one field list; `scope` holds the names visible to count and width references.
fn validate_fields(fields: &[FieldSchema], scope: &mut Vec<String>) -> Result<(), String> {
    let mut seen = Vec::new();
    for field in fields {
        for name in field.declared_names() {
            if seen.contains(&name) {
                return Err(format!("duplicate attribute '{}'", name));
            }
            seen.push(name);
        }
        match field {
            FieldSchema::Scalar(s) => {
                match (&s.attr.width, s.attr.kind) {
                    (Width::Fixed(0), _) => return Err(format!("'{}' has zero width", s.name)),
                    (Width::Fixed(n), AttrKind::Float) if *n != 4 && *n != 8 => {
                        return Err(format!("'{}': floats are 4 or 8 bytes, not {}", s.name, n));
                    }
                    (Width::Fixed(_), _) => {}
                    (_, AttrKind::Bytes | AttrKind::Chars) => {}
                    (w, kind) => {
                        return Err(format!("'{}': {} attributes cannot have width {:?}", s.name, kind, w));
                    }
                }
                if let Width::PerField { field, .. } = &s.attr.width {
                    if !scope.contains(field) {
                        return Err(format!("'{}' sized by undeclared attribute '{}'", s.name, field));
                    }
                }
                if s.scale.is_some() && !s.attr.kind.is_numeric() {
                    return Err(format!("'{}': only numeric attributes can be scaled", s.name));
                }
            }
            FieldSchema::Bitfield(b) => {
                if !(1..=8).contains(&b.size) {
                    return Err(format!("bitfield '{}' must be 1 to 8 bytes, not {}", b.name, b.size));
                }
                let bits: u32 = b.members.iter().map(|m| m.bits).sum();
                if b.members.iter().any(|m| m.bits == 0) {
                    return Err(format!("bitfield '{}' has a zero-width member", b.name));
                }
                if bits as usize > b.size * 8 {
                    return Err(format!(
                        "bitfield '{}' declares {} bits in {} bytes",
                        b.name, bits, b.size
                    ));
                }
            }
            FieldSchema::Group(g) => {
                match &g.count {
                    RepeatCount::Field(name) if !scope.contains(name) => {
                        return Err(format!("group '{}' counted by undeclared attribute '{}'", g.name, name));
                    }
                    RepeatCount::UntilExhausted if !matches!(fixed_size(&g.fields), Some(n) if n > 0) => {
                        return Err(format!("group '{}' repeats until exhausted but has no fixed size", g.name));
                    }
                    _ => {}
                }
                let mut inner = scope.clone();
                validate_fields(&g.fields, &mut inner)?;
            }
        }
        scope.extend(field.declared_names().into_iter().map(str::to_string));
    }
    Ok(())
}

fn count_exhausting(fields: &[FieldSchema]) -> usize {
    fields
        .iter()
        .map(|f| match f {
            FieldSchema::Group(g) => {
                usize::from(g.count == RepeatCount::UntilExhausted) + count_exhausting(&g.fields)
            }
            _ => 0,
        })
        .sum()
}
