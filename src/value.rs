//! Runtime values for encoding/decoding (codec representation).

use std::fmt;

use crate::types::escape_all;

/// A single decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i128),
    UInt(u128),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(x) => u64::try_from(*x).ok(),
            Value::Int(x) => u64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(x) => i64::try_from(*x).ok(),
            Value::UInt(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    /// Any numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(x) => Some(*x as f64),
            Value::UInt(x) => Some(*x as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Encoded length of a blob or string, zero for numbers.
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            Value::Bytes(b) => b.len(),
            Value::Str(s) => s.len(),
            _ => 0,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
        }
    }
}

/// Strings print with trailing padding removed, blobs fully escaped.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(x) => write!(f, "{}", x),
            Value::UInt(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bytes(b) => f.write_str(&escape_all(b)),
            Value::Str(s) => f.write_str(s.trim_end()),
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from!(UInt: u8, u16, u32, u64, u128);
value_from!(Int: i8, i16, i32, i64, i128);
value_from!(Float: f32, f64);

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Name of an attribute inside a decoded message: the schema name plus one 1-based
/// index per enclosing repeating group. Displays as `svid_03` or `gnod_03_06`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldKey {
    pub name: String,
    pub indices: Vec<u16>,
}

impl FieldKey {
    pub fn new(name: impl Into<String>, indices: Vec<u16>) -> Self {
        FieldKey { name: name.into(), indices }
    }

    pub fn plain(name: impl Into<String>) -> Self {
        FieldKey::new(name, Vec::new())
    }

    /// Split `gnod_03_06` into `gnod` and `[3, 6]`.
    ///
    /// A key whose suffixes are not all numeric is kept whole, so `dodgy_xx` has no indices.
    pub fn parse(key: &str) -> Self {
        let mut parts = key.split('_');
        let name = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return FieldKey::plain(key);
        }
        let indices: Option<Vec<u16>> = rest
            .iter()
            .map(|p| {
                if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) {
                    p.parse().ok()
                } else {
                    None
                }
            })
            .collect();
        match indices {
            Some(indices) => FieldKey::new(name, indices),
            None => FieldKey::plain(key),
        }
    }

    /// First index, or 0 when the attribute is not inside a group.
    pub fn index(&self) -> u16 {
        self.indices.first().copied().unwrap_or(0)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for i in &self.indices {
            write!(f, "_{:02}", i)?;
        }
        Ok(())
    }
}

impl From<&str> for FieldKey {
    fn from(key: &str) -> Self {
        FieldKey::parse(key)
    }
}
