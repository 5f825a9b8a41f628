//! Attribute types, message modes and the byte-level primitives of the QGC protocol.
//!
//! Every payload attribute carries an [`AttrType`]: a kind tag (signed, unsigned, float,
//! byte blob, character string) plus a [`Width`]. Widths are usually fixed, but three
//! variable forms exist and are resolved while a payload is walked:
//!
//! - [`Width::PerField`]: value of an earlier field times a multiplier (`X[page*53]`)
//! - [`Width::LengthMinus`]: declared payload length minus an offset (`C[len-18]`)
//! - [`Width::Remaining`]: whatever is left of the payload (`CV`)
//!
//! All multi-byte values are little-endian.

use crate::error::{ConversionError, ParseError};
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places scaled attributes are rounded to on decode.
pub const SCALE_ROUND: i32 = 12;

/// Widest integer the codec converts to a number; wider values that need the extra
/// bytes stay raw.
const NATIVE_INT_BYTES: usize = 16;

/// Attribute kind, the first character of a type token (`U`, `S`, `R`, `X`, `C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    Signed,
    Unsigned,
    Float,
    Bytes,
    Chars,
}

impl AttrKind {
    pub fn tag(self) -> char {
        match self {
            AttrKind::Signed => 'S',
            AttrKind::Unsigned => 'U',
            AttrKind::Float => 'R',
            AttrKind::Bytes => 'X',
            AttrKind::Chars => 'C',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'S' => Some(AttrKind::Signed),
            'U' => Some(AttrKind::Unsigned),
            'R' => Some(AttrKind::Float),
            'X' => Some(AttrKind::Bytes),
            'C' => Some(AttrKind::Chars),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, AttrKind::Signed | AttrKind::Unsigned | AttrKind::Float)
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttrKind::Signed | AttrKind::Unsigned => "integer",
            AttrKind::Float => "float",
            AttrKind::Bytes => "bytes",
            AttrKind::Chars => "string",
        })
    }
}

/// Byte width of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Width {
    Fixed(usize),
    /// Value of an earlier field times a multiplier.
    PerField { field: String, multiplier: usize },
    /// Declared payload length minus a fixed offset.
    LengthMinus(usize),
    /// Everything left in the payload.
    Remaining,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrType {
    pub kind: AttrKind,
    pub width: Width,
}

impl AttrType {
    pub fn fixed(kind: AttrKind, size: usize) -> Self {
        AttrType { kind, width: Width::Fixed(size) }
    }

    /// Size in bytes, or `None` if the width is only known while walking a payload.
    pub fn fixed_size(&self) -> Option<usize> {
        match self.width {
            Width::Fixed(n) => Some(n),
            _ => None,
        }
    }
}

/// Parses the compact type tokens used throughout the protocol documentation:
/// `U2`, `U002`, `R008`, `X61`, and `CV` / `CXXX` for an unbounded string or blob.
impl FromStr for AttrType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConversionError::UnknownType(s.to_string());
        let mut chars = s.chars();
        let kind = chars.next().and_then(AttrKind::from_tag).ok_or_else(unknown)?;
        let rest = chars.as_str();
        if rest == "V" || rest == "XXX" {
            return match kind {
                AttrKind::Bytes | AttrKind::Chars => Ok(AttrType { kind, width: Width::Remaining }),
                _ => Err(unknown()),
            };
        }
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unknown());
        }
        let size: usize = rest.parse().map_err(|_| unknown())?;
        match (kind, size) {
            (_, 0) => Err(unknown()),
            (AttrKind::Float, n) if n != 4 && n != 8 => Err(unknown()),
            _ => Ok(AttrType::fixed(kind, size)),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.kind.tag();
        match &self.width {
            Width::Fixed(n) => write!(f, "{}{:03}", tag, n),
            Width::PerField { field, multiplier } => write!(f, "{}[{}*{}]", tag, field, multiplier),
            Width::LengthMinus(k) => write!(f, "{}[len-{}]", tag, k),
            Width::Remaining => write!(f, "{}V", tag),
        }
    }
}

/// Message mode. `SetPoll` is only meaningful as a parse request: the concrete mode is
/// inferred from the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MsgMode {
    #[default]
    Get,
    Set,
    Poll,
    SetPoll,
}

impl MsgMode {
    pub fn as_u8(self) -> u8 {
        match self {
            MsgMode::Get => 0,
            MsgMode::Set => 1,
            MsgMode::Poll => 2,
            MsgMode::SetPoll => 3,
        }
    }
}

impl TryFrom<u8> for MsgMode {
    type Error = ParseError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MsgMode::Get),
            1 => Ok(MsgMode::Set),
            2 => Ok(MsgMode::Poll),
            3 => Ok(MsgMode::SetPoll),
            other => Err(ParseError::InvalidMode(other)),
        }
    }
}

impl fmt::Display for MsgMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            MsgMode::Get => "GET",
            MsgMode::Set => "SET",
            MsgMode::Poll => "POLL",
            MsgMode::SetPoll => "SETPOLL",
        })
    }
}

/// Two 8-bit running sums over `content` (group, id, length and payload).
pub fn calc_checksum(content: &[u8]) -> [u8; 2] {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;
    for byte in content {
        ck_a = ck_a.wrapping_add(*byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    [ck_a, ck_b]
}

/// Value of the masked bits of a bitfield, shifted down to bit 0.
///
/// `bitfield` is read most-significant byte first, so `get_bits(&[0x89], 0b1100_0000) == 2`.
/// Only the last 16 bytes of longer inputs are considered.
pub fn get_bits(bitfield: &[u8], mask: u128) -> u128 {
    if mask == 0 || bitfield.is_empty() {
        return 0;
    }
    let tail = &bitfield[bitfield.len().saturating_sub(NATIVE_INT_BYTES)..];
    let val = BigEndian::read_uint128(tail, tail.len());
    let shift = mask.trailing_zeros();
    (val >> shift) & (mask >> shift)
}

/// Escape every byte as `\xNN`, e.g. `b'\x51\x47'`.
pub fn escape_all(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 3);
    out.push_str("b'");
    for b in bytes {
        out.push_str(&format!("\\x{:02x}", b));
    }
    out.push('\'');
    out
}

/// Convert little-endian attribute bytes to a value of the given kind.
///
/// Integers wider than 16 bytes whose high bytes are more than sign padding, and
/// strings that are not UTF-8, come back as [`Value::Bytes`] of the exact width so
/// that [`value_to_bytes`] reproduces them.
pub fn bytes_to_value(bytes: &[u8], kind: AttrKind) -> Result<Value, ConversionError> {
    match kind {
        AttrKind::Unsigned => {
            let (low, high) = split_native(bytes);
            if high.iter().any(|&b| b != 0) {
                return Ok(Value::Bytes(bytes.to_vec()));
            }
            if low.is_empty() {
                return Ok(Value::UInt(0));
            }
            Ok(Value::UInt(LittleEndian::read_uint128(low, low.len())))
        }
        AttrKind::Signed => {
            let (low, high) = split_native(bytes);
            if low.is_empty() {
                return Ok(Value::Int(0));
            }
            let v = LittleEndian::read_int128(low, low.len());
            let fill = if v < 0 { 0xff } else { 0x00 };
            if high.iter().any(|&b| b != fill) {
                return Ok(Value::Bytes(bytes.to_vec()));
            }
            Ok(Value::Int(v))
        }
        AttrKind::Float => match bytes.len() {
            4 => Ok(Value::Float(LittleEndian::read_f32(bytes) as f64)),
            8 => Ok(Value::Float(LittleEndian::read_f64(bytes))),
            n => Err(ConversionError::UnknownType(format!("R{:03}", n))),
        },
        AttrKind::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        AttrKind::Chars => Ok(match std::str::from_utf8(bytes) {
            Ok(s) => Value::Str(s.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        }),
    }
}

/// Convert a value to `width` little-endian bytes for the given kind.
///
/// Integers must fit the width (two's complement for signed kinds); strings are
/// space-padded and blobs zero-padded up to the width. Integer kinds also take the
/// raw little-endian bytes as a [`Value::Bytes`] of exactly `width`, and strings
/// take raw bytes as well.
pub fn value_to_bytes(value: &Value, kind: AttrKind, width: usize) -> Result<Vec<u8>, ConversionError> {
    let overflow = || ConversionError::Overflow { value: value.to_string(), width };
    let wrong_kind = || ConversionError::WrongKind { expected: kind, found: value.kind_name() };
    let mut buf = vec![0u8; width];
    let native = width.min(NATIVE_INT_BYTES);
    match kind {
        AttrKind::Unsigned => {
            let v = match value {
                Value::UInt(u) => *u,
                Value::Int(i) if *i >= 0 => *i as u128,
                Value::Int(_) => return Err(overflow()),
                Value::Bytes(b) => return raw_int(b, width).ok_or_else(overflow),
                _ => return Err(wrong_kind()),
            };
            if width < NATIVE_INT_BYTES && v >> (8 * width) != 0 {
                return Err(overflow());
            }
            if native > 0 {
                LittleEndian::write_uint128(&mut buf[..native], v, native);
            }
        }
        AttrKind::Signed => {
            let v = match value {
                Value::Int(i) => *i,
                Value::UInt(u) => i128::try_from(*u).map_err(|_| overflow())?,
                Value::Bytes(b) => return raw_int(b, width).ok_or_else(overflow),
                _ => return Err(wrong_kind()),
            };
            if width == 0 {
                return if v == 0 { Ok(buf) } else { Err(overflow()) };
            }
            if width < NATIVE_INT_BYTES {
                let half = 1i128 << (8 * width - 1);
                if v < -half || v >= half {
                    return Err(overflow());
                }
            }
            LittleEndian::write_int128(&mut buf[..native], v, native);
            if v < 0 {
                buf[native..].iter_mut().for_each(|b| *b = 0xff);
            }
        }
        AttrKind::Float => {
            let v = match value {
                Value::Float(x) => *x,
                _ => return Err(wrong_kind()),
            };
            match width {
                4 => LittleEndian::write_f32(&mut buf, v as f32),
                8 => LittleEndian::write_f64(&mut buf, v),
                n => return Err(ConversionError::UnknownType(format!("R{:03}", n))),
            }
        }
        AttrKind::Bytes => {
            let b = match value {
                Value::Bytes(b) => b,
                _ => return Err(wrong_kind()),
            };
            if b.len() > width {
                return Err(overflow());
            }
            buf[..b.len()].copy_from_slice(b);
        }
        AttrKind::Chars => {
            let s = match value {
                Value::Str(s) => s.as_bytes(),
                Value::Bytes(b) => b.as_slice(),
                _ => return Err(wrong_kind()),
            };
            if s.len() > width {
                return Err(overflow());
            }
            buf[..s.len()].copy_from_slice(s);
            buf[s.len()..].iter_mut().for_each(|b| *b = b' ');
        }
    }
    Ok(buf)
}

/// Zero/blank value used for attributes omitted on encode.
pub fn nominal_value(kind: AttrKind, width: usize) -> Value {
    match kind {
        AttrKind::Signed => Value::Int(0),
        AttrKind::Unsigned => Value::UInt(0),
        AttrKind::Float => Value::Float(0.0),
        AttrKind::Bytes => Value::Bytes(vec![0; width]),
        AttrKind::Chars => Value::Str(" ".repeat(width)),
    }
}

/// Decode side of fixed-point scaling: divide and round to [`SCALE_ROUND`] places.
pub fn unscale(raw: &Value, scale: f64) -> Value {
    match raw.as_f64() {
        Some(x) => {
            let factor = 10f64.powi(SCALE_ROUND);
            Value::Float((x / scale * factor).round() / factor)
        }
        None => raw.clone(),
    }
}

/// Encode side of fixed-point scaling: multiply, truncating toward zero for integer kinds.
pub fn scale_value(value: &Value, scale: f64, kind: AttrKind) -> Result<Value, ConversionError> {
    let x = value
        .as_f64()
        .ok_or(ConversionError::WrongKind { expected: kind, found: value.kind_name() })?
        * scale;
    Ok(match kind {
        AttrKind::Float => Value::Float(x),
        _ if x < 0.0 => Value::Int(x.trunc() as i128),
        _ => Value::UInt(x.trunc() as u128),
    })
}

fn raw_int(bytes: &[u8], width: usize) -> Option<Vec<u8>> {
    (bytes.len() == width).then(|| bytes.to_vec())
}

fn split_native(bytes: &[u8]) -> (&[u8], &[u8]) {
    bytes.split_at(bytes.len().min(NATIVE_INT_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_reference() {
        assert_eq!(calc_checksum(&[0x06, 0x01, 0x02, 0x00, 0xf0, 0x05]), [0xfe, 0x16]);
    }

    #[test]
    fn get_bits_masks_msb_first() {
        let cases: [(&[u8], u128, u128); 6] = [
            (&[0x89], 0b1100_0000, 2),
            (&[0xc9], 0b11, 1),
            (&[0x89], 0b1001, 9),
            (&[0xc9], 0b1001, 9),
            (&[0x18, 0x18], 8, 1),
            (&[0x18, 0x20], 8, 0),
        ];
        for (bytes, mask, expected) in cases {
            assert_eq!(get_bits(bytes, mask), expected, "mask {:#b}", mask);
        }
    }

    #[test]
    fn type_tokens() {
        assert_eq!("U002".parse::<AttrType>().unwrap(), AttrType::fixed(AttrKind::Unsigned, 2));
        assert_eq!("X61".parse::<AttrType>().unwrap().fixed_size(), Some(61));
        assert_eq!("CV".parse::<AttrType>().unwrap().width, Width::Remaining);
        assert_eq!("CXXX".parse::<AttrType>().unwrap().fixed_size(), None);
        assert_eq!(
            "Y002".parse::<AttrType>(),
            Err(ConversionError::UnknownType("Y002".to_string()))
        );
        assert!("R003".parse::<AttrType>().is_err());
        assert_eq!(AttrType::fixed(AttrKind::Chars, 32).to_string(), "C032");
    }

    #[test]
    fn value_to_bytes_reference_values() {
        assert_eq!(
            value_to_bytes(&Value::UInt(2345), AttrKind::Unsigned, 2).unwrap(),
            vec![0x29, 0x09]
        );
        assert_eq!(
            value_to_bytes(&Value::Bytes(vec![0x44, 0x55]), AttrKind::Bytes, 2).unwrap(),
            vec![0x44, 0x55]
        );
        assert_eq!(
            value_to_bytes(&Value::Float(23.12345678), AttrKind::Float, 4).unwrap(),
            vec![0xd7, 0xfc, 0xb8, 0x41]
        );
        assert_eq!(
            value_to_bytes(&Value::Float(-23.12345678912345), AttrKind::Float, 8).unwrap(),
            vec![0x1f, 0xc1, 0x37, 0xdd, 0x9a, 0x1f, 0x37, 0xc0]
        );
        assert_eq!(
            value_to_bytes(&Value::Str("test1234".into()), AttrKind::Chars, 8).unwrap(),
            b"test1234".to_vec()
        );
        assert_eq!(
            value_to_bytes(&Value::Str("ab".into()), AttrKind::Chars, 4).unwrap(),
            b"ab  ".to_vec()
        );
    }

    #[test]
    fn bytes_to_value_reference_values() {
        assert_eq!(bytes_to_value(&[0x29, 0x09], AttrKind::Unsigned).unwrap(), Value::UInt(2345));
        assert_eq!(bytes_to_value(&[0xff, 0xff], AttrKind::Signed).unwrap(), Value::Int(-1));
        let f = bytes_to_value(&[0xd7, 0xfc, 0xb8, 0x41], AttrKind::Float).unwrap();
        assert!((f.as_f64().unwrap() - 23.12345678).abs() < 1e-6);
        assert_eq!(
            bytes_to_value(b"test1234", AttrKind::Chars).unwrap(),
            Value::Str("test1234".into())
        );
    }

    #[test]
    fn wide_integers_round_trip_every_byte() {
        let mut wide = vec![0u8; 17];
        wide[0] = 7;
        assert_eq!(bytes_to_value(&wide, AttrKind::Unsigned).unwrap(), Value::UInt(7));
        assert_eq!(value_to_bytes(&Value::UInt(7), AttrKind::Unsigned, 17).unwrap(), wide);
        wide[16] = 1;
        let kept = bytes_to_value(&wide, AttrKind::Unsigned).unwrap();
        assert_eq!(kept, Value::Bytes(wide.clone()));
        assert_eq!(value_to_bytes(&kept, AttrKind::Unsigned, 17).unwrap(), wide);
        assert!(value_to_bytes(&kept, AttrKind::Unsigned, 16).is_err());
        let mut signed = vec![0xffu8; 17];
        signed[16] = 0x7f;
        let kept = bytes_to_value(&signed, AttrKind::Signed).unwrap();
        assert_eq!(value_to_bytes(&kept, AttrKind::Signed, 17).unwrap(), signed);
        let neg = value_to_bytes(&Value::Int(-2), AttrKind::Signed, 17).unwrap();
        assert!(neg[1..].iter().all(|&b| b == 0xff));
        assert_eq!(bytes_to_value(&neg, AttrKind::Signed).unwrap(), Value::Int(-2));
    }

    #[test]
    fn integer_overflow_and_kind_checks() {
        assert!(matches!(
            value_to_bytes(&Value::UInt(99_999_999), AttrKind::Unsigned, 1),
            Err(ConversionError::Overflow { .. })
        ));
        assert!(matches!(
            value_to_bytes(&Value::Int(-1), AttrKind::Unsigned, 4),
            Err(ConversionError::Overflow { .. })
        ));
        assert!(matches!(
            value_to_bytes(&Value::Int(128), AttrKind::Signed, 1),
            Err(ConversionError::Overflow { .. })
        ));
        assert_eq!(value_to_bytes(&Value::Int(-128), AttrKind::Signed, 1).unwrap(), vec![0x80]);
        assert!(matches!(
            value_to_bytes(&Value::Str("60".into()), AttrKind::Unsigned, 1),
            Err(ConversionError::WrongKind { expected: AttrKind::Unsigned, found: "string" })
        ));
        assert!(matches!(
            value_to_bytes(&Value::UInt(1), AttrKind::Float, 4),
            Err(ConversionError::WrongKind { .. })
        ));
    }

    #[test]
    fn nominal_values() {
        assert_eq!(nominal_value(AttrKind::Unsigned, 2), Value::UInt(0));
        assert_eq!(nominal_value(AttrKind::Bytes, 2), Value::Bytes(vec![0, 0]));
        assert_eq!(nominal_value(AttrKind::Float, 8), Value::Float(0.0));
        assert_eq!(nominal_value(AttrKind::Chars, 8), Value::Str("        ".into()));
    }

    #[test]
    fn scaling_rounds_on_decode_and_truncates_on_encode() {
        assert_eq!(unscale(&Value::UInt(1234), 100.0), Value::Float(12.34));
        assert_eq!(
            scale_value(&Value::Float(12.349), 100.0, AttrKind::Unsigned).unwrap(),
            Value::UInt(1234)
        );
        assert_eq!(
            scale_value(&Value::Float(-1.5), 10.0, AttrKind::Signed).unwrap(),
            Value::Int(-15)
        );
    }

    #[test]
    fn modes() {
        assert_eq!(MsgMode::try_from(3).unwrap(), MsgMode::SetPoll);
        assert_eq!(MsgMode::try_from(7), Err(ParseError::InvalidMode(7)));
        assert_eq!(MsgMode::Poll.to_string(), "POLL");
    }

    #[test]
    fn escape() {
        assert_eq!(escape_all(b"QG"), "b'\\x51\\x47'");
    }
}
