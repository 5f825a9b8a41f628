//! Parse catalogue source into [`Definitions`] using PEST.
//!
//! ```text
//! identity 0x02 0x01 CFG-UART;
//!
//! message GET CFG-UART {
//!     intfid: U1;
//!     baudrate: U4;
//!     flags: X1 { enabled: U1; reserved1: U7; }
//!     sats: repeat(numsat) { svid: U1; cno: U1 * 0.25; }
//!     msgdata: X[page * 53];
//!     verstr: C[len - 18];
//!     trailer: XV;
//! }
//! message SET CFG-UART = GET CFG-UART;
//! variant SET CFG-UART-DIS of CFG-UART { intfid: U1; intfstatus: U1; }
//! ```

use crate::ast::*;
use crate::types::{AttrKind, AttrType, MsgMode, Width};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct CatalogueParser;

/// Parse catalogue source into unresolved definitions.
pub fn parse(source: &str) -> Result<Definitions, String> {
    let pairs = CatalogueParser::parse(Rule::catalogue, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    build_definitions(pair)
}

fn build_definitions(pair: Pair<Rule>) -> Result<Definitions, String> {
    let mut defs = Definitions::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identity_decl => defs.identities.push(build_identity(inner)?),
            Rule::message_decl => defs.messages.push(build_message(inner, false)?),
            Rule::variant_decl => defs.messages.push(build_message(inner, true)?),
            _ => {}
        }
    }
    Ok(defs)
}

fn build_identity(pair: Pair<Rule>) -> Result<IdentityDecl, String> {
    let mut it = pair.into_inner();
    let msg_grp = parse_hex(it.next().ok_or("identity: group")?.as_str())?;
    let msg_id = parse_hex(it.next().ok_or("identity: id")?.as_str())?;
    let identity = it.next().ok_or("identity: name")?.as_str().to_string();
    Ok(IdentityDecl { msg_grp, msg_id, identity })
}

fn build_message(pair: Pair<Rule>, is_variant: bool) -> Result<MessageDecl, String> {
    let mut it = pair.into_inner();
    let mode = parse_mode(it.next().ok_or("message: mode")?.as_str())?;
    let name = it.next().ok_or("message: name")?.as_str().to_string();
    let variant_of = if is_variant {
        Some(it.next().ok_or("variant: base")?.as_str().to_string())
    } else {
        None
    };
    let body_pair = it.next().ok_or("message: body")?;
    let body = match body_pair.as_rule() {
        Rule::alias => {
            let mut a = body_pair.into_inner();
            let mode = parse_mode(a.next().ok_or("alias: mode")?.as_str())?;
            let name = a.next().ok_or("alias: name")?.as_str().to_string();
            MessageBody::Alias { mode, name }
        }
        Rule::field_block => MessageBody::Fields(build_fields(body_pair)?),
        r => return Err(format!("message {}: unexpected {:?}", name, r)),
    };
    Ok(MessageDecl { mode, name, variant_of, body })
}

fn build_fields(block: Pair<Rule>) -> Result<Vec<FieldSchema>, String> {
    block
        .into_inner()
        .filter(|p| p.as_rule() == Rule::field)
        .map(build_field)
        .collect()
}

fn build_field(pair: Pair<Rule>) -> Result<FieldSchema, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("field: name")?.as_str().to_string();
    let ty = it.next().ok_or("field: type")?;
    match ty.as_rule() {
        Rule::scalar => build_scalar(name, ty),
        Rule::bitfield => build_bitfield(name, ty),
        Rule::group => build_group(name, ty),
        r => Err(format!("field {}: unexpected {:?}", name, r)),
    }
}

fn build_scalar(name: String, pair: Pair<Rule>) -> Result<FieldSchema, String> {
    let mut it = pair.into_inner();
    let ty = it.next().ok_or("scalar: type")?;
    let attr = match ty.as_rule() {
        Rule::fixed_width => {
            let s = ty.as_str();
            AttrType::fixed(parse_kind(s)?, parse_number(&s[1..])?)
        }
        Rule::remaining_width => AttrType { kind: parse_kind(ty.as_str())?, width: Width::Remaining },
        Rule::per_field_width => {
            let mut w = ty.into_inner();
            let kind = parse_kind(w.next().ok_or("width: kind")?.as_str())?;
            let field = w.next().ok_or("width: field")?.as_str().to_string();
            let multiplier = parse_number(w.next().ok_or("width: multiplier")?.as_str())?;
            AttrType { kind, width: Width::PerField { field, multiplier } }
        }
        Rule::length_minus_width => {
            let mut w = ty.into_inner();
            let kind = parse_kind(w.next().ok_or("width: kind")?.as_str())?;
            let offset = parse_number(w.next().ok_or("width: offset")?.as_str())?;
            AttrType { kind, width: Width::LengthMinus(offset) }
        }
        r => return Err(format!("scalar {}: unexpected {:?}", name, r)),
    };
    let scale = it.next().map(build_scale).transpose()?;
    Ok(FieldSchema::Scalar(Scalar { name, attr, scale }))
}

fn build_bitfield(name: String, pair: Pair<Rule>) -> Result<FieldSchema, String> {
    let mut it = pair.into_inner();
    let size = parse_number(&it.next().ok_or("bitfield: size")?.as_str()[1..])?;
    let mut members = Vec::new();
    for m in it {
        let mut mi = m.into_inner();
        let member = mi.next().ok_or("bit member: name")?.as_str().to_string();
        let bits = parse_number(&mi.next().ok_or("bit member: width")?.as_str()[1..])?;
        let scale = mi.next().map(build_scale).transpose()?;
        let bits = u32::try_from(bits).map_err(|_| format!("bit member {}: width too large", member))?;
        members.push(BitMember { name: member, bits, scale });
    }
    Ok(FieldSchema::Bitfield(Bitfield { name, size, members }))
}

fn build_group(name: String, pair: Pair<Rule>) -> Result<FieldSchema, String> {
    let mut it = pair.into_inner();
    let count_pair = it.next().ok_or("group: count")?;
    let count = match count_pair.as_rule() {
        Rule::count_all => RepeatCount::UntilExhausted,
        Rule::count_fixed => RepeatCount::Fixed(parse_number(count_pair.as_str())?),
        Rule::count_field => RepeatCount::Field(count_pair.as_str().to_string()),
        r => return Err(format!("group {}: unexpected {:?}", name, r)),
    };
    let fields = build_fields(it.next().ok_or("group: fields")?)?;
    Ok(FieldSchema::Group(Group { name, count, fields }))
}

fn build_scale(pair: Pair<Rule>) -> Result<f64, String> {
    let s = pair.into_inner().next().ok_or("scale: value")?.as_str();
    let scale: f64 = s.parse().map_err(|_| format!("invalid scale {}", s))?;
    if scale == 0.0 {
        return Err("scale must be non-zero".to_string());
    }
    Ok(scale)
}

fn parse_mode(s: &str) -> Result<MsgMode, String> {
    match s {
        "GET" => Ok(MsgMode::Get),
        "SET" => Ok(MsgMode::Set),
        "POLL" => Ok(MsgMode::Poll),
        other => Err(format!("unknown mode {}", other)),
    }
}

fn parse_kind(s: &str) -> Result<AttrKind, String> {
    s.chars()
        .next()
        .and_then(AttrKind::from_tag)
        .ok_or_else(|| format!("unknown attribute kind in {}", s))
}

fn parse_number(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("invalid number {}", s))
}

fn parse_hex(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|_| format!("invalid byte {}", s))
}
