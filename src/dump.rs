//! Format encoded bytes and decoded values for display.
//!
//! [`dump_raw`] needs no schema: every field is printed as `number:wire_type value`,
//! and length-delimited payloads are shown as a nested message when they parse
//! as one, else as a string when they are printable UTF-8, else as hex.

use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::source::SliceSource;
use crate::value::{Message, Value};
use crate::wire::WireType;
use std::fmt::Write;

/// Payloads nested deeper than this are printed as hex.
const RAW_NESTING_LIMIT: u32 = 32;

/// Render a raw protobuf-encoded buffer, one field per line.
pub fn dump_raw(bytes: &[u8]) -> Result<String, CodecError> {
    let mut out = String::new();
    dump_fields(bytes, 0, &mut out)?;
    Ok(out)
}

fn dump_fields(bytes: &[u8], indent: usize, out: &mut String) -> Result<(), CodecError> {
    let mut source = SliceSource::new(bytes);
    let mut reader = FrameReader::new(&mut source, RAW_NESTING_LIMIT);
    dump_body(&mut reader, indent, out)
}

fn dump_body(reader: &mut FrameReader<'_>, indent: usize, out: &mut String) -> Result<(), CodecError> {
    let pad = "  ".repeat(indent);
    loop {
        let field = reader.read_field_header()?;
        if field == 0 {
            return Ok(());
        }
        let wire_type = reader.wire_type().unwrap_or(WireType::Varint);
        let _ = write!(out, "{}{}:{} ", pad, field, wire_type);
        match wire_type {
            WireType::Varint | WireType::SignedVarint => {
                let _ = writeln!(out, "{}", reader.read_u64()?);
            }
            WireType::Fixed32 => {
                let v = reader.read_u32()?;
                let _ = writeln!(out, "{} (float {})", v, f32::from_bits(v));
            }
            WireType::Fixed64 => {
                let v = reader.read_u64()?;
                let _ = writeln!(out, "{} (double {})", v, f64::from_bits(v));
            }
            WireType::LengthDelimited => {
                let payload = reader.read_bytes()?;
                let mut nested = String::new();
                if !payload.is_empty()
                    && (indent as u32) < RAW_NESTING_LIMIT
                    && dump_fields(&payload, indent + 1, &mut nested).is_ok()
                {
                    let _ = writeln!(out, "{{");
                    out.push_str(&nested);
                    let _ = writeln!(out, "{}}}", pad);
                } else if let Some(text) = printable(&payload) {
                    let _ = writeln!(out, "{:?}", text);
                } else {
                    let _ = writeln!(out, "hex({})", hex_string(&payload));
                }
            }
            WireType::StartGroup => {
                let token = reader.start_sub_item()?;
                let _ = writeln!(out, "group {{");
                dump_body(reader, indent + 1, out)?;
                reader.end_sub_item(token)?;
                let _ = writeln!(out, "{}}}", pad);
            }
            WireType::EndGroup => return Ok(()),
        }
    }
}

fn printable(bytes: &[u8]) -> Option<&str> {
    let s = std::str::from_utf8(bytes).ok()?;
    if s.chars().all(|c| !c.is_control() || c == '\n' || c == '\t') {
        Some(s)
    } else {
        None
    }
}

pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Raw scalar string.
pub fn format_scalar_raw(v: &Value) -> String {
    match v {
        Value::Bool(x) => format!("{}", x),
        Value::I32(x) => format!("{}", x),
        Value::I64(x) => format!("{}", x),
        Value::U32(x) => format!("{}", x),
        Value::U64(x) => format!("{}", x),
        Value::F32(x) => format!("{}", x),
        Value::F64(x) => format!("{}", x),
        Value::String(s) => format!("{:?}", s),
        Value::Bytes(b) => format!("hex({})", hex_string(b)),
        _ => format!("{:?}", v),
    }
}

/// Multi-line rendering of a decoded value. Message fields are sorted by name.
pub fn value_to_dump(schema: &dyn SchemaProvider, v: &Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match v {
        Value::Message(m) => message_to_dump(schema, m, indent),
        Value::Shared(shared) => match shared.try_lock() {
            Some(m) => message_to_dump(schema, &m, indent),
            // Already held further up: a cycle.
            None => format!("{}<cycle {:#x}>", pad, shared.identity()),
        },
        Value::List(lst) => {
            if lst.is_empty() {
                return format!("{}[]", pad);
            }
            let mut lines: Vec<String> = vec![format!("{}[", pad)];
            for (i, item) in lst.iter().enumerate() {
                let sub = value_to_dump(schema, item, indent + 1);
                lines.push(format!("{}  [{}] {}", pad, i, sub.trim_start()));
            }
            lines.push(format!("{}]", pad));
            lines.join("\n")
        }
        Value::Map(entries) => {
            if entries.is_empty() {
                return format!("{}{{}}", pad);
            }
            let mut lines: Vec<String> = vec![format!("{}{{", pad)];
            for (k, val) in entries {
                let sub = value_to_dump(schema, val, indent + 1);
                lines.push(format!("{}  {} => {}", pad, format_scalar_raw(k), sub.trim_start()));
            }
            lines.push(format!("{}}}", pad));
            lines.join("\n")
        }
        scalar => format!("{}{}", pad, format_scalar_raw(scalar)),
    }
}

fn message_to_dump(schema: &dyn SchemaProvider, m: &Message, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut lines: Vec<String> = vec![format!("{}{} {{", pad, schema.type_name(m.type_id()))];
    let mut fields: Vec<_> = m.fields().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    for (name, val) in fields {
        let sub = value_to_dump(schema, val, indent + 1);
        lines.push(format!("{}  {}: {}", pad, name, sub.trim_start()));
    }
    if m.has_unknown_fields() {
        lines.push(format!("{}  <unknown fields>", pad));
    }
    lines.push(format!("{}}}", pad));
    lines.join("\n")
}
