//! Stateless wire primitives: wire types, field tags, varint, zigzag and fixed-width values.
//!
//! Everything here works on plain slices and integers. The stateful
//! [`FrameReader`](crate::reader::FrameReader) / [`FrameWriter`](crate::writer::FrameWriter)
//! build on these helpers and attach stream position to any failure.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Largest encoded size of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;
/// Largest encoded size of a 64-bit varint.
pub const MAX_VARINT64_LEN: usize = 10;

/// Payload shape of a field, as carried in the low 3 bits of a tag.
///
/// `SignedVarint` is an extension: it travels on the wire as [`WireType::Varint`]
/// but tells readers and writers to apply zigzag mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
    SignedVarint,
}

impl WireType {
    /// Numeric code; extensions carry bits above the low 3.
    pub const fn code(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::Fixed32 => 5,
            WireType::SignedVarint => 8,
        }
    }

    /// Decode the 3-bit code found in a tag.
    pub const fn from_code(code: u8) -> Option<WireType> {
        match code {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            3 => Some(WireType::StartGroup),
            4 => Some(WireType::EndGroup),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }

    /// The form that actually appears on the wire.
    pub const fn base(self) -> WireType {
        match self {
            WireType::SignedVarint => WireType::Varint,
            other => other,
        }
    }

    /// True for specialized variants that share a base form.
    pub const fn is_extension(self) -> bool {
        self.code() & !7 != 0
    }

    /// Whether values of this type can be concatenated inside one packed block.
    pub const fn is_packable(self) -> bool {
        matches!(
            self.base(),
            WireType::Varint | WireType::Fixed32 | WireType::Fixed64
        )
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::LengthDelimited => "length-delimited",
            WireType::StartGroup => "start-group",
            WireType::EndGroup => "end-group",
            WireType::Fixed32 => "fixed32",
            WireType::SignedVarint => "signed-varint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("invalid field number {0}")]
    InvalidField(u64),
    #[error("invalid wire type {0}")]
    InvalidWireType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarintError {
    #[error("varint truncated")]
    Truncated,
    #[error("varint overflow")]
    Overflow,
}

/// `(field_number, wire_type)` pair, packed on the wire as `(field_number << 3) | wire_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldTag {
    field_number: u32,
    wire_type: WireType,
}

impl FieldTag {
    pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

    pub fn new(field_number: u32, wire_type: WireType) -> Result<Self, TagError> {
        if field_number == 0 || field_number > Self::MAX_FIELD_NUMBER {
            return Err(TagError::InvalidField(field_number as u64));
        }
        Ok(FieldTag {
            field_number,
            wire_type,
        })
    }

    pub fn field_number(self) -> u32 {
        self.field_number
    }

    pub fn wire_type(self) -> WireType {
        self.wire_type
    }

    pub fn pack(self) -> u32 {
        (self.field_number << 3) | self.wire_type.base().code() as u32
    }

    pub fn unpack(raw: u64) -> Result<Self, TagError> {
        let code = (raw & 7) as u8;
        let wire_type = WireType::from_code(code).ok_or(TagError::InvalidWireType(code))?;
        let field = raw >> 3;
        if field == 0 || field > Self::MAX_FIELD_NUMBER as u64 {
            return Err(TagError::InvalidField(field));
        }
        Ok(FieldTag {
            field_number: field as u32,
            wire_type,
        })
    }

    /// Narrow to a specialized wire type sharing the same base form; otherwise unchanged.
    pub fn hint(self, wire_type: WireType) -> Self {
        if self.wire_type.base() == wire_type.base() {
            FieldTag {
                wire_type,
                ..self
            }
        } else {
            self
        }
    }
}

pub fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Encode into `buf`, returning the number of bytes used.
pub fn encode_varint(mut v: u64, buf: &mut [u8; MAX_VARINT64_LEN]) -> usize {
    let mut i = 0;
    while v >= 0x80 {
        buf[i] = (v as u8) | 0x80;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i + 1
}

pub fn write_varint(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    let n = encode_varint(v, &mut buf);
    out.extend_from_slice(&buf[..n]);
}

/// Decode a 64-bit varint from the front of `bytes`; returns (value, bytes consumed).
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate().take(MAX_VARINT64_LEN) {
        if i == MAX_VARINT64_LEN - 1 && b > 1 {
            return Err(VarintError::Overflow);
        }
        value |= ((b & 0x7f) as u64) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if bytes.len() >= MAX_VARINT64_LEN {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::Truncated)
    }
}

/// Decode a varint that must fit 32 bits (at most 5 bytes).
pub fn decode_varint32(bytes: &[u8]) -> Result<(u32, usize), VarintError> {
    let mut value = 0u32;
    for (i, &b) in bytes.iter().enumerate().take(MAX_VARINT32_LEN) {
        if i == MAX_VARINT32_LEN - 1 && b & 0xf0 != 0 {
            return Err(VarintError::Overflow);
        }
        value |= ((b & 0x7f) as u32) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if bytes.len() >= MAX_VARINT32_LEN {
        Err(VarintError::Overflow)
    } else {
        Err(VarintError::Truncated)
    }
}

pub fn zigzag_encode32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

pub fn zigzag_decode32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

pub fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn zigzag_decode64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn encode_fixed32(v: u32) -> [u8; 4] {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    b
}

pub fn encode_fixed64(v: u64) -> [u8; 8] {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    b
}

pub fn decode_fixed32(b: &[u8; 4]) -> u32 {
    LittleEndian::read_u32(b)
}

pub fn decode_fixed64(b: &[u8; 8]) -> u64 {
    LittleEndian::read_u64(b)
}
