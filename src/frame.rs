//! Length-prefixed message streams.
//!
//! Several messages can share one buffer or stream when each is preceded by
//! its length. With [`PrefixStyle::Base128`] the prefix may also carry a field
//! number, which makes the stream itself a valid message holding a repeated
//! field; items under other field numbers are skipped and reported.

use crate::codec::Codec;
use crate::error::{CodecError, Position};
use crate::reader::FrameReader;
use crate::source::SliceSource;
use crate::value::{Message, Value};
use crate::wire::{self, FieldTag, WireType};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixStyle {
    /// Varint length, optionally preceded by a `(field, LengthDelimited)` header.
    Base128,
    /// 4-byte little-endian length.
    Fixed32,
    /// 4-byte big-endian length.
    Fixed32BigEndian,
}

/// Messages decoded from one buffer, plus the items that were passed over.
#[derive(Debug)]
pub struct FrameDecodeResult {
    pub messages: Vec<DecodedMessage>,
    /// Items under a field number other than the one requested.
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug)]
pub struct DecodedMessage {
    pub name: String,
    pub message: Message,
    /// Offsets of the item in the frame, prefix included.
    pub byte_range: (usize, usize),
}

#[derive(Debug)]
pub struct SkippedItem {
    pub field_number: u32,
    pub byte_range: (usize, usize),
}

fn check_field(style: PrefixStyle, field_number: Option<u32>) -> Result<(), CodecError> {
    match (style, field_number) {
        (_, None) => Ok(()),
        (PrefixStyle::Base128, Some(n)) if n > 0 && n <= FieldTag::MAX_FIELD_NUMBER => Ok(()),
        (PrefixStyle::Base128, Some(n)) => Err(CodecError::schema(format!("invalid field number {}", n))),
        (_, Some(_)) => Err(CodecError::schema("only base-128 prefixes carry a field number")),
    }
}

fn prefix(style: PrefixStyle, field_number: Option<u32>, len: usize) -> Result<Vec<u8>, CodecError> {
    check_field(style, field_number)?;
    let mut out = Vec::with_capacity(8);
    match style {
        PrefixStyle::Base128 => {
            if let Some(n) = field_number {
                let tag = FieldTag::new(n, WireType::LengthDelimited)
                    .map_err(|e| CodecError::schema(e.to_string()))?;
                wire::write_varint(&mut out, tag.pack() as u64);
            }
            wire::write_varint(&mut out, len as u64);
        }
        PrefixStyle::Fixed32 | PrefixStyle::Fixed32BigEndian => {
            let len = u32::try_from(len).map_err(|_| {
                CodecError::overflow("message too large for a fixed32 prefix", Position::default())
            })?;
            if style == PrefixStyle::Fixed32 {
                out.write_u32::<LittleEndian>(len)?;
            } else {
                out.write_u32::<BigEndian>(len)?;
            }
        }
    }
    Ok(out)
}

/// Encode `value` preceded by its length prefix.
pub fn encode_delimited(
    codec: &Codec,
    value: &Value,
    style: PrefixStyle,
    field_number: Option<u32>,
) -> Result<Vec<u8>, CodecError> {
    let body = codec.encode_value(value)?;
    let mut out = prefix(style, field_number, body.len())?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Append one length-prefixed item to `out`.
pub fn write_delimited<W: Write>(
    codec: &Codec,
    value: &Value,
    style: PrefixStyle,
    field_number: Option<u32>,
    out: &mut W,
) -> Result<(), CodecError> {
    let item = encode_delimited(codec, value, style, field_number)?;
    out.write_all(&item)?;
    Ok(())
}

/// Decode every item of a buffer of length-prefixed messages of type `type_name`.
///
/// With a field number, items under other field numbers are skipped (any wire
/// type). A malformed prefix or body fails the whole frame.
pub fn decode_frame(
    codec: &Codec,
    type_name: &str,
    bytes: &[u8],
    style: PrefixStyle,
    field_number: Option<u32>,
) -> Result<FrameDecodeResult, CodecError> {
    check_field(style, field_number)?;
    let type_id = codec
        .schema()
        .type_id(type_name)
        .ok_or_else(|| CodecError::schema(format!("unknown message type: {}", type_name)))?;
    let mut messages = Vec::new();
    let mut skipped = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let at = Position {
            offset: offset as u64,
            ..Position::default()
        };
        let (head, len) = match style {
            PrefixStyle::Base128 => {
                let mut head = 0;
                if let Some(expected) = field_number {
                    let (raw, n) = wire::decode_varint(rest)
                        .map_err(|e| CodecError::framing(format!("bad item header: {}", e), at))?;
                    let tag = FieldTag::unpack(raw)
                        .map_err(|e| CodecError::wire_format(format!("invalid field in source data: {}", e), at))?;
                    if tag.field_number() != expected || tag.wire_type() != WireType::LengthDelimited {
                        let consumed = skip_item(rest, codec.config().max_depth)?;
                        log::trace!("skipping item under field {} at offset {}", tag.field_number(), offset);
                        skipped.push(SkippedItem {
                            field_number: tag.field_number(),
                            byte_range: (offset, offset + consumed),
                        });
                        offset += consumed;
                        continue;
                    }
                    head = n;
                }
                let (len, n) = wire::decode_varint(&rest[head..])
                    .map_err(|e| CodecError::framing(format!("bad length prefix: {}", e), at))?;
                (head + n, len)
            }
            PrefixStyle::Fixed32 | PrefixStyle::Fixed32BigEndian => {
                if rest.len() < 4 {
                    return Err(CodecError::EndOfStream { at });
                }
                let len = if style == PrefixStyle::Fixed32 {
                    LittleEndian::read_u32(rest)
                } else {
                    BigEndian::read_u32(rest)
                };
                (4, len as u64)
            }
        };
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| head.checked_add(len))
            .filter(|&end| end <= rest.len())
            .ok_or_else(|| CodecError::framing(format!("item length {} exceeds the frame", len), at))?;
        let message = codec.decode_by_id(type_id, &rest[head..end])?;
        messages.push(DecodedMessage {
            name: type_name.to_string(),
            message,
            byte_range: (offset, offset + end),
        });
        offset += end;
    }

    Ok(FrameDecodeResult { messages, skipped })
}

/// Bytes taken by the field starting at `bytes[0]`, header included.
fn skip_item(bytes: &[u8], max_depth: u32) -> Result<usize, CodecError> {
    let mut source = SliceSource::new(bytes);
    let mut reader = FrameReader::new(&mut source, max_depth);
    reader.read_field_header()?;
    reader.skip_field()?;
    Ok(reader.position() as usize)
}

/// Read the next length-prefixed item from a stream; `None` at a clean end of input.
///
/// Items under another field number are skipped.
pub fn read_delimited<R: Read>(
    codec: &Codec,
    type_name: &str,
    input: &mut R,
    style: PrefixStyle,
    field_number: Option<u32>,
) -> Result<Option<Message>, CodecError> {
    check_field(style, field_number)?;
    loop {
        let len = match style {
            PrefixStyle::Base128 => {
                if let Some(expected) = field_number {
                    let raw = match read_stream_varint(input)? {
                        Some(raw) => raw,
                        None => return Ok(None),
                    };
                    let tag = FieldTag::unpack(raw).map_err(|e| {
                        CodecError::wire_format(
                            format!("invalid field in source data: {}", e),
                            Position::default(),
                        )
                    })?;
                    if tag.field_number() != expected {
                        skip_stream_value(input, tag.wire_type())?;
                        continue;
                    }
                    if tag.wire_type() != WireType::LengthDelimited {
                        return Err(CodecError::wire_format(
                            format!("expected a length-delimited item, found {}", tag.wire_type()),
                            Position::default(),
                        ));
                    }
                    required(read_stream_varint(input)?)?
                } else {
                    match read_stream_varint(input)? {
                        Some(len) => len,
                        None => return Ok(None),
                    }
                }
            }
            PrefixStyle::Fixed32 | PrefixStyle::Fixed32BigEndian => {
                let mut buf = [0u8; 4];
                if !read_exact_or_eof(input, &mut buf)? {
                    return Ok(None);
                }
                if style == PrefixStyle::Fixed32 {
                    LittleEndian::read_u32(&buf) as u64
                } else {
                    BigEndian::read_u32(&buf) as u64
                }
            }
        };
        let mut body = Vec::new();
        let read = input.by_ref().take(len).read_to_end(&mut body)?;
        if (read as u64) < len {
            return Err(CodecError::EndOfStream {
                at: Position::default(),
            });
        }
        return codec.decode_message(type_name, &body).map(Some);
    }
}

fn required(v: Option<u64>) -> Result<u64, CodecError> {
    v.ok_or(CodecError::EndOfStream {
        at: Position::default(),
    })
}

/// `Ok(false)` if the input ends before the first byte.
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<bool, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(CodecError::EndOfStream {
                    at: Position::default(),
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_stream_varint<R: Read>(input: &mut R) -> Result<Option<u64>, CodecError> {
    let mut value = 0u64;
    for i in 0..wire::MAX_VARINT64_LEN {
        let byte = match input.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CodecError::EndOfStream {
                    at: Position::default(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    Err(CodecError::overflow("varint exceeds 64 bits", Position::default()))
}

fn skip_stream_value<R: Read>(input: &mut R, wire_type: WireType) -> Result<(), CodecError> {
    let len = match wire_type {
        WireType::Varint | WireType::SignedVarint => {
            required(read_stream_varint(input)?)?;
            return Ok(());
        }
        WireType::Fixed32 => 4,
        WireType::Fixed64 => 8,
        WireType::LengthDelimited => required(read_stream_varint(input)?)?,
        other => {
            return Err(CodecError::wire_format(
                format!("cannot skip a {} item in a delimited stream", other),
                Position::default(),
            ))
        }
    };
    let copied = io::copy(&mut input.by_ref().take(len), &mut io::sink())?;
    if copied < len {
        return Err(CodecError::EndOfStream {
            at: Position::default(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base128_prefix_with_field_number() {
        let p = prefix(PrefixStyle::Base128, Some(1), 300).unwrap();
        assert_eq!(p, vec![0x0A, 0xAC, 0x02]);
    }

    #[test]
    fn fixed32_prefixes() {
        assert_eq!(prefix(PrefixStyle::Fixed32, None, 5).unwrap(), vec![5, 0, 0, 0]);
        assert_eq!(prefix(PrefixStyle::Fixed32BigEndian, None, 5).unwrap(), vec![0, 0, 0, 5]);
    }

    #[test]
    fn field_number_only_for_base128() {
        assert!(prefix(PrefixStyle::Fixed32, Some(1), 5).is_err());
        assert!(prefix(PrefixStyle::Base128, Some(0), 5).is_err());
    }

    #[test]
    fn skip_item_covers_header_and_payload() {
        // field 3 fixed32, then more data
        let bytes = [0x1D, 1, 2, 3, 4, 0xFF];
        assert_eq!(skip_item(&bytes, 10).unwrap(), 5);
    }

    #[test]
    fn stream_varint_eof_is_clean_only_at_start() {
        let mut empty: &[u8] = &[];
        assert_eq!(read_stream_varint(&mut empty).unwrap(), None);
        let mut cut: &[u8] = &[0x80];
        assert!(matches!(
            read_stream_varint(&mut cut),
            Err(CodecError::EndOfStream { .. })
        ));
    }
}
