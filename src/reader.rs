//! Sequential decode state machine over a [`ByteSource`].
//!
//! The reader walks one field at a time: [`FrameReader::read_field_header`]
//! yields the next field number (0 at the end of the current message), then
//! exactly one value read, [`FrameReader::skip_field`], or sub-item descent
//! must follow. Nested messages are bracketed by
//! [`FrameReader::start_sub_item`] / [`FrameReader::end_sub_item`], which
//! validate that the declared length (or matching end-group) was honoured.

use crate::error::{CodecError, Position};
use crate::source::ByteSource;
use crate::wire::{self, FieldTag, VarintError, WireType, MAX_VARINT32_LEN, MAX_VARINT64_LEN};

const UNBOUNDED: u64 = u64::MAX;
/// Largest step taken when reading a length-delimited payload.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Group opened by this field number.
    Group(u32),
    /// Length-delimited block; holds the enclosing block's end (reader) or payload start (writer).
    Block(u64),
}

/// Resume marker returned by `start_sub_item`; hand it back, once, to the matching `end_sub_item`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a sub-item must be closed with end_sub_item"]
pub struct SubItemToken {
    kind: TokenKind,
    tracked: bool,
}

impl SubItemToken {
    pub(crate) fn group(field: u32) -> Self {
        SubItemToken {
            kind: TokenKind::Group(field),
            tracked: false,
        }
    }

    pub(crate) fn block(offset: u64) -> Self {
        SubItemToken {
            kind: TokenKind::Block(offset),
            tracked: false,
        }
    }

    pub(crate) fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    pub(crate) fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub(crate) fn group_field(&self) -> Option<u32> {
        match self.kind {
            TokenKind::Group(f) => Some(f),
            TokenKind::Block(_) => None,
        }
    }

    pub(crate) fn block_offset(&self) -> Option<u64> {
        match self.kind {
            TokenKind::Block(o) => Some(o),
            TokenKind::Group(_) => None,
        }
    }
}

pub struct FrameReader<'a> {
    source: &'a mut dyn ByteSource,
    position: u64,
    block_end: u64,
    depth: u32,
    max_depth: u32,
    field_number: u32,
    wire_type: Option<WireType>,
    strict_sub_types: bool,
    /// When set, every consumed byte is copied here (unknown-field capture).
    tap: Option<Vec<u8>>,
}

impl<'a> FrameReader<'a> {
    pub fn new(source: &'a mut dyn ByteSource, max_depth: u32) -> Self {
        FrameReader {
            source,
            position: 0,
            block_end: UNBOUNDED,
            depth: 0,
            max_depth,
            field_number: 0,
            wire_type: None,
            strict_sub_types: false,
            tap: None,
        }
    }

    /// Treat sub-type discriminants that do not fit the value being read as fatal.
    pub fn set_strict_sub_types(&mut self, strict: bool) {
        self.strict_sub_types = strict;
    }

    pub fn strict_sub_types(&self) -> bool {
        self.strict_sub_types
    }

    pub fn at(&self) -> Position {
        Position {
            field: self.field_number,
            wire_type: self.wire_type,
            offset: self.position,
            depth: self.depth,
        }
    }

    /// Absolute number of bytes consumed.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn field_number(&self) -> u32 {
        self.field_number
    }

    /// Wire type of the pending value, if a header has been read and not yet consumed.
    pub fn wire_type(&self) -> Option<WireType> {
        self.wire_type
    }

    pub(crate) fn set_wire_type(&mut self, wire_type: WireType) {
        self.wire_type = Some(wire_type);
    }

    /// Next field number, or 0 at the end of the current message or group.
    pub fn read_field_header(&mut self) -> Result<u32, CodecError> {
        if self.block_end <= self.position || self.wire_type == Some(WireType::EndGroup) {
            return Ok(0);
        }
        if self.block_end == UNBOUNDED && self.source.is_exhausted()? {
            self.wire_type = None;
            self.field_number = 0;
            return Ok(0);
        }
        let raw = self.read_raw_varint()?;
        let tag = FieldTag::unpack(raw).map_err(|e| {
            CodecError::wire_format(format!("invalid field in source data: {}", e), self.at())
        })?;
        self.field_number = tag.field_number();
        self.wire_type = Some(tag.wire_type());
        if tag.wire_type() == WireType::EndGroup {
            if self.depth > 0 {
                return Ok(0);
            }
            return Err(CodecError::wire_format(
                "unexpected end-group in source data",
                self.at(),
            ));
        }
        Ok(self.field_number)
    }

    /// True when the current length-delimited block (or the whole source) is used up.
    pub fn is_block_end(&mut self) -> Result<bool, CodecError> {
        if self.block_end == UNBOUNDED {
            return Ok(self.source.is_exhausted()?);
        }
        Ok(self.position >= self.block_end)
    }

    /// Narrow the pending wire type to a specialized form sharing its base.
    pub fn hint(&mut self, wire_type: WireType) {
        if let Some(current) = self.wire_type {
            if current != wire_type && current.base() == wire_type.base() {
                self.wire_type = Some(wire_type);
            }
        }
    }

    /// Strict form of [`FrameReader::hint`]: any other wire type is an error.
    pub fn assert_wire_type(&mut self, wire_type: WireType) -> Result<(), CodecError> {
        match self.wire_type {
            Some(current) if current == wire_type => Ok(()),
            Some(current) if current.base() == wire_type.base() => {
                self.wire_type = Some(wire_type);
                Ok(())
            }
            _ => Err(CodecError::wire_format(
                format!("expected {} for field {}", wire_type, self.field_number),
                self.at(),
            )),
        }
    }

    pub fn start_sub_item(&mut self) -> Result<SubItemToken, CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::recursion(
                format!("maximum nesting depth {} exceeded", self.max_depth),
                self.at(),
            ));
        }
        match self.wire_type {
            Some(WireType::LengthDelimited) => {
                let len = self.read_raw_varint()?;
                let end = self.position.checked_add(len).ok_or_else(|| {
                    CodecError::overflow("sub-message length overflows offset", self.at())
                })?;
                if end > self.block_end {
                    return Err(CodecError::framing(
                        format!("sub-message length {} exceeds the enclosing block", len),
                        self.at(),
                    ));
                }
                let token = SubItemToken::block(self.block_end);
                self.block_end = end;
                self.depth += 1;
                self.wire_type = None;
                Ok(token)
            }
            Some(WireType::StartGroup) => {
                self.depth += 1;
                self.wire_type = None;
                Ok(SubItemToken::group(self.field_number))
            }
            _ => Err(CodecError::wire_format(
                "a sub-item can only start from a length-delimited or start-group value",
                self.at(),
            )),
        }
    }

    pub fn end_sub_item(&mut self, token: SubItemToken) -> Result<(), CodecError> {
        if self.depth == 0 {
            return Err(CodecError::framing("unbalanced end of sub-item", self.at()));
        }
        match token.kind {
            TokenKind::Block(resume) => {
                if self.position < self.block_end {
                    return Err(CodecError::framing("sub-message not read entirely", self.at()));
                }
                if self.position > self.block_end {
                    return Err(CodecError::framing("sub-message not read correctly", self.at()));
                }
                self.block_end = resume;
                self.depth -= 1;
                self.wire_type = None;
                Ok(())
            }
            TokenKind::Group(field) => {
                if self.wire_type != Some(WireType::EndGroup) {
                    return Err(CodecError::framing(
                        format!("group for field {} was not closed", field),
                        self.at(),
                    ));
                }
                if self.field_number != field {
                    return Err(CodecError::framing("wrong group was ended", self.at()));
                }
                self.depth -= 1;
                self.wire_type = None;
                Ok(())
            }
        }
    }

    /// Discard the pending value, leaving the cursor at the next header.
    pub fn skip_field(&mut self) -> Result<(), CodecError> {
        match self.wire_type {
            Some(WireType::Fixed32) => self.skip_bytes(4)?,
            Some(WireType::Fixed64) => self.skip_bytes(8)?,
            Some(WireType::LengthDelimited) => {
                let len = self.read_raw_varint()?;
                self.skip_bytes(len)?;
            }
            Some(WireType::Varint) | Some(WireType::SignedVarint) => {
                self.read_raw_varint()?;
            }
            Some(WireType::StartGroup) => {
                let field = self.field_number;
                if self.depth >= self.max_depth {
                    return Err(CodecError::recursion(
                        format!("maximum nesting depth {} exceeded", self.max_depth),
                        self.at(),
                    ));
                }
                self.wire_type = None;
                self.depth += 1;
                while self.read_field_header()? > 0 {
                    self.skip_field()?;
                }
                if self.wire_type != Some(WireType::EndGroup) {
                    return Err(CodecError::framing(
                        format!("unexpected end of data inside group {}", field),
                        self.at(),
                    ));
                }
                if self.field_number != field {
                    return Err(CodecError::framing("wrong group was ended", self.at()));
                }
                self.depth -= 1;
            }
            _ => {
                return Err(CodecError::wire_format(
                    "cannot skip this wire type",
                    self.at(),
                ))
            }
        }
        self.wire_type = None;
        Ok(())
    }

    /// Skip the pending value but return its raw encoding, header included.
    pub fn capture_field(&mut self) -> Result<Vec<u8>, CodecError> {
        let wire_type = self.wire_type.ok_or_else(|| {
            CodecError::wire_format("no field header is pending", self.at())
        })?;
        let tag = FieldTag::new(self.field_number, wire_type)
            .map_err(|e| CodecError::wire_format(e.to_string(), self.at()))?;
        let mut head = Vec::with_capacity(8);
        wire::write_varint(&mut head, tag.pack() as u64);
        self.tap = Some(head);
        let result = self.skip_field();
        let captured = self.tap.take().unwrap_or_default();
        result.map(|()| captured)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let v = match self.pending("uint32")? {
            WireType::Varint => self.read_raw_varint32()?,
            WireType::Fixed32 => self.read_fixed32()?,
            WireType::Fixed64 => {
                let raw = self.read_fixed64()?;
                u32::try_from(raw).map_err(|_| CodecError::overflow("uint32", self.at()))?
            }
            other => return Err(self.unreadable(other, "uint32")),
        };
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let wide = match self.pending("int32")? {
            WireType::Varint => self.read_raw_varint()? as i64,
            WireType::SignedVarint => wire::zigzag_decode64(self.read_raw_varint()?),
            WireType::Fixed32 => self.read_fixed32()? as i32 as i64,
            WireType::Fixed64 => self.read_fixed64()? as i64,
            other => return Err(self.unreadable(other, "int32")),
        };
        let v = i32::try_from(wide).map_err(|_| CodecError::overflow("int32", self.at()))?;
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let v = match self.pending("uint64")? {
            WireType::Varint => self.read_raw_varint()?,
            WireType::Fixed32 => self.read_fixed32()? as u64,
            WireType::Fixed64 => self.read_fixed64()?,
            other => return Err(self.unreadable(other, "uint64")),
        };
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let v = match self.pending("int64")? {
            WireType::Varint => self.read_raw_varint()? as i64,
            WireType::SignedVarint => wire::zigzag_decode64(self.read_raw_varint()?),
            WireType::Fixed32 => self.read_fixed32()? as i32 as i64,
            WireType::Fixed64 => self.read_fixed64()? as i64,
            other => return Err(self.unreadable(other, "int64")),
        };
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::wire_format(
                format!("unexpected boolean value {}", other),
                self.at(),
            )),
        }
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let v = match self.pending("float")? {
            WireType::Fixed32 => f32::from_bits(self.read_fixed32()?),
            WireType::Fixed64 => {
                let wide = f64::from_bits(self.read_fixed64()?);
                let narrow = wide as f32;
                if wide.is_finite() && narrow.is_infinite() {
                    return Err(CodecError::overflow("float", self.at()));
                }
                narrow
            }
            other => return Err(self.unreadable(other, "float")),
        };
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let v = match self.pending("double")? {
            WireType::Fixed64 => f64::from_bits(self.read_fixed64()?),
            WireType::Fixed32 => f32::from_bits(self.read_fixed32()?) as f64,
            other => return Err(self.unreadable(other, "double")),
        };
        self.wire_type = None;
        Ok(v)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        match self.pending("bytes")? {
            WireType::LengthDelimited => {}
            other => return Err(self.unreadable(other, "bytes")),
        }
        let len = self.read_raw_varint()?;
        if len > self.block_end.saturating_sub(self.position) {
            return Err(CodecError::framing(
                format!("length {} exceeds the enclosing block", len),
                self.at(),
            ));
        }
        // grow with the data actually read, never with the declared length
        let mut buf = Vec::with_capacity(len.min(READ_CHUNK as u64) as usize);
        let mut chunk = [0u8; READ_CHUNK];
        let mut left = len;
        while left > 0 {
            let step = left.min(READ_CHUNK as u64) as usize;
            self.take(&mut chunk[..step])?;
            buf.extend_from_slice(&chunk[..step]);
            left -= step as u64;
        }
        self.wire_type = None;
        Ok(buf)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let at = self.at();
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| CodecError::wire_format("invalid UTF-8 in string", at))
    }

    fn pending(&self, what: &str) -> Result<WireType, CodecError> {
        self.wire_type.ok_or_else(|| {
            CodecError::wire_format(format!("no field header is pending for {}", what), self.at())
        })
    }

    fn unreadable(&self, wire_type: WireType, what: &str) -> CodecError {
        CodecError::wire_format(format!("{} cannot be read as {}", wire_type, what), self.at())
    }

    fn read_fixed32(&mut self) -> Result<u32, CodecError> {
        let mut b = [0u8; 4];
        self.take(&mut b)?;
        Ok(wire::decode_fixed32(&b))
    }

    fn read_fixed64(&mut self) -> Result<u64, CodecError> {
        let mut b = [0u8; 8];
        self.take(&mut b)?;
        Ok(wire::decode_fixed64(&b))
    }

    fn read_raw_varint(&mut self) -> Result<u64, CodecError> {
        self.read_varint_with(MAX_VARINT64_LEN, wire::decode_varint, "varint exceeds 64 bits")
    }

    /// Varint bounded to 5 bytes, for values that must fit 32 bits.
    fn read_raw_varint32(&mut self) -> Result<u32, CodecError> {
        self.read_varint_with(MAX_VARINT32_LEN, wire::decode_varint32, "uint32")
    }

    fn read_varint_with<T>(
        &mut self,
        max_len: usize,
        decode: fn(&[u8]) -> Result<(T, usize), VarintError>,
        overflow: &str,
    ) -> Result<T, CodecError> {
        let limit = self.block_end.saturating_sub(self.position).min(max_len as u64) as usize;
        let mut buf = [0u8; MAX_VARINT64_LEN];
        let avail = self.source.peek(&mut buf[..limit])?;
        match decode(&buf[..avail]) {
            Ok((v, n)) => {
                self.take(&mut buf[..n])?;
                Ok(v)
            }
            Err(VarintError::Overflow) => Err(CodecError::overflow(overflow, self.at())),
            Err(VarintError::Truncated) if avail == limit && limit < max_len => Err(
                CodecError::framing("varint crosses the end of the enclosing block", self.at()),
            ),
            Err(VarintError::Truncated) => Err(CodecError::EndOfStream { at: self.at() }),
        }
    }

    /// Consume exactly `buf.len()` bytes inside the current block.
    fn take(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        let len = buf.len() as u64;
        if len > self.block_end.saturating_sub(self.position) {
            return Err(CodecError::framing("sub-message not read correctly", self.at()));
        }
        let n = self.source.read(buf)?;
        self.position += n as u64;
        if let Some(tap) = self.tap.as_mut() {
            tap.extend_from_slice(&buf[..n]);
        }
        if n < buf.len() {
            return Err(CodecError::EndOfStream { at: self.at() });
        }
        Ok(())
    }

    fn skip_bytes(&mut self, len: u64) -> Result<(), CodecError> {
        if len > self.block_end.saturating_sub(self.position) {
            return Err(CodecError::framing(
                format!("length {} exceeds the enclosing block", len),
                self.at(),
            ));
        }
        if self.tap.is_some() {
            let mut left = len;
            let mut chunk = [0u8; 256];
            while left > 0 {
                let step = left.min(chunk.len() as u64) as usize;
                self.take(&mut chunk[..step])?;
                left -= step as u64;
            }
            return Ok(());
        }
        let n = self.source.skip(len)?;
        self.position += n;
        if n < len {
            return Err(CodecError::EndOfStream { at: self.at() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    fn reader(bytes: &[u8]) -> (SliceSource<'_>, u32) {
        (SliceSource::new(bytes), 16)
    }

    #[test]
    fn reads_scenario_a_bytes() {
        let (mut src, depth) = reader(&[0x50, 0xb9, 0x60]);
        let mut r = FrameReader::new(&mut src, depth);
        assert_eq!(r.read_field_header().unwrap(), 10);
        assert_eq!(r.read_i32().unwrap(), 12345);
        assert_eq!(r.read_field_header().unwrap(), 0);
    }

    #[test]
    fn end_group_at_top_level_is_fatal() {
        let (mut src, depth) = reader(&[0x0c]);
        let mut r = FrameReader::new(&mut src, depth);
        let err = r.read_field_header().unwrap_err();
        assert!(matches!(err, CodecError::WireFormat { .. }), "{err}");
    }

    #[test]
    fn field_zero_is_fatal() {
        let (mut src, depth) = reader(&[0x00, 0x01]);
        let mut r = FrameReader::new(&mut src, depth);
        assert!(matches!(r.read_field_header(), Err(CodecError::WireFormat { .. })));
    }

    #[test]
    fn hint_and_assert() {
        let (mut src, depth) = reader(&[0x08, 0x03]);
        let mut r = FrameReader::new(&mut src, depth);
        r.read_field_header().unwrap();
        assert!(r.assert_wire_type(WireType::Fixed32).is_err());
        r.hint(WireType::SignedVarint);
        assert_eq!(r.wire_type(), Some(WireType::SignedVarint));
        assert_eq!(r.read_i32().unwrap(), -2);
    }

    #[test]
    fn truncated_value_is_end_of_stream() {
        let (mut src, depth) = reader(&[0x0d, 0x01, 0x02]);
        let mut r = FrameReader::new(&mut src, depth);
        r.read_field_header().unwrap();
        let err = r.read_u32().unwrap_err();
        assert!(matches!(err, CodecError::EndOfStream { .. }), "{err}");
        assert_eq!(err.position().unwrap().field, 1);
    }

    #[test]
    fn capture_copies_group_verbatim() {
        // field 3 group { field 1 varint 5 } end, then field 2 varint 7
        let bytes = [0x1b, 0x08, 0x05, 0x1c, 0x10, 0x07];
        let (mut src, depth) = reader(&bytes);
        let mut r = FrameReader::new(&mut src, depth);
        assert_eq!(r.read_field_header().unwrap(), 3);
        assert_eq!(r.capture_field().unwrap(), &bytes[..4]);
        assert_eq!(r.read_field_header().unwrap(), 2);
        assert_eq!(r.read_u32().unwrap(), 7);
    }

    #[test]
    fn depth_limit_applies_to_sub_items() {
        // field 1 group, nested field 1 group, ...
        let bytes = [0x0b, 0x0b, 0x0b, 0x0c, 0x0c, 0x0c];
        let mut src = SliceSource::new(&bytes);
        let mut r = FrameReader::new(&mut src, 2);
        r.read_field_header().unwrap();
        let _outer = r.start_sub_item().unwrap();
        r.read_field_header().unwrap();
        let _inner = r.start_sub_item().unwrap();
        r.read_field_header().unwrap();
        assert!(matches!(r.start_sub_item(), Err(CodecError::Recursion { .. })));
    }
}
