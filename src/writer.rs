//! Sequential encode state machine over a [`ByteSink`].
//!
//! Every value is preceded by exactly one [`FrameWriter::write_field_header`];
//! a second header before the value is written is an error. Nested messages
//! are bracketed by [`FrameWriter::start_sub_item`] /
//! [`FrameWriter::end_sub_item`]. Length-delimited sub-items reserve a
//! one-byte length placeholder which is backfilled (widening the sink if the
//! true length needs more bytes); groups close with an explicit end-group tag.

use crate::error::{CodecError, Position};
use crate::reader::SubItemToken;
use crate::sink::ByteSink;
use crate::wire::{self, FieldTag, WireType, MAX_VARINT64_LEN};

pub struct FrameWriter<'a> {
    sink: &'a mut dyn ByteSink,
    field_number: u32,
    /// Wire type of the header whose value has not been written yet.
    wire_type: Option<WireType>,
    depth: u32,
    max_depth: u32,
    open_blocks: u32,
    packed_field: u32,
    recursion_stack: Vec<usize>,
}

impl<'a> FrameWriter<'a> {
    pub fn new(sink: &'a mut dyn ByteSink, max_depth: u32) -> Self {
        FrameWriter {
            sink,
            field_number: 0,
            wire_type: None,
            depth: 0,
            max_depth,
            open_blocks: 0,
            packed_field: 0,
            recursion_stack: Vec::new(),
        }
    }

    pub fn at(&self) -> Position {
        Position {
            field: self.field_number,
            wire_type: self.wire_type,
            offset: self.sink.position(),
            depth: self.depth,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn write_field_header(&mut self, field_number: u32, wire_type: WireType) -> Result<(), CodecError> {
        if let Some(pending) = self.wire_type {
            return Err(CodecError::wire_format(
                format!(
                    "cannot write a {} header for field {} until the {} value for field {} has been written",
                    wire_type, field_number, pending, self.field_number
                ),
                self.at(),
            ));
        }
        if wire_type == WireType::EndGroup {
            return Err(CodecError::wire_format(
                "end-group headers are written by end_sub_item",
                self.at(),
            ));
        }
        let tag = FieldTag::new(field_number, wire_type)
            .map_err(|e| CodecError::wire_format(e.to_string(), self.at()))?;
        if self.packed_field != 0 {
            if self.packed_field != field_number || !wire_type.is_packable() {
                return Err(CodecError::wire_format(
                    format!("field {} is being written as a packed block", self.packed_field),
                    self.at(),
                ));
            }
            // Inside a packed block the element headers are implicit.
            self.field_number = field_number;
            self.wire_type = Some(wire_type);
            return Ok(());
        }
        self.field_number = field_number;
        self.wire_type = Some(wire_type);
        self.put_varint(tag.pack() as u64)
    }

    /// Lock `field_number` into packed mode for the length-delimited block just started.
    pub fn set_packed_field(&mut self, field_number: u32) -> Result<(), CodecError> {
        if field_number == 0 || self.wire_type.is_some() {
            return Err(CodecError::wire_format("cannot enter packed mode here", self.at()));
        }
        self.packed_field = field_number;
        Ok(())
    }

    pub fn clear_packed_field(&mut self, field_number: u32) -> Result<(), CodecError> {
        if self.packed_field != field_number {
            return Err(CodecError::wire_format(
                format!("field {} is not the packed field", field_number),
                self.at(),
            ));
        }
        self.packed_field = 0;
        Ok(())
    }

    /// Push an instance onto the recursion guard; fails if it is already being written.
    pub fn enter_instance(&mut self, identity: usize) -> Result<(), CodecError> {
        if self.recursion_stack.contains(&identity) {
            return Err(CodecError::recursion(
                format!(
                    "possible recursion detected ({} level(s) deep); the wire format cannot represent cycles",
                    self.recursion_stack.len()
                ),
                self.at(),
            ));
        }
        self.recursion_stack.push(identity);
        Ok(())
    }

    pub fn leave_instance(&mut self, identity: usize) {
        if self.recursion_stack.last() == Some(&identity) {
            self.recursion_stack.pop();
        }
    }

    /// Open a nested message for the pending length-delimited or start-group header.
    pub fn start_sub_item(&mut self, instance: Option<usize>) -> Result<SubItemToken, CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::recursion(
                format!("maximum nesting depth {} exceeded", self.max_depth),
                self.at(),
            ));
        }
        let token = match self.wire_type {
            Some(WireType::StartGroup) => SubItemToken::group(self.field_number),
            Some(WireType::LengthDelimited) => {
                let start = self.sink.position() + 1;
                SubItemToken::block(start)
            }
            _ => {
                return Err(CodecError::wire_format(
                    "a sub-item can only follow a length-delimited or start-group header",
                    self.at(),
                ))
            }
        };
        let token = match instance {
            Some(identity) => {
                self.enter_instance(identity)?;
                token.tracked()
            }
            None => token,
        };
        if token.block_offset().is_some() {
            self.sink.append(&[0])?;
            self.open_blocks += 1;
        }
        self.wire_type = None;
        self.depth += 1;
        Ok(token)
    }

    pub fn end_sub_item(&mut self, token: SubItemToken) -> Result<(), CodecError> {
        if self.wire_type.is_some() {
            return Err(CodecError::wire_format(
                "cannot close a sub-item while a value is pending",
                self.at(),
            ));
        }
        if self.depth == 0 {
            return Err(CodecError::framing("unbalanced end of sub-item", self.at()));
        }
        if token.is_tracked() {
            self.recursion_stack.pop();
        }
        self.packed_field = 0;
        self.depth -= 1;
        if let Some(field) = token.group_field() {
            let tag = FieldTag::new(field, WireType::EndGroup)
                .map_err(|e| CodecError::wire_format(e.to_string(), self.at()))?;
            self.field_number = field;
            return self.put_varint(tag.pack() as u64);
        }
        let start = token.block_offset().unwrap_or_default();
        let len = self.sink.position() - start;
        let mut buf = [0u8; MAX_VARINT64_LEN];
        let n = wire::encode_varint(len, &mut buf);
        if n > 1 {
            log::trace!("widening length placeholder at offset {} by {} byte(s)", start - 1, n - 1);
            self.sink.widen(start, n - 1)?;
        }
        self.sink.patch(start - 1, &buf[..n])?;
        self.open_blocks -= 1;
        if self.open_blocks == 0 {
            let end = self.sink.position();
            self.sink.commit(end)?;
        }
        Ok(())
    }

    /// Append pre-encoded fields (e.g. preserved unknown data) verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.wire_type.is_some() {
            return Err(CodecError::wire_format(
                "cannot write raw bytes while a value is pending",
                self.at(),
            ));
        }
        self.sink.append(bytes)?;
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        match self.pending("uint32")? {
            WireType::Varint => self.put_varint(v as u64)?,
            WireType::Fixed32 => self.sink.append(&wire::encode_fixed32(v))?,
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64(v as u64))?,
            other => return Err(self.unwritable(other, "uint32")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
        match self.pending("int32")? {
            // negative values sign-extend to ten bytes
            WireType::Varint => self.put_varint(v as i64 as u64)?,
            WireType::SignedVarint => self.put_varint(wire::zigzag_encode32(v) as u64)?,
            WireType::Fixed32 => self.sink.append(&wire::encode_fixed32(v as u32))?,
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64(v as i64 as u64))?,
            other => return Err(self.unwritable(other, "int32")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        match self.pending("uint64")? {
            WireType::Varint => self.put_varint(v)?,
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64(v))?,
            WireType::Fixed32 => {
                let narrow = u32::try_from(v).map_err(|_| CodecError::overflow("uint64 as fixed32", self.at()))?;
                self.sink.append(&wire::encode_fixed32(narrow))?
            }
            other => return Err(self.unwritable(other, "uint64")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), CodecError> {
        match self.pending("int64")? {
            WireType::Varint => self.put_varint(v as u64)?,
            WireType::SignedVarint => self.put_varint(wire::zigzag_encode64(v))?,
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64(v as u64))?,
            WireType::Fixed32 => {
                let narrow = i32::try_from(v).map_err(|_| CodecError::overflow("int64 as fixed32", self.at()))?;
                self.sink.append(&wire::encode_fixed32(narrow as u32))?
            }
            other => return Err(self.unwritable(other, "int64")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), CodecError> {
        self.write_u32(u32::from(v))
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), CodecError> {
        match self.pending("float")? {
            WireType::Fixed32 => self.sink.append(&wire::encode_fixed32(v.to_bits()))?,
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64((v as f64).to_bits()))?,
            other => return Err(self.unwritable(other, "float")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
        match self.pending("double")? {
            WireType::Fixed64 => self.sink.append(&wire::encode_fixed64(v.to_bits()))?,
            WireType::Fixed32 => {
                let narrow = v as f32;
                if v.is_finite() && narrow.is_infinite() {
                    return Err(CodecError::overflow("double as fixed32", self.at()));
                }
                self.sink.append(&wire::encode_fixed32(narrow.to_bits()))?
            }
            other => return Err(self.unwritable(other, "double")),
        }
        self.wire_type = None;
        Ok(())
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> Result<(), CodecError> {
        match self.pending("bytes")? {
            WireType::LengthDelimited => {}
            other => return Err(self.unwritable(other, "bytes")),
        }
        self.put_varint(v.len() as u64)?;
        self.sink.append(v)?;
        self.wire_type = None;
        Ok(())
    }

    pub fn write_string(&mut self, v: &str) -> Result<(), CodecError> {
        self.write_bytes(v.as_bytes())
    }

    /// Finish writing: all sub-items must be closed and no value pending.
    pub fn close(self) -> Result<(), CodecError> {
        if self.depth != 0 || self.wire_type.is_some() {
            return Err(CodecError::framing(
                "writer closed with an open sub-item or pending value",
                self.at(),
            ));
        }
        self.sink.flush()?;
        Ok(())
    }

    fn pending(&self, what: &str) -> Result<WireType, CodecError> {
        self.wire_type.ok_or_else(|| {
            CodecError::wire_format(format!("no field header written for {}", what), self.at())
        })
    }

    fn unwritable(&self, wire_type: WireType, what: &str) -> CodecError {
        CodecError::wire_format(format!("{} cannot be written as {}", what, wire_type), self.at())
    }

    fn put_varint(&mut self, v: u64) -> Result<(), CodecError> {
        let mut buf = [0u8; MAX_VARINT64_LEN];
        let n = wire::encode_varint(v, &mut buf);
        self.sink.append(&buf[..n])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_header_before_value_is_rejected() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        w.write_field_header(1, WireType::Varint).unwrap();
        assert!(matches!(
            w.write_field_header(2, WireType::Varint),
            Err(CodecError::WireFormat { .. })
        ));
    }

    #[test]
    fn value_without_header_is_rejected() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        assert!(w.write_u32(1).is_err());
    }

    #[test]
    fn negative_int32_varint_is_ten_bytes() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        w.write_field_header(1, WireType::Varint).unwrap();
        w.write_i32(-1).unwrap();
        w.close().unwrap();
        assert_eq!(out.len(), 11);
    }

    #[test]
    fn short_payload_needs_no_widening() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        w.write_field_header(2, WireType::LengthDelimited).unwrap();
        let token = w.start_sub_item(None).unwrap();
        w.write_field_header(11, WireType::LengthDelimited).unwrap();
        w.write_string("abc").unwrap();
        w.end_sub_item(token).unwrap();
        w.close().unwrap();
        assert_eq!(out, [0x12, 0x05, 0x5a, 0x03, 0x61, 0x62, 0x63]);
    }

    #[test]
    fn group_closes_with_end_tag() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        w.write_field_header(3, WireType::StartGroup).unwrap();
        let token = w.start_sub_item(None).unwrap();
        w.write_field_header(1, WireType::Varint).unwrap();
        w.write_u32(5).unwrap();
        w.end_sub_item(token).unwrap();
        w.close().unwrap();
        assert_eq!(out, [0x1b, 0x08, 0x05, 0x1c]);
    }

    #[test]
    fn same_instance_twice_is_recursion() {
        let mut out = Vec::new();
        let mut w = FrameWriter::new(&mut out, 16);
        w.write_field_header(1, WireType::LengthDelimited).unwrap();
        let _outer = w.start_sub_item(Some(42)).unwrap();
        w.write_field_header(1, WireType::LengthDelimited).unwrap();
        assert!(matches!(w.start_sub_item(Some(42)), Err(CodecError::Recursion { .. })));
    }
}
