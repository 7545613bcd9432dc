use super::SerializationNode;
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::value::Value;
use crate::writer::FrameWriter;
use crate::wire::WireType;

/// Emits the field header before the inner value; checks the incoming wire type on read.
///
/// Base wire types are only checked when `strict`; specialized ones (e.g.
/// signed varint) are always hinted so the inner node decodes them correctly.
#[derive(Debug)]
pub struct TagDecorator {
    field_number: u32,
    wire_type: WireType,
    strict: bool,
    inner: Box<dyn SerializationNode>,
}

impl TagDecorator {
    pub fn new(field_number: u32, wire_type: WireType, strict: bool, inner: Box<dyn SerializationNode>) -> Self {
        TagDecorator {
            field_number,
            wire_type,
            strict,
            inner,
        }
    }

    pub fn field_number(&self) -> u32 {
        self.field_number
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }
}

/// Apply the strict/lenient wire-type check for a field about to be read.
pub(crate) fn check_wire_type(
    source: &mut FrameReader<'_>,
    wire_type: WireType,
    strict: bool,
) -> Result<(), CodecError> {
    if strict {
        source.assert_wire_type(wire_type)
    } else {
        if wire_type.is_extension() {
            source.hint(wire_type);
        }
        Ok(())
    }
}

impl SerializationNode for TagDecorator {
    fn requires_old_value(&self) -> bool {
        self.inner.requires_old_value()
    }

    fn returns_value(&self) -> bool {
        self.inner.returns_value()
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        dest.write_field_header(self.field_number, self.wire_type)?;
        self.inner.write(value, dest, schema)
    }

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        check_wire_type(source, self.wire_type, self.strict)?;
        self.inner.read(old, source, schema)
    }
}
