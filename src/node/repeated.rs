use super::tag::check_wire_type;
use super::{mismatch, SerializationNode};
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::value::Value;
use crate::wire::WireType;
use crate::writer::FrameWriter;

/// Repeated field: one header per element, or a single packed block.
///
/// Reads append to the existing list. A packed block is accepted for any
/// packable element type whether or not the field is declared packed.
#[derive(Debug)]
pub struct RepeatedDecorator {
    field_number: u32,
    wire_type: WireType,
    packed: bool,
    strict: bool,
    element: Box<dyn SerializationNode>,
}

impl RepeatedDecorator {
    pub fn new(
        field_number: u32,
        wire_type: WireType,
        packed: bool,
        strict: bool,
        element: Box<dyn SerializationNode>,
    ) -> Self {
        RepeatedDecorator {
            field_number,
            wire_type,
            packed,
            strict,
            element,
        }
    }

    pub fn is_packed(&self) -> bool {
        self.packed && self.wire_type.is_packable()
    }

    fn read_element(
        &self,
        list: &mut Vec<Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<(), CodecError> {
        if let Some(item) = self.element.read(None, source, schema)? {
            list.push(item);
        }
        Ok(())
    }
}

impl SerializationNode for RepeatedDecorator {
    fn requires_old_value(&self) -> bool {
        true
    }

    fn returns_value(&self) -> bool {
        true
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        let items = match value {
            Value::List(items) => items,
            other => return Err(mismatch("list", other, dest.at())),
        };
        if items.is_empty() {
            return Ok(());
        }
        if self.is_packed() {
            dest.write_field_header(self.field_number, WireType::LengthDelimited)?;
            let token = dest.start_sub_item(None)?;
            dest.set_packed_field(self.field_number)?;
            for item in items {
                dest.write_field_header(self.field_number, self.wire_type)?;
                self.element.write(item, dest, schema)?;
            }
            dest.clear_packed_field(self.field_number)?;
            return dest.end_sub_item(token);
        }
        for item in items {
            dest.write_field_header(self.field_number, self.wire_type)?;
            self.element.write(item, dest, schema)?;
        }
        Ok(())
    }

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        let mut created = None;
        let list = match old {
            Some(Value::List(items)) => items,
            _ => created.insert(Vec::new()),
        };
        if source.wire_type() == Some(WireType::LengthDelimited) && self.wire_type.is_packable() {
            let token = source.start_sub_item()?;
            while !source.is_block_end()? {
                source.set_wire_type(self.wire_type);
                self.read_element(list, source, schema)?;
            }
            source.end_sub_item(token)?;
        } else {
            check_wire_type(source, self.wire_type, self.strict)?;
            self.read_element(list, source, schema)?;
        }
        Ok(created.map(Value::List))
    }
}
