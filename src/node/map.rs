use super::tag::check_wire_type;
use super::{mismatch, ScalarNode, SerializationNode};
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::{FieldType, ScalarKind, SchemaProvider};
use crate::value::Value;
use crate::wire::WireType;
use crate::writer::FrameWriter;

const KEY_FIELD: u32 = 1;
const VALUE_FIELD: u32 = 2;

/// Map field: each entry is a nested `{1: key, 2: value}` message.
///
/// Entries with a repeated key replace the earlier value; a missing key or
/// value takes the kind's default.
#[derive(Debug)]
pub struct MapDecorator {
    field_number: u32,
    key_kind: ScalarKind,
    key: ScalarNode,
    value_type: FieldType,
    value: Box<dyn SerializationNode>,
}

impl MapDecorator {
    pub fn new(field_number: u32, key: ScalarKind, value_type: FieldType, value: Box<dyn SerializationNode>) -> Self {
        MapDecorator {
            field_number,
            key_kind: key,
            key: ScalarNode::new(key),
            value_type,
            value,
        }
    }

    fn default_value(&self, schema: &dyn SchemaProvider) -> Result<Value, CodecError> {
        match self.value_type {
            FieldType::Scalar(kind) => Ok(kind.default_value()),
            FieldType::Message(id) | FieldType::Group(id) => Ok(Value::Message(schema.create_instance(id)?)),
        }
    }

    fn read_entry(
        &self,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<(Value, Value), CodecError> {
        let token = source.start_sub_item()?;
        let mut key = None;
        let mut value: Option<Value> = None;
        loop {
            match source.read_field_header()? {
                0 => break,
                KEY_FIELD => {
                    check_wire_type(source, self.key_kind.wire_type(), false)?;
                    key = self.key.read(None, source, schema)?;
                }
                VALUE_FIELD => {
                    check_wire_type(source, self.value_type.wire_type(), false)?;
                    let fresh = self.value.read(value.as_mut(), source, schema)?;
                    if fresh.is_some() {
                        value = fresh;
                    }
                }
                _ => source.skip_field()?,
            }
        }
        source.end_sub_item(token)?;
        let key = key.unwrap_or_else(|| self.key_kind.default_value());
        let value = match value {
            Some(v) => v,
            None => self.default_value(schema)?,
        };
        Ok((key, value))
    }
}

impl SerializationNode for MapDecorator {
    fn requires_old_value(&self) -> bool {
        true
    }

    fn returns_value(&self) -> bool {
        true
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        let entries = match value {
            Value::Map(entries) => entries,
            other => return Err(mismatch("map", other, dest.at())),
        };
        for (key, value) in entries {
            dest.write_field_header(self.field_number, WireType::LengthDelimited)?;
            let token = dest.start_sub_item(None)?;
            dest.write_field_header(KEY_FIELD, self.key_kind.wire_type())?;
            self.key.write(key, dest, schema)?;
            dest.write_field_header(VALUE_FIELD, self.value_type.wire_type())?;
            self.value.write(value, dest, schema)?;
            dest.end_sub_item(token)?;
        }
        Ok(())
    }

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        let (key, value) = self.read_entry(source, schema)?;
        match old {
            Some(Value::Map(entries)) => {
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(None)
            }
            _ => Ok(Some(Value::Map(vec![(key, value)]))),
        }
    }
}
