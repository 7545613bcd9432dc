use super::SerializationNode;
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::value::Value;
use crate::writer::FrameWriter;

/// Omits the field on write when it equals the configured default.
#[derive(Debug)]
pub struct DefaultValueDecorator {
    default: Value,
    inner: Box<dyn SerializationNode>,
}

impl DefaultValueDecorator {
    pub fn new(default: Value, inner: Box<dyn SerializationNode>) -> Self {
        DefaultValueDecorator { default, inner }
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }
}

impl SerializationNode for DefaultValueDecorator {
    fn requires_old_value(&self) -> bool {
        self.inner.requires_old_value()
    }

    fn returns_value(&self) -> bool {
        self.inner.returns_value()
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        if *value == self.default {
            return Ok(());
        }
        self.inner.write(value, dest, schema)
    }

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        self.inner.read(old, source, schema)
    }
}
