use super::{mismatch, SerializationNode};
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::{ScalarKind, SchemaProvider};
use crate::value::Value;
use crate::writer::FrameWriter;

/// Leaf node for one scalar kind. The wire form follows the pending header.
#[derive(Debug, Clone, Copy)]
pub struct ScalarNode {
    kind: ScalarKind,
}

impl ScalarNode {
    pub fn new(kind: ScalarKind) -> Self {
        ScalarNode { kind }
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }
}

impl SerializationNode for ScalarNode {
    fn requires_old_value(&self) -> bool {
        false
    }

    fn returns_value(&self) -> bool {
        true
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, _schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        match (self.kind, value) {
            (ScalarKind::Bool, Value::Bool(b)) => dest.write_bool(*b),
            (ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32, Value::I32(v)) => dest.write_i32(*v),
            (ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64, Value::I64(v)) => dest.write_i64(*v),
            (ScalarKind::UInt32 | ScalarKind::Fixed32, Value::U32(v)) => dest.write_u32(*v),
            (ScalarKind::UInt64 | ScalarKind::Fixed64, Value::U64(v)) => dest.write_u64(*v),
            (ScalarKind::Float, Value::F32(v)) => dest.write_f32(*v),
            (ScalarKind::Double, Value::F64(v)) => dest.write_f64(*v),
            (ScalarKind::String, Value::String(s)) => dest.write_string(s),
            (ScalarKind::Bytes, Value::Bytes(b)) => dest.write_bytes(b),
            (kind, other) => Err(mismatch(kind.name(), other, dest.at())),
        }
    }

    fn read(
        &self,
        _old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        _schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        let value = match self.kind {
            ScalarKind::Bool => Value::Bool(source.read_bool()?),
            ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32 => Value::I32(source.read_i32()?),
            ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64 => Value::I64(source.read_i64()?),
            ScalarKind::UInt32 | ScalarKind::Fixed32 => Value::U32(source.read_u32()?),
            ScalarKind::UInt64 | ScalarKind::Fixed64 => Value::U64(source.read_u64()?),
            ScalarKind::Float => Value::F32(source.read_f32()?),
            ScalarKind::Double => Value::F64(source.read_f64()?),
            ScalarKind::String => Value::String(source.read_string()?),
            ScalarKind::Bytes => Value::Bytes(source.read_bytes()?),
        };
        Ok(Some(value))
    }
}
