//! Encode/decode messages against a [`Schema`].
//!
//! The codec owns an `Arc<Schema>` and a [`CodecConfig`]. Every call allocates
//! its own [`FrameReader`]/[`FrameWriter`], so one codec can be shared freely
//! across threads.

use crate::error::CodecError;
use crate::node::{read_message, read_message_into, write_message};
use crate::reader::FrameReader;
use crate::schema::{Schema, SchemaProvider, TypeId};
use crate::sink::{ByteSink, StreamSink};
use crate::source::{ByteSource, SliceSource, StreamSource};
use crate::value::{Message, Value};
use crate::writer::FrameWriter;
use std::io::{Read, Write};
use std::sync::Arc;

pub const DEFAULT_MAX_DEPTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Nesting bound for sub-messages, groups and inheritance levels.
    pub max_depth: u32,
    /// Fail on sub-type fields that do not fit the instance being read,
    /// instead of treating them as unknown fields.
    pub strict_sub_types: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            strict_sub_types: false,
        }
    }
}

impl CodecConfig {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_strict_sub_types(mut self, strict: bool) -> Self {
        self.strict_sub_types = strict;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Codec {
    schema: Arc<Schema>,
    config: CodecConfig,
}

impl Codec {
    pub fn new(schema: Arc<Schema>) -> Self {
        Codec::with_config(schema, CodecConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, config: CodecConfig) -> Self {
        Codec { schema, config }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    fn type_id(&self, name: &str) -> Result<TypeId, CodecError> {
        self.schema
            .type_id(name)
            .ok_or_else(|| CodecError::schema(format!("unknown message type: {}", name)))
    }

    fn reader<'a>(&self, source: &'a mut dyn ByteSource) -> FrameReader<'a> {
        let mut reader = FrameReader::new(source, self.config.max_depth);
        reader.set_strict_sub_types(self.config.strict_sub_types);
        reader
    }

    /// Encode one message as a top-level body (no length prefix).
    pub fn encode_message(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let mut writer = FrameWriter::new(&mut out, self.config.max_depth);
        writer.enter_instance(message.identity())?;
        write_message(message, message.type_id(), &mut writer, self.schema.as_ref())?;
        writer.leave_instance(message.identity());
        writer.close()?;
        Ok(out)
    }

    /// Encode a `Value::Message` or `Value::Shared`.
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.write_to(value, &mut out)?;
        Ok(out)
    }

    /// Encode into any [`ByteSink`]; the sink is committed and flushed on success.
    pub fn write_to(&self, value: &Value, sink: &mut dyn ByteSink) -> Result<(), CodecError> {
        let mut writer = FrameWriter::new(sink, self.config.max_depth);
        match value {
            Value::Message(message) => {
                writer.enter_instance(message.identity())?;
                write_message(message, message.type_id(), &mut writer, self.schema.as_ref())?;
                writer.leave_instance(message.identity());
            }
            Value::Shared(shared) => {
                writer.enter_instance(shared.identity())?;
                {
                    let message = shared.lock();
                    write_message(&message, message.type_id(), &mut writer, self.schema.as_ref())?;
                }
                writer.leave_instance(shared.identity());
            }
            other => {
                return Err(CodecError::schema(format!(
                    "only messages can be encoded at top level, found {}",
                    other.kind_name()
                )))
            }
        }
        writer.close()
    }

    /// Encode straight into a writer. Bytes reach `out` as soon as no length placeholder is open.
    pub fn write_to_stream<W: Write>(&self, value: &Value, out: W) -> Result<W, CodecError> {
        let mut sink = StreamSink::new(out);
        self.write_to(value, &mut sink)?;
        Ok(sink.into_inner()?)
    }

    /// Decode a whole buffer as a message of the named type.
    pub fn decode_message(&self, type_name: &str, bytes: &[u8]) -> Result<Message, CodecError> {
        let id = self.type_id(type_name)?;
        self.decode_by_id(id, bytes)
    }

    pub fn decode_by_id(&self, type_id: TypeId, bytes: &[u8]) -> Result<Message, CodecError> {
        let mut source = SliceSource::new(bytes);
        self.read_from(type_id, &mut source)
    }

    /// Merge `bytes` into `message`: scalars overwrite, lists append, maps upsert,
    /// nested messages merge. `message` may be upgraded to a sub-type.
    pub fn merge_message(&self, message: &mut Message, bytes: &[u8]) -> Result<(), CodecError> {
        let mut source = SliceSource::new(bytes);
        let mut reader = self.reader(&mut source);
        let declared = message.type_id();
        read_message_into(message, declared, &mut reader, self.schema.as_ref())
    }

    /// Read one message that extends to the end of `source`.
    pub fn read_from(&self, type_id: TypeId, source: &mut dyn ByteSource) -> Result<Message, CodecError> {
        if self.schema.definition(type_id).is_none() {
            return Err(CodecError::schema(format!("unknown type id {}", type_id.index())));
        }
        let mut reader = self.reader(source);
        read_message(type_id, &mut reader, self.schema.as_ref())
    }

    pub fn read_from_stream<R: Read>(&self, type_name: &str, input: R) -> Result<Message, CodecError> {
        let id = self.type_id(type_name)?;
        let mut source = StreamSource::new(input);
        self.read_from(id, &mut source)
    }
}
