//! Composite message node and the inheritance coordinator.
//!
//! A message is always encoded from the root of its hierarchy down. At each
//! level the writer first emits the sub-type arm leading to the runtime type
//! (a nested message under the arm's reserved field number), then the level's
//! own fields, then any unknown bytes preserved at that level. Reading walks
//! the same structure and upgrades the instance in place when an arm for a
//! more specific type shows up.

use super::{mismatch, SerializationNode};
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::{SchemaProvider, TypeId, UnknownFields};
use crate::value::{Message, Value};
use crate::wire::WireType;
use crate::writer::FrameWriter;

/// Nested message field whose declared type is `type_id` (or any sub-type of it).
#[derive(Debug, Clone, Copy)]
pub struct MessageTypeNode {
    type_id: TypeId,
}

impl MessageTypeNode {
    pub fn new(type_id: TypeId) -> Self {
        MessageTypeNode { type_id }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl SerializationNode for MessageTypeNode {
    fn requires_old_value(&self) -> bool {
        true
    }

    fn returns_value(&self) -> bool {
        true
    }

    fn write(&self, value: &Value, dest: &mut FrameWriter<'_>, schema: &dyn SchemaProvider) -> Result<(), CodecError> {
        match value {
            Value::Message(message) => {
                let token = dest.start_sub_item(Some(message.identity()))?;
                write_message(message, self.type_id, dest, schema)?;
                dest.end_sub_item(token)
            }
            Value::Shared(shared) => {
                // Enter the recursion guard before locking: a cycle must fail, not deadlock.
                let token = dest.start_sub_item(Some(shared.identity()))?;
                {
                    let message = shared.lock();
                    write_message(&message, self.type_id, dest, schema)?;
                }
                dest.end_sub_item(token)
            }
            other => Err(mismatch(schema.type_name(self.type_id), other, dest.at())),
        }
    }

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError> {
        let token = source.start_sub_item()?;
        let fresh = match old {
            Some(Value::Message(message)) => {
                read_message_into(message, self.type_id, source, schema)?;
                None
            }
            Some(Value::Shared(shared)) => {
                let mut message = shared.try_lock().ok_or_else(|| {
                    CodecError::recursion("shared message is already being read", source.at())
                })?;
                read_message_into(&mut message, self.type_id, source, schema)?;
                None
            }
            _ => {
                let mut message = schema.create_instance(self.type_id)?;
                read_message_into(&mut message, self.type_id, source, schema)?;
                Some(Value::Message(message))
            }
        };
        source.end_sub_item(token)?;
        Ok(fresh)
    }
}

/// Write the body of `message` (no enclosing header or framing) as an instance of `declared`.
pub fn write_message(
    message: &Message,
    declared: TypeId,
    dest: &mut FrameWriter<'_>,
    schema: &dyn SchemaProvider,
) -> Result<(), CodecError> {
    let runtime = message.type_id();
    if !schema.is_assignable(runtime, declared) {
        return Err(CodecError::type_mismatch(
            format!(
                "a {} cannot be written where a {} is expected",
                schema.type_name(runtime),
                schema.type_name(declared)
            ),
            dest.at(),
        ));
    }
    let descriptor = schema.descriptor(runtime)?;
    if let Some(hook) = &descriptor.hooks().before_serialize {
        hook(message);
    }
    write_level(message, schema.root_of(runtime), dest, schema)?;
    if let Some(hook) = &descriptor.hooks().after_serialize {
        hook(message);
    }
    Ok(())
}

fn write_level(
    message: &Message,
    level: TypeId,
    dest: &mut FrameWriter<'_>,
    schema: &dyn SchemaProvider,
) -> Result<(), CodecError> {
    let descriptor = schema.descriptor(level)?;
    if message.type_id() != level {
        let arm = *descriptor
            .sub_types()
            .matching(schema, message.type_id())
            .ok_or_else(|| {
                CodecError::type_mismatch(
                    format!(
                        "{} is not a known sub-type of {}",
                        schema.type_name(message.type_id()),
                        descriptor.name()
                    ),
                    dest.at(),
                )
            })?;
        dest.write_field_header(arm.field_number, WireType::LengthDelimited)?;
        let token = dest.start_sub_item(None)?;
        write_level(message, arm.type_id, dest, schema)?;
        dest.end_sub_item(token)?;
    }
    for slot in descriptor.slots() {
        slot.node().write(message, dest, schema)?;
    }
    if let Some(raw) = message.unknown_fields(level) {
        dest.write_raw(raw)?;
    }
    Ok(())
}

/// Read a fresh instance of `type_id` from the rest of the current message body.
pub fn read_message(
    type_id: TypeId,
    source: &mut FrameReader<'_>,
    schema: &dyn SchemaProvider,
) -> Result<Message, CodecError> {
    let mut message = schema.create_instance(type_id)?;
    read_message_into(&mut message, type_id, source, schema)?;
    Ok(message)
}

/// Merge the rest of the current message body into `message`.
///
/// The instance may be replaced by a more specific type when the data carries
/// a sub-type arm for one; fields already read are carried over.
pub fn read_message_into(
    message: &mut Message,
    declared: TypeId,
    source: &mut FrameReader<'_>,
    schema: &dyn SchemaProvider,
) -> Result<(), CodecError> {
    let root = schema.root_of(message.type_id());
    if root != schema.root_of(declared) {
        return Err(CodecError::type_mismatch(
            format!(
                "cannot read a {} into a {}",
                schema.type_name(declared),
                schema.type_name(message.type_id())
            ),
            source.at(),
        ));
    }
    let initial = schema.descriptor(message.type_id())?;
    if let Some(hook) = &initial.hooks().before_deserialize {
        hook(message);
    }
    read_level(message, root, source, schema)?;
    let last = schema.descriptor(message.type_id())?;
    if let Some(hook) = &last.hooks().after_deserialize {
        hook(message);
    }
    Ok(())
}

fn read_level(
    message: &mut Message,
    level: TypeId,
    source: &mut FrameReader<'_>,
    schema: &dyn SchemaProvider,
) -> Result<(), CodecError> {
    let descriptor = schema.descriptor(level)?;
    loop {
        let field = source.read_field_header()?;
        if field == 0 {
            return Ok(());
        }
        if let Some(slot) = descriptor.find_slot(field) {
            slot.node().read(message, source, schema)?;
            continue;
        }
        if let Some(&arm) = descriptor.sub_types().find(field) {
            if accept_arm(message, arm.type_id, source, schema)? {
                let token = source.start_sub_item()?;
                read_level(message, arm.type_id, source, schema)?;
                source.end_sub_item(token)?;
                continue;
            }
        }
        match descriptor.unknown_fields() {
            UnknownFields::Skip => {
                log::trace!("skipping unknown field {} of {}", field, descriptor.name());
                source.skip_field()?;
            }
            UnknownFields::Preserve => {
                let raw = source.capture_field()?;
                log::trace!(
                    "preserving {} byte(s) of unknown field {} of {}",
                    raw.len(),
                    field,
                    descriptor.name()
                );
                message.push_unknown(level, &raw);
            }
        }
    }
}

/// Make `message` at least as specific as `arm`. Returns false when the arm
/// belongs to an unrelated branch of the hierarchy and is to be treated as unknown.
fn accept_arm(
    message: &mut Message,
    arm: TypeId,
    source: &FrameReader<'_>,
    schema: &dyn SchemaProvider,
) -> Result<bool, CodecError> {
    let current = message.type_id();
    if schema.is_assignable(current, arm) {
        return Ok(true);
    }
    if schema.is_assignable(arm, current) {
        log::debug!(
            "upgrading {} to {} on sub-type field {}",
            schema.type_name(current),
            schema.type_name(arm),
            source.field_number()
        );
        let upgraded = schema.create_instance(arm)?;
        let consumed = std::mem::replace(message, upgraded);
        message.merge_from(consumed);
        return Ok(true);
    }
    if source.strict_sub_types() {
        return Err(CodecError::type_mismatch(
            format!(
                "unexpected subtype {} while reading a {}",
                schema.type_name(arm),
                schema.type_name(current)
            ),
            source.at(),
        ));
    }
    Ok(false)
}
