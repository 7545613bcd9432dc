//! Serialization-node tree.
//!
//! Each field of a compiled [`TypeDescriptor`](crate::descriptor::TypeDescriptor)
//! is a small stack of nodes, outermost first:
//!
//! ```text
//! FieldAccessDecorator ─ DefaultValueDecorator? ─ TagDecorator ─ ScalarNode | MessageTypeNode
//! FieldAccessDecorator ─ RepeatedDecorator ─ ScalarNode | MessageTypeNode
//! FieldAccessDecorator ─ MapDecorator ─ (ScalarNode key, ScalarNode | MessageTypeNode value)
//! ```
//!
//! Nodes are stateless and shared; all per-call state lives in the
//! [`FrameReader`] / [`FrameWriter`] passed in.

mod default;
mod field;
mod map;
mod message;
mod repeated;
mod scalar;
mod tag;

pub use default::DefaultValueDecorator;
pub use field::FieldAccessDecorator;
pub use map::MapDecorator;
pub use message::{read_message, read_message_into, write_message, MessageTypeNode};
pub use repeated::RepeatedDecorator;
pub use scalar::ScalarNode;
pub use tag::TagDecorator;

use crate::error::{CodecError, Position};
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::value::Value;
use crate::writer::FrameWriter;
use std::fmt;

/// Uniform read/write contract of every plan node.
///
/// Calling convention for [`SerializationNode::read`]:
/// - if `requires_old_value()`, the caller passes the current value (when one exists);
/// - the node either mutates that value in place and returns `None`, or returns
///   `Some(new)`, which the caller stores when `returns_value()` is true.
pub trait SerializationNode: fmt::Debug + Send + Sync {
    /// Reading needs the prior value (e.g. to merge into a collection).
    fn requires_old_value(&self) -> bool;

    /// Reading may yield a replacement value.
    fn returns_value(&self) -> bool;

    fn write(
        &self,
        value: &Value,
        dest: &mut FrameWriter<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<(), CodecError>;

    fn read(
        &self,
        old: Option<&mut Value>,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<Option<Value>, CodecError>;
}

fn mismatch(expected: &str, found: &Value, at: Position) -> CodecError {
    CodecError::type_mismatch(format!("expected a {} value, found {}", expected, found.kind_name()), at)
}
