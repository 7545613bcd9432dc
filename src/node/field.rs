use super::SerializationNode;
use crate::error::CodecError;
use crate::reader::FrameReader;
use crate::schema::SchemaProvider;
use crate::value::Message;
use crate::writer::FrameWriter;

/// Binds a node to a named member of its parent message.
///
/// Absent members are not written. On read the member is handed to the inner
/// node by reference, so in-place merges land in the parent.
#[derive(Debug)]
pub struct FieldAccessDecorator {
    name: String,
    inner: Box<dyn SerializationNode>,
}

impl FieldAccessDecorator {
    pub fn new(name: String, inner: Box<dyn SerializationNode>) -> Self {
        FieldAccessDecorator { name, inner }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &dyn SerializationNode {
        self.inner.as_ref()
    }

    pub fn write(
        &self,
        parent: &Message,
        dest: &mut FrameWriter<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<(), CodecError> {
        match parent.get(&self.name) {
            Some(value) => self.inner.write(value, dest, schema),
            None => Ok(()),
        }
    }

    pub fn read(
        &self,
        parent: &mut Message,
        source: &mut FrameReader<'_>,
        schema: &dyn SchemaProvider,
    ) -> Result<(), CodecError> {
        let old = if self.inner.requires_old_value() {
            parent.get_mut(&self.name)
        } else {
            None
        };
        let fresh = self.inner.read(old, source, schema)?;
        if self.inner.returns_value() {
            if let Some(value) = fresh {
                parent.set(self.name.clone(), value);
            }
        }
        Ok(())
    }
}
