//! Compiled per-type plans.
//!
//! A [`TypeDescriptor`] is built from a [`MessageDef`] the first time the type
//! is used. It owns the type's [`FieldSlot`]s (sorted by field number, each a
//! ready-to-run node tree), a lookup table for dispatching incoming field
//! numbers, and the [`SubTypeChain`] of inheritance arms.

use crate::error::CodecError;
use crate::node::{
    DefaultValueDecorator, FieldAccessDecorator, MapDecorator, MessageTypeNode, RepeatedDecorator,
    ScalarNode, SerializationNode, TagDecorator,
};
use crate::schema::{FieldDef, FieldRule, FieldType, Hooks, MessageDef, SchemaProvider, TypeId, UnknownFields};
use crate::value::Message;
use crate::wire::FieldTag;

/// Field numbers up to this bound dispatch through a direct-index table.
const DENSE_LOOKUP_LIMIT: u32 = 128;

/// `(FieldTag, node)` for one member.
#[derive(Debug)]
pub struct FieldSlot {
    tag: FieldTag,
    node: FieldAccessDecorator,
}

impl FieldSlot {
    pub fn tag(&self) -> FieldTag {
        self.tag
    }

    pub fn field_number(&self) -> u32 {
        self.tag.field_number()
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn node(&self) -> &FieldAccessDecorator {
        &self.node
    }
}

/// One inheritance level: the derived type and the field number its content nests under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTypeArm {
    pub field_number: u32,
    pub type_id: TypeId,
}

#[derive(Debug, Clone, Default)]
pub struct SubTypeChain {
    arms: Vec<SubTypeArm>,
}

impl SubTypeChain {
    pub fn arms(&self) -> &[SubTypeArm] {
        &self.arms
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn find(&self, field_number: u32) -> Option<&SubTypeArm> {
        self.arms.iter().find(|a| a.field_number == field_number)
    }

    /// The arm whose type is `runtime` or one of its ancestors.
    pub fn matching(&self, schema: &dyn SchemaProvider, runtime: TypeId) -> Option<&SubTypeArm> {
        self.arms
            .iter()
            .find(|a| schema.is_assignable(runtime, a.type_id))
    }
}

#[derive(Debug)]
enum FieldLookup {
    /// `table[field]` = slot index + 1, 0 for none.
    Dense(Vec<u16>),
    /// Binary search over the sorted slots.
    Sparse,
}

#[derive(Debug)]
pub struct TypeDescriptor {
    type_id: TypeId,
    name: String,
    base: Option<TypeId>,
    slots: Vec<FieldSlot>,
    lookup: FieldLookup,
    sub_types: SubTypeChain,
    unknown_fields: UnknownFields,
    hooks: Hooks,
}

impl TypeDescriptor {
    pub(crate) fn compile(type_id: TypeId, def: &MessageDef, base: Option<TypeId>) -> Result<Self, CodecError> {
        let mut slots = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            let tag = FieldTag::new(field.number, field.ty.wire_type()).map_err(|e| {
                CodecError::schema(format!("{}.{}: {}", def.name, field.name, e))
            })?;
            slots.push(FieldSlot {
                tag,
                node: FieldAccessDecorator::new(field.name.clone(), build_node(field)),
            });
        }
        slots.sort_by_key(FieldSlot::field_number);
        if let Some(pair) = slots.windows(2).find(|w| w[0].field_number() == w[1].field_number()) {
            return Err(CodecError::schema(format!(
                "duplicate field number {} in {}",
                pair[0].field_number(),
                def.name
            )));
        }

        let max = slots.last().map(FieldSlot::field_number).unwrap_or(0);
        let lookup = if max <= DENSE_LOOKUP_LIMIT {
            let mut table = vec![0u16; max as usize + 1];
            for (i, slot) in slots.iter().enumerate() {
                table[slot.field_number() as usize] = i as u16 + 1;
            }
            FieldLookup::Dense(table)
        } else {
            FieldLookup::Sparse
        };

        let arms = def
            .sub_types
            .iter()
            .map(|&(field_number, type_id)| SubTypeArm {
                field_number,
                type_id,
            })
            .collect();

        Ok(TypeDescriptor {
            type_id,
            name: def.name.clone(),
            base,
            slots,
            lookup,
            sub_types: SubTypeChain { arms },
            unknown_fields: def.unknown_fields,
            hooks: def.hooks.clone(),
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<TypeId> {
        self.base
    }

    /// Own fields, ascending by field number.
    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    pub fn sub_types(&self) -> &SubTypeChain {
        &self.sub_types
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn find_slot(&self, field_number: u32) -> Option<&FieldSlot> {
        match &self.lookup {
            FieldLookup::Dense(table) => match table.get(field_number as usize) {
                Some(&i) if i > 0 => self.slots.get(i as usize - 1),
                _ => None,
            },
            FieldLookup::Sparse => self
                .slots
                .binary_search_by_key(&field_number, FieldSlot::field_number)
                .ok()
                .map(|i| &self.slots[i]),
        }
    }

    pub fn create_instance(&self) -> Result<Message, CodecError> {
        match &self.hooks.factory {
            Some(factory) => {
                let message = factory();
                if message.type_id() != self.type_id {
                    return Err(CodecError::schema(format!(
                        "factory for {} produced an instance of another type",
                        self.name
                    )));
                }
                Ok(message)
            }
            None => Ok(Message::new(self.type_id)),
        }
    }
}

fn build_node(field: &FieldDef) -> Box<dyn SerializationNode> {
    let element = element_node(field.ty);
    let wire_type = field.ty.wire_type();
    match field.rule {
        FieldRule::Single => {
            let tagged: Box<dyn SerializationNode> =
                Box::new(TagDecorator::new(field.number, wire_type, field.strict, element));
            match &field.default {
                Some(default) => Box::new(DefaultValueDecorator::new(default.clone(), tagged)),
                None => tagged,
            }
        }
        FieldRule::Repeated { packed } => Box::new(RepeatedDecorator::new(
            field.number,
            wire_type,
            packed,
            field.strict,
            element,
        )),
        FieldRule::Map { key } => Box::new(MapDecorator::new(field.number, key, field.ty, element)),
    }
}

fn element_node(ty: FieldType) -> Box<dyn SerializationNode> {
    match ty {
        FieldType::Scalar(kind) => Box::new(ScalarNode::new(kind)),
        FieldType::Message(id) | FieldType::Group(id) => Box::new(MessageTypeNode::new(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ScalarKind, SchemaBuilder};

    #[test]
    fn slots_sorted_and_dispatchable() {
        let mut b = SchemaBuilder::new();
        let m = b.declare("M");
        b.message(m)
            .field(FieldDef::scalar(7, "b", ScalarKind::Int32))
            .field(FieldDef::scalar(3, "a", ScalarKind::String))
            .field(FieldDef::scalar(1000, "c", ScalarKind::Bool));
        let schema = b.build().unwrap();
        let desc = schema.descriptor(m).unwrap();
        let numbers: Vec<u32> = desc.slots().iter().map(FieldSlot::field_number).collect();
        assert_eq!(numbers, [3, 7, 1000]);
        assert_eq!(desc.find_slot(7).map(FieldSlot::name), Some("b"));
        assert_eq!(desc.find_slot(1000).map(FieldSlot::name), Some("c"));
        assert!(desc.find_slot(4).is_none());
        assert!(matches!(desc.lookup, FieldLookup::Sparse));
    }

    #[test]
    fn small_numbers_use_dense_table() {
        let mut b = SchemaBuilder::new();
        let m = b.declare("M");
        b.message(m).field(FieldDef::scalar(2, "x", ScalarKind::UInt64));
        let schema = b.build().unwrap();
        let desc = schema.descriptor(m).unwrap();
        assert!(matches!(desc.lookup, FieldLookup::Dense(_)));
        assert!(desc.find_slot(2).is_some());
        assert!(desc.find_slot(0).is_none());
        assert!(desc.find_slot(500).is_none());
    }
}
