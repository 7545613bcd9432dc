//! Schema registration: declare message types, their fields and sub-type arms,
//! then [`SchemaBuilder::build`] validates everything and yields a [`Schema`].
//!
//! A [`Schema`] is an arena of message definitions indexed by [`TypeId`].
//! The executable plan for a type, its [`TypeDescriptor`], is compiled on first
//! use under a build lock and cached; afterwards it is shared read-only.
//! All schema mistakes (duplicate field numbers, dangling sub-types, ...) are
//! reported by `build`, never while encoding or decoding.

use crate::descriptor::TypeDescriptor;
use crate::error::CodecError;
use crate::value::{Message, Value};
use crate::wire::{FieldTag, WireType};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Identity of a message type inside one [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scalar field kinds, named after their protobuf counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Float,
    Double,
    String,
    Bytes,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 15] = [
        ScalarKind::Bool,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::UInt32,
        ScalarKind::UInt64,
        ScalarKind::SInt32,
        ScalarKind::SInt64,
        ScalarKind::Fixed32,
        ScalarKind::Fixed64,
        ScalarKind::SFixed32,
        ScalarKind::SFixed64,
        ScalarKind::Float,
        ScalarKind::Double,
        ScalarKind::String,
        ScalarKind::Bytes,
    ];

    pub fn wire_type(self) -> WireType {
        match self {
            ScalarKind::Bool
            | ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::UInt32
            | ScalarKind::UInt64 => WireType::Varint,
            ScalarKind::SInt32 | ScalarKind::SInt64 => WireType::SignedVarint,
            ScalarKind::Fixed32 | ScalarKind::SFixed32 | ScalarKind::Float => WireType::Fixed32,
            ScalarKind::Fixed64 | ScalarKind::SFixed64 | ScalarKind::Double => WireType::Fixed64,
            ScalarKind::String | ScalarKind::Bytes => WireType::LengthDelimited,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::SInt32 => "sint32",
            ScalarKind::SInt64 => "sint64",
            ScalarKind::Fixed32 => "fixed32",
            ScalarKind::Fixed64 => "fixed64",
            ScalarKind::SFixed32 => "sfixed32",
            ScalarKind::SFixed64 => "sfixed64",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarKind> {
        ScalarKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Zero value, used for absent map keys/values.
    pub fn default_value(self) -> Value {
        match self {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32 => Value::I32(0),
            ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64 => Value::I64(0),
            ScalarKind::UInt32 | ScalarKind::Fixed32 => Value::U32(0),
            ScalarKind::UInt64 | ScalarKind::Fixed64 => Value::U64(0),
            ScalarKind::Float => Value::F32(0.0),
            ScalarKind::Double => Value::F64(0.0),
            ScalarKind::String => Value::String(String::new()),
            ScalarKind::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// Whether `value` has the variant this kind reads and writes.
    pub fn accepts(self, value: &Value) -> bool {
        std::mem::discriminant(&self.default_value()) == std::mem::discriminant(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarKind),
    /// Nested message framed by a length prefix.
    Message(TypeId),
    /// Nested message framed by start/end-group tags.
    Group(TypeId),
}

impl FieldType {
    pub fn wire_type(self) -> WireType {
        match self {
            FieldType::Scalar(k) => k.wire_type(),
            FieldType::Message(_) => WireType::LengthDelimited,
            FieldType::Group(_) => WireType::StartGroup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Single,
    Repeated { packed: bool },
    /// Entries framed as `{ key = 1, value = 2 }`.
    Map { key: ScalarKind },
}

/// One member of a message definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub number: u32,
    pub name: String,
    pub ty: FieldType,
    pub rule: FieldRule,
    pub default: Option<Value>,
    /// Reject values arriving with a different wire type.
    pub strict: bool,
}

impl FieldDef {
    pub fn new(number: u32, name: impl Into<String>, ty: FieldType) -> Self {
        FieldDef {
            number,
            name: name.into(),
            ty,
            rule: FieldRule::Single,
            default: None,
            strict: false,
        }
    }

    pub fn scalar(number: u32, name: impl Into<String>, kind: ScalarKind) -> Self {
        FieldDef::new(number, name, FieldType::Scalar(kind))
    }

    pub fn message(number: u32, name: impl Into<String>, type_id: TypeId) -> Self {
        FieldDef::new(number, name, FieldType::Message(type_id))
    }

    pub fn group(number: u32, name: impl Into<String>, type_id: TypeId) -> Self {
        FieldDef::new(number, name, FieldType::Group(type_id))
    }

    pub fn repeated(mut self) -> Self {
        self.rule = FieldRule::Repeated { packed: false };
        self
    }

    pub fn packed(mut self) -> Self {
        self.rule = FieldRule::Repeated { packed: true };
        self
    }

    pub fn map(mut self, key: ScalarKind) -> Self {
        self.rule = FieldRule::Map { key };
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// What to do with field numbers no plan recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFields {
    #[default]
    Skip,
    /// Keep the raw bytes on the message and re-emit them on write.
    Preserve,
}

pub type SerializeHook = Arc<dyn Fn(&Message) + Send + Sync>;
pub type DeserializeHook = Arc<dyn Fn(&mut Message) + Send + Sync>;
pub type Factory = Arc<dyn Fn() -> Message + Send + Sync>;

/// Callbacks and factory attached to one type.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_serialize: Option<SerializeHook>,
    pub after_serialize: Option<SerializeHook>,
    pub before_deserialize: Option<DeserializeHook>,
    pub after_deserialize: Option<DeserializeHook>,
    pub factory: Option<Factory>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_serialize", &self.before_serialize.is_some())
            .field("after_serialize", &self.after_serialize.is_some())
            .field("before_deserialize", &self.before_deserialize.is_some())
            .field("after_deserialize", &self.after_deserialize.is_some())
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

/// Registration record for one message type.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// `(field number, sub-type)` arms, in declaration order.
    pub sub_types: Vec<(u32, TypeId)>,
    pub unknown_fields: UnknownFields,
    pub hooks: Hooks,
}

impl MessageDef {
    fn new(name: String) -> Self {
        MessageDef {
            name,
            fields: Vec::new(),
            sub_types: Vec::new(),
            unknown_fields: UnknownFields::Skip,
            hooks: Hooks::default(),
        }
    }

    pub fn field(&mut self, field: FieldDef) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Declare `sub_type` as a derived type whose own fields nest under `field_number`.
    pub fn sub_type(&mut self, field_number: u32, sub_type: TypeId) -> &mut Self {
        self.sub_types.push((field_number, sub_type));
        self
    }

    pub fn unknown_fields(&mut self, policy: UnknownFields) -> &mut Self {
        self.unknown_fields = policy;
        self
    }

    pub fn before_serialize(&mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> &mut Self {
        self.hooks.before_serialize = Some(Arc::new(f));
        self
    }

    pub fn after_serialize(&mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> &mut Self {
        self.hooks.after_serialize = Some(Arc::new(f));
        self
    }

    pub fn before_deserialize(&mut self, f: impl Fn(&mut Message) + Send + Sync + 'static) -> &mut Self {
        self.hooks.before_deserialize = Some(Arc::new(f));
        self
    }

    pub fn after_deserialize(&mut self, f: impl Fn(&mut Message) + Send + Sync + 'static) -> &mut Self {
        self.hooks.after_deserialize = Some(Arc::new(f));
        self
    }

    pub fn factory(&mut self, f: impl Fn() -> Message + Send + Sync + 'static) -> &mut Self {
        self.hooks.factory = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    defs: Vec<MessageDef>,
    names: HashMap<String, TypeId>,
    duplicate_names: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder::default()
    }

    /// Reserve a type id for `name`; fields may reference it before it is filled in.
    pub fn declare(&mut self, name: impl Into<String>) -> TypeId {
        let name = name.into();
        let id = TypeId(self.defs.len() as u32);
        if self.names.insert(name.clone(), id).is_some() {
            self.duplicate_names.push(name.clone());
        }
        self.defs.push(MessageDef::new(name));
        id
    }

    /// Definition of a declared type, for adding fields and arms.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not returned by this builder's [`SchemaBuilder::declare`].
    pub fn message(&mut self, id: TypeId) -> &mut MessageDef {
        &mut self.defs[id.index()]
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn build(self) -> Result<Schema, CodecError> {
        if let Some(name) = self.duplicate_names.first() {
            return Err(CodecError::schema(format!("duplicate message name: {}", name)));
        }
        let count = self.defs.len();
        let valid = |id: TypeId| id.index() < count;

        let mut bases: Vec<Option<TypeId>> = vec![None; count];
        for (i, def) in self.defs.iter().enumerate() {
            let mut numbers = HashSet::new();
            let mut names = HashSet::new();
            for field in &def.fields {
                check_field_number(&def.name, field.number)?;
                if !numbers.insert(field.number) {
                    return Err(CodecError::schema(format!(
                        "duplicate field number {} in {}",
                        field.number, def.name
                    )));
                }
                if !names.insert(field.name.as_str()) {
                    return Err(CodecError::schema(format!(
                        "duplicate field name {} in {}",
                        field.name, def.name
                    )));
                }
                check_field(def, field, &valid)?;
            }
            for &(number, sub) in &def.sub_types {
                check_field_number(&def.name, number)?;
                if !numbers.insert(number) {
                    return Err(CodecError::schema(format!(
                        "duplicate field number {} in {} (sub-type arm)",
                        number, def.name
                    )));
                }
                if !valid(sub) {
                    return Err(CodecError::schema(format!(
                        "unresolved sub-type {:?} declared on {}",
                        sub, def.name
                    )));
                }
                if sub.index() == i {
                    return Err(CodecError::schema(format!("{} cannot be its own sub-type", def.name)));
                }
                if let Some(prev) = bases[sub.index()] {
                    return Err(CodecError::schema(format!(
                        "{} is declared as a sub-type of both {} and {}",
                        self.defs[sub.index()].name,
                        self.defs[prev.index()].name,
                        def.name
                    )));
                }
                bases[sub.index()] = Some(TypeId(i as u32));
            }
        }

        for start in 0..count {
            let mut seen = HashSet::from([start]);
            let mut names: HashSet<&str> = self.defs[start].fields.iter().map(|f| f.name.as_str()).collect();
            let mut cur = bases[start];
            while let Some(base) = cur {
                if !seen.insert(base.index()) {
                    return Err(CodecError::schema(format!(
                        "inheritance cycle through {}",
                        self.defs[start].name
                    )));
                }
                for field in &self.defs[base.index()].fields {
                    if !names.insert(field.name.as_str()) {
                        return Err(CodecError::schema(format!(
                            "field name {} of {} is already used by a derived type",
                            field.name,
                            self.defs[base.index()].name
                        )));
                    }
                }
                cur = bases[base.index()];
            }
        }

        let descriptors = (0..count).map(|_| OnceLock::new()).collect();
        Ok(Schema {
            defs: self.defs,
            names: self.names,
            bases,
            descriptors,
            build_lock: Mutex::new(()),
        })
    }
}

fn check_field_number(message: &str, number: u32) -> Result<(), CodecError> {
    if number == 0 || number > FieldTag::MAX_FIELD_NUMBER {
        return Err(CodecError::schema(format!(
            "invalid field number {} in {}",
            number, message
        )));
    }
    Ok(())
}

fn check_field(def: &MessageDef, field: &FieldDef, valid: &dyn Fn(TypeId) -> bool) -> Result<(), CodecError> {
    let context = || format!("{}.{}", def.name, field.name);
    match field.ty {
        FieldType::Message(id) | FieldType::Group(id) if !valid(id) => {
            return Err(CodecError::schema(format!(
                "no node for the type of {}: unresolved type {:?}",
                context(),
                id
            )));
        }
        _ => {}
    }
    match field.rule {
        FieldRule::Repeated { packed: true } if !field.ty.wire_type().is_packable() => {
            return Err(CodecError::schema(format!("{} cannot be packed", context())));
        }
        FieldRule::Map { key } => {
            if matches!(key, ScalarKind::Float | ScalarKind::Double | ScalarKind::Bytes) {
                return Err(CodecError::schema(format!(
                    "{} uses {} as a map key",
                    context(),
                    key.name()
                )));
            }
        }
        _ => {}
    }
    if let Some(default) = &field.default {
        match (field.rule, field.ty) {
            (FieldRule::Single, FieldType::Scalar(kind)) if kind.accepts(default) => {}
            (FieldRule::Single, FieldType::Scalar(kind)) => {
                return Err(CodecError::schema(format!(
                    "default of {} is a {}, expected {}",
                    context(),
                    default.kind_name(),
                    kind.name()
                )));
            }
            _ => {
                return Err(CodecError::schema(format!(
                    "{} cannot have a default value",
                    context()
                )));
            }
        }
    }
    Ok(())
}

/// Resolves type ids to compiled plans and answers hierarchy questions.
pub trait SchemaProvider: Send + Sync {
    fn descriptor(&self, id: TypeId) -> Result<Arc<TypeDescriptor>, CodecError>;

    fn base_of(&self, id: TypeId) -> Option<TypeId>;

    fn type_name(&self, id: TypeId) -> &str;

    /// Top of the hierarchy `id` belongs to.
    fn root_of(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        while let Some(base) = self.base_of(cur) {
            cur = base;
        }
        cur
    }

    /// True if a `value_type` instance can stand where `target` is expected.
    fn is_assignable(&self, value_type: TypeId, target: TypeId) -> bool {
        let mut cur = Some(value_type);
        while let Some(t) = cur {
            if t == target {
                return true;
            }
            cur = self.base_of(t);
        }
        false
    }

    /// New instance through the type's factory (or empty).
    fn create_instance(&self, id: TypeId) -> Result<Message, CodecError> {
        self.descriptor(id)?.create_instance()
    }
}

/// Validated set of message types.
pub struct Schema {
    defs: Vec<MessageDef>,
    names: HashMap<String, TypeId>,
    bases: Vec<Option<TypeId>>,
    descriptors: Vec<OnceLock<Arc<TypeDescriptor>>>,
    build_lock: Mutex<()>,
}

impl Schema {
    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn definition(&self, id: TypeId) -> Option<&MessageDef> {
        self.defs.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Sub-types of `id`, as declared.
    pub fn sub_types(&self, id: TypeId) -> &[(u32, TypeId)] {
        self.defs
            .get(id.index())
            .map(|d| d.sub_types.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the plan for `id` has already been compiled.
    pub fn is_compiled(&self, id: TypeId) -> bool {
        self.descriptors
            .get(id.index())
            .is_some_and(|cell| cell.get().is_some())
    }
}

impl SchemaProvider for Schema {
    fn descriptor(&self, id: TypeId) -> Result<Arc<TypeDescriptor>, CodecError> {
        let cell = self
            .descriptors
            .get(id.index())
            .ok_or_else(|| CodecError::schema(format!("unknown type {:?}", id)))?;
        if let Some(desc) = cell.get() {
            return Ok(desc.clone());
        }
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(desc) = cell.get() {
            return Ok(desc.clone());
        }
        let def = &self.defs[id.index()];
        let desc = Arc::new(TypeDescriptor::compile(id, def, self.bases[id.index()])?);
        log::debug!(
            "compiled descriptor for {} ({} field(s), {} sub-type arm(s))",
            def.name,
            desc.slots().len(),
            desc.sub_types().len()
        );
        let _ = cell.set(desc.clone());
        Ok(desc)
    }

    fn base_of(&self, id: TypeId) -> Option<TypeId> {
        self.bases.get(id.index()).copied().flatten()
    }

    fn type_name(&self, id: TypeId) -> &str {
        self.defs
            .get(id.index())
            .map(|d| d.name.as_str())
            .unwrap_or("<unknown>")
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.defs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_and_derived() -> (SchemaBuilder, TypeId, TypeId) {
        let mut b = SchemaBuilder::new();
        let base = b.declare("Base");
        let derived = b.declare("Derived");
        b.message(base)
            .field(FieldDef::scalar(10, "test", ScalarKind::Int32))
            .sub_type(2, derived);
        b.message(derived)
            .field(FieldDef::scalar(11, "foo", ScalarKind::String));
        (b, base, derived)
    }

    #[test]
    fn hierarchy_queries() {
        let (b, base, derived) = base_and_derived();
        let schema = b.build().unwrap();
        assert_eq!(schema.base_of(derived), Some(base));
        assert_eq!(schema.root_of(derived), base);
        assert!(schema.is_assignable(derived, base));
        assert!(!schema.is_assignable(base, derived));
        assert_eq!(schema.type_name(derived), "Derived");
    }

    #[test]
    fn descriptors_compile_lazily_once() {
        let (b, base, derived) = base_and_derived();
        let schema = b.build().unwrap();
        assert!(!schema.is_compiled(base));
        let first = schema.descriptor(base).unwrap();
        let second = schema.descriptor(base).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!schema.is_compiled(derived));
    }

    #[test]
    fn arm_number_collides_with_field() {
        let (mut b, base, _) = base_and_derived();
        let other = b.declare("Other");
        b.message(base).sub_type(10, other);
        assert!(matches!(b.build(), Err(CodecError::Schema(_))));
    }

    #[test]
    fn two_bases_rejected() {
        let (mut b, _, derived) = base_and_derived();
        let other = b.declare("Other");
        b.message(other).sub_type(3, derived);
        assert!(b.build().is_err());
    }

    #[test]
    fn inheritance_cycle_rejected() {
        let mut b = SchemaBuilder::new();
        let a = b.declare("A");
        let c = b.declare("C");
        b.message(a).sub_type(1, c);
        b.message(c).sub_type(1, a);
        assert!(b.build().is_err());
    }

    #[test]
    fn field_name_shadowing_across_levels_rejected() {
        let (mut b, _, derived) = base_and_derived();
        b.message(derived).field(FieldDef::scalar(12, "test", ScalarKind::Int64));
        assert!(b.build().is_err());
    }

    #[test]
    fn bad_field_options_rejected() {
        let mut b = SchemaBuilder::new();
        let m = b.declare("M");
        b.message(m).field(FieldDef::scalar(1, "s", ScalarKind::String).packed());
        assert!(b.build().is_err());

        let mut b = SchemaBuilder::new();
        let m = b.declare("M");
        b.message(m).field(FieldDef::scalar(1, "x", ScalarKind::Int32).with_default("zero"));
        assert!(b.build().is_err());

        let mut b = SchemaBuilder::new();
        let m = b.declare("M");
        b.message(m).field(FieldDef::scalar(1, "x", ScalarKind::Int32).map(ScalarKind::Double));
        assert!(b.build().is_err());

        let mut b = SchemaBuilder::new();
        b.declare("M");
        b.declare("M");
        assert!(b.build().is_err());
    }
}
