//! Runtime values for encoding/decoding (codec representation).

use crate::schema::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single field value (scalar, collection, or nested message).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Map entries in insertion order; keys are unique.
    Map(Vec<(Value, Value)>),
    Message(Message),
    /// A message reachable from more than one place in the value graph.
    Shared(SharedMessage),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::I32(x) => u64::try_from(*x).ok(),
            Value::I64(x) => u64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(x) => Some(*x as f64),
            Value::F64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a map entry by key.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Message(_) => "message",
            Value::Shared(_) => "shared message",
        }
    }
}

impl From<Message> for Value {
    fn from(m: Message) -> Self {
        Value::Message(m)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// An instance of a composite type: named field values plus unknown bytes
/// preserved per hierarchy level.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    type_id: TypeId,
    fields: HashMap<String, Value>,
    unknown: BTreeMap<TypeId, Vec<u8>>,
}

impl Message {
    pub fn new(type_id: TypeId) -> Self {
        Message {
            type_id,
            fields: HashMap::new(),
            unknown: BTreeMap::new(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style [`Message::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Raw bytes of fields that no plan recognized at hierarchy level `level`.
    pub fn unknown_fields(&self, level: TypeId) -> Option<&[u8]> {
        self.unknown.get(&level).map(Vec::as_slice)
    }

    pub fn has_unknown_fields(&self) -> bool {
        self.unknown.values().any(|b| !b.is_empty())
    }

    pub fn clear_unknown_fields(&mut self) {
        self.unknown.clear();
    }

    pub(crate) fn push_unknown(&mut self, level: TypeId, bytes: &[u8]) {
        self.unknown.entry(level).or_default().extend_from_slice(bytes);
    }

    /// Merge `other` into `self`: its fields replace same-named fields, its
    /// unknown bytes are appended. The type of `self` is kept.
    pub fn merge_from(&mut self, other: Message) {
        self.fields.extend(other.fields);
        for (level, bytes) in other.unknown {
            self.unknown.entry(level).or_default().extend(bytes);
        }
    }

    /// Address used by the writer's recursion guard.
    pub(crate) fn identity(&self) -> usize {
        self as *const Message as usize
    }
}

/// A message with reference semantics. Equality is identity.
#[derive(Clone)]
pub struct SharedMessage(Arc<Mutex<Message>>);

impl SharedMessage {
    pub fn new(message: Message) -> Self {
        SharedMessage(Arc::new(Mutex::new(message)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Message> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking lock; `None` while the message is already held (e.g. a cycle being visited).
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Message>> {
        match self.0.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for SharedMessage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedMessage({:#x})", self.identity())
    }
}

impl From<SharedMessage> for Value {
    fn from(s: SharedMessage) -> Self {
        Value::Shared(s)
    }
}

macro_rules! value_from {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(x: $t) -> Self {
                Value::$v(x)
            }
        })*
    };
}

value_from!(
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
);
