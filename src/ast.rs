//! Abstract Syntax Tree for the schema DSL, and its resolution into a [`Schema`].

use crate::error::CodecError;
use crate::schema::{FieldDef, FieldType, ScalarKind, Schema, SchemaBuilder, UnknownFields};
use crate::value::Value;
use std::collections::HashMap;

/// Root of a parsed schema file: message types in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SchemaFile {
    pub messages: Vec<MessageSection>,
}

#[derive(Debug, Clone)]
pub struct MessageSection {
    pub name: String,
    pub preserve_unknown: bool,
    pub fields: Vec<MessageField>,
    pub sub_types: Vec<SubTypeDecl>,
}

#[derive(Debug, Clone)]
pub struct MessageField {
    pub name: String,
    pub number: u32,
    pub type_spec: TypeSpec,
    pub packed: bool,
    pub strict: bool,
    pub default: Option<Literal>,
}

/// `subtype Name = number;`
#[derive(Debug, Clone)]
pub struct SubTypeDecl {
    pub name: String,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    /// Scalar kind name or message name.
    Named(String),
    Group(String),
    List(Box<TypeSpec>),
    Map { key: String, value: Box<TypeSpec> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Hex(u64),
    Float(f64),
    String(String),
}

impl Literal {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Literal::Int(n) => u64::try_from(*n).ok(),
            Literal::Hex(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(n) => Some(*n),
            Literal::Hex(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// The value of this literal as a `kind` scalar, if it fits.
    pub fn to_value(&self, kind: ScalarKind) -> Option<Value> {
        match kind {
            ScalarKind::Bool => match self {
                Literal::Bool(b) => Some(Value::Bool(*b)),
                _ => None,
            },
            ScalarKind::Int32 | ScalarKind::SInt32 | ScalarKind::SFixed32 => {
                self.as_i64().and_then(|n| i32::try_from(n).ok()).map(Value::I32)
            }
            ScalarKind::Int64 | ScalarKind::SInt64 | ScalarKind::SFixed64 => self.as_i64().map(Value::I64),
            ScalarKind::UInt32 | ScalarKind::Fixed32 => {
                self.as_u64().and_then(|n| u32::try_from(n).ok()).map(Value::U32)
            }
            ScalarKind::UInt64 | ScalarKind::Fixed64 => self.as_u64().map(Value::U64),
            ScalarKind::Float => self.as_f64().map(|f| Value::F32(f as f32)),
            ScalarKind::Double => self.as_f64().map(Value::F64),
            ScalarKind::String => match self {
                Literal::String(s) => Some(Value::String(s.clone())),
                _ => None,
            },
            ScalarKind::Bytes => match self {
                Literal::String(s) => Some(Value::Bytes(s.clone().into_bytes())),
                _ => None,
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Float(f) => Some(*f),
            Literal::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl SchemaFile {
    pub fn get_message(&self, name: &str) -> Option<&MessageSection> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Build and validate the schema these declarations describe.
    pub fn resolve(&self) -> Result<Schema, CodecError> {
        let mut builder = SchemaBuilder::new();
        let ids: HashMap<&str, _> = self
            .messages
            .iter()
            .map(|m| (m.name.as_str(), builder.declare(m.name.as_str())))
            .collect();
        let lookup = |name: &str| {
            builder
                .type_id(name)
                .ok_or_else(|| CodecError::schema(format!("unknown type: {}", name)))
        };

        let mut defs = Vec::with_capacity(self.messages.len());
        for m in &self.messages {
            let mut fields = Vec::with_capacity(m.fields.len());
            for f in &m.fields {
                fields.push(resolve_field(&m.name, f, &lookup)?);
            }
            let mut arms = Vec::with_capacity(m.sub_types.len());
            for s in &m.sub_types {
                arms.push((s.number, lookup(&s.name)?));
            }
            defs.push((m, fields, arms));
        }

        for (m, fields, arms) in defs {
            let def = builder.message(ids[m.name.as_str()]);
            for field in fields {
                def.field(field);
            }
            for (number, sub) in arms {
                def.sub_type(number, sub);
            }
            if m.preserve_unknown {
                def.unknown_fields(UnknownFields::Preserve);
            }
        }
        builder.build()
    }
}

fn resolve_field(
    message: &str,
    f: &MessageField,
    lookup: &dyn Fn(&str) -> Result<crate::schema::TypeId, CodecError>,
) -> Result<FieldDef, CodecError> {
    let element = |spec: &TypeSpec| -> Result<FieldType, CodecError> {
        match spec {
            TypeSpec::Named(name) => match ScalarKind::from_name(name) {
                Some(kind) => Ok(FieldType::Scalar(kind)),
                None => Ok(FieldType::Message(lookup(name)?)),
            },
            TypeSpec::Group(name) => Ok(FieldType::Group(lookup(name)?)),
            _ => Err(CodecError::schema(format!(
                "{}.{}: collections cannot be nested",
                message, f.name
            ))),
        }
    };
    let mut def = match &f.type_spec {
        TypeSpec::List(inner) => {
            let def = FieldDef::new(f.number, f.name.as_str(), element(inner)?);
            if f.packed {
                def.packed()
            } else {
                def.repeated()
            }
        }
        TypeSpec::Map { key, value } => {
            let key = ScalarKind::from_name(key).ok_or_else(|| {
                CodecError::schema(format!("{}.{}: map key {} is not a scalar", message, f.name, key))
            })?;
            FieldDef::new(f.number, f.name.as_str(), element(value)?).map(key)
        }
        single => FieldDef::new(f.number, f.name.as_str(), element(single)?),
    };
    if f.packed && !matches!(f.type_spec, TypeSpec::List(_)) {
        return Err(CodecError::schema(format!(
            "{}.{}: only lists can be packed",
            message, f.name
        )));
    }
    if f.strict {
        def = def.strict();
    }
    if let Some(lit) = &f.default {
        let value = match def.ty {
            FieldType::Scalar(kind) => lit.to_value(kind).ok_or_else(|| {
                CodecError::schema(format!(
                    "{}.{}: default {:?} does not fit {}",
                    message,
                    f.name,
                    lit,
                    kind.name()
                ))
            })?,
            _ => {
                return Err(CodecError::schema(format!(
                    "{}.{} cannot have a default value",
                    message, f.name
                )))
            }
        };
        def = def.with_default(value);
    }
    Ok(def)
}
