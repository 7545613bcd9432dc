//! # protochain — protobuf-compatible codec with sub-type chaining
//!
//! A schema-driven binary codec for the protobuf wire format, extended with a
//! convention for class hierarchies: every inheritance level occupies one
//! reserved field number of its base type, and the derived level's fields are
//! nested under it as a length-delimited message.
//!
//! ## Layers
//!
//! - **Wire** ([`wire`]): varints, zigzag, fixed-width values, field headers.
//! - **Framing** ([`FrameReader`], [`FrameWriter`]): field iteration, nested
//!   length-delimited and group framing, length backfill, depth and cycle guards.
//! - **Plan** ([`node`], [`descriptor`]): per-type trees of serialization nodes,
//!   compiled lazily from a validated [`Schema`].
//! - **Facade** ([`Codec`], [`frame`]): whole messages and length-prefixed streams.
//!
//! ## Example schema
//!
//! ```text
//! message Base {
//!   test: int32 = 10;
//!   subtype Derived = 2;
//! }
//!
//! message Derived {
//!   foo: string = 11;
//! }
//! ```
//!
//! A `Derived { test: 12345, foo: "abc" }` encodes as
//! `12 05 5A 03 61 62 63 50 B9 60`: the derived level first, then the base fields.
//!
//! ## Usage
//!
//! See `tests/integration.rs` for full examples.

pub mod ast;
pub mod codec;
pub mod descriptor;
pub mod dump;
pub mod error;
pub mod frame;
pub mod node;
pub mod parser;
pub mod reader;
pub mod schema;
pub mod sink;
pub mod source;
pub mod value;
pub mod wire;
pub mod writer;

pub use ast::SchemaFile;
pub use codec::{Codec, CodecConfig};
pub use descriptor::{FieldSlot, SubTypeArm, SubTypeChain, TypeDescriptor};
pub use error::{CodecError, Position};
pub use frame::{decode_frame, encode_delimited, read_delimited, write_delimited, FrameDecodeResult, PrefixStyle};
pub use parser::parse;
pub use reader::{FrameReader, SubItemToken};
pub use schema::{
    FieldDef, FieldRule, FieldType, MessageDef, ScalarKind, Schema, SchemaBuilder, SchemaProvider, TypeId,
    UnknownFields,
};
pub use sink::{ByteSink, StreamSink};
pub use source::{ByteSource, SliceSource, StreamSource};
pub use value::{Message, SharedMessage, Value};
pub use wire::{FieldTag, WireType};
pub use writer::FrameWriter;
