//! Codec errors. Every stream-level failure carries the [`Position`] it was raised at.

use crate::wire::WireType;
use std::fmt;

/// Where in the stream an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Field number of the last header read or written (0 if none).
    pub field: u32,
    pub wire_type: Option<WireType>,
    /// Absolute byte offset.
    pub offset: u64,
    /// Nesting depth.
    pub depth: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}, wire type ", self.field)?;
        match self.wire_type {
            Some(wt) => write!(f, "{}", wt)?,
            None => f.write_str("none")?,
        }
        write!(f, ", offset {}, depth {}", self.offset, self.depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Wire format: {message} ({at})")]
    WireFormat { message: String, at: Position },
    #[error("End of stream ({at})")]
    EndOfStream { at: Position },
    #[error("Overflow: {message} ({at})")]
    Overflow { message: String, at: Position },
    #[error("Framing: {message} ({at})")]
    Framing { message: String, at: Position },
    #[error("Recursion: {message} ({at})")]
    Recursion { message: String, at: Position },
    /// A value or sub-type that does not fit the schema, met while encoding or decoding.
    #[error("Type mismatch: {message} ({at})")]
    TypeMismatch { message: String, at: Position },
    #[error("Schema: {0}")]
    Schema(String),
}

impl CodecError {
    pub fn wire_format(message: impl Into<String>, at: Position) -> Self {
        CodecError::WireFormat {
            message: message.into(),
            at,
        }
    }

    pub fn overflow(message: impl Into<String>, at: Position) -> Self {
        CodecError::Overflow {
            message: message.into(),
            at,
        }
    }

    pub fn framing(message: impl Into<String>, at: Position) -> Self {
        CodecError::Framing {
            message: message.into(),
            at,
        }
    }

    pub fn recursion(message: impl Into<String>, at: Position) -> Self {
        CodecError::Recursion {
            message: message.into(),
            at,
        }
    }

    pub fn type_mismatch(message: impl Into<String>, at: Position) -> Self {
        CodecError::TypeMismatch {
            message: message.into(),
            at,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        CodecError::Schema(message.into())
    }

    /// Stream position, for errors raised by a reader or writer.
    pub fn position(&self) -> Option<Position> {
        match self {
            CodecError::WireFormat { at, .. }
            | CodecError::Overflow { at, .. }
            | CodecError::Framing { at, .. }
            | CodecError::Recursion { at, .. }
            | CodecError::TypeMismatch { at, .. }
            | CodecError::EndOfStream { at } => Some(*at),
            CodecError::Io(_) | CodecError::Schema(_) => None,
        }
    }
}
