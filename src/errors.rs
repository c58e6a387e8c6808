//! Failure type shared by schema building, encoding and decoding.
//!
//! Every variant carries the schema path that was being processed
//! (e.g. `root.passengers[2].name`) and a human-readable message.

use std::error;
use std::fmt;

/// A structured failure raised while building a codec, encoding a value or
/// decoding a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed schema: duplicate names, invalid constraints, unresolved
    /// references.
    Schema { path: String, message: String },
    /// A value outside a non-extensible value constraint, an undeclared
    /// enumerated value or choice alternative, or a character outside the
    /// permitted alphabet.
    Range { path: String, message: String },
    /// A value of the wrong shape for its schema node: missing mandatory
    /// field, unknown field, non-singleton choice, raw fragment without a
    /// bit length.
    Shape { path: String, message: String },
    /// A string, octet string or sequence-of length outside a
    /// non-extensible size constraint.
    Size { path: String, message: String },
    /// Invalid input during decode: truncated buffer, reserved encoding
    /// pattern, out-of-range index, missing fragmentation terminator.
    Decode { path: String, message: String },
    /// Buffer cursor inconsistency. Seeing this indicates a bug in the
    /// codec itself, not in the caller's schema or input.
    Internal { path: String, message: String },
}

impl Error {
    pub fn schema(path: &str, message: impl Into<String>) -> Self {
        Error::Schema {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn range(path: &str, message: impl Into<String>) -> Self {
        Error::Range {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn shape(path: &str, message: impl Into<String>) -> Self {
        Error::Shape {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn size(path: &str, message: impl Into<String>) -> Self {
        Error::Size {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(path: &str, message: impl Into<String>) -> Self {
        Error::Decode {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn internal(path: &str, message: impl Into<String>) -> Self {
        Error::Internal {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// The schema path at which the failure occurred. Empty for failures
    /// raised before any schema context exists.
    pub fn path(&self) -> &str {
        match self {
            Error::Schema { path, .. }
            | Error::Range { path, .. }
            | Error::Shape { path, .. }
            | Error::Size { path, .. }
            | Error::Decode { path, .. }
            | Error::Internal { path, .. } => path,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Schema { message, .. }
            | Error::Range { message, .. }
            | Error::Shape { message, .. }
            | Error::Size { message, .. }
            | Error::Decode { message, .. }
            | Error::Internal { message, .. } => message,
        }
    }

    /// Fills in the schema path on an error raised below the codec layer
    /// (the bit buffer does not know where in the schema it is used).
    /// A path already present is kept.
    pub(crate) fn at(mut self, at: &str) -> Self {
        {
            let path = match &mut self {
                Error::Schema { path, .. }
                | Error::Range { path, .. }
                | Error::Shape { path, .. }
                | Error::Size { path, .. }
                | Error::Decode { path, .. }
                | Error::Internal { path, .. } => path,
            };
            if path.is_empty() {
                *path = at.to_string();
            }
        }
        self
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::Schema { .. } => "schema error",
            Error::Range { .. } => "range error",
            Error::Shape { .. } => "shape error",
            Error::Size { .. } => "size error",
            Error::Decode { .. } => "decode error",
            Error::Internal { .. } => "internal error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path().is_empty() {
            write!(f, "{}: {}", self.kind(), self.message())
        } else {
            write!(f, "{} at `{}`: {}", self.kind(), self.path(), self.message())
        }
    }
}

impl error::Error for Error {}
