//! Canonical in-memory representation of encoded and decoded values.
//!
//! Integers are carried as `i64`; that is the supported INTEGER range of
//! this crate. Values outside it are rejected at encode time, and decode
//! fails on wire integers that do not fit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value exchanged with the codec.
///
/// SEQUENCE values are maps keyed by field name; the encoder looks fields
/// up by name, so caller-side ordering never matters. Absent optional
/// fields are absent keys. CHOICE is the selected alternative's name plus
/// its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Boolean(bool),

    /// The NULL type's only value
    Null,

    /// Signed integer (this crate's documented INTEGER range)
    Integer(i64),

    /// An enumerated value, by name
    Enumerated(String),

    /// Bit string with an exact bit count (hex encoded, left-aligned)
    BitString(BitStringValue),

    /// Octet string (hex encoded)
    OctetString(#[serde(with = "hex::serde")] Vec<u8>),

    /// Character string (IA5, visible or UTF-8 per the schema)
    CharString(String),

    /// Object identifier in dotted form, e.g. `"1.2.840.113549"`
    ObjectIdentifier(String),

    /// SEQUENCE: field name to value, absent keys for absent fields
    Sequence(BTreeMap<String, Value>),

    /// SEQUENCE OF: ordered elements
    SequenceOf(Vec<Value>),

    /// CHOICE: the selected alternative
    Choice(ChoiceValue),

    /// Pre-encoded bit fragment, written verbatim instead of invoking the
    /// codec for this position. Never produced by decode.
    Raw(RawBits),
}

/// Payload of [Value::BitString]: bytes plus the exact number of valid
/// bits. Bits are left-aligned; trailing bits of the last byte are
/// ignored on encode and zero on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitStringValue {
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    pub bit_length: usize,
}

/// Payload of [Value::Choice].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceValue {
    pub name: String,
    pub value: Box<Value>,
}

/// A pre-encoded bit fragment: the low-level image of some encoding,
/// with its exact bit length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBits {
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    pub bit_length: usize,
}

impl Value {
    /// Builds a SEQUENCE value from name/value pairs.
    pub fn sequence<const N: usize>(fields: [(&str, Value); N]) -> Self {
        Value::Sequence(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    /// Builds a CHOICE value selecting `name`.
    pub fn choice(name: &str, value: Value) -> Self {
        Value::Choice(ChoiceValue {
            name: name.to_string(),
            value: Box::new(value),
        })
    }

    /// Builds a BIT STRING value with an exact bit count.
    pub fn bit_string(bytes: Vec<u8>, bit_length: usize) -> Self {
        Value::BitString(BitStringValue { bytes, bit_length })
    }

    /// Builds an ENUMERATED value by name.
    pub fn enumerated(name: &str) -> Self {
        Value::Enumerated(name.to_string())
    }

    /// Builds an OBJECT IDENTIFIER value from dotted text.
    pub fn oid(text: &str) -> Self {
        Value::ObjectIdentifier(text.to_string())
    }

    /// Builds a raw pre-encoded fragment.
    pub fn raw(bytes: Vec<u8>, bit_length: usize) -> Self {
        Value::Raw(RawBits { bytes, bit_length })
    }

    /// The ASN.1-flavoured name of this value's kind, for error messages.
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Enumerated(_) => "ENUMERATED",
            Value::BitString(_) => "BIT STRING",
            Value::OctetString(_) => "OCTET STRING",
            Value::CharString(_) => "character string",
            Value::ObjectIdentifier(_) => "OBJECT IDENTIFIER",
            Value::Sequence(_) => "SEQUENCE",
            Value::SequenceOf(_) => "SEQUENCE OF",
            Value::Choice(_) => "CHOICE",
            Value::Raw(_) => "raw bits",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::CharString(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::OctetString(v)
    }
}
