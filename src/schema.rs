//! Declarative schema tree and the named-type registry.
//!
//! A [Schema] describes one ASN.1 type; composition happens through
//! nested nodes and through [Schema::Reference] entries resolved against
//! a [Registry]. Schemas are plain data: they serialise to JSON with
//! stable tag names and compare structurally, so a serialised and
//! re-parsed tree is equal to the original.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::value::Value;

fn is_false(v: &bool) -> bool {
    !*v
}

/// One node of a schema tree. Exactly one variant is active per node;
/// the serialised form carries the variant under the `"type"` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Schema {
    #[serde(rename = "BOOLEAN")]
    Boolean,

    #[serde(rename = "NULL")]
    Null,

    #[serde(rename = "INTEGER")]
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
        #[serde(default, skip_serializing_if = "is_false")]
        extensible: bool,
    },

    #[serde(rename = "ENUMERATED")]
    Enumerated {
        values: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension_values: Option<Vec<String>>,
    },

    #[serde(rename = "BIT STRING")]
    BitString {
        #[serde(flatten)]
        size: SizeConstraint,
    },

    #[serde(rename = "OCTET STRING")]
    OctetString {
        #[serde(flatten)]
        size: SizeConstraint,
    },

    #[serde(rename = "IA5String")]
    Ia5String {
        #[serde(flatten)]
        size: SizeConstraint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alphabet: Option<String>,
    },

    #[serde(rename = "VisibleString")]
    VisibleString {
        #[serde(flatten)]
        size: SizeConstraint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alphabet: Option<String>,
    },

    #[serde(rename = "UTF8String")]
    Utf8String {
        #[serde(flatten)]
        size: SizeConstraint,
    },

    #[serde(rename = "OBJECT IDENTIFIER")]
    ObjectIdentifier,

    #[serde(rename = "SEQUENCE")]
    Sequence {
        fields: Vec<Field>,
        /// Present iff the type carries an extension marker. An empty
        /// vector means `...` with no additions defined yet.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension_fields: Option<Vec<Field>>,
    },

    #[serde(rename = "SEQUENCE OF")]
    SequenceOf {
        item: Box<Schema>,
        #[serde(flatten)]
        size: SizeConstraint,
    },

    #[serde(rename = "CHOICE")]
    Choice {
        alternatives: Vec<Alternative>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension_alternatives: Option<Vec<Alternative>>,
    },

    /// A named pointer to another schema in the registry. This is how
    /// recursive types are expressed.
    #[serde(rename = "REFERENCE")]
    Reference { name: String },
}

/// Size constraint on strings and SEQUENCE OF. `fixed_size` excludes the
/// min/max pair; `extensible` adds an extension marker to the constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub extensible: bool,
}

impl SizeConstraint {
    /// No size restriction.
    pub fn unbounded() -> Self {
        SizeConstraint::default()
    }

    /// SIZE(n)
    pub fn fixed(n: u64) -> Self {
        SizeConstraint {
            fixed_size: Some(n),
            ..SizeConstraint::default()
        }
    }

    /// SIZE(min..max)
    pub fn range(min: u64, max: u64) -> Self {
        SizeConstraint {
            min_size: Some(min),
            max_size: Some(max),
            ..SizeConstraint::default()
        }
    }

    /// Marks the constraint extensible, e.g. SIZE(1..8, ...).
    pub fn extensible(mut self) -> Self {
        self.extensible = true;
        self
    }
}

/// One field of a SEQUENCE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: &str, schema: Schema) -> Self {
        Field {
            name: name.to_string(),
            schema,
            optional: false,
            default: None,
        }
    }

    /// Marks the field OPTIONAL.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Gives the field a DEFAULT value. A defaulted field may be absent
    /// from values; the decoder materialises the default.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether the field takes part in the SEQUENCE preamble bitmap.
    pub(crate) fn in_preamble(&self) -> bool {
        self.optional || self.default.is_some()
    }
}

/// One alternative of a CHOICE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub name: String,
    pub schema: Schema,
}

impl Alternative {
    pub fn new(name: &str, schema: Schema) -> Self {
        Alternative {
            name: name.to_string(),
            schema,
        }
    }
}

impl Schema {
    /// INTEGER(min..max)
    pub fn integer(min: i64, max: i64) -> Self {
        Schema::Integer {
            min: Some(min),
            max: Some(max),
            extensible: false,
        }
    }

    /// INTEGER with no PER-visible constraint.
    pub fn unconstrained_integer() -> Self {
        Schema::Integer {
            min: None,
            max: None,
            extensible: false,
        }
    }

    /// ENUMERATED with the given root values.
    pub fn enumerated<const N: usize>(values: [&str; N]) -> Self {
        Schema::Enumerated {
            values: values.iter().map(|v| v.to_string()).collect(),
            extension_values: None,
        }
    }

    /// SEQUENCE with the given root fields and no extension marker.
    pub fn sequence(fields: Vec<Field>) -> Self {
        Schema::Sequence {
            fields,
            extension_fields: None,
        }
    }

    /// SEQUENCE OF with no size constraint.
    pub fn sequence_of(item: Schema) -> Self {
        Schema::SequenceOf {
            item: Box::new(item),
            size: SizeConstraint::unbounded(),
        }
    }

    /// CHOICE over the given root alternatives.
    pub fn choice(alternatives: Vec<Alternative>) -> Self {
        Schema::Choice {
            alternatives,
            extension_alternatives: None,
        }
    }

    /// IA5String with no size constraint.
    pub fn ia5_string() -> Self {
        Schema::Ia5String {
            size: SizeConstraint::unbounded(),
            alphabet: None,
        }
    }

    /// A reference to a named schema, resolved through the registry at
    /// build time.
    pub fn reference(name: &str) -> Self {
        Schema::Reference {
            name: name.to_string(),
        }
    }

    /// Serialises this schema to its JSON exchange form.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::schema("", e.to_string()))
    }

    /// Parses a schema from its JSON exchange form.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::schema("", e.to_string()))
    }
}

/// Mapping from type name to schema, consulted when a
/// [Schema::Reference] is built. A codec snapshots the registry contents
/// at build time; later registry changes do not affect built codecs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    types: BTreeMap<String, Schema>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Adds a named schema. Duplicate names are rejected.
    pub fn define(&mut self, name: &str, schema: Schema) -> Result<(), Error> {
        if self.types.contains_key(name) {
            return Err(Error::schema(
                name,
                format!("duplicate type name `{}` in registry", name),
            ));
        }
        self.types.insert(name.to_string(), schema);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.types.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Schema)> {
        self.types.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Serialises the whole registry to its JSON exchange form.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::schema("", e.to_string()))
    }

    /// Parses a registry from its JSON exchange form.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::schema("", e.to_string()))
    }
}
