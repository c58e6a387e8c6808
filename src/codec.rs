//! Compiled codec graph and the public encode/decode entry points.
//!
//! A [Codec] is built once from a [Schema] and a [Registry] snapshot.
//! Building validates every constraint and resolves every reference into
//! an index arena, so encode and decode never consult the registry and
//! never re-validate the schema. Recursive types compile into cyclic
//! index links: a reference reserves its arena slot before its target is
//! compiled, and a second occurrence of the same name reuses the slot.
//!
//! Built codecs are immutable and cheap to clone; they can be shared
//! across threads for concurrent encodes and decodes against distinct
//! buffers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::bits::BitBuffer;
use crate::decoded::DecodedNode;
use crate::errors::Error;
use crate::schema::{Alternative, Field, Registry, Schema, SizeConstraint};
use crate::value::{RawBits, Value};

/// Number of bits of a constrained whole number covering `range` values.
/// A range of one value needs no bits at all.
pub(crate) fn bits_for_range(range: u128) -> u32 {
    if range <= 1 {
        0
    } else {
        128 - (range - 1).leading_zeros()
    }
}

/// A compiled schema node. Children are arena indices into
/// [Codec::nodes].
#[derive(Debug)]
pub(crate) enum Node {
    /// Slot reserved for a reference whose target is still being
    /// compiled. Never present in a finished codec.
    Vacant,
    Boolean,
    Null,
    Integer(IntegerNode),
    Enumerated(EnumeratedNode),
    BitString(SizeNode),
    OctetString(SizeNode),
    CharString(CharNode),
    /// UTF8String has the OCTET STRING wire shape (octet count plus
    /// bytes) but decodes through UTF-8 validation.
    Utf8String(SizeNode),
    ObjectIdentifier,
    Sequence(SequenceNode),
    SequenceOf(SequenceOfNode),
    Choice(ChoiceNode),
}

#[derive(Debug)]
pub(crate) struct IntegerNode {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub extensible: bool,
    /// Width of the root encoding when both bounds are present.
    pub root_bits: u32,
}

#[derive(Debug)]
pub(crate) struct EnumeratedNode {
    pub values: Vec<String>,
    pub extension_values: Option<Vec<String>>,
    pub root_bits: u32,
}

/// Effective size constraint of a string or SEQUENCE OF node.
#[derive(Debug)]
pub(crate) struct SizeNode {
    pub lower: u64,
    pub upper: Option<u64>,
    pub extensible: bool,
}

impl SizeNode {
    pub(crate) fn contains(&self, count: u64) -> bool {
        count >= self.lower && self.upper.map_or(true, |upper| count <= upper)
    }

    /// The exact root size when the constraint pins one, small enough
    /// that PER drops the length determinant entirely.
    pub(crate) fn root_fixed(&self) -> Option<u64> {
        match self.upper {
            Some(upper) if upper == self.lower && upper < 65536 => Some(upper),
            _ => None,
        }
    }

    /// Width of the constrained count field, when the upper bound keeps
    /// the count below the 64K fragmentation threshold.
    pub(crate) fn constrained_bits(&self) -> Option<u32> {
        match self.upper {
            Some(upper) if upper < 65536 => {
                Some(bits_for_range((upper - self.lower + 1) as u128))
            }
            _ => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self.upper {
            Some(upper) => format!("SIZE({}..{})", self.lower, upper),
            None => format!("SIZE({}..)", self.lower),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CharKind {
    Ia5,
    Visible,
}

#[derive(Debug)]
pub(crate) struct CharNode {
    pub kind: CharKind,
    pub size: SizeNode,
    pub alphabet: Option<AlphabetNode>,
}

/// Explicit permitted alphabet: characters map to their declared index
/// and each character costs `bits` bits.
#[derive(Debug)]
pub(crate) struct AlphabetNode {
    pub chars: Vec<char>,
    pub bits: u32,
}

impl AlphabetNode {
    pub(crate) fn index_of(&self, c: char) -> Option<u64> {
        self.chars.iter().position(|&a| a == c).map(|i| i as u64)
    }
}

#[derive(Debug)]
pub(crate) struct SequenceNode {
    pub fields: Vec<FieldNode>,
    pub extension_fields: Vec<FieldNode>,
    pub extensible: bool,
    /// Number of root fields taking part in the preamble bitmap.
    pub preamble_len: usize,
}

#[derive(Debug)]
pub(crate) struct FieldNode {
    pub name: String,
    pub node: usize,
    pub optional: bool,
    pub default: Option<Value>,
}

impl FieldNode {
    pub(crate) fn in_preamble(&self) -> bool {
        self.optional || self.default.is_some()
    }
}

#[derive(Debug)]
pub(crate) struct SequenceOfNode {
    pub item: usize,
    pub size: SizeNode,
}

#[derive(Debug)]
pub(crate) struct ChoiceNode {
    pub alternatives: Vec<AlternativeNode>,
    pub extension_alternatives: Vec<AlternativeNode>,
    pub extensible: bool,
    pub root_bits: u32,
}

#[derive(Debug)]
pub(crate) struct AlternativeNode {
    pub name: String,
    pub node: usize,
}

/// A codec for one schema: the compiled node arena plus the root index.
#[derive(Debug, Clone)]
pub struct Codec {
    pub(crate) nodes: Arc<Vec<Node>>,
    pub(crate) root: usize,
}

impl Codec {
    /// Builds a codec for `schema`, resolving references against
    /// `registry`. The registry contents are snapshotted into the codec;
    /// later registry changes do not affect it.
    pub fn build(schema: &Schema, registry: &Registry) -> Result<Codec, Error> {
        let mut builder = Builder {
            registry,
            nodes: Vec::new(),
            by_name: BTreeMap::new(),
        };
        let root = builder.compile(schema, "root")?;
        Ok(Codec {
            nodes: Arc::new(builder.nodes),
            root,
        })
    }

    /// Builds one codec per named type in the registry.
    pub fn build_all(registry: &Registry) -> Result<BTreeMap<String, Codec>, Error> {
        let mut codecs = BTreeMap::new();
        for (name, schema) in registry.iter() {
            codecs.insert(name.to_string(), Codec::build(schema, registry)?);
        }
        Ok(codecs)
    }

    /// Encodes `value` into the minimum byte sequence containing the PER
    /// bit stream, trailing bits zero.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, Error> {
        let mut buf = BitBuffer::new();
        self.encode_node(self.root, value, &mut buf, "root")?;
        Ok(buf.compact_bytes())
    }

    /// Encodes `value` and reports the exact bit length alongside the
    /// padded bytes, ready for embedding as a raw fragment.
    pub fn encode_to_raw(&self, value: &Value) -> Result<RawBits, Error> {
        let mut buf = BitBuffer::new();
        self.encode_node(self.root, value, &mut buf, "root")?;
        Ok(RawBits {
            bit_length: buf.bit_length(),
            bytes: buf.compact_bytes(),
        })
    }

    /// Decodes a value from `data`. Trailing padding bits after the
    /// encoding are ignored.
    pub fn decode(&self, data: &[u8]) -> Result<Value, Error> {
        let mut buf = BitBuffer::from_bytes(data);
        self.decode_node(self.root, &mut buf, "root")
    }

    /// Decodes a value while recording, for every node of the result,
    /// the bit range it occupied in `data`.
    pub fn decode_with_metadata(&self, data: &[u8]) -> Result<DecodedNode, Error> {
        let source: Arc<[u8]> = Arc::from(data);
        let mut buf = BitBuffer::from_bytes(data);
        self.decode_node_meta(self.root, &mut buf, &source, "root")
    }

    pub(crate) fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }
}

struct Builder<'a> {
    registry: &'a Registry,
    nodes: Vec<Node>,
    by_name: BTreeMap<String, usize>,
}

impl Builder<'_> {
    fn compile(&mut self, schema: &Schema, path: &str) -> Result<usize, Error> {
        if let Schema::Reference { name } = schema {
            return self.compile_reference(name, path);
        }
        let node = self.compile_node(schema, path)?;
        let id = self.nodes.len();
        self.nodes.push(node);
        Ok(id)
    }

    /// Resolves a named reference to an arena slot. A registry entry may
    /// itself be a bare reference (an alias to another named type); the
    /// chain is followed until a structural schema appears, and every
    /// name along it ends up mapped to the same slot. The slot is
    /// reserved before the target compiles so a recursive reference
    /// resolves to it instead of looping.
    fn compile_reference(&mut self, name: &str, path: &str) -> Result<usize, Error> {
        let registry = self.registry;
        let mut chain: Vec<String> = Vec::new();
        let mut current = name;
        let target = loop {
            if let Some(&id) = self.by_name.get(current) {
                for alias in chain {
                    self.by_name.insert(alias, id);
                }
                return Ok(id);
            }
            chain.push(current.to_string());
            let schema = registry.get(current).ok_or_else(|| {
                Error::schema(path, format!("unresolved reference `{}`", current))
            })?;
            match schema {
                Schema::Reference { name: next } => {
                    if chain.iter().any(|seen| seen == next) {
                        return Err(Error::schema(
                            path,
                            format!("reference chain through `{}` never reaches a type", next),
                        ));
                    }
                    current = next;
                }
                structural => break structural.clone(),
            }
        };
        let id = self.nodes.len();
        self.nodes.push(Node::Vacant);
        for alias in &chain {
            self.by_name.insert(alias.clone(), id);
        }
        let type_name = chain.last().cloned().unwrap_or_else(|| name.to_string());
        let node = self.compile_node(&target, &type_name)?;
        self.nodes[id] = node;
        Ok(id)
    }

    fn compile_node(&mut self, schema: &Schema, path: &str) -> Result<Node, Error> {
        match schema {
            Schema::Reference { name } => Err(Error::internal(
                path,
                format!("reference `{}` escaped alias resolution", name),
            )),
            Schema::Boolean => Ok(Node::Boolean),
            Schema::Null => Ok(Node::Null),
            Schema::ObjectIdentifier => Ok(Node::ObjectIdentifier),

            Schema::Integer {
                min,
                max,
                extensible,
            } => {
                let root_bits = match (min, max) {
                    (Some(min), Some(max)) => {
                        if min > max {
                            return Err(Error::schema(
                                path,
                                format!("INTEGER bounds inverted: {} > {}", min, max),
                            ));
                        }
                        bits_for_range((*max as i128 - *min as i128 + 1) as u128)
                    }
                    _ => 0,
                };
                Ok(Node::Integer(IntegerNode {
                    min: *min,
                    max: *max,
                    extensible: *extensible,
                    root_bits,
                }))
            }

            Schema::Enumerated {
                values,
                extension_values,
            } => {
                if values.is_empty() {
                    return Err(Error::schema(path, "ENUMERATED with no root values"));
                }
                let mut seen = BTreeSet::new();
                for name in values.iter().chain(extension_values.iter().flatten()) {
                    if !seen.insert(name.as_str()) {
                        return Err(Error::schema(
                            path,
                            format!("duplicate ENUMERATED value `{}`", name),
                        ));
                    }
                }
                Ok(Node::Enumerated(EnumeratedNode {
                    root_bits: bits_for_range(values.len() as u128),
                    values: values.clone(),
                    extension_values: extension_values.clone(),
                }))
            }

            Schema::BitString { size } => {
                Ok(Node::BitString(compile_size(size, path)?))
            }
            Schema::OctetString { size } => {
                Ok(Node::OctetString(compile_size(size, path)?))
            }

            Schema::Ia5String { size, alphabet } => Ok(Node::CharString(CharNode {
                kind: CharKind::Ia5,
                size: compile_size(size, path)?,
                alphabet: compile_alphabet(alphabet.as_deref(), CharKind::Ia5, path)?,
            })),
            Schema::VisibleString { size, alphabet } => Ok(Node::CharString(CharNode {
                kind: CharKind::Visible,
                size: compile_size(size, path)?,
                alphabet: compile_alphabet(alphabet.as_deref(), CharKind::Visible, path)?,
            })),
            Schema::Utf8String { size } => Ok(Node::Utf8String(compile_size(size, path)?)),

            Schema::Sequence {
                fields,
                extension_fields,
            } => {
                let mut seen = BTreeSet::new();
                for field in fields.iter().chain(extension_fields.iter().flatten()) {
                    if !seen.insert(field.name.as_str()) {
                        return Err(Error::schema(
                            path,
                            format!("duplicate SEQUENCE field `{}`", field.name),
                        ));
                    }
                    if field.optional && field.default.is_some() {
                        return Err(Error::schema(
                            path,
                            format!(
                                "field `{}` cannot be both OPTIONAL and DEFAULT",
                                field.name
                            ),
                        ));
                    }
                }
                let compiled_fields = self.compile_fields(fields, path)?;
                let compiled_ext = match extension_fields {
                    Some(ext) => self.compile_fields(ext, path)?,
                    None => Vec::new(),
                };
                let preamble_len = compiled_fields
                    .iter()
                    .filter(|f| f.in_preamble())
                    .count();
                Ok(Node::Sequence(SequenceNode {
                    fields: compiled_fields,
                    extension_fields: compiled_ext,
                    extensible: extension_fields.is_some(),
                    preamble_len,
                }))
            }

            Schema::SequenceOf { item, size } => {
                let size = compile_size(size, path)?;
                let item = self.compile(item, &format!("{}[]", path))?;
                Ok(Node::SequenceOf(SequenceOfNode { item, size }))
            }

            Schema::Choice {
                alternatives,
                extension_alternatives,
            } => {
                if alternatives.is_empty() {
                    return Err(Error::schema(path, "CHOICE with no root alternatives"));
                }
                let mut seen = BTreeSet::new();
                for alt in alternatives
                    .iter()
                    .chain(extension_alternatives.iter().flatten())
                {
                    if !seen.insert(alt.name.as_str()) {
                        return Err(Error::schema(
                            path,
                            format!("duplicate CHOICE alternative `{}`", alt.name),
                        ));
                    }
                }
                let compiled = self.compile_alternatives(alternatives, path)?;
                let compiled_ext = match extension_alternatives {
                    Some(ext) => self.compile_alternatives(ext, path)?,
                    None => Vec::new(),
                };
                Ok(Node::Choice(ChoiceNode {
                    root_bits: bits_for_range(compiled.len() as u128),
                    alternatives: compiled,
                    extension_alternatives: compiled_ext,
                    extensible: extension_alternatives.is_some(),
                }))
            }
        }
    }

    fn compile_fields(&mut self, fields: &[Field], path: &str) -> Result<Vec<FieldNode>, Error> {
        fields
            .iter()
            .map(|field| {
                let child_path = format!("{}.{}", path, field.name);
                Ok(FieldNode {
                    name: field.name.clone(),
                    node: self.compile(&field.schema, &child_path)?,
                    optional: field.optional,
                    default: field.default.clone(),
                })
            })
            .collect()
    }

    fn compile_alternatives(
        &mut self,
        alternatives: &[Alternative],
        path: &str,
    ) -> Result<Vec<AlternativeNode>, Error> {
        alternatives
            .iter()
            .map(|alt| {
                let child_path = format!("{}.{}", path, alt.name);
                Ok(AlternativeNode {
                    name: alt.name.clone(),
                    node: self.compile(&alt.schema, &child_path)?,
                })
            })
            .collect()
    }
}

fn compile_size(constraint: &SizeConstraint, path: &str) -> Result<SizeNode, Error> {
    if constraint.fixed_size.is_some()
        && (constraint.min_size.is_some() || constraint.max_size.is_some())
    {
        return Err(Error::schema(
            path,
            "fixed_size excludes min_size and max_size",
        ));
    }
    let (lower, upper) = match constraint.fixed_size {
        Some(fixed) => (fixed, Some(fixed)),
        None => (constraint.min_size.unwrap_or(0), constraint.max_size),
    };
    if let Some(upper) = upper {
        if lower > upper {
            return Err(Error::schema(
                path,
                format!("size bounds inverted: {} > {}", lower, upper),
            ));
        }
    }
    Ok(SizeNode {
        lower,
        upper,
        extensible: constraint.extensible,
    })
}

fn compile_alphabet(
    alphabet: Option<&str>,
    kind: CharKind,
    path: &str,
) -> Result<Option<AlphabetNode>, Error> {
    let Some(alphabet) = alphabet else {
        return Ok(None);
    };
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return Err(Error::schema(path, "empty alphabet"));
    }
    let mut seen = BTreeSet::new();
    for &c in &chars {
        if !char_in_charset(c, kind) {
            return Err(Error::schema(
                path,
                format!("alphabet character {:?} outside the string type's character set", c),
            ));
        }
        if !seen.insert(c) {
            return Err(Error::schema(
                path,
                format!("duplicate alphabet character {:?}", c),
            ));
        }
    }
    Ok(Some(AlphabetNode {
        bits: bits_for_range(chars.len() as u128),
        chars,
    }))
}

pub(crate) fn char_in_charset(c: char, kind: CharKind) -> bool {
    match kind {
        CharKind::Ia5 => (c as u32) <= 0x7F,
        CharKind::Visible => (0x20..=0x7E).contains(&(c as u32)),
    }
}
