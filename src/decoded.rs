//! Metadata-preserving decode: a tree in which every node remembers the
//! bit range it occupied in the source buffer.
//!
//! Signature verification over barcode payloads needs the exact byte
//! span a sub-value came from; this module records those spans while
//! decoding. The covering bytes are materialised lazily through
//! [DecodedNode::raw_bytes], so recording costs no per-node allocation
//! beyond the tree itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bits::{extract_bit_range, BitBuffer};
use crate::codec::{ChoiceNode, Codec, Node, SequenceNode, SequenceOfNode};
use crate::decode::{decode_counted, read_count, read_open_type};
use crate::errors::Error;
use crate::value::Value;

/// One node of a metadata-bearing decode result.
#[derive(Debug, Clone)]
pub struct DecodedNode {
    value: Value,
    bit_offset: usize,
    bit_length: usize,
    source: Arc<[u8]>,
    children: DecodedChildren,
}

/// Sub-structure of a [DecodedNode], mirroring the schema shape.
#[derive(Debug, Clone)]
pub enum DecodedChildren {
    /// Leaf node: no addressable sub-structure.
    None,
    /// SEQUENCE: one entry per field decoded from the wire, in wire
    /// order. Defaulted fields that were absent carry no child (they
    /// occupy no bits).
    Fields(Vec<(String, DecodedNode)>),
    /// SEQUENCE OF: one entry per element.
    Elements(Vec<DecodedNode>),
    /// CHOICE: the selected alternative.
    Alternative {
        name: String,
        node: Box<DecodedNode>,
    },
}

impl DecodedNode {
    /// The decoded value, identical to what the plain decode returns.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the node, returning the plain value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Bit offset of this node's encoding in the source buffer.
    pub fn bit_offset(&self) -> usize {
        self.bit_offset
    }

    /// Number of bits this node's encoding consumed.
    pub fn bit_length(&self) -> usize {
        self.bit_length
    }

    /// The minimum byte slice covering this node's bit range,
    /// left-aligned: the first bit of the range becomes the MSB of byte
    /// 0 and trailing bits are zero.
    pub fn raw_bytes(&self) -> Vec<u8> {
        extract_bit_range(&self.source, self.bit_offset, self.bit_length)
    }

    pub fn children(&self) -> &DecodedChildren {
        &self.children
    }

    /// Child node of a SEQUENCE field, when it was decoded from the
    /// wire.
    pub fn field(&self, name: &str) -> Option<&DecodedNode> {
        match &self.children {
            DecodedChildren::Fields(fields) => fields
                .iter()
                .find(|(field_name, _)| field_name == name)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Child node of a SEQUENCE OF element.
    pub fn element(&self, index: usize) -> Option<&DecodedNode> {
        match &self.children {
            DecodedChildren::Elements(elements) => elements.get(index),
            _ => None,
        }
    }

    /// Selected alternative of a CHOICE node.
    pub fn chosen(&self) -> Option<(&str, &DecodedNode)> {
        match &self.children {
            DecodedChildren::Alternative { name, node } => Some((name.as_str(), node)),
            _ => None,
        }
    }

    /// Shifts every bit offset in this sub-tree by `delta` and points it
    /// at `source`. Used when a sub-tree decoded from an open-type
    /// wrapper is folded back into the outer buffer, where the wrapper
    /// bits sit contiguously at `delta`.
    fn rebase(&mut self, delta: usize, source: &Arc<[u8]>) {
        self.bit_offset += delta;
        self.source = source.clone();
        match &mut self.children {
            DecodedChildren::None => {}
            DecodedChildren::Fields(fields) => {
                for (_, node) in fields {
                    node.rebase(delta, source);
                }
            }
            DecodedChildren::Elements(elements) => {
                for node in elements {
                    node.rebase(delta, source);
                }
            }
            DecodedChildren::Alternative { node, .. } => node.rebase(delta, source),
        }
    }
}

/// Returns the plain value of a metadata-bearing decode result.
pub fn strip_metadata(node: &DecodedNode) -> Value {
    node.value.clone()
}

impl Codec {
    pub(crate) fn decode_node_meta(
        &self,
        id: usize,
        buf: &mut BitBuffer,
        source: &Arc<[u8]>,
        path: &str,
    ) -> Result<DecodedNode, Error> {
        let start = buf.read_position();
        let (value, children) = match self.node(id) {
            Node::Sequence(node) => self.decode_sequence_meta(node, buf, source, path)?,
            Node::SequenceOf(node) => self.decode_sequence_of_meta(node, buf, source, path)?,
            Node::Choice(node) => self.decode_choice_meta(node, buf, source, path)?,
            _ => (self.decode_node(id, buf, path)?, DecodedChildren::None),
        };
        Ok(DecodedNode {
            value,
            bit_offset: start,
            bit_length: buf.read_position() - start,
            source: source.clone(),
            children,
        })
    }

    fn decode_sequence_meta(
        &self,
        node: &SequenceNode,
        buf: &mut BitBuffer,
        source: &Arc<[u8]>,
        path: &str,
    ) -> Result<(Value, DecodedChildren), Error> {
        let extended = node.extensible && buf.read_bit().map_err(|e| e.at(path))?;

        let mut preamble = Vec::with_capacity(node.preamble_len);
        for _ in 0..node.preamble_len {
            preamble.push(buf.read_bit().map_err(|e| e.at(path))?);
        }

        let mut map = BTreeMap::new();
        let mut children: Vec<(String, DecodedNode)> = Vec::new();
        let mut preamble_index = 0;
        for field in &node.fields {
            let child_path = format!("{}.{}", path, field.name);
            let present = if field.in_preamble() {
                let bit = preamble[preamble_index];
                preamble_index += 1;
                bit
            } else {
                true
            };
            if present {
                let child = self.decode_node_meta(field.node, buf, source, &child_path)?;
                map.insert(field.name.clone(), child.value.clone());
                children.push((field.name.clone(), child));
            } else if let Some(default) = &field.default {
                map.insert(field.name.clone(), default.clone());
            }
        }

        if extended {
            let bitmap_len = read_count(buf, path)? + 1;
            let mut bitmap = Vec::with_capacity(bitmap_len as usize);
            for _ in 0..bitmap_len {
                bitmap.push(buf.read_bit().map_err(|e| e.at(path))?);
            }
            for (index, &present) in bitmap.iter().enumerate() {
                if !present {
                    continue;
                }
                match node.extension_fields.get(index) {
                    Some(field) => {
                        let child_path = format!("{}.{}", path, field.name);
                        let child =
                            self.decode_open_child_meta(field.node, buf, source, &child_path)?;
                        map.insert(field.name.clone(), child.value.clone());
                        children.push((field.name.clone(), child));
                    }
                    None => {
                        // Unknown addition: consume and discard its
                        // wrapper.
                        read_open_type(buf, path)?;
                    }
                }
            }
        }

        for field in &node.extension_fields {
            if let Some(default) = &field.default {
                if !map.contains_key(&field.name) {
                    map.insert(field.name.clone(), default.clone());
                }
            }
        }

        Ok((Value::Sequence(map), DecodedChildren::Fields(children)))
    }

    fn decode_sequence_of_meta(
        &self,
        node: &SequenceOfNode,
        buf: &mut BitBuffer,
        source: &Arc<[u8]>,
        path: &str,
    ) -> Result<(Value, DecodedChildren), Error> {
        let mut elements: Vec<DecodedNode> = Vec::new();
        decode_counted(buf, &node.size, path, &mut |buf, count| {
            for _ in 0..count {
                let child_path = format!("{}[{}]", path, elements.len());
                elements.push(self.decode_node_meta(node.item, buf, source, &child_path)?);
            }
            Ok(())
        })?;
        let value = Value::SequenceOf(elements.iter().map(|e| e.value.clone()).collect());
        Ok((value, DecodedChildren::Elements(elements)))
    }

    fn decode_choice_meta(
        &self,
        node: &ChoiceNode,
        buf: &mut BitBuffer,
        source: &Arc<[u8]>,
        path: &str,
    ) -> Result<(Value, DecodedChildren), Error> {
        if node.extensible && buf.read_bit().map_err(|e| e.at(path))? {
            let index = read_count(buf, path)?;
            let alternative = node
                .extension_alternatives
                .get(index as usize)
                .ok_or_else(|| {
                    Error::decode(
                        path,
                        format!("unknown CHOICE extension index {}", index),
                    )
                })?;
            let child_path = format!("{}.{}", path, alternative.name);
            let child = self.decode_open_child_meta(alternative.node, buf, source, &child_path)?;
            let value = Value::choice(&alternative.name, child.value.clone());
            return Ok((
                value,
                DecodedChildren::Alternative {
                    name: alternative.name.clone(),
                    node: Box::new(child),
                },
            ));
        }
        let index = buf
            .read_bits(node.root_bits as usize)
            .map_err(|e| e.at(path))?;
        let alternative = node.alternatives.get(index as usize).ok_or_else(|| {
            Error::decode(path, format!("CHOICE index {} out of range", index))
        })?;
        let child_path = format!("{}.{}", path, alternative.name);
        let child = self.decode_node_meta(alternative.node, buf, source, &child_path)?;
        let value = Value::choice(&alternative.name, child.value.clone());
        Ok((
            value,
            DecodedChildren::Alternative {
                name: alternative.name.clone(),
                node: Box::new(child),
            },
        ))
    }

    /// Decodes an open-type wrapped child. When the wrapper octets were
    /// a single contiguous chunk the sub-tree is decoded with metadata
    /// and rebased into the outer buffer; a fragmented wrapper is
    /// decoded plainly and reported as one opaque node spanning the
    /// whole wrapper.
    fn decode_open_child_meta(
        &self,
        id: usize,
        buf: &mut BitBuffer,
        source: &Arc<[u8]>,
        path: &str,
    ) -> Result<DecodedNode, Error> {
        let wrapper_start = buf.read_position();
        let (octets, contiguous) = read_open_type(buf, path)?;
        match contiguous {
            Some(octets_start) => {
                let inner_source: Arc<[u8]> = Arc::from(octets.as_slice());
                let mut inner = BitBuffer::from_bytes(&octets);
                let mut child = self.decode_node_meta(id, &mut inner, &inner_source, path)?;
                child.rebase(octets_start, source);
                Ok(child)
            }
            None => {
                let mut inner = BitBuffer::from_bytes(&octets);
                let value = self.decode_node(id, &mut inner, path)?;
                Ok(DecodedNode {
                    value,
                    bit_offset: wrapper_start,
                    bit_length: buf.read_position() - wrapper_start,
                    source: source.clone(),
                    children: DecodedChildren::None,
                })
            }
        }
    }
}
