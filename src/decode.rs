//! Decode half of the type-specific codecs.
//!
//! Decoding is tolerant where X.691 allows an encoder latitude
//! (non-minimal integer octets, the long length form for small counts)
//! and strict everywhere else: reserved patterns, out-of-range indices
//! and constraint violations fail with a [Error::Decode] naming the
//! schema path. Re-encoding a decoded value always yields the canonical
//! (minimal) stream.

use std::collections::BTreeMap;

use crate::bits::BitBuffer;
use crate::codec::{
    char_in_charset, CharKind, CharNode, ChoiceNode, Codec, EnumeratedNode, IntegerNode, Node,
    SequenceNode, SequenceOfNode, SizeNode,
};
use crate::encode::FRAGMENT_UNIT;
use crate::errors::Error;
use crate::value::{BitStringValue, Value};

/// One chunk of the general length determinant.
pub(crate) enum LengthChunk {
    /// A terminating count below 16K.
    Count(u64),
    /// A fragment of `k × 16K` items; more chunks follow.
    Fragment(u64),
}

pub(crate) fn read_length_chunk(buf: &mut BitBuffer, path: &str) -> Result<LengthChunk, Error> {
    if !buf.read_bit().map_err(|e| e.at(path))? {
        return Ok(LengthChunk::Count(buf.read_bits(7).map_err(|e| e.at(path))?));
    }
    if !buf.read_bit().map_err(|e| e.at(path))? {
        return Ok(LengthChunk::Count(buf.read_bits(14).map_err(|e| e.at(path))?));
    }
    let factor = buf.read_bits(6).map_err(|e| e.at(path))?;
    if factor == 0 || factor > 4 {
        return Err(Error::decode(
            path,
            format!("reserved fragmentation factor {}", factor),
        ));
    }
    Ok(LengthChunk::Fragment(factor * FRAGMENT_UNIT))
}

/// Reads a length determinant that may not be fragmented (extension
/// indices, integer octet counts).
pub(crate) fn read_count(buf: &mut BitBuffer, path: &str) -> Result<u64, Error> {
    match read_length_chunk(buf, path)? {
        LengthChunk::Count(count) => Ok(count),
        LengthChunk::Fragment(_) => Err(Error::decode(path, "unexpected fragmented length")),
    }
}

/// Reads a possibly fragmented count, handing `read_items` each chunk as
/// it arrives, and returns the total item count.
pub(crate) fn decode_fragmented(
    buf: &mut BitBuffer,
    path: &str,
    read_items: &mut impl FnMut(&mut BitBuffer, u64) -> Result<(), Error>,
) -> Result<u64, Error> {
    let mut total = 0u64;
    loop {
        match read_length_chunk(buf, path)? {
            LengthChunk::Count(count) => {
                if count > 0 {
                    read_items(buf, count)?;
                }
                return Ok(total + count);
            }
            LengthChunk::Fragment(count) => {
                read_items(buf, count)?;
                total += count;
            }
        }
    }
}

/// Counterpart of `encode_counted`: reads the extension bit and the
/// count in whichever form the size constraint selects, then the
/// payload.
pub(crate) fn decode_counted(
    buf: &mut BitBuffer,
    size: &SizeNode,
    path: &str,
    read_items: &mut impl FnMut(&mut BitBuffer, u64) -> Result<(), Error>,
) -> Result<u64, Error> {
    let extended = size.extensible && buf.read_bit().map_err(|e| e.at(path))?;
    if !extended {
        if let Some(fixed) = size.root_fixed() {
            if fixed > 0 {
                read_items(buf, fixed)?;
            }
            return Ok(fixed);
        }
        if let Some(bits) = size.constrained_bits() {
            let raw = buf.read_bits(bits as usize).map_err(|e| e.at(path))?;
            let count = size.lower + raw;
            if !size.contains(count) {
                return Err(Error::decode(
                    path,
                    format!("length {} outside {}", count, size.describe()),
                ));
            }
            if count > 0 {
                read_items(buf, count)?;
            }
            return Ok(count);
        }
    }
    let total = decode_fragmented(buf, path, read_items)?;
    if !extended && !size.contains(total) {
        return Err(Error::decode(
            path,
            format!("length {} outside {}", total, size.describe()),
        ));
    }
    Ok(total)
}

/// Reads an open-type wrapper: a possibly fragmented octet count plus
/// the octets. The second result is the bit offset of the octets in
/// `buf` when they were contiguous (single chunk), which lets metadata
/// decoding rebase the wrapped encoding into the outer buffer.
pub(crate) fn read_open_type(
    buf: &mut BitBuffer,
    path: &str,
) -> Result<(Vec<u8>, Option<usize>), Error> {
    let mut octets: Vec<u8> = Vec::new();
    let mut chunks = 0u32;
    decode_fragmented(buf, path, &mut |buf, count| {
        chunks += 1;
        octets.extend(buf.read_octets(count as usize).map_err(|e| e.at(path))?);
        Ok(())
    })?;
    let contiguous = if chunks <= 1 {
        Some(buf.read_position() - octets.len() * 8)
    } else {
        None
    };
    Ok((octets, contiguous))
}

impl Codec {
    pub(crate) fn decode_node(
        &self,
        id: usize,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        match self.node(id) {
            Node::Vacant => Err(Error::internal(path, "unresolved codec slot")),
            Node::Boolean => Ok(Value::Boolean(buf.read_bit().map_err(|e| e.at(path))?)),
            Node::Null => Ok(Value::Null),
            Node::Integer(node) => self.decode_integer(node, buf, path),
            Node::Enumerated(node) => self.decode_enumerated(node, buf, path),
            Node::BitString(size) => self.decode_bit_string(size, buf, path),
            Node::OctetString(size) => self.decode_octet_string(size, buf, path),
            Node::CharString(node) => self.decode_char_string(node, buf, path),
            Node::Utf8String(size) => self.decode_utf8_string(size, buf, path),
            Node::ObjectIdentifier => self.decode_oid(buf, path),
            Node::Sequence(node) => self.decode_sequence(node, buf, path),
            Node::SequenceOf(node) => self.decode_sequence_of(node, buf, path),
            Node::Choice(node) => self.decode_choice(node, buf, path),
        }
    }

    fn decode_integer(
        &self,
        node: &IntegerNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        match (node.min, node.max) {
            (Some(min), Some(max)) => {
                if node.extensible && buf.read_bit().map_err(|e| e.at(path))? {
                    return decode_unbounded_integer(buf, Some(min), path);
                }
                let raw = buf
                    .read_bits(node.root_bits as usize)
                    .map_err(|e| e.at(path))?;
                let v = min as i128 + raw as i128;
                if v > max as i128 {
                    return Err(Error::decode(
                        path,
                        format!("value {} exceeds INTEGER({}..{})", v, min, max),
                    ));
                }
                Ok(Value::Integer(v as i64))
            }
            (Some(min), None) => {
                if node.extensible && buf.read_bit().map_err(|e| e.at(path))? {
                    return decode_unbounded_integer(buf, None, path);
                }
                decode_unbounded_integer(buf, Some(min), path)
            }
            (None, _) => {
                if node.extensible {
                    buf.read_bit().map_err(|e| e.at(path))?;
                }
                decode_unbounded_integer(buf, None, path)
            }
        }
    }

    fn decode_enumerated(
        &self,
        node: &EnumeratedNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        if node.extension_values.is_some() && buf.read_bit().map_err(|e| e.at(path))? {
            let index = read_count(buf, path)?;
            if index == 0 {
                return Err(Error::decode(path, "extension index 0 is reserved"));
            }
            let name = node
                .extension_values
                .iter()
                .flatten()
                .nth(index as usize - 1)
                .ok_or_else(|| {
                    Error::decode(
                        path,
                        format!("unknown ENUMERATED extension index {}", index),
                    )
                })?;
            return Ok(Value::Enumerated(name.clone()));
        }
        let raw = buf
            .read_bits(node.root_bits as usize)
            .map_err(|e| e.at(path))?;
        let name = node.values.get(raw as usize).ok_or_else(|| {
            Error::decode(path, format!("ENUMERATED index {} out of range", raw))
        })?;
        Ok(Value::Enumerated(name.clone()))
    }

    fn decode_bit_string(
        &self,
        size: &SizeNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let mut payload = BitBuffer::new();
        let total = decode_counted(buf, size, path, &mut |buf, count| {
            let chunk = buf.read_bit_slice(count as usize).map_err(|e| e.at(path))?;
            payload.write_bit_slice(&chunk, 0, count as usize);
            Ok(())
        })?;
        Ok(Value::BitString(BitStringValue {
            bytes: payload.compact_bytes(),
            bit_length: total as usize,
        }))
    }

    fn decode_octet_string(
        &self,
        size: &SizeNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let mut bytes: Vec<u8> = Vec::new();
        decode_counted(buf, size, path, &mut |buf, count| {
            bytes.extend(buf.read_octets(count as usize).map_err(|e| e.at(path))?);
            Ok(())
        })?;
        Ok(Value::OctetString(bytes))
    }

    fn decode_char_string(
        &self,
        node: &CharNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let mut text = String::new();
        decode_counted(buf, &node.size, path, &mut |buf, count| {
            for _ in 0..count {
                let c = match &node.alphabet {
                    Some(alphabet) => {
                        let index = buf
                            .read_bits(alphabet.bits as usize)
                            .map_err(|e| e.at(path))?;
                        *alphabet.chars.get(index as usize).ok_or_else(|| {
                            Error::decode(
                                path,
                                format!("alphabet index {} out of range", index),
                            )
                        })?
                    }
                    None => {
                        let code = buf.read_bits(7).map_err(|e| e.at(path))? as u32;
                        let c = char::from_u32(code).unwrap_or('\u{0}');
                        if node.kind == CharKind::Visible && !char_in_charset(c, node.kind) {
                            return Err(Error::decode(
                                path,
                                format!("code point {:#04x} outside VisibleString", code),
                            ));
                        }
                        c
                    }
                };
                text.push(c);
            }
            Ok(())
        })?;
        Ok(Value::CharString(text))
    }

    fn decode_utf8_string(
        &self,
        size: &SizeNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let mut bytes: Vec<u8> = Vec::new();
        decode_counted(buf, size, path, &mut |buf, count| {
            bytes.extend(buf.read_octets(count as usize).map_err(|e| e.at(path))?);
            Ok(())
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::decode(path, "invalid UTF-8 in UTF8String"))?;
        Ok(Value::CharString(text))
    }

    fn decode_oid(&self, buf: &mut BitBuffer, path: &str) -> Result<Value, Error> {
        let mut octets: Vec<u8> = Vec::new();
        decode_fragmented(buf, path, &mut |buf, count| {
            octets.extend(buf.read_octets(count as usize).map_err(|e| e.at(path))?);
            Ok(())
        })?;
        if octets.is_empty() {
            return Err(Error::decode(path, "empty OBJECT IDENTIFIER contents"));
        }

        let mut components: Vec<u64> = Vec::new();
        let mut acc = 0u64;
        let mut mid_component = false;
        for &byte in &octets {
            if acc >> 57 != 0 {
                return Err(Error::decode(path, "OBJECT IDENTIFIER component overflow"));
            }
            acc = (acc << 7) | (byte & 0x7F) as u64;
            mid_component = byte & 0x80 != 0;
            if !mid_component {
                components.push(acc);
                acc = 0;
            }
        }
        if mid_component {
            return Err(Error::decode(
                path,
                "truncated OBJECT IDENTIFIER component",
            ));
        }

        let lead = components[0];
        let (first, second) = if lead < 40 {
            (0, lead)
        } else if lead < 80 {
            (1, lead - 40)
        } else {
            (2, lead - 80)
        };
        let mut text = format!("{}.{}", first, second);
        for component in &components[1..] {
            text.push('.');
            text.push_str(&component.to_string());
        }
        Ok(Value::ObjectIdentifier(text))
    }

    fn decode_sequence(
        &self,
        node: &SequenceNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let extended = node.extensible && buf.read_bit().map_err(|e| e.at(path))?;

        let mut preamble = Vec::with_capacity(node.preamble_len);
        for _ in 0..node.preamble_len {
            preamble.push(buf.read_bit().map_err(|e| e.at(path))?);
        }

        let mut map = BTreeMap::new();
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
                let value = self.decode_node(field.node, buf, &child_path)?;
                map.insert(field.name.clone(), value);
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
                let (octets, _) = read_open_type(buf, path)?;
                let Some(field) = node.extension_fields.get(index) else {
                    // An addition this decoder does not know: the open
                    // type length already skipped its octets.
                    continue;
                };
                let child_path = format!("{}.{}", path, field.name);
                let mut inner = BitBuffer::from_bytes(&octets);
                let value = self.decode_node(field.node, &mut inner, &child_path)?;
                map.insert(field.name.clone(), value);
            }
        }

        for field in &node.extension_fields {
            if let Some(default) = &field.default {
                if !map.contains_key(&field.name) {
                    map.insert(field.name.clone(), default.clone());
                }
            }
        }

        Ok(Value::Sequence(map))
    }

    fn decode_sequence_of(
        &self,
        node: &SequenceOfNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
        let mut items: Vec<Value> = Vec::new();
        decode_counted(buf, &node.size, path, &mut |buf, count| {
            for _ in 0..count {
                let child_path = format!("{}[{}]", path, items.len());
                items.push(self.decode_node(node.item, buf, &child_path)?);
            }
            Ok(())
        })?;
        Ok(Value::SequenceOf(items))
    }

    fn decode_choice(
        &self,
        node: &ChoiceNode,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<Value, Error> {
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
            let (octets, _) = read_open_type(buf, path)?;
            let mut inner = BitBuffer::from_bytes(&octets);
            let value = self.decode_node(alternative.node, &mut inner, &child_path)?;
            return Ok(Value::choice(&alternative.name, value));
        }
        let index = buf
            .read_bits(node.root_bits as usize)
            .map_err(|e| e.at(path))?;
        let alternative = node.alternatives.get(index as usize).ok_or_else(|| {
            Error::decode(path, format!("CHOICE index {} out of range", index))
        })?;
        let child_path = format!("{}.{}", path, alternative.name);
        let value = self.decode_node(alternative.node, buf, &child_path)?;
        Ok(Value::choice(&alternative.name, value))
    }
}

/// Reads a length-prefixed integer body. With a lower bound the octets
/// are an unsigned offset from it; without one they are a two's
/// complement whole number. Redundant leading octets are accepted and
/// vanish on re-encode.
fn decode_unbounded_integer(
    buf: &mut BitBuffer,
    min: Option<i64>,
    path: &str,
) -> Result<Value, Error> {
    let count = read_count(buf, path)?;
    if count == 0 {
        return Err(Error::decode(path, "zero-length INTEGER contents"));
    }
    let octets = buf.read_octets(count as usize).map_err(|e| e.at(path))?;
    // Accumulate left to right, failing the moment another octet would
    // shift significant bits out of the accumulator. Redundant leading
    // octets (zero fill, sign fill) carry no significant bits, so
    // non-minimal encodings of in-range values pass.
    match min {
        Some(min) => {
            let mut offset = 0u64;
            for &byte in &octets {
                if offset >> 56 != 0 {
                    return Err(Error::decode(path, "INTEGER exceeds the supported range"));
                }
                offset = (offset << 8) | u64::from(byte);
            }
            let v = i128::from(min) + i128::from(offset);
            if v > i128::from(i64::MAX) {
                return Err(Error::decode(path, "INTEGER exceeds the supported range"));
            }
            Ok(Value::Integer(v as i64))
        }
        None => {
            let mut v: i64 = if octets[0] & 0x80 != 0 { -1 } else { 0 };
            for &byte in &octets {
                if (v << 8) >> 8 != v {
                    return Err(Error::decode(path, "INTEGER exceeds the supported range"));
                }
                v = (v << 8) | i64::from(byte);
            }
            Ok(Value::Integer(v))
        }
    }
}
