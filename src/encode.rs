//! Encode half of the type-specific codecs.
//!
//! Values are written through the bit buffer exactly as X.691 unaligned
//! prescribes: no inter-field padding, constrained whole numbers as
//! fixed-width bit fields, counts through the general length determinant
//! with fragmentation at 16K.

use std::collections::BTreeMap;

use crate::bits::BitBuffer;
use crate::codec::{
    char_in_charset, CharNode, ChoiceNode, Codec, EnumeratedNode, FieldNode, IntegerNode, Node,
    SequenceNode, SequenceOfNode, SizeNode,
};
use crate::errors::Error;
use crate::value::{BitStringValue, ChoiceValue, Value};

/// Fragmentation unit of the general length determinant.
pub(crate) const FRAGMENT_UNIT: u64 = 16384;

impl Codec {
    pub(crate) fn encode_node(
        &self,
        id: usize,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        // Raw passthrough short-circuits every codec: the fragment is
        // written verbatim at the current bit position.
        if let Value::Raw(raw) = value {
            if raw.bit_length > raw.bytes.len() * 8 {
                return Err(Error::shape(
                    path,
                    format!(
                        "raw fragment advertises {} bits but carries only {}",
                        raw.bit_length,
                        raw.bytes.len() * 8
                    ),
                ));
            }
            buf.write_bit_slice(&raw.bytes, 0, raw.bit_length);
            return Ok(());
        }

        match self.node(id) {
            Node::Vacant => Err(Error::internal(path, "unresolved codec slot")),
            Node::Boolean => {
                buf.write_bit(want_boolean(value, path)?);
                Ok(())
            }
            Node::Null => match value {
                Value::Null => Ok(()),
                other => Err(wrong_kind(other, "NULL", path)),
            },
            Node::Integer(node) => self.encode_integer(node, value, buf, path),
            Node::Enumerated(node) => self.encode_enumerated(node, value, buf, path),
            Node::BitString(size) => self.encode_bit_string(size, value, buf, path),
            Node::OctetString(size) => self.encode_octet_string(size, value, buf, path),
            Node::CharString(node) => self.encode_char_string(node, value, buf, path),
            Node::Utf8String(size) => self.encode_utf8_string(size, value, buf, path),
            Node::ObjectIdentifier => self.encode_oid(value, buf, path),
            Node::Sequence(node) => self.encode_sequence(node, value, buf, path),
            Node::SequenceOf(node) => self.encode_sequence_of(node, value, buf, path),
            Node::Choice(node) => self.encode_choice(node, value, buf, path),
        }
    }

    fn encode_integer(
        &self,
        node: &IntegerNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let v = want_integer(value, path)?;
        match (node.min, node.max) {
            (Some(min), Some(max)) => {
                let in_root = v >= min && v <= max;
                if node.extensible {
                    buf.write_bit(!in_root);
                    if !in_root {
                        if v < min {
                            // The extension form is an offset from the
                            // root minimum and cannot reach below it.
                            return Err(Error::range(
                                path,
                                format!("value {} below extensible INTEGER minimum {}", v, min),
                            ));
                        }
                        return encode_semi_constrained(buf, v, min);
                    }
                } else if !in_root {
                    return Err(Error::range(
                        path,
                        format!("value {} outside INTEGER({}..{})", v, min, max),
                    ));
                }
                let offset = (v as i128 - min as i128) as u64;
                buf.write_bits(offset, node.root_bits as usize);
                Ok(())
            }
            (Some(min), None) => {
                let in_root = v >= min;
                if node.extensible {
                    buf.write_bit(!in_root);
                    if !in_root {
                        return encode_unconstrained(buf, v);
                    }
                } else if !in_root {
                    return Err(Error::range(
                        path,
                        format!("value {} below INTEGER minimum {}", v, min),
                    ));
                }
                encode_semi_constrained(buf, v, min)
            }
            (None, _) => {
                // No lower bound makes the type unconstrained; an upper
                // bound alone is not PER-visible.
                if node.extensible {
                    buf.write_bit(false);
                }
                encode_unconstrained(buf, v)
            }
        }
    }

    fn encode_enumerated(
        &self,
        node: &EnumeratedNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let name = want_enumerated(value, path)?;
        if let Some(index) = node.values.iter().position(|v| v == name) {
            if node.extension_values.is_some() {
                buf.write_bit(false);
            }
            buf.write_bits(index as u64, node.root_bits as usize);
            return Ok(());
        }
        if let Some(extension) = &node.extension_values {
            if let Some(index) = extension.iter().position(|v| v == name) {
                buf.write_bit(true);
                // Extension indices travel 1-based through the general
                // length determinant.
                write_unconstrained_count(buf, index as u64 + 1);
                return Ok(());
            }
        }
        Err(Error::range(
            path,
            format!("`{}` is not a declared ENUMERATED value", name),
        ))
    }

    fn encode_bit_string(
        &self,
        size: &SizeNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let bits = want_bit_string(value, path)?;
        if bits.bit_length > bits.bytes.len() * 8 {
            return Err(Error::shape(
                path,
                format!(
                    "BIT STRING advertises {} bits but carries only {}",
                    bits.bit_length,
                    bits.bytes.len() * 8
                ),
            ));
        }
        encode_counted(buf, bits.bit_length as u64, size, path, |buf, start, n| {
            buf.write_bit_slice(&bits.bytes, start as usize, n as usize);
            Ok(())
        })
    }

    fn encode_octet_string(
        &self,
        size: &SizeNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let bytes = want_octets(value, path)?;
        encode_counted(buf, bytes.len() as u64, size, path, |buf, start, n| {
            buf.write_octets(&bytes[start as usize..(start + n) as usize]);
            Ok(())
        })
    }

    fn encode_char_string(
        &self,
        node: &CharNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let text = want_char_string(value, path)?;
        let chars: Vec<char> = text.chars().collect();

        // Validate up front so a failure cannot leave half a payload
        // behind a fragmented length.
        for &c in &chars {
            match &node.alphabet {
                Some(alphabet) => {
                    if alphabet.index_of(c).is_none() {
                        return Err(Error::range(
                            path,
                            format!("character {:?} outside the permitted alphabet", c),
                        ));
                    }
                }
                None => {
                    if !char_in_charset(c, node.kind) {
                        return Err(Error::range(
                            path,
                            format!("character {:?} outside the string type's character set", c),
                        ));
                    }
                }
            }
        }

        encode_counted(buf, chars.len() as u64, &node.size, path, |buf, start, n| {
            for &c in &chars[start as usize..(start + n) as usize] {
                match &node.alphabet {
                    Some(alphabet) => {
                        // Validated above; a miss here cannot happen.
                        let index = alphabet.index_of(c).unwrap_or(0);
                        buf.write_bits(index, alphabet.bits as usize);
                    }
                    None => buf.write_bits(c as u64, 7),
                }
            }
            Ok(())
        })
    }

    fn encode_utf8_string(
        &self,
        size: &SizeNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let text = want_char_string(value, path)?;
        let bytes = text.as_bytes();
        encode_counted(buf, bytes.len() as u64, size, path, |buf, start, n| {
            buf.write_octets(&bytes[start as usize..(start + n) as usize]);
            Ok(())
        })
    }

    fn encode_oid(&self, value: &Value, buf: &mut BitBuffer, path: &str) -> Result<(), Error> {
        let text = want_oid(value, path)?;
        let contents = oid_contents(text, path)?;
        encode_fragmented(buf, contents.len() as u64, |buf, start, n| {
            buf.write_octets(&contents[start as usize..(start + n) as usize]);
            Ok(())
        })
    }

    fn encode_sequence(
        &self,
        node: &SequenceNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let map = want_sequence(value, path)?;

        for key in map.keys() {
            let known = node.fields.iter().any(|f| &f.name == key)
                || node.extension_fields.iter().any(|f| &f.name == key);
            if !known {
                return Err(Error::shape(path, format!("unknown field `{}`", key)));
            }
        }

        let ext_present: Vec<bool> = node
            .extension_fields
            .iter()
            .map(|field| field_present(field, map))
            .collect();
        let any_extension = ext_present.iter().any(|&present| present);
        if node.extensible {
            buf.write_bit(any_extension);
        }

        for field in node.fields.iter().filter(|f| f.in_preamble()) {
            buf.write_bit(field_present(field, map));
        }

        for field in &node.fields {
            let child_path = format!("{}.{}", path, field.name);
            match map.get(&field.name) {
                Some(v) => {
                    if field.default.as_ref() == Some(v) {
                        continue;
                    }
                    self.encode_node(field.node, v, buf, &child_path)?;
                }
                None if field.in_preamble() => {}
                None => {
                    return Err(Error::shape(
                        path,
                        format!("missing mandatory field `{}`", field.name),
                    ));
                }
            }
        }

        if node.extensible && any_extension {
            let count = node.extension_fields.len() as u64;
            if count - 1 >= FRAGMENT_UNIT {
                return Err(Error::size(path, "too many extension fields"));
            }
            write_unconstrained_count(buf, count - 1);
            for &present in &ext_present {
                buf.write_bit(present);
            }
            for (field, &present) in node.extension_fields.iter().zip(&ext_present) {
                if !present {
                    continue;
                }
                let child_path = format!("{}.{}", path, field.name);
                match map.get(&field.name) {
                    Some(v) => self.encode_open_type(field.node, v, buf, &child_path)?,
                    None => {
                        return Err(Error::internal(
                            &child_path,
                            "presence bitmap out of step with value",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn encode_sequence_of(
        &self,
        node: &SequenceOfNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let items = want_list(value, path)?;
        encode_counted(buf, items.len() as u64, &node.size, path, |buf, start, n| {
            for i in start..start + n {
                let child_path = format!("{}[{}]", path, i);
                self.encode_node(node.item, &items[i as usize], buf, &child_path)?;
            }
            Ok(())
        })
    }

    fn encode_choice(
        &self,
        node: &ChoiceNode,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let choice = want_choice(value, path)?;
        let child_path = format!("{}.{}", path, choice.name);

        if let Some(index) = node
            .alternatives
            .iter()
            .position(|alt| alt.name == choice.name)
        {
            if node.extensible {
                buf.write_bit(false);
            }
            buf.write_bits(index as u64, node.root_bits as usize);
            return self.encode_node(node.alternatives[index].node, &choice.value, buf, &child_path);
        }

        if let Some(index) = node
            .extension_alternatives
            .iter()
            .position(|alt| alt.name == choice.name)
        {
            if index as u64 >= FRAGMENT_UNIT {
                return Err(Error::size(path, "extension alternative index too large"));
            }
            buf.write_bit(true);
            write_unconstrained_count(buf, index as u64);
            return self.encode_open_type(
                node.extension_alternatives[index].node,
                &choice.value,
                buf,
                &child_path,
            );
        }

        Err(Error::range(
            path,
            format!("`{}` is not a declared CHOICE alternative", choice.name),
        ))
    }

    /// Encodes `value` into a fresh buffer and embeds the result as an
    /// open type: length determinant plus whole octets, at least one.
    pub(crate) fn encode_open_type(
        &self,
        id: usize,
        value: &Value,
        buf: &mut BitBuffer,
        path: &str,
    ) -> Result<(), Error> {
        let mut inner = BitBuffer::new();
        self.encode_node(id, value, &mut inner, path)?;
        let mut octets = inner.compact_bytes();
        if octets.is_empty() {
            octets.push(0);
        }
        encode_fragmented(buf, octets.len() as u64, |buf, start, n| {
            buf.write_octets(&octets[start as usize..(start + n) as usize]);
            Ok(())
        })
    }
}

fn field_present(field: &FieldNode, map: &BTreeMap<String, Value>) -> bool {
    match map.get(&field.name) {
        None => false,
        Some(v) => field.default.as_ref() != Some(v),
    }
}

/// Writes one non-fragmented chunk of the general length determinant:
/// `0` + 7 bits below 128, `10` + 14 bits below 16K.
pub(crate) fn write_unconstrained_count(buf: &mut BitBuffer, count: u64) {
    debug_assert!(count < FRAGMENT_UNIT);
    if count < 128 {
        buf.write_bit(false);
        buf.write_bits(count, 7);
    } else {
        buf.write_bits(0b10, 2);
        buf.write_bits(count, 14);
    }
}

/// Writes a count through the general length determinant and hands the
/// item writer one range per emitted chunk. Counts of 16K and above are
/// split into `k × 16K` fragments (`k ≤ 4`) and closed by a terminating
/// chunk below 16K, possibly empty.
pub(crate) fn encode_fragmented(
    buf: &mut BitBuffer,
    total: u64,
    mut write_items: impl FnMut(&mut BitBuffer, u64, u64) -> Result<(), Error>,
) -> Result<(), Error> {
    let mut start = 0;
    let mut remaining = total;
    while remaining >= FRAGMENT_UNIT {
        let factor = (remaining / FRAGMENT_UNIT).min(4);
        buf.write_bits(0b11, 2);
        buf.write_bits(factor, 6);
        let n = factor * FRAGMENT_UNIT;
        write_items(buf, start, n)?;
        start += n;
        remaining -= n;
    }
    write_unconstrained_count(buf, remaining);
    if remaining > 0 {
        write_items(buf, start, remaining)?;
    }
    Ok(())
}

/// Writes an extension bit (when the size constraint is extensible) and
/// the count in whichever form the constraint selects, then the payload
/// through `write_items`.
pub(crate) fn encode_counted(
    buf: &mut BitBuffer,
    count: u64,
    size: &SizeNode,
    path: &str,
    mut write_items: impl FnMut(&mut BitBuffer, u64, u64) -> Result<(), Error>,
) -> Result<(), Error> {
    let in_root = size.contains(count);
    if size.extensible {
        buf.write_bit(!in_root);
    } else if !in_root {
        return Err(Error::size(
            path,
            format!("length {} outside {}", count, size.describe()),
        ));
    }
    if in_root {
        if let Some(fixed) = size.root_fixed() {
            debug_assert_eq!(count, fixed);
            return write_items(buf, 0, count);
        }
        if let Some(bits) = size.constrained_bits() {
            buf.write_bits(count - size.lower, bits as usize);
            return write_items(buf, 0, count);
        }
    }
    encode_fragmented(buf, count, write_items)
}

/// Minimal big-endian contents octets of a non-negative whole number:
/// just enough octets for its significant bits, at least one.
pub(crate) fn minimal_unsigned_octets(v: u64) -> Vec<u8> {
    let n_octets = (64 - v.leading_zeros() as usize).div_ceil(8).max(1);
    v.to_be_bytes()[8 - n_octets..].to_vec()
}

/// Minimal two's-complement contents octets of a whole number: enough
/// octets for every magnitude bit plus the sign bit, at least one.
pub(crate) fn minimal_signed_octets(v: i64) -> Vec<u8> {
    let magnitude_bits = 64 - (v ^ (v >> 63)).leading_zeros() as usize;
    let n_octets = (magnitude_bits + 1).div_ceil(8);
    v.to_be_bytes()[8 - n_octets..].to_vec()
}

/// Length determinant plus minimal unsigned octets of `v - min`.
fn encode_semi_constrained(buf: &mut BitBuffer, v: i64, min: i64) -> Result<(), Error> {
    let offset = (v as i128 - min as i128) as u64;
    let octets = minimal_unsigned_octets(offset);
    write_unconstrained_count(buf, octets.len() as u64);
    buf.write_octets(&octets);
    Ok(())
}

/// Length determinant plus minimal two's-complement octets of `v`.
fn encode_unconstrained(buf: &mut BitBuffer, v: i64) -> Result<(), Error> {
    let octets = minimal_signed_octets(v);
    write_unconstrained_count(buf, octets.len() as u64);
    buf.write_octets(&octets);
    Ok(())
}

/// BER contents octets of an OBJECT IDENTIFIER in dotted text form, per
/// X.690 §8.19: the first two components collapse into `40·a + b`, every
/// component travels base-128 with the high bit marking continuation.
pub(crate) fn oid_contents(text: &str, path: &str) -> Result<Vec<u8>, Error> {
    let components: Vec<u64> = text
        .split('.')
        .map(|part| part.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| {
            Error::shape(path, format!("malformed OBJECT IDENTIFIER `{}`", text))
        })?;
    if components.len() < 2 {
        return Err(Error::shape(
            path,
            "OBJECT IDENTIFIER needs at least two components",
        ));
    }
    let first = components[0];
    let second = components[1];
    if first > 2 {
        return Err(Error::range(
            path,
            format!("first OBJECT IDENTIFIER component {} exceeds 2", first),
        ));
    }
    if first < 2 && second >= 40 {
        return Err(Error::range(
            path,
            format!("second OBJECT IDENTIFIER component {} exceeds 39", second),
        ));
    }
    let lead = first
        .checked_mul(40)
        .and_then(|v| v.checked_add(second))
        .ok_or_else(|| Error::range(path, "OBJECT IDENTIFIER component overflow"))?;

    let mut contents = Vec::new();
    push_base128(&mut contents, lead);
    for &component in &components[2..] {
        push_base128(&mut contents, component);
    }
    Ok(contents)
}

fn push_base128(out: &mut Vec<u8>, v: u64) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    let mut rest = v;
    loop {
        groups[n] = (rest & 0x7F) as u8;
        rest >>= 7;
        n += 1;
        if rest == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let marker = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | marker);
    }
}

fn wrong_kind(value: &Value, expected: &str, path: &str) -> Error {
    Error::shape(
        path,
        format!("expected a {} value, found {}", expected, value.kind_name()),
    )
}

fn want_boolean(value: &Value, path: &str) -> Result<bool, Error> {
    match value {
        Value::Boolean(b) => Ok(*b),
        other => Err(wrong_kind(other, "BOOLEAN", path)),
    }
}

fn want_integer(value: &Value, path: &str) -> Result<i64, Error> {
    match value {
        Value::Integer(v) => Ok(*v),
        other => Err(wrong_kind(other, "INTEGER", path)),
    }
}

fn want_enumerated<'a>(value: &'a Value, path: &str) -> Result<&'a str, Error> {
    match value {
        Value::Enumerated(name) => Ok(name),
        other => Err(wrong_kind(other, "ENUMERATED", path)),
    }
}

fn want_bit_string<'a>(value: &'a Value, path: &str) -> Result<&'a BitStringValue, Error> {
    match value {
        Value::BitString(bits) => Ok(bits),
        other => Err(wrong_kind(other, "BIT STRING", path)),
    }
}

fn want_octets<'a>(value: &'a Value, path: &str) -> Result<&'a [u8], Error> {
    match value {
        Value::OctetString(bytes) => Ok(bytes),
        other => Err(wrong_kind(other, "OCTET STRING", path)),
    }
}

fn want_char_string<'a>(value: &'a Value, path: &str) -> Result<&'a str, Error> {
    match value {
        Value::CharString(text) => Ok(text),
        other => Err(wrong_kind(other, "character string", path)),
    }
}

fn want_oid<'a>(value: &'a Value, path: &str) -> Result<&'a str, Error> {
    match value {
        Value::ObjectIdentifier(text) => Ok(text),
        other => Err(wrong_kind(other, "OBJECT IDENTIFIER", path)),
    }
}

fn want_sequence<'a>(value: &'a Value, path: &str) -> Result<&'a BTreeMap<String, Value>, Error> {
    match value {
        Value::Sequence(map) => Ok(map),
        other => Err(wrong_kind(other, "SEQUENCE", path)),
    }
}

fn want_list<'a>(value: &'a Value, path: &str) -> Result<&'a [Value], Error> {
    match value {
        Value::SequenceOf(items) => Ok(items),
        other => Err(wrong_kind(other, "SEQUENCE OF", path)),
    }
}

fn want_choice<'a>(value: &'a Value, path: &str) -> Result<&'a ChoiceValue, Error> {
    match value {
        Value::Choice(choice) => Ok(choice),
        other => Err(wrong_kind(other, "CHOICE", path)),
    }
}
