//! Wire-image tests against hand-computed PER unaligned vectors.

use asn1_uper::{Alternative, Codec, Field, Registry, Schema, SizeConstraint, Value};

fn build(schema: &Schema) -> Codec {
    Codec::build(schema, &Registry::new()).expect("schema must build")
}

#[test]
fn test_sequence_of_two_scalars() {
    // SEQUENCE { id INTEGER(0..255), active BOOLEAN }, {id:42, active:true}
    // 8 + 1 = 9 bits, padded to 16: 2a 80
    let schema = Schema::sequence(vec![
        Field::new("id", Schema::integer(0, 255)),
        Field::new("active", Schema::Boolean),
    ]);
    let codec = build(&schema);
    let value = Value::sequence([
        ("id", Value::Integer(42)),
        ("active", Value::Boolean(true)),
    ]);

    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes, hex::decode("2a80").unwrap());
    assert_eq!(codec.decode(&bytes).unwrap(), value);

    let raw = codec.encode_to_raw(&value).unwrap();
    assert_eq!(raw.bit_length, 9);
    assert_eq!(raw.bytes, bytes);
}

#[test]
fn test_enumerated_two_bits() {
    // ENUMERATED { red, green, blue }, green -> index 1 in 2 bits: 40
    let codec = build(&Schema::enumerated(["red", "green", "blue"]));
    let bytes = codec.encode(&Value::enumerated("green")).unwrap();
    assert_eq!(bytes, vec![0x40]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::enumerated("green"));
}

#[test]
fn test_extensible_integer_escapes_constraint() {
    // INTEGER(0..100, ...), 200: extension bit 1, length 1, octet c8
    let schema = Schema::Integer {
        min: Some(0),
        max: Some(100),
        extensible: true,
    };
    let codec = build(&schema);

    let bytes = codec.encode(&Value::Integer(200)).unwrap();
    assert_eq!(bytes, vec![0x80, 0xE4, 0x00]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(200));

    // In-range values stay in the 7-bit root form behind a 0 bit.
    let bytes = codec.encode(&Value::Integer(100)).unwrap();
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(100));
    assert_eq!(bytes.len(), 1);
}

#[test]
fn test_optional_and_defaulted_fields_absent() {
    // SEQUENCE { x INTEGER(0..255), y IA5String OPTIONAL,
    //            z INTEGER(0..10) DEFAULT 1 }, {x:5}
    // preamble 00, then 8 bits 05
    let schema = Schema::sequence(vec![
        Field::new("x", Schema::integer(0, 255)),
        Field::new("y", Schema::ia5_string()).optional(),
        Field::new("z", Schema::integer(0, 10)).with_default(Value::Integer(1)),
    ]);
    let codec = build(&schema);

    let bytes = codec
        .encode(&Value::sequence([("x", Value::Integer(5))]))
        .unwrap();
    assert_eq!(bytes, vec![0x01, 0x40]);

    // The decoder materialises the default.
    let decoded = codec.decode(&bytes).unwrap();
    assert_eq!(
        decoded,
        Value::sequence([("x", Value::Integer(5)), ("z", Value::Integer(1))])
    );

    // A field equal to its default is dropped from the wire.
    let bytes_explicit = codec
        .encode(&Value::sequence([
            ("x", Value::Integer(5)),
            ("z", Value::Integer(1)),
        ]))
        .unwrap();
    assert_eq!(bytes_explicit, bytes);
}

#[test]
fn test_sequence_of_integers() {
    // SEQUENCE OF INTEGER(0..255), [10, 20, 30]: 03 0a 14 1e
    let codec = build(&Schema::sequence_of(Schema::integer(0, 255)));
    let value = Value::SequenceOf(vec![
        Value::Integer(10),
        Value::Integer(20),
        Value::Integer(30),
    ]);
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes, hex::decode("030a141e").unwrap());
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_recursive_via_station_chain() {
    // ViaStation ::= SEQUENCE { code INTEGER(0..65535),
    //                           next ViaStation OPTIONAL }
    let mut registry = Registry::new();
    registry
        .define(
            "ViaStation",
            Schema::sequence(vec![
                Field::new("code", Schema::integer(0, 65535)),
                Field::new("next", Schema::reference("ViaStation")).optional(),
            ]),
        )
        .unwrap();
    let codec = Codec::build(&Schema::reference("ViaStation"), &registry).unwrap();

    let value = Value::sequence([
        ("code", Value::Integer(1)),
        (
            "next",
            Value::sequence([("code", Value::Integer(2))]),
        ),
    ]);
    let bytes = codec.encode(&value).unwrap();
    // 1 | 0x0001 | 0 | 0x0002 = 34 bits
    assert_eq!(bytes, vec![0x80, 0x00, 0x80, 0x00, 0x80]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_boolean_alone_sets_top_bit() {
    let codec = build(&Schema::Boolean);
    assert_eq!(codec.encode(&Value::Boolean(true)).unwrap(), vec![0x80]);
    assert_eq!(codec.encode(&Value::Boolean(false)).unwrap(), vec![0x00]);

    let raw = codec.encode_to_raw(&Value::Boolean(true)).unwrap();
    assert_eq!(raw.bit_length, 1);
}

#[test]
fn test_single_value_integer_occupies_no_bits() {
    let codec = build(&Schema::integer(5, 5));
    let bytes = codec.encode(&Value::Integer(5)).unwrap();
    assert_eq!(bytes, Vec::<u8>::new());
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(5));
}

#[test]
fn test_null_occupies_no_bits() {
    let codec = build(&Schema::Null);
    assert_eq!(codec.encode(&Value::Null).unwrap(), Vec::<u8>::new());
    assert_eq!(codec.decode(&[]).unwrap(), Value::Null);
}

#[test]
fn test_fixed_size_bit_string_has_no_length() {
    let schema = Schema::BitString {
        size: SizeConstraint::fixed(4),
    };
    let codec = build(&schema);
    let value = Value::bit_string(vec![0b1010_0000], 4);
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes, vec![0xA0]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_unbounded_octet_string() {
    let schema = Schema::OctetString {
        size: SizeConstraint::unbounded(),
    };
    let codec = build(&schema);
    let value = Value::OctetString(vec![0xDE, 0xAD]);
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes, hex::decode("02dead").unwrap());
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_ia5_string_seven_bits_per_character() {
    let codec = build(&Schema::ia5_string());
    let bytes = codec.encode(&Value::from("Hi")).unwrap();
    // 02 | 'H' 1001000 | 'i' 1101001 | pad
    assert_eq!(bytes, vec![0x02, 0x91, 0xA4]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::from("Hi"));
}

#[test]
fn test_alphabet_constrained_string() {
    // Ten digits need 4 bits per character; SIZE(3) drops the count.
    let schema = Schema::Ia5String {
        size: SizeConstraint::fixed(3),
        alphabet: Some("0123456789".to_string()),
    };
    let codec = build(&schema);
    let bytes = codec.encode(&Value::from("042")).unwrap();
    assert_eq!(bytes, vec![0x04, 0x20]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::from("042"));
}

#[test]
fn test_utf8_string_counts_bytes() {
    let schema = Schema::Utf8String {
        size: SizeConstraint::unbounded(),
    };
    let codec = build(&schema);
    // 'é' is two UTF-8 bytes, so the determinant reads 3.
    let value = Value::from("aé");
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes[0], 0x03);
    assert_eq!(&bytes[1..], "aé".as_bytes());
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_object_identifier_contents() {
    let codec = build(&Schema::ObjectIdentifier);
    let value = Value::oid("1.2.840.113549");
    let bytes = codec.encode(&value).unwrap();
    // length 06, then 2a 86 48 86 f7 0d
    assert_eq!(bytes, hex::decode("062a864886f70d").unwrap());
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_enumerated_extension_is_one_based() {
    let schema = Schema::Enumerated {
        values: vec!["a".to_string(), "b".to_string()],
        extension_values: Some(vec!["x".to_string(), "y".to_string()]),
    };
    let codec = build(&schema);

    // Root value behind a 0 extension bit.
    let bytes = codec.encode(&Value::enumerated("a")).unwrap();
    assert_eq!(bytes, vec![0x00]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::enumerated("a"));

    // Second extension value: extension bit 1, determinant 2.
    let bytes = codec.encode(&Value::enumerated("y")).unwrap();
    assert_eq!(bytes, vec![0x81, 0x00]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::enumerated("y"));
}

#[test]
fn test_choice_root_index() {
    let schema = Schema::choice(vec![
        Alternative::new("num", Schema::integer(0, 7)),
        Alternative::new("flag", Schema::Boolean),
    ]);
    let codec = build(&schema);
    let value = Value::choice("flag", Value::Boolean(true));
    let bytes = codec.encode(&value).unwrap();
    // index 1 in one bit, then the boolean bit
    assert_eq!(bytes, vec![0xC0]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_choice_extension_wraps_value() {
    let schema = Schema::Choice {
        alternatives: vec![Alternative::new("a", Schema::Boolean)],
        extension_alternatives: Some(vec![Alternative::new(
            "b",
            Schema::integer(0, 255),
        )]),
    };
    let codec = build(&schema);
    let value = Value::choice("b", Value::Integer(5));
    let bytes = codec.encode(&value).unwrap();
    // ext 1 | index 00000000 | wrapper length 01 | octet 05
    assert_eq!(bytes, vec![0x80, 0x00, 0x82, 0x80]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_sequence_extension_fields() {
    let schema = Schema::Sequence {
        fields: vec![Field::new("x", Schema::integer(0, 255))],
        extension_fields: Some(vec![Field::new("y", Schema::Boolean)]),
    };
    let codec = build(&schema);

    // Without the extension the encoding is just the 0 bit and x.
    let base = Value::sequence([("x", Value::Integer(1))]);
    let bytes = codec.encode(&base).unwrap();
    assert_eq!(bytes, vec![0x00, 0x80]);
    assert_eq!(codec.decode(&bytes).unwrap(), base);

    // With it: ext 1 | x | bitmap length 0 | bitmap 1 | wrapped boolean.
    let value = Value::sequence([("x", Value::Integer(1)), ("y", Value::Boolean(true))]);
    let bytes = codec.encode(&value).unwrap();
    assert_eq!(bytes, vec![0x80, 0x80, 0x40, 0x60, 0x00]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}

#[test]
fn test_semi_constrained_integer() {
    let schema = Schema::Integer {
        min: Some(10),
        max: None,
        extensible: false,
    };
    let codec = build(&schema);
    let bytes = codec.encode(&Value::Integer(15)).unwrap();
    assert_eq!(bytes, vec![0x01, 0x05]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(15));
}

#[test]
fn test_unconstrained_integer_twos_complement() {
    let codec = build(&Schema::unconstrained_integer());

    let bytes = codec.encode(&Value::Integer(-128)).unwrap();
    assert_eq!(bytes, vec![0x01, 0x80]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(-128));

    // 200 needs a leading zero octet to stay non-negative.
    let bytes = codec.encode(&Value::Integer(200)).unwrap();
    assert_eq!(bytes, vec![0x02, 0x00, 0xC8]);
    assert_eq!(codec.decode(&bytes).unwrap(), Value::Integer(200));
}

#[test]
fn test_decode_accepts_redundant_octets_and_reencodes_minimal() {
    let codec = build(&Schema::unconstrained_integer());
    // Length 3 with two redundant leading zero octets.
    let loose = vec![0x03, 0x00, 0x00, 0xC8];
    let value = codec.decode(&loose).unwrap();
    assert_eq!(value, Value::Integer(200));
    let canonical = codec.encode(&value).unwrap();
    assert_eq!(canonical, vec![0x02, 0x00, 0xC8]);
    assert!(canonical.len() < loose.len());
}

#[test]
fn test_constrained_size_length_field() {
    // SIZE(0..16) needs a 5-bit count.
    let schema = Schema::OctetString {
        size: SizeConstraint::range(0, 16),
    };
    let codec = build(&schema);
    let value = Value::OctetString(vec![0xFF]);
    let bytes = codec.encode(&value).unwrap();
    // 00001 | 11111111 | pad -> 0f f8
    assert_eq!(bytes, vec![0x0F, 0xF8]);
    assert_eq!(codec.decode(&bytes).unwrap(), value);
}
