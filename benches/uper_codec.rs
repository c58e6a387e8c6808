use criterion::{black_box, criterion_group, criterion_main, Criterion};

use asn1_uper::{Alternative, Codec, Field, Registry, Schema, SizeConstraint, Value};

/// Build a ticket-shaped schema close to what railway barcode payloads
/// look like: header integers, optional strings, a via-station list and
/// a choice of payment proofs.
fn ticket_schema() -> Schema {
    Schema::sequence(vec![
        Field::new("ticket_id", Schema::integer(0, 999_999_999)),
        Field::new("issuer_code", Schema::integer(0, 65535)),
        Field::new(
            "class",
            Schema::enumerated(["first", "second", "sleeper"]),
        ),
        Field::new("holder", Schema::ia5_string()).optional(),
        Field::new(
            "flags",
            Schema::BitString {
                size: SizeConstraint::fixed(16),
            },
        ),
        Field::new(
            "stations",
            Schema::sequence_of(Schema::integer(0, 65535)),
        ),
        Field::new(
            "proof",
            Schema::choice(vec![
                Alternative::new("none", Schema::Null),
                Alternative::new(
                    "signature",
                    Schema::OctetString {
                        size: SizeConstraint::unbounded(),
                    },
                ),
            ]),
        ),
        Field::new("issuer_oid", Schema::ObjectIdentifier),
        Field::new("adults", Schema::integer(1, 9)).with_default(Value::Integer(1)),
    ])
}

/// A realistic large ticket: a long via-station chain and a 64-byte
/// signature, comparable to a dense Aztec barcode payload.
fn sample_ticket() -> Value {
    let stations: Vec<Value> = (0..120).map(|i| Value::Integer(8000 + i)).collect();
    let signature: Vec<u8> = (0..64u32).map(|i| (i * 37 % 256) as u8).collect();

    Value::sequence([
        ("ticket_id", Value::Integer(271_828_182)),
        ("issuer_code", Value::Integer(1080)),
        ("class", Value::enumerated("second")),
        ("holder", Value::from("DOE/JANE MS")),
        ("flags", Value::bit_string(vec![0xC0, 0x01], 16)),
        ("stations", Value::SequenceOf(stations)),
        ("proof", Value::choice("signature", Value::OctetString(signature))),
        ("issuer_oid", Value::oid("2.23.136.1.1.1")),
        ("adults", Value::Integer(2)),
    ])
}

fn benchmark_encode(c: &mut Criterion) {
    let codec = Codec::build(&ticket_schema(), &Registry::new()).unwrap();
    let value = sample_ticket();

    let bytes = codec.encode(&value).unwrap();
    println!("\n=== UPER Benchmark Payload Info ===");
    println!("Encoded ticket size: {} bytes", bytes.len());
    println!("===================================\n");

    c.bench_function("encode_ticket", |b| {
        b.iter(|| codec.encode(black_box(&value)).unwrap())
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let codec = Codec::build(&ticket_schema(), &Registry::new()).unwrap();
    let bytes = codec.encode(&sample_ticket()).unwrap();

    c.bench_function("decode_ticket", |b| {
        b.iter(|| codec.decode(black_box(&bytes)).unwrap())
    });
}

fn benchmark_decode_with_metadata(c: &mut Criterion) {
    let codec = Codec::build(&ticket_schema(), &Registry::new()).unwrap();
    let bytes = codec.encode(&sample_ticket()).unwrap();

    c.bench_function("decode_ticket_with_metadata", |b| {
        b.iter(|| codec.decode_with_metadata(black_box(&bytes)).unwrap())
    });
}

fn benchmark_build(c: &mut Criterion) {
    let schema = ticket_schema();
    let registry = Registry::new();

    c.bench_function("build_ticket_codec", |b| {
        b.iter(|| Codec::build(black_box(&schema), &registry).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_decode,
    benchmark_decode_with_metadata,
    benchmark_build
);
criterion_main!(benches);
