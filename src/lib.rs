//! # asn1_uper
//!
//! Encoder and decoder for the Packed Encoding Rules of ITU-T X.691,
//! **unaligned** variant, driven by a declarative schema tree covering
//! the ASN.1 subset common in wire-format specifications (railway
//! barcodes, telecom and aviation messages).
//!
//! A [Schema] is plain data: build it in code or parse it from JSON,
//! compile it into a [Codec] against a [Registry] of named types
//! (references may be recursive), then move [Value]s in and out of
//! compact bit-packed byte arrays. [Codec::decode_with_metadata]
//! additionally records the exact bit range every sub-value occupied in
//! the input, which is what signature verification over barcode
//! payloads consumes.
//!
//! INTEGER values are carried as `i64`; that is the documented supported
//! range of this crate.
//!
//! ## Example
//!
//! ```
//! use asn1_uper::{Codec, Field, Registry, Schema, Value};
//!
//! let schema = Schema::sequence(vec![
//!     Field::new("id", Schema::integer(0, 255)),
//!     Field::new("active", Schema::Boolean),
//! ]);
//! let codec = Codec::build(&schema, &Registry::new()).unwrap();
//!
//! let value = Value::sequence([
//!     ("id", Value::Integer(42)),
//!     ("active", Value::Boolean(true)),
//! ]);
//! let bytes = codec.encode(&value).unwrap();
//! assert_eq!(bytes, vec![0x2A, 0x80]); // 8 + 1 bits, padded to 16
//! assert_eq!(codec.decode(&bytes).unwrap(), value);
//! ```

pub mod bits;
pub mod codec;
mod decode;
pub mod decoded;
mod encode;
pub mod errors;
pub mod schema;
pub mod value;

pub use bits::BitBuffer;
pub use codec::Codec;
pub use decoded::{strip_metadata, DecodedChildren, DecodedNode};
pub use errors::Error;
pub use schema::{Alternative, Field, Registry, Schema, SizeConstraint};
pub use value::{BitStringValue, ChoiceValue, RawBits, Value};
