//! Canonical fingerprint serialization and identifier derivation
//!
//! # Canonical form
//!
//! ```text
//! {"k1":v1,"k2":v2,...}
//! ```
//!
//! - Object keys sorted by UTF-8 bytes, at every nesting level
//! - Arrays keep their element order
//! - No insignificant whitespace, UTF-8 text
//! - Integers in plain decimal
//! - Floats with no fractional part and magnitude below 2^53 print as
//!   integers (`2.0` -> `2`, `-0.0` -> `0`); other floats print as the
//!   shortest round-trip decimal
//!
//! The identifier is the first [`ID_BYTES`] bytes of SHA-256 over the
//! canonical bytes, lowercase hex.

use crate::models::{Fingerprint, FingerprintId, SignalValue};
use serde_json::Number;
use sha2::{Digest, Sha256};

/// Digest bytes kept in a [`FingerprintId`] (32 hex chars).
pub const ID_BYTES: usize = 16;

/// Largest magnitude at which every integral f64 is exact.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0; // 2^53

/// Canonical UTF-8 serialization of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical text. Always valid UTF-8 since it is built from `str`s.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

/// Serialize a fingerprint into its canonical, order-independent form.
pub fn canonicalize(fingerprint: &Fingerprint) -> CanonicalBytes {
    let mut out = String::with_capacity(256);
    write_object(&mut out, fingerprint.iter().collect());
    CanonicalBytes(out.into_bytes())
}

/// Derive the stable identifier for canonical bytes.
pub fn derive_id(bytes: &CanonicalBytes) -> FingerprintId {
    let digest = Sha256::digest(bytes.as_bytes());
    FingerprintId::new(hex::encode(&digest[..ID_BYTES]))
}

/// `derive_id(canonicalize(fingerprint))`.
pub fn fingerprint_id(fingerprint: &Fingerprint) -> FingerprintId {
    derive_id(&canonicalize(fingerprint))
}

fn write_object(out: &mut String, mut entries: Vec<(&String, &SignalValue)>) {
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &SignalValue) {
    match value {
        SignalValue::Null => out.push_str("null"),
        SignalValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        SignalValue::Number(n) => write_number(out, n),
        SignalValue::String(s) => write_string(out, s),
        SignalValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        SignalValue::Object(map) => write_object(out, map.iter().collect()),
    }
}

fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT {
            out.push_str(&(f as i64).to_string());
        } else {
            // serde_json prints floats via ryu (shortest round-trip)
            out.push_str(&n.to_string());
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push_str(&SignalValue::String(s.to_owned()).to_string());
}
