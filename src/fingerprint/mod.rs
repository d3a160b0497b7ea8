//! Device fingerprints
//!
//! Collection of platform signals and the canonical serialization + digest
//! that turns them into a [`FingerprintId`](crate::models::FingerprintId).
//!
//! Every platform binding goes through the same canonicalizer, so a given
//! fingerprint yields the same identifier no matter which binding built it
//! or in which order the signals were inserted.

pub mod canonical;
pub mod collector;

pub use canonical::*;
pub use collector::*;
