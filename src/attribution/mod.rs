//! Attribution backend client
//!
//! Talks to the matching service over its JSON protocol:
//!
//! - `POST {base}/tracking/get`  - retrieve deferred install params
//! - `POST {base}/tracking/save` - record a click/install (best effort)
//! - `GET  {base}/tracking/health`
//!
//! One bounded-timeout request per call. Retries and result caching are the
//! caller's business (see [`crate::reconciler::Reconciler`]).

pub mod client;
pub mod error;
pub mod protocol;

pub use client::*;
pub use error::*;
pub use protocol::*;
