//! Codec module - opt-in body en/decoding at the frame boundary.
//!
//! The engines treat bodies as opaque bytes unless the embedder enables
//! `auto_json`, in which case bodies whose `content-type` is
//! `application/json` pass through [`JsonCodec`] on both directions.
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the engine stays pure bytes everywhere else.

mod json;

pub use json::{JsonCodec, Payload, JSON_CONTENT_TYPE};
