//! # nmea-protocol
//!
//! NMEA 0183 sentence types and codec.
//!
//! This crate validates, classifies, decodes and encodes sentences, and maps
//! decoded sentences to navigation cache entries.

pub mod codec;
pub mod ingest;
pub mod sentences;

pub use codec::{checksum, classify, decode, encode, frame, validate, CodecError};
pub use ingest::{cache_entries, solar_time};
pub use sentences::*;
