//! Data models for the file gateway.
//!
//! `bucket` and `object` mirror the rows of the embedded object store;
//! `file` holds the gateway-facing records built on top of them.

pub mod bucket;
pub mod file;
pub mod object;
