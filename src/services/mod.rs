//! Storage services: the core strategy and the pieces it is built from.

pub mod codec;
pub mod mime;
pub mod object_store;
pub mod sqlite_store;
pub mod strategy;
