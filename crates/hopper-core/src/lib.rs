//! Shared types for Hopper: the compute wire schema, data trees, value codecs
//! and configuration.

pub mod codec;
pub mod config;
pub mod schema;
pub mod tree;
