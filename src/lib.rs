//! Walbridge Test Suite
//!
//! End-to-end scenarios that connect the write side to the read side through
//! an in-memory store.

pub mod in_memory_adapters;

#[cfg(test)]
pub mod tests;

pub use in_memory_adapters::{parse_line, ParsedLine, StoreConnector};
