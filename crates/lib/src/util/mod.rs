//! Shared utilities.
//!
//! Rule hashing and in-memory test fixtures.

pub mod hash;

#[cfg(test)]
pub mod testutil;
