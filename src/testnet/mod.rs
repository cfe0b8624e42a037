//! Helpers for tests that need a real chain on disk.

pub mod test_utils;

pub use test_utils::*;
