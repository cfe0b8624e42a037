//! Configuration management
//!
//! Where a node keeps its chain database and wallet file, read from the
//! environment once at startup and passed around explicitly.

pub mod settings;

pub use settings::Config;
