//! Configuration management module
//!
//! Provides TOML-based configuration loading and path resolution.

mod config;

pub use config::*;
