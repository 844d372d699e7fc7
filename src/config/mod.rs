//! Layered configuration (spec §4.N / §6), grounded on the hierarchical
//! merge-then-validate shape of
//! `aetherlight-core::config::loader::ConfigLoader`, collapsed from four
//! tiers to the three this engine actually has: compiled-in defaults,
//! `~/.cortex/config.toml`, and environment variables.

mod loader;
mod validator;

pub use loader::{ConfigLoader, CortexConfig};
pub use validator::validate;
