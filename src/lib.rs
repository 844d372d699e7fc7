//! Decision and memory engine for the Cortex natural-language package
//! management front-end: semver conflict resolution, an LLM-backed
//! semantic cache, graceful degradation when providers are unreachable,
//! and the provider router itself.

pub mod cache;
pub mod config;
pub mod context_memory;
pub mod coordinator;
pub mod daemon_client;
pub mod degradation;
pub mod dependency_graph;
pub mod embedding;
pub mod error;
pub mod impact_analyzer;
pub mod installation_history;
pub mod interpreter;
pub mod llm;
pub mod persistence;
pub mod semver;
pub mod shell;
pub mod transaction_history;

pub use error::{Error, Result};
