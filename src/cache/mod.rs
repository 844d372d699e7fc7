//! SQLite-backed prompt→commands cache with hashed embeddings, LRU eviction,
//! and stats (spec §4.C), grounded on
//! `original_source/cortex/semantic_cache.py`.

mod semantic_cache;

pub use semantic_cache::{CacheStats, SemanticCache};
