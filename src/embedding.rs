//! Deterministic, locale-free, external-model-free embedding (spec §3,
//! glossary), grounded on `semantic_cache.py::_embed`.
//!
//! Tokens are hashed with blake2b rather than fed through any learned model:
//! the only goal is a stable 128-dim fingerprint that clusters
//! lexically-similar prompts, not semantic understanding.

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};

pub const EMBEDDING_DIMS: usize = 128;

type Blake2b64 = Blake2b<U8>;

/// Splits `text` on any character outside `[a-z0-9._-]` after lower-casing.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Builds a 128-dim L2-normalized embedding for `text`.
///
/// Each token contributes `+1.0` or `-1.0` to `hash(token) % EMBEDDING_DIMS`,
/// with the sign taken from the top bit of the hash. The all-zero vector is
/// returned for empty input.
pub fn embed(text: &str) -> Vec<f64> {
    let mut vec = vec![0.0_f64; EMBEDDING_DIMS];
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return vec;
    }

    for token in &tokens {
        let mut hasher = Blake2b64::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let value = u64::from_be_bytes(digest.into());
        let idx = (value % EMBEDDING_DIMS as u64) as usize;
        let sign = if (value >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        vec[idx] += sign;
    }

    let norm: f64 = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
    vec
}

/// Cosine similarity between two L2-normalized embeddings reduces to a dot
/// product. Returns `0.0` if the vectors differ in length (never happens for
/// two embeddings produced by [`embed`]).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
