//! Distinct from the semantic cache (C): a query→response cache keyed by a
//! truncated SHA-256 hash, used by the degradation ladder (spec §4.E),
//! grounded on `graceful_degradation.py::ResponseCache`.

use crate::error::Result;
use crate::persistence::{pool_for, SqlitePool};
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SIMILAR_CANDIDATE_LIMIT: u32 = 100;
const DAY_SECONDS: i64 = 86_400;

/// A response retrieved from, or about to be stored into, the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub query_hash: String,
    pub query: String,
    pub response: String,
    pub created_at: i64,
    pub hit_count: i64,
}

/// Aggregate counts surfaced by [`ResponseCache::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseCacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub db_size_kb: f64,
}

pub struct ResponseCache {
    pool: Arc<SqlitePool>,
    db_path: std::path::PathBuf,
}

impl ResponseCache {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = pool_for(db_path)?;
        let cache = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS response_cache (
                query_hash TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_used INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_last_used ON response_cache(last_used);",
        )?;
        Ok(())
    }

    fn hash_query(query: &str) -> String {
        let normalized = query.to_lowercase();
        let normalized = normalized.trim();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    pub fn get(&self, query: &str) -> Option<CachedResponse> {
        self.get_inner(query).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "response cache get failed, treating as miss");
            None
        })
    }

    fn get_inner(&self, query: &str) -> Result<Option<CachedResponse>> {
        let query_hash = Self::hash_query(query);
        let conn = self.pool.get()?;

        let row: Option<(String, String, i64, i64)> = conn
            .query_row(
                "SELECT query, response, created_at, hit_count FROM response_cache WHERE query_hash = ?1",
                rusqlite::params![query_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((stored_query, response, created_at, hit_count)) = row else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE response_cache SET hit_count = hit_count + 1, last_used = ?1 WHERE query_hash = ?2",
            rusqlite::params![Self::now(), query_hash],
        )?;

        Ok(Some(CachedResponse {
            query_hash,
            query: stored_query,
            response,
            created_at,
            hit_count: hit_count + 1,
        }))
    }

    pub fn put(&self, query: &str, response: &str) {
        if let Err(err) = self.put_inner(query, response) {
            tracing::debug!(error = %err, "response cache put failed, dropping write");
        }
    }

    fn put_inner(&self, query: &str, response: &str) -> Result<()> {
        let query_hash = Self::hash_query(query);
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO response_cache (query_hash, query, response, created_at, hit_count, last_used)
             VALUES (?1, ?2, ?3, ?4, 0, NULL)",
            rusqlite::params![query_hash, query, response, Self::now()],
        )?;
        Ok(())
    }

    /// Keyword-overlap ranking over the 100 most-hit rows (spec §4.E tier 3).
    pub fn get_similar(&self, query: &str, limit: usize) -> Vec<CachedResponse> {
        self.get_similar_inner(query, limit).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "response cache similarity lookup failed");
            Vec::new()
        })
    }

    fn get_similar_inner(&self, query: &str, limit: usize) -> Result<Vec<CachedResponse>> {
        let lower_query = query.to_lowercase();
        let keywords: std::collections::HashSet<&str> = lower_query.split_whitespace().collect();

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT query_hash, query, response, created_at, hit_count FROM response_cache
             ORDER BY hit_count DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![SIMILAR_CANDIDATE_LIMIT], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut scored: Vec<(usize, CachedResponse)> = Vec::new();
        for row in rows {
            let (query_hash, stored_query, response, created_at, hit_count) = row?;
            let lower_stored = stored_query.to_lowercase();
            let stored_keywords: std::collections::HashSet<&str> = lower_stored.split_whitespace().collect();
            let overlap = keywords.intersection(&stored_keywords).count();
            if overlap > 0 {
                scored.push((
                    overlap,
                    CachedResponse {
                        query_hash,
                        query: stored_query,
                        response,
                        created_at,
                        hit_count,
                    },
                ));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    /// Removes entries older than `days`; returns the number removed.
    pub fn clear_old_entries(&self, days: i64) -> Result<usize> {
        let cutoff = Self::now() - days * DAY_SECONDS;
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM response_cache WHERE created_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(removed)
    }

    pub fn get_stats(&self) -> ResponseCacheStats {
        self.get_stats_inner().unwrap_or(ResponseCacheStats {
            total_entries: 0,
            total_hits: 0,
            db_size_kb: 0.0,
        })
    }

    fn get_stats_inner(&self) -> Result<ResponseCacheStats> {
        let conn = self.pool.get()?;
        let total_entries: i64 = conn.query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))?;
        let total_hits: i64 = conn.query_row(
            "SELECT COALESCE(SUM(hit_count), 0) FROM response_cache",
            [],
            |row| row.get(0),
        )?;
        let db_size_kb = std::fs::metadata(&self.db_path)
            .map(|m| m.len() as f64 / 1024.0)
            .unwrap_or(0.0);

        Ok(ResponseCacheStats {
            total_entries,
            total_hits,
            db_size_kb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("r.db")).unwrap();
        cache.put("install nginx", "apt install -y nginx");

        let cached = cache.get("install nginx").unwrap();
        assert_eq!(cached.response, "apt install -y nginx");
        assert_eq!(cached.hit_count, 1);
    }

    #[test]
    fn hash_query_is_case_and_whitespace_insensitive() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("r.db")).unwrap();
        cache.put("  Install Nginx  ", "apt install -y nginx");

        assert!(cache.get("install nginx").is_some());
    }

    #[test]
    fn get_similar_ranks_by_keyword_overlap() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("r.db")).unwrap();
        cache.put("install nginx web server", "r1");
        cache.put("remove old docker images", "r2");

        let similar = cache.get_similar("please install nginx please", 1);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].response, "r1");
    }

    #[test]
    fn clear_old_entries_removes_entries_past_cutoff() {
        let dir = tempdir().unwrap();
        let cache = ResponseCache::open(&dir.path().join("r.db")).unwrap();
        cache.put("install nginx", "r1");

        let conn = cache.pool.get().unwrap();
        conn.execute("UPDATE response_cache SET created_at = 0", []).unwrap();
        drop(conn);

        let removed = cache.clear_old_entries(30).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("install nginx").is_none());
    }
}
