use crate::embedding::{cosine_similarity, embed};
use crate::error::Result;
use crate::persistence::{pool_for, SqlitePool};
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_MAX_ENTRIES: u64 = 500;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.86;
const DEFAULT_CANDIDATE_LIMIT: u32 = 200;

/// Hit/miss counters for a [`SemanticCache`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.hits as f64 / self.total() as f64
        }
    }
}

/// Persistent prompt→commands cache with exact and semantic-similarity
/// lookup. Every write is advisory: a SQLite error during `put` is logged
/// and swallowed rather than propagated (spec §4.C, §7).
pub struct SemanticCache {
    pool: Arc<SqlitePool>,
    max_entries: u64,
    similarity_threshold: f64,
}

impl SemanticCache {
    pub fn open(db_path: &Path) -> Result<Self> {
        let max_entries = std::env::var("CORTEX_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_ENTRIES);
        let similarity_threshold = std::env::var("CORTEX_CACHE_SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

        let pool = pool_for(db_path)?;
        let cache = Self {
            pool,
            max_entries,
            similarity_threshold,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS llm_cache_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                system_hash TEXT NOT NULL,
                prompt TEXT NOT NULL,
                prompt_hash TEXT NOT NULL,
                embedding TEXT NOT NULL,
                commands_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_llm_cache_unique
                ON llm_cache_entries(provider, model, system_hash, prompt_hash);
            CREATE INDEX IF NOT EXISTS idx_llm_cache_lru
                ON llm_cache_entries(last_accessed);
            CREATE TABLE IF NOT EXISTS llm_cache_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                hits INTEGER NOT NULL DEFAULT 0,
                misses INTEGER NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO llm_cache_stats(id, hits, misses) VALUES (1, 0, 0);",
        )?;
        Ok(())
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Exact match, then semantic near-match over up to `candidate_limit`
    /// rows sharing `(provider, model, system_prompt)`. Returns `None` on
    /// any underlying error; the caller treats a miss and an error alike.
    pub fn get_commands(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
        system_prompt: &str,
    ) -> Option<Vec<String>> {
        match self.get_commands_inner(prompt, provider, model, system_prompt) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(error = %err, "semantic cache get failed, treating as miss");
                None
            }
        }
    }

    fn get_commands_inner(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
        system_prompt: &str,
    ) -> Result<Option<Vec<String>>> {
        let system_hash = Self::hash_text(system_prompt);
        let prompt_hash = Self::hash_text(prompt);
        let now = Self::now();

        let mut conn = self.pool.get()?;

        let exact: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, commands_json FROM llm_cache_entries
                 WHERE provider = ?1 AND model = ?2 AND system_hash = ?3 AND prompt_hash = ?4
                 LIMIT 1",
                rusqlite::params![provider, model, system_hash, prompt_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, commands_json)) = exact {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE llm_cache_entries SET last_accessed = ?1, hit_count = hit_count + 1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            tx.execute("UPDATE llm_cache_stats SET hits = hits + 1 WHERE id = 1", [])?;
            tx.commit()?;
            return Ok(Some(serde_json::from_str(&commands_json)?));
        }

        let query_vec = embed(prompt);

        let mut stmt = conn.prepare(
            "SELECT id, embedding, commands_json FROM llm_cache_entries
             WHERE provider = ?1 AND model = ?2 AND system_hash = ?3
             ORDER BY last_accessed DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![provider, model, system_hash, DEFAULT_CANDIDATE_LIMIT],
            |row| {
                let id: i64 = row.get(0)?;
                let embedding_json: String = row.get(1)?;
                let commands_json: String = row.get(2)?;
                Ok((id, embedding_json, commands_json))
            },
        )?;

        let mut best: Option<(i64, f64, String)> = None;
        for row in rows {
            let (id, embedding_json, commands_json) = row?;
            let candidate_vec: Vec<f64> = serde_json::from_str(&embedding_json)?;
            let sim = cosine_similarity(&query_vec, &candidate_vec);
            if best.as_ref().map(|(_, best_sim, _)| sim > *best_sim).unwrap_or(true) {
                best = Some((id, sim, commands_json));
            }
        }
        drop(stmt);

        if let Some((id, sim, commands_json)) = best {
            if sim >= self.similarity_threshold {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE llm_cache_entries SET last_accessed = ?1, hit_count = hit_count + 1 WHERE id = ?2",
                    rusqlite::params![now, id],
                )?;
                tx.execute("UPDATE llm_cache_stats SET hits = hits + 1 WHERE id = 1", [])?;
                tx.commit()?;
                return Ok(Some(serde_json::from_str(&commands_json)?));
            }
        }

        conn.execute("UPDATE llm_cache_stats SET misses = misses + 1 WHERE id = 1", [])?;
        Ok(None)
    }

    /// Upsert on the unique `(provider, model, system_hash, prompt_hash)`
    /// index, preserving `hit_count`, then LRU-evict down to `max_entries`.
    /// Swallows I/O errors after logging at debug (spec §4.C, §7).
    pub fn put_commands(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
        system_prompt: &str,
        commands: &[String],
    ) {
        if let Err(err) = self.put_commands_inner(prompt, provider, model, system_prompt, commands) {
            tracing::debug!(error = %err, "semantic cache put failed, dropping write");
        }
    }

    fn put_commands_inner(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
        system_prompt: &str,
        commands: &[String],
    ) -> Result<()> {
        let system_hash = Self::hash_text(system_prompt);
        let prompt_hash = Self::hash_text(prompt);
        let now = Self::now();
        let embedding_json = serde_json::to_string(&embed(prompt))?;
        let commands_json = serde_json::to_string(commands)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO llm_cache_entries(
                provider, model, system_hash, prompt, prompt_hash, embedding, commands_json,
                created_at, last_accessed, hit_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, COALESCE((
                SELECT hit_count FROM llm_cache_entries
                WHERE provider = ?1 AND model = ?2 AND system_hash = ?3 AND prompt_hash = ?5
            ), 0))
            ON CONFLICT(provider, model, system_hash, prompt_hash) DO UPDATE SET
                prompt = excluded.prompt,
                embedding = excluded.embedding,
                commands_json = excluded.commands_json,
                last_accessed = excluded.last_accessed",
            rusqlite::params![
                provider,
                model,
                system_hash,
                prompt,
                prompt_hash,
                embedding_json,
                commands_json,
                now,
            ],
        )?;

        self.evict_if_needed(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn evict_if_needed(&self, conn: &rusqlite::Connection) -> Result<()> {
        let count: u64 = conn.query_row("SELECT COUNT(1) FROM llm_cache_entries", [], |row| row.get(0))?;
        if count <= self.max_entries {
            return Ok(());
        }
        let to_delete = count - self.max_entries;
        conn.execute(
            "DELETE FROM llm_cache_entries WHERE id IN (
                SELECT id FROM llm_cache_entries ORDER BY last_accessed ASC LIMIT ?1
            )",
            rusqlite::params![to_delete],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_inner().unwrap_or(CacheStats { hits: 0, misses: 0 })
    }

    fn stats_inner(&self) -> Result<CacheStats> {
        let conn = self.pool.get()?;
        let (hits, misses) = conn.query_row(
            "SELECT hits, misses FROM llm_cache_stats WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats { hits, misses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SYS: &str = "you are cortex";

    fn cache_at(dir: &std::path::Path) -> SemanticCache {
        SemanticCache::open(&dir.join("cache.db")).unwrap()
    }

    #[test]
    fn exact_hit_returns_stored_commands_and_bumps_hits() {
        let dir = tempdir().unwrap();
        let cache = cache_at(dir.path());
        let commands = vec!["apt update".to_string(), "apt install -y nginx".to_string()];

        cache.put_commands("install nginx", "openai", "gpt-4", SYS, &commands);
        let result = cache.get_commands("install nginx", "openai", "gpt-4", SYS);

        assert_eq!(result, Some(commands));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn semantic_near_hit_matches_similar_prompt() {
        let dir = tempdir().unwrap();
        let cache = cache_at(dir.path());
        let commands = vec!["apt install -y nginx".to_string()];
        cache.put_commands("install nginx", "openai", "gpt-4", SYS, &commands);

        let result = cache.get_commands("please install nginx web server", "openai", "gpt-4", SYS);
        assert_eq!(result, Some(commands));
    }

    #[test]
    fn unrelated_prompt_misses() {
        let dir = tempdir().unwrap();
        let cache = cache_at(dir.path());
        cache.put_commands(
            "install nginx",
            "openai",
            "gpt-4",
            SYS,
            &["apt install -y nginx".to_string()],
        );

        let result = cache.get_commands("explain how systemd works", "openai", "gpt-4", SYS);
        assert_eq!(result, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn eviction_keeps_row_count_at_or_below_max_entries() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("cache.db");
        std::env::set_var("CORTEX_CACHE_MAX_ENTRIES", "3");
        let cache = SemanticCache::open(&db_path).unwrap();
        std::env::remove_var("CORTEX_CACHE_MAX_ENTRIES");

        for i in 0..10 {
            cache.put_commands(
                &format!("distinct prompt number {i}"),
                "openai",
                "gpt-4",
                SYS,
                &[format!("cmd-{i}")],
            );
        }

        let conn = cache.pool.get().unwrap();
        let count: u64 = conn
            .query_row("SELECT COUNT(1) FROM llm_cache_entries", [], |row| row.get(0))
            .unwrap();
        assert!(count <= 3);
    }

    #[test]
    fn put_preserves_hit_count_on_replace() {
        let dir = tempdir().unwrap();
        let cache = cache_at(dir.path());
        cache.put_commands("install nginx", "openai", "gpt-4", SYS, &["a".to_string()]);
        cache.get_commands("install nginx", "openai", "gpt-4", SYS);
        cache.put_commands("install nginx", "openai", "gpt-4", SYS, &["b".to_string()]);

        let conn = cache.pool.get().unwrap();
        let hit_count: i64 = conn
            .query_row("SELECT hit_count FROM llm_cache_entries LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hit_count, 1);
    }
}
