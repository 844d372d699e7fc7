//! Interaction ledger, pattern mining and suggestion engine (spec §4.L),
//! grounded on `original_source/cortex/context_memory.py`.

use crate::error::Result;
use crate::persistence::{pool_for, SqlitePool};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const RECENT_PATTERN_WINDOW_SECONDS: i64 = 30 * 86_400;
const RECENT_SUGGESTION_WINDOW_SECONDS: i64 = 7 * 86_400;
const PATTERN_MIN_FREQUENCY: i64 = 3;
const PATTERN_CONFIDENCE_DIVISOR: f64 = 10.0;
const SUGGESTION_MIN_CONFIDENCE: f64 = 0.7;
const PROACTIVE_CONFIDENCE_THRESHOLD: f64 = 0.8;
const PROACTIVE_MIN_FREQUENCY: i64 = 5;

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn hash16(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Option<i64>,
    pub timestamp: i64,
    pub category: String,
    pub context: String,
    pub action: String,
    pub result: String,
    pub success: bool,
    pub confidence: f64,
    pub frequency: i64,
    pub metadata: serde_json::Value,
}

impl MemoryEntry {
    pub fn new(category: impl Into<String>, context: impl Into<String>, action: impl Into<String>, success: bool) -> Self {
        Self {
            id: None,
            timestamp: now_epoch(),
            category: category.into(),
            context: context.into(),
            action: action.into(),
            result: String::new(),
            success,
            confidence: 1.0,
            frequency: 1,
            metadata: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub pattern_id: String,
    pub pattern_type: String,
    pub description: String,
    pub frequency: i64,
    pub last_seen: i64,
    pub confidence: f64,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionType {
    Optimization,
    Alternative,
    Warning,
}

impl SuggestionType {
    fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::Optimization => "optimization",
            SuggestionType::Alternative => "alternative",
            SuggestionType::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub suggestion_id: String,
    pub suggestion_type: SuggestionType,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub based_on: Vec<String>,
    pub created_at: i64,
}

/// SQLite-backed ledger of user interactions with pattern mining and a
/// suggestion engine built on top (spec §4.L).
pub struct ContextMemory {
    pool: Arc<SqlitePool>,
}

impl ContextMemory {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = pool_for(db_path)?;
        let memory = Self { pool };
        memory.init_schema()?;
        Ok(memory)
    }

    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(".cortex/context_memory.db")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                category TEXT NOT NULL,
                context TEXT,
                action TEXT NOT NULL,
                result TEXT,
                success INTEGER DEFAULT 1,
                confidence REAL DEFAULT 1.0,
                frequency INTEGER DEFAULT 1,
                metadata TEXT
            );
            CREATE TABLE IF NOT EXISTS patterns (
                pattern_id TEXT PRIMARY KEY,
                pattern_type TEXT NOT NULL,
                description TEXT,
                frequency INTEGER DEFAULT 1,
                last_seen INTEGER,
                confidence REAL DEFAULT 0.0,
                actions TEXT
            );
            CREATE TABLE IF NOT EXISTS suggestions (
                suggestion_id TEXT PRIMARY KEY,
                suggestion_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                confidence REAL DEFAULT 0.0,
                based_on TEXT,
                created_at INTEGER,
                dismissed INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT,
                category TEXT,
                updated_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_memory_category ON memory_entries(category);
            CREATE INDEX IF NOT EXISTS idx_memory_timestamp ON memory_entries(timestamp);
            CREATE INDEX IF NOT EXISTS idx_patterns_type ON patterns(pattern_type);",
        )?;
        Ok(())
    }

    /// Inserts the entry then mines `(category, action)` pairs with count
    /// ≥3 over the trailing 30 days into the `patterns` table, as a single
    /// transaction.
    pub fn record_interaction(&self, entry: &MemoryEntry) -> Result<i64> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO memory_entries
                (timestamp, category, context, action, result, success, confidence, frequency, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                entry.timestamp,
                entry.category,
                entry.context,
                entry.action,
                entry.result,
                entry.success as i64,
                entry.confidence,
                entry.frequency,
                serde_json::to_string(&entry.metadata)?,
            ],
        )?;
        let entry_id = tx.last_insert_rowid();

        analyze_patterns(&tx, &entry.category, entry.timestamp)?;
        tx.commit()?;
        Ok(entry_id)
    }

    pub fn get_patterns(&self, pattern_type: Option<&str>, min_confidence: f64) -> Result<Vec<Pattern>> {
        let conn = self.pool.get()?;
        let mut patterns = Vec::new();

        let mut query = "SELECT pattern_id, pattern_type, description, frequency, last_seen, confidence, actions FROM patterns WHERE confidence >= ?1".to_string();
        if pattern_type.is_some() {
            query.push_str(" AND pattern_type = ?2");
        }
        query.push_str(" ORDER BY confidence DESC, frequency DESC");

        let mut stmt = conn.prepare(&query)?;
        let mapper = |row: &rusqlite::Row| -> rusqlite::Result<Pattern> {
            let actions: String = row.get(6)?;
            Ok(Pattern {
                pattern_id: row.get(0)?,
                pattern_type: row.get(1)?,
                description: row.get(2)?,
                frequency: row.get(3)?,
                last_seen: row.get(4)?,
                confidence: row.get(5)?,
                actions: serde_json::from_str(&actions).unwrap_or_default(),
            })
        };

        if let Some(pattern_type) = pattern_type {
            for row in stmt.query_map(rusqlite::params![min_confidence, pattern_type], mapper)? {
                patterns.push(row?);
            }
        } else {
            for row in stmt.query_map(rusqlite::params![min_confidence], mapper)? {
                patterns.push(row?);
            }
        }

        Ok(patterns)
    }

    fn recent_entries(&self, window_seconds: i64, limit: u32) -> Result<Vec<MemoryEntry>> {
        let cutoff = now_epoch() - window_seconds;
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, category, context, action, result, success, confidence, frequency, metadata
             FROM memory_entries WHERE timestamp > ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![cutoff, limit], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Emits Optimization suggestions for frequent repeated actions,
    /// Alternative suggestions for failed entries with a successful
    /// differently-actioned peer, and proactive automation proposals for
    /// high-confidence, high-frequency patterns. Persists every suggestion
    /// via `INSERT OR IGNORE` keyed by a day-scoped deterministic id.
    pub fn generate_suggestions(&self) -> Result<Vec<Suggestion>> {
        let patterns = self.get_patterns(None, SUGGESTION_MIN_CONFIDENCE)?;
        let recent = self.recent_entries(RECENT_SUGGESTION_WINDOW_SECONDS, 50)?;

        let mut suggestions = Vec::new();
        suggestions.extend(self.suggest_optimizations(&recent));
        suggestions.extend(self.suggest_alternatives(&recent)?);
        suggestions.extend(suggest_proactive_actions(&patterns));

        for suggestion in &suggestions {
            self.store_suggestion(suggestion)?;
        }

        Ok(suggestions)
    }

    fn suggest_optimizations(&self, entries: &[MemoryEntry]) -> Vec<Suggestion> {
        let mut counts: HashMap<&str, Vec<&MemoryEntry>> = HashMap::new();
        for entry in entries.iter().filter(|e| e.category == "package") {
            counts.entry(entry.action.as_str()).or_default().push(entry);
        }

        let today = now_epoch() / 86_400;
        let mut suggestions = Vec::new();
        for (action, matching) in counts {
            let count = matching.len() as i64;
            if count >= PATTERN_MIN_FREQUENCY {
                suggestions.push(Suggestion {
                    suggestion_id: hash16(&format!("optimization:{action}:{today}")),
                    suggestion_type: SuggestionType::Optimization,
                    title: format!("Frequent Installation: {action}"),
                    description: format!(
                        "You've installed {action} {count} times recently. Consider adding it to your default setup script."
                    ),
                    confidence: (count as f64 / 5.0).min(1.0),
                    based_on: matching.iter().filter_map(|e| e.id).map(|id| id.to_string()).collect(),
                    created_at: now_epoch(),
                });
            }
        }
        suggestions
    }

    fn suggest_alternatives(&self, entries: &[MemoryEntry]) -> Result<Vec<Suggestion>> {
        let today = now_epoch() / 86_400;
        let mut suggestions = Vec::new();

        for entry in entries.iter().filter(|e| !e.success) {
            let similar = self.get_similar_interactions(&entry.context, 5)?;
            if let Some(alt) = similar.iter().find(|s| s.success && s.action != entry.action) {
                suggestions.push(Suggestion {
                    suggestion_id: hash16(&format!("alternative:{}:{today}", entry.action)),
                    suggestion_type: SuggestionType::Alternative,
                    title: format!("Alternative to: {}", entry.action),
                    description: format!("Based on your history, try: {}", alt.action),
                    confidence: 0.7,
                    based_on: entry.id.map(|id| id.to_string()).into_iter().collect(),
                    created_at: now_epoch(),
                });
            }
        }

        Ok(suggestions)
    }

    /// Keyword-overlap similarity search: splits the context into
    /// stopword-filtered terms and matches against stored context/action.
    pub fn get_similar_interactions(&self, context: &str, limit: u32) -> Result<Vec<MemoryEntry>> {
        let keywords = extract_keywords(context);
        let conn = self.pool.get()?;
        let mut results = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();

        for keyword in keywords {
            let pattern = format!("%{keyword}%");
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, category, context, action, result, success, confidence, frequency, metadata
                 FROM memory_entries WHERE context LIKE ?1 OR action LIKE ?1
                 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            for row in stmt.query_map(rusqlite::params![pattern, limit], row_to_entry)? {
                let entry = row?;
                if let Some(id) = entry.id {
                    if seen_ids.insert(id) {
                        results.push(entry);
                    }
                }
            }
        }

        results.truncate(limit as usize);
        Ok(results)
    }

    fn store_suggestion(&self, suggestion: &Suggestion) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO suggestions
                (suggestion_id, suggestion_type, title, description, confidence, based_on, created_at, dismissed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            rusqlite::params![
                suggestion.suggestion_id,
                suggestion.suggestion_type.as_str(),
                suggestion.title,
                suggestion.description,
                suggestion.confidence,
                serde_json::to_string(&suggestion.based_on)?,
                suggestion.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_active_suggestions(&self, limit: u32) -> Result<Vec<Suggestion>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT suggestion_id, suggestion_type, title, description, confidence, based_on, created_at
             FROM suggestions WHERE dismissed = 0 ORDER BY confidence DESC, created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            let suggestion_type: String = row.get(1)?;
            let based_on: String = row.get(5)?;
            Ok(Suggestion {
                suggestion_id: row.get(0)?,
                suggestion_type: match suggestion_type.as_str() {
                    "alternative" => SuggestionType::Alternative,
                    "warning" => SuggestionType::Warning,
                    _ => SuggestionType::Optimization,
                },
                title: row.get(2)?,
                description: row.get(3)?,
                confidence: row.get(4)?,
                based_on: serde_json::from_str(&based_on).unwrap_or_default(),
                created_at: row.get(6)?,
            })
        })?;
        let mut suggestions = Vec::new();
        for row in rows {
            suggestions.push(row?);
        }
        Ok(suggestions)
    }

    pub fn dismiss_suggestion(&self, suggestion_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("UPDATE suggestions SET dismissed = 1 WHERE suggestion_id = ?1", [suggestion_id])?;
        Ok(())
    }

    pub fn set_preference(&self, key: &str, value: &serde_json::Value, category: &str) -> Result<()> {
        let now = now_epoch();
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO preferences (key, value, category, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?4",
            rusqlite::params![key, serde_json::to_string(value)?, category, now],
        )?;
        Ok(())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.pool.get()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM preferences WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }
}

fn analyze_patterns(conn: &rusqlite::Connection, category: &str, now: i64) -> Result<()> {
    let cutoff = now - RECENT_PATTERN_WINDOW_SECONDS;

    let mut stmt = conn.prepare(
        "SELECT action, COUNT(*) FROM memory_entries
         WHERE category = ?1 AND timestamp > ?2
         GROUP BY action HAVING COUNT(*) >= ?3",
    )?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(rusqlite::params![category, cutoff, PATTERN_MIN_FREQUENCY], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    for (action, frequency) in rows {
        let pattern_id = hash16(&format!("{category}:{action}"));
        let confidence = (frequency as f64 / PATTERN_CONFIDENCE_DIVISOR).min(1.0);
        conn.execute(
            "INSERT INTO patterns (pattern_id, pattern_type, description, frequency, last_seen, confidence, actions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(pattern_id) DO UPDATE SET
                frequency = ?4,
                last_seen = ?5,
                confidence = MIN(1.0, confidence + 0.1)",
            rusqlite::params![
                pattern_id,
                category,
                format!("Recurring pattern: {action}"),
                frequency,
                now,
                confidence,
                serde_json::to_string(&vec![action.clone()])?,
            ],
        )?;
    }

    Ok(())
}

fn suggest_proactive_actions(patterns: &[Pattern]) -> Vec<Suggestion> {
    let today = now_epoch() / 86_400;
    patterns
        .iter()
        .filter(|p| p.confidence > PROACTIVE_CONFIDENCE_THRESHOLD && p.frequency >= PROACTIVE_MIN_FREQUENCY)
        .map(|p| Suggestion {
            suggestion_id: hash16(&format!("proactive:{}:{today}", p.pattern_id)),
            suggestion_type: SuggestionType::Optimization,
            title: format!("Automate: {}", p.description),
            description: format!("You frequently do this ({} times). Would you like to automate it?", p.frequency),
            confidence: p.confidence,
            based_on: vec![p.pattern_id.clone()],
            created_at: now_epoch(),
        })
        .collect()
}

fn extract_keywords(text: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &["the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with"];
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MemoryEntry> {
    let metadata: Option<String> = row.get(9)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        category: row.get(2)?,
        context: row.get(3)?,
        action: row.get(4)?,
        result: row.get(5)?,
        success: row.get::<_, i64>(6)? != 0,
        confidence: row.get(7)?,
        frequency: row.get(8)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()).unwrap_or(serde_json::json!({})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_keywords_filtering_stopwords_and_short_words() {
        let keywords = extract_keywords("User wants to install Docker on the server");
        assert!(keywords.contains(&"user".to_string()));
        assert!(keywords.contains(&"wants".to_string()));
        assert!(keywords.contains(&"install".to_string()));
        assert!(keywords.contains(&"docker".to_string()));
        assert!(keywords.contains(&"server".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"to".to_string()));
        assert!(!keywords.contains(&"on".to_string()));
    }

    #[test]
    fn pattern_id_hash_is_stable_for_same_input() {
        assert_eq!(hash16("package:install docker"), hash16("package:install docker"));
        assert_eq!(hash16("package:install docker").len(), 16);
    }

    #[test]
    fn record_interaction_mines_pattern_after_three_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::open(&dir.path().join("ctx.db")).unwrap();

        for _ in 0..3 {
            let entry = MemoryEntry::new("package", "install docker", "install docker", true);
            memory.record_interaction(&entry).unwrap();
        }

        let patterns = memory.get_patterns(None, 0.0).unwrap();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].confidence > 0.0);
        assert_eq!(patterns[0].frequency, 3);
    }

    #[test]
    fn frequent_package_installs_generate_optimization_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::open(&dir.path().join("ctx.db")).unwrap();

        for _ in 0..3 {
            let entry = MemoryEntry::new("package", "install nginx", "install nginx", true);
            memory.record_interaction(&entry).unwrap();
        }

        let suggestions = memory.generate_suggestions().unwrap();
        assert!(suggestions.iter().any(|s| s.suggestion_type == SuggestionType::Optimization
            && s.title.contains("install nginx")));
    }

    #[test]
    fn dismissed_suggestions_are_excluded_from_active_list() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::open(&dir.path().join("ctx.db")).unwrap();

        for _ in 0..3 {
            let entry = MemoryEntry::new("package", "install redis", "install redis", true);
            memory.record_interaction(&entry).unwrap();
        }
        let suggestions = memory.generate_suggestions().unwrap();
        let id = suggestions[0].suggestion_id.clone();

        memory.dismiss_suggestion(&id).unwrap();
        let active = memory.get_active_suggestions(10).unwrap();
        assert!(!active.iter().any(|s| s.suggestion_id == id));
    }

    #[test]
    fn preferences_round_trip_through_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ContextMemory::open(&dir.path().join("ctx.db")).unwrap();

        memory.set_preference("auto_update", &serde_json::json!(true), "general").unwrap();
        assert_eq!(memory.get_preference("auto_update").unwrap(), Some(serde_json::json!(true)));

        memory.set_preference("auto_update", &serde_json::json!(false), "general").unwrap();
        assert_eq!(memory.get_preference("auto_update").unwrap(), Some(serde_json::json!(false)));
    }
}
