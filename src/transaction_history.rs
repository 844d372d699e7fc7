//! Per-operation audit trail with undo (spec §4.J), grounded on
//! `original_source/cortex/transaction_history.py`'s `TransactionHistory`
//! and `UndoManager`.

use crate::error::{Error, Result};
use crate::persistence::{pool_for, SqlitePool};
use crate::shell;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const CRITICAL_PACKAGES: &[&str] =
    &["apt", "dpkg", "libc6", "systemd", "bash", "coreutils", "linux-image", "grub", "init"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Install,
    Remove,
    Upgrade,
    Downgrade,
    Autoremove,
    Purge,
    Configure,
    Batch,
}

impl TransactionType {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Install => "install",
            TransactionType::Remove => "remove",
            TransactionType::Upgrade => "upgrade",
            TransactionType::Downgrade => "downgrade",
            TransactionType::Autoremove => "autoremove",
            TransactionType::Purge => "purge",
            TransactionType::Configure => "configure",
            TransactionType::Batch => "batch",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "install" => TransactionType::Install,
            "remove" => TransactionType::Remove,
            "upgrade" => TransactionType::Upgrade,
            "downgrade" => TransactionType::Downgrade,
            "autoremove" => TransactionType::Autoremove,
            "purge" => TransactionType::Purge,
            "configure" => TransactionType::Configure,
            "batch" => TransactionType::Batch,
            other => return Err(Error::PersistenceError(format!("unknown transaction_type '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
    PartiallyCompleted,
}

impl TransactionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::InProgress => "in_progress",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::PartiallyCompleted => "partially_completed",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => TransactionStatus::Pending,
            "in_progress" => TransactionStatus::InProgress,
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            "rolled_back" => TransactionStatus::RolledBack,
            "partially_completed" => TransactionStatus::PartiallyCompleted,
            other => return Err(Error::PersistenceError(format!("unknown transaction status '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageState {
    pub name: String,
    pub version: Option<String>,
    pub installed: bool,
    pub config_files: Vec<String>,
    pub dependencies: Vec<String>,
}

impl PackageState {
    fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub packages: Vec<String>,
    pub timestamp: i64,
    pub status: TransactionStatus,
    pub before_state: HashMap<String, PackageState>,
    pub after_state: HashMap<String, PackageState>,
    pub command: String,
    pub user: String,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub rollback_commands: Vec<String>,
    pub is_rollback_safe: bool,
    pub rollback_warning: Option<String>,
}

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn generate_id() -> String {
    format!("tx_{}_{}", now_epoch(), &uuid::Uuid::new_v4().simple().to_string()[..8])
}

async fn capture_package_state(package: &str) -> PackageState {
    let mut state = PackageState::new(package);

    let status = shell::run_argv("dpkg-query", &["-W", "-f=${Status}|${Version}", package], COMMAND_TIMEOUT).await;
    if status.success {
        let parts: Vec<&str> = status.stdout.trim().split('|').collect();
        if parts.len() >= 2 && parts[0].contains("installed") {
            state.installed = true;
            state.version = Some(parts[1].to_string());
        }
    }

    if state.installed {
        let files = shell::run_argv("dpkg-query", &["-L", package], COMMAND_TIMEOUT).await;
        if files.success {
            for line in files.stdout.lines() {
                if line.contains("/etc/") || line.ends_with(".conf") {
                    state.config_files.push(line.to_string());
                }
            }
        }
    }

    let deps = shell::run_argv("apt-cache", &["depends", package, "--installed"], COMMAND_TIMEOUT).await;
    if deps.success {
        for line in deps.stdout.lines() {
            if let Some(idx) = line.find("Depends:") {
                let dep = line[idx + "Depends:".len()..].trim();
                if !dep.is_empty() && !dep.starts_with('<') {
                    state.dependencies.push(dep.to_string());
                }
            }
        }
    }

    state
}

fn calculate_rollback_commands(
    transaction_type: TransactionType,
    before_state: &HashMap<String, PackageState>,
) -> Vec<String> {
    let mut commands = Vec::new();

    for (pkg, state) in before_state {
        match transaction_type {
            TransactionType::Install => {
                if !state.installed {
                    commands.push(format!("sudo apt remove -y {pkg}"));
                }
            }
            TransactionType::Remove => {
                if state.installed {
                    match &state.version {
                        Some(version) => commands.push(format!("sudo apt install -y {pkg}={version}")),
                        None => commands.push(format!("sudo apt install -y {pkg}")),
                    }
                }
            }
            TransactionType::Upgrade => {
                if state.installed {
                    if let Some(version) = &state.version {
                        commands.push(format!("sudo apt install -y {pkg}={version}"));
                    }
                }
            }
            TransactionType::Purge => {
                if state.installed {
                    commands.push(format!("sudo apt install -y {pkg}"));
                    commands.push(format!("# Warning: config files for {pkg} cannot be restored"));
                }
            }
            _ => {}
        }
    }

    commands
}

fn assess_rollback_safety(transaction: &mut Transaction) {
    for pkg in &transaction.packages {
        if CRITICAL_PACKAGES.iter().any(|crit| pkg.contains(crit)) {
            transaction.is_rollback_safe = false;
            transaction.rollback_warning =
                Some(format!("Rolling back {pkg} may affect system stability. Proceed with caution."));
            break;
        }
    }

    if transaction.transaction_type == TransactionType::Purge {
        transaction.rollback_warning =
            Some("Purge operations cannot fully restore configuration files.".to_string());
    }
}

/// SQLite-backed per-operation audit trail with before/after package state
/// snapshots and synthesized rollback commands (spec §4.J).
pub struct TransactionHistory {
    pool: Arc<SqlitePool>,
}

impl TransactionHistory {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = pool_for(db_path)?;
        let history = Self { pool };
        history.init_schema()?;
        Ok(history)
    }

    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(".cortex/transaction_history.db")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                transaction_type TEXT NOT NULL,
                packages TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                before_state TEXT,
                after_state TEXT,
                command TEXT,
                user TEXT,
                duration_seconds REAL,
                error_message TEXT,
                rollback_commands TEXT,
                is_rollback_safe INTEGER,
                rollback_warning TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tx_timestamp ON transactions(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_tx_status ON transactions(status);",
        )?;
        Ok(())
    }

    /// Begins a transaction, capturing before-state and rollback commands
    /// for every package up front (spec §4.J).
    pub async fn begin(
        &self,
        transaction_type: TransactionType,
        packages: Vec<String>,
        command: &str,
    ) -> Result<Transaction> {
        let mut before_state = HashMap::with_capacity(packages.len());
        for pkg in &packages {
            before_state.insert(pkg.clone(), capture_package_state(pkg).await);
        }

        let rollback_commands = calculate_rollback_commands(transaction_type, &before_state);

        let mut transaction = Transaction {
            id: generate_id(),
            transaction_type,
            packages,
            timestamp: now_epoch(),
            status: TransactionStatus::InProgress,
            before_state,
            after_state: HashMap::new(),
            command: command.to_string(),
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            duration_seconds: 0.0,
            error_message: None,
            rollback_commands,
            is_rollback_safe: true,
            rollback_warning: None,
        };
        assess_rollback_safety(&mut transaction);

        self.save(&transaction)?;
        Ok(transaction)
    }

    /// Completes a transaction, capturing after-state on success.
    pub async fn complete(
        &self,
        transaction: &mut Transaction,
        success: bool,
        error_message: Option<String>,
    ) -> Result<()> {
        transaction.duration_seconds = (now_epoch() - transaction.timestamp) as f64;

        if success {
            transaction.status = TransactionStatus::Completed;
            for pkg in transaction.packages.clone() {
                let state = capture_package_state(&pkg).await;
                transaction.after_state.insert(pkg, state);
            }
        } else {
            transaction.status = TransactionStatus::Failed;
            transaction.error_message = error_message;
        }

        assess_rollback_safety(transaction);
        self.save(transaction)
    }

    fn save(&self, transaction: &Transaction) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO transactions
                (id, transaction_type, packages, timestamp, status, before_state, after_state,
                 command, user, duration_seconds, error_message, rollback_commands,
                 is_rollback_safe, rollback_warning)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                transaction.id,
                transaction.transaction_type.as_str(),
                serde_json::to_string(&transaction.packages)?,
                transaction.timestamp,
                transaction.status.as_str(),
                serde_json::to_string(&transaction.before_state)?,
                serde_json::to_string(&transaction.after_state)?,
                transaction.command,
                transaction.user,
                transaction.duration_seconds,
                transaction.error_message,
                serde_json::to_string(&transaction.rollback_commands)?,
                transaction.is_rollback_safe as i64,
                transaction.rollback_warning,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT * FROM transactions WHERE id = ?1", [transaction_id], row_to_transaction)
            .optional()
            .map_err(Error::from)
    }

    pub fn get_recent(&self, limit: u32, status_filter: Option<TransactionStatus>) -> Result<Vec<Transaction>> {
        let conn = self.pool.get()?;
        let mut rows = Vec::new();
        if let Some(status) = status_filter {
            let mut stmt = conn.prepare(
                "SELECT * FROM transactions WHERE status = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let mapped = stmt.query_map(rusqlite::params![status.as_str(), limit], row_to_transaction)?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let mut stmt = conn.prepare("SELECT * FROM transactions ORDER BY timestamp DESC LIMIT ?1")?;
            let mapped = stmt.query_map([limit], row_to_transaction)?;
            for row in mapped {
                rows.push(row?);
            }
        }
        Ok(rows)
    }

    /// Counts by `transaction_type` and by `status` alongside the total
    /// (spec §4.J, SPEC_FULL.md basic `stats()` requirement).
    pub fn get_stats(&self) -> Result<serde_json::Value> {
        let conn = self.pool.get()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;

        let mut by_type = serde_json::Map::new();
        let mut stmt = conn.prepare("SELECT transaction_type, COUNT(*) FROM transactions GROUP BY transaction_type")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (ty, count) = row?;
            by_type.insert(ty, serde_json::json!(count));
        }

        let mut by_status = serde_json::Map::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM transactions GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, serde_json::json!(count));
        }

        Ok(serde_json::json!({
            "total_transactions": total,
            "by_type": by_type,
            "by_status": by_status,
        }))
    }

    /// Substring search over `command` and `packages` (SPEC_FULL.md
    /// `search(query)` requirement).
    pub fn search(&self, query: &str) -> Result<Vec<Transaction>> {
        let conn = self.pool.get()?;
        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            "SELECT * FROM transactions WHERE command LIKE ?1 OR packages LIKE ?1 ORDER BY timestamp DESC",
        )?;
        let mapped = stmt.query_map([pattern], row_to_transaction)?;
        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row?);
        }
        Ok(rows)
    }
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let transaction_type: String = row.get("transaction_type")?;
    let status: String = row.get("status")?;
    let packages: String = row.get("packages")?;
    let before_state: Option<String> = row.get("before_state")?;
    let after_state: Option<String> = row.get("after_state")?;
    let rollback_commands: Option<String> = row.get("rollback_commands")?;

    Ok(Transaction {
        id: row.get("id")?,
        transaction_type: TransactionType::from_str(&transaction_type)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        packages: serde_json::from_str(&packages).unwrap_or_default(),
        timestamp: row.get("timestamp")?,
        status: TransactionStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        before_state: before_state.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        after_state: after_state.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        command: row.get("command")?,
        user: row.get("user")?,
        duration_seconds: row.get("duration_seconds")?,
        error_message: row.get("error_message")?,
        rollback_commands: rollback_commands.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        is_rollback_safe: row.get::<_, i64>("is_rollback_safe")? != 0,
        rollback_warning: row.get("rollback_warning")?,
    })
}

/// Outcome of [`UndoManager::undo`].
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub errors: Vec<String>,
}

/// Reverses a completed transaction's effects using its synthesized
/// rollback commands (spec §4.J).
pub struct UndoManager {
    history: Arc<TransactionHistory>,
}

impl UndoManager {
    pub fn new(history: Arc<TransactionHistory>) -> Self {
        Self { history }
    }

    pub fn can_undo(&self, transaction_id: &str) -> Result<(bool, String)> {
        let transaction = match self.history.get(transaction_id)? {
            Some(t) => t,
            None => return Ok((false, "Transaction not found".to_string())),
        };

        if transaction.status != TransactionStatus::Completed {
            return Ok((false, format!("Cannot undo transaction with status: {}", transaction.status.as_str())));
        }
        if transaction.rollback_commands.is_empty() {
            return Ok((false, "No rollback commands available".to_string()));
        }

        Ok((true, transaction.rollback_warning.unwrap_or_else(|| "Safe to undo".to_string())))
    }

    /// Precondition per spec §4.J: refuses an unsafe rollback unless
    /// `force`; `dry_run` reports what would run without executing it.
    pub async fn undo(&self, transaction_id: &str, dry_run: bool, force: bool) -> Result<UndoOutcome> {
        let (can_undo, reason) = self.can_undo(transaction_id)?;
        let mut transaction = self
            .history
            .get(transaction_id)?
            .ok_or_else(|| Error::NotFound(transaction_id.to_string()))?;

        if !can_undo && !force {
            return Err(Error::StateTransitionIllegal(reason));
        }
        if !transaction.is_rollback_safe && !force {
            return Ok(UndoOutcome {
                success: false,
                message: None,
                errors: vec!["Unsafe rollback - use force=True to override".to_string()],
            });
        }

        if dry_run {
            return Ok(UndoOutcome {
                success: true,
                message: Some("Dry run - no changes made".to_string()),
                errors: Vec::new(),
            });
        }

        let mut errors = Vec::new();
        for cmd in &transaction.rollback_commands {
            if cmd.trim_start().starts_with('#') {
                continue;
            }
            let output = shell::run(cmd, COMMAND_TIMEOUT).await;
            if !output.success {
                errors.push(format!("{cmd}: {}", output.stderr));
            }
        }

        if errors.is_empty() {
            transaction.status = TransactionStatus::RolledBack;
        } else {
            transaction.status = TransactionStatus::PartiallyCompleted;
        }
        self.history.save(&transaction)?;

        Ok(UndoOutcome {
            success: errors.is_empty(),
            message: if errors.is_empty() { Some("Rollback completed successfully".to_string()) } else { None },
            errors,
        })
    }

    pub async fn undo_last(&self, dry_run: bool) -> Result<UndoOutcome> {
        let recent = self.history.get_recent(1, Some(TransactionStatus::Completed))?;
        match recent.first() {
            Some(transaction) => self.undo(&transaction.id, dry_run, false).await,
            None => Err(Error::NotFound("no completed transactions to undo".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_commands_for_install_remove_newly_installed() {
        let mut before = HashMap::new();
        before.insert("nginx".to_string(), PackageState { name: "nginx".to_string(), installed: false, ..Default::default() });
        let commands = calculate_rollback_commands(TransactionType::Install, &before);
        assert_eq!(commands, vec!["sudo apt remove -y nginx".to_string()]);
    }

    #[test]
    fn rollback_commands_for_remove_reinstall_pinned_version() {
        let mut before = HashMap::new();
        before.insert(
            "nginx".to_string(),
            PackageState { name: "nginx".to_string(), installed: true, version: Some("1.18.0".to_string()), ..Default::default() },
        );
        let commands = calculate_rollback_commands(TransactionType::Remove, &before);
        assert_eq!(commands, vec!["sudo apt install -y nginx=1.18.0".to_string()]);
    }

    #[test]
    fn critical_package_substring_marks_rollback_unsafe() {
        let mut tx = Transaction {
            id: "tx_1".to_string(),
            transaction_type: TransactionType::Remove,
            packages: vec!["systemd-resolved".to_string()],
            timestamp: 0,
            status: TransactionStatus::Completed,
            before_state: HashMap::new(),
            after_state: HashMap::new(),
            command: String::new(),
            user: String::new(),
            duration_seconds: 0.0,
            error_message: None,
            rollback_commands: vec!["sudo apt install -y systemd-resolved".to_string()],
            is_rollback_safe: true,
            rollback_warning: None,
        };
        assess_rollback_safety(&mut tx);
        assert!(!tx.is_rollback_safe);
    }

    #[tokio::test]
    async fn begin_and_complete_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransactionHistory::open(&dir.path().join("tx.db")).unwrap();

        let mut tx = history.begin(TransactionType::Install, vec!["cowsay".to_string()], "cortex install cowsay").await.unwrap();
        history.complete(&mut tx, true, None).await.unwrap();

        let reloaded = history.get(&tx.id).unwrap().unwrap();
        assert_eq!(reloaded.status, TransactionStatus::Completed);
        assert_eq!(reloaded.packages, vec!["cowsay".to_string()]);
    }

    #[tokio::test]
    async fn undo_refuses_unsafe_rollback_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(TransactionHistory::open(&dir.path().join("tx.db")).unwrap());
        let manager = UndoManager::new(Arc::clone(&history));

        let tx = Transaction {
            id: "tx_unsafe".to_string(),
            transaction_type: TransactionType::Remove,
            packages: vec!["bash".to_string()],
            timestamp: now_epoch(),
            status: TransactionStatus::Completed,
            before_state: HashMap::new(),
            after_state: HashMap::new(),
            command: "cortex remove bash".to_string(),
            user: "test".to_string(),
            duration_seconds: 0.0,
            error_message: None,
            rollback_commands: vec!["sudo apt install -y bash".to_string()],
            is_rollback_safe: false,
            rollback_warning: Some("critical package".to_string()),
        };
        history.save(&tx).unwrap();

        let result = manager.undo(&tx.id, false, false).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Unsafe rollback - use force=True to override".to_string()]);
    }

    #[tokio::test]
    async fn search_matches_by_command_substring() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransactionHistory::open(&dir.path().join("tx.db")).unwrap();

        history.begin(TransactionType::Install, vec!["nginx".to_string()], "cortex install nginx").await.unwrap();
        history.begin(TransactionType::Install, vec!["redis".to_string()], "cortex install redis").await.unwrap();

        let found = history.search("nginx").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].packages, vec!["nginx".to_string()]);
    }

    #[tokio::test]
    async fn stats_buckets_by_type_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let history = TransactionHistory::open(&dir.path().join("tx.db")).unwrap();

        let mut tx = history.begin(TransactionType::Install, vec!["cowsay".to_string()], "cortex install cowsay").await.unwrap();
        history.complete(&mut tx, true, None).await.unwrap();

        let stats = history.get_stats().unwrap();
        assert_eq!(stats["total_transactions"], 1);
        assert_eq!(stats["by_type"]["install"], 1);
        assert_eq!(stats["by_status"]["completed"], 1);
    }

    #[tokio::test]
    async fn undo_dry_run_reports_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(TransactionHistory::open(&dir.path().join("tx.db")).unwrap());
        let manager = UndoManager::new(Arc::clone(&history));

        let mut tx = history.begin(TransactionType::Install, vec!["cowsay".to_string()], "cortex install cowsay").await.unwrap();
        history.complete(&mut tx, true, None).await.unwrap();

        let result = manager.undo(&tx.id, true, false).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, Some("Dry run - no changes made".to_string()));
    }
}
