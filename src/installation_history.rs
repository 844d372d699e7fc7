//! Coarser sibling of [`crate::transaction_history`]: one row per planned
//! installation, with rollback actions derived from a before/after snapshot
//! diff rather than precomputed at transaction start (spec §4.K), grounded
//! on `original_source/cortex/installation_history.py`.

use crate::error::{Error, Result};
use crate::persistence::{pool_for, SqlitePool};
use crate::shell;
use regex::Regex;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const DAY_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationType {
    Install,
    Upgrade,
    Remove,
    Purge,
    Rollback,
}

impl InstallationType {
    fn as_str(&self) -> &'static str {
        match self {
            InstallationType::Install => "install",
            InstallationType::Upgrade => "upgrade",
            InstallationType::Remove => "remove",
            InstallationType::Purge => "purge",
            InstallationType::Rollback => "rollback",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "install" => InstallationType::Install,
            "upgrade" => InstallationType::Upgrade,
            "remove" => InstallationType::Remove,
            "purge" => InstallationType::Purge,
            "rollback" => InstallationType::Rollback,
            other => return Err(Error::PersistenceError(format!("unknown installation type '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    Success,
    Failed,
    RolledBack,
    InProgress,
}

impl InstallationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            InstallationStatus::Success => "success",
            InstallationStatus::Failed => "failed",
            InstallationStatus::RolledBack => "rolled_back",
            InstallationStatus::InProgress => "in_progress",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "success" => InstallationStatus::Success,
            "failed" => InstallationStatus::Failed,
            "rolled_back" => InstallationStatus::RolledBack,
            "in_progress" => InstallationStatus::InProgress,
            other => return Err(Error::PersistenceError(format!("unknown installation status '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub package_name: String,
    pub version: String,
    pub status: String,
    pub dependencies: Vec<String>,
    pub config_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InstallationRecord {
    pub id: String,
    pub timestamp: i64,
    pub operation_type: InstallationType,
    pub packages: Vec<String>,
    pub status: InstallationStatus,
    pub before_snapshot: Vec<PackageSnapshot>,
    pub after_snapshot: Vec<PackageSnapshot>,
    pub commands_executed: Vec<String>,
    pub error_message: Option<String>,
    pub rollback_available: bool,
    pub duration_seconds: Option<f64>,
}

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn generate_id(timestamp: i64, packages: &[String]) -> String {
    let mut sorted = packages.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(format!("{timestamp}:{}", sorted.join(":")));
    hex::encode(hasher.finalize())[..16].to_string()
}

async fn get_package_info(package_name: &str) -> Option<PackageSnapshot> {
    let status = shell::run_argv("dpkg-query", &["-W", "-f=${Status}|${Version}", package_name], COMMAND_TIMEOUT).await;
    if !status.success {
        return Some(PackageSnapshot {
            package_name: package_name.to_string(),
            version: "not-installed".to_string(),
            status: "not-installed".to_string(),
            dependencies: Vec::new(),
            config_files: Vec::new(),
        });
    }

    let parts: Vec<&str> = status.stdout.trim().split('|').collect();
    if parts.len() != 2 {
        return None;
    }
    let status_word = parts[0].split_whitespace().last().unwrap_or("unknown").to_string();
    let version = parts[1].to_string();

    let mut dependencies = Vec::new();
    let deps = shell::run_argv("apt-cache", &["depends", package_name], COMMAND_TIMEOUT).await;
    if deps.success {
        for line in deps.stdout.lines() {
            if let Some(rest) = line.trim().strip_prefix("Depends:") {
                let dep = match rest.split_once('|') {
                    Some((first, _)) => first.trim(),
                    None => rest.trim(),
                };
                let dep = strip_version_constraint(dep);
                if !dep.is_empty() {
                    dependencies.push(dep);
                }
            }
        }
    }
    dependencies.truncate(10);

    let mut config_files = Vec::new();
    let files = shell::run_argv("dpkg-query", &["-L", package_name], COMMAND_TIMEOUT).await;
    if files.success {
        for line in files.stdout.lines() {
            let line = line.trim();
            if !line.is_empty() && line.contains("/etc/") && Path::new(line).exists() {
                config_files.push(line.to_string());
            }
        }
    }
    config_files.truncate(20);

    Some(PackageSnapshot {
        package_name: package_name.to_string(),
        version,
        status: status_word,
        dependencies,
        config_files,
    })
}

fn strip_version_constraint(dep: &str) -> String {
    let mut result = String::new();
    let mut depth = 0i32;
    for ch in dep.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = (depth - 1).max(0),
            _ if depth == 0 => result.push(ch),
            _ => {}
        }
    }
    result.trim().to_string()
}

async fn create_snapshot(packages: &[String]) -> Vec<PackageSnapshot> {
    let mut snapshots = Vec::with_capacity(packages.len());
    for pkg in packages {
        if let Some(snapshot) = get_package_info(pkg).await {
            snapshots.push(snapshot);
        }
    }
    snapshots
}

fn package_extraction_patterns() -> &'static [Regex] {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"apt-get\s+(?:install|remove|purge)\s+(?:-y\s+)?(.+?)(?:\s*[|&<>]|$)").unwrap(),
            Regex::new(r"apt\s+(?:install|remove|purge)\s+(?:-y\s+)?(.+?)(?:\s*[|&<>]|$)").unwrap(),
            Regex::new(r"dpkg\s+-i\s+(.+?)(?:\s*[|&<>]|$)").unwrap(),
        ]
    })
}

/// Best-effort package-name extraction from shell commands when no explicit
/// package list is given, mirroring the Python regex pipeline verbatim.
fn extract_packages_from_commands(commands: &[String]) -> Vec<String> {
    let sudo_prefix = Regex::new(r"^sudo\s+").unwrap();
    let version_suffix = Regex::new(r"[=:].*$").unwrap();
    let trailing_junk = Regex::new(r"[^\w.\-+]+$").unwrap();
    let split_re = Regex::new(r"[,\s|]+").unwrap();

    let mut packages = HashSet::new();
    for cmd in commands {
        let cleaned = sudo_prefix.replace(cmd.trim(), "");
        for pattern in package_extraction_patterns() {
            for caps in pattern.captures_iter(&cleaned) {
                let matched = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                for pkg in split_re.split(matched.trim()) {
                    let pkg = pkg.trim();
                    if pkg.is_empty() || pkg.starts_with('-') || pkg.len() <= 1 {
                        continue;
                    }
                    let pkg = version_suffix.replace(pkg, "");
                    let pkg = trailing_junk.replace(&pkg, "");
                    if !pkg.is_empty() {
                        packages.insert(pkg.to_string());
                    }
                }
            }
        }
    }

    let mut result: Vec<String> = packages.into_iter().collect();
    result.sort();
    result
}

/// SQLite-backed ledger of complete installation operations, each stored as
/// one row with a rollback plan derived from before/after snapshot diffing
/// rather than precomputed (spec §4.K).
pub struct InstallationHistory {
    pool: Arc<SqlitePool>,
}

impl InstallationHistory {
    pub fn open(db_path: &Path) -> Result<Self> {
        let pool = pool_for(db_path)?;
        let history = Self { pool };
        history.init_schema()?;
        Ok(history)
    }

    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(".cortex/history.db")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS installations (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                operation_type TEXT NOT NULL,
                packages TEXT NOT NULL,
                status TEXT NOT NULL,
                before_snapshot TEXT,
                after_snapshot TEXT,
                commands_executed TEXT,
                error_message TEXT,
                rollback_available INTEGER,
                duration_seconds REAL
            );
            CREATE INDEX IF NOT EXISTS idx_install_timestamp ON installations(timestamp DESC);",
        )?;
        Ok(())
    }

    pub async fn record_installation(
        &self,
        operation_type: InstallationType,
        packages: Vec<String>,
        commands: Vec<String>,
        start_time: i64,
    ) -> Result<String> {
        let packages = if packages.is_empty() { extract_packages_from_commands(&commands) } else { packages };
        let before_snapshot = create_snapshot(&packages).await;
        let id = generate_id(start_time, &packages);

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO installations
                (id, timestamp, operation_type, packages, status, before_snapshot, after_snapshot,
                 commands_executed, error_message, rollback_available, duration_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL, 1, NULL)",
            rusqlite::params![
                id,
                start_time,
                operation_type.as_str(),
                serde_json::to_string(&packages)?,
                InstallationStatus::InProgress.as_str(),
                serde_json::to_string(&before_snapshot)?,
                serde_json::to_string(&commands)?,
            ],
        )?;

        Ok(id)
    }

    pub async fn update_installation(
        &self,
        install_id: &str,
        status: InstallationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let (packages, timestamp): (String, i64) = {
            let conn = self.pool.get()?;
            conn.query_row(
                "SELECT packages, timestamp FROM installations WHERE id = ?1",
                [install_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| Error::NotFound(install_id.to_string()))?
        };

        let packages: Vec<String> = serde_json::from_str(&packages)?;
        let duration = (now_epoch() - timestamp) as f64;
        let after_snapshot = create_snapshot(&packages).await;

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE installations SET status = ?1, after_snapshot = ?2, error_message = ?3, duration_seconds = ?4 WHERE id = ?5",
            rusqlite::params![status.as_str(), serde_json::to_string(&after_snapshot)?, error_message, duration, install_id],
        )?;
        Ok(())
    }

    pub fn get_history(&self, limit: u32, status_filter: Option<InstallationStatus>) -> Result<Vec<InstallationRecord>> {
        let conn = self.pool.get()?;
        let mut records = Vec::new();
        if let Some(status) = status_filter {
            let mut stmt = conn.prepare(
                "SELECT * FROM installations WHERE status = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            for row in stmt.query_map(rusqlite::params![status.as_str(), limit], row_to_record)? {
                records.push(row?);
            }
        } else {
            let mut stmt = conn.prepare("SELECT * FROM installations ORDER BY timestamp DESC LIMIT ?1")?;
            for row in stmt.query_map([limit], row_to_record)? {
                records.push(row?);
            }
        }
        Ok(records)
    }

    pub fn get_installation(&self, install_id: &str) -> Result<Option<InstallationRecord>> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT * FROM installations WHERE id = ?1", [install_id], row_to_record)
            .optional()
            .map_err(Error::from)
    }

    /// Diffs before/after snapshots to derive rollback actions: install a
    /// package that newly appeared, reinstall-pinned one that disappeared
    /// or changed version (spec §4.K).
    pub async fn rollback(&self, install_id: &str, dry_run: bool) -> Result<(bool, String)> {
        let record = match self.get_installation(install_id)? {
            Some(r) => r,
            None => return Ok((false, format!("Installation {install_id} not found"))),
        };

        if !record.rollback_available {
            return Ok((false, "Rollback not available for this installation".to_string()));
        }
        if record.status == InstallationStatus::RolledBack {
            return Ok((false, "Installation already rolled back".to_string()));
        }

        let before_map: std::collections::HashMap<&str, &PackageSnapshot> =
            record.before_snapshot.iter().map(|s| (s.package_name.as_str(), s)).collect();
        let after_map: std::collections::HashMap<&str, &PackageSnapshot> =
            record.after_snapshot.iter().map(|s| (s.package_name.as_str(), s)).collect();

        let mut all_packages: Vec<&str> = before_map.keys().chain(after_map.keys()).copied().collect();
        all_packages.sort();
        all_packages.dedup();

        let mut actions = Vec::new();
        for package_name in all_packages {
            let before = before_map.get(package_name);
            let after = after_map.get(package_name);

            match (before, after) {
                (None, Some(after)) if after.status == "installed" => {
                    actions.push(format!("sudo apt-get remove -y {package_name}"));
                }
                (Some(before), None) if before.status == "installed" => {
                    actions.push(format!("sudo apt-get install -y {package_name}={}", before.version));
                }
                (Some(before), Some(after)) => {
                    if before.status == "not-installed" && after.status == "installed" {
                        actions.push(format!("sudo apt-get remove -y {package_name}"));
                    } else if before.status == "installed" && after.status == "not-installed" {
                        actions.push(format!("sudo apt-get install -y {package_name}={}", before.version));
                    } else if before.version != after.version && before.status == "installed" {
                        actions.push(format!("sudo apt-get install -y {package_name}={}", before.version));
                    }
                }
                _ => {}
            }
        }

        if actions.is_empty() {
            return Ok((true, "No rollback actions needed".to_string()));
        }
        if dry_run {
            return Ok((true, actions.join("\n")));
        }

        let rollback_start = now_epoch();
        let rollback_id = self
            .record_installation(InstallationType::Rollback, record.packages.clone(), actions.clone(), rollback_start)
            .await?;

        let mut errors = Vec::new();
        for action in &actions {
            let argv: Vec<&str> = action.split_whitespace().collect();
            if let Some((program, args)) = argv.split_first() {
                let output = shell::run_argv(program, args, COMMAND_TIMEOUT).await;
                if !output.success {
                    errors.push(format!("{action}: {}", output.stderr));
                }
            }
        }

        if errors.is_empty() {
            self.update_installation(&rollback_id, InstallationStatus::Success, None).await?;
            let conn = self.pool.get()?;
            conn.execute(
                "UPDATE installations SET status = ?1 WHERE id = ?2",
                rusqlite::params![InstallationStatus::RolledBack.as_str(), install_id],
            )?;
            Ok((true, format!("Rollback successful (ID: {rollback_id})")))
        } else {
            let joined = errors.join("\n");
            self.update_installation(&rollback_id, InstallationStatus::Failed, Some(&joined)).await?;
            Ok((false, format!("Rollback failed: {}", errors.join("; "))))
        }
    }

    pub fn export_history(&self, path: &Path, limit: u32) -> Result<()> {
        let records = self.get_history(limit, None)?;
        let data: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "timestamp": r.timestamp,
                    "operation": r.operation_type.as_str(),
                    "packages": r.packages,
                    "status": r.status.as_str(),
                    "duration": r.duration_seconds,
                    "error": r.error_message,
                })
            })
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    pub fn cleanup_old_records(&self, days: i64) -> Result<usize> {
        let cutoff = now_epoch() - days * DAY_SECONDS;
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM installations WHERE timestamp < ?1", [cutoff])?;
        Ok(deleted)
    }

    /// Substring search over `packages` and `commands_executed`
    /// (SPEC_FULL.md `search(query)` requirement).
    pub fn search(&self, query: &str) -> Result<Vec<InstallationRecord>> {
        let conn = self.pool.get()?;
        let pattern = format!("%{query}%");
        let mut stmt = conn.prepare(
            "SELECT * FROM installations WHERE packages LIKE ?1 OR commands_executed LIKE ?1 ORDER BY timestamp DESC",
        )?;
        let mut records = Vec::new();
        for row in stmt.query_map([pattern], row_to_record)? {
            records.push(row?);
        }
        Ok(records)
    }

    /// Counts by `operation_type` and by `status` alongside the total
    /// (SPEC_FULL.md basic `stats()` requirement).
    pub fn get_stats(&self) -> Result<serde_json::Value> {
        let conn = self.pool.get()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM installations", [], |r| r.get(0))?;

        let mut by_type = serde_json::Map::new();
        let mut stmt = conn.prepare("SELECT operation_type, COUNT(*) FROM installations GROUP BY operation_type")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (ty, count) = row?;
            by_type.insert(ty, serde_json::json!(count));
        }

        let mut by_status = serde_json::Map::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM installations GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, serde_json::json!(count));
        }

        Ok(serde_json::json!({
            "total_installations": total,
            "by_type": by_type,
            "by_status": by_status,
        }))
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<InstallationRecord> {
    let operation_type: String = row.get("operation_type")?;
    let status: String = row.get("status")?;
    let packages: String = row.get("packages")?;
    let before_snapshot: Option<String> = row.get("before_snapshot")?;
    let after_snapshot: Option<String> = row.get("after_snapshot")?;
    let commands_executed: Option<String> = row.get("commands_executed")?;

    Ok(InstallationRecord {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        operation_type: InstallationType::from_str(&operation_type)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        packages: serde_json::from_str(&packages).unwrap_or_default(),
        status: InstallationStatus::from_str(&status)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        before_snapshot: before_snapshot.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        after_snapshot: after_snapshot.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        commands_executed: commands_executed.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
        error_message: row.get("error_message")?,
        rollback_available: row.get::<_, Option<i64>>("rollback_available")?.map(|v| v != 0).unwrap_or(true),
        duration_seconds: row.get("duration_seconds")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_package_names_from_apt_install_command() {
        let commands = vec!["sudo apt-get install -y nginx docker.io postgresql".to_string()];
        let packages = extract_packages_from_commands(&commands);
        assert_eq!(packages, vec!["docker.io".to_string(), "nginx".to_string(), "postgresql".to_string()]);
    }

    #[test]
    fn strips_version_pin_from_extracted_package() {
        let commands = vec!["apt install nginx=1.18.0-1".to_string()];
        let packages = extract_packages_from_commands(&commands);
        assert_eq!(packages, vec!["nginx".to_string()]);
    }

    #[test]
    fn generated_id_is_deterministic_for_same_input() {
        let a = generate_id(1000, &["nginx".to_string(), "redis".to_string()]);
        let b = generate_id(1000, &["redis".to_string(), "nginx".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn record_and_update_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let history = InstallationHistory::open(&dir.path().join("history.db")).unwrap();

        let id = history
            .record_installation(InstallationType::Install, vec!["cowsay".to_string()], vec!["apt install cowsay".to_string()], now_epoch())
            .await
            .unwrap();
        history.update_installation(&id, InstallationStatus::Success, None).await.unwrap();

        let record = history.get_installation(&id).unwrap().unwrap();
        assert_eq!(record.status, InstallationStatus::Success);
        assert_eq!(record.packages, vec!["cowsay".to_string()]);
    }

    #[tokio::test]
    async fn rollback_derives_reinstall_for_removed_package() {
        let dir = tempfile::tempdir().unwrap();
        let history = InstallationHistory::open(&dir.path().join("history.db")).unwrap();

        let id = history
            .record_installation(InstallationType::Remove, vec!["htop".to_string()], vec!["apt remove htop".to_string()], now_epoch())
            .await
            .unwrap();

        {
            let conn = history.pool.get().unwrap();
            let after = vec![PackageSnapshot {
                package_name: "htop".to_string(),
                version: "not-installed".to_string(),
                status: "not-installed".to_string(),
                dependencies: vec![],
                config_files: vec![],
            }];
            let before = vec![PackageSnapshot {
                package_name: "htop".to_string(),
                version: "3.0.5-1".to_string(),
                status: "installed".to_string(),
                dependencies: vec![],
                config_files: vec![],
            }];
            conn.execute(
                "UPDATE installations SET before_snapshot = ?1, after_snapshot = ?2, status = 'success' WHERE id = ?3",
                rusqlite::params![serde_json::to_string(&before).unwrap(), serde_json::to_string(&after).unwrap(), id],
            )
            .unwrap();
        }

        let (success, message) = history.rollback(&id, true).await.unwrap();
        assert!(success);
        assert_eq!(message, "sudo apt-get install -y htop=3.0.5-1");
    }

    #[tokio::test]
    async fn search_matches_by_package_name() {
        let dir = tempfile::tempdir().unwrap();
        let history = InstallationHistory::open(&dir.path().join("history.db")).unwrap();

        history
            .record_installation(InstallationType::Install, vec!["nginx".to_string()], vec![], now_epoch())
            .await
            .unwrap();
        history
            .record_installation(InstallationType::Install, vec!["redis".to_string()], vec![], now_epoch())
            .await
            .unwrap();

        let found = history.search("nginx").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].packages, vec!["nginx".to_string()]);
    }

    #[tokio::test]
    async fn stats_buckets_by_operation_type_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let history = InstallationHistory::open(&dir.path().join("history.db")).unwrap();

        let id = history
            .record_installation(InstallationType::Install, vec!["cowsay".to_string()], vec![], now_epoch())
            .await
            .unwrap();
        history.update_installation(&id, InstallationStatus::Success, None).await.unwrap();

        let stats = history.get_stats().unwrap();
        assert_eq!(stats["total_installations"], 1);
        assert_eq!(stats["by_type"]["install"], 1);
        assert_eq!(stats["by_status"]["success"], 1);
    }
}
