//! Forward/reverse package dependency graph over dpkg/apt (spec §4.H),
//! grounded on `original_source/cortex/uninstall_impact.py`'s
//! `DependencyGraphBuilder`.

use crate::error::Result;
use crate::shell;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const CACHE_MAX_AGE_SECS: u64 = 3600;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PackageNode {
    pub name: String,
    pub version: Option<String>,
    pub is_installed: bool,
    pub is_essential: bool,
    pub is_manually_installed: bool,
    pub description: String,
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    installed: Vec<String>,
    essential: Vec<String>,
    manual: Vec<String>,
}

/// Directed graph of installed packages, built lazily from `apt-cache` and
/// `dpkg-query`, memoized in-process and on disk.
pub struct DependencyGraph {
    cache_path: PathBuf,
    use_cache: bool,
    forward: Mutex<HashMap<String, HashSet<String>>>,
    reverse: Mutex<HashMap<String, HashSet<String>>>,
    package_info: Mutex<HashMap<String, PackageNode>>,
    installed: Mutex<HashSet<String>>,
    essential: Mutex<HashSet<String>>,
    manual: Mutex<HashSet<String>>,
    initialized: Mutex<bool>,
}

impl DependencyGraph {
    pub fn new(cache_path: PathBuf, use_cache: bool) -> Self {
        Self {
            cache_path,
            use_cache,
            forward: Mutex::new(HashMap::new()),
            reverse: Mutex::new(HashMap::new()),
            package_info: Mutex::new(HashMap::new()),
            installed: Mutex::new(HashSet::new()),
            essential: Mutex::new(HashSet::new()),
            manual: Mutex::new(HashSet::new()),
            initialized: Mutex::new(false),
        }
    }

    /// Default cache location, `~/.cortex/dep_graph_cache.json`.
    pub fn default_cache_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cortex")
            .join("dep_graph_cache.json")
    }

    pub async fn initialize(&self, force_refresh: bool) {
        {
            let initialized = *self.initialized.lock().unwrap();
            if initialized && !force_refresh {
                return;
            }
        }

        if self.use_cache && !force_refresh && self.load_cache() {
            *self.initialized.lock().unwrap() = true;
            return;
        }

        self.load_installed_packages().await;
        self.load_essential_packages().await;
        self.load_manual_packages().await;
        *self.initialized.lock().unwrap() = true;

        if self.use_cache {
            self.save_cache();
        }
    }

    fn load_cache(&self) -> bool {
        let metadata = match std::fs::metadata(&self.cache_path) {
            Ok(m) => m,
            Err(_) => return false,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        if age > CACHE_MAX_AGE_SECS {
            return false;
        }

        let contents = match std::fs::read_to_string(&self.cache_path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let data: CacheFile = match serde_json::from_str(&contents) {
            Ok(d) => d,
            Err(_) => return false,
        };

        *self.installed.lock().unwrap() = data.installed.into_iter().collect();
        *self.essential.lock().unwrap() = data.essential.into_iter().collect();
        *self.manual.lock().unwrap() = data.manual.into_iter().collect();
        true
    }

    fn save_cache(&self) {
        let data = CacheFile {
            installed: self.installed.lock().unwrap().iter().cloned().collect(),
            essential: self.essential.lock().unwrap().iter().cloned().collect(),
            manual: self.manual.lock().unwrap().iter().cloned().collect(),
        };
        if let Some(parent) = self.cache_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(json) = serde_json::to_string(&data) {
            let _ = std::fs::write(&self.cache_path, json);
        }
    }

    async fn load_installed_packages(&self) {
        let output = shell::run_argv("dpkg-query", &["-W", "-f=${Package}\n"], COMMAND_TIMEOUT).await;
        if output.success {
            *self.installed.lock().unwrap() =
                output.stdout.lines().map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
    }

    async fn load_essential_packages(&self) {
        let output =
            shell::run_argv("dpkg-query", &["-W", "-f=${Package} ${Essential}\n"], COMMAND_TIMEOUT).await;
        if output.success {
            let mut essential = self.essential.lock().unwrap();
            for line in output.stdout.lines() {
                let parts: Vec<&str> = line.trim().split_whitespace().collect();
                if parts.len() >= 2 && parts[1].eq_ignore_ascii_case("yes") {
                    essential.insert(parts[0].to_string());
                }
            }
        }
    }

    async fn load_manual_packages(&self) {
        let output = shell::run_argv("apt-mark", &["showmanual"], COMMAND_TIMEOUT).await;
        if output.success {
            *self.manual.lock().unwrap() =
                output.stdout.lines().map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
    }

    pub async fn get_package_info(&self, package_name: &str) -> Option<PackageNode> {
        if let Some(node) = self.package_info.lock().unwrap().get(package_name) {
            return Some(node.clone());
        }

        let output = shell::run_argv(
            "dpkg-query",
            &["-W", "-f=${Package}|${Version}|${Description}", package_name],
            COMMAND_TIMEOUT,
        )
        .await;
        if !output.success {
            return None;
        }

        let parts: Vec<&str> = output.stdout.trim().split('|').collect();
        if parts.len() < 2 {
            return None;
        }

        let node = PackageNode {
            name: parts[0].to_string(),
            version: Some(parts[1].to_string()),
            is_installed: self.installed.lock().unwrap().contains(package_name),
            is_essential: self.essential.lock().unwrap().contains(package_name),
            is_manually_installed: self.manual.lock().unwrap().contains(package_name),
            description: parts.get(2).map(|s| s.to_string()).unwrap_or_default(),
        };
        self.package_info.lock().unwrap().insert(package_name.to_string(), node.clone());
        Some(node)
    }

    /// Forward dependencies (what `package_name` depends on), parsed from
    /// `apt-cache depends` with a depth-counting walk rather than a regex.
    pub async fn get_dependencies(&self, package_name: &str) -> Vec<String> {
        if let Some(deps) = self.forward.lock().unwrap().get(package_name) {
            return deps.iter().cloned().collect();
        }

        let mut dependencies = HashSet::new();
        let output = shell::run_argv("apt-cache", &["depends", package_name], COMMAND_TIMEOUT).await;
        if output.success {
            for line in output.stdout.lines() {
                if let Some(dep) = parse_dependency_line(line.trim()) {
                    dependencies.insert(dep);
                }
            }
        }

        self.forward.lock().unwrap().insert(package_name.to_string(), dependencies.clone());
        dependencies.into_iter().collect()
    }

    /// Reverse dependencies (what depends on `package_name`), restricted to
    /// packages that are actually installed.
    pub async fn get_reverse_dependencies(&self, package_name: &str) -> Vec<String> {
        if let Some(deps) = self.reverse.lock().unwrap().get(package_name) {
            return deps.iter().cloned().collect();
        }

        let mut dependents = HashSet::new();
        let output = shell::run_argv("apt-cache", &["rdepends", package_name], COMMAND_TIMEOUT).await;
        if output.success {
            let installed = self.installed.lock().unwrap();
            for line in output.stdout.lines().skip(1) {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('|') && !line.starts_with('<') && installed.contains(line) {
                    dependents.insert(line.to_string());
                }
            }
        }

        self.reverse.lock().unwrap().insert(package_name.to_string(), dependents.clone());
        dependents.into_iter().collect()
    }

    /// BFS over the reverse graph, returning every transitive dependent and
    /// the depth of the cascade.
    pub async fn get_transitive_dependents(&self, package_name: &str, max_depth: usize) -> (Vec<String>, usize) {
        let mut visited = HashSet::new();
        let mut all_dependents = Vec::new();
        let mut current_level: HashSet<String> = [package_name.to_string()].into_iter().collect();
        let mut depth = 0;

        while !current_level.is_empty() && depth < max_depth {
            let mut next_level = HashSet::new();
            for pkg in &current_level {
                for dep in self.get_reverse_dependencies(pkg).await {
                    if !visited.contains(&dep) && dep != package_name {
                        visited.insert(dep.clone());
                        all_dependents.push(dep.clone());
                        next_level.insert(dep);
                    }
                }
            }
            let advanced = !next_level.is_empty();
            current_level = next_level;
            if advanced {
                depth += 1;
            }
        }

        (all_dependents, depth)
    }

    pub fn is_essential(&self, package_name: &str) -> bool {
        self.essential.lock().unwrap().contains(package_name)
    }

    pub fn is_installed(&self, package_name: &str) -> bool {
        self.installed.lock().unwrap().contains(package_name)
    }

    pub fn is_manually_installed(&self, package_name: &str) -> bool {
        self.manual.lock().unwrap().contains(package_name)
    }
}

fn parse_dependency_line(line: &str) -> Option<String> {
    let rest = line.strip_prefix("Depends:").or_else(|| line.strip_prefix("PreDepends:"))?;
    let dep = match rest.split_once('|') {
        Some((first, _)) => first.trim().to_string(),
        None => rest.trim().to_string(),
    };
    let dep = remove_version_constraints(&dep);
    if !dep.is_empty() && !dep.starts_with('<') {
        Some(dep)
    } else {
        None
    }
}

/// Strips `(>= 1.0)`-style version constraints and `<virtual>` markers using
/// a depth-counting character walk, never a regex, to rule out backtracking
/// surprises on attacker-controlled package metadata.
fn remove_version_constraints(dep: &str) -> String {
    let mut result = String::new();
    let mut paren_depth = 0i32;
    let mut angle_depth = 0i32;

    for ch in dep.chars() {
        match ch {
            '(' => paren_depth += 1,
            ')' => paren_depth = (paren_depth - 1).max(0),
            '<' => angle_depth += 1,
            '>' => angle_depth = (angle_depth - 1).max(0),
            _ if paren_depth == 0 && angle_depth == 0 => result.push(ch),
            _ => {}
        }
    }

    result.trim().to_string()
}
