//! Pre-removal blast-radius analysis (spec §4.I), grounded on
//! `original_source/cortex/uninstall_impact.py`'s `ImpactAnalyzer`,
//! `ServiceImpactMapper`, and `RecommendationEngine`.

use crate::dependency_graph::DependencyGraph;
use crate::shell;
use std::collections::HashSet;
use std::time::Duration;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CRITICAL_DEPENDENTS_THRESHOLD: usize = 50;
const HIGH_DEPENDENTS_THRESHOLD: usize = 20;
const MEDIUM_DEPENDENTS_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImpactSeverity {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactSeverity::Safe => "safe",
            ImpactSeverity::Low => "low",
            ImpactSeverity::Medium => "medium",
            ImpactSeverity::High => "high",
            ImpactSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    NotFound,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub status: ServiceStatus,
    pub package: String,
    pub is_critical: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImpactResult {
    pub target_package: String,
    pub direct_dependents: Vec<String>,
    pub transitive_dependents: Vec<String>,
    pub affected_services: Vec<ServiceInfo>,
    pub orphaned_packages: Vec<String>,
    pub cascade_packages: Vec<String>,
    pub severity: Option<ImpactSeverity>,
    pub total_affected: usize,
    pub cascade_depth: usize,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
    pub safe_to_remove: bool,
}

impl ImpactResult {
    fn new(target_package: impl Into<String>) -> Self {
        Self { target_package: target_package.into(), safe_to_remove: true, ..Default::default() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemovalPlan {
    pub target_package: String,
    pub packages_to_remove: Vec<String>,
    pub autoremove_candidates: Vec<String>,
    pub config_files_affected: Vec<String>,
    pub commands: Vec<String>,
    pub estimated_freed_space: String,
}

const CRITICAL_SERVICES: &[&str] =
    &["ssh", "sshd", "systemd", "NetworkManager", "docker", "postgresql", "mysql", "mysqld", "nginx", "apache2"];

fn package_service_map(package: &str) -> Vec<&'static str> {
    match package {
        "nginx" | "nginx-core" => vec!["nginx"],
        "apache2" | "apache2-bin" => vec!["apache2"],
        "mysql-server" => vec!["mysql", "mysqld"],
        "mariadb-server" => vec!["mariadb", "mysql"],
        "postgresql" => vec!["postgresql"],
        "redis-server" => vec!["redis-server", "redis"],
        "mongodb-server" => vec!["mongod", "mongodb"],
        "tomcat9" => vec!["tomcat9"],
        "uwsgi" => vec!["uwsgi"],
        "gunicorn" => vec!["gunicorn"],
        "openssh-server" => vec!["ssh", "sshd"],
        "systemd" => vec!["systemd-journald"],
        "cron" => vec!["cron", "crond"],
        "rsyslog" => vec!["rsyslog"],
        "docker.io" | "docker-ce" => vec!["docker"],
        "containerd" => vec!["containerd"],
        "network-manager" => vec!["NetworkManager"],
        "avahi-daemon" => vec!["avahi-daemon"],
        "cups" => vec!["cups"],
        "postfix" => vec!["postfix"],
        "exim4" => vec!["exim4"],
        _ => vec![],
    }
}

fn alternatives_for(package: &str) -> Vec<&'static str> {
    match package {
        "nginx" => vec!["apache2", "caddy", "lighttpd"],
        "apache2" => vec!["nginx", "caddy", "lighttpd"],
        "mysql-server" => vec!["mariadb-server", "postgresql"],
        "mariadb-server" => vec!["mysql-server", "postgresql"],
        "postgresql" => vec!["mysql-server", "mariadb-server"],
        "vim" => vec!["neovim", "nano", "emacs"],
        "nano" => vec!["vim", "neovim", "emacs"],
        _ => vec![],
    }
}

async fn get_service_status(service_name: &str) -> ServiceStatus {
    let output = shell::run_argv("systemctl", &["is-active", service_name], COMMAND_TIMEOUT).await;
    if !output.success {
        let exists = shell::run_argv("systemctl", &["cat", service_name], COMMAND_TIMEOUT).await;
        return if exists.success { ServiceStatus::Stopped } else { ServiceStatus::NotFound };
    }
    match output.stdout.trim() {
        "active" => ServiceStatus::Running,
        "inactive" | "failed" => ServiceStatus::Stopped,
        _ => ServiceStatus::Unknown,
    }
}

async fn detect_services_from_package(package_name: &str) -> Vec<String> {
    let output = shell::run_argv("dpkg-query", &["-L", package_name], COMMAND_TIMEOUT).await;
    let mut services = Vec::new();
    if output.success {
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.contains("/systemd/") && line.ends_with(".service") {
                if let Some(name) = line.rsplit('/').next() {
                    services.push(name.trim_end_matches(".service").to_string());
                }
            }
        }
    }
    services
}

async fn get_services_for_package(package_name: &str) -> Vec<ServiceInfo> {
    let mut service_names: Vec<String> =
        package_service_map(package_name).into_iter().map(String::from).collect();
    if service_names.is_empty() {
        service_names = detect_services_from_package(package_name).await;
    }

    let mut services = Vec::with_capacity(service_names.len());
    for name in service_names {
        let status = get_service_status(&name).await;
        let is_critical = CRITICAL_SERVICES.contains(&name.as_str());
        services.push(ServiceInfo { name, status, package: package_name.to_string(), is_critical });
    }
    services
}

async fn get_affected_services(packages: &[String]) -> Vec<ServiceInfo> {
    let mut affected = Vec::new();
    let mut seen = HashSet::new();
    for package in packages {
        for service in get_services_for_package(package).await {
            if seen.insert(service.name.clone()) {
                affected.push(service);
            }
        }
    }
    affected
}

fn get_recommendations(impact: &ImpactResult) -> Vec<String> {
    let mut recommendations = Vec::new();

    if impact.severity == Some(ImpactSeverity::Critical) {
        recommendations.push(
            "CRITICAL: this package is essential to the system. Removal may break your system. \
             Consider keeping it installed."
                .to_string(),
        );
    }
    if impact.severity == Some(ImpactSeverity::High) {
        recommendations.push(
            "HIGH IMPACT: many packages depend on this. Consider removing dependent packages first."
                .to_string(),
        );
    }

    let running_services: Vec<&ServiceInfo> =
        impact.affected_services.iter().filter(|s| s.status == ServiceStatus::Running).collect();
    if !running_services.is_empty() {
        let mut names: Vec<&str> = running_services.iter().take(3).map(|s| s.name.as_str()).collect();
        let suffix = if running_services.len() > 3 {
            format!(" (+{} more)", running_services.len() - 3)
        } else {
            String::new()
        };
        recommendations.push(format!("Stop affected services before removal: {}{suffix}", names.join(", ")));
        names.clear();
    }

    if impact.affected_services.iter().any(|s| s.is_critical) {
        recommendations.push(
            "Critical services will be affected. Ensure you have alternative access (e.g. physical console) \
             before proceeding."
                .to_string(),
        );
    }

    if impact.direct_dependents.len() > 5 {
        recommendations.push(format!(
            "Consider removing these dependent packages first: {}",
            impact.direct_dependents[..5].join(", ")
        ));
    }

    if !impact.orphaned_packages.is_empty() {
        recommendations.push(format!(
            "Run 'apt autoremove' after removal to clean up {} orphaned package(s).",
            impact.orphaned_packages.len()
        ));
    }

    if impact.safe_to_remove {
        recommendations.push(
            "This package can be safely removed. Use 'cortex remove <package>' to proceed. Add --purge to \
             also remove configuration files."
                .to_string(),
        );
    } else {
        recommendations.push(
            "This package is NOT safe to remove due to dependencies or critical services. Review the impact \
             details above before proceeding. Use 'cortex remove <package> --force' only after careful \
             consideration and ensuring you have backups."
                .to_string(),
        );
    }

    let alternatives = alternatives_for(&impact.target_package);
    if !alternatives.is_empty() {
        recommendations.push(format!("Alternative packages: {}", alternatives.join(", ")));
    }

    recommendations
}

/// Repeatedly picks packages with no remaining reverse-dependent in the
/// candidate set; breaks a residual cycle by emitting what's left as-is.
pub async fn safe_removal_order(graph: &DependencyGraph, packages: &[String]) -> Vec<String> {
    let mut ordered = Vec::new();
    let mut remaining: HashSet<String> = packages.iter().cloned().collect();

    while !remaining.is_empty() {
        let mut safe_this_round = Vec::new();
        for pkg in &remaining {
            let dependents: HashSet<String> = graph.get_reverse_dependencies(pkg).await.into_iter().collect();
            if dependents.is_disjoint(&remaining) {
                safe_this_round.push(pkg.clone());
            }
        }

        if safe_this_round.is_empty() {
            ordered.extend(remaining.into_iter());
            break;
        }
        for pkg in &safe_this_round {
            remaining.remove(pkg);
        }
        ordered.extend(safe_this_round);
    }

    ordered
}

pub struct ImpactAnalyzer {
    graph: DependencyGraph,
}

impl ImpactAnalyzer {
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    pub async fn initialize(&self) {
        self.graph.initialize(false).await;
    }

    async fn package_exists_in_apt(&self, package_name: &str) -> bool {
        let output = shell::run_argv("apt-cache", &["show", package_name], COMMAND_TIMEOUT).await;
        output.success && !output.stdout.trim().is_empty()
    }

    async fn cascade_packages(&self, package_name: &str) -> Vec<String> {
        let output = shell::run_argv("apt-get", &["-s", "remove", package_name], COMMAND_TIMEOUT).await;
        let mut cascade = Vec::new();
        if output.success {
            for line in output.stdout.lines() {
                if let Some(rest) = line.strip_prefix("Remv ") {
                    if let Some(pkg) = rest.split_whitespace().next() {
                        if pkg != package_name {
                            cascade.push(pkg.to_string());
                        }
                    }
                }
            }
        }
        cascade
    }

    async fn orphaned_packages(&self, package_name: &str) -> Vec<String> {
        let _ = shell::run_argv("apt-get", &["-s", "remove", package_name], COMMAND_TIMEOUT).await;
        let output = shell::run_argv("apt-get", &["-s", "autoremove", "--purge"], COMMAND_TIMEOUT).await;
        let mut orphaned = Vec::new();
        if output.success {
            for line in output.stdout.lines() {
                if let Some(rest) = line.strip_prefix("Remv ") {
                    if let Some(pkg) = rest.split_whitespace().next() {
                        orphaned.push(pkg.to_string());
                    }
                }
            }
        }
        orphaned
    }

    fn calculate_severity(&self, result: &ImpactResult) -> ImpactSeverity {
        if result.severity == Some(ImpactSeverity::Critical) {
            return ImpactSeverity::Critical;
        }

        let critical_running =
            result.affected_services.iter().any(|s| s.is_critical && s.status == ServiceStatus::Running);
        if critical_running {
            return ImpactSeverity::Critical;
        }

        let total = result.total_affected;
        if total >= CRITICAL_DEPENDENTS_THRESHOLD {
            ImpactSeverity::Critical
        } else if total >= HIGH_DEPENDENTS_THRESHOLD {
            ImpactSeverity::High
        } else if total >= MEDIUM_DEPENDENTS_THRESHOLD {
            ImpactSeverity::Medium
        } else if total > 0 {
            ImpactSeverity::Low
        } else {
            ImpactSeverity::Safe
        }
    }

    /// Full impact analysis for removing `package_name` (spec §4.I).
    pub async fn analyze(&self, package_name: &str) -> ImpactResult {
        self.initialize().await;

        let mut result = ImpactResult::new(package_name);

        let pkg_info = self.graph.get_package_info(package_name).await;
        let is_installed = pkg_info.as_ref().map(|p| p.is_installed).unwrap_or(false);

        if !is_installed {
            if !self.package_exists_in_apt(package_name).await {
                result.warnings.push(format!("Package '{package_name}' not found in repositories"));
                result
                    .recommendations
                    .push(format!("Check package name spelling or search with: apt search {package_name}"));
                return result;
            }
            result.warnings.push(format!("Package '{package_name}' is not currently installed"));
            result
                .recommendations
                .push("Showing potential impact if this package were installed and removed.".to_string());
        }

        if is_installed && pkg_info.as_ref().map(|p| p.is_essential).unwrap_or(false) {
            result.warnings.push(format!(
                "'{package_name}' is marked as ESSENTIAL. Removing it may break your system!"
            ));
            result.severity = Some(ImpactSeverity::Critical);
            result.safe_to_remove = false;
        }

        result.direct_dependents = self.graph.get_reverse_dependencies(package_name).await;
        let (transitive, depth) = self.graph.get_transitive_dependents(package_name, 10).await;
        result.transitive_dependents = transitive;
        result.cascade_depth = depth;

        let all_affected: HashSet<String> =
            result.direct_dependents.iter().chain(result.transitive_dependents.iter()).cloned().collect();
        result.total_affected = all_affected.len();

        result.cascade_packages = self.cascade_packages(package_name).await;
        result.orphaned_packages = self.orphaned_packages(package_name).await;

        let mut packages_to_check = vec![package_name.to_string()];
        packages_to_check.extend(all_affected);
        result.affected_services = get_affected_services(&packages_to_check).await;

        result.severity = Some(self.calculate_severity(&result));
        if matches!(result.severity, Some(ImpactSeverity::Critical) | Some(ImpactSeverity::High)) {
            result.safe_to_remove = false;
        }

        result.recommendations = get_recommendations(&result);
        result
    }

    async fn config_files(&self, package_name: &str) -> Vec<String> {
        let output = shell::run_argv("dpkg-query", &["-L", package_name], COMMAND_TIMEOUT).await;
        let mut files = Vec::new();
        if output.success {
            for line in output.stdout.lines() {
                let line = line.trim();
                if line.starts_with("/etc/") {
                    files.push(line.to_string());
                }
            }
        }
        files
    }

    async fn estimate_freed_space(&self, packages: &[String]) -> String {
        let mut total_bytes: u64 = 0;
        for pkg in packages {
            let output =
                shell::run_argv("dpkg-query", &["-W", "-f=${Installed-Size}", pkg], COMMAND_TIMEOUT).await;
            if output.success {
                if let Ok(kb) = output.stdout.trim().parse::<u64>() {
                    total_bytes += kb * 1024;
                }
            }
        }
        format_bytes(total_bytes)
    }

    /// Builds a removal plan; `commands` never include `-y` — confirmation
    /// is the caller's responsibility (spec §4.I).
    pub async fn generate_removal_plan(&self, package_name: &str, purge: bool) -> RemovalPlan {
        self.initialize().await;

        let mut plan = RemovalPlan { target_package: package_name.to_string(), ..Default::default() };

        plan.packages_to_remove = self.cascade_packages(package_name).await;
        plan.packages_to_remove.insert(0, package_name.to_string());
        plan.autoremove_candidates = self.orphaned_packages(package_name).await;
        plan.config_files_affected = self.config_files(package_name).await;
        plan.estimated_freed_space = self.estimate_freed_space(&plan.packages_to_remove).await;

        plan.commands = if purge {
            vec![format!("sudo apt-get purge {package_name}"), "sudo apt-get autoremove".to_string()]
        } else {
            vec![format!("sudo apt-get remove {package_name}"), "sudo apt-get autoremove".to_string()]
        };

        plan
    }

    pub async fn safe_removal_order(&self, packages: &[String]) -> Vec<String> {
        safe_removal_order(&self.graph, packages).await
    }
}

fn format_bytes(total_bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const KB: f64 = 1024.0;
    let bytes = total_bytes as f64;
    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes / KB)
    } else {
        format!("{total_bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_thresholds() {
        assert!(ImpactSeverity::Critical > ImpactSeverity::High);
        assert!(ImpactSeverity::High > ImpactSeverity::Medium);
        assert!(ImpactSeverity::Medium > ImpactSeverity::Low);
        assert!(ImpactSeverity::Low > ImpactSeverity::Safe);
    }

    #[test]
    fn formats_byte_sizes_by_magnitude() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn known_alternatives_are_symmetric_for_web_servers() {
        assert!(alternatives_for("nginx").contains(&"apache2"));
        assert!(alternatives_for("apache2").contains(&"nginx"));
    }

    #[tokio::test]
    async fn safe_removal_order_drains_leaf_packages_first() {
        let dir = tempfile::tempdir().unwrap();
        let graph = DependencyGraph::new(dir.path().join("cache.json"), false);
        // No installed packages means no reverse dependencies resolve, so
        // every package is immediately safe to remove in a single round.
        let order = safe_removal_order(&graph, &["a".to_string(), "b".to_string()]).await;
        assert_eq!(order.len(), 2);
    }

    #[tokio::test]
    async fn sixty_reverse_dependents_force_critical_severity_with_no_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let graph = DependencyGraph::new(dir.path().join("cache.json"), false);
        let analyzer = ImpactAnalyzer::new(graph);

        let mut result = ImpactResult::new("pkg-root");
        result.total_affected = 60;
        result.affected_services = Vec::new();

        let severity = analyzer.calculate_severity(&result);
        assert_eq!(severity, ImpactSeverity::Critical);
    }
}
