//! Local regex pattern matcher, tier 4 of the degradation ladder (spec
//! §4.E, glossary), grounded on
//! `graceful_degradation.py::PatternMatcher`.
//!
//! Patterns are anchored with bounded quantifiers rather than `.+` where
//! possible, per the spec's note on precluding catastrophic backtracking.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

const INSTALL_CONFIDENCE: f64 = 0.8;
const OPERATION_CONFIDENCE: f64 = 0.7;

/// A successful pattern match.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub command: String,
    pub confidence: f64,
    pub kind: PatternKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Install,
    Operation,
}

struct PatternEntry {
    regex: Regex,
    template: &'static str,
}

fn install_patterns() -> &'static Vec<PatternEntry> {
    static PATTERNS: OnceLock<Vec<PatternEntry>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            (r"(?:install|setup|add)\s+(?:node|nodejs)", "sudo apt install nodejs npm"),
            (
                r"(?:install|setup|add)\s+(?:python|python3)",
                "sudo apt install python3 python3-pip python3-venv",
            ),
            (r"(?:install|setup|add)\s+(?:docker)", "sudo apt install docker.io docker-compose"),
            (r"(?:install|setup|add)\s+(?:nginx)", "sudo apt install nginx"),
            (
                r"(?:install|setup|add)\s+(?:postgresql|postgres)",
                "sudo apt install postgresql postgresql-contrib",
            ),
            (r"(?:install|setup|add)\s+(?:mysql|mariadb)", "sudo apt install mysql-server"),
            (r"(?:install|setup|add)\s+(?:redis)", "sudo apt install redis-server"),
            (r"(?:install|setup|add)\s+(?:mongodb)", "sudo apt install mongodb"),
            (r"(?:install|setup|add)\s+(?:git)", "sudo apt install git"),
            (r"(?:install|setup|add)\s+(?:vim|neovim)", "sudo apt install neovim"),
            (r"(?:install|setup|add)\s+(?:curl)", "sudo apt install curl"),
            (r"(?:install|setup|add)\s+(?:wget)", "sudo apt install wget"),
            (r"(?:install|setup|add)\s+(?:htop)", "sudo apt install htop"),
            (r"(?:install|setup|add)\s+(?:tmux)", "sudo apt install tmux"),
            (
                r"(?:install|setup|add)\s+(?:rust|rustc|cargo)",
                "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh",
            ),
            (r"(?:install|setup|add)\s+(?:go|golang)", "sudo apt install golang-go"),
            (r"(?:install|setup|add)\s+(?:java|openjdk)", "sudo apt install default-jdk"),
            (
                r"(?:install|setup|add)\s+(?:cuda|nvidia.?driver)",
                "sudo apt install nvidia-driver-535 nvidia-cuda-toolkit",
            ),
            (r"(?:install|setup|add)\s+(?:tensorflow)", "pip install tensorflow"),
            (r"(?:install|setup|add)\s+(?:pytorch|torch)", "pip install torch torchvision torchaudio"),
        ])
    })
}

fn operation_patterns() -> &'static Vec<PatternEntry> {
    static PATTERNS: OnceLock<Vec<PatternEntry>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            (r"(?:update|upgrade)\s+(?:system|all|packages)", "sudo apt update && sudo apt upgrade -y"),
            (
                r"(?:clean|cleanup)\s+(?:system|apt|packages)",
                "sudo apt autoremove -y && sudo apt autoclean",
            ),
            (r"(?:search|find)\s+(?:package\s+)?(.{1,200})", "apt search {0}"),
            (r"(?:remove|uninstall|delete)\s+(.{1,200})", "sudo apt remove {0}"),
            (r"(?:info|details|about)\s+(.{1,200})", "apt show {0}"),
            (r"(?:list)\s+(?:installed)", "apt list --installed"),
        ])
    })
}

fn compile(entries: &[(&'static str, &'static str)]) -> Vec<PatternEntry> {
    entries
        .iter()
        .map(|(pattern, template)| PatternEntry {
            regex: RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("static pattern table entry is a valid regex"),
            template,
        })
        .collect()
}

/// Tries install patterns, then operation patterns, substituting any
/// captured groups positionally into the matched template.
pub fn match_query(query: &str) -> Option<PatternMatch> {
    let query = query.trim();

    for entry in install_patterns() {
        if entry.regex.is_match(query) {
            return Some(PatternMatch {
                command: entry.template.to_string(),
                confidence: INSTALL_CONFIDENCE,
                kind: PatternKind::Install,
            });
        }
    }

    for entry in operation_patterns() {
        if let Some(captures) = entry.regex.captures(query) {
            let mut command = entry.template.to_string();
            for (i, group) in captures.iter().skip(1).enumerate() {
                if let Some(group) = group {
                    command = command.replace(&format!("{{{i}}}"), group.as_str());
                }
            }
            return Some(PatternMatch {
                command,
                confidence: OPERATION_CONFIDENCE,
                kind: PatternKind::Operation,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_install_pattern() {
        let result = match_query("install docker").unwrap();
        assert_eq!(result.command, "sudo apt install docker.io docker-compose");
        assert_eq!(result.kind, PatternKind::Install);
    }

    #[test]
    fn substitutes_captured_group_into_operation_template() {
        let result = match_query("remove vim").unwrap();
        assert_eq!(result.command, "sudo apt remove vim");
        assert_eq!(result.kind, PatternKind::Operation);
    }

    #[test]
    fn search_pattern_substitutes_query_term() {
        let result = match_query("search image editors").unwrap();
        assert_eq!(result.command, "apt search image editors");
    }

    #[test]
    fn unrecognized_query_does_not_match() {
        assert!(match_query("what is the weather today").is_none());
    }

    #[test]
    fn install_patterns_are_tried_before_operation_patterns() {
        // "install git" would also loosely resemble an "info/about" phrase
        // if operation patterns ran first; install must win.
        let result = match_query("install git").unwrap();
        assert_eq!(result.kind, PatternKind::Install);
    }
}
