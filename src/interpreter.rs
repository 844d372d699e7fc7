//! Turns a natural-language request into a validated command list (spec
//! §4.F), grounded on `original_source/cortex/llm/interpreter.py`.

use crate::cache::SemanticCache;
use crate::error::{Error, Result};
use serde::Deserialize;

const SYSTEM_PROMPT: &str = r#"You are a Linux system command expert. Convert natural language requests into safe, validated bash commands.

Rules:
1. Return ONLY a JSON array of commands
2. Each command must be a safe, executable bash command
3. Commands should be atomic and sequential
4. Avoid destructive operations without explicit user confirmation
5. Use package managers appropriate for Debian/Ubuntu systems (apt)
6. Include necessary privilege escalation (sudo) when required
7. Validate command syntax before returning

Format:
{"commands": ["command1", "command2", ...]}

Example request: "install docker with nvidia support"
Example response: {"commands": ["sudo apt update", "sudo apt install -y docker.io", "sudo apt install -y nvidia-docker2", "sudo systemctl restart docker"]}"#;

const DANGEROUS_PATTERNS: [&str; 6] = ["rm -rf /", "dd if=", "mkfs.", "> /dev/sda", "fork bomb", ":(){ :|:& };:"];

fn cache_system_prompt(validate: bool) -> String {
    format!("{SYSTEM_PROMPT}\n\n[cortex-cache-validate={validate}]")
}

#[derive(Deserialize)]
struct CommandsPayload {
    commands: Vec<serde_json::Value>,
}

/// Extracts the first well-formed JSON object/array from `content`,
/// tolerating triple-backtick fences and surrounding prose.
fn extract_json(content: &str) -> Result<String> {
    let mut content = content.trim();

    if let Some(fenced) = content.split("```json").nth(1) {
        content = fenced.split("```").next().unwrap_or(fenced).trim();
    } else if content.contains("```") {
        let parts: Vec<&str> = content.split("```").collect();
        if parts.len() >= 3 {
            content = parts[1].trim();
        }
    }

    let start = content
        .find(['{', '['])
        .ok_or_else(|| Error::ModelOutputInvalid(truncated_dump(content)))?;
    let content = &content[start..];

    let (open, close) = if content.starts_with('{') { ('{', '}') } else { ('[', ']') };
    let mut depth = 0i32;
    let mut end = None;
    for (i, ch) in content.char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                end = Some(i + ch.len_utf8());
                break;
            }
        }
    }
    let end = end.ok_or_else(|| Error::ModelOutputInvalid(truncated_dump(content)))?;
    Ok(content[..end].to_string())
}

fn truncated_dump(content: &str) -> String {
    let truncated: String = content.chars().take(500).collect();
    format!("failed to parse LLM response: {truncated}")
}

fn parse_commands(content: &str) -> Result<Vec<String>> {
    let json_slice = extract_json(content)?;
    let payload: CommandsPayload =
        serde_json::from_str(&json_slice).map_err(|_| Error::ModelOutputInvalid(truncated_dump(content)))?;

    Ok(payload
        .commands
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
        .collect())
}

fn validate_commands(commands: Vec<String>) -> Vec<String> {
    commands
        .into_iter()
        .filter(|cmd| {
            let lower = cmd.to_lowercase();
            !DANGEROUS_PATTERNS.iter().any(|pattern| lower.contains(pattern))
        })
        .collect()
}

/// Calls the LLM behind a cache, per spec §4.F: a cache hit short-circuits
/// the call entirely; a validated and an unvalidated response live under
/// disjoint cache keys via the `[cortex-cache-validate=...]` sentinel.
pub struct CommandInterpreter<'a> {
    cache: Option<&'a SemanticCache>,
    provider: String,
    model: String,
    offline: bool,
}

impl<'a> CommandInterpreter<'a> {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, offline: bool, cache: Option<&'a SemanticCache>) -> Self {
        Self { cache, provider: provider.into(), model: model.into(), offline }
    }

    pub fn parse(
        &self,
        user_input: &str,
        validate: bool,
        llm_call: impl FnOnce(&str, &str) -> Result<String>,
    ) -> Result<Vec<String>> {
        if user_input.trim().is_empty() {
            return Err(Error::InputValidation("user input cannot be empty".to_string()));
        }

        let system_prompt = cache_system_prompt(validate);

        if let Some(cache) = self.cache {
            if let Some(cached) = cache.get_commands(user_input, &self.provider, &self.model, &system_prompt) {
                return Ok(cached);
            }
        }

        if self.offline {
            return Err(Error::OfflineAndUncached);
        }

        let raw = llm_call(&system_prompt, user_input)?;
        let mut commands = parse_commands(&raw)?;

        if validate {
            commands = validate_commands(commands);
        }

        if let Some(cache) = self.cache {
            if !commands.is_empty() {
                cache.put_commands(user_input, &self.provider, &self.model, &system_prompt, &commands);
            }
        }

        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_empty_input() {
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", false, None);
        let result = interpreter.parse("   ", true, |_, _| Ok("{}".to_string()));
        assert!(matches!(result, Err(Error::InputValidation(_))));
    }

    #[test]
    fn extracts_commands_from_fenced_json() {
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", false, None);
        let result = interpreter
            .parse("install nginx", true, |_, _| {
                Ok("Sure, here you go:\n```json\n{\"commands\": [\"sudo apt install nginx\"]}\n```".to_string())
            })
            .unwrap();
        assert_eq!(result, vec!["sudo apt install nginx".to_string()]);
    }

    #[test]
    fn filters_dangerous_commands_when_validating() {
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", false, None);
        let result = interpreter
            .parse("wipe disk", true, |_, _| {
                Ok(r#"{"commands": ["rm -rf /", "echo safe"]}"#.to_string())
            })
            .unwrap();
        assert_eq!(result, vec!["echo safe".to_string()]);
    }

    #[test]
    fn offline_mode_without_cache_entry_fails() {
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", true, None);
        let result = interpreter.parse("install nginx", true, |_, _| Ok("{}".to_string()));
        assert!(matches!(result, Err(Error::OfflineAndUncached)));
    }

    #[test]
    fn cache_hit_short_circuits_the_llm_call() {
        let dir = tempdir().unwrap();
        let cache = SemanticCache::open(&dir.path().join("cache.db")).unwrap();
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", false, Some(&cache));

        interpreter
            .parse("install nginx", true, |_, _| Ok(r#"{"commands": ["apt install -y nginx"]}"#.to_string()))
            .unwrap();

        let result = interpreter.parse("install nginx", true, |_, _| panic!("llm should not be called"));
        assert_eq!(result.unwrap(), vec!["apt install -y nginx".to_string()]);
    }

    #[test]
    fn unparseable_response_is_model_output_invalid() {
        let interpreter = CommandInterpreter::new("ollama", "llama3.1", false, None);
        let result = interpreter.parse("install nginx", true, |_, _| Ok("not json at all".to_string()));
        assert!(matches!(result, Err(Error::ModelOutputInvalid(_))));
    }
}
