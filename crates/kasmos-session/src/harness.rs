//! Harness adapters — the external AI-agent CLIs an instance can host.

use std::env;
use std::path::Path;

/// Knobs a harness may or may not support; unsupported fields are ignored by
/// `build_flags`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub effort: Option<String>,
    pub initial_prompt: Option<String>,
}

/// Capability describing one agent CLI.
pub trait Harness: Send {
    fn name(&self) -> &'static str;
    /// True when the harness binary is on PATH.
    fn detect(&self) -> bool {
        binary_on_path(self.name())
    }
    fn list_models(&self) -> Vec<&'static str>;
    fn build_flags(&self, config: &AgentConfig) -> Vec<String>;
    fn supports_temperature(&self) -> bool;
    fn supports_effort(&self) -> bool;
}

/// True if `program` accepts an initial prompt on the command line
/// (`opencode --prompt` or `claude <prompt>`). Matches on the program path
/// suffix so wrappers like `/usr/local/bin/claude` still qualify.
pub fn supports_cli_prompt(program: &str) -> bool {
    let command = program.split_whitespace().next().unwrap_or(program);
    command.ends_with("opencode") || command.ends_with("claude")
}

fn binary_on_path(name: &str) -> bool {
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeHarness;

impl Harness for ClaudeHarness {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn list_models(&self) -> Vec<&'static str> {
        vec!["sonnet", "opus", "haiku"]
    }

    fn build_flags(&self, config: &AgentConfig) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(model) = &config.model {
            flags.push("--model".to_string());
            flags.push(model.clone());
        }
        if let Some(effort) = &config.effort {
            flags.push("--effort".to_string());
            flags.push(effort.clone());
        }
        // The prompt is a positional argument.
        if let Some(prompt) = &config.initial_prompt {
            flags.push(prompt.clone());
        }
        flags
    }

    fn supports_temperature(&self) -> bool {
        false
    }

    fn supports_effort(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenCodeHarness;

impl Harness for OpenCodeHarness {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn list_models(&self) -> Vec<&'static str> {
        vec!["default"]
    }

    fn build_flags(&self, config: &AgentConfig) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(model) = &config.model {
            flags.push("--model".to_string());
            flags.push(model.clone());
        }
        if let Some(prompt) = &config.initial_prompt {
            flags.push("--prompt".to_string());
            flags.push(prompt.clone());
        }
        flags
    }

    fn supports_temperature(&self) -> bool {
        false
    }

    fn supports_effort(&self) -> bool {
        false
    }
}

/// Fallback for harnesses with no CLI-prompt channel (aider and friends).
/// The queued prompt is pasted by the supervisor once the session is ready.
#[derive(Debug, Clone, Default)]
pub struct AiderHarness;

impl Harness for AiderHarness {
    fn name(&self) -> &'static str {
        "aider"
    }

    fn list_models(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn build_flags(&self, config: &AgentConfig) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(model) = &config.model {
            flags.push("--model".to_string());
            flags.push(model.clone());
        }
        if let Some(temperature) = config.temperature {
            flags.push("--temperature".to_string());
            flags.push(temperature.to_string());
        }
        flags
    }

    fn supports_temperature(&self) -> bool {
        true
    }

    fn supports_effort(&self) -> bool {
        false
    }
}

/// Picks the harness adapter for a configured program path.
pub fn harness_for(program: &str) -> Box<dyn Harness> {
    let command = program.split_whitespace().next().unwrap_or(program);
    let basename = Path::new(command)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());
    match basename.as_str() {
        "opencode" => Box::new(OpenCodeHarness),
        "claude" => Box::new(ClaudeHarness),
        _ => Box::new(AiderHarness),
    }
}

/// Quotes a command-line word for the pane's shell.
pub fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':'))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_prompt_support_matches_program_suffix() {
        assert!(supports_cli_prompt("opencode"));
        assert!(supports_cli_prompt("claude"));
        assert!(supports_cli_prompt("/usr/local/bin/claude"));
        assert!(!supports_cli_prompt("aider --model ollama_chat/gemma3:1b"));
        assert!(!supports_cli_prompt("codex"));
    }

    #[test]
    fn harness_for_resolves_by_basename() {
        assert_eq!(harness_for("claude").name(), "claude");
        assert_eq!(harness_for("/opt/bin/opencode").name(), "opencode");
        assert_eq!(harness_for("aider --model x").name(), "aider");
        assert_eq!(harness_for("some-unknown-cli").name(), "aider");
    }

    #[test]
    fn claude_flags_put_prompt_positionally() {
        let flags = ClaudeHarness.build_flags(&AgentConfig {
            model: Some("opus".to_string()),
            initial_prompt: Some("Plan auth.".to_string()),
            ..AgentConfig::default()
        });
        assert_eq!(flags, vec!["--model", "opus", "Plan auth."]);
    }

    #[test]
    fn opencode_flags_use_prompt_flag() {
        let flags = OpenCodeHarness.build_flags(&AgentConfig {
            initial_prompt: Some("Fix the bug.".to_string()),
            ..AgentConfig::default()
        });
        assert_eq!(flags, vec!["--prompt", "Fix the bug."]);
    }

    #[test]
    fn aider_ignores_prompt_but_takes_temperature() {
        let flags = AiderHarness.build_flags(&AgentConfig {
            temperature: Some(0.5),
            initial_prompt: Some("ignored".to_string()),
            ..AgentConfig::default()
        });
        assert_eq!(flags, vec!["--temperature", "0.5"]);
        assert!(AiderHarness.supports_temperature());
        assert!(!ClaudeHarness.supports_temperature());
        assert!(ClaudeHarness.supports_effort());
    }

    #[test]
    fn shell_quote_wraps_words_with_spaces() {
        assert_eq!(shell_quote("plain-word"), "plain-word");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
