//! Run configuration, loaded once at startup and passed to components.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AnalystError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystConfig {
    pub session: SessionSettings,
    pub sandbox: SandboxSettings,
    pub chat: ChatSettings,
    pub model: ModelSettings,
}

impl AnalystConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalystError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            AnalystError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.max_stage_attempts == 0 {
            return Err(AnalystError::Config(
                "session.max_stage_attempts must be at least 1".into(),
            ));
        }
        if self.session.max_steps == 0 {
            return Err(AnalystError::Config("session.max_steps must be at least 1".into()));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(AnalystError::Config("sandbox.timeout_secs must be at least 1".into()));
        }
        if self.chat.max_code_attempts == 0 {
            return Err(AnalystError::Config(
                "chat.max_code_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Bounds for the planning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Rounds per session attempt before an implicit finish.
    pub max_steps: usize,
    /// Judged attempts per stage invocation.
    pub max_stage_attempts: usize,
    /// Full restarts after a rejected cumulative verdict.
    pub max_restarts: usize,
    pub memory_char_limit: usize,
    /// Largest stage output text handed to the judge.
    pub judge_text_limit: usize,
    /// Feed all rounds' outputs (not only the latest) to the cumulative judge.
    pub include_prior_rounds: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_stage_attempts: 15,
            max_restarts: 2,
            memory_char_limit: 6_000,
            judge_text_limit: 20_000,
            include_prior_rounds: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub timeout_secs: u64,
    pub max_output_chars: usize,
    /// Interpreter operation budget; 0 disables the budget.
    pub max_operations: u64,
    pub max_collection_size: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_output_chars: 10_240,
            max_operations: 50_000_000,
            max_collection_size: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Most recent turns given to the chat planner.
    pub history_window: usize,
    pub max_code_attempts: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_window: 10,
            max_code_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// `claude`, `codex` or `gemini`.
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: "claude".into(),
            model: None,
            timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_bounds() {
        let c = AnalystConfig::default();
        assert_eq!(c.session.max_steps, 10);
        assert_eq!(c.session.max_stage_attempts, 15);
        assert_eq!(c.session.max_restarts, 2);
        assert_eq!(c.sandbox.timeout_secs, 5);
        assert_eq!(c.sandbox.max_output_chars, 10_240);
        assert_eq!(c.chat.max_code_attempts, 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"session": {"max_restarts": 1}, "model": {"provider": "gemini"}}"#)
            .unwrap();
        let c = AnalystConfig::load(&path).unwrap();
        assert_eq!(c.session.max_restarts, 1);
        assert_eq!(c.session.max_steps, 10);
        assert_eq!(c.model.provider, "gemini");
        assert_eq!(c.model.timeout_secs, 300);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"session": {"max_stage_attempts": 0}}"#).unwrap();
        let err = AnalystConfig::load(&path).unwrap_err();
        assert!(matches!(err, AnalystError::Config(_)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = AnalystConfig::load(Path::new("/nope/config.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn no_path_gives_defaults() {
        assert_eq!(
            AnalystConfig::load_or_default(None).unwrap(),
            AnalystConfig::default()
        );
    }
}
