//! Text models backed by locally installed coding-assistant CLIs.
//!
//! Each call spawns the provider binary in one-shot, JSON-output mode and
//! normalizes its output into plain text.

use std::time::Duration;

use analyst_types::{AnalystError, ModelSettings, Result, TextModel};
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// CliProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliProvider {
    Claude,
    Codex,
    Gemini,
}

impl std::str::FromStr for CliProvider {
    type Err = (); // Never fails; unknown names fall back to Claude

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "codex" | "openai" => Ok(Self::Codex),
            "gemini" | "google" => Ok(Self::Gemini),
            other => {
                tracing::warn!(provider = other, "Unknown model provider, defaulting to Claude");
                Ok(Self::Claude)
            }
        }
    }
}

impl CliProvider {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "Codex CLI",
            Self::Gemini => "Gemini CLI",
        }
    }
}

// ---------------------------------------------------------------------------
// CLI output structs
// ---------------------------------------------------------------------------

/// Result shape from `claude -p --output-format json`
#[derive(serde::Deserialize)]
struct ClaudeOutput {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: String,
    #[serde(default)]
    total_cost_usd: f64,
}

/// One event of the `codex --json` JSONL stream.
#[derive(serde::Deserialize)]
#[serde(tag = "type")]
enum CodexEvent {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: Option<CodexError> },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(serde::Deserialize)]
struct CodexItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct CodexError {
    message: String,
}

#[derive(serde::Deserialize)]
struct GeminiOutput {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(serde::Deserialize)]
struct GeminiError {
    message: String,
}

/// Normalized result from any CLI provider.
#[derive(Debug, PartialEq)]
struct CliReply {
    text: String,
    is_error: bool,
    cost_usd: Option<f64>,
}

// ---------------------------------------------------------------------------
// CliModel
// ---------------------------------------------------------------------------

/// A [`TextModel`] that shells out to `claude`, `codex exec` or `gemini`.
#[derive(Debug, Clone)]
pub struct CliModel {
    provider: CliProvider,
    model: Option<String>,
    timeout: Duration,
}

impl CliModel {
    pub fn new(provider: CliProvider) -> Self {
        Self {
            provider,
            model: None,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        let provider = settings.provider.parse().unwrap_or(CliProvider::Claude);
        Self {
            provider,
            model: settings.model.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> CliProvider {
        self.provider
    }

    fn command(&self, prompt: &str) -> tokio::process::Command {
        build_cli_command(self.provider, prompt, self.model.as_deref())
    }

    fn failure(&self, message: impl Into<String>) -> AnalystError {
        AnalystError::Model {
            provider: self.provider.binary_name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TextModel for CliModel {
    fn name(&self) -> &str {
        self.provider.binary_name()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let full_prompt = if system.trim().is_empty() {
            prompt.to_string()
        } else {
            format!("{system}\n\n{prompt}")
        };
        let provider = self.provider;
        tracing::debug!(
            provider = provider.display_name(),
            prompt_chars = full_prompt.len(),
            "Invoking model CLI"
        );

        let child = self.command(&full_prompt).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                self.failure(format!("`{}` binary not found on PATH", provider.binary_name()))
            } else {
                self.failure(format!("Failed to spawn {}: {e}", provider.display_name()))
            }
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalystError::CommandTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| self.failure(format!("{} execution failed: {e}", provider.display_name())))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() && stdout.trim().is_empty() {
            return Err(self.failure(format!(
                "{} exited with {}: {}",
                provider.display_name(),
                output.status,
                stderr.trim()
            )));
        }

        let reply = parse_cli_output(provider, &stdout, &stderr)?;
        tracing::debug!(
            provider = provider.display_name(),
            is_error = reply.is_error,
            cost_usd = reply.cost_usd,
            "Model CLI completed"
        );
        if reply.is_error {
            return Err(self.failure(reply.text));
        }
        Ok(reply.text)
    }
}

// ---------------------------------------------------------------------------
// Command builder and output parsers
// ---------------------------------------------------------------------------

fn build_cli_command(
    provider: CliProvider,
    prompt: &str,
    model: Option<&str>,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(provider.binary_name());
    match provider {
        CliProvider::Claude => {
            cmd.arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .arg("--no-session-persistence");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
        }
        CliProvider::Codex => {
            cmd.arg("exec")
                .arg("--json")
                .arg("--skip-git-repo-check")
                .arg("--ephemeral");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
            // Positional prompt; -p means --profile here
            cmd.arg(prompt);
        }
        CliProvider::Gemini => {
            cmd.arg("--output-format").arg("json");
            if let Some(model) = model {
                cmd.arg("--model").arg(model);
            }
            cmd.arg(prompt);
        }
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
}

fn snippet(text: &str) -> String {
    text.chars().take(500).collect()
}

fn parse_cli_output(provider: CliProvider, stdout: &str, stderr: &str) -> Result<CliReply> {
    if stdout.trim().is_empty() {
        return Err(AnalystError::Model {
            provider: provider.binary_name().to_string(),
            message: format!(
                "{} produced no output. stderr: {}",
                provider.display_name(),
                snippet(stderr)
            ),
        });
    }

    match provider {
        CliProvider::Claude => parse_claude_output(stdout),
        CliProvider::Codex => Ok(parse_codex_output(stdout)),
        CliProvider::Gemini => parse_gemini_output(stdout),
    }
}

fn parse_claude_output(stdout: &str) -> Result<CliReply> {
    let parsed: ClaudeOutput = serde_json::from_str(stdout).map_err(|e| AnalystError::Model {
        provider: "claude".into(),
        message: format!("Failed to parse Claude output: {e}; raw: {}", snippet(stdout)),
    })?;
    Ok(CliReply {
        text: parsed.result,
        is_error: parsed.is_error || parsed.subtype == "error",
        cost_usd: Some(parsed.total_cost_usd),
    })
}

fn parse_codex_output(stdout: &str) -> CliReply {
    let mut last_message: Option<String> = None;
    let mut is_error = false;
    let mut error_message: Option<String> = None;

    for event in serde_json::Deserializer::from_str(stdout).into_iter::<CodexEvent>() {
        match event {
            Ok(CodexEvent::ItemCompleted { item }) => {
                if item.item_type == "agent_message" {
                    if let Some(text) = item.text {
                        last_message = Some(text);
                    }
                }
            }
            Ok(CodexEvent::TurnFailed { error }) => {
                is_error = true;
                error_message = error.map(|e| e.message);
            }
            Ok(CodexEvent::Error { message }) => {
                is_error = true;
                error_message = Some(message);
            }
            Ok(CodexEvent::Other) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed Codex JSONL event");
            }
        }
    }

    let text = if is_error {
        error_message.or(last_message)
    } else {
        last_message
    }
    .unwrap_or_else(|| "No agent message found in Codex output".into());

    CliReply {
        text,
        is_error,
        cost_usd: None,
    }
}

fn parse_gemini_output(stdout: &str) -> Result<CliReply> {
    let parsed: GeminiOutput = serde_json::from_str(stdout).map_err(|e| AnalystError::Model {
        provider: "gemini".into(),
        message: format!("Failed to parse Gemini output: {e}; raw: {}", snippet(stdout)),
    })?;

    if let Some(err) = parsed.error {
        return Ok(CliReply {
            text: err.message,
            is_error: true,
            cost_usd: None,
        });
    }

    Ok(CliReply {
        text: parsed.response.unwrap_or_default(),
        is_error: false,
        cost_usd: None,
    })
}
