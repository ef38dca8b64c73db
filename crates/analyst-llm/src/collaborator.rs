//! One model-backed implementation of every collaborator interface.
//!
//! Replies are parsed leniently: missing fields take neutral defaults, and
//! only a reply with nothing usable at all becomes a `JudgeParse` error.

use std::sync::Arc;

use analyst_types::{
    AnalystError, ChatDecision, ChatPlanner, ChatTurn, CodeGenerator, CodeRequest,
    GeneratedCode, Judge, Planner, PlannerDecision, Result, SessionVerdict, StageInfo,
    StepVerdict, Summarizer, TextModel, Validity, VerificationReport, Verifier,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::json::{bool_field, extract_code_block, extract_object, number_field, string_field};
use crate::prompts;

const DEFAULT_MEMORY_LIMIT: usize = 6000;

/// Planner, judge, summarizer, verifier, code generator and chat planner in
/// one, all backed by the same [`TextModel`].
#[derive(Clone)]
pub struct LlmCollaborator {
    model: Arc<dyn TextModel>,
    memory_limit: usize,
    capabilities: String,
}

impl LlmCollaborator {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self {
            model,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            capabilities: String::new(),
        }
    }

    /// Target length for compacted memory.
    pub fn with_memory_limit(mut self, chars: usize) -> Self {
        self.memory_limit = chars;
        self
    }

    /// Snippet-language reference included in code-generation prompts.
    pub fn with_capabilities(mut self, text: impl Into<String>) -> Self {
        self.capabilities = text.into();
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<String> {
        self.model.complete(system, &prompt).await
    }
}

impl std::fmt::Debug for LlmCollaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCollaborator")
            .field("model", &self.model.name())
            .field("memory_limit", &self.memory_limit)
            .finish()
    }
}

fn parse_error(collaborator: &str, reply: &str) -> AnalystError {
    let preview: String = reply.chars().take(200).collect();
    AnalystError::JudgeParse {
        collaborator: collaborator.to_string(),
        message: format!("no usable JSON in reply: {preview}"),
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Reply parsers
// ---------------------------------------------------------------------------

pub fn parse_planner_decision(reply: &str, catalogue: &[StageInfo]) -> Result<PlannerDecision> {
    if let Some(map) = extract_object(reply) {
        let stage = non_empty(string_field(
            &map,
            &["stage", "stage_name", "tool_name", "tool", "next_step"],
        ));
        if let Some(stage) = stage {
            let thought = string_field(&map, &["thought", "reasoning"]).unwrap_or_default();
            return Ok(PlannerDecision::new(thought, stage.trim()));
        }
    }

    // Prose reply: take the first stage it names.
    let lower = reply.to_lowercase();
    let mentioned = catalogue
        .iter()
        .map(|s| s.name.as_str())
        .chain(std::iter::once(PlannerDecision::FINISH))
        .filter_map(|name| lower.find(&name.to_lowercase()).map(|pos| (pos, name)))
        .min_by_key(|(pos, _)| *pos);
    match mentioned {
        Some((_, name)) => Ok(PlannerDecision::new(reply.trim(), name)),
        None => Err(parse_error("planner", reply)),
    }
}

pub fn parse_step_verdict(reply: &str) -> Result<StepVerdict> {
    let map = extract_object(reply).ok_or_else(|| parse_error("judge", reply))?;
    let passed = bool_field(&map, &["passed", "pass", "approved"]).unwrap_or(true);
    let critique = non_empty(string_field(&map, &["critique", "feedback", "reason"]))
        .unwrap_or_else(|| StepVerdict::NO_REMARKS.to_string());
    let score = number_field(&map, &["score", "rating"])
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 10.0))
        .unwrap_or(StepVerdict::NEUTRAL_SCORE);
    Ok(StepVerdict {
        passed,
        critique,
        score,
    })
}

pub fn parse_session_verdict(reply: &str) -> Result<SessionVerdict> {
    let map = extract_object(reply).ok_or_else(|| parse_error("session judge", reply))?;
    let passed = bool_field(&map, &["passed", "pass", "approved"]).unwrap_or(true);
    let critique = non_empty(string_field(&map, &["critique", "feedback", "reason"]))
        .unwrap_or_else(|| StepVerdict::NO_REMARKS.to_string());
    Ok(SessionVerdict { passed, critique })
}

pub fn parse_verification(reply: &str) -> Result<VerificationReport> {
    let map = extract_object(reply).ok_or_else(|| parse_error("verifier", reply))?;
    let raw = map
        .get("is_valid")
        .or_else(|| map.get("valid"))
        .or_else(|| map.get("validity"));
    let validity = match raw {
        Some(Value::Bool(true)) => Validity::Valid,
        Some(Value::Bool(false)) => Validity::Invalid,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "partial" | "partially" => Validity::Partial,
            "true" | "valid" | "yes" => Validity::Valid,
            "false" | "invalid" | "no" => Validity::Invalid,
            _ => return Err(parse_error("verifier", reply)),
        },
        _ => return Err(parse_error("verifier", reply)),
    };
    Ok(VerificationReport {
        validity,
        critique: string_field(&map, &["critique", "reason"]).unwrap_or_default(),
        suggestion: string_field(&map, &["suggestion", "hint"]).unwrap_or_default(),
    })
}

pub fn parse_generated_code(reply: &str) -> Result<GeneratedCode> {
    if let Some(map) = extract_object(reply) {
        if let Some(code) = non_empty(string_field(&map, &["code", "snippet"])) {
            return Ok(GeneratedCode {
                thought: string_field(&map, &["thought", "reasoning"]).unwrap_or_default(),
                code,
            });
        }
    }
    match extract_code_block(reply) {
        Some(code) => Ok(GeneratedCode {
            thought: String::new(),
            code,
        }),
        None => Err(parse_error("code generator", reply)),
    }
}

pub fn parse_chat_decision(reply: &str) -> Result<ChatDecision> {
    let map = extract_object(reply).ok_or_else(|| parse_error("chat planner", reply))?;
    let action = string_field(&map, &["action", "type"])
        .map(|a| a.trim().to_ascii_lowercase())
        .unwrap_or_else(|| {
            if map.contains_key("tool") || map.contains_key("tool_name") {
                "tool".into()
            } else {
                String::new()
            }
        });

    match action.as_str() {
        "answer" | "direct" | "respond" => {
            let text = non_empty(string_field(&map, &["text", "answer", "response"]))
                .ok_or_else(|| parse_error("chat planner", reply))?;
            Ok(ChatDecision::Answer { text })
        }
        "tool" | "tool_call" | "call_tool" => {
            let tool = non_empty(string_field(&map, &["tool", "tool_name", "name"]))
                .ok_or_else(|| parse_error("chat planner", reply))?;
            let args = match map.get("args").or_else(|| map.get("arguments")) {
                Some(Value::Object(obj)) => Value::Object(obj.clone()),
                _ => Value::Object(Default::default()),
            };
            Ok(ChatDecision::ToolCall {
                tool,
                args,
                thought: string_field(&map, &["thought", "reasoning"]).unwrap_or_default(),
            })
        }
        "code" | "needs_code" | "generate_code" | "complex" => Ok(ChatDecision::NeedsCode {
            reason: string_field(&map, &["reason", "thought"]).unwrap_or_default(),
        }),
        _ => Err(parse_error("chat planner", reply)),
    }
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl Planner for LlmCollaborator {
    async fn decide_next_stage(
        &self,
        memory: &str,
        catalogue: &[StageInfo],
    ) -> Result<PlannerDecision> {
        let reply = self
            .ask(prompts::PLANNER_SYSTEM, prompts::planner_prompt(memory, catalogue))
            .await?;
        parse_planner_decision(&reply, catalogue)
    }
}

#[async_trait]
impl Judge for LlmCollaborator {
    async fn evaluate_step(
        &self,
        stage_name: &str,
        attempt_context: &str,
        result_text: &str,
    ) -> Result<StepVerdict> {
        let reply = self
            .ask(
                prompts::STEP_JUDGE_SYSTEM,
                prompts::step_judge_prompt(stage_name, attempt_context, result_text),
            )
            .await?;
        parse_step_verdict(&reply)
    }

    async fn evaluate_session(
        &self,
        memory: &str,
        artifact_count: usize,
        round_context: &str,
    ) -> Result<SessionVerdict> {
        let reply = self
            .ask(
                prompts::SESSION_JUDGE_SYSTEM,
                prompts::session_judge_prompt(memory, artifact_count, round_context),
            )
            .await?;
        parse_session_verdict(&reply)
    }
}

#[async_trait]
impl Summarizer for LlmCollaborator {
    async fn compact(&self, memory: &str, stage_name: &str, result_text: &str) -> Result<String> {
        let reply = self
            .ask(
                prompts::SUMMARIZER_SYSTEM,
                prompts::summarizer_prompt(memory, stage_name, result_text, self.memory_limit),
            )
            .await?;
        let compacted = reply.trim();
        if compacted.is_empty() {
            return Err(AnalystError::JudgeParse {
                collaborator: "summarizer".into(),
                message: "empty reply".into(),
            });
        }
        Ok(compacted.to_string())
    }
}

#[async_trait]
impl Verifier for LlmCollaborator {
    async fn check_result(&self, question: &str, result_text: &str) -> Result<VerificationReport> {
        let reply = self
            .ask(
                prompts::VERIFIER_SYSTEM,
                prompts::verifier_prompt(question, result_text),
            )
            .await?;
        parse_verification(&reply)
    }
}

#[async_trait]
impl CodeGenerator for LlmCollaborator {
    async fn generate(&self, request: &CodeRequest) -> Result<GeneratedCode> {
        let reply = self
            .ask(
                prompts::CODE_SYSTEM,
                prompts::code_prompt(request, &self.capabilities),
            )
            .await?;
        parse_generated_code(&reply)
    }
}

#[async_trait]
impl ChatPlanner for LlmCollaborator {
    async fn plan_answer(
        &self,
        question: &str,
        history: &[ChatTurn],
        tool_catalogue: &str,
        schema: &str,
    ) -> Result<ChatDecision> {
        let reply = self
            .ask(
                prompts::CHAT_SYSTEM,
                prompts::chat_prompt(question, history, tool_catalogue, schema),
            )
            .await?;
        parse_chat_decision(&reply)
    }
}
