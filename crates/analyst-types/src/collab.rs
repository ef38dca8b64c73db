//! Collaborator interfaces the session core depends on.
//!
//! Implementations may be backed by a language model or be scripted for
//! tests. The core treats every call as fallible and degrades gracefully.

use async_trait::async_trait;

use crate::verdict::{
    ChatDecision, ChatTurn, CodeRequest, GeneratedCode, PlannerDecision, SessionVerdict,
    StageInfo, StepVerdict, VerificationReport,
};
use crate::Result;

/// Raw text completion: a system instruction plus a user prompt in, text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Chooses the next stage from the session memory.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decide_next_stage(
        &self,
        memory: &str,
        catalogue: &[StageInfo],
    ) -> Result<PlannerDecision>;
}

/// Grades stage attempts and overall session progress.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate_step(
        &self,
        stage_name: &str,
        attempt_context: &str,
        result_text: &str,
    ) -> Result<StepVerdict>;

    async fn evaluate_session(
        &self,
        memory: &str,
        artifact_count: usize,
        round_context: &str,
    ) -> Result<SessionVerdict>;
}

/// Folds the latest stage output into the session memory.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn compact(&self, memory: &str, stage_name: &str, result_text: &str) -> Result<String>;
}

/// Checks whether a computed answer actually addresses the question.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check_result(&self, question: &str, result_text: &str) -> Result<VerificationReport>;
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &CodeRequest) -> Result<GeneratedCode>;
}

/// Decides how to answer a chat question: directly, via a tool, or via code.
#[async_trait]
pub trait ChatPlanner: Send + Sync {
    async fn plan_answer(
        &self,
        question: &str,
        history: &[ChatTurn],
        tool_catalogue: &str,
        schema: &str,
    ) -> Result<ChatDecision>;
}
