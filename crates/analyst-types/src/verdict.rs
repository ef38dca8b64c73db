//! Values exchanged with external collaborators: planner decisions, judge
//! verdicts, verification reports, generated code, and chat turns.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Judge verdicts
// ---------------------------------------------------------------------------

/// Grade for a single stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepVerdict {
    pub passed: bool,
    pub critique: String,
    pub score: f64,
}

impl StepVerdict {
    pub const NO_REMARKS: &'static str = "No remarks";
    pub const NEUTRAL_SCORE: f64 = 5.0;

    pub fn pass(critique: impl Into<String>, score: f64) -> Self {
        Self {
            passed: true,
            critique: critique.into(),
            score,
        }
    }

    pub fn fail(critique: impl Into<String>, score: f64) -> Self {
        Self {
            passed: false,
            critique: critique.into(),
            score,
        }
    }

    /// Optimistic default used when the judge's answer cannot be read.
    pub fn permissive(reason: impl Into<String>) -> Self {
        Self::pass(reason, Self::NEUTRAL_SCORE)
    }
}

/// Cumulative verdict on the whole session so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionVerdict {
    pub passed: bool,
    pub critique: String,
}

impl SessionVerdict {
    pub fn pass(critique: impl Into<String>) -> Self {
        Self {
            passed: true,
            critique: critique.into(),
        }
    }

    pub fn fail(critique: impl Into<String>) -> Self {
        Self {
            passed: false,
            critique: critique.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Catalogue entry shown to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub name: String,
    pub description: String,
}

/// The planner's choice of what to run next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerDecision {
    pub thought: String,
    pub stage_name: String,
}

impl PlannerDecision {
    pub const FINISH: &'static str = "Finish";

    pub fn new(thought: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            stage_name: stage_name.into(),
        }
    }

    pub fn is_finish(&self) -> bool {
        self.stage_name.trim().eq_ignore_ascii_case(Self::FINISH)
    }
}

// ---------------------------------------------------------------------------
// Interactive answering
// ---------------------------------------------------------------------------

/// Verifier classification of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Valid,
    Invalid,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub validity: Validity,
    pub critique: String,
    pub suggestion: String,
}

impl VerificationReport {
    pub fn valid() -> Self {
        Self {
            validity: Validity::Valid,
            critique: String::new(),
            suggestion: String::new(),
        }
    }
}

/// Input for one code-generation attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeRequest {
    pub question: String,
    pub schema: String,
    pub prior_error: Option<String>,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub thought: String,
    pub code: String,
}

/// What the chat planner wants to do with a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChatDecision {
    Answer {
        text: String,
    },
    ToolCall {
        tool: String,
        args: serde_json::Value,
        thought: String,
    },
    NeedsCode {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message of the chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_verdict_passes_with_neutral_score() {
        let v = StepVerdict::permissive("unreadable");
        assert!(v.passed);
        assert_eq!(v.score, 5.0);
        assert_eq!(v.critique, "unreadable");
    }

    #[test]
    fn finish_detection_ignores_case_and_whitespace() {
        assert!(PlannerDecision::new("", " finish ").is_finish());
        assert!(!PlannerDecision::new("", "Data Profiling").is_finish());
    }

    #[test]
    fn chat_turn_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatTurn::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn chat_decision_is_tagged_by_action() {
        let d: ChatDecision = serde_json::from_str(
            r#"{"action":"tool_call","tool":"get_dataframe_info","args":{},"thought":"t"}"#,
        )
        .unwrap();
        assert!(matches!(d, ChatDecision::ToolCall { ref tool, .. } if tool == "get_dataframe_info"));
    }
}
