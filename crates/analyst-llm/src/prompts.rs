//! Prompt assembly for the model-backed collaborators.

use analyst_types::{ChatRole, ChatTurn, CodeRequest, StageInfo};

/// Builds a prompt from headed sections ordered by priority.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

#[derive(Debug, Clone)]
struct PromptSection {
    heading: String,
    content: String,
    priority: u8, // 0 = highest
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unheaded preamble (always first).
    pub fn with_base(mut self, text: &str) -> Self {
        self.sections.push(PromptSection {
            heading: String::new(),
            content: text.to_string(),
            priority: 0,
        });
        self
    }

    /// Add a headed section. Empty content is skipped.
    pub fn with_section(mut self, heading: &str, content: &str, priority: u8) -> Self {
        if !content.trim().is_empty() {
            self.sections.push(PromptSection {
                heading: heading.to_string(),
                content: content.to_string(),
                priority,
            });
        }
        self
    }

    pub fn with_stages(self, catalogue: &[StageInfo]) -> Self {
        let mut content = String::new();
        for stage in catalogue {
            content.push_str(&format!("- {}: {}\n", stage.name, stage.description));
        }
        self.with_section("Available Stages", content.trim_end(), 3)
    }

    pub fn with_history(self, history: &[ChatTurn]) -> Self {
        let content = history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    ChatRole::User => "User",
                    ChatRole::Assistant => "Assistant",
                };
                format!("{role}: {}", turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.with_section("Conversation So Far", &content, 4)
    }

    pub fn build(mut self) -> String {
        self.sections.sort_by_key(|s| s.priority);
        self.sections
            .iter()
            .map(|s| {
                if s.heading.is_empty() {
                    s.content.clone()
                } else {
                    format!("# {}\n\n{}", s.heading, s.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// System instructions
// ---------------------------------------------------------------------------

pub const PLANNER_SYSTEM: &str = "You are the lead analyst of a process-mining study. \
Given the session memory and the list of available stages, choose the single next stage to run. \
Run each stage at most once unless the memory shows it failed. Choose \"Finish\" when the report has been written \
or nothing useful remains. Reply with JSON only: {\"thought\": \"...\", \"stage\": \"<stage name or Finish>\"}.";

pub const STEP_JUDGE_SYSTEM: &str = "You are a strict judge grading one step of a process-mining analysis. \
Reject anything incomplete or vague; demand concrete numbers. Use only the checklist for the step being graded.\n\
Checklists:\n\
- Data Profiling: null percentage, unique count and top values per column; an assessment of event-log readiness.\n\
- Data Cleaning: how many rows were removed and how many values were filled, consistent with the plan. Filling with median or mode is acceptable. No charts are required.\n\
- Visualization: specifications for the activity distribution, events over time and case duration charts, each with concrete numbers and sensible units.\n\
- Process Discovery: activity and transition counts, and a Mermaid flow diagram.\n\
- Process Analysis: mean and p95 case duration, named bottlenecks, and sensible units (a process lasting minutes must not be reported as 0 days).\n\
- Reporting: a complete markdown report whose numbers match the earlier stages.\n\
Reply with JSON only: {\"passed\": true|false, \"critique\": \"...\", \"score\": 1-10}.";

pub const SESSION_JUDGE_SYSTEM: &str = "You review the overall progress of a process-mining analysis session. \
Decide whether the work so far is consistent, correct and heading towards a useful report. \
Fail the session only for serious problems such as contradictory numbers, wrong columns or fabricated results. \
Reply with JSON only: {\"passed\": true|false, \"critique\": \"...\"}.";

pub const SUMMARIZER_SYSTEM: &str = "You maintain the working memory of an analysis session. \
Merge the latest stage result into the existing memory and return the new memory as plain text. \
Keep key numbers, column names, decisions and open problems; drop raw tables and repetition. \
Stay under the requested length.";

pub const VERIFIER_SYSTEM: &str = "You check whether a computed result actually answers the user's question. \
\"partial\" means the result is relevant but incomplete or needs a caveat. \
Reply with JSON only: {\"is_valid\": true|false|\"partial\", \"critique\": \"...\", \"suggestion\": \"...\"}.";

pub const CODE_SYSTEM: &str = "You write short data-query snippets that answer a question about a dataset. \
Use only the capabilities listed below and assign the final answer to `result`. \
Reply with JSON only: {\"thought\": \"...\", \"code\": \"...\"}.";

pub const CHAT_SYSTEM: &str = "You answer questions about a dataset that has already been analysed. \
Never invent numbers. If a listed tool can compute the answer, call it. If the question needs a custom computation, ask for code. \
Answer directly only for questions that need no computation.\n\
Reply with JSON only, one of:\n\
{\"action\": \"answer\", \"text\": \"...\"}\n\
{\"action\": \"tool\", \"tool\": \"<name>\", \"args\": {...}, \"thought\": \"...\"}\n\
{\"action\": \"code\", \"reason\": \"...\"}";

// ---------------------------------------------------------------------------
// User prompts
// ---------------------------------------------------------------------------

pub fn planner_prompt(memory: &str, catalogue: &[StageInfo]) -> String {
    PromptBuilder::new()
        .with_section("Session Memory", or_none(memory), 1)
        .with_stages(catalogue)
        .with_base("Which stage should run next?")
        .build()
}

pub fn step_judge_prompt(stage_name: &str, attempt_context: &str, result_text: &str) -> String {
    PromptBuilder::new()
        .with_base(&format!("Step: {stage_name}"))
        .with_section("Context", attempt_context, 1)
        .with_section("Agent Result", or_none(result_text), 2)
        .build()
}

pub fn session_judge_prompt(memory: &str, artifact_count: usize, round_context: &str) -> String {
    PromptBuilder::new()
        .with_base(&format!("Artifacts produced so far: {artifact_count}"))
        .with_section("Session Memory", or_none(memory), 1)
        .with_section("Stage Outputs", or_none(round_context), 2)
        .build()
}

pub fn summarizer_prompt(memory: &str, stage_name: &str, result_text: &str, limit: usize) -> String {
    PromptBuilder::new()
        .with_base(&format!(
            "Update the memory with the result of \"{stage_name}\". Keep it under {limit} characters."
        ))
        .with_section("Current Memory", or_none(memory), 1)
        .with_section("Latest Result", or_none(result_text), 2)
        .build()
}

pub fn verifier_prompt(question: &str, result_text: &str) -> String {
    PromptBuilder::new()
        .with_section("Question", question, 1)
        .with_section("Computed Result", or_none(result_text), 2)
        .build()
}

pub fn code_prompt(request: &CodeRequest, capabilities: &str) -> String {
    let prior = request.prior_error.as_deref().unwrap_or_default();
    PromptBuilder::new()
        .with_section("Question", &request.question, 1)
        .with_section("Dataset", &request.schema, 2)
        .with_section("Capabilities", capabilities, 3)
        .with_section("Previous Attempt Failed", prior, 4)
        .with_section("Context", &request.context, 5)
        .build()
}

pub fn chat_prompt(
    question: &str,
    history: &[ChatTurn],
    tool_catalogue: &str,
    schema: &str,
) -> String {
    PromptBuilder::new()
        .with_section("Dataset", schema, 1)
        .with_section("Tools", tool_catalogue, 2)
        .with_history(history)
        .with_section("Question", question, 5)
        .build()
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}
