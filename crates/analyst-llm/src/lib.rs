//! Model-backed collaborators for the analyst pipeline.
//!
//! Provides `CliModel` (a `TextModel` over the `claude`, `codex` and `gemini`
//! command-line tools), lenient JSON extraction for model replies, prompt
//! templates, and `LlmCollaborator`, which implements every collaborator
//! trait on top of any `TextModel`.

mod cli;
mod collaborator;
pub mod json;
pub mod prompts;

pub use cli::{CliModel, CliProvider};
pub use collaborator::{
    parse_chat_decision, parse_generated_code, parse_planner_decision, parse_session_verdict,
    parse_step_verdict, parse_verification, LlmCollaborator,
};
pub use json::{extract_code_block, extract_json, extract_object};
pub use prompts::PromptBuilder;
