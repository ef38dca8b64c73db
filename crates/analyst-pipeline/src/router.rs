//! Post-session question answering.
//!
//! Each question is planned into a direct answer, a verified tool call, or a
//! generated sandbox snippet that runs only after explicit confirmation.

use std::sync::Arc;

use analyst_sandbox::SandboxExecutor;
use analyst_tools::{truncate_output, ToolRegistry, TruncationMode};
use analyst_types::{
    ChatDecision, ChatPlanner, ChatSettings, ChatTurn, CodeGenerator, CodeRequest, Dataset,
    Result, Validity, VerificationReport, Verifier,
};
use serde_json::Value;

use crate::interviewer::{confirm, Interviewer, Question};
use crate::store::SessionStore;

pub const APOLOGY: &str = "I could not compute a reliable answer to this question from the dataset. \
Try rephrasing it or asking about a specific column.";

pub const CANCELLED: &str = "Code execution was not approved, so the question was left unanswered.";

/// The collaborators the router consults.
#[derive(Clone)]
pub struct ChatCollaborators {
    pub planner: Arc<dyn ChatPlanner>,
    pub verifier: Arc<dyn Verifier>,
    pub coder: Arc<dyn CodeGenerator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    Direct,
    Tool,
    Code,
    Cancelled,
    Apology,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatAnswer {
    pub text: String,
    pub source: AnswerSource,
    /// Set when verification judged the result only partially correct.
    pub caveat: Option<String>,
}

impl ChatAnswer {
    fn new(text: impl Into<String>, source: AnswerSource) -> Self {
        Self {
            text: text.into(),
            source,
            caveat: None,
        }
    }

    fn with_caveat(mut self, caveat: Option<String>) -> Self {
        self.caveat = caveat;
        self
    }

    /// Text shown to the user, caveat included.
    pub fn display(&self) -> String {
        match &self.caveat {
            Some(c) => format!("{}\n\nNote: {c}", self.text),
            None => self.text.clone(),
        }
    }
}

pub struct InteractiveRouter {
    tools: ToolRegistry,
    sandbox: SandboxExecutor,
    collab: ChatCollaborators,
    interviewer: Arc<dyn Interviewer>,
    settings: ChatSettings,
    history: Vec<ChatTurn>,
    store: Option<SessionStore>,
}

impl InteractiveRouter {
    pub fn new(
        tools: ToolRegistry,
        sandbox: SandboxExecutor,
        collab: ChatCollaborators,
        interviewer: Arc<dyn Interviewer>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            tools,
            sandbox,
            collab,
            interviewer,
            settings,
            history: Vec::new(),
            store: None,
        }
    }

    /// Append every exchanged turn to the store's chat log.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Reload the persisted transcript from the attached store.
    pub async fn load_history(&mut self) -> Result<()> {
        if let Some(store) = &self.store {
            self.history = store.load_chat_history().await?;
        }
        Ok(())
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Answer one question against `dataset`.
    ///
    /// Collaborator failures degrade to the next strategy; only chat-log
    /// persistence errors are returned.
    pub async fn ask(&mut self, question: &str, dataset: &Dataset) -> Result<ChatAnswer> {
        let answer = self.route(question, dataset).await;
        self.record(ChatTurn::user(question)).await?;
        self.record(ChatTurn::assistant(answer.display())).await?;
        Ok(answer)
    }

    async fn route(&self, question: &str, dataset: &Dataset) -> ChatAnswer {
        let schema = dataset.schema_description();
        let window = self.history.len().saturating_sub(self.settings.history_window);
        let decision = self
            .collab
            .planner
            .plan_answer(question, &self.history[window..], &self.tools.describe(), &schema)
            .await;

        let context = match decision {
            Ok(ChatDecision::Answer { text }) => {
                tracing::info!("Answering directly");
                return ChatAnswer::new(text, AnswerSource::Direct);
            }
            Ok(ChatDecision::ToolCall { tool, args, thought }) => {
                tracing::info!(tool = %tool, thought = %thought, "Answering with a tool");
                match self.try_tool(question, &tool, &args, dataset).await {
                    Ok(answer) => return answer,
                    Err(context) => context,
                }
            }
            Ok(ChatDecision::NeedsCode { reason }) => {
                tracing::info!(reason = %reason, "Planner asked for code");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat planner failed, falling back to code");
                String::new()
            }
        };
        self.answer_with_code(question, &schema, context, dataset).await
    }

    /// Run a tool and verify its result. `Err` carries context for the code
    /// fallback.
    async fn try_tool(
        &self,
        question: &str,
        tool: &str,
        args: &Value,
        dataset: &Dataset,
    ) -> std::result::Result<ChatAnswer, String> {
        let value = match self.tools.execute(tool, args, dataset) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "Tool failed, falling back to code");
                return Err(format!("The tool `{tool}` failed: {e}"));
            }
        };
        let text = truncate_output(
            &render_value(&value),
            self.sandbox.settings().max_output_chars,
            TruncationMode::Head,
        );
        let report = self.verify(question, &text).await;
        match report.validity {
            Validity::Valid => Ok(ChatAnswer::new(text, AnswerSource::Tool)),
            Validity::Partial => {
                Ok(ChatAnswer::new(text, AnswerSource::Tool).with_caveat(Some(report.critique)))
            }
            Validity::Invalid => {
                tracing::warn!(tool = %tool, critique = %report.critique, "Tool result rejected, falling back to code");
                Err(format!(
                    "The tool `{tool}` returned:\n{text}\nIt was rejected: {}",
                    report.critique
                ))
            }
        }
    }

    async fn answer_with_code(
        &self,
        question: &str,
        schema: &str,
        mut context: String,
        dataset: &Dataset,
    ) -> ChatAnswer {
        let attempts = self.settings.max_code_attempts.max(1);
        let mut prior_error: Option<String> = None;

        for attempt in 1..=attempts {
            let request = CodeRequest {
                question: question.to_string(),
                schema: schema.to_string(),
                prior_error: prior_error.take(),
                context: context.clone(),
            };
            let generated = match self.collab.coder.generate(&request).await {
                Ok(g) => g,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Code generation failed");
                    prior_error = Some(e.to_string());
                    continue;
                }
            };

            if let Err(issue) = self.sandbox.validate(&generated.code) {
                tracing::warn!(attempt, issue = %issue, "Generated code does not parse");
                prior_error = Some(format!("SyntaxError: {issue}"));
                continue;
            }

            let prompt = Question::new("Run this code? [y/N]").with_detail(generated.code.clone());
            if !confirm(self.interviewer.as_ref(), &prompt).await {
                tracing::info!(attempt, "Code execution declined");
                return ChatAnswer::new(CANCELLED, AnswerSource::Cancelled);
            }

            let output = match self.sandbox.execute(&generated.code, dataset).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Generated code failed");
                    prior_error = Some(e.to_string());
                    continue;
                }
            };

            let report = self.verify(question, &output.text).await;
            match report.validity {
                Validity::Valid => return ChatAnswer::new(output.text, AnswerSource::Code),
                Validity::Partial => {
                    return ChatAnswer::new(output.text, AnswerSource::Code)
                        .with_caveat(Some(report.critique))
                }
                Validity::Invalid => {
                    tracing::warn!(attempt, critique = %report.critique, "Code result rejected");
                    context.push_str(&format!(
                        "\nAttempt {attempt} returned:\n{}\nIt was rejected: {} {}",
                        output.text, report.critique, report.suggestion
                    ));
                }
            }
        }

        tracing::warn!(attempts, "No reliable answer after all code attempts");
        ChatAnswer::new(APOLOGY, AnswerSource::Apology)
    }

    async fn verify(&self, question: &str, text: &str) -> VerificationReport {
        match self.collab.verifier.check_result(question, text).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Verifier failed, treating result as partial");
                VerificationReport {
                    validity: Validity::Partial,
                    critique: "This result could not be verified.".into(),
                    suggestion: String::new(),
                }
            }
        }
    }

    async fn record(&mut self, turn: ChatTurn) -> Result<()> {
        if let Some(store) = &self.store {
            store.append_chat(&turn).await?;
        }
        self.history.push(turn);
        Ok(())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interviewer::{Answer, AutoApproveInterviewer, RecordingInterviewer};
    use analyst_tools::default_registry;
    use analyst_types::{AnalystError, GeneratedCode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedPlanner(ChatDecision);

    #[async_trait]
    impl ChatPlanner for FixedPlanner {
        async fn plan_answer(&self, _: &str, _: &[ChatTurn], _: &str, _: &str) -> Result<ChatDecision> {
            Ok(self.0.clone())
        }
    }

    struct WindowPlanner(Mutex<Vec<usize>>);

    #[async_trait]
    impl ChatPlanner for WindowPlanner {
        async fn plan_answer(&self, _: &str, history: &[ChatTurn], _: &str, _: &str) -> Result<ChatDecision> {
            self.0.lock().unwrap().push(history.len());
            Ok(ChatDecision::Answer { text: "ok".into() })
        }
    }

    struct FixedVerifier(Validity);

    #[async_trait]
    impl Verifier for FixedVerifier {
        async fn check_result(&self, _: &str, _: &str) -> Result<VerificationReport> {
            Ok(VerificationReport {
                validity: self.0,
                critique: "looks off".into(),
                suggestion: "count distinct cases".into(),
            })
        }
    }

    /// Invalid for tool output, valid for everything else.
    struct RejectToolVerifier;

    #[async_trait]
    impl Verifier for RejectToolVerifier {
        async fn check_result(&self, _: &str, text: &str) -> Result<VerificationReport> {
            if text.contains("unique_cases") {
                Ok(VerificationReport {
                    validity: Validity::Invalid,
                    critique: "wrong tool".into(),
                    suggestion: String::new(),
                })
            } else {
                Ok(VerificationReport::valid())
            }
        }
    }

    struct BrokenVerifier;

    #[async_trait]
    impl Verifier for BrokenVerifier {
        async fn check_result(&self, _: &str, _: &str) -> Result<VerificationReport> {
            Err(AnalystError::Other("offline".into()))
        }
    }

    /// Plays back snippets and records the requests it was given.
    struct ScriptedCoder {
        snippets: Mutex<Vec<&'static str>>,
        requests: Mutex<Vec<CodeRequest>>,
    }

    impl ScriptedCoder {
        fn new(snippets: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                snippets: Mutex::new(snippets.iter().rev().copied().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CodeGenerator for ScriptedCoder {
        async fn generate(&self, request: &CodeRequest) -> Result<GeneratedCode> {
            self.requests.lock().unwrap().push(request.clone());
            let code = self.snippets.lock().unwrap().pop().unwrap_or("result = 0;");
            Ok(GeneratedCode {
                thought: "scripted".into(),
                code: code.into(),
            })
        }
    }

    fn dataset() -> Dataset {
        Dataset::from_csv_str("case_id,activity\n1,A\n1,B\n2,A\n").unwrap()
    }

    fn tool_call() -> ChatDecision {
        ChatDecision::ToolCall {
            tool: "count_cases_and_activities".into(),
            args: json!({"case_col": "case_id", "activity_col": "activity"}),
            thought: "counting".into(),
        }
    }

    fn router(
        decision: ChatDecision,
        verifier: Arc<dyn Verifier>,
        coder: Arc<ScriptedCoder>,
        interviewer: Arc<dyn Interviewer>,
    ) -> InteractiveRouter {
        InteractiveRouter::new(
            default_registry(),
            SandboxExecutor::default(),
            ChatCollaborators {
                planner: Arc::new(FixedPlanner(decision)),
                verifier,
                coder,
            },
            interviewer,
            ChatSettings::default(),
        )
    }

    #[tokio::test]
    async fn verified_tool_result_is_returned() {
        let mut r = router(tool_call(), Arc::new(FixedVerifier(Validity::Valid)), ScriptedCoder::new(&[]), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("How many cases?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Tool);
        assert!(answer.text.contains("\"unique_cases\": 2"));
        assert!(answer.caveat.is_none());
        assert_eq!(r.history().len(), 2);
    }

    #[tokio::test]
    async fn partial_tool_result_carries_caveat() {
        let mut r = router(tool_call(), Arc::new(FixedVerifier(Validity::Partial)), ScriptedCoder::new(&[]), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("How many cases?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Tool);
        assert_eq!(answer.caveat.as_deref(), Some("looks off"));
        assert!(answer.display().ends_with("Note: looks off"));
    }

    #[tokio::test]
    async fn unverifiable_tool_result_is_partial() {
        let mut r = router(tool_call(), Arc::new(BrokenVerifier), ScriptedCoder::new(&[]), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("How many cases?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Tool);
        assert!(answer.caveat.unwrap().contains("could not be verified"));
    }

    #[tokio::test]
    async fn rejected_tool_falls_back_to_confirmed_code() {
        let coder = ScriptedCoder::new(&["result = df.len();"]);
        let interviewer = Arc::new(RecordingInterviewer::new(vec![Answer::text("y")]));
        let mut r = router(tool_call(), Arc::new(RejectToolVerifier), coder.clone(), interviewer.clone());
        let answer = r.ask("How many rows?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Code);
        assert_eq!(answer.text, "3");
        let requests = coder.requests.lock().unwrap();
        assert!(requests[0].context.contains("wrong tool"));
        assert_eq!(interviewer.questions()[0].detail.as_deref(), Some("result = df.len();"));
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_to_code() {
        let decision = ChatDecision::ToolCall {
            tool: "forecast".into(),
            args: json!({}),
            thought: String::new(),
        };
        let coder = ScriptedCoder::new(&["result = 7;"]);
        let mut r = router(decision, Arc::new(FixedVerifier(Validity::Valid)), coder.clone(), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("Forecast?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Code);
        assert!(coder.requests.lock().unwrap()[0].context.contains("forecast"));
    }

    #[tokio::test]
    async fn declined_or_silent_confirmation_cancels() {
        for reply in [Answer::text("no"), Answer::none(), Answer::text("")] {
            let decision = ChatDecision::NeedsCode { reason: "complex".into() };
            let mut r = router(
                decision,
                Arc::new(FixedVerifier(Validity::Valid)),
                ScriptedCoder::new(&["result = 1;"]),
                Arc::new(RecordingInterviewer::new(vec![reply])),
            );
            let answer = r.ask("Anything?", &dataset()).await.unwrap();
            assert_eq!(answer.source, AnswerSource::Cancelled);
            assert_eq!(answer.text, CANCELLED);
        }
    }

    #[tokio::test]
    async fn syntax_errors_are_fed_back() {
        let coder = ScriptedCoder::new(&["result = (1 +;", "result = 2;"]);
        let decision = ChatDecision::NeedsCode { reason: "complex".into() };
        let mut r = router(decision, Arc::new(FixedVerifier(Validity::Valid)), coder.clone(), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("Two?", &dataset()).await.unwrap();
        assert_eq!(answer.text, "2");
        let requests = coder.requests.lock().unwrap();
        assert!(requests[0].prior_error.is_none());
        assert!(requests[1].prior_error.as_deref().unwrap().starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn apologises_after_all_attempts() {
        let coder = ScriptedCoder::new(&["let x = 1;", "let y = 2;", "let z = 3;"]);
        let decision = ChatDecision::NeedsCode { reason: "complex".into() };
        let mut r = router(decision, Arc::new(FixedVerifier(Validity::Valid)), coder.clone(), Arc::new(AutoApproveInterviewer));
        let answer = r.ask("Anything?", &dataset()).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Apology);
        assert_eq!(coder.requests.lock().unwrap().len(), 3);
        assert!(coder.requests.lock().unwrap()[2].prior_error.as_deref().unwrap().contains("result"));
    }

    #[tokio::test]
    async fn history_is_windowed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::create(dir.path()).await.unwrap();
        let planner = Arc::new(WindowPlanner(Mutex::new(Vec::new())));
        let mut r = InteractiveRouter::new(
            default_registry(),
            SandboxExecutor::default(),
            ChatCollaborators {
                planner: planner.clone(),
                verifier: Arc::new(FixedVerifier(Validity::Valid)),
                coder: ScriptedCoder::new(&[]),
            },
            Arc::new(AutoApproveInterviewer),
            ChatSettings {
                history_window: 3,
                ..ChatSettings::default()
            },
        )
        .with_store(store.clone());

        for q in ["a", "b", "c"] {
            r.ask(q, &dataset()).await.unwrap();
        }
        assert_eq!(*planner.0.lock().unwrap(), vec![0, 2, 3]);
        assert_eq!(store.load_chat_history().await.unwrap().len(), 6);
    }
}
