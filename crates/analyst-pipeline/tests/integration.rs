//! End-to-end tests for whole analysis sessions and the chat router.
//!
//! Sessions run the built-in stages over a small order log, with the model
//! collaborators played by a scripted model that answers per role.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use analyst_llm::{prompts, LlmCollaborator};
use analyst_pipeline::stages::{CHARTS_FILE, REPORT_FILE};
use analyst_pipeline::store::{CHAT_FILE, CHECKPOINT_FILE, DATASET_FILE, KNOWLEDGE_FILE, MEMORY_FILE};
use analyst_pipeline::{
    default_registry, AnswerSource, Artifacts, AutoApproveInterviewer, ChatCollaborators,
    Collaborators, EventEmitter, FinishReason, InteractiveRouter, RecordingInterviewer,
    SessionCheckpoint, SessionController, SessionEvent, SessionStore, StageKind, Answer,
};
use analyst_sandbox::SandboxExecutor;
use analyst_types::{
    AnalystError, ChatSettings, Dataset, Judge, Result, SessionSettings, SessionVerdict,
    StepVerdict, TextModel,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ORDER_LOG: &str = "case_id,activity,timestamp,amount
1,Create,2024-01-01 10:00:00,100
1,Approve,2024-01-01 12:00:00,100
1,Pay,2024-01-02 10:00:00,100
2,Create,2024-01-02 09:00:00,250
2,Approve,2024-01-02 09:30:00,
2,Pay,2024-01-02 11:30:00,250
2,Pay,2024-01-02 11:30:00,250
3,Create,2024-01-03 08:00:00,40
3,Check,2024-01-03 08:10:00,40
3,Check,2024-01-03 09:10:00,40
3,Approve,2024-01-03 10:00:00,40
,Pay,2024-01-03 11:00:00,40
";

fn order_log() -> Dataset {
    Dataset::from_csv_str(ORDER_LOG).unwrap()
}

/// A model that answers by role: each scripted system prompt has its own
/// reply queue and returns an empty reply once drained. Unscripted roles
/// always get `fallback`.
struct RoleModel {
    replies: Mutex<HashMap<&'static str, VecDeque<String>>>,
    fallback: String,
    calls: Mutex<Vec<String>>,
}

impl RoleModel {
    fn new(fallback: &str) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            fallback: fallback.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(self, system: &'static str, replies: &[&str]) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(system, replies.iter().map(|r| r.to_string()).collect());
        self
    }

    fn calls_to(&self, system: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == system).count()
    }
}

#[async_trait]
impl TextModel for RoleModel {
    fn name(&self) -> &str {
        "role-model"
    }

    async fn complete(&self, system: &str, _prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(system.to_string());
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(system) {
            Some(queue) => Ok(queue.pop_front().unwrap_or_default()),
            None => Ok(self.fallback.clone()),
        }
    }
}

fn plan(stage: &str) -> String {
    format!(r#"{{"thought": "next", "stage": "{stage}"}}"#)
}

fn full_plan() -> Vec<String> {
    [
        "Data Profiling",
        "Data Cleaning",
        "Visualization",
        "Process Discovery",
        "Process Analysis",
        "Reporting",
        "Finish",
    ]
    .iter()
    .map(|s| plan(s))
    .collect()
}

fn collaborators(model: Arc<RoleModel>) -> Collaborators {
    let llm = Arc::new(LlmCollaborator::new(model));
    Collaborators {
        planner: llm.clone(),
        judge: llm.clone(),
        summarizer: llm,
    }
}

fn as_refs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_session_produces_report_and_persists_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::create(dir.path()).await.unwrap();
    let plan = full_plan();
    let model = Arc::new(
        RoleModel::new(r#"{"passed": true, "critique": "fine", "score": 8}"#)
            .script(prompts::PLANNER_SYSTEM, &as_refs(&plan))
            .script(prompts::SUMMARIZER_SYSTEM, &[]),
    );
    let controller = SessionController::new(SessionSettings::default(), default_registry(), collaborators(model))
        .with_store(store.clone());

    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.reason, FinishReason::Planner);
    assert_eq!(out.rounds, 6);
    assert_eq!(out.restarts, 0);
    assert_eq!(out.artifacts.len(), 6);
    // Cleaning removed the duplicate and the case-less row.
    assert_eq!(out.dataset.height(), 10);

    for file in [MEMORY_FILE, DATASET_FILE, CHECKPOINT_FILE, KNOWLEDGE_FILE, REPORT_FILE, CHARTS_FILE] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }
    let report = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
    assert!(report.contains("```mermaid"));
    let knowledge = std::fs::read_to_string(dir.path().join(KNOWLEDGE_FILE)).unwrap();
    assert!(knowledge.contains("## Data Profiling"));
    assert!(knowledge.contains("## Reporting"));
    assert_eq!(store.load_dataset().await.unwrap().height(), 10);
    assert_eq!(store.load_original().await.unwrap().height(), 12);
    assert!(store.load_checkpoint().await.unwrap().unwrap().finished);
}

#[tokio::test]
async fn garbage_judge_output_still_terminates() {
    let plan = full_plan();
    let model = Arc::new(
        RoleModel::new("I am not sure, it looks reasonable I guess.")
            .script(prompts::PLANNER_SYSTEM, &as_refs(&plan)),
    );
    let controller =
        SessionController::new(SessionSettings::default(), default_registry(), collaborators(model.clone()));

    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.reason, FinishReason::Planner);
    assert_eq!(out.restarts, 0);
    // Each stage is judged exactly once: unreadable verdicts accept the attempt.
    assert_eq!(model.calls_to(prompts::STEP_JUDGE_SYSTEM), 6);
    assert!(out.artifacts.contains(StageKind::Reporting));
}

/// Step verdicts pass; the first session verdict fails. Records how many
/// artifacts each session verdict saw.
struct RejectOnce {
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl Judge for RejectOnce {
    async fn evaluate_step(&self, _: &str, _: &str, _: &str) -> Result<StepVerdict> {
        Ok(StepVerdict::pass("ok", 9.0))
    }

    async fn evaluate_session(&self, _: &str, artifact_count: usize, _: &str) -> Result<SessionVerdict> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(artifact_count);
        if seen.len() == 1 {
            Ok(SessionVerdict::fail("the cleaning removed too much"))
        } else {
            Ok(SessionVerdict::pass("fine"))
        }
    }
}

#[tokio::test]
async fn cumulative_rejection_restarts_once_with_fresh_state() {
    let plan: Vec<String> = ["Data Cleaning", "Data Profiling", "Finish"].iter().map(|s| plan(s)).collect();
    let model = Arc::new(RoleModel::new("").script(prompts::PLANNER_SYSTEM, &as_refs(&plan)));
    let llm = Arc::new(LlmCollaborator::new(model));
    let judge = Arc::new(RejectOnce { seen: Mutex::new(Vec::new()) });
    let settings = SessionSettings {
        max_restarts: 1,
        ..SessionSettings::default()
    };
    let events = EventEmitter::new(256);
    let mut rx = events.subscribe();
    let controller = SessionController::new(
        settings,
        default_registry(),
        Collaborators {
            planner: llm.clone(),
            judge: judge.clone(),
            summarizer: llm,
        },
    )
    .with_events(events);

    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.restarts, 1);
    assert_eq!(out.rounds, 2);
    // Round two started from no artifacts and the original data.
    assert_eq!(*judge.seen.lock().unwrap(), vec![1, 1]);
    assert!(!out.artifacts.contains(StageKind::Cleaning));
    assert_eq!(out.dataset.height(), 12);

    let restarts = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::SessionRestarted { .. }))
        .count();
    assert_eq!(restarts, 1);
}

#[tokio::test]
async fn restarts_never_exceed_budget() {
    let plan: Vec<String> = std::iter::repeat(plan("Data Profiling")).take(20).collect();
    let model = Arc::new(
        RoleModel::new(r#"{"passed": false, "critique": "unconvincing"}"#)
            .script(prompts::PLANNER_SYSTEM, &as_refs(&plan)),
    );
    // Step verdicts get the same rejecting reply, so keep attempts low.
    let settings = SessionSettings {
        max_restarts: 2,
        max_stage_attempts: 2,
        ..SessionSettings::default()
    };
    let controller = SessionController::new(settings, default_registry(), collaborators(model));

    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.restarts, 2);
    assert_eq!(out.reason, FinishReason::RestartsExhausted);
    assert!(!out.passed());
    assert!(out.artifacts.contains(StageKind::Profiling));
}

#[tokio::test]
async fn unknown_and_premature_stages_are_reported_not_fatal() {
    let plan: Vec<String> = ["Forecasting", "Process Analysis", "Finish"].iter().map(|s| plan(s)).collect();
    let model = Arc::new(
        RoleModel::new(r#"{"passed": true}"#)
            .script(prompts::PLANNER_SYSTEM, &as_refs(&plan))
            .script(prompts::SUMMARIZER_SYSTEM, &[]),
    );
    let controller = SessionController::new(SessionSettings::default(), default_registry(), collaborators(model));

    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.rounds, 2);
    assert!(out.artifacts.is_empty());
    assert!(out.memory.contains("Unknown tool 'Forecasting'"));
    assert!(out.memory.contains("requires 'Process Discovery'"));
}

#[tokio::test]
async fn step_limit_finishes_session() {
    let plan: Vec<String> = std::iter::repeat(plan("Data Profiling")).take(10).collect();
    let model = Arc::new(RoleModel::new(r#"{"passed": true}"#).script(prompts::PLANNER_SYSTEM, &as_refs(&plan)));
    let settings = SessionSettings {
        max_steps: 3,
        ..SessionSettings::default()
    };
    let controller = SessionController::new(settings, default_registry(), collaborators(model));
    let out = controller.run(order_log()).await.unwrap();
    assert_eq!(out.reason, FinishReason::StepLimit);
    assert_eq!(out.rounds, 3);
}

async fn seed_interrupted_session(dir: &Path) -> SessionStore {
    let store = SessionStore::create(dir).await.unwrap();
    let data = order_log();
    store.save_original(&data).await.unwrap();
    store.save_dataset(&data).await.unwrap();
    store.save_memory("[Data Profiling] 12 rows, event log ready").await.unwrap();
    let mut artifacts = Artifacts::new();
    artifacts.insert(StageKind::Profiling, serde_json::json!({"row_count": 12}));
    store
        .save_checkpoint(&SessionCheckpoint::new(1, 0, artifacts, false))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn resume_continues_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = seed_interrupted_session(dir.path()).await;

    let plan: Vec<String> = ["Process Discovery", "Process Analysis", "Finish"].iter().map(|s| plan(s)).collect();
    let model = Arc::new(RoleModel::new(r#"{"passed": true}"#).script(prompts::PLANNER_SYSTEM, &as_refs(&plan)));
    let controller = SessionController::new(SessionSettings::default(), default_registry(), collaborators(model))
        .with_store(store.clone());

    let out = controller.resume().await.unwrap();
    assert_eq!(out.rounds, 3);
    for kind in [StageKind::Profiling, StageKind::Discovery, StageKind::Analysis] {
        assert!(out.artifacts.contains(kind), "{kind} missing");
    }
    assert!(store.load_checkpoint().await.unwrap().unwrap().finished);

    // A finished session resumes to its stored outcome.
    let again = controller.resume().await.unwrap();
    assert_eq!(again.reason, FinishReason::AlreadyFinished);
    assert_eq!(again.artifacts.len(), 3);
}

#[tokio::test]
async fn missing_session_directory_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let err = SessionStore::open(dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, AnalystError::Persistence { .. }));
}

// ---------------------------------------------------------------------------
// Chat router
// ---------------------------------------------------------------------------

fn chat_router(model: Arc<RoleModel>, interviewer: Arc<dyn analyst_pipeline::Interviewer>) -> InteractiveRouter {
    let llm = Arc::new(LlmCollaborator::new(model).with_capabilities(analyst_sandbox::CAPABILITIES));
    InteractiveRouter::new(
        analyst_tools::default_registry(),
        SandboxExecutor::default(),
        ChatCollaborators {
            planner: llm.clone(),
            verifier: llm.clone(),
            coder: llm,
        },
        interviewer,
        ChatSettings::default(),
    )
}

#[tokio::test]
async fn chat_answers_with_verified_tool() {
    let model = Arc::new(
        RoleModel::new("")
            .script(
                prompts::CHAT_SYSTEM,
                &[r#"{"action": "tool", "tool": "count_cases_and_activities", "args": {"case_col": "case_id", "activity_col": "activity"}}"#],
            )
            .script(prompts::VERIFIER_SYSTEM, &[r#"{"is_valid": true}"#]),
    );
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::create(dir.path()).await.unwrap();
    let mut router = chat_router(model, Arc::new(AutoApproveInterviewer)).with_store(store);

    let answer = router.ask("How many cases are there?", &order_log()).await.unwrap();
    assert_eq!(answer.source, AnswerSource::Tool);
    assert!(answer.text.contains("\"unique_cases\": 3"));
    assert!(dir.path().join(CHAT_FILE).exists());
}

#[tokio::test]
async fn chat_falls_back_to_confirmed_code() {
    let model = Arc::new(
        RoleModel::new("")
            .script(prompts::CHAT_SYSTEM, &[r#"{"action": "tool", "tool": "get_value_counts", "args": {"column": "activity"}}"#])
            .script(
                prompts::VERIFIER_SYSTEM,
                &[
                    r#"{"is_valid": false, "critique": "counts events, not cases"}"#,
                    r#"{"is_valid": "partial", "critique": "includes the case-less row"}"#,
                ],
            )
            .script(prompts::CODE_SYSTEM, &["```rhai\nresult = df.nunique(\"case_id\");\n```"]),
    );
    let interviewer = Arc::new(RecordingInterviewer::new(vec![Answer::text("yes")]));
    let mut router = chat_router(model, interviewer.clone());

    let answer = router.ask("How many distinct cases?", &order_log()).await.unwrap();
    assert_eq!(answer.source, AnswerSource::Code);
    assert_eq!(answer.caveat.as_deref(), Some("includes the case-less row"));
    assert_eq!(interviewer.questions().len(), 1);
}

#[tokio::test]
async fn chat_without_confirmation_never_executes() {
    let model = Arc::new(
        RoleModel::new("")
            .script(prompts::CHAT_SYSTEM, &[r#"{"action": "code", "reason": "needs grouping"}"#])
            .script(prompts::CODE_SYSTEM, &[r#"{"code": "result = df.len();"}"#]),
    );
    // No scripted answer: the interviewer reports end of input.
    let mut router = chat_router(model.clone(), Arc::new(RecordingInterviewer::new(Vec::new())));
    let answer = router.ask("Group it", &order_log()).await.unwrap();
    assert_eq!(answer.source, AnswerSource::Cancelled);
    assert_eq!(model.calls_to(prompts::VERIFIER_SYSTEM), 0);
}

#[tokio::test]
async fn chat_apologises_when_code_keeps_failing() {
    let model = Arc::new(
        RoleModel::new("")
            .script(prompts::CHAT_SYSTEM, &["no idea"])
            .script(
                prompts::CODE_SYSTEM,
                &[
                    r#"{"code": "result = df.missing_method();"}"#,
                    r#"{"code": "let x = 1;"}"#,
                    r#"{"code": "result = (1 +"}"#,
                ],
            ),
    );
    let mut router = chat_router(model.clone(), Arc::new(AutoApproveInterviewer));
    let answer = router.ask("Something hard", &order_log()).await.unwrap();
    assert_eq!(answer.source, AnswerSource::Apology);
    assert_eq!(model.calls_to(prompts::CODE_SYSTEM), 3);
    assert_eq!(router.history().len(), 2);
}
