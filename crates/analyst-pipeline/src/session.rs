//! Session controller: the planning round loop with memory compaction,
//! cumulative judging and bounded restarts.
//!
//! Each round moves through `Planning -> Dispatching -> MemoryUpdate ->
//! CumulativeEvaluation` and then continues, restarts or finishes. Stage,
//! planner and judge failures are absorbed into the memory channel; only
//! persistence failures abort a run.

use std::path::PathBuf;
use std::sync::Arc;

use analyst_tools::{truncate_output, TruncationMode};
use analyst_types::{
    AnalystError, Dataset, Judge, Planner, PlannerDecision, Result, SessionSettings,
    SessionVerdict, StageInfo, Summarizer, TextModel,
};
use serde::{Deserialize, Serialize};

use crate::events::{EventEmitter, SessionEvent};
use crate::stage::{Artifacts, StageContext, StageRegistry};
use crate::step::StepExecutor;
use crate::store::{SessionCheckpoint, SessionStore};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The external collaborators a session is driven by.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub judge: Arc<dyn Judge>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Why the round loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The planner chose `Finish`.
    Planner,
    /// The round limit was reached; counts as a pass.
    StepLimit,
    /// The cumulative judge rejected the session with no restarts left.
    RestartsExhausted,
    /// Resumed a session whose checkpoint was already final.
    AlreadyFinished,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Planner => "planner finished",
            FinishReason::StepLimit => "step limit reached",
            FinishReason::RestartsExhausted => "restart budget exhausted",
            FinishReason::AlreadyFinished => "already finished",
        };
        f.write_str(s)
    }
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub memory: String,
    pub artifacts: Artifacts,
    /// The authoritative working dataset at the end of the session.
    pub dataset: Dataset,
    /// Rounds executed across all session attempts.
    pub rounds: usize,
    pub restarts: usize,
    pub reason: FinishReason,
    pub last_verdict: Option<SessionVerdict>,
}

impl SessionOutcome {
    /// Graceful degradation still produces an outcome; this says whether the
    /// final cumulative verdict was acceptable.
    pub fn passed(&self) -> bool {
        self.reason != FinishReason::RestartsExhausted
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Phase {
    Planning,
    Dispatching(PlannerDecision),
    MemoryUpdate { stage: String, text: String },
    CumulativeEvaluation,
    Restart(String),
    Finish(FinishReason),
}

struct SessionState {
    original: Dataset,
    working: Dataset,
    memory: String,
    artifacts: Artifacts,
    /// Rounds in the current attempt; reset by a restart.
    round: usize,
    total_rounds: usize,
    restarts: usize,
    /// Raw stage outputs of the current attempt, oldest first.
    outputs: Vec<String>,
    last_verdict: Option<SessionVerdict>,
}

impl SessionState {
    fn new(dataset: Dataset) -> Self {
        Self {
            original: dataset.clone(),
            working: dataset,
            memory: String::new(),
            artifacts: Artifacts::new(),
            round: 0,
            total_rounds: 0,
            restarts: 0,
            outputs: Vec::new(),
            last_verdict: None,
        }
    }

    fn into_outcome(self, reason: FinishReason) -> SessionOutcome {
        SessionOutcome {
            memory: self.memory,
            artifacts: self.artifacts,
            dataset: self.working,
            rounds: self.total_rounds,
            restarts: self.restarts,
            reason,
            last_verdict: self.last_verdict,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

pub struct SessionController {
    settings: SessionSettings,
    stages: StageRegistry,
    collab: Collaborators,
    store: Option<SessionStore>,
    events: EventEmitter,
    model: Option<Arc<dyn TextModel>>,
    output_dir: Option<PathBuf>,
}

impl SessionController {
    pub fn new(settings: SessionSettings, stages: StageRegistry, collab: Collaborators) -> Self {
        Self {
            settings,
            stages,
            collab,
            store: None,
            events: EventEmitter::default(),
            model: None,
            output_dir: None,
        }
    }

    /// Persist memory, snapshots and checkpoints after every round.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        if self.output_dir.is_none() {
            self.output_dir = Some(store.dir().to_path_buf());
        }
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Model handed to stages for interpretation and planning.
    pub fn with_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn store(&self) -> Option<&SessionStore> {
        self.store.as_ref()
    }

    /// Run a fresh session over `dataset`.
    pub async fn run(&self, dataset: Dataset) -> Result<SessionOutcome> {
        if let Some(store) = &self.store {
            store.save_original(&dataset).await?;
            store.save_dataset(&dataset).await?;
            store.save_memory("").await?;
        }
        let state = SessionState::new(dataset);
        self.checkpoint(&state, false).await?;
        self.drive(state).await
    }

    /// Continue an interrupted session from its store.
    pub async fn resume(&self) -> Result<SessionOutcome> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AnalystError::Config("resuming a session needs a session store".into()))?;

        let mut state = SessionState::new(store.load_original().await?);
        state.working = store.load_dataset().await?;
        state.memory = store.load_memory().await?;
        if let Some(cp) = store.load_checkpoint().await? {
            state.round = cp.round;
            state.total_rounds = cp.total_rounds.max(cp.round);
            state.restarts = cp.restarts;
            state.artifacts = cp.artifacts;
            state.outputs = cp.outputs;
            if cp.finished {
                tracing::info!(dir = %store.dir().display(), "Session already finished, nothing to resume");
                return Ok(state.into_outcome(FinishReason::AlreadyFinished));
            }
        }
        tracing::info!(
            dir = %store.dir().display(),
            round = state.round,
            restarts = state.restarts,
            "Resuming session"
        );
        self.drive(state).await
    }

    async fn drive(&self, mut state: SessionState) -> Result<SessionOutcome> {
        let step = StepExecutor::new(self.collab.judge.clone(), self.settings.max_stage_attempts)
            .with_judge_text_limit(self.settings.judge_text_limit)
            .with_events(self.events.clone());
        let catalogue = self.stages.catalogue();

        self.events.emit(SessionEvent::SessionStarted {
            rows: state.working.height(),
            columns: state.working.width(),
            stages: catalogue.iter().map(|s| s.name.clone()).collect(),
        });

        let mut phase = Phase::Planning;
        loop {
            phase = match phase {
                Phase::Planning => {
                    if state.round >= self.settings.max_steps {
                        tracing::info!(max_steps = self.settings.max_steps, "Step limit reached, finishing");
                        Phase::Finish(FinishReason::StepLimit)
                    } else {
                        let decision = self.plan(&state, &catalogue).await;
                        if decision.is_finish() {
                            Phase::Finish(FinishReason::Planner)
                        } else {
                            Phase::Dispatching(decision)
                        }
                    }
                }
                Phase::Dispatching(decision) => {
                    state.round += 1;
                    state.total_rounds += 1;
                    self.events.emit(SessionEvent::StagePlanned {
                        round: state.round,
                        stage: decision.stage_name.clone(),
                        thought: decision.thought.clone(),
                    });
                    tracing::info!(
                        round = state.round,
                        stage = %decision.stage_name,
                        thought = %decision.thought,
                        "Dispatching stage"
                    );
                    let (stage, text) = self.dispatch(&step, &mut state, &decision.stage_name).await?;
                    state.outputs.push(format!("### {stage}\n{text}"));
                    Phase::MemoryUpdate { stage, text }
                }
                Phase::MemoryUpdate { stage, text } => {
                    self.update_memory(&mut state, &stage, &text).await?;
                    Phase::CumulativeEvaluation
                }
                Phase::CumulativeEvaluation => {
                    let verdict = self.evaluate(&state).await;
                    state.last_verdict = Some(verdict.clone());
                    if verdict.passed {
                        self.checkpoint(&state, false).await?;
                        Phase::Planning
                    } else if state.restarts < self.settings.max_restarts {
                        Phase::Restart(verdict.critique)
                    } else {
                        tracing::warn!(
                            restarts = state.restarts,
                            critique = %verdict.critique,
                            "Session rejected with no restarts left, keeping current results"
                        );
                        Phase::Finish(FinishReason::RestartsExhausted)
                    }
                }
                Phase::Restart(critique) => {
                    self.restart(&mut state, &critique).await?;
                    Phase::Planning
                }
                Phase::Finish(reason) => {
                    self.checkpoint(&state, true).await?;
                    tracing::info!(
                        rounds = state.total_rounds,
                        restarts = state.restarts,
                        reason = %reason,
                        "Session finished"
                    );
                    self.events.emit(SessionEvent::SessionFinished {
                        rounds: state.total_rounds,
                        restarts: state.restarts,
                        reason: reason.to_string(),
                    });
                    return Ok(state.into_outcome(reason));
                }
            };
        }
    }

    /// Ask the planner; fall back to the next runnable stage if it fails.
    async fn plan(&self, state: &SessionState, catalogue: &[StageInfo]) -> PlannerDecision {
        match self.collab.planner.decide_next_stage(&state.memory, catalogue).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "Planner failed, picking the next pending stage");
                self.next_pending(&state.artifacts)
            }
        }
    }

    fn next_pending(&self, artifacts: &Artifacts) -> PlannerDecision {
        self.stages
            .kinds()
            .into_iter()
            .filter(|k| !artifacts.contains(*k))
            .filter_map(|k| self.stages.get(k))
            .find(|s| self.stages.check_requirements(*s, artifacts).is_ok())
            .map(|s| PlannerDecision::new("Planner unavailable; running the next pending stage", s.kind().display_name()))
            .unwrap_or_else(|| PlannerDecision::new("Planner unavailable and no stage is pending", PlannerDecision::FINISH))
    }

    /// Run the named stage and return `(stage name, result text)`.
    ///
    /// Unknown names and unmet prerequisites become `Error: ...` text.
    async fn dispatch(
        &self,
        step: &StepExecutor,
        state: &mut SessionState,
        name: &str,
    ) -> Result<(String, String)> {
        let stage = match self.stages.resolve(name) {
            Ok(stage) => stage,
            Err(e) => {
                tracing::warn!(stage = %name, error = %e, "Planner chose an unknown stage");
                return Ok((name.trim().to_string(), format!("Error: {e}")));
            }
        };
        let kind = stage.kind();
        let stage_label = kind.display_name().to_string();
        if let Err(e) = self.stages.check_requirements(stage, &state.artifacts) {
            tracing::warn!(stage = %stage_label, error = %e, "Stage prerequisites not met");
            return Ok((stage_label, format!("Error: {e}")));
        }

        let ctx = StageContext::new(state.working.clone())
            .with_artifacts(state.artifacts.clone())
            .with_model(self.model.clone())
            .with_output_dir(self.output_dir.clone());
        let report = step.run(stage, &ctx).await;
        let text = report.output.text();

        if !report.failed {
            state.artifacts.insert(kind, report.output.value.clone());
        }
        if let Some(replacement) = report.output.replacement {
            if stage.replaces_dataset() && !report.failed {
                tracing::info!(
                    stage = %stage_label,
                    rows_before = state.working.height(),
                    rows_after = replacement.height(),
                    "Adopting replacement dataset"
                );
                self.events.emit(SessionEvent::DatasetReplaced {
                    stage: stage_label.clone(),
                    rows_before: state.working.height(),
                    rows_after: replacement.height(),
                });
                state.working = replacement;
                if let Some(store) = &self.store {
                    store.save_dataset(&state.working).await?;
                }
            } else {
                tracing::warn!(stage = %stage_label, "Ignoring replacement dataset from a stage not allowed to replace it");
            }
        }
        Ok((stage_label, text))
    }

    async fn update_memory(&self, state: &mut SessionState, stage: &str, text: &str) -> Result<()> {
        let limit = self.settings.memory_char_limit;
        let compacted = match self.collab.summarizer.compact(&state.memory, stage, text).await {
            Ok(memory) if !memory.trim().is_empty() => memory,
            Ok(_) => {
                tracing::warn!(stage = %stage, "Summarizer returned nothing, appending raw result");
                append_raw(&state.memory, stage, text)
            }
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Summarizer failed, appending raw result");
                append_raw(&state.memory, stage, text)
            }
        };
        state.memory = keep_tail(&compacted, limit);

        if let Some(store) = &self.store {
            store.save_memory(&state.memory).await?;
            store.append_knowledge(stage, text).await?;
        }
        self.events.emit(SessionEvent::MemoryUpdated {
            round: state.round,
            chars: state.memory.chars().count(),
        });
        Ok(())
    }

    async fn evaluate(&self, state: &SessionState) -> SessionVerdict {
        let context = if self.settings.include_prior_rounds {
            state.outputs.join("\n\n")
        } else {
            state.outputs.last().cloned().unwrap_or_default()
        };
        let context = truncate_output(&context, self.settings.judge_text_limit, TruncationMode::HeadTail);

        let verdict = match self
            .collab
            .judge
            .evaluate_session(&state.memory, state.artifacts.len(), &context)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Session verdict unusable, continuing");
                SessionVerdict::pass(format!("Verdict unavailable: {e}"))
            }
        };
        tracing::info!(round = state.round, passed = verdict.passed, "Session judged");
        self.events.emit(SessionEvent::SessionJudged {
            round: state.round,
            passed: verdict.passed,
            critique: verdict.critique.clone(),
        });
        verdict
    }

    /// Reset to the original data with the critique as the only memory.
    async fn restart(&self, state: &mut SessionState, critique: &str) -> Result<()> {
        state.restarts += 1;
        state.artifacts.clear();
        state.working = state.original.clone();
        state.outputs.clear();
        state.round = 0;
        state.memory = keep_tail(
            &format!("The previous attempt was rejected by the reviewer: {critique}"),
            self.settings.memory_char_limit,
        );
        tracing::warn!(restarts = state.restarts, critique = %critique, "Restarting session");
        self.events.emit(SessionEvent::SessionRestarted {
            restarts: state.restarts,
            critique: critique.to_string(),
        });

        if let Some(store) = &self.store {
            store.save_dataset(&state.working).await?;
            store.save_memory(&state.memory).await?;
        }
        self.checkpoint(state, false).await
    }

    async fn checkpoint(&self, state: &SessionState, finished: bool) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let cp = SessionCheckpoint::new(state.round, state.restarts, state.artifacts.clone(), finished)
            .with_progress(state.total_rounds, state.outputs.clone());
        store.save_checkpoint(&cp).await?;
        self.events.emit(SessionEvent::CheckpointSaved { round: state.round });
        Ok(())
    }
}

fn append_raw(memory: &str, stage: &str, text: &str) -> String {
    if memory.trim().is_empty() {
        format!("[{stage}] {text}")
    } else {
        format!("{memory}\n\n[{stage}] {text}")
    }
}

/// The last `limit` characters of `text`.
fn keep_tail(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        text.to_string()
    } else {
        text.chars().skip(total - limit).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Stage, StageKind, StageOutput};
    use analyst_types::StepVerdict;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Script(Mutex<VecDeque<&'static str>>);

    impl Script {
        fn new(names: &[&'static str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(names.iter().copied().collect())))
        }
    }

    #[async_trait]
    impl Planner for Script {
        async fn decide_next_stage(&self, _memory: &str, _c: &[StageInfo]) -> Result<PlannerDecision> {
            let next = self.0.lock().unwrap().pop_front().unwrap_or(PlannerDecision::FINISH);
            Ok(PlannerDecision::new("scripted", next))
        }
    }

    struct FailingPlanner;

    #[async_trait]
    impl Planner for FailingPlanner {
        async fn decide_next_stage(&self, _memory: &str, _c: &[StageInfo]) -> Result<PlannerDecision> {
            Err(AnalystError::Model {
                provider: "test".into(),
                message: "offline".into(),
            })
        }
    }

    /// Step verdicts always pass; session verdicts fail `fail_sessions` times.
    struct SessionJudge {
        fail_sessions: AtomicUsize,
        contexts: Mutex<Vec<String>>,
    }

    impl SessionJudge {
        fn failing(n: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_sessions: AtomicUsize::new(n),
                contexts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Judge for SessionJudge {
        async fn evaluate_step(&self, _: &str, _: &str, _: &str) -> Result<StepVerdict> {
            Ok(StepVerdict::pass("ok", 9.0))
        }

        async fn evaluate_session(&self, _memory: &str, _n: usize, context: &str) -> Result<SessionVerdict> {
            self.contexts.lock().unwrap().push(context.to_string());
            let left = self.fail_sessions.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_sessions.store(left - 1, Ordering::SeqCst);
                Ok(SessionVerdict::fail("numbers are inconsistent"))
            } else {
                Ok(SessionVerdict::pass("consistent"))
            }
        }
    }

    struct Concat;

    #[async_trait]
    impl Summarizer for Concat {
        async fn compact(&self, memory: &str, stage: &str, _text: &str) -> Result<String> {
            Ok(format!("{memory}|{stage}"))
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn compact(&self, _: &str, _: &str, _: &str) -> Result<String> {
            Err(AnalystError::Other("down".into()))
        }
    }

    /// Test stage that may drop every row and whose output is fixed.
    struct Probe {
        kind: StageKind,
        replaces: bool,
        requires: &'static [StageKind],
    }

    #[async_trait]
    impl Stage for Probe {
        fn kind(&self) -> StageKind {
            self.kind
        }
        fn description(&self) -> &str {
            "probe"
        }
        fn replaces_dataset(&self) -> bool {
            self.replaces
        }
        fn requires(&self) -> &[StageKind] {
            self.requires
        }
        async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
            let mut ds = ctx.dataset.clone();
            ds.retain_rows(|_| false);
            Ok(StageOutput::with_replacement(
                json!({"rows_seen": ctx.dataset.height(), "artifacts_seen": ctx.artifacts.len()}),
                ds,
            ))
        }
    }

    fn registry() -> StageRegistry {
        let mut r = StageRegistry::new();
        r.register(Probe { kind: StageKind::Profiling, replaces: false, requires: &[] });
        r.register(Probe { kind: StageKind::Cleaning, replaces: true, requires: &[] });
        r.register(Probe { kind: StageKind::Analysis, replaces: false, requires: &[StageKind::Discovery] });
        r
    }

    fn dataset() -> Dataset {
        Dataset::from_csv_str("case_id,activity\n1,A\n1,B\n2,A\n").unwrap()
    }

    fn controller(planner: Arc<dyn Planner>, judge: Arc<dyn Judge>, settings: SessionSettings) -> SessionController {
        SessionController::new(
            settings,
            registry(),
            Collaborators {
                planner,
                judge,
                summarizer: Arc::new(Concat),
            },
        )
    }

    #[tokio::test]
    async fn planner_finish_ends_loop() {
        let c = controller(Script::new(&["Data Profiling"]), SessionJudge::failing(0), SessionSettings::default());
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.reason, FinishReason::Planner);
        assert_eq!(out.rounds, 1);
        assert!(out.artifacts.contains(StageKind::Profiling));
        assert_eq!(out.memory, "|Data Profiling");
        assert!(out.passed());
    }

    #[tokio::test]
    async fn unknown_stage_becomes_diagnostic_text() {
        let judge = SessionJudge::failing(0);
        let mut settings = SessionSettings::default();
        settings.include_prior_rounds = true;
        let c = controller(Script::new(&["Forecasting"]), judge.clone(), settings);
        let out = c.run(dataset()).await.unwrap();
        assert!(out.artifacts.is_empty());
        let contexts = judge.contexts.lock().unwrap().clone();
        assert_eq!(contexts, vec!["### Forecasting\nError: Unknown tool 'Forecasting'".to_string()]);
    }

    #[tokio::test]
    async fn unmet_dependency_is_recoverable() {
        let judge = SessionJudge::failing(0);
        let c = controller(Script::new(&["Process Analysis", "Data Profiling"]), judge.clone(), SessionSettings::default());
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.rounds, 2);
        assert!(!out.artifacts.contains(StageKind::Analysis));
        assert!(judge.contexts.lock().unwrap()[0].contains("requires 'Process Discovery'"));
    }

    #[tokio::test]
    async fn only_the_cleaning_stage_replaces_the_dataset() {
        let c = controller(Script::new(&["Data Profiling"]), SessionJudge::failing(0), SessionSettings::default());
        assert_eq!(c.run(dataset()).await.unwrap().dataset.height(), 3);

        let c = controller(Script::new(&["Data Cleaning"]), SessionJudge::failing(0), SessionSettings::default());
        assert_eq!(c.run(dataset()).await.unwrap().dataset.height(), 0);
    }

    #[tokio::test]
    async fn step_limit_is_an_implicit_pass() {
        let mut settings = SessionSettings::default();
        settings.max_steps = 2;
        let c = controller(
            Script::new(&["Data Profiling", "Data Profiling", "Data Profiling"]),
            SessionJudge::failing(0),
            settings,
        );
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.reason, FinishReason::StepLimit);
        assert_eq!(out.rounds, 2);
        assert!(out.passed());
    }

    #[tokio::test]
    async fn rejection_restarts_from_original_data() {
        let mut settings = SessionSettings::default();
        settings.max_restarts = 1;
        let c = controller(
            Script::new(&["Data Cleaning", "Data Profiling"]),
            SessionJudge::failing(1),
            settings,
        );
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.restarts, 1);
        // After the restart profiling sees the original rows and no artifacts.
        let profile = out.artifacts.get(StageKind::Profiling).unwrap();
        assert_eq!(profile["rows_seen"], 3);
        assert_eq!(profile["artifacts_seen"], 0);
        assert!(!out.artifacts.contains(StageKind::Cleaning));
        assert_eq!(out.dataset.height(), 3);
        assert!(out.memory.starts_with("The previous attempt was rejected"));
    }

    #[tokio::test]
    async fn restart_budget_is_never_exceeded() {
        let mut settings = SessionSettings::default();
        settings.max_restarts = 2;
        let c = controller(
            Script::new(&["Data Profiling"; 10]),
            SessionJudge::failing(usize::MAX),
            settings,
        );
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.restarts, 2);
        assert_eq!(out.reason, FinishReason::RestartsExhausted);
        assert!(!out.passed());
        // Results of the last attempt are carried forward.
        assert!(out.artifacts.contains(StageKind::Profiling));
    }

    #[tokio::test]
    async fn planner_failure_falls_back_to_pending_stages() {
        let c = controller(Arc::new(FailingPlanner), SessionJudge::failing(0), SessionSettings::default());
        let out = c.run(dataset()).await.unwrap();
        assert_eq!(out.reason, FinishReason::Planner);
        // Analysis never becomes runnable without discovery.
        assert_eq!(out.rounds, 2);
        assert!(out.artifacts.contains(StageKind::Profiling));
        assert!(out.artifacts.contains(StageKind::Cleaning));
    }

    #[tokio::test]
    async fn memory_stays_bounded_when_summarizer_fails() {
        let mut settings = SessionSettings::default();
        settings.memory_char_limit = 40;
        let c = SessionController::new(
            settings,
            registry(),
            Collaborators {
                planner: Script::new(&["Data Profiling", "Data Cleaning"]),
                judge: SessionJudge::failing(0),
                summarizer: Arc::new(BrokenSummarizer),
            },
        );
        let out = c.run(dataset()).await.unwrap();
        assert!(out.memory.chars().count() <= 40);
        assert!(out.memory.contains("rows_seen"));
    }

    #[tokio::test]
    async fn persists_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::create(dir.path()).await.unwrap();
        let c = controller(Script::new(&["Data Cleaning"]), SessionJudge::failing(0), SessionSettings::default())
            .with_store(store.clone());
        c.run(dataset()).await.unwrap();

        assert_eq!(store.load_memory().await.unwrap(), "|Data Cleaning");
        assert_eq!(store.load_dataset().await.unwrap().height(), 0);
        assert_eq!(store.load_original().await.unwrap().height(), 3);
        let cp = store.load_checkpoint().await.unwrap().unwrap();
        assert!(cp.finished);

        let again = controller(Script::new(&["Data Profiling"]), SessionJudge::failing(0), SessionSettings::default())
            .with_store(store);
        let out = again.resume().await.unwrap();
        assert_eq!(out.reason, FinishReason::AlreadyFinished);
        assert!(out.artifacts.contains(StageKind::Cleaning));
    }

    #[tokio::test]
    async fn resume_restores_round_totals_and_prior_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::create(dir.path()).await.unwrap();
        store.save_original(&dataset()).await.unwrap();
        store.save_dataset(&dataset()).await.unwrap();
        store.save_memory("|Data Profiling").await.unwrap();
        let mut artifacts = Artifacts::new();
        artifacts.insert(StageKind::Profiling, json!({"rows_seen": 3}));
        let cp = SessionCheckpoint::new(1, 1, artifacts, false)
            .with_progress(3, vec!["### Data Profiling\nrows_seen: 3".into()]);
        store.save_checkpoint(&cp).await.unwrap();

        let judge = SessionJudge::failing(0);
        let mut settings = SessionSettings::default();
        settings.include_prior_rounds = true;
        let c = controller(Script::new(&["Data Cleaning"]), judge.clone(), settings).with_store(store.clone());
        let out = c.resume().await.unwrap();

        assert_eq!(out.reason, FinishReason::Planner);
        assert_eq!(out.rounds, 4);
        assert_eq!(out.restarts, 1);
        let contexts = judge.contexts.lock().unwrap().clone();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].starts_with("### Data Profiling"));
        assert!(contexts[0].contains("### Data Cleaning"));

        let saved = store.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(saved.total_rounds, 4);
        assert_eq!(saved.outputs.len(), 2);
    }

    #[tokio::test]
    async fn resume_without_store_is_config_error() {
        let c = controller(Script::new(&[]), SessionJudge::failing(0), SessionSettings::default());
        assert!(matches!(c.resume().await, Err(AnalystError::Config(_))));
    }

    #[test]
    fn keep_tail_counts_characters() {
        assert_eq!(keep_tail("abcdef", 3), "def");
        assert_eq!(keep_tail("ééé", 2), "éé");
        assert_eq!(keep_tail("ab", 3), "ab");
    }
}
