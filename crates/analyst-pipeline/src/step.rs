//! Judged execution of a single stage with critique-driven retries.

use std::sync::Arc;

use analyst_tools::{truncate_output, TruncationMode};
use analyst_types::{Judge, StepVerdict};

use crate::events::{EventEmitter, SessionEvent};
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

/// Outcome of running one stage through the executor.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub stage: StageKind,
    /// The most recent attempt's output, judged or not.
    pub output: StageOutput,
    pub verdict: StepVerdict,
    pub attempts: usize,
    /// The judge accepted the last attempt.
    pub accepted: bool,
    /// The last attempt returned an error instead of a result.
    pub failed: bool,
}

impl StepReport {
    pub fn exhausted(&self) -> bool {
        !self.accepted
    }
}

pub struct StepExecutor {
    judge: Arc<dyn Judge>,
    max_attempts: usize,
    judge_text_limit: usize,
    events: EventEmitter,
}

impl StepExecutor {
    pub fn new(judge: Arc<dyn Judge>, max_attempts: usize) -> Self {
        Self {
            judge,
            max_attempts: max_attempts.max(1),
            judge_text_limit: 20_000,
            events: EventEmitter::default(),
        }
    }

    pub fn with_judge_text_limit(mut self, limit: usize) -> Self {
        self.judge_text_limit = limit;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `stage` until the judge accepts or the attempt budget is spent.
    ///
    /// Never fails: stage errors become `Error: ...` outputs and unreadable
    /// verdicts become permissive passes. Every attempt starts from a fresh
    /// clone of `base`, so a rejected attempt leaves nothing behind.
    pub async fn run(&self, stage: &dyn Stage, base: &StageContext) -> StepReport {
        let kind = stage.kind();
        let name = kind.display_name();
        let mut feedback: Option<String> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.events.emit(SessionEvent::AttemptStarted {
                stage: name.to_string(),
                attempt,
                max_attempts: self.max_attempts,
            });

            let mut ctx = base.clone();
            if stage.supports_feedback() {
                ctx.feedback = feedback.clone();
            }

            let (output, failed) = match stage.execute(ctx).await {
                Ok(output) => (output, false),
                Err(e) => {
                    tracing::warn!(stage = %name, attempt, error = %e, "Stage attempt failed");
                    (StageOutput::error(&e), true)
                }
            };

            let text = truncate_output(&output.text(), self.judge_text_limit, TruncationMode::Head);
            let context = attempt_context(attempt, self.max_attempts, feedback.as_deref());
            let verdict = match self.judge.evaluate_step(name, &context, &text).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(stage = %name, attempt, error = %e, "Judge response unusable, accepting attempt");
                    StepVerdict::permissive(format!("Verdict unavailable: {e}"))
                }
            };

            tracing::info!(
                stage = %name,
                attempt,
                passed = verdict.passed,
                score = verdict.score,
                "Attempt judged"
            );
            self.events.emit(SessionEvent::AttemptJudged {
                stage: name.to_string(),
                attempt,
                passed: verdict.passed,
                score: verdict.score,
                critique: verdict.critique.clone(),
            });

            if verdict.passed || attempt >= self.max_attempts {
                let accepted = verdict.passed;
                if !accepted {
                    tracing::warn!(stage = %name, attempts = attempt, "Retry budget exhausted, keeping last result");
                    self.events.emit(SessionEvent::AttemptsExhausted {
                        stage: name.to_string(),
                        attempts: attempt,
                    });
                }
                return StepReport {
                    stage: kind,
                    output,
                    verdict,
                    attempts: attempt,
                    accepted,
                    failed,
                };
            }

            feedback = Some(verdict.critique);
        }
    }
}

fn attempt_context(attempt: usize, max: usize, previous: Option<&str>) -> String {
    let mut context = format!("Attempt {attempt} of {max}");
    if let Some(critique) = previous {
        context.push_str("\nPrevious critique: ");
        context.push_str(critique);
    }
    context
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
