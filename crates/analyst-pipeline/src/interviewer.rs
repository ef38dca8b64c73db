//! Interviewer trait and built-in implementations for human confirmation.

use std::io::{BufRead, Write};

use analyst_types::{AnalystError, Result};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Question {
    pub prompt: String,
    /// Text shown before the prompt, e.g. the code about to run.
    pub detail: Option<String>,
}

impl Question {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Raw reply. `None` means no input was given (EOF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: Option<String>,
}

impl Answer {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn none() -> Self {
        Self { text: None }
    }

    /// Only an explicit `y` or `yes` approves.
    pub fn is_yes(&self) -> bool {
        self.text
            .as_deref()
            .map(|t| t.trim().to_ascii_lowercase())
            .is_some_and(|t| t == "y" || t == "yes")
    }
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, question: &Question) -> Result<Answer>;
}

/// Ask a yes/no question. Errors, EOF and anything but an explicit yes
/// count as a refusal.
pub async fn confirm(interviewer: &dyn Interviewer, question: &Question) -> bool {
    match interviewer.ask(question).await {
        Ok(answer) => answer.is_yes(),
        Err(e) => {
            tracing::warn!(error = %e, "Confirmation failed, treating as cancellation");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// AutoApproveInterviewer
// ---------------------------------------------------------------------------

/// Approves everything. For non-interactive runs that opted in explicitly.
pub struct AutoApproveInterviewer;

#[async_trait]
impl Interviewer for AutoApproveInterviewer {
    async fn ask(&self, _question: &Question) -> Result<Answer> {
        Ok(Answer::text("yes"))
    }
}

// ---------------------------------------------------------------------------
// ConsoleInterviewer
// ---------------------------------------------------------------------------

pub struct ConsoleInterviewer;

#[async_trait]
impl Interviewer for ConsoleInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        let question = question.clone();
        tokio::task::spawn_blocking(move || -> Result<Answer> {
            let mut out = std::io::stdout().lock();
            if let Some(detail) = &question.detail {
                writeln!(out, "\n{detail}")?;
            }
            write!(out, "{} ", question.prompt)?;
            out.flush()?;
            drop(out);

            let mut input = String::new();
            let read = std::io::stdin().lock().read_line(&mut input)?;
            if read == 0 {
                return Ok(Answer::none());
            }
            Ok(Answer::text(input.trim()))
        })
        .await
        .map_err(|e| AnalystError::Other(format!("console prompt task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// RecordingInterviewer
// ---------------------------------------------------------------------------

/// Plays back preset answers in order and records every question asked.
/// Once the preset runs out it answers with no input.
pub struct RecordingInterviewer {
    answers: std::sync::Mutex<Vec<Answer>>,
    questions: std::sync::Mutex<Vec<Question>>,
}

impl RecordingInterviewer {
    pub fn new(answers: Vec<Answer>) -> Self {
        let mut reversed = answers;
        reversed.reverse();
        Self {
            answers: std::sync::Mutex::new(reversed),
            questions: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<Question> {
        self.questions
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Interviewer for RecordingInterviewer {
    async fn ask(&self, question: &Question) -> Result<Answer> {
        if let Ok(mut questions) = self.questions.lock() {
            questions.push(question.clone());
        }
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop())
            .unwrap_or_else(Answer::none);
        Ok(answer)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl Interviewer for Broken {
        async fn ask(&self, _question: &Question) -> Result<Answer> {
            Err(AnalystError::Other("stdin closed".into()))
        }
    }

    #[test]
    fn only_explicit_yes_approves() {
        assert!(Answer::text("y").is_yes());
        assert!(Answer::text(" YES ").is_yes());
        assert!(!Answer::text("").is_yes());
        assert!(!Answer::text("sure").is_yes());
        assert!(!Answer::text("n").is_yes());
        assert!(!Answer::none().is_yes());
    }

    #[tokio::test]
    async fn auto_approve_confirms() {
        assert!(confirm(&AutoApproveInterviewer, &Question::new("Run?")).await);
    }

    #[tokio::test]
    async fn errors_and_missing_input_cancel() {
        assert!(!confirm(&Broken, &Question::new("Run?")).await);
        let empty = RecordingInterviewer::new(vec![]);
        assert!(!confirm(&empty, &Question::new("Run?")).await);
    }

    #[tokio::test]
    async fn recording_plays_back_answers() {
        let interviewer =
            RecordingInterviewer::new(vec![Answer::text("yes"), Answer::text("no")]);

        let first = Question::new("First?").with_detail("result = 1;");
        assert!(confirm(&interviewer, &first).await);
        assert!(!confirm(&interviewer, &Question::new("Second?")).await);

        let recorded = interviewer.questions();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].detail.as_deref(), Some("result = 1;"));
        assert_eq!(recorded[1].prompt, "Second?");
    }
}
