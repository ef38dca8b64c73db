//! Session event system for observability.
//!
//! Emits [`SessionEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! front-ends can follow a running session without coupling to the controller.

use serde::{Deserialize, Serialize};

/// Events emitted while a session runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionStarted {
        rows: usize,
        columns: usize,
        stages: Vec<String>,
    },
    StagePlanned {
        round: usize,
        stage: String,
        thought: String,
    },
    AttemptStarted {
        stage: String,
        attempt: usize,
        max_attempts: usize,
    },
    AttemptJudged {
        stage: String,
        attempt: usize,
        passed: bool,
        score: f64,
        critique: String,
    },
    AttemptsExhausted {
        stage: String,
        attempts: usize,
    },
    DatasetReplaced {
        stage: String,
        rows_before: usize,
        rows_after: usize,
    },
    MemoryUpdated {
        round: usize,
        chars: usize,
    },
    SessionJudged {
        round: usize,
        passed: bool,
        critique: String,
    },
    SessionRestarted {
        restarts: usize,
        critique: String,
    },
    CheckpointSaved {
        round: usize,
    },
    SessionFinished {
        rounds: usize,
        restarts: usize,
        reason: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
