//! Session execution for the analyst: stages, judged steps, the planning
//! round loop, persistence, and the post-session chat router.
//!
//! A [`SessionController`] asks a planner for the next stage, runs it through
//! a [`StepExecutor`] until the judge accepts, folds the result into memory,
//! and lets a cumulative judge continue, restart or finish the session. The
//! [`InteractiveRouter`] then answers follow-up questions against the final
//! dataset.

pub mod events;
pub mod interviewer;
pub mod router;
pub mod session;
pub mod stage;
pub mod stages;
pub mod step;
pub mod store;

pub use events::{EventEmitter, SessionEvent};
pub use interviewer::{
    confirm, Answer, AutoApproveInterviewer, ConsoleInterviewer, Interviewer, Question,
    RecordingInterviewer,
};
pub use router::{AnswerSource, ChatAnswer, ChatCollaborators, InteractiveRouter};
pub use session::{Collaborators, FinishReason, SessionController, SessionOutcome};
pub use stage::{Artifacts, Stage, StageContext, StageKind, StageOutput, StageRegistry};
pub use stages::default_registry;
pub use step::{StepExecutor, StepReport};
pub use store::{SessionCheckpoint, SessionStore};
