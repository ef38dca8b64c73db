//! Deterministic analysis tools for the analyst chat router.
//!
//! Provides the `AnalysisTool` trait, `ToolRegistry` with schema-checked
//! dispatch, event-log helpers shared by the process-mining tools and
//! stages, and output truncation.

pub mod builtin;
pub mod eventlog;
pub mod tool;
pub mod truncation;

pub use builtin::{default_registry, value_counts};
pub use eventlog::{EventLogColumns, Trace};
pub use tool::{AnalysisTool, ToolArgs, ToolDefinition, ToolRegistry};
pub use truncation::{truncate_output, TruncationMode};
