//! Stage trait, the closed set of stage kinds, artifacts, and the stage registry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use analyst_types::{AnalystError, Dataset, Result, StageInfo, TextModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Profiling,
    Cleaning,
    Discovery,
    Visualization,
    Analysis,
    Reporting,
    Finish,
}

impl StageKind {
    /// Every kind that can actually run, in pipeline order.
    pub const EXECUTABLE: [StageKind; 6] = [
        StageKind::Profiling,
        StageKind::Cleaning,
        StageKind::Discovery,
        StageKind::Visualization,
        StageKind::Analysis,
        StageKind::Reporting,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::Profiling => "Data Profiling",
            StageKind::Cleaning => "Data Cleaning",
            StageKind::Discovery => "Process Discovery",
            StageKind::Visualization => "Visualization",
            StageKind::Analysis => "Process Analysis",
            StageKind::Reporting => "Reporting",
            StageKind::Finish => "Finish",
        }
    }

    /// Case-insensitive lookup by display name or snake_case alias.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        let kind = match normalized.as_str() {
            "data profiling" | "profiling" | "profile" => StageKind::Profiling,
            "data cleaning" | "cleaning" | "clean" => StageKind::Cleaning,
            "process discovery" | "discovery" => StageKind::Discovery,
            "visualization" | "visualisation" | "data visualization" => StageKind::Visualization,
            "process analysis" | "analysis" => StageKind::Analysis,
            "reporting" | "report" => StageKind::Reporting,
            "finish" | "done" => StageKind::Finish,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for StageKind {
    type Err = AnalystError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| AnalystError::UnknownStage(s.trim().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Last structured result of each stage, keyed by stage display name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifacts(BTreeMap<String, Value>);

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: StageKind, value: Value) {
        self.0.insert(kind.display_name().to_string(), value);
    }

    pub fn get(&self, kind: StageKind) -> Option<&Value> {
        self.0.get(kind.display_name())
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.0.contains_key(kind.display_name())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// StageOutput / StageContext
// ---------------------------------------------------------------------------

/// What one stage invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub value: Value,
    /// A cleaned dataset offered as the new working copy.
    pub replacement: Option<Dataset>,
}

impl StageOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            replacement: None,
        }
    }

    pub fn with_replacement(value: Value, dataset: Dataset) -> Self {
        Self {
            value,
            replacement: Some(dataset),
        }
    }

    /// Diagnostic result for a failed invocation.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::value(Value::String(format!("Error: {message}")))
    }

    /// Text shown to judges and summarizers. Only the value, never the
    /// replacement dataset.
    pub fn text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Everything a stage invocation may look at. Each invocation gets its own
/// copy of the dataset.
#[derive(Clone, Default)]
pub struct StageContext {
    pub dataset: Dataset,
    pub artifacts: Artifacts,
    pub feedback: Option<String>,
    pub model: Option<Arc<dyn TextModel>>,
    pub output_dir: Option<PathBuf>,
}

impl StageContext {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            ..Self::default()
        }
    }

    pub fn with_artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_model(mut self, model: Option<Arc<dyn TextModel>>) -> Self {
        self.model = model;
        self
    }

    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("rows", &self.dataset.height())
            .field("artifacts", &self.artifacts.len())
            .field("feedback", &self.feedback)
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// One-line description shown to the planner.
    fn description(&self) -> &str;

    /// Whether a retry passes the judge's critique in `StageContext::feedback`.
    fn supports_feedback(&self) -> bool {
        false
    }

    /// Whether a replacement dataset from this stage may become authoritative.
    fn replaces_dataset(&self) -> bool {
        false
    }

    /// Stages whose artifacts must exist before this one runs.
    fn requires(&self) -> &[StageKind] {
        &[]
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput>;
}

// ---------------------------------------------------------------------------
// StageRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<StageKind, Box<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage, replacing any earlier stage of the same kind.
    /// `Finish` is a control signal and is never registered.
    pub fn register(&mut self, stage: impl Stage + 'static) {
        let kind = stage.kind();
        if kind == StageKind::Finish {
            tracing::warn!("Ignoring attempt to register a Finish stage");
            return;
        }
        self.stages.insert(kind, Box::new(stage));
    }

    pub fn get(&self, kind: StageKind) -> Option<&dyn Stage> {
        self.stages.get(&kind).map(|s| s.as_ref())
    }

    /// Resolve a planner-supplied name to a registered stage.
    pub fn resolve(&self, name: &str) -> Result<&dyn Stage> {
        StageKind::from_name(name)
            .and_then(|kind| self.get(kind))
            .ok_or_else(|| AnalystError::UnknownStage(name.trim().to_string()))
    }

    /// Fail with `StageDependency` if a prerequisite has no artifact yet.
    pub fn check_requirements(&self, stage: &dyn Stage, artifacts: &Artifacts) -> Result<()> {
        match stage.requires().iter().find(|k| !artifacts.contains(**k)) {
            Some(missing) => Err(AnalystError::StageDependency {
                stage: stage.kind().display_name().to_string(),
                missing: missing.display_name().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Catalogue for the planner, ending with the `Finish` entry.
    pub fn catalogue(&self) -> Vec<StageInfo> {
        self.stages
            .values()
            .map(|s| StageInfo {
                name: s.kind().display_name().to_string(),
                description: s.description().to_string(),
            })
            .chain(std::iter::once(StageInfo {
                name: StageKind::Finish.display_name().to_string(),
                description: "End the analysis when the report is complete.".to_string(),
            }))
            .collect()
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
