//! Built-in analysis stages.

mod analysis;
mod cleaning;
mod discovery;
mod profiling;
mod reporting;
mod visualization;

pub use analysis::AnalysisStage;
pub use cleaning::CleaningStage;
pub use discovery::DiscoveryStage;
pub use profiling::ProfilingStage;
pub use reporting::{ReportingStage, REPORT_FILE};
pub use visualization::{VisualizationStage, CHARTS_FILE};

use analyst_tools::EventLogColumns;
use analyst_types::stats::round_to;
use serde_json::Value;

use crate::stage::{StageContext, StageKind, StageRegistry};

/// Registry with every built-in stage.
pub fn default_registry() -> StageRegistry {
    let mut r = StageRegistry::new();
    r.register(ProfilingStage);
    r.register(CleaningStage);
    r.register(DiscoveryStage);
    r.register(VisualizationStage);
    r.register(AnalysisStage);
    r.register(ReportingStage);
    r
}

/// Ask the stage model, if any. Failures are logged and yield `None`.
pub(crate) async fn consult(ctx: &StageContext, system: &str, prompt: &str) -> Option<String> {
    let model = ctx.model.as_ref()?;
    match model.complete(system, prompt).await {
        Ok(reply) if !reply.trim().is_empty() => Some(reply),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(model = %model.name(), error = %e, "Stage model call failed, continuing without it");
            None
        }
    }
}

/// Append the judge's critique to a model prompt.
pub(crate) fn with_feedback(prompt: String, feedback: Option<&str>) -> String {
    match feedback {
        Some(f) if !f.trim().is_empty() => format!("{prompt}\n\nReviewer critique to address:\n{f}"),
        _ => prompt,
    }
}

/// Event-log roles: discovery's choice, then profiling's, then a fresh guess.
pub(crate) fn event_columns(ctx: &StageContext) -> Option<EventLogColumns> {
    let recorded = [
        ctx.artifacts
            .get(StageKind::Discovery)
            .and_then(|v| v.get("columns")),
        ctx.artifacts
            .get(StageKind::Profiling)
            .and_then(|v| v.pointer("/event_log/columns")),
    ];
    recorded
        .into_iter()
        .flatten()
        .filter_map(|v| serde_json::from_value::<EventLogColumns>(v.clone()).ok())
        .find(|cols| cols.missing_in(&ctx.dataset).is_none())
        .or_else(|| EventLogColumns::detect(&ctx.dataset))
}

/// A duration in seconds rendered in its most readable unit.
pub(crate) fn duration_value(seconds: f64, unit: &str, divisor: f64) -> Value {
    serde_json::json!({
        "value": round_to(seconds / divisor, 2),
        "unit": unit,
        "seconds": round_to(seconds, 1),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use analyst_types::Dataset;

    /// Three order cases with a rework loop in case 3 and a duplicate row.
    pub fn order_log() -> Dataset {
        Dataset::from_csv_str(
            "case_id,activity,timestamp,amount\n\
             1,Create,2024-01-01 10:00:00,100\n\
             1,Approve,2024-01-01 12:00:00,100\n\
             1,Pay,2024-01-02 10:00:00,100\n\
             2,Create,2024-01-02 09:00:00,250\n\
             2,Approve,2024-01-02 09:30:00,\n\
             2,Pay,2024-01-02 11:30:00,250\n\
             2,Pay,2024-01-02 11:30:00,250\n\
             3,Create,2024-01-03 08:00:00,40\n\
             3,Check,2024-01-03 08:10:00,40\n\
             3,Check,2024-01-03 09:10:00,40\n\
             3,Approve,2024-01-03 10:00:00,40\n\
             ,Pay,2024-01-03 11:00:00,40\n",
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_has_every_executable_stage() {
        let r = default_registry();
        assert_eq!(r.kinds(), StageKind::EXECUTABLE.to_vec());
        assert_eq!(r.catalogue().len(), 7);
        assert!(r.get(StageKind::Cleaning).unwrap().replaces_dataset());
        assert!(!r.get(StageKind::Discovery).unwrap().supports_feedback());
    }

    #[test]
    fn event_columns_prefers_recorded_roles() {
        let mut ctx = StageContext::new(fixtures::order_log());
        ctx.artifacts.insert(
            StageKind::Profiling,
            json!({"event_log": {"columns": {"case": "amount", "activity": "activity", "timestamp": null}}}),
        );
        let cols = event_columns(&ctx).unwrap();
        assert_eq!(cols.case, "amount");

        // Recorded roles naming missing columns are ignored.
        ctx.artifacts.insert(
            StageKind::Discovery,
            json!({"columns": {"case": "ghost", "activity": "activity", "timestamp": null}}),
        );
        assert_eq!(event_columns(&ctx).unwrap().case, "amount");
    }

    #[test]
    fn feedback_is_appended_only_when_present() {
        assert_eq!(with_feedback("p".into(), None), "p");
        assert!(with_feedback("p".into(), Some("use hours")).ends_with("use hours"));
    }
}
