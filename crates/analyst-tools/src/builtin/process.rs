use analyst_types::{stats, Dataset, Result};
use serde_json::{json, Value};

use super::{percentage, value_counts};
use crate::eventlog::{self, EventLogColumns, Trace};
use crate::tool::{column, str_arg, tool_error, usize_arg, AnalysisTool, ToolArgs, ToolDefinition};

/// Build traces from explicit column arguments.
///
/// Without an explicit timestamp column, a column literally named
/// `timestamp` is used for ordering when present.
fn traces_for(
    dataset: &Dataset,
    case_col: &str,
    activity_col: &str,
    timestamp_col: Option<&str>,
    tool: &str,
) -> Result<Vec<Trace>> {
    let timestamp = timestamp_col
        .map(str::to_string)
        .or_else(|| dataset.has_column("timestamp").then(|| "timestamp".to_string()));
    let cols = EventLogColumns {
        case: case_col.to_string(),
        activity: activity_col.to_string(),
        timestamp,
    };
    if let Some(missing) = cols.missing_in(dataset) {
        return Err(tool_error(tool, format!("Column '{missing}' not found")));
    }
    eventlog::build_traces(dataset, &cols)
        .ok_or_else(|| tool_error(tool, "could not build traces"))
}

fn path_entries(
    variants: &[(Vec<String>, usize)],
    total_cases: usize,
    digits: u32,
) -> Vec<Value> {
    variants
        .iter()
        .map(|(path, count)| {
            json!({
                "path": eventlog::format_path(path, 5),
                "full_length": path.len(),
                "count": count,
                "percentage": percentage(*count, total_cases, digits),
            })
        })
        .collect()
}

fn hours(secs: Option<f64>) -> Value {
    secs.map(|s| json!(stats::round_to(s / 3600.0, 2)))
        .unwrap_or(Value::Null)
}

pub struct PathFrequencyTool;

impl AnalysisTool for PathFrequencyTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculate_path_frequency".into(),
            description: "Most frequent process paths (trace variants) with their share of cases."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["case_col", "activity_col"],
                "properties": {
                    "case_col": {"type": "string"},
                    "activity_col": {"type": "string"},
                    "top_n": {"type": "integer", "default": 5}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "calculate_path_frequency";
        let case_col = str_arg(args, "case_col", NAME)?;
        let act_col = str_arg(args, "activity_col", NAME)?;
        let top_n = usize_arg(args, "top_n", 5, NAME)?;
        let traces = traces_for(dataset, case_col, act_col, None, NAME)?;
        let variants = eventlog::variant_counts(&traces);
        let top: Vec<_> = variants.iter().take(top_n).cloned().collect();
        Ok(json!({
            "total_unique_paths": variants.len(),
            "total_cases": traces.len(),
            "top_paths": path_entries(&top, traces.len(), 2),
        }))
    }
}

pub struct RarestPathsTool;

impl AnalysisTool for RarestPathsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_rarest_paths".into(),
            description: "Least frequent process paths (rarest trace variants).".into(),
            parameters: json!({
                "type": "object",
                "required": ["case_col", "activity_col"],
                "properties": {
                    "case_col": {"type": "string"},
                    "activity_col": {"type": "string"},
                    "bottom_n": {"type": "integer", "default": 5}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_rarest_paths";
        let case_col = str_arg(args, "case_col", NAME)?;
        let act_col = str_arg(args, "activity_col", NAME)?;
        let bottom_n = usize_arg(args, "bottom_n", 5, NAME)?;
        let traces = traces_for(dataset, case_col, act_col, None, NAME)?;
        let variants = eventlog::variant_counts(&traces);
        let mut rare: Vec<_> = variants
            .iter()
            .skip(variants.len().saturating_sub(bottom_n))
            .cloned()
            .collect();
        rare.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(json!({
            "total_unique_paths": variants.len(),
            "total_cases": traces.len(),
            "rarest_paths": path_entries(&rare, traces.len(), 4),
        }))
    }
}

pub struct CaseDurationTool;

impl AnalysisTool for CaseDurationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_case_duration_stats".into(),
            description: "Case duration statistics in hours (first to last event per case).".into(),
            parameters: json!({
                "type": "object",
                "required": ["case_col", "timestamp_col"],
                "properties": {
                    "case_col": {"type": "string"},
                    "timestamp_col": {"type": "string"}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_case_duration_stats";
        let case_col = str_arg(args, "case_col", NAME)?;
        let ts_col = str_arg(args, "timestamp_col", NAME)?;
        // Durations only need ordering; the case column doubles as activity.
        let traces = traces_for(dataset, case_col, case_col, Some(ts_col), NAME)?;
        let durations: Vec<f64> = traces.iter().filter_map(Trace::duration_secs).collect();
        if durations.is_empty() {
            return Err(tool_error(
                NAME,
                format!("Column '{ts_col}' has no parseable timestamps"),
            ));
        }
        Ok(json!({
            "total_cases": traces.len(),
            "mean_duration_hours": hours(stats::mean(&durations)),
            "median_duration_hours": hours(stats::median(&durations)),
            "min_duration_hours": hours(stats::min(&durations)),
            "max_duration_hours": hours(stats::max(&durations)),
            "std_duration_hours": hours(stats::std_dev(&durations)),
        }))
    }
}

pub struct ActivityFrequencyTool;

impl AnalysisTool for ActivityFrequencyTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_activity_frequency".into(),
            description: "How often each activity occurs, with its share of all events.".into(),
            parameters: json!({
                "type": "object",
                "required": ["activity_col"],
                "properties": {
                    "activity_col": {"type": "string"},
                    "top_n": {"type": "integer", "default": 10}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_activity_frequency";
        let act_col = str_arg(args, "activity_col", NAME)?;
        let top_n = usize_arg(args, "top_n", 10, NAME)?;
        let counts = value_counts(column(dataset, act_col, NAME)?);
        let total = dataset.height();
        let top: Vec<Value> = counts
            .iter()
            .take(top_n)
            .map(|(a, n)| {
                json!({"activity": a, "count": n, "percentage": percentage(*n, total, 2)})
            })
            .collect();
        Ok(json!({
            "total_events": total,
            "unique_activities": counts.len(),
            "top_activities": top,
        }))
    }
}

pub struct CaseCountsTool;

impl AnalysisTool for CaseCountsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "count_cases_and_activities".into(),
            description: "Number of events, distinct cases, distinct activities and events per case."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["case_col", "activity_col"],
                "properties": {
                    "case_col": {"type": "string"},
                    "activity_col": {"type": "string"}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "count_cases_and_activities";
        let case_col = str_arg(args, "case_col", NAME)?;
        let act_col = str_arg(args, "activity_col", NAME)?;
        let cases = dataset
            .unique_count(case_col)
            .ok_or_else(|| tool_error(NAME, format!("Column '{case_col}' not found")))?;
        let activities = dataset
            .unique_count(act_col)
            .ok_or_else(|| tool_error(NAME, format!("Column '{act_col}' not found")))?;
        let per_case = if cases == 0 {
            0.0
        } else {
            stats::round_to(dataset.height() as f64 / cases as f64, 2)
        };
        Ok(json!({
            "total_events": dataset.height(),
            "unique_cases": cases,
            "unique_activities": activities,
            "avg_events_per_case": per_case,
        }))
    }
}

pub struct BottlenecksTool;

impl AnalysisTool for BottlenecksTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "find_bottlenecks".into(),
            description: "Activities with the longest average waiting time before them (hours)."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["case_col", "activity_col", "timestamp_col"],
                "properties": {
                    "case_col": {"type": "string"},
                    "activity_col": {"type": "string"},
                    "timestamp_col": {"type": "string"},
                    "top_n": {"type": "integer", "default": 5}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "find_bottlenecks";
        let case_col = str_arg(args, "case_col", NAME)?;
        let act_col = str_arg(args, "activity_col", NAME)?;
        let ts_col = str_arg(args, "timestamp_col", NAME)?;
        let top_n = usize_arg(args, "top_n", 5, NAME)?;
        let traces = traces_for(dataset, case_col, act_col, Some(ts_col), NAME)?;

        let mut waits: Vec<(String, f64)> = eventlog::waiting_times(&traces)
            .into_iter()
            .filter_map(|(act, w)| stats::mean(&w).map(|m| (act, m)))
            .collect();
        waits.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top: Vec<Value> = waits
            .into_iter()
            .take(top_n)
            .map(|(act, secs)| {
                json!({"activity": act, "avg_wait_hours": stats::round_to(secs / 3600.0, 2)})
            })
            .collect();
        Ok(json!({"bottlenecks": top}))
    }
}

#[cfg(test)]
mod tests {
    use crate::builtin::default_registry;
    use crate::builtin::fixtures::orders;
    use serde_json::json;

    fn cols() -> serde_json::Value {
        json!({"case_col": "case_id", "activity_col": "activity"})
    }

    #[test]
    fn path_frequency_counts_variants() {
        let out = default_registry()
            .execute("calculate_path_frequency", &cols(), &orders())
            .unwrap();
        assert_eq!(out["total_cases"], 3);
        assert_eq!(out["total_unique_paths"], 2);
        assert_eq!(out["top_paths"][0]["path"], "Create -> Approve -> Pay");
        assert_eq!(out["top_paths"][0]["count"], 2);
        assert_eq!(out["top_paths"][0]["percentage"], 66.67);
    }

    #[test]
    fn rarest_paths_lists_least_frequent_first() {
        let out = default_registry()
            .execute(
                "get_rarest_paths",
                &json!({"case_col": "case_id", "activity_col": "activity", "bottom_n": 1}),
                &orders(),
            )
            .unwrap();
        assert_eq!(out["rarest_paths"][0]["path"], "Create -> Reject");
        assert_eq!(out["rarest_paths"][0]["percentage"], 33.3333);
    }

    #[test]
    fn case_durations_in_hours() {
        let out = default_registry()
            .execute(
                "get_case_duration_stats",
                &json!({"case_col": "case_id", "timestamp_col": "timestamp"}),
                &orders(),
            )
            .unwrap();
        // 24h, 2.5h, 10min
        assert_eq!(out["total_cases"], 3);
        assert_eq!(out["max_duration_hours"], 24.0);
        assert_eq!(out["median_duration_hours"], 2.5);
    }

    #[test]
    fn counts_cases_and_activities() {
        let out = default_registry()
            .execute("count_cases_and_activities", &cols(), &orders())
            .unwrap();
        assert_eq!(out["unique_cases"], 3);
        assert_eq!(out["unique_activities"], 4);
        assert_eq!(out["avg_events_per_case"], 2.67);
    }

    #[test]
    fn activity_frequency_shares() {
        let out = default_registry()
            .execute("get_activity_frequency", &json!({"activity_col": "activity"}), &orders())
            .unwrap();
        assert_eq!(out["top_activities"][0]["activity"], "Create");
        assert_eq!(out["top_activities"][0]["percentage"], 37.5);
    }

    #[test]
    fn bottlenecks_rank_by_mean_wait() {
        let out = default_registry()
            .execute(
                "find_bottlenecks",
                &json!({
                    "case_col": "case_id",
                    "activity_col": "activity",
                    "timestamp_col": "timestamp"
                }),
                &orders(),
            )
            .unwrap();
        // Pay: (22h + 2h) / 2 = 12h
        assert_eq!(out["bottlenecks"][0]["activity"], "Pay");
        assert_eq!(out["bottlenecks"][0]["avg_wait_hours"], 12.0);
    }

    #[test]
    fn missing_event_column_is_reported() {
        let err = default_registry()
            .execute(
                "calculate_path_frequency",
                &json!({"case_col": "case_id", "activity_col": "step"}),
                &orders(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("Column 'step' not found"));
    }
}
