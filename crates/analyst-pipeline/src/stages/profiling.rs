//! Column profiling and event-log readiness.

use analyst_llm::extract_object;
use analyst_tools::{value_counts, EventLogColumns};
use analyst_types::stats::{self, round_to};
use analyst_types::{ColumnType, Dataset, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{consult, with_feedback};
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

const TOP_VALUES: usize = 10;

const SYSTEM: &str = "You are a data profiling expert preparing a dataset for process mining. \
Given per-column statistics and the detected case/activity/timestamp columns, judge whether the data is a usable event log. \
If a reviewer critique is included, correct the problems it names. \
Reply with JSON only: {\"thoughts\": \"...\", \"recommendations\": [\"...\"]}.";

pub struct ProfilingStage;

#[async_trait]
impl Stage for ProfilingStage {
    fn kind(&self) -> StageKind {
        StageKind::Profiling
    }

    fn description(&self) -> &str {
        "Per-column types, nulls, unique counts and top values; checks whether the data is a usable event log."
    }

    fn supports_feedback(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        let ds = &ctx.dataset;
        let columns: Map<String, Value> = ds
            .columns()
            .iter()
            .map(|name| (name.clone(), column_profile(ds, name)))
            .collect();
        let duplicates = ds.clone().drop_duplicates();
        let event_log = readiness(ds);

        let mut report = json!({
            "row_count": ds.height(),
            "column_count": ds.width(),
            "duplicates": duplicates,
            "columns": columns,
            "event_log": event_log,
        });

        let prompt = with_feedback(
            format!("Column statistics:\n{}", serde_json::to_string_pretty(&report)?),
            ctx.feedback.as_deref(),
        );
        let thoughts = match consult(&ctx, SYSTEM, &prompt).await {
            Some(reply) => match extract_object(&reply) {
                Some(mut obj) => {
                    if let Some(recs) = obj.remove("recommendations") {
                        report["event_log"]["recommendations"] = recs;
                    }
                    obj.remove("thoughts")
                        .and_then(|t| t.as_str().map(str::to_string))
                        .unwrap_or(reply)
                }
                None => reply,
            },
            None => summary(ds, duplicates, &report["event_log"]),
        };
        report["thoughts"] = Value::String(thoughts);

        tracing::info!(rows = ds.height(), columns = ds.width(), duplicates, "Profiled dataset");
        Ok(StageOutput::value(report))
    }
}

fn column_profile(ds: &Dataset, name: &str) -> Value {
    let rows = ds.height();
    let nulls = ds.null_count(name).unwrap_or(0);
    let ty = ds.column_type(name).unwrap_or(ColumnType::Empty);
    let counts = ds.column_values(name).map(value_counts).unwrap_or_default();

    let mut profile = json!({
        "type": ty.to_string(),
        "nulls": nulls,
        "null_percent": percent(nulls, rows),
        "unique": ds.unique_count(name).unwrap_or(0),
        "top_values": counts
            .iter()
            .take(TOP_VALUES)
            .map(|(value, count)| json!({
                "value": value.chars().take(100).collect::<String>(),
                "count": count,
                "percent": percent(*count, rows),
            }))
            .collect::<Vec<_>>(),
    });
    if let Some((mode, _)) = counts.first() {
        profile["mode"] = Value::String(mode.clone());
    }
    if ty.is_numeric() {
        if let Some(values) = ds.numeric_column(name).filter(|v| !v.is_empty()) {
            profile["numeric"] = json!({
                "mean": stats::mean(&values).map(|v| round_to(v, 4)),
                "median": stats::median(&values),
                "std": stats::std_dev(&values).map(|v| round_to(v, 4)),
                "min": stats::min(&values),
                "max": stats::max(&values),
            });
        }
    }
    profile
}

/// Score how usable the data is as an event log (0-100).
fn readiness(ds: &Dataset) -> Value {
    let Some(cols) = EventLogColumns::detect(ds) else {
        return json!({
            "ready": false,
            "score": 0,
            "columns": null,
            "issues": ["No case and activity columns could be identified."],
        });
    };

    let mut score = 70;
    let mut issues = Vec::new();
    match &cols.timestamp {
        Some(ts) => {
            score += 20;
            let ratio = ds.timestamp_ratio(ts).unwrap_or(0.0);
            if ratio < 1.0 {
                issues.push(format!(
                    "{}% of '{ts}' values are not parseable timestamps.",
                    round_to((1.0 - ratio) * 100.0, 2)
                ));
            }
        }
        None => issues.push("No timestamp column; durations cannot be computed.".to_string()),
    }
    for role in [&cols.case, &cols.activity] {
        let nulls = ds.null_count(role).unwrap_or(0);
        if nulls > 0 {
            issues.push(format!("'{role}' has {nulls} missing values."));
        }
    }
    let cases = ds.unique_count(&cols.case).unwrap_or(0);
    if cases > 0 && cases * 10 > ds.height() * 9 {
        issues.push(format!(
            "'{}' is almost unique per row ({cases} of {} rows); cases may be single events.",
            cols.case,
            ds.height()
        ));
    } else {
        score += 10;
    }

    json!({
        "ready": cols.timestamp.is_some(),
        "score": score,
        "columns": cols,
        "cases": cases,
        "activities": ds.unique_count(&cols.activity).unwrap_or(0),
        "issues": issues,
    })
}

fn summary(ds: &Dataset, duplicates: usize, event_log: &Value) -> String {
    let null_cols: Vec<String> = ds
        .columns()
        .iter()
        .filter_map(|c| {
            let n = ds.null_count(c)?;
            (n > 0).then(|| format!("{c} ({n})"))
        })
        .collect();
    let mut text = format!(
        "{} rows and {} columns; {} exact duplicate rows. Columns with missing values: {}.",
        ds.height(),
        ds.width(),
        duplicates,
        if null_cols.is_empty() { "none".to_string() } else { null_cols.join(", ") }
    );
    match event_log.get("columns").filter(|c| !c.is_null()) {
        Some(cols) => text.push_str(&format!(
            " Event log roles: case = {}, activity = {}, timestamp = {}; readiness score {}.",
            cols["case"], cols["activity"], cols["timestamp"], event_log["score"]
        )),
        None => text.push_str(" The data does not look like an event log."),
    }
    text
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 / whole as f64 * 100.0, 2)
    }
}
