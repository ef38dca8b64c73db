//! Chart specifications (series data, not images) for the standard
//! process-mining views.

use std::collections::BTreeMap;

use analyst_tools::eventlog::{best_time_unit, build_traces, waiting_times};
use analyst_tools::{value_counts, EventLogColumns, Trace};
use analyst_types::stats::{self, round_to};
use analyst_types::{AnalystError, Dataset, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::event_columns;
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

const HISTOGRAM_BINS: usize = 10;
pub const CHARTS_FILE: &str = "charts.json";

pub struct VisualizationStage;

#[async_trait]
impl Stage for VisualizationStage {
    fn kind(&self) -> StageKind {
        StageKind::Visualization
    }

    fn description(&self) -> &str {
        "Chart data for activity frequency, events over time, case durations and waiting times between events."
    }

    fn requires(&self) -> &[StageKind] {
        &[StageKind::Profiling]
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        let cols = event_columns(&ctx).ok_or_else(|| AnalystError::StageFailed {
            stage: StageKind::Visualization.display_name().to_string(),
            message: "no activity column to chart".into(),
        })?;
        let ds = &ctx.dataset;

        let mut charts = vec![activity_chart(ds, &cols)];
        let mut skipped = Vec::new();
        match &cols.timestamp {
            Some(ts) => {
                charts.push(events_over_time(ds, ts));
                let traces = build_traces(ds, &cols).unwrap_or_default();
                charts.extend(case_duration_chart(&traces));
                charts.extend(inter_event_chart(&traces));
            }
            None => skipped.push("events_over_time, case_duration and inter_event_time need a timestamp column"),
        }

        let mut saved = Value::Null;
        if let Some(dir) = &ctx.output_dir {
            let path = dir.join(CHARTS_FILE);
            match tokio::fs::write(&path, serde_json::to_vec_pretty(&charts)?).await {
                Ok(()) => saved = json!(path.display().to_string()),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not save chart specifications"),
            }
        }

        let thoughts = charts
            .iter()
            .filter_map(|c| c.get("summary_text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(charts = charts.len(), "Prepared chart specifications");
        Ok(StageOutput::value(json!({
            "charts": charts,
            "skipped": skipped,
            "file": saved,
            "thoughts": thoughts,
        })))
    }
}

fn activity_chart(ds: &Dataset, cols: &EventLogColumns) -> Value {
    let counts = ds
        .column_values(&cols.activity)
        .map(value_counts)
        .unwrap_or_default();
    let top: Vec<&(String, usize)> = counts.iter().take(10).collect();
    let summary = match top.first() {
        Some((name, n)) => format!("Most frequent activity is '{name}' with {n} events."),
        None => "No activities recorded.".to_string(),
    };
    json!({
        "name": "activity_distribution",
        "kind": "bar",
        "title": format!("Activity frequency ({})", cols.activity),
        "unit": "events",
        "labels": top.iter().map(|(k, _)| k).collect::<Vec<_>>(),
        "values": top.iter().map(|(_, v)| v).collect::<Vec<_>>(),
        "summary_text": summary,
    })
}

fn events_over_time(ds: &Dataset, column: &str) -> Value {
    let mut per_day: BTreeMap<String, usize> = BTreeMap::new();
    for dt in ds.column_values(column).into_iter().flatten().filter_map(|c| c.as_datetime()) {
        *per_day.entry(dt.date().format("%Y-%m-%d").to_string()).or_default() += 1;
    }
    let first = per_day.keys().next().cloned();
    let last = per_day.keys().next_back().cloned();
    let span_days = match (&first, &last) {
        (Some(a), Some(b)) => match (
            chrono::NaiveDate::parse_from_str(a, "%Y-%m-%d"),
            chrono::NaiveDate::parse_from_str(b, "%Y-%m-%d"),
        ) {
            (Ok(a), Ok(b)) => (b - a).num_days() + 1,
            _ => 0,
        },
        _ => 0,
    };
    json!({
        "name": "events_over_time",
        "kind": "histogram",
        "title": format!("Events per day ({column})"),
        "unit": "events per day",
        "labels": per_day.keys().collect::<Vec<_>>(),
        "values": per_day.values().collect::<Vec<_>>(),
        "first_day": first,
        "last_day": last,
        "summary_text": format!("Events span {span_days} days."),
    })
}

fn case_duration_chart(traces: &[Trace]) -> Option<Value> {
    let secs: Vec<f64> = traces.iter().filter_map(Trace::duration_secs).collect();
    let mean = stats::mean(&secs)?;
    let (unit, divisor) = best_time_unit(mean);
    let scaled: Vec<f64> = secs.iter().map(|s| s / divisor).collect();
    let (edges, counts) = histogram(&scaled, HISTOGRAM_BINS);
    let median = stats::median(&scaled).unwrap_or(0.0);
    Some(json!({
        "name": "case_duration",
        "kind": "histogram",
        "title": format!("Case duration ({unit})"),
        "unit": unit,
        "bin_edges": edges,
        "values": counts,
        "mean": round_to(mean / divisor, 2),
        "median": round_to(median, 2),
        "summary_text": format!(
            "Cases last {} {unit} on average (median {} {unit}).",
            round_to(mean / divisor, 2),
            round_to(median, 2)
        ),
    }))
}

fn inter_event_chart(traces: &[Trace]) -> Option<Value> {
    let waits: Vec<f64> = waiting_times(traces).into_values().flatten().collect();
    let mean = stats::mean(&waits)?;
    let (unit, divisor) = best_time_unit(mean);
    let scaled: Vec<f64> = waits.iter().map(|s| s / divisor).collect();
    let (edges, counts) = histogram(&scaled, HISTOGRAM_BINS);
    let median = stats::median(&scaled).unwrap_or(0.0);
    Some(json!({
        "name": "inter_event_time",
        "kind": "histogram",
        "title": format!("Time between consecutive events ({unit})"),
        "unit": unit,
        "bin_edges": edges,
        "values": counts,
        "mean": round_to(mean / divisor, 2),
        "median": round_to(median, 4),
        "summary_text": format!(
            "Consecutive events are {} {unit} apart on average.",
            round_to(mean / divisor, 2)
        ),
    }))
}

/// Equal-width bins over `[min, max]`; returns `(edges, counts)`.
fn histogram(values: &[f64], bins: usize) -> (Vec<f64>, Vec<usize>) {
    let (Some(lo), Some(hi)) = (stats::min(values), stats::max(values)) else {
        return (Vec::new(), Vec::new());
    };
    if hi <= lo {
        return (vec![round_to(lo, 2), round_to(hi, 2)], vec![values.len()]);
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0; bins];
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let edges = (0..=bins).map(|i| round_to(lo + width * i as f64, 2)).collect();
    (edges, counts)
}
