//! Performance analysis: case durations, bottlenecks and rework.

use std::collections::BTreeMap;

use analyst_tools::eventlog::{best_time_unit, build_traces, waiting_times};
use analyst_tools::Trace;
use analyst_types::stats::{self, round_to};
use analyst_types::{AnalystError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{duration_value, event_columns};
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

const TOP_BOTTLENECKS: usize = 5;

pub struct AnalysisStage;

#[async_trait]
impl Stage for AnalysisStage {
    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    fn description(&self) -> &str {
        "Case duration statistics (mean, median, p95), bottleneck activities by waiting time, and rework loops."
    }

    fn requires(&self) -> &[StageKind] {
        &[StageKind::Discovery]
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        let fail = |message: String| AnalystError::StageFailed {
            stage: StageKind::Analysis.display_name().to_string(),
            message,
        };
        let cols = event_columns(&ctx)
            .ok_or_else(|| fail("no case and activity columns could be identified".into()))?;
        if cols.timestamp.is_none() {
            return Err(fail("performance analysis needs a timestamp column".into()));
        }
        let traces = build_traces(&ctx.dataset, &cols)
            .ok_or_else(|| fail(format!("columns {cols:?} are not in the dataset")))?;

        let durations: Vec<f64> = traces.iter().filter_map(Trace::duration_secs).collect();
        let mean = stats::mean(&durations)
            .ok_or_else(|| fail("no case has a parseable timestamp".into()))?;
        let (unit, divisor) = best_time_unit(mean);
        let stat = |v: Option<f64>| duration_value(v.unwrap_or(0.0), unit, divisor);

        let case_duration = json!({
            "unit": unit,
            "cases": durations.len(),
            "mean": stat(Some(mean)),
            "median": stat(stats::median(&durations)),
            "p95": stat(stats::quantile(&durations, 0.95)),
            "min": stat(stats::min(&durations)),
            "max": stat(stats::max(&durations)),
        });

        let bottlenecks = bottlenecks(&traces);
        let rework = rework(&traces);

        let slowest = bottlenecks
            .first()
            .map(|b| format!("'{}' ({} {})", b["activity"].as_str().unwrap_or(""), b["mean_wait"]["value"], b["mean_wait"]["unit"].as_str().unwrap_or("")))
            .unwrap_or_else(|| "none".into());
        let thoughts = format!(
            "{} cases take {} {unit} on average (median {}, p95 {}). Longest average wait is before {slowest}. \
             {} of {} cases repeat at least one activity.",
            durations.len(),
            case_duration["mean"]["value"],
            case_duration["median"]["value"],
            case_duration["p95"]["value"],
            rework["cases_with_rework"],
            traces.len()
        );
        tracing::info!(cases = traces.len(), mean_secs = mean, "Analysed process performance");

        Ok(StageOutput::value(json!({
            "columns": cols,
            "case_duration": case_duration,
            "bottlenecks": bottlenecks,
            "rework": rework,
            "thoughts": thoughts,
        })))
    }
}

/// Activities ordered by mean wait before them, longest first.
fn bottlenecks(traces: &[Trace]) -> Vec<Value> {
    let mut waits: Vec<(String, f64, f64, usize)> = waiting_times(traces)
        .into_iter()
        .filter_map(|(activity, w)| {
            let mean = stats::mean(&w)?;
            let max = stats::max(&w)?;
            Some((activity, mean, max, w.len()))
        })
        .collect();
    waits.sort_by(|a, b| b.1.total_cmp(&a.1));
    waits
        .into_iter()
        .take(TOP_BOTTLENECKS)
        .map(|(activity, mean, max, n)| {
            let (unit, divisor) = best_time_unit(mean);
            json!({
                "activity": activity,
                "mean_wait": duration_value(mean, unit, divisor),
                "max_wait": duration_value(max, unit, divisor),
                "occurrences": n,
            })
        })
        .collect()
}

/// Activities executed more than once within the same case.
fn rework(traces: &[Trace]) -> Value {
    let mut repeats: BTreeMap<&str, usize> = BTreeMap::new();
    let mut cases = 0;
    for trace in traces {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for a in &trace.activities {
            *seen.entry(a).or_default() += 1;
        }
        let mut reworked = false;
        for (a, n) in seen.into_iter().filter(|(_, n)| *n > 1) {
            *repeats.entry(a).or_default() += n - 1;
            reworked = true;
        }
        if reworked {
            cases += 1;
        }
    }
    json!({
        "cases_with_rework": cases,
        "percent": if traces.is_empty() { 0.0 } else { round_to(cases as f64 / traces.len() as f64 * 100.0, 2) },
        "repeated_activities": repeats
            .into_iter()
            .map(|(a, n)| json!({"activity": a, "repeats": n}))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::order_log;
    use analyst_types::Dataset;

    #[tokio::test]
    async fn computes_durations_bottlenecks_and_rework() {
        let out = AnalysisStage
            .execute(StageContext::new(order_log()))
            .await
            .unwrap();
        let v = &out.value;
        assert_eq!(v["case_duration"]["unit"], "hours");
        assert_eq!(v["case_duration"]["mean"]["value"], 9.5);
        assert_eq!(v["case_duration"]["max"]["value"], 24.0);
        // Case 1 waits 22 hours before paying.
        assert_eq!(v["bottlenecks"][0]["activity"], "Pay");
        assert_eq!(v["rework"]["cases_with_rework"], 2);
        assert!(v["thoughts"].as_str().unwrap().contains("9.5 hours"));
    }

    #[tokio::test]
    async fn requires_timestamps() {
        let ds = Dataset::from_csv_str("case_id,activity\n1,A\n1,B\n").unwrap();
        let err = AnalysisStage.execute(StageContext::new(ds)).await.unwrap_err();
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn declares_discovery_prerequisite() {
        assert_eq!(AnalysisStage.requires(), &[StageKind::Discovery]);
    }
}
