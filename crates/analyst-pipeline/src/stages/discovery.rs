//! Process discovery: activities, the directly-follows graph, variants and a
//! Mermaid flow diagram.

use std::collections::BTreeMap;

use analyst_tools::eventlog::{build_traces, directly_follows, format_path, variant_counts};
use analyst_tools::Trace;
use analyst_types::{AnalystError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::event_columns;
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

const MIN_EDGES: usize = 15;
const MAX_EDGES: usize = 50;
const TOP_VARIANTS: usize = 10;

pub struct DiscoveryStage;

#[async_trait]
impl Stage for DiscoveryStage {
    fn kind(&self) -> StageKind {
        StageKind::Discovery
    }

    fn description(&self) -> &str {
        "Builds traces per case and discovers the directly-follows process graph, variants and a Mermaid diagram."
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        let fail = |message: String| AnalystError::StageFailed {
            stage: StageKind::Discovery.display_name().to_string(),
            message,
        };
        let cols = event_columns(&ctx)
            .ok_or_else(|| fail("no case and activity columns could be identified".into()))?;
        let traces = build_traces(&ctx.dataset, &cols)
            .ok_or_else(|| fail(format!("columns {cols:?} are not in the dataset")))?;
        if traces.is_empty() {
            return Err(fail("no events with both a case and an activity".into()));
        }

        let edges = directly_follows(&traces);
        let variants = variant_counts(&traces);
        let activities = activity_counts(&traces);
        let starts = endpoint_counts(&traces, |t| t.activities.first());
        let ends = endpoint_counts(&traces, |t| t.activities.last());
        let loops: Vec<Value> = edges
            .iter()
            .filter(|((from, to), _)| from == to)
            .map(|((from, _), count)| json!({"activity": from, "count": count}))
            .collect();
        let mermaid = mermaid(&edges, &starts, &ends);
        let transitions: usize = edges.iter().map(|(_, n)| n).sum();

        let top_start = starts.first().map(|(a, _)| a.as_str()).unwrap_or("N/A");
        let top_end = ends.first().map(|(a, _)| a.as_str()).unwrap_or("N/A");
        let thoughts = format!(
            "Discovered {} activities and {} distinct transitions ({transitions} transition events) \
             across {} cases and {} variants; {} self-loops. Most common start: '{top_start}', most common end: '{top_end}'. \
             Most frequent transitions: {}.",
            activities.len(),
            edges.len(),
            traces.len(),
            variants.len(),
            loops.len(),
            edges
                .iter()
                .take(3)
                .map(|((a, b), n)| format!("{a} -> {b} ({n})"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!(cases = traces.len(), activities = activities.len(), edges = edges.len(), "Discovered process");

        let report = json!({
            "columns": cols,
            "cases": traces.len(),
            "activities": activities.len(),
            "edges": edges.len(),
            "activity_counts": pairs(&activities, "activity"),
            "start_activities": pairs(&starts, "activity"),
            "end_activities": pairs(&ends, "activity"),
            "top_transitions": edges
                .iter()
                .take(10)
                .map(|((from, to), count)| json!({"from": from, "to": to, "count": count}))
                .collect::<Vec<_>>(),
            "variants": variants.len(),
            "top_variants": variants
                .iter()
                .take(TOP_VARIANTS)
                .map(|(path, count)| json!({
                    "path": format_path(path, 12),
                    "cases": count,
                    "percent": analyst_types::stats::round_to(*count as f64 / traces.len() as f64 * 100.0, 2),
                }))
                .collect::<Vec<_>>(),
            "loops": loops,
            "mermaid": mermaid,
            "thoughts": thoughts,
        });
        Ok(StageOutput::value(report))
    }
}

fn activity_counts(traces: &[Trace]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for a in traces.iter().flat_map(|t| &t.activities) {
        *counts.entry(a).or_default() += 1;
    }
    sorted(counts)
}

fn endpoint_counts<'a>(
    traces: &'a [Trace],
    pick: impl Fn(&'a Trace) -> Option<&'a String>,
) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for a in traces.iter().filter_map(pick) {
        *counts.entry(a).or_default() += 1;
    }
    sorted(counts)
}

/// Most frequent first; ties alphabetical.
fn sorted(counts: BTreeMap<&str, usize>) -> Vec<(String, usize)> {
    let mut v: Vec<(String, usize)> = counts.into_iter().map(|(k, n)| (k.to_string(), n)).collect();
    v.sort_by(|a, b| b.1.cmp(&a.1));
    v
}

fn pairs(counts: &[(String, usize)], key: &str) -> Vec<Value> {
    counts
        .iter()
        .map(|(name, count)| json!({ key: name, "count": count }))
        .collect()
}

/// Mermaid flowchart of the strongest edges.
///
/// Keeps edges with at least 5% of the top frequency, but never fewer than
/// 15 or more than 50.
fn mermaid(
    edges: &[((String, String), usize)],
    starts: &[(String, usize)],
    ends: &[(String, usize)],
) -> String {
    let Some((_, top)) = edges.first() else {
        return String::new();
    };
    let threshold = *top as f64 * 0.05;
    let mut shown: Vec<&((String, String), usize)> =
        edges.iter().filter(|(_, n)| *n as f64 >= threshold).collect();
    if shown.len() > MAX_EDGES {
        shown.truncate(MAX_EDGES);
    } else if shown.len() < MIN_EDGES {
        shown = edges.iter().take(MIN_EDGES).collect();
    }

    let top_starts: Vec<&str> = starts.iter().take(3).map(|(a, _)| a.as_str()).collect();
    let top_ends: Vec<&str> = ends.iter().take(3).map(|(a, _)| a.as_str()).collect();

    let mut lines = vec![
        "graph TD".to_string(),
        "    classDef startNode fill:#e1f5fe,stroke:#01579b,stroke-width:2px;".to_string(),
        "    classDef endNode fill:#fff3e0,stroke:#e65100,stroke-width:2px;".to_string(),
    ];
    let mut ids: BTreeMap<&str, String> = BTreeMap::new();
    for ((from, to), count) in shown {
        for act in [from, to] {
            if ids.contains_key(act.as_str()) {
                continue;
            }
            let id = format!("node{}", ids.len() + 1);
            let label: String = act.replace('"', "'").chars().take(50).collect();
            let class = if top_starts.contains(&act.as_str()) {
                ":::startNode"
            } else if top_ends.contains(&act.as_str()) {
                ":::endNode"
            } else {
                ""
            };
            lines.push(format!("    {id}[\"{label}\"]{class}"));
            ids.insert(act.as_str(), id);
        }
        lines.push(format!(
            "    {} -->|{count}| {}",
            ids[from.as_str()],
            ids[to.as_str()]
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::order_log;
    use analyst_types::Dataset;

    #[tokio::test]
    async fn discovers_graph_from_event_log() {
        let out = DiscoveryStage
            .execute(StageContext::new(order_log()))
            .await
            .unwrap();
        let v = &out.value;
        assert_eq!(v["columns"]["case"], "case_id");
        assert_eq!(v["cases"], 3);
        assert_eq!(v["activities"], 4);
        assert_eq!(v["start_activities"][0]["activity"], "Create");
        assert_eq!(v["loops"][0]["activity"], "Check");
        assert_eq!(v["top_transitions"][0]["count"], 2);
        assert_eq!(v["variants"], 3);

        let mermaid = v["mermaid"].as_str().unwrap();
        assert!(mermaid.starts_with("graph TD"));
        assert!(mermaid.contains("[\"Create\"]:::startNode"));
        assert!(mermaid.contains("-->|"));
    }

    #[tokio::test]
    async fn data_without_roles_fails() {
        let ds = Dataset::from_csv_str("x,y\n1,2\n").unwrap();
        let err = DiscoveryStage.execute(StageContext::new(ds)).await.unwrap_err();
        assert!(matches!(err, AnalystError::StageFailed { .. }));
    }

    #[test]
    fn mermaid_is_empty_without_edges() {
        assert_eq!(mermaid(&[], &[], &[]), "");
    }
}
