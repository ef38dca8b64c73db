//! Markdown report assembled from every stage artifact.

use std::fmt::Write as _;

use analyst_types::{AnalystError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{consult, with_feedback};
use crate::stage::{Artifacts, Stage, StageContext, StageKind, StageOutput};

pub const REPORT_FILE: &str = "report.md";

const SYSTEM: &str = "You write the conclusions section of a process-mining report. \
Use only numbers present in the stage results, keep their units, and never invent figures. \
Give three to five concrete findings and recommendations as markdown bullets. \
If a reviewer critique is included, fix what it names.";

pub struct ReportingStage;

#[async_trait]
impl Stage for ReportingStage {
    fn kind(&self) -> StageKind {
        StageKind::Reporting
    }

    fn description(&self) -> &str {
        "Writes the final markdown report from all stage results."
    }

    fn supports_feedback(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        if ctx.artifacts.is_empty() {
            return Err(AnalystError::StageFailed {
                stage: StageKind::Reporting.display_name().to_string(),
                message: "nothing to report yet".into(),
            });
        }
        let mut report = render(&ctx.artifacts);

        let context = serde_json::to_string_pretty(&ctx.artifacts)?;
        let prompt = with_feedback(format!("Stage results:\n{context}"), ctx.feedback.as_deref());
        let conclusions = consult(&ctx, SYSTEM, &prompt)
            .await
            .unwrap_or_else(|| default_conclusions(&ctx.artifacts));
        let _ = write!(report, "\n## Conclusions\n\n{}\n", conclusions.trim());

        let mut path = Value::Null;
        if let Some(dir) = &ctx.output_dir {
            let file = dir.join(REPORT_FILE);
            tokio::fs::write(&file, &report)
                .await
                .map_err(|e| AnalystError::StageFailed {
                    stage: StageKind::Reporting.display_name().to_string(),
                    message: format!("could not write {}: {e}", file.display()),
                })?;
            tracing::info!(path = %file.display(), "Report written");
            path = json!(file.display().to_string());
        }

        Ok(StageOutput::value(json!({
            "report": report,
            "path": path,
        })))
    }
}

fn render(artifacts: &Artifacts) -> String {
    let mut md = String::from("# Process Analysis Report\n");
    let mut section = 0;
    let mut heading = |md: &mut String, title: &str| {
        section += 1;
        let _ = write!(md, "\n## {section}. {title}\n\n");
    };

    if let Some(p) = artifacts.get(StageKind::Profiling) {
        heading(&mut md, "Data Overview");
        let _ = writeln!(
            md,
            "- Rows: {}\n- Columns: {}\n- Exact duplicate rows: {}",
            p["row_count"], p["column_count"], p["duplicates"]
        );
        if let Some(cols) = p.pointer("/event_log/columns").filter(|c| !c.is_null()) {
            let _ = writeln!(
                md,
                "- Event log roles: case `{}`, activity `{}`, timestamp `{}`",
                text(&cols["case"]),
                text(&cols["activity"]),
                text(&cols["timestamp"])
            );
        }
        for issue in list(&p["event_log"]["issues"]) {
            let _ = writeln!(md, "- Issue: {}", text(issue));
        }
    }

    if let Some(c) = artifacts.get(StageKind::Cleaning) {
        heading(&mut md, "Data Cleaning");
        let _ = writeln!(
            md,
            "- Rows before: {}, after: {} ({} removed, {} of them duplicates)\n- Missing values filled: {}",
            c["rows_before"], c["rows_after"], c["rows_removed"], c["duplicates_removed"], c["values_filled"]
        );
        for action in list(&c["fill_actions"]) {
            let _ = writeln!(
                md,
                "- `{}`: {} with {} ({} values)",
                text(&action["column"]),
                text(&action["action"]),
                text(&action["value"]),
                action["filled"]
            );
        }
    }

    if let Some(v) = artifacts.get(StageKind::Visualization) {
        heading(&mut md, "Visual Overview");
        for chart in list(&v["charts"]) {
            let _ = writeln!(md, "- **{}**: {}", text(&chart["title"]), text(&chart["summary_text"]));
        }
    }

    if let Some(d) = artifacts.get(StageKind::Discovery) {
        heading(&mut md, "Process Model");
        let _ = writeln!(
            md,
            "- Cases: {}\n- Activities: {}\n- Distinct transitions: {}\n- Variants: {}\n- Self-loops: {}",
            d["cases"],
            d["activities"],
            d["edges"],
            d["variants"],
            list(&d["loops"]).len()
        );
        for variant in list(&d["top_variants"]).iter().take(3) {
            let _ = writeln!(
                md,
                "- Variant ({} cases, {}%): {}",
                variant["cases"],
                variant["percent"],
                text(&variant["path"])
            );
        }
        match d["mermaid"].as_str().filter(|m| !m.is_empty()) {
            Some(mermaid) => {
                let _ = write!(md, "\n```mermaid\n{mermaid}\n```\n");
            }
            None => md.push_str("\nThe process diagram could not be built.\n"),
        }
    }

    if let Some(a) = artifacts.get(StageKind::Analysis) {
        heading(&mut md, "Performance");
        let cd = &a["case_duration"];
        let unit = text(&cd["unit"]);
        let _ = writeln!(
            md,
            "- Mean case duration: {} {unit}\n- Median: {} {unit}\n- 95th percentile: {} {unit}",
            cd["mean"]["value"], cd["median"]["value"], cd["p95"]["value"]
        );
        for b in list(&a["bottlenecks"]) {
            let _ = writeln!(
                md,
                "- Bottleneck `{}`: mean wait {} {}",
                text(&b["activity"]),
                b["mean_wait"]["value"],
                text(&b["mean_wait"]["unit"])
            );
        }
        let _ = writeln!(
            md,
            "- Cases with rework: {} ({}%)",
            a["rework"]["cases_with_rework"], a["rework"]["percent"]
        );
    }
    md
}

fn default_conclusions(artifacts: &Artifacts) -> String {
    let mut bullets = Vec::new();
    if let Some(b) = artifacts
        .get(StageKind::Analysis)
        .and_then(|a| a["bottlenecks"].get(0))
    {
        bullets.push(format!(
            "- Investigate the wait before `{}` ({} {} on average), the largest delay in the process.",
            text(&b["activity"]),
            b["mean_wait"]["value"],
            text(&b["mean_wait"]["unit"])
        ));
    }
    if let Some(r) = artifacts.get(StageKind::Analysis).map(|a| &a["rework"]) {
        if r["cases_with_rework"].as_u64().unwrap_or(0) > 0 {
            bullets.push(format!(
                "- {}% of cases repeat activities; reducing rework shortens cycle times.",
                r["percent"]
            ));
        }
    }
    if let Some(d) = artifacts.get(StageKind::Discovery) {
        bullets.push(format!(
            "- The log contains {} variants over {} cases.",
            d["variants"], d["cases"]
        ));
    }
    if bullets.is_empty() {
        bullets.push("- Not enough stage results to draw conclusions.".to_string());
    }
    bullets.join("\n")
}

fn list(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}
