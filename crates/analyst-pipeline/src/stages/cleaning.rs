//! Duplicate removal, key-column filtering and null filling.

use analyst_llm::extract_json;
use analyst_tools::value_counts;
use analyst_types::stats::{self, round_to};
use analyst_types::{Cell, ColumnType, Dataset, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{consult, event_columns, with_feedback};
use crate::stage::{Stage, StageContext, StageKind, StageOutput};

const SYSTEM: &str = "You plan data cleaning for a process-mining dataset. \
For each column with missing values choose one action: drop_row, fill_mean, fill_median, fill_mode, fill_empty or skip. \
Numeric columns usually take fill_median, text columns fill_mode; drop rows only when the column is essential. \
Do not report row counts, they are computed for you. If a reviewer critique is included, follow it. \
Reply with a JSON list only: [{\"column\": \"...\", \"action\": \"...\", \"reason\": \"...\"}].";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Action {
    DropRow,
    FillMean,
    FillMedian,
    FillMode,
    FillEmpty,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
struct PlannedAction {
    column: String,
    action: Action,
    #[serde(default)]
    reason: String,
}

pub struct CleaningStage;

#[async_trait]
impl Stage for CleaningStage {
    fn kind(&self) -> StageKind {
        StageKind::Cleaning
    }

    fn description(&self) -> &str {
        "Removes duplicate rows and rows missing case or activity, fills remaining nulls (median for numbers, mode for text)."
    }

    fn supports_feedback(&self) -> bool {
        true
    }

    fn replaces_dataset(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: StageContext) -> Result<StageOutput> {
        let mut ds = ctx.dataset.clone();
        let rows_before = ds.height();
        let duplicates_removed = ds.drop_duplicates();

        // Rows without a case or activity cannot be placed in a trace.
        let mut removed_by_column = serde_json::Map::new();
        let keys: Vec<String> = event_columns(&ctx)
            .map(|c| vec![c.case, c.activity])
            .unwrap_or_default();
        for key in &keys {
            let removed = drop_missing(&mut ds, key);
            if removed > 0 {
                removed_by_column.insert(key.clone(), json!(removed));
            }
        }

        let with_nulls: Vec<(String, usize)> = ds
            .columns()
            .iter()
            .filter_map(|c| Some((c.clone(), ds.null_count(c).filter(|n| *n > 0)?)))
            .collect();
        let plan = self.plan(&ctx, &ds, &with_nulls).await;

        let mut fill_actions = Vec::new();
        for step in plan {
            if !ds.has_column(&step.column) {
                continue;
            }
            match step.action {
                Action::Skip => {}
                Action::DropRow => {
                    let removed = drop_missing(&mut ds, &step.column);
                    if removed > 0 {
                        let entry = removed_by_column.entry(step.column.clone()).or_insert(json!(0));
                        *entry = json!(entry.as_u64().unwrap_or(0) + removed as u64);
                    }
                }
                action => {
                    let Some(value) = fill_value(&ds, &step.column, action) else {
                        continue;
                    };
                    let filled = ds.fill_nulls(&step.column, &value);
                    if filled > 0 {
                        fill_actions.push(json!({
                            "column": step.column,
                            "action": action_name(action),
                            "value": value.to_string(),
                            "filled": filled,
                            "reason": step.reason,
                        }));
                    }
                }
            }
        }

        let rows_after = ds.height();
        let rows_removed = rows_before - rows_after;
        let values_filled: u64 = fill_actions.iter().filter_map(|a| a["filled"].as_u64()).sum();
        let thoughts = format!(
            "Cleaning finished: {rows_before} rows before, {rows_after} after ({rows_removed} removed: \
             {duplicates_removed} duplicates, {} with missing key values). Filled {values_filled} missing values \
             in {} columns.",
            rows_removed - duplicates_removed,
            fill_actions.len()
        );
        tracing::info!(rows_before, rows_after, values_filled, "Cleaned dataset");

        let report = json!({
            "rows_before": rows_before,
            "rows_after": rows_after,
            "rows_removed": rows_removed,
            "duplicates_removed": duplicates_removed,
            "removed_by_column": removed_by_column,
            "values_filled": values_filled,
            "fill_actions": fill_actions,
            "thoughts": thoughts,
        });
        Ok(StageOutput::with_replacement(report, ds))
    }
}

impl CleaningStage {
    /// Model-proposed plan when available, otherwise median/mode filling.
    async fn plan(
        &self,
        ctx: &StageContext,
        ds: &Dataset,
        with_nulls: &[(String, usize)],
    ) -> Vec<PlannedAction> {
        if with_nulls.is_empty() {
            return Vec::new();
        }
        let issues: Vec<Value> = with_nulls
            .iter()
            .map(|(c, n)| {
                json!({
                    "column": c,
                    "type": ds.column_type(c).unwrap_or(ColumnType::Empty).to_string(),
                    "nulls": n,
                })
            })
            .collect();
        let prompt = with_feedback(
            format!("Columns with missing values:\n{}", Value::Array(issues)),
            ctx.feedback.as_deref(),
        );
        if let Some(reply) = consult(ctx, SYSTEM, &prompt).await {
            match extract_json(&reply).map(serde_json::from_value::<Vec<PlannedAction>>) {
                Some(Ok(plan)) => return plan,
                _ => tracing::warn!("Cleaning plan unreadable, using default filling"),
            }
        }
        with_nulls
            .iter()
            .map(|(column, _)| {
                let numeric = ds.column_type(column).is_some_and(|t| t.is_numeric());
                PlannedAction {
                    column: column.clone(),
                    action: if numeric { Action::FillMedian } else { Action::FillMode },
                    reason: "default filling".into(),
                }
            })
            .collect()
    }
}

fn drop_missing(ds: &mut Dataset, column: &str) -> usize {
    match ds.column_index(column) {
        Some(idx) => ds.retain_rows(|row| !row[idx].is_null()),
        None => 0,
    }
}

fn fill_value(ds: &Dataset, column: &str, action: Action) -> Option<Cell> {
    let ty = ds.column_type(column)?;
    let numeric = || ds.numeric_column(column).filter(|v| !v.is_empty());
    let number = |v: f64| {
        if ty == ColumnType::Int && v.fract() == 0.0 {
            Cell::Int(v as i64)
        } else {
            Cell::Float(round_to(v, 4))
        }
    };
    match action {
        Action::FillMean if ty.is_numeric() => numeric().and_then(|v| stats::mean(&v)).map(number),
        Action::FillMedian if ty.is_numeric() => numeric().and_then(|v| stats::median(&v)).map(number),
        Action::FillMode => {
            let (mode, _) = ds.column_values(column).map(value_counts)?.into_iter().next()?;
            Some(Cell::parse(&mode))
        }
        Action::FillEmpty => Some(Cell::Text("Unknown".into())),
        _ => None,
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::DropRow => "drop_row",
        Action::FillMean => "fill_mean",
        Action::FillMedian => "fill_median",
        Action::FillMode => "fill_mode",
        Action::FillEmpty => "fill_empty",
        Action::Skip => "skip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::order_log;
    use analyst_types::TextModel;
    use std::sync::Arc;

    struct Planned(&'static str);

    #[async_trait]
    impl TextModel for Planned {
        fn name(&self) -> &str {
            "planned"
        }
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn removes_duplicates_and_keyless_rows_then_fills() {
        let input = order_log();
        let out = CleaningStage
            .execute(StageContext::new(input.clone()))
            .await
            .unwrap();
        let v = &out.value;
        assert_eq!(v["rows_before"], 12);
        assert_eq!(v["duplicates_removed"], 1);
        assert_eq!(v["removed_by_column"]["case_id"], 1);
        assert_eq!(v["rows_after"], 10);
        assert_eq!(v["values_filled"], 1);
        assert_eq!(v["fill_actions"][0]["action"], "fill_median");

        let cleaned = out.replacement.unwrap();
        assert_eq!(cleaned.height(), 10);
        assert_eq!(cleaned.null_count("amount"), Some(0));
        // The input copy is untouched.
        assert_eq!(input.height(), 12);
    }

    #[tokio::test]
    async fn clean_data_is_returned_unchanged() {
        let ds = Dataset::from_csv_str("case_id,activity\n1,A\n1,B\n").unwrap();
        let out = CleaningStage.execute(StageContext::new(ds.clone())).await.unwrap();
        assert_eq!(out.value["rows_removed"], 0);
        assert_eq!(out.replacement.unwrap(), ds);
    }

    #[tokio::test]
    async fn follows_model_plan() {
        let model: Arc<dyn TextModel> = Arc::new(Planned(
            r#"[{"column": "amount", "action": "drop_row", "reason": "amount is essential"}]"#,
        ));
        let ctx = StageContext::new(order_log()).with_model(Some(model));
        let out = CleaningStage.execute(ctx).await.unwrap();
        assert_eq!(out.value["removed_by_column"]["amount"], 1);
        assert_eq!(out.value["rows_after"], 9);
        assert_eq!(out.value["values_filled"], 0);
    }

    #[tokio::test]
    async fn unreadable_plan_falls_back_to_defaults() {
        let model: Arc<dyn TextModel> = Arc::new(Planned("I would fill things."));
        let ctx = StageContext::new(order_log()).with_model(Some(model));
        let out = CleaningStage.execute(ctx).await.unwrap();
        assert_eq!(out.value["values_filled"], 1);
    }
}
