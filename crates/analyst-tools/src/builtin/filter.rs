use analyst_types::{Dataset, Result};
use serde_json::{json, Value};

use super::percentage;
use crate::tool::{
    bool_arg, cell_json, cell_matches, f64_arg, str_arg, tool_error, AnalysisTool,
    ToolArgs, ToolDefinition,
};

/// Common output shape: sizes before and after plus the matched share.
fn filter_summary(dataset: &Dataset, filtered: &Dataset, sample: bool) -> Value {
    let mut out = json!({
        "original_rows": dataset.height(),
        "filtered_rows": filtered.height(),
        "percentage": percentage(filtered.height(), dataset.height(), 2),
    });
    if sample {
        let rows: Vec<Value> = filtered
            .rows()
            .iter()
            .take(5)
            .map(|row| {
                let record: serde_json::Map<String, Value> = filtered
                    .columns()
                    .iter()
                    .cloned()
                    .zip(row.iter().map(cell_json))
                    .collect();
                Value::Object(record)
            })
            .collect();
        out["sample"] = Value::Array(rows);
    }
    out
}

pub struct FilterValueTool;

impl AnalysisTool for FilterValueTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "filter_by_value".into(),
            description: "Count rows where a column equals a value, with a sample of matches."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["column", "value"],
                "properties": {
                    "column": {"type": "string"},
                    "value": {}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "filter_by_value";
        let col = str_arg(args, "column", NAME)?;
        let idx = dataset
            .column_index(col)
            .ok_or_else(|| tool_error(NAME, format!("Column '{col}' not found")))?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        let filtered = dataset.filter_rows(|row| cell_matches(&row[idx], &value));
        Ok(filter_summary(dataset, &filtered, true))
    }
}

pub struct FilterRangeTool;

impl AnalysisTool for FilterRangeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "filter_numeric_range".into(),
            description: "Count rows whose numeric column lies within [min_val, max_val].".into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {
                    "column": {"type": "string"},
                    "min_val": {"type": "number"},
                    "max_val": {"type": "number"}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "filter_numeric_range";
        let col = str_arg(args, "column", NAME)?;
        let min = f64_arg(args, "min_val", NAME)?;
        let max = f64_arg(args, "max_val", NAME)?;
        let idx = dataset
            .column_index(col)
            .ok_or_else(|| tool_error(NAME, format!("Column '{col}' not found")))?;
        let filtered = dataset.filter_rows(|row| match row[idx].as_f64() {
            Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
            None => false,
        });
        Ok(filter_summary(dataset, &filtered, false))
    }
}

pub struct FilterContainsTool;

impl AnalysisTool for FilterContainsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "filter_contains".into(),
            description: "Count rows where a column's text contains a substring.".into(),
            parameters: json!({
                "type": "object",
                "required": ["column", "substring"],
                "properties": {
                    "column": {"type": "string"},
                    "substring": {"type": "string"},
                    "case_sensitive": {"type": "boolean", "default": false}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "filter_contains";
        let col = str_arg(args, "column", NAME)?;
        let needle = str_arg(args, "substring", NAME)?;
        let case_sensitive = bool_arg(args, "case_sensitive", false, NAME)?;
        let idx = dataset
            .column_index(col)
            .ok_or_else(|| tool_error(NAME, format!("Column '{col}' not found")))?;

        let pattern = format!(
            "{}{}",
            if case_sensitive { "" } else { "(?i)" },
            regex::escape(needle)
        );
        let re = regex::Regex::new(&pattern).map_err(|e| tool_error(NAME, e.to_string()))?;
        let filtered =
            dataset.filter_rows(|row| !row[idx].is_null() && re.is_match(&row[idx].to_string()));
        Ok(filter_summary(dataset, &filtered, false))
    }
}

#[cfg(test)]
mod tests {
    use crate::builtin::default_registry;
    use crate::builtin::fixtures::orders;
    use serde_json::json;

    #[test]
    fn filter_by_value_matches_numbers_and_text() {
        let r = default_registry();
        let out = r
            .execute("filter_by_value", &json!({"column": "amount", "value": 250}), &orders())
            .unwrap();
        assert_eq!(out["filtered_rows"], 3);
        assert_eq!(out["percentage"], 37.5);
        assert_eq!(out["sample"][0]["region"], "South");

        let out = r
            .execute("filter_by_value", &json!({"column": "activity", "value": "Reject"}), &orders())
            .unwrap();
        assert_eq!(out["filtered_rows"], 1);
    }

    #[test]
    fn numeric_range_is_inclusive_and_skips_nulls() {
        let out = default_registry()
            .execute(
                "filter_numeric_range",
                &json!({"column": "amount", "min_val": 40, "max_val": 100}),
                &orders(),
            )
            .unwrap();
        assert_eq!(out["filtered_rows"], 4);
    }

    #[test]
    fn contains_is_case_insensitive_by_default() {
        let r = default_registry();
        let out = r
            .execute("filter_contains", &json!({"column": "activity", "substring": "app"}), &orders())
            .unwrap();
        assert_eq!(out["filtered_rows"], 2);
        let out = r
            .execute(
                "filter_contains",
                &json!({"column": "activity", "substring": "app", "case_sensitive": true}),
                &orders(),
            )
            .unwrap();
        assert_eq!(out["filtered_rows"], 0);
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let out = default_registry()
            .execute("filter_contains", &json!({"column": "activity", "substring": ".*"}), &orders())
            .unwrap();
        assert_eq!(out["filtered_rows"], 0);
    }
}
