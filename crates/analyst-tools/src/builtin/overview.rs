use analyst_types::{stats, Dataset, Result};
use serde_json::{json, Map, Value};

use super::value_counts;
use crate::tool::{
    bool_arg, column, numeric, str_arg, tool_error, usize_arg, AnalysisTool, ToolArgs,
    ToolDefinition,
};

fn round4(v: Option<f64>) -> Value {
    v.map(|x| json!(stats::round_to(x, 4))).unwrap_or(Value::Null)
}

fn numeric_summary(values: &[f64]) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("count".into(), json!(values.len()));
    m.insert("mean".into(), round4(stats::mean(values)));
    m.insert("std".into(), round4(stats::std_dev(values)));
    m.insert("min".into(), round4(stats::min(values)));
    m.insert("25%".into(), round4(stats::quantile(values, 0.25)));
    m.insert("50%".into(), round4(stats::median(values)));
    m.insert("75%".into(), round4(stats::quantile(values, 0.75)));
    m.insert("max".into(), round4(stats::max(values)));
    m
}

pub struct DataFrameInfoTool;

impl AnalysisTool for DataFrameInfoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_dataframe_info".into(),
            description: "Basic information about the dataset: size, column names and types."
                .into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn execute(&self, _args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        let dtypes: Map<String, Value> = dataset
            .columns()
            .iter()
            .map(|c| {
                let ty = dataset.column_type(c).map(|t| t.to_string()).unwrap_or_default();
                (c.clone(), Value::String(ty))
            })
            .collect();
        Ok(json!({
            "rows": dataset.height(),
            "columns": dataset.width(),
            "column_names": dataset.columns(),
            "dtypes": dtypes,
        }))
    }
}

pub struct ColumnStatsTool;

impl AnalysisTool for ColumnStatsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_column_stats".into(),
            description: "Detailed statistics for one column: counts, nulls, uniques, and numeric summary."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {"column": {"type": "string"}}
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_column_stats";
        let col = str_arg(args, "column", NAME)?;
        let cells = column(dataset, col, NAME)?;
        let nulls = cells.iter().filter(|c| c.is_null()).count();
        let ty = dataset.column_type(col).unwrap_or(analyst_types::ColumnType::Empty);

        let mut out = Map::new();
        out.insert("column".into(), json!(col));
        out.insert("dtype".into(), json!(ty.to_string()));
        out.insert("non_null_count".into(), json!(cells.len() - nulls));
        out.insert("null_count".into(), json!(nulls));
        out.insert("unique_count".into(), json!(dataset.unique_count(col).unwrap_or(0)));
        if ty.is_numeric() {
            let values = dataset.numeric_column(col).unwrap_or_default();
            out.insert("mean".into(), round4(stats::mean(&values)));
            out.insert("median".into(), round4(stats::median(&values)));
            out.insert("std".into(), round4(stats::std_dev(&values)));
            out.insert("min".into(), round4(stats::min(&values)));
            out.insert("max".into(), round4(stats::max(&values)));
            out.insert("sum".into(), round4(Some(stats::sum(&values))));
        }
        Ok(Value::Object(out))
    }
}

pub struct DescribeTool;

impl AnalysisTool for DescribeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_describe".into(),
            description: "Summary statistics (count, mean, std, quartiles) for numeric columns."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {"columns": {"type": "array", "items": {"type": "string"}}}
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_describe";
        let requested: Vec<String> = match args.get("columns") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| tool_error(NAME, "'columns' must be a list of names"))
                })
                .collect::<Result<_>>()?,
            _ => dataset
                .columns()
                .iter()
                .filter(|c| dataset.column_type(c).is_some_and(|t| t.is_numeric()))
                .cloned()
                .collect(),
        };
        let mut out = Map::new();
        for name in requested {
            let values = numeric(dataset, &name, NAME)?;
            out.insert(name, Value::Object(numeric_summary(&values)));
        }
        Ok(Value::Object(out))
    }
}

pub struct ValueCountsTool;

impl AnalysisTool for ValueCountsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_value_counts".into(),
            description: "Most frequent values in a column, optionally as fractions.".into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {
                    "column": {"type": "string"},
                    "top_n": {"type": "integer", "default": 10},
                    "normalize": {"type": "boolean", "default": false}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_value_counts";
        let col = str_arg(args, "column", NAME)?;
        let top_n = usize_arg(args, "top_n", 10, NAME)?;
        let normalize = bool_arg(args, "normalize", false, NAME)?;
        let cells = column(dataset, col, NAME)?;
        let counts = value_counts(cells.iter().copied());
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        let values: Vec<Value> = counts
            .iter()
            .take(top_n)
            .map(|(v, n)| {
                let count = if normalize {
                    json!(stats::round_to(*n as f64 / total.max(1) as f64, 4))
                } else {
                    json!(n)
                };
                json!({"value": v, "count": count})
            })
            .collect();
        Ok(json!({
            "column": col,
            "total_unique": counts.len(),
            "values": values,
        }))
    }
}

pub struct UniqueValuesTool;

impl AnalysisTool for UniqueValuesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_unique_values".into(),
            description: "Distinct non-null values of a column (up to a limit).".into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {
                    "column": {"type": "string"},
                    "limit": {"type": "integer", "default": 50}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_unique_values";
        let col = str_arg(args, "column", NAME)?;
        let limit = usize_arg(args, "limit", 50, NAME)?;
        let cells = column(dataset, col, NAME)?;
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<String> = cells
            .iter()
            .filter(|c| !c.is_null())
            .map(|c| c.to_string())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        Ok(json!({
            "column": col,
            "total_unique": unique.len(),
            "sample_values": unique.iter().take(limit).collect::<Vec<_>>(),
        }))
    }
}
