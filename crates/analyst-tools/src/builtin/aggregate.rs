use std::collections::HashMap;

use analyst_types::{stats, Dataset, Result};
use serde_json::{json, Map, Value};

use super::value_counts;
use crate::tool::{
    bool_arg, cell_json, column, f64_arg, numeric, str_arg, tool_error, usize_arg, AnalysisTool,
    ToolArgs, ToolDefinition,
};

const AGG_FUNCS: &[&str] = &["mean", "sum", "count", "min", "max", "median", "std"];

fn aggregate(func: &str, values: &[f64]) -> Option<f64> {
    match func {
        "mean" => stats::mean(values),
        "sum" => Some(stats::sum(values)),
        "count" => Some(values.len() as f64),
        "min" => stats::min(values),
        "max" => stats::max(values),
        "median" => stats::median(values),
        "std" => stats::std_dev(values),
        _ => None,
    }
}

pub struct GroupCountTool;

impl AnalysisTool for GroupCountTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "group_and_count".into(),
            description: "Group rows by a column and count each group.".into(),
            parameters: json!({
                "type": "object",
                "required": ["group_by"],
                "properties": {
                    "group_by": {"type": "string"},
                    "top_n": {"type": "integer", "default": 10}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "group_and_count";
        let by = str_arg(args, "group_by", NAME)?;
        let top_n = usize_arg(args, "top_n", 10, NAME)?;
        let counts = value_counts(column(dataset, by, NAME)?);
        let groups: Vec<Value> = counts
            .iter()
            .take(top_n)
            .map(|(g, n)| json!({"group": g, "count": n}))
            .collect();
        Ok(json!({
            "group_by": by,
            "total_groups": counts.len(),
            "top_groups": groups,
        }))
    }
}

pub struct GroupAggregateTool;

impl AnalysisTool for GroupAggregateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "group_and_aggregate".into(),
            description: "Group by one column and aggregate another (mean, sum, count, min, max, median, std)."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["group_by", "agg_column"],
                "properties": {
                    "group_by": {"type": "string"},
                    "agg_column": {"type": "string"},
                    "agg_func": {"type": "string", "default": "mean"},
                    "top_n": {"type": "integer", "default": 10}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "group_and_aggregate";
        let by = str_arg(args, "group_by", NAME)?;
        let agg_col = str_arg(args, "agg_column", NAME)?;
        let func = match args.get("agg_func") {
            Some(v) => v
                .as_str()
                .ok_or_else(|| tool_error(NAME, "'agg_func' must be a string"))?,
            None => "mean",
        };
        let top_n = usize_arg(args, "top_n", 10, NAME)?;
        if !AGG_FUNCS.contains(&func) {
            return Err(tool_error(
                NAME,
                format!("Invalid agg_func. Use one of: {}", AGG_FUNCS.join(", ")),
            ));
        }
        let keys = column(dataset, by, NAME)?;
        let vals = column(dataset, agg_col, NAME)?;

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
        for (k, v) in keys.iter().zip(&vals) {
            if k.is_null() {
                continue;
            }
            let key = k.to_string();
            let bucket = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            if let Some(x) = v.as_f64() {
                bucket.push(x);
            }
        }

        let mut results: Vec<(String, Option<f64>)> = order
            .into_iter()
            .map(|g| {
                let value = groups.get(&g).and_then(|vals| aggregate(func, vals));
                (g, value)
            })
            .collect();
        results.sort_by(|a, b| {
            b.1.unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.1.unwrap_or(f64::NEG_INFINITY))
        });
        let results: Vec<Value> = results
            .into_iter()
            .take(top_n)
            .map(|(g, v)| json!({"group": g, "value": v.map(|x| stats::round_to(x, 4))}))
            .collect();
        Ok(json!({
            "group_by": by,
            "agg_column": agg_col,
            "agg_func": func,
            "results": results,
        }))
    }
}

pub struct TopNTool;

impl AnalysisTool for TopNTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_top_n".into(),
            description: "Top N rows sorted by a column (descending unless ascending=true).".into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {
                    "column": {"type": "string"},
                    "n": {"type": "integer", "default": 10},
                    "ascending": {"type": "boolean", "default": false}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_top_n";
        let col = str_arg(args, "column", NAME)?;
        let n = usize_arg(args, "n", 10, NAME)?;
        let ascending = bool_arg(args, "ascending", false, NAME)?;
        let sorted = dataset
            .sorted_by(col, ascending)
            .ok_or_else(|| tool_error(NAME, format!("Column '{col}' not found")))?;
        let rows: Vec<Value> = sorted
            .rows()
            .iter()
            .take(n)
            .map(|row| {
                let record: Map<String, Value> = sorted
                    .columns()
                    .iter()
                    .cloned()
                    .zip(row.iter().map(cell_json))
                    .collect();
                Value::Object(record)
            })
            .collect();
        Ok(json!({"sorted_by": col, "ascending": ascending, "rows": rows}))
    }
}

pub struct CorrelationTool;

impl AnalysisTool for CorrelationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_correlation".into(),
            description: "Pearson correlation between two numeric columns.".into(),
            parameters: json!({
                "type": "object",
                "required": ["column1", "column2"],
                "properties": {
                    "column1": {"type": "string"},
                    "column2": {"type": "string"}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_correlation";
        let c1 = str_arg(args, "column1", NAME)?;
        let c2 = str_arg(args, "column2", NAME)?;
        let a = column(dataset, c1, NAME)?;
        let b = column(dataset, c2, NAME)?;
        // Pairwise complete observations only.
        let (xs, ys): (Vec<f64>, Vec<f64>) = a
            .iter()
            .zip(&b)
            .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
            .unzip();
        let corr = stats::correlation(&xs, &ys).map(|r| stats::round_to(r, 4));
        Ok(json!({"column1": c1, "column2": c2, "correlation": corr}))
    }
}

pub struct PercentileTool;

impl AnalysisTool for PercentileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_percentile".into(),
            description: "Value at a given percentile (0-100) of a numeric column.".into(),
            parameters: json!({
                "type": "object",
                "required": ["column", "percentile"],
                "properties": {
                    "column": {"type": "string"},
                    "percentile": {"type": "number"}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_percentile";
        let col = str_arg(args, "column", NAME)?;
        let p = f64_arg(args, "percentile", NAME)?
            .ok_or_else(|| tool_error(NAME, "'percentile' is required"))?;
        if !(0.0..=100.0).contains(&p) {
            return Err(tool_error(NAME, "percentile must be between 0 and 100"));
        }
        let values = numeric(dataset, col, NAME)?;
        let value = stats::quantile(&values, p / 100.0).map(|v| stats::round_to(v, 4));
        Ok(json!({"column": col, "percentile": p, "value": value}))
    }
}

pub struct QuantilesTool;

impl AnalysisTool for QuantilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_quantiles".into(),
            description: "Several quantiles of a numeric column (default quartiles).".into(),
            parameters: json!({
                "type": "object",
                "required": ["column"],
                "properties": {
                    "column": {"type": "string"},
                    "q": {"type": "array", "items": {"type": "number"}}
                }
            }),
        }
    }

    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value> {
        const NAME: &str = "get_quantiles";
        let col = str_arg(args, "column", NAME)?;
        let qs: Vec<f64> = match args.get("q") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .filter(|q| (0.0..=1.0).contains(q))
                        .ok_or_else(|| tool_error(NAME, "'q' must hold numbers in [0, 1]"))
                })
                .collect::<Result<_>>()?,
            _ => vec![0.25, 0.5, 0.75],
        };
        let values = numeric(dataset, col, NAME)?;
        let mut out = Map::new();
        for q in qs {
            let v = stats::quantile(&values, q).map(|v| stats::round_to(v, 4));
            out.insert(format!("{}%", (q * 100.0).round() as i64), json!(v));
        }
        Ok(json!({"column": col, "quantiles": out}))
    }
}
