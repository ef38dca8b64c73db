use std::collections::BTreeMap;

use analyst_types::{AnalystError, Cell, Dataset, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword arguments passed to a tool.
pub type ToolArgs = Map<String, Value>;

/// Definition of a tool that can be presented to a planner.
///
/// `parameters` is a JSON-schema object; its `required` list and
/// `properties` keys drive argument validation in [`ToolRegistry::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn required_args(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn allowed_args(&self) -> Vec<&str> {
        self.parameters
            .get("properties")
            .and_then(Value::as_object)
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// A deterministic analysis function over the working dataset.
pub trait AnalysisTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn execute(&self, args: &ToolArgs, dataset: &Dataset) -> Result<Value>;
}

/// Registry that holds named tools and dispatches validated calls.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn AnalysisTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl AnalysisTool + 'static) {
        let def = tool.definition();
        self.tools.insert(def.name, Box::new(tool));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnalysisTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalogue text for planners: one line per tool with its required args.
    pub fn describe(&self) -> String {
        let mut lines = vec!["Available analysis tools:".to_string()];
        for tool in self.tools.values() {
            let def = tool.definition();
            lines.push(format!(
                "- **{}**({}): {}",
                def.name,
                def.required_args().join(", "),
                def.description
            ));
        }
        lines.join("\n")
    }

    /// Validate `args` against the tool's schema and run it.
    pub fn execute(&self, name: &str, args: &Value, dataset: &Dataset) -> Result<Value> {
        let tool = self.get(name).ok_or_else(|| AnalystError::UnknownTool {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        let def = tool.definition();

        let empty = ToolArgs::new();
        let args = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(AnalystError::InvalidArguments {
                    tool: name.to_string(),
                    message: format!("expected an object of keyword arguments, got {other}"),
                })
            }
        };

        for required in def.required_args() {
            if !args.contains_key(required) {
                return Err(AnalystError::InvalidArguments {
                    tool: name.to_string(),
                    message: format!("missing required argument '{required}'"),
                });
            }
        }
        let allowed = def.allowed_args();
        if let Some(extra) = args.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(AnalystError::InvalidArguments {
                tool: name.to_string(),
                message: format!("unexpected argument '{extra}'"),
            });
        }

        tracing::debug!(tool = %name, "Executing analysis tool");
        tool.execute(args, dataset)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Argument helpers shared by the built-in tools
// ---------------------------------------------------------------------------

pub(crate) fn tool_error(tool: &str, message: impl Into<String>) -> AnalystError {
    AnalystError::ToolError {
        tool: tool.to_string(),
        message: message.into(),
    }
}

fn invalid(tool: &str, message: String) -> AnalystError {
    AnalystError::InvalidArguments {
        tool: tool.to_string(),
        message,
    }
}

pub(crate) fn str_arg<'a>(args: &'a ToolArgs, key: &str, tool: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(tool, format!("'{key}' must be a string")))
}

pub(crate) fn usize_arg(args: &ToolArgs, key: &str, default: usize, tool: &str) -> Result<usize> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| invalid(tool, format!("'{key}' must be a non-negative integer"))),
    }
}

pub(crate) fn f64_arg(args: &ToolArgs, key: &str, tool: &str) -> Result<Option<f64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(tool, format!("'{key}' must be a number"))),
    }
}

pub(crate) fn bool_arg(args: &ToolArgs, key: &str, default: bool, tool: &str) -> Result<bool> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| invalid(tool, format!("'{key}' must be a boolean"))),
    }
}

/// Cells of a column, or a tool error naming the missing column.
pub(crate) fn column<'a>(dataset: &'a Dataset, name: &str, tool: &str) -> Result<Vec<&'a Cell>> {
    dataset
        .column_values(name)
        .map(|it| it.collect())
        .ok_or_else(|| tool_error(tool, format!("Column '{name}' not found")))
}

pub(crate) fn numeric(dataset: &Dataset, name: &str, tool: &str) -> Result<Vec<f64>> {
    let values = dataset
        .numeric_column(name)
        .ok_or_else(|| tool_error(tool, format!("Column '{name}' not found")))?;
    if values.is_empty() {
        return Err(tool_error(tool, format!("Column '{name}' has no numeric values")));
    }
    Ok(values)
}

/// Convert a cell to JSON for tool output.
pub(crate) fn cell_json(cell: &Cell) -> Value {
    serde_json::to_value(cell).unwrap_or(Value::Null)
}

/// Does a JSON argument match a cell (numbers compare numerically)?
pub(crate) fn cell_matches(cell: &Cell, value: &Value) -> bool {
    match (cell, value) {
        (Cell::Null, Value::Null) => true,
        (Cell::Bool(a), Value::Bool(b)) => a == b,
        (c, Value::Number(n)) => match (c.as_f64(), n.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (c, Value::String(s)) => c.to_string() == *s,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl AnalysisTool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the column name".into(),
                parameters: json!({
                    "type": "object",
                    "required": ["column"],
                    "properties": {
                        "column": {"type": "string"},
                        "top_n": {"type": "integer"}
                    }
                }),
            }
        }

        fn execute(&self, args: &ToolArgs, _dataset: &Dataset) -> Result<Value> {
            Ok(json!({ "column": str_arg(args, "column", "echo")? }))
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r
    }

    #[test]
    fn register_and_lookup() {
        let r = registry();
        assert_eq!(r.len(), 1);
        assert!(r.get("echo").is_some());
        assert_eq!(r.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn execute_validates_and_dispatches() {
        let out = registry()
            .execute("echo", &json!({"column": "a"}), &Dataset::default())
            .unwrap();
        assert_eq!(out, json!({"column": "a"}));
    }

    #[test]
    fn unknown_tool_lists_available_names() {
        let err = registry()
            .execute("nope", &json!({}), &Dataset::default())
            .unwrap_err();
        assert!(matches!(err, AnalystError::UnknownTool { .. }));
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let err = registry()
            .execute("echo", &Value::Null, &Dataset::default())
            .unwrap_err();
        assert!(err.to_string().contains("missing required argument 'column'"));
    }

    #[test]
    fn unexpected_argument_is_rejected() {
        let err = registry()
            .execute("echo", &json!({"column": "a", "bogus": 1}), &Dataset::default())
            .unwrap_err();
        assert!(err.to_string().contains("unexpected argument 'bogus'"));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = registry()
            .execute("echo", &json!(["a"]), &Dataset::default())
            .unwrap_err();
        assert!(matches!(err, AnalystError::InvalidArguments { .. }));
    }

    #[test]
    fn describe_lists_required_args() {
        let text = registry().describe();
        assert!(text.contains("- **echo**(column): Echo the column name"));
    }

    #[test]
    fn cell_matching_is_numeric_aware() {
        assert!(cell_matches(&Cell::Int(3), &json!(3.0)));
        assert!(cell_matches(&Cell::Text("x".into()), &json!("x")));
        assert!(cell_matches(&Cell::Int(3), &json!("3")));
        assert!(!cell_matches(&Cell::Null, &json!(0)));
    }
}
