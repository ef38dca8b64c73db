//! Restricted, timeout-bounded execution of generated data-query snippets.
//!
//! Snippets are `rhai` scripts run on a raw engine with only the core
//! language, arithmetic, string, collection and math packages, plus the
//! `DataFrame`/`Series` types and the `pd`/`np` helper handles. Failures
//! come back as [`ExecutionError`] values, never as panics.

mod error;
mod executor;
mod frame;
mod library;
mod render;

pub use error::{ErrorKind, ExecutionError, SyntaxIssue};
pub use executor::{ExecutionOutput, ExecutionResult, SandboxExecutor, RESULT_SLOT};
pub use frame::{Frame, Series};
pub use library::{Frames, Numeric};

/// Short reference of the snippet language, for code-generation prompts.
pub const CAPABILITIES: &str = r#"Snippets are Rhai scripts (Rust-like syntax: `let x = ...;`, `for v in list { }`, `if a { } else { }`).
Bound names:
- df: the dataset (DataFrame). df.columns, df.shape, df.len(), df.head(n), df.row(i), df["col"] -> Series
  df.filter_eq(col, value), df.filter_gt(col, n), df.filter_lt(col, n), df.filter_contains(col, text)
  df.sort_by(col), df.sort_by(col, ascending), df.group_count(col) -> map, df.group_agg(by, col, "mean"|"sum"|"min"|"max"|"median"|"std"|"count") -> map
  df.value_counts(col) -> [[value, count], ...], df.unique(col), df.nunique(col)
- Series: s.mean(), s.median(), s.std(), s.sum(), s.min(), s.max(), s.count(), s.quantile(q), s.to_list(), s.unique(), s.nunique(), s.value_counts(), s[i]
- np: np.mean(xs), np.median(xs), np.std(xs), np.sum(xs), np.min(xs), np.max(xs), np.percentile(xs, q)
- pd: pd.to_datetime(text_or_series) -> unix seconds, pd.hours_between(start, end), pd.value_counts(s), pd.unique(s)
- prelude: len, round(x, digits), abs, min(list), max(list), sum(list), sorted(list[, reverse]), enumerate, zip, any, all, list, dict, set, str, int, float, range(a, b)
No imports, files, network or environment access. Assign the final answer to `result`."#;
