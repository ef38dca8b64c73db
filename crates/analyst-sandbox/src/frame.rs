//! `DataFrame` and `Series` script types over [`Dataset`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use analyst_types::{stats, Cell, Dataset};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, FLOAT, INT};

pub(crate) type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) fn script_error<T>(message: impl Into<String>) -> ScriptResult<T> {
    Err(message.into().into())
}

/// The dataset as seen by scripts.
#[derive(Debug, Clone)]
pub struct Frame(pub(crate) Dataset);

/// One column, detached from its frame.
#[derive(Debug, Clone)]
pub struct Series {
    pub(crate) name: String,
    pub(crate) values: Vec<Cell>,
}

pub(crate) fn cell_to_dynamic(cell: &Cell) -> Dynamic {
    match cell {
        Cell::Null => Dynamic::UNIT,
        Cell::Bool(b) => Dynamic::from_bool(*b),
        Cell::Int(i) => Dynamic::from_int(*i),
        Cell::Float(f) => Dynamic::from_float(*f),
        Cell::Text(s) => Dynamic::from(s.clone()),
    }
}

pub(crate) fn dynamic_to_cell(value: &Dynamic) -> Cell {
    if value.is_unit() {
        Cell::Null
    } else if let Ok(b) = value.as_bool() {
        Cell::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Cell::Int(i)
    } else if let Ok(f) = value.as_float() {
        Cell::Float(f)
    } else {
        Cell::Text(value.to_string())
    }
}

pub(crate) fn number(value: &Dynamic) -> Option<f64> {
    value
        .as_int()
        .map(|i| i as f64)
        .or_else(|_| value.as_float())
        .ok()
}

/// Equality used by `filter_eq`: numbers compare numerically, the rest by text.
fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Null, _) | (_, Cell::Null) => false,
            _ => a.to_string() == b.to_string(),
        },
    }
}

/// Non-null values with counts, most frequent first (ties keep first-seen order).
pub(crate) fn counted(values: &[Cell]) -> Vec<(Cell, usize)> {
    let mut out: Vec<(Cell, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for v in values.iter().filter(|c| !c.is_null()) {
        let key = match v.as_f64() {
            Some(n) => format!("n:{n}"),
            None => format!("t:{v}"),
        };
        match index.get(&key) {
            Some(&i) => out[i].1 += 1,
            None => {
                index.insert(key, out.len());
                out.push((v.clone(), 1));
            }
        }
    }
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

fn pairs(counts: Vec<(Cell, usize)>) -> Array {
    counts
        .into_iter()
        .map(|(c, n)| Dynamic::from_array(vec![cell_to_dynamic(&c), Dynamic::from_int(n as INT)]))
        .collect()
}

impl Frame {
    fn index_of(&self, name: &str) -> ScriptResult<usize> {
        match self.0.column_index(name) {
            Some(i) => Ok(i),
            None => script_error(format!(
                "Column '{name}' not found. Available columns: {}",
                self.0.columns().join(", ")
            )),
        }
    }

    pub(crate) fn series(&self, name: &str) -> ScriptResult<Series> {
        let idx = self.index_of(name)?;
        Ok(Series {
            name: name.to_string(),
            values: self.0.rows().iter().map(|r| r[idx].clone()).collect(),
        })
    }

    fn filter(&self, name: &str, pred: impl Fn(&Cell) -> bool) -> ScriptResult<Frame> {
        let idx = self.index_of(name)?;
        Ok(Frame(self.0.filter_rows(|row| pred(&row[idx]))))
    }

    fn threshold(&self, name: &str, value: &Dynamic, keep: Ordering) -> ScriptResult<Frame> {
        let Some(limit) = number(value) else {
            return script_error(format!("expected a number to compare '{name}' against"));
        };
        self.filter(name, |c| {
            c.as_f64()
                .and_then(|v| v.partial_cmp(&limit))
                .is_some_and(|o| o == keep)
        })
    }

    fn groups(&self, by: &str) -> ScriptResult<BTreeMap<String, Vec<usize>>> {
        let idx = self.index_of(by)?;
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in self.0.rows().iter().enumerate() {
            if !row[idx].is_null() {
                groups.entry(row[idx].to_string()).or_default().push(i);
            }
        }
        Ok(groups)
    }

    fn group_agg(&self, by: &str, column: &str, func: &str) -> ScriptResult<Map> {
        let col = self.index_of(column)?;
        let mut out = Map::new();
        for (key, rows) in self.groups(by)? {
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|&i| self.0.rows()[i][col].as_f64())
                .collect();
            out.insert(key.into(), aggregate(func, &values)?);
        }
        Ok(out)
    }

    fn row(&self, i: INT) -> ScriptResult<Map> {
        let Some(row) = usize::try_from(i).ok().and_then(|i| self.0.rows().get(i)) else {
            return script_error(format!("row {i} out of range (0..{})", self.0.height()));
        };
        Ok(self
            .0
            .columns()
            .iter()
            .zip(row)
            .map(|(name, cell)| (name.as_str().into(), cell_to_dynamic(cell)))
            .collect())
    }
}

/// Reduce numbers with a named aggregation.
pub(crate) fn aggregate(func: &str, values: &[f64]) -> ScriptResult<Dynamic> {
    let reduced = match func {
        "count" => return Ok(Dynamic::from_int(values.len() as INT)),
        "sum" => Some(stats::sum(values)),
        "mean" => stats::mean(values),
        "median" => stats::median(values),
        "std" => stats::std_dev(values),
        "min" => stats::min(values),
        "max" => stats::max(values),
        other => {
            return script_error(format!(
                "unknown aggregation '{other}' (use count, sum, mean, median, std, min or max)"
            ))
        }
    };
    Ok(reduced.map(Dynamic::from_float).unwrap_or(Dynamic::UNIT))
}

impl Series {
    pub(crate) fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(Cell::as_f64).collect()
    }

    /// Apply a reduction that needs at least one numeric value.
    pub(crate) fn reduce(&self, label: &str, f: fn(&[f64]) -> Option<f64>) -> ScriptResult<FLOAT> {
        match f(&self.numbers()) {
            Some(v) => Ok(v),
            None => script_error(format!(
                "{label}() needs numeric values; Series '{}' has none usable",
                self.name
            )),
        }
    }

    pub(crate) fn to_list(&self) -> Array {
        self.values.iter().map(cell_to_dynamic).collect()
    }

    pub(crate) fn unique(&self) -> Array {
        let mut seen = HashSet::new();
        self.values
            .iter()
            .filter(|c| !c.is_null() && seen.insert(c.to_string()))
            .map(cell_to_dynamic)
            .collect()
    }

    pub(crate) fn value_counts(&self) -> Array {
        pairs(counted(&self.values))
    }

    fn get(&self, i: INT) -> ScriptResult<Dynamic> {
        let idx = if i < 0 { self.values.len() as INT + i } else { i };
        match usize::try_from(idx).ok().and_then(|i| self.values.get(i)) {
            Some(c) => Ok(cell_to_dynamic(c)),
            None => script_error(format!("index {i} out of range for Series of length {}", self.values.len())),
        }
    }
}

fn clamp(n: INT) -> usize {
    usize::try_from(n).unwrap_or(0)
}

pub(crate) fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<Frame>("DataFrame")
        .register_get("columns", |f: &mut Frame| -> Array {
            f.0.columns().iter().map(|c| Dynamic::from(c.clone())).collect()
        })
        .register_get("shape", |f: &mut Frame| -> Array {
            vec![
                Dynamic::from_int(f.0.height() as INT),
                Dynamic::from_int(f.0.width() as INT),
            ]
        })
        .register_fn("len", |f: &mut Frame| f.0.height() as INT)
        .register_fn("head", |f: &mut Frame| Frame(f.0.head(5)))
        .register_fn("head", |f: &mut Frame, n: INT| Frame(f.0.head(clamp(n))))
        .register_fn("row", |f: &mut Frame, i: INT| f.row(i))
        .register_indexer_get(|f: &mut Frame, name: ImmutableString| f.series(&name))
        .register_fn(
            "filter_eq",
            |f: &mut Frame, col: ImmutableString, value: Dynamic| -> ScriptResult<Frame> {
                let wanted = dynamic_to_cell(&value);
                f.filter(&col, |c| cells_equal(c, &wanted))
            },
        )
        .register_fn(
            "filter_gt",
            |f: &mut Frame, col: ImmutableString, value: Dynamic| {
                f.threshold(&col, &value, Ordering::Greater)
            },
        )
        .register_fn(
            "filter_lt",
            |f: &mut Frame, col: ImmutableString, value: Dynamic| {
                f.threshold(&col, &value, Ordering::Less)
            },
        )
        .register_fn(
            "filter_contains",
            |f: &mut Frame, col: ImmutableString, needle: ImmutableString| {
                let needle = needle.to_lowercase();
                f.filter(&col, |c| {
                    !c.is_null() && c.to_string().to_lowercase().contains(&needle)
                })
            },
        )
        .register_fn("sort_by", |f: &mut Frame, col: ImmutableString| {
            sort_frame(f, &col, true)
        })
        .register_fn(
            "sort_by",
            |f: &mut Frame, col: ImmutableString, ascending: bool| sort_frame(f, &col, ascending),
        )
        .register_fn(
            "group_count",
            |f: &mut Frame, by: ImmutableString| -> ScriptResult<Map> {
                Ok(f.groups(&by)?
                    .into_iter()
                    .map(|(k, rows)| (k.into(), Dynamic::from_int(rows.len() as INT)))
                    .collect())
            },
        )
        .register_fn(
            "group_agg",
            |f: &mut Frame, by: ImmutableString, col: ImmutableString, func: ImmutableString| {
                f.group_agg(&by, &col, &func)
            },
        )
        .register_fn("value_counts", |f: &mut Frame, col: ImmutableString| {
            f.series(&col).map(|s| s.value_counts())
        })
        .register_fn("unique", |f: &mut Frame, col: ImmutableString| {
            f.series(&col).map(|s| s.unique())
        })
        .register_fn("nunique", |f: &mut Frame, col: ImmutableString| {
            f.series(&col).map(|s| s.unique().len() as INT)
        });

    engine
        .register_type_with_name::<Series>("Series")
        .register_get("name", |s: &mut Series| -> ImmutableString { s.name.as_str().into() })
        .register_fn("len", |s: &mut Series| s.values.len() as INT)
        .register_fn("head", |s: &mut Series, n: INT| Series {
            name: s.name.clone(),
            values: s.values.iter().take(clamp(n)).cloned().collect(),
        })
        .register_indexer_get(|s: &mut Series, i: INT| s.get(i))
        .register_fn("mean", |s: &mut Series| s.reduce("mean", stats::mean))
        .register_fn("median", |s: &mut Series| s.reduce("median", stats::median))
        .register_fn("std", |s: &mut Series| s.reduce("std", stats::std_dev))
        .register_fn("min", |s: &mut Series| s.reduce("min", stats::min))
        .register_fn("max", |s: &mut Series| s.reduce("max", stats::max))
        .register_fn("sum", |s: &mut Series| stats::sum(&s.numbers()))
        .register_fn("count", |s: &mut Series| {
            s.values.iter().filter(|c| !c.is_null()).count() as INT
        })
        .register_fn("quantile", |s: &mut Series, q: FLOAT| -> ScriptResult<FLOAT> {
            match stats::quantile(&s.numbers(), q) {
                Some(v) => Ok(v),
                None => script_error("quantile() needs numeric values and q between 0 and 1"),
            }
        })
        .register_fn("to_list", |s: &mut Series| s.to_list())
        .register_fn("unique", |s: &mut Series| s.unique())
        .register_fn("nunique", |s: &mut Series| s.unique().len() as INT)
        .register_fn("value_counts", |s: &mut Series| s.value_counts());
}

fn sort_frame(f: &Frame, col: &str, ascending: bool) -> ScriptResult<Frame> {
    f.index_of(col)?;
    match f.0.sorted_by(col, ascending) {
        Some(sorted) => Ok(Frame(sorted)),
        None => script_error(format!("Column '{col}' not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame(
            Dataset::from_csv_str(
                "region,amount,product\n\
                 North,10,Widget\n\
                 South,20,Gadget\n\
                 North,,Widget\n\
                 East,40,widget pro\n",
            )
            .unwrap(),
        )
    }

    #[test]
    fn series_reductions_skip_nulls() {
        let s = frame().series("amount").unwrap();
        assert_eq!(s.numbers(), vec![10.0, 20.0, 40.0]);
        assert_eq!(s.reduce("max", stats::max).unwrap(), 40.0);
        let text = frame().series("product").unwrap();
        assert!(text.reduce("mean", stats::mean).is_err());
    }

    #[test]
    fn missing_column_lists_available() {
        let err = frame().series("nope").unwrap_err();
        assert!(err.to_string().contains("Available columns: region, amount, product"));
    }

    #[test]
    fn thresholds_compare_numerically() {
        let f = frame();
        let gt = f.threshold("amount", &Dynamic::from_int(15), Ordering::Greater).unwrap();
        assert_eq!(gt.0.height(), 2);
        let lt = f.threshold("amount", &Dynamic::from_float(15.0), Ordering::Less).unwrap();
        assert_eq!(lt.0.height(), 1);
    }

    #[test]
    fn group_agg_by_key() {
        let m = frame().group_agg("region", "amount", "sum").unwrap();
        assert_eq!(m["North"].as_float().unwrap(), 10.0);
        assert_eq!(m["East"].as_float().unwrap(), 40.0);
        assert!(frame().group_agg("region", "amount", "mode").is_err());
    }

    #[test]
    fn value_counts_most_frequent_first() {
        let vc = frame().series("region").unwrap().value_counts();
        let first = vc[0].clone().try_cast::<Array>().unwrap();
        assert_eq!(first[0].clone().into_string().unwrap(), "North");
        assert_eq!(first[1].as_int().unwrap(), 2);
    }

    #[test]
    fn negative_series_index_counts_from_end() {
        let s = frame().series("region").unwrap();
        assert_eq!(s.get(-1).unwrap().into_string().unwrap(), "East");
        assert!(s.get(10).is_err());
    }
}
