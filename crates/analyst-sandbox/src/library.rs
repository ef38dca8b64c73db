//! Library handles (`np`, `pd`) and prelude functions bound into scripts.

use std::cmp::Ordering;
use std::collections::HashSet;

use analyst_types::{dataset::parse_timestamp, stats, Cell};
use rhai::{Array, Dynamic, Engine, ImmutableString, Map, FLOAT, INT};

use crate::frame::{dynamic_to_cell, number, script_error, ScriptResult, Series};

/// Numeric helpers, bound as `np`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Numeric;

/// Data helpers, bound as `pd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frames;

type Reducer = fn(&[f64]) -> Option<f64>;

const REDUCERS: &[(&str, Reducer)] = &[
    ("mean", stats::mean),
    ("median", stats::median),
    ("std", stats::std_dev),
    ("min", stats::min),
    ("max", stats::max),
];

fn numbers(values: &Array) -> ScriptResult<Vec<f64>> {
    values
        .iter()
        .filter(|v| !v.is_unit())
        .map(|v| match number(v) {
            Some(n) => Ok(n),
            None => script_error(format!("expected numbers, found {}", v.type_name())),
        })
        .collect()
}

fn reduce(label: &str, f: Reducer, values: &[f64]) -> ScriptResult<FLOAT> {
    match f(values) {
        Some(v) => Ok(v),
        None => script_error(format!("{label}() of an empty sequence")),
    }
}

fn percentile(values: &[f64], q: FLOAT) -> ScriptResult<FLOAT> {
    match stats::quantile(values, q / 100.0) {
        Some(v) => Ok(v),
        None => script_error("percentile() needs numeric values and q between 0 and 100"),
    }
}

/// Unix seconds for a timestamp-like value.
fn seconds(value: &Dynamic) -> ScriptResult<INT> {
    if let Ok(i) = value.as_int() {
        return Ok(i);
    }
    if let Some(dt) = dynamic_to_cell(value).as_datetime() {
        return Ok(dt.and_utc().timestamp());
    }
    script_error(format!("cannot interpret '{value}' as a timestamp"))
}

fn truthy(value: &Dynamic) -> bool {
    if value.is_unit() {
        return false;
    }
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if let Some(n) = number(value) {
        return n != 0.0;
    }
    if value.is_string() {
        return !value.to_string().is_empty();
    }
    if value.is_array() {
        return value.clone().try_cast::<Array>().is_some_and(|a| !a.is_empty());
    }
    if value.is_map() {
        return value.clone().try_cast::<Map>().is_some_and(|m| !m.is_empty());
    }
    true
}

fn compare(a: &Dynamic, b: &Dynamic) -> Ordering {
    dynamic_to_cell(a).total_cmp(&dynamic_to_cell(b))
}

fn extreme(values: Array, want: Ordering, label: &str) -> ScriptResult<Dynamic> {
    let mut iter = values.into_iter();
    let Some(first) = iter.next() else {
        return script_error(format!("{label}() arg is an empty sequence"));
    };
    Ok(iter.fold(first, |best, v| {
        if compare(&v, &best) == want {
            v
        } else {
            best
        }
    }))
}

fn sum(values: &Array) -> ScriptResult<Dynamic> {
    if values.iter().all(|v| v.is_int()) {
        let total = values.iter().filter_map(|v| v.as_int().ok()).sum::<INT>();
        return Ok(Dynamic::from_int(total));
    }
    Ok(Dynamic::from_float(stats::sum(&numbers(values)?)))
}

fn to_int(value: &Dynamic) -> ScriptResult<INT> {
    if let Ok(i) = value.as_int() {
        return Ok(i);
    }
    if let Ok(f) = value.as_float() {
        return Ok(f.trunc() as INT);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(INT::from(b));
    }
    match value.to_string().trim().parse::<INT>() {
        Ok(i) => Ok(i),
        Err(_) => script_error(format!("invalid literal for int(): '{value}'")),
    }
}

fn to_float(value: &Dynamic) -> ScriptResult<FLOAT> {
    if let Some(n) = number(value) {
        return Ok(n);
    }
    match value.to_string().trim().parse::<FLOAT>() {
        Ok(f) => Ok(f),
        Err(_) => script_error(format!("could not convert '{value}' to float")),
    }
}

fn into_pairs(items: Array) -> ScriptResult<Map> {
    let mut map = Map::new();
    for item in items {
        let Some(pair) = item.try_cast::<Array>() else {
            return script_error("dict() expects a list of [key, value] pairs");
        };
        match pair.as_slice() {
            [k, v] => {
                map.insert(k.to_string().into(), v.clone());
            }
            _ => return script_error("dict() expects a list of [key, value] pairs"),
        }
    }
    Ok(map)
}

pub(crate) fn register(engine: &mut Engine) {
    engine.register_type_with_name::<Numeric>("np");
    engine.register_type_with_name::<Frames>("pd");

    for &(name, f) in REDUCERS {
        engine.register_fn(name, move |_: &mut Numeric, values: Array| {
            reduce(name, f, &numbers(&values)?)
        });
        engine.register_fn(name, move |_: &mut Numeric, s: Series| reduce(name, f, &s.numbers()));
    }
    engine
        .register_fn("sum", |_: &mut Numeric, values: Array| -> ScriptResult<FLOAT> {
            Ok(stats::sum(&numbers(&values)?))
        })
        .register_fn("sum", |_: &mut Numeric, s: Series| stats::sum(&s.numbers()))
        .register_fn(
            "percentile",
            |_: &mut Numeric, values: Array, q: FLOAT| percentile(&numbers(&values)?, q),
        )
        .register_fn(
            "percentile",
            |_: &mut Numeric, values: Array, q: INT| percentile(&numbers(&values)?, q as FLOAT),
        )
        .register_fn("percentile", |_: &mut Numeric, s: Series, q: FLOAT| {
            percentile(&s.numbers(), q)
        })
        .register_fn("percentile", |_: &mut Numeric, s: Series, q: INT| {
            percentile(&s.numbers(), q as FLOAT)
        });

    engine
        .register_fn("to_datetime", |_: &mut Frames, s: Series| Series {
            name: s.name.clone(),
            values: s
                .values
                .iter()
                .map(|c| {
                    c.as_datetime()
                        .map(|dt| Cell::Int(dt.and_utc().timestamp()))
                        .unwrap_or(Cell::Null)
                })
                .collect(),
        })
        .register_fn("to_datetime", |_: &mut Frames, text: ImmutableString| {
            parse_timestamp(&text)
                .map(|dt| Dynamic::from_int(dt.and_utc().timestamp()))
                .unwrap_or(Dynamic::UNIT)
        })
        .register_fn("to_datetime", |_: &mut Frames, secs: INT| secs)
        .register_fn(
            "hours_between",
            |_: &mut Frames, start: Dynamic, end: Dynamic| -> ScriptResult<FLOAT> {
                Ok((seconds(&end)? - seconds(&start)?) as FLOAT / 3600.0)
            },
        )
        .register_fn("value_counts", |_: &mut Frames, s: Series| s.value_counts())
        .register_fn("unique", |_: &mut Frames, s: Series| s.unique());

    register_prelude(engine);
}

fn register_prelude(engine: &mut Engine) {
    engine
        .register_fn("round", |x: FLOAT, digits: INT| {
            stats::round_to(x, u32::try_from(digits).unwrap_or(0))
        })
        .register_fn("round", |x: INT, _digits: INT| x)
        .register_fn("min", |values: Array| extreme(values, Ordering::Less, "min"))
        .register_fn("max", |values: Array| extreme(values, Ordering::Greater, "max"))
        .register_fn("sum", |values: Array| sum(&values))
        .register_fn("sorted", |mut values: Array| {
            values.sort_by(compare);
            values
        })
        .register_fn("sorted", |mut values: Array, reverse: bool| {
            values.sort_by(compare);
            if reverse {
                values.reverse();
            }
            values
        })
        .register_fn("enumerate", |values: Array| -> Array {
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| Dynamic::from_array(vec![Dynamic::from_int(i as INT), v]))
                .collect()
        })
        .register_fn("zip", |a: Array, b: Array| -> Array {
            a.into_iter()
                .zip(b)
                .map(|(x, y)| Dynamic::from_array(vec![x, y]))
                .collect()
        })
        .register_fn("any", |values: Array| values.iter().any(truthy))
        .register_fn("all", |values: Array| values.iter().all(truthy))
        .register_fn("list", |values: Array| values)
        .register_fn("list", |s: Series| s.to_list())
        .register_fn("list", |m: Map| -> Array {
            m.keys().map(|k| Dynamic::from(k.to_string())).collect()
        })
        .register_fn("dict", Map::new)
        .register_fn("dict", into_pairs)
        .register_fn("set", |values: Array| -> Array {
            let mut seen = HashSet::new();
            values
                .into_iter()
                .filter(|v| seen.insert(dynamic_to_cell(v).to_string()))
                .collect()
        })
        .register_fn("str", |value: Dynamic| -> ImmutableString { value.to_string().into() })
        .register_fn("int", |value: Dynamic| to_int(&value))
        .register_fn("float", |value: Dynamic| to_float(&value));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(xs: &[INT]) -> Array {
        xs.iter().map(|&x| Dynamic::from_int(x)).collect()
    }

    #[test]
    fn extremes_and_sums() {
        let values = ints(&[3, 1, 7]);
        assert_eq!(extreme(values.clone(), Ordering::Greater, "max").unwrap().as_int().unwrap(), 7);
        assert_eq!(extreme(values.clone(), Ordering::Less, "min").unwrap().as_int().unwrap(), 1);
        assert_eq!(sum(&values).unwrap().as_int().unwrap(), 11);
        assert!(extreme(Array::new(), Ordering::Less, "min").is_err());
    }

    #[test]
    fn mixed_sum_is_float() {
        let values = vec![Dynamic::from_int(1), Dynamic::from_float(0.5)];
        assert_eq!(sum(&values).unwrap().as_float().unwrap(), 1.5);
    }

    #[test]
    fn conversions() {
        assert_eq!(to_int(&Dynamic::from("42".to_string())).unwrap(), 42);
        assert_eq!(to_int(&Dynamic::from_float(2.9)).unwrap(), 2);
        assert!(to_int(&Dynamic::from("x".to_string())).is_err());
        assert_eq!(to_float(&Dynamic::from("2.5".to_string())).unwrap(), 2.5);
    }

    #[test]
    fn timestamps_convert_to_seconds() {
        let a = seconds(&Dynamic::from("2024-01-01 10:00:00".to_string())).unwrap();
        let b = seconds(&Dynamic::from("2024-01-01 12:30:00".to_string())).unwrap();
        assert_eq!(b - a, 9000);
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&Dynamic::UNIT));
        assert!(!truthy(&Dynamic::from_int(0)));
        assert!(truthy(&Dynamic::from("x".to_string())));
        assert!(!truthy(&Dynamic::from_array(Array::new())));
    }

    #[test]
    fn dict_from_pairs() {
        let pairs = vec![Dynamic::from_array(ints(&[1, 2]))];
        let m = into_pairs(pairs).unwrap();
        assert_eq!(m["1"].as_int().unwrap(), 2);
        assert!(into_pairs(ints(&[1])).is_err());
    }
}
