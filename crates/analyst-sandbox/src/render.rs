//! Printable forms of script values.
//!
//! Large frames, series, lists and dicts are summarised as a head sample
//! plus a size note instead of being rendered in full.

use rhai::{Array, Dynamic, Map};

use crate::frame::{Frame, Series};
use crate::library::{Frames, Numeric};

const MAX_TABLE_ROWS: usize = 20;
const TABLE_HEAD_ROWS: usize = 10;
const MAX_LIST_ITEMS: usize = 50;
const MAX_DICT_KEYS: usize = 20;

/// Friendly type label for a value.
pub(crate) fn type_label(value: &Dynamic) -> String {
    if value.is::<Frame>() {
        "DataFrame".into()
    } else if value.is::<Series>() {
        "Series".into()
    } else if value.is::<Numeric>() || value.is::<Frames>() {
        "module".into()
    } else if value.is_int() {
        "int".into()
    } else if value.is_float() {
        "float".into()
    } else if value.is_bool() {
        "bool".into()
    } else if value.is_string() || value.is_char() {
        "str".into()
    } else if value.is_array() {
        "list".into()
    } else if value.is_map() {
        "dict".into()
    } else if value.is_unit() {
        "None".into()
    } else {
        value.type_name().to_string()
    }
}

/// Top-level rendering; strings are shown bare.
pub(crate) fn render(value: &Dynamic) -> String {
    if let Some(frame) = value.clone().try_cast::<Frame>() {
        return render_frame(&frame);
    }
    if let Some(series) = value.clone().try_cast::<Series>() {
        return render_series(&series);
    }
    if value.is_array() {
        let items = value.clone().try_cast::<Array>().unwrap_or_default();
        return render_list(&items);
    }
    if value.is_map() {
        let map = value.clone().try_cast::<Map>().unwrap_or_default();
        return render_dict(&map);
    }
    if value.is_string() || value.is_char() {
        return value.to_string();
    }
    scalar(value)
}

fn scalar(value: &Dynamic) -> String {
    if let Ok(f) = value.as_float() {
        return format!("{f:?}");
    }
    if value.is_unit() {
        return "None".into();
    }
    value.to_string()
}

/// Rendering inside a container; strings are quoted.
fn nested(value: &Dynamic) -> String {
    if value.is_string() || value.is_char() {
        format!("'{value}'")
    } else if value.is_array() || value.is_map() {
        render(value)
    } else if value.is::<Frame>() {
        "<DataFrame>".into()
    } else if value.is::<Series>() {
        "<Series>".into()
    } else {
        scalar(value)
    }
}

fn render_list(items: &Array) -> String {
    let shown: Vec<String> = items.iter().take(MAX_LIST_ITEMS).map(nested).collect();
    let mut out = format!("[{}]", shown.join(", "));
    if items.len() > MAX_LIST_ITEMS {
        out.push_str(&format!("\n... ({} items total)", items.len()));
    }
    out
}

fn render_dict(map: &Map) -> String {
    let shown: Vec<String> = map
        .iter()
        .take(MAX_DICT_KEYS)
        .map(|(k, v)| format!("'{k}': {}", nested(v)))
        .collect();
    let mut out = format!("{{{}}}", shown.join(", "));
    if map.len() > MAX_DICT_KEYS {
        out.push_str(&format!("\n... ({} keys total)", map.len()));
    }
    out
}

fn render_frame(frame: &Frame) -> String {
    let ds = &frame.0;
    if ds.height() > MAX_TABLE_ROWS {
        format!(
            "{}\n... ({} rows x {} columns, showing first {TABLE_HEAD_ROWS})",
            ds.render(TABLE_HEAD_ROWS),
            ds.height(),
            ds.width()
        )
    } else {
        format!("{}\n[{} rows x {} columns]", ds.render(ds.height()), ds.height(), ds.width())
    }
}

fn render_series(series: &Series) -> String {
    let limit = if series.values.len() > MAX_TABLE_ROWS {
        TABLE_HEAD_ROWS
    } else {
        series.values.len()
    };
    let width = limit.saturating_sub(1).to_string().len();
    let mut lines: Vec<String> = series
        .values
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, v)| format!("{i:<width$}    {v}"))
        .collect();
    if series.values.len() > limit {
        lines.push(format!("... (showing first {limit})"));
    }
    lines.push(format!("Name: {}, Length: {}", series.name, series.values.len()));
    lines.join("\n")
}
