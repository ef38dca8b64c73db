//! Event-log helpers: case/activity/timestamp column detection, traces,
//! variants, the directly-follows relation and timing statistics.

use std::collections::{BTreeMap, HashMap};

use analyst_types::{ColumnType, Dataset};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const CASE_HINTS: &[&str] = &["case", "case_id", "caseid", "order", "ticket", "id"];
const ACTIVITY_HINTS: &[&str] = &["activity", "event", "action", "task", "step", "status"];
const TIME_HINTS: &[&str] = &["timestamp", "time", "date", "start", "created"];

/// Which columns play the case, activity and timestamp roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogColumns {
    pub case: String,
    pub activity: String,
    pub timestamp: Option<String>,
}

impl EventLogColumns {
    /// Guess roles from column names and content.
    ///
    /// Returns `None` unless both a case and an activity column are found.
    pub fn detect(dataset: &Dataset) -> Option<Self> {
        let names = dataset.columns();
        let pick = |hints: &[&str], taken: &[&str]| -> Option<String> {
            for hint in hints {
                if let Some(c) = names.iter().find(|c| {
                    !taken.contains(&c.as_str()) && c.to_ascii_lowercase().contains(hint)
                }) {
                    return Some(c.clone());
                }
            }
            None
        };

        let case = pick(CASE_HINTS, &[])?;
        let activity = pick(ACTIVITY_HINTS, &[case.as_str()]).or_else(|| {
            // Fall back to the first text column with repeated values.
            names
                .iter()
                .filter(|c| **c != case)
                .find(|c| {
                    dataset.column_type(c) == Some(ColumnType::Text)
                        && dataset.unique_count(c).unwrap_or(0) < dataset.height()
                })
                .cloned()
        })?;
        let timestamp = pick(TIME_HINTS, &[case.as_str(), activity.as_str()])
            .filter(|c| dataset.timestamp_ratio(c).unwrap_or(0.0) >= 0.8)
            .or_else(|| {
                names
                    .iter()
                    .filter(|c| **c != case && **c != activity)
                    .find(|c| {
                        dataset.column_type(c) == Some(ColumnType::Text)
                            && dataset.timestamp_ratio(c).unwrap_or(0.0) >= 0.8
                    })
                    .cloned()
            });
        Some(Self {
            case,
            activity,
            timestamp,
        })
    }

    /// Check that every named column exists in `dataset`.
    pub fn missing_in(&self, dataset: &Dataset) -> Option<String> {
        [Some(&self.case), Some(&self.activity), self.timestamp.as_ref()]
            .into_iter()
            .flatten()
            .find(|c| !dataset.has_column(c))
            .cloned()
    }
}

/// The ordered activities of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub case_id: String,
    pub activities: Vec<String>,
    pub timestamps: Vec<Option<NaiveDateTime>>,
}

impl Trace {
    /// Seconds between the first and last parsed timestamp.
    pub fn duration_secs(&self) -> Option<f64> {
        let mut parsed = self.timestamps.iter().flatten();
        let first = parsed.next()?;
        let last = parsed.last().unwrap_or(first);
        Some((*last - *first).num_milliseconds() as f64 / 1000.0)
    }
}

/// Group events into traces, in order of first appearance of each case.
///
/// Events inside a trace are ordered by timestamp when one is available
/// (stable, so ties keep file order).
pub fn build_traces(dataset: &Dataset, columns: &EventLogColumns) -> Option<Vec<Trace>> {
    let case_idx = dataset.column_index(&columns.case)?;
    let act_idx = dataset.column_index(&columns.activity)?;
    let ts_idx = match &columns.timestamp {
        Some(name) => Some(dataset.column_index(name)?),
        None => None,
    };

    let mut order: Vec<String> = Vec::new();
    let mut events: HashMap<String, Vec<(Option<NaiveDateTime>, String)>> = HashMap::new();
    for row in dataset.rows() {
        if row[case_idx].is_null() || row[act_idx].is_null() {
            continue;
        }
        let case_id = row[case_idx].to_string();
        let ts = ts_idx.and_then(|i| row[i].as_datetime());
        let entry = events.entry(case_id.clone()).or_insert_with(|| {
            order.push(case_id.clone());
            Vec::new()
        });
        entry.push((ts, row[act_idx].to_string()));
    }

    let traces = order
        .into_iter()
        .map(|case_id| {
            let mut evs = events.remove(&case_id).unwrap_or_default();
            if ts_idx.is_some() {
                evs.sort_by(|a, b| match (a.0, b.0) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
            }
            let (timestamps, activities) = evs.into_iter().unzip();
            Trace {
                case_id,
                activities,
                timestamps,
            }
        })
        .collect();
    Some(traces)
}

/// Distinct activity sequences with their case counts, most frequent first.
pub fn variant_counts(traces: &[Trace]) -> Vec<(Vec<String>, usize)> {
    let mut counts: Vec<(Vec<String>, usize)> = Vec::new();
    let mut index: HashMap<&[String], usize> = HashMap::new();
    for trace in traces {
        match index.get(trace.activities.as_slice()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(trace.activities.as_slice(), counts.len());
                counts.push((trace.activities.clone(), 1));
            }
        }
    }
    // Stable: equally frequent variants keep first-seen order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Directly-follows pairs with frequencies, most frequent first.
pub fn directly_follows(traces: &[Trace]) -> Vec<((String, String), usize)> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for trace in traces {
        for pair in trace.activities.windows(2) {
            *counts.entry((pair[0].clone(), pair[1].clone())).or_default() += 1;
        }
    }
    let mut edges: Vec<_> = counts.into_iter().collect();
    edges.sort_by(|a, b| b.1.cmp(&a.1));
    edges
}

/// Seconds waited before each activity, keyed by activity.
pub fn waiting_times(traces: &[Trace]) -> BTreeMap<String, Vec<f64>> {
    let mut waits: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for trace in traces {
        for i in 1..trace.activities.len() {
            if let (Some(prev), Some(cur)) = (trace.timestamps[i - 1], trace.timestamps[i]) {
                waits
                    .entry(trace.activities[i].clone())
                    .or_default()
                    .push((cur - prev).num_milliseconds() as f64 / 1000.0);
            }
        }
    }
    waits
}

/// Pick a readable unit for a duration given in seconds.
pub fn best_time_unit(seconds: f64) -> (&'static str, f64) {
    let abs = seconds.abs();
    if abs >= 86_400.0 {
        ("days", 86_400.0)
    } else if abs >= 3_600.0 {
        ("hours", 3_600.0)
    } else if abs >= 60.0 {
        ("minutes", 60.0)
    } else {
        ("seconds", 1.0)
    }
}

/// Render a path for display, eliding after `max` steps.
pub fn format_path(activities: &[String], max: usize) -> String {
    let shown: Vec<&str> = activities.iter().take(max).map(String::as_str).collect();
    let mut s = shown.join(" -> ");
    if activities.len() > max {
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Dataset {
        Dataset::from_csv_str(
            "case_id,activity,timestamp\n\
             A,Create,2024-01-01 10:00:00\n\
             A,Approve,2024-01-01 12:00:00\n\
             B,Create,2024-01-02 09:00:00\n\
             A,Pay,2024-01-02 12:00:00\n\
             B,Approve,2024-01-02 09:30:00\n\
             C,Create,2024-01-03 08:00:00\n\
             C,Reject,2024-01-03 08:10:00\n",
        )
        .unwrap()
    }

    #[test]
    fn detects_columns_by_name() {
        let cols = EventLogColumns::detect(&log()).unwrap();
        assert_eq!(cols.case, "case_id");
        assert_eq!(cols.activity, "activity");
        assert_eq!(cols.timestamp.as_deref(), Some("timestamp"));
        assert!(cols.missing_in(&log()).is_none());
    }

    #[test]
    fn detection_fails_without_case_column() {
        let ds = Dataset::from_csv_str("x,y\n1,2\n").unwrap();
        assert!(EventLogColumns::detect(&ds).is_none());
    }

    #[test]
    fn traces_group_by_case_in_time_order() {
        let cols = EventLogColumns::detect(&log()).unwrap();
        let traces = build_traces(&log(), &cols).unwrap();
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].case_id, "A");
        assert_eq!(traces[0].activities, vec!["Create", "Approve", "Pay"]);
        assert_eq!(traces[0].duration_secs(), Some(26.0 * 3600.0));
    }

    #[test]
    fn variants_and_edges_are_counted() {
        let cols = EventLogColumns::detect(&log()).unwrap();
        let traces = build_traces(&log(), &cols).unwrap();
        let variants = variant_counts(&traces);
        assert_eq!(variants.len(), 3);
        let edges = directly_follows(&traces);
        assert_eq!(edges[0], (("Create".to_string(), "Approve".to_string()), 2));
    }

    #[test]
    fn waiting_times_are_per_activity() {
        let cols = EventLogColumns::detect(&log()).unwrap();
        let traces = build_traces(&log(), &cols).unwrap();
        let waits = waiting_times(&traces);
        assert_eq!(waits["Approve"], vec![7200.0, 1800.0]);
        assert_eq!(waits["Reject"], vec![600.0]);
    }

    #[test]
    fn best_unit_scales() {
        assert_eq!(best_time_unit(30.0).0, "seconds");
        assert_eq!(best_time_unit(7200.0).0, "hours");
        assert_eq!(best_time_unit(200_000.0).0, "days");
    }

    #[test]
    fn long_paths_are_elided() {
        let path: Vec<String> = (1..=7).map(|i| format!("s{i}")).collect();
        assert_eq!(format_path(&path, 3), "s1 -> s2 -> s3...");
    }
}
