mod aggregate;
mod filter;
mod overview;
mod process;

pub use aggregate::{
    CorrelationTool, GroupAggregateTool, GroupCountTool, PercentileTool, QuantilesTool, TopNTool,
};
pub use filter::{FilterContainsTool, FilterRangeTool, FilterValueTool};
pub use overview::{ColumnStatsTool, DataFrameInfoTool, DescribeTool, UniqueValuesTool, ValueCountsTool};
pub use process::{
    ActivityFrequencyTool, BottlenecksTool, CaseCountsTool, CaseDurationTool, PathFrequencyTool,
    RarestPathsTool,
};

use std::collections::HashMap;

use analyst_types::Cell;

use crate::tool::ToolRegistry;

/// Registry pre-populated with every built-in analysis tool.
pub fn default_registry() -> ToolRegistry {
    let mut r = ToolRegistry::new();
    r.register(DataFrameInfoTool);
    r.register(ColumnStatsTool);
    r.register(DescribeTool);
    r.register(ValueCountsTool);
    r.register(UniqueValuesTool);
    r.register(FilterValueTool);
    r.register(FilterRangeTool);
    r.register(FilterContainsTool);
    r.register(GroupCountTool);
    r.register(GroupAggregateTool);
    r.register(TopNTool);
    r.register(CorrelationTool);
    r.register(PercentileTool);
    r.register(QuantilesTool);
    r.register(ActivityFrequencyTool);
    r.register(CaseCountsTool);
    r.register(PathFrequencyTool);
    r.register(RarestPathsTool);
    r.register(CaseDurationTool);
    r.register(BottlenecksTool);
    r
}

/// Non-null values with their counts, most frequent first (ties keep first-seen order).
pub fn value_counts<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for cell in cells {
        if cell.is_null() {
            continue;
        }
        let key = cell.to_string();
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub(crate) fn percentage(part: usize, whole: usize, digits: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    analyst_types::stats::round_to(part as f64 / whole as f64 * 100.0, digits)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use analyst_types::Dataset;

    pub fn orders() -> Dataset {
        Dataset::from_csv_str(
            "case_id,activity,timestamp,amount,region\n\
             1,Create,2024-01-01 10:00:00,100,North\n\
             1,Approve,2024-01-01 12:00:00,100,North\n\
             1,Pay,2024-01-02 10:00:00,100,North\n\
             2,Create,2024-01-02 09:00:00,250,South\n\
             2,Approve,2024-01-02 09:30:00,250,South\n\
             2,Pay,2024-01-02 11:30:00,250,South\n\
             3,Create,2024-01-03 08:00:00,40,North\n\
             3,Reject,2024-01-03 08:10:00,,North\n",
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let r = default_registry();
        assert_eq!(r.len(), 20);
        for name in [
            "get_dataframe_info",
            "get_column_stats",
            "calculate_path_frequency",
            "find_bottlenecks",
        ] {
            assert!(r.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn value_counts_orders_by_frequency_then_first_seen() {
        let cells = [
            Cell::from("b"),
            Cell::from("a"),
            Cell::from("a"),
            Cell::Null,
            Cell::from("c"),
        ];
        let vc = value_counts(cells.iter());
        assert_eq!(
            vc,
            vec![("a".to_string(), 2), ("b".to_string(), 1), ("c".to_string(), 1)]
        );
    }
}
