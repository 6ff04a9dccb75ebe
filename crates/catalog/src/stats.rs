use opal_common::TableId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Row-count estimate assumed for tables with no collected statistics.
pub const PSEUDO_ROW_COUNT: u64 = 10_000;

/// Lightweight table statistics consumed by planner heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Estimated row count.
    pub rows: u64,
    /// Estimated total bytes if known.
    pub bytes: Option<u64>,
    /// True when the stats are a fabricated fallback rather than collected.
    pub pseudo: bool,
}

impl TableStats {
    /// Fallback statistics for a table the handle knows nothing about.
    pub fn pseudo() -> Self {
        Self {
            rows: PSEUDO_ROW_COUNT,
            bytes: None,
            pseudo: true,
        }
    }
}

/// Process-wide statistics registry, read-only from the planner's side.
#[derive(Debug, Default, Clone)]
pub struct StatsHandle {
    tables: HashMap<TableId, TableStats>,
}

impl StatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record collected statistics for a table.
    pub fn set_table_stats(&mut self, table: TableId, rows: u64, bytes: Option<u64>) {
        self.tables.insert(
            table,
            TableStats {
                rows,
                bytes,
                pseudo: false,
            },
        );
    }

    /// Collected statistics for a table, or `None` when the caller should
    /// fall back to [`TableStats::pseudo`].
    pub fn table_stats(&self, table: TableId) -> Option<TableStats> {
        self.tables.get(&table).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{StatsHandle, TableStats, PSEUDO_ROW_COUNT};
    use opal_common::TableId;

    #[test]
    fn missing_table_falls_back_to_pseudo() {
        let handle = StatsHandle::new();
        let stats = handle
            .table_stats(TableId(7))
            .unwrap_or_else(TableStats::pseudo);
        assert!(stats.pseudo);
        assert_eq!(stats.rows, PSEUDO_ROW_COUNT);
    }

    #[test]
    fn collected_stats_are_returned() {
        let mut handle = StatsHandle::new();
        handle.set_table_stats(TableId(1), 42, Some(4096));
        let stats = handle.table_stats(TableId(1)).expect("stats");
        assert!(!stats.pseudo);
        assert_eq!(stats.rows, 42);
    }
}
