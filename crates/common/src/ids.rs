//! Typed identifiers shared between the catalog and the planner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable table identifier assigned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(
    /// Raw numeric id value.
    pub i64,
);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable column identifier within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnId(
    /// Raw numeric id value.
    pub i64,
);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reserved column id of the synthesized `_rowid` handle column. Hidden from
/// wildcard expansion.
pub const EXTRA_HANDLE_ID: ColumnId = ColumnId(-1);
