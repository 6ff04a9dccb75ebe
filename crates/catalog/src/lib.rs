//! Catalog and statistics access for the Opal planner.
//!
//! Architecture role:
//! - resolves `(database, table)` names into column metadata for the plan
//!   builder's DataSource construction
//! - provides per-table statistics with a pseudo-table fallback
//!
//! Key modules:
//! - [`catalog`]
//! - [`stats`]

pub mod catalog;
pub mod stats;

pub use catalog::{Catalog, ColumnDef, ColumnState, TableDef};
pub use stats::{StatsHandle, TableStats, PSEUDO_ROW_COUNT};
