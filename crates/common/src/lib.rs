#![deny(missing_docs)]

//! Shared error types and identifiers for Opal crates.
//!
//! Architecture role:
//! - provides the common [`Error`] / [`Result`] contracts used from the
//!   parser down to the plan builder
//! - hosts strongly-typed identifier wrappers shared by catalog and planner
//!
//! Key modules:
//! - [`error`]
//! - [`ids`]

/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;

pub use error::{Error, Result};
pub use ids::{ColumnId, TableId, EXTRA_HANDLE_ID};
