//! Narrow session interface the builder reads during a statement build.

use crate::expr::LiteralValue;
use std::collections::HashMap;

/// Per-statement context: prepared-statement parameter bindings (`:name`).
#[derive(Debug, Default, Clone)]
pub struct StmtContext {
    /// Bound parameter values, keyed by bare name (no leading `:`).
    pub params: HashMap<String, LiteralValue>,
}

/// Borrowed handle onto session state; must outlive the build.
pub trait SessionContext {
    /// Database used to qualify bare table names. Empty when none selected.
    fn current_db(&self) -> &str;

    /// True when the current transaction cannot have buffered writes, so a
    /// scan never needs to merge an in-memory write set.
    fn is_read_only_txn(&self) -> bool;

    /// The statement context for the build.
    fn stmt_ctx(&self) -> &StmtContext;
}

/// Plain value implementation of [`SessionContext`].
#[derive(Debug, Clone)]
pub struct SessionState {
    pub current_db: String,
    pub read_only_txn: bool,
    pub stmt: StmtContext,
}

impl SessionState {
    pub fn new(current_db: impl Into<String>) -> Self {
        Self {
            current_db: current_db.into(),
            read_only_txn: true,
            stmt: StmtContext::default(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new("")
    }
}

impl SessionContext for SessionState {
    fn current_db(&self) -> &str {
        &self.current_db
    }

    fn is_read_only_txn(&self) -> bool {
        self.read_only_txn
    }

    fn stmt_ctx(&self) -> &StmtContext {
        &self.stmt
    }
}
