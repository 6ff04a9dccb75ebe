//! Stacked optimizer-hint frames, one per SELECT that carries hints.

use opal_sql::{HintClause, HINT_INDEX_NESTED_LOOP_JOIN, HINT_MERGE_JOIN};

/// The hints attached to one SELECT.
#[derive(Debug, Default, Clone)]
pub struct TableHintInfo {
    sort_merge_join_tables: Vec<String>,
    index_nested_loop_join_tables: Vec<String>,
}

impl TableHintInfo {
    /// True when either side's alias is named by a merge-join hint.
    pub fn prefer_merge_join(&self, left: Option<&str>, right: Option<&str>) -> bool {
        Self::any_match(&self.sort_merge_join_tables, left)
            || Self::any_match(&self.sort_merge_join_tables, right)
    }

    /// True when the alias is named by an index-nested-loop-join hint.
    pub fn prefer_index_nested_loop_join(&self, alias: Option<&str>) -> bool {
        Self::any_match(&self.index_nested_loop_join_tables, alias)
    }

    fn any_match(tables: &[String], alias: Option<&str>) -> bool {
        match alias {
            Some(name) => tables.iter().any(|t| t.eq_ignore_ascii_case(name)),
            None => false,
        }
    }
}

/// One frame per SELECT; only SELECTs with at least one known hint push.
#[derive(Debug, Default)]
pub struct HintStack {
    frames: Vec<TableHintInfo>,
}

impl HintStack {
    /// Push a frame when `hints` contains at least one recognized hint.
    /// Unknown hints are skipped. Returns whether a frame was pushed, so
    /// the caller can pop symmetrically.
    pub fn push(&mut self, hints: &[HintClause]) -> bool {
        let mut frame = TableHintInfo::default();
        for hint in hints {
            match hint.name.as_str() {
                HINT_MERGE_JOIN => frame.sort_merge_join_tables.extend(hint.tables.clone()),
                HINT_INDEX_NESTED_LOOP_JOIN => frame
                    .index_nested_loop_join_tables
                    .extend(hint.tables.clone()),
                other => {
                    tracing::debug!(hint = other, "ignoring unknown optimizer hint");
                }
            }
        }
        if frame.sort_merge_join_tables.is_empty()
            && frame.index_nested_loop_join_tables.is_empty()
        {
            return false;
        }
        self.frames.push(frame);
        true
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// The innermost frame, when any SELECT in scope carried hints.
    pub fn current(&self) -> Option<&TableHintInfo> {
        self.frames.last()
    }
}

#[cfg(test)]
mod tests {
    use super::HintStack;
    use opal_sql::HintClause;

    fn clause(name: &str, tables: &[&str]) -> HintClause {
        HintClause {
            name: name.to_string(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn unknown_hints_do_not_push_a_frame() {
        let mut stack = HintStack::default();
        assert!(!stack.push(&[clause("max_execution_time", &["1000"])]));
        assert!(stack.current().is_none());
    }

    #[test]
    fn frames_stack_and_pop() {
        let mut stack = HintStack::default();
        assert!(stack.push(&[clause("tidb_smj", &["t1", "t2"])]));
        let frame = stack.current().expect("frame");
        assert!(frame.prefer_merge_join(Some("T1"), None));
        assert!(!frame.prefer_merge_join(Some("t3"), Some("t4")));
        assert!(!frame.prefer_index_nested_loop_join(Some("t1")));
        stack.pop();
        assert!(stack.current().is_none());
    }
}
