//! Typed columns and operator output schemas.
//!
//! Columns are owned by the operator that introduced them (`owner` +
//! `position` is the column's identity) and cloned when propagated across
//! operators, so per-site metadata such as a table alias may diverge.

use arrow_schema::DataType;
use opal_common::{ColumnId, Error, Result, TableId};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr as SqlExpr, Ident};
use std::collections::HashMap;

use crate::plan::NodeId;

/// A typed, named, operator-owned column reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Id of the operator that introduced this column.
    pub owner: NodeId,
    /// Originating database, when the column traces back to a table.
    pub db_name: Option<String>,
    /// Originating table name, possibly an alias at this site.
    pub table_name: Option<String>,
    /// Column name; compared case-insensitively.
    pub name: String,
    /// Ordinal within the owner's schema.
    pub position: usize,
    /// Declared SQL type.
    pub data_type: DataType,
    /// True for columns produced by aggregates or subqueries.
    pub from_agg_or_subquery: bool,
    /// Physical catalog column id, when backed by storage.
    pub column_id: Option<ColumnId>,
}

impl Column {
    /// Identity comparison: same owner and position, regardless of names.
    pub fn same_as(&self, other: &Column) -> bool {
        self.owner == other.owner && self.position == other.position
    }

    /// Whether a reference pattern matches this column. Empty parts of the
    /// reference act as wildcards; everything compares case-insensitively.
    pub fn matches(&self, r: &ColRef) -> bool {
        let db_ok = match (&r.db, &self.db_name) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        };
        let tbl_ok = match (&r.table, &self.table_name) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        };
        db_ok && tbl_ok && r.name.eq_ignore_ascii_case(&self.name)
    }

    /// `table.name` when a table is attached, else the bare name.
    pub fn qualified_name(&self) -> String {
        match &self.table_name {
            Some(t) => format!("{t}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A parsed column reference: optional database, optional table, name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColRef {
    pub db: Option<String>,
    pub table: Option<String>,
    pub name: String,
}

impl ColRef {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            db: None,
            table: None,
            name: name.into(),
        }
    }

    /// Extract a reference from an identifier expression, stripping
    /// parentheses. Returns `None` for anything that is not a plain column.
    pub fn from_expr(e: &SqlExpr) -> Option<ColRef> {
        match e {
            SqlExpr::Identifier(id) => Some(ColRef::bare(id.value.clone())),
            SqlExpr::CompoundIdentifier(parts) => ColRef::from_parts(parts),
            SqlExpr::Nested(inner) => ColRef::from_expr(inner),
            _ => None,
        }
    }

    /// Build a reference from 1-3 identifier parts (`c`, `t.c`, `d.t.c`).
    pub fn from_parts(parts: &[Ident]) -> Option<ColRef> {
        match parts {
            [c] => Some(ColRef::bare(c.value.clone())),
            [t, c] => Some(ColRef {
                db: None,
                table: Some(t.value.clone()),
                name: c.value.clone(),
            }),
            [d, t, c] => Some(ColRef {
                db: Some(d.value.clone()),
                table: Some(t.value.clone()),
                name: c.value.clone(),
            }),
            _ => None,
        }
    }

    /// `self` matches `other` when self's present qualifiers agree with
    /// other's and the names are equal. `t.a` matches `test.t.a`, but
    /// `test.t.a` does not match `t.a`: the qualified side demands exactness.
    pub fn matches(&self, other: &ColRef) -> bool {
        let db_ok = match (&self.db, &other.db) {
            (None, _) => true,
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (Some(_), None) => false,
        };
        let tbl_ok = match (&self.table, &other.table) {
            (None, _) => true,
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (Some(_), None) => false,
        };
        db_ok && tbl_ok && self.name.eq_ignore_ascii_case(&other.name)
    }

    pub fn display(&self) -> String {
        match (&self.db, &self.table) {
            (Some(d), Some(t)) => format!("{d}.{t}.{}", self.name),
            (None, Some(t)) => format!("{t}.{}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// Ordered column sequence plus the row-handle columns per base table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
    /// Base-table id mapped to the columns carrying its row handle.
    pub handle_map: HashMap<TableId, Vec<Column>>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self {
            columns,
            handle_map: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn append(&mut self, col: Column) {
        self.columns.push(col);
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    /// Membership by column identity, not by name.
    pub fn contains(&self, col: &Column) -> bool {
        self.columns.iter().any(|c| c.same_as(col))
    }

    /// Concatenate two schemas, preserving order and unioning handle maps.
    pub fn merge(mut self, other: Schema) -> Schema {
        self.columns.extend(other.columns);
        for (tid, cols) in other.handle_map {
            self.handle_map.entry(tid).or_default().extend(cols);
        }
        self
    }

    /// Find a column by reference. More than one match at equal specificity
    /// is an ambiguity error; no match is a silent `None`.
    pub fn find_column(&self, r: &ColRef) -> Result<Option<&Column>> {
        let mut found: Option<&Column> = None;
        for col in &self.columns {
            if !col.matches(r) {
                continue;
            }
            if found.is_some() {
                return Err(Error::AmbiguousColumn(r.display(), "field list".to_string()));
            }
            found = Some(col);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::{ColRef, Column, Schema};
    use crate::plan::NodeId;
    use arrow_schema::DataType;

    fn col(owner: u32, table: Option<&str>, name: &str, position: usize) -> Column {
        Column {
            owner: NodeId(owner),
            db_name: None,
            table_name: table.map(str::to_string),
            name: name.to_string(),
            position,
            data_type: DataType::Int64,
            from_agg_or_subquery: false,
            column_id: None,
        }
    }

    #[test]
    fn contains_is_by_identity_not_name() {
        let schema = Schema::from_columns(vec![col(1, Some("t"), "a", 0)]);
        assert!(schema.contains(&col(1, Some("renamed"), "zzz", 0)));
        assert!(!schema.contains(&col(2, Some("t"), "a", 0)));
        assert!(!schema.contains(&col(1, Some("t"), "a", 1)));
    }

    #[test]
    fn find_column_is_case_insensitive() {
        let schema = Schema::from_columns(vec![col(1, Some("T1"), "Amount", 0)]);
        let hit = schema
            .find_column(&ColRef {
                db: None,
                table: Some("t1".to_string()),
                name: "AMOUNT".to_string(),
            })
            .expect("lookup");
        assert_eq!(hit.expect("found").position, 0);
    }

    #[test]
    fn find_column_detects_ambiguity() {
        let schema = Schema::from_columns(vec![
            col(1, Some("t1"), "a", 0),
            col(2, Some("t2"), "a", 1),
        ]);
        let err = schema.find_column(&ColRef::bare("a")).expect_err("ambiguous");
        assert_eq!(err.code(), "AmbiguousColumn");

        // A qualified reference narrows to one candidate.
        let hit = schema
            .find_column(&ColRef {
                db: None,
                table: Some("t2".to_string()),
                name: "a".to_string(),
            })
            .expect("lookup");
        assert_eq!(hit.expect("found").position, 1);
    }

    #[test]
    fn merge_preserves_order() {
        let a = Schema::from_columns(vec![col(1, None, "x", 0)]);
        let b = Schema::from_columns(vec![col(2, None, "y", 0)]);
        let merged = a.merge(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.column(0).name, "x");
        assert_eq!(merged.column(1).name, "y");
    }

    #[test]
    fn colref_match_is_one_directional() {
        let bare = ColRef::bare("a");
        let qualified = ColRef {
            db: Some("test".to_string()),
            table: Some("t".to_string()),
            name: "a".to_string(),
        };
        assert!(bare.matches(&qualified));
        assert!(!qualified.matches(&bare));
    }
}
