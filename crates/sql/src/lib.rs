//! SQL parsing front door for Opal.
//!
//! Wraps the `sqlparser` crate behind the shared [`opal_common::Result`]
//! contract and extracts optimizer hints (`/*+ ... */`) from the raw
//! statement text, since the parser drops comments during tokenization.

use opal_common::{Error, Result};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Hint enforcing sort-merge join on the named tables.
pub const HINT_MERGE_JOIN: &str = "tidb_smj";
/// Hint marking the named table as the outer side of an index nested loop
/// join.
pub const HINT_INDEX_NESTED_LOOP_JOIN: &str = "tidb_inlj";

/// One parsed optimizer hint: a name and the table aliases it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintClause {
    /// Lowercased hint name, e.g. `tidb_smj`.
    pub name: String,
    /// Table names/aliases listed in the hint's parentheses.
    pub tables: Vec<String>,
}

/// Parse a SQL string into statements.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    let dialect = GenericDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| Error::Parse(e.to_string()))
}

/// Extract optimizer hints from the raw statement text.
///
/// Recognizes the first `/*+ ... */` block and splits it into
/// `name(t1, t2, ...)` clauses. Names are lowercased; malformed clauses are
/// dropped rather than failing the statement (hints are advisory).
pub fn extract_hints(sql: &str) -> Vec<HintClause> {
    let Some(start) = sql.find("/*+") else {
        return Vec::new();
    };
    let rest = &sql[start + 3..];
    let Some(end) = rest.find("*/") else {
        return Vec::new();
    };
    parse_hint_body(&rest[..end])
}

fn parse_hint_body(body: &str) -> Vec<HintClause> {
    let mut hints = Vec::new();
    let mut rest = body.trim();
    while let Some(open) = rest.find('(') {
        let name = rest[..open].trim().trim_start_matches(',').trim();
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            let tables = rest[open + 1..open + close]
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            hints.push(HintClause {
                name: name.to_ascii_lowercase(),
                tables,
            });
        }
        rest = &rest[open + close + 1..];
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::{extract_hints, parse_sql, HintClause};

    #[test]
    fn parses_single_statement() {
        let stmts = parse_sql("SELECT a FROM t WHERE c > 1").expect("parse");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn reports_parse_errors() {
        let err = parse_sql("SELEKT a FROM t").expect_err("reject");
        assert_eq!(err.code(), "Parse");
    }

    #[test]
    fn extracts_hint_clauses() {
        let hints = extract_hints("SELECT /*+ tidb_smj(t1, t2), tidb_inlj(t3) */ * FROM t1");
        assert_eq!(
            hints,
            vec![
                HintClause {
                    name: "tidb_smj".to_string(),
                    tables: vec!["t1".to_string(), "t2".to_string()],
                },
                HintClause {
                    name: "tidb_inlj".to_string(),
                    tables: vec!["t3".to_string()],
                },
            ]
        );
    }

    #[test]
    fn no_hint_block_yields_empty() {
        assert!(extract_hints("SELECT 1 /* plain comment */").is_empty());
    }
}
