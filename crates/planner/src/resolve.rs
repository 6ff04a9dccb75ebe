//! AST resolvers that run before expression rewriting.
//!
//! All of them follow the same enter/leave protocol over the sqlparser
//! expression tree: `enter` may flag state or skip a subtree, `leave` may
//! replace the node. Errors latch into the visitor and short-circuit the
//! remaining traversal.

use opal_common::{Error, Result};
use sqlparser::ast::{
    DuplicateTreatment, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr,
    FunctionArguments, Ident, Value,
};

use crate::expr::AggKind;
use crate::schema::{ColRef, Schema};

/// One select-list entry as the builder tracks it: the (possibly rewritten)
/// AST expression, an optional alias, and whether the entry was appended by
/// the builder rather than written by the user.
#[derive(Debug, Clone)]
pub struct SelectField {
    pub expr: SqlExpr,
    pub as_name: Option<String>,
    pub auxiliary: bool,
}

/// Reserved identifier prefix encoding a positional reference to a select
/// field; consumed by the rewriter against the post-projection schema.
pub(crate) const SEL_FIELD_MARKER: &str = "__sel_field_";

pub(crate) fn field_marker(idx: usize) -> SqlExpr {
    SqlExpr::Identifier(Ident::new(format!("{SEL_FIELD_MARKER}{idx}")))
}

pub(crate) fn marker_index(e: &SqlExpr) -> Option<usize> {
    if let SqlExpr::Identifier(id) = e {
        return id.value.strip_prefix(SEL_FIELD_MARKER)?.parse().ok();
    }
    None
}

/// Build a column-name AST expression from a resolved reference.
pub(crate) fn column_name_expr(r: &ColRef) -> SqlExpr {
    let mut parts = Vec::new();
    if let Some(d) = &r.db {
        parts.push(Ident::new(d.clone()));
    }
    if let Some(t) = &r.table {
        parts.push(Ident::new(t.clone()));
    }
    parts.push(Ident::new(r.name.clone()));
    if parts.len() == 1 {
        SqlExpr::Identifier(parts.pop().expect("one part"))
    } else {
        SqlExpr::CompoundIdentifier(parts)
    }
}

/// Enter/leave visitor over the sqlparser expression tree.
pub(crate) trait AstVisitor {
    /// Returns true to skip the node's children.
    fn enter(&mut self, e: &SqlExpr) -> bool;
    /// May replace the node. Children have already been visited.
    fn leave(&mut self, e: SqlExpr) -> SqlExpr;
    /// Whether an error has latched; stops further work.
    fn failed(&self) -> bool;
}

/// Drive a visitor over an owned expression, transforming it bottom-up.
pub(crate) fn accept<V: AstVisitor>(e: SqlExpr, v: &mut V) -> SqlExpr {
    if v.failed() {
        return e;
    }
    let skip = v.enter(&e);
    let e = if skip { e } else { walk_children(e, v) };
    if v.failed() {
        return e;
    }
    v.leave(e)
}

fn walk_children<V: AstVisitor>(e: SqlExpr, v: &mut V) -> SqlExpr {
    match e {
        SqlExpr::BinaryOp { left, op, right } => SqlExpr::BinaryOp {
            left: Box::new(accept(*left, v)),
            op,
            right: Box::new(accept(*right, v)),
        },
        SqlExpr::UnaryOp { op, expr } => SqlExpr::UnaryOp {
            op,
            expr: Box::new(accept(*expr, v)),
        },
        SqlExpr::Nested(inner) => SqlExpr::Nested(Box::new(accept(*inner, v))),
        SqlExpr::IsNull(inner) => SqlExpr::IsNull(Box::new(accept(*inner, v))),
        SqlExpr::IsNotNull(inner) => SqlExpr::IsNotNull(Box::new(accept(*inner, v))),
        SqlExpr::Between {
            expr,
            negated,
            low,
            high,
        } => SqlExpr::Between {
            expr: Box::new(accept(*expr, v)),
            negated,
            low: Box::new(accept(*low, v)),
            high: Box::new(accept(*high, v)),
        },
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => SqlExpr::InList {
            expr: Box::new(accept(*expr, v)),
            list: list.into_iter().map(|item| accept(item, v)).collect(),
            negated,
        },
        SqlExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => SqlExpr::InSubquery {
            // The subquery is its own resolution context; only the operand
            // is walked.
            expr: Box::new(accept(*expr, v)),
            subquery,
            negated,
        },
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => SqlExpr::Case {
            operand: operand.map(|o| Box::new(accept(*o, v))),
            conditions: conditions.into_iter().map(|c| accept(c, v)).collect(),
            results: results.into_iter().map(|r| accept(r, v)).collect(),
            else_result: else_result.map(|r| Box::new(accept(*r, v))),
        },
        SqlExpr::Function(mut f) => {
            if let FunctionArguments::List(list) = &mut f.args {
                for arg in &mut list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) = arg {
                        let taken = std::mem::replace(inner, SqlExpr::Value(Value::Null));
                        *inner = accept(taken, v);
                    }
                }
            }
            SqlExpr::Function(f)
        }
        other => other,
    }
}

/// Whether the function call is one of the modeled aggregates (and not a
/// window invocation).
pub(crate) fn is_agg_func(f: &Function) -> bool {
    if f.over.is_some() {
        return false;
    }
    match f.name.0.as_slice() {
        [name] => AggKind::from_name(&name.value).is_some(),
        _ => false,
    }
}

/// Whether any aggregate call occurs in the expression (subqueries are
/// separate contexts and not descended into).
pub(crate) fn has_agg_func(e: &SqlExpr) -> bool {
    match e {
        SqlExpr::Function(f) => is_agg_func(f),
        SqlExpr::Subquery(_) | SqlExpr::Exists { .. } => false,
        SqlExpr::BinaryOp { left, right, .. } => has_agg_func(left) || has_agg_func(right),
        SqlExpr::UnaryOp { expr, .. }
        | SqlExpr::Nested(expr)
        | SqlExpr::IsNull(expr)
        | SqlExpr::IsNotNull(expr) => has_agg_func(expr),
        SqlExpr::Between {
            expr, low, high, ..
        } => has_agg_func(expr) || has_agg_func(low) || has_agg_func(high),
        SqlExpr::InList { expr, list, .. } => {
            has_agg_func(expr) || list.iter().any(has_agg_func)
        }
        SqlExpr::InSubquery { expr, .. } => has_agg_func(expr),
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            operand.as_deref().map(has_agg_func).unwrap_or(false)
                || conditions.iter().any(has_agg_func)
                || results.iter().any(has_agg_func)
                || else_result.as_deref().map(has_agg_func).unwrap_or(false)
        }
        _ => false,
    }
}

/// Deconstruct an aggregate call into kind, distinct flag and argument
/// expressions. `COUNT(*)` counts the constant 1.
pub(crate) fn parse_agg_call(f: &Function) -> Result<(AggKind, bool, Vec<SqlExpr>)> {
    let name = match f.name.0.as_slice() {
        [name] => name.value.clone(),
        _ => return Err(Error::Unsupported(format!("function {}", f.name))),
    };
    let kind = AggKind::from_name(&name)
        .ok_or_else(|| Error::Unsupported(format!("function {name}")))?;
    match &f.args {
        FunctionArguments::None => Ok((kind, false, Vec::new())),
        FunctionArguments::List(list) => {
            let distinct =
                matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
            let mut args = Vec::new();
            for arg in &list.args {
                match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => args.push(e.clone()),
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                        args.push(SqlExpr::Value(Value::Number("1".to_string(), false)));
                    }
                    other => {
                        return Err(Error::Unsupported(format!(
                            "aggregate argument {other}"
                        )))
                    }
                }
            }
            Ok((kind, distinct, args))
        }
        FunctionArguments::Subquery(_) => Err(Error::Unsupported(
            "subquery as aggregate argument".to_string(),
        )),
    }
}

/// Collect aggregate calls from the finalized select list in left-to-right
/// order.
pub(crate) fn extract_agg_funcs(fields: &[SelectField]) -> Vec<Function> {
    let mut out = Vec::new();
    for f in fields {
        collect_agg_funcs(&f.expr, &mut out);
    }
    out
}

fn collect_agg_funcs(e: &SqlExpr, out: &mut Vec<Function>) {
    match e {
        SqlExpr::Function(f) if is_agg_func(f) => out.push(f.clone()),
        SqlExpr::Subquery(_) | SqlExpr::Exists { .. } => {}
        SqlExpr::BinaryOp { left, right, .. } => {
            collect_agg_funcs(left, out);
            collect_agg_funcs(right, out);
        }
        SqlExpr::UnaryOp { expr, .. }
        | SqlExpr::Nested(expr)
        | SqlExpr::IsNull(expr)
        | SqlExpr::IsNotNull(expr)
        | SqlExpr::InSubquery { expr, .. } => collect_agg_funcs(expr, out),
        SqlExpr::Between {
            expr, low, high, ..
        } => {
            collect_agg_funcs(expr, out);
            collect_agg_funcs(low, out);
            collect_agg_funcs(high, out);
        }
        SqlExpr::InList { expr, list, .. } => {
            collect_agg_funcs(expr, out);
            for item in list {
                collect_agg_funcs(item, out);
            }
        }
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(o) = operand {
                collect_agg_funcs(o, out);
            }
            for c in conditions {
                collect_agg_funcs(c, out);
            }
            for r in results {
                collect_agg_funcs(r, out);
            }
            if let Some(r) = else_result {
                collect_agg_funcs(r, out);
            }
        }
        _ => {}
    }
}

fn match_field(field: &SelectField, col: &ColRef, ignore_as_name: bool) -> bool {
    // A table-qualified reference resolves from the table sources directly.
    if col.table.is_some() {
        return false;
    }
    if field.as_name.is_none() || ignore_as_name {
        if let Some(cur) = ColRef::from_expr(&field.expr) {
            return cur.name.eq_ignore_ascii_case(&col.name);
        }
        // An expression without an alias cannot be matched by name.
        return false;
    }
    field
        .as_name
        .as_deref()
        .map(|n| n.eq_ignore_ascii_case(&col.name))
        .unwrap_or(false)
}

/// Resolve a column reference against the select list. Two column fields
/// that match but name different source columns are an ambiguity.
pub(crate) fn resolve_from_select_fields(
    col: &ColRef,
    fields: &[SelectField],
    ignore_as_name: bool,
) -> Result<Option<usize>> {
    let mut matched: Option<ColRef> = None;
    let mut index = None;
    for (i, field) in fields.iter().enumerate() {
        if field.auxiliary {
            continue;
        }
        if !match_field(field, col, ignore_as_name) {
            continue;
        }
        let Some(cur) = ColRef::from_expr(&field.expr) else {
            return Ok(Some(i));
        };
        match &matched {
            None => {
                matched = Some(cur);
                index = Some(i);
            }
            Some(prev) => {
                if !prev.matches(&cur) && !cur.matches(prev) {
                    return Err(Error::AmbiguousColumn(
                        cur.name.clone(),
                        "field list".to_string(),
                    ));
                }
            }
        }
    }
    Ok(index)
}

/// Resolves HAVING and ORDER BY expressions before projection is built.
///
/// Aggregates leave behind auxiliary select fields named `sel_agg_<k>`;
/// column references resolve against the select list or the child plan
/// schema depending on scope, and become positional field markers. Columns
/// found only in an enclosing query are left untouched for the rewriter.
pub(crate) struct HavingOrderByResolver<'a> {
    pub in_agg_func: bool,
    pub in_expr: bool,
    pub order_by: bool,
    pub err: Option<Error>,
    pub schema: Schema,
    pub fields: &'a mut Vec<SelectField>,
    pub gby_items: &'a [SqlExpr],
    pub outer_schemas: &'a [Schema],
    pub agg_aux_count: usize,
}

impl<'a> HavingOrderByResolver<'a> {
    pub fn new(
        schema: Schema,
        fields: &'a mut Vec<SelectField>,
        gby_items: &'a [SqlExpr],
        outer_schemas: &'a [Schema],
    ) -> Self {
        Self {
            in_agg_func: false,
            in_expr: false,
            order_by: false,
            err: None,
            schema,
            fields,
            gby_items,
            outer_schemas,
            agg_aux_count: 0,
        }
    }

    fn resolve_from_schema(&mut self, r: &ColRef) -> Result<Option<usize>> {
        let col = match self.schema.find_column(r)? {
            Some(c) => c,
            None => return Ok(None),
        };
        let new_ref = ColRef {
            db: col.db_name.clone(),
            table: col.table_name.clone(),
            name: col.name.clone(),
        };
        for (i, field) in self.fields.iter().enumerate() {
            if let Some(cur) = ColRef::from_expr(&field.expr) {
                if new_ref.matches(&cur) {
                    return Ok(Some(i));
                }
            }
        }
        self.fields.push(SelectField {
            expr: column_name_expr(&new_ref),
            as_name: None,
            auxiliary: true,
        });
        Ok(Some(self.fields.len() - 1))
    }

    fn leave_column(&mut self, e: SqlExpr) -> SqlExpr {
        let Some(r) = ColRef::from_expr(&e) else {
            return e;
        };
        let mut resolve_fields_first = true;
        if self.in_agg_func || (self.order_by && self.in_expr) {
            resolve_fields_first = false;
        }
        if !self.in_agg_func && !self.order_by {
            for item in self.gby_items {
                if let Some(g) = ColRef::from_expr(item) {
                    if r.matches(&g) || g.matches(&r) {
                        resolve_fields_first = false;
                        break;
                    }
                }
            }
        }
        let index = if resolve_fields_first {
            let mut index = match resolve_from_select_fields(&r, self.fields, false) {
                Ok(i) => i,
                Err(err) => {
                    self.err = Some(err);
                    return e;
                }
            };
            if index.is_none() {
                let retry = if self.order_by {
                    self.resolve_from_schema(&r)
                } else {
                    resolve_from_select_fields(&r, self.fields, true)
                };
                index = match retry {
                    Ok(i) => i,
                    Err(err) => {
                        self.err = Some(err);
                        return e;
                    }
                };
            }
            index
        } else {
            // Schema errors are ignored here: the reference may still
            // resolve against the select fields.
            let mut index = self.resolve_from_schema(&r).unwrap_or(None);
            if index.is_none() {
                index = match resolve_from_select_fields(&r, self.fields, false) {
                    Ok(i) => i,
                    Err(err) => {
                        self.err = Some(err);
                        return e;
                    }
                };
            }
            index
        };
        let Some(index) = index else {
            // Not in this query's scopes: a hit in an enclosing schema means
            // a correlated column, resolved later by the rewriter.
            for outer in self.outer_schemas {
                if let Ok(Some(_)) = outer.find_column(&r) {
                    return e;
                }
            }
            let clause = if self.order_by {
                "order clause"
            } else {
                "having clause"
            };
            self.err = Some(Error::UnknownColumn(r.display(), clause.to_string()));
            return e;
        };
        if self.in_agg_func {
            self.fields[index].expr.clone()
        } else {
            field_marker(index)
        }
    }
}

impl AstVisitor for HavingOrderByResolver<'_> {
    fn enter(&mut self, e: &SqlExpr) -> bool {
        match e {
            SqlExpr::Function(f) if is_agg_func(f) => {
                self.in_agg_func = true;
                false
            }
            SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => false,
            SqlExpr::Value(Value::Placeholder(_)) => false,
            SqlExpr::Subquery(_) | SqlExpr::Exists { .. } => true,
            _ => {
                self.in_expr = true;
                false
            }
        }
    }

    fn leave(&mut self, e: SqlExpr) -> SqlExpr {
        match e {
            SqlExpr::Function(f) if is_agg_func(&f) => {
                self.in_agg_func = false;
                let index = self.fields.len();
                let name = format!("sel_agg_{}", self.agg_aux_count);
                self.agg_aux_count += 1;
                self.fields.push(SelectField {
                    expr: SqlExpr::Function(f),
                    as_name: Some(name),
                    auxiliary: true,
                });
                field_marker(index)
            }
            SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => self.leave_column(e),
            other => other,
        }
    }

    fn failed(&self) -> bool {
        self.err.is_some()
    }
}

/// Resolves GROUP BY items: bare columns may refer to select-list aliases,
/// but the input schema wins inside compound expressions.
pub(crate) struct GbyResolver<'a> {
    pub in_expr: bool,
    pub err: Option<Error>,
    pub schema: &'a Schema,
    pub fields: &'a [SelectField],
}

impl AstVisitor for GbyResolver<'_> {
    fn enter(&mut self, e: &SqlExpr) -> bool {
        match e {
            SqlExpr::Subquery(_) | SqlExpr::Exists { .. } | SqlExpr::InSubquery { .. } => true,
            SqlExpr::Value(_)
            | SqlExpr::Identifier(_)
            | SqlExpr::CompoundIdentifier(_)
            | SqlExpr::Nested(_) => false,
            _ => {
                self.in_expr = true;
                false
            }
        }
    }

    fn leave(&mut self, e: SqlExpr) -> SqlExpr {
        let is_column = matches!(
            e,
            SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_)
        );
        if !is_column {
            return e;
        }
        let Some(r) = ColRef::from_expr(&e) else {
            return e;
        };
        let (in_schema, schema_err) = match self.schema.find_column(&r) {
            Ok(c) => (c.is_some(), None),
            Err(err) => (false, Some(err)),
        };
        if !in_schema || !self.in_expr {
            let index = match resolve_from_select_fields(&r, self.fields, false) {
                Ok(i) => i,
                Err(err) => {
                    self.err = Some(err);
                    return e;
                }
            };
            if in_schema {
                return e;
            }
            if let Some(i) = index {
                return self.fields[i].expr.clone();
            }
            self.err = Some(schema_err.unwrap_or_else(|| {
                Error::UnknownColumn(r.display(), "group statement".to_string())
            }));
        }
        e
    }

    fn failed(&self) -> bool {
        self.err.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        field_marker, has_agg_func, marker_index, resolve_from_select_fields, SelectField,
    };
    use crate::schema::ColRef;
    use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, Ident};

    fn ident(name: &str) -> SqlExpr {
        SqlExpr::Identifier(Ident::new(name))
    }

    fn field(expr: SqlExpr, as_name: Option<&str>) -> SelectField {
        SelectField {
            expr,
            as_name: as_name.map(str::to_string),
            auxiliary: false,
        }
    }

    #[test]
    fn marker_round_trips() {
        assert_eq!(marker_index(&field_marker(7)), Some(7));
        assert_eq!(marker_index(&ident("a")), None);
    }

    #[test]
    fn alias_wins_over_column_name() {
        let fields = vec![field(ident("a"), Some("b"))];
        let hit = resolve_from_select_fields(&ColRef::bare("b"), &fields, false).expect("ok");
        assert_eq!(hit, Some(0));
        // Ignoring aliases, `b` no longer matches.
        let miss = resolve_from_select_fields(&ColRef::bare("b"), &fields, true).expect("ok");
        assert_eq!(miss, None);
    }

    #[test]
    fn two_different_sources_with_same_alias_are_ambiguous() {
        let fields = vec![
            field(SqlExpr::CompoundIdentifier(vec![Ident::new("t1"), Ident::new("a")]), None),
            field(SqlExpr::CompoundIdentifier(vec![Ident::new("t2"), Ident::new("a")]), None),
        ];
        let err =
            resolve_from_select_fields(&ColRef::bare("a"), &fields, false).expect_err("ambiguous");
        assert_eq!(err.code(), "AmbiguousColumn");
    }

    #[test]
    fn qualified_reference_never_matches_fields() {
        let fields = vec![field(ident("a"), None)];
        let r = ColRef {
            db: None,
            table: Some("t".to_string()),
            name: "a".to_string(),
        };
        assert_eq!(
            resolve_from_select_fields(&r, &fields, false).expect("ok"),
            None
        );
    }

    #[test]
    fn detects_aggregates_in_compound_expressions() {
        let stmts = opal_sql::parse_sql("SELECT sum(a) + 1 FROM t").expect("parse");
        let sqlparser::ast::Statement::Query(q) = &stmts[0] else {
            panic!("expected query");
        };
        let sqlparser::ast::SetExpr::Select(sel) = q.body.as_ref() else {
            panic!("expected select");
        };
        let sqlparser::ast::SelectItem::UnnamedExpr(e) = &sel.projection[0] else {
            panic!("expected unnamed field");
        };
        assert!(has_agg_func(e));
        let plain = SqlExpr::BinaryOp {
            left: Box::new(ident("a")),
            op: BinaryOperator::Plus,
            right: Box::new(ident("b")),
        };
        assert!(!has_agg_func(&plain));
    }
}
