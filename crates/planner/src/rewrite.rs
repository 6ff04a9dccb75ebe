//! Expression rewriting: AST expressions into plan expressions.
//!
//! The rewriter resolves column references against the input plan's schema
//! (falling back to join redundant schemas and enclosing-query schemas),
//! substitutes aggregate calls through the aggregate mapper, and plans
//! subqueries by injecting Apply / semi-join nodes into the input plan. The
//! caller must adopt the returned plan root.

use opal_common::{Error, Result};
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, Function, Query, UnaryOperator, Value};
use std::collections::HashMap;

use crate::builder::PlanBuilder;
use crate::expr::{BinaryOp, Expr, LiteralValue};
use crate::plan::{JoinType, NodeId};
use crate::resolve::{is_agg_func, marker_index};
use crate::schema::ColRef;

/// Canonical structural key of an aggregate call: function name, distinct
/// flag and argument text, case-folded. Structurally equal calls share one
/// key and therefore one aggregation output column.
pub fn canonical_agg_key(f: &Function) -> String {
    f.to_string().to_ascii_lowercase()
}

/// Maps an aggregate call's canonical key to its ordinal in the aggregation
/// output schema.
pub type AggMapper = HashMap<String, usize>;

impl PlanBuilder<'_> {
    /// Rewrite an AST expression against `p`'s output schema.
    ///
    /// Contract:
    /// - aggregate calls are substituted through `mapper` when present;
    /// - subqueries may inject Apply / semi-join nodes into the plan; the
    ///   returned node id is the new plan root and must be adopted;
    /// - a `None` expression means the predicate was wholly absorbed into
    ///   the plan (subquery predicates in conjunct position) and is
    ///   trivially true;
    /// - `as_scalar` selects value semantics for subquery predicates, which
    ///   then surface a boolean column instead of filtering.
    pub fn rewrite(
        &mut self,
        expr: &SqlExpr,
        p: NodeId,
        mapper: Option<&AggMapper>,
        as_scalar: bool,
    ) -> Result<(Option<Expr>, NodeId)> {
        match expr {
            SqlExpr::Exists { subquery, negated } => {
                self.rewrite_exists(subquery, *negated, p, as_scalar)
            }
            SqlExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => self.rewrite_in_subquery(expr, subquery, *negated, p, mapper, as_scalar),
            _ => {
                let (e, np) = self.rewrite_scalar(expr, p, mapper, as_scalar)?;
                Ok((Some(e), np))
            }
        }
    }

    /// Rewrite in a context that requires a value expression.
    pub(crate) fn rewrite_scalar(
        &mut self,
        expr: &SqlExpr,
        p: NodeId,
        mapper: Option<&AggMapper>,
        as_scalar: bool,
    ) -> Result<(Expr, NodeId)> {
        match expr {
            SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => {
                if let Some(idx) = marker_index(expr) {
                    let col = self
                        .arena
                        .schema(p)
                        .columns
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| {
                            Error::UnknownColumn(idx.to_string(), "field list".to_string())
                        })?;
                    return Ok((Expr::Column(col), p));
                }
                let r = ColRef::from_expr(expr).ok_or_else(|| {
                    Error::UnsupportedType(format!("column reference {expr}"))
                })?;
                Ok((self.resolve_column(&r, p)?, p))
            }
            SqlExpr::Value(v) => Ok((Expr::Literal(self.literal_from_value(v)?), p)),
            SqlExpr::Nested(inner) => self.rewrite_scalar(inner, p, mapper, as_scalar),
            SqlExpr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => {
                    let (l, np) = self.rewrite_scalar(left, p, mapper, as_scalar)?;
                    let (r, np) = self.rewrite_scalar(right, np, mapper, as_scalar)?;
                    Ok((Expr::And(Box::new(l), Box::new(r)), np))
                }
                BinaryOperator::Or => {
                    let (l, np) = self.rewrite_scalar(left, p, mapper, as_scalar)?;
                    let (r, np) = self.rewrite_scalar(right, np, mapper, as_scalar)?;
                    Ok((Expr::Or(Box::new(l), Box::new(r)), np))
                }
                _ => {
                    let bop = binary_op(op)?;
                    let (l, np) = self.rewrite_scalar(left, p, mapper, as_scalar)?;
                    let (r, np) = self.rewrite_scalar(right, np, mapper, as_scalar)?;
                    Ok((
                        Expr::Binary {
                            op: bop,
                            left: Box::new(l),
                            right: Box::new(r),
                        },
                        np,
                    ))
                }
            },
            SqlExpr::UnaryOp { op, expr: inner } => match op {
                UnaryOperator::Not => {
                    let (e, np) = self.rewrite_scalar(inner, p, mapper, as_scalar)?;
                    Ok((Expr::Not(Box::new(e)), np))
                }
                UnaryOperator::Plus => self.rewrite_scalar(inner, p, mapper, as_scalar),
                UnaryOperator::Minus => {
                    let (e, np) = self.rewrite_scalar(inner, p, mapper, as_scalar)?;
                    match e {
                        Expr::Literal(LiteralValue::Int64(v)) => {
                            Ok((Expr::Literal(LiteralValue::Int64(-v)), np))
                        }
                        Expr::Literal(LiteralValue::Float64(v)) => {
                            Ok((Expr::Literal(LiteralValue::Float64(-v)), np))
                        }
                        _ => Err(Error::Unsupported(
                            "unary minus over a non-literal".to_string(),
                        )),
                    }
                }
                other => Err(Error::Unsupported(format!("unary operator {other}"))),
            },
            SqlExpr::IsNull(inner) => {
                let (e, np) = self.rewrite_scalar(inner, p, mapper, as_scalar)?;
                Ok((
                    Expr::IsNull {
                        expr: Box::new(e),
                        negated: false,
                    },
                    np,
                ))
            }
            SqlExpr::IsNotNull(inner) => {
                let (e, np) = self.rewrite_scalar(inner, p, mapper, as_scalar)?;
                Ok((
                    Expr::IsNull {
                        expr: Box::new(e),
                        negated: true,
                    },
                    np,
                ))
            }
            SqlExpr::Between {
                expr: operand,
                negated,
                low,
                high,
            } => {
                let (e, np) = self.rewrite_scalar(operand, p, mapper, as_scalar)?;
                let (lo, np) = self.rewrite_scalar(low, np, mapper, as_scalar)?;
                let (hi, np) = self.rewrite_scalar(high, np, mapper, as_scalar)?;
                let range = Expr::And(
                    Box::new(Expr::Binary {
                        op: BinaryOp::GtEq,
                        left: Box::new(e.clone()),
                        right: Box::new(lo),
                    }),
                    Box::new(Expr::Binary {
                        op: BinaryOp::LtEq,
                        left: Box::new(e),
                        right: Box::new(hi),
                    }),
                );
                let out = if *negated {
                    Expr::Not(Box::new(range))
                } else {
                    range
                };
                Ok((out, np))
            }
            SqlExpr::InList {
                expr: operand,
                list,
                negated,
            } => {
                let (e, mut np) = self.rewrite_scalar(operand, p, mapper, as_scalar)?;
                let mut folded: Option<Expr> = None;
                for item in list {
                    let (v, np2) = self.rewrite_scalar(item, np, mapper, as_scalar)?;
                    np = np2;
                    let eq = Expr::Binary {
                        op: BinaryOp::Eq,
                        left: Box::new(e.clone()),
                        right: Box::new(v),
                    };
                    folded = Some(match folded {
                        None => eq,
                        Some(prev) => Expr::Or(Box::new(prev), Box::new(eq)),
                    });
                }
                let folded =
                    folded.ok_or_else(|| Error::WrongArguments("IN".to_string()))?;
                let out = if *negated {
                    Expr::Not(Box::new(folded))
                } else {
                    folded
                };
                Ok((out, np))
            }
            SqlExpr::Function(f) => {
                if is_agg_func(f) {
                    let idx = mapper
                        .and_then(|m| m.get(&canonical_agg_key(f)))
                        .copied()
                        .ok_or_else(|| {
                            Error::Unsupported(
                                "aggregate function in this context".to_string(),
                            )
                        })?;
                    let col = self.arena.schema(p).column(idx).clone();
                    return Ok((Expr::Column(col), p));
                }
                Err(Error::Unsupported(format!("function {}", f.name)))
            }
            SqlExpr::Subquery(q) => self.rewrite_scalar_subquery(q, p),
            SqlExpr::Exists { .. } | SqlExpr::InSubquery { .. } => {
                let (e, np) = self.rewrite(expr, p, mapper, true)?;
                let e = e.ok_or_else(|| {
                    Error::Unsupported("subquery predicate in value position".to_string())
                })?;
                Ok((e, np))
            }
            other => Err(Error::Unsupported(format!("expression {other}"))),
        }
    }

    fn resolve_column(&self, r: &ColRef, p: NodeId) -> Result<Expr> {
        if let Some(col) = self.arena.schema(p).find_column(r)? {
            return Ok(Expr::Column(col.clone()));
        }
        // Columns coalesced away by USING/NATURAL stay reachable through
        // the join's redundant schema.
        if let Some(j) = self.arena.join(p) {
            if let Some(col) = j.redundant_schema.find_column(r)? {
                return Ok(Expr::Column(col.clone()));
            }
        }
        for outer in self.outer_schemas.iter().rev() {
            if let Some(col) = outer.find_column(r)? {
                return Ok(Expr::Correlated(col.clone()));
            }
        }
        Err(Error::UnknownColumn(r.display(), "field list".to_string()))
    }

    fn literal_from_value(&self, v: &Value) -> Result<LiteralValue> {
        match v {
            Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(LiteralValue::Int64(i))
                } else if let Ok(f) = n.parse::<f64>() {
                    Ok(LiteralValue::Float64(f))
                } else {
                    Err(Error::Parse(format!("invalid numeric literal {n}")))
                }
            }
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                Ok(LiteralValue::Utf8(s.clone()))
            }
            Value::Boolean(b) => Ok(LiteralValue::Boolean(*b)),
            Value::Null => Ok(LiteralValue::Null),
            Value::Placeholder(name) => {
                let key = name.trim_start_matches([':', '$', '?']);
                self.session
                    .stmt_ctx()
                    .params
                    .get(key)
                    .cloned()
                    .ok_or_else(|| Error::WrongArguments(format!("parameter {name}")))
            }
            other => Err(Error::Unsupported(format!("literal {other}"))),
        }
    }

    fn rewrite_exists(
        &mut self,
        subquery: &Query,
        negated: bool,
        p: NodeId,
        as_scalar: bool,
    ) -> Result<(Option<Expr>, NodeId)> {
        let inner = self.build_subquery(subquery, p)?;
        let outer_schema = self.arena.schema(p).clone();
        if as_scalar {
            let exists = self.build_exists(inner);
            let ap = self.build_apply_with_join_type(p, exists, JoinType::LeftOuter);
            let col = self.arena.schema(ap).column(outer_schema.len()).clone();
            let e = if negated {
                Expr::Not(Box::new(Expr::Column(col)))
            } else {
                Expr::Column(col)
            };
            Ok((Some(e), ap))
        } else {
            let correlated = self.arena.subtree_is_correlated(inner, &outer_schema);
            let node = self.build_semi_plan(p, inner, Vec::new(), false, negated, correlated);
            Ok((None, node))
        }
    }

    fn rewrite_in_subquery(
        &mut self,
        lhs: &SqlExpr,
        subquery: &Query,
        negated: bool,
        p: NodeId,
        mapper: Option<&AggMapper>,
        as_scalar: bool,
    ) -> Result<(Option<Expr>, NodeId)> {
        let (lexpr, p) = self.rewrite_scalar(lhs, p, mapper, true)?;
        let inner = self.build_subquery(subquery, p)?;
        if self.arena.schema(inner).len() != 1 {
            return Err(Error::WrongArguments("IN subquery".to_string()));
        }
        let inner_col = self.arena.schema(inner).column(0).clone();
        let cond = Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(lexpr),
            right: Box::new(Expr::Column(inner_col)),
        };
        let outer_schema = self.arena.schema(p).clone();
        let correlated =
            cond.is_correlated() || self.arena.subtree_is_correlated(inner, &outer_schema);
        let node = self.build_semi_plan(p, inner, vec![cond], as_scalar, negated, correlated);
        if as_scalar {
            let col = {
                let schema = self.arena.schema(node);
                schema.column(schema.len() - 1).clone()
            };
            let e = if negated {
                Expr::Not(Box::new(Expr::Column(col)))
            } else {
                Expr::Column(col)
            };
            Ok((Some(e), node))
        } else {
            Ok((None, node))
        }
    }

    fn rewrite_scalar_subquery(&mut self, q: &Query, p: NodeId) -> Result<(Expr, NodeId)> {
        let outer_len = self.arena.schema(p).len();
        let inner = self.build_subquery(q, p)?;
        if self.arena.schema(inner).len() != 1 {
            return Err(Error::WrongArguments("scalar subquery".to_string()));
        }
        let guarded = self.build_max_one_row(inner);
        let ap = self.build_apply_with_join_type(p, guarded, JoinType::LeftOuter);
        let col = self.arena.schema(ap).column(outer_len).clone();
        Ok((Expr::Column(col), ap))
    }

    /// Plan a subquery with the current plan's schema pushed as an
    /// enclosing scope, so its columns resolve as correlated.
    fn build_subquery(&mut self, q: &Query, p: NodeId) -> Result<NodeId> {
        let outer = self.arena.schema(p).clone();
        self.outer_schemas.push(outer);
        let result = self.build_query(q);
        self.outer_schemas.pop();
        result
    }
}

fn binary_op(op: &BinaryOperator) -> Result<BinaryOp> {
    Ok(match op {
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::LtEq,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::GtEq,
        BinaryOperator::Plus => BinaryOp::Plus,
        BinaryOperator::Minus => BinaryOp::Minus,
        BinaryOperator::Multiply => BinaryOp::Multiply,
        BinaryOperator::Divide => BinaryOp::Divide,
        other => return Err(Error::Unsupported(format!("operator {other}"))),
    })
}
