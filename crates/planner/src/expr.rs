//! Rewritten scalar expressions referenced by plan nodes.
//!
//! These are the expressions the rewriter produces from AST nodes: every
//! column they mention is a concrete [`Column`] of some operator's schema.

use arrow_schema::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{Column, Schema};

/// A literal value as it appears in plans and parameter bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
            LiteralValue::Boolean(_) => DataType::Boolean,
            LiteralValue::Null => DataType::Null,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int64(v) => write!(f, "{v}"),
            LiteralValue::Float64(v) => write!(f, "{v}"),
            LiteralValue::Utf8(v) => write!(f, "'{v}'"),
            LiteralValue::Boolean(v) => write!(f, "{v}"),
            LiteralValue::Null => write!(f, "NULL"),
        }
    }
}

/// Binary scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

/// A rewritten scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column of the input plan.
    Column(Column),
    /// Reference to a column of an enclosing query's schema.
    Correlated(Column),
    Literal(LiteralValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Column(c) | Expr::Correlated(c) => c.data_type.clone(),
            Expr::Literal(v) => v.data_type(),
            Expr::Binary { op, left, right } => {
                if op.is_comparison() {
                    DataType::Boolean
                } else {
                    merge_field_type(&left.data_type(), &right.data_type())
                }
            }
            Expr::And(..) | Expr::Or(..) | Expr::Not(_) | Expr::IsNull { .. } => DataType::Boolean,
        }
    }

    /// Flatten a conjunction into its conjuncts (right- or left-deep trees).
    pub fn split_cnf(self) -> Vec<Expr> {
        match self {
            Expr::And(l, r) => {
                let mut items = l.split_cnf();
                items.extend(r.split_cnf());
                items
            }
            other => vec![other],
        }
    }

    /// All plan columns the expression references (correlated ones excluded).
    pub fn referenced_columns(&self) -> Vec<Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<Column>) {
        match self {
            Expr::Column(c) => out.push(c.clone()),
            Expr::Correlated(_) | Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Expr::Not(e) | Expr::IsNull { expr: e, .. } => e.collect_columns(out),
        }
    }

    pub fn is_correlated(&self) -> bool {
        match self {
            Expr::Correlated(_) => true,
            Expr::Column(_) | Expr::Literal(_) => false,
            Expr::Binary { left, right, .. } => left.is_correlated() || right.is_correlated(),
            Expr::And(l, r) | Expr::Or(l, r) => l.is_correlated() || r.is_correlated(),
            Expr::Not(e) | Expr::IsNull { expr: e, .. } => e.is_correlated(),
        }
    }

    /// Turn correlated references that belong to `outer` back into plain
    /// columns; the enclosing apply supplies them per row.
    pub fn decorrelate(self, outer: &Schema) -> Expr {
        match self {
            Expr::Correlated(c) if outer.contains(&c) => Expr::Column(c),
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(left.decorrelate(outer)),
                right: Box::new(right.decorrelate(outer)),
            },
            Expr::And(l, r) => Expr::And(
                Box::new(l.decorrelate(outer)),
                Box::new(r.decorrelate(outer)),
            ),
            Expr::Or(l, r) => Expr::Or(
                Box::new(l.decorrelate(outer)),
                Box::new(r.decorrelate(outer)),
            ),
            Expr::Not(e) => Expr::Not(Box::new(e.decorrelate(outer))),
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.decorrelate(outer)),
                negated,
            },
            other => other,
        }
    }

    /// The two sides of a bare column equality, if the expression is one.
    pub fn as_column_eq(&self) -> Option<(&Column, &Column)> {
        if let Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = self
        {
            if let (Expr::Column(l), Expr::Column(r)) = (left.as_ref(), right.as_ref()) {
                return Some((l, r));
            }
        }
        None
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c.qualified_name()),
            Expr::Correlated(c) => write!(f, "outer({})", c.qualified_name()),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Binary { op, left, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(e) => write!(f, "NOT ({e})"),
            Expr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{expr} IS NOT NULL")
                } else {
                    write!(f, "{expr} IS NULL")
                }
            }
        }
    }
}

/// Aggregate function kinds the builder models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Extension aggregate returning an arbitrary input value; exposes
    /// non-grouped columns through an aggregation.
    FirstRow,
}

impl AggKind {
    pub fn from_name(name: &str) -> Option<AggKind> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggKind::Count),
            "sum" => Some(AggKind::Sum),
            "avg" => Some(AggKind::Avg),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "first_row" => Some(AggKind::FirstRow),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Avg => "avg",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::FirstRow => "first_row",
        }
    }
}

/// One aggregate call inside an Aggregation node. Structural equality drives
/// common-aggregate elimination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggFunc {
    pub kind: AggKind,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

impl AggFunc {
    pub fn ret_type(&self) -> DataType {
        let arg_type = self
            .args
            .first()
            .map(Expr::data_type)
            .unwrap_or(DataType::Int64);
        match self.kind {
            AggKind::Count => DataType::Int64,
            AggKind::Avg => DataType::Float64,
            AggKind::Sum => match arg_type {
                DataType::Float64 | DataType::Float32 => DataType::Float64,
                DataType::Decimal128(p, s) => DataType::Decimal128(p, s),
                _ => DataType::Int64,
            },
            AggKind::Min | AggKind::Max | AggKind::FirstRow => arg_type,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        if self.distinct {
            write!(f, "{}(distinct {args})", self.kind.name())
        } else {
            write!(f, "{}({args})", self.kind.name())
        }
    }
}

/// Join two column types for UNION output, widening so either branch's
/// values fit. Decimal merge keeps the max scale and the max integral width.
pub fn merge_field_type(a: &DataType, b: &DataType) -> DataType {
    use DataType::*;
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Null, other) | (other, Null) => other.clone(),
        (Utf8, _) | (_, Utf8) | (LargeUtf8, _) | (_, LargeUtf8) => Utf8,
        (Decimal128(p1, s1), Decimal128(p2, s2)) => {
            let scale = (*s1).max(*s2);
            let integral = (*p1 as i8 - *s1).max(*p2 as i8 - *s2);
            Decimal128((integral + scale).min(38) as u8, scale)
        }
        (Decimal128(p, s), other) | (other, Decimal128(p, s)) => {
            if matches!(other, Float64 | Float32) {
                Float64
            } else {
                // Integers widen into a decimal with 19 integral digits.
                let scale = *s;
                let integral = (*p as i8 - *s).max(19);
                Decimal128((integral + scale).min(38) as u8, scale)
            }
        }
        (Float64, _) | (_, Float64) | (Float32, _) | (_, Float32) => Float64,
        _ => Int64,
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_field_type, BinaryOp, Expr, LiteralValue};
    use arrow_schema::DataType;

    fn lit(v: i64) -> Expr {
        Expr::Literal(LiteralValue::Int64(v))
    }

    fn and(l: Expr, r: Expr) -> Expr {
        Expr::And(Box::new(l), Box::new(r))
    }

    #[test]
    fn split_cnf_flattens_nested_conjunctions() {
        let e = and(and(lit(1), lit(2)), and(lit(3), lit(4)));
        assert_eq!(e.split_cnf().len(), 4);

        let single = Expr::Or(Box::new(lit(1)), Box::new(lit(2)));
        assert_eq!(single.split_cnf().len(), 1);
    }

    #[test]
    fn comparison_yields_boolean() {
        let e = Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(lit(1)),
            right: Box::new(lit(2)),
        };
        assert_eq!(e.data_type(), DataType::Boolean);
    }

    #[test]
    fn arithmetic_merges_operand_types() {
        let e = Expr::Binary {
            op: BinaryOp::Plus,
            left: Box::new(lit(1)),
            right: Box::new(Expr::Literal(LiteralValue::Float64(0.5))),
        };
        assert_eq!(e.data_type(), DataType::Float64);
    }

    #[test]
    fn union_lattice_widens() {
        assert_eq!(
            merge_field_type(&DataType::Null, &DataType::Int64),
            DataType::Int64
        );
        assert_eq!(
            merge_field_type(&DataType::Int64, &DataType::Float64),
            DataType::Float64
        );
        assert_eq!(
            merge_field_type(&DataType::Int64, &DataType::Utf8),
            DataType::Utf8
        );
        assert_eq!(
            merge_field_type(&DataType::Boolean, &DataType::Boolean),
            DataType::Boolean
        );
    }

    #[test]
    fn union_lattice_decimal_takes_max_scale_and_width() {
        // (10, 2) vs (8, 4): integral widths 8 and 4, merged scale 4,
        // so precision is 8 + 4.
        assert_eq!(
            merge_field_type(
                &DataType::Decimal128(10, 2),
                &DataType::Decimal128(8, 4)
            ),
            DataType::Decimal128(12, 4)
        );
    }
}
