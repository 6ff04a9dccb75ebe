//! Logical plan construction for Opal SQL.
//!
//! Architecture role:
//! - consumes the parsed statement AST plus catalog, statistics, and
//!   session handles
//! - produces a typed logical operator tree ready for the rule-based
//!   optimizer, together with the privileges the statement requires
//!
//! Key modules:
//! - [`builder`]
//! - [`plan`]
//! - [`schema`]
//! - [`expr`]
//! - [`hints`]
//! - [`explain`]

pub mod builder;
pub mod context;
pub mod explain;
pub mod expr;
pub mod hints;
pub mod plan;
pub mod schema;

mod resolve;
mod rewrite;

pub use builder::{BuiltPlan, PlanBuilder, Privilege, VisitInfo};
pub use context::{SessionContext, SessionState, StmtContext};
pub use explain::explain_plan;
pub use expr::{merge_field_type, AggFunc, AggKind, BinaryOp, Expr, LiteralValue};
pub use hints::{HintStack, TableHintInfo};
pub use plan::{
    Assignment, ByItem, IdAllocator, JoinNode, JoinType, LockKind, NodeId, NodeKind, PlanArena,
    PlanNode, PREFER_LEFT_AS_OUTER, PREFER_RIGHT_AS_OUTER,
};
pub use rewrite::{canonical_agg_key, AggMapper};
pub use schema::{ColRef, Column, Schema};
