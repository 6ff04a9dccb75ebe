//! The logical plan arena and its node kinds.
//!
//! Plans are trees of relational operators stored in an arena indexed by
//! [`NodeId`]; children and parents are id vectors, kept symmetric by
//! [`PlanArena::add_child`] / [`PlanArena::remove_child`]. Node ids are
//! allocated monotonically within one builder, so repeated builds of the
//! same statement produce identical id sequences.

use opal_catalog::TableStats;
use opal_common::TableId;
use serde::{Deserialize, Serialize};

use crate::expr::{AggFunc, Expr, LiteralValue};
use crate::schema::{Column, Schema};

/// Identifier of a plan node within one builder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Monotone id source; one per builder.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// Relational join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    /// Emits outer rows with at least one inner match.
    Semi,
    /// Semi join surfaced as a boolean column on the outer row.
    LeftOuterSemi,
    /// Emits outer rows with no inner match.
    AntiSemi,
}

/// Index-nested-loop hint: prefer the left child as the outer side.
pub const PREFER_LEFT_AS_OUTER: u8 = 1 << 0;
/// Index-nested-loop hint: prefer the right child as the outer side.
pub const PREFER_RIGHT_AS_OUTER: u8 = 1 << 1;

/// Payload shared by Join and Apply nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinNode {
    pub join_type: JoinType,
    /// Equalities between one column from each side, oriented (left, right).
    pub equal_conditions: Vec<(Column, Column)>,
    /// Conditions referencing only the left child.
    pub left_conditions: Vec<Expr>,
    /// Conditions referencing only the right child.
    pub right_conditions: Vec<Expr>,
    /// Conditions referencing both sides.
    pub other_conditions: Vec<Expr>,
    /// Columns coalesced out of the output by USING/NATURAL, still
    /// addressable by outer scopes.
    pub redundant_schema: Schema,
    /// Row padding for the null-extended side of an outer join.
    pub default_values: Vec<LiteralValue>,
    /// Inner join with no join condition at all.
    pub cartesian: bool,
    pub prefer_merge_join: bool,
    /// Bitmask of `PREFER_{LEFT,RIGHT}_AS_OUTER`.
    pub prefer_inlj: u8,
}

impl JoinNode {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            equal_conditions: Vec::new(),
            left_conditions: Vec::new(),
            right_conditions: Vec::new(),
            other_conditions: Vec::new(),
            redundant_schema: Schema::empty(),
            default_values: Vec::new(),
            cartesian: false,
            prefer_merge_join: false,
            prefer_inlj: 0,
        }
    }
}

/// One ORDER BY item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByItem {
    pub expr: Expr,
    pub desc: bool,
}

/// One UPDATE SET item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: Column,
    pub expr: Expr,
}

/// Row lock requested by a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    Share,
    ForUpdate,
}

/// The operator variants of a logical plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    DataSource {
        db: String,
        table: String,
        table_id: TableId,
        /// Alias from the FROM clause, when present.
        table_as_name: Option<String>,
        stats: TableStats,
        /// Whether the enclosing statement demanded row handles.
        need_handle: bool,
    },
    /// One virtual row; stands in for an absent FROM clause.
    TableDual {
        row_count: u64,
    },
    Selection {
        conditions: Vec<Expr>,
    },
    Projection {
        exprs: Vec<Expr>,
    },
    Aggregation {
        agg_funcs: Vec<AggFunc>,
        group_items: Vec<Expr>,
    },
    Join(JoinNode),
    /// Correlated join: re-evaluates the inner child per outer row.
    Apply(JoinNode),
    Union,
    Sort {
        by_items: Vec<ByItem>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
    SelectLock {
        lock: LockKind,
    },
    /// Boolean row-existence probe over its child.
    Exists,
    /// Cardinality guard: errors at runtime beyond one row.
    MaxOneRow,
    Update {
        assignments: Vec<Assignment>,
    },
    Delete {
        tables: Vec<String>,
        is_multi_table: bool,
    },
}

impl NodeKind {
    /// Short self-describing tag used in rendered node ids.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::DataSource { .. } => "DataSource",
            NodeKind::TableDual { .. } => "Dual",
            NodeKind::Selection { .. } => "Selection",
            NodeKind::Projection { .. } => "Projection",
            NodeKind::Aggregation { .. } => "Aggregation",
            NodeKind::Join(_) => "Join",
            NodeKind::Apply(_) => "Apply",
            NodeKind::Union => "Union",
            NodeKind::Sort { .. } => "Sort",
            NodeKind::Limit { .. } => "Limit",
            NodeKind::SelectLock { .. } => "Lock",
            NodeKind::Exists => "Exists",
            NodeKind::MaxOneRow => "MaxOneRow",
            NodeKind::Update { .. } => "Update",
            NodeKind::Delete { .. } => "Delete",
        }
    }
}

/// One operator in the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub schema: Schema,
    pub children: Vec<NodeId>,
    pub parents: Vec<NodeId>,
}

/// Arena of plan nodes for one statement build.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PlanArena {
    nodes: Vec<PlanNode>,
    ids: IdAllocator,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node. The allocator's sequence doubles as the arena index.
    pub fn add(&mut self, kind: NodeKind, schema: Schema) -> NodeId {
        let id = self.ids.alloc();
        debug_assert_eq!(id.0 as usize, self.nodes.len());
        self.nodes.push(PlanNode {
            id,
            kind,
            schema,
            children: Vec::new(),
            parents: Vec::new(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn schema(&self, id: NodeId) -> &Schema {
        &self.node(id).schema
    }

    pub fn set_schema(&mut self, id: NodeId, schema: Schema) {
        self.node_mut(id).schema = schema;
    }

    /// Rendered id of the form `<KindTag>_<n>`.
    pub fn str_id(&self, id: NodeId) -> String {
        format!("{}_{}", self.node(id).kind.tag(), id.0)
    }

    /// Link `child` under `parent`, maintaining both directions.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parents.push(parent);
    }

    /// Unlink `child` from `parent` in both directions. Used when a wrapper
    /// node is abandoned so the reachable tree keeps symmetric links.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(parent).children.retain(|c| *c != child);
        self.node_mut(child).parents.retain(|p| *p != parent);
    }

    /// Join payload accessor for Join and Apply nodes.
    pub fn join(&self, id: NodeId) -> Option<&JoinNode> {
        match &self.node(id).kind {
            NodeKind::Join(j) | NodeKind::Apply(j) => Some(j),
            _ => None,
        }
    }

    /// Mutable join payload accessor for Join and Apply nodes.
    pub fn join_mut(&mut self, id: NodeId) -> Option<&mut JoinNode> {
        match &mut self.node_mut(id).kind {
            NodeKind::Join(j) | NodeKind::Apply(j) => Some(j),
            _ => None,
        }
    }

    /// Whether any expression in the subtree references a column of `outer`
    /// as a correlated column.
    pub fn subtree_is_correlated(&self, root: NodeId, outer: &Schema) -> bool {
        let node = self.node(root);
        let mut exprs: Vec<&Expr> = Vec::new();
        match &node.kind {
            NodeKind::Selection { conditions } => exprs.extend(conditions),
            NodeKind::Projection { exprs: es } => exprs.extend(es),
            NodeKind::Aggregation {
                agg_funcs,
                group_items,
            } => {
                exprs.extend(group_items);
                for f in agg_funcs {
                    exprs.extend(&f.args);
                }
            }
            NodeKind::Join(j) | NodeKind::Apply(j) => {
                exprs.extend(&j.left_conditions);
                exprs.extend(&j.right_conditions);
                exprs.extend(&j.other_conditions);
            }
            NodeKind::Sort { by_items } => exprs.extend(by_items.iter().map(|b| &b.expr)),
            NodeKind::Update { assignments } => {
                exprs.extend(assignments.iter().map(|a| &a.expr))
            }
            _ => {}
        }
        let correlated = |e: &Expr| {
            e.referenced_correlated()
                .iter()
                .any(|c| outer.contains(c))
        };
        if exprs.into_iter().any(correlated) {
            return true;
        }
        node.children
            .iter()
            .any(|c| self.subtree_is_correlated(*c, outer))
    }
}

impl Expr {
    fn referenced_correlated(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        self.collect_correlated(&mut out);
        out
    }

    fn collect_correlated<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Expr::Correlated(c) => out.push(c),
            Expr::Column(_) | Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.collect_correlated(out);
                right.collect_correlated(out);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_correlated(out);
                r.collect_correlated(out);
            }
            Expr::Not(e) | Expr::IsNull { expr: e, .. } => e.collect_correlated(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeKind, PlanArena};
    use crate::schema::Schema;

    #[test]
    fn ids_are_monotone_and_self_describing() {
        let mut arena = PlanArena::new();
        let a = arena.add(NodeKind::TableDual { row_count: 1 }, Schema::empty());
        let b = arena.add(NodeKind::Union, Schema::empty());
        assert!(a.0 < b.0);
        assert_eq!(arena.str_id(a), "Dual_0");
        assert_eq!(arena.str_id(b), "Union_1");
    }

    #[test]
    fn child_links_are_symmetric() {
        let mut arena = PlanArena::new();
        let child = arena.add(NodeKind::TableDual { row_count: 1 }, Schema::empty());
        let parent = arena.add(NodeKind::Union, Schema::empty());
        arena.add_child(parent, child);
        assert_eq!(arena.node(parent).children, vec![child]);
        assert_eq!(arena.node(child).parents, vec![parent]);

        arena.remove_child(parent, child);
        assert!(arena.node(parent).children.is_empty());
        assert!(arena.node(child).parents.is_empty());
    }
}
