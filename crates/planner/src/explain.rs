//! Render a logical plan as human-readable multiline text.

use crate::expr::Expr;
use crate::plan::{JoinNode, LockKind, NodeId, NodeKind, PlanArena};

/// Render the subtree rooted at `root`, one node per line, children
/// indented. Node ids are stable for identical builder runs, so the output
/// doubles as a plan fingerprint in tests.
pub fn explain_plan(arena: &PlanArena, root: NodeId) -> String {
    let mut out = String::new();
    fmt_node(arena, root, 0, &mut out);
    out
}

fn fmt_node(arena: &PlanArena, id: NodeId, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let node = arena.node(id);
    let label = arena.str_id(id);
    match &node.kind {
        NodeKind::DataSource {
            db,
            table,
            table_as_name,
            stats,
            ..
        } => {
            out.push_str(&format!("{pad}{label} table={db}.{table}"));
            if let Some(a) = table_as_name {
                out.push_str(&format!(" alias={a}"));
            }
            if stats.pseudo {
                out.push_str(" stats=pseudo");
            }
            out.push('\n');
        }
        NodeKind::TableDual { row_count } => {
            out.push_str(&format!("{pad}{label} rows={row_count}\n"));
        }
        NodeKind::Selection { conditions } => {
            out.push_str(&format!("{pad}{label} [{}]\n", fmt_exprs(conditions)));
        }
        NodeKind::Projection { exprs } => {
            out.push_str(&format!("{pad}{label} [{}]\n", fmt_exprs(exprs)));
        }
        NodeKind::Aggregation {
            agg_funcs,
            group_items,
        } => {
            let funcs = agg_funcs
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "{pad}{label} group=[{}] funcs=[{funcs}]\n",
                fmt_exprs(group_items)
            ));
        }
        NodeKind::Join(j) => {
            out.push_str(&format!("{pad}{label} {}\n", fmt_join(j)));
        }
        NodeKind::Apply(j) => {
            out.push_str(&format!("{pad}{label} {}\n", fmt_join(j)));
        }
        NodeKind::Union => {
            out.push_str(&format!("{pad}{label}\n"));
        }
        NodeKind::Sort { by_items } => {
            let items = by_items
                .iter()
                .map(|b| {
                    if b.desc {
                        format!("{} DESC", b.expr)
                    } else {
                        b.expr.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("{pad}{label} [{items}]\n"));
        }
        NodeKind::Limit { offset, count } => {
            out.push_str(&format!("{pad}{label} offset={offset} count={count}\n"));
        }
        NodeKind::SelectLock { lock } => {
            let kind = match lock {
                LockKind::Share => "share",
                LockKind::ForUpdate => "for-update",
            };
            out.push_str(&format!("{pad}{label} kind={kind}\n"));
        }
        NodeKind::Exists => out.push_str(&format!("{pad}{label}\n")),
        NodeKind::MaxOneRow => out.push_str(&format!("{pad}{label}\n")),
        NodeKind::Update { assignments } => {
            let list = assignments
                .iter()
                .map(|a| format!("{} := {}", a.column.qualified_name(), a.expr))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("{pad}{label} set=[{list}]\n"));
        }
        NodeKind::Delete {
            tables,
            is_multi_table,
        } => {
            if *is_multi_table {
                out.push_str(&format!("{pad}{label} tables=[{}]\n", tables.join(", ")));
            } else {
                out.push_str(&format!("{pad}{label}\n"));
            }
        }
    }
    for child in &node.children {
        fmt_node(arena, *child, indent + 1, out);
    }
}

fn fmt_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_join(j: &JoinNode) -> String {
    let mut s = format!("type={:?}", j.join_type);
    if !j.equal_conditions.is_empty() {
        let eq = j
            .equal_conditions
            .iter()
            .map(|(l, r)| format!("{} = {}", l.qualified_name(), r.qualified_name()))
            .collect::<Vec<_>>()
            .join(", ");
        s.push_str(&format!(" eq=[{eq}]"));
    }
    if !j.left_conditions.is_empty() {
        s.push_str(&format!(" left=[{}]", fmt_exprs(&j.left_conditions)));
    }
    if !j.right_conditions.is_empty() {
        s.push_str(&format!(" right=[{}]", fmt_exprs(&j.right_conditions)));
    }
    if !j.other_conditions.is_empty() {
        s.push_str(&format!(" other=[{}]", fmt_exprs(&j.other_conditions)));
    }
    if !j.redundant_schema.is_empty() {
        let cols = j
            .redundant_schema
            .columns
            .iter()
            .map(|c| c.qualified_name())
            .collect::<Vec<_>>()
            .join(", ");
        s.push_str(&format!(" redundant=[{cols}]"));
    }
    if j.cartesian {
        s.push_str(" cartesian");
    }
    if j.prefer_merge_join {
        s.push_str(" hint=merge-join");
    }
    if j.prefer_inlj != 0 {
        s.push_str(" hint=index-join");
    }
    s
}
