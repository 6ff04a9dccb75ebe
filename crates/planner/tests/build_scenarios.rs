use arrow_schema::DataType;
use opal_catalog::{Catalog, ColumnDef, ColumnState, StatsHandle, TableDef};
use opal_common::EXTRA_HANDLE_ID;
use opal_planner::{
    explain_plan, AggKind, BinaryOp, BuiltPlan, Expr, JoinType, LiteralValue, NodeId, NodeKind,
    PlanArena, PlanBuilder, Privilege, SessionState,
};

fn col(name: &str, dt: DataType) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        data_type: dt,
        id: 0,
        nullable: true,
        primary_key: false,
        generated_expr: None,
        state: ColumnState::Public,
    }
}

fn int_col(name: &str) -> ColumnDef {
    col(name, DataType::Int64)
}

fn table(name: &str, cols: Vec<ColumnDef>) -> TableDef {
    TableDef {
        db: "test".to_string(),
        name: name.to_string(),
        id: 0,
        columns: cols,
    }
}

fn fixture_catalog() -> Catalog {
    let mut cat = Catalog::new();
    cat.register_table(table("t", vec![int_col("a"), int_col("b"), int_col("c")]))
        .expect("register t");
    cat.register_table(table("t1", vec![int_col("a"), int_col("b")]))
        .expect("register t1");
    cat.register_table(table("t2", vec![int_col("a"), int_col("c")]))
        .expect("register t2");
    cat.register_table(table("t3", vec![int_col("a"), int_col("d")]))
        .expect("register t3");
    let mut pk = int_col("id");
    pk.primary_key = true;
    cat.register_table(table("tpk", vec![pk, col("v", DataType::Utf8)]))
        .expect("register tpk");
    let mut gen = int_col("g");
    gen.generated_expr = Some("a + 1".to_string());
    cat.register_table(table("tgen", vec![int_col("a"), gen]))
        .expect("register tgen");
    cat
}

fn build_with(sql: &str, session: &SessionState) -> opal_common::Result<BuiltPlan> {
    let stmts = opal_sql::parse_sql(sql)?;
    let hints = opal_sql::extract_hints(sql);
    let catalog = fixture_catalog();
    let stats = StatsHandle::new();
    PlanBuilder::new(&catalog, &stats, session)
        .with_hints(hints)
        .build(&stmts[0])
}

fn build(sql: &str) -> opal_common::Result<BuiltPlan> {
    build_with(sql, &SessionState::new("test"))
}

fn must_build(sql: &str) -> BuiltPlan {
    match build(sql) {
        Ok(p) => p,
        Err(e) => panic!("build failed for {sql:?}: {e}"),
    }
}

fn child(plan: &BuiltPlan, id: NodeId, i: usize) -> NodeId {
    plan.arena.node(id).children[i]
}

fn schema_names(plan: &BuiltPlan, id: NodeId) -> Vec<String> {
    plan.arena
        .schema(id)
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

/// Walk the tree checking link symmetry and per-schema (owner, position)
/// uniqueness.
fn check_tree(plan: &BuiltPlan) {
    fn walk(arena: &PlanArena, id: NodeId) {
        let node = arena.node(id);
        let mut seen = std::collections::HashSet::new();
        for c in &node.schema.columns {
            assert!(
                seen.insert((c.owner, c.position)),
                "duplicate (owner, position) in schema of {}",
                arena.str_id(id)
            );
        }
        for c in &node.children {
            assert!(
                arena.node(*c).parents.contains(&id),
                "child link of {} not mirrored in {}",
                arena.str_id(id),
                arena.str_id(*c)
            );
            walk(arena, *c);
        }
    }
    assert!(plan.arena.node(plan.root).parents.is_empty());
    walk(&plan.arena, plan.root);
}

#[test]
fn simple_projection_and_filter() {
    let plan = must_build("SELECT a, b FROM t WHERE c > 1");
    let NodeKind::Projection { exprs } = &plan.arena.node(plan.root).kind else {
        panic!("expected Projection root, got {}", plan.arena.str_id(plan.root));
    };
    assert_eq!(exprs.len(), 2);
    assert_eq!(schema_names(&plan, plan.root), vec!["a", "b"]);

    let sel = child(&plan, plan.root, 0);
    let NodeKind::Selection { conditions } = &plan.arena.node(sel).kind else {
        panic!("expected Selection below projection");
    };
    assert_eq!(conditions.len(), 1);
    match &conditions[0] {
        Expr::Binary { op, left, .. } => {
            assert_eq!(*op, BinaryOp::Gt);
            match left.as_ref() {
                Expr::Column(c) => assert_eq!(c.name, "c"),
                other => panic!("expected column operand, got {other:?}"),
            }
        }
        other => panic!("expected comparison, got {other:?}"),
    }
    let ds = child(&plan, sel, 0);
    assert!(matches!(
        plan.arena.node(ds).kind,
        NodeKind::DataSource { .. }
    ));
    assert_eq!(
        plan.visit_info
            .iter()
            .filter(|v| v.privilege == Privilege::Select)
            .count(),
        1
    );
    check_tree(&plan);
}

#[test]
fn having_aggregate_over_alias_rewrites_onto_expression() {
    let plan = must_build("SELECT a + 1 AS b FROM t HAVING sum(b) < 0");

    // Trim projection restores the user-visible arity.
    let NodeKind::Projection { exprs } = &plan.arena.node(plan.root).kind else {
        panic!("expected trim projection root");
    };
    assert_eq!(exprs.len(), 1);
    assert_eq!(schema_names(&plan, plan.root), vec!["b"]);

    let sel = child(&plan, plan.root, 0);
    let NodeKind::Selection { conditions } = &plan.arena.node(sel).kind else {
        panic!("expected HAVING selection");
    };
    match &conditions[0] {
        Expr::Binary { op, left, right } => {
            assert_eq!(*op, BinaryOp::Lt);
            match left.as_ref() {
                Expr::Column(c) => assert_eq!(c.name, "sel_agg_0"),
                other => panic!("expected aggregate column, got {other:?}"),
            }
            assert_eq!(**right, Expr::Literal(LiteralValue::Int64(0)));
        }
        other => panic!("expected comparison, got {other:?}"),
    }

    let proj = child(&plan, sel, 0);
    assert!(matches!(
        plan.arena.node(proj).kind,
        NodeKind::Projection { .. }
    ));
    assert_eq!(schema_names(&plan, proj), vec!["b", "sel_agg_0"]);

    let agg = child(&plan, proj, 0);
    let NodeKind::Aggregation { agg_funcs, .. } = &plan.arena.node(agg).kind else {
        panic!("expected aggregation below projection");
    };
    let real: Vec<_> = agg_funcs
        .iter()
        .filter(|f| f.kind != AggKind::FirstRow)
        .collect();
    assert_eq!(real.len(), 1);
    assert_eq!(real[0].kind, AggKind::Sum);
    // sum(b) was rewritten to sum(a + 1) before the projection was built.
    match &real[0].args[0] {
        Expr::Binary { op, left, .. } => {
            assert_eq!(*op, BinaryOp::Plus);
            assert!(matches!(left.as_ref(), Expr::Column(c) if c.name == "a"));
        }
        other => panic!("expected sum over a + 1, got {other:?}"),
    }
    check_tree(&plan);
}

#[test]
fn using_join_chain_coalesces_columns() {
    let plan = must_build("SELECT * FROM t1 JOIN t2 USING (a) JOIN t3 USING (a)");
    assert_eq!(schema_names(&plan, plan.root), vec!["a", "b", "c", "d"]);

    let outer = child(&plan, plan.root, 0);
    let outer_join = plan.arena.join(outer).expect("outer join");
    assert_eq!(outer_join.equal_conditions.len(), 1);
    let (l, r) = &outer_join.equal_conditions[0];
    assert_eq!(l.name, "a");
    assert_eq!(r.name, "a");
    assert_eq!(r.table_name.as_deref(), Some("t3"));
    // The inner join's coalesced t2.a is still visible upward.
    let redundant: Vec<_> = outer_join
        .redundant_schema
        .columns
        .iter()
        .map(|c| c.qualified_name())
        .collect();
    assert!(redundant.contains(&"t2.a".to_string()), "{redundant:?}");

    let inner = child(&plan, outer, 0);
    let inner_join = plan.arena.join(inner).expect("inner join");
    assert_eq!(inner_join.equal_conditions.len(), 1);
    assert_eq!(
        inner_join.redundant_schema.columns[0].qualified_name(),
        "t2.a"
    );
    // The coalesced output holds exactly one `a`.
    let names = schema_names(&plan, inner);
    assert_eq!(names.iter().filter(|n| *n == "a").count(), 1);
    check_tree(&plan);
}

#[test]
fn redundant_schema_resolves_coalesced_columns() {
    let plan = must_build("SELECT t2.a FROM (t1 JOIN t2 USING (a)) JOIN t3 USING (a)");
    assert_eq!(schema_names(&plan, plan.root), vec!["a"]);
    check_tree(&plan);
}

#[test]
fn natural_join_coalesces_common_columns() {
    let plan = must_build("SELECT * FROM t1 NATURAL JOIN t2");
    assert_eq!(schema_names(&plan, plan.root), vec!["a", "b", "c"]);
    let join = plan.arena.join(child(&plan, plan.root, 0)).expect("join");
    assert_eq!(join.equal_conditions.len(), 1);
}

#[test]
fn using_unknown_column_is_rejected() {
    let err = build("SELECT * FROM t1 JOIN t2 USING (zz)").expect_err("reject");
    assert_eq!(err.code(), "UnknownColumn");
}

#[test]
fn union_arity_mismatch_is_rejected() {
    let err = build("SELECT 1 UNION SELECT 1, 2").expect_err("reject");
    assert_eq!(err.code(), "UnionArityMismatch");
}

#[test]
fn union_distinct_adds_trailing_aggregation() {
    let plan = must_build("SELECT a FROM t1 UNION SELECT a FROM t2");
    let NodeKind::Aggregation { group_items, agg_funcs } = &plan.arena.node(plan.root).kind
    else {
        panic!("expected distinct aggregation atop the union");
    };
    assert_eq!(group_items.len(), 1);
    assert!(agg_funcs.iter().all(|f| f.kind == AggKind::FirstRow));

    let union = child(&plan, plan.root, 0);
    assert!(matches!(plan.arena.node(union).kind, NodeKind::Union));
    // Union output columns are owned by the union node.
    for c in &plan.arena.schema(union).columns {
        assert_eq!(c.owner, union);
    }
    for branch in &plan.arena.node(union).children {
        assert!(matches!(
            plan.arena.node(*branch).kind,
            NodeKind::Projection { .. }
        ));
    }
    check_tree(&plan);
}

#[test]
fn union_all_has_no_distinct() {
    let plan = must_build("SELECT a FROM t1 UNION ALL SELECT a FROM t2");
    assert!(matches!(plan.arena.node(plan.root).kind, NodeKind::Union));
}

#[test]
fn ambiguous_bare_column_is_rejected() {
    let err = build("SELECT a FROM t1, t2 WHERE t1.a = t2.a").expect_err("reject");
    assert_eq!(err.code(), "AmbiguousColumn");
}

#[test]
fn comma_join_is_cartesian() {
    let plan = must_build("SELECT t1.a FROM t1, t2");
    let join = plan.arena.join(child(&plan, plan.root, 0)).expect("join");
    assert!(join.cartesian);
    assert_eq!(join.join_type, JoinType::Inner);
}

#[test]
fn wildcard_hides_synthesized_rowid() {
    let mut session = SessionState::new("test");
    session.read_only_txn = false;
    let plan = build_with("SELECT * FROM t", &session).expect("build");
    // One output column per declared column.
    assert_eq!(schema_names(&plan, plan.root), vec!["a", "b", "c"]);

    let ds = child(&plan, plan.root, 0);
    let ds_schema = plan.arena.schema(ds);
    assert_eq!(ds_schema.len(), 4);
    let rowid = ds_schema.column(3);
    assert_eq!(rowid.name, "_rowid");
    assert_eq!(rowid.column_id, Some(EXTRA_HANDLE_ID));
    assert_eq!(ds_schema.handle_map.len(), 1);
    check_tree(&plan);
}

#[test]
fn read_only_scan_has_no_rowid() {
    let plan = must_build("SELECT * FROM t");
    let ds = child(&plan, plan.root, 0);
    assert_eq!(plan.arena.schema(ds).len(), 3);
    assert!(plan.arena.schema(ds).handle_map.is_empty());
}

#[test]
fn select_for_update_demands_handles() {
    let plan = must_build("SELECT v FROM tpk FOR UPDATE");
    let lock = child(&plan, plan.root, 0);
    assert!(matches!(
        plan.arena.node(lock).kind,
        NodeKind::SelectLock { .. }
    ));
    let ds = child(&plan, lock, 0);
    // The integer primary key doubles as the handle; no _rowid appears.
    let schema = plan.arena.schema(ds);
    assert_eq!(schema.len(), 2);
    assert_eq!(schema.handle_map.len(), 1);
    let handles = schema.handle_map.values().next().expect("handle entry");
    assert_eq!(handles[0].name, "id");
}

#[test]
fn group_by_positional_and_alias() {
    let plan = must_build("SELECT a AS x FROM t1 GROUP BY 1");
    let proj = plan.root;
    let agg = child(&plan, proj, 0);
    let NodeKind::Aggregation { group_items, .. } = &plan.arena.node(agg).kind else {
        panic!("expected aggregation");
    };
    assert!(matches!(&group_items[0], Expr::Column(c) if c.name == "a"));

    let plan = must_build("SELECT a + 1 AS s FROM t1 GROUP BY s");
    let agg = child(&plan, plan.root, 0);
    let NodeKind::Aggregation { group_items, .. } = &plan.arena.node(agg).kind else {
        panic!("expected aggregation");
    };
    assert!(matches!(&group_items[0], Expr::Binary { op, .. } if *op == BinaryOp::Plus));
}

#[test]
fn group_by_prefers_input_schema_inside_compound_expressions() {
    // `b` names both a select alias and a base column; inside b + 1 the
    // base column wins.
    let plan = must_build("SELECT a AS b FROM t1 GROUP BY b + 1");
    let agg = child(&plan, plan.root, 0);
    let NodeKind::Aggregation { group_items, .. } = &plan.arena.node(agg).kind else {
        panic!("expected aggregation");
    };
    match &group_items[0] {
        Expr::Binary { left, .. } => {
            assert!(matches!(left.as_ref(), Expr::Column(c) if c.name == "b"));
        }
        other => panic!("expected compound group item, got {other:?}"),
    }
}

#[test]
fn equal_aggregates_share_one_output_column() {
    let plan = must_build("SELECT sum(a), sum(a) + count(*) FROM t1");
    let NodeKind::Projection { exprs } = &plan.arena.node(plan.root).kind else {
        panic!("expected projection root");
    };
    let agg = child(&plan, plan.root, 0);
    let NodeKind::Aggregation { agg_funcs, .. } = &plan.arena.node(agg).kind else {
        panic!("expected aggregation");
    };
    let real: Vec<_> = agg_funcs
        .iter()
        .filter(|f| f.kind != AggKind::FirstRow)
        .collect();
    assert_eq!(real.len(), 2, "sum(a) deduplicates, count(*) stays");

    // Both references to sum(a) resolve to the same aggregation ordinal.
    let first = match &exprs[0] {
        Expr::Column(c) => (c.owner, c.position),
        other => panic!("expected column, got {other:?}"),
    };
    match &exprs[1] {
        Expr::Binary { left, .. } => match left.as_ref() {
            Expr::Column(c) => assert_eq!((c.owner, c.position), first),
            other => panic!("expected aggregate column, got {other:?}"),
        },
        other => panic!("expected sum + count, got {other:?}"),
    }
}

#[test]
fn order_by_alias_references_projection_output() {
    let plan = must_build("SELECT a AS x FROM t1 ORDER BY x");
    let NodeKind::Sort { by_items } = &plan.arena.node(plan.root).kind else {
        panic!("expected sort root");
    };
    let proj = child(&plan, plan.root, 0);
    match &by_items[0].expr {
        Expr::Column(c) => {
            assert_eq!(c.owner, proj);
            assert_eq!(c.name, "x");
        }
        other => panic!("expected projection column, got {other:?}"),
    }
    assert!(!by_items[0].desc);
}

#[test]
fn order_by_hidden_column_appends_auxiliary_field() {
    let plan = must_build("SELECT a FROM t1 ORDER BY b DESC");
    // Root trims back to the visible arity.
    assert_eq!(schema_names(&plan, plan.root), vec!["a"]);
    let sort = child(&plan, plan.root, 0);
    let NodeKind::Sort { by_items } = &plan.arena.node(sort).kind else {
        panic!("expected sort under trim projection");
    };
    assert!(by_items[0].desc);
    let proj = child(&plan, sort, 0);
    assert_eq!(plan.arena.schema(proj).len(), 2);
    check_tree(&plan);
}

#[test]
fn order_by_aggregate_appends_auxiliary_field() {
    let plan = must_build("SELECT a FROM t1 GROUP BY a ORDER BY sum(b)");
    assert_eq!(schema_names(&plan, plan.root), vec!["a"]);
    let sort = child(&plan, plan.root, 0);
    let NodeKind::Sort { by_items } = &plan.arena.node(sort).kind else {
        panic!("expected sort node");
    };
    assert!(matches!(&by_items[0].expr, Expr::Column(c) if c.name == "sel_agg_0"));
    check_tree(&plan);
}

#[test]
fn distinct_builds_first_row_aggregation() {
    let plan = must_build("SELECT DISTINCT a FROM t1");
    let NodeKind::Aggregation { group_items, agg_funcs } = &plan.arena.node(plan.root).kind
    else {
        panic!("expected aggregation root");
    };
    assert_eq!(group_items.len(), 1);
    assert!(agg_funcs.iter().all(|f| f.kind == AggKind::FirstRow));
    assert!(matches!(
        plan.arena.node(child(&plan, plan.root, 0)).kind,
        NodeKind::Projection { .. }
    ));
}

#[test]
fn limit_and_offset_literals() {
    let plan = must_build("SELECT a FROM t1 LIMIT 5 OFFSET 2");
    let NodeKind::Limit { offset, count } = plan.arena.node(plan.root).kind else {
        panic!("expected limit root");
    };
    assert_eq!((offset, count), (2, 5));
}

#[test]
fn limit_accepts_bound_numeric_string_parameter() {
    let mut session = SessionState::new("test");
    session
        .stmt
        .params
        .insert("n".to_string(), LiteralValue::Utf8("3".to_string()));
    let plan = build_with("SELECT a FROM t1 LIMIT :n", &session).expect("build");
    let NodeKind::Limit { count, .. } = plan.arena.node(plan.root).kind else {
        panic!("expected limit root");
    };
    assert_eq!(count, 3);
}

#[test]
fn limit_rejects_bad_arguments() {
    assert_eq!(
        build("SELECT a FROM t1 LIMIT 1.5").expect_err("reject").code(),
        "WrongArguments"
    );
    assert_eq!(
        build("SELECT a FROM t1 LIMIT -1").expect_err("reject").code(),
        "WrongArguments"
    );
}

#[test]
fn where_parameter_binding() {
    let mut session = SessionState::new("test");
    session
        .stmt
        .params
        .insert("min".to_string(), LiteralValue::Int64(5));
    let plan = build_with("SELECT a FROM t1 WHERE b > :min", &session).expect("build");
    let sel = child(&plan, plan.root, 0);
    let NodeKind::Selection { conditions } = &plan.arena.node(sel).kind else {
        panic!("expected selection");
    };
    match &conditions[0] {
        Expr::Binary { right, .. } => {
            assert_eq!(**right, Expr::Literal(LiteralValue::Int64(5)));
        }
        other => panic!("expected comparison, got {other:?}"),
    }
}

#[test]
fn on_conditions_split_by_side() {
    let plan = must_build(
        "SELECT t1.a FROM t1 JOIN t2 ON t1.a = t2.a AND t1.b > 1 AND t2.c > 2 AND t1.a + t2.c > 3",
    );
    let join = plan.arena.join(child(&plan, plan.root, 0)).expect("join");
    assert_eq!(join.equal_conditions.len(), 1);
    assert_eq!(join.left_conditions.len(), 1);
    assert_eq!(join.right_conditions.len(), 1);
    assert_eq!(join.other_conditions.len(), 1);
    assert!(!join.cartesian);
}

#[test]
fn reversed_equality_is_reoriented() {
    let plan = must_build("SELECT t1.a FROM t1 JOIN t2 ON t2.a = t1.a");
    let join_id = child(&plan, plan.root, 0);
    let join = plan.arena.join(join_id).expect("join");
    let left_child = child(&plan, join_id, 0);
    let (l, _r) = &join.equal_conditions[0];
    assert!(plan.arena.schema(left_child).contains(l));
}

#[test]
fn left_join_initializes_default_values() {
    let plan = must_build("SELECT t1.a FROM t1 LEFT JOIN t2 ON t1.a = t2.a");
    let join = plan.arena.join(child(&plan, plan.root, 0)).expect("join");
    assert_eq!(join.join_type, JoinType::LeftOuter);
    // One null per right-side column.
    assert_eq!(join.default_values.len(), 2);
    assert!(join
        .default_values
        .iter()
        .all(|v| *v == LiteralValue::Null));
}

#[test]
fn merge_join_hint_is_applied() {
    let plan = must_build("SELECT /*+ tidb_smj(t1) */ t1.a FROM t1 JOIN t2 ON t1.a = t2.a");
    let join = plan.arena.join(child(&plan, plan.root, 0)).expect("join");
    assert!(join.prefer_merge_join);
    assert_eq!(join.prefer_inlj, 0);
}

#[test]
fn conflicting_hints_are_rejected() {
    let err = build("SELECT /*+ tidb_smj(t1), tidb_inlj(t2) */ t1.a FROM t1 JOIN t2 ON t1.a = t2.a")
        .expect_err("reject");
    assert_eq!(err.code(), "ConflictingHints");
}

#[test]
fn unknown_hints_are_ignored() {
    let plan = must_build("SELECT /*+ max_execution_time(1000) */ a FROM t1");
    assert!(matches!(
        plan.arena.node(plan.root).kind,
        NodeKind::Projection { .. }
    ));
}

#[test]
fn bare_wildcard_must_be_first_field() {
    let err = build("SELECT a, * FROM t").expect_err("reject");
    assert_eq!(err.code(), "InvalidWildCard");
}

#[test]
fn qualified_wildcard_filters_by_alias() {
    let plan = must_build("SELECT x.* FROM t1 AS x JOIN t2 ON x.a = t2.a");
    assert_eq!(schema_names(&plan, plan.root), vec!["a", "b"]);
}

#[test]
fn unknown_column_is_rejected() {
    let err = build("SELECT z FROM t").expect_err("reject");
    assert_eq!(err.code(), "UnknownColumn");
}

#[test]
fn uncorrelated_exists_becomes_semi_join() {
    let plan = must_build("SELECT a FROM t1 WHERE EXISTS (SELECT a FROM t2)");
    let node = child(&plan, plan.root, 0);
    match &plan.arena.node(node).kind {
        NodeKind::Join(j) => assert_eq!(j.join_type, JoinType::Semi),
        other => panic!("expected semi join, got {other:?}"),
    }
    // The predicate was absorbed; output arity is unchanged.
    assert_eq!(plan.arena.schema(node).len(), 2);
    check_tree(&plan);
}

#[test]
fn correlated_exists_becomes_semi_apply() {
    let plan = must_build("SELECT a FROM t1 WHERE EXISTS (SELECT a FROM t2 WHERE t2.a = t1.a)");
    let node = child(&plan, plan.root, 0);
    match &plan.arena.node(node).kind {
        NodeKind::Apply(j) => assert_eq!(j.join_type, JoinType::Semi),
        other => panic!("expected semi apply, got {other:?}"),
    }
    check_tree(&plan);
}

#[test]
fn not_exists_is_anti_semi() {
    let plan = must_build("SELECT a FROM t1 WHERE NOT EXISTS (SELECT a FROM t2)");
    let node = child(&plan, plan.root, 0);
    match &plan.arena.node(node).kind {
        NodeKind::Join(j) => assert_eq!(j.join_type, JoinType::AntiSemi),
        other => panic!("expected anti semi join, got {other:?}"),
    }
}

#[test]
fn in_subquery_builds_equality_condition() {
    let plan = must_build("SELECT a FROM t1 WHERE b IN (SELECT c FROM t2)");
    let node = child(&plan, plan.root, 0);
    let join = plan.arena.join(node).expect("semi join");
    assert_eq!(join.join_type, JoinType::Semi);
    assert_eq!(join.equal_conditions.len(), 1);
    assert_eq!(join.equal_conditions[0].0.name, "b");
}

#[test]
fn scalar_subquery_builds_max_one_row_apply() {
    let plan = must_build("SELECT a, (SELECT b FROM t1) FROM t2");
    let NodeKind::Projection { exprs } = &plan.arena.node(plan.root).kind else {
        panic!("expected projection root");
    };
    match &exprs[1] {
        Expr::Column(c) => assert!(c.from_agg_or_subquery),
        other => panic!("expected subquery column, got {other:?}"),
    }
    let apply = child(&plan, plan.root, 0);
    match &plan.arena.node(apply).kind {
        NodeKind::Apply(j) => assert_eq!(j.join_type, JoinType::LeftOuter),
        other => panic!("expected apply, got {other:?}"),
    }
    let guard = child(&plan, apply, 1);
    assert!(matches!(plan.arena.node(guard).kind, NodeKind::MaxOneRow));
    check_tree(&plan);
}

#[test]
fn scalar_exists_surfaces_boolean_column() {
    let plan = must_build("SELECT a, EXISTS (SELECT a FROM t2) FROM t1");
    let apply = child(&plan, plan.root, 0);
    assert!(matches!(plan.arena.node(apply).kind, NodeKind::Apply(_)));
    let exists = child(&plan, apply, 1);
    let NodeKind::Exists = &plan.arena.node(exists).kind else {
        panic!("expected exists node");
    };
    assert_eq!(plan.arena.schema(exists).len(), 1);
    assert_eq!(
        plan.arena.schema(exists).column(0).data_type,
        DataType::Boolean
    );
    check_tree(&plan);
}

#[test]
fn correlated_on_condition_is_rejected() {
    let err = build("SELECT a FROM t1 WHERE EXISTS (SELECT t2.a FROM t2 JOIN t3 ON t2.a = t1.a)")
        .expect_err("reject");
    assert_eq!(err.code(), "CorrelatedOnCondition");
}

#[test]
fn update_rejects_generated_column() {
    let err = build("UPDATE tgen SET g = 1").expect_err("reject");
    assert_eq!(err.code(), "BadGeneratedColumn");
}

#[test]
fn update_builds_assignment_list_and_visits() {
    let plan = must_build("UPDATE tgen SET a = a + 1 WHERE a > 0");
    let NodeKind::Update { assignments } = &plan.arena.node(plan.root).kind else {
        panic!("expected update root");
    };
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].column.name, "a");
    assert!(plan
        .visit_info
        .iter()
        .any(|v| v.privilege == Privilege::Update && v.table == "tgen"));
    let sel = child(&plan, plan.root, 0);
    assert!(matches!(
        plan.arena.node(sel).kind,
        NodeKind::Selection { .. }
    ));
}

#[test]
fn delete_builds_pipeline_and_visits() {
    let plan = must_build("DELETE FROM t WHERE c > 1 ORDER BY a LIMIT 1");
    let NodeKind::Delete { is_multi_table, .. } = &plan.arena.node(plan.root).kind else {
        panic!("expected delete root");
    };
    assert!(!is_multi_table);
    assert!(plan.arena.schema(plan.root).is_empty());
    let limit = child(&plan, plan.root, 0);
    assert!(matches!(plan.arena.node(limit).kind, NodeKind::Limit { .. }));
    let sort = child(&plan, limit, 0);
    assert!(matches!(plan.arena.node(sort).kind, NodeKind::Sort { .. }));
    assert!(plan
        .visit_info
        .iter()
        .any(|v| v.privilege == Privilege::Delete && v.table == "t"));
    check_tree(&plan);
}

#[test]
fn unknown_table_is_rejected() {
    let err = build("SELECT a FROM missing").expect_err("reject");
    assert_eq!(err.code(), "UnknownTable");
}

#[test]
fn derived_table_alias_renames_columns() {
    let plan = must_build("SELECT x.a FROM (SELECT a FROM t1) AS x");
    assert_eq!(schema_names(&plan, plan.root), vec!["a"]);
    check_tree(&plan);
}

#[test]
fn builds_are_deterministic() {
    for sql in [
        "SELECT a, b FROM t WHERE c > 1 ORDER BY a DESC LIMIT 3",
        "SELECT * FROM t1 JOIN t2 USING (a) JOIN t3 USING (a)",
        "SELECT a + 1 AS b FROM t HAVING sum(b) < 0",
        "SELECT a FROM t1 UNION SELECT a FROM t2",
    ] {
        let first = must_build(sql);
        let second = must_build(sql);
        assert_eq!(
            explain_plan(&first.arena, first.root),
            explain_plan(&second.arena, second.root),
            "fingerprint drift for {sql:?}"
        );
    }
}

#[test]
fn explain_renders_self_describing_ids() {
    let plan = must_build("SELECT a FROM t WHERE c > 1");
    let rendered = explain_plan(&plan.arena, plan.root);
    assert!(rendered.contains("Projection_"), "{rendered}");
    assert!(rendered.contains("Selection_"), "{rendered}");
    assert!(rendered.contains("DataSource_"), "{rendered}");
    assert!(rendered.contains("stats=pseudo"), "{rendered}");
}
