//! The plan builder: turns a parsed statement into a logical plan tree.
//!
//! A SELECT becomes: resolve source, expand `*`, resolve group-by, resolve
//! having/order-by (which may extend the select list), WHERE filter, lock,
//! aggregate, project, HAVING filter, distinct, sort, limit, and a final
//! projection trimming the auxiliary columns. The ordering is load-bearing:
//! aggregates discovered in HAVING or ORDER BY must be injected into the
//! select list before the aggregation and projection are built.

use std::collections::{HashMap, HashSet};
use std::mem;

use arrow_schema::DataType;
use opal_catalog::{Catalog, ColumnDef, StatsHandle, TableStats};
use opal_common::{Error, Result, EXTRA_HANDLE_ID};
use opal_sql::HintClause;
use sqlparser::ast::{
    Assignment as SqlAssignment, AssignmentTarget, BinaryOperator, Delete, Distinct,
    Expr as SqlExpr, FromTable, Function, GroupByExpr, Join as SqlJoin, JoinConstraint,
    JoinOperator, LockClause, LockType, ObjectName, Offset, OrderBy, Query, Select, SelectItem,
    SetExpr, SetOperator, SetQuantifier, Statement, TableFactor, TableWithJoins, Value,
};

use crate::context::SessionContext;
use crate::expr::{merge_field_type, AggFunc, AggKind, Expr, LiteralValue};
use crate::hints::HintStack;
use crate::plan::{
    Assignment, ByItem, JoinNode, JoinType, LockKind, NodeId, NodeKind, PlanArena,
    PREFER_LEFT_AS_OUTER, PREFER_RIGHT_AS_OUTER,
};
use crate::resolve::{
    accept, column_name_expr, extract_agg_funcs, field_marker, has_agg_func, is_agg_func,
    parse_agg_call, GbyResolver, HavingOrderByResolver, SelectField,
};
use crate::rewrite::{canonical_agg_key, AggMapper};
use crate::schema::{ColRef, Column, Schema};

/// Privilege classes a plan can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Select,
    Update,
    Delete,
}

/// One privilege the statement requires on an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitInfo {
    pub privilege: Privilege,
    pub db: String,
    pub table: String,
    pub column: String,
}

/// A finished build: the arena, its root, and the privileges required.
#[derive(Debug)]
pub struct BuiltPlan {
    pub arena: PlanArena,
    pub root: NodeId,
    pub visit_info: Vec<VisitInfo>,
}

/// Builds one statement's logical plan. Consumed by [`PlanBuilder::build`],
/// so a failed build discards its partially constructed arena.
pub struct PlanBuilder<'a> {
    pub(crate) arena: PlanArena,
    catalog: &'a Catalog,
    stats: &'a StatsHandle,
    pub(crate) session: &'a dyn SessionContext,
    hints: HintStack,
    pending_hints: Vec<HintClause>,
    visit_info: Vec<VisitInfo>,
    /// Schemas of enclosing queries, innermost last.
    pub(crate) outer_schemas: Vec<Schema>,
    /// Non-zero while an enclosing clause demands row handles.
    need_handle_depth: u32,
    in_update_stmt: bool,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        catalog: &'a Catalog,
        stats: &'a StatsHandle,
        session: &'a dyn SessionContext,
    ) -> Self {
        Self {
            arena: PlanArena::new(),
            catalog,
            stats,
            session,
            hints: HintStack::default(),
            pending_hints: Vec::new(),
            visit_info: Vec::new(),
            outer_schemas: Vec::new(),
            need_handle_depth: 0,
            in_update_stmt: false,
        }
    }

    /// Attach optimizer hints extracted from the statement text; they apply
    /// to the outermost SELECT.
    pub fn with_hints(mut self, hints: Vec<HintClause>) -> Self {
        self.pending_hints = hints;
        self
    }

    /// Build the plan for one statement.
    pub fn build(mut self, stmt: &Statement) -> Result<BuiltPlan> {
        let root = match stmt {
            Statement::Query(q) => self.build_query(q)?,
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => self.build_update(table, from.as_ref(), assignments, selection.as_ref())?,
            Statement::Delete(del) => self.build_delete(del)?,
            other => return Err(Error::UnsupportedType(format!("statement {other}"))),
        };
        tracing::debug!(nodes = self.arena.len(), "built logical plan");
        Ok(BuiltPlan {
            arena: self.arena,
            root,
            visit_info: self.visit_info,
        })
    }

    pub(crate) fn build_query(&mut self, q: &Query) -> Result<NodeId> {
        if q.with.is_some() {
            return Err(Error::Unsupported("WITH clause".to_string()));
        }
        if let Some(ob) = &q.order_by {
            if ob.interpolate.is_some() {
                return Err(Error::Unsupported("ORDER BY INTERPOLATE".to_string()));
            }
        }
        let lock = lock_kind(&q.locks);
        let order_by = q.order_by.as_ref();
        let limit = q.limit.as_ref();
        let offset = q.offset.as_ref();
        match q.body.as_ref() {
            SetExpr::Select(sel) => self.build_select(sel, order_by, limit, offset, lock),
            SetExpr::SetOperation {
                op: SetOperator::Union,
                ..
            } => {
                if lock.is_some() {
                    return Err(Error::Unsupported("locking clause on a UNION".to_string()));
                }
                let p = self.build_union(q.body.as_ref())?;
                self.apply_order_and_limit(p, order_by, limit, offset)
            }
            SetExpr::Query(inner) => {
                let p = self.build_query(inner)?;
                self.apply_order_and_limit(p, order_by, limit, offset)
            }
            other => Err(Error::UnsupportedType(format!("query body {other}"))),
        }
    }

    fn apply_order_and_limit(
        &mut self,
        p: NodeId,
        order_by: Option<&OrderBy>,
        limit: Option<&SqlExpr>,
        offset: Option<&Offset>,
    ) -> Result<NodeId> {
        let mut p = p;
        if let Some(ob) = order_by {
            let items = plain_order_items(ob)?;
            p = self.build_sort(p, &items, None)?;
        }
        if limit.is_some() || offset.is_some() {
            p = self.build_limit(p, limit, offset)?;
        }
        Ok(p)
    }

    fn build_select(
        &mut self,
        sel: &Select,
        order_by: Option<&OrderBy>,
        limit: Option<&SqlExpr>,
        offset: Option<&Offset>,
        lock: Option<LockKind>,
    ) -> Result<NodeId> {
        // Hints are only visible in the SELECT they were written on.
        let pending = mem::take(&mut self.pending_hints);
        let pushed = self.hints.push(&pending);
        if lock == Some(LockKind::ForUpdate) {
            self.need_handle_depth += 1;
        }
        let result = self.build_select_core(sel, order_by, limit, offset, lock);
        if lock == Some(LockKind::ForUpdate) {
            self.need_handle_depth -= 1;
        }
        if pushed {
            self.hints.pop();
        }
        result
    }

    fn build_select_core(
        &mut self,
        sel: &Select,
        order_by: Option<&OrderBy>,
        limit: Option<&SqlExpr>,
        offset: Option<&Offset>,
        lock: Option<LockKind>,
    ) -> Result<NodeId> {
        if matches!(sel.distinct, Some(Distinct::On(_))) {
            return Err(Error::Unsupported("DISTINCT ON".to_string()));
        }
        let gby_ast: &[SqlExpr] = match &sel.group_by {
            GroupByExpr::Expressions(items, _) => items,
            GroupByExpr::All(_) => {
                return Err(Error::Unsupported("GROUP BY ALL".to_string()))
            }
        };
        let has_agg = detect_select_agg(sel, order_by, gby_ast);

        let mut p = if sel.from.is_empty() {
            self.build_table_dual()
        } else {
            self.build_table_refs(&sel.from)?
        };
        let mut fields = self.unfold_wildcards(p, &sel.projection)?;

        let mut gby_exprs = Vec::new();
        let mut gby_items_resolved: Vec<SqlExpr> = Vec::new();
        if !gby_ast.is_empty() {
            let (np, exprs, items) = self.resolve_gby_exprs(p, gby_ast, &fields)?;
            p = np;
            gby_exprs = exprs;
            gby_items_resolved = items;
        }
        // Having and order-by must be resolved before the projection is
        // built: an aggregate over an alias has to be rewritten onto the
        // aliased expression first.
        let (having, order_items) = self.resolve_having_order_by(
            p,
            &mut fields,
            sel.having.as_ref(),
            order_by,
            &gby_items_resolved,
        )?;

        if let Some(w) = &sel.selection {
            p = self.build_selection(p, w, None)?;
        }
        if let Some(kind) = lock {
            p = self.build_select_lock(p, kind);
        }

        let mut total_mapper: AggMapper = HashMap::new();
        if has_agg {
            let agg_list = extract_agg_funcs(&fields);
            let (np, index_map) = self.build_aggregation(p, &agg_list, gby_exprs)?;
            p = np;
            for (i, func) in agg_list.iter().enumerate() {
                if let Some(pos) = index_map.get(&i) {
                    total_mapper.insert(canonical_agg_key(func), *pos);
                }
            }
        }

        let (np, old_len) = self.build_projection(p, &fields, &total_mapper)?;
        p = np;
        if let Some(h) = &having {
            p = self.build_selection(p, h, Some(&total_mapper))?;
        }
        if matches!(sel.distinct, Some(Distinct::Distinct)) {
            p = self.build_distinct(p, old_len);
        }
        if !order_items.is_empty() {
            p = self.build_sort(p, &order_items, Some(&total_mapper))?;
        }
        if limit.is_some() || offset.is_some() {
            p = self.build_limit(p, limit, offset)?;
        }
        if old_len != self.arena.schema(p).len() {
            p = self.build_trim_projection(p, old_len);
        }
        Ok(p)
    }

    // -------------------------
    // Select-list resolution
    // -------------------------

    fn unfold_wildcards(&mut self, p: NodeId, items: &[SelectItem]) -> Result<Vec<SelectField>> {
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item {
                SelectItem::Wildcard(_) => {
                    if i > 0 {
                        return Err(Error::InvalidWildCard);
                    }
                    self.expand_wildcard(p, None, None, &mut out);
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let (db, table) = match name.0.as_slice() {
                        [t] => (None, Some(t.value.clone())),
                        [d, t] => (Some(d.value.clone()), Some(t.value.clone())),
                        _ => return Err(Error::InvalidWildCard),
                    };
                    self.expand_wildcard(p, db, table, &mut out);
                }
                SelectItem::UnnamedExpr(e) => out.push(SelectField {
                    expr: e.clone(),
                    as_name: None,
                    auxiliary: false,
                }),
                SelectItem::ExprWithAlias { expr, alias } => out.push(SelectField {
                    expr: expr.clone(),
                    as_name: Some(alias.value.clone()),
                    auxiliary: false,
                }),
            }
        }
        Ok(out)
    }

    fn expand_wildcard(
        &self,
        p: NodeId,
        db: Option<String>,
        table: Option<String>,
        out: &mut Vec<SelectField>,
    ) {
        for col in &self.arena.schema(p).columns {
            // Synthetic handle columns stay hidden from `*`.
            if col.column_id == Some(EXTRA_HANDLE_ID) {
                continue;
            }
            if let Some(d) = &db {
                if !col
                    .db_name
                    .as_deref()
                    .map(|x| x.eq_ignore_ascii_case(d))
                    .unwrap_or(false)
                {
                    continue;
                }
            }
            if let Some(t) = &table {
                if !col
                    .table_name
                    .as_deref()
                    .map(|x| x.eq_ignore_ascii_case(t))
                    .unwrap_or(false)
                {
                    continue;
                }
            }
            let r = ColRef {
                db: col.db_name.clone(),
                table: col.table_name.clone(),
                name: col.name.clone(),
            };
            out.push(SelectField {
                expr: column_name_expr(&r),
                as_name: None,
                auxiliary: false,
            });
        }
    }

    fn resolve_gby_exprs(
        &mut self,
        p: NodeId,
        items: &[SqlExpr],
        fields: &[SelectField],
    ) -> Result<(NodeId, Vec<Expr>, Vec<SqlExpr>)> {
        let schema = self.arena.schema(p).clone();
        let mut p = p;
        let mut exprs = Vec::new();
        let mut resolved_items = Vec::new();
        for item in items {
            let resolved = if let Some(n) = positional_ordinal(item) {
                // A positional ordinal names the N-th select field.
                if n >= 1 && n <= fields.len() {
                    fields[n - 1].expr.clone()
                } else {
                    return Err(Error::UnknownColumn(
                        n.to_string(),
                        "group statement".to_string(),
                    ));
                }
            } else {
                let mut resolver = GbyResolver {
                    in_expr: false,
                    err: None,
                    schema: &schema,
                    fields,
                };
                let resolved = accept(item.clone(), &mut resolver);
                if let Some(err) = resolver.err {
                    return Err(err);
                }
                resolved
            };
            let (expr, np) = self.rewrite_scalar(&resolved, p, None, true)?;
            p = np;
            exprs.push(expr);
            resolved_items.push(resolved);
        }
        Ok((p, exprs, resolved_items))
    }

    fn resolve_having_order_by(
        &mut self,
        p: NodeId,
        fields: &mut Vec<SelectField>,
        having: Option<&SqlExpr>,
        order_by: Option<&OrderBy>,
        gby_items: &[SqlExpr],
    ) -> Result<(Option<SqlExpr>, Vec<(SqlExpr, bool)>)> {
        let schema = self.arena.schema(p).clone();
        let mut resolver =
            HavingOrderByResolver::new(schema, fields, gby_items, &self.outer_schemas);
        let mut having_out = None;
        if let Some(h) = having {
            let resolved = accept(h.clone(), &mut resolver);
            if let Some(err) = resolver.err.take() {
                return Err(err);
            }
            having_out = Some(resolved);
        }
        resolver.order_by = true;
        let mut order_out = Vec::new();
        if let Some(ob) = order_by {
            for item in &ob.exprs {
                if item.nulls_first.is_some() {
                    return Err(Error::Unsupported("NULLS FIRST/LAST ordering".to_string()));
                }
                resolver.in_expr = false;
                let desc = item.asc == Some(false);
                let resolved = if let Some(n) = positional_ordinal(&item.expr) {
                    let visible = resolver.fields.iter().filter(|f| !f.auxiliary).count();
                    if n >= 1 && n <= visible {
                        field_marker(n - 1)
                    } else {
                        return Err(Error::UnknownColumn(
                            n.to_string(),
                            "order clause".to_string(),
                        ));
                    }
                } else {
                    let r = accept(item.expr.clone(), &mut resolver);
                    if let Some(err) = resolver.err.take() {
                        return Err(err);
                    }
                    r
                };
                order_out.push((resolved, desc));
            }
        }
        Ok((having_out, order_out))
    }

    // -------------------------
    // Table sources and joins
    // -------------------------

    fn build_table_refs(&mut self, from: &[TableWithJoins]) -> Result<NodeId> {
        let mut iter = from.iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::Unsupported("empty FROM clause".to_string()))?;
        let mut p = self.build_table_with_joins(first)?;
        for twj in iter {
            // Comma-separated sources are Cartesian inner joins.
            let right = self.build_table_with_joins(twj)?;
            p = self.build_cartesian_join(p, right)?;
        }
        Ok(p)
    }

    fn build_table_with_joins(&mut self, twj: &TableWithJoins) -> Result<NodeId> {
        let mut p = self.build_table_factor(&twj.relation)?;
        for join in &twj.joins {
            p = self.build_join(p, join)?;
        }
        Ok(p)
    }

    fn build_table_factor(&mut self, tf: &TableFactor) -> Result<NodeId> {
        match tf {
            TableFactor::Table { name, alias, .. } => {
                let p = self.build_data_source(name)?;
                if let Some(a) = alias {
                    self.apply_table_alias(p, &a.name.value);
                }
                Ok(p)
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let p = self.build_query(subquery)?;
                if let Some(a) = alias {
                    self.apply_table_alias(p, &a.name.value);
                }
                Ok(p)
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                let p = self.build_table_with_joins(table_with_joins)?;
                if let Some(a) = alias {
                    self.apply_table_alias(p, &a.name.value);
                }
                Ok(p)
            }
            other => Err(Error::UnsupportedType(format!("table source {other}"))),
        }
    }

    fn apply_table_alias(&mut self, p: NodeId, alias: &str) {
        if let NodeKind::DataSource { table_as_name, .. } = &mut self.arena.node_mut(p).kind {
            *table_as_name = Some(alias.to_string());
        }
        for col in &mut self.arena.node_mut(p).schema.columns {
            col.table_name = Some(alias.to_string());
            col.db_name = None;
        }
    }

    fn split_table_name(&self, name: &ObjectName) -> Result<(String, String)> {
        match name.0.as_slice() {
            [t] => {
                let db = self.session.current_db();
                if db.is_empty() {
                    return Err(Error::InvalidConfig("no database selected".to_string()));
                }
                Ok((db.to_string(), t.value.clone()))
            }
            [d, t] => Ok((d.value.clone(), t.value.clone())),
            _ => Err(Error::UnsupportedType(format!("table name {name}"))),
        }
    }

    fn build_data_source(&mut self, name: &ObjectName) -> Result<NodeId> {
        let (db, table_name) = self.split_table_name(name)?;
        let tbl = self.catalog.table_by_name(&db, &table_name)?.clone();
        let stats = match self.stats.table_stats(tbl.table_id()) {
            Some(s) => s,
            None => {
                tracing::debug!(table = %table_name, "no collected statistics, using pseudo stats");
                TableStats::pseudo()
            }
        };
        let need_handle = self.need_handle_depth > 0;
        let ds = self.arena.add(
            NodeKind::DataSource {
                db: db.clone(),
                table: tbl.name.clone(),
                table_id: tbl.table_id(),
                table_as_name: None,
                stats,
                need_handle,
            },
            Schema::empty(),
        );
        self.append_visit(Privilege::Select, &db, &tbl.name);

        let columns: Vec<ColumnDef> = if self.in_update_stmt {
            tbl.writable_columns().cloned().collect()
        } else {
            tbl.columns().cloned().collect()
        };
        let pk_is_handle = tbl.pk_is_handle();
        let mut schema = Schema::empty();
        let mut pk_col: Option<Column> = None;
        for (i, col) in columns.iter().enumerate() {
            let c = Column {
                owner: ds,
                db_name: Some(db.clone()),
                table_name: Some(tbl.name.clone()),
                name: col.name.clone(),
                position: i,
                data_type: col.data_type.clone(),
                from_agg_or_subquery: false,
                column_id: Some(col.column_id()),
            };
            if pk_is_handle && col.primary_key {
                pk_col = Some(c.clone());
            }
            schema.append(c);
        }

        // A scan in a read-write transaction may have to merge buffered
        // writes, which needs a row handle per row.
        let need_union_scan = !self.session.is_read_only_txn();
        if !need_handle && !need_union_scan {
            self.arena.set_schema(ds, schema);
            return Ok(ds);
        }
        match pk_col {
            Some(pk) => {
                schema.handle_map.insert(tbl.table_id(), vec![pk]);
            }
            None => {
                let rowid = Column {
                    owner: ds,
                    db_name: Some(db.clone()),
                    table_name: Some(tbl.name.clone()),
                    name: "_rowid".to_string(),
                    position: schema.len(),
                    data_type: DataType::Int64,
                    from_agg_or_subquery: false,
                    column_id: Some(EXTRA_HANDLE_ID),
                };
                schema.handle_map.insert(tbl.table_id(), vec![rowid.clone()]);
                schema.append(rowid);
            }
        }
        self.arena.set_schema(ds, schema);
        Ok(ds)
    }

    fn extract_table_alias(&self, p: NodeId) -> Option<String> {
        match &self.arena.node(p).kind {
            NodeKind::DataSource {
                table_as_name,
                table,
                ..
            } => table_as_name.clone().or_else(|| Some(table.clone())),
            _ => self
                .arena
                .schema(p)
                .columns
                .first()
                .and_then(|c| c.table_name.clone()),
        }
    }

    /// Create a join node over two built children: merged schema, inherited
    /// redundant schemas, and hint preferences.
    fn init_join(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        let left_alias = self.extract_table_alias(left);
        let right_alias = self.extract_table_alias(right);
        let merged = self
            .arena
            .schema(left)
            .clone()
            .merge(self.arena.schema(right).clone());
        let join_id = self
            .arena
            .add(NodeKind::Join(JoinNode::new(JoinType::Inner)), merged);
        self.arena.add_child(join_id, left);
        self.arena.add_child(join_id, right);

        // Keep nested USING coalesced columns reachable: for
        // select t2.a from (t1 join t2 using (a)) join t3 using (a)
        // the top join can find t2.a in its inherited redundant schema.
        let mut redundant = Schema::empty();
        if let Some(j) = self.arena.join(left) {
            if !j.redundant_schema.is_empty() {
                redundant = redundant.merge(j.redundant_schema.clone());
            }
        }
        if let Some(j) = self.arena.join(right) {
            if !j.redundant_schema.is_empty() {
                redundant = redundant.merge(j.redundant_schema.clone());
            }
        }

        let mut prefer_merge = false;
        let mut prefer_inlj = 0u8;
        if let Some(frame) = self.hints.current() {
            prefer_merge = frame.prefer_merge_join(left_alias.as_deref(), right_alias.as_deref());
            if frame.prefer_index_nested_loop_join(left_alias.as_deref()) {
                prefer_inlj |= PREFER_LEFT_AS_OUTER;
            }
            if frame.prefer_index_nested_loop_join(right_alias.as_deref()) {
                prefer_inlj |= PREFER_RIGHT_AS_OUTER;
            }
            if prefer_merge && prefer_inlj > 0 {
                return Err(Error::ConflictingHints);
            }
        }
        let j = self.arena.join_mut(join_id).expect("join node");
        j.redundant_schema = redundant;
        j.prefer_merge_join = prefer_merge;
        j.prefer_inlj = prefer_inlj;
        Ok(join_id)
    }

    fn build_cartesian_join(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        let join_id = self.init_join(left, right)?;
        let j = self.arena.join_mut(join_id).expect("join node");
        j.join_type = JoinType::Inner;
        j.cartesian = true;
        Ok(join_id)
    }

    fn build_join(&mut self, left: NodeId, join: &SqlJoin) -> Result<NodeId> {
        let (constraint, kind) = match &join.join_operator {
            JoinOperator::Inner(c) => (Some(c), AstJoinKind::Inner),
            JoinOperator::LeftOuter(c) => (Some(c), AstJoinKind::Left),
            JoinOperator::RightOuter(c) => (Some(c), AstJoinKind::Right),
            JoinOperator::CrossJoin => (None, AstJoinKind::Inner),
            other => {
                return Err(Error::UnsupportedType(format!("join operator {other:?}")))
            }
        };
        let right = self.build_table_factor(&join.relation)?;
        let join_id = self.init_join(left, right)?;

        match constraint {
            Some(JoinConstraint::Natural) => {
                self.coalesce_common_columns(join_id, left, right, kind == AstJoinKind::Right, None)?;
            }
            Some(JoinConstraint::Using(cols)) => {
                let mut filter: Vec<String> = Vec::new();
                for ident in cols {
                    let lowered = ident.value.to_ascii_lowercase();
                    if !filter.contains(&lowered) {
                        filter.push(lowered);
                    }
                }
                self.coalesce_common_columns(
                    join_id,
                    left,
                    right,
                    kind == AstJoinKind::Right,
                    Some(&filter),
                )?;
            }
            Some(JoinConstraint::On(expr)) => {
                let (cond, np) = self.rewrite(expr, join_id, None, false)?;
                if np != join_id {
                    return Err(Error::Unsupported("subquery in ON condition".to_string()));
                }
                let cond = cond
                    .ok_or_else(|| Error::Unsupported("ON condition shape".to_string()))?;
                if cond.is_correlated() {
                    return Err(Error::CorrelatedOnCondition);
                }
                self.attach_on_conditions(join_id, cond.split_cnf());
            }
            Some(JoinConstraint::None) | None => {
                if kind == AstJoinKind::Inner {
                    self.arena.join_mut(join_id).expect("join node").cartesian = true;
                }
            }
        }

        let left_len = self.arena.schema(left).len();
        let right_len = self.arena.schema(right).len();
        let j = self.arena.join_mut(join_id).expect("join node");
        match kind {
            AstJoinKind::Left => {
                j.join_type = JoinType::LeftOuter;
                j.default_values = vec![LiteralValue::Null; right_len];
            }
            AstJoinKind::Right => {
                j.join_type = JoinType::RightOuter;
                j.default_values = vec![LiteralValue::Null; left_len];
            }
            AstJoinKind::Inner => j.join_type = JoinType::Inner,
        }
        Ok(join_id)
    }

    /// Classify conditions onto a join: bare column equalities spanning the
    /// two sides become equal-conditions, one-sided conditions become that
    /// side's pushdown list, the rest go to other-conditions.
    fn attach_on_conditions(&mut self, join: NodeId, conditions: Vec<Expr>) {
        let children = self.arena.node(join).children.clone();
        let left = self.arena.schema(children[0]).clone();
        let right = self.arena.schema(children[1]).clone();
        let (eq, l, r, o) = extract_on_condition(conditions, &left, &right);
        let j = self.arena.join_mut(join).expect("join node");
        j.equal_conditions.extend(eq);
        j.left_conditions.extend(l);
        j.right_conditions.extend(r);
        j.other_conditions.extend(o);
    }

    /// Redundant-column elimination and column ordering for USING/NATURAL.
    ///
    /// Standard SQL display order: coalesced common columns first (in
    /// first-table order), then columns unique to the first table, then
    /// columns unique to the second. On a RIGHT join the roles swap so the
    /// retained copy comes from the right side.
    fn coalesce_common_columns(
        &mut self,
        join_id: NodeId,
        left: NodeId,
        right: NodeId,
        right_join: bool,
        filter: Option<&[String]>,
    ) -> Result<()> {
        let lsc = self.arena.schema(left).clone();
        let rsc = self.arena.schema(right).clone();
        let (mut l_cols, mut r_cols) = if right_join {
            (rsc.columns.clone(), lsc.columns.clone())
        } else {
            (lsc.columns.clone(), rsc.columns.clone())
        };
        let mut filter: Option<Vec<(String, bool)>> = filter
            .map(|names| names.iter().map(|n| (n.clone(), false)).collect());

        // Rotate each matched pair to the current common-prefix slot,
        // preserving the relative order of both tails.
        let mut common_len = 0;
        for i in 0..l_cols.len() {
            let l_name = l_cols[i].name.to_ascii_lowercase();
            for j in common_len..r_cols.len() {
                if !r_cols[j].name.eq_ignore_ascii_case(&l_name) {
                    continue;
                }
                if let Some(f) = &mut filter {
                    match f.iter_mut().find(|(n, _)| *n == l_name) {
                        None => break,
                        Some((_, seen)) => {
                            if *seen {
                                break;
                            }
                            *seen = true;
                        }
                    }
                }
                let c = l_cols.remove(i);
                l_cols.insert(common_len, c);
                let c = r_cols.remove(j);
                r_cols.insert(common_len, c);
                common_len += 1;
                break;
            }
        }

        if let Some(f) = &filter {
            for (name, seen) in f {
                if !*seen {
                    return Err(Error::UnknownColumn(
                        name.clone(),
                        "from clause".to_string(),
                    ));
                }
            }
        }

        let mut schema_cols = l_cols.clone();
        schema_cols.extend(r_cols[common_len..].iter().cloned());
        let handle_map = self.arena.schema(join_id).handle_map.clone();
        let mut out_schema = Schema::from_columns(schema_cols);
        out_schema.handle_map = handle_map;

        // The equality is always (physical-left, physical-right), whatever
        // the display orientation.
        let (phys_left, phys_right): (&[Column], &[Column]) = if right_join {
            (&r_cols, &l_cols)
        } else {
            (&l_cols, &r_cols)
        };
        let mut conds = Vec::with_capacity(common_len);
        for k in 0..common_len {
            conds.push((phys_left[k].clone(), phys_right[k].clone()));
        }

        let discarded = Schema::from_columns(r_cols[..common_len].to_vec());
        let j = self.arena.join_mut(join_id).expect("join node");
        j.redundant_schema = mem::take(&mut j.redundant_schema).merge(discarded);
        conds.extend(mem::take(&mut j.equal_conditions));
        j.equal_conditions = conds;
        self.arena.set_schema(join_id, out_schema);
        Ok(())
    }

    // -------------------------
    // Row-operator constructors
    // -------------------------

    /// Split a WHERE/HAVING expression into conjuncts, rewrite each, and
    /// wrap the child in a Selection. Conjuncts wholly absorbed by the
    /// rewriter (subquery predicates) vanish; if all do, the child is
    /// returned unchanged.
    pub(crate) fn build_selection(
        &mut self,
        p: NodeId,
        where_expr: &SqlExpr,
        mapper: Option<&AggMapper>,
    ) -> Result<NodeId> {
        let mut conds = Vec::new();
        split_where(where_expr, &mut conds);
        let mut p = p;
        let mut exprs = Vec::new();
        for cond in conds {
            let (expr, np) = self.rewrite(cond, p, mapper, false)?;
            p = np;
            if let Some(e) = expr {
                exprs.extend(e.split_cnf());
            }
        }
        if exprs.is_empty() {
            return Ok(p);
        }
        let schema = self.arena.schema(p).clone();
        let sel = self.arena.add(NodeKind::Selection { conditions: exprs }, schema);
        self.arena.add_child(sel, p);
        Ok(sel)
    }

    fn build_select_lock(&mut self, p: NodeId, lock: LockKind) -> NodeId {
        let schema = self.arena.schema(p).clone();
        let node = self.arena.add(NodeKind::SelectLock { lock }, schema);
        self.arena.add_child(node, p);
        node
    }

    /// Build the aggregation for the collected aggregate calls, eliminating
    /// structurally equal duplicates, and forward every input column through
    /// a `FIRST_ROW` so parents can still reach it. Returns the node and the
    /// map from collected-call index to output ordinal.
    fn build_aggregation(
        &mut self,
        p: NodeId,
        agg_list: &[Function],
        gby_items: Vec<Expr>,
    ) -> Result<(NodeId, HashMap<usize, usize>)> {
        let agg = self.arena.add(
            NodeKind::Aggregation {
                agg_funcs: Vec::new(),
                group_items: Vec::new(),
            },
            Schema::empty(),
        );
        let agg_str_id = self.arena.str_id(agg);
        let mut p = p;
        let mut agg_funcs: Vec<AggFunc> = Vec::new();
        let mut schema_cols: Vec<Column> = Vec::new();
        let mut index_map = HashMap::new();
        for (i, func) in agg_list.iter().enumerate() {
            let (kind, distinct, args_ast) = parse_agg_call(func)?;
            let mut args = Vec::new();
            for arg in &args_ast {
                let (expr, np) = self.rewrite_scalar(arg, p, None, true)?;
                p = np;
                args.push(expr);
            }
            let new_func = AggFunc {
                kind,
                args,
                distinct,
            };
            if let Some(j) = agg_funcs.iter().position(|f| *f == new_func) {
                index_map.insert(i, j);
                continue;
            }
            let position = agg_funcs.len();
            index_map.insert(i, position);
            schema_cols.push(Column {
                owner: agg,
                db_name: None,
                table_name: None,
                name: format!("{agg_str_id}_col_{position}"),
                position,
                data_type: new_func.ret_type(),
                from_agg_or_subquery: true,
                column_id: None,
            });
            agg_funcs.push(new_func);
        }
        for col in self.arena.schema(p).columns.clone() {
            agg_funcs.push(AggFunc {
                kind: AggKind::FirstRow,
                args: vec![Expr::Column(col.clone())],
                distinct: false,
            });
            let mut fwd = col;
            fwd.owner = agg;
            fwd.position = schema_cols.len();
            schema_cols.push(fwd);
        }
        self.arena.add_child(agg, p);
        if let NodeKind::Aggregation {
            agg_funcs: funcs,
            group_items,
        } = &mut self.arena.node_mut(agg).kind
        {
            *funcs = agg_funcs;
            *group_items = gby_items;
        }
        self.arena.set_schema(agg, Schema::from_columns(schema_cols));
        Ok((agg, index_map))
    }

    /// Build the projection for the select list. Returns the node and the
    /// count of non-auxiliary fields (the user-visible arity).
    fn build_projection(
        &mut self,
        p: NodeId,
        fields: &[SelectField],
        mapper: &AggMapper,
    ) -> Result<(NodeId, usize)> {
        let proj = self
            .arena
            .add(NodeKind::Projection { exprs: Vec::new() }, Schema::empty());
        let mut p = p;
        let mut exprs = Vec::new();
        let mut cols = Vec::new();
        let mut old_len = 0;
        for field in fields {
            let (expr, np) = self.rewrite_scalar(&field.expr, p, Some(mapper), true)?;
            p = np;
            let col = self.build_projection_field(proj, cols.len(), field, &expr);
            exprs.push(expr);
            cols.push(col);
            if !field.auxiliary {
                old_len += 1;
            }
        }
        if let NodeKind::Projection { exprs: es } = &mut self.arena.node_mut(proj).kind {
            *es = exprs;
        }
        self.arena.add_child(proj, p);
        self.arena.set_schema(proj, Schema::from_columns(cols));
        Ok((proj, old_len))
    }

    fn build_projection_field(
        &self,
        proj: NodeId,
        position: usize,
        field: &SelectField,
        expr: &Expr,
    ) -> Column {
        let mut table_name = None;
        let name = if let Some(as_name) = &field.as_name {
            as_name.clone()
        } else if let Expr::Column(c) = expr {
            if !c.from_agg_or_subquery {
                if let Some(r) = ColRef::from_expr(&field.expr) {
                    table_name = r.table;
                    r.name
                } else {
                    table_name = c.table_name.clone();
                    c.name.clone()
                }
            } else {
                field_name_from_expression(field)
            }
        } else {
            field_name_from_expression(field)
        };
        Column {
            owner: proj,
            db_name: None,
            table_name,
            name,
            position,
            data_type: expr.data_type(),
            from_agg_or_subquery: false,
            column_id: None,
        }
    }

    /// Distinct is an aggregation grouped on the visible prefix with a
    /// `FIRST_ROW` per column.
    fn build_distinct(&mut self, child: NodeId, length: usize) -> NodeId {
        let child_schema = self.arena.schema(child).clone();
        let agg = self.arena.add(
            NodeKind::Aggregation {
                agg_funcs: Vec::new(),
                group_items: Vec::new(),
            },
            Schema::empty(),
        );
        let group_items: Vec<Expr> = child_schema.columns[..length]
            .iter()
            .cloned()
            .map(Expr::Column)
            .collect();
        let agg_funcs: Vec<AggFunc> = child_schema
            .columns
            .iter()
            .cloned()
            .map(|c| AggFunc {
                kind: AggKind::FirstRow,
                args: vec![Expr::Column(c)],
                distinct: false,
            })
            .collect();
        let mut cols = child_schema.columns;
        for (i, c) in cols.iter_mut().enumerate() {
            c.owner = agg;
            c.position = i;
        }
        if let NodeKind::Aggregation {
            agg_funcs: funcs,
            group_items: items,
        } = &mut self.arena.node_mut(agg).kind
        {
            *funcs = agg_funcs;
            *items = group_items;
        }
        self.arena.add_child(agg, child);
        self.arena.set_schema(agg, Schema::from_columns(cols));
        agg
    }

    fn build_union(&mut self, body: &SetExpr) -> Result<NodeId> {
        let mut branches = Vec::new();
        let mut distinct = false;
        flatten_union(body, &mut branches, &mut distinct)?;
        let mut children = Vec::new();
        for branch in branches {
            let id = match branch {
                SetExpr::Select(sel) => self.build_select(sel, None, None, None, None)?,
                SetExpr::Query(q) => self.build_query(q)?,
                other => {
                    return Err(Error::UnsupportedType(format!("query body {other}")))
                }
            };
            children.push(id);
        }
        let u = self.arena.add(NodeKind::Union, Schema::empty());
        let first_len = self.arena.schema(children[0]).len();
        let mut union_schema = self.arena.schema(children[0]).clone();
        for child in children {
            if self.arena.schema(child).len() != first_len {
                return Err(Error::UnionArityMismatch);
            }
            // Branches that are not projections get a forwarding one, so
            // every branch owns fresh output columns.
            let wrapped = if matches!(self.arena.node(child).kind, NodeKind::Projection { .. })
            {
                child
            } else {
                let cols = self.arena.schema(child).columns.clone();
                let proj = self.arena.add(
                    NodeKind::Projection {
                        exprs: cols.iter().cloned().map(Expr::Column).collect(),
                    },
                    Schema::empty(),
                );
                self.arena.add_child(proj, child);
                let mut out = cols;
                for (i, c) in out.iter_mut().enumerate() {
                    c.owner = proj;
                    c.position = i;
                }
                self.arena.set_schema(proj, Schema::from_columns(out));
                proj
            };
            for (i, col) in self.arena.schema(wrapped).columns.iter().enumerate() {
                union_schema.columns[i].data_type =
                    merge_field_type(&union_schema.columns[i].data_type, &col.data_type);
            }
            self.arena.add_child(u, wrapped);
        }
        for (i, col) in union_schema.columns.iter_mut().enumerate() {
            col.owner = u;
            col.db_name = None;
            col.position = i;
        }
        union_schema.handle_map.clear();
        let len = union_schema.len();
        self.arena.set_schema(u, union_schema);
        let mut p = u;
        if distinct {
            p = self.build_distinct(u, len);
        }
        Ok(p)
    }

    fn build_sort(
        &mut self,
        p: NodeId,
        items: &[(SqlExpr, bool)],
        mapper: Option<&AggMapper>,
    ) -> Result<NodeId> {
        let mut p = p;
        let mut by_items = Vec::new();
        for (ast, desc) in items {
            let expr = if let Some(n) = positional_ordinal(ast) {
                let schema = self.arena.schema(p);
                if n >= 1 && n <= schema.len() {
                    Expr::Column(schema.column(n - 1).clone())
                } else {
                    return Err(Error::UnknownColumn(
                        n.to_string(),
                        "order clause".to_string(),
                    ));
                }
            } else {
                let (e, np) = self.rewrite_scalar(ast, p, mapper, true)?;
                p = np;
                e
            };
            by_items.push(ByItem { expr, desc: *desc });
        }
        let schema = self.arena.schema(p).clone();
        let sort = self.arena.add(NodeKind::Sort { by_items }, schema);
        self.arena.add_child(sort, p);
        Ok(sort)
    }

    fn build_limit(
        &mut self,
        p: NodeId,
        limit: Option<&SqlExpr>,
        offset: Option<&Offset>,
    ) -> Result<NodeId> {
        let offset_val = match offset {
            Some(o) => self.get_uint_arg(&o.value, "LIMIT")?,
            None => 0,
        };
        let count = match limit {
            Some(e) => self.get_uint_arg(e, "LIMIT")?,
            None => u64::MAX,
        };
        let schema = self.arena.schema(p).clone();
        let li = self.arena.add(
            NodeKind::Limit {
                offset: offset_val,
                count,
            },
            schema,
        );
        self.arena.add_child(li, p);
        Ok(li)
    }

    /// LIMIT/OFFSET values: unsigned literals, or parameters bound to a
    /// non-negative integer or numeric string (prepared statements).
    fn get_uint_arg(&self, e: &SqlExpr, clause: &str) -> Result<u64> {
        let wrong = || Error::WrongArguments(clause.to_string());
        match e {
            SqlExpr::Value(Value::Number(n, _)) => n.parse::<u64>().map_err(|_| wrong()),
            SqlExpr::Value(Value::Placeholder(name)) => {
                let key = name.trim_start_matches([':', '$', '?']);
                match self.session.stmt_ctx().params.get(key) {
                    Some(LiteralValue::Int64(v)) if *v >= 0 => Ok(*v as u64),
                    Some(LiteralValue::Utf8(s)) => s.trim().parse::<u64>().map_err(|_| wrong()),
                    _ => Err(wrong()),
                }
            }
            _ => Err(wrong()),
        }
    }

    fn build_trim_projection(&mut self, p: NodeId, old_len: usize) -> NodeId {
        let cols: Vec<Column> = self.arena.schema(p).columns[..old_len].to_vec();
        let proj = self.arena.add(
            NodeKind::Projection {
                exprs: cols.iter().cloned().map(Expr::Column).collect(),
            },
            Schema::empty(),
        );
        self.arena.add_child(proj, p);
        let mut out = cols;
        for (i, c) in out.iter_mut().enumerate() {
            c.owner = proj;
            c.position = i;
        }
        self.arena.set_schema(proj, Schema::from_columns(out));
        proj
    }

    pub(crate) fn build_table_dual(&mut self) -> NodeId {
        self.arena
            .add(NodeKind::TableDual { row_count: 1 }, Schema::empty())
    }

    /// Wrap a subquery plan for EXISTS, dropping wrappers that cannot change
    /// row existence. A groupless aggregate always produces one row, so the
    /// whole subtree collapses to a dual table.
    pub(crate) fn build_exists(&mut self, p: NodeId) -> NodeId {
        let mut p = p;
        loop {
            match &self.arena.node(p).kind {
                NodeKind::Projection { .. } | NodeKind::Sort { .. } => {
                    let child = self.arena.node(p).children[0];
                    self.arena.remove_child(p, child);
                    p = child;
                }
                NodeKind::Aggregation { group_items, .. } if group_items.is_empty() => {
                    p = self.build_table_dual();
                    break;
                }
                _ => break,
            }
        }
        let exists = self.arena.add(NodeKind::Exists, Schema::empty());
        let col = Column {
            owner: exists,
            db_name: None,
            table_name: None,
            name: "exists_col".to_string(),
            position: 0,
            data_type: DataType::Boolean,
            from_agg_or_subquery: false,
            column_id: None,
        };
        self.arena.set_schema(exists, Schema::from_columns(vec![col]));
        self.arena.add_child(exists, p);
        exists
    }

    pub(crate) fn build_max_one_row(&mut self, p: NodeId) -> NodeId {
        let schema = self.arena.schema(p).clone();
        let node = self.arena.add(NodeKind::MaxOneRow, schema);
        self.arena.add_child(node, p);
        node
    }

    /// Apply join: evaluates the inner plan once per outer row. Inner
    /// columns are marked as subquery-derived in the output schema.
    pub(crate) fn build_apply_with_join_type(
        &mut self,
        outer: NodeId,
        inner: NodeId,
        tp: JoinType,
    ) -> NodeId {
        let outer_len = self.arena.schema(outer).len();
        let mut join = JoinNode::new(tp);
        if tp == JoinType::LeftOuter {
            join.default_values = vec![LiteralValue::Null; self.arena.schema(inner).len()];
        }
        let mut schema = self
            .arena
            .schema(outer)
            .clone()
            .merge(self.arena.schema(inner).clone());
        let ap = self.arena.add(NodeKind::Apply(join), Schema::empty());
        self.arena.add_child(ap, outer);
        self.arena.add_child(ap, inner);
        for col in schema.columns.iter_mut().skip(outer_len) {
            col.from_agg_or_subquery = true;
        }
        self.arena.set_schema(ap, schema);
        ap
    }

    /// Semi join between an outer plan and a subquery plan. `as_apply`
    /// selects the correlated form. With `as_scalar` the match result is
    /// surfaced as an auxiliary boolean column instead of filtering rows.
    pub(crate) fn build_semi_plan(
        &mut self,
        outer: NodeId,
        inner: NodeId,
        conditions: Vec<Expr>,
        as_scalar: bool,
        not: bool,
        as_apply: bool,
    ) -> NodeId {
        let outer_schema = self.arena.schema(outer).clone();
        let conditions: Vec<Expr> = conditions
            .into_iter()
            .map(|c| c.decorrelate(&outer_schema))
            .collect();
        let join_type = if as_scalar {
            JoinType::LeftOuterSemi
        } else if not {
            JoinType::AntiSemi
        } else {
            JoinType::Semi
        };
        let kind = if as_apply {
            NodeKind::Apply(JoinNode::new(join_type))
        } else {
            NodeKind::Join(JoinNode::new(join_type))
        };
        let node = self.arena.add(kind, Schema::empty());
        self.arena.add_child(node, outer);
        self.arena.add_child(node, inner);
        self.attach_on_conditions(node, conditions);
        let mut schema = outer_schema;
        if as_scalar {
            let name = format!("{}_aux_0", self.arena.str_id(node));
            schema.append(Column {
                owner: node,
                db_name: None,
                table_name: None,
                name,
                position: schema.len(),
                data_type: DataType::Boolean,
                from_agg_or_subquery: true,
                column_id: None,
            });
        }
        self.arena.set_schema(node, schema);
        node
    }

    // -------------------------
    // UPDATE / DELETE
    // -------------------------

    fn build_update(
        &mut self,
        table: &TableWithJoins,
        from: Option<&TableWithJoins>,
        assignments: &[SqlAssignment],
        selection: Option<&SqlExpr>,
    ) -> Result<NodeId> {
        self.in_update_stmt = true;
        self.need_handle_depth += 1;
        let mut refs = vec![table.clone()];
        if let Some(f) = from {
            refs.push(f.clone());
        }
        let mut p = self.build_table_refs(&refs)?;
        let table_list = extract_table_names(&refs);
        for (db, tbl) in &table_list {
            let db = self.default_db(db);
            self.append_visit(Privilege::Update, &db, tbl);
        }
        if let Some(w) = selection {
            p = self.build_selection(p, w, None)?;
        }
        let (ordered_list, np) = self.build_update_lists(&table_list, assignments, p)?;
        p = np;
        let schema = self.arena.schema(p).clone();
        let updt = self.arena.add(
            NodeKind::Update {
                assignments: ordered_list,
            },
            schema,
        );
        self.arena.add_child(updt, p);
        Ok(updt)
    }

    fn build_update_lists(
        &mut self,
        table_list: &[(String, String)],
        list: &[SqlAssignment],
        p: NodeId,
    ) -> Result<(Vec<Assignment>, NodeId)> {
        let mut modified: HashSet<(String, String, String)> = HashSet::new();
        for assign in list {
            let r = assignment_target_ref(assign)?;
            let col = self
                .arena
                .schema(p)
                .find_column(&r)?
                .ok_or_else(|| Error::UnknownColumn(r.display(), "field list".to_string()))?;
            modified.insert(column_full_name(col));
        }
        // Assigning a generated column is rejected outright.
        for (db, tbl_name) in table_list {
            let db = self.default_db(db);
            let tbl = self.catalog.table_by_name(&db, tbl_name)?.clone();
            for col in &tbl.columns {
                if !col.is_generated() {
                    continue;
                }
                let key = (
                    db.to_ascii_lowercase(),
                    tbl.name.to_ascii_lowercase(),
                    col.name.to_ascii_lowercase(),
                );
                if modified.contains(&key) {
                    return Err(Error::BadGeneratedColumn(
                        col.name.clone(),
                        tbl.name.clone(),
                    ));
                }
            }
        }
        let mut p = p;
        let mut out = Vec::new();
        for assign in list {
            let r = assignment_target_ref(assign)?;
            let col = self
                .arena
                .schema(p)
                .find_column(&r)?
                .ok_or_else(|| Error::UnknownColumn(r.display(), "field list".to_string()))?
                .clone();
            let (expr, np) = self.rewrite_scalar(&assign.value, p, None, false)?;
            p = np;
            out.push(Assignment { column: col, expr });
        }
        Ok((out, p))
    }

    fn build_delete(&mut self, del: &Delete) -> Result<NodeId> {
        self.need_handle_depth += 1;
        let from: &[TableWithJoins] = match &del.from {
            FromTable::WithFromKeyword(v) | FromTable::WithoutKeyword(v) => v,
        };
        let mut p = self.build_table_refs(from)?;
        if let Some(w) = &del.selection {
            p = self.build_selection(p, w, None)?;
        }
        if !del.order_by.is_empty() {
            let mut items = Vec::new();
            for item in &del.order_by {
                if item.nulls_first.is_some() {
                    return Err(Error::Unsupported("NULLS FIRST/LAST ordering".to_string()));
                }
                items.push((item.expr.clone(), item.asc == Some(false)));
            }
            p = self.build_sort(p, &items, None)?;
        }
        if del.limit.is_some() {
            p = self.build_limit(p, del.limit.as_ref(), None)?;
        }
        let tables: Vec<String> = del.tables.iter().map(|t| t.to_string()).collect();
        let is_multi_table = !tables.is_empty();
        let node = self.arena.add(
            NodeKind::Delete {
                tables,
                is_multi_table,
            },
            Schema::empty(),
        );
        self.arena.add_child(node, p);

        if !del.tables.is_empty() {
            // Multi-table form: only the listed targets are deleted from.
            for t in &del.tables {
                match t.0.as_slice() {
                    [name] => {
                        let db = self.session.current_db().to_string();
                        self.append_visit(Privilege::Delete, &db, &name.value.clone());
                    }
                    [d, name] => {
                        let (d, name) = (d.value.clone(), name.value.clone());
                        self.append_visit(Privilege::Delete, &d, &name);
                    }
                    _ => {}
                }
            }
        } else {
            for (db, tbl) in extract_table_names(from) {
                let db = self.default_db(&db);
                self.append_visit(Privilege::Delete, &db, &tbl);
            }
        }
        Ok(node)
    }

    fn default_db(&self, db: &str) -> String {
        if db.is_empty() {
            self.session.current_db().to_string()
        } else {
            db.to_string()
        }
    }

    fn append_visit(&mut self, privilege: Privilege, db: &str, table: &str) {
        self.visit_info.push(VisitInfo {
            privilege,
            db: db.to_string(),
            table: table.to_string(),
            column: String::new(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AstJoinKind {
    Inner,
    Left,
    Right,
}

fn lock_kind(locks: &[LockClause]) -> Option<LockKind> {
    let mut kind = None;
    for lc in locks {
        let k = match lc.lock_type {
            LockType::Update => LockKind::ForUpdate,
            LockType::Share => LockKind::Share,
        };
        kind = Some(match (kind, k) {
            (Some(LockKind::ForUpdate), _) | (_, LockKind::ForUpdate) => LockKind::ForUpdate,
            _ => LockKind::Share,
        });
    }
    kind
}

fn plain_order_items(ob: &OrderBy) -> Result<Vec<(SqlExpr, bool)>> {
    let mut items = Vec::new();
    for item in &ob.exprs {
        if item.nulls_first.is_some() {
            return Err(Error::Unsupported("NULLS FIRST/LAST ordering".to_string()));
        }
        items.push((item.expr.clone(), item.asc == Some(false)));
    }
    Ok(items)
}

fn detect_select_agg(sel: &Select, order_by: Option<&OrderBy>, gby_ast: &[SqlExpr]) -> bool {
    if !gby_ast.is_empty() {
        return true;
    }
    for item in &sel.projection {
        match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                if has_agg_func(e) {
                    return true;
                }
            }
            _ => {}
        }
    }
    if let Some(h) = &sel.having {
        if has_agg_func(h) {
            return true;
        }
    }
    if let Some(ob) = order_by {
        if ob.exprs.iter().any(|i| has_agg_func(&i.expr)) {
            return true;
        }
    }
    false
}

fn positional_ordinal(e: &SqlExpr) -> Option<usize> {
    if let SqlExpr::Value(Value::Number(n, _)) = e {
        return n.parse::<usize>().ok();
    }
    None
}

/// Flatten a WHERE tree at its top-level ANDs (through parentheses).
fn split_where<'a>(e: &'a SqlExpr, out: &mut Vec<&'a SqlExpr>) {
    match e {
        SqlExpr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_where(left, out);
            split_where(right, out);
        }
        SqlExpr::Nested(inner) => split_where(inner, out),
        _ => out.push(e),
    }
}

fn flatten_union<'a>(
    body: &'a SetExpr,
    out: &mut Vec<&'a SetExpr>,
    distinct: &mut bool,
) -> Result<()> {
    match body {
        SetExpr::SetOperation {
            op: SetOperator::Union,
            set_quantifier,
            left,
            right,
        } => {
            if !matches!(set_quantifier, SetQuantifier::All) {
                *distinct = true;
            }
            flatten_union(left, out, distinct)?;
            flatten_union(right, out, distinct)?;
            Ok(())
        }
        SetExpr::SetOperation { op, .. } => {
            Err(Error::UnsupportedType(format!("set operation {op}")))
        }
        other => {
            out.push(other);
            Ok(())
        }
    }
}

/// Classify join conditions. Column equalities spanning the sides are
/// oriented (left, right); single-sided conditions become pushdown lists.
fn extract_on_condition(
    conditions: Vec<Expr>,
    left: &Schema,
    right: &Schema,
) -> (Vec<(Column, Column)>, Vec<Expr>, Vec<Expr>, Vec<Expr>) {
    let mut eq = Vec::new();
    let mut left_conds = Vec::new();
    let mut right_conds = Vec::new();
    let mut other_conds = Vec::new();
    for expr in conditions {
        if let Some((l, r)) = expr.as_column_eq() {
            if left.contains(l) && right.contains(r) {
                eq.push((l.clone(), r.clone()));
                continue;
            }
            if left.contains(r) && right.contains(l) {
                eq.push((r.clone(), l.clone()));
                continue;
            }
        }
        let cols = expr.referenced_columns();
        let all_left = cols.iter().all(|c| left.contains(c));
        let all_right = cols.iter().all(|c| right.contains(c));
        if all_right {
            right_conds.push(expr);
        } else if all_left {
            left_conds.push(expr);
        } else {
            other_conds.push(expr);
        }
    }
    (eq, left_conds, right_conds, other_conds)
}

fn extract_table_names(refs: &[TableWithJoins]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for twj in refs {
        collect_table_names(&twj.relation, &mut out);
        for j in &twj.joins {
            collect_table_names(&j.relation, &mut out);
        }
    }
    out
}

fn collect_table_names(tf: &TableFactor, out: &mut Vec<(String, String)>) {
    match tf {
        TableFactor::Table { name, .. } => match name.0.as_slice() {
            [t] => out.push((String::new(), t.value.clone())),
            [d, t] => out.push((d.value.clone(), t.value.clone())),
            _ => {}
        },
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_names(&table_with_joins.relation, out);
            for j in &table_with_joins.joins {
                collect_table_names(&j.relation, out);
            }
        }
        _ => {}
    }
}

fn assignment_target_ref(assign: &SqlAssignment) -> Result<ColRef> {
    match &assign.target {
        AssignmentTarget::ColumnName(name) => ColRef::from_parts(&name.0)
            .ok_or_else(|| Error::UnsupportedType(format!("assignment target {name}"))),
        AssignmentTarget::Tuple(_) => {
            Err(Error::Unsupported("tuple assignment".to_string()))
        }
    }
}

fn column_full_name(col: &Column) -> (String, String, String) {
    (
        col.db_name.clone().unwrap_or_default().to_ascii_lowercase(),
        col.table_name
            .clone()
            .unwrap_or_default()
            .to_ascii_lowercase(),
        col.name.to_ascii_lowercase(),
    )
}

fn field_name_from_expression(field: &SelectField) -> String {
    // select first_row(a) surfaces the bare column name, matching the
    // display of a grouped plain column.
    if let SqlExpr::Function(f) = &field.expr {
        if is_agg_func(f) {
            if let Ok((AggKind::FirstRow, _, args)) = parse_agg_call(f) {
                if let Some(r) = args.first().and_then(ColRef::from_expr) {
                    return r.name;
                }
            }
        }
    }
    let inner = inner_of_parens(&field.expr);
    if let SqlExpr::Value(v) = inner {
        match v {
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                // String literals name the column by content, minus leading
                // non-graphic characters.
                return s
                    .trim_start_matches(|c: char| c.is_control() || c.is_whitespace())
                    .to_string();
            }
            Value::Null => return "NULL".to_string(),
            _ => return inner.to_string(),
        }
    }
    field.expr.to_string()
}

fn inner_of_parens(e: &SqlExpr) -> &SqlExpr {
    match e {
        SqlExpr::Nested(inner) => inner_of_parens(inner),
        _ => e,
    }
}

#[cfg(test)]
mod tests {
    use super::split_where;
    use sqlparser::ast::{SetExpr, Statement};

    fn where_of(sql: &str) -> sqlparser::ast::Expr {
        let stmts = opal_sql::parse_sql(sql).expect("parse");
        let Statement::Query(q) = &stmts[0] else {
            panic!("expected query");
        };
        let SetExpr::Select(sel) = q.body.as_ref() else {
            panic!("expected select");
        };
        sel.selection.clone().expect("where clause")
    }

    #[test]
    fn split_where_flattens_ands_through_parens() {
        let w = where_of("SELECT a FROM t WHERE (a > 1 AND b > 2) AND c > 3");
        let mut out = Vec::new();
        split_where(&w, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn split_where_keeps_or_whole() {
        let w = where_of("SELECT a FROM t WHERE a > 1 OR b > 2");
        let mut out = Vec::new();
        split_where(&w, &mut out);
        assert_eq!(out.len(), 1);
    }
}
