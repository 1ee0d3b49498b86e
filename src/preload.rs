//! Batched relation preloader (spec §4.6, C6): resolves a named relation for a set of already-
//! hydrated parent entities with exactly one `IN (...)` query per target table (two for
//! `BelongsToMany`, since the pivot has to be read before the target can be), instead of one
//! query per parent (the N+1 pattern this module exists to avoid).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde_json::Value;

use crate::ast::{Expression, InExpr, InOp, InRhs, Operand, Projection, Select, TableLike};
use crate::builder::IncludeSpec;
use crate::compiler;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::executor::DbExecutor;
use crate::hydrate::{IdentityMap, SharedEntity};
use crate::schema::{get, literal_to_value, pk_string, value_to_literal, Catalog, Entity, RelationKind};

fn row_to_entity(columns: &[String], values: &[crate::ast::Literal]) -> Entity {
    let mut entity = Entity::new();
    for (col, val) in columns.iter().zip(values) {
        entity.insert(col.clone(), literal_to_value(val));
    }
    entity
}

fn collect_key_values(parents: &[SharedEntity], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for parent in parents {
        let value = get(&parent.borrow(), column);
        if value.is_null() {
            continue;
        }
        if let Some(key) = pk_string(&value) {
            if seen.insert(key) {
                out.push(value);
            }
        }
    }
    out
}

/// One `SELECT <columns> FROM <table> WHERE <filter_column> IN (...)`. Returns immediately with no
/// query at all when `values` is empty — the common case once a relation's foreign keys have
/// already been exhausted by an earlier sibling in the same preload round.
async fn fetch_by_in(
    executor: &dyn DbExecutor,
    dialect: Dialect,
    table: &str,
    select_columns: &[String],
    filter_column: &str,
    values: &[Value],
) -> Result<Vec<Entity>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut select = Select::from(TableLike::table(table));
    select.columns = select_columns.iter().map(|c| Projection::Expr(Operand::column(table, c))).collect();
    let operands = values.iter().map(|v| Operand::from(value_to_literal(v))).collect();
    select.where_ = Some(Expression::In(InExpr {
        left: Operand::column(table, filter_column),
        op: InOp::In,
        rhs: InRhs::Values(operands),
    }));

    let compiled = compiler::compile_select(&select, dialect)?;
    log::debug!("preload: {} ({} values)", compiled.sql, values.len());
    let result = executor
        .execute_sql(&compiled.sql, &compiled.params)
        .await
        .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;
    Ok(result.rows.iter().map(|row| row_to_entity(&result.columns, row)).collect())
}

/// Resolution of one relation across every parent passed in, keyed by the value of whichever
/// parent-side column the join condition pins the child to (spec §4.6 "cross-sibling coalescing
/// keyed by (targetTable, remoteKey)"). [`attach`] consumes this with the same key column.
pub enum PreloadResult {
    ToOne { parent_key_column: String, by_key: HashMap<String, SharedEntity> },
    ToMany { parent_key_column: String, by_key: HashMap<String, Vec<SharedEntity>> },
}

/// Fetches and identity-maps every entity `relation_name` (declared on `parent_table`) refers to
/// for the given `parents`, in the fewest possible round trips for that relation kind.
pub async fn preload_relation(
    catalog: &Catalog,
    executor: &dyn DbExecutor,
    identity: &mut IdentityMap,
    dialect: Dialect,
    parent_table: &str,
    relation_name: &str,
    parents: &[SharedEntity],
) -> Result<PreloadResult> {
    let parent_descriptor = catalog.require_table(parent_table)?;
    let rel = parent_descriptor
        .relation(relation_name)
        .ok_or_else(|| Error::unknown_relation(parent_table, relation_name))?
        .clone();

    match &rel.kind {
        RelationKind::BelongsTo { target, foreign_key, local_key } => {
            let target_columns: Vec<String> = catalog.require_table(target)?.columns.iter().map(|c| c.name.clone()).collect();
            let keys = collect_key_values(parents, foreign_key);
            let rows = fetch_by_in(executor, dialect, target, &target_columns, local_key, &keys).await?;
            let mut by_key = HashMap::new();
            for row in rows {
                if let Some(key) = pk_string(&get(&row, local_key)) {
                    let (shared, _) = identity.get_or_insert_with(target, key.clone(), || row.clone());
                    by_key.insert(key, shared);
                }
            }
            Ok(PreloadResult::ToOne { parent_key_column: foreign_key.clone(), by_key })
        }
        RelationKind::HasOne { target, foreign_key, local_key } => {
            let target_columns: Vec<String> = catalog.require_table(target)?.columns.iter().map(|c| c.name.clone()).collect();
            let target_pk = primary_key_column(catalog, target)?;
            let keys = collect_key_values(parents, local_key);
            let rows = fetch_by_in(executor, dialect, target, &target_columns, foreign_key, &keys).await?;
            let mut by_key = HashMap::new();
            for row in rows {
                let Some(bucket) = pk_string(&get(&row, foreign_key)) else { continue };
                let Some(pk) = pk_string(&get(&row, &target_pk)) else { continue };
                let (shared, _) = identity.get_or_insert_with(target, pk, || row.clone());
                by_key.entry(bucket).or_insert(shared);
            }
            Ok(PreloadResult::ToOne { parent_key_column: local_key.clone(), by_key })
        }
        RelationKind::HasMany { target, foreign_key, local_key, .. } => {
            let target_columns: Vec<String> = catalog.require_table(target)?.columns.iter().map(|c| c.name.clone()).collect();
            let target_pk = primary_key_column(catalog, target)?;
            let keys = collect_key_values(parents, local_key);
            let rows = fetch_by_in(executor, dialect, target, &target_columns, foreign_key, &keys).await?;
            let mut by_key: HashMap<String, Vec<SharedEntity>> = HashMap::new();
            for row in rows {
                let Some(bucket) = pk_string(&get(&row, foreign_key)) else { continue };
                let Some(pk) = pk_string(&get(&row, &target_pk)) else { continue };
                let (shared, _) = identity.get_or_insert_with(target, pk, || row.clone());
                map_push(&mut by_key, bucket, shared);
            }
            Ok(PreloadResult::ToMany { parent_key_column: local_key.clone(), by_key })
        }
        RelationKind::BelongsToMany { target, pivot_table, pivot_fk_root, pivot_fk_target, .. } => {
            let parent_pk = primary_key_column(catalog, parent_table)?;
            let target_pk = primary_key_column(catalog, target)?;
            let root_keys = collect_key_values(parents, &parent_pk);
            let pivot_columns = vec![pivot_fk_root.clone(), pivot_fk_target.clone()];
            let pivot_rows = fetch_by_in(executor, dialect, pivot_table, &pivot_columns, pivot_fk_root, &root_keys).await?;

            let mut target_ids_by_root: HashMap<String, Vec<Value>> = HashMap::new();
            for row in &pivot_rows {
                if let Some(root_key) = pk_string(&get(row, pivot_fk_root)) {
                    map_push(&mut target_ids_by_root, root_key, get(row, pivot_fk_target));
                }
            }
            let target_values: Vec<Value> = collect_key_values_from(pivot_rows.iter().map(|r| get(r, pivot_fk_target)));
            let target_columns: Vec<String> = catalog.require_table(target)?.columns.iter().map(|c| c.name.clone()).collect();
            let target_rows = fetch_by_in(executor, dialect, target, &target_columns, &target_pk, &target_values).await?;

            let mut by_pk = HashMap::new();
            for row in target_rows {
                if let Some(pk) = pk_string(&get(&row, &target_pk)) {
                    let (shared, _) = identity.get_or_insert_with(target, pk.clone(), || row.clone());
                    by_pk.insert(pk, shared);
                }
            }

            let mut by_key: HashMap<String, Vec<SharedEntity>> = HashMap::new();
            for (root_key, target_ids) in target_ids_by_root {
                for id in target_ids {
                    if let Some(pk) = pk_string(&id) {
                        if let Some(shared) = by_pk.get(&pk) {
                            map_push(&mut by_key, root_key.clone(), shared.clone());
                        }
                    }
                }
            }
            Ok(PreloadResult::ToMany { parent_key_column: parent_pk, by_key })
        }
    }
}

fn primary_key_column(catalog: &Catalog, table: &str) -> Result<String> {
    Ok(catalog
        .require_table(table)?
        .primary_key()
        .ok_or_else(|| Error::invalid_schema(format!("table `{table}` has no primary key")))?
        .name
        .clone())
}

fn map_push<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, Vec<V>>, key: K, value: V) {
    map.entry(key).or_default().push(value);
}

fn collect_key_values_from(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values.filter(|v| pk_string(v).map(|s| seen.insert(s)).unwrap_or(false)).collect()
}

/// Writes a [`PreloadResult`] back onto each parent's entity under `relation_name`, keyed by
/// `result`'s own `parent_key_column` (spec §4.6 "identity-map-preserving resolution").
pub fn attach(parents: &[SharedEntity], relation_name: &str, result: &PreloadResult) {
    let parent_key_column = match result {
        PreloadResult::ToOne { parent_key_column, .. } => parent_key_column,
        PreloadResult::ToMany { parent_key_column, .. } => parent_key_column,
    };
    for parent in parents {
        let key = pk_string(&get(&parent.borrow(), parent_key_column));
        let mut entity = parent.borrow_mut();
        let value = match (&key, result) {
            (Some(key), PreloadResult::ToOne { by_key, .. }) => {
                by_key.get(key).map(|e| Value::Object(e.borrow().clone())).unwrap_or(Value::Null)
            }
            (None, PreloadResult::ToOne { .. }) => Value::Null,
            (Some(key), PreloadResult::ToMany { by_key, .. }) => Value::Array(
                by_key.get(key).map(|items| items.iter().map(|e| Value::Object(e.borrow().clone())).collect()).unwrap_or_default(),
            ),
            (None, PreloadResult::ToMany { .. }) => Value::Array(Vec::new()),
        };
        entity.insert(relation_name.to_string(), value);
    }
}

/// Preloads several sibling relations for the same parent set in one round (spec §5 "siblings
/// within a depth may run concurrently"). Uses `futures::future::join_all` rather than spawned
/// tasks: every `preload_relation` future borrows `executor`/`catalog`/`identity`, so this stays
/// single-task cooperative concurrency rather than true parallelism, which is exactly what the
/// spec's single-threaded scheduling model calls for.
pub async fn preload_siblings<'a>(
    catalog: &'a Catalog,
    executor: &'a dyn DbExecutor,
    identity: &'a mut IdentityMap,
    dialect: Dialect,
    parent_table: &'a str,
    relation_names: &'a [String],
    parents: &'a [SharedEntity],
) -> Result<Vec<(String, PreloadResult)>> {
    if !executor.capabilities().concurrent {
        let mut results = Vec::with_capacity(relation_names.len());
        for name in relation_names {
            let result = preload_relation(catalog, executor, identity, dialect, parent_table, name, parents).await?;
            results.push((name.clone(), result));
        }
        return Ok(results);
    }

    // `IdentityMap` is `&mut`-only, so concurrent siblings each get a scratch map; the scratches
    // are merged back into `identity` below once every future resolves, so the caller's map ends
    // up with every entity any sibling resolved, the same as the sequential path.
    let futures = relation_names.iter().map(|name| {
        let mut scratch = IdentityMap::new();
        async move {
            let result = preload_relation(catalog, executor, &mut scratch, dialect, parent_table, name, parents).await;
            (name.clone(), result, scratch)
        }
    });
    let outcomes = futures::future::join_all(futures).await;
    let mut results = Vec::with_capacity(outcomes.len());
    for (name, result, scratch) in outcomes {
        identity.merge(scratch);
        results.push((name, result?));
    }
    Ok(results)
}

/// One edge out of a depth's frontier, reduced to the shape every non-pivot `RelationKind` shares:
/// a column on the target row to filter/bucket by (the spec's "remoteKey"), and a column on the
/// parent to read `IN (...)` values from.
struct KeyedEdge<'t> {
    spec: &'t IncludeSpec,
    parent_value_column: String,
    is_to_many: bool,
}

/// Merges `additions` into `tree`, combining entries that name the same relation (two sibling
/// edges nesting the same relation further down) instead of duplicating them.
fn merge_into(tree: &mut Vec<IncludeSpec>, additions: &[IncludeSpec]) {
    for addition in additions {
        if let Some(existing) = tree.iter_mut().find(|s| s.name == addition.name) {
            merge_into(&mut existing.nested, &addition.nested);
        } else {
            tree.push(addition.clone());
        }
    }
}

fn push_unique(frontier: &mut Vec<SharedEntity>, candidate: &SharedEntity) {
    if !frontier.iter().any(|existing| Rc::ptr_eq(existing, candidate)) {
        frontier.push(candidate.clone());
    }
}

/// Depth-ordered, cross-sibling-coalescing preload over a (possibly nested) include tree (spec
/// §4.6 #2/#3, testable property 7, scenario S6): at each depth, sibling edges are grouped by
/// `(targetTable, remoteKey)` and resolved with exactly one query per group — so `creator` and
/// `assignee`, both `BelongsTo users`, share one `users` fetch, and if both also nest `orders`,
/// that nested `orders` fetch is shared too — before the walk descends to depth d+1.
///
/// `BelongsToMany` edges keep their own two-query pivot shape from [`preload_relation`] and are
/// resolved individually rather than coalesced across siblings; SPEC_FULL's coalescing key is
/// defined for the single-query relation kinds only.
pub fn preload_tree<'a>(
    catalog: &'a Catalog,
    executor: &'a dyn DbExecutor,
    identity: &'a mut IdentityMap,
    dialect: Dialect,
    parent_table: &'a str,
    tree: &'a [IncludeSpec],
    parents: &'a [SharedEntity],
) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        if tree.is_empty() || parents.is_empty() {
            return Ok(());
        }

        let parent_descriptor = catalog.require_table(parent_table)?;
        let mut groups: HashMap<(String, String), Vec<KeyedEdge<'_>>> = HashMap::new();
        let mut pivots: Vec<(&IncludeSpec, String)> = Vec::new();

        for spec in tree {
            let rel = parent_descriptor
                .relation(&spec.name)
                .ok_or_else(|| Error::unknown_relation(parent_table, spec.name.as_str()))?;
            match &rel.kind {
                RelationKind::BelongsTo { target, foreign_key, local_key } => {
                    groups.entry((target.clone(), local_key.clone())).or_default().push(KeyedEdge {
                        spec,
                        parent_value_column: foreign_key.clone(),
                        is_to_many: false,
                    });
                }
                RelationKind::HasOne { target, foreign_key, local_key } => {
                    groups.entry((target.clone(), foreign_key.clone())).or_default().push(KeyedEdge {
                        spec,
                        parent_value_column: local_key.clone(),
                        is_to_many: false,
                    });
                }
                RelationKind::HasMany { target, foreign_key, local_key, .. } => {
                    groups.entry((target.clone(), foreign_key.clone())).or_default().push(KeyedEdge {
                        spec,
                        parent_value_column: local_key.clone(),
                        is_to_many: true,
                    });
                }
                RelationKind::BelongsToMany { .. } => pivots.push((spec, rel.kind.target().to_string())),
            }
        }

        let mut next_frontiers: HashMap<String, Vec<SharedEntity>> = HashMap::new();
        let mut next_trees: HashMap<String, Vec<IncludeSpec>> = HashMap::new();
        // Attaching is deferred until after the recursive call below: `attach` snapshots each
        // entity's *current* fields onto the parent, so a relation's own nested children must
        // already be written onto it before it gets snapshotted, not after.
        let mut pending: Vec<(&IncludeSpec, PreloadResult)> = Vec::new();

        for ((target, filter_column), edges) in &groups {
            let target_columns: Vec<String> = catalog.require_table(target)?.columns.iter().map(|c| c.name.clone()).collect();
            let target_pk = primary_key_column(catalog, target)?;

            let mut seen_values = HashSet::new();
            let mut values = Vec::new();
            for edge in edges {
                for v in collect_key_values(parents, &edge.parent_value_column) {
                    if let Some(key) = pk_string(&v) {
                        if seen_values.insert(key) {
                            values.push(v);
                        }
                    }
                }
            }
            let rows = fetch_by_in(executor, dialect, target, &target_columns, filter_column, &values).await?;

            // Identity-map each row once per group, keyed by the target's own primary key (not
            // `filter_column`, which repeats across rows for to-many edges); bucket rows by
            // `filter_column`'s value separately for attaching back to parents.
            let mut resolved: Vec<SharedEntity> = Vec::new();
            let mut by_bucket: HashMap<String, Vec<SharedEntity>> = HashMap::new();
            for row in &rows {
                let Some(pk) = pk_string(&get(row, &target_pk)) else { continue };
                let (shared, _) = identity.get_or_insert_with(target, pk, || row.clone());
                resolved.push(shared.clone());
                if let Some(bucket) = pk_string(&get(row, filter_column)) {
                    map_push(&mut by_bucket, bucket, shared);
                }
            }

            for edge in edges {
                let result = if edge.is_to_many {
                    PreloadResult::ToMany { parent_key_column: edge.parent_value_column.clone(), by_key: by_bucket.clone() }
                } else {
                    let by_key =
                        by_bucket.iter().filter_map(|(k, v)| v.first().map(|shared| (k.clone(), shared.clone()))).collect();
                    PreloadResult::ToOne { parent_key_column: edge.parent_value_column.clone(), by_key }
                };

                if !edge.spec.nested.is_empty() {
                    let frontier = next_frontiers.entry(target.clone()).or_default();
                    for shared in &resolved {
                        push_unique(frontier, shared);
                    }
                    merge_into(next_trees.entry(target.clone()).or_default(), &edge.spec.nested);
                }
                pending.push((edge.spec, result));
            }
        }

        for (spec, target) in pivots {
            let result = preload_relation(catalog, executor, identity, dialect, parent_table, &spec.name, parents).await?;
            if !spec.nested.is_empty() {
                let children: Vec<SharedEntity> = match &result {
                    PreloadResult::ToOne { by_key, .. } => by_key.values().cloned().collect(),
                    PreloadResult::ToMany { by_key, .. } => by_key.values().flatten().cloned().collect(),
                };
                let frontier = next_frontiers.entry(target.clone()).or_default();
                for shared in &children {
                    push_unique(frontier, shared);
                }
                merge_into(next_trees.entry(target).or_default(), &spec.nested);
            }
            pending.push((spec, result));
        }

        for (target, frontier) in next_frontiers {
            let nested_tree = next_trees.remove(&target).unwrap_or_default();
            preload_tree(catalog, executor, identity, dialect, &target, &nested_tree, &frontier).await?;
        }

        for (spec, result) in &pending {
            attach(parents, &spec.name, result);
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::executor::testing::ScriptedExecutor;
    use crate::executor::ResultSet;
    use crate::schema::{column, Cascade, RelationDescriptor, TableDescriptor};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(TableDescriptor::define("users", vec![column::bigint("id").primary_key()], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "orders",
                    vec![column::bigint("id").primary_key(), column::bigint("user_id"), column::decimal("total", 10, 2)],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        catalog
            .attach_relations("users", vec![RelationDescriptor::has_many("orders", "orders", "users", "id", Cascade::None)])
            .unwrap();
        catalog
    }

    fn entity(id: i64) -> SharedEntity {
        let mut e = Entity::new();
        e.insert("id".into(), Value::from(id));
        std::rc::Rc::new(std::cell::RefCell::new(e))
    }

    #[tokio::test]
    async fn has_many_batches_into_one_query_and_buckets_by_foreign_key() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![ResultSet::new(
            vec!["id".into(), "user_id".into(), "total".into()],
            vec![
                vec![Literal::Int(1), Literal::Int(10), Literal::Int(5)],
                vec![Literal::Int(2), Literal::Int(10), Literal::Int(7)],
                vec![Literal::Int(3), Literal::Int(11), Literal::Int(9)],
            ],
        )]);
        let parents = vec![entity(10), entity(11)];
        let mut identity = IdentityMap::new();
        let result =
            preload_relation(&catalog, &executor, &mut identity, Dialect::Postgres, "users", "orders", &parents).await.unwrap();
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
        match result {
            PreloadResult::ToMany { by_key, .. } => {
                assert_eq!(by_key.get("10").unwrap().len(), 2);
                assert_eq!(by_key.get("11").unwrap().len(), 1);
            }
            _ => panic!("expected ToMany"),
        }
    }

    #[tokio::test]
    async fn preload_with_no_parents_issues_no_query() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![]);
        let mut identity = IdentityMap::new();
        let result = preload_relation(&catalog, &executor, &mut identity, Dialect::Postgres, "users", "orders", &[]).await.unwrap();
        assert_eq!(executor.calls.lock().unwrap().len(), 0);
        match result {
            PreloadResult::ToMany { by_key, .. } => assert!(by_key.is_empty()),
            _ => panic!("expected ToMany"),
        }
    }

    #[tokio::test]
    async fn preload_siblings_threads_the_caller_identity_map_concurrently() {
        let catalog = catalog();
        let mut executor = ScriptedExecutor::new(vec![ResultSet::new(
            vec!["id".into(), "user_id".into(), "total".into()],
            vec![vec![Literal::Int(1), Literal::Int(10), Literal::Int(5)]],
        )]);
        executor.capabilities.concurrent = true;
        let parents = vec![entity(10)];
        let mut identity = IdentityMap::new();
        let names = vec!["orders".to_string()];
        preload_siblings(&catalog, &executor, &mut identity, Dialect::Postgres, "users", &names, &parents).await.unwrap();
        // the scratch map the concurrent path builds per sibling must be merged back into the
        // caller's identity map, not dropped
        assert!(identity.get("orders", "1").is_some());
    }

    fn ticket_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(TableDescriptor::define("users", vec![column::bigint("id").primary_key()], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "orders",
                    vec![column::bigint("id").primary_key(), column::bigint("user_id"), column::decimal("total", 10, 2)],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "tickets",
                    vec![column::bigint("id").primary_key(), column::bigint("creator_id"), column::bigint("assignee_id")],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        catalog.attach_relations("users", vec![RelationDescriptor::has_many("orders", "orders", "users", "id", Cascade::None)]).unwrap();
        catalog
            .attach_relations(
                "tickets",
                vec![
                    RelationDescriptor::belongs_to("creator", "users", "creator", "id"),
                    RelationDescriptor::belongs_to("assignee", "users", "assignee", "id"),
                ],
            )
            .unwrap();
        catalog
    }

    fn ticket(id: i64, creator_id: i64, assignee_id: i64) -> SharedEntity {
        let mut e = Entity::new();
        e.insert("id".into(), Value::from(id));
        e.insert("creator_id".into(), Value::from(creator_id));
        e.insert("assignee_id".into(), Value::from(assignee_id));
        std::rc::Rc::new(std::cell::RefCell::new(e))
    }

    /// SPEC_FULL scenario S6: `Tickets.include({creator:{include:{orders:true}}, assignee:
    /// {include:{orders:true}}})` over `[(creator_id=10,assignee_id=20),(10,30)]` must issue
    /// exactly one `orders` query despite two sibling relations (`creator`/`assignee`) both
    /// nesting it.
    #[tokio::test]
    async fn preload_tree_coalesces_nested_include_across_siblings() {
        let catalog = ticket_catalog();
        let users_rows = ResultSet::new(
            vec!["id".into()],
            vec![vec![Literal::Int(10)], vec![Literal::Int(20)], vec![Literal::Int(30)]],
        );
        let orders_rows = ResultSet::new(
            vec!["id".into(), "user_id".into(), "total".into()],
            vec![
                vec![Literal::Int(1), Literal::Int(10), Literal::Int(5)],
                vec![Literal::Int(2), Literal::Int(10), Literal::Int(7)],
                vec![Literal::Int(3), Literal::Int(20), Literal::Int(9)],
            ],
        );
        let executor = ScriptedExecutor::new(vec![users_rows, orders_rows]);
        let parents = vec![ticket(1, 10, 20), ticket(2, 10, 30)];
        let mut identity = IdentityMap::new();
        let tree = vec![
            IncludeSpec::new("creator").with(IncludeSpec::new("orders")),
            IncludeSpec::new("assignee").with(IncludeSpec::new("orders")),
        ];

        preload_tree(&catalog, &executor, &mut identity, Dialect::Postgres, "tickets", &tree, &parents).await.unwrap();

        // exactly one users fetch (sibling coalescing) and one orders fetch (nested coalescing)
        assert_eq!(executor.calls.lock().unwrap().len(), 2);

        let first = parents[0].borrow();
        let creator = first.get("creator").unwrap().as_object().unwrap();
        assert_eq!(creator.get("id").unwrap(), &Value::from(10));
        assert_eq!(creator.get("orders").unwrap().as_array().unwrap().len(), 2);

        let assignee = first.get("assignee").unwrap().as_object().unwrap();
        assert_eq!(assignee.get("id").unwrap(), &Value::from(20));
        assert_eq!(assignee.get("orders").unwrap().as_array().unwrap().len(), 1);

        let second = parents[1].borrow();
        let second_creator = second.get("creator").unwrap().as_object().unwrap();
        assert_eq!(second_creator.get("orders").unwrap().as_array().unwrap().len(), 2);
    }

    /// Two siblings resolving to the same target row (a self-join, `creator_id == assignee_id`)
    /// must fetch that row's own nested children exactly once (spec §4.6 #5).
    #[tokio::test]
    async fn preload_tree_self_join_fetches_nested_children_once() {
        let catalog = ticket_catalog();
        let users_rows = ResultSet::new(vec!["id".into()], vec![vec![Literal::Int(10)]]);
        let orders_rows = ResultSet::new(
            vec!["id".into(), "user_id".into(), "total".into()],
            vec![vec![Literal::Int(1), Literal::Int(10), Literal::Int(5)]],
        );
        let executor = ScriptedExecutor::new(vec![users_rows, orders_rows]);
        let parents = vec![ticket(1, 10, 10)];
        let mut identity = IdentityMap::new();
        let tree = vec![
            IncludeSpec::new("creator").with(IncludeSpec::new("orders")),
            IncludeSpec::new("assignee").with(IncludeSpec::new("orders")),
        ];

        preload_tree(&catalog, &executor, &mut identity, Dialect::Postgres, "tickets", &tree, &parents).await.unwrap();

        assert_eq!(executor.calls.lock().unwrap().len(), 2);
        let first = parents[0].borrow();
        assert_eq!(first.get("creator").unwrap().get("id"), first.get("assignee").unwrap().get("id"));
    }
}
