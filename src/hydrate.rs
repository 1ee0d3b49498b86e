//! Hydration engine (spec §4.5, C5): reshapes one flat `ResultSet` produced by an `include`-
//! widened `SELECT` back into a tree of entities, consulting an [`IdentityMap`] so that two rows
//! referring to the same `(table, primary_key)` resolve to the *same* shared entity rather than
//! two independent copies (spec §5 "identity-map-preserving resolution").
//!
//! This module only handles the single-flat-row shape `SelectBuilder::include` produces. Batched,
//! depth-ordered relation fetching for relations loaded after the fact lives in
//! [`crate::preload`]; both converge on the same [`IdentityMap`] so a row hydrated here and a row
//! preloaded later for the same entity still collapse to one shared instance.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::ast::{HydrationPlan, RelationPlan};
use crate::error::{Error, Result};
use crate::executor::ResultSet;
use crate::schema::{literal_to_value, pk_string, Entity};

pub type SharedEntity = Rc<RefCell<Entity>>;

/// `Map<tableName, Map<primaryKey, entity>>` (spec §4.7 "identity map"). Shared between hydration
/// and preloading so both paths into the same query converge on one instance per row.
#[derive(Default, Clone)]
pub struct IdentityMap {
    tables: HashMap<String, HashMap<String, SharedEntity>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        IdentityMap::default()
    }

    pub fn get(&self, table: &str, pk: &str) -> Option<SharedEntity> {
        self.tables.get(table)?.get(pk).cloned()
    }

    /// Returns the existing entity for `(table, pk)` if tracked, else builds, records, and
    /// returns a fresh one. The bool tells the caller whether `build` ran.
    pub fn get_or_insert_with(&mut self, table: &str, pk: String, build: impl FnOnce() -> Entity) -> (SharedEntity, bool) {
        let slot = self.tables.entry(table.to_string()).or_default();
        if let Some(existing) = slot.get(&pk) {
            return (existing.clone(), false);
        }
        let shared = Rc::new(RefCell::new(build()));
        slot.insert(pk, shared.clone());
        (shared, true)
    }

    pub fn insert(&mut self, table: &str, pk: String, entity: SharedEntity) {
        self.tables.entry(table.to_string()).or_default().insert(pk, entity);
    }

    pub fn remove(&mut self, table: &str, pk: &str) {
        if let Some(slot) = self.tables.get_mut(table) {
            slot.remove(pk);
        }
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Folds `other`'s tracked entities into `self`, keeping `self`'s own copy of any `(table, pk)`
    /// already present rather than overwriting it. Used to reconcile the scratch maps concurrent
    /// sibling preloads build (spec §4.6 #4 "preserves identity").
    pub fn merge(&mut self, other: IdentityMap) {
        for (table, slot) in other.tables {
            let dest = self.tables.entry(table).or_default();
            for (pk, entity) in slot {
                dest.entry(pk).or_insert(entity);
            }
        }
    }
}

struct RowView<'a> {
    columns: &'a [String],
    values: &'a [crate::ast::Literal],
}

impl<'a> RowView<'a> {
    fn get(&self, alias: &str) -> Option<&crate::ast::Literal> {
        self.columns.iter().position(|c| c == alias).map(|i| &self.values[i])
    }
}

fn build_fields(row: &RowView, prefix: &str, columns: &[String]) -> Entity {
    let mut entity = Entity::new();
    for col in columns {
        let alias = if prefix.is_empty() { col.clone() } else { format!("{prefix}__{col}") };
        if let Some(lit) = row.get(&alias) {
            entity.insert(col.clone(), literal_to_value(lit));
        }
    }
    entity
}

/// Replaces (by primary key) or appends `child` into `parent[relation_name]`'s array, so that SQL
/// join fan-out (one root row per sibling-relation combination) never produces duplicate entries.
fn attach_many(parent: &mut Entity, relation_name: &str, pk_field: &str, child: Value) {
    let slot = parent.entry(relation_name.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(items) = slot else {
        *slot = Value::Array(vec![child]);
        return;
    };
    let child_pk = child.get(pk_field).cloned();
    match items.iter().position(|item| item.get(pk_field).cloned() == child_pk) {
        Some(pos) => items[pos] = child,
        None => items.push(child),
    }
}

/// Relations grouped by the alias-prefix scope they were joined under (`""` for the root), built
/// once per plan since `RelationPlan::nested` does not itself carry the nested plan's children —
/// every relation at any depth lives in one flat `HydrationPlan::relations`, distinguished only
/// by its `alias_prefix` path (`"posts"`, `"posts__comments"`, …).
fn group_by_parent_scope(relations: &[RelationPlan]) -> HashMap<&str, Vec<&RelationPlan>> {
    let mut groups: HashMap<&str, Vec<&RelationPlan>> = HashMap::new();
    for relation in relations {
        let suffix = format!("__{}", relation.name);
        let parent_scope = relation.alias_prefix.strip_suffix(&suffix).unwrap_or("");
        groups.entry(parent_scope).or_default().push(relation);
    }
    groups
}

fn hydrate_relation(row: &RowView, relation: &RelationPlan, groups: &HashMap<&str, Vec<&RelationPlan>>, identity: &mut IdentityMap) -> Result<Option<SharedEntity>> {
    let pk_alias = format!("{}__{}", relation.alias_prefix, relation.target_primary_key);
    let pk_literal = row.get(&pk_alias).ok_or_else(|| {
        Error::hydration_failure(pk_alias.clone(), format!("row is missing the joined column for relation `{}`", relation.name))
    })?;
    let pk_value = literal_to_value(pk_literal);
    let Some(pk) = pk_string(&pk_value) else {
        return Ok(None);
    };

    let (shared, created) = identity.get_or_insert_with(&relation.target_table, pk.clone(), || {
        build_fields(row, &relation.alias_prefix, &relation.columns)
    });
    if !created {
        let refreshed = build_fields(row, &relation.alias_prefix, &relation.columns);
        let mut existing = shared.borrow_mut();
        for (k, v) in refreshed.into_iter() {
            existing.insert(k, v);
        }
    }

    if let Some(children) = groups.get(relation.alias_prefix.as_str()) {
        for child in children {
            let child = *child;
            if let Some(child_entity) = hydrate_relation(row, child, groups, identity)? {
                attach_child(&shared, child, child_entity.borrow().clone().into());
            } else if !child.kind.is_to_many() {
                shared.borrow_mut().insert(child.name.clone(), Value::Null);
            }
        }
    }

    Ok(Some(shared))
}

fn attach_child(parent: &SharedEntity, relation: &RelationPlan, child_snapshot: Value) {
    let mut parent = parent.borrow_mut();
    if relation.kind.is_to_many() {
        attach_many(&mut parent, &relation.name, &relation.target_primary_key, child_snapshot);
    } else {
        parent.insert(relation.name.clone(), child_snapshot);
    }
}

/// Hydrates every row of `result` against `plan`, returning the distinct root entities in
/// first-seen order (spec §4.5). Rows sharing a root primary key (produced by to-many join
/// fan-out) collapse into one entity via `identity`.
pub fn hydrate(plan: &HydrationPlan, result: &ResultSet, identity: &mut IdentityMap) -> Result<Vec<SharedEntity>> {
    let groups = group_by_parent_scope(&plan.relations);
    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for values in &result.rows {
        let row = RowView { columns: &result.columns, values };
        let pk_literal = row.get(&plan.root_primary_key).ok_or_else(|| {
            Error::hydration_failure(plan.root_primary_key.clone(), "row is missing the root primary key column".to_string())
        })?;
        let pk_value = literal_to_value(pk_literal);
        let Some(pk) = pk_string(&pk_value) else {
            return Err(Error::hydration_failure(plan.root_primary_key.clone(), "root primary key is null".to_string()));
        };

        let (root, created) = identity.get_or_insert_with(&plan.root_table, pk.clone(), || build_fields(&row, "", &plan.root_columns));
        if !created {
            let refreshed = build_fields(&row, "", &plan.root_columns);
            let mut existing = root.borrow_mut();
            for (k, v) in refreshed.into_iter() {
                existing.insert(k, v);
            }
        }

        if let Some(children) = groups.get("") {
            for child in children {
                let child = *child;
                if let Some(child_entity) = hydrate_relation(&row, child, &groups, identity)? {
                    attach_child(&root, child, child_entity.borrow().clone().into());
                } else if !child.kind.is_to_many() {
                    root.borrow_mut().insert(child.name.clone(), Value::Null);
                }
            }
        }

        if seen.insert(pk) {
            order.push(root);
        }
    }

    Ok(order)
}

/// Lazy-relation loading state (spec §4.5 "proxies"). Session attaches one of these per tracked
/// entity per relation that wasn't eagerly `include`d; `preload`/`session` flip it to `Loaded`
/// once a batch fetch resolves it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyState<T> {
    Unloaded,
    Loaded(T),
}

impl<T> ProxyState<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ProxyState::Loaded(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            ProxyState::Loaded(v) => Some(v),
            ProxyState::Unloaded => None,
        }
    }
}

/// A not-yet-fetched to-one relation (`BelongsTo`/`HasOne`).
#[derive(Debug, Clone)]
pub struct RefProxy {
    pub relation: String,
    pub state: ProxyState<Option<SharedEntity>>,
}

impl RefProxy {
    pub fn unloaded(relation: impl Into<String>) -> Self {
        RefProxy { relation: relation.into(), state: ProxyState::Unloaded }
    }

    pub fn resolve(&mut self, value: Option<SharedEntity>) {
        self.state = ProxyState::Loaded(value);
    }
}

/// A not-yet-fetched to-many relation (`HasMany`/`BelongsToMany`), with the mutation surface the
/// spec asks for on a loaded collection (`add`/`remove`; `attach`/`detach` are pivot-only and live
/// on [`crate::session::Session`] since they require a pivot table write).
#[derive(Debug, Clone)]
pub struct CollectionProxy {
    pub relation: String,
    pub state: ProxyState<Vec<SharedEntity>>,
}

impl CollectionProxy {
    pub fn unloaded(relation: impl Into<String>) -> Self {
        CollectionProxy { relation: relation.into(), state: ProxyState::Unloaded }
    }

    pub fn resolve(&mut self, values: Vec<SharedEntity>) {
        self.state = ProxyState::Loaded(values);
    }

    pub fn add(&mut self, entity: SharedEntity) {
        if let ProxyState::Loaded(items) = &mut self.state {
            items.push(entity);
        }
    }

    pub fn remove(&mut self, primary_key_column: &str, pk: &str) {
        if let ProxyState::Loaded(items) = &mut self.state {
            items.retain(|item| {
                let item = item.borrow();
                crate::schema::pk_string(&crate::schema::get(&item, primary_key_column)).as_deref() != Some(pk)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    fn plan_with_has_many() -> HydrationPlan {
        let mut plan = HydrationPlan::root("users", "id", vec!["id".into(), "name".into()]);
        plan.relations.push(RelationPlan {
            name: "orders".into(),
            alias_prefix: "orders".into(),
            kind: crate::schema::RelationKind::HasMany {
                target: "orders".into(),
                foreign_key: "user_id".into(),
                local_key: "id".into(),
                cascade: Default::default(),
            },
            target_table: "orders".into(),
            target_primary_key: "id".into(),
            foreign_key: "user_id".into(),
            local_key: "id".into(),
            columns: vec!["id".into(), "total".into()],
            nested: None,
        });
        plan
    }

    fn row(values: Vec<Literal>) -> Vec<Literal> {
        values
    }

    #[test]
    fn fan_out_rows_collapse_into_one_root_with_a_populated_collection() {
        let plan = plan_with_has_many();
        let result = ResultSet::new(
            vec!["id".into(), "name".into(), "orders__id".into(), "orders__total".into()],
            vec![
                row(vec![Literal::Int(1), Literal::Text("ada".into()), Literal::Int(10), Literal::Int(5)]),
                row(vec![Literal::Int(1), Literal::Text("ada".into()), Literal::Int(11), Literal::Int(7)]),
            ],
        );
        let mut identity = IdentityMap::new();
        let roots = hydrate(&plan, &result, &mut identity).unwrap();
        assert_eq!(roots.len(), 1);
        let root = roots[0].borrow();
        let orders = root.get("orders").unwrap().as_array().unwrap();
        assert_eq!(orders.len(), 2);
    }

    #[test]
    fn left_join_with_no_match_yields_no_child() {
        let plan = plan_with_has_many();
        let result = ResultSet::new(
            vec!["id".into(), "name".into(), "orders__id".into(), "orders__total".into()],
            vec![row(vec![Literal::Int(2), Literal::Text("bob".into()), Literal::Null, Literal::Null])],
        );
        let mut identity = IdentityMap::new();
        let roots = hydrate(&plan, &result, &mut identity).unwrap();
        assert_eq!(roots.len(), 1);
        let root = roots[0].borrow();
        let orders = root.get("orders");
        assert!(orders.is_none() || orders.unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn identity_map_is_reused_across_two_hydrate_calls() {
        let plan = HydrationPlan::root("users", "id", vec!["id".into(), "name".into()]);
        let result = ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![row(vec![Literal::Int(1), Literal::Text("ada".into())])],
        );
        let mut identity = IdentityMap::new();
        let first = hydrate(&plan, &result, &mut identity).unwrap();
        let second = hydrate(&plan, &result, &mut identity).unwrap();
        assert!(Rc::ptr_eq(&first[0], &second[0]));
    }
}
