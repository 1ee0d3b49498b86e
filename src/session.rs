//! Unit-of-work session (spec §4.7, C7): the one layer above [`crate::executor::DbExecutor`] that
//! performs I/O. Owns the identity map and a table of tracked entities, turning `persist`/`remove`
//! calls plus in-place entity mutation into compiled, dialect-rendered `INSERT`/`UPDATE`/`DELETE`
//! statements run inside one transaction (spec §5 "the session wraps an executor and a dialect").

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value;

use crate::ast::{Delete, Expression, Insert, InsertRow, InsertValues, Operand, TableLike, TableRef};
use crate::builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
use crate::compiler;
use crate::dialect::{Dialect, IdentityRetrieval};
use crate::error::{Error, Result};
use crate::executor::DbExecutor;
use crate::hydrate::{IdentityMap, SharedEntity};
use crate::schema::{get, literal_to_value, pk_string, value_to_literal, Cascade, Catalog, Entity, RelationKind};
use crate::utils::toposort;

/// Lifecycle state of one tracked entity (spec §4.7 "Tracked entities").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Managed,
    Dirty,
    Removed,
    Detached,
}

#[derive(Clone)]
struct TrackedEntity {
    table: String,
    entity: SharedEntity,
    pk: Option<String>,
    status: Status,
    original_snapshot: Option<Entity>,
}

/// One pending relation-side-effect (spec §4.7 "Pending relation changes"). `Attach`/`Detach`
/// write a pivot row for `BelongsToMany`; `Add`/`Remove` mutate the foreign key on a `HasMany`
/// child directly, honoring the relation's `cascade` on removal.
#[derive(Clone)]
enum RelationChange {
    Attach { relation: String, parent: SharedEntity, child: SharedEntity },
    Detach { relation: String, parent: SharedEntity, child: SharedEntity },
    Add { relation: String, parent: SharedEntity, child: SharedEntity },
    Remove { relation: String, parent: SharedEntity, child: SharedEntity },
}

type BeforeAfterHook<'c> = Box<dyn FnMut() -> Result<()> + 'c>;
type DomainEventHandler<'c> = Box<dyn FnMut(&Value) + 'c>;

/// Unit-of-work over one [`DbExecutor`] and [`Dialect`] (spec §4.7). `!Sync` by construction —
/// everything here is `Rc`/`RefCell`, matching "this port's `Session` is `!Sync`-by-convention
/// (single-owner, `&mut self` on all mutating methods) rather than internally locked" (spec §5).
pub struct Session<'c> {
    catalog: &'c Catalog,
    executor: &'c dyn DbExecutor,
    dialect: Dialect,
    identity: IdentityMap,
    tracked: HashMap<usize, TrackedEntity>,
    insertion_order: Vec<usize>,
    relation_changes: Vec<RelationChange>,
    before_flush: Vec<BeforeAfterHook<'c>>,
    after_flush: Vec<BeforeAfterHook<'c>>,
    events: Vec<Value>,
    event_handlers: Vec<DomainEventHandler<'c>>,
}

impl<'c> Session<'c> {
    pub fn new(catalog: &'c Catalog, executor: &'c dyn DbExecutor, dialect: Dialect) -> Self {
        Session {
            catalog,
            executor,
            dialect,
            identity: IdentityMap::new(),
            tracked: HashMap::new(),
            insertion_order: Vec::new(),
            relation_changes: Vec::new(),
            before_flush: Vec::new(),
            after_flush: Vec::new(),
            events: Vec::new(),
            event_handlers: Vec::new(),
        }
    }

    fn key_of(entity: &SharedEntity) -> usize {
        Rc::as_ptr(entity) as usize
    }

    fn primary_key_column(&self, table: &str) -> Result<String> {
        Ok(self
            .catalog
            .require_table(table)?
            .primary_key()
            .ok_or_else(|| Error::invalid_schema(format!("table `{table}` has no primary key")))?
            .name
            .clone())
    }

    fn table_of(&self, entity: &SharedEntity) -> Result<String> {
        self.tracked
            .get(&Self::key_of(entity))
            .map(|t| t.table.clone())
            .ok_or_else(|| Error::invalid_schema("a relation-change target must already be a tracked entity".to_string()))
    }

    /// Begins tracking an already-identity-mapped entity (e.g. one returned by
    /// [`crate::hydrate::hydrate`] or [`crate::preload::preload_relation`]) as `Managed`, recording
    /// a snapshot so `flush` can later diff for changed columns.
    pub fn track(&mut self, table: &str, entity: SharedEntity) -> Result<SharedEntity> {
        let pk_column = self.primary_key_column(table)?;
        let pk = pk_string(&get(&entity.borrow(), &pk_column))
            .ok_or_else(|| Error::invalid_schema(format!("entity for table `{table}` has no primary key value to track")))?;
        let (shared, _) = self.identity.get_or_insert_with(table, pk.clone(), || entity.borrow().clone());
        let snapshot = shared.borrow().clone();
        let key = Self::key_of(&shared);
        if !self.tracked.contains_key(&key) {
            self.insertion_order.push(key);
        }
        self.tracked.insert(
            key,
            TrackedEntity { table: table.to_string(), entity: shared.clone(), pk: Some(pk), status: Status::Managed, original_snapshot: Some(snapshot) },
        );
        Ok(shared)
    }

    /// `persist(entity)` (spec §4.7): tracks a brand-new entity for insertion on the next `flush`.
    pub fn persist(&mut self, table: &str, entity: Entity) -> Result<SharedEntity> {
        self.catalog.require_table(table)?;
        let shared: SharedEntity = Rc::new(RefCell::new(entity));
        let key = Self::key_of(&shared);
        self.tracked.insert(
            key,
            TrackedEntity { table: table.to_string(), entity: shared.clone(), pk: None, status: Status::New, original_snapshot: None },
        );
        self.insertion_order.push(key);
        Ok(shared)
    }

    /// Marks an already-tracked `Managed` entity `Dirty`. Field mutation itself happens through
    /// the normal `.borrow_mut()` on the `Rc<RefCell<Entity>>` handle `persist`/`track` returned;
    /// this just flags that `flush` should diff and write it.
    pub fn mark_dirty(&mut self, entity: &SharedEntity) {
        if let Some(tracked) = self.tracked.get_mut(&Self::key_of(entity)) {
            if tracked.status == Status::Managed {
                tracked.status = Status::Dirty;
            }
        }
    }

    /// `remove(entity)` (spec §4.7): marks for deletion on the next `flush`, or forgets it outright
    /// if it was `New` and never flushed.
    pub fn remove(&mut self, entity: &SharedEntity) {
        let key = Self::key_of(entity);
        let is_new = self.tracked.get(&key).map(|t| t.status == Status::New).unwrap_or(false);
        if is_new {
            self.tracked.remove(&key);
        } else if let Some(tracked) = self.tracked.get_mut(&key) {
            tracked.status = Status::Removed;
        }
    }

    pub fn get_entity(&self, table: &str, pk: &str) -> Option<SharedEntity> {
        self.identity.get(table, pk)
    }

    /// Queues a pivot-row insert for a `BelongsToMany` relation. `parent` must already be tracked.
    pub fn attach(&mut self, relation: &str, parent: &SharedEntity, child: &SharedEntity) {
        self.relation_changes.push(RelationChange::Attach { relation: relation.to_string(), parent: parent.clone(), child: child.clone() });
    }

    /// Queues a pivot-row delete for a `BelongsToMany` relation.
    pub fn detach(&mut self, relation: &str, parent: &SharedEntity, child: &SharedEntity) {
        self.relation_changes.push(RelationChange::Detach { relation: relation.to_string(), parent: parent.clone(), child: child.clone() });
    }

    /// Queues setting a `HasMany` child's foreign key to point at `parent`.
    pub fn add_to_collection(&mut self, relation: &str, parent: &SharedEntity, child: &SharedEntity) {
        self.relation_changes.push(RelationChange::Add { relation: relation.to_string(), parent: parent.clone(), child: child.clone() });
    }

    /// Queues removing a `HasMany` child from `parent`'s collection, nulling its foreign key or
    /// deleting it outright per the relation's `cascade`.
    pub fn remove_from_collection(&mut self, relation: &str, parent: &SharedEntity, child: &SharedEntity) {
        self.relation_changes.push(RelationChange::Remove { relation: relation.to_string(), parent: parent.clone(), child: child.clone() });
    }

    pub fn enqueue_event(&mut self, event: Value) {
        self.events.push(event);
    }

    pub fn register_before_flush(&mut self, hook: impl FnMut() -> Result<()> + 'c) {
        self.before_flush.push(Box::new(hook));
    }

    pub fn register_after_flush(&mut self, hook: impl FnMut() -> Result<()> + 'c) {
        self.after_flush.push(Box::new(hook));
    }

    pub fn register_domain_event_handler(&mut self, handler: impl FnMut(&Value) + 'c) {
        self.event_handlers.push(Box::new(handler));
    }

    /// `flush()` (spec §4.7): beforeFlush → process entities → process relation changes (which may
    /// dirty more entities) → process entities again → afterFlush, wrapped in a transaction when
    /// the executor supports one. On any failure, rolls back and restores the identity map and
    /// tracked-entity table to their pre-flush state before rethrowing, so a retried `flush` starts
    /// clean (spec §5 "Cancellation").
    pub async fn flush(&mut self) -> Result<()> {
        let pre_tracked = self.tracked.clone();
        let pre_relation_changes = self.relation_changes.clone();
        let pre_identity = self.identity.clone();
        let pre_contents: HashMap<usize, Entity> = self.tracked.iter().map(|(k, t)| (*k, t.entity.borrow().clone())).collect();

        match self.flush_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.tracked = pre_tracked;
                self.relation_changes = pre_relation_changes;
                self.identity = pre_identity;
                for (key, content) in &pre_contents {
                    if let Some(tracked) = self.tracked.get(key) {
                        *tracked.entity.borrow_mut() = content.clone();
                    }
                }
                let _ = self.executor.rollback_transaction().await;
                Err(match err {
                    Error::TransactionAborted { .. } => err,
                    other => Error::transaction_aborted(other.to_string()),
                })
            }
        }
    }

    /// `saveChanges` (spec §4.7): `flush`, then drains the domain-event outbox through every
    /// registered handler — handlers run after commit, so they see a fully flushed state.
    pub async fn save_changes(&mut self) -> Result<Vec<Value>> {
        self.flush().await?;
        let events = std::mem::take(&mut self.events);
        for event in &events {
            for handler in &mut self.event_handlers {
                handler(event);
            }
        }
        Ok(events)
    }

    async fn flush_inner(&mut self) -> Result<()> {
        let transactional = self.executor.capabilities().transactions;
        if transactional {
            self.executor.begin_transaction().await.map_err(|e| Error::executor_failure("BEGIN", 0, e))?;
        }

        for hook in &mut self.before_flush {
            hook()?;
        }

        self.flush_entities().await?;
        self.flush_relation_changes().await?;
        self.flush_entities().await?;

        for hook in &mut self.after_flush {
            hook()?;
        }

        if transactional {
            self.executor.commit_transaction().await.map_err(|e| Error::executor_failure("COMMIT", 0, e))?;
        }
        Ok(())
    }

    async fn flush_entities(&mut self) -> Result<()> {
        for key in self.ordered_keys(Status::New, false)? {
            self.flush_insert(key).await?;
        }

        let dirty_keys: Vec<usize> = self.insertion_order.iter().filter(|k| self.tracked.get(k).map(|t| t.status == Status::Dirty).unwrap_or(false)).copied().collect();
        for key in dirty_keys {
            self.flush_update(key).await?;
        }

        for key in self.ordered_keys(Status::Removed, true)? {
            self.flush_delete(key).await?;
        }
        Ok(())
    }

    /// Entities of one status, grouped by table and ordered via [`crate::utils::toposort`] over
    /// `BelongsTo` foreign-key dependencies among the tables in this batch (spec §4.7.1). `reverse`
    /// flips parents-first into children-first, which deletes need. A same-pass cycle falls back
    /// to declaration order, matching §4.7.1's reasoning: inserts-before-updates-before-deletes
    /// already holds across the whole flush, so a cycle only bites when two new rows in it
    /// reference each other — a case the schema must break with a deferred/nullable FK, not one
    /// this ordering silently papers over.
    fn ordered_keys(&self, status: Status, reverse: bool) -> Result<Vec<usize>> {
        let mut tables = Vec::new();
        let mut seen_tables = HashSet::new();
        for key in &self.insertion_order {
            if let Some(t) = self.tracked.get(key) {
                if t.status == status && seen_tables.insert(t.table.clone()) {
                    tables.push(t.table.clone());
                }
            }
        }
        let mut table_order = self.table_dependency_order(&tables)?;
        if reverse {
            table_order.reverse();
        }

        let mut keys = Vec::new();
        for table in &table_order {
            for key in &self.insertion_order {
                if let Some(t) = self.tracked.get(key) {
                    if &t.table == table && t.status == status {
                        keys.push(*key);
                    }
                }
            }
        }
        Ok(keys)
    }

    fn table_dependency_order(&self, tables: &[String]) -> Result<Vec<String>> {
        let mut deps: Vec<(String, Vec<String>)> = Vec::new();
        for table in tables {
            let descriptor = self.catalog.require_table(table)?;
            let mut table_deps = Vec::new();
            for rel in &descriptor.relations {
                if let RelationKind::BelongsTo { target, .. } = &rel.kind {
                    if target != table && tables.contains(target) {
                        table_deps.push(target.clone());
                    }
                }
            }
            deps.push((table.clone(), table_deps));
        }
        match toposort(&deps) {
            Some(order) => Ok(order.into_iter().cloned().collect()),
            None => Ok(tables.to_vec()),
        }
    }

    async fn flush_insert(&mut self, key: usize) -> Result<()> {
        let (table, shared) = {
            let tracked = self.tracked.get(&key).expect("tracked entity vanished mid-flush");
            (tracked.table.clone(), tracked.entity.clone())
        };
        let descriptor = self.catalog.require_table(&table)?;
        if let Some(hook) = &descriptor.hooks.before_insert {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        let pk_column = self.primary_key_column(&table)?;
        let assignments: Vec<(String, Operand)> = {
            let entity = shared.borrow();
            descriptor
                .columns
                .iter()
                .filter_map(|c| {
                    let value = get(&entity, &c.name);
                    if value.is_null() {
                        None
                    } else {
                        Some((c.name.clone(), Operand::from(value_to_literal(&value))))
                    }
                })
                .collect()
        };

        let mut builder = InsertBuilder::new(self.catalog, &table)?.row(assignments)?;
        let identity_retrieval = self.dialect.handler().identity_retrieval(&pk_column);
        if matches!(identity_retrieval, IdentityRetrieval::Returning(_) | IdentityRetrieval::Output(_)) {
            builder = builder.returning(vec![pk_column.clone()]);
        }
        let compiled = builder.compile(self.dialect)?;
        let result = self
            .executor
            .execute_sql(&compiled.sql, &compiled.params)
            .await
            .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;

        let mut generated_pk = match &identity_retrieval {
            IdentityRetrieval::Returning(_) | IdentityRetrieval::Output(_) => {
                result.column_index(&pk_column).and_then(|i| result.rows.first().map(|row| row[i].clone()))
            }
            IdentityRetrieval::FollowUpQuery(sql) => {
                let follow_up = self.executor.execute_sql(sql, &[]).await.map_err(|e| Error::executor_failure(sql.clone(), 0, e))?;
                follow_up.rows.first().and_then(|row| row.first().cloned())
            }
        };
        if generated_pk.is_none() {
            generated_pk = self.executor.last_insert_id().await.map_err(|e| Error::executor_failure("last_insert_id()", 0, e))?;
        }

        if let Some(lit) = &generated_pk {
            if get(&shared.borrow(), &pk_column).is_null() {
                shared.borrow_mut().insert(pk_column.clone(), literal_to_value(lit));
            }
        }

        if let Some(hook) = &descriptor.hooks.after_insert {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        let pk = pk_string(&get(&shared.borrow(), &pk_column))
            .ok_or_else(|| Error::invalid_schema(format!("insert into `{table}` produced no primary key value")))?;
        self.identity.insert(&table, pk.clone(), shared.clone());
        if let Some(tracked) = self.tracked.get_mut(&key) {
            tracked.pk = Some(pk);
            tracked.status = Status::Managed;
            tracked.original_snapshot = Some(shared.borrow().clone());
        }
        Ok(())
    }

    async fn flush_update(&mut self, key: usize) -> Result<()> {
        let (table, shared, pk, original) = {
            let tracked = self.tracked.get(&key).expect("tracked entity vanished mid-flush");
            (tracked.table.clone(), tracked.entity.clone(), tracked.pk.clone(), tracked.original_snapshot.clone())
        };
        let pk = pk.ok_or_else(|| Error::invalid_schema(format!("dirty entity on table `{table}` has no tracked primary key")))?;
        let descriptor = self.catalog.require_table(&table)?;

        if let Some(hook) = &descriptor.hooks.before_update {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        let pk_column = self.primary_key_column(&table)?;
        let original = original.unwrap_or_default();
        let changed: Vec<(String, Operand)> = {
            let entity = shared.borrow();
            descriptor
                .columns
                .iter()
                .filter(|c| c.name != pk_column)
                .filter_map(|c| {
                    let current = get(&entity, &c.name);
                    let previous = original.get(&c.name).cloned().unwrap_or(Value::Null);
                    (current != previous).then(|| (c.name.clone(), Operand::from(value_to_literal(&current))))
                })
                .collect()
        };

        if changed.is_empty() {
            if let Some(tracked) = self.tracked.get_mut(&key) {
                tracked.status = Status::Managed;
            }
            return Ok(());
        }

        let mut builder = UpdateBuilder::new(self.catalog, &table)?;
        for (column, value) in changed {
            builder = builder.set(column, value)?;
        }
        let pk_value = get(&shared.borrow(), &pk_column);
        builder = builder.where_(Expression::eq(Operand::column(&table, &pk_column), Operand::from(value_to_literal(&pk_value))));
        let compiled = builder.compile(self.dialect)?;
        self.executor
            .execute_sql(&compiled.sql, &compiled.params)
            .await
            .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;

        if let Some(hook) = &descriptor.hooks.after_update {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        if let Some(tracked) = self.tracked.get_mut(&key) {
            tracked.status = Status::Managed;
            tracked.original_snapshot = Some(shared.borrow().clone());
        }
        let _ = pk;
        Ok(())
    }

    async fn flush_delete(&mut self, key: usize) -> Result<()> {
        let (table, shared, pk) = {
            let tracked = self.tracked.get(&key).expect("tracked entity vanished mid-flush");
            (tracked.table.clone(), tracked.entity.clone(), tracked.pk.clone())
        };
        let pk = match pk {
            Some(pk) => pk,
            None => {
                self.tracked.remove(&key);
                return Ok(());
            }
        };
        let descriptor = self.catalog.require_table(&table)?;
        let pk_column = self.primary_key_column(&table)?;

        if let Some(hook) = &descriptor.hooks.before_delete {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        let pk_value = get(&shared.borrow(), &pk_column);
        let builder = DeleteBuilder::new(self.catalog, &table)?
            .where_(Expression::eq(Operand::column(&table, &pk_column), Operand::from(value_to_literal(&pk_value))));
        let compiled = builder.compile(self.dialect)?;
        self.executor
            .execute_sql(&compiled.sql, &compiled.params)
            .await
            .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;

        if let Some(hook) = &descriptor.hooks.after_delete {
            let mut entity_mut = shared.borrow_mut();
            hook(&mut *entity_mut)?;
        }

        self.identity.remove(&table, &pk);
        self.tracked.remove(&key);
        Ok(())
    }

    async fn flush_relation_changes(&mut self) -> Result<()> {
        let changes = std::mem::take(&mut self.relation_changes);
        for change in changes {
            match change {
                RelationChange::Attach { relation, parent, child } => self.apply_attach(&relation, &parent, &child).await?,
                RelationChange::Detach { relation, parent, child } => self.apply_detach(&relation, &parent, &child).await?,
                RelationChange::Add { relation, parent, child } => self.apply_add(&relation, &parent, &child)?,
                RelationChange::Remove { relation, parent, child } => self.apply_remove(&relation, &parent, &child)?,
            }
        }
        Ok(())
    }

    async fn apply_attach(&mut self, relation_name: &str, parent: &SharedEntity, child: &SharedEntity) -> Result<()> {
        let table = self.table_of(parent)?;
        let descriptor = self.catalog.require_table(&table)?;
        let rel = descriptor.relation(relation_name).ok_or_else(|| Error::unknown_relation(table.clone(), relation_name))?;
        let RelationKind::BelongsToMany { pivot_table, pivot_fk_root, pivot_fk_target, .. } = &rel.kind else {
            return Err(Error::invalid_schema(format!(
                "relation `{relation_name}` on `{table}` is not a BelongsToMany; attach/detach need a pivot table"
            )));
        };
        let target = rel.kind.target();
        let parent_pk_column = self.primary_key_column(&table)?;
        let target_pk_column = self.primary_key_column(target)?;
        let parent_pk = get(&parent.borrow(), &parent_pk_column);
        let child_pk = get(&child.borrow(), &target_pk_column);

        let row = InsertRow(vec![
            (pivot_fk_root.clone(), Operand::from(value_to_literal(&parent_pk))),
            (pivot_fk_target.clone(), Operand::from(value_to_literal(&child_pk))),
        ]);
        let insert = Insert { table: TableLike::Table(TableRef::new(pivot_table.clone())), values: InsertValues::Rows(vec![row]), returning: vec![] };
        let compiled = compiler::compile_insert(&insert, self.dialect)?;
        self.executor
            .execute_sql(&compiled.sql, &compiled.params)
            .await
            .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;
        Ok(())
    }

    async fn apply_detach(&mut self, relation_name: &str, parent: &SharedEntity, child: &SharedEntity) -> Result<()> {
        let table = self.table_of(parent)?;
        let descriptor = self.catalog.require_table(&table)?;
        let rel = descriptor.relation(relation_name).ok_or_else(|| Error::unknown_relation(table.clone(), relation_name))?;
        let RelationKind::BelongsToMany { pivot_table, pivot_fk_root, pivot_fk_target, .. } = &rel.kind else {
            return Err(Error::invalid_schema(format!(
                "relation `{relation_name}` on `{table}` is not a BelongsToMany; attach/detach need a pivot table"
            )));
        };
        let target = rel.kind.target();
        let parent_pk_column = self.primary_key_column(&table)?;
        let target_pk_column = self.primary_key_column(target)?;
        let parent_pk = get(&parent.borrow(), &parent_pk_column);
        let child_pk = get(&child.borrow(), &target_pk_column);

        let where_ = Expression::and(vec![
            Expression::eq(Operand::column(pivot_table, pivot_fk_root), Operand::from(value_to_literal(&parent_pk))),
            Expression::eq(Operand::column(pivot_table, pivot_fk_target), Operand::from(value_to_literal(&child_pk))),
        ]);
        let delete = Delete { from: TableLike::Table(TableRef::new(pivot_table.clone())), where_: Some(where_), returning: vec![] };
        let compiled = compiler::compile_delete(&delete, self.dialect)?;
        self.executor
            .execute_sql(&compiled.sql, &compiled.params)
            .await
            .map_err(|e| Error::executor_failure(compiled.sql.clone(), compiled.params.len(), e))?;
        Ok(())
    }

    fn apply_add(&mut self, relation_name: &str, parent: &SharedEntity, child: &SharedEntity) -> Result<()> {
        let table = self.table_of(parent)?;
        let descriptor = self.catalog.require_table(&table)?;
        let rel = descriptor.relation(relation_name).ok_or_else(|| Error::unknown_relation(table.clone(), relation_name))?;
        let RelationKind::HasMany { foreign_key, local_key, .. } = &rel.kind else {
            return Err(Error::invalid_schema(format!("relation `{relation_name}` on `{table}` is not a HasMany; add/remove need a foreign key")));
        };
        let parent_key = get(&parent.borrow(), local_key);
        child.borrow_mut().insert(foreign_key.clone(), parent_key);
        self.mark_dirty(child);
        Ok(())
    }

    fn apply_remove(&mut self, relation_name: &str, parent: &SharedEntity, child: &SharedEntity) -> Result<()> {
        let table = self.table_of(parent)?;
        let descriptor = self.catalog.require_table(&table)?;
        let rel = descriptor.relation(relation_name).ok_or_else(|| Error::unknown_relation(table.clone(), relation_name))?;
        let RelationKind::HasMany { foreign_key, cascade, .. } = &rel.kind else {
            return Err(Error::invalid_schema(format!("relation `{relation_name}` on `{table}` is not a HasMany; add/remove need a foreign key")));
        };
        match cascade {
            Cascade::None => {
                child.borrow_mut().insert(foreign_key.clone(), Value::Null);
                self.mark_dirty(child);
            }
            Cascade::Remove | Cascade::All => self.remove(child),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::dialect::Dialect;
    use crate::executor::testing::ScriptedExecutor;
    use crate::executor::ResultSet;
    use crate::schema::column;
    use crate::schema::{IdentityStrategy, RelationDescriptor, TableDescriptor};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "users",
                    vec![column::bigint("id").primary_key().auto_increment(IdentityStrategy::ByDefault), column::varchar("name", 255)],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
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
            .declare_table(TableDescriptor::define("tags", vec![column::bigint("id").primary_key(), column::varchar("label", 64)], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .attach_relations(
                "users",
                vec![
                    RelationDescriptor::has_many("orders", "orders", "users", "id", Cascade::None),
                    RelationDescriptor::belongs_to_many("tags", "tags", "user_tags", "users", "tags", Cascade::None),
                ],
            )
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn persist_and_flush_inserts_row_and_backfills_generated_pk() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![ResultSet::new(vec!["id".into()], vec![vec![Literal::Int(1)]])]);
        let mut session = Session::new(&catalog, &executor, Dialect::Postgres);

        let mut entity = Entity::new();
        entity.insert("name".into(), Value::from("ada"));
        let shared = session.persist("users", entity).unwrap();

        session.flush().await.unwrap();

        assert_eq!(get(&shared.borrow(), "id"), Value::from(1));
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
        assert!(executor.calls.lock().unwrap()[0].0.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn dirty_entity_flush_updates_only_changed_columns() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![]);
        let mut session = Session::new(&catalog, &executor, Dialect::Postgres);

        let mut entity = Entity::new();
        entity.insert("id".into(), Value::from(1));
        entity.insert("name".into(), Value::from("ada"));
        let handle = Rc::new(RefCell::new(entity));
        let tracked = session.track("users", handle).unwrap();

        tracked.borrow_mut().insert("name".into(), Value::from("ada lovelace"));
        session.mark_dirty(&tracked);
        session.flush().await.unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("UPDATE"));
        assert!(calls[0].0.contains("\"name\""));
    }

    #[tokio::test]
    async fn removing_a_brand_new_entity_forgets_it_without_a_query() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![]);
        let mut session = Session::new(&catalog, &executor, Dialect::Postgres);

        let mut entity = Entity::new();
        entity.insert("name".into(), Value::from("ghost"));
        let shared = session.persist("users", entity).unwrap();
        session.remove(&shared);
        session.flush().await.unwrap();

        assert_eq!(executor.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn attaching_a_belongs_to_many_relation_inserts_one_pivot_row() {
        let catalog = catalog();
        let executor = ScriptedExecutor::new(vec![]);
        let mut session = Session::new(&catalog, &executor, Dialect::Postgres);

        let mut user = Entity::new();
        user.insert("id".into(), Value::from(1));
        let user = session.track("users", Rc::new(RefCell::new(user))).unwrap();

        let mut tag = Entity::new();
        tag.insert("id".into(), Value::from(9));
        let tag = session.track("tags", Rc::new(RefCell::new(tag))).unwrap();

        session.attach("tags", &user, &tag);
        session.flush().await.unwrap();

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("INSERT INTO \"user_tags\""));
    }

    struct FailingExecutor;

    #[async_trait::async_trait]
    impl DbExecutor for FailingExecutor {
        async fn execute_sql(&self, _sql: &str, _params: &[Literal]) -> anyhow::Result<ResultSet> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_and_leaves_the_entity_retryable() {
        let catalog = catalog();
        let executor = FailingExecutor;
        let mut session = Session::new(&catalog, &executor, Dialect::Postgres);

        let mut entity = Entity::new();
        entity.insert("name".into(), Value::from("ada"));
        let shared = session.persist("users", entity).unwrap();

        let err = session.flush().await.unwrap_err();
        assert!(matches!(err, Error::TransactionAborted { .. }));
        assert!(get(&shared.borrow(), "id").is_null());
    }
}
