//! Content Map Provider
//!
//! Owns one lazily built [`ContentMap`] behind a [`GraphLock`] and keeps it
//! in step with the entity store.
//!
//! Remote calls always happen outside the lock. Each mutation takes the
//! write scope once, after its data is in hand, so a store fault never
//! leaves a partially applied change behind.

use contentmap_config::{CacheConfig, ConfigError, ContentMapConfig};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::{
    GraphLock, LockContext, LockError, LockMode, LockStateSnapshot, DEFAULT_LOCK_TIMEOUT,
};
use crate::map::{ContentMap, ContentMapStats};
use crate::node::{AttributeValue, EntityRecord, EntityReference, NodeId};
use crate::schema::{
    Condition, EffectiveSchema, EntityType, FetchSpec, InstalledSolutions, ManyRelationshipDefinition,
    QueryParameters, QueryPlanner, SchemaCatalog, SchemaError, STATE_CODE_ATTRIBUTE,
};
use crate::store::{EntityStore, StoreError};

/// Errors that can occur during content map operations
#[derive(Debug, Error)]
pub enum ContentMapError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Runtime settings of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSettings {
    /// How long a read or write scope waits for the lock
    pub lock_timeout: Duration,
    /// Threads used for the initial fetch (0 = rayon's global pool)
    pub parallelism: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            parallelism: 0,
        }
    }
}

impl From<&CacheConfig> for ProviderSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            parallelism: config.parallelism,
        }
    }
}

/// What a refresh did to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The node was replaced with the fetched record.
    Replaced(EntityReference),
    /// The record is inactive; the node was degraded to a reference.
    Deactivated(NodeId),
    /// The record no longer exists; the node was removed.
    Removed(NodeId),
    /// The entity type is not part of the schema.
    Ignored(NodeId),
    /// No content map is installed yet. A build in flight applies the
    /// change once its map is installed.
    NotLoaded(NodeId),
}

impl RefreshOutcome {
    pub fn id(&self) -> &NodeId {
        match self {
            RefreshOutcome::Replaced(reference) => &reference.id,
            RefreshOutcome::Deactivated(id)
            | RefreshOutcome::Removed(id)
            | RefreshOutcome::Ignored(id)
            | RefreshOutcome::NotLoaded(id) => id,
        }
    }
}

/// Builds, guards and refreshes the content map of one scope.
pub struct ContentMapProvider {
    store: Arc<dyn EntityStore>,
    schema: Arc<EffectiveSchema>,
    parameters: QueryParameters,
    settings: ProviderSettings,
    map: GraphLock<Option<ContentMap>>,
    /// Serializes builds and clears
    loading: Mutex<()>,
    loaded: AtomicBool,
    pending: Mutex<PendingChanges>,
}

impl ContentMapProvider {
    pub fn new(
        store: Arc<dyn EntityStore>,
        schema: Arc<EffectiveSchema>,
        parameters: QueryParameters,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            store,
            schema,
            parameters,
            map: GraphLock::with_timeout(None, settings.lock_timeout),
            settings,
            loading: Mutex::new(()),
            loaded: AtomicBool::new(false),
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    /// Create a provider from configuration.
    ///
    /// Resolves the installed solutions against `catalog`, scopes queries to
    /// the configured website and builds the map right away when
    /// `load_on_startup` is set.
    pub fn from_config(
        store: Arc<dyn EntityStore>,
        catalog: &SchemaCatalog,
        config: &ContentMapConfig,
    ) -> Result<Self, ContentMapError> {
        config.validate()?;

        let installed = InstalledSolutions::parse(&config.solutions.installed)?;
        let schema = catalog.effective(&installed)?;
        let parameters = match config.scope.website_id {
            Some(website_id) => QueryParameters::for_website(website_id),
            None => QueryParameters::new(),
        };

        let provider = Self::new(
            store,
            Arc::new(schema),
            parameters,
            ProviderSettings::from(&config.cache),
        );
        if config.cache.load_on_startup {
            provider.load(&LockContext::new("load on startup"))?;
        }
        Ok(provider)
    }

    pub fn schema(&self) -> &EffectiveSchema {
        &self.schema
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }

    pub fn settings(&self) -> ProviderSettings {
        self.settings
    }

    /// Look up an entity type of the schema.
    pub fn entity_type(&self, logical_name: &str) -> Result<&EntityType, ContentMapError> {
        self.schema
            .entity(logical_name)
            .ok_or_else(|| ContentMapError::UnknownEntityType(logical_name.to_string()))
    }

    // =========================================================================
    // Scoped access
    // =========================================================================

    /// Run `f` inside a read scope, building the map first if needed.
    pub fn read<R>(
        &self,
        ctx: &LockContext,
        f: impl FnOnce(&ContentMap) -> R,
    ) -> Result<R, ContentMapError> {
        let mut f = Some(f);
        loop {
            self.ensure_loaded(ctx)?;
            let result = self.map.read(ctx, |slot| {
                let map = slot.as_ref()?;
                f.take().map(|f| f(map))
            })?;
            // A clear between the build and the scope leaves nothing to read; build again.
            if let Some(result) = result {
                return Ok(result);
            }
        }
    }

    /// Run `f` inside the write scope, building the map first if needed.
    pub fn write<R>(
        &self,
        ctx: &LockContext,
        f: impl FnOnce(&mut ContentMap) -> R,
    ) -> Result<R, ContentMapError> {
        let mut f = Some(f);
        loop {
            self.ensure_loaded(ctx)?;
            let result = self.map.write(ctx, |slot| {
                let map = slot.as_mut()?;
                f.take().map(|f| f(map))
            })?;
            if let Some(result) = result {
                return Ok(result);
            }
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Build the map unless it is already built.
    ///
    /// Uses double-checked locking so that concurrent first accesses build
    /// the map once. Callers arriving during a build wait for it at most the
    /// lock timeout.
    pub fn ensure_loaded(&self, ctx: &LockContext) -> Result<(), ContentMapError> {
        if self.is_loaded() {
            return Ok(());
        }

        let _guard = self.lock_loading(ctx)?;
        if self.is_loaded() {
            return Ok(());
        }
        self.build(ctx).map(|_| ())
    }

    /// Fetch every entity type and install a freshly built map.
    ///
    /// Returns the number of nodes in the new map.
    pub fn load(&self, ctx: &LockContext) -> Result<usize, ContentMapError> {
        let _guard = self.lock_loading(ctx)?;
        self.build(ctx)
    }

    /// Drop the map; the next access builds it again.
    pub fn clear(&self, ctx: &LockContext) -> Result<(), ContentMapError> {
        let _guard = self.lock_loading(ctx)?;
        self.map.write(ctx, |slot| {
            *slot = None;
            self.loaded.store(false, Ordering::Release);
        })?;
        info!("Content map cleared ({})", ctx.operation);
        Ok(())
    }

    fn lock_loading(&self, ctx: &LockContext) -> Result<MutexGuard<'_, ()>, LockError> {
        self.loading
            .try_lock_for(self.settings.lock_timeout)
            .ok_or_else(|| self.map.timed_out(ctx, LockMode::Write))
    }

    fn build(&self, ctx: &LockContext) -> Result<usize, ContentMapError> {
        let started = Instant::now();
        let tracking = Tracking::start(&self.pending);
        let queries = self.schema.queries(&self.parameters);
        debug!("Building content map from {} queries", queries.len());

        let batches = self.fetch_all(&queries)?;
        let record_count: usize = batches.iter().map(Vec::len).sum();

        let mut map = ContentMap::new(Arc::clone(&self.schema));
        let node_count = map.add_range(batches.into_iter().flatten());

        self.map.write(ctx, |slot| {
            *slot = Some(map);
            self.loaded.store(true, Ordering::Release);
        })?;

        info!(
            "Content map loaded: {} nodes from {} records across {} entity types in {:?}",
            node_count,
            record_count,
            queries.len(),
            started.elapsed()
        );

        // Changes reported while fetching may predate the installed snapshot.
        let changes = tracking.finish();
        if !changes.is_empty() {
            debug!("Replaying {} changes received during the build", changes.len());
        }
        for change in &changes {
            self.apply_now(ctx, change)?;
        }
        Ok(node_count)
    }

    fn fetch_all(
        &self,
        queries: &[(String, FetchSpec)],
    ) -> Result<Vec<Vec<EntityRecord>>, ContentMapError> {
        let run = || -> Result<Vec<Vec<EntityRecord>>, StoreError> {
            queries
                .par_iter()
                .map(|(logical_name, fetch)| {
                    let records = self.store.query(fetch)?;
                    debug!("Fetched {} {} records", records.len(), logical_name);
                    Ok(records)
                })
                .collect()
        };

        let batches = if self.settings.parallelism > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.parallelism)
                .build()?
                .install(run)
        } else {
            run()
        };
        Ok(batches?)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn lock_state(&self) -> LockStateSnapshot {
        self.map.state()
    }

    /// Statistics of the current map, without building it.
    pub fn stats(&self, ctx: &LockContext) -> Result<Option<ContentMapStats>, ContentMapError> {
        Ok(self.map.read(ctx, |slot| slot.as_ref().map(ContentMap::stats))?)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Bring one node in line with the store.
    ///
    /// A missing record removes the node, an inactive one deactivates it and
    /// anything else replaces it. Store faults propagate and leave the map
    /// untouched.
    pub fn refresh(&self, ctx: &LockContext, id: &NodeId) -> Result<RefreshOutcome, ContentMapError> {
        if !self.schema.contains_entity(&id.logical_name) {
            warn!("Ignoring refresh of {}: unknown entity type", id);
            return Ok(RefreshOutcome::Ignored(id.clone()));
        }

        let outcome = self
            .submit(ctx, Change::Refresh(vec![id.clone()]))?
            .pop()
            .unwrap_or_else(|| RefreshOutcome::NotLoaded(id.clone()));
        debug!("Refreshed {}: {:?}", id, outcome);
        Ok(outcome)
    }

    /// Refresh many nodes with one round trip per entity type.
    ///
    /// Outcomes are returned in the order of `ids`.
    pub fn refresh_many(
        &self,
        ctx: &LockContext,
        ids: &[NodeId],
    ) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        for id in ids {
            if !self.schema.contains_entity(&id.logical_name) {
                warn!("Ignoring refresh of {}: unknown entity type", id);
            }
        }

        let outcomes = self.submit(ctx, Change::Refresh(ids.to_vec()))?;
        debug!("Refreshed {} ids", outcomes.len());
        Ok(outcomes)
    }

    /// Apply `change` to the installed map.
    ///
    /// While a build is in flight the change is also queued, and replayed
    /// once the new map is installed. Without an installed map nothing is
    /// fetched.
    fn submit(&self, ctx: &LockContext, change: Change) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        {
            let mut pending = self.pending.lock();
            let loaded = self.is_loaded();
            if pending.building {
                pending.changes.push(change.clone());
            }
            if !loaded {
                debug!("Deferring {:?}: content map not loaded", change);
                return Ok(self.unapplied(&change));
            }
        }
        self.apply_now(ctx, &change)
    }

    /// Fetch what `change` needs and apply it in one write scope.
    fn apply_now(&self, ctx: &LockContext, change: &Change) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        let fetched = self.fetch_change(change)?;
        Ok(self.map.write(ctx, |slot| match slot.as_mut() {
            Some(map) => self.apply_fetched(map, fetched),
            None => self.unapplied(change),
        })?)
    }

    fn unapplied(&self, change: &Change) -> Vec<RefreshOutcome> {
        match change {
            Change::Refresh(ids) => ids
                .iter()
                .map(|id| {
                    if self.schema.contains_entity(&id.logical_name) {
                        RefreshOutcome::NotLoaded(id.clone())
                    } else {
                        RefreshOutcome::Ignored(id.clone())
                    }
                })
                .collect(),
            Change::Intersect { .. } => Vec::new(),
        }
    }

    fn fetch_change(&self, change: &Change) -> Result<Fetched, ContentMapError> {
        match change {
            Change::Refresh(ids) => {
                let mut by_type: BTreeMap<&str, BTreeSet<Uuid>> = BTreeMap::new();
                for id in ids {
                    if self.schema.contains_entity(&id.logical_name) {
                        by_type.entry(id.logical_name.as_str()).or_default().insert(id.id);
                    }
                }

                let mut records: HashMap<NodeId, EntityRecord> = HashMap::new();
                for (logical_name, type_ids) in by_type {
                    let entity = self.entity_type(logical_name)?;
                    let type_ids: Vec<Uuid> = type_ids.into_iter().collect();
                    for record in self.fetch(entity, &type_ids)? {
                        records.insert(record.node_id(), record);
                    }
                }
                Ok(Fetched::Refresh {
                    ids: ids.clone(),
                    records,
                })
            }
            Change::Intersect {
                target,
                relationship,
                related,
                associate,
            } => {
                let Some(many) = self.schema.many_relationship(relationship) else {
                    return Ok(Fetched::Nothing);
                };
                let Some(confirmed) = self.intersect_records(many, target, related)? else {
                    return Ok(Fetched::Nothing);
                };
                if *associate {
                    return Ok(Fetched::Associate(confirmed));
                }
                Ok(Fetched::Disassociate {
                    target: target.clone(),
                    relationship: relationship.clone(),
                    related: related.iter().cloned().collect(),
                    confirmed: confirmed
                        .into_iter()
                        .map(|record| (record.node_id(), record))
                        .collect(),
                })
            }
        }
    }

    fn apply_fetched(&self, map: &mut ContentMap, fetched: Fetched) -> Vec<RefreshOutcome> {
        match fetched {
            Fetched::Refresh { ids, records } => ids
                .iter()
                .map(|id| match self.schema.entity(&id.logical_name) {
                    Some(entity) => apply(map, entity, id, records.get(id).cloned()),
                    None => RefreshOutcome::Ignored(id.clone()),
                })
                .collect(),
            Fetched::Associate(confirmed) => {
                let mut outcomes = Vec::with_capacity(confirmed.len());
                for record in confirmed {
                    if let Some(node) = map.replace(record) {
                        outcomes.push(RefreshOutcome::Replaced(node.to_entity_reference()));
                    }
                }
                outcomes
            }
            Fetched::Disassociate {
                target,
                relationship,
                related,
                mut confirmed,
            } => {
                let Some(many) = self.schema.many_relationship(&relationship) else {
                    return Vec::new();
                };
                let Some((target_side, other_side)) = many.oriented(&target.logical_name) else {
                    return Vec::new();
                };

                let linked: Vec<NodeId> = map
                    .nodes(&many.intersect_entity)
                    .filter(|node| {
                        node.to_one(&target_side.relationship)
                            .is_some_and(|link| link.target() == &target)
                            && node
                                .to_one(&other_side.relationship)
                                .is_some_and(|link| related.contains(link.target()))
                    })
                    .map(|node| node.id().clone())
                    .collect();

                let mut outcomes = Vec::with_capacity(linked.len());
                for id in linked {
                    match confirmed.remove(&id) {
                        Some(record) => {
                            if let Some(node) = map.replace(record) {
                                outcomes.push(RefreshOutcome::Replaced(node.to_entity_reference()));
                            }
                        }
                        None => {
                            map.remove(&id);
                            outcomes.push(RefreshOutcome::Removed(id));
                        }
                    }
                }
                outcomes
            }
            Fetched::Nothing => Vec::new(),
        }
    }

    /// Fetch current records of one type; missing ids are absent from the result.
    fn fetch(&self, entity: &EntityType, ids: &[Uuid]) -> Result<Vec<EntityRecord>, StoreError> {
        if entity.check_before_refresh {
            let fetch = QueryPlanner::create_id_query(entity, &self.parameters, ids);
            return self.store.query(&fetch);
        }

        let columns = entity.fetch_columns();
        match ids {
            [id] => match self
                .store
                .retrieve(&NodeId::new(&entity.logical_name, *id), &columns)
            {
                Ok(record) => Ok(vec![record]),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e),
            },
            _ => self.store.retrieve_many(&entity.logical_name, ids, &columns),
        }
    }

    // =========================================================================
    // Associate / disassociate
    // =========================================================================

    /// Apply an association between `target` and `related` made in the store.
    ///
    /// For a many-to-many relationship only the intersect records the store
    /// confirms are merged. For an N:1 relationship the referencing records
    /// are refreshed.
    pub fn associate(
        &self,
        ctx: &LockContext,
        target: &NodeId,
        relationship: &str,
        related: &[NodeId],
    ) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        self.change_relationship(ctx, target, relationship, related, true)
    }

    /// Apply a disassociation between `target` and `related` made in the store.
    ///
    /// For a many-to-many relationship, intersect nodes linking `target` to
    /// one of `related` are removed unless the store still confirms them.
    /// For an N:1 relationship the referencing records are refreshed.
    pub fn disassociate(
        &self,
        ctx: &LockContext,
        target: &NodeId,
        relationship: &str,
        related: &[NodeId],
    ) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        self.change_relationship(ctx, target, relationship, related, false)
    }

    fn change_relationship(
        &self,
        ctx: &LockContext,
        target: &NodeId,
        relationship: &str,
        related: &[NodeId],
        associate: bool,
    ) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        let Some(many) = self.schema.many_relationship(relationship) else {
            return self.refresh_referencing(ctx, target, relationship, related);
        };
        if many.oriented(&target.logical_name).is_none() {
            warn!("{} is not part of relationship {}", target, relationship);
            return Ok(Vec::new());
        }

        let outcomes = self.submit(
            ctx,
            Change::Intersect {
                target: target.clone(),
                relationship: relationship.to_string(),
                related: related.to_vec(),
                associate,
            },
        )?;
        debug!(
            "{} {} through {}: {} intersect nodes updated",
            if associate { "Associated" } else { "Disassociated" },
            target,
            relationship,
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Intersect records the store holds between `target` and `related`.
    ///
    /// Returns `None` when `target` is on neither side of the relationship.
    fn intersect_records(
        &self,
        many: &ManyRelationshipDefinition,
        target: &NodeId,
        related: &[NodeId],
    ) -> Result<Option<Vec<EntityRecord>>, ContentMapError> {
        let Some((target_side, other_side)) = many.oriented(&target.logical_name) else {
            return Ok(None);
        };

        let related_ids: Vec<AttributeValue> = related
            .iter()
            .filter(|id| id.logical_name == other_side.entity)
            .map(|id| AttributeValue::Guid(id.id))
            .collect();
        if related_ids.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let intersect = self.entity_type(&many.intersect_entity)?;
        let mut fetch = FetchSpec::new(&intersect.logical_name)
            .with_attributes(intersect.fetch_columns())
            .with_filter(Condition::equal(&target_side.intersect_attribute, target.id))
            .with_filter(Condition::in_values(&other_side.intersect_attribute, related_ids));
        if let Some(state) = intersect.active_state {
            fetch = fetch.with_filter(Condition::equal(
                STATE_CODE_ATTRIBUTE,
                AttributeValue::Choice(state),
            ));
        }
        fetch.distinct = true;
        fetch.skip_cache = true;

        Ok(Some(self.store.query(&fetch)?))
    }

    /// Refresh the records on the referencing side of an N:1 relationship.
    fn refresh_referencing(
        &self,
        ctx: &LockContext,
        target: &NodeId,
        relationship: &str,
        related: &[NodeId],
    ) -> Result<Vec<RefreshOutcome>, ContentMapError> {
        let Some(definition) = self.schema.relationship(relationship) else {
            warn!("Ignoring change to unknown relationship {}", relationship);
            return Ok(Vec::new());
        };

        let ids: Vec<NodeId> = std::iter::once(target)
            .chain(related)
            .filter(|id| id.logical_name == definition.referencing_entity)
            .cloned()
            .collect();
        self.refresh_many(ctx, &ids)
    }
}

/// A store change that has to reach the map.
#[derive(Debug, Clone)]
enum Change {
    Refresh(Vec<NodeId>),
    /// Many-to-many intersect records created or removed between `target` and `related`
    Intersect {
        target: NodeId,
        relationship: String,
        related: Vec<NodeId>,
        associate: bool,
    },
}

/// Store data for a [`Change`], ready to apply in the write scope.
enum Fetched {
    Refresh {
        ids: Vec<NodeId>,
        records: HashMap<NodeId, EntityRecord>,
    },
    Associate(Vec<EntityRecord>),
    Disassociate {
        target: NodeId,
        relationship: String,
        related: BTreeSet<NodeId>,
        confirmed: HashMap<NodeId, EntityRecord>,
    },
    Nothing,
}

/// Changes reported while a build is in flight.
#[derive(Debug, Default)]
struct PendingChanges {
    building: bool,
    changes: Vec<Change>,
}

/// Marks a build in flight; stops tracking when dropped, even on error or panic.
struct Tracking<'a>(&'a Mutex<PendingChanges>);

impl<'a> Tracking<'a> {
    fn start(pending: &'a Mutex<PendingChanges>) -> Self {
        let mut state = pending.lock();
        state.building = true;
        state.changes.clear();
        Self(pending)
    }

    /// Stop tracking and hand over the changes seen so far.
    fn finish(self) -> Vec<Change> {
        let mut state = self.0.lock();
        state.building = false;
        std::mem::take(&mut state.changes)
    }
}

impl Drop for Tracking<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.building = false;
        state.changes.clear();
    }
}

impl std::fmt::Debug for ContentMapProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentMapProvider")
            .field("parameters", &self.parameters)
            .field("settings", &self.settings)
            .field("loaded", &self.is_loaded())
            .field("lock", &self.map)
            .finish()
    }
}

/// Apply one fetched record (or its absence) to the map.
fn apply(
    map: &mut ContentMap,
    entity: &EntityType,
    id: &NodeId,
    record: Option<EntityRecord>,
) -> RefreshOutcome {
    match record {
        None => {
            map.remove(id);
            RefreshOutcome::Removed(id.clone())
        }
        Some(record) if !entity.is_active(&record) => {
            map.deactivate(id);
            RefreshOutcome::Deactivated(id.clone())
        }
        Some(record) => match map.replace(record) {
            Some(node) => RefreshOutcome::Replaced(node.to_entity_reference()),
            None => RefreshOutcome::Ignored(id.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{entities, relationships as rel, SolutionVersion};
    use crate::store::MemoryStore;

    fn website_id() -> Uuid {
        Uuid::from_u128(1)
    }

    fn website() -> EntityRecord {
        EntityRecord::new(entities::WEBSITE, website_id())
            .with("adx_name", "Portal")
            .with("statecode", AttributeValue::Choice(0))
    }

    fn page(id: u128, parent: Option<u128>) -> EntityRecord {
        let mut record = EntityRecord::new(entities::WEB_PAGE, Uuid::from_u128(id))
            .with("adx_name", format!("Page {id}"))
            .with("statecode", AttributeValue::Choice(0))
            .with_reference("adx_websiteid", entities::WEBSITE, website_id());
        if let Some(parent) = parent {
            record = record.with_reference(
                "adx_parentpageid",
                entities::WEB_PAGE,
                Uuid::from_u128(parent),
            );
        }
        record
    }

    fn provider(store: Arc<MemoryStore>) -> ContentMapProvider {
        let installed =
            InstalledSolutions::new().with("PortalBase", SolutionVersion::new(9, 0));
        let schema = SchemaCatalog::builtin().effective(&installed).unwrap();
        ContentMapProvider::new(
            store,
            Arc::new(schema),
            QueryParameters::for_website(website_id()),
            ProviderSettings::default(),
        )
    }

    fn ctx() -> LockContext {
        LockContext::new("test")
    }

    #[test]
    fn test_read_builds_lazily() {
        let store = Arc::new(MemoryStore::with_records([website(), page(10, None)]));
        let provider = provider(Arc::clone(&store));
        assert!(!provider.is_loaded());

        let count = provider.read(&ctx(), |map| map.len()).unwrap();
        assert_eq!(count, 2);
        assert!(provider.is_loaded());

        let queries = store.calls().queries;
        provider.read(&ctx(), |_| ()).unwrap();
        assert_eq!(store.calls().queries, queries);
    }

    #[test]
    fn test_clear_rebuilds_on_next_access() {
        let store = Arc::new(MemoryStore::with_records([website()]));
        let provider = provider(Arc::clone(&store));
        provider.ensure_loaded(&ctx()).unwrap();

        provider.clear(&ctx()).unwrap();
        assert!(!provider.is_loaded());
        assert_eq!(provider.stats(&ctx()).unwrap(), None);

        store.insert(page(10, None));
        let count = provider.read(&ctx(), |map| map.count(entities::WEB_PAGE)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_refresh_before_load_is_skipped() {
        let store = Arc::new(MemoryStore::with_records([website()]));
        let provider = provider(store);
        let id = NodeId::new(entities::WEBSITE, website_id());

        let outcome = provider.refresh(&ctx(), &id).unwrap();
        assert_eq!(outcome, RefreshOutcome::NotLoaded(id));
        assert!(!provider.is_loaded());
    }

    #[test]
    fn test_refresh_unknown_type_is_ignored() {
        let provider = provider(Arc::new(MemoryStore::new()));
        let id = NodeId::new("contact", Uuid::from_u128(5));
        assert_eq!(
            provider.refresh(&ctx(), &id).unwrap(),
            RefreshOutcome::Ignored(id)
        );
    }

    #[test]
    fn test_refresh_dispatch() {
        let store = Arc::new(MemoryStore::with_records([
            website(),
            page(10, None),
            page(11, Some(10)),
        ]));
        let provider = provider(Arc::clone(&store));
        provider.ensure_loaded(&ctx()).unwrap();
        let parent = NodeId::new(entities::WEB_PAGE, Uuid::from_u128(10));
        let child = NodeId::new(entities::WEB_PAGE, Uuid::from_u128(11));

        store.upsert(page(10, None).with("adx_name", "Renamed"));
        let outcome = provider.refresh(&ctx(), &parent).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Replaced(ref r) if r.name.as_deref() == Some("Renamed")));

        store.upsert(page(10, None).with("statecode", AttributeValue::Choice(1)));
        assert_eq!(
            provider.refresh(&ctx(), &parent).unwrap(),
            RefreshOutcome::Deactivated(parent.clone())
        );
        let detached = provider
            .read(&ctx(), |map| {
                let node = map.try_get(&child).unwrap();
                map.related(node, rel::WEBPAGE_WEBPAGE).unwrap().is_reference()
            })
            .unwrap();
        assert!(detached);

        store.delete(&child);
        assert_eq!(
            provider.refresh(&ctx(), &child).unwrap(),
            RefreshOutcome::Removed(child.clone())
        );
        assert!(provider.read(&ctx(), |map| map.validate()).unwrap().is_empty());
    }

    #[test]
    fn test_failed_build_stops_tracking_changes() {
        let store = Arc::new(MemoryStore::with_records([website()]));
        let provider = provider(Arc::clone(&store));

        store.fail_next("offline");
        assert!(provider.load(&ctx()).is_err());
        assert!(!provider.pending.lock().building);

        provider.ensure_loaded(&ctx()).unwrap();
        let id = NodeId::new(entities::WEBSITE, website_id());
        assert!(matches!(
            provider.refresh(&ctx(), &id).unwrap(),
            RefreshOutcome::Replaced(_)
        ));
        assert!(provider.pending.lock().changes.is_empty());
    }

    #[test]
    fn test_store_fault_leaves_map_untouched() {
        let store = Arc::new(MemoryStore::with_records([website(), page(10, None)]));
        let provider = provider(Arc::clone(&store));
        provider.ensure_loaded(&ctx()).unwrap();
        let before = provider.read(&ctx(), |map| map.clone()).unwrap();

        store.delete(&NodeId::new(entities::WEB_PAGE, Uuid::from_u128(10)));
        store.fail_next("service unavailable");
        let result = provider.refresh(&ctx(), &NodeId::new(entities::WEB_PAGE, Uuid::from_u128(10)));
        assert!(matches!(result, Err(ContentMapError::Store(StoreError::Fault(_)))));

        let after = provider.read(&ctx(), |map| map.clone()).unwrap();
        assert_eq!(before, after);
    }
}
