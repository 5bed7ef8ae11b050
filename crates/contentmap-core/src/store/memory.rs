//! In-memory entity store.
//!
//! Evaluates [`FetchSpec`]s against records held in memory: filters, nested
//! inner-join links, column projection and distinct. Links only restrict
//! which root records match; no linked columns are returned.
//!
//! The primary id column of an entity is `<logical_name>id`. Records don't
//! need to carry it as an attribute: the store answers it from the record id.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{EntityStore, StoreError};
use crate::node::{AttributeValue, EntityRecord, NodeId};
use crate::schema::{Condition, FetchSpec, LinkSpec};

/// Counts of calls made against a [`MemoryStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub queries: usize,
    pub retrieves: usize,
    pub retrieve_many: usize,
}

/// Thread-safe in-memory [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, BTreeMap<Uuid, EntityRecord>>>,
    fail_next: Mutex<Option<String>>,
    queries: AtomicUsize,
    retrieves: AtomicUsize,
    retrieve_many: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records` (later duplicates win)
    pub fn with_records(records: impl IntoIterator<Item = EntityRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Parse a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let records: Vec<EntityRecord> = serde_json::from_str(json)?;
        debug!("Loaded {} records from JSON", records.len());
        Ok(Self::with_records(records))
    }

    /// Read a JSON array of records from a file.
    pub fn load_json(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Insert a record; returns `false` (and keeps the old one) if the id exists.
    pub fn insert(&self, record: EntityRecord) -> bool {
        let mut records = self.records.write();
        let bucket = records.entry(record.logical_name.clone()).or_default();
        if bucket.contains_key(&record.id) {
            return false;
        }
        bucket.insert(record.id, record);
        true
    }

    /// Insert or overwrite a record.
    pub fn upsert(&self, record: EntityRecord) -> Option<EntityRecord> {
        self.records
            .write()
            .entry(record.logical_name.clone())
            .or_default()
            .insert(record.id, record)
    }

    pub fn delete(&self, id: &NodeId) -> Option<EntityRecord> {
        let mut records = self.records.write();
        let bucket = records.get_mut(&id.logical_name)?;
        let removed = bucket.remove(&id.id);
        if bucket.is_empty() {
            records.remove(&id.logical_name);
        }
        removed
    }

    pub fn get(&self, id: &NodeId) -> Option<EntityRecord> {
        self.records.read().get(&id.logical_name)?.get(&id.id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next call fail with [`StoreError::Fault`].
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            queries: self.queries.load(Ordering::Relaxed),
            retrieves: self.retrieves.load(Ordering::Relaxed),
            retrieve_many: self.retrieve_many.load(Ordering::Relaxed),
        }
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        match self.fail_next.lock().take() {
            Some(message) => Err(StoreError::Fault(message)),
            None => Ok(()),
        }
    }
}

fn primary_id(logical_name: &str) -> String {
    format!("{logical_name}id")
}

/// Attribute value of a record, answering the primary id column from the record id.
fn value_of(record: &EntityRecord, attribute: &str) -> Option<AttributeValue> {
    match record.get(attribute) {
        Some(value) => Some(value.clone()),
        None if attribute == primary_id(&record.logical_name) => Some(AttributeValue::Guid(record.id)),
        None => None,
    }
}

fn passes(record: &EntityRecord, filters: &[Condition]) -> bool {
    filters
        .iter()
        .all(|condition| condition.evaluate(value_of(record, &condition.attribute).as_ref()))
}

type Records = BTreeMap<String, BTreeMap<Uuid, EntityRecord>>;

/// Inner join: some record of the linked entity matches `parent` and every nested link.
fn joins(records: &Records, parent: &EntityRecord, link: &LinkSpec) -> bool {
    let Some(key) = value_of(parent, &link.to).filter(|v| !v.is_null()) else {
        return false;
    };
    let Some(candidates) = records.get(&link.entity) else {
        return false;
    };
    candidates.values().any(|candidate| {
        value_of(candidate, &link.from).is_some_and(|v| v.matches(&key))
            && passes(candidate, &link.filters)
            && link.links.iter().all(|nested| joins(records, candidate, nested))
    })
}

fn validate(fetch: &FetchSpec) -> Result<(), StoreError> {
    if fetch.entity.is_empty() {
        return Err(StoreError::invalid_query("fetch without an entity"));
    }
    fn check_link(link: &LinkSpec) -> Result<(), StoreError> {
        if link.entity.is_empty() || link.from.is_empty() || link.to.is_empty() {
            return Err(StoreError::invalid_query(format!(
                "incomplete link to '{}'",
                link.entity
            )));
        }
        link.links.iter().try_for_each(check_link)
    }
    fetch.links.iter().try_for_each(check_link)
}

impl EntityStore for MemoryStore {
    fn query(&self, fetch: &FetchSpec) -> Result<Vec<EntityRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.check_fault()?;
        validate(fetch)?;

        let records = self.records.read();
        let Some(bucket) = records.get(&fetch.entity) else {
            return Ok(Vec::new());
        };

        let primary_id = primary_id(&fetch.entity);
        let mut seen = BTreeSet::new();
        let results: Vec<EntityRecord> = bucket
            .values()
            .filter(|record| passes(record, &fetch.filters))
            .filter(|record| fetch.links.iter().all(|link| joins(&records, record, link)))
            .filter(|record| !fetch.distinct || seen.insert(record.id))
            .map(|record| record.project(&fetch.attributes, &primary_id))
            .collect();

        debug!(
            "Query on {} matched {} of {} records",
            fetch.entity,
            results.len(),
            bucket.len()
        );
        Ok(results)
    }

    fn retrieve(&self, id: &NodeId, columns: &[String]) -> Result<EntityRecord, StoreError> {
        self.retrieves.fetch_add(1, Ordering::Relaxed);
        self.check_fault()?;

        let records = self.records.read();
        records
            .get(&id.logical_name)
            .and_then(|bucket| bucket.get(&id.id))
            .map(|record| record.project(columns, &primary_id(&id.logical_name)))
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn retrieve_many(
        &self,
        logical_name: &str,
        ids: &[Uuid],
        columns: &[String],
    ) -> Result<Vec<EntityRecord>, StoreError> {
        self.retrieve_many.fetch_add(1, Ordering::Relaxed);
        self.check_fault()?;

        let records = self.records.read();
        let Some(bucket) = records.get(logical_name) else {
            return Ok(Vec::new());
        };
        let primary_id = primary_id(logical_name);
        Ok(ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| bucket.get(id))
            .map(|record| record.project(columns, &primary_id))
            .collect())
    }
}
