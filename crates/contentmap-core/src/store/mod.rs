//! Entity Store
//!
//! Boundary to the remote data source the content map is built from. The
//! provider only ever talks to an [`EntityStore`]; [`MemoryStore`] evaluates
//! fetches in memory and backs tests and fixtures.

pub mod memory;

use thiserror::Error;
use uuid::Uuid;

use crate::node::{EntityRecord, NodeId};
use crate::schema::FetchSpec;

pub use memory::MemoryStore;

/// Errors returned by an entity store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(NodeId),

    #[error("Store fault: {0}")]
    Fault(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Whether the record simply doesn't exist (as opposed to a failure)
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Read access to the remote entity graph.
pub trait EntityStore: Send + Sync {
    /// Execute a fetch and return the matching records.
    fn query(&self, fetch: &FetchSpec) -> Result<Vec<EntityRecord>, StoreError>;

    /// Fetch one record by primary key.
    fn retrieve(&self, id: &NodeId, columns: &[String]) -> Result<EntityRecord, StoreError>;

    /// Fetch many records of one type by primary key; missing ids are absent from the result.
    fn retrieve_many(
        &self,
        logical_name: &str,
        ids: &[Uuid],
        columns: &[String],
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.retrieve(&NodeId::new(logical_name, *id), columns) {
                Ok(record) => records.push(record),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}
