//! ContentMap Core - In-memory content graph for portal websites
//!
//! This crate provides the content map engine:
//! - Composable, versioned schema definitions ("solutions")
//! - Query planning against a remote entity store
//! - A type-partitioned graph of materialized and reference nodes
//! - Lazy loading, point refreshes and timed reader/writer scopes

pub mod cache;
pub mod map;
pub mod node;
pub mod schema;
pub mod store;

// Graph re-exports
pub use map::{ContentMap, ContentMapStats, Related};
pub use node::{
    AttributeValue, Attributes, EntityRecord, EntityReference, GraphNode, Link, NodeError,
    NodeId, NodeKind, NodeState, NodeView,
};

// Schema re-exports
pub use schema::{
    EffectiveSchema, EntityDefinition, EntityType, FetchSpec, InstalledSolutions,
    QueryParameters, QueryPlanner, SchemaCatalog, SchemaError, SolutionDefinition,
    SolutionVersion,
};

// Cache re-exports
pub use cache::{
    ContentMapError, ContentMapProvider, ContentMapRegistry, GraphLock, LockContext, LockError,
    ProviderSettings, RefreshOutcome,
};

// Store re-exports
pub use store::{EntityStore, MemoryStore, StoreError};
