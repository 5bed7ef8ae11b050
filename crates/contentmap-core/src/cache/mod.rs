//! Content Map Cache
//!
//! Keeps one content map per scope in memory and in step with the entity
//! store:
//! - Lazy, parallel build of the whole map on first access
//! - Timed, recursive reader/writer scopes with lock diagnostics
//! - Point refreshes driven by change notifications
//! - Many-to-many associate/disassociate validated against the store
//!
//! # Architecture
//!
//! ```text
//! ContentMapRegistry (scope → provider)
//! └── ContentMapProvider
//!     ├── EntityStore (remote records, fetched outside the lock)
//!     ├── EffectiveSchema (queries, entity types, relationships)
//!     └── GraphLock<Option<ContentMap>>
//!         ├── read(ctx, f)   (shared, recursive)
//!         └── write(ctx, f)  (exclusive, one per mutation)
//! ```

pub mod lock;
pub mod provider;
pub mod registry;

pub use lock::{
    GraphLock, LockContext, LockError, LockMode, LockStateSnapshot, DEFAULT_LOCK_TIMEOUT,
};
pub use provider::{ContentMapError, ContentMapProvider, ProviderSettings, RefreshOutcome};
pub use registry::ContentMapRegistry;
