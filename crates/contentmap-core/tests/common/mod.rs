//! Common test utilities for integration tests.
//!
//! This module provides portal fixtures and graph validation utilities
//! shared across integration test files.

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod graph_validator;

// Re-export commonly used items
pub use fixtures::{
    access_rule, base_schema, ctx, id, page, portal_records, portal_store, provider, provider_over,
    provider_with_timeout, rule_role, web_role, website, Gate, GatedStore, Portal, OTHER_WEBSITE,
    WEBSITE,
};
pub use graph_validator::{assert_valid, check_links, edge_count};
