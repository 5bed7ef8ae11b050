//! A small portal: one website with a page tree, roles, rules, links and
//! settings, plus a second website that must stay out of scope.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use contentmap_core::cache::{ContentMapProvider, LockContext, ProviderSettings};
use contentmap_core::node::{AttributeValue, EntityRecord};
use contentmap_core::schema::{entities, EffectiveSchema, InstalledSolutions, QueryParameters, SchemaCatalog, SolutionVersion};
use contentmap_core::node::NodeId;
use contentmap_core::schema::FetchSpec;
use contentmap_core::store::{EntityStore, MemoryStore, StoreError};
use parking_lot::{Condvar, Mutex};

pub const WEBSITE: u128 = 1;
pub const OTHER_WEBSITE: u128 = 100;

/// Well-known ids of the fixture portal.
pub struct Portal;

impl Portal {
    pub const PUBLISHED: u128 = 2;
    pub const TEMPLATE: u128 = 3;
    pub const HOME: u128 = 10;
    pub const ABOUT: u128 = 11;
    pub const CONTACT: u128 = 12;
    pub const TEAM: u128 = 13;
    pub const ANONYMOUS: u128 = 20;
    pub const AUTHENTICATED: u128 = 21;
    pub const RULE: u128 = 30;
    pub const RULE_ANONYMOUS: u128 = 40;
    pub const LINK_SET: u128 = 50;
    pub const LINK_HOME: u128 = 51;
    pub const LINK_ABOUT: u128 = 52;
    pub const SETTING: u128 = 60;
    pub const SNIPPET: u128 = 61;
    pub const MARKER: u128 = 62;
    pub const FILE: u128 = 63;
    pub const OTHER_HOME: u128 = 101;
}

pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn ctx(operation: &str) -> LockContext {
    LockContext::new(operation)
}

fn active(logical_name: &str, n: u128, name: &str) -> EntityRecord {
    EntityRecord::new(logical_name, id(n))
        .with("adx_name", name)
        .with("statecode", AttributeValue::Choice(0))
}

fn owned(logical_name: &str, n: u128, name: &str, website_id: u128) -> EntityRecord {
    active(logical_name, n, name).with_reference("adx_websiteid", entities::WEBSITE, id(website_id))
}

pub fn website(n: u128, name: &str) -> EntityRecord {
    active(entities::WEBSITE, n, name)
        .with("adx_primarydomainname", format!("{}.example.com", name.to_lowercase()))
}

pub fn page(n: u128, name: &str, parent: Option<u128>) -> EntityRecord {
    let mut record = owned(entities::WEB_PAGE, n, name, WEBSITE)
        .with("adx_partialurl", name.to_lowercase())
        .with("adx_title", name)
        .with("adx_displayorder", n as i64)
        .with("adx_hiddenfromsitemap", false)
        .with("adx_isroot", true)
        .with_reference("adx_publishingstateid", entities::PUBLISHING_STATE, id(Portal::PUBLISHED))
        .with_reference("adx_pagetemplateid", entities::PAGE_TEMPLATE, id(Portal::TEMPLATE));
    if let Some(parent) = parent {
        record = record.with_reference("adx_parentpageid", entities::WEB_PAGE, id(parent));
    }
    record
}

pub fn web_role(n: u128, name: &str) -> EntityRecord {
    owned(entities::WEB_ROLE, n, name, WEBSITE).with("adx_anonymoususersrole", n == Portal::ANONYMOUS)
}

pub fn access_rule(n: u128, page_id: u128) -> EntityRecord {
    owned(entities::ACCESS_RULE, n, "Restrict Read", WEBSITE)
        .with("adx_right", AttributeValue::Choice(2))
        .with_reference("adx_webpageid", entities::WEB_PAGE, id(page_id))
}

pub fn rule_role(n: u128, rule: u128, role: u128) -> EntityRecord {
    EntityRecord::new(entities::ACCESS_RULE_WEB_ROLE, id(n))
        .with_reference("adx_webpageaccesscontrolruleid", entities::ACCESS_RULE, id(rule))
        .with_reference("adx_webroleid", entities::WEB_ROLE, id(role))
}

/// Every record of the fixture portal.
pub fn portal_records() -> Vec<EntityRecord> {
    vec![
        website(WEBSITE, "Contoso"),
        website(OTHER_WEBSITE, "Fabrikam"),
        owned(entities::PUBLISHING_STATE, Portal::PUBLISHED, "Published", WEBSITE)
            .with("adx_isvisible", true),
        owned(entities::PAGE_TEMPLATE, Portal::TEMPLATE, "Full Page", WEBSITE)
            .with("adx_rewriteurl", "/Pages/Full.aspx"),
        page(Portal::HOME, "Home", None),
        page(Portal::ABOUT, "About", Some(Portal::HOME)),
        page(Portal::CONTACT, "Contact", Some(Portal::HOME)),
        page(Portal::TEAM, "Team", Some(Portal::ABOUT)),
        owned(entities::WEB_PAGE, Portal::OTHER_HOME, "Other Home", OTHER_WEBSITE),
        web_role(Portal::ANONYMOUS, "Anonymous Users"),
        web_role(Portal::AUTHENTICATED, "Authenticated Users"),
        access_rule(Portal::RULE, Portal::ABOUT),
        rule_role(Portal::RULE_ANONYMOUS, Portal::RULE, Portal::ANONYMOUS),
        owned(entities::WEB_LINK_SET, Portal::LINK_SET, "Primary Navigation", WEBSITE),
        active(entities::WEB_LINK, Portal::LINK_HOME, "Home")
            .with_reference("adx_weblinksetid", entities::WEB_LINK_SET, id(Portal::LINK_SET))
            .with_reference("adx_pageid", entities::WEB_PAGE, id(Portal::HOME))
            .with("adx_displayorder", 1i64),
        active(entities::WEB_LINK, Portal::LINK_ABOUT, "About")
            .with_reference("adx_weblinksetid", entities::WEB_LINK_SET, id(Portal::LINK_SET))
            .with_reference("adx_pageid", entities::WEB_PAGE, id(Portal::ABOUT))
            .with_reference("adx_parentweblinkid", entities::WEB_LINK, id(Portal::LINK_HOME))
            .with("adx_displayorder", 2i64),
        owned(entities::SITE_SETTING, Portal::SETTING, "Search/Enabled", WEBSITE)
            .with("adx_value", "true"),
        owned(entities::CONTENT_SNIPPET, Portal::SNIPPET, "Footer", WEBSITE)
            .with("adx_value", "Copyright Contoso"),
        owned(entities::SITE_MARKER, Portal::MARKER, "Home", WEBSITE)
            .with_reference("adx_pageid", entities::WEB_PAGE, id(Portal::HOME)),
        owned(entities::WEB_FILE, Portal::FILE, "logo.png", WEBSITE)
            .with("adx_partialurl", "logo.png")
            .with_reference("adx_parentpageid", entities::WEB_PAGE, id(Portal::HOME)),
    ]
}

pub fn portal_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_records(portal_records()))
}

/// Effective schema of `PortalBase` 9.0.
pub fn base_schema() -> Arc<EffectiveSchema> {
    let installed = InstalledSolutions::new().with("PortalBase", SolutionVersion::new(9, 0));
    Arc::new(
        SchemaCatalog::builtin()
            .effective(&installed)
            .expect("built-in schema compiles"),
    )
}

/// Provider over `store`, scoped to the fixture website.
pub fn provider(store: Arc<MemoryStore>) -> ContentMapProvider {
    provider_with_timeout(store, Duration::from_secs(10))
}

pub fn provider_with_timeout(store: Arc<MemoryStore>, lock_timeout: Duration) -> ContentMapProvider {
    provider_over(store, lock_timeout)
}

pub fn provider_over(store: Arc<dyn EntityStore>, lock_timeout: Duration) -> ContentMapProvider {
    ContentMapProvider::new(
        store,
        base_schema(),
        QueryParameters::for_website(id(WEBSITE)),
        ProviderSettings {
            lock_timeout,
            parallelism: 2,
        },
    )
}

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    fetched: bool,
    open: bool,
}

/// Holds one query of a [`GatedStore`] after it has read its records.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    /// Hold the next gated query.
    pub fn arm(&self) {
        *self.state.lock() = GateState {
            armed: true,
            ..Default::default()
        };
    }

    /// Block until the held query has read its records.
    pub fn wait_fetched(&self) {
        let mut state = self.state.lock();
        while !state.fetched {
            self.changed.wait(&mut state);
        }
    }

    /// Let the held query return.
    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        if !state.armed {
            return;
        }
        state.armed = false;
        state.fetched = true;
        self.changed.notify_all();
        while !state.open {
            self.changed.wait(&mut state);
        }
    }
}

/// Store that can hold queries of one entity type mid-flight.
pub struct GatedStore {
    inner: Arc<MemoryStore>,
    entity: String,
    gate: Arc<Gate>,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>, entity: &str) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let store = Self {
            inner,
            entity: entity.to_string(),
            gate: Arc::clone(&gate),
        };
        (store, gate)
    }
}

impl EntityStore for GatedStore {
    fn query(&self, fetch: &FetchSpec) -> Result<Vec<EntityRecord>, StoreError> {
        let records = self.inner.query(fetch)?;
        if fetch.entity == self.entity {
            self.gate.pass();
        }
        Ok(records)
    }

    fn retrieve(&self, id: &NodeId, columns: &[String]) -> Result<EntityRecord, StoreError> {
        self.inner.retrieve(id, columns)
    }
}
