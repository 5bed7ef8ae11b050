//! Solution union and version filtering over the schema catalog.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package contentmap-core --test schema_catalog
//! ```

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use uuid::Uuid;

use contentmap_core::schema::{
    entities, relationships as rel, solutions, ColumnDefinition, EntityDefinition,
    InstalledSolutions, QueryParameters, QueryStrategy, SchemaCatalog, SchemaError,
    SolutionDefinition, SolutionVersion,
};

fn v(major: u32, minor: u32) -> SolutionVersion {
    SolutionVersion::new(major, minor)
}

fn base() -> SolutionDefinition {
    SolutionDefinition::new("Base").entity(
        EntityDefinition::new("Base", entities::WEB_PAGE)
            .active_state(0)
            .columns(&["adx_partialurl"])
            .query(QueryStrategy::Scan),
    )
}

/// An extension of the base page adding one column.
fn extension(name: &str, column: &str, active_state: Option<i32>) -> SolutionDefinition {
    let mut page = EntityDefinition::new(name, entities::WEB_PAGE).columns(&[column]);
    page.active_state = active_state;
    SolutionDefinition::new(name).entity(page)
}

fn all_installed() -> InstalledSolutions {
    InstalledSolutions::new()
        .with("Base", v(1, 0))
        .with("X", v(1, 0))
        .with("Y", v(1, 0))
}

// ============================================================================
// Union
// ============================================================================

#[test]
fn test_union_of_disjoint_extensions_is_order_independent() {
    let xy = SchemaCatalog::new()
        .with(base())
        .with(extension("X", "x_column", None))
        .with(extension("Y", "y_column", None))
        .effective(&all_installed())
        .unwrap();
    let yx = SchemaCatalog::new()
        .with(base())
        .with(extension("Y", "y_column", None))
        .with(extension("X", "x_column", None))
        .effective(&all_installed())
        .unwrap();

    let page = xy.entity(entities::WEB_PAGE).unwrap();
    assert_eq!(page, yx.entity(entities::WEB_PAGE).unwrap());
    assert_eq!(page.columns, vec!["adx_partialurl", "x_column", "y_column"]);
    assert_eq!(page.active_state, Some(0));
}

#[test]
fn test_later_solution_scalars_win() {
    let catalog = |first: SolutionDefinition, second: SolutionDefinition| {
        SchemaCatalog::new()
            .with(base())
            .with(first)
            .with(second)
            .effective(&all_installed())
            .unwrap()
    };

    let xy = catalog(extension("X", "x_column", Some(1)), extension("Y", "y_column", Some(2)));
    assert_eq!(xy.entity(entities::WEB_PAGE).unwrap().active_state, Some(2));

    let yx = catalog(extension("Y", "y_column", Some(2)), extension("X", "x_column", Some(1)));
    assert_eq!(yx.entity(entities::WEB_PAGE).unwrap().active_state, Some(1));
}

#[test]
fn test_uninstalled_solution_contributes_nothing() {
    let schema = SchemaCatalog::new()
        .with(base())
        .with(extension("X", "x_column", Some(1)))
        .effective(&InstalledSolutions::new().with("Base", v(1, 0)))
        .unwrap();

    let page = schema.entity(entities::WEB_PAGE).unwrap();
    assert_eq!(page.columns, vec!["adx_partialurl"]);
    assert_eq!(page.active_state, Some(0));
    assert_eq!(schema.solutions().collect::<Vec<_>>(), vec!["Base"]);
}

#[test]
fn test_nothing_installed_yields_empty_schema() {
    let schema = SchemaCatalog::builtin()
        .effective(&InstalledSolutions::new())
        .unwrap();
    assert_eq!(schema.entities().count(), 0);
    assert!(schema.queries(&QueryParameters::new()).is_empty());
}

// ============================================================================
// Version filtering
// ============================================================================

#[test]
fn test_builtin_filtering_by_version() {
    let catalog = SchemaCatalog::builtin();

    let v9 = catalog
        .effective(&InstalledSolutions::new().with(solutions::PORTAL_BASE, v(9, 0)))
        .unwrap();
    let v8 = catalog
        .effective(&InstalledSolutions::new().with(solutions::PORTAL_BASE, v(8, 4)))
        .unwrap();

    for (schema, has_nine) in [(&v9, true), (&v8, false)] {
        let page = schema.entity(entities::WEB_PAGE).unwrap();
        assert_eq!(page.columns.contains(&"adx_isroot".to_string()), has_nine);
        let rule = schema.entity(entities::ACCESS_RULE).unwrap();
        assert_eq!(rule.columns.contains(&"adx_scope".to_string()), has_nine);

        // Unversioned elements are available in every version.
        assert!(page.columns.contains(&"adx_partialurl".to_string()));
        assert!(page.relationship(rel::WEBPAGE_WEBPAGE).is_some());
        assert!(schema.many_relationship(rel::ACCESSRULE_WEBROLE).is_some());
    }

    // The website entity itself was introduced in 8.0.
    let v7 = catalog
        .effective(&InstalledSolutions::new().with(solutions::PORTAL_BASE, v(7, 3)))
        .unwrap();
    assert!(!v7.contains_entity(entities::WEBSITE));
    assert!(v7.contains_entity(entities::WEB_PAGE));
}

#[test]
fn test_versioned_element_of_uninstalled_solution_is_dropped() {
    let mut page = EntityDefinition::new("Base", entities::WEB_PAGE).columns(&["adx_partialurl"]);
    page.columns.push(ColumnDefinition {
        name: "addon_versioned".to_string(),
        solution: "Addon".to_string(),
        introduced: Some(v(1, 0)),
    });
    page.columns.push(ColumnDefinition {
        name: "addon_unversioned".to_string(),
        solution: "Addon".to_string(),
        introduced: None,
    });

    let schema = SchemaCatalog::new()
        .with(SolutionDefinition::new("Base").entity(page))
        .effective(&InstalledSolutions::new().with("Base", v(1, 0)))
        .unwrap();

    assert_eq!(
        schema.entity(entities::WEB_PAGE).unwrap().columns,
        vec!["addon_unversioned", "adx_partialurl"]
    );
}

#[test]
fn test_build_and_revision_are_ignored() {
    let installed = InstalledSolutions::parse(&BTreeMap::from([
        (solutions::PORTAL_BASE.to_string(), "9.0.1.2".to_string()),
        (solutions::PORTAL_LANGUAGES.to_string(), "9.0".to_string()),
    ]))
    .unwrap();
    assert_eq!(installed.version_of(solutions::PORTAL_BASE), Some(v(9, 0)));

    let schema = SchemaCatalog::builtin().effective(&installed).unwrap();
    let page = schema.entity(entities::WEB_PAGE).unwrap();
    assert!(page.relationship(rel::WEBSITELANGUAGE_WEBPAGE).is_some());
    assert!(schema.contains_entity(entities::WEBSITE_LANGUAGE));
}

#[test]
fn test_invalid_version_is_rejected() {
    let result = InstalledSolutions::parse(&BTreeMap::from([(
        solutions::PORTAL_BASE.to_string(),
        "nine".to_string(),
    )]));
    assert!(matches!(result, Err(SchemaError::InvalidVersion { .. })));
}

// ============================================================================
// Query planning over the built-in schema
// ============================================================================

#[test]
fn test_builtin_queries_are_scoped_to_website() {
    let schema = base_schema();
    let website = Uuid::from_u128(WEBSITE);
    let queries: BTreeMap<String, _> = schema
        .queries(&QueryParameters::for_website(website))
        .into_iter()
        .collect();

    // Every type with a query strategy is fetched; websites are scanned unscoped.
    assert!(queries[entities::WEBSITE].links.is_empty());
    assert_eq!(queries[entities::WEB_PAGE].links[0].entity, entities::WEBSITE);

    // Links and intersect records are scoped through their parents.
    let link = &queries[entities::WEB_LINK].links[0];
    assert_eq!(link.entity, entities::WEB_LINK_SET);
    assert_eq!(link.links[0].entity, entities::WEBSITE);

    let intersect = &queries[entities::ACCESS_RULE_WEB_ROLE].links[0];
    assert_eq!(intersect.entity, entities::WEB_ROLE);
    assert_eq!(intersect.links[0].entity, entities::WEBSITE);

    assert!(queries.values().all(|fetch| fetch.distinct && fetch.skip_cache));
    assert!(!queries.contains_key(entities::BLOG));
}
