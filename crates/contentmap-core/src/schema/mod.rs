//! Schema Catalog
//!
//! Describes which entity types, columns and relationships make up the
//! content map, and how each type is fetched.
//!
//! # Architecture
//!
//! ```text
//! SchemaCatalog (registered solutions, in dependency order)
//! └── effective(installed)
//!     ├── SolutionDefinition::union  (fold installed solutions)
//!     ├── SolutionDefinition::filter (drop elements newer than installed)
//!     └── EffectiveSchema::compile   (resolve defaults, index relationships)
//! ```

pub mod catalog;
pub mod definition;
pub mod query;
pub mod version;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use crate::node::{AttributeValue, EntityRecord, NodeKind};

pub use catalog::{entities, relationships, solutions, SchemaCatalog};
pub use definition::{
    ColumnDefinition, EntityDefinition, ManyRelationshipDefinition, ManySide,
    RelationshipDefinition, SolutionDefinition,
};
pub use query::{
    Condition, ConditionOperator, FetchSpec, LinkPlacement, LinkSpec, QueryParameters,
    QueryPlanner, QueryStrategy,
};
pub use version::{InstalledSolutions, SolutionVersion};

/// Default display-name column of portal entities.
pub const DEFAULT_NAME_ATTRIBUTE: &str = "adx_name";

/// State code column of entities with an active state.
pub const STATE_CODE_ATTRIBUTE: &str = "statecode";

/// Errors raised while building a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid solution version: {value}")]
    InvalidVersion { value: String },

    #[error("Unknown solution: {name}")]
    UnknownSolution { name: String },

    #[error("Relationship {name} is declared by both {first} and {second}")]
    ConflictingRelationship {
        name: String,
        first: String,
        second: String,
    },

    #[error("Invalid many-to-many relationship {name}: {reason}")]
    InvalidManyRelationship { name: String, reason: String },
}

impl SchemaError {
    pub fn invalid_version(value: impl Into<String>) -> Self {
        Self::InvalidVersion {
            value: value.into(),
        }
    }

    pub fn unknown_solution(name: impl Into<String>) -> Self {
        Self::UnknownSolution { name: name.into() }
    }

    fn invalid_many(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidManyRelationship {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A fully resolved entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub logical_name: String,
    pub primary_id: String,
    pub name_attribute: String,
    pub kind: NodeKind,
    pub active_state: Option<i32>,
    pub check_before_refresh: bool,
    pub query: Option<QueryStrategy>,
    /// Declared columns, sorted.
    pub columns: Vec<String>,
    /// Outgoing N:1 relationships, sorted by schema name.
    pub relationships: Vec<RelationshipDefinition>,
}

impl EntityType {
    fn compile(definition: &EntityDefinition) -> Self {
        let columns: BTreeSet<String> = definition.columns.iter().map(|c| c.name.clone()).collect();

        let mut relationships = definition.relationships.clone();
        relationships.sort_by(|a, b| a.schema_name.cmp(&b.schema_name));

        Self {
            logical_name: definition.logical_name.clone(),
            primary_id: definition
                .primary_id
                .clone()
                .unwrap_or_else(|| format!("{}id", definition.logical_name)),
            name_attribute: definition
                .name_attribute
                .clone()
                .unwrap_or_else(|| DEFAULT_NAME_ATTRIBUTE.to_string()),
            kind: definition.kind.unwrap_or_default(),
            active_state: definition.active_state,
            check_before_refresh: definition.check_before_refresh.unwrap_or(false),
            query: definition.query.clone(),
            columns: columns.into_iter().collect(),
            relationships,
        }
    }

    /// Every column needed to materialize a node of this type.
    pub fn fetch_columns(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = self.columns.iter().cloned().collect();
        columns.insert(self.primary_id.clone());
        columns.insert(self.name_attribute.clone());
        for relationship in &self.relationships {
            columns.insert(relationship.referencing_attribute.clone());
        }
        if self.active_state.is_some() {
            columns.insert(STATE_CODE_ATTRIBUTE.to_string());
        }
        columns.into_iter().collect()
    }

    /// Whether a record is in the active state (always true without an active state).
    pub fn is_active(&self, record: &EntityRecord) -> bool {
        match self.active_state {
            None => true,
            Some(state) => record
                .get(STATE_CODE_ATTRIBUTE)
                .is_some_and(|value| value.matches(&AttributeValue::Choice(state))),
        }
    }

    pub fn relationship(&self, schema_name: &str) -> Option<&RelationshipDefinition> {
        self.relationships
            .iter()
            .find(|r| r.schema_name == schema_name)
    }
}

/// The compiled schema a content map is built against.
#[derive(Debug, Clone, Default)]
pub struct EffectiveSchema {
    solutions: BTreeSet<String>,
    entities: BTreeMap<String, EntityType>,
    relationships: HashMap<String, RelationshipDefinition>,
    incoming: HashMap<String, Vec<RelationshipDefinition>>,
    many_relationships: BTreeMap<String, ManyRelationshipDefinition>,
}

impl EffectiveSchema {
    /// Resolve defaults and index relationships of a (filtered) solution.
    pub fn compile(solution: &SolutionDefinition) -> Result<Self, SchemaError> {
        let mut schema = EffectiveSchema {
            solutions: solution.solutions.clone(),
            ..Default::default()
        };

        for definition in solution.entities.values() {
            let entity = EntityType::compile(definition);

            for relationship in &entity.relationships {
                if let Some(existing) = schema.relationships.get(&relationship.schema_name) {
                    return Err(SchemaError::ConflictingRelationship {
                        name: relationship.schema_name.clone(),
                        first: existing.referencing_entity.clone(),
                        second: relationship.referencing_entity.clone(),
                    });
                }
                schema
                    .relationships
                    .insert(relationship.schema_name.clone(), relationship.clone());
                schema
                    .incoming
                    .entry(relationship.referenced_entity.clone())
                    .or_default()
                    .push(relationship.clone());
            }

            schema.entities.insert(entity.logical_name.clone(), entity);
        }

        for (name, many) in &solution.many_relationships {
            let intersect = schema.entities.get(&many.intersect_entity).ok_or_else(|| {
                SchemaError::invalid_many(name, format!("unknown intersect entity {}", many.intersect_entity))
            })?;
            for side in [&many.entity1, &many.entity2] {
                match intersect.relationship(&side.relationship) {
                    Some(r) if r.referenced_entity == side.entity => {}
                    _ => {
                        return Err(SchemaError::invalid_many(
                            name,
                            format!(
                                "intersect entity {} has no relationship {} to {}",
                                many.intersect_entity, side.relationship, side.entity
                            ),
                        ))
                    }
                }
            }
            schema.many_relationships.insert(name.clone(), many.clone());
        }

        Ok(schema)
    }

    pub fn solutions(&self) -> impl Iterator<Item = &str> {
        self.solutions.iter().map(|s| s.as_str())
    }

    pub fn entity(&self, logical_name: &str) -> Option<&EntityType> {
        self.entities.get(logical_name)
    }

    pub fn contains_entity(&self, logical_name: &str) -> bool {
        self.entities.contains_key(logical_name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    /// An N:1 relationship by schema name.
    pub fn relationship(&self, schema_name: &str) -> Option<&RelationshipDefinition> {
        self.relationships.get(schema_name)
    }

    /// N:1 relationships whose referenced (parent) entity is `logical_name`.
    pub fn relationships_to(&self, logical_name: &str) -> &[RelationshipDefinition] {
        self.incoming
            .get(logical_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn many_relationship(&self, schema_name: &str) -> Option<&ManyRelationshipDefinition> {
        self.many_relationships.get(schema_name)
    }

    pub fn many_relationships(&self) -> impl Iterator<Item = &ManyRelationshipDefinition> {
        self.many_relationships.values()
    }

    /// One fetch per entity type that declares a query strategy.
    pub fn queries(&self, parameters: &QueryParameters) -> Vec<(String, FetchSpec)> {
        self.entities
            .values()
            .filter_map(|entity| {
                QueryPlanner::create_query(entity, parameters)
                    .map(|fetch| (entity.logical_name.clone(), fetch))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn solution() -> SolutionDefinition {
        SolutionDefinition::new("Test")
            .entity(
                EntityDefinition::new("Test", "adx_website")
                    .kind(NodeKind::Website)
                    .active_state(0)
                    .query(QueryStrategy::Scan),
            )
            .entity(
                EntityDefinition::new("Test", "adx_webpage")
                    .kind(NodeKind::WebPage)
                    .columns(&["adx_partialurl"])
                    .relationship("adx_website_webpage", "adx_websiteid", "adx_website")
                    .relationship("adx_webpage_webpage", "adx_parentpageid", "adx_webpage")
                    .query(QueryStrategy::linked()),
            )
            .entity(EntityDefinition::new("Test", "adx_sitesetting"))
    }

    #[test]
    fn test_compile_defaults() {
        let schema = EffectiveSchema::compile(&solution()).unwrap();
        let page = schema.entity("adx_webpage").unwrap();
        assert_eq!(page.primary_id, "adx_webpageid");
        assert_eq!(page.name_attribute, DEFAULT_NAME_ATTRIBUTE);
        assert_eq!(page.kind, NodeKind::WebPage);
        assert!(!page.check_before_refresh);

        let setting = schema.entity("adx_sitesetting").unwrap();
        assert_eq!(setting.kind, NodeKind::Generic);
    }

    #[test]
    fn test_incoming_relationships() {
        let schema = EffectiveSchema::compile(&solution()).unwrap();
        let to_website: Vec<_> = schema
            .relationships_to("adx_website")
            .iter()
            .map(|r| r.schema_name.as_str())
            .collect();
        assert_eq!(to_website, vec!["adx_website_webpage"]);
        assert_eq!(schema.relationships_to("adx_webpage").len(), 1);
        assert!(schema.relationships_to("adx_sitesetting").is_empty());
    }

    #[test]
    fn test_queries_only_for_declared_strategies() {
        let schema = EffectiveSchema::compile(&solution()).unwrap();
        let queries = schema.queries(&QueryParameters::for_website(Uuid::nil()));
        let names: Vec<_> = queries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["adx_webpage", "adx_website"]);
    }

    #[test]
    fn test_conflicting_relationship_names() {
        let solution = solution().entity(
            EntityDefinition::new("Test", "adx_webfile").relationship(
                "adx_website_webpage",
                "adx_websiteid",
                "adx_website",
            ),
        );
        let err = EffectiveSchema::compile(&solution).unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingRelationship { .. }));
    }

    #[test]
    fn test_is_active() {
        let schema = EffectiveSchema::compile(&solution()).unwrap();
        let website = schema.entity("adx_website").unwrap();
        let active = EntityRecord::new("adx_website", Uuid::new_v4())
            .with("statecode", AttributeValue::Choice(0));
        let inactive = EntityRecord::new("adx_website", Uuid::new_v4())
            .with("statecode", AttributeValue::Choice(1));
        assert!(website.is_active(&active));
        assert!(!website.is_active(&inactive));

        let page = schema.entity("adx_webpage").unwrap();
        assert!(page.is_active(&inactive));
    }
}
