//! Solution, entity and relationship definitions.
//!
//! Definitions are declarations: every scalar is optional so that a solution
//! can extend an entity declared by another one (adding columns or
//! relationships) without restating it. Definitions are combined with
//! [`SolutionDefinition::union`], trimmed to the installed versions with
//! [`SolutionDefinition::filter`], and compiled into an
//! [`EffectiveSchema`](super::EffectiveSchema).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::query::QueryStrategy;
use super::version::{InstalledSolutions, SolutionVersion};
use crate::node::NodeKind;

/// A column participating in the content map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Solution that declared the column.
    pub solution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<SolutionVersion>,
}

/// A directed N:1 relationship: the referencing (child) entity holds a
/// lookup column pointing at the referenced (parent) entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    pub schema_name: String,
    pub referencing_entity: String,
    pub referencing_attribute: String,
    pub referenced_entity: String,
    pub solution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<SolutionVersion>,
}

/// One side of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManySide {
    /// Logical name of the entity on this side.
    pub entity: String,
    /// Column of the intersect entity holding this side's id.
    pub intersect_attribute: String,
    /// N:1 relationship from the intersect entity to this side.
    pub relationship: String,
}

/// A many-to-many relationship, modelled as an intersect entity with two N:1 relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyRelationshipDefinition {
    pub schema_name: String,
    pub intersect_entity: String,
    pub entity1: ManySide,
    pub entity2: ManySide,
    pub solution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<SolutionVersion>,
}

impl ManyRelationshipDefinition {
    /// Sides ordered so that the first one is `target_entity`.
    ///
    /// Returns `None` when `target_entity` is on neither side.
    pub fn oriented(&self, target_entity: &str) -> Option<(&ManySide, &ManySide)> {
        if self.entity1.entity == target_entity {
            Some((&self.entity1, &self.entity2))
        } else if self.entity2.entity == target_entity {
            Some((&self.entity2, &self.entity1))
        } else {
            None
        }
    }
}

/// Declaration of an entity type, possibly partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub logical_name: String,
    /// Solution that owns this declaration.
    pub solution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<SolutionVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    /// State code of active records; records in any other state are deactivated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_state: Option<i32>,
    /// Validate refreshed records against the entity query before merging them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_before_refresh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryStrategy>,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDefinition>,
}

impl EntityDefinition {
    pub fn new(solution: impl Into<String>, logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            solution: solution.into(),
            introduced: None,
            primary_id: None,
            name_attribute: None,
            kind: None,
            active_state: None,
            check_before_refresh: None,
            query: None,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn introduced(mut self, version: SolutionVersion) -> Self {
        self.introduced = Some(version);
        self
    }

    pub fn primary_id(mut self, column: impl Into<String>) -> Self {
        self.primary_id = Some(column.into());
        self
    }

    pub fn name_attribute(mut self, column: impl Into<String>) -> Self {
        self.name_attribute = Some(column.into());
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn active_state(mut self, state: i32) -> Self {
        self.active_state = Some(state);
        self
    }

    pub fn check_before_refresh(mut self, check: bool) -> Self {
        self.check_before_refresh = Some(check);
        self
    }

    pub fn query(mut self, strategy: QueryStrategy) -> Self {
        self.query = Some(strategy);
        self
    }

    /// Add unversioned columns owned by this definition's solution.
    pub fn columns(mut self, names: &[&str]) -> Self {
        for name in names {
            self.columns.push(ColumnDefinition {
                name: (*name).to_string(),
                solution: self.solution.clone(),
                introduced: None,
            });
        }
        self
    }

    /// Add a column introduced in `version` of this definition's solution.
    pub fn column_since(mut self, name: &str, version: SolutionVersion) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.to_string(),
            solution: self.solution.clone(),
            introduced: Some(version),
        });
        self
    }

    /// Add an N:1 relationship whose lookup column lives on this entity.
    pub fn relationship(self, schema_name: &str, attribute: &str, referenced: &str) -> Self {
        self.relationship_with(schema_name, attribute, referenced, None)
    }

    /// Add an N:1 relationship introduced in `version`.
    pub fn relationship_since(
        self,
        schema_name: &str,
        attribute: &str,
        referenced: &str,
        version: SolutionVersion,
    ) -> Self {
        self.relationship_with(schema_name, attribute, referenced, Some(version))
    }

    fn relationship_with(
        mut self,
        schema_name: &str,
        attribute: &str,
        referenced: &str,
        introduced: Option<SolutionVersion>,
    ) -> Self {
        self.relationships.push(RelationshipDefinition {
            schema_name: schema_name.to_string(),
            referencing_entity: self.logical_name.clone(),
            referencing_attribute: attribute.to_string(),
            referenced_entity: referenced.to_string(),
            solution: self.solution.clone(),
            introduced,
        });
        self
    }

    /// Deep-merge `overlay` into this definition.
    ///
    /// Columns and relationships concatenate (first declaration of a name
    /// wins); scalar fields are taken from `overlay` when it sets them.
    pub fn merge(mut self, overlay: EntityDefinition) -> Self {
        self.introduced = overlay.introduced.or(self.introduced);
        self.primary_id = overlay.primary_id.or(self.primary_id);
        self.name_attribute = overlay.name_attribute.or(self.name_attribute);
        self.kind = overlay.kind.or(self.kind);
        self.active_state = overlay.active_state.or(self.active_state);
        self.check_before_refresh = overlay.check_before_refresh.or(self.check_before_refresh);
        self.query = overlay.query.or(self.query);

        for column in overlay.columns {
            if !self.columns.iter().any(|c| c.name == column.name) {
                self.columns.push(column);
            }
        }
        for relationship in overlay.relationships {
            if !self
                .relationships
                .iter()
                .any(|r| r.schema_name == relationship.schema_name)
            {
                self.relationships.push(relationship);
            }
        }
        self
    }
}

/// A named bundle of entity and many-to-many definitions (a "solution").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionDefinition {
    pub name: String,
    /// Names of every solution already folded into this definition.
    pub solutions: BTreeSet<String>,
    pub entities: BTreeMap<String, EntityDefinition>,
    pub many_relationships: BTreeMap<String, ManyRelationshipDefinition>,
}

impl SolutionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            solutions: BTreeSet::from([name.clone()]),
            name,
            entities: BTreeMap::new(),
            many_relationships: BTreeMap::new(),
        }
    }

    /// Add (or deep-merge) an entity definition.
    pub fn entity(mut self, entity: EntityDefinition) -> Self {
        let key = entity.logical_name.clone();
        let merged = match self.entities.remove(&key) {
            Some(existing) => existing.merge(entity),
            None => entity,
        };
        self.entities.insert(key, merged);
        self
    }

    pub fn many_relationship(mut self, relationship: ManyRelationshipDefinition) -> Self {
        self.many_relationships
            .insert(relationship.schema_name.clone(), relationship);
        self
    }

    /// Combine two solutions.
    ///
    /// Entities declared by both are deep-merged with `other`'s scalars
    /// winning. Entities and many-to-many relationships only declared by
    /// `other` are taken unless their owning solution is already part of
    /// `self`, which keeps a base solution from being declared twice.
    pub fn union(self, other: SolutionDefinition) -> SolutionDefinition {
        let name = if self.solutions.contains(&other.name) {
            self.name
        } else {
            format!("{}+{}", self.name, other.name)
        };
        let base = self.solutions;
        let mut entities = self.entities;
        let mut many_relationships = self.many_relationships;

        for (key, entity) in other.entities {
            match entities.remove(&key) {
                Some(existing) => {
                    entities.insert(key, existing.merge(entity));
                }
                None if !base.contains(&entity.solution) => {
                    entities.insert(key, entity);
                }
                None => {
                    tracing::debug!(
                        "Skipping entity {} from {}: solution already part of the base set",
                        key,
                        entity.solution
                    );
                }
            }
        }

        for (key, relationship) in other.many_relationships {
            if many_relationships.contains_key(&key) || !base.contains(&relationship.solution) {
                many_relationships.insert(key, relationship);
            }
        }

        let mut solutions = base;
        solutions.extend(other.solutions);

        SolutionDefinition {
            name,
            solutions,
            entities,
            many_relationships,
        }
    }

    /// Drop every entity, column and relationship not available in the installed versions.
    pub fn filter(&self, installed: &InstalledSolutions) -> SolutionDefinition {
        let mut entities = BTreeMap::new();

        for (key, entity) in &self.entities {
            if !installed.includes(&entity.solution, entity.introduced) {
                tracing::debug!(
                    "Filtered out entity {} (introduced {:?} in {})",
                    key,
                    entity.introduced,
                    entity.solution
                );
                continue;
            }

            let mut filtered = entity.clone();
            filtered
                .columns
                .retain(|c| installed.includes(&c.solution, c.introduced));
            filtered
                .relationships
                .retain(|r| installed.includes(&r.solution, r.introduced));
            entities.insert(key.clone(), filtered);
        }

        let many_relationships = self
            .many_relationships
            .iter()
            .filter(|(_, m)| {
                installed.includes(&m.solution, m.introduced)
                    && entities.contains_key(&m.intersect_entity)
                    && entities.contains_key(&m.entity1.entity)
                    && entities.contains_key(&m.entity2.entity)
            })
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect();

        SolutionDefinition {
            name: self.name.clone(),
            solutions: self.solutions.clone(),
            entities,
            many_relationships,
        }
    }
}
