//! Graph nodes and their links.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use super::record::{AttributeValue, Attributes, EntityRecord, EntityReference, NodeId};
use super::NodeKind;
use crate::schema::{EffectiveSchema, EntityType};

/// Errors raised when reading node attributes
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Attribute {attribute} requested from reference node {reference}")]
    ReferenceNodeAccess {
        reference: EntityReference,
        attribute: String,
    },

    #[error("Attribute {attribute} of {node} is {actual}, expected {expected}")]
    AttributeType {
        node: NodeId,
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Whether a node carries fetched attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Materialized {
        attributes: Attributes,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// Only the identity is known.
    Reference,
}

/// Target of a to-one relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// Target is in the graph and lists this node among its children.
    Resolved(NodeId),
    /// Foreign key is known but the target is absent, a reference, or was degraded.
    Unresolved(EntityReference),
}

impl Link {
    pub fn target(&self) -> &NodeId {
        match self {
            Link::Resolved(id) => id,
            Link::Unresolved(reference) => &reference.id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Link::Resolved(_))
    }
}

/// One node of the content map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    reference: EntityReference,
    kind: NodeKind,
    state: NodeState,
    to_one: BTreeMap<String, Link>,
    to_many: BTreeMap<String, BTreeSet<NodeId>>,
}

impl GraphNode {
    /// Build a materialized node from a fetched record.
    ///
    /// Every relationship whose foreign key is set starts out as an
    /// [`Link::Unresolved`] link; the map wires it when the node is merged.
    pub fn from_record(entity: &EntityType, record: EntityRecord) -> Self {
        let lookup = |name: &str| -> Option<&AttributeValue> {
            record
                .alias
                .as_ref()
                .and_then(|alias| record.attributes.get(&format!("{alias}.{name}")))
                .or_else(|| record.attributes.get(name))
        };

        let name = match lookup(&entity.name_attribute) {
            Some(AttributeValue::Text(name)) => Some(name.clone()),
            _ => None,
        };

        let mut to_one = BTreeMap::new();
        for relationship in &entity.relationships {
            let target = match lookup(&relationship.referencing_attribute) {
                Some(AttributeValue::Reference(r)) => Some(EntityReference {
                    id: NodeId::new(relationship.referenced_entity.clone(), r.id.id),
                    name: r.name.clone(),
                }),
                Some(AttributeValue::Guid(id)) => {
                    Some(EntityReference::new(relationship.referenced_entity.clone(), *id))
                }
                _ => None,
            };
            if let Some(target) = target {
                to_one.insert(relationship.schema_name.clone(), Link::Unresolved(target));
            }
        }

        let reference = EntityReference {
            id: NodeId::new(entity.logical_name.clone(), record.id),
            name,
        };

        Self {
            reference,
            kind: entity.kind,
            state: NodeState::Materialized {
                attributes: record.attributes,
                alias: record.alias,
            },
            to_one,
            to_many: BTreeMap::new(),
        }
    }

    /// Build a reference node from a bare identity.
    pub fn from_reference(reference: EntityReference, kind: NodeKind) -> Self {
        Self {
            reference,
            kind,
            state: NodeState::Reference,
            to_one: BTreeMap::new(),
            to_many: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.reference.id
    }

    pub fn logical_name(&self) -> &str {
        &self.reference.id.logical_name
    }

    pub fn uuid(&self) -> Uuid {
        self.reference.id.id
    }

    /// Display name, when known
    pub fn name(&self) -> Option<&str> {
        self.reference.name.as_deref()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.state, NodeState::Reference)
    }

    /// Identifier-only view of this node (available for both states)
    pub fn to_entity_reference(&self) -> EntityReference {
        self.reference.clone()
    }

    /// The full attribute bag of a materialized node.
    pub fn attributes(&self) -> Result<&Attributes, NodeError> {
        match &self.state {
            NodeState::Materialized { attributes, .. } => Ok(attributes),
            NodeState::Reference => Err(self.reference_access("*")),
        }
    }

    /// Read one attribute, honouring the alias prefix of joined records.
    pub fn attribute(&self, name: &str) -> Result<Option<&AttributeValue>, NodeError> {
        match &self.state {
            NodeState::Materialized { attributes, alias } => Ok(alias
                .as_ref()
                .and_then(|alias| attributes.get(&format!("{alias}.{name}")))
                .or_else(|| attributes.get(name))),
            NodeState::Reference => Err(self.reference_access(name)),
        }
    }

    pub fn text(&self, name: &str) -> Result<Option<&str>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(AttributeValue::Text(value)) => Ok(Some(value)),
            Some(other) => Err(self.type_mismatch(name, "text", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(AttributeValue::Bool(value)) => Ok(Some(*value)),
            Some(other) => Err(self.type_mismatch(name, "bool", other)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<Option<i64>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(AttributeValue::Integer(value)) => Ok(Some(*value)),
            Some(other) => Err(self.type_mismatch(name, "integer", other)),
        }
    }

    /// Option set value
    pub fn choice(&self, name: &str) -> Result<Option<i32>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(AttributeValue::Choice(value)) => Ok(Some(*value)),
            Some(other) => Err(self.type_mismatch(name, "choice", other)),
        }
    }

    /// Guid value, or the identifier carried by a lookup
    pub fn guid(&self, name: &str) -> Result<Option<Uuid>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(value @ (AttributeValue::Guid(_) | AttributeValue::Reference(_))) => {
                Ok(value.as_guid())
            }
            Some(other) => Err(self.type_mismatch(name, "guid", other)),
        }
    }

    pub fn reference(&self, name: &str) -> Result<Option<&EntityReference>, NodeError> {
        match self.attribute(name)? {
            None | Some(AttributeValue::Null) => Ok(None),
            Some(AttributeValue::Reference(value)) => Ok(Some(value)),
            Some(other) => Err(self.type_mismatch(name, "reference", other)),
        }
    }

    /// To-one link of a relationship (`None` when the foreign key is null)
    pub fn to_one(&self, relationship: &str) -> Option<&Link> {
        self.to_one.get(relationship)
    }

    /// Wired children of a relationship.
    pub fn to_many(&self, relationship: &str) -> impl Iterator<Item = &NodeId> {
        self.to_many.get(relationship).into_iter().flatten()
    }

    pub fn to_one_links(&self) -> impl Iterator<Item = (&str, &Link)> {
        self.to_one.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_many_links(&self) -> impl Iterator<Item = (&str, &BTreeSet<NodeId>)> {
        self.to_many.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Best-effort record for handing a node back to the entity store.
    ///
    /// Reference nodes only carry their primary id (and name when known).
    pub fn to_record(&self, schema: &EffectiveSchema) -> EntityRecord {
        let entity = schema.entity(self.logical_name());
        let mut record = EntityRecord::new(self.logical_name(), self.uuid());

        match &self.state {
            NodeState::Materialized { attributes, alias } => {
                record.attributes = attributes.clone();
                record.alias = alias.clone();
            }
            NodeState::Reference => {
                if let Some(entity) = entity {
                    record.set(entity.primary_id.clone(), self.uuid());
                    if let Some(name) = self.name() {
                        record.set(entity.name_attribute.clone(), name);
                    }
                }
            }
        }
        record
    }

    pub(crate) fn take_links(&mut self) -> BTreeMap<String, Link> {
        std::mem::take(&mut self.to_one)
    }

    pub(crate) fn clear_children(&mut self) {
        self.to_many.clear();
    }

    pub(crate) fn set_link(&mut self, relationship: &str, link: Link) {
        self.to_one.insert(relationship.to_string(), link);
    }

    pub(crate) fn clear_link(&mut self, relationship: &str) -> Option<Link> {
        self.to_one.remove(relationship)
    }

    pub(crate) fn add_child(&mut self, relationship: &str, child: NodeId) -> bool {
        self.to_many
            .entry(relationship.to_string())
            .or_default()
            .insert(child)
    }

    pub(crate) fn remove_child(&mut self, relationship: &str, child: &NodeId) -> bool {
        let Some(children) = self.to_many.get_mut(relationship) else {
            return false;
        };
        let removed = children.remove(child);
        if children.is_empty() {
            self.to_many.remove(relationship);
        }
        removed
    }

    fn reference_access(&self, attribute: &str) -> NodeError {
        error!(
            "Attribute {} requested from reference node {} (kind {})",
            attribute, self.reference, self.kind
        );
        NodeError::ReferenceNodeAccess {
            reference: self.reference.clone(),
            attribute: attribute.to_string(),
        }
    }

    fn type_mismatch(&self, attribute: &str, expected: &'static str, actual: &AttributeValue) -> NodeError {
        error!(
            "Attribute {} of {} is {}, expected {}",
            attribute,
            self.reference.id,
            actual.type_name(),
            expected
        );
        NodeError::AttributeType {
            node: self.reference.id.clone(),
            attribute: attribute.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }
}

/// Degradation policies applied to the children of an unmerged node.
pub mod degrade {
    use super::GraphNode;
    use crate::node::EntityReference;

    /// Keep the children pointing at the node as an identifier-only reference.
    pub fn to_reference(node: &GraphNode) -> Option<EntityReference> {
        Some(node.to_entity_reference())
    }

    /// Clear the children's link.
    pub fn discard(_node: &GraphNode) -> Option<EntityReference> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDefinition, SolutionDefinition};

    fn schema() -> EffectiveSchema {
        EffectiveSchema::compile(
            &SolutionDefinition::new("Test").entity(
                EntityDefinition::new("Test", "adx_webpage")
                    .kind(NodeKind::WebPage)
                    .columns(&["adx_partialurl", "adx_displayorder"])
                    .relationship("adx_website_webpage", "adx_websiteid", "adx_website")
                    .relationship("adx_webpage_webpage", "adx_parentpageid", "adx_webpage"),
            ),
        )
        .unwrap()
    }

    #[test]
    fn test_from_record_builds_unresolved_links() {
        let schema = schema();
        let website = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let record = EntityRecord::new("adx_webpage", Uuid::new_v4())
            .with("adx_name", "Home")
            .with_reference("adx_websiteid", "adx_website", website)
            .with("adx_parentpageid", parent);

        let node = GraphNode::from_record(schema.entity("adx_webpage").unwrap(), record);
        assert_eq!(node.name(), Some("Home"));
        assert_eq!(node.kind(), NodeKind::WebPage);
        assert_eq!(
            node.to_one("adx_website_webpage"),
            Some(&Link::Unresolved(EntityReference::new("adx_website", website)))
        );
        assert_eq!(
            node.to_one("adx_webpage_webpage").map(|l| l.target().id),
            Some(parent)
        );
    }

    #[test]
    fn test_reference_node_attribute_access_fails() {
        let node = GraphNode::from_reference(
            EntityReference::new("adx_webpage", Uuid::new_v4()).with_name("Home"),
            NodeKind::WebPage,
        );
        assert!(node.is_reference());
        assert_eq!(node.name(), Some("Home"));
        assert!(matches!(
            node.attribute("adx_partialurl"),
            Err(NodeError::ReferenceNodeAccess { .. })
        ));
        assert!(node.attributes().is_err());
    }

    #[test]
    fn test_typed_getters() {
        let schema = schema();
        let record = EntityRecord::new("adx_webpage", Uuid::new_v4())
            .with("adx_partialurl", "home")
            .with("adx_displayorder", 3i64);
        let node = GraphNode::from_record(schema.entity("adx_webpage").unwrap(), record);

        assert_eq!(node.text("adx_partialurl").unwrap(), Some("home"));
        assert_eq!(node.integer("adx_displayorder").unwrap(), Some(3));
        assert_eq!(node.text("adx_title").unwrap(), None);
        assert!(matches!(
            node.bool("adx_partialurl"),
            Err(NodeError::AttributeType { expected: "bool", .. })
        ));
    }

    #[test]
    fn test_alias_prefix_wins() {
        let schema = schema();
        let record = EntityRecord::new("adx_webpage", Uuid::new_v4())
            .with("adx_partialurl", "plain")
            .with("page.adx_partialurl", "aliased")
            .with_alias("page");
        let node = GraphNode::from_record(schema.entity("adx_webpage").unwrap(), record);
        assert_eq!(node.text("adx_partialurl").unwrap(), Some("aliased"));
    }

    #[test]
    fn test_to_record_of_reference() {
        let schema = schema();
        let id = Uuid::new_v4();
        let node = GraphNode::from_reference(
            EntityReference::new("adx_webpage", id).with_name("About"),
            NodeKind::WebPage,
        );
        let record = node.to_record(&schema);
        assert_eq!(record.get("adx_webpageid"), Some(&AttributeValue::Guid(id)));
        assert_eq!(record.get("adx_name"), Some(&AttributeValue::from("About")));
        assert_eq!(record.attributes.len(), 2);
    }

    #[test]
    fn test_remove_child_drops_empty_sets() {
        let mut node = GraphNode::from_reference(
            EntityReference::new("adx_website", Uuid::new_v4()),
            NodeKind::Website,
        );
        let child = NodeId::new("adx_webpage", Uuid::new_v4());
        assert!(node.add_child("adx_website_webpage", child.clone()));
        assert!(!node.add_child("adx_website_webpage", child.clone()));
        assert!(node.remove_child("adx_website_webpage", &child));
        assert_eq!(node.to_many_links().count(), 0);
    }
}
