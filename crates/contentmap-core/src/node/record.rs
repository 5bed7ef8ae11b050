//! Identities, attribute values and raw records exchanged with the entity store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of a node: entity logical name plus unique identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub logical_name: String,
    pub id: Uuid,
}

impl NodeId {
    pub fn new(logical_name: impl Into<String>, id: Uuid) -> Self {
        Self {
            logical_name: logical_name.into(),
            id,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.logical_name, self.id)
    }
}

/// Identifier-only view of an entity: its [`NodeId`] and, when known, its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    #[serde(flatten)]
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityReference {
    pub fn new(logical_name: impl Into<String>, id: Uuid) -> Self {
        Self {
            id: NodeId::new(logical_name, id),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn logical_name(&self) -> &str {
        &self.id.logical_name
    }
}

impl From<NodeId> for EntityReference {
    fn from(id: NodeId) -> Self {
        Self { id, name: None }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.id, name),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A single attribute value of a remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Guid(Uuid),
    /// Option set or state code.
    Choice(i32),
    /// RFC 3339 timestamp, kept as text.
    DateTime(String),
    /// Lookup to another entity.
    Reference(EntityReference),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Decimal(_) => "decimal",
            AttributeValue::Text(_) => "text",
            AttributeValue::Guid(_) => "guid",
            AttributeValue::Choice(_) => "choice",
            AttributeValue::DateTime(_) => "datetime",
            AttributeValue::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// The identifier carried by this value, if it is a guid or a lookup.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            AttributeValue::Guid(id) => Some(*id),
            AttributeValue::Reference(reference) => Some(reference.id.id),
            _ => None,
        }
    }

    /// Loose equality used when evaluating query conditions.
    ///
    /// Guids match lookups that carry the same identifier, and choices match
    /// integers of the same value.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Choice(a), AttributeValue::Integer(b))
            | (AttributeValue::Integer(b), AttributeValue::Choice(a)) => i64::from(*a) == *b,
            _ => match (self.as_guid(), other.as_guid()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<Uuid> for AttributeValue {
    fn from(value: Uuid) -> Self {
        AttributeValue::Guid(value)
    }
}

impl From<EntityReference> for AttributeValue {
    fn from(value: EntityReference) -> Self {
        AttributeValue::Reference(value)
    }
}

/// Attribute bag of a record, ordered by attribute name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A raw record as returned by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub logical_name: String,
    pub id: Uuid,
    #[serde(default)]
    pub attributes: Attributes,
    /// Prefix of aliased columns when the record comes from a joined query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl EntityRecord {
    pub fn new(logical_name: impl Into<String>, id: Uuid) -> Self {
        Self {
            logical_name: logical_name.into(),
            id,
            attributes: Attributes::new(),
            alias: None,
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style lookup setter.
    pub fn with_reference(
        self,
        name: impl Into<String>,
        logical_name: impl Into<String>,
        id: Uuid,
    ) -> Self {
        self.with(name, EntityReference::new(logical_name, id))
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.logical_name.clone(), self.id)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Keep only the named columns (plus the primary id column, when present).
    pub fn project(&self, columns: &[String], primary_id: &str) -> EntityRecord {
        if columns.is_empty() {
            return self.clone();
        }
        let attributes = self
            .attributes
            .iter()
            .filter(|(name, _)| name.as_str() == primary_id || columns.iter().any(|c| c == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        EntityRecord {
            logical_name: self.logical_name.clone(),
            id: self.id,
            attributes,
            alias: self.alias.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_order() {
        let a = NodeId::new("adx_webpage", Uuid::nil());
        let b = NodeId::new("adx_website", Uuid::nil());
        assert!(a < b);
        assert_eq!(
            a.to_string(),
            "adx_webpage:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_attribute_value_matches() {
        let id = Uuid::new_v4();
        let reference = AttributeValue::from(EntityReference::new("adx_website", id));
        assert!(reference.matches(&AttributeValue::Guid(id)));
        assert!(AttributeValue::Choice(1).matches(&AttributeValue::Integer(1)));
        assert!(!AttributeValue::Choice(1).matches(&AttributeValue::Integer(0)));
        assert!(AttributeValue::from("a").matches(&AttributeValue::from("a")));
    }

    #[test]
    fn test_attribute_value_serialization() {
        let json = serde_json::to_string(&AttributeValue::Choice(0)).unwrap();
        assert_eq!(json, r#"{"type":"choice","value":0}"#);

        let json = serde_json::to_string(&AttributeValue::Null).unwrap();
        assert_eq!(json, r#"{"type":"null"}"#);
    }

    #[test]
    fn test_record_projection_keeps_primary_id() {
        let id = Uuid::new_v4();
        let record = EntityRecord::new("adx_webpage", id)
            .with("adx_webpageid", id)
            .with("adx_name", "Home")
            .with("adx_partialurl", "/");

        let projected = record.project(&["adx_name".to_string()], "adx_webpageid");
        assert!(projected.get("adx_webpageid").is_some());
        assert!(projected.get("adx_name").is_some());
        assert!(projected.get("adx_partialurl").is_none());
    }
}
