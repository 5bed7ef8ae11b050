//! Query planning.
//!
//! Turns an [`EntityType`] plus caller parameters into a [`FetchSpec`] the
//! entity store can execute. Planning is pure: the entity type is never
//! modified and the same inputs always produce the same fetch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityType, STATE_CODE_ATTRIBUTE};
use crate::node::AttributeValue;

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    In,
    Null,
    NotNull,
}

/// A filter on one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<AttributeValue>,
}

impl Condition {
    pub fn equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::Equal,
            values: vec![value.into()],
        }
    }

    pub fn not_equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::NotEqual,
            values: vec![value.into()],
        }
    }

    pub fn in_values(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::In,
            values,
        }
    }

    pub fn null(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::Null,
            values: Vec::new(),
        }
    }

    pub fn not_null(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::NotNull,
            values: Vec::new(),
        }
    }

    /// Evaluate the condition against an attribute value (absent counts as null).
    pub fn evaluate(&self, value: Option<&AttributeValue>) -> bool {
        let value = value.filter(|v| !v.is_null());
        match self.operator {
            ConditionOperator::Null => value.is_none(),
            ConditionOperator::NotNull => value.is_some(),
            ConditionOperator::Equal | ConditionOperator::In => {
                value.is_some_and(|v| self.values.iter().any(|expected| v.matches(expected)))
            }
            ConditionOperator::NotEqual => {
                value.map_or(true, |v| !self.values.iter().any(|expected| v.matches(expected)))
            }
        }
    }
}

/// An inner join to a related entity.
///
/// `from` is the column on the linked entity, `to` the column on the parent
/// (the query root or the enclosing link).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub entity: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkSpec>,
}

impl LinkSpec {
    pub fn new(entity: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            from: from.into(),
            to: to.into(),
            alias: None,
            filters: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn with_link(mut self, link: LinkSpec) -> Self {
        self.links.push(link);
        self
    }

    /// The innermost link of a single-branch chain.
    fn leaf_mut(&mut self) -> &mut LinkSpec {
        if self.links.is_empty() {
            return self;
        }
        let last = self.links.len() - 1;
        self.links[last].leaf_mut()
    }
}

/// Specification of one fetch against the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSpec {
    pub entity: String,
    /// Requested columns; empty means every column.
    pub attributes: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Condition>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    pub distinct: bool,
    /// Bypass any result cache kept by the data source.
    pub skip_cache: bool,
}

impl FetchSpec {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            attributes: Vec::new(),
            filters: Vec::new(),
            links: Vec::new(),
            distinct: false,
            skip_cache: false,
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn with_link(mut self, link: LinkSpec) -> Self {
        self.links.push(link);
        self
    }
}

/// Where caller-supplied links are attached in a linked query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPlacement {
    /// Join directly from the queried entity.
    #[default]
    Root,
    /// Join from the innermost entity of the declared link path.
    Leaf,
}

/// How an entity type is fetched during a full build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum QueryStrategy {
    /// Every record of the type (active ones only, when an active state is declared).
    Scan,
    /// Records reachable through `path` plus the caller's links.
    Linked {
        #[serde(default)]
        path: Vec<LinkSpec>,
        #[serde(default)]
        placement: LinkPlacement,
    },
}

impl QueryStrategy {
    /// Caller links joined straight from the entity.
    pub fn linked() -> Self {
        QueryStrategy::Linked {
            path: Vec::new(),
            placement: LinkPlacement::Root,
        }
    }

    /// Caller links joined at the end of `path`.
    pub fn linked_through(path: LinkSpec) -> Self {
        QueryStrategy::Linked {
            path: vec![path],
            placement: LinkPlacement::Leaf,
        }
    }
}

/// Caller-supplied parameters, e.g. the website that scopes the content map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParameters {
    pub links: Vec<LinkSpec>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict linked queries to records that belong to one website.
    pub fn for_website(website_id: Uuid) -> Self {
        Self::new().with_link(
            LinkSpec::new("adx_website", "adx_websiteid", "adx_websiteid")
                .with_alias("website")
                .with_filter(Condition::equal("adx_websiteid", website_id)),
        )
    }

    pub fn with_link(mut self, link: LinkSpec) -> Self {
        self.links.push(link);
        self
    }
}

/// Builds fetch specifications from entity types.
pub struct QueryPlanner;

impl QueryPlanner {
    /// Plan the full-build query of an entity type.
    ///
    /// Returns `None` when the type declares no query strategy.
    pub fn create_query(entity: &EntityType, parameters: &QueryParameters) -> Option<FetchSpec> {
        let strategy = entity.query.as_ref()?;

        let mut fetch = FetchSpec::new(&entity.logical_name)
            .with_attributes(entity.fetch_columns());
        fetch.distinct = true;
        fetch.skip_cache = true;

        if let Some(state) = entity.active_state {
            fetch = fetch.with_filter(Condition::equal(
                STATE_CODE_ATTRIBUTE,
                AttributeValue::Choice(state),
            ));
        }

        match strategy {
            QueryStrategy::Scan => {}
            QueryStrategy::Linked { path, placement } => {
                let mut links = path.clone();
                let caller_links = parameters.links.iter().cloned();
                match links.last_mut() {
                    Some(last) if *placement == LinkPlacement::Leaf => {
                        last.leaf_mut().links.extend(caller_links);
                    }
                    _ => fetch.links.extend(caller_links),
                }
                links.append(&mut fetch.links);
                fetch.links = links;
            }
        }

        Some(fetch)
    }

    /// The full-build query restricted to a set of primary ids.
    ///
    /// Types without a query strategy fall back to a plain id lookup. Used to
    /// check that refreshed records still satisfy the declared links. The
    /// state filter is left out so inactive records can still be told apart
    /// from missing ones.
    pub fn create_id_query(
        entity: &EntityType,
        parameters: &QueryParameters,
        ids: &[Uuid],
    ) -> FetchSpec {
        let mut fetch = Self::create_query(entity, parameters).unwrap_or_else(|| {
            let mut fetch = FetchSpec::new(&entity.logical_name)
                .with_attributes(entity.fetch_columns());
            fetch.distinct = true;
            fetch.skip_cache = true;
            fetch
        });
        fetch
            .filters
            .retain(|condition| condition.attribute != STATE_CODE_ATTRIBUTE);

        let values = ids.iter().copied().map(AttributeValue::Guid).collect();
        fetch.with_filter(Condition::in_values(entity.primary_id.clone(), values))
    }
}
