//! Content Map
//!
//! The mutable graph of portal entities. Nodes are indexed per entity type
//! and linked in both directions:
//!
//! - a child holds one [`Link`] per to-one relationship;
//! - a parent holds the set of children wired to it.
//!
//! A [`Link::Resolved`] link always targets a materialized node present in
//! the map, and that node lists the child. Every other known foreign key is
//! a [`Link::Unresolved`] reference, tracked in a pending index so that the
//! children of a node are wired as soon as it is merged, whichever of the
//! two arrives first.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::node::{
    degrade, EntityRecord, EntityReference, GraphNode, Link, NodeId, NodeView, WebPage, Website,
};
use crate::schema::{entities, EffectiveSchema};

/// Target of a to-one relationship as seen from a child.
#[derive(Debug, Clone, Copy)]
pub enum Related<'g> {
    /// The target is in the map (possibly as a reference node).
    Node(&'g GraphNode),
    /// Only the foreign key is known.
    Detached(&'g EntityReference),
}

impl<'g> Related<'g> {
    pub fn id(&self) -> &'g NodeId {
        match self {
            Related::Node(node) => node.id(),
            Related::Detached(reference) => &reference.id,
        }
    }

    pub fn name(&self) -> Option<&'g str> {
        match self {
            Related::Node(node) => node.name(),
            Related::Detached(reference) => reference.name.as_deref(),
        }
    }

    /// Whether only the identity of the target is available
    pub fn is_reference(&self) -> bool {
        match self {
            Related::Node(node) => node.is_reference(),
            Related::Detached(_) => true,
        }
    }

    pub fn node(&self) -> Option<&'g GraphNode> {
        match self {
            Related::Node(node) => Some(node),
            Related::Detached(_) => None,
        }
    }
}

/// Statistics about a content map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentMapStats {
    pub node_count: usize,
    pub reference_count: usize,
    pub resolved_links: usize,
    pub unresolved_links: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
}

type PendingLinks = BTreeSet<(String, NodeId)>;

/// In-memory graph of portal entities, built against one [`EffectiveSchema`].
#[derive(Clone)]
pub struct ContentMap {
    schema: Arc<EffectiveSchema>,
    nodes: BTreeMap<String, HashMap<NodeId, GraphNode>>,
    /// Target id -> (relationship, child) of every unresolved link.
    pending: HashMap<NodeId, PendingLinks>,
}

impl ContentMap {
    /// Create an empty map
    pub fn new(schema: Arc<EffectiveSchema>) -> Self {
        Self {
            schema,
            nodes: BTreeMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &EffectiveSchema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<EffectiveSchema> {
        Arc::clone(&self.schema)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Point lookup by identity
    pub fn try_get(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id.logical_name)?.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.try_get(id).is_some()
    }

    fn get_mut(&mut self, id: &NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(&id.logical_name)?.get_mut(id)
    }

    fn is_materialized(&self, id: &NodeId) -> bool {
        self.try_get(id).is_some_and(|node| !node.is_reference())
    }

    /// Point lookup as a typed view (`None` if absent or of another kind)
    pub fn view<'g, V: NodeView<'g>>(&'g self, id: &NodeId) -> Option<V> {
        self.try_get(id).and_then(|node| V::try_wrap(self, node))
    }

    /// Every node of a type as typed views
    pub fn views<'g, V: NodeView<'g>>(&'g self, logical_name: &str) -> Vec<V> {
        self.nodes(logical_name)
            .filter_map(|node| V::try_wrap(self, node))
            .collect()
    }

    pub fn website(&self, id: Uuid) -> Option<Website<'_>> {
        self.view(&NodeId::new(entities::WEBSITE, id))
    }

    pub fn web_page(&self, id: Uuid) -> Option<WebPage<'_>> {
        self.view(&NodeId::new(entities::WEB_PAGE, id))
    }

    /// Nodes of one entity type, in no particular order
    pub fn nodes(&self, logical_name: &str) -> impl Iterator<Item = &GraphNode> {
        self.nodes.get(logical_name).into_iter().flat_map(|bucket| bucket.values())
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values().flat_map(|bucket| bucket.values())
    }

    /// Entity types with at least one node
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.values().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count(&self, logical_name: &str) -> usize {
        self.nodes.get(logical_name).map_or(0, |bucket| bucket.len())
    }

    /// Target of a to-one relationship of `node`.
    pub fn related<'g>(&'g self, node: &'g GraphNode, relationship: &str) -> Option<Related<'g>> {
        match node.to_one(relationship)? {
            Link::Resolved(id) => self.try_get(id).map(Related::Node),
            Link::Unresolved(reference) => Some(
                self.try_get(&reference.id)
                    .map_or(Related::Detached(reference), Related::Node),
            ),
        }
    }

    /// Wired children of `node` for a relationship.
    pub fn children<'g>(
        &'g self,
        node: &'g GraphNode,
        relationship: &str,
    ) -> impl Iterator<Item = &'g GraphNode> + 'g {
        node.to_many(relationship).filter_map(move |id| self.try_get(id))
    }

    pub fn stats(&self) -> ContentMapStats {
        let mut stats = ContentMapStats::default();
        for (logical_name, bucket) in &self.nodes {
            stats.nodes_by_type.insert(logical_name.clone(), bucket.len());
            for node in bucket.values() {
                stats.node_count += 1;
                if node.is_reference() {
                    stats.reference_count += 1;
                }
                for (_, link) in node.to_one_links() {
                    if link.is_resolved() {
                        stats.resolved_links += 1;
                    } else {
                        stats.unresolved_links += 1;
                    }
                }
            }
        }
        stats
    }

    // =========================================================================
    // Adding nodes
    // =========================================================================

    /// Add a fetched record, or return the node already present.
    ///
    /// A reference node with the same identity is upgraded to the
    /// materialized node. Records of types outside the schema are ignored.
    pub fn add_or_get_existing(&mut self, record: EntityRecord) -> Option<&GraphNode> {
        let Some(entity) = self.schema.entity(&record.logical_name) else {
            warn!(
                "Ignoring record {}:{} of unknown entity type",
                record.logical_name, record.id
            );
            return None;
        };

        let id = record.node_id();
        if !self.is_materialized(&id) {
            let node = GraphNode::from_record(entity, record);
            self.merge(node);
        }
        self.try_get(&id)
    }

    /// Add an identifier-only node, or return the node already present.
    pub fn add_reference(&mut self, reference: EntityReference) -> Option<&GraphNode> {
        let Some(entity) = self.schema.entity(reference.logical_name()) else {
            warn!("Ignoring reference {} of unknown entity type", reference);
            return None;
        };

        let id = reference.id.clone();
        if !self.contains(&id) {
            let node = GraphNode::from_reference(reference, entity.kind);
            self.merge(node);
        }
        self.try_get(&id)
    }

    /// Add many records; returns how many nodes were added.
    pub fn add_range(&mut self, records: impl IntoIterator<Item = EntityRecord>) -> usize {
        let before = self.len();
        for record in records {
            self.add_or_get_existing(record);
        }
        self.len().saturating_sub(before)
    }

    /// Replace a node with a freshly fetched record.
    ///
    /// Children of the old node keep a reference to it and are wired again
    /// to the new node.
    pub fn replace(&mut self, record: EntityRecord) -> Option<&GraphNode> {
        self.unmerge(&record.node_id(), degrade::to_reference);
        self.add_or_get_existing(record)
    }

    /// Remove a node that is no longer active; its children keep a reference to it.
    pub fn deactivate(&mut self, id: &NodeId) -> Option<GraphNode> {
        self.unmerge(id, degrade::to_reference)
    }

    /// Remove a node that no longer exists; its children lose their link.
    pub fn remove(&mut self, id: &NodeId) -> Option<GraphNode> {
        self.unmerge(id, degrade::discard)
    }

    // =========================================================================
    // Merge / unmerge
    // =========================================================================

    /// Insert a node and wire it to the rest of the map.
    ///
    /// Outgoing links are wired to targets that are present and
    /// materialized. When the node itself is materialized, every child
    /// waiting on its identity is wired to it. A node already present with
    /// the same identity is unmerged first.
    pub fn merge(&mut self, mut node: GraphNode) {
        let id = node.id().clone();
        if self.contains(&id) {
            self.unmerge(&id, degrade::to_reference);
        }

        let links = node.take_links();
        node.clear_children();
        let materialized = !node.is_reference();

        trace!("Merging {} ({} links)", id, links.len());
        self.nodes
            .entry(id.logical_name.clone())
            .or_default()
            .insert(id.clone(), node);

        for (relationship, link) in links {
            let target = match link {
                Link::Resolved(target) => EntityReference::from(target),
                Link::Unresolved(target) => target,
            };
            if self.is_materialized(&target.id) {
                self.associate(&relationship, &id, &target.id);
            } else {
                self.set_unresolved(&id, &relationship, target);
            }
        }

        if materialized {
            let waiting: Vec<(String, NodeId)> = self
                .pending
                .get(&id)
                .map(|links| links.iter().cloned().collect())
                .unwrap_or_default();
            for (relationship, child) in waiting {
                self.associate(&relationship, &child, &id);
            }
        }
    }

    /// Detach a node from the map and remove it.
    ///
    /// Children wired to the node get the link returned by `degrade`
    /// (an unresolved reference, or no link at all).
    pub fn unmerge<F>(&mut self, id: &NodeId, degrade: F) -> Option<GraphNode>
    where
        F: FnOnce(&GraphNode) -> Option<EntityReference>,
    {
        let node = self.try_get(id)?;
        let degraded = degrade(node);

        let outgoing: Vec<(String, Link)> = node
            .to_one_links()
            .map(|(relationship, link)| (relationship.to_string(), link.clone()))
            .collect();
        let incoming: Vec<(String, NodeId)> = node
            .to_many_links()
            .flat_map(|(relationship, children)| {
                children
                    .iter()
                    .map(move |child| (relationship.to_string(), child.clone()))
            })
            .collect();

        for (relationship, link) in outgoing {
            match link {
                Link::Resolved(parent) => self.disassociate(&relationship, id, &parent, None),
                Link::Unresolved(target) => {
                    self.unpend(&target.id, &relationship, id);
                    if let Some(node) = self.get_mut(id) {
                        node.clear_link(&relationship);
                    }
                }
            }
        }

        for (relationship, child) in incoming {
            self.disassociate(&relationship, &child, id, degraded.clone());
        }

        let bucket = self.nodes.get_mut(&id.logical_name)?;
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.nodes.remove(&id.logical_name);
        }
        trace!("Unmerged {}", id);
        removed
    }

    /// Wire `child` to `parent` through a to-one relationship.
    ///
    /// Returns `false` (and changes nothing) when either node is absent or
    /// the parent is a reference node.
    pub fn associate(&mut self, relationship: &str, child: &NodeId, parent: &NodeId) -> bool {
        if !self.is_materialized(parent) {
            return false;
        }
        let previous = match self.get_mut(child) {
            Some(node) => node.clear_link(relationship),
            None => return false,
        };

        match previous {
            Some(Link::Resolved(old)) if &old != parent => {
                if let Some(old) = self.get_mut(&old) {
                    old.remove_child(relationship, child);
                }
            }
            Some(Link::Unresolved(target)) => self.unpend(&target.id, relationship, child),
            _ => {}
        }

        if let Some(node) = self.get_mut(child) {
            node.set_link(relationship, Link::Resolved(parent.clone()));
        }
        if let Some(node) = self.get_mut(parent) {
            node.add_child(relationship, child.clone());
        }
        true
    }

    /// Unwire `child` from `parent`.
    ///
    /// If the child was wired to `parent`, its link becomes `degraded`
    /// (unresolved) or is cleared.
    pub fn disassociate(
        &mut self,
        relationship: &str,
        child: &NodeId,
        parent: &NodeId,
        degraded: Option<EntityReference>,
    ) {
        if let Some(node) = self.get_mut(parent) {
            node.remove_child(relationship, child);
        }

        let Some(node) = self.get_mut(child) else {
            return;
        };
        if !matches!(node.to_one(relationship), Some(Link::Resolved(target)) if target == parent) {
            return;
        }
        node.clear_link(relationship);
        if let Some(reference) = degraded {
            self.set_unresolved(child, relationship, reference);
        }
    }

    fn set_unresolved(&mut self, child: &NodeId, relationship: &str, target: EntityReference) {
        let key = target.id.clone();
        let Some(node) = self.get_mut(child) else {
            return;
        };
        node.set_link(relationship, Link::Unresolved(target));
        self.pending
            .entry(key)
            .or_default()
            .insert((relationship.to_string(), child.clone()));
    }

    fn unpend(&mut self, target: &NodeId, relationship: &str, child: &NodeId) {
        if let Some(links) = self.pending.get_mut(target) {
            links.remove(&(relationship.to_string(), child.clone()));
            if links.is_empty() {
                self.pending.remove(target);
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Check the structural invariants of the map; returns every violation found.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for (logical_name, bucket) in &self.nodes {
            if bucket.is_empty() {
                violations.push(format!("empty bucket for {logical_name}"));
            }
            for (key, node) in bucket {
                if key != node.id() || &node.id().logical_name != logical_name {
                    violations.push(format!("{} indexed as {} in {}", node.id(), key, logical_name));
                }
                self.validate_links(node, &mut violations);
            }
        }

        for (target, links) in &self.pending {
            for (relationship, child) in links {
                let recorded = self.try_get(child).and_then(|node| node.to_one(relationship));
                match recorded {
                    Some(Link::Unresolved(reference)) if &reference.id == target => {}
                    _ => violations.push(format!(
                        "stale pending link {child} -[{relationship}]-> {target}"
                    )),
                }
            }
        }

        violations
    }

    fn validate_links(&self, node: &GraphNode, violations: &mut Vec<String>) {
        let id = node.id();
        let entity = self.schema.entity(node.logical_name());

        for (relationship, link) in node.to_one_links() {
            let declared = entity.and_then(|e| e.relationship(relationship));
            match declared {
                Some(declared) if declared.referenced_entity == link.target().logical_name => {}
                _ => violations.push(format!("{id} has undeclared link {relationship}")),
            }

            match link {
                Link::Resolved(target) => match self.try_get(target) {
                    None => violations.push(format!("{id} -[{relationship}]-> missing {target}")),
                    Some(parent) if parent.is_reference() => {
                        violations.push(format!("{id} -[{relationship}]-> reference node {target}"))
                    }
                    Some(parent) => {
                        if !parent.to_many(relationship).any(|c| c == id) {
                            violations.push(format!(
                                "{target} does not list {id} under {relationship}"
                            ));
                        }
                    }
                },
                Link::Unresolved(reference) => {
                    let tracked = self.pending.get(&reference.id).is_some_and(|links| {
                        links.contains(&(relationship.to_string(), id.clone()))
                    });
                    if !tracked {
                        violations.push(format!(
                            "{id} -[{relationship}]-> {} is not tracked",
                            reference.id
                        ));
                    }
                    if self.is_materialized(&reference.id) {
                        violations.push(format!(
                            "{id} -[{relationship}]-> {} is unresolved but the target is present",
                            reference.id
                        ));
                    }
                }
            }
        }

        for (relationship, children) in node.to_many_links() {
            if children.is_empty() {
                violations.push(format!("{id} has an empty child set {relationship}"));
            }
            for child in children {
                match self.try_get(child).and_then(|c| c.to_one(relationship)) {
                    Some(Link::Resolved(parent)) if parent == id => {}
                    _ => violations.push(format!(
                        "{id} lists {child} under {relationship} but the child is not wired to it"
                    )),
                }
            }
        }
    }
}

impl PartialEq for ContentMap {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.pending == other.pending
    }
}

impl fmt::Debug for ContentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentMap")
            .field("nodes", &self.len())
            .field("entity_types", &self.nodes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
