//! Content Map Nodes
//!
//! Nodes are either materialized (they carry the attribute bag of a fetched
//! record) or references (only the identity is known). Relationships are
//! stored on both ends: a child holds a to-one [`Link`] per relationship and
//! the parent holds the set of wired children.

#[allow(clippy::module_inception)]
pub mod node;
pub mod record;
pub mod views;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use node::{degrade, GraphNode, Link, NodeError, NodeState};
pub use record::{AttributeValue, Attributes, EntityRecord, EntityReference, NodeId};
pub use views::{
    AccessRule, AccessRuleWebRole, Blog, BlogPost, ContentSnippet, NodeView, PageTemplate,
    PublishingState, SiteMarker, SiteSetting, WebFile, WebLink, WebLinkSet, WebPage, WebRole,
    Website,
};

// ============================================================================
// Node Kinds
// ============================================================================

/// Typed classification of a node, selecting its typed view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Any entity without a dedicated view
    #[default]
    Generic,
    Website,
    WebPage,
    PublishingState,
    PageTemplate,
    /// Web page access control rule
    AccessRule,
    WebRole,
    /// Intersect entity between access rules and web roles
    AccessRuleWebRole,
    WebLinkSet,
    WebLink,
    WebFile,
    SiteMarker,
    SiteSetting,
    ContentSnippet,
    WebsiteLanguage,
    Blog,
    BlogPost,
}

impl NodeKind {
    /// Get the string representation used in logs and serialized schemas
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Generic => "generic",
            NodeKind::Website => "website",
            NodeKind::WebPage => "web_page",
            NodeKind::PublishingState => "publishing_state",
            NodeKind::PageTemplate => "page_template",
            NodeKind::AccessRule => "access_rule",
            NodeKind::WebRole => "web_role",
            NodeKind::AccessRuleWebRole => "access_rule_web_role",
            NodeKind::WebLinkSet => "web_link_set",
            NodeKind::WebLink => "web_link",
            NodeKind::WebFile => "web_file",
            NodeKind::SiteMarker => "site_marker",
            NodeKind::SiteSetting => "site_setting",
            NodeKind::ContentSnippet => "content_snippet",
            NodeKind::WebsiteLanguage => "website_language",
            NodeKind::Blog => "blog",
            NodeKind::BlogPost => "blog_post",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
