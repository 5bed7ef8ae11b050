//! Typed views over graph nodes.
//!
//! A view borrows a node together with the map it lives in, so relationship
//! accessors can follow links without another lookup by the caller.

use uuid::Uuid;

use super::{GraphNode, NodeError, NodeId, NodeKind};
use crate::map::{ContentMap, Related};
use crate::schema::relationships as rel;

/// A typed wrapper around a [`GraphNode`] of one [`NodeKind`].
pub trait NodeView<'g>: Sized {
    /// Kind of node this view wraps
    const KIND: NodeKind;

    fn wrap(map: &'g ContentMap, node: &'g GraphNode) -> Self;

    fn node(&self) -> &'g GraphNode;

    fn map(&self) -> &'g ContentMap;

    /// Wrap a node if it has the right kind.
    fn try_wrap(map: &'g ContentMap, node: &'g GraphNode) -> Option<Self> {
        (node.kind() == Self::KIND).then(|| Self::wrap(map, node))
    }

    fn id(&self) -> &'g NodeId {
        self.node().id()
    }

    fn uuid(&self) -> Uuid {
        self.node().uuid()
    }

    fn name(&self) -> Option<&'g str> {
        self.node().name()
    }

    fn is_reference(&self) -> bool {
        self.node().is_reference()
    }

    /// Target of a to-one relationship.
    fn related(&self, relationship: &str) -> Option<Related<'g>> {
        self.map().related(self.node(), relationship)
    }

    /// Target of a to-one relationship as a typed view, when it is in the graph.
    fn parent<V: NodeView<'g>>(&self, relationship: &str) -> Option<V> {
        match self.related(relationship)? {
            Related::Node(node) => V::try_wrap(self.map(), node),
            Related::Detached(_) => None,
        }
    }

    /// Wired children of a relationship as typed views.
    fn children<V: NodeView<'g>>(&self, relationship: &str) -> Vec<V> {
        let map = self.map();
        map.children(self.node(), relationship)
            .filter_map(|node| V::try_wrap(map, node))
            .collect()
    }
}

macro_rules! node_view {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name<'g> {
            map: &'g ContentMap,
            node: &'g GraphNode,
        }

        impl<'g> NodeView<'g> for $name<'g> {
            const KIND: NodeKind = $kind;

            fn wrap(map: &'g ContentMap, node: &'g GraphNode) -> Self {
                Self { map, node }
            }

            fn node(&self) -> &'g GraphNode {
                self.node
            }

            fn map(&self) -> &'g ContentMap {
                self.map
            }
        }
    };
}

// ============================================================================
// Site structure
// ============================================================================

node_view!(
    /// A portal website, root of the content map.
    Website => NodeKind::Website
);

impl<'g> Website<'g> {
    pub fn primary_domain_name(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_primarydomainname")
    }

    pub fn partial_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_partialurl")
    }

    pub fn parent_website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_PARENT_WEBSITE)
    }

    pub fn web_pages(&self) -> Vec<WebPage<'g>> {
        self.children(rel::WEBSITE_WEBPAGE)
    }

    /// The home page: the page of this website without a parent page.
    pub fn home_page(&self) -> Option<WebPage<'g>> {
        self.web_pages()
            .into_iter()
            .find(|page| page.node.to_one(rel::WEBPAGE_WEBPAGE).is_none())
    }

    pub fn site_settings(&self) -> Vec<SiteSetting<'g>> {
        self.children(rel::WEBSITE_SITESETTING)
    }

    pub fn site_markers(&self) -> Vec<SiteMarker<'g>> {
        self.children(rel::WEBSITE_SITEMARKER)
    }

    pub fn content_snippets(&self) -> Vec<ContentSnippet<'g>> {
        self.children(rel::WEBSITE_CONTENTSNIPPET)
    }

    pub fn web_link_sets(&self) -> Vec<WebLinkSet<'g>> {
        self.children(rel::WEBSITE_WEBLINKSET)
    }

    pub fn web_roles(&self) -> Vec<WebRole<'g>> {
        self.children(rel::WEBSITE_WEBROLE)
    }

    pub fn publishing_states(&self) -> Vec<PublishingState<'g>> {
        self.children(rel::WEBSITE_PUBLISHINGSTATE)
    }

    pub fn blogs(&self) -> Vec<Blog<'g>> {
        self.children(rel::WEBSITE_BLOG)
    }
}

node_view!(
    /// A page in the site map.
    WebPage => NodeKind::WebPage
);

impl<'g> WebPage<'g> {
    pub fn partial_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_partialurl")
    }

    pub fn title(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_title")
    }

    pub fn hidden_from_sitemap(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_hiddenfromsitemap")?.unwrap_or(false))
    }

    pub fn display_order(&self) -> Result<Option<i64>, NodeError> {
        self.node.integer("adx_displayorder")
    }

    /// Whether this is a root (language-neutral) page
    pub fn is_root(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_isroot")?.unwrap_or(false))
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_WEBPAGE)
    }

    pub fn parent_page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_WEBPAGE)
    }

    pub fn child_pages(&self) -> Vec<WebPage<'g>> {
        self.children(rel::WEBPAGE_WEBPAGE)
    }

    pub fn publishing_state(&self) -> Option<PublishingState<'g>> {
        self.parent(rel::PUBLISHINGSTATE_WEBPAGE)
    }

    pub fn page_template(&self) -> Option<PageTemplate<'g>> {
        self.parent(rel::PAGETEMPLATE_WEBPAGE)
    }

    pub fn access_rules(&self) -> Vec<AccessRule<'g>> {
        self.children(rel::WEBPAGE_ACCESSRULE)
    }

    pub fn web_files(&self) -> Vec<WebFile<'g>> {
        self.children(rel::WEBPAGE_WEBFILE)
    }

    pub fn web_links(&self) -> Vec<WebLink<'g>> {
        self.children(rel::WEBPAGE_WEBLINK)
    }

    pub fn blogs(&self) -> Vec<Blog<'g>> {
        self.children(rel::WEBPAGE_BLOG)
    }
}

node_view!(PublishingState => NodeKind::PublishingState);

impl<'g> PublishingState<'g> {
    pub fn is_visible(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_isvisible")?.unwrap_or(false))
    }

    pub fn display_order(&self) -> Result<Option<i64>, NodeError> {
        self.node.integer("adx_displayorder")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_PUBLISHINGSTATE)
    }

    pub fn web_pages(&self) -> Vec<WebPage<'g>> {
        self.children(rel::PUBLISHINGSTATE_WEBPAGE)
    }
}

node_view!(PageTemplate => NodeKind::PageTemplate);

impl<'g> PageTemplate<'g> {
    pub fn rewrite_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_rewriteurl")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_PAGETEMPLATE)
    }

    pub fn web_pages(&self) -> Vec<WebPage<'g>> {
        self.children(rel::PAGETEMPLATE_WEBPAGE)
    }
}

// ============================================================================
// Access control
// ============================================================================

node_view!(
    /// Grants or restricts a right on a page (and optionally its children).
    AccessRule => NodeKind::AccessRule
);

impl<'g> AccessRule<'g> {
    /// Right option set value
    pub fn right(&self) -> Result<Option<i32>, NodeError> {
        self.node.choice("adx_right")
    }

    /// Scope option set value (absent before 9.0)
    pub fn scope(&self) -> Result<Option<i32>, NodeError> {
        self.node.choice("adx_scope")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_ACCESSRULE)
    }

    pub fn web_page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_ACCESSRULE)
    }

    pub fn web_role_links(&self) -> Vec<AccessRuleWebRole<'g>> {
        self.children(rel::ACCESSRULE_WEBROLE_RULE)
    }

    /// Roles tied to this rule through the intersect entity.
    pub fn web_roles(&self) -> Vec<WebRole<'g>> {
        self.web_role_links()
            .iter()
            .filter_map(|link| link.web_role())
            .collect()
    }
}

node_view!(WebRole => NodeKind::WebRole);

impl<'g> WebRole<'g> {
    pub fn anonymous_users_role(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_anonymoususersrole")?.unwrap_or(false))
    }

    pub fn authenticated_users_role(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_authenticatedusersrole")?.unwrap_or(false))
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_WEBROLE)
    }

    pub fn access_rules(&self) -> Vec<AccessRule<'g>> {
        self.children::<AccessRuleWebRole>(rel::ACCESSRULE_WEBROLE_ROLE)
            .iter()
            .filter_map(|link| link.access_rule())
            .collect()
    }
}

node_view!(
    /// Intersect node tying an access rule to a web role.
    AccessRuleWebRole => NodeKind::AccessRuleWebRole
);

impl<'g> AccessRuleWebRole<'g> {
    pub fn access_rule(&self) -> Option<AccessRule<'g>> {
        self.parent(rel::ACCESSRULE_WEBROLE_RULE)
    }

    pub fn web_role(&self) -> Option<WebRole<'g>> {
        self.parent(rel::ACCESSRULE_WEBROLE_ROLE)
    }
}

// ============================================================================
// Navigation
// ============================================================================

node_view!(WebLinkSet => NodeKind::WebLinkSet);

impl<'g> WebLinkSet<'g> {
    pub fn title(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_title")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_WEBLINKSET)
    }

    pub fn web_links(&self) -> Vec<WebLink<'g>> {
        self.children(rel::WEBLINKSET_WEBLINK)
    }
}

node_view!(WebLink => NodeKind::WebLink);

impl<'g> WebLink<'g> {
    pub fn external_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_externalurl")
    }

    pub fn display_order(&self) -> Result<Option<i64>, NodeError> {
        self.node.integer("adx_displayorder")
    }

    pub fn open_in_new_window(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_openinnewwindow")?.unwrap_or(false))
    }

    pub fn web_link_set(&self) -> Option<Related<'g>> {
        self.related(rel::WEBLINKSET_WEBLINK)
    }

    /// Page the link points at, if any.
    pub fn page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_WEBLINK)
    }

    pub fn parent_link(&self) -> Option<Related<'g>> {
        self.related(rel::WEBLINK_PARENTWEBLINK)
    }

    pub fn child_links(&self) -> Vec<WebLink<'g>> {
        self.children(rel::WEBLINK_PARENTWEBLINK)
    }
}

// ============================================================================
// Content
// ============================================================================

node_view!(WebFile => NodeKind::WebFile);

impl<'g> WebFile<'g> {
    pub fn partial_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_partialurl")
    }

    pub fn hidden_from_sitemap(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_hiddenfromsitemap")?.unwrap_or(false))
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_WEBFILE)
    }

    pub fn parent_page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_WEBFILE)
    }

    pub fn publishing_state(&self) -> Option<PublishingState<'g>> {
        self.parent(rel::PUBLISHINGSTATE_WEBFILE)
    }
}

node_view!(SiteMarker => NodeKind::SiteMarker);

impl<'g> SiteMarker<'g> {
    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_SITEMARKER)
    }

    pub fn page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_SITEMARKER)
    }
}

node_view!(SiteSetting => NodeKind::SiteSetting);

impl<'g> SiteSetting<'g> {
    pub fn value(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_value")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_SITESETTING)
    }
}

node_view!(ContentSnippet => NodeKind::ContentSnippet);

impl<'g> ContentSnippet<'g> {
    pub fn value(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_value")
    }

    /// Snippet type option set value
    pub fn snippet_type(&self) -> Result<Option<i32>, NodeError> {
        self.node.choice("adx_type")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_CONTENTSNIPPET)
    }
}

node_view!(Blog => NodeKind::Blog);

impl<'g> Blog<'g> {
    pub fn partial_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_partialurl")
    }

    pub fn summary(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_summary")
    }

    pub fn website(&self) -> Option<Related<'g>> {
        self.related(rel::WEBSITE_BLOG)
    }

    pub fn parent_page(&self) -> Option<Related<'g>> {
        self.related(rel::WEBPAGE_BLOG)
    }

    pub fn posts(&self) -> Vec<BlogPost<'g>> {
        self.children(rel::BLOG_BLOGPOST)
    }
}

node_view!(BlogPost => NodeKind::BlogPost);

impl<'g> BlogPost<'g> {
    pub fn partial_url(&self) -> Result<Option<&'g str>, NodeError> {
        self.node.text("adx_partialurl")
    }

    pub fn published(&self) -> Result<bool, NodeError> {
        Ok(self.node.bool("adx_published")?.unwrap_or(false))
    }

    pub fn blog(&self) -> Option<Blog<'g>> {
        self.parent(rel::BLOG_BLOGPOST)
    }
}
