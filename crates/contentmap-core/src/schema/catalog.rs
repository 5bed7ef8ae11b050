//! Built-in portal solutions and the catalog that combines them.

use tracing::{debug, info, warn};

use super::definition::{EntityDefinition, ManyRelationshipDefinition, ManySide, SolutionDefinition};
use super::query::{LinkSpec, QueryStrategy};
use super::version::{InstalledSolutions, SolutionVersion};
use super::{EffectiveSchema, SchemaError};
use crate::node::NodeKind;

/// Solution names of the built-in catalog.
pub mod solutions {
    pub const PORTAL_BASE: &str = "PortalBase";
    pub const PORTAL_BLOGS: &str = "PortalBlogs";
    pub const PORTAL_LANGUAGES: &str = "PortalLanguages";
}

/// Entity logical names of the built-in catalog.
pub mod entities {
    pub const WEBSITE: &str = "adx_website";
    pub const WEB_PAGE: &str = "adx_webpage";
    pub const PUBLISHING_STATE: &str = "adx_publishingstate";
    pub const PAGE_TEMPLATE: &str = "adx_pagetemplate";
    pub const ACCESS_RULE: &str = "adx_webpageaccesscontrolrule";
    pub const WEB_ROLE: &str = "adx_webrole";
    pub const ACCESS_RULE_WEB_ROLE: &str = "adx_webpageaccesscontrolrule_webrole";
    pub const WEB_LINK_SET: &str = "adx_weblinkset";
    pub const WEB_LINK: &str = "adx_weblink";
    pub const WEB_FILE: &str = "adx_webfile";
    pub const SITE_MARKER: &str = "adx_sitemarker";
    pub const SITE_SETTING: &str = "adx_sitesetting";
    pub const CONTENT_SNIPPET: &str = "adx_contentsnippet";
    pub const WEBSITE_LANGUAGE: &str = "adx_websitelanguage";
    pub const BLOG: &str = "adx_blog";
    pub const BLOG_POST: &str = "adx_blogpost";
}

/// Relationship schema names of the built-in catalog.
pub mod relationships {
    pub const WEBSITE_PARENT_WEBSITE: &str = "adx_website_parentwebsite";
    pub const WEBSITE_WEBPAGE: &str = "adx_website_webpage";
    pub const WEBPAGE_WEBPAGE: &str = "adx_webpage_webpage";
    pub const PUBLISHINGSTATE_WEBPAGE: &str = "adx_publishingstate_webpage";
    pub const PAGETEMPLATE_WEBPAGE: &str = "adx_pagetemplate_webpage";
    pub const WEBSITE_PUBLISHINGSTATE: &str = "adx_website_publishingstate";
    pub const WEBSITE_PAGETEMPLATE: &str = "adx_website_pagetemplate";
    pub const WEBSITE_ACCESSRULE: &str = "adx_website_webpageaccesscontrolrule";
    pub const WEBPAGE_ACCESSRULE: &str = "adx_webpage_webpageaccesscontrolrule";
    pub const WEBSITE_WEBROLE: &str = "adx_website_webrole";
    /// Many-to-many between access rules and web roles
    pub const ACCESSRULE_WEBROLE: &str = "adx_webpageaccesscontrolrule_webrole";
    pub const ACCESSRULE_WEBROLE_RULE: &str = "adx_webpageaccesscontrolrule_webrole_rule";
    pub const ACCESSRULE_WEBROLE_ROLE: &str = "adx_webpageaccesscontrolrule_webrole_role";
    pub const WEBSITE_WEBLINKSET: &str = "adx_website_weblinkset";
    pub const WEBLINKSET_WEBLINK: &str = "adx_weblinkset_weblink";
    pub const WEBPAGE_WEBLINK: &str = "adx_webpage_weblink";
    pub const WEBLINK_PARENTWEBLINK: &str = "adx_weblink_parentweblink";
    pub const WEBSITE_WEBFILE: &str = "adx_website_webfile";
    pub const WEBPAGE_WEBFILE: &str = "adx_webpage_webfile";
    pub const PUBLISHINGSTATE_WEBFILE: &str = "adx_publishingstate_webfile";
    pub const WEBSITE_SITEMARKER: &str = "adx_website_sitemarker";
    pub const WEBPAGE_SITEMARKER: &str = "adx_webpage_sitemarker";
    pub const WEBSITE_SITESETTING: &str = "adx_website_sitesetting";
    pub const WEBSITE_CONTENTSNIPPET: &str = "adx_website_contentsnippet";
    pub const WEBSITE_WEBSITELANGUAGE: &str = "adx_website_websitelanguage";
    pub const WEBSITELANGUAGE_WEBPAGE: &str = "adx_websitelanguage_webpage";
    pub const WEBSITE_BLOG: &str = "adx_website_blog";
    pub const WEBPAGE_BLOG: &str = "adx_webpage_blog";
    pub const BLOG_BLOGPOST: &str = "adx_blog_blogpost";
}

use entities as e;
use relationships as r;
use solutions as s;

const V8_0: SolutionVersion = SolutionVersion::new(8, 0);
const V9_0: SolutionVersion = SolutionVersion::new(9, 0);

/// Registry of solution definitions, kept in dependency order.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    solutions: Vec<SolutionDefinition>,
}

impl SchemaCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in portal solutions.
    pub fn builtin() -> Self {
        Self::new()
            .with(portal_base())
            .with(portal_languages())
            .with(portal_blogs())
    }

    /// Register a solution after every solution already registered.
    pub fn with(mut self, solution: SolutionDefinition) -> Self {
        self.register(solution);
        self
    }

    /// Register a solution; registering a name twice deep-merges into the first registration.
    pub fn register(&mut self, solution: SolutionDefinition) {
        if let Some(existing) = self.solutions.iter_mut().find(|s| s.name == solution.name) {
            for (key, entity) in solution.entities {
                let merged = match existing.entities.remove(&key) {
                    Some(previous) => previous.merge(entity),
                    None => entity,
                };
                existing.entities.insert(key, merged);
            }
            existing.many_relationships.extend(solution.many_relationships);
            existing.solutions.extend(solution.solutions);
        } else {
            self.solutions.push(solution);
        }
    }

    pub fn solution(&self, name: &str) -> Option<&SolutionDefinition> {
        self.solutions.iter().find(|s| s.name == name)
    }

    /// Registered solution names, in dependency order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.solutions.iter().map(|s| s.name.as_str())
    }

    /// Union of the installed solutions, filtered to the installed versions.
    ///
    /// Installed solutions the catalog doesn't know are skipped.
    pub fn definition(&self, installed: &InstalledSolutions) -> SolutionDefinition {
        for name in installed.names() {
            if self.solution(name).is_none() {
                warn!("Installed solution {} is not part of the catalog, skipping", name);
            }
        }

        let union = self
            .solutions
            .iter()
            .filter(|solution| installed.contains(&solution.name))
            .cloned()
            .reduce(SolutionDefinition::union)
            .unwrap_or_else(|| SolutionDefinition::new("Empty"));

        debug!(
            "Combined solutions into {} ({} entity definitions)",
            union.name,
            union.entities.len()
        );

        union.filter(installed)
    }

    /// Compile the effective schema for a set of installed solutions.
    pub fn effective(&self, installed: &InstalledSolutions) -> Result<EffectiveSchema, SchemaError> {
        let schema = EffectiveSchema::compile(&self.definition(installed))?;
        info!(
            "Effective schema: {} entity types across solutions [{}]",
            schema.entities().count(),
            schema.solutions().collect::<Vec<_>>().join(", ")
        );
        Ok(schema)
    }

    /// Like [`effective`](Self::effective), but fails on unknown solutions.
    pub fn effective_strict(
        &self,
        installed: &InstalledSolutions,
    ) -> Result<EffectiveSchema, SchemaError> {
        if let Some(unknown) = installed.names().find(|name| self.solution(name).is_none()) {
            return Err(SchemaError::unknown_solution(unknown));
        }
        self.effective(installed)
    }
}

// ============================================================================
// Built-in solutions
// ============================================================================

fn portal_base() -> SolutionDefinition {
    let base = |logical_name: &str| EntityDefinition::new(s::PORTAL_BASE, logical_name).active_state(0);

    SolutionDefinition::new(s::PORTAL_BASE)
        .entity(
            base(e::WEBSITE)
                .kind(NodeKind::Website)
                .introduced(V8_0)
                .columns(&["adx_partialurl", "adx_primarydomainname"])
                .relationship(r::WEBSITE_PARENT_WEBSITE, "adx_parentwebsiteid", e::WEBSITE)
                .query(QueryStrategy::Scan),
        )
        .entity(
            base(e::WEB_PAGE)
                .kind(NodeKind::WebPage)
                .check_before_refresh(true)
                .columns(&[
                    "adx_partialurl",
                    "adx_title",
                    "adx_hiddenfromsitemap",
                    "adx_displayorder",
                    "adx_excludefromsearch",
                ])
                .column_since("adx_isroot", V9_0)
                .relationship(r::WEBSITE_WEBPAGE, "adx_websiteid", e::WEBSITE)
                .relationship(r::WEBPAGE_WEBPAGE, "adx_parentpageid", e::WEB_PAGE)
                .relationship(r::PUBLISHINGSTATE_WEBPAGE, "adx_publishingstateid", e::PUBLISHING_STATE)
                .relationship(r::PAGETEMPLATE_WEBPAGE, "adx_pagetemplateid", e::PAGE_TEMPLATE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::PUBLISHING_STATE)
                .kind(NodeKind::PublishingState)
                .columns(&["adx_isvisible", "adx_isdefault", "adx_displayorder"])
                .relationship(r::WEBSITE_PUBLISHINGSTATE, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::PAGE_TEMPLATE)
                .kind(NodeKind::PageTemplate)
                .columns(&["adx_rewriteurl", "adx_type"])
                .relationship(r::WEBSITE_PAGETEMPLATE, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::ACCESS_RULE)
                .kind(NodeKind::AccessRule)
                .columns(&["adx_right"])
                .column_since("adx_scope", V9_0)
                .relationship(r::WEBSITE_ACCESSRULE, "adx_websiteid", e::WEBSITE)
                .relationship(r::WEBPAGE_ACCESSRULE, "adx_webpageid", e::WEB_PAGE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::WEB_ROLE)
                .kind(NodeKind::WebRole)
                .columns(&["adx_anonymoususersrole", "adx_authenticatedusersrole"])
                .relationship(r::WEBSITE_WEBROLE, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            EntityDefinition::new(s::PORTAL_BASE, e::ACCESS_RULE_WEB_ROLE)
                .kind(NodeKind::AccessRuleWebRole)
                .relationship(
                    r::ACCESSRULE_WEBROLE_RULE,
                    "adx_webpageaccesscontrolruleid",
                    e::ACCESS_RULE,
                )
                .relationship(r::ACCESSRULE_WEBROLE_ROLE, "adx_webroleid", e::WEB_ROLE)
                .query(QueryStrategy::linked_through(LinkSpec::new(
                    e::WEB_ROLE,
                    "adx_webroleid",
                    "adx_webroleid",
                ))),
        )
        .many_relationship(ManyRelationshipDefinition {
            schema_name: r::ACCESSRULE_WEBROLE.to_string(),
            intersect_entity: e::ACCESS_RULE_WEB_ROLE.to_string(),
            entity1: ManySide {
                entity: e::ACCESS_RULE.to_string(),
                intersect_attribute: "adx_webpageaccesscontrolruleid".to_string(),
                relationship: r::ACCESSRULE_WEBROLE_RULE.to_string(),
            },
            entity2: ManySide {
                entity: e::WEB_ROLE.to_string(),
                intersect_attribute: "adx_webroleid".to_string(),
                relationship: r::ACCESSRULE_WEBROLE_ROLE.to_string(),
            },
            solution: s::PORTAL_BASE.to_string(),
            introduced: None,
        })
        .entity(
            base(e::WEB_LINK_SET)
                .kind(NodeKind::WebLinkSet)
                .columns(&["adx_title"])
                .relationship(r::WEBSITE_WEBLINKSET, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::WEB_LINK)
                .kind(NodeKind::WebLink)
                .columns(&[
                    "adx_externalurl",
                    "adx_displayorder",
                    "adx_openinnewwindow",
                    "adx_displaypagechildlinks",
                ])
                .relationship(r::WEBLINKSET_WEBLINK, "adx_weblinksetid", e::WEB_LINK_SET)
                .relationship(r::WEBPAGE_WEBLINK, "adx_pageid", e::WEB_PAGE)
                .relationship(r::WEBLINK_PARENTWEBLINK, "adx_parentweblinkid", e::WEB_LINK)
                .query(QueryStrategy::linked_through(LinkSpec::new(
                    e::WEB_LINK_SET,
                    "adx_weblinksetid",
                    "adx_weblinksetid",
                ))),
        )
        .entity(
            base(e::WEB_FILE)
                .kind(NodeKind::WebFile)
                .check_before_refresh(true)
                .columns(&["adx_partialurl", "adx_hiddenfromsitemap", "adx_displayorder"])
                .relationship(r::WEBSITE_WEBFILE, "adx_websiteid", e::WEBSITE)
                .relationship(r::WEBPAGE_WEBFILE, "adx_parentpageid", e::WEB_PAGE)
                .relationship(r::PUBLISHINGSTATE_WEBFILE, "adx_publishingstateid", e::PUBLISHING_STATE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::SITE_MARKER)
                .kind(NodeKind::SiteMarker)
                .relationship(r::WEBSITE_SITEMARKER, "adx_websiteid", e::WEBSITE)
                .relationship(r::WEBPAGE_SITEMARKER, "adx_pageid", e::WEB_PAGE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::SITE_SETTING)
                .kind(NodeKind::SiteSetting)
                .columns(&["adx_value"])
                .relationship(r::WEBSITE_SITESETTING, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            base(e::CONTENT_SNIPPET)
                .kind(NodeKind::ContentSnippet)
                .columns(&["adx_value", "adx_type"])
                .relationship(r::WEBSITE_CONTENTSNIPPET, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
}

fn portal_languages() -> SolutionDefinition {
    SolutionDefinition::new(s::PORTAL_LANGUAGES)
        .entity(
            EntityDefinition::new(s::PORTAL_LANGUAGES, e::WEBSITE_LANGUAGE)
                .kind(NodeKind::WebsiteLanguage)
                .introduced(V9_0)
                .active_state(0)
                .columns(&["adx_languagecode"])
                .relationship(r::WEBSITE_WEBSITELANGUAGE, "adx_websiteid", e::WEBSITE)
                .query(QueryStrategy::linked()),
        )
        // extends the base page with its language
        .entity(
            EntityDefinition::new(s::PORTAL_LANGUAGES, e::WEB_PAGE)
                .column_since("adx_webpagelanguageid", V9_0)
                .relationship_since(
                    r::WEBSITELANGUAGE_WEBPAGE,
                    "adx_webpagelanguageid",
                    e::WEBSITE_LANGUAGE,
                    V9_0,
                ),
        )
}

fn portal_blogs() -> SolutionDefinition {
    SolutionDefinition::new(s::PORTAL_BLOGS)
        .entity(
            EntityDefinition::new(s::PORTAL_BLOGS, e::BLOG)
                .kind(NodeKind::Blog)
                .columns(&["adx_partialurl", "adx_summary"])
                .relationship(r::WEBSITE_BLOG, "adx_websiteid", e::WEBSITE)
                .relationship(r::WEBPAGE_BLOG, "adx_parentpageid", e::WEB_PAGE)
                .query(QueryStrategy::linked()),
        )
        .entity(
            EntityDefinition::new(s::PORTAL_BLOGS, e::BLOG_POST)
                .kind(NodeKind::BlogPost)
                .columns(&["adx_partialurl", "adx_published", "adx_date"])
                .relationship(r::BLOG_BLOGPOST, "adx_blogid", e::BLOG)
                .query(QueryStrategy::linked_through(LinkSpec::new(
                    e::BLOG,
                    "adx_blogid",
                    "adx_blogid",
                ))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(entries: &[(&str, SolutionVersion)]) -> InstalledSolutions {
        entries
            .iter()
            .fold(InstalledSolutions::new(), |acc, (name, version)| acc.with(*name, *version))
    }

    #[test]
    fn test_builtin_base_compiles() {
        let schema = SchemaCatalog::builtin()
            .effective(&installed(&[(s::PORTAL_BASE, V9_0)]))
            .unwrap();

        assert!(schema.contains_entity(e::WEBSITE));
        assert!(schema.contains_entity(e::WEB_PAGE));
        assert!(!schema.contains_entity(e::BLOG));
        assert!(schema.many_relationship(r::ACCESSRULE_WEBROLE).is_some());
        assert_eq!(
            schema.entity(e::ACCESS_RULE_WEB_ROLE).unwrap().primary_id,
            "adx_webpageaccesscontrolrule_webroleid"
        );
    }

    #[test]
    fn test_languages_extend_web_page_from_nine() {
        let catalog = SchemaCatalog::builtin();

        let v9 = catalog
            .effective(&installed(&[(s::PORTAL_BASE, V9_0), (s::PORTAL_LANGUAGES, V9_0)]))
            .unwrap();
        let page = v9.entity(e::WEB_PAGE).unwrap();
        assert!(page.relationship(r::WEBSITELANGUAGE_WEBPAGE).is_some());
        assert!(page.columns.contains(&"adx_isroot".to_string()));
        assert!(v9.contains_entity(e::WEBSITE_LANGUAGE));

        let v8 = catalog
            .effective(&installed(&[
                (s::PORTAL_BASE, SolutionVersion::new(8, 4)),
                (s::PORTAL_LANGUAGES, SolutionVersion::new(8, 4)),
            ]))
            .unwrap();
        let page = v8.entity(e::WEB_PAGE).unwrap();
        assert!(page.relationship(r::WEBSITELANGUAGE_WEBPAGE).is_none());
        assert!(!page.columns.contains(&"adx_isroot".to_string()));
        assert!(!v8.contains_entity(e::WEBSITE_LANGUAGE));
    }

    #[test]
    fn test_unknown_solution() {
        let catalog = SchemaCatalog::builtin();
        let with_unknown = installed(&[(s::PORTAL_BASE, V9_0), ("Contoso", V9_0)]);

        assert!(catalog.effective(&with_unknown).is_ok());
        assert!(matches!(
            catalog.effective_strict(&with_unknown),
            Err(SchemaError::UnknownSolution { .. })
        ));
    }

    #[test]
    fn test_register_same_name_merges() {
        let catalog = SchemaCatalog::new()
            .with(
                SolutionDefinition::new("Custom")
                    .entity(EntityDefinition::new("Custom", "new_thing").columns(&["new_a"])),
            )
            .with(
                SolutionDefinition::new("Custom")
                    .entity(EntityDefinition::new("Custom", "new_thing").columns(&["new_b"])),
            );
        assert_eq!(catalog.names().count(), 1);

        let schema = catalog
            .effective(&installed(&[("Custom", SolutionVersion::new(1, 0))]))
            .unwrap();
        assert_eq!(schema.entity("new_thing").unwrap().columns, vec!["new_a", "new_b"]);
    }
}
