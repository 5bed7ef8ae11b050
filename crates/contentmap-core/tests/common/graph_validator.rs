//! Graph validation utilities.
//!
//! Checks the link structure of a content map through its public API,
//! independently of `ContentMap::validate`.

use contentmap_core::map::ContentMap;
use contentmap_core::node::Link;

/// Check every link of the map; returns a description of each problem found.
///
/// - a resolved link targets a materialized node present in the map;
/// - that node lists the child exactly once under the same relationship;
/// - every listed child points back at its parent.
pub fn check_links(map: &ContentMap) -> Vec<String> {
    let mut problems = Vec::new();

    for node in map.all_nodes() {
        for (relationship, link) in node.to_one_links() {
            let Link::Resolved(target) = link else {
                continue;
            };
            match map.try_get(target) {
                None => problems.push(format!(
                    "{} --{}--> {} dangles",
                    node.id(),
                    relationship,
                    target
                )),
                Some(parent) if parent.is_reference() => problems.push(format!(
                    "{} --{}--> {} resolves to a reference node",
                    node.id(),
                    relationship,
                    target
                )),
                Some(parent) => {
                    let listed = parent
                        .to_many(relationship)
                        .filter(|child| *child == node.id())
                        .count();
                    if listed != 1 {
                        problems.push(format!(
                            "{} lists {} {} times under {}",
                            target,
                            node.id(),
                            listed,
                            relationship
                        ));
                    }
                }
            }
        }

        for (relationship, children) in node.to_many_links() {
            for child in children {
                let points_back = map
                    .try_get(child)
                    .and_then(|child| child.to_one(relationship))
                    .is_some_and(|link| matches!(link, Link::Resolved(parent) if parent == node.id()));
                if !points_back {
                    problems.push(format!(
                        "{} lists {} under {} but the child does not point back",
                        node.id(),
                        child,
                        relationship
                    ));
                }
            }
        }
    }

    problems
}

/// Panic with every violation when the map is not structurally sound.
pub fn assert_valid(map: &ContentMap) {
    let mut problems = check_links(map);
    problems.extend(map.validate());
    assert!(
        problems.is_empty(),
        "content map has {} problems:\n{}",
        problems.len(),
        problems.join("\n")
    );
}

/// Number of resolved to-one links in the map.
pub fn edge_count(map: &ContentMap) -> usize {
    map.all_nodes()
        .flat_map(|node| node.to_one_links())
        .filter(|(_, link)| link.is_resolved())
        .count()
}
