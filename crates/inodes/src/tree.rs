// Path: crates/inodes/src/tree.rs

//! Tree-inode state: clean-from-source or materialized-in-overlay.
//!
//! The two states are mutually exclusive. A clean tree knows its source
//! hash and fetches its child list on demand (the fetched list is a cache,
//! not a divergence). The first mutation anywhere below a tree forces the
//! materialized state, whose child map is authoritative and mirrored to the
//! overlay.

use std::collections::BTreeMap;

use canopy_types::hash::Hash;
use canopy_types::inode::ChildEntry;
use canopy_types::object::Tree;
use canopy_types::path::PathComponent;

/// The state of one tree inode.
pub enum TreeState {
    /// Fully derivable from a source tree.
    Clean {
        /// The source tree's hash.
        source: Hash,
        /// The demand-fetched child list; `None` until first use.
        cached: Option<BTreeMap<PathComponent, ChildEntry>>,
    },
    /// Diverged from the source; the child map is authoritative.
    Materialized {
        /// The effective children.
        children: BTreeMap<PathComponent, ChildEntry>,
    },
}

impl TreeState {
    /// A clean tree whose child list has not been fetched yet.
    pub fn clean(source: Hash) -> Self {
        TreeState::Clean {
            source,
            cached: None,
        }
    }

    /// A materialized tree with the given children.
    pub fn materialized(children: BTreeMap<PathComponent, ChildEntry>) -> Self {
        TreeState::Materialized { children }
    }

    /// True once the tree has diverged from its source.
    pub fn is_materialized(&self) -> bool {
        matches!(self, TreeState::Materialized { .. })
    }

    /// The source hash while clean.
    pub fn source(&self) -> Option<Hash> {
        match self {
            TreeState::Clean { source, .. } => Some(*source),
            TreeState::Materialized { .. } => None,
        }
    }

    /// The child map, if fetched or materialized.
    pub fn children(&self) -> Option<&BTreeMap<PathComponent, ChildEntry>> {
        match self {
            TreeState::Clean { cached, .. } => cached.as_ref(),
            TreeState::Materialized { children } => Some(children),
        }
    }

    /// Mutable access to the child map, if fetched or materialized.
    pub fn children_mut(&mut self) -> Option<&mut BTreeMap<PathComponent, ChildEntry>> {
        match self {
            TreeState::Clean { cached, .. } => cached.as_mut(),
            TreeState::Materialized { children } => Some(children),
        }
    }

    /// Builds a child map from a parsed source tree.
    pub fn child_map_from(tree: &Tree) -> BTreeMap<PathComponent, ChildEntry> {
        tree.entries()
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    ChildEntry {
                        name: entry.name.clone(),
                        mode: entry.mode,
                        kind: entry.kind,
                        inode: None,
                        source_hash: Some(entry.hash),
                    },
                )
            })
            .collect()
    }
}

/// Finds a child by name. Case-insensitive mounts fall back to an ASCII
/// case-folded scan; the stored name wins.
pub fn find_child<'a>(
    children: &'a BTreeMap<PathComponent, ChildEntry>,
    name: &PathComponent,
    case_sensitive: bool,
) -> Option<&'a ChildEntry> {
    if let Some(entry) = children.get(name) {
        return Some(entry);
    }
    if !case_sensitive {
        return children.values().find(|e| e.name.eq_ignore_case(name));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_types::object::{EntryKind, TreeEntry};

    fn component(name: &str) -> PathComponent {
        PathComponent::new(name).unwrap()
    }

    #[test]
    fn child_map_preserves_source_hashes() {
        let tree = Tree::new(
            Hash::NULL,
            vec![
                TreeEntry::new(component("a"), Hash::digest(b"a"), EntryKind::Regular),
                TreeEntry::new(component("d"), Hash::digest(b"d"), EntryKind::Tree),
            ],
        )
        .unwrap();

        let map = TreeState::child_map_from(&tree);
        assert_eq!(map.len(), 2);
        let a = map.get(&component("a")).unwrap();
        assert_eq!(a.source_hash, Some(Hash::digest(b"a")));
        assert_eq!(a.kind, EntryKind::Regular);
        assert!(a.inode.is_none());
    }

    #[test]
    fn clean_state_has_no_children_until_fetched() {
        let state = TreeState::clean(Hash::digest(b"root"));
        assert!(!state.is_materialized());
        assert!(state.children().is_none());
        assert_eq!(state.source(), Some(Hash::digest(b"root")));
    }

    #[test]
    fn case_folded_find() {
        let mut children = BTreeMap::new();
        let name = component("ReadMe");
        children.insert(
            name.clone(),
            ChildEntry::materialized(name, EntryKind::Regular, EntryKind::Regular.mode()),
        );

        assert!(find_child(&children, &component("readme"), true).is_none());
        let found = find_child(&children, &component("readme"), false).unwrap();
        assert_eq!(found.name.as_str(), "ReadMe");
    }
}
