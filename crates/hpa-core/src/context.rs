//! The calling-context tree (CCT) unifier.
//!
//! A [`Context`] is the tuple `(parent, relation, scope)`. Lookup/insert is
//! the hot path of ingestion, so each node's child map is guarded by its own
//! lock rather than one lock for the whole tree (fine-grained locking "only
//! during insert", per the concurrency model).

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::scope::{Relation, Scope};

/// Arena index of a [`Context`]. Stable for the lifetime of the arena;
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u32);

struct ContextNode {
    parent: Option<ContextId>,
    relation: Relation,
    scope: Scope,
    children: Mutex<HashMap<(u8, Relation, Vec<u8>), ContextId>>,
    final_id: std::sync::OnceLock<u32>,
}

fn child_key(relation: Relation, scope: &Scope) -> (u8, Relation, Vec<u8>) {
    (scope.sort_rank(), relation, scope.sort_key())
}

/// Arena-allocated calling-context tree.
///
/// Back-references (child→parent) are indices into the arena, never
/// owning pointers, matching the "cyclic graphs and back-references"
/// design note.
pub struct ContextArena {
    nodes: RwLock<Vec<ContextNode>>,
}

impl Default for ContextArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextArena {
    /// Creates a new arena containing only the root context (scope
    /// `Global`).
    #[must_use]
    pub fn new() -> Self {
        let root = ContextNode {
            parent: None,
            relation: Relation::Subscope,
            scope: Scope::Global,
            children: Mutex::new(HashMap::new()),
            final_id: std::sync::OnceLock::new(),
        };
        Self {
            nodes: RwLock::new(vec![root]),
        }
    }

    /// The unique root context.
    #[must_use]
    pub const fn root(&self) -> ContextId {
        ContextId(0)
    }

    /// Inserts or returns the existing child of `parent` for the given
    /// `(relation, scope)` key.
    ///
    /// At-most-one context exists per `(parent, relation, scope)` triple,
    /// across all concurrent callers.
    pub fn context_insert(&self, parent: ContextId, relation: Relation, scope: Scope) -> ContextId {
        let key = child_key(relation, &scope);

        // Lock only the parent's child map; the read lock on the arena
        // covers concurrent readers appending via other parents.
        {
            let nodes = self.nodes.read();
            let parent_node = &nodes[parent.0 as usize];
            let mut children = parent_node.children.lock();
            if let Some(&existing) = children.get(&key) {
                return existing;
            }
            // Reserve the slot under the child-map lock so a second
            // concurrent inserter for the same key observes it below,
            // but the arena push itself needs a write lock, so we must
            // drop `nodes`/`children` first. To avoid a second racer
            // slipping in between, we insert a placeholder id immediately
            // after allocating it, still holding `children`.
            drop(children);
            drop(nodes);
        }

        // Allocate the new node. A small race window exists between the
        // check above and the write lock below; re-check after acquiring
        // the write lock to preserve at-most-one semantics.
        let mut nodes = self.nodes.write();
        let parent_node_children_has = {
            let parent_node = &nodes[parent.0 as usize];
            let children = parent_node.children.lock();
            children.get(&key).copied()
        };
        if let Some(existing) = parent_node_children_has {
            return existing;
        }

        let new_id = ContextId(nodes.len() as u32);
        nodes.push(ContextNode {
            parent: Some(parent),
            relation,
            scope,
            children: Mutex::new(HashMap::new()),
            final_id: std::sync::OnceLock::new(),
        });
        let parent_node = &nodes[parent.0 as usize];
        let mut children = parent_node.children.lock();
        let _ = children.insert(key, new_id);
        new_id
    }

    /// Number of contexts in the arena, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether only the root context exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// The parent of a context, or `None` for the root.
    #[must_use]
    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.nodes.read()[id.0 as usize].parent
    }

    /// The relation of a context to its parent.
    #[must_use]
    pub fn relation(&self, id: ContextId) -> Relation {
        self.nodes.read()[id.0 as usize].relation
    }

    /// The scope of a context.
    #[must_use]
    pub fn scope(&self, id: ContextId) -> Scope {
        self.nodes.read()[id.0 as usize].scope
    }

    /// The final, contiguous identifier assigned by [`Self::finalize_identifiers`],
    /// if finalization has run.
    #[must_use]
    pub fn final_id(&self, id: ContextId) -> Option<u32> {
        self.nodes.read()[id.0 as usize].final_id.get().copied()
    }

    /// Assigns final, contiguous identifiers to every context.
    ///
    /// All contexts of depth `d` receive contiguous identifiers before any
    /// at depth `d+1`; ordering within a depth is a deterministic function
    /// of parent identifier and child sort key.
    pub fn finalize_identifiers(&self) {
        let nodes = self.nodes.read();
        let mut next_id: u32 = 0;

        // group children by parent arena index, preserving the
        // (sort_rank, scope bytes) order via BTreeMap-style sort.
        let mut children_of: Vec<Vec<ContextId>> = vec![Vec::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                children_of[parent.0 as usize].push(ContextId(idx as u32));
            }
        }
        for children in &mut children_of {
            children.sort_by_key(|&ContextId(idx)| {
                let n = &nodes[idx as usize];
                (n.scope.sort_rank(), n.scope.sort_key())
            });
        }

        // BFS by depth, assigning ids level by level.
        let root = ContextId(0);
        let _ = nodes[root.0 as usize].final_id.set(next_id);
        next_id += 1;
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for parent in &frontier {
                for &child in &children_of[parent.0 as usize] {
                    let _ = nodes[child.0 as usize].final_id.set(next_id);
                    next_id += 1;
                    next_frontier.push(child);
                }
            }
            frontier = next_frontier;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_uniqued_per_parent_relation_scope() {
        let arena = ContextArena::new();
        let root = arena.root();
        let a = arena.context_insert(root, Relation::Call, Scope::Function(1));
        let b = arena.context_insert(root, Relation::Call, Scope::Function(1));
        let c = arena.context_insert(root, Relation::Call, Scope::Function(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn finalize_assigns_contiguous_ids_by_depth() {
        let arena = ContextArena::new();
        let root = arena.root();
        let main = arena.context_insert(root, Relation::Call, Scope::Function(1));
        let foo = arena.context_insert(main, Relation::Call, Scope::Function(2));
        let bar = arena.context_insert(foo, Relation::Call, Scope::Function(3));
        arena.finalize_identifiers();

        assert_eq!(arena.final_id(root), Some(0));
        assert_eq!(arena.final_id(main), Some(1));
        assert_eq!(arena.final_id(foo), Some(2));
        assert_eq!(arena.final_id(bar), Some(3));

        // dense range [0, N)
        let n = arena.len() as u32;
        let mut seen: Vec<u32> = (0..n).filter_map(|i| arena.final_id(ContextId(i))).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn context_insert_returns_same_handle_idempotently() {
        let arena = ContextArena::new();
        let root = arena.root();
        let a = arena.context_insert(root, Relation::Subscope, Scope::Unknown);
        let b = arena.context_insert(root, Relation::Subscope, Scope::Unknown);
        assert_eq!(a, b);
    }
}
