//! Load modules: binary images referenced by contexts and threads.

use std::collections::HashMap;

/// Stable integer id for a [`LoadModule`]. Id `0` is reserved for the
/// synthetic placeholder module (see [`crate::scope::Scope::Placeholder`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadModuleId(pub u32);

impl LoadModuleId {
    /// Reserved id for synthetic placeholder addresses.
    pub const PLACEHOLDER: LoadModuleId = LoadModuleId(0);
}

/// A binary image used by one or more threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadModule {
    /// Stable id, assigned on first registration.
    pub id: LoadModuleId,
    /// Normalized file path.
    pub path: String,
    /// Content hash, used to distinguish same-path-different-binary cases
    /// across measurement runs.
    pub content_hash: [u8; 32],
}

/// Insert-or-get registry for [`LoadModule`]s, uniqued by `(path,
/// content_hash)`.
///
/// Mirrors the uniqued-registry shape the dataflow engine's node registry
/// uses (implicit index equal to assignment order, no removal).
#[derive(Debug, Default)]
pub struct LoadModuleRegistry {
    modules: Vec<LoadModule>,
    by_key: HashMap<(String, [u8; 32]), LoadModuleId>,
}

impl LoadModuleRegistry {
    /// Creates an empty registry with the reserved placeholder module
    /// already present at id `0`.
    #[must_use]
    pub fn new() -> Self {
        let mut reg = Self {
            modules: Vec::new(),
            by_key: HashMap::new(),
        };
        let placeholder = LoadModule {
            id: LoadModuleId::PLACEHOLDER,
            path: String::from("<placeholder>"),
            content_hash: [0; 32],
        };
        reg.by_key.insert(
            (placeholder.path.clone(), placeholder.content_hash),
            placeholder.id,
        );
        reg.modules.push(placeholder);
        reg
    }

    /// Returns the existing module id for `(path, content_hash)`, or
    /// registers a new one.
    pub fn insert_or_get(&mut self, path: impl Into<String>, content_hash: [u8; 32]) -> LoadModuleId {
        let path = path.into();
        let key = (path.clone(), content_hash);
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }
        let id = LoadModuleId(self.modules.len() as u32);
        self.modules.push(LoadModule {
            id,
            path,
            content_hash,
        });
        let _ = self.by_key.insert(key, id);
        id
    }

    /// Looks up a registered module by id.
    #[must_use]
    pub fn get(&self, id: LoadModuleId) -> Option<&LoadModule> {
        self.modules.get(id.0 as usize)
    }

    /// Number of registered modules, including the placeholder.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether only the placeholder module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.len() <= 1
    }

    /// Iterates all registered modules in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = &LoadModule> {
        self.modules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_preregistered_at_zero() {
        let reg = LoadModuleRegistry::new();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(LoadModuleId::PLACEHOLDER).unwrap().id, LoadModuleId(0));
    }

    #[test]
    fn insert_is_uniqued_by_path_and_hash() {
        let mut reg = LoadModuleRegistry::new();
        let a = reg.insert_or_get("/usr/bin/app", [1; 32]);
        let b = reg.insert_or_get("/usr/bin/app", [1; 32]);
        let c = reg.insert_or_get("/usr/bin/app", [2; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.len(), 3);
    }
}
