//! Source and sink traits, and the capacity-checked node registry that
//! assigns each one a stable [`NodeId`].

use std::marker::PhantomData;

use hpa_core::Pipeline;

use crate::dataclass::DataClass;
use crate::error::Error;

/// A unique integer index plus a display name for a registered source or
/// sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    name: String,
}

impl NodeId {
    /// The node's registration index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The node's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One measurement stream driver: parses raw input and emits attribution
/// events into the shared [`Pipeline`].
pub trait Source: Send {
    /// Data classes this source may produce.
    fn provides(&self) -> DataClass;
    /// Data classes this source must observe before it can run (usually
    /// empty; sources are the producers wavefronts gate on).
    fn requires(&self) -> DataClass {
        DataClass::empty()
    }
    /// Runs to completion, emitting events into `pipeline`.
    ///
    /// # Errors
    /// Returns [`hpa_core::Error`] on malformed input or an internal
    /// invariant violation.
    fn run(&mut self, pipeline: &Pipeline) -> Result<(), hpa_core::Error>;
}

/// One output-file (or derived-artifact) writer: consumes the finalized
/// pipeline state once its demanded wavefronts have fired.
pub trait Sink: Send {
    /// Data classes this sink reads.
    fn accepts(&self) -> DataClass;
    /// Data classes this sink must wait for before `write` may run.
    fn demands(&self) -> DataClass;
    /// Produces this sink's final output.
    ///
    /// # Errors
    /// Returns [`hpa_core::Error`] on I/O failure or an internal
    /// invariant violation.
    fn write(&mut self, pipeline: &Pipeline) -> Result<(), hpa_core::Error>;
}

/// A capacity-checked, append-only registry of [`NodeId`]s, generalized
/// over the entry payload (boxed source or sink trait objects, in
/// practice).
pub struct NodeRegistry<Inner> {
    entries: Vec<(NodeId, Inner)>,
    _marker: PhantomData<Inner>,
}

impl<Inner> Default for NodeRegistry<Inner> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<Inner> NodeRegistry<Inner> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `inner` under `name`, returning its assigned [`NodeId`].
    ///
    /// # Errors
    /// Returns [`Error::TooManyNodes`] once 65,536 nodes have been
    /// registered, or [`Error::DuplicateNode`] if `name` is already taken.
    pub fn register(&mut self, name: impl Into<String>, inner: Inner) -> Result<NodeId, Error> {
        let name = name.into();
        if self.entries.iter().any(|(id, _)| id.name == name) {
            return Err(Error::DuplicateNode { name });
        }
        let index = self.entries.len();
        if index > u16::MAX as usize {
            return Err(Error::TooManyNodes);
        }
        let id = NodeId { index, name };
        self.entries.push((id.clone(), inner));
        Ok(id)
    }

    /// Iterates every `(id, inner)` pair in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &(NodeId, Inner)> {
        self.entries.iter()
    }

    /// Iterates every `(id, inner)` pair mutably, in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (NodeId, Inner)> {
        self.entries.iter_mut()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no node has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the registry, returning its entries in registration order.
    pub fn into_entries(self) -> Vec<(NodeId, Inner)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg: NodeRegistry<()> = NodeRegistry::new();
        reg.register("a", ()).unwrap();
        let err = reg.register("a", ()).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { .. }));
    }

    #[test]
    fn too_many_nodes_error() {
        let mut reg: NodeRegistry<()> = NodeRegistry::new();
        const LIMIT: usize = u16::MAX as usize + 1;
        for i in 0..=LIMIT {
            let result = reg.register(format!("node-{i}"), ());
            if i == LIMIT {
                assert!(matches!(result, Err(Error::TooManyNodes)));
            } else {
                assert!(result.is_ok());
            }
        }
    }
}
