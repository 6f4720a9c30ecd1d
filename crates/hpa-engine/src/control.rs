//! Control messages exchanged between the pipeline driver and its worker
//! threads: a generalization of the dataflow engine's `NodeControlMsg` to a
//! synchronous, `std::thread`-based driver.

use std::collections::HashMap;
use std::sync::mpsc;

use crate::node::NodeId;

/// A control message sent by the driver to a running source or sink
/// worker thread.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    /// Requests the worker to stop as soon as it reaches a checkpoint.
    /// Unlike the dataflow engine's graceful-drain deadline, the
    /// aggregation core has no streaming consumer to drain into: a fatal
    /// error aborts the whole pipeline, so `Shutdown` here always means
    /// "stop now".
    Shutdown {
        /// Human-readable reason, surfaced in logs and the process exit
        /// message.
        reason: String,
    },
}

/// Per-worker control-message sender, registered by [`ControlSenders`].
struct TypedSender {
    node_id: NodeId,
    sender: mpsc::Sender<ControlMsg>,
}

/// Holds the control-message senders for every running worker, used by the
/// driver to broadcast a shutdown once a fatal error is observed.
#[derive(Default)]
pub struct ControlSenders {
    senders: HashMap<usize, TypedSender>,
}

impl ControlSenders {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker's control-message sender.
    pub fn register(&mut self, node_id: NodeId, sender: mpsc::Sender<ControlMsg>) {
        let _ = self.senders.insert(node_id.index(), TypedSender { node_id, sender });
    }

    /// Broadcasts a shutdown message to every registered worker. Send
    /// failures (a worker that already exited) are logged, not propagated:
    /// shutdown is best-effort once a fatal error has already been
    /// decided.
    pub fn shutdown_all(&self, reason: &str) {
        for typed in self.senders.values() {
            if typed
                .sender
                .send(ControlMsg::Shutdown {
                    reason: reason.to_string(),
                })
                .is_err()
            {
                tracing::debug!(node = %typed.node_id, "shutdown send failed, worker already exited");
            }
        }
    }

    /// Number of registered senders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Whether no sender is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
