//! Reconciliation event system for observability.
//!
//! Emits [`ReconcileEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, UIs, tests) can follow passes without coupling to the
//! orchestrator internals.

use serde::{Deserialize, Serialize};

/// Events emitted while reconciling runtime inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconcileEvent {
    PassStarted {
        generation: u64,
        pipeline: String,
        stage_ids: Vec<String>,
    },
    TemplateFetched {
        generation: u64,
        has_inputs: bool,
    },
    MergeRequested {
        generation: u64,
        references: Vec<String>,
    },
    MergeFetched {
        generation: u64,
        invalid_references: Vec<String>,
    },
    PassResolved {
        generation: u64,
    },
    PassFailed {
        generation: u64,
        error: String,
        transport: bool,
    },
    /// A response arrived for a pass that has since been superseded.
    StaleDiscarded {
        generation: u64,
        current: u64,
    },
    ReferenceReconciled {
        identifier: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<ReconcileEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: ReconcileEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ReconcileEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
