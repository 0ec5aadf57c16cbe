//! Observability event taxonomy.
//!
//! The core emits a fixed set of events; whatever sink the deployment wires
//! up (metrics, structured logs, a dashboard feed) subscribes here. Nothing
//! in the core depends on a particular backend.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::registry::{FailReason, JobState, StageName, StageOutcome};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    JobSubmitted {
        job_id: Uuid,
        size: usize,
    },
    StageStarted {
        job_id: Uuid,
        stage: StageName,
    },
    StageFinished {
        job_id: Uuid,
        stage: StageName,
        outcome: StageOutcome,
        duration_ms: u64,
    },
    JobTerminal {
        job_id: Uuid,
        state: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<FailReason>,
    },
    ArtifactWritten {
        job_id: Uuid,
        size: u64,
    },
    ArtifactDeleted {
        job_id: Uuid,
    },
    IntegrityFailure {
        content_hash: String,
    },
}

/// Fan-out bus for core events. Sending never blocks; with no subscribers
/// events are dropped, and a lagging subscriber loses the oldest entries.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
