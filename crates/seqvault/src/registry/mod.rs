//! Process-wide job registry.
//!
//! One writer at a time per job (the worker running it), many concurrent
//! readers. A single `RwLock` around the map makes every snapshot a
//! consistent cut; state changes are fanned out per job through a bounded
//! broadcast channel with drop-oldest overflow.

pub mod job;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::RegistryError;
use crate::store::ArtifactRef;

pub use job::{
    AnalyzeDetail, FailReason, JobId, JobState, JobView, PersistDetail, StageDetail, StageName,
    StageOutcome, StageRecord, Verdict,
};

/// Per-subscriber buffered snapshots before drop-oldest kicks in.
const SUBSCRIBER_BUFFER: usize = 16;

struct JobEntry {
    filename: String,
    size: usize,
    received_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    deletion_at: Option<DateTime<Utc>>,
    state: JobState,
    stage_cursor: usize,
    stages: Vec<StageRecord>,
    verdict: Option<Verdict>,
    artifact: Option<ArtifactRef>,
    cancel: Arc<AtomicBool>,
    notify: broadcast::Sender<JobView>,
}

impl JobEntry {
    fn view(&self, id: JobId) -> JobView {
        JobView {
            id,
            filename: self.filename.clone(),
            size: self.size,
            received_at: self.received_at,
            completed_at: self.completed_at,
            deletion_at: self.deletion_at,
            state: self.state,
            stage_cursor: self.stage_cursor,
            stages: self.stages.clone(),
            verdict: self.verdict.clone(),
            artifact: self.artifact.clone(),
        }
    }

    fn publish(&self, id: JobId) -> JobView {
        let view = self.view(id);
        // No receivers is fine; laggy receivers drop their oldest entries.
        let _ = self.notify.send(view.clone());
        view
    }
}

/// A live subscription: the snapshot at subscription time plus a stream of
/// later snapshots.
pub struct Subscription {
    pub current: JobView,
    pub updates: broadcast::Receiver<JobView>,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn create(
        &self,
        id: JobId,
        filename: &str,
        size: usize,
    ) -> Result<JobView, RegistryError> {
        let mut jobs = self.write();
        if jobs.contains_key(&id) {
            return Err(RegistryError::DuplicateJob(id));
        }

        let (notify, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let entry = JobEntry {
            filename: filename.to_string(),
            size,
            received_at: Utc::now(),
            completed_at: None,
            deletion_at: None,
            state: JobState::Queued,
            stage_cursor: 0,
            stages: Vec::new(),
            verdict: None,
            artifact: None,
            cancel: Arc::new(AtomicBool::new(false)),
            notify,
        };
        let view = entry.view(id);
        jobs.insert(id, entry);
        Ok(view)
    }

    /// Atomic compare-and-swap on the job state.
    pub fn transition(
        &self,
        id: JobId,
        from: JobState,
        to: JobState,
    ) -> Result<JobView, RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if entry.state != from || !from.can_transition_to(to) {
            return Err(RegistryError::IllegalTransition {
                id,
                from: entry.state,
                to,
            });
        }

        entry.state = to;
        if matches!(to, JobState::Completed | JobState::Failed | JobState::Cancelled) {
            entry.completed_at = Some(Utc::now());
        }
        Ok(entry.publish(id))
    }

    /// Records that the executor entered stage `index`. The cursor only ever
    /// moves forward.
    pub fn mark_stage_started(&self, id: JobId, index: usize) -> Result<(), RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if entry.state != JobState::Running {
            return Err(RegistryError::NotRunning(id));
        }
        entry.stage_cursor = entry.stage_cursor.max(index);
        entry.publish(id);
        Ok(())
    }

    pub fn append_stage(&self, id: JobId, record: StageRecord) -> Result<(), RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if entry.state != JobState::Running {
            return Err(RegistryError::NotRunning(id));
        }
        entry.stages.push(record);
        entry.stage_cursor = entry.stage_cursor.max(entry.stages.len() - 1);
        entry.publish(id);
        Ok(())
    }

    pub fn set_artifact(&self, id: JobId, artifact: ArtifactRef) -> Result<(), RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        if entry.state != JobState::Running {
            return Err(RegistryError::NotRunning(id));
        }
        entry.artifact = Some(artifact);
        entry.publish(id);
        Ok(())
    }

    /// Terminal transition plus verdict in one atomic step.
    pub fn finalize(
        &self,
        id: JobId,
        to: JobState,
        verdict: Verdict,
    ) -> Result<JobView, RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if entry.state != JobState::Running || !entry.state.can_transition_to(to) {
            return Err(RegistryError::IllegalTransition {
                id,
                from: entry.state,
                to,
            });
        }

        entry.state = to;
        entry.completed_at = Some(Utc::now());
        entry.verdict = Some(verdict);
        Ok(entry.publish(id))
    }

    pub fn snapshot(&self, id: JobId) -> Result<JobView, RegistryError> {
        let jobs = self.read();
        let entry = jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(entry.view(id))
    }

    /// Late subscribers get the current snapshot immediately, then future
    /// changes through the receiver.
    pub fn subscribe(&self, id: JobId) -> Result<Subscription, RegistryError> {
        let jobs = self.read();
        let entry = jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(Subscription {
            current: entry.view(id),
            updates: entry.notify.subscribe(),
        })
    }

    /// Triggers the single-shot cancel signal. Idempotent; calling on a
    /// terminal job is a no-op.
    pub fn cancel(&self, id: JobId) -> Result<JobView, RegistryError> {
        let jobs = self.read();
        let entry = jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(entry.view(id))
    }

    pub fn cancel_flag(&self, id: JobId) -> Result<Arc<AtomicBool>, RegistryError> {
        let jobs = self.read();
        let entry = jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        Ok(Arc::clone(&entry.cancel))
    }

    /// Stamps `deletion_at` and moves a terminal job to `retained_deleted`.
    /// Idempotent for jobs already there.
    pub fn mark_deleted(&self, id: JobId, when: DateTime<Utc>) -> Result<JobView, RegistryError> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if entry.state == JobState::RetainedDeleted {
            return Ok(entry.view(id));
        }
        if !entry.state.can_transition_to(JobState::RetainedDeleted) {
            return Err(RegistryError::IllegalTransition {
                id,
                from: entry.state,
                to: JobState::RetainedDeleted,
            });
        }

        entry.state = JobState::RetainedDeleted;
        entry.deletion_at = Some(when);
        Ok(entry.publish(id))
    }

    /// Drops a job record outright. Used when admission fails after the
    /// record was created.
    pub fn remove(&self, id: JobId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Removes retained-deleted jobs whose deletion happened before the
    /// cutoff. Returns how many were pruned.
    pub fn prune(&self, before: DateTime<Utc>) -> usize {
        let mut jobs = self.write();
        let before_len = jobs.len();
        jobs.retain(|_, entry| {
            !(entry.state == JobState::RetainedDeleted
                && entry.deletion_at.map(|at| at < before).unwrap_or(false))
        });
        before_len - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
