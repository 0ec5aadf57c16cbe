//! Transport-agnostic intake surface.
//!
//! Owns the registry, the object store, and the worker pool. An HTTP layer
//! (out of scope here) maps these operations onto routes; every error this
//! surface returns has a stable, enumerable kind.

use std::sync::Arc;

use chrono::{Duration, Utc};
use log::info;
use uuid::Uuid;

use crate::aml::{AmlDetector, FeatureExtractor};
use crate::config::Config;
use crate::error::{ConfigError, IntakeError, RegistryError, SeqvaultError, StoreError};
use crate::events::{Event, EventBus};
use crate::pipeline::{Analyzer, KmerAnalyzer, Pipeline};
use crate::registry::{JobId, JobRegistry, JobView, Subscription, Verdict};
use crate::sanitize::redact_filename;
use crate::store::{
    deletion_secret, CipherAlgorithm, DeletionProof, ObjectStore, KEY_LEN,
};
use crate::worker::{QueuedUpload, SubmitError, WorkerPool};

/// Environment fallback for the master key when the config omits it.
pub const MASTER_KEY_ENV_VAR: &str = "SEQVAULT_MASTER_KEY";

pub struct IntakeService {
    config: Arc<Config>,
    registry: Arc<JobRegistry>,
    store: Arc<ObjectStore>,
    pool: WorkerPool,
    events: EventBus,
}

impl IntakeService {
    /// Builds the full core from config with the built-in analyzer.
    pub fn open(config: Config) -> Result<Self, SeqvaultError> {
        Self::open_with_analyzer(config, Arc::new(KmerAnalyzer))
    }

    /// Same as [`IntakeService::open`] but with an injected analysis
    /// collaborator.
    pub fn open_with_analyzer(
        config: Config,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, SeqvaultError> {
        let config = Arc::new(config);
        let events = EventBus::default();
        let master_key = resolve_master_key(&config)?;

        let store = Arc::new(ObjectStore::open(
            &config.data_dir,
            CipherAlgorithm::Aes256Gcm,
            deletion_secret(&master_key),
            events.clone(),
        )?);
        let registry = Arc::new(JobRegistry::new());

        let extractor = FeatureExtractor::new(config.aml_max_body_bytes, config.feature_dim);
        let aml = AmlDetector::load(
            &config.models_dir(),
            extractor,
            config.aml_threshold_override(),
        );

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&store),
            aml,
            analyzer,
            events.clone(),
            master_key,
        ));
        let pool = WorkerPool::new(pipeline, config.workers, config.queue_depth);

        info!(
            "Intake service ready: {} workers, queue depth {}, max upload {} bytes",
            config.workers, config.queue_depth, config.max_input_bytes
        );

        Ok(Self {
            config,
            registry,
            store,
            pool,
            events,
        })
    }

    /// Admits an upload and schedules it for execution. The byte buffer
    /// belongs to the core from here on.
    pub fn submit(&self, filename: &str, bytes: Vec<u8>) -> Result<JobId, IntakeError> {
        if bytes.is_empty() {
            return Err(IntakeError::Empty);
        }
        if bytes.len() > self.config.max_input_bytes {
            return Err(IntakeError::Oversize {
                size: bytes.len(),
                max: self.config.max_input_bytes,
            });
        }

        let id = Uuid::new_v4();
        let size = bytes.len();
        self.registry
            .create(id, filename, size)
            .expect("freshly generated job id cannot collide");

        match self.pool.submit(QueuedUpload {
            job_id: id,
            payload: bytes,
        }) {
            Ok(()) => {
                info!("Accepted upload '{}' as job {id}", redact_filename(filename));
                self.events.emit(Event::JobSubmitted { job_id: id, size });
                Ok(id)
            }
            Err(SubmitError::QueueFull(_)) | Err(SubmitError::Closed) => {
                self.registry.remove(id);
                Err(IntakeError::QueueFull {
                    depth: self.config.queue_depth,
                })
            }
        }
    }

    /// Last snapshot of the job, available for its whole retention life.
    pub fn status(&self, id: JobId) -> Result<JobView, IntakeError> {
        self.registry
            .snapshot(id)
            .map_err(|_| IntakeError::NotFound(id))
    }

    /// Terminal verdict; `NotReady` while the job is still in flight.
    pub fn result(&self, id: JobId) -> Result<Verdict, IntakeError> {
        let view = self
            .registry
            .snapshot(id)
            .map_err(|_| IntakeError::NotFound(id))?;
        view.verdict.ok_or(IntakeError::NotReady(id))
    }

    /// Deletion proof; `NotFound` until a deletion has actually occurred.
    pub fn proof(&self, id: JobId) -> Result<DeletionProof, SeqvaultError> {
        Ok(self.store.proof(id)?)
    }

    /// Idempotent cancellation. Cancelling a terminal job is a no-op that
    /// still reports success.
    pub fn cancel(&self, id: JobId) -> Result<(), IntakeError> {
        self.registry
            .cancel(id)
            .map(|_| ())
            .map_err(|_| IntakeError::NotFound(id))
    }

    /// Subscribes to job snapshots: the current one plus future changes.
    pub fn subscribe(&self, id: JobId) -> Result<Subscription, IntakeError> {
        self.registry
            .subscribe(id)
            .map_err(|_| IntakeError::NotFound(id))
    }

    /// Deletes the stored artifact of a terminal job and issues the proof.
    /// Repeat calls return the original proof.
    pub fn delete_artifact(&self, id: JobId) -> Result<DeletionProof, SeqvaultError> {
        let view = self
            .registry
            .snapshot(id)
            .map_err(|_| SeqvaultError::Intake(IntakeError::NotFound(id)))?;

        if !view.state.is_terminal() {
            return Err(RegistryError::IllegalTransition {
                id,
                from: view.state,
                to: crate::registry::JobState::RetainedDeleted,
            }
            .into());
        }

        let artifact = match view.artifact {
            Some(artifact) => artifact,
            None => return Err(StoreError::NotFound(id.to_string()).into()),
        };

        let proof = self.store.delete(id, &artifact)?;
        self.registry.mark_deleted(id, proof.deletion_timestamp)?;
        Ok(proof)
    }

    /// Removes retained-deleted jobs older than the retention window.
    pub fn prune(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.config.retention_seconds as i64);
        self.registry.prune(cutoff)
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drains the pool and stops all workers.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}

fn resolve_master_key(config: &Config) -> Result<[u8; KEY_LEN], SeqvaultError> {
    let hex = match &config.master_key {
        Some(value) => Some(value.clone()),
        None => std::env::var(MASTER_KEY_ENV_VAR).ok(),
    };

    match hex {
        Some(hex) => {
            let bytes = crate::store::crypto::hex_decode(&hex).map_err(|e| {
                SeqvaultError::Config(ConfigError::Validation {
                    message: format!("master key is not valid hex: {e}"),
                })
            })?;
            bytes.try_into().map_err(|_| {
                SeqvaultError::Config(ConfigError::Validation {
                    message: "master key must be 32 bytes (64 hex characters)".to_string(),
                })
            })
        }
        None => {
            // Ephemeral key: artifacts and proofs do not survive a restart.
            let mut key = [0u8; KEY_LEN];
            getrandom::getrandom(&mut key).map_err(|e| {
                SeqvaultError::Config(ConfigError::Validation {
                    message: format!("failed to generate master key: {e}"),
                })
            })?;
            info!("No master key configured, generated an ephemeral one");
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(tmp: &TempDir) -> IntakeService {
        let mut config = Config::with_data_dir(tmp.path());
        config.master_key = Some("11".repeat(32));
        IntakeService::open(config).unwrap()
    }

    #[test]
    fn test_empty_upload_rejected_without_job() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        assert!(matches!(svc.submit("a.fasta", vec![]), Err(IntakeError::Empty)));
        svc.shutdown();
    }

    #[test]
    fn test_oversize_upload_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(tmp.path());
        config.master_key = Some("11".repeat(32));
        config.max_input_bytes = 7;
        let svc = IntakeService::open(config).unwrap();

        // Exactly at the limit is admitted.
        assert!(svc.submit("ok.fasta", b">h\nACGT".to_vec()).is_ok());
        // One byte over is rejected.
        let err = svc.submit("big.fasta", b">h\nACGTA".to_vec()).unwrap_err();
        assert!(matches!(err, IntakeError::Oversize { size: 8, max: 7 }));
        svc.shutdown();
    }

    #[test]
    fn test_status_of_unknown_job_not_found() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        assert!(matches!(
            svc.status(Uuid::new_v4()),
            Err(IntakeError::NotFound(_))
        ));
        svc.shutdown();
    }

    #[test]
    fn test_cancel_unknown_job_not_found() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);
        assert!(matches!(
            svc.cancel(Uuid::new_v4()),
            Err(IntakeError::NotFound(_))
        ));
        svc.shutdown();
    }
}
