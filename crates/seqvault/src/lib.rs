pub mod aml;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod registry;
pub mod sanitize;
pub mod scanner;
pub mod service;
pub mod store;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config, GaParameters, StageDeadlines};
pub use error::{ConfigError, IntakeError, RegistryError, Result, SeqvaultError, StoreError};
pub use events::{Event, EventBus};
pub use registry::{
    FailReason, JobId, JobRegistry, JobState, JobView, StageName, StageOutcome, StageRecord,
    Subscription, Verdict,
};
pub use service::IntakeService;
pub use store::{ArtifactRef, CipherAlgorithm, DeletionProof, ObjectStore};
