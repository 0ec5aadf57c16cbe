use std::path::PathBuf;
use thiserror::Error;

use crate::registry::JobState;

#[derive(Error, Debug)]
pub enum SeqvaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors surfaced to the submitter through the intake surface.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Upload is empty")]
    Empty,

    #[error("Upload of {size} bytes exceeds the limit of {max} bytes")]
    Oversize { size: usize, max: usize },

    #[error("Intake queue is full ({depth} jobs queued)")]
    QueueFull { depth: usize },

    #[error("Job {0} not found")]
    NotFound(uuid::Uuid),

    #[error("Job {0} has not reached a terminal state")]
    NotReady(uuid::Uuid),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),

    #[error("No artifact found for '{0}'")]
    NotFound(String),

    #[error("Integrity check failed for '{0}'")]
    Integrity(String),

    #[error("Cipher failure: {0}")]
    Crypto(String),

    #[error("Operation interrupted before completion")]
    Interrupted,

    #[error("Metadata store lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Job {0} already exists")]
    DuplicateJob(uuid::Uuid),

    #[error("Job {0} not found")]
    NotFound(uuid::Uuid),

    #[error("Illegal transition {from:?} -> {to:?} for job {id}")]
    IllegalTransition {
        id: uuid::Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} is not running")]
    NotRunning(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, SeqvaultError>;
