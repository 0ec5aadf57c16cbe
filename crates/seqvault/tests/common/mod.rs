//! Test harness for isolated end-to-end runs.
//!
//! Builds a full `IntakeService` over a temporary data directory with a
//! fixed master key, so deletion proofs are recomputable from the test.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use seqvault::aml::model::write_model;
use seqvault::pipeline::{AnalysisSummary, AnalyzeError, Analyzer};
use seqvault::store::{deletion_secret, KEY_LEN};
use seqvault::{Config, IntakeService, JobId, JobState, JobView};

/// Fixed master key so tests can recompute proof digests.
pub const MASTER_KEY_HEX: &str =
    "2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a";

pub fn master_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key.fill(0x2a);
    key
}

pub fn proof_secret() -> [u8; KEY_LEN] {
    deletion_secret(&master_key())
}

pub struct TestHarness {
    temp_dir: TempDir,
    service: Option<IntakeService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        Self::build(configure, None)
    }

    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>) -> Self {
        Self::build(|_| {}, Some(analyzer))
    }

    pub fn build(
        configure: impl FnOnce(&mut Config),
        analyzer: Option<Arc<dyn Analyzer>>,
    ) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config::with_data_dir(temp_dir.path().join("state"));
        config.master_key = Some(MASTER_KEY_HEX.to_string());
        configure(&mut config);

        let service = match analyzer {
            Some(analyzer) => IntakeService::open_with_analyzer(config, analyzer),
            None => IntakeService::open(config),
        }
        .expect("Failed to open intake service");

        Self {
            temp_dir,
            service: Some(service),
        }
    }

    pub fn service(&self) -> &IntakeService {
        self.service.as_ref().expect("service is alive")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }

    /// Polls status until the job reaches a terminal state.
    pub fn wait_terminal(&self, id: JobId) -> JobView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let view = self.service().status(id).expect("job exists");
            if view.state.is_terminal() {
                return view;
            }
            assert!(
                Instant::now() < deadline,
                "job {id} did not reach a terminal state in time (state {:?})",
                view.state
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Counts regular files under `blobs/`.
    pub fn blob_count(&self) -> usize {
        count_files(&self.data_dir().join("blobs"))
    }

    /// Counts metadata rows in the artifacts table.
    pub fn artifact_rows(&self) -> i64 {
        let conn = rusqlite::Connection::open(self.data_dir().join("meta.db"))
            .expect("meta.db opens");
        conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))
            .expect("count query")
    }

    pub fn shutdown(mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown();
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown();
        }
    }
}

/// Honors RUST_LOG when debugging a test run; repeated calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}

/// Installs a single-layer model with zero weights: every reconstruction is
/// sigmoid(0) = 0.5, so scores are predictable against sparse features.
pub fn install_flat_model(models_dir: &Path, dim: usize, threshold: f64) {
    std::fs::create_dir_all(models_dir).expect("models dir");
    let mut buf = Vec::new();
    write_model(
        &mut buf,
        &[(dim, dim, vec![0.0; dim * dim], vec![0.0; dim])],
    )
    .expect("serialize model");
    std::fs::write(models_dir.join("aml.bin"), &buf).expect("write model");
    std::fs::write(models_dir.join("aml.threshold"), format!("{threshold}\n"))
        .expect("write threshold");
}

/// Analyzer that stalls each job, keeping the worker busy so queue and
/// cancellation behavior can be exercised deterministically.
pub struct SlowAnalyzer {
    pub delay: Duration,
}

impl Analyzer for SlowAnalyzer {
    fn analyze(&self, _plaintext: &[u8]) -> Result<AnalysisSummary, AnalyzeError> {
        std::thread::sleep(self.delay);
        Ok(AnalysisSummary {
            record_count: 1,
            total_bases: 0,
            gc_percent: 0.0,
            distinct_trinucleotides: 0,
            top_trinucleotide: None,
        })
    }
}

/// Analyzer that always errors, for the non-fatal analyze-failure path.
pub struct FailingAnalyzer;

impl Analyzer for FailingAnalyzer {
    fn analyze(&self, _plaintext: &[u8]) -> Result<AnalysisSummary, AnalyzeError> {
        Err(AnalyzeError("collaborator unavailable".to_string()))
    }
}

/// A syntactically valid FASTA upload of roughly `bytes` size.
pub fn large_fasta(bytes: usize) -> Vec<u8> {
    let mut data = b">bulk\n".to_vec();
    while data.len() < bytes {
        data.extend_from_slice(b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT\n");
    }
    data
}

/// Checks the invariants every terminal job must satisfy.
pub fn assert_terminal_invariants(view: &JobView) {
    assert!(view.state.is_terminal());
    assert!(view.completed_at.is_some() || view.state == JobState::RetainedDeleted);
    let verdict = view.verdict.as_ref().expect("terminal job has a verdict");
    assert!(!verdict.stages.is_empty());
    assert_eq!(view.stage_cursor, verdict.stages.len() - 1);

    let mut last_finished = None;
    for stage in &verdict.stages {
        assert!(stage.finished_at >= stage.started_at);
        if let Some(prev) = last_finished {
            assert!(stage.finished_at >= prev);
        }
        last_finished = Some(stage.finished_at);
    }
}
