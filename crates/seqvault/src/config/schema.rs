use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::StageName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for persistent state (`blobs/`, `meta.db`, `models/`).
    pub data_dir: PathBuf,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_ids_threshold")]
    pub ids_threshold: u32,
    #[serde(default = "default_ids_score_ceiling")]
    pub ids_score_ceiling: u32,
    #[serde(default = "default_aml_max_body_bytes")]
    pub aml_max_body_bytes: usize,
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,
    #[serde(default)]
    pub stage_deadlines_ms: StageDeadlines,
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
    /// 64-character hex key (32 bytes). Falls back to the `SEQVAULT_MASTER_KEY`
    /// environment variable, then to a random per-process key.
    #[serde(default)]
    pub master_key: Option<String>,
    /// Parameter tuple published by the external tuner. Overrides the
    /// corresponding fields when present.
    #[serde(default)]
    pub ga_parameters: Option<GaParameters>,
}

fn default_max_input_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_queue_depth() -> usize {
    64
}

fn default_workers() -> usize {
    4
}

fn default_ids_threshold() -> u32 {
    5
}

fn default_ids_score_ceiling() -> u32 {
    100
}

fn default_aml_max_body_bytes() -> usize {
    250_000
}

fn default_feature_dim() -> usize {
    784
}

fn default_retention_seconds() -> u64 {
    604_800
}

/// Per-stage wall-clock deadlines in milliseconds. `admit` and `finalize`
/// are bookkeeping stages and carry no deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDeadlines {
    #[serde(default = "default_format_ms")]
    pub format: u64,
    #[serde(default = "default_ids_ms")]
    pub ids: u64,
    #[serde(default = "default_aml_ms")]
    pub aml: u64,
    #[serde(default = "default_persist_ms")]
    pub persist: u64,
    #[serde(default = "default_analyze_ms")]
    pub analyze: u64,
}

fn default_format_ms() -> u64 {
    2_000
}

fn default_ids_ms() -> u64 {
    5_000
}

fn default_aml_ms() -> u64 {
    10_000
}

fn default_persist_ms() -> u64 {
    30_000
}

fn default_analyze_ms() -> u64 {
    30_000
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            format: default_format_ms(),
            ids: default_ids_ms(),
            aml: default_aml_ms(),
            persist: default_persist_ms(),
            analyze: default_analyze_ms(),
        }
    }
}

impl StageDeadlines {
    pub fn for_stage(&self, stage: StageName) -> Option<Duration> {
        let ms = match stage {
            StageName::Format => self.format,
            StageName::Ids => self.ids,
            StageName::Aml => self.aml,
            StageName::Persist => self.persist,
            StageName::Analyze => self.analyze,
            StageName::Admit | StageName::Finalize => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

/// Tuple published by the offline genetic-algorithm tuner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaParameters {
    #[serde(default)]
    pub ids_threshold: Option<u32>,
    #[serde(default)]
    pub aml_threshold: Option<f64>,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Config {
    /// Creates a config rooted at `data_dir` with spec defaults everywhere else.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_input_bytes: default_max_input_bytes(),
            queue_depth: default_queue_depth(),
            workers: default_workers(),
            ids_threshold: default_ids_threshold(),
            ids_score_ceiling: default_ids_score_ceiling(),
            aml_max_body_bytes: default_aml_max_body_bytes(),
            feature_dim: default_feature_dim(),
            stage_deadlines_ms: StageDeadlines::default(),
            retention_seconds: default_retention_seconds(),
            master_key: None,
            ga_parameters: None,
        }
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn meta_db_path(&self) -> PathBuf {
        self.data_dir.join("meta.db")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    /// Applies the tuner-published overrides in place.
    pub fn apply_ga_overrides(&mut self) {
        let Some(params) = self.ga_parameters.clone() else {
            return;
        };
        if let Some(threshold) = params.ids_threshold {
            self.ids_threshold = threshold;
        }
        if let Some(workers) = params.workers {
            if workers > 0 {
                self.workers = workers;
            }
        }
    }

    /// The AML threshold override, if the tuner published one. The base value
    /// comes from the model sidecar file and is owned by the detector.
    pub fn aml_threshold_override(&self) -> Option<f64> {
        self.ga_parameters.as_ref().and_then(|p| p.aml_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::with_data_dir("/tmp/sv");
        assert_eq!(config.max_input_bytes, 50 * 1024 * 1024);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.workers, 4);
        assert_eq!(config.ids_threshold, 5);
        assert_eq!(config.ids_score_ceiling, 100);
        assert_eq!(config.aml_max_body_bytes, 250_000);
        assert_eq!(config.feature_dim, 784);
        assert_eq!(config.retention_seconds, 604_800);
    }

    #[test]
    fn test_stage_deadline_lookup() {
        let deadlines = StageDeadlines::default();
        assert_eq!(
            deadlines.for_stage(StageName::Format),
            Some(Duration::from_millis(2_000))
        );
        assert_eq!(
            deadlines.for_stage(StageName::Persist),
            Some(Duration::from_millis(30_000))
        );
        assert_eq!(deadlines.for_stage(StageName::Admit), None);
        assert_eq!(deadlines.for_stage(StageName::Finalize), None);
    }

    #[test]
    fn test_ga_overrides_applied() {
        let mut config = Config::with_data_dir("/tmp/sv");
        config.ga_parameters = Some(GaParameters {
            ids_threshold: Some(11),
            aml_threshold: Some(0.42),
            workers: Some(8),
        });
        config.apply_ga_overrides();
        assert_eq!(config.ids_threshold, 11);
        assert_eq!(config.workers, 8);
        assert_eq!(config.aml_threshold_override(), Some(0.42));
    }

    #[test]
    fn test_ga_zero_workers_ignored() {
        let mut config = Config::with_data_dir("/tmp/sv");
        config.ga_parameters = Some(GaParameters {
            workers: Some(0),
            ..GaParameters::default()
        });
        config.apply_ga_overrides();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_state_paths() {
        let config = Config::with_data_dir("/data");
        assert_eq!(config.blobs_dir(), PathBuf::from("/data/blobs"));
        assert_eq!(config.meta_db_path(), PathBuf::from("/data/meta.db"));
        assert_eq!(config.models_dir(), PathBuf::from("/data/models"));
    }
}
