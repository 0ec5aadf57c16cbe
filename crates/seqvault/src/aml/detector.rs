//! Thresholded reconstruction-error classifier over extracted features.

use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use super::features::{BodyFeatures, FeatureExtractor};
use super::model::AutoencoderModel;

pub const MODEL_FILE: &str = "aml.bin";
pub const THRESHOLD_FILE: &str = "aml.threshold";

/// Used when weights are present but no threshold was published.
const FALLBACK_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlOutcome {
    Pass,
    Fail,
    /// No model loaded; the pipeline treats this as non-fatal.
    Skip,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmlDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub feature_dim: usize,
    pub body_length_used: usize,
}

#[derive(Debug, Clone)]
pub struct AmlVerdict {
    pub outcome: AmlOutcome,
    pub score: Option<f64>,
    pub detail: AmlDetail,
}

pub struct AmlDetector {
    model: Option<AutoencoderModel>,
    threshold: f64,
    extractor: FeatureExtractor,
}

impl AmlDetector {
    /// Loads `aml.bin` and `aml.threshold` from `models_dir`. A missing or
    /// unusable model leaves the detector in skip mode rather than failing
    /// startup.
    pub fn load(
        models_dir: &Path,
        extractor: FeatureExtractor,
        threshold_override: Option<f64>,
    ) -> Self {
        let model_path = models_dir.join(MODEL_FILE);
        if !model_path.exists() {
            info!("AML model not present at {:?}, detector runs in skip mode", model_path);
            return Self::disabled(extractor);
        }

        let model = match AutoencoderModel::load(&model_path) {
            Ok(model) => model,
            Err(e) => {
                warn!("Failed to load AML model {:?}: {e}, running in skip mode", model_path);
                return Self::disabled(extractor);
            }
        };

        if model.input_dim() != extractor.dim() {
            warn!(
                "AML model expects {} features but extractor produces {}, running in skip mode",
                model.input_dim(),
                extractor.dim()
            );
            return Self::disabled(extractor);
        }

        let threshold = threshold_override
            .or_else(|| read_threshold(&models_dir.join(THRESHOLD_FILE)))
            .unwrap_or_else(|| {
                warn!("No AML threshold published, using fallback {FALLBACK_THRESHOLD}");
                FALLBACK_THRESHOLD
            });

        info!(
            "AML detector ready: dim={}, threshold={threshold}",
            extractor.dim()
        );
        Self {
            model: Some(model),
            threshold,
            extractor,
        }
    }

    pub fn disabled(extractor: FeatureExtractor) -> Self {
        Self {
            model: None,
            threshold: FALLBACK_THRESHOLD,
            extractor,
        }
    }

    pub fn with_model(model: AutoencoderModel, threshold: f64, extractor: FeatureExtractor) -> Self {
        Self {
            model: Some(model),
            threshold,
            extractor,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn scan(&self, data: &[u8]) -> AmlVerdict {
        let BodyFeatures {
            vector,
            body_length,
        } = self.extractor.extract(data);

        let Some(model) = &self.model else {
            return AmlVerdict {
                outcome: AmlOutcome::Skip,
                score: None,
                detail: AmlDetail {
                    score: None,
                    threshold: None,
                    feature_dim: self.extractor.dim(),
                    body_length_used: body_length,
                },
            };
        };

        let reconstruction = model.reconstruct(&vector);
        let score = mean_squared_error(&vector, &reconstruction);
        let outcome = if score <= self.threshold {
            AmlOutcome::Pass
        } else {
            AmlOutcome::Fail
        };

        AmlVerdict {
            outcome,
            score: Some(score),
            detail: AmlDetail {
                score: Some(score),
                threshold: Some(self.threshold),
                feature_dim: self.extractor.dim(),
                body_length_used: body_length,
            },
        }
    }
}

fn mean_squared_error(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(x - y);
            d * d
        })
        .sum();
    sum / a.len() as f64
}

fn read_threshold(path: &Path) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    match content.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Some(value),
        _ => {
            warn!("Ignoring malformed AML threshold file {:?}", path);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aml::model::write_model;
    use tempfile::TempDir;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(250_000, 784)
    }

    /// A model with zero weights reconstructs every feature as sigmoid(0) =
    /// 0.5, giving a predictable error against near-zero feature vectors.
    fn flat_model(dim: usize) -> AutoencoderModel {
        let mut buf = Vec::new();
        write_model(&mut buf, &[(dim, dim, vec![0.0; dim * dim], vec![0.0; dim])]).unwrap();
        AutoencoderModel::read(buf.as_slice()).unwrap()
    }

    #[test]
    fn test_missing_model_scans_as_skip() {
        let detector = AmlDetector::disabled(extractor());
        let verdict = detector.scan(b">h\nACGT\n");
        assert_eq!(verdict.outcome, AmlOutcome::Skip);
        assert!(verdict.score.is_none());
        assert!(verdict.detail.threshold.is_none());
        assert_eq!(verdict.detail.feature_dim, 784);
        assert_eq!(verdict.detail.body_length_used, 4);
    }

    #[test]
    fn test_loaded_model_scores_and_passes_under_threshold() {
        let detector = AmlDetector::with_model(flat_model(784), 0.5, extractor());
        let verdict = detector.scan(b">h\nACGTACGT\n");
        assert_eq!(verdict.outcome, AmlOutcome::Pass);
        let score = verdict.score.unwrap();
        assert!(score > 0.0 && score <= 0.5);
        assert_eq!(verdict.detail.threshold, Some(0.5));
    }

    #[test]
    fn test_score_over_threshold_fails() {
        let detector = AmlDetector::with_model(flat_model(784), 0.0001, extractor());
        let verdict = detector.scan(b">h\nACGTACGT\n");
        assert_eq!(verdict.outcome, AmlOutcome::Fail);
    }

    #[test]
    fn test_inference_is_deterministic() {
        let detector = AmlDetector::with_model(flat_model(784), 0.5, extractor());
        let a = detector.scan(b">h\nACGTACGTGGCC\n").score.unwrap();
        let b = detector.scan(b">h\nACGTACGTGGCC\n").score.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_from_missing_dir_is_skip_mode() {
        let tmp = TempDir::new().unwrap();
        let detector = AmlDetector::load(&tmp.path().join("models"), extractor(), None);
        assert!(!detector.is_loaded());
    }

    #[test]
    fn test_load_reads_threshold_sidecar() {
        let tmp = TempDir::new().unwrap();
        let dim = 784;
        let mut buf = Vec::new();
        write_model(&mut buf, &[(dim, dim, vec![0.0; dim * dim], vec![0.0; dim])]).unwrap();
        std::fs::write(tmp.path().join(MODEL_FILE), &buf).unwrap();
        std::fs::write(tmp.path().join(THRESHOLD_FILE), "0.125\n").unwrap();

        let detector = AmlDetector::load(tmp.path(), extractor(), None);
        assert!(detector.is_loaded());
        let verdict = detector.scan(b">h\nACGT\n");
        assert_eq!(verdict.detail.threshold, Some(0.125));
    }

    #[test]
    fn test_threshold_override_wins_over_sidecar() {
        let tmp = TempDir::new().unwrap();
        let dim = 784;
        let mut buf = Vec::new();
        write_model(&mut buf, &[(dim, dim, vec![0.0; dim * dim], vec![0.0; dim])]).unwrap();
        std::fs::write(tmp.path().join(MODEL_FILE), &buf).unwrap();
        std::fs::write(tmp.path().join(THRESHOLD_FILE), "0.125\n").unwrap();

        let detector = AmlDetector::load(tmp.path(), extractor(), Some(0.9));
        let verdict = detector.scan(b">h\nACGT\n");
        assert_eq!(verdict.detail.threshold, Some(0.9));
    }

    #[test]
    fn test_dimension_mismatch_falls_back_to_skip() {
        let tmp = TempDir::new().unwrap();
        let mut buf = Vec::new();
        write_model(&mut buf, &[(4, 4, vec![0.0; 16], vec![0.0; 4])]).unwrap();
        std::fs::write(tmp.path().join(MODEL_FILE), &buf).unwrap();

        let detector = AmlDetector::load(tmp.path(), extractor(), None);
        assert!(!detector.is_loaded());
    }
}
