pub mod detector;
pub mod features;
pub mod model;

pub use detector::{AmlDetail, AmlDetector, AmlOutcome, AmlVerdict};
pub use features::{BodyFeatures, FeatureExtractor, RAW_FEATURE_COUNT};
pub use model::{AutoencoderModel, ModelError};
