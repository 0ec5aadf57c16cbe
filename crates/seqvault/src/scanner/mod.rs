pub mod format;
pub mod ids;

pub use format::{AlphabetViolation, FormatDetail, FormatValidator, FormatVerdict, SequenceFormat};
pub use ids::{IdsDetail, IdsScanner, IdsVerdict, Severity, ThreatCategory, ThreatPattern};
