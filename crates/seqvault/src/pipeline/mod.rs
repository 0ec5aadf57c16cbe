pub mod analyze;
pub mod runner;

pub use analyze::{AnalysisSummary, AnalyzeError, Analyzer, KmerAnalyzer};
pub use runner::{Pipeline, StageCtx};
