//! Job data model: states, stage records, verdicts, and read-only views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aml::AmlDetail;
use crate::pipeline::analyze::AnalysisSummary;
use crate::scanner::{FormatDetail, IdsDetail};
use crate::store::ArtifactRef;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    RetainedDeleted,
}

impl JobState {
    /// States after which the record never changes except for deletion
    /// bookkeeping.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::RetainedDeleted
        )
    }

    /// Legal transitions: queued→running, running→{completed, failed,
    /// cancelled}, and any of those into retained_deleted.
    pub fn can_transition_to(self, to: JobState) -> bool {
        matches!(
            (self, to),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
                | (JobState::Completed, JobState::RetainedDeleted)
                | (JobState::Failed, JobState::RetainedDeleted)
                | (JobState::Cancelled, JobState::RetainedDeleted)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Admit,
    Format,
    Ids,
    Aml,
    Persist,
    Analyze,
    Finalize,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Admit,
        StageName::Format,
        StageName::Ids,
        StageName::Aml,
        StageName::Persist,
        StageName::Analyze,
        StageName::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Admit => "admit",
            StageName::Format => "format",
            StageName::Ids => "ids",
            StageName::Aml => "aml",
            StageName::Persist => "persist",
            StageName::Analyze => "analyze",
            StageName::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Pass,
    Fail,
    Skip,
}

/// Coarse, stable failure reasons carried on the verdict. Free-form strings
/// are for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    FormatInvalid,
    ThreatsDetected,
    Adversarial,
    Timeout,
    Cancelled,
    StorageError,
    IntegrityError,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistDetail {
    pub content_hash: String,
    pub stored_size: u64,
    pub algorithm_tag: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDetail {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AnalysisSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-stage structured summary. Never the input bytes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    Admit { size: usize },
    Format(FormatDetail),
    Ids(IdsDetail),
    Aml(AmlDetail),
    Persist(PersistDetail),
    Analyze(AnalyzeDetail),
    Finalize { zeroized_bytes: usize },
    /// Stage abandoned at its boundary. `timeout` distinguishes an exceeded
    /// deadline from cooperative cancellation.
    Interrupted { timeout: bool },
    Skipped,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub name: StageName,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    pub detail: StageDetail,
}

impl StageRecord {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Terminal per-job outcome summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub terminal_state: JobState,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisSummary>,
    pub analysis_ok: bool,
    pub ids_score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aml_score: Option<f64>,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailReason>,
}

/// Immutable snapshot of a job, safe to hand to any number of readers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: JobId,
    pub filename: String,
    pub size: usize,
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub stage_cursor: usize,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}
