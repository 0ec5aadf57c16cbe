//! Sequential stage executor for one job.
//!
//! Stages run in a fixed order on the worker's own thread. The first fatal
//! failure short-circuits the rest; `finalize` always runs. Cancellation is
//! cooperative: the signal is checked at every stage boundary and before
//! each I/O batch, and an exceeded deadline is treated the same way but
//! recorded as a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::aml::{AmlDetector, AmlOutcome};
use crate::config::Config;
use crate::error::StoreError;
use crate::events::{Event, EventBus};
use crate::registry::{
    AnalyzeDetail, FailReason, JobId, JobRegistry, JobState, PersistDetail, StageDetail,
    StageName, StageOutcome, StageRecord, Verdict,
};
use crate::sanitize::redact_filename;
use crate::scanner::{FormatValidator, IdsScanner};
use crate::store::{derive_key, ArtifactRef, ObjectStore, KEY_LEN};

use super::analyze::{AnalysisSummary, Analyzer};

/// Interrupt context handed to a running stage. Stages poll `aborted`
/// before starting new work batches.
pub struct StageCtx<'a> {
    cancel: &'a AtomicBool,
    deadline: Option<Instant>,
}

impl StageCtx<'_> {
    pub fn aborted(&self) -> bool {
        self.cancelled() || self.deadline.map(|d| Instant::now() > d).unwrap_or(false)
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Tracks whether the remaining stages should still run.
struct Gate {
    failure: Option<FailReason>,
    cancelled: bool,
}

impl Gate {
    fn open(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    registry: Arc<JobRegistry>,
    store: Arc<ObjectStore>,
    format: FormatValidator,
    ids: IdsScanner,
    aml: AmlDetector,
    analyzer: Arc<dyn Analyzer>,
    events: EventBus,
    master_key: [u8; KEY_LEN],
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        registry: Arc<JobRegistry>,
        store: Arc<ObjectStore>,
        aml: AmlDetector,
        analyzer: Arc<dyn Analyzer>,
        events: EventBus,
        master_key: [u8; KEY_LEN],
    ) -> Self {
        let ids = IdsScanner::new(config.ids_threshold, config.ids_score_ceiling);
        Self {
            config,
            registry,
            store,
            format: FormatValidator::new(),
            ids,
            aml,
            analyzer,
            events,
            master_key,
        }
    }

    /// Runs every stage for one job. Consumes the upload buffer; the bytes
    /// are zeroized in `finalize`.
    pub fn run(&self, job_id: JobId, mut payload: Vec<u8>) {
        let filename = self
            .registry
            .snapshot(job_id)
            .map(|v| v.filename)
            .unwrap_or_default();
        let _span = info_span!("pipeline", job_id = %job_id, filename = %redact_filename(&filename))
            .entered();

        let Ok(cancel) = self.registry.cancel_flag(job_id) else {
            warn!("Job {job_id} vanished before execution");
            return;
        };
        if let Err(e) = self
            .registry
            .transition(job_id, JobState::Queued, JobState::Running)
        {
            warn!("Job {job_id} could not enter running: {e}");
            return;
        }

        let run_started = Instant::now();
        let mut gate = Gate {
            failure: None,
            cancelled: false,
        };
        let mut ids_score = 0u32;
        let mut aml_score: Option<f64> = None;
        let mut artifact: Option<ArtifactRef> = None;
        let mut analysis: Option<AnalysisSummary> = None;
        let mut analysis_ok = true;

        self.execute_stage(job_id, 0, StageName::Admit, &cancel, &mut gate, |_ctx| {
            if payload.is_empty() {
                return (
                    StageOutcome::Fail,
                    StageDetail::Error {
                        message: "empty upload reached the pipeline".to_string(),
                    },
                    Some(FailReason::Internal),
                );
            }
            if payload.len() > self.config.max_input_bytes {
                return (
                    StageOutcome::Fail,
                    StageDetail::Error {
                        message: "oversize upload reached the pipeline".to_string(),
                    },
                    Some(FailReason::Internal),
                );
            }
            (
                StageOutcome::Pass,
                StageDetail::Admit {
                    size: payload.len(),
                },
                None,
            )
        });

        self.execute_stage(job_id, 1, StageName::Format, &cancel, &mut gate, |_ctx| {
            let verdict = self.format.scan(&payload);
            let (outcome, reason) = if verdict.passed {
                (StageOutcome::Pass, None)
            } else {
                (StageOutcome::Fail, Some(FailReason::FormatInvalid))
            };
            (outcome, StageDetail::Format(verdict.detail), reason)
        });

        self.execute_stage(job_id, 2, StageName::Ids, &cancel, &mut gate, |_ctx| {
            let verdict = self.ids.scan(&payload);
            ids_score = verdict.score;
            let (outcome, reason) = if verdict.passed {
                (StageOutcome::Pass, None)
            } else {
                (StageOutcome::Fail, Some(FailReason::ThreatsDetected))
            };
            (outcome, StageDetail::Ids(verdict.detail), reason)
        });

        self.execute_stage(job_id, 3, StageName::Aml, &cancel, &mut gate, |_ctx| {
            let verdict = self.aml.scan(&payload);
            aml_score = verdict.score;
            match verdict.outcome {
                AmlOutcome::Pass => (StageOutcome::Pass, StageDetail::Aml(verdict.detail), None),
                AmlOutcome::Skip => (StageOutcome::Skip, StageDetail::Aml(verdict.detail), None),
                AmlOutcome::Fail => (
                    StageOutcome::Fail,
                    StageDetail::Aml(verdict.detail),
                    Some(FailReason::Adversarial),
                ),
            }
        });

        self.execute_stage(job_id, 4, StageName::Persist, &cancel, &mut gate, |ctx| {
            let key = derive_key(&self.master_key, job_id.as_bytes());
            match self.store.put(job_id, &payload, &key, &|| ctx.aborted()) {
                Ok(stored) => {
                    let detail = PersistDetail {
                        content_hash: stored.content_hash.clone(),
                        stored_size: stored.stored_size,
                        algorithm_tag: stored.algorithm_tag.clone(),
                    };
                    if let Err(e) = self.registry.set_artifact(job_id, stored.clone()) {
                        warn!("Failed to record artifact for {job_id}: {e}");
                    }
                    artifact = Some(stored);
                    (StageOutcome::Pass, StageDetail::Persist(detail), None)
                }
                Err(StoreError::Interrupted) => (
                    StageOutcome::Fail,
                    StageDetail::Interrupted {
                        timeout: !ctx.cancelled(),
                    },
                    None,
                ),
                Err(e @ StoreError::Integrity(_)) => (
                    StageOutcome::Fail,
                    StageDetail::Error {
                        message: e.to_string(),
                    },
                    Some(FailReason::IntegrityError),
                ),
                Err(e) => (
                    StageOutcome::Fail,
                    StageDetail::Error {
                        message: e.to_string(),
                    },
                    Some(FailReason::StorageError),
                ),
            }
        });

        self.execute_stage(job_id, 5, StageName::Analyze, &cancel, &mut gate, |_ctx| {
            match self.analyzer.analyze(&payload) {
                Ok(summary) => {
                    analysis = Some(summary.clone());
                    (
                        StageOutcome::Pass,
                        StageDetail::Analyze(AnalyzeDetail {
                            ok: true,
                            summary: Some(summary),
                            error: None,
                        }),
                        None,
                    )
                }
                // Collaborator errors fail this stage only; the job still
                // completes with analysis_ok = false.
                Err(e) => {
                    analysis_ok = false;
                    (
                        StageOutcome::Fail,
                        StageDetail::Analyze(AnalyzeDetail {
                            ok: false,
                            summary: None,
                            error: Some(e.to_string()),
                        }),
                        None,
                    )
                }
            }
        });

        // finalize always runs: wipe the plaintext, then settle the verdict.
        {
            let started_at = Utc::now();
            let _ = self.registry.mark_stage_started(job_id, 6);
            self.events.emit(Event::StageStarted {
                job_id,
                stage: StageName::Finalize,
            });
            let zeroized_bytes = payload.len();
            payload.iter_mut().for_each(|b| *b = 0);
            self.record_stage(
                job_id,
                StageName::Finalize,
                started_at,
                StageOutcome::Pass,
                StageDetail::Finalize { zeroized_bytes },
            );
        }

        let terminal = if gate.cancelled {
            JobState::Cancelled
        } else if gate.failure.is_some() {
            JobState::Failed
        } else {
            JobState::Completed
        };
        let reason = if gate.cancelled {
            Some(FailReason::Cancelled)
        } else {
            gate.failure
        };

        let stages = self
            .registry
            .snapshot(job_id)
            .map(|v| v.stages)
            .unwrap_or_default();
        let verdict = Verdict {
            terminal_state: terminal,
            stages,
            artifact,
            analysis,
            analysis_ok,
            ids_score,
            aml_score,
            total_duration_ms: run_started.elapsed().as_millis() as u64,
            reason,
        };

        if let Err(e) = self.registry.finalize(job_id, terminal, verdict) {
            warn!("Failed to finalize job {job_id}: {e}");
            return;
        }
        self.events.emit(Event::JobTerminal {
            job_id,
            state: terminal,
            reason,
        });
        info!(
            "Job {job_id} reached {terminal:?} in {} ms",
            run_started.elapsed().as_millis()
        );
    }

    fn execute_stage<F>(
        &self,
        job_id: JobId,
        index: usize,
        name: StageName,
        cancel: &AtomicBool,
        gate: &mut Gate,
        body: F,
    ) where
        F: FnOnce(&StageCtx<'_>) -> (StageOutcome, StageDetail, Option<FailReason>),
    {
        if !gate.open() || cancel.load(Ordering::SeqCst) {
            if gate.open() {
                gate.cancelled = true;
            }
            let now = Utc::now();
            self.record_stage(job_id, name, now, StageOutcome::Skip, StageDetail::Skipped);
            return;
        }

        let _span = info_span!("stage", name = %name).entered();
        let started_at = Utc::now();
        let started = Instant::now();
        if let Err(e) = self.registry.mark_stage_started(job_id, index) {
            warn!("Could not mark stage {name} started for {job_id}: {e}");
        }
        self.events.emit(Event::StageStarted {
            job_id,
            stage: name,
        });

        let deadline = self.config.stage_deadlines_ms.for_stage(name);
        let ctx = StageCtx {
            cancel,
            deadline: deadline.map(|d| started + d),
        };
        let (mut outcome, mut detail, mut reason) = body(&ctx);

        if let StageDetail::Interrupted { timeout } = &detail {
            outcome = StageOutcome::Fail;
            if *timeout {
                reason = Some(FailReason::Timeout);
            } else {
                gate.cancelled = true;
                reason = None;
            }
        } else if deadline.map(|d| started.elapsed() > d).unwrap_or(false) {
            // The stage completed after its deadline; the boundary check
            // converts that into a timeout failure.
            outcome = StageOutcome::Fail;
            detail = StageDetail::Interrupted { timeout: true };
            reason = Some(FailReason::Timeout);
        }

        if let Some(r) = reason {
            gate.failure = Some(r);
        }
        self.record_stage(job_id, name, started_at, outcome, detail);
    }

    fn record_stage(
        &self,
        job_id: JobId,
        name: StageName,
        started_at: chrono::DateTime<Utc>,
        outcome: StageOutcome,
        detail: StageDetail,
    ) {
        let record = StageRecord {
            name,
            started_at,
            finished_at: Utc::now(),
            outcome,
            detail,
        };
        let duration_ms = record.duration_ms();
        if let Err(e) = self.registry.append_stage(job_id, record) {
            warn!("Could not append stage record {name} for {job_id}: {e}");
        }
        self.events.emit(Event::StageFinished {
            job_id,
            stage: name,
            outcome,
            duration_ms,
        });
    }
}
