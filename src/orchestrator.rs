//! The job state machine.
//!
//! One active job per orchestrator: validate the user's inputs, upload the
//! required files, submit the job, then poll it to a terminal state and hand
//! the finished manifest off for display. Every failure path surfaces the
//! underlying error text and returns the machine to `Idle` so the user can
//! resubmit, reusing any already-uploaded files.

use crate::config::Config;
use crate::handoff::{HandoffError, ResultHandoff};
use crate::transport::{ControlPlane, JobRequest, JobState, Manifest, TimeRange, TransportError};
use crate::uploader::{UploadSequencer, VideoFile};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can end a job run
#[derive(Error, Debug)]
pub enum JobError {
    /// Incomplete or malformed user input; no network call was attempted
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server explicitly reported the job as failed
    #[error("Server reported failure")]
    RemoteJobFailure,

    /// The server reported `finished` but sent no result manifest
    #[error("job finished without a result manifest")]
    MissingManifest,

    /// Another job is already in flight on this orchestrator
    #[error("a job is already in progress")]
    Busy,

    /// The poll loop was cancelled before the job reached a terminal state
    #[error("job cancelled")]
    Cancelled,

    /// The job stayed non-terminal longer than the configured maximum wait
    #[error("gave up waiting for the job after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Handoff(#[from] HandoffError),
}

/// User input for one submission. Exactly one mode per run; presence of the
/// required files is checked in the `Validating` step, before any network
/// call.
#[derive(Debug, Clone)]
pub enum JobInput {
    /// Two separate video files, one lap each
    Pair {
        lap_a: Option<VideoFile>,
        lap_b: Option<VideoFile>,
    },
    /// Two time ranges inside one shared video
    Segments {
        video: Option<VideoFile>,
        seg_a: TimeRange,
        seg_b: TimeRange,
    },
}

/// Observable orchestrator phase, for status display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Validating,
    Uploading,
    Submitting,
    Processing,
    Finished,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobPhase::Idle => "Idle",
            JobPhase::Validating => "Validating",
            JobPhase::Uploading => "Uploading",
            JobPhase::Submitting => "Starting job",
            JobPhase::Processing => "Processing",
            JobPhase::Finished => "Done",
            JobPhase::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Drives a submission from raw user input to a committed result manifest
pub struct JobOrchestrator {
    client: Arc<dyn ControlPlane>,
    uploads: Arc<UploadSequencer>,
    handoff: Arc<ResultHandoff>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    active: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
    phase_tx: watch::Sender<JobPhase>,
}

/// Releases the single-job slot when a run ends, however it ends
struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobOrchestrator {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        uploads: Arc<UploadSequencer>,
        handoff: Arc<ResultHandoff>,
        config: &Config,
    ) -> Self {
        let (phase_tx, _) = watch::channel(JobPhase::Idle);

        Self {
            client,
            uploads,
            handoff,
            poll_interval: config.poll_interval(),
            max_wait: config.max_poll_wait(),
            active: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            phase_tx,
        }
    }

    /// Subscribe to phase changes, e.g. for a status line
    pub fn phase(&self) -> watch::Receiver<JobPhase> {
        self.phase_tx.subscribe()
    }

    /// Stop the in-flight poll loop, if any. The active run ends with
    /// [`JobError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Run one submission to completion. Refuses to start while another run
    /// is in flight.
    #[instrument(skip(self, input))]
    pub async fn run(&self, input: JobInput) -> Result<Manifest, JobError> {
        let Some(_guard) = ActiveGuard::acquire(&self.active) else {
            warn!("Submission refused: a job is already in progress");
            return Err(JobError::Busy);
        };

        let cancel = {
            let mut current = self.cancel.lock();
            *current = CancellationToken::new();
            current.clone()
        };

        let result = self.execute(input, &cancel).await;

        match &result {
            Ok(manifest) => {
                self.set_phase(JobPhase::Finished);
                metrics::counter!("lapcompare.jobs.finished").increment(1);
                info!(job_id = %manifest.job_id, "Job finished");
            }
            Err(e) => {
                self.set_phase(JobPhase::Failed);
                metrics::counter!("lapcompare.jobs.failed").increment(1);
                error!(error = %e, "Job failed");
            }
        }

        self.set_phase(JobPhase::Idle);
        result
    }

    async fn execute(
        &self,
        input: JobInput,
        cancel: &CancellationToken,
    ) -> Result<Manifest, JobError> {
        self.set_phase(JobPhase::Validating);
        let request = self.prepare(input).await?;

        self.set_phase(JobPhase::Submitting);
        let handle = self.client.start_job(&request).await?;
        metrics::counter!("lapcompare.jobs.submitted").increment(1);
        info!(
            job_id = %handle.job_id,
            call_id = %handle.call_id,
            results_prefix = %handle.results_prefix,
            "Job submitted"
        );

        self.set_phase(JobPhase::Processing);
        let manifest = self.poll_until_done(&handle.call_id, cancel).await?;

        self.handoff.commit(&manifest)?;
        Ok(manifest)
    }

    /// Validate the inputs for the active mode and upload every required
    /// file. Pair-mode uploads have no ordering dependency on each other and
    /// run concurrently; both must complete before submission.
    async fn prepare(&self, input: JobInput) -> Result<JobRequest, JobError> {
        match input {
            JobInput::Pair { lap_a, lap_b } => {
                let (lap_a, lap_b) = match (lap_a, lap_b) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(JobError::Validation(
                            "Please choose both Lap A and Lap B videos.".to_string(),
                        ))
                    }
                };

                self.set_phase(JobPhase::Uploading);
                let (target_a, target_b) = futures::future::try_join(
                    self.uploads.ensure_uploaded(&lap_a),
                    self.uploads.ensure_uploaded(&lap_b),
                )
                .await?;

                Ok(JobRequest::Pair {
                    lap_a: target_a,
                    lap_b: target_b,
                })
            }
            JobInput::Segments {
                video,
                seg_a,
                seg_b,
            } => {
                let video = video.ok_or_else(|| {
                    JobError::Validation(
                        "Please choose a video containing both laps.".to_string(),
                    )
                })?;

                for range in [&seg_a, &seg_b] {
                    if range.start_s < 0.0 || range.end_s < 0.0 {
                        return Err(JobError::Validation(
                            "Lap segment times must not be negative.".to_string(),
                        ));
                    }
                }

                self.set_phase(JobPhase::Uploading);
                let target = self.uploads.ensure_uploaded(&video).await?;

                Ok(JobRequest::Segments {
                    video: target,
                    seg_a,
                    seg_b,
                })
            }
        }
    }

    /// Poll on a fixed interval until the job reaches a terminal state.
    /// The cancellation token stops the loop between and during polls; the
    /// optional maximum wait turns an endless `running` into a timeout.
    async fn poll_until_done(
        &self,
        call_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Manifest, JobError> {
        let started = tokio::time::Instant::now();

        loop {
            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(JobError::TimedOut(max_wait));
                }
            }

            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                status = self.client.poll_job(call_id) => status?,
            };
            metrics::counter!("lapcompare.polls.total").increment(1);

            match status.status {
                JobState::Finished => {
                    return status.result.ok_or(JobError::MissingManifest);
                }
                JobState::Failed => return Err(JobError::RemoteJobFailure),
                JobState::Queued | JobState::Running => {
                    debug!(state = ?status.status, "Job still in progress");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn set_phase(&self, phase: JobPhase) {
        self.phase_tx.send_replace(phase);
    }
}
