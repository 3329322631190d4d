//! Submit → poll → fetch driver for asynchronous generation APIs.
//!
//! A remote job is created with one submission call that returns a job id and
//! a polling location. The location is polled on a fixed interval until the
//! backend reports a terminal status, then the finished asset is downloaded
//! from the location the ready status points at. Backends differ only in
//! wire details, which live behind [`JobTransport`]; the state machine here
//! is shared.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::generators::imaging::{inspect_image, ImageInfo};

/// Raised to abort in-flight poll loops. `true` means cancelled.
pub type CancelSignal = watch::Receiver<bool>;

/// A signal that never fires, for callers with nothing to cancel on.
pub fn never_cancelled() -> CancelSignal {
    let (_tx, rx) = watch::channel(false);
    rx
}

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: String,
    pub polling_location: String,
    pub submitted_at: Instant,
    /// Submission response minus the polling location.
    pub submission: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready { asset_location: Option<String> },
    /// Any other status value. Always terminal.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub status: JobStatus,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Wire protocol of one asynchronous backend.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Backend label used in logs and errors.
    fn name(&self) -> &str;

    /// Name of the credential this backend needs but does not have.
    fn missing_credential(&self) -> Option<&'static str> {
        None
    }

    /// Creates the job. Returns the job id, polling location, and the raw
    /// submission response.
    async fn submit(&self, payload: &Value) -> Result<(String, String, Value), TransportError>;

    async fn poll(&self, handle: &JobHandle) -> Result<PollReport, TransportError>;

    async fn fetch(&self, asset_location: &str) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: String,
    pub buffer: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    /// Submission to ready, wall clock.
    pub duration: Duration,
    pub poll_count: u32,
    pub submission: Value,
    pub final_status: Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("{backend} submission failed: {source}")]
    Submit {
        backend: String,
        #[source]
        source: TransportError,
    },
    #[error("{backend} poll for job {job_id} failed: {source}")]
    Poll {
        backend: String,
        job_id: String,
        #[source]
        source: TransportError,
    },
    #[error("{backend} job {job_id} ended with status '{status}': {payload}")]
    Terminal {
        backend: String,
        job_id: String,
        status: String,
        payload: Value,
    },
    #[error("{backend} job {job_id} is ready but has no result asset: {payload}")]
    MissingAsset {
        backend: String,
        job_id: String,
        payload: Value,
    },
    #[error("{backend} result download for job {job_id} failed: {source}")]
    Fetch {
        backend: String,
        job_id: String,
        #[source]
        source: TransportError,
    },
    #[error("{backend} job {} cancelled after {polls} poll(s)", .job_id.as_deref().unwrap_or("<unsubmitted>"))]
    Cancelled {
        backend: String,
        job_id: Option<String>,
        polls: u32,
    },
}

impl JobError {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Submit { .. } => None,
            Self::Poll { job_id, .. }
            | Self::Terminal { job_id, .. }
            | Self::MissingAsset { job_id, .. }
            | Self::Fetch { job_id, .. } => Some(job_id.as_str()),
            Self::Cancelled { job_id, .. } => job_id.as_deref(),
        }
    }
}

enum JobState {
    Submitting,
    Polling {
        handle: JobHandle,
        polls: u32,
    },
    Fetching {
        handle: JobHandle,
        asset_location: String,
        polls: u32,
        ready_at: Instant,
        final_status: Value,
    },
}

pub struct JobPoller<C = TokioClock> {
    clock: C,
    poll_interval: Duration,
}

impl JobPoller<TokioClock> {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_clock(TokioClock, poll_interval)
    }
}

impl<C: Clock> JobPoller<C> {
    pub fn with_clock(clock: C, poll_interval: Duration) -> Self {
        Self {
            clock,
            poll_interval,
        }
    }

    /// Runs one job to a terminal state. There is no retry: the first
    /// non-2xx or failure status ends the run.
    pub async fn run<T>(
        &self,
        transport: &T,
        payload: &Value,
        cancel: &CancelSignal,
    ) -> Result<JobOutcome, JobError>
    where
        T: JobTransport + ?Sized,
    {
        let backend = transport.name().to_string();
        let mut cancel = cancel.clone();
        let mut state = JobState::Submitting;

        loop {
            state = match state {
                JobState::Submitting => {
                    if *cancel.borrow() {
                        return Err(JobError::Cancelled {
                            backend,
                            job_id: None,
                            polls: 0,
                        });
                    }
                    let submitted_at = self.clock.now();
                    let (id, polling_location, submission) = transport
                        .submit(payload)
                        .await
                        .map_err(|source| JobError::Submit {
                            backend: backend.clone(),
                            source,
                        })?;
                    info!(backend = %backend, job_id = %id, "remote job submitted");
                    JobState::Polling {
                        handle: JobHandle {
                            id,
                            polling_location,
                            submitted_at,
                            submission,
                        },
                        polls: 0,
                    }
                }
                JobState::Polling { handle, polls } => {
                    if *cancel.borrow() {
                        return Err(cancelled(&backend, &handle, polls));
                    }
                    let polls = polls + 1;
                    let report = transport
                        .poll(&handle)
                        .await
                        .map_err(|source| JobError::Poll {
                            backend: backend.clone(),
                            job_id: handle.id.clone(),
                            source,
                        })?;
                    match report.status {
                        JobStatus::Pending => {
                            debug!(backend = %backend, job_id = %handle.id, polls, "job pending");
                            tokio::select! {
                                _ = self.clock.sleep(self.poll_interval) => {}
                                _ = wait_cancelled(&mut cancel) => {
                                    return Err(cancelled(&backend, &handle, polls));
                                }
                            }
                            JobState::Polling { handle, polls }
                        }
                        JobStatus::Ready {
                            asset_location: Some(asset_location),
                        } => JobState::Fetching {
                            ready_at: self.clock.now(),
                            handle,
                            asset_location,
                            polls,
                            final_status: report.payload,
                        },
                        JobStatus::Ready {
                            asset_location: None,
                        } => {
                            return Err(JobError::MissingAsset {
                                backend,
                                job_id: handle.id,
                                payload: report.payload,
                            })
                        }
                        JobStatus::Other(status) => {
                            warn!(backend = %backend, job_id = %handle.id, status = %status, "job failed");
                            return Err(JobError::Terminal {
                                backend,
                                job_id: handle.id,
                                status,
                                payload: report.payload,
                            });
                        }
                    }
                }
                JobState::Fetching {
                    handle,
                    asset_location,
                    polls,
                    ready_at,
                    final_status,
                } => {
                    let buffer = transport.fetch(asset_location.as_str()).await.map_err(
                        |source| JobError::Fetch {
                            backend: backend.clone(),
                            job_id: handle.id.clone(),
                            source,
                        },
                    )?;
                    let info = inspect_image(buffer.as_slice());
                    let duration = ready_at.saturating_duration_since(handle.submitted_at);
                    info!(
                        backend = %backend,
                        job_id = %handle.id,
                        polls,
                        duration_ms = duration.as_millis() as u64,
                        bytes = buffer.len(),
                        "remote job finished"
                    );
                    let (width, height, format) = match info {
                        Some(ImageInfo {
                            width,
                            height,
                            format,
                        }) => (Some(width), Some(height), Some(format)),
                        None => (None, None, None),
                    };
                    return Ok(JobOutcome {
                        job_id: handle.id,
                        buffer,
                        width,
                        height,
                        format,
                        duration,
                        poll_count: polls,
                        submission: handle.submission,
                        final_status,
                    });
                }
            };
        }
    }
}

fn cancelled(backend: &str, handle: &JobHandle, polls: u32) -> JobError {
    warn!(backend = %backend, job_id = %handle.id, polls, "job polling cancelled");
    JobError::Cancelled {
        backend: backend.to_string(),
        job_id: Some(handle.id.clone()),
        polls,
    }
}

/// Resolves once the signal reads `true`. Parks forever if the sender is
/// gone without having fired.
async fn wait_cancelled(cancel: &mut CancelSignal) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{ready, tiny_png, FakeClock, ScriptedTransport};
    use super::*;

    #[tokio::test]
    async fn pending_then_ready_polls_n_plus_one_times() {
        let pending = 3;
        let mut statuses = vec![JobStatus::Pending; pending];
        statuses.push(ready("https://cdn.test/sample.png"));
        let transport = ScriptedTransport::new(statuses, tiny_png(8, 6));
        let clock = FakeClock::new();
        let poller = JobPoller::with_clock(clock.clone(), Duration::from_millis(400));

        let outcome = poller
            .run(&transport, &json!({"prompt": "x"}), &never_cancelled())
            .await
            .expect("job should finish");

        assert_eq!(transport.poll_count(), 4);
        assert_eq!(outcome.poll_count, 4);
        assert_eq!(outcome.job_id, "job-1");
        assert_eq!((outcome.width, outcome.height), (Some(8), Some(6)));
        assert_eq!(outcome.format.as_deref(), Some("png"));
        assert_eq!(outcome.duration, Duration::from_millis(1200));
        assert_eq!(clock.sleeps.lock().expect("sleeps").len(), pending);
        assert_eq!(
            transport.fetched.lock().expect("fetched").as_slice(),
            ["https://cdn.test/sample.png"]
        );
    }

    #[tokio::test]
    async fn unrecognized_status_fails_without_further_polling() {
        let transport = ScriptedTransport::new(
            vec![
                JobStatus::Pending,
                JobStatus::Other(String::from("Weird")),
                JobStatus::Pending,
            ],
            Vec::new(),
        );
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));

        let err = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect_err("weird status is terminal");

        assert_eq!(transport.poll_count(), 2);
        assert!(matches!(
            err,
            JobError::Terminal { ref status, ref job_id, .. } if status == "Weird" && job_id == "job-1"
        ));
        assert!(transport.fetched.lock().expect("fetched").is_empty());
    }

    #[tokio::test]
    async fn submit_failure_carries_body_and_skips_polling() {
        let transport = ScriptedTransport::new(vec![JobStatus::Pending], Vec::new());
        *transport.submit_result.lock().expect("mutex") = Some(Err(TransportError::Http {
            status: 422,
            body: String::from("bad prompt"),
        }));
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));

        let err = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect_err("submit fails");

        assert_eq!(transport.poll_count(), 0);
        assert!(err.to_string().contains("bad prompt"));
        assert_eq!(err.job_id(), None);
    }

    #[tokio::test]
    async fn poll_http_error_is_not_retried() {
        let transport = ScriptedTransport::new(Vec::new(), Vec::new());
        transport.polls.lock().expect("mutex").push_back(Err(TransportError::Http {
            status: 503,
            body: String::from("busy"),
        }));
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));

        let err = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect_err("poll fails");

        assert_eq!(transport.poll_count(), 1);
        assert_eq!(err.job_id(), Some("job-1"));
    }

    #[tokio::test]
    async fn ready_without_asset_and_fetch_failure_are_errors() {
        let transport = ScriptedTransport::new(
            vec![JobStatus::Ready {
                asset_location: None,
            }],
            Vec::new(),
        );
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));
        let err = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect_err("missing asset");
        assert!(matches!(err, JobError::MissingAsset { .. }));

        let transport = ScriptedTransport::new(vec![ready("https://cdn.test/x")], Vec::new());
        *transport.fetch_result.lock().expect("mutex") = Some(Err(TransportError::Http {
            status: 404,
            body: String::from("gone"),
        }));
        let err = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect_err("fetch fails");
        assert!(matches!(err, JobError::Fetch { .. }));
    }

    #[tokio::test]
    async fn undecodable_asset_degrades_to_absent_dimensions() {
        let transport =
            ScriptedTransport::new(vec![ready("https://cdn.test/x")], b"not an image".to_vec());
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));

        let outcome = poller
            .run(&transport, &json!({}), &never_cancelled())
            .await
            .expect("introspection failure is not fatal");

        assert_eq!(outcome.buffer, b"not an image".to_vec());
        assert_eq!((outcome.width, outcome.height, outcome.format), (None, None, None));
    }

    #[tokio::test]
    async fn cancellation_stops_the_poll_loop() {
        let transport =
            ScriptedTransport::new(vec![JobStatus::Pending; 10], tiny_png(1, 1));
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("receiver alive");
        let poller = JobPoller::with_clock(FakeClock::new(), Duration::from_millis(10));

        let err = poller
            .run(&transport, &json!({}), &rx)
            .await
            .expect_err("cancelled before submit");
        assert!(matches!(err, JobError::Cancelled { job_id: None, .. }));
        assert_eq!(transport.submit_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_sleep_returns_job_id() {
        struct StallingClock;

        #[async_trait]
        impl Clock for StallingClock {
            fn now(&self) -> Instant {
                Instant::now()
            }

            async fn sleep(&self, _duration: Duration) {
                std::future::pending::<()>().await;
            }
        }

        let transport = ScriptedTransport::new(vec![JobStatus::Pending], tiny_png(1, 1));
        let (tx, rx) = watch::channel(false);
        let poller = JobPoller::with_clock(StallingClock, Duration::from_secs(3600));

        let request = json!({});
        let run = poller.run(&transport, &request, &rx);
        let cancel = async {
            tokio::task::yield_now().await;
            tx.send(true).expect("receiver alive");
        };
        let (result, ()) = tokio::join!(run, cancel);

        let err = result.expect_err("cancelled mid-poll");
        assert!(matches!(err, JobError::Cancelled { polls: 1, .. }));
        assert_eq!(err.job_id(), Some("job-1"));
    }
}
