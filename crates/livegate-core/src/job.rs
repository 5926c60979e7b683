//! Off-thread execution of long, fallible work units.
//!
//! A job runs on its own worker thread as soon as it is submitted. The
//! submitter keeps the only [`JobHandle`], and consuming it through
//! [`JobRunner::wait_interactive`] is the single way to observe the outcome,
//! so every result is seen exactly once. While waiting, the caller's
//! [`EventPump`] keeps being serviced so the interface stays responsive.
//!
//! Jobs cannot be cancelled. An optional deadline turns a hung job into a
//! [`JobError::TimedOut`] outcome while the worker keeps running detached.

use crate::config::LivegateConfig;
use crate::error::JobError;
use crate::event::{EventPump, NoopPump};
use log::{debug, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Identifier assigned to each submitted job.
pub type JobId = u64;

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SUCCEEDED: u8 = 2;
const STATE_FAILED: u8 = 3;

/// Lifecycle of a job as observed from its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_PENDING => JobState::Pending,
            STATE_RUNNING => JobState::Running,
            STATE_SUCCEEDED => JobState::Succeeded,
            _ => JobState::Failed,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Final outcome of a job: exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Succeeded(T),
    Failed(JobError),
}

impl<T> JobOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            JobOutcome::Succeeded(value) => Some(value),
            JobOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobOutcome::Succeeded(_) => None,
            JobOutcome::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<T, JobError> {
        match self {
            JobOutcome::Succeeded(value) => Ok(value),
            JobOutcome::Failed(err) => Err(err),
        }
    }
}

/// Single-consumer handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    descriptor: String,
    state: Arc<AtomicU8>,
    rx: Receiver<Result<T, JobError>>,
    submitted: Instant,
    spawn_error: Option<JobError>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn state(&self) -> JobState {
        JobState::from_raw(self.state.load(Ordering::Acquire))
    }
}

/// Starts jobs on worker threads and waits for them interactively.
#[derive(Debug)]
pub struct JobRunner {
    next_id: AtomicU64,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl JobRunner {
    /// Runner that pumps events every `poll_interval` and never times out.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            timeout: None,
        }
    }

    pub fn from_config(config: &LivegateConfig) -> Self {
        Self::new(config.job_poll_interval()).with_timeout(config.job_timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Start `work` on a fresh worker thread immediately.
    pub fn submit<T, E, F>(&self, descriptor: impl Into<String>, work: F) -> JobHandle<T>
    where
        T: Send + 'static,
        E: Into<JobError>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = descriptor.into();
        let state = Arc::new(AtomicU8::new(STATE_PENDING));
        let (tx, rx) = mpsc::sync_channel(1);

        let worker_state = Arc::clone(&state);
        let spawned = thread::Builder::new()
            .name(format!("job-{id}"))
            .spawn(move || {
                worker_state.store(STATE_RUNNING, Ordering::Release);
                let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(err.into()),
                    Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
                };
                let terminal = if outcome.is_ok() {
                    STATE_SUCCEEDED
                } else {
                    STATE_FAILED
                };
                worker_state.store(terminal, Ordering::Release);
                let _ = tx.send(outcome);
            });

        let spawn_error = match spawned {
            Ok(_) => {
                debug!("job {id} started: {descriptor}");
                None
            }
            Err(err) => {
                warn!("job {id} ({descriptor}) could not start: {err}");
                state.store(STATE_FAILED, Ordering::Release);
                Some(JobError::Spawn(err.to_string()))
            }
        };

        JobHandle {
            id,
            descriptor,
            state,
            rx,
            submitted: Instant::now(),
            spawn_error,
        }
    }

    /// Block until `handle` finishes while servicing `pump` between polls.
    ///
    /// The pump runs at least once before this returns, and then once per
    /// poll interval.
    pub fn wait_interactive<T>(
        &self,
        mut handle: JobHandle<T>,
        pump: &mut dyn EventPump,
    ) -> JobOutcome<T> {
        if let Some(err) = handle.spawn_error.take() {
            return JobOutcome::Failed(err);
        }

        let deadline = self.timeout.map(|timeout| handle.submitted + timeout);
        loop {
            pump.pump();

            let wait = match deadline {
                Some(deadline) => self
                    .poll_interval
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.poll_interval,
            };

            match handle.rx.recv_timeout(wait) {
                Ok(Ok(value)) => {
                    debug!(
                        "job {} finished in {:?}: {}",
                        handle.id,
                        handle.submitted.elapsed(),
                        handle.descriptor
                    );
                    return JobOutcome::Succeeded(value);
                }
                Ok(Err(err)) => {
                    warn!("job {} ({}) failed: {err}", handle.id, handle.descriptor);
                    return JobOutcome::Failed(err);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                        if Instant::now() >= deadline {
                            warn!(
                                "job {} ({}) exceeded {timeout:?}; leaving worker detached",
                                handle.id, handle.descriptor
                            );
                            return JobOutcome::Failed(JobError::TimedOut {
                                job: handle.descriptor.clone(),
                                after: timeout,
                            });
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return JobOutcome::Failed(JobError::Disconnected);
                }
            }
        }
    }

    /// Block until `handle` finishes without servicing any events.
    pub fn wait<T>(&self, handle: JobHandle<T>) -> JobOutcome<T> {
        self.wait_interactive(handle, &mut NoopPump)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
