//! Fans a batch of clip requests out to worker threads and relays their
//! progress back over one channel.

use crate::encoder::OutputPolicy;
use crate::error::{ClipError, ClipResult, ErrorKind};
use crate::job::{JobReport, TranscodeJob};
use crate::progress::{ProgressEvent, ProgressSink, COMPLETE_PERCENT, FAILED_PERCENT};
use crate::request::{ClipRequest, ClipSelection, JobId};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Clone, Debug, Default)]
pub struct DispatchOptions {
    /// `None` runs one worker per request.
    pub max_concurrent_jobs: Option<NonZeroUsize>,
    pub policy: OutputPolicy,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub job: JobId,
    pub source_path: PathBuf,
    pub result: ClipResult<JobReport>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(ClipError::kind)
    }
}

pub struct Dispatcher {
    options: Arc<DispatchOptions>,
    events: Sender<ProgressEvent>,
}

impl Dispatcher {
    /// Returns the dispatcher and the receiving end of its progress relay.
    /// The receiver drains once the dispatcher and every worker are gone.
    pub fn new(options: DispatchOptions) -> (Self, Receiver<ProgressEvent>) {
        let (events, rx) = mpsc::channel();
        (
            Self {
                options: Arc::new(options),
                events,
            },
            rx,
        )
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn dispatch(&self, output_directory: &Path, selections: Vec<ClipSelection>) -> Batch {
        let requests = selections
            .into_iter()
            .map(|selection| selection.into_request(output_directory))
            .collect();
        self.dispatch_requests(requests)
    }

    /// Starts every request and returns without waiting for any of them.
    pub fn dispatch_requests(&self, requests: Vec<ClipRequest>) -> Batch {
        let mut batch = Batch {
            expected: requests
                .iter()
                .map(|r| (r.id, r.source_path.clone()))
                .collect(),
            workers: Vec::new(),
            rejected: Vec::new(),
        };
        match self.options.max_concurrent_jobs {
            None => self.spawn_per_request(&mut batch, requests),
            Some(limit) => self.spawn_pool(&mut batch, requests, limit),
        }
        batch
    }

    fn spawn_per_request(&self, batch: &mut Batch, requests: Vec<ClipRequest>) {
        for request in requests {
            let job = request.id;
            let source_path = request.source_path.clone();
            let options = Arc::clone(&self.options);
            let sink = ProgressSink::new(self.events.clone());
            let spawned = thread::Builder::new()
                .name(format!("clip-{}", job.short()))
                .spawn(move || vec![run_one(request, &options.policy, sink)]);
            match spawned {
                Ok(handle) => batch.workers.push(handle),
                Err(err) => {
                    warn!("Failed to spawn worker for job {}: {}", job.short(), err);
                    batch
                        .rejected
                        .push(self.reject(job, source_path, err.to_string()));
                }
            }
        }
    }

    fn spawn_pool(&self, batch: &mut Batch, requests: Vec<ClipRequest>, limit: NonZeroUsize) {
        let worker_count = limit.get().min(requests.len());
        debug!(
            "Starting {} pooled workers for {} jobs",
            worker_count,
            requests.len()
        );
        let queue = Arc::new(Mutex::new(VecDeque::from(requests)));

        for idx in 0..worker_count {
            let queue = Arc::clone(&queue);
            let options = Arc::clone(&self.options);
            let events = self.events.clone();
            let spawned = thread::Builder::new()
                .name(format!("clip-pool-{}", idx))
                .spawn(move || {
                    let mut outcomes = Vec::new();
                    while let Some(request) = next_request(&queue) {
                        let sink = ProgressSink::new(events.clone());
                        outcomes.push(run_one(request, &options.policy, sink));
                    }
                    outcomes
                });
            match spawned {
                Ok(handle) => batch.workers.push(handle),
                Err(err) => warn!("Failed to spawn pooled worker {}: {}", idx, err),
            }
        }

        if batch.workers.is_empty() {
            // Nothing will drain the queue.
            while let Some(request) = next_request(&queue) {
                let outcome = self.reject(
                    request.id,
                    request.source_path,
                    "no worker could be started".to_string(),
                );
                batch.rejected.push(outcome);
            }
        }
    }

    // Terminal failure for a job that never reached a worker.
    fn reject(&self, job: JobId, source_path: PathBuf, reason: String) -> JobOutcome {
        let _ = self.events.send(ProgressEvent {
            job,
            percent: FAILED_PERCENT,
        });
        JobOutcome {
            job,
            source_path,
            result: Err(ClipError::WorkerPanic { message: reason }),
        }
    }
}

fn next_request(queue: &Mutex<VecDeque<ClipRequest>>) -> Option<ClipRequest> {
    match queue.lock() {
        Ok(mut pending) => pending.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

fn run_one(request: ClipRequest, policy: &OutputPolicy, sink: ProgressSink) -> JobOutcome {
    let job = request.id;
    let source_path = request.source_path.clone();
    guarded(job, source_path, || TranscodeJob::new(request, policy).run(sink))
}

/// Runs one job, turning a panic into that job's own `WorkerPanicError` so a
/// pooled worker keeps the outcomes of the jobs it already finished. The
/// job's terminal -1 was sent while it unwound.
fn guarded<F>(job: JobId, source_path: PathBuf, run: F) -> JobOutcome
where
    F: FnOnce() -> ClipResult<JobReport>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!("Job {} panicked: {}", job.short(), message);
        Err(ClipError::WorkerPanic { message })
    });
    JobOutcome {
        job,
        source_path,
        result,
    }
}

/// Handles to a running batch.
pub struct Batch {
    expected: Vec<(JobId, PathBuf)>,
    workers: Vec<JoinHandle<Vec<JobOutcome>>>,
    rejected: Vec<JobOutcome>,
}

impl Batch {
    pub fn job_ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.expected.iter().map(|(id, _)| *id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every worker finishes and returns one outcome per request,
    /// in submission order. Jobs lost to a panicking worker are reported as
    /// `WorkerPanicError`; their terminal event was sent while they unwound.
    pub fn wait(self) -> Vec<JobOutcome> {
        let mut finished: HashMap<JobId, JobOutcome> = HashMap::new();
        let mut panic_reason: Option<String> = None;

        for worker in self.workers {
            match worker.join() {
                Ok(done) => {
                    for outcome in done {
                        finished.insert(outcome.job, outcome);
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Clip worker panicked: {}", message);
                    panic_reason = Some(message);
                }
            }
        }
        for outcome in self.rejected {
            finished.insert(outcome.job, outcome);
        }

        self.expected
            .into_iter()
            .map(|(job, source_path)| {
                finished.remove(&job).unwrap_or_else(|| JobOutcome {
                    job,
                    source_path,
                    result: Err(ClipError::WorkerPanic {
                        message: panic_reason
                            .clone()
                            .unwrap_or_else(|| "worker exited early".to_string()),
                    }),
                })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RowStatus {
    Running(i32),
    Failed,
}

/// Caller-side view of a batch: last known percent per job. Finished jobs
/// leave the table; failed ones stay, marked as such.
#[derive(Debug, Default)]
pub struct ProgressTable {
    rows: HashMap<JobId, RowStatus>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, job: JobId) {
        self.rows.entry(job).or_insert(RowStatus::Running(0));
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event.percent {
            COMPLETE_PERCENT => {
                self.rows.remove(&event.job);
            }
            FAILED_PERCENT => {
                self.rows.insert(event.job, RowStatus::Failed);
            }
            percent => {
                let row = self.rows.entry(event.job).or_insert(RowStatus::Running(0));
                if let RowStatus::Running(current) = row {
                    *current = (*current).max(percent);
                }
            }
        }
    }

    pub fn status(&self, job: &JobId) -> Option<RowStatus> {
        self.rows.get(job).copied()
    }

    pub fn failed(&self) -> usize {
        self.rows
            .values()
            .filter(|status| matches!(status, RowStatus::Failed))
            .count()
    }

    /// Jobs still running.
    pub fn pending(&self) -> usize {
        self.rows
            .values()
            .filter(|status| matches!(status, RowStatus::Running(_)))
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}
