use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{
    Job, JobFailure, JobId, JobInput, JobOutput, JobState, JobStatus, JobSummary,
};
use crate::models::options::ScaleFactor;

/// Progress reported once a worker picks a job up.
const PROCESSING_PROGRESS: f32 = 0.05;

/// Proof that a job was created and has not been dispatched yet.
///
/// Not `Clone`: the runner consumes it on dispatch, so a job is dispatched at
/// most once.
#[derive(Debug)]
pub struct JobTicket {
    id: JobId,
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }
}

/// Status changes the runner may request.
#[derive(Debug)]
pub enum Transition {
    Start,
    Complete(JobOutput),
    Fail(JobFailure),
}

impl Transition {
    fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Processing,
            Transition::Complete(_) => JobStatus::Done,
            Transition::Fail(_) => JobStatus::Error,
        }
    }
}

/// Number of stored jobs per status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

/// In-memory registry of upscaling jobs.
///
/// All job mutation goes through [`JobStore::create`], [`JobStore::transition`]
/// and [`JobStore::evict_expired`]; readers only ever get clones.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job under a fresh id.
    pub fn create(&self, input: JobInput, effective_factor: ScaleFactor) -> JobTicket {
        let input = Arc::new(input);
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        loop {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = jobs.entry(id) {
                slot.insert(Job {
                    id,
                    state: JobState::Pending,
                    progress: 0.0,
                    input,
                    effective_factor,
                    created_at: now,
                    updated_at: now,
                    finished_at: None,
                });
                return JobTicket { id };
            }
        }
    }

    /// Snapshot of a job, including its input and output handles.
    pub fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    pub fn summary(&self, id: JobId) -> Result<JobSummary, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id)
            .map(Job::summary)
            .ok_or(StoreError::NotFound(id))
    }

    pub fn input(&self, id: JobId) -> Result<Arc<JobInput>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&id)
            .map(|job| Arc::clone(&job.input))
            .ok_or(StoreError::NotFound(id))
    }

    /// Apply a status change atomically.
    ///
    /// Allowed: pending → processing, pending/processing → error,
    /// processing → done. Anything else would break the terminal-state
    /// invariant and is refused with [`StoreError::IllegalTransition`].
    pub fn transition(&self, id: JobId, transition: Transition) -> Result<JobStatus, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let from = job.status();
        let to = transition.target();
        let allowed = matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        );
        if !allowed {
            return Err(StoreError::IllegalTransition { id, from, to });
        }

        let now = Utc::now();
        match transition {
            Transition::Start => {
                job.state = JobState::Processing;
                job.progress = PROCESSING_PROGRESS;
            }
            Transition::Complete(output) => {
                job.state = JobState::Done(output);
                job.progress = 1.0;
                job.finished_at = Some(now);
            }
            Transition::Fail(failure) => {
                job.state = JobState::Error(failure);
                job.finished_at = Some(now);
            }
        }
        job.updated_at = now;

        Ok(to)
    }

    /// Drop terminal jobs that finished more than `ttl` before `now`.
    ///
    /// Runs under the write lock and never touches pending or processing
    /// jobs, so it cannot interleave with a live transition.
    pub fn evict_expired(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = now - ttl;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.status().is_terminal() => finished > cutoff,
            _ => true,
        });
        before - jobs.len()
    }

    pub fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values()
            .fold(StatusCounts::default(), |mut counts, job| {
                match job.status() {
                    JobStatus::Pending => counts.pending += 1,
                    JobStatus::Processing => counts.processing += 1,
                    JobStatus::Done => counts.done += 1,
                    JobStatus::Error => counts.error += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}
