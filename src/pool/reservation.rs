//! `Reservation` (§3, §4.4): an exclusive, long-lived claim on one Worker by
//! one Kernel Session. A capability handle, not an owner — the Pool still
//! owns the Worker process and its `JobRunner` actor.

use crate::domain::job::Job;
use crate::error::KernelError;
use crate::pool::pool::{Release, WorkerPool};
use crate::worker::runner::{CancelJob, JobRunner, RunJob, RunnerEvent};
use actix::prelude::*;

pub struct Reservation {
    pub runner_id: usize,
    pub(crate) runner: Addr<JobRunner>,
    pub(crate) pool: Addr<WorkerPool>,
    released: bool,
}

impl Reservation {
    pub(crate) fn new(runner_id: usize, runner: Addr<JobRunner>, pool: Addr<WorkerPool>) -> Self {
        Self { runner_id, runner, pool, released: false }
    }

    /// Dispatches `job` against this reservation's worker. Fails fast with
    /// `KernelError::Busy` if a job is already in flight on this
    /// reservation — concurrent `run()` calls are API misuse (§4.4).
    pub async fn run(&self, job: Job, sink: Recipient<RunnerEvent>) -> Result<(), KernelError> {
        self.runner.send(RunJob { job, sink }).await.map_err(KernelError::from)?
    }

    pub fn cancel(&self, job_id: impl Into<String>) {
        self.runner.do_send(CancelJob { job_id: job_id.into() });
    }

    /// Returns the worker to the pool's free list (or triggers replacement
    /// if unhealthy). Idempotent.
    pub fn release(mut self) {
        self.release_mut();
    }

    fn release_mut(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.do_send(Release { runner_id: self.runner_id });
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release_mut();
    }
}
