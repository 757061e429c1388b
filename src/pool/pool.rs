//! `WorkerPool` (§4.4): a fixed-size set of Workers+Runners, reservation
//! (sticky) and free-list (round-robin), restart policy, back-pressure.
//! Mirrors `VrmComponentManager`/`AciManager`
//! (`grid_resource_management_system/vrm_component_manager.rs`), which keeps
//! a registry of addressable components; this replaces the lookup-by-name
//! pattern with lookup-by-numeric-id over a fixed-size worker set. The
//! async `Reserve`/`Shutdown` operations follow actix's own
//! `ResponseFuture` idiom for work that must cross the actor's mailbox
//! boundary without blocking it.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::pool::registry::JobRegistry;
use crate::pool::reservation::Reservation;
use crate::worker::process::{WorkerCommand, WorkerLauncher};
use crate::worker::runner::{CancelJob, ForceTerminate, JobRunner, RunnerDied};
use actix::prelude::*;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5_000;

#[derive(Message)]
#[rtype(result = "std::result::Result<Reservation, KernelError>")]
pub struct Reserve {
    pub deadline: Duration,
}

#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct Release {
    pub runner_id: usize,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct CancelGlobal {
    pub job_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown {
    pub grace: Duration,
}

#[derive(Message)]
#[rtype(result = "PoolStats")]
pub struct GetStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub reserved: usize,
    pub idle: usize,
    pub restarting: usize,
}

pub struct WorkerPool {
    config: Arc<KernelConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    registry: Arc<JobRegistry>,
    runners: HashMap<usize, Addr<JobRunner>>,
    free_ids: VecDeque<usize>,
    reserved_ids: HashSet<usize>,
    replacing_ids: HashSet<usize>,
    backoff_ms: HashMap<usize, u64>,
    waiters: VecDeque<oneshot::Sender<Reservation>>,
    shutting_down: bool,
}

impl WorkerPool {
    pub fn new(config: Arc<KernelConfig>, worker_command: WorkerCommand) -> Self {
        Self::with_launcher(config, Arc::new(worker_command))
    }

    /// Test/advanced entry point: swap in any `WorkerLauncher`, e.g. an
    /// in-memory fake worker (`tests/support`) instead of a real process.
    pub fn with_launcher(config: Arc<KernelConfig>, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            registry: Arc::new(JobRegistry::new()),
            runners: HashMap::new(),
            free_ids: VecDeque::new(),
            reserved_ids: HashSet::new(),
            replacing_ids: HashSet::new(),
            backoff_ms: HashMap::new(),
            waiters: VecDeque::new(),
            shutting_down: false,
        }
    }

    fn spawn_runner(&self, ctx: &Context<Self>, id: usize) -> Addr<JobRunner> {
        JobRunner::new(id, self.config.clone(), self.launcher.clone(), ctx.address().recipient(), self.registry.clone()).start()
    }

    fn try_fulfill_waiter(&mut self, ctx: &mut Context<Self>, runner_id: usize) -> bool {
        while let Some(tx) = self.waiters.pop_front() {
            let addr = match self.runners.get(&runner_id) {
                Some(addr) => addr.clone(),
                None => return false,
            };
            let reservation = Reservation::new(runner_id, addr, ctx.address());
            match tx.send(reservation) {
                Ok(()) => {
                    self.reserved_ids.insert(runner_id);
                    return true;
                }
                Err(_returned) => continue, // caller already timed out; try the next waiter
            }
        }
        false
    }
}

impl Actor for WorkerPool {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        for id in 0..self.config.pool_size {
            let addr = self.spawn_runner(ctx, id);
            self.runners.insert(id, addr);
            self.free_ids.push_back(id);
        }
        log::info!("worker pool started with {} workers", self.config.pool_size);
    }
}

impl Handler<Reserve> for WorkerPool {
    type Result = ResponseFuture<std::result::Result<Reservation, KernelError>>;

    fn handle(&mut self, msg: Reserve, ctx: &mut Self::Context) -> Self::Result {
        if self.shutting_down {
            return Box::pin(async { Err(KernelError::PoolExhausted) });
        }

        if let Some(id) = self.free_ids.pop_front() {
            self.reserved_ids.insert(id);
            let addr = self.runners[&id].clone();
            let reservation = Reservation::new(id, addr, ctx.address());
            return Box::pin(async move { Ok(reservation) });
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        let deadline = msg.deadline;
        Box::pin(async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(reservation)) => Ok(reservation),
                Ok(Err(_)) | Err(_) => Err(KernelError::PoolExhausted),
            }
        })
    }
}

impl Handler<Release> for WorkerPool {
    type Result = ();

    fn handle(&mut self, msg: Release, ctx: &mut Self::Context) {
        self.reserved_ids.remove(&msg.runner_id);
        self.backoff_ms.remove(&msg.runner_id);

        if self.replacing_ids.contains(&msg.runner_id) || !self.runners.contains_key(&msg.runner_id) {
            // Already dead (or being replaced); the worker never makes it back to the free list.
            return;
        }

        if self.shutting_down {
            return;
        }

        if !self.try_fulfill_waiter(ctx, msg.runner_id) {
            self.free_ids.push_back(msg.runner_id);
        }
    }
}

impl Handler<RunnerDied> for WorkerPool {
    type Result = ();

    fn handle(&mut self, msg: RunnerDied, ctx: &mut Self::Context) {
        let id = msg.runner_id;
        if self.replacing_ids.contains(&id) || !self.runners.contains_key(&id) {
            // Duplicate death notification for a worker already being (or
            // already) replaced; ignore it rather than scheduling a second
            // replacement timer for the same id.
            return;
        }
        self.reserved_ids.remove(&id);
        self.free_ids.retain(|&other| other != id);
        self.runners.remove(&id);

        if self.shutting_down {
            return;
        }

        self.replacing_ids.insert(id);
        let backoff = self.backoff_ms.get(&id).copied().unwrap_or(INITIAL_BACKOFF_MS);
        self.backoff_ms.insert(id, (backoff * 2).min(MAX_BACKOFF_MS));

        // Jitter the replacement delay so a batch of workers dying together
        // (e.g. a bad deploy) doesn't respawn in lockstep.
        let jittered = rand::rng().random_range(backoff..=(backoff + backoff / 4).max(backoff + 1));

        log::warn!("worker {} died; scheduling replacement in {} ms", id, jittered);
        ctx.run_later(Duration::from_millis(jittered), move |pool, ctx| {
            let addr = pool.spawn_runner(ctx, id);
            pool.runners.insert(id, addr);
            if !pool.try_fulfill_waiter(ctx, id) {
                pool.free_ids.push_back(id);
            }
            pool.replacing_ids.remove(&id);
            log::info!("worker {} replaced", id);
        });
    }
}

impl Handler<CancelGlobal> for WorkerPool {
    type Result = ();

    fn handle(&mut self, msg: CancelGlobal, _ctx: &mut Self::Context) {
        if let Some(addr) = self.registry.get(&msg.job_id) {
            addr.do_send(CancelJob { job_id: msg.job_id });
        }
    }
}

impl Handler<GetStats> for WorkerPool {
    type Result = PoolStats;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> PoolStats {
        PoolStats {
            size: self.config.pool_size,
            reserved: self.reserved_ids.len(),
            idle: self.free_ids.len(),
            restarting: self.replacing_ids.len(),
        }
    }
}

impl Handler<Shutdown> for WorkerPool {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        self.shutting_down = true;

        for (job_id, addr) in self.registry.all() {
            addr.do_send(CancelJob { job_id });
        }

        let surviving: Vec<Addr<JobRunner>> = self.runners.values().cloned().collect();
        let grace = msg.grace;
        Box::pin(async move {
            tokio::time::sleep(grace).await;
            for addr in surviving {
                addr.do_send(ForceTerminate);
            }
        })
    }
}
