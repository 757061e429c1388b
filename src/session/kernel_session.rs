//! `KernelSession` (§4.5, C5): the externally observable unit. Binds a
//! notebook session to a reserved worker, serializes execution, and
//! broadcasts events to subscribers.
//!
//! Mirrors `VrmComponentManager`'s
//! (`grid_resource_management_system/vrm_component_manager.rs`) FIFO of
//! pending orders drained one at a time against a pooled resource, with
//! subscriber/listener fan-out generalized from its single
//! `vrm_state_listener` callback to a dynamic subscriber set.

use crate::config::KernelConfig;
use crate::domain::job::{ExecutionStatus, Globals, Job, JobKind, Language, NotebookEnv, OutputEntry};
use crate::error::KernelError;
use crate::external::Transpiler;
use crate::pool::pool::{Reserve, WorkerPool};
use crate::pool::reservation::Reservation;
use crate::session::subscriber::{ReplaySnapshot, SessionState, SubscriberEvent};
use crate::worker::runner::{JobOutcome, RunJob, RunnerEvent};
use actix::prelude::*;
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_job_id(session_id: &str) -> String {
    format!("{}-job-{}", session_id, JOB_COUNTER.fetch_add(1, Ordering::Relaxed))
}

// Subscriber identity as a slotmap key (mirrors the
// `ResourceStore`/`ReservationStore` pattern), surfaced to callers as a
// plain `u64` via `KeyData::as_ffi` so `Attach`/`Detach`'s wire shape
// doesn't leak the slotmap type.
new_key_type! {
    struct SubscriberId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Closed,
}

struct PendingJob {
    job_id: String,
    kind: JobKind,
    cell_id: Option<String>,
}

pub struct KernelSession {
    pub id: String,
    pub notebook_id: String,
    config: Arc<KernelConfig>,
    pool: Addr<WorkerPool>,
    transpiler: Arc<dyn Transpiler>,
    env: NotebookEnv,
    status: SessionStatus,
    reservation: Option<Reservation>,
    closing_reservation: Option<Reservation>,
    reserving: bool,
    queue: VecDeque<PendingJob>,
    current: Option<(String, Option<String>)>, // (job_id, cell_id)
    accumulated_globals: Globals,
    last_status: SessionState,
    subscribers: SlotMap<SubscriberId, Recipient<SubscriberEvent>>,
    replay: VecDeque<SubscriberEvent>,
    replay_bytes_used: u64,
    created_at: Instant,
}

impl KernelSession {
    pub fn new(id: String, notebook_id: String, config: Arc<KernelConfig>, pool: Addr<WorkerPool>, transpiler: Arc<dyn Transpiler>, env: NotebookEnv) -> Self {
        Self {
            id,
            notebook_id,
            config,
            pool,
            transpiler,
            env,
            status: SessionStatus::Open,
            reservation: None,
            closing_reservation: None,
            reserving: false,
            queue: VecDeque::new(),
            current: None,
            accumulated_globals: Globals::new(),
            last_status: SessionState::Idle,
            subscribers: SlotMap::with_key(),
            replay: VecDeque::new(),
            replay_bytes_used: 0,
            created_at: Instant::now(),
        }
    }

    pub fn has_job_in_flight(&self) -> bool {
        self.current.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn broadcast(&mut self, event: SubscriberEvent) {
        self.push_replay(event.clone());
        for sink in self.subscribers.values() {
            let _ = sink.do_send(event.clone());
        }
    }

    fn push_replay(&mut self, event: SubscriberEvent) {
        self.replay_bytes_used += event.approx_len();
        self.replay.push_back(event);
        while self.replay_bytes_used > self.config.replay_bytes {
            let Some(dropped) = self.replay.pop_front() else { break };
            self.replay_bytes_used = self.replay_bytes_used.saturating_sub(dropped.approx_len());
        }
    }

    fn trigger_reservation(&mut self, ctx: &mut Context<Self>) {
        if self.reservation.is_some() || self.reserving || self.status == SessionStatus::Closed {
            return;
        }
        self.reserving = true;
        let pool = self.pool.clone();
        let addr = ctx.address();
        let deadline = Duration::from_millis(self.config.per_job_timeout_ms.max(5_000));
        actix::spawn(async move {
            let outcome = match pool.send(Reserve { deadline }).await {
                Ok(result) => result,
                Err(mailbox) => Err(KernelError::from(mailbox)),
            };
            addr.do_send(ReservationAcquired(outcome));
        });
    }

    fn enqueue(&mut self, ctx: &mut Context<Self>, kind: JobKind, cell_id: Option<String>) -> String {
        let job_id = next_job_id(&self.id);
        self.queue.push_back(PendingJob { job_id: job_id.clone(), kind, cell_id });
        self.try_dispatch(ctx);
        job_id
    }

    fn try_dispatch(&mut self, ctx: &mut Context<Self>) {
        if self.status == SessionStatus::Closed || self.current.is_some() {
            return;
        }
        let Some(reservation) = &self.reservation else {
            self.trigger_reservation(ctx);
            return;
        };
        let Some(pending) = self.queue.pop_front() else { return };

        let job = Job {
            job_id: pending.job_id.clone(),
            notebook_id: self.notebook_id.clone(),
            session_id: self.id.clone(),
            kind: pending.kind,
            env: self.env.clone(),
            timeout_ms: self.config.per_job_timeout_ms,
            globals: self.accumulated_globals.clone(),
            started_at: Instant::now(),
        };

        let runner = reservation.runner.clone();
        let sink = ctx.address().recipient();

        self.current = Some((pending.job_id.clone(), pending.cell_id));
        self.last_status = SessionState::Busy;
        self.broadcast(SubscriberEvent::Status { state: SessionState::Busy });

        let addr = ctx.address();
        let job_id = pending.job_id;
        actix::spawn(async move {
            let outcome = runner.send(RunJob { job, sink }).await;
            let err = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(mailbox) => KernelError::from(mailbox),
            };
            addr.do_send(DispatchFailed { job_id, err });
        });
    }

    fn finish_current(&mut self, ctx: &mut Context<Self>) {
        self.current = None;
        self.last_status = SessionState::Idle;
        self.broadcast(SubscriberEvent::Status { state: SessionState::Idle });
        self.try_dispatch(ctx);
    }

    fn cell_id_for(&self, job_id: &str) -> Option<String> {
        self.current.as_ref().filter(|(id, _)| id == job_id).and_then(|(_, cell_id)| cell_id.clone())
    }
}

impl Actor for KernelSession {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "()")]
struct ReservationAcquired(std::result::Result<Reservation, KernelError>);

impl Handler<ReservationAcquired> for KernelSession {
    type Result = ();

    fn handle(&mut self, msg: ReservationAcquired, ctx: &mut Self::Context) {
        self.reserving = false;
        match msg.0 {
            Ok(reservation) => {
                self.reservation = Some(reservation);
                self.try_dispatch(ctx);
            }
            Err(err) => {
                log::error!("session {} failed to acquire a worker reservation: {}", self.id, err);
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct DispatchFailed {
    job_id: String,
    err: KernelError,
}

impl Handler<DispatchFailed> for KernelSession {
    type Result = ();

    fn handle(&mut self, msg: DispatchFailed, ctx: &mut Self::Context) {
        if self.current.as_ref().map(|(id, _)| id) != Some(&msg.job_id) {
            return;
        }
        log::warn!("session {} job {} failed to dispatch: {}", self.id, msg.job_id, msg.err);
        let cell_id = self.cell_id_for(&msg.job_id);
        self.broadcast(SubscriberEvent::Error {
            job_id: msg.job_id,
            cell_id,
            ename: "WorkerCrashed".to_string(),
            evalue: msg.err.to_string(),
            traceback: Vec::new(),
        });
        self.reservation = None;
        self.finish_current(ctx);
    }
}

impl Handler<RunnerEvent> for KernelSession {
    type Result = ();

    fn handle(&mut self, msg: RunnerEvent, ctx: &mut Self::Context) {
        match msg {
            RunnerEvent::Ack { .. } => {}
            RunnerEvent::Stream { job_id, name, text } => {
                let cell_id = self.cell_id_for(&job_id);
                self.broadcast(SubscriberEvent::Stream { job_id, cell_id, name, text });
            }
            RunnerEvent::Display { job_id, data } => {
                let cell_id = self.cell_id_for(&job_id);
                self.broadcast(SubscriberEvent::DisplayData { job_id, cell_id, data });
            }
            RunnerEvent::Log { .. } => {}
            RunnerEvent::Terminal { job_id, outcome } => self.handle_terminal(ctx, job_id, outcome),
            RunnerEvent::WorkerDied { runner_id } => {
                // Only drop the reservation if it's still the one pointing at
                // this dead runner: by the time this arrives the session may
                // already have been handed a fresh reservation on a
                // different worker, which must not be invalidated.
                if self.reservation.as_ref().map(|r| r.runner_id) == Some(runner_id) {
                    self.reservation = None;
                    self.try_dispatch(ctx);
                }
            }
        }
    }
}

impl KernelSession {
    fn handle_terminal(&mut self, ctx: &mut Context<Self>, job_id: String, outcome: JobOutcome) {
        if self.current.as_ref().map(|(id, _)| id) != Some(&job_id) {
            return;
        }
        let cell_id = self.cell_id_for(&job_id);
        match outcome {
            JobOutcome::Ok { outputs, execution, globals } => {
                for (key, value) in globals {
                    self.accumulated_globals.insert(key, value);
                }
                match execution.status {
                    ExecutionStatus::Error => {
                        let (ename, evalue, traceback) = extract_error(&outputs);
                        self.broadcast(SubscriberEvent::Error { job_id: job_id.clone(), cell_id, ename, evalue, traceback });
                    }
                    _ => {
                        self.broadcast(SubscriberEvent::ExecuteResult { job_id: job_id.clone(), cell_id, outputs, execution });
                    }
                }
            }
            JobOutcome::UserError { ename, evalue, traceback } => {
                self.broadcast(SubscriberEvent::Error { job_id: job_id.clone(), cell_id, ename, evalue, traceback });
            }
            JobOutcome::Timeout => {
                self.broadcast(SubscriberEvent::Error {
                    job_id: job_id.clone(),
                    cell_id,
                    ename: "Timeout".to_string(),
                    evalue: "execution exceeded the job deadline".to_string(),
                    traceback: Vec::new(),
                });
            }
            JobOutcome::Cancelled | JobOutcome::OutputLimit => {
                self.broadcast(SubscriberEvent::Error {
                    job_id: job_id.clone(),
                    cell_id,
                    ename: "Interrupted".to_string(),
                    evalue: "execution was interrupted".to_string(),
                    traceback: Vec::new(),
                });
            }
            JobOutcome::WorkerCrashed(reason) => {
                self.broadcast(SubscriberEvent::Error {
                    job_id: job_id.clone(),
                    cell_id,
                    ename: "WorkerCrashed".to_string(),
                    evalue: reason,
                    traceback: Vec::new(),
                });
                // The owning worker is gone; the next dispatch must acquire a fresh reservation.
                self.reservation = None;
            }
        }
        self.finish_current(ctx);
    }
}

fn extract_error(outputs: &[OutputEntry]) -> (String, String, Vec<String>) {
    for entry in outputs {
        if let OutputEntry::Error { ename, evalue, traceback } = entry {
            return (ename.clone(), evalue.clone(), traceback.clone());
        }
    }
    ("Error".to_string(), "cell execution failed".to_string(), Vec::new())
}

#[derive(Message)]
#[rtype(result = "(u64, ReplaySnapshot)")]
pub struct Attach {
    pub subscriber: Recipient<SubscriberEvent>,
}

impl Handler<Attach> for KernelSession {
    type Result = (u64, ReplaySnapshot);

    fn handle(&mut self, msg: Attach, ctx: &mut Self::Context) -> Self::Result {
        let key = self.subscribers.insert(msg.subscriber);
        let subscriber_id = key.data().as_ffi();
        self.trigger_reservation(ctx);
        let snapshot = ReplaySnapshot {
            last_status: self.last_status,
            tail: self.replay.iter().cloned().collect(),
            current_job: self.current.clone(),
        };
        (subscriber_id, snapshot)
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Detach {
    pub subscriber_id: u64,
}

impl Handler<Detach> for KernelSession {
    type Result = ();

    fn handle(&mut self, msg: Detach, _ctx: &mut Self::Context) {
        let key = SubscriberId::from(KeyData::from_ffi(msg.subscriber_id));
        self.subscribers.remove(key);
    }
}

#[derive(Message)]
#[rtype(result = "std::result::Result<String, KernelError>")]
pub struct Execute {
    pub cell_id: String,
    pub code: String,
    pub language: Language,
}

impl Handler<Execute> for KernelSession {
    type Result = ResponseFuture<std::result::Result<String, KernelError>>;

    fn handle(&mut self, msg: Execute, ctx: &mut Self::Context) -> Self::Result {
        if self.status == SessionStatus::Closed {
            return Box::pin(async move { Err(KernelError::SessionClosed(String::new())) });
        }
        let transpiler = self.transpiler.clone();
        let addr = ctx.address();
        Box::pin(async move {
            let output = transpiler.transpile(&msg.code, msg.language).await;
            if output.has_errors() {
                let message = output
                    .diagnostics
                    .iter()
                    .filter(|d| d.severity == crate::external::transpiler::DiagnosticSeverity::Error)
                    .map(|d| d.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(KernelError::Transpile(message));
            }
            addr.send(EnqueueExecute { cell_id: msg.cell_id, code: output.code }).await.map_err(KernelError::from)
        })
    }
}

#[derive(Message)]
#[rtype(result = "String")]
struct EnqueueExecute {
    cell_id: String,
    code: String,
}

impl Handler<EnqueueExecute> for KernelSession {
    type Result = String;

    fn handle(&mut self, msg: EnqueueExecute, ctx: &mut Self::Context) -> String {
        self.enqueue(ctx, JobKind::Execute { cell_id: msg.cell_id.clone(), code: msg.code }, Some(msg.cell_id))
    }
}

#[derive(Message)]
#[rtype(result = "std::result::Result<String, KernelError>")]
pub struct InvokeHandlerMsg {
    pub handler_id: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub cell_id: Option<String>,
}

impl Handler<InvokeHandlerMsg> for KernelSession {
    type Result = std::result::Result<String, KernelError>;

    fn handle(&mut self, msg: InvokeHandlerMsg, ctx: &mut Self::Context) -> Self::Result {
        if self.status == SessionStatus::Closed {
            return Err(KernelError::SessionClosed(String::new()));
        }
        let payload = crate::codec::value::DisplayValue::from_json(&msg.payload);
        let kind = JobKind::InvokeHandler { handler_id: msg.handler_id, event: msg.event, payload, cell_id: msg.cell_id.clone() };
        Ok(self.enqueue(ctx, kind, msg.cell_id))
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Interrupt {
    pub purge: bool,
}

impl Handler<Interrupt> for KernelSession {
    type Result = ();

    fn handle(&mut self, msg: Interrupt, _ctx: &mut Self::Context) {
        if msg.purge {
            self.queue.clear();
        }
        if let (Some((job_id, _)), Some(reservation)) = (&self.current, &self.reservation) {
            reservation.cancel(job_id.clone());
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Close;

impl Handler<Close> for KernelSession {
    type Result = ();

    fn handle(&mut self, _msg: Close, ctx: &mut Self::Context) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.status = SessionStatus::Closed;
        self.queue.clear();

        if let (Some((job_id, _)), Some(reservation)) = (&self.current, &self.reservation) {
            reservation.cancel(job_id.clone());
        }

        self.broadcast(SubscriberEvent::Closed { reason: "session closed".to_string() });
        self.subscribers.clear();

        // Delay the release past the cancel grace window so the pool never
        // hands this worker to a new reservation while it is still unwinding.
        if self.current.is_some() {
            self.closing_reservation = self.reservation.take();
            let grace = Duration::from_millis(self.config.cancel_grace_ms + 50);
            ctx.run_later(grace, |act, ctx| {
                act.closing_reservation = None;
                ctx.stop();
            });
        } else {
            self.reservation = None;
            ctx.stop();
        }
    }
}

#[derive(Message)]
#[rtype(result = "SessionSnapshot")]
pub struct GetSnapshot;

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub subscriber_count: usize,
    pub has_job_in_flight: bool,
    pub created_at: Instant,
}

impl Handler<GetSnapshot> for KernelSession {
    type Result = SessionSnapshot;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Self::Context) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            subscriber_count: self.subscribers.len(),
            has_job_in_flight: self.current.is_some(),
            created_at: self.created_at,
        }
    }
}
