//! `JobRunner` (§4.3): one actor per worker process. Dispatches a job, relays
//! frames to the subscribing Kernel Session, enforces the timeout, performs
//! cancel-with-grace, and parses the terminal result/error.
//!
//! Mirrors `TcpSession`'s (`grid_component/component_communication/session.rs`)
//! shape: `actix::io::FramedWrite` for the outbound side plus
//! `ctx.add_stream` + `StreamHandler` for the inbound side, generalized
//! from a TCP peer to a child process's stdin/stdout pipes.

use crate::codec::control::{ControlCodec, ControlMessage, EventMessage};
use crate::config::KernelConfig;
use crate::domain::job::{Execution, Globals, Job, OutputEntry, StreamName};
use crate::pool::registry::JobRegistry;
use crate::worker::process::{WorkerEventCodec, WorkerLauncher, WorkerWireMessage};
use crate::worker::state::RunnerState;
use actix::prelude::*;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::process::Child;
use tokio_util::codec::FramedRead;

type WorkerStdin = Box<dyn AsyncWrite + Send + Unpin>;

const TRUNCATION_NOTICE: &str = "[output truncated]";

/// Terminal (or non-terminal) events relayed to whichever sink (a
/// `KernelSession`) currently owns this runner's reservation.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub enum RunnerEvent {
    Ack { job_id: String },
    Stream { job_id: String, name: StreamName, text: String },
    Display { job_id: String, data: Vec<u8> },
    Log { job_id: String, text: String },
    Terminal { job_id: String, outcome: JobOutcome },
    /// Sent only from the cancel-grace kill path (`on_grace_elapsed`): the
    /// job's own terminal outcome (Timeout/Cancelled/OutputLimit) was already
    /// delivered when cancellation began, but the worker process itself dies
    /// asynchronously afterward. The owning session needs this separate
    /// signal to drop a reservation that would otherwise keep pointing at a
    /// dead `JobRunner`.
    WorkerDied { runner_id: usize },
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ok { outputs: Vec<OutputEntry>, execution: Execution, globals: Globals },
    UserError { ename: String, evalue: String, traceback: Vec<String> },
    Timeout,
    Cancelled,
    OutputLimit,
    WorkerCrashed(String),
}

/// Sent by the runner's owner (the Pool, on behalf of a Reservation) when
/// the worker process has exited and needs eager replacement (§4.4).
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct RunnerDied {
    pub runner_id: usize,
}

#[derive(Message)]
#[rtype(result = "std::result::Result<(), crate::error::KernelError>")]
pub struct RunJob {
    pub job: Job,
    pub sink: Recipient<RunnerEvent>,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct CancelJob {
    pub job_id: String,
}

#[derive(Message)]
#[rtype(result = "RunnerState")]
pub struct GetRunnerState;

/// Unconditional kill, used by `WorkerPool::Shutdown` once the shutdown
/// grace period elapses (§4.4).
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ForceTerminate;

struct CurrentJob {
    job_id: String,
    sink: Recipient<RunnerEvent>,
    bytes_emitted: u64,
}

pub struct JobRunner {
    pub id: usize,
    config: Arc<KernelConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    on_death: Recipient<RunnerDied>,
    registry: Arc<JobRegistry>,
    state: RunnerState,
    child: Option<Child>,
    framed_write: Option<actix::io::FramedWrite<ControlMessage, WorkerStdin, ControlCodec>>,
    current: Option<CurrentJob>,
    ack_timer: Option<SpawnHandle>,
    deadline_timer: Option<SpawnHandle>,
    grace_timer: Option<SpawnHandle>,
    death_reported: bool,
}

impl JobRunner {
    pub fn new(
        id: usize,
        config: Arc<KernelConfig>,
        launcher: Arc<dyn WorkerLauncher>,
        on_death: Recipient<RunnerDied>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            id,
            config,
            launcher,
            on_death,
            registry,
            state: RunnerState::Dead, // becomes Idle once `started` spawns the child
            child: None,
            framed_write: None,
            current: None,
            ack_timer: None,
            deadline_timer: None,
            grace_timer: None,
            death_reported: false,
        }
    }

    fn spawn_child(&mut self, ctx: &mut Context<Self>) -> io::Result<()> {
        let mut handle = self.launcher.launch(self.config.worker_memory_mb)?;
        let child = handle.child.take();
        ctx.add_stream(FramedRead::new(handle.stdout, WorkerEventCodec::new()));
        self.framed_write = Some(actix::io::FramedWrite::new(handle.stdin, ControlCodec::new(), ctx));
        self.child = child;
        self.state = RunnerState::Idle;
        Ok(())
    }

    fn clear_timers(&mut self, ctx: &mut Context<Self>) {
        for handle in [self.ack_timer.take(), self.deadline_timer.take(), self.grace_timer.take()].into_iter().flatten() {
            ctx.cancel_future(handle);
        }
    }

    fn deliver(&self, event: RunnerEvent) {
        if let Some(current) = &self.current {
            let _ = current.sink.do_send(event);
        }
    }

    /// Notifies the pool this runner is gone. A runner dies along exactly one
    /// path (grace-kill, ack timeout, force-terminate, a channel error, or the
    /// child process exiting on its own), but the stdout stream can still
    /// EOF after an already-reported death (e.g. the grace-kill path's
    /// `start_kill` races the child's own exit), so this guards against
    /// sending `RunnerDied` twice for the same id.
    fn report_death(&mut self) {
        if !self.death_reported {
            self.death_reported = true;
            let _ = self.on_death.do_send(RunnerDied { runner_id: self.id });
        }
    }

    fn finish_job(&mut self, ctx: &mut Context<Self>, outcome: JobOutcome) {
        self.clear_timers(ctx);
        if let Some(current) = self.current.take() {
            self.registry.remove(&current.job_id);
            let _ = current.sink.do_send(RunnerEvent::Terminal { job_id: current.job_id, outcome });
        }
        if self.state != RunnerState::Terminating && self.state != RunnerState::Dead {
            self.state = RunnerState::Idle;
        }
    }

    fn begin_cancel(&mut self, ctx: &mut Context<Self>, job_id: &str, immediate_outcome: Option<JobOutcome>) {
        let Some(current) = &self.current else { return };
        if current.job_id != job_id {
            return;
        }
        if self.state != RunnerState::Running && self.state != RunnerState::Dispatching {
            return;
        }
        if let Some(writer) = &mut self.framed_write {
            writer.write(ControlMessage::Cancel { job_id: job_id.to_string() });
        }
        self.state = RunnerState::Cancelling;
        if let Some(outcome) = immediate_outcome {
            if let Some(current) = &self.current {
                let _ = current.sink.do_send(RunnerEvent::Terminal { job_id: current.job_id.clone(), outcome });
            }
        }
        let grace = Duration::from_millis(self.config.cancel_grace_ms);
        self.grace_timer = Some(ctx.run_later(grace, |actor, ctx| actor.on_grace_elapsed(ctx)));
    }

    fn on_grace_elapsed(&mut self, _ctx: &mut Context<Self>) {
        if self.state != RunnerState::Cancelling {
            return;
        }
        self.state = RunnerState::Terminating;
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
        // The current job's terminal event was already synthesized when
        // cancellation began (timeout/output-limit) or will be synthesized
        // by the caller (interrupt); late worker output is discarded. The
        // owning session still needs a signal that the worker itself died so
        // it can drop a reservation that would otherwise dangle.
        if let Some(current) = self.current.take() {
            let _ = current.sink.do_send(RunnerEvent::WorkerDied { runner_id: self.id });
            self.registry.remove(&current.job_id);
        }
        self.state = RunnerState::Dead;
        self.report_death();
    }

    fn on_deadline_elapsed(&mut self, ctx: &mut Context<Self>) {
        if self.state != RunnerState::Running {
            return;
        }
        let job_id = match &self.current {
            Some(c) => c.job_id.clone(),
            None => return,
        };
        self.begin_cancel(ctx, &job_id, Some(JobOutcome::Timeout));
    }

    fn on_ack_timeout(&mut self, ctx: &mut Context<Self>) {
        if self.state != RunnerState::Dispatching {
            return;
        }
        self.state = RunnerState::Terminating;
        self.finish_job(ctx, JobOutcome::WorkerCrashed("worker did not acknowledge job".to_string()));
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
        self.state = RunnerState::Dead;
        self.report_death();
    }
}

impl Actor for JobRunner {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Err(e) = self.spawn_child(ctx) {
            log::error!("runner {} failed to spawn worker process: {}", self.id, e);
            self.state = RunnerState::Dead;
            self.report_death();
        }
    }
}

impl Handler<RunJob> for JobRunner {
    type Result = std::result::Result<(), crate::error::KernelError>;

    fn handle(&mut self, msg: RunJob, ctx: &mut Self::Context) -> Self::Result {
        if !self.state.can_accept_job() {
            return Err(crate::error::KernelError::Busy);
        }
        let Some(writer) = &mut self.framed_write else {
            return Err(crate::error::KernelError::WorkerCrashed("no worker attached".to_string()));
        };

        let control = ControlMessage::from_job_kind(msg.job.job_id.clone(), &msg.job.kind, msg.job.env.clone(), msg.job.globals.clone());
        writer.write(control);

        self.registry.insert(msg.job.job_id.clone(), ctx.address());
        self.current = Some(CurrentJob { job_id: msg.job.job_id.clone(), sink: msg.sink, bytes_emitted: 0 });
        self.state = RunnerState::Dispatching;

        self.ack_timer = Some(ctx.run_later(Duration::from_millis(self.config.ack_timeout_ms), |actor, ctx| actor.on_ack_timeout(ctx)));
        // kernelTimeoutMs is a hard ceiling (spec.md Open Question, resolved in DESIGN.md).
        let timeout = msg.job.timeout_ms.min(self.config.per_job_timeout_ms);
        self.deadline_timer = Some(ctx.run_later(Duration::from_millis(timeout), |actor, ctx| actor.on_deadline_elapsed(ctx)));

        Ok(())
    }
}

impl Handler<CancelJob> for JobRunner {
    type Result = ();

    fn handle(&mut self, msg: CancelJob, ctx: &mut Self::Context) {
        self.begin_cancel(ctx, &msg.job_id, Some(JobOutcome::Cancelled));
    }
}

impl Handler<GetRunnerState> for JobRunner {
    type Result = RunnerState;

    fn handle(&mut self, _msg: GetRunnerState, _ctx: &mut Self::Context) -> RunnerState {
        self.state
    }
}

impl Handler<ForceTerminate> for JobRunner {
    type Result = ();

    fn handle(&mut self, _msg: ForceTerminate, ctx: &mut Self::Context) {
        if self.state == RunnerState::Dead {
            return;
        }
        self.finish_job(ctx, JobOutcome::WorkerCrashed("worker terminated during pool shutdown".to_string()));
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
        self.state = RunnerState::Dead;
        self.report_death();
    }
}

impl StreamHandler<std::result::Result<WorkerWireMessage, io::Error>> for JobRunner {
    fn handle(&mut self, item: std::result::Result<WorkerWireMessage, io::Error>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("runner {} event channel error: {}", self.id, e);
                self.finish_job(ctx, JobOutcome::WorkerCrashed(e.to_string()));
                self.state = RunnerState::Dead;
                self.report_death();
                ctx.stop();
                return;
            }
        };

        match msg {
            WorkerWireMessage::Stream(raw) => self.handle_stream_bytes(ctx, raw),
            WorkerWireMessage::Event(event) => self.handle_event(ctx, event),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.state != RunnerState::Dead && self.state != RunnerState::Terminating {
            log::warn!("runner {} worker process exited unexpectedly", self.id);
            self.finish_job(ctx, JobOutcome::WorkerCrashed("worker process exited".to_string()));
        }
        self.state = RunnerState::Dead;
        self.report_death();
    }
}

impl actix::io::WriteHandler<io::Error> for JobRunner {
    fn error(&mut self, err: io::Error, ctx: &mut Self::Context) -> Running {
        log::error!("runner {} control channel write error: {}", self.id, err);
        self.finish_job(ctx, JobOutcome::WorkerCrashed(err.to_string()));
        self.state = RunnerState::Dead;
        self.report_death();
        Running::Stop
    }
}

impl JobRunner {
    fn handle_stream_bytes(&mut self, ctx: &mut Context<Self>, raw: Vec<u8>) {
        let Some(frame) = crate::codec::frame::decode(&raw) else {
            log::warn!("runner {} received an unparsable stream frame; discarding (protocol_error)", self.id);
            return;
        };

        // Cancelling: subsequent worker output for the cancelled job is
        // discarded per §4.3.
        if self.state == RunnerState::Cancelling {
            return;
        }
        if self.state != RunnerState::Running {
            return;
        }

        let Some(current) = &mut self.current else { return };
        current.bytes_emitted += frame.payload.len() as u64;
        let job_id = current.job_id.clone();
        let over_cap = current.bytes_emitted > self.config.max_output_bytes;

        match frame.kind {
            crate::codec::frame::FrameKind::Stdout => {
                if let Ok(text) = String::from_utf8(frame.payload) {
                    self.deliver(RunnerEvent::Stream { job_id: job_id.clone(), name: StreamName::Stdout, text });
                }
            }
            crate::codec::frame::FrameKind::Stderr => {
                if let Ok(text) = String::from_utf8(frame.payload) {
                    self.deliver(RunnerEvent::Stream { job_id: job_id.clone(), name: StreamName::Stderr, text });
                }
            }
            crate::codec::frame::FrameKind::Display => {
                self.deliver(RunnerEvent::Display { job_id: job_id.clone(), data: frame.payload });
            }
            crate::codec::frame::FrameKind::Log => {
                if let Ok(text) = String::from_utf8(frame.payload) {
                    self.deliver(RunnerEvent::Log { job_id: job_id.clone(), text });
                }
            }
        }

        if over_cap {
            self.deliver(RunnerEvent::Stream { job_id: job_id.clone(), name: StreamName::Stderr, text: TRUNCATION_NOTICE.to_string() });
            self.begin_cancel(ctx, &job_id, Some(JobOutcome::OutputLimit));
        }
    }

    fn handle_event(&mut self, ctx: &mut Context<Self>, event: EventMessage) {
        match event {
            EventMessage::Ack { job_id } => {
                if self.state == RunnerState::Dispatching && self.current.as_ref().map(|c| &c.job_id) == Some(&job_id) {
                    if let Some(handle) = self.ack_timer.take() {
                        ctx.cancel_future(handle);
                    }
                    self.state = RunnerState::Running;
                    self.deliver(RunnerEvent::Ack { job_id });
                }
            }
            EventMessage::Result { job_id, outputs, execution, globals } => {
                if self.current.as_ref().map(|c| &c.job_id) != Some(&job_id) {
                    return;
                }
                if self.state == RunnerState::Cancelling {
                    // Late result for an already-synthesized terminal event: drop and go idle.
                    if let Some(current) = self.current.take() {
                        self.registry.remove(&current.job_id);
                    }
                    self.clear_timers(ctx);
                    self.state = RunnerState::Idle;
                    return;
                }
                // Both `ok` and `error` executions arrive as `Result` (§4.2 step 5);
                // the status distinction lives in `Execution::status`, not in a
                // separate runner outcome variant.
                self.finish_job(ctx, JobOutcome::Ok { outputs, execution, globals });
            }
            EventMessage::Error { job_id, ename, evalue, traceback } => {
                if self.current.as_ref().map(|c| &c.job_id) != Some(&job_id) {
                    return;
                }
                if self.state == RunnerState::Cancelling {
                    if let Some(current) = self.current.take() {
                        self.registry.remove(&current.job_id);
                    }
                    self.clear_timers(ctx);
                    self.state = RunnerState::Idle;
                    return;
                }
                self.finish_job(ctx, JobOutcome::UserError { ename, evalue, traceback });
            }
            EventMessage::Pong => {}
        }
    }
}
