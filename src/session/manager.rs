//! `SessionManager` (§4.7, C7): directory of live `KernelSession`s keyed by
//! session id, plus a background reaper for idle sessions.
//!
//! Mirrors `VrmComponentManager`'s registry half (it keeps a
//! `HashMap<name, Addr<...>>` of live components and a periodic sweep);
//! here the sweep closes sessions instead of restarting components.

use crate::config::KernelConfig;
use crate::domain::job::NotebookEnv;
use crate::error::KernelError;
use crate::external::{NotebookStore, Transpiler};
use crate::pool::pool::WorkerPool;
use crate::session::kernel_session::{Close, GetSnapshot, KernelSession};
use actix::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct SessionManager {
    directory: HashMap<String, Addr<KernelSession>>,
    notebook_ids: HashMap<String, String>,
    empty_since: HashMap<String, Instant>,
    pool: Addr<WorkerPool>,
    config: Arc<KernelConfig>,
    transpiler: Arc<dyn Transpiler>,
    store: Arc<dyn NotebookStore>,
}

impl SessionManager {
    pub fn new(pool: Addr<WorkerPool>, config: Arc<KernelConfig>, transpiler: Arc<dyn Transpiler>, store: Arc<dyn NotebookStore>) -> Self {
        Self {
            directory: HashMap::new(),
            notebook_ids: HashMap::new(),
            empty_since: HashMap::new(),
            pool,
            config,
            transpiler,
            store,
        }
    }

    fn sweep(&mut self, ctx: &mut Context<Self>) {
        let sessions: Vec<(String, Addr<KernelSession>)> = self.directory.iter().map(|(id, addr)| (id.clone(), addr.clone())).collect();
        let addr = ctx.address();
        actix::spawn(async move {
            let mut idle = Vec::new();
            for (id, session) in sessions {
                if let Ok(snapshot) = session.send(GetSnapshot).await {
                    if snapshot.subscriber_count == 0 && !snapshot.has_job_in_flight {
                        idle.push(id);
                    }
                }
            }
            addr.do_send(SweepResult { idle });
        });
    }
}

impl Actor for SessionManager {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(SWEEP_INTERVAL, |act, ctx| act.sweep(ctx));
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct SweepResult {
    idle: Vec<String>,
}

impl Handler<SweepResult> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: SweepResult, ctx: &mut Self::Context) {
        let idle_set: std::collections::HashSet<&String> = msg.idle.iter().collect();
        self.empty_since.retain(|id, _| idle_set.contains(id));

        for id in msg.idle {
            let since = *self.empty_since.entry(id.clone()).or_insert_with(Instant::now);
            if since.elapsed() >= Duration::from_millis(self.config.session_idle_ms) {
                log::info!("reaping idle session {}", id);
                self.close_session(ctx, &id);
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "std::result::Result<Addr<KernelSession>, KernelError>")]
pub struct GetOrCreate {
    pub session_id: String,
    pub notebook_id: String,
}

impl Handler<GetOrCreate> for SessionManager {
    type Result = ResponseActFuture<Self, std::result::Result<Addr<KernelSession>, KernelError>>;

    fn handle(&mut self, msg: GetOrCreate, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(existing) = self.directory.get(&msg.session_id) {
            let addr = existing.clone();
            return Box::pin(async move { Ok(addr) }.into_actor(self));
        }

        let store = self.store.clone();
        let notebook_id = msg.notebook_id.clone();
        let fut = async move { store.get_notebook(&notebook_id).await };

        Box::pin(fut.into_actor(self).map(move |record, act, _ctx| {
            let record = record.ok_or_else(|| KernelError::SessionNotFound(msg.notebook_id.clone()))?;
            let session = KernelSession::new(
                msg.session_id.clone(),
                record.id.clone(),
                act.config.clone(),
                act.pool.clone(),
                act.transpiler.clone(),
                NotebookEnv::node("20"),
            );
            let addr = session.start();
            act.directory.insert(msg.session_id.clone(), addr.clone());
            act.notebook_ids.insert(msg.session_id, record.id);
            Ok(addr)
        }))
    }
}

#[derive(Message)]
#[rtype(result = "Vec<String>")]
pub struct List {
    pub notebook_id: Option<String>,
}

impl Handler<List> for SessionManager {
    type Result = Vec<String>;

    fn handle(&mut self, msg: List, _ctx: &mut Self::Context) -> Vec<String> {
        match msg.notebook_id {
            None => self.directory.keys().cloned().collect(),
            Some(notebook_id) => self
                .notebook_ids
                .iter()
                .filter(|(_, nb)| **nb == notebook_id)
                .map(|(session_id, _)| session_id.clone())
                .collect(),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub session_id: String,
}

impl SessionManager {
    fn close_session(&mut self, _ctx: &mut Context<Self>, session_id: &str) {
        if let Some(addr) = self.directory.remove(session_id) {
            addr.do_send(Close);
        }
        self.notebook_ids.remove(session_id);
        self.empty_since.remove(session_id);
    }
}

impl Handler<CloseSession> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) {
        self.close_session(ctx, &msg.session_id);
    }
}
