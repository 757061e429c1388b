//! `KernelSession`: cross-cell `accumulated_globals` propagation and
//! subscriber event ordering (§8 invariant 2: Busy, terminal, Idle per job),
//! driven against a `FakeWorkerProcess` pool of size one.

mod support;

use actix::prelude::*;
use nodebooks_kernel::codec::control::{ControlMessage, EventMessage};
use nodebooks_kernel::codec::value::DisplayValue;
use nodebooks_kernel::config::KernelConfig;
use nodebooks_kernel::domain::job::{Execution, ExecutionStatus, Globals, Language, NotebookEnv};
use nodebooks_kernel::external::transpiler::PassthroughTranspiler;
use nodebooks_kernel::pool::WorkerPool;
use nodebooks_kernel::session::{Execute, KernelSession, SessionState, SubscriberEvent};
use std::sync::Arc;
use support::FakeWorkerProcess;
use tokio::sync::mpsc;

struct Collector(mpsc::UnboundedSender<SubscriberEvent>);
impl Actor for Collector {
    type Context = Context<Self>;
}
impl Handler<SubscriberEvent> for Collector {
    type Result = ();
    fn handle(&mut self, msg: SubscriberEvent, _ctx: &mut Self::Context) {
        let _ = self.0.send(msg);
    }
}

fn single_worker_config() -> Arc<KernelConfig> {
    let mut cfg = KernelConfig::default();
    cfg.pool_size = 1;
    Arc::new(cfg)
}

#[actix::test]
async fn cells_execute_in_order_with_globals_carried_forward() {
    let (launcher, mut worker) = FakeWorkerProcess::pair();
    let config = single_worker_config();
    let pool = WorkerPool::with_launcher(config.clone(), launcher).start();
    let session = KernelSession::new("s-1".into(), "nb-1".into(), config, pool, Arc::new(PassthroughTranspiler), NotebookEnv::node("20")).start();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let collector = Collector(event_tx).start();
    session.send(nodebooks_kernel::session::Attach { subscriber: collector.recipient() }).await.unwrap();

    // First cell: no globals have accumulated yet.
    session
        .send(Execute { cell_id: "c1".into(), code: "const x = 42;".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("first execute accepted");

    let job_id_1 = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, globals, .. } => {
            assert!(globals.is_empty(), "first cell must see no prior globals");
            job_id
        }
        other => panic!("expected RunCell, got {other:?}"),
    };

    worker.send_event(EventMessage::Ack { job_id: job_id_1.clone() }).await;
    let mut globals_1 = Globals::new();
    globals_1.insert("x".to_string(), DisplayValue::Number(42.0));
    worker
        .send_event(EventMessage::Result {
            job_id: job_id_1,
            outputs: vec![],
            execution: Execution { started_ms: 0, ended_ms: 1, status: ExecutionStatus::Ok },
            globals: globals_1,
        })
        .await;

    // Second cell: must see the global the first cell left behind.
    session
        .send(Execute { cell_id: "c2".into(), code: "x + 1;".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("second execute accepted");

    let job_id_2 = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, globals, .. } => {
            assert_eq!(globals.get("x"), Some(&DisplayValue::Number(42.0)), "second cell must see the first cell's global");
            job_id
        }
        other => panic!("expected RunCell, got {other:?}"),
    };

    worker.send_event(EventMessage::Ack { job_id: job_id_2.clone() }).await;
    worker
        .send_event(EventMessage::Result {
            job_id: job_id_2,
            outputs: vec![],
            execution: Execution { started_ms: 0, ended_ms: 1, status: ExecutionStatus::Ok },
            globals: Globals::new(),
        })
        .await;

    let mut observed = Vec::new();
    for _ in 0..6 {
        observed.push(event_rx.recv().await.expect("subscriber event"));
    }

    let kinds: Vec<&'static str> = observed
        .iter()
        .map(|ev| match ev {
            SubscriberEvent::Status { state: SessionState::Busy } => "busy",
            SubscriberEvent::Status { state: SessionState::Idle } => "idle",
            SubscriberEvent::ExecuteResult { .. } => "result",
            other => panic!("unexpected event in ordering check: {other:?}"),
        })
        .collect();

    assert_eq!(kinds, vec!["busy", "result", "idle", "busy", "result", "idle"]);
}
