//! The concrete end-to-end scenarios from spec.md §8: happy path, user
//! error (worker survives), and subscriber fan-out with a late attacher
//! observing the replay tail, all driven against a `FakeWorkerProcess`.

mod support;

use actix::prelude::*;
use nodebooks_kernel::codec::control::EventMessage;
use nodebooks_kernel::codec::control::ControlMessage;
use nodebooks_kernel::codec::frame;
use nodebooks_kernel::codec::value::DisplayValue;
use nodebooks_kernel::config::KernelConfig;
use nodebooks_kernel::domain::job::{Execution, ExecutionStatus, Globals, Language, OutputEntry, StreamName};
use nodebooks_kernel::external::transpiler::PassthroughTranspiler;
use nodebooks_kernel::pool::WorkerPool;
use nodebooks_kernel::session::{Attach, Execute, KernelSession, SessionState, SubscriberEvent};
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

fn new_session(config: Arc<KernelConfig>, launcher: Arc<FakeWorkerProcess>) -> Addr<KernelSession> {
    let pool = WorkerPool::with_launcher(config.clone(), launcher).start();
    KernelSession::new(
        "s-1".into(),
        "nb-1".into(),
        config,
        pool,
        Arc::new(PassthroughTranspiler),
        nodebooks_kernel::domain::job::NotebookEnv::node("20"),
    )
    .start()
}

#[actix::test]
async fn happy_path_reports_stdout_then_a_display_result_then_idle() {
    let (launcher, mut worker) = FakeWorkerProcess::pair();
    let session = new_session(single_worker_config(), launcher);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let collector = Collector(tx).start();
    session.send(Attach { subscriber: collector.recipient() }).await.unwrap();

    session
        .send(Execute { cell_id: "c1".into(), code: "console.log('hi'); 2+3;".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("execute accepted");

    let job_id = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => job_id,
        other => panic!("expected RunCell, got {other:?}"),
    };
    worker.send_event(EventMessage::Ack { job_id: job_id.clone() }).await;

    let hash = frame::job_id_hash(&job_id);
    worker.send_stdout_text(hash, "hi\n", false).await;

    worker
        .send_event(EventMessage::Result {
            job_id: job_id.clone(),
            outputs: vec![OutputEntry::Display { data: DisplayValue::Number(5.0) }],
            execution: Execution { started_ms: 0, ended_ms: 1, status: ExecutionStatus::Ok },
            globals: Globals::new(),
        })
        .await;

    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    match rx.recv().await.unwrap() {
        SubscriberEvent::Stream { name: StreamName::Stdout, text, .. } => assert_eq!(text, "hi\n"),
        other => panic!("expected a stdout stream event, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        SubscriberEvent::ExecuteResult { outputs, execution, .. } => {
            assert_eq!(execution.status, ExecutionStatus::Ok);
            match outputs.last() {
                Some(OutputEntry::Display { data }) => assert_eq!(*data, DisplayValue::Number(5.0)),
                other => panic!("expected the last output to be a display value, got {other:?}"),
            }
        }
        other => panic!("expected an execute_result event, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));
}

#[actix::test]
async fn user_error_reports_error_and_leaves_the_worker_usable() {
    let (launcher, mut worker) = FakeWorkerProcess::pair();
    let session = new_session(single_worker_config(), launcher);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let collector = Collector(tx).start();
    session.send(Attach { subscriber: collector.recipient() }).await.unwrap();

    session
        .send(Execute { cell_id: "c1".into(), code: "throw new Error('boom')".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("execute accepted");

    let job_id = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => job_id,
        other => panic!("expected RunCell, got {other:?}"),
    };
    worker.send_event(EventMessage::Ack { job_id: job_id.clone() }).await;
    worker
        .send_event(EventMessage::Error { job_id: job_id.clone(), ename: "Error".into(), evalue: "boom".into(), traceback: vec![] })
        .await;

    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    match rx.recv().await.unwrap() {
        SubscriberEvent::Error { ename, evalue, .. } => {
            assert_eq!(ename, "Error");
            assert_eq!(evalue, "boom");
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));

    // The same worker must still be usable: a second cell on the same session succeeds.
    session
        .send(Execute { cell_id: "c2".into(), code: "1+1;".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("second execute accepted on the surviving worker");

    let job_id_2 = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => job_id,
        other => panic!("expected a second RunCell on the same worker, got {other:?}"),
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
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::ExecuteResult { .. }));
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));
}

#[actix::test]
async fn a_late_attacher_sees_the_replay_tail_then_the_same_live_order_as_the_first_subscriber() {
    let (launcher, mut worker) = FakeWorkerProcess::pair();
    let session = new_session(single_worker_config(), launcher);

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let collector1 = Collector(tx1).start();
    session.send(Attach { subscriber: collector1.recipient() }).await.unwrap();

    session
        .send(Execute { cell_id: "c1".into(), code: "console.log('a'); console.log('b');".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("execute accepted");

    let job_id = match worker.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => job_id,
        other => panic!("expected RunCell, got {other:?}"),
    };
    worker.send_event(EventMessage::Ack { job_id: job_id.clone() }).await;

    let hash = frame::job_id_hash(&job_id);
    worker.send_stdout_text(hash, "a\n", false).await;
    assert!(matches!(rx1.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    match rx1.recv().await.unwrap() {
        SubscriberEvent::Stream { text, .. } => assert_eq!(text, "a\n"),
        other => panic!("expected the first subscriber to see stream \"a\", got {other:?}"),
    }

    // Attach the second subscriber only after "a" has already been broadcast.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    let collector2 = Collector(tx2).start();
    let (_id, snapshot) = session.send(Attach { subscriber: collector2.recipient() }).await.unwrap();
    let tail_texts: Vec<String> = snapshot
        .tail
        .iter()
        .filter_map(|ev| match ev {
            SubscriberEvent::Stream { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(tail_texts.contains(&"a\n".to_string()), "the late attacher's replay tail must contain \"a\"");

    worker.send_stdout_text(hash, "b\n", true).await;
    worker
        .send_event(EventMessage::Result {
            job_id,
            outputs: vec![],
            execution: Execution { started_ms: 0, ended_ms: 1, status: ExecutionStatus::Ok },
            globals: Globals::new(),
        })
        .await;

    match rx1.recv().await.unwrap() {
        SubscriberEvent::Stream { text, .. } => assert_eq!(text, "b\n"),
        other => panic!("expected the first subscriber to see stream \"b\", got {other:?}"),
    }
    assert!(matches!(rx1.recv().await.unwrap(), SubscriberEvent::ExecuteResult { .. }));
    assert!(matches!(rx1.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));

    match rx2.recv().await.unwrap() {
        SubscriberEvent::Stream { text, .. } => assert_eq!(text, "b\n", "the late attacher must see \"b\" live, after the replayed \"a\""),
        other => panic!("expected the second subscriber to see stream \"b\" live, got {other:?}"),
    }
    assert!(matches!(rx2.recv().await.unwrap(), SubscriberEvent::ExecuteResult { .. }));
    assert!(matches!(rx2.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));
}

#[actix::test]
async fn a_subsequent_execute_succeeds_on_the_replaced_worker_after_a_timeout() {
    let mut cfg = KernelConfig::default();
    cfg.pool_size = 1;
    cfg.per_job_timeout_ms = 60;
    cfg.cancel_grace_ms = 50;
    cfg.ack_timeout_ms = 200;
    let config = Arc::new(cfg);

    let (launcher, mut workers) = FakeWorkerProcess::fleet(2);
    let mut worker_a = workers.remove(0);
    let mut worker_b = workers.remove(0);

    let pool = WorkerPool::with_launcher(config.clone(), launcher).start();
    let session = KernelSession::new(
        "s-1".into(),
        "nb-1".into(),
        config,
        pool,
        Arc::new(PassthroughTranspiler),
        nodebooks_kernel::domain::job::NotebookEnv::node("20"),
    )
    .start();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let collector = Collector(tx).start();
    session.send(Attach { subscriber: collector.recipient() }).await.unwrap();

    session
        .send(Execute { cell_id: "c1".into(), code: "while(true){}".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("first execute accepted");

    match worker_a.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => worker_a.send_event(EventMessage::Ack { job_id }).await,
        other => panic!("expected RunCell, got {other:?}"),
    }

    // No Result ever arrives: the job deadline fires a Timeout, then the
    // cancel grace elapses with the worker never exiting on its own, killing
    // it and triggering the pool to replace it.
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    match rx.recv().await.unwrap() {
        SubscriberEvent::Error { ename, .. } => assert_eq!(ename, "Timeout"),
        other => panic!("expected a timeout error, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));

    // The session must dispatch the next cell onto the replacement worker
    // directly, not fail once against the now-dead original reservation.
    session
        .send(Execute { cell_id: "c2".into(), code: "1+1;".into(), language: Language::Js })
        .await
        .unwrap()
        .expect("second execute accepted");

    match worker_b.recv_control().await {
        ControlMessage::RunCell { job_id, .. } => {
            worker_b.send_event(EventMessage::Ack { job_id: job_id.clone() }).await;
            worker_b
                .send_event(EventMessage::Result {
                    job_id,
                    outputs: vec![],
                    execution: Execution { started_ms: 0, ended_ms: 1, status: ExecutionStatus::Ok },
                    globals: Globals::new(),
                })
                .await;
        }
        other => panic!("expected the second cell to dispatch straight to the replacement worker, got {other:?}"),
    }

    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Busy }));
    match rx.recv().await.unwrap() {
        SubscriberEvent::ExecuteResult { .. } => {}
        other => panic!("the second execute must not spuriously fail, got {other:?}"),
    }
    assert!(matches!(rx.recv().await.unwrap(), SubscriberEvent::Status { state: SessionState::Idle }));
}
