//! Test-only `WorkerLauncher` backed by an in-memory duplex pipe rather than
//! a real child process, so the Job Runner / Worker Pool state machines can
//! be driven deterministically without a worker binary (SPEC_FULL.md §11.4).
//! Follows the same hand-written-fake-over-mocking-crate convention as a
//! `domain::simulator::simulator_mock` module, generalized from a
//! trait-object mock to an in-memory transport.

use bytes::BytesMut;
use nodebooks_kernel::codec::{ControlCodec, ControlMessage};
use nodebooks_kernel::worker::{WorkerEventCodec, WorkerHandle, WorkerLauncher, WorkerWireMessage};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Decoder, Encoder};

const BUF_SIZE: usize = 64 * 1024;

/// Hands out `WorkerHandle`s to a `JobRunner` at `started()` time, one per
/// call to `launch()`, in the order queued; the other end of each pipe pair
/// is kept by a `FakeWorker` so the test can script the worker's side of the
/// conversation. Queuing more than one handle lets a test drive the pool
/// past a worker replacement (e.g. after a timeout kills the original
/// worker) without a real child process.
pub struct FakeWorkerProcess {
    handles: Mutex<VecDeque<WorkerHandle>>,
}

impl FakeWorkerProcess {
    /// Builds a connected pair good for exactly one `launch()` call: a
    /// launcher to hand to a `JobRunner`/`WorkerPool`, and a `FakeWorker` the
    /// test drives directly.
    pub fn pair() -> (Arc<FakeWorkerProcess>, FakeWorker) {
        let (launcher, mut workers) = Self::fleet(1);
        (launcher, workers.remove(0))
    }

    /// Builds a launcher good for `n` sequential `launch()` calls, returning
    /// one `FakeWorker` per launch in launch order.
    pub fn fleet(n: usize) -> (Arc<FakeWorkerProcess>, Vec<FakeWorker>) {
        let mut handles = VecDeque::with_capacity(n);
        let mut workers = Vec::with_capacity(n);
        for _ in 0..n {
            let (runner_stdin, worker_stdin) = tokio::io::duplex(BUF_SIZE);
            let (worker_stdout, runner_stdout) = tokio::io::duplex(BUF_SIZE);
            handles.push_back(WorkerHandle { stdin: Box::new(runner_stdin), stdout: Box::new(runner_stdout), child: None });
            workers.push(FakeWorker {
                stdin: worker_stdin,
                stdout: worker_stdout,
                control_codec: ControlCodec::new(),
                event_codec: WorkerEventCodec::new(),
                read_buf: BytesMut::new(),
            });
        }
        let launcher = Arc::new(FakeWorkerProcess { handles: Mutex::new(handles) });
        (launcher, workers)
    }
}

impl WorkerLauncher for FakeWorkerProcess {
    fn launch(&self, _memory_mb: Option<u64>) -> io::Result<WorkerHandle> {
        self.handles.lock().unwrap().pop_front().ok_or_else(|| io::Error::new(io::ErrorKind::Other, "fake worker fleet exhausted"))
    }
}

/// The worker side of a `FakeWorkerProcess` pair: reads `ControlMessage`s
/// the runner sent, writes `WorkerWireMessage`s (frames or events) back.
pub struct FakeWorker {
    stdin: DuplexStream,
    stdout: DuplexStream,
    control_codec: ControlCodec,
    event_codec: WorkerEventCodec,
    read_buf: BytesMut,
}

impl FakeWorker {
    pub async fn recv_control(&mut self) -> ControlMessage {
        loop {
            if let Some(msg) = self.control_codec.decode(&mut self.read_buf).expect("decode control message") {
                return msg;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stdin.read(&mut chunk).await.expect("read runner stdin");
            assert!(n > 0, "runner closed stdin before sending a control message");
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn send_event(&mut self, event: nodebooks_kernel::codec::control::EventMessage) {
        let mut out = BytesMut::new();
        self.event_codec.encode(WorkerWireMessage::Event(event), &mut out).expect("encode event");
        self.stdout.write_all(&out).await.expect("write runner stdout");
    }

    pub async fn send_stream(&mut self, raw_frame: Vec<u8>) {
        let mut out = BytesMut::new();
        self.event_codec.encode(WorkerWireMessage::Stream(raw_frame), &mut out).expect("encode stream envelope");
        self.stdout.write_all(&out).await.expect("write runner stdout");
    }

    pub async fn send_stdout_text(&mut self, job_id_hash: u32, text: &str, final_: bool) {
        let raw = nodebooks_kernel::codec::frame::encode_text(nodebooks_kernel::codec::frame::FrameKind::Stdout, job_id_hash, text, final_);
        self.send_stream(raw).await;
    }
}
