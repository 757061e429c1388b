//! Spawns and owns one sandboxed worker child process. The worker's own
//! evaluation loop (loading transpiled code, intercepting stdout/stderr,
//! `display()`) is the externally-supplied worker runtime named by
//! `WorkerCommand` (§1: "the language transpilation step... is assumed
//! provided"; the worker *binary* is this crate's analogous external asset).
//! This module only owns the OS process and its two unidirectional pipes:
//! stdin carries `ControlMessage`s, stdout carries a multiplexed stream of
//! `StreamFrame` bytes and `EventMessage`s.

use crate::codec::control::EventMessage;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// How to start a worker process. Defaults to an environment-supplied
/// executable path so the kernel never hardcodes a path to the (out of
/// scope) worker runtime.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: std::env::var("NODEBOOKS_WORKER_BIN").unwrap_or_else(|_| "nodebooks-worker".to_string()),
            args: Vec::new(),
        }
    }
}

pub fn spawn(cmd: &WorkerCommand, memory_mb: Option<u64>) -> io::Result<Child> {
    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    if let Some(mb) = memory_mb {
        command.env("NODEBOOKS_WORKER_MEMORY_MB", mb.to_string());
    }

    command.spawn()
}

pub fn take_stdio(child: &mut Child) -> io::Result<(ChildStdin, ChildStdout)> {
    let stdin = child.stdin.take().ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdin already taken"))?;
    let stdout = child.stdout.take().ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout already taken"))?;
    Ok((stdin, stdout))
}

/// The two pipes a `JobRunner` needs, plus (for a real OS process) the
/// `Child` handle used to kill it on timeout/cancel/shutdown. `child` is
/// `None` for a test double backed by an in-memory duplex pipe, which has
/// nothing to kill — cancellation for those just stops driving the pipe.
pub struct WorkerHandle {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub child: Option<Child>,
}

impl WorkerHandle {
    pub fn kill(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
    }
}

/// How a `JobRunner` obtains its worker's stdio. `WorkerCommand` is the
/// production implementation (spawns a real OS process); tests substitute
/// an in-memory duplex pipe (`tests/support`) so the runner's state machine
/// can be driven deterministically without a real worker binary (§11.4).
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, memory_mb: Option<u64>) -> io::Result<WorkerHandle>;
}

impl WorkerLauncher for WorkerCommand {
    fn launch(&self, memory_mb: Option<u64>) -> io::Result<WorkerHandle> {
        let mut child = spawn(self, memory_mb)?;
        let (stdin, stdout) = take_stdio(&mut child)?;
        Ok(WorkerHandle { stdin: Box::new(stdin), stdout: Box::new(stdout), child: Some(child) })
    }
}

/// What travels over the worker's stdout: either a raw, already-encoded
/// `StreamFrame` (see `codec::frame`, preserved byte-for-byte so its header
/// layout matches §4.1 exactly) or a structured `EventMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerWireMessage {
    Stream(Vec<u8>),
    Event(EventMessage),
}

/// Length-delimited + bincode framing for the event channel, mirroring
/// `ControlCodec`/`EventCodec` in `codec::control` (in turn grounded on the
/// teacher's `DistSystemCodec`), generalized here to wrap the envelope above.
#[derive(Debug, Default)]
pub struct WorkerEventCodec {
    inner: LengthDelimitedCodec,
}

impl WorkerEventCodec {
    pub fn new() -> Self {
        Self { inner: LengthDelimitedCodec::new() }
    }
}

impl Encoder<WorkerWireMessage> for WorkerEventCodec {
    type Error = io::Error;

    fn encode(&mut self, item: WorkerWireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.inner.encode(bytes::Bytes::from(bytes), dst)
    }
}

impl Decoder for WorkerEventCodec {
    type Item = WorkerWireMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let item = bincode::deserialize(&bytes).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}
