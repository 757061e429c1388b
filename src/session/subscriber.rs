//! The subscriber sink contract (§4.5, §4.6): a non-blocking channel a
//! `KernelSession` fans events out to. The WebSocket Bridge is the only
//! producer of concrete sinks today, but the type is independent of it so
//! sessions can be driven and tested without a socket.

use crate::domain::job::{Execution, OutputEntry, StreamName};
use actix::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Busy,
}

/// Events broadcast to every subscriber of a session, in delivery order
/// (§8 invariant 2: non-final frames precede the terminal event for a job).
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub enum SubscriberEvent {
    Status { state: SessionState },
    Stream { job_id: String, cell_id: Option<String>, name: StreamName, text: String },
    DisplayData { job_id: String, cell_id: Option<String>, data: Vec<u8> },
    ExecuteResult { job_id: String, cell_id: Option<String>, outputs: Vec<OutputEntry>, execution: Execution },
    Error { job_id: String, cell_id: Option<String>, ename: String, evalue: String, traceback: Vec<String> },
    Closed { reason: String },
}

impl SubscriberEvent {
    /// Rough wire-size estimate used to cap the replay tail at `replayBytes`
    /// (§4.5); doesn't need to be exact, only monotonic with payload size.
    pub fn approx_len(&self) -> u64 {
        match self {
            SubscriberEvent::Status { .. } => 16,
            SubscriberEvent::Stream { text, .. } => text.len() as u64 + 32,
            SubscriberEvent::DisplayData { data, .. } => data.len() as u64 + 32,
            SubscriberEvent::ExecuteResult { outputs, .. } => {
                outputs.iter().map(output_entry_len).sum::<u64>() + 32
            }
            SubscriberEvent::Error { evalue, traceback, .. } => {
                evalue.len() as u64 + traceback.iter().map(|t| t.len() as u64).sum::<u64>() + 64
            }
            SubscriberEvent::Closed { reason } => reason.len() as u64 + 16,
        }
    }
}

fn output_entry_len(entry: &OutputEntry) -> u64 {
    match entry {
        OutputEntry::Stream { text, .. } => text.len() as u64,
        OutputEntry::Display { data } => data.to_json().to_string().len() as u64,
        OutputEntry::Error { evalue, traceback, .. } => evalue.len() as u64 + traceback.iter().map(|t| t.len() as u64).sum::<u64>(),
    }
}

/// The state an attaching subscriber needs to render the session as it
/// stands: last status, the accumulated-output tail, and the job currently
/// in flight, if any (§4.5 "replay snapshot").
#[derive(Debug, Clone)]
pub struct ReplaySnapshot {
    pub last_status: SessionState,
    pub tail: Vec<SubscriberEvent>,
    pub current_job: Option<(String, Option<String>)>,
}
