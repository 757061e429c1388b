//! Core data model shared by the pool, runner, and session layers (§3).

use crate::codec::value::DisplayValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Per-notebook execution context. Immutable for the lifetime of a single execution.
///
/// `variables` holds `DisplayValue` rather than `serde_json::Value`: this
/// struct rides inside `ControlMessage::RunCell`, which is framed over
/// `bincode` (see `codec::control`), and `serde_json::Value`'s `Deserialize`
/// impl requires a self-describing format that `bincode` does not provide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotebookEnv {
    pub runtime: String, // only "node" is defined today
    pub language_version: String,
    pub packages: BTreeMap<String, String>,
    pub variables: BTreeMap<String, DisplayValue>,
}

impl NotebookEnv {
    pub fn node(language_version: impl Into<String>) -> Self {
        Self {
            runtime: "node".to_string(),
            language_version: language_version.into(),
            packages: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Ts,
}

/// A code cell. Identity is stable; `source` is snapshotted at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,
    pub language: Language,
    pub source: String,
}

/// The accumulated top-level bindings a cell leaves behind for later cells.
/// `DisplayValue`, not `serde_json::Value`, for the same `bincode`-framing
/// reason as `NotebookEnv::variables` above.
pub type Globals = BTreeMap<String, DisplayValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub started_ms: i64,
    pub ended_ms: i64,
    pub status: ExecutionStatus,
}

/// Deliberately *not* `#[serde(tag = "...")]`: an internally-tagged enum's
/// generated `Deserialize` impl buffers its content through serde's
/// `Content`/`ContentDeserializer`, which (like `serde_json::Value`) needs a
/// self-describing format and so cannot round-trip through `bincode`. The
/// default externally-tagged representation bincode emits is encoded as a
/// plain variant index and is fine; the WebSocket Bridge's JSON wire
/// (`ws::messages::WireOutputEntry`) carries its own `kind`-tagged shape for
/// clients instead of deriving straight from this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputEntry {
    Stream { name: StreamName, text: String },
    Display { data: DisplayValue },
    Error { ename: String, evalue: String, traceback: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// What kind of job this is: a cell execution or a UI handler invocation.
/// Both share the same dispatch/lifecycle machinery (§4.5).
#[derive(Debug, Clone)]
pub enum JobKind {
    Execute { cell_id: String, code: String },
    InvokeHandler { handler_id: String, event: String, payload: DisplayValue, cell_id: Option<String> },
}

/// One execution of one cell (or handler invocation) against one worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub notebook_id: String,
    pub session_id: String,
    pub kind: JobKind,
    pub env: NotebookEnv,
    pub timeout_ms: u64,
    pub globals: Globals,
    pub started_at: Instant,
}

impl Job {
    pub fn deadline(&self) -> Instant {
        self.started_at + Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_started_at_plus_timeout() {
        let job = Job {
            job_id: "j1".into(),
            notebook_id: "n1".into(),
            session_id: "s1".into(),
            kind: JobKind::Execute { cell_id: "c1".into(), code: "1+1".into() },
            env: NotebookEnv::node("20"),
            timeout_ms: 250,
            globals: Globals::new(),
            started_at: Instant::now(),
        };
        assert!(job.deadline() >= job.started_at + Duration::from_millis(250));
    }
}
