//! JSON wire messages for the WebSocket Bridge (§4.6). One message per
//! WebSocket frame, tagged by `type` the way `api/workflow_dto/*.rs`'s
//! DTOs tag their JSON payloads by a discriminant field.

use crate::domain::job::{Execution, Language, OutputEntry, StreamName};
use crate::session::{SessionState, SubscriberEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ExecuteRequest { cell_id: String, code: String, language: Language },
    InterruptRequest {},
    InvokeHandler { handler_id: String, event: String, payload: serde_json::Value, cell_id: Option<String> },
    Ping {},
}

/// JSON-friendly mirror of `domain::job::OutputEntry` for the client wire.
/// `OutputEntry` itself carries `Display { data: DisplayValue }` and is
/// serialized without an internal tag so it stays `bincode`-compatible
/// (see the comment on that type); this wrapper re-tags it as `kind` and
/// flattens the `DisplayValue` to plain JSON for the (out of scope) front
/// end, the same way `ServerMessage::DisplayData` does for live frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireOutputEntry {
    Stream { name: StreamName, text: String },
    Display { data: serde_json::Value },
    Error { ename: String, evalue: String, traceback: Vec<String> },
}

impl From<&OutputEntry> for WireOutputEntry {
    fn from(entry: &OutputEntry) -> Self {
        match entry {
            OutputEntry::Stream { name, text } => WireOutputEntry::Stream { name: *name, text: text.clone() },
            OutputEntry::Display { data } => WireOutputEntry::Display { data: data.to_json() },
            OutputEntry::Error { ename, evalue, traceback } => {
                WireOutputEntry::Error { ename: ename.clone(), evalue: evalue.clone(), traceback: traceback.clone() }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Stream { cell_id: Option<String>, name: StreamName, text: String },
    DisplayData { cell_id: Option<String>, data: serde_json::Value },
    UpdateDisplayData { cell_id: Option<String>, data: serde_json::Value, id: Option<String> },
    ExecuteResult { cell_id: Option<String>, outputs: Vec<WireOutputEntry>, execution: Execution },
    Error { cell_id: Option<String>, ename: String, evalue: String, traceback: Vec<String> },
    Status { state: SessionState },
    Pong {},
    Closed { reason: String },
}

impl From<SubscriberEvent> for ServerMessage {
    fn from(event: SubscriberEvent) -> Self {
        match event {
            SubscriberEvent::Status { state } => ServerMessage::Status { state },
            SubscriberEvent::Stream { cell_id, name, text, .. } => ServerMessage::Stream { cell_id, name, text },
            SubscriberEvent::DisplayData { cell_id, data, .. } => {
                let value = crate::codec::value::decode(&data).map(|v| v.to_json()).unwrap_or(serde_json::Value::Null);
                ServerMessage::DisplayData { cell_id, data: value }
            }
            SubscriberEvent::ExecuteResult { cell_id, outputs, execution, .. } => {
                let outputs = outputs.iter().map(WireOutputEntry::from).collect();
                ServerMessage::ExecuteResult { cell_id, outputs, execution }
            }
            SubscriberEvent::Error { cell_id, ename, evalue, traceback, .. } => ServerMessage::Error { cell_id, ename, evalue, traceback },
            SubscriberEvent::Closed { reason } => ServerMessage::Closed { reason },
        }
    }
}
