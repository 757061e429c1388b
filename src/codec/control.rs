//! Host<->worker control/event message union (§3) and the length-delimited
//! + bincode codec that frames them, directly mirroring `DistSystemCodec`
//! (`grid_component/component_communication/codec.rs`): same
//! `LengthDelimitedCodec` + `bincode::serialize`/`deserialize` composition,
//! generalized from a single `Envelope` type to this crate's
//! `ControlMessage`/`EventMessage` union. `StreamFrame`s are *not* carried
//! over this codec — they use the fixed-header `FrameCodec` in `frame.rs`
//! since their wire layout is externally specified.

use crate::codec::value::DisplayValue;
use crate::domain::job::{Execution, Globals, JobKind, NotebookEnv, OutputEntry};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlMessage {
    RunCell { job_id: String, code: String, env: NotebookEnv, globals: Globals },
    InvokeHandler { job_id: String, handler_id: String, event: String, payload: DisplayValue, env: NotebookEnv, globals: Globals },
    Cancel { job_id: String },
    Ping,
}

impl ControlMessage {
    pub fn from_job_kind(job_id: String, kind: &JobKind, env: NotebookEnv, globals: Globals) -> Self {
        match kind {
            JobKind::Execute { code, .. } => ControlMessage::RunCell { job_id, code: code.clone(), env, globals },
            JobKind::InvokeHandler { handler_id, event, payload, .. } => {
                ControlMessage::InvokeHandler { job_id, handler_id: handler_id.clone(), event: event.clone(), payload: payload.clone(), env, globals }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventMessage {
    Ack { job_id: String },
    Result { job_id: String, outputs: Vec<OutputEntry>, execution: Execution, globals: Globals },
    Error { job_id: String, ename: String, evalue: String, traceback: Vec<String> },
    Pong,
}

impl EventMessage {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EventMessage::Ack { job_id } | EventMessage::Result { job_id, .. } | EventMessage::Error { job_id, .. } => Some(job_id),
            EventMessage::Pong => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ControlCodec {
    inner: LengthDelimitedCodec,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self { inner: LengthDelimitedCodec::new() }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.inner.encode(bytes::Bytes::from(bytes), dst)
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
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

#[derive(Debug, Default)]
pub struct EventCodec {
    inner: LengthDelimitedCodec,
}

impl EventCodec {
    pub fn new() -> Self {
        Self { inner: LengthDelimitedCodec::new() }
    }
}

impl Encoder<EventMessage> for EventCodec {
    type Error = io::Error;

    fn encode(&mut self, item: EventMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.inner.encode(bytes::Bytes::from(bytes), dst)
    }
}

impl Decoder for EventCodec {
    type Item = EventMessage;
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
