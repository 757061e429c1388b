//! WebSocket Bridge (§4.6, C6): accepts client sockets, maps them to Kernel
//! Sessions, translates wire messages to core operations, enforces
//! heartbeat and back-pressure.
//!
//! Mirrors `TcpSession`'s (`grid_component/component_communication/session.rs`)
//! `StreamHandler`-driven read loop and heartbeat shape, adapted from a raw
//! TCP peer to an `actix-web-actors::ws::WebsocketContext` session; the
//! control-plane hookup (resolving and attaching to a `KernelSession`) has
//! no precedent in that file and follows §4.5/§4.6 directly.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::session::{Attach, CloseSession, Execute, GetOrCreate, Interrupt, InvokeHandlerMsg, KernelSession, ReplaySnapshot, SessionManager, SubscriberEvent};
use crate::ws::messages::{ClientMessage, ServerMessage};
use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct BridgeState {
    pub manager: Addr<SessionManager>,
    pub config: Arc<KernelConfig>,
}

pub async fn kernel_ws_route(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
    data: web::Data<BridgeState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();
    let notebook_id = query.get("notebookId").cloned().unwrap_or_else(|| session_id.clone());
    let session = KernelWsSession::new(session_id, notebook_id, data.manager.clone(), data.config.clone());
    ws::start(session, &req, stream)
}

pub struct KernelWsSession {
    session_id: String,
    notebook_id: String,
    manager: Addr<SessionManager>,
    config: Arc<KernelConfig>,
    kernel_session: Option<Addr<KernelSession>>,
    subscriber_id: Option<u64>,
    last_heartbeat: Instant,
    bytes_since_tick: u64,
}

impl KernelWsSession {
    fn new(session_id: String, notebook_id: String, manager: Addr<SessionManager>, config: Arc<KernelConfig>) -> Self {
        Self {
            session_id,
            notebook_id,
            manager,
            config,
            kernel_session: None,
            subscriber_id: None,
            last_heartbeat: Instant::now(),
            bytes_since_tick: 0,
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(heartbeat_ms) = self.config.ws_heartbeat_ms else { return };
        let interval = Duration::from_millis(heartbeat_ms);
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > interval * 2 {
                log::info!("ws session {} missed two heartbeats; closing", act.session_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn attach_to_session(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let manager = self.manager.clone();
        let session_id = self.session_id.clone();
        let notebook_id = self.notebook_id.clone();

        let fut = async move { manager.send(GetOrCreate { session_id, notebook_id }).await.map_err(KernelError::from).and_then(|inner| inner) };

        ctx.spawn(fut.into_actor(self).map(|result, act, ctx| match result {
            Ok(session_addr) => {
                act.kernel_session = Some(session_addr.clone());
                let sink = ctx.address().recipient();
                let attach_fut = session_addr.send(Attach { subscriber: sink });
                ctx.spawn(attach_fut.into_actor(act).map(|attach_result, act, ctx| match attach_result {
                    Ok((subscriber_id, snapshot)) => {
                        act.subscriber_id = Some(subscriber_id);
                        act.replay(ctx, snapshot);
                    }
                    Err(err) => {
                        log::error!("ws session {} failed to attach: {}", act.session_id, err);
                        ctx.stop();
                    }
                }));
            }
            Err(err) => {
                log::error!("ws session {} failed to resolve kernel session: {}", act.session_id, err);
                ctx.stop();
            }
        }));
    }

    fn replay(&mut self, ctx: &mut ws::WebsocketContext<Self>, snapshot: ReplaySnapshot) {
        for event in snapshot.tail {
            self.send_server_message(ctx, ServerMessage::from(event));
        }
        self.send_server_message(ctx, ServerMessage::Status { state: snapshot.last_status });
    }

    fn send_server_message(&mut self, ctx: &mut ws::WebsocketContext<Self>, message: ServerMessage) {
        let Ok(json) = serde_json::to_string(&message) else { return };
        let high_water = self.config.subscriber_high_water_bytes;
        if self.bytes_since_tick + json.len() as u64 > high_water {
            log::warn!("ws session {} exceeded the send high-water mark; dropping subscriber", self.session_id);
            ctx.close(Some(ws::CloseReason { code: ws::CloseCode::Policy, description: Some("send buffer high-water mark exceeded".to_string()) }));
            ctx.stop();
            return;
        }
        self.bytes_since_tick += json.len() as u64;
        ctx.text(json);
    }

    fn handle_client_text(&mut self, ctx: &mut ws::WebsocketContext<Self>, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("ws session {} received an unparsable client message: {}", self.session_id, err);
                return;
            }
        };

        let Some(session) = self.kernel_session.clone() else {
            log::warn!("ws session {} received a message before attaching", self.session_id);
            return;
        };

        match message {
            ClientMessage::ExecuteRequest { cell_id, code, language } => {
                let fut = session.send(Execute { cell_id, code, language });
                ctx.spawn(fut.into_actor(self).map(|result, act, ctx| {
                    if let Ok(Err(err)) = result {
                        act.send_server_message(ctx, ServerMessage::Error { cell_id: None, ename: "ExecuteRejected".to_string(), evalue: err.to_string(), traceback: Vec::new() });
                    }
                }));
            }
            ClientMessage::InterruptRequest {} => {
                session.do_send(Interrupt { purge: false });
            }
            ClientMessage::InvokeHandler { handler_id, event, payload, cell_id } => {
                session.do_send(InvokeHandlerMsg { handler_id, event, payload, cell_id });
            }
            ClientMessage::Ping {} => {
                self.send_server_message(ctx, ServerMessage::Pong {});
            }
        }
    }
}

impl Actor for KernelWsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, _ctx| act.bytes_since_tick = 0);
        self.attach_to_session(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let (Some(session), Some(subscriber_id)) = (&self.kernel_session, self.subscriber_id) {
            session.do_send(crate::session::Detach { subscriber_id });
        }
    }
}

impl Handler<SubscriberEvent> for KernelWsSession {
    type Result = ();

    fn handle(&mut self, msg: SubscriberEvent, ctx: &mut Self::Context) {
        let is_closed = matches!(msg, SubscriberEvent::Closed { .. });
        self.send_server_message(ctx, ServerMessage::from(msg));
        if is_closed {
            ctx.stop();
        }
    }
}

impl StreamHandler<std::result::Result<ws::Message, ws::ProtocolError>> for KernelWsSession {
    fn handle(&mut self, item: std::result::Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let message = match item {
            Ok(message) => message,
            Err(err) => {
                log::warn!("ws session {} protocol error: {}", self.session_id, err);
                ctx.stop();
                return;
            }
        };

        match message {
            ws::Message::Ping(bytes) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => self.last_heartbeat = Instant::now(),
            ws::Message::Text(text) => self.handle_client_text(ctx, &text),
            ws::Message::Binary(_) => {}
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => ctx.stop(),
            ws::Message::Nop => {}
        }
    }
}

/// Remove a session from the manager's directory, e.g. from an
/// administrative endpoint outside the WebSocket path.
pub async fn close_session(manager: &Addr<SessionManager>, session_id: String) {
    manager.do_send(CloseSession { session_id });
}
