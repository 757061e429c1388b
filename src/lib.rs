//! NodeBooks kernel execution core: a supervised pool of sandboxed worker
//! processes executing notebook code cells on behalf of many concurrent
//! sessions, with binary IPC framing, timeouts, cancellation, output caps,
//! and WebSocket fan-out (see SPEC_FULL.md).

use crate::config::KernelConfig;
use crate::external::{NotebookStore, Transpiler};
use crate::pool::WorkerPool;
use crate::session::SessionManager;
use crate::worker::WorkerCommand;
use crate::ws::{kernel_ws_route, BridgeState};
use actix::Actor;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod external;
pub mod logger;
pub mod pool;
pub mod session;
pub mod worker;
pub mod ws;

pub use error::{KernelError, Result};

/// Wires the Worker Pool, Session Manager, and WebSocket Bridge together and
/// serves the kernel's sole external interface: `GET /kernel/sessions/{id}`
/// (§6). Runs until the listener is shut down.
pub async fn run_kernel_server(
    config: KernelConfig,
    worker_command: WorkerCommand,
    transpiler: Arc<dyn Transpiler>,
    store: Arc<dyn NotebookStore>,
    bind_addr: &str,
) -> std::io::Result<()> {
    let config = Arc::new(config);
    let pool = WorkerPool::new(config.clone(), worker_command).start();
    let manager = SessionManager::new(pool, config.clone(), transpiler, store).start();
    let state = web::Data::new(BridgeState { manager, config: config.clone() });

    log::info!("kernel server listening on {}", bind_addr);
    HttpServer::new(move || App::new().app_data(state.clone()).route("/kernel/sessions/{sessionId}", web::get().to(kernel_ws_route)))
        .bind(bind_addr)?
        .run()
        .await
}
