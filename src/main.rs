use clap::Parser;
use nodebooks_kernel::config::{KernelArgs, KernelConfig};
use nodebooks_kernel::external::{InMemoryNotebookStore, PassthroughTranspiler};
use nodebooks_kernel::worker::WorkerCommand;
use nodebooks_kernel::{logger, run_kernel_server};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    logger::init();

    let args = KernelArgs::parse();
    let config = KernelConfig::from(args);
    log::info!("kernel config: pool_size={} per_job_timeout_ms={} batch_ms={}", config.pool_size, config.per_job_timeout_ms, config.batch_ms);

    let worker_command = WorkerCommand::default();
    let transpiler = Arc::new(PassthroughTranspiler);
    let store = Arc::new(InMemoryNotebookStore::new());

    run_kernel_server(config, worker_command, transpiler, store, "127.0.0.1:8080").await
}
