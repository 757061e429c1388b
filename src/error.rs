use thiserror::Error;

/// Host-level (infrastructure) errors. User code failures never surface here —
/// they are carried as terminal `Execution` outcomes instead (see `domain::job::ExecutionStatus`).
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame codec error: {0}")]
    Codec(String),

    #[error("no worker could be reserved before the caller deadline")]
    PoolExhausted,

    #[error("reservation is already running a job")]
    Busy,

    #[error("worker process crashed: {0}")]
    WorkerCrashed(String),

    #[error("transpile failed: {0}")]
    Transpile(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session '{0}' is closed")]
    SessionClosed(String),

    #[error("mailbox error: {0}")]
    Mailbox(#[from] actix::MailboxError),
}

pub type Result<T> = std::result::Result<T, KernelError>;
