pub mod process;
pub mod runner;
pub mod state;

pub use process::{WorkerCommand, WorkerEventCodec, WorkerHandle, WorkerLauncher, WorkerWireMessage};
pub use runner::{CancelJob, ForceTerminate, GetRunnerState, JobOutcome, JobRunner, RunJob, RunnerDied, RunnerEvent};
pub use state::RunnerState;
