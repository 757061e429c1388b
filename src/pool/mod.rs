pub mod pool;
pub mod registry;
pub mod reservation;

pub use pool::{CancelGlobal, GetStats, PoolStats, Reserve, Shutdown, WorkerPool};
pub use registry::JobRegistry;
pub use reservation::Reservation;
