pub mod kernel_session;
pub mod manager;
pub mod subscriber;

pub use kernel_session::{Attach, Close, Detach, Execute, GetSnapshot, Interrupt, InvokeHandlerMsg, KernelSession, SessionSnapshot, SessionStatus};
pub use manager::{CloseSession, GetOrCreate, List, SessionManager};
pub use subscriber::{ReplaySnapshot, SessionState, SubscriberEvent};
