pub mod bridge;
pub mod messages;

pub use bridge::{kernel_ws_route, BridgeState, KernelWsSession};
pub use messages::{ClientMessage, ServerMessage};
