pub mod control;
pub mod frame;
pub mod value;

pub use control::{ControlCodec, ControlMessage, EventCodec, EventMessage};
pub use frame::{decode as decode_frame, job_id_hash, Frame, FrameCodec, FrameKind};
pub use value::DisplayValue;
