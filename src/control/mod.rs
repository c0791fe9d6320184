mod channel;
mod loop_;

pub use channel::{ControlHandle, ControlRequest, ControlService, Frame, Opcode, StatusPayload};
pub use loop_::run;
