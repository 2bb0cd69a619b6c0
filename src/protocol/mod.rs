//! Host/guest recording command protocol.

pub mod coordinator;
pub mod dedup;
pub mod host;
pub mod log;
pub mod messages;

pub use coordinator::{CommandOutcome, Coordinator, ProtocolSettings};
pub use messages::{Command, CommandType, ControlMessage, WireMessage, ENVELOPE_KEY};
