//! Recording coordination and synchronization engine.
//!
//! Every peer in a shared session records its own tracks locally; one host
//! starts and stops recording for everyone through a small command protocol
//! that tolerates dropped, duplicated and reordered messages.

pub mod app;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod global;
pub mod protocol;
pub mod recording;
pub mod session;
pub mod transport;
