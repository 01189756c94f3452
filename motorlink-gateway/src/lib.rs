//! Serial motor gateway.
//!
//! Multiplexes a set of serial-attached motor controllers behind a single
//! command/status surface:
//!
//! - one-byte opcodes are dispatched to any subset of channels
//! - a background poller decodes status bytes into a bounded event log
//! - an optional Modbus tilt sensor (TCP or RTU) reports roll/pitch/yaw
//!
//! # Channel IDs
//!
//! ```text
//! m1, m2, ... mN
//! ```
//!
//! IDs are assigned in sorted endpoint order to the ports that opened
//! successfully. They stay fixed for the life of the process.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod event_log;
pub mod gateway;
pub mod http;
pub mod mock;
pub mod poller;
pub mod registry;
pub mod sensor;
pub mod status;

pub use gateway::{Gateway, GatewayError};
