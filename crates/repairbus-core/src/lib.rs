//! repairbus-core: Frame codec, wire types, and trait seams for repairbus.
//!
//! This crate defines the transport-agnostic pieces of the unit-bus
//! protocol stack. Applications and the higher-level crates depend on
//! these types without pulling in serial I/O.
//!
//! # Key types
//!
//! - [`Frame`] / [`Command`] -- the wire protocol and its codec
//! - [`Transport`] -- byte-level communication channel
//! - [`TargetStore`] / [`TargetRepository`] -- persistence seams
//! - [`BusEvent`] -- state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod checksum;
pub mod error;
pub mod events;
pub mod frame;
pub mod store;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use repairbus_core::*`.
pub use error::{Error, Result};
pub use events::BusEvent;
pub use frame::{Command, Frame, SetPayload, BROADCAST_ADDR, MASTER_ADDR};
pub use store::{TargetRepository, TargetStore};
pub use transport::Transport;
pub use types::{code_to_ohms, ohms_to_code, StatusFlags, UnitTarget, DISCONNECTED_CODE};
