//! repairbus-master: The bus-master side of the repair-unit protocol.
//!
//! This crate ties the frame codec to a [`Transport`] to produce a working
//! bus master: per-unit state machines, the poll cycle, deferred operator
//! actions, self-heal, and write-behind persistence of unit targets.
//!
//! # Architecture
//!
//! A single coordinator task owns the transport and all unit state (see
//! [`bus`]); callers interact through a [`BusHandle`] built with
//! [`BusBuilder`]. Target persistence is write-behind: the poll path only
//! ever touches memory, and a background task flushes dirty records to a
//! [`TargetRepository`](repairbus_core::store::TargetRepository).
//!
//! [`Transport`]: repairbus_core::transport::Transport

pub mod builder;
pub mod bus;
pub mod store;
pub mod unit;

pub use builder::BusBuilder;
pub use bus::BusHandle;
pub use store::{NullTargetStore, WriteBehindStore};
pub use unit::{RepairPolicy, StatusReport, Unit, UnitSnapshot};
