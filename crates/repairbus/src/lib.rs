//! # repairbus -- Bus Master for Repair Trainer Units
//!
//! `repairbus` is an asynchronous Rust library for driving a bus of
//! addressable hardware trainer units over a half-duplex serial link. Each
//! unit simulates repairable faults (a settable resistor and a jumper
//! field); the master polls unit health, commands target configurations,
//! and persists what each unit was last told to be.
//!
//! ## Quick Start
//!
//! ```no_run
//! use repairbus::BusBuilder;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> repairbus::Result<()> {
//!     let bus = BusBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .auto_restore(true)
//!         .build()
//!         .await?;
//!
//!     bus.register_units(1..=12).await?;
//!     let _poller = bus.start_polling(Duration::from_millis(200));
//!
//!     loop {
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!         for unit in bus.snapshots().await? {
//!             println!(
//!                 "0x{:02X} {} resistor={} jumpers={}",
//!                 unit.address,
//!                 if unit.online { "online" } else { "offline" },
//!                 unit.resistor_status,
//!                 unit.jumpers_status,
//!             );
//!         }
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                    | Purpose                                      |
//! |--------------------------|----------------------------------------------|
//! | `repairbus-core`         | Frame codec, checksum, types, trait seams    |
//! | `repairbus-transport`    | Serial transport implementation              |
//! | `repairbus-master`       | Unit state machines, poll cycle, persistence |
//! | `repairbus-test-harness` | Mock transport and persistence for tests     |
//! | **`repairbus`**          | This facade crate -- re-exports everything   |
//!
//! A single coordinator task owns the serial port and every unit state
//! machine; applications talk to it through a [`BusHandle`]. Frames are
//! checksummed and resynchronized byte-by-byte after line noise, writes
//! are paced to one command per poll tick, and unit targets persist
//! through a write-behind store that never blocks the poll loop.

pub use repairbus_core::{
    checksum, code_to_ohms, events, frame, ohms_to_code, store, types, BusEvent, Command, Error,
    Frame, Result, SetPayload, StatusFlags, TargetRepository, TargetStore, Transport, UnitTarget,
    BROADCAST_ADDR, DISCONNECTED_CODE, MASTER_ADDR,
};

pub use repairbus_master::{
    BusBuilder, BusHandle, NullTargetStore, RepairPolicy, StatusReport, UnitSnapshot,
    WriteBehindStore,
};

pub use repairbus_transport::{SerialConfig, SerialTransport};
