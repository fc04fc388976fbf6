//! BusBuilder -- fluent builder for constructing a running bus.
//!
//! Separates configuration from construction so that callers can set up
//! the serial port, repair policy, and persistence backend before the
//! coordinator task starts.
//!
//! # Example
//!
//! ```no_run
//! use repairbus_master::BusBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> repairbus_core::Result<()> {
//! let bus = BusBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .auto_restore(true)
//!     .auto_repair_threshold(1_000)
//!     .build()
//!     .await?;
//! bus.register_units(1..=12).await?;
//! let _poller = bus.start_polling(Duration::from_millis(200));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use repairbus_core::error::{Error, Result};
use repairbus_core::store::TargetStore;
use repairbus_core::transport::Transport;
use repairbus_transport::SerialTransport;

use crate::bus::{spawn_bus, BusConfig, BusHandle};
use crate::store::NullTargetStore;
use crate::unit::RepairPolicy;

/// Fluent builder for a [`BusHandle`].
///
/// All configuration has defaults matching the deployed installations, so
/// the simplest usage is:
///
/// ```ignore
/// let bus = BusBuilder::new().serial_port("COM3").build().await?;
/// ```
pub struct BusBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    default_difficulty: u8,
    auto_restore: bool,
    auto_repair_threshold_ohms: u32,
    settle_delay: Duration,
    event_capacity: usize,
    store: Option<Box<dyn TargetStore>>,
}

impl BusBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        BusBuilder {
            serial_port: None,
            baud_rate: 9600,
            default_difficulty: 0x04,
            auto_restore: false,
            auto_repair_threshold_ohms: 1_000,
            settle_delay: Duration::from_millis(20),
            event_capacity: 16,
            store: None,
        }
    }

    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3").
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Baud rate. The deployed units speak 9600.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Difficulty byte stamped into every outgoing `Set` frame.
    pub fn default_difficulty(mut self, difficulty: u8) -> Self {
        self.default_difficulty = difficulty;
        self
    }

    /// Enable automatic re-assertion of drifted resistor values.
    pub fn auto_restore(mut self, on: bool) -> Self {
        self.auto_restore = on;
        self
    }

    /// Reported resistances below this many ohms count as deliberate
    /// breaks and are never auto-restored.
    pub fn auto_repair_threshold(mut self, ohms: u32) -> Self {
        self.auto_repair_threshold_ohms = ohms;
        self
    }

    /// Pause between a commanded target and the follow-up broadcast poll.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Capacity of the event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Persistence for unit targets. Defaults to
    /// [`NullTargetStore`](crate::store::NullTargetStore) (no database).
    pub fn store(mut self, store: Box<dyn TargetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Open the configured serial port and start the coordinator task.
    pub async fn build(self) -> Result<BusHandle> {
        let port = self
            .serial_port
            .clone()
            .ok_or_else(|| Error::Transport("no serial port configured".into()))?;
        let transport = SerialTransport::open(&port, self.baud_rate).await?;
        Ok(self.build_with_transport(Box::new(transport)))
    }

    /// Start the coordinator task over an already-open transport.
    ///
    /// This is the entry point for tests and for callers that manage the
    /// port themselves.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> BusHandle {
        let config = BusConfig {
            default_difficulty: self.default_difficulty,
            policy: RepairPolicy {
                auto_restore: self.auto_restore,
                auto_repair_threshold_ohms: self.auto_repair_threshold_ohms,
            },
            settle_delay: self.settle_delay,
        };
        let store = self.store.unwrap_or_else(|| Box::new(NullTargetStore));
        spawn_bus(transport, store, config, self.event_capacity)
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
