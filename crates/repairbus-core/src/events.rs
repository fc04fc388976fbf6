//! Bus event types.
//!
//! Events are emitted by the bus coordinator through a
//! `tokio::sync::broadcast` channel when unit state changes. Front-end
//! panels subscribe to these for display updates without polling the bus
//! handle.

/// An event emitted by the bus coordinator.
///
/// Subscribe via `BusHandle::subscribe()`. Events are delivered on a
/// best-effort basis through a bounded broadcast channel; slow consumers
/// may miss events under load.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A unit acknowledged for the first time or after being stale.
    UnitConnected {
        /// Bus address of the unit.
        address: u8,
    },

    /// A unit's status report changed (new `Set` echo processed).
    UnitStatusUpdated {
        /// Bus address of the unit.
        address: u8,
    },

    /// The master commanded a new target configuration.
    TargetCommanded {
        /// Bus address of the unit.
        address: u8,
        /// Commanded resistor code.
        resistor_code: u8,
        /// Commanded jumper pattern.
        jumper_value: u8,
    },
}
