//! repairbus-transport: Physical transport implementations for repairbus.
//!
//! Provides the [`SerialTransport`] used against real hardware. The
//! [`Transport`](repairbus_core::transport::Transport) trait itself lives
//! in `repairbus-core` so that protocol code and tests never depend on
//! serial I/O.

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
