//! Transport trait for bus communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the unit
//! bus. Implementations exist for serial ports (`repairbus-transport`) and
//! mock transports for testing (`repairbus-test-harness`).
//!
//! The bus coordinator operates on a `Transport` rather than directly on a
//! serial port, enabling both real hardware control and deterministic unit
//! testing.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the unit bus.
///
/// Implementations handle raw byte movement only. Framing, checksums, and
/// resynchronization are the codec's concern; pacing and the one-command-
/// outstanding discipline are the bus coordinator's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write raw bytes to the bus.
    ///
    /// Implementations block until all bytes have been handed to the
    /// underlying driver, and surface write timeouts as fatal errors.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read available bytes from the bus into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrived within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Number of bytes accepted by [`send`](Transport::send) that have not
    /// yet been shifted onto the wire.
    ///
    /// The bus is half-duplex with one outstanding command: the coordinator
    /// refuses to send while this is non-zero.
    fn pending_out(&self) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After `close()`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
