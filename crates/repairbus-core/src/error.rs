//! Error types for repairbus.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! persistence-layer errors are all captured here.

/// The error type for all repairbus operations.
///
/// Variants cover the full range of failure modes encountered when
/// driving the unit bus: physical transport failures, protocol timing
/// violations, timeouts, and persistence faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/read/write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed traffic, unexpected response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the port or a unit.
    ///
    /// Read/write timeouts are fixed and fatal for the operation that hit
    /// them; there is no internal retry.
    #[error("timeout on serial operation")]
    Timeout,

    /// A send was attempted while the outbound hardware buffer still held
    /// unsent bytes.
    ///
    /// The bus is half-duplex with one outstanding command; overlapping
    /// writes would corrupt bus timing, so this is a protocol invariant
    /// violation rather than a retryable condition.
    #[error("port busy: outbound buffer not empty")]
    PortBusy,

    /// No connection to the bus has been established, or the bus task has
    /// shut down.
    #[error("not connected")]
    NotConnected,

    /// The connection to the bus was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A unit is already registered at the given address.
    #[error("unit already registered at address 0x{0:02X}")]
    AlreadyRegistered(u8),

    /// No unit is registered at the given address.
    #[error("no unit registered at address 0x{0:02X}")]
    UnknownUnit(u8),

    /// A persistence backend failure.
    #[error("store error: {0}")]
    Store(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port gone".into());
        assert_eq!(e.to_string(), "transport error: port gone");
    }

    #[test]
    fn error_display_port_busy() {
        let e = Error::PortBusy;
        assert_eq!(e.to_string(), "port busy: outbound buffer not empty");
    }

    #[test]
    fn error_display_addresses() {
        assert_eq!(
            Error::AlreadyRegistered(0x0B).to_string(),
            "unit already registered at address 0x0B"
        );
        assert_eq!(
            Error::UnknownUnit(0xF0).to_string(),
            "no unit registered at address 0xF0"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
