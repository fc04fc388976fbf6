//! repairbus-test-harness: Mocks for testing repairbus without hardware.
//!
//! Provides [`MockTransport`] (expectation-based serial line) and
//! [`MockRepository`] (in-memory persistence with injectable failures).
//! Both are deterministic, so protocol and poll-cycle behavior can be
//! asserted byte-for-byte in ordinary `#[tokio::test]` functions.

pub mod mock_repository;
pub mod mock_transport;

pub use mock_repository::MockRepository;
pub use mock_transport::{MockTransport, SentLog};
