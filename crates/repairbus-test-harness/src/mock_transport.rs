//! Mock transport for deterministic testing of the protocol stack.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test frame encoding, the poll
//! cycle, and unit state transitions without real hardware.
//!
//! # Example
//!
//! ```
//! use repairbus_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the master broadcasts a Get, unit 0x05 answers with an Ack.
//! mock.expect(&[0xF0, 0x80, 0x04, 0x91, 0xB3],
//!             &[0x80, 0x05, 0x00, 0x88, 0x94]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use repairbus_core::error::{Error, Result};
use repairbus_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes the "units" put on the line in answer.
    response: Vec<u8>,
}

/// Shared view of everything sent through a [`MockTransport`].
///
/// Obtained from [`MockTransport::sent`] before the transport is moved
/// into the code under test; stays readable afterwards.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    /// All sends so far, one element per `send()` call.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `send()` calls so far.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing has been sent yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, data: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.to_vec());
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the data
/// is recorded and matched against the next expectation; the matching
/// response is appended to an incoming byte queue that subsequent
/// `receive()` calls drain (partial reads included), mimicking a unit
/// answering on the half-duplex line.
///
/// If a send doesn't match, or the queue is exhausted, an error is
/// returned.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes "on the line", waiting to be received.
    incoming: VecDeque<u8>,
    /// Simulated outbound-buffer occupancy reported by `pending_out`.
    pending_out: usize,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: SentLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            incoming: VecDeque::new(),
            pending_out: 0,
            connected: true,
            sent_log: SentLog::default(),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response` is
    /// queued for subsequent `receive()` calls. Pass an empty response for
    /// sends nothing answers.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Put bytes on the line without requiring a send first, as if a unit
    /// spoke unprompted.
    pub fn push_incoming(&mut self, data: &[u8]) {
        self.incoming.extend(data.iter().copied());
    }

    /// A shared handle to the log of sent data, usable after the
    /// transport has been moved into the code under test.
    pub fn sent(&self) -> SentLog {
        self.sent_log.clone()
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Simulate an outbound hardware buffer that still holds `n` bytes.
    pub fn set_pending_out(&mut self, n: usize) {
        self.pending_out = n;
    }

    /// Set the connected state.
    ///
    /// When `false`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data);

        if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            self.incoming.extend(expectation.response.iter().copied());
            Ok(())
        } else {
            Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ))
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.incoming.is_empty() {
            return Err(Error::Timeout);
        }

        let n = self.incoming.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            // VecDeque is non-empty for the first n pops by construction.
            *slot = self.incoming.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn pending_out(&self) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        Ok(self.pending_out)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.incoming.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
