//! The bus coordinator task and its handle.
//!
//! One spawned task owns the transport, the receive buffer, and every
//! [`Unit`] state machine. Operator actions, poll ticks, and display
//! snapshots are marshaled into it over an `mpsc` channel with `oneshot`
//! replies, so all controller-state mutation happens on a single consumer
//! path and a send can never interleave a raw read of the same port.
//!
//! The task's idle branch continuously drains the bus: bytes are appended
//! to the rolling receive buffer, complete frames are extracted (with
//! checksum resync), and each frame is routed to the unit matching its
//! sender address.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use repairbus_core::error::{Error, Result};
use repairbus_core::events::BusEvent;
use repairbus_core::frame::{extract_frame, Command, Frame, SetPayload};
use repairbus_core::store::TargetStore;
use repairbus_core::transport::Transport;

use crate::unit::{RepairPolicy, StatusReport, Unit, UnitSnapshot};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Idle read deadline. Short enough to keep command latency low; a timeout
/// here just means no unit was talking.
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum receive buffer size before reset to prevent unbounded growth
/// when the line is flooded with noise.
const MAX_RECV_BUF: usize = 4096;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration shared by the coordinator task.
pub(crate) struct BusConfig {
    /// Difficulty byte stamped into every outgoing `Set`.
    pub default_difficulty: u8,
    /// Self-heal policy applied to every unit.
    pub policy: RepairPolicy,
    /// Pause after commanding a target, letting the half-duplex line
    /// settle before the broadcast poll goes out.
    pub settle_delay: Duration,
}

/// A request sent from a [`BusHandle`] to the coordinator task.
pub(crate) enum Request {
    /// Run one poll cycle: service at most one dirty unit, then broadcast
    /// a status request.
    PollTick {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send a direct status request to one unit immediately.
    RefreshNow {
        address: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Queue a simulated resistor break.
    BreakResistor {
        address: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Queue a simulated jumper break, with an optional explicit pattern.
    BreakJumper {
        address: u8,
        value: Option<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Register a unit state machine for an address.
    Register {
        address: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Remove the unit state machine for an address.
    Unregister {
        address: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Copy out the display state of every unit.
    Snapshots {
        reply: oneshot::Sender<Vec<UnitSnapshot>>,
    },
    /// Graceful shutdown; returns the transport for test recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the coordinator task.
///
/// Cloning is deliberately not offered; the handle owns the task's
/// lifetime. Dropping it cancels and aborts the task.
pub struct BusHandle {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    event_tx: broadcast::Sender<BusEvent>,
}

impl BusHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Run one poll cycle: service the first dirty unit (if any), then
    /// broadcast a status request to every unit.
    pub async fn poll_once(&self) -> Result<()> {
        self.request(|reply| Request::PollTick { reply }).await?
    }

    /// Send a direct status request to one unit, outside the poll cadence.
    pub async fn refresh_now(&self, address: u8) -> Result<()> {
        self.request(|reply| Request::RefreshNow { address, reply })
            .await?
    }

    /// Queue a simulated resistor break for `address`; applied on the next
    /// poll tick.
    pub async fn break_resistor(&self, address: u8) -> Result<()> {
        self.request(|reply| Request::BreakResistor { address, reply })
            .await?
    }

    /// Queue a simulated jumper break for `address`. With `Some(value)`
    /// the exact pattern is commanded, otherwise one is generated.
    pub async fn break_jumper(&self, address: u8, value: Option<u8>) -> Result<()> {
        self.request(|reply| Request::BreakJumper {
            address,
            value,
            reply,
        })
        .await?
    }

    /// Register a unit at `address`. At most one unit per address.
    pub async fn register_unit(&self, address: u8) -> Result<()> {
        self.request(|reply| Request::Register { address, reply })
            .await?
    }

    /// Register a unit for every address in `addresses`.
    pub async fn register_units(
        &self,
        addresses: impl IntoIterator<Item = u8>,
    ) -> Result<()> {
        for address in addresses {
            self.register_unit(address).await?;
        }
        Ok(())
    }

    /// Release the unit registered at `address`.
    pub async fn unregister_unit(&self, address: u8) -> Result<()> {
        self.request(|reply| Request::Unregister { address, reply })
            .await?
    }

    /// Display state of every registered unit, in registration order.
    pub async fn snapshots(&self) -> Result<Vec<UnitSnapshot>> {
        self.request(|reply| Request::Snapshots { reply }).await
    }

    /// Aggregate consumption: the sum of every unit's consumption value.
    pub async fn total_consumption(&self) -> Result<f64> {
        Ok(self
            .snapshots()
            .await?
            .iter()
            .map(|s| s.consumption)
            .sum())
    }

    /// Subscribe to bus events.
    ///
    /// Returns a broadcast receiver. The channel is bounded; if the
    /// consumer falls behind, older events are dropped (lagged).
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.event_tx.subscribe()
    }

    /// Drive `poll_once` on a fixed cadence until the bus shuts down.
    ///
    /// Returns the poller's join handle; aborting it stops the cadence
    /// without touching the bus itself.
    pub fn start_polling(&self, interval: Duration) -> JoinHandle<()> {
        let cmd_tx = self.cmd_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        if cmd_tx
                            .send(Request::PollTick { reply: reply_tx })
                            .await
                            .is_err()
                        {
                            break;
                        }
                        match reply_rx.await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(error = %e, "poll tick failed"),
                            Err(_) => break,
                        }
                    }
                }
            }
        })
    }

    /// Shut down the coordinator task and recover the transport.
    pub async fn shutdown(mut self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        // Don't care if send fails -- the task might have already exited.
        let _ = self
            .cmd_tx
            .send(Request::Shutdown { reply: reply_tx })
            .await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = (&mut self.task).await;
        Ok(transport)
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        // Graceful: signal the coordinator to exit at the next select
        // iteration. Safety net: abort in case it is stuck in a transport
        // read that doesn't respect cancellation (e.g. hung USB-serial).
        self.cancel.cancel();
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the coordinator task. Returns the handle for issuing requests.
pub(crate) fn spawn_bus(
    transport: Box<dyn Transport>,
    store: Box<dyn TargetStore>,
    config: BusConfig,
    event_capacity: usize,
) -> BusHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let (event_tx, _) = broadcast::channel(event_capacity);
    let cancel = CancellationToken::new();

    let bus = Bus {
        transport,
        store,
        config,
        units: Vec::new(),
        recv_buf: Vec::new(),
        event_tx: event_tx.clone(),
    };

    let task = tokio::spawn(io_loop(bus, cmd_rx, cancel.clone()));

    BusHandle {
        cmd_tx,
        cancel,
        task,
        event_tx,
    }
}

// ---------------------------------------------------------------------------
// Coordinator state
// ---------------------------------------------------------------------------

/// State owned exclusively by the coordinator task.
struct Bus {
    transport: Box<dyn Transport>,
    store: Box<dyn TargetStore>,
    config: BusConfig,
    /// Registration order is poll-service order.
    units: Vec<Unit>,
    recv_buf: Vec<u8>,
    event_tx: broadcast::Sender<BusEvent>,
}

impl Bus {
    /// One poll cycle: at most one dirty unit serviced, then the broadcast
    /// status request. Bounds write traffic to one command per tick while
    /// reads stay continuous.
    async fn poll_tick(&mut self) -> Result<()> {
        if let Some(index) = self.units.iter().position(|u| u.dirty()) {
            let unit = &mut self.units[index];
            let target = unit.perform_pending_work(self.store.as_ref(), &mut rand::thread_rng());
            let address = unit.address();

            self.store.set(target);
            let payload = SetPayload {
                resistor_code: target.resistor_code,
                jumper_value: target.jumper_value,
                difficulty: self.config.default_difficulty,
                status: 0,
            };
            self.send_frame(&Frame::set(address, payload)).await?;
            let _ = self.event_tx.send(BusEvent::TargetCommanded {
                address,
                resistor_code: target.resistor_code,
                jumper_value: target.jumper_value,
            });
            tokio::time::sleep(self.config.settle_delay).await;
        }
        self.send_frame(&Frame::broadcast_get()).await
    }

    /// Direct status request to one unit.
    async fn refresh_now(&mut self, address: u8) -> Result<()> {
        if !self.units.iter().any(|u| u.address() == address) {
            return Err(Error::UnknownUnit(address));
        }
        self.send_frame(&Frame::get(address)).await
    }

    fn break_resistor(&mut self, address: u8) -> Result<()> {
        self.unit_mut(address)?.break_resistor();
        Ok(())
    }

    fn break_jumper(&mut self, address: u8, value: Option<u8>) -> Result<()> {
        self.unit_mut(address)?.break_jumper(value);
        Ok(())
    }

    fn register_unit(&mut self, address: u8) -> Result<()> {
        if self.units.iter().any(|u| u.address() == address) {
            return Err(Error::AlreadyRegistered(address));
        }
        debug!(address, "unit registered");
        self.units.push(Unit::new(address));
        Ok(())
    }

    fn unregister_unit(&mut self, address: u8) -> Result<()> {
        let index = self
            .units
            .iter()
            .position(|u| u.address() == address)
            .ok_or(Error::UnknownUnit(address))?;
        self.units.remove(index);
        debug!(address, "unit unregistered");
        Ok(())
    }

    fn snapshots(&self) -> Vec<UnitSnapshot> {
        self.units.iter().map(Unit::snapshot).collect()
    }

    fn unit_mut(&mut self, address: u8) -> Result<&mut Unit> {
        self.units
            .iter_mut()
            .find(|u| u.address() == address)
            .ok_or(Error::UnknownUnit(address))
    }

    /// Encode and transmit one frame.
    ///
    /// Refuses to queue behind an unfinished write: the bus allows one
    /// outstanding command, so a non-empty outbound buffer means the
    /// caller broke the pacing contract.
    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        trace!(data = ?bytes, "master->unit");
        if self.transport.pending_out()? > 0 {
            return Err(Error::PortBusy);
        }
        self.transport.send(&bytes).await
    }

    /// Drain and dispatch every complete frame in the receive buffer.
    fn process_incoming(&mut self) {
        if self.recv_buf.len() > MAX_RECV_BUF {
            warn!(len = self.recv_buf.len(), "receive buffer overflow, resetting");
            self.recv_buf.clear();
            return;
        }
        if let Err(e) = self.drain_frames() {
            // Corrupted state must not wedge future frames: drop
            // everything and resume with the next arrival.
            warn!(error = %e, "receive processing failed, clearing buffer");
            self.recv_buf.clear();
        }
    }

    fn drain_frames(&mut self) -> Result<()> {
        while let Some(frame) = extract_frame(&mut self.recv_buf) {
            self.dispatch_frame(frame)?;
        }
        Ok(())
    }

    /// Route one frame to the unit matching its sender address.
    fn dispatch_frame(&mut self, frame: Frame) -> Result<()> {
        trace!(
            src = frame.src_addr,
            dst = frame.dst_addr,
            cmd = frame.command.code(),
            "unit->master"
        );
        let policy = self.config.policy;
        let Some(unit) = self
            .units
            .iter_mut()
            .find(|u| u.address() == frame.src_addr)
        else {
            debug!(src = frame.src_addr, "frame from unregistered address, ignoring");
            return Ok(());
        };

        let was_connected = unit.connected();
        match frame.command {
            Command::Ack => unit.handle_ack(),
            Command::NAck => unit.handle_nack(),
            Command::Set(payload) => {
                unit.handle_set(StatusReport::from(payload), &policy);
                let _ = self.event_tx.send(BusEvent::UnitStatusUpdated {
                    address: frame.src_addr,
                });
            }
            Command::Get | Command::Unknown(_) => {}
        }

        let connected_now = self
            .units
            .iter()
            .find(|u| u.address() == frame.src_addr)
            .map(|u| u.connected())
            .unwrap_or(false);
        if !was_connected && connected_now {
            let _ = self.event_tx.send(BusEvent::UnitConnected {
                address: frame.src_addr,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// IO loop
// ---------------------------------------------------------------------------

/// The coordinator's main loop. Runs as a spawned task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Request dispatch
/// 3. Idle bus reading
async fn io_loop(
    mut bus: Bus,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("bus task cancelled");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Request::PollTick { reply }) => {
                        let result = bus.poll_tick().await;
                        let _ = reply.send(result);
                    }
                    Some(Request::RefreshNow { address, reply }) => {
                        let result = bus.refresh_now(address).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::BreakResistor { address, reply }) => {
                        let _ = reply.send(bus.break_resistor(address));
                    }
                    Some(Request::BreakJumper { address, value, reply }) => {
                        let _ = reply.send(bus.break_jumper(address, value));
                    }
                    Some(Request::Register { address, reply }) => {
                        let _ = reply.send(bus.register_unit(address));
                    }
                    Some(Request::Unregister { address, reply }) => {
                        let _ = reply.send(bus.unregister_unit(address));
                    }
                    Some(Request::Snapshots { reply }) => {
                        let _ = reply.send(bus.snapshots());
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("bus task shutdown requested, returning transport");
                        let _ = reply.send(bus.transport);
                        return;
                    }
                    None => {
                        debug!("all bus handles dropped, exiting bus task");
                        break;
                    }
                }
            }

            // Idle: drain whatever the units put on the line.
            _ = async {
                let mut buf = [0u8; 256];
                match bus.transport.receive(&mut buf, IDLE_READ_TIMEOUT).await {
                    Ok(n) if n > 0 => {
                        bus.recv_buf.extend_from_slice(&buf[..n]);
                        bus.process_incoming();
                    }
                    _ => {
                        // Timeout or error -- yield briefly so the loop
                        // can check for requests or cancellation.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            } => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BusBuilder;
    use repairbus_core::types::{code_to_ohms, ohms_to_code, UnitTarget};
    use repairbus_test_harness::MockTransport;

    fn ack_from(address: u8) -> Vec<u8> {
        Frame {
            dst_addr: repairbus_core::MASTER_ADDR,
            src_addr: address,
            command: Command::Ack,
        }
        .encode()
    }

    fn set_echo_from(address: u8, resistor_code: u8, jumper: u8, status: u8) -> Vec<u8> {
        Frame {
            dst_addr: repairbus_core::MASTER_ADDR,
            src_addr: address,
            command: Command::Set(SetPayload {
                resistor_code,
                jumper_value: jumper,
                difficulty: 0x04,
                status,
            }),
        }
        .encode()
    }

    async fn snapshot_of(handle: &BusHandle, address: u8) -> UnitSnapshot {
        handle
            .snapshots()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.address == address)
            .expect("unit registered")
    }

    /// Poll snapshots until `check` passes; the idle reader needs a little
    /// wall-clock time to digest mock bytes.
    async fn wait_for_unit(
        handle: &BusHandle,
        address: u8,
        check: impl Fn(&UnitSnapshot) -> bool,
        what: &str,
    ) -> UnitSnapshot {
        for _ in 0..200 {
            let snap = snapshot_of(handle, address).await;
            if check(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("unit 0x{address:02X} never became {what}");
    }

    /// A store stub that always answers with one fixed target.
    struct OneTarget;

    impl TargetStore for OneTarget {
        fn get(&self, address: u8) -> Option<UnitTarget> {
            Some(UnitTarget {
                address,
                resistor_code: ohms_to_code(6_800),
                jumper_value: 0xF2,
            })
        }

        fn set(&self, _target: UnitTarget) {}
    }

    #[tokio::test]
    async fn poll_with_no_dirty_unit_sends_only_broadcast_get() {
        let mut mock = MockTransport::new();
        mock.expect(&Frame::broadcast_get().encode(), &[]);
        let sent = mock.sent();

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();
        handle.poll_once().await.unwrap();

        assert_eq!(sent.frames(), vec![Frame::broadcast_get().encode()]);
    }

    #[tokio::test]
    async fn dirty_unit_gets_set_before_broadcast() {
        let mut mock = MockTransport::new();
        let expected_set = Frame::set(
            0x05,
            SetPayload {
                resistor_code: 0,
                jumper_value: 0x1C,
                difficulty: 0x04,
                status: 0,
            },
        )
        .encode();
        mock.expect(&expected_set, &[]);
        mock.expect(&Frame::broadcast_get().encode(), &[]);
        let sent = mock.sent();

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();
        handle.break_jumper(0x05, Some(0x1C)).await.unwrap();

        assert!(snapshot_of(&handle, 0x05).await.dirty);
        handle.poll_once().await.unwrap();
        assert!(!snapshot_of(&handle, 0x05).await.dirty);

        assert_eq!(
            sent.frames(),
            vec![expected_set, Frame::broadcast_get().encode()]
        );
    }

    #[tokio::test]
    async fn ack_response_marks_unit_online() {
        let mut mock = MockTransport::new();
        mock.expect(&Frame::broadcast_get().encode(), &ack_from(0x05));

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();

        assert!(!snapshot_of(&handle, 0x05).await.online);
        handle.poll_once().await.unwrap();

        wait_for_unit(&handle, 0x05, |s| s.online, "online").await;
    }

    #[tokio::test]
    async fn set_echo_updates_status() {
        let mut mock = MockTransport::new();
        mock.expect(
            &Frame::broadcast_get().encode(),
            &set_echo_from(0x05, ohms_to_code(6_800), 0xF2, 0x00),
        );

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();
        handle.poll_once().await.unwrap();

        let snap =
            wait_for_unit(&handle, 0x05, |s| s.resistor_ok.is_some(), "reported").await;
        assert_eq!(snap.resistor_ok, Some(true));
        assert_eq!(snap.jumpers_ok, Some(true));
        assert!(snap.working);
        assert!(snap.online);
        assert_eq!(snap.resistor_status, "ok");
        assert_eq!(snap.jumpers_status, "ok");
    }

    #[tokio::test]
    async fn frames_from_unregistered_addresses_are_dropped() {
        let mut mock = MockTransport::new();
        mock.expect(&Frame::broadcast_get().encode(), &ack_from(0x09));

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();
        handle.poll_once().await.unwrap();

        // Give the idle reader time to see (and ignore) the stray ack.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!snapshot_of(&handle, 0x05).await.connected);
    }

    #[tokio::test]
    async fn send_fails_fatally_when_port_busy() {
        let mut mock = MockTransport::new();
        mock.set_pending_out(3);

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();

        let err = handle.poll_once().await.unwrap_err();
        assert!(matches!(err, Error::PortBusy));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let handle = BusBuilder::new().build_with_transport(Box::new(MockTransport::new()));
        handle.register_unit(0x05).await.unwrap();
        let err = handle.register_unit(0x05).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(0x05)));
    }

    #[tokio::test]
    async fn unregister_unknown_address_is_rejected() {
        let handle = BusBuilder::new().build_with_transport(Box::new(MockTransport::new()));
        let err = handle.unregister_unit(0x05).await.unwrap_err();
        assert!(matches!(err, Error::UnknownUnit(0x05)));
    }

    #[tokio::test]
    async fn unregistered_unit_is_gone_from_snapshots() {
        let handle = BusBuilder::new().build_with_transport(Box::new(MockTransport::new()));
        handle.register_units(1..=3).await.unwrap();
        handle.unregister_unit(2).await.unwrap();

        let addresses: Vec<u8> = handle
            .snapshots()
            .await
            .unwrap()
            .iter()
            .map(|s| s.address)
            .collect();
        assert_eq!(addresses, vec![1, 3]);
    }

    #[tokio::test]
    async fn refresh_now_sends_direct_get() {
        let mut mock = MockTransport::new();
        mock.expect(&Frame::get(0x05).encode(), &[]);
        let sent = mock.sent();

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();
        handle.refresh_now(0x05).await.unwrap();

        assert_eq!(sent.frames(), vec![Frame::get(0x05).encode()]);
    }

    #[tokio::test]
    async fn refresh_now_unknown_unit_is_rejected() {
        let handle = BusBuilder::new().build_with_transport(Box::new(MockTransport::new()));
        let err = handle.refresh_now(0x05).await.unwrap_err();
        assert!(matches!(err, Error::UnknownUnit(0x05)));
    }

    #[tokio::test]
    async fn wants_target_echo_reloads_persisted_target() {
        // The unit reports bit7 (lost its target); the next poll tick must
        // re-command the persisted values.
        let mut mock = MockTransport::new();
        mock.expect(
            &Frame::broadcast_get().encode(),
            &set_echo_from(0x05, 0x00, 0x00, 0x80),
        );
        let reload_set = Frame::set(
            0x05,
            SetPayload {
                resistor_code: ohms_to_code(code_to_ohms(ohms_to_code(6_800))),
                jumper_value: 0xF2,
                difficulty: 0x04,
                status: 0,
            },
        )
        .encode();
        mock.expect(&reload_set, &[]);
        mock.expect(&Frame::broadcast_get().encode(), &[]);
        let sent = mock.sent();

        let handle = BusBuilder::new()
            .store(Box::new(OneTarget))
            .build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();

        handle.poll_once().await.unwrap();
        wait_for_unit(&handle, 0x05, |s| s.dirty, "dirty").await;

        handle.poll_once().await.unwrap();
        assert!(!snapshot_of(&handle, 0x05).await.dirty);
        assert_eq!(sent.frames()[1], reload_set);
    }

    #[tokio::test]
    async fn total_consumption_counts_healthy_online_units() {
        // Tick 1: the unit asks for its target back. Tick 2: the reloaded
        // target goes out and the unit confirms it healthy, so its
        // required resistance starts counting toward consumption.
        let required_code = ohms_to_code(6_800);
        let required_ohms = code_to_ohms(required_code);

        let mut mock = MockTransport::new();
        mock.expect(
            &Frame::broadcast_get().encode(),
            &set_echo_from(0x05, 0x00, 0x00, 0x80),
        );
        let reload_set = Frame::set(
            0x05,
            SetPayload {
                resistor_code: ohms_to_code(required_ohms),
                jumper_value: 0xF2,
                difficulty: 0x04,
                status: 0,
            },
        )
        .encode();
        mock.expect(&reload_set, &set_echo_from(0x05, required_code, 0xF2, 0x00));
        mock.expect(&Frame::broadcast_get().encode(), &[]);

        let handle = BusBuilder::new()
            .store(Box::new(OneTarget))
            .build_with_transport(Box::new(mock));
        handle.register_units([0x05, 0x06]).await.unwrap();

        handle.poll_once().await.unwrap();
        wait_for_unit(&handle, 0x05, |s| s.dirty, "dirty").await;
        handle.poll_once().await.unwrap();
        wait_for_unit(&handle, 0x05, |s| s.consumption > 0.0, "consuming").await;

        // Never-seen unit 0x06 contributes nothing.
        assert_eq!(snapshot_of(&handle, 0x06).await.consumption, 0.0);
        assert_eq!(
            handle.total_consumption().await.unwrap(),
            required_ohms as f64
        );
    }

    #[tokio::test]
    async fn events_are_broadcast_on_connect_and_status() {
        let mut mock = MockTransport::new();
        mock.expect(
            &Frame::broadcast_get().encode(),
            &set_echo_from(0x05, ohms_to_code(6_800), 0xF2, 0x00),
        );

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        let mut events = handle.subscribe();
        handle.register_unit(0x05).await.unwrap();
        handle.poll_once().await.unwrap();
        wait_for_unit(&handle, 0x05, |s| s.connected, "connected").await;

        let mut saw_connected = false;
        let mut saw_status = false;
        while let Ok(event) = events.try_recv() {
            match event {
                BusEvent::UnitConnected { address: 0x05 } => saw_connected = true,
                BusEvent::UnitStatusUpdated { address: 0x05 } => saw_status = true,
                _ => {}
            }
        }
        assert!(saw_connected);
        assert!(saw_status);
    }

    #[tokio::test]
    async fn shutdown_recovers_transport() {
        let handle = BusBuilder::new().build_with_transport(Box::new(MockTransport::new()));
        let transport = handle.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn start_polling_drives_poll_cycles() {
        let mut mock = MockTransport::new();
        // Strict expectations: allow a handful of poll cycles.
        for _ in 0..50 {
            mock.expect(&Frame::broadcast_get().encode(), &[]);
        }
        let sent = mock.sent();

        let handle = BusBuilder::new().build_with_transport(Box::new(mock));
        handle.register_unit(0x05).await.unwrap();

        let poller = handle.start_polling(Duration::from_millis(10));
        for _ in 0..200 {
            if sent.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        poller.abort();
        assert!(sent.len() >= 3, "poller never ran");
    }
}
