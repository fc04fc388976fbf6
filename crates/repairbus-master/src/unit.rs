//! Per-unit state machine.
//!
//! A [`Unit`] tracks everything the master knows about one addressable
//! repair unit: connection freshness, the last status echo, the target
//! configuration it should be holding, and the operator actions queued
//! against it. Units never touch the transport; the bus coordinator feeds
//! them decoded frames and drains their deferred work during poll ticks,
//! so all mutation happens on the coordinator's task.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use repairbus_core::frame::SetPayload;
use repairbus_core::store::TargetStore;
use repairbus_core::types::{code_to_ohms, ohms_to_code, StatusFlags, UnitTarget, DISCONNECTED_CODE};

/// A unit is considered offline this long after its last acknowledgment.
const STALE_AFTER: Duration = Duration::from_secs(2);

/// Nominal resistor values a simulated break can jump to, in ohms.
const RESISTOR_NOMINALS: [u32; 8] = [1_000, 2_000, 5_100, 6_800, 12_000, 18_000, 15_000, 51_000];

/// A unit's status echo, decoded out of a `Set` frame payload.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport {
    /// Status bitfield.
    pub status: StatusFlags,
    /// Measured resistor code.
    pub resistor_code: u8,
    /// Measured jumper pattern.
    pub jumper_value: u8,
}

impl From<SetPayload> for StatusReport {
    fn from(payload: SetPayload) -> Self {
        StatusReport {
            status: StatusFlags(payload.status),
            resistor_code: payload.resistor_code,
            jumper_value: payload.jumper_value,
        }
    }
}

/// Self-heal policy shared by every unit on a bus.
#[derive(Debug, Clone, Copy)]
pub struct RepairPolicy {
    /// Whether minor resistor drift is automatically re-asserted.
    pub auto_restore: bool,
    /// Reported resistances below this are considered a deliberate break
    /// and never auto-restored, in ohms.
    pub auto_repair_threshold_ohms: u32,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        RepairPolicy {
            auto_restore: false,
            auto_repair_threshold_ohms: 1_000,
        }
    }
}

/// Display-oriented copy of a unit's state, safe to hand across the task
/// boundary to front-end panels.
#[derive(Debug, Clone)]
pub struct UnitSnapshot {
    /// Bus address.
    pub address: u8,
    /// Acknowledged recently enough to count as reachable.
    pub online: bool,
    /// Has acknowledged at least once since registration.
    pub connected: bool,
    /// Resistor and jumpers both report OK.
    pub working: bool,
    /// Has deferred work queued for the next poll tick.
    pub dirty: bool,
    /// Resistor health; `None` until the first status echo.
    pub resistor_ok: Option<bool>,
    /// Jumper health; `None` until the first status echo.
    pub jumpers_ok: Option<bool>,
    /// Tri-state resistor health label.
    pub resistor_status: &'static str,
    /// Tri-state jumper health label.
    pub jumpers_status: &'static str,
    /// Measured vs. required resistance, human readable.
    pub resistor_value: String,
    /// Measured vs. required jumper pattern, binary.
    pub jumper_value: String,
    /// Age of the last acknowledgment, human readable.
    pub last_updated: String,
    /// Currently required resistance in ohms.
    pub required_ohms: u32,
    /// This unit's contribution to the aggregate consumption figure.
    pub consumption: f64,
}

/// State machine for one addressable unit.
pub struct Unit {
    address: u8,
    status: Option<StatusReport>,
    last_updated: Option<Instant>,
    have_connection: bool,

    // Deferred operator/protocol actions, drained by the next poll tick.
    needs_target_reload: bool,
    jumper_break_pending: bool,
    jumper_setting: Option<u8>,
    resistor_break_pending: bool,
    pending_restore_ohms: Option<u32>,

    // The configuration this unit is currently supposed to hold.
    required_jumper: u8,
    required_ohms: u32,

    // Display strings, recomputed on every status echo.
    resistor_value_string: String,
    jumper_value_string: String,
}

impl Unit {
    /// Create the state machine for a newly registered address.
    pub fn new(address: u8) -> Self {
        Unit {
            address,
            status: None,
            last_updated: None,
            have_connection: false,
            needs_target_reload: false,
            jumper_break_pending: false,
            jumper_setting: None,
            resistor_break_pending: false,
            pending_restore_ohms: None,
            required_jumper: 0,
            required_ohms: 0,
            resistor_value_string: String::new(),
            jumper_value_string: String::new(),
        }
    }

    /// Bus address of this unit.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Has this unit acknowledged at least once?
    pub fn connected(&self) -> bool {
        self.have_connection
    }

    /// Acknowledged within the staleness window?
    pub fn online(&self) -> bool {
        self.have_connection
            && self
                .last_updated
                .map(|t| t.elapsed() < STALE_AFTER)
                .unwrap_or(false)
    }

    /// Resistor and jumpers both reported OK in the last echo.
    pub fn working(&self) -> bool {
        matches!(
            self.status,
            Some(s) if s.status.resistor_ok() && s.status.jumpers_ok()
        )
    }

    /// True when any deferred action awaits the next poll tick.
    pub fn dirty(&self) -> bool {
        self.needs_target_reload
            || self.jumper_break_pending
            || self.resistor_break_pending
            || self.pending_restore_ohms.is_some()
    }

    /// The resistance this unit is currently required to hold, in ohms.
    pub fn required_ohms(&self) -> u32 {
        self.required_ohms
    }

    /// The jumper pattern this unit is currently required to hold.
    pub fn required_jumper(&self) -> u8 {
        self.required_jumper
    }

    /// This unit's contribution to the aggregate consumption figure:
    /// its required resistance, counted only while it is simultaneously
    /// online, resistor-OK, and jumpers-OK.
    pub fn consumption(&self) -> f64 {
        if self.online() && self.working() {
            self.required_ohms as f64
        } else {
            0.0
        }
    }

    /// Record a positive acknowledgment: refresh the staleness clock and
    /// latch the connected flag.
    pub fn handle_ack(&mut self) {
        self.last_updated = Some(Instant::now());
        self.have_connection = true;
    }

    /// Negative acknowledgment.
    ///
    /// Deliberately does not touch the connection state: a single NAck on a
    /// noisy bus must not flap a unit between online and offline.
    pub fn handle_nack(&mut self) {}

    /// Process a status echo from the unit.
    ///
    /// Stores the report, OR-merges the "wants fresh target" request so it
    /// survives until serviced, recomputes the display strings, evaluates
    /// self-heal eligibility, and counts as an acknowledgment.
    pub fn handle_set(&mut self, report: StatusReport, policy: &RepairPolicy) {
        self.needs_target_reload = self.needs_target_reload || report.status.wants_target();

        let mut stored = report;
        stored.status.set_wants_target(self.needs_target_reload);
        self.status = Some(stored);

        self.resistor_value_string = format!(
            "{:.1} / {:.1} kOhm",
            code_to_ohms(report.resistor_code) as f64 / 1000.0,
            self.required_ohms as f64 / 1000.0,
        );
        self.jumper_value_string =
            format!("{:08b}/{:08b}", report.jumper_value, self.required_jumper);

        if policy.auto_restore && self.should_auto_restore(&report, policy) {
            debug!(
                address = self.address,
                reported = code_to_ohms(report.resistor_code),
                required = self.required_ohms,
                "queueing auto-restore"
            );
            self.pending_restore_ohms = Some(self.required_ohms);
        }

        self.handle_ack();
    }

    /// A drifted resistor is self-healed only when the drift is minor and
    /// recoverable: the reported value differs from the requirement, sits
    /// at or above the repair threshold, and is not the open-terminals
    /// sentinel.
    fn should_auto_restore(&self, report: &StatusReport, policy: &RepairPolicy) -> bool {
        let reported_ohms = code_to_ohms(report.resistor_code);
        reported_ohms != self.required_ohms
            && reported_ohms >= policy.auto_repair_threshold_ohms
            && reported_ohms != code_to_ohms(DISCONNECTED_CODE)
    }

    /// Queue a simulated resistor break for the next poll tick.
    pub fn break_resistor(&mut self) {
        self.resistor_break_pending = true;
    }

    /// Queue a simulated jumper break for the next poll tick.
    ///
    /// With `Some(value)` the exact pattern is commanded; with `None` a
    /// fresh pattern is generated when the break is applied.
    pub fn break_jumper(&mut self, value: Option<u8>) {
        self.jumper_setting = value;
        self.jumper_break_pending = true;
    }

    /// Load persisted target values into the requirement registers.
    pub fn set_required(&mut self, saved: UnitTarget) {
        self.required_ohms = code_to_ohms(saved.resistor_code);
        self.required_jumper = saved.jumper_value;
    }

    /// Drain every pending action and return the resulting target for the
    /// bus to transmit and persist.
    ///
    /// Each step clears exactly the flag it acted on: a reload pulls the
    /// persisted target (when one exists), a jumper break applies the
    /// explicit or generated pattern, a resistor break picks a fresh
    /// nominal, and a queued auto-restore re-asserts its value last.
    pub fn perform_pending_work(
        &mut self,
        store: &dyn TargetStore,
        rng: &mut impl Rng,
    ) -> UnitTarget {
        if self.needs_target_reload {
            if let Some(saved) = store.get(self.address) {
                self.set_required(saved);
            }
            self.needs_target_reload = false;
            if let Some(status) = &mut self.status {
                status.status.set_wants_target(false);
            }
        }
        if self.jumper_break_pending {
            self.required_jumper = self
                .jumper_setting
                .unwrap_or_else(|| generate_jumper_value(rng));
            self.jumper_break_pending = false;
        }
        if self.resistor_break_pending {
            self.required_ohms = generate_resistor_value(rng, self.required_ohms);
            self.resistor_break_pending = false;
        }
        if let Some(ohms) = self.pending_restore_ohms.take() {
            self.required_ohms = ohms;
        }
        self.target()
    }

    /// The target record describing what this unit should currently hold.
    pub fn target(&self) -> UnitTarget {
        UnitTarget {
            address: self.address,
            resistor_code: ohms_to_code(self.required_ohms),
            jumper_value: self.required_jumper,
        }
    }

    /// Produce the display-facing copy of this unit's state.
    pub fn snapshot(&self) -> UnitSnapshot {
        let resistor_ok = self.status.map(|s| s.status.resistor_ok());
        let jumpers_ok = self.status.map(|s| s.status.jumpers_ok());
        UnitSnapshot {
            address: self.address,
            online: self.online(),
            connected: self.have_connection,
            working: self.working(),
            dirty: self.dirty(),
            resistor_ok,
            jumpers_ok,
            resistor_status: status_label(resistor_ok),
            jumpers_status: status_label(jumpers_ok),
            resistor_value: self.resistor_value_string.clone(),
            jumper_value: self.jumper_value_string.clone(),
            last_updated: match self.last_updated {
                None => "never".to_string(),
                Some(t) => format!("{} ms", t.elapsed().as_millis()),
            },
            required_ohms: self.required_ohms,
            consumption: self.consumption(),
        }
    }

    #[cfg(test)]
    fn backdate_last_update(&mut self, age: Duration) {
        self.last_updated = Some(Instant::now() - age);
    }
}

/// Tri-state health label.
fn status_label(state: Option<bool>) -> &'static str {
    match state {
        None => "unknown",
        Some(false) => "broken",
        Some(true) => "ok",
    }
}

/// Generate a random jumper pattern with between 3 and 5 bits set.
///
/// Patterns outside that population-count band are either trivially easy
/// or unreasonably tedious to repair, so generation rejects and re-draws.
pub fn generate_jumper_value(rng: &mut impl Rng) -> u8 {
    loop {
        let value: u8 = rng.gen();
        if (3..=5).contains(&value.count_ones()) {
            return value;
        }
    }
}

/// Pick a fresh nominal resistance, always different from `current` when
/// the nominal set allows it.
pub fn generate_resistor_value(rng: &mut impl Rng, current: u32) -> u32 {
    loop {
        let value = RESISTOR_NOMINALS[rng.gen_range(0..RESISTOR_NOMINALS.len())];
        if value != current {
            return value;
        }
    }
}
