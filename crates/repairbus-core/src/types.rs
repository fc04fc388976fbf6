//! Wire-adjacent value types shared across the workspace.

/// Resistor code reported by a unit whose measurement terminals are open
/// (nothing connected). Maps to an absurdly large resistance through
/// [`code_to_ohms`].
pub const DISCONNECTED_CODE: u8 = 0xFF;

/// Status bitfield echoed by units in `Set` frames.
///
/// Fault bits are active-high: a *clear* bit 5 means the resistor matches
/// its commanded value, a *clear* bit 6 means the jumpers match. Bit 7 set
/// means the unit lost its target data (e.g. after a power cycle) and asks
/// the master to re-send it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    const RESISTOR_FAULT: u8 = 1 << 5;
    const JUMPERS_FAULT: u8 = 1 << 6;
    const WANTS_TARGET: u8 = 1 << 7;

    /// True when the unit reports its resistor at the commanded value.
    pub fn resistor_ok(self) -> bool {
        self.0 & Self::RESISTOR_FAULT == 0
    }

    /// True when the unit reports its jumpers at the commanded pattern.
    pub fn jumpers_ok(self) -> bool {
        self.0 & Self::JUMPERS_FAULT == 0
    }

    /// True when the unit requests fresh target data from the master.
    pub fn wants_target(self) -> bool {
        self.0 & Self::WANTS_TARGET != 0
    }

    /// Set or clear the "wants fresh target data" bit.
    pub fn set_wants_target(&mut self, on: bool) {
        if on {
            self.0 |= Self::WANTS_TARGET;
        } else {
            self.0 &= !Self::WANTS_TARGET;
        }
    }
}

/// The per-address record persisted for each unit: the last target
/// configuration the master commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTarget {
    /// Unit bus address.
    pub address: u8,
    /// Commanded resistor code (see [`ohms_to_code`]).
    pub resistor_code: u8,
    /// Commanded jumper bit pattern.
    pub jumper_value: u8,
}

/// Encode a resistance in ohms as the wire byte.
///
/// The units measure their resistor through a 10 kΩ divider, so the code is
/// `256·Ω / (Ω + 10000)` with integer truncation. Must stay bit-identical
/// to the unit firmware or commanded targets will read back as faults.
pub fn ohms_to_code(ohms: u32) -> u8 {
    ((256 * ohms) / (ohms + 10_000)) as u8
}

/// Decode a wire byte back to a resistance in ohms.
///
/// Inverse of [`ohms_to_code`] up to integer truncation.
pub fn code_to_ohms(code: u8) -> u32 {
    10_000 * u32::from(code) / (256 - u32::from(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits_all_clear_is_healthy() {
        let s = StatusFlags(0);
        assert!(s.resistor_ok());
        assert!(s.jumpers_ok());
        assert!(!s.wants_target());
    }

    #[test]
    fn status_bit5_is_resistor_fault() {
        assert!(!StatusFlags(0x20).resistor_ok());
        assert!(StatusFlags(0x20).jumpers_ok());
    }

    #[test]
    fn status_bit6_is_jumpers_fault() {
        assert!(!StatusFlags(0x40).jumpers_ok());
        assert!(StatusFlags(0x40).resistor_ok());
    }

    #[test]
    fn status_bit7_requests_target() {
        assert!(StatusFlags(0x80).wants_target());
    }

    #[test]
    fn set_wants_target_touches_only_bit7() {
        let mut s = StatusFlags(0x60);
        s.set_wants_target(true);
        assert_eq!(s.0, 0xE0);
        s.set_wants_target(false);
        assert_eq!(s.0, 0x60);
    }

    #[test]
    fn ohm_mapping_nominals() {
        assert_eq!(ohms_to_code(1_000), 0x17);
        assert_eq!(ohms_to_code(6_800), 0x67);
        assert_eq!(ohms_to_code(51_000), 0xD6);
    }

    #[test]
    fn ohm_mapping_round_trip_is_monotone_and_close() {
        // Integer truncation loses a little; the round trip must stay
        // within a few percent and preserve ordering.
        let nominals = [1_000, 2_000, 5_100, 6_800, 12_000, 15_000, 18_000, 51_000];
        let mut last = 0;
        for &ohms in &nominals {
            let back = code_to_ohms(ohms_to_code(ohms));
            assert!(back > last, "mapping must be monotone");
            let err = ohms.abs_diff(back);
            assert!(
                err * 20 < ohms,
                "round trip of {ohms} drifted to {back}"
            );
            last = back;
        }
    }

    #[test]
    fn disconnected_code_maps_far_beyond_nominals() {
        assert_eq!(code_to_ohms(DISCONNECTED_CODE), 2_550_000);
    }
}
