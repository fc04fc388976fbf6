//! Bus frame encoder/decoder.
//!
//! The unit bus carries compact binary command frames on a half-duplex
//! serial link. This module handles the pure byte-level encoding and
//! decoding of those frames, including checksum validation and stream
//! resynchronization after bus noise.
//!
//! # Frame format
//!
//! ```text
//! <dst> <src> <cmd> [<resistor> <jumper> <difficulty> <status>] <crcLo> <crcHi>
//! ```
//!
//! - `dst`: destination address (`0xF0` = broadcast)
//! - `src`: sender address (`0x80` = the bus master, i.e. us)
//! - `cmd`: command byte; only `Set` (0x03) carries the 4-byte payload
//! - Checksum: 16 bits over header+payload, low byte first (see
//!   [`checksum`](crate::checksum))
//!
//! There is no preamble or terminator; framing is recovered purely from the
//! length implied by the command byte plus checksum validation. When the
//! checksum fails at the current alignment, exactly one leading byte is
//! discarded and decoding restarts -- the resynchronization policy for
//! mis-sync and line noise.

use bytes::{BufMut, BytesMut};

use crate::checksum::{crc16, split};

/// Bus address of the master (this system). Always the `src_addr` of
/// outgoing frames.
pub const MASTER_ADDR: u8 = 0x80;

/// Broadcast destination address used by the poll cycle's Get.
pub const BROADCAST_ADDR: u8 = 0xF0;

/// Command byte -- positive acknowledgement from a unit.
pub const CMD_ACK: u8 = 0x00;

/// Command byte -- negative acknowledgement from a unit.
pub const CMD_NACK: u8 = 0x01;

/// Command byte -- set/report target data (carries the 4-byte payload).
pub const CMD_SET: u8 = 0x03;

/// Command byte -- request a status report.
pub const CMD_GET: u8 = 0x04;

/// The 4-byte payload carried by `Set` frames, in wire order.
///
/// Sent by the master it is the commanded target; echoed by a unit it is
/// the measured state plus the status bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPayload {
    /// Resistor analog code (see [`types::code_to_ohms`](crate::types::code_to_ohms)).
    pub resistor_code: u8,
    /// Jumper bit pattern.
    pub jumper_value: u8,
    /// Difficulty byte.
    pub difficulty: u8,
    /// Status bitfield (meaningful only in unit echoes).
    pub status: u8,
}

/// A decoded bus command.
///
/// Any command byte outside the four known codes decodes as `Unknown` but
/// still occupies a header-only 3-byte frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    NAck,
    /// Target data (master to unit) or status echo (unit to master).
    Set(SetPayload),
    /// Status request.
    Get,
    /// Unrecognized command byte, preserved for logging.
    Unknown(u8),
}

impl Command {
    /// The wire code for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Ack => CMD_ACK,
            Command::NAck => CMD_NACK,
            Command::Set(_) => CMD_SET,
            Command::Get => CMD_GET,
            Command::Unknown(code) => *code,
        }
    }
}

/// Header+payload length implied by a command byte. `Set` frames carry the
/// 4-byte payload; everything else is header-only.
fn frame_len_for(code: u8) -> usize {
    if code == CMD_SET { 7 } else { 3 }
}

/// A complete bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Destination address.
    pub dst_addr: u8,
    /// Sender address.
    pub src_addr: u8,
    /// The command, with payload for `Set`.
    pub command: Command,
}

impl Frame {
    /// Build a `Get` addressed to one unit, sent from the master.
    pub fn get(dst_addr: u8) -> Self {
        Frame {
            dst_addr,
            src_addr: MASTER_ADDR,
            command: Command::Get,
        }
    }

    /// Build the broadcast `Get` that solicits status from every unit.
    pub fn broadcast_get() -> Self {
        Self::get(BROADCAST_ADDR)
    }

    /// Build a `Set` carrying target data for one unit, sent from the master.
    pub fn set(dst_addr: u8, payload: SetPayload) -> Self {
        Frame {
            dst_addr,
            src_addr: MASTER_ADDR,
            command: Command::Set(payload),
        }
    }

    /// Header+payload length of this frame (checksum excluded).
    fn frame_len(&self) -> usize {
        frame_len_for(self.command.code())
    }

    /// Encode this frame into wire bytes, checksum included.
    ///
    /// # Example
    ///
    /// ```
    /// use repairbus_core::frame::Frame;
    ///
    /// assert_eq!(Frame::get(5).encode(), vec![0x05, 0x80, 0x04, 0xA1, 0xD0]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let len = self.frame_len();
        let mut buf = BytesMut::with_capacity(len + 2);
        buf.put_u8(self.dst_addr);
        buf.put_u8(self.src_addr);
        buf.put_u8(self.command.code());
        if let Command::Set(payload) = &self.command {
            buf.put_u8(payload.resistor_code);
            buf.put_u8(payload.jumper_value);
            buf.put_u8(payload.difficulty);
            buf.put_u8(payload.status);
        }
        let (lo, hi) = split(crc16(&buf));
        buf.put_u8(lo);
        buf.put_u8(hi);
        buf.to_vec()
    }
}

/// Result of attempting to decode a frame at the front of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete, checksum-valid frame. The `usize` is the number of bytes
    /// it occupies (header + payload + checksum).
    Frame(Frame, usize),

    /// The buffer does not yet contain a complete frame. More data is
    /// needed; nothing should be discarded.
    Incomplete,

    /// A complete frame's worth of bytes is present but the checksum does
    /// not match -- the stream is mis-aligned or noise-corrupted. The caller
    /// should drop exactly one leading byte and retry.
    CrcMismatch,
}

/// Attempt to decode one frame at the current alignment of `buf`.
///
/// Pure and non-mutating; [`extract_frame`] wraps this with the
/// drop-one-byte resynchronization loop.
pub fn decode_frame(buf: &[u8]) -> DecodeResult {
    if buf.len() < 3 {
        return DecodeResult::Incomplete;
    }
    let frame_len = frame_len_for(buf[2]);
    if buf.len() < frame_len + 2 {
        return DecodeResult::Incomplete;
    }

    let wire_crc = u16::from_le_bytes([buf[frame_len], buf[frame_len + 1]]);
    if crc16(&buf[..frame_len]) != wire_crc {
        return DecodeResult::CrcMismatch;
    }

    let command = match buf[2] {
        CMD_ACK => Command::Ack,
        CMD_NACK => Command::NAck,
        CMD_SET => Command::Set(SetPayload {
            resistor_code: buf[3],
            jumper_value: buf[4],
            difficulty: buf[5],
            status: buf[6],
        }),
        CMD_GET => Command::Get,
        other => Command::Unknown(other),
    };

    let frame = Frame {
        dst_addr: buf[0],
        src_addr: buf[1],
        command,
    };
    DecodeResult::Frame(frame, frame_len + 2)
}

/// Extract at most one complete frame from the front of `buf`, mutating it
/// in place.
///
/// On success the frame's bytes are drained and any trailing bytes are left
/// untouched for the next call. On a checksum mismatch exactly one leading
/// byte is dropped per failed attempt and decoding retries, so the loop
/// terminates in at most `buf.len()` steps. Returns `None` when no complete
/// frame is available, leaving the buffer as-is apart from resync drops.
pub fn extract_frame(buf: &mut Vec<u8>) -> Option<Frame> {
    loop {
        match decode_frame(buf) {
            DecodeResult::Frame(frame, consumed) => {
                buf.drain(..consumed);
                return Some(frame);
            }
            DecodeResult::Incomplete => return None,
            DecodeResult::CrcMismatch => {
                buf.remove(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured-traffic frames used across the decoding tests.
    fn get_frame_bytes() -> Vec<u8> {
        vec![0x05, 0x80, 0x04, 0xA1, 0xD0]
    }

    fn ack_frame_bytes() -> Vec<u8> {
        vec![0x80, 0x05, 0x00, 0x88, 0x94]
    }

    fn set_frame_bytes() -> Vec<u8> {
        vec![0x80, 0x05, 0x03, 0x68, 0xF2, 0x04, 0x80, 0x9B, 0x8E]
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_get() {
        assert_eq!(Frame::get(5).encode(), get_frame_bytes());
    }

    #[test]
    fn encode_broadcast_get() {
        let bytes = Frame::broadcast_get().encode();
        assert_eq!(bytes[0], BROADCAST_ADDR);
        assert_eq!(bytes[1], MASTER_ADDR);
        assert_eq!(bytes[2], CMD_GET);
        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn encode_set_is_seven_plus_crc() {
        let frame = Frame::set(
            0x05,
            SetPayload {
                resistor_code: 0x67,
                jumper_value: 0xF2,
                difficulty: 0x04,
                status: 0x00,
            },
        );
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 9);
        assert_eq!(&bytes[..7], &[0x05, 0x80, 0x03, 0x67, 0xF2, 0x04, 0x00]);
    }

    // ---------------------------------------------------------------
    // Decoding -- valid frames
    // ---------------------------------------------------------------

    #[test]
    fn decode_get() {
        let mut buf = get_frame_bytes();
        let frame = extract_frame(&mut buf).expect("valid Get frame");
        assert_eq!(frame.command, Command::Get);
        assert_eq!(frame.src_addr, MASTER_ADDR);
        assert_eq!(frame.dst_addr, 0x05);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_ack() {
        let mut buf = ack_frame_bytes();
        let frame = extract_frame(&mut buf).expect("valid Ack frame");
        assert_eq!(frame.command, Command::Ack);
        assert_eq!(frame.src_addr, 0x05);
    }

    #[test]
    fn decode_set_with_payload() {
        let mut buf = set_frame_bytes();
        let frame = extract_frame(&mut buf).expect("valid Set frame");
        match frame.command {
            Command::Set(payload) => {
                assert_eq!(payload.resistor_code, 0x68);
                assert_eq!(payload.jumper_value, 0xF2);
                assert_eq!(payload.difficulty, 0x04);
                assert_eq!(payload.status, 0x80);
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_command_occupies_three_bytes() {
        // cmd 0x07 is not a known code; frame is still header-only.
        let header = [0x80, 0x09, 0x07];
        let (lo, hi) = split(crc16(&header));
        let mut buf = vec![header[0], header[1], header[2], lo, hi];
        let frame = extract_frame(&mut buf).expect("unknown frame decodes");
        assert_eq!(frame.command, Command::Unknown(0x07));
        assert_eq!(frame.command.code(), 0x07);
        assert!(buf.is_empty());
    }

    // ---------------------------------------------------------------
    // Decoding -- edge cases
    // ---------------------------------------------------------------

    #[test]
    fn incomplete_frame_leaves_buffer_untouched() {
        let mut buf = get_frame_bytes();
        buf.pop();
        let before = buf.clone();
        assert_eq!(extract_frame(&mut buf), None);
        assert_eq!(buf, before);
    }

    #[test]
    fn short_buffer_is_incomplete() {
        assert_eq!(decode_frame(&[]), DecodeResult::Incomplete);
        assert_eq!(decode_frame(&[0x05]), DecodeResult::Incomplete);
        assert_eq!(decode_frame(&[0x05, 0x80]), DecodeResult::Incomplete);
    }

    #[test]
    fn trailing_byte_is_preserved() {
        let mut buf = get_frame_bytes();
        buf.push(0x00);
        let frame = extract_frame(&mut buf).expect("frame before trailing data");
        assert_eq!(frame.command, Command::Get);
        assert_eq!(frame.src_addr, MASTER_ADDR);
        assert_eq!(buf, vec![0x00]);
    }

    #[test]
    fn multiple_frames_extract_one_per_call() {
        let mut buf = get_frame_bytes();
        buf.extend_from_slice(&ack_frame_bytes());

        let first = extract_frame(&mut buf).expect("first frame");
        assert_eq!(first.command, Command::Get);
        assert_eq!(buf.len(), 5);

        let second = extract_frame(&mut buf).expect("second frame");
        assert_eq!(second.command, Command::Ack);
        assert!(buf.is_empty());
    }

    // ---------------------------------------------------------------
    // Resynchronization
    // ---------------------------------------------------------------

    #[test]
    fn resync_skips_leading_noise() {
        let mut buf = vec![0x13, 0x37];
        buf.extend_from_slice(&set_frame_bytes());
        let frame = extract_frame(&mut buf).expect("frame after noise");
        assert!(matches!(frame.command, Command::Set(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn resync_terminates_on_garbage() {
        // No valid frame anywhere; extraction must terminate with None
        // having dropped at most one byte per failed alignment.
        let mut buf: Vec<u8> = (0x10..0x30).collect();
        let original_len = buf.len();
        assert_eq!(extract_frame(&mut buf), None);
        assert!(buf.len() <= original_len);
    }

    #[test]
    fn resync_drops_exactly_one_byte_per_mismatch() {
        // A corrupted 5-byte frame: decode sees a full frame, checksum
        // fails, and one byte is dropped before the next attempt.
        let mut buf = get_frame_bytes();
        buf[4] ^= 0xFF;
        let len_before = buf.len();
        assert_eq!(decode_frame(&buf), DecodeResult::CrcMismatch);
        assert_eq!(extract_frame(&mut buf), None);
        // 5 bytes: alignments at 0 and 1 can fail a full check; alignment 2
        // onward is incomplete. At most two drops.
        assert!(buf.len() >= len_before - 2);
    }

    #[test]
    fn corrupted_first_frame_recovers_second() {
        let mut corrupted = get_frame_bytes();
        corrupted[0] ^= 0x40;
        let mut buf = corrupted;
        buf.extend_from_slice(&ack_frame_bytes());

        let frame = extract_frame(&mut buf).expect("recovers after corruption");
        assert_eq!(frame.command, Command::Ack);
        assert_eq!(frame.src_addr, 0x05);
    }

    // ---------------------------------------------------------------
    // Round trips
    // ---------------------------------------------------------------

    #[test]
    fn round_trip_get() {
        let original = Frame::get(0x0B);
        let mut buf = original.encode();
        assert_eq!(extract_frame(&mut buf), Some(original));
    }

    #[test]
    fn round_trip_set() {
        let original = Frame::set(
            0x0B,
            SetPayload {
                resistor_code: 0x2A,
                jumper_value: 0x58,
                difficulty: 0x04,
                status: 0x00,
            },
        );
        let mut buf = original.encode();
        assert_eq!(extract_frame(&mut buf), Some(original));
        assert!(buf.is_empty());
    }
}
