//! Additive 16-bit frame checksum.
//!
//! The module sums the version, length, command, feedback and parameter bytes
//! and transmits the negated sum. A receiver adds the two checksum bytes back
//! in and expects zero.

use crate::frame::{CHECKSUM_HI, FRAME_SIZE};

/// First byte covered by the checksum (the version byte).
const SUM_START: usize = 1;

/// Sum the given bytes into a wrapping 16-bit accumulator.
#[inline]
fn sum16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Compute the checksum for a frame.
///
/// Only bytes 1 to 6 are read; the checksum and end bytes may hold anything.
#[inline]
#[must_use]
pub fn checksum(frame: &[u8; FRAME_SIZE]) -> u16 {
    sum16(&frame[SUM_START..CHECKSUM_HI]).wrapping_neg()
}

/// Check that bytes 1 to 8 of a frame sum to zero modulo `0x10000`.
#[inline]
#[must_use]
pub fn verify_checksum(frame: &[u8; FRAME_SIZE]) -> bool {
    let stored = u16::from_be_bytes([frame[CHECKSUM_HI], frame[CHECKSUM_HI + 1]]);
    sum16(&frame[SUM_START..CHECKSUM_HI]).wrapping_add(stored) == 0
}
