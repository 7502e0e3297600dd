//! Frame packing and unpacking.
//!
//! Frame format (10 bytes, multi-byte fields big-endian):
//! - START (1 byte): 0x7E
//! - VERSION (1 byte): 0xFF
//! - LENGTH (1 byte): 0x06, bytes from VERSION to PARAMETER
//! - COMMAND (1 byte): [`Opcode`]
//! - FEEDBACK (1 byte): 0x01 requests an acknowledgement
//! - PARAMETER (2 bytes)
//! - CHECKSUM (2 bytes): negated sum of bytes 1 to 6
//! - END (1 byte): 0xEF

use crate::checksum::{checksum, verify_checksum};
use crate::opcode::Opcode;

/// Size of every frame on the wire.
pub const FRAME_SIZE: usize = 10;

/// Frame start byte.
pub const FRAME_START: u8 = 0x7E;

/// Protocol version byte.
pub const FRAME_VERSION: u8 = 0xFF;

/// Value of the length byte.
pub const FRAME_LENGTH: u8 = 0x06;

/// Feedback byte requesting an [`Opcode::Ack`] for every command.
pub const FEEDBACK_ACK: u8 = 0x01;

/// Frame end byte.
pub const FRAME_END: u8 = 0xEF;

/// Raw wire bytes of one frame.
pub type RawFrame = [u8; FRAME_SIZE];

// Byte indices
pub(crate) const START: usize = 0;
pub(crate) const VERSION: usize = 1;
pub(crate) const LENGTH: usize = 2;
pub(crate) const COMMAND: usize = 3;
pub(crate) const FEEDBACK: usize = 4;
pub(crate) const PARAM_HI: usize = 5;
pub(crate) const CHECKSUM_HI: usize = 7;
pub(crate) const END: usize = 9;

/// Fixed bytes of an outgoing frame.
const TEMPLATE: [u8; FRAME_SIZE] = [
    FRAME_START,
    FRAME_VERSION,
    FRAME_LENGTH,
    0x00,
    FEEDBACK_ACK,
    0x00,
    0x00,
    0x00,
    0x00,
    FRAME_END,
];

/// Errors that can occur while unpacking a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Buffer is not exactly [`FRAME_SIZE`] bytes
    Length,
    /// Checksum does not cancel the byte sum
    Checksum,
    /// Start, length or end byte is wrong
    Malformed,
    /// Command byte is not in the opcode table
    UnknownOpcode(u8),
}

/// A decoded command or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub opcode: Opcode,
    pub param: u16,
}

impl Frame {
    #[inline]
    #[must_use]
    pub const fn new(opcode: Opcode, param: u16) -> Self {
        Self { opcode, param }
    }

    /// Pack an opcode and parameter into wire bytes.
    ///
    /// The feedback byte is always set, so the module acknowledges every
    /// command it receives.
    #[must_use]
    pub fn pack(opcode: Opcode, param: u16) -> RawFrame {
        let mut bytes = TEMPLATE;
        bytes[COMMAND] = opcode.as_u8();
        bytes[PARAM_HI..CHECKSUM_HI].copy_from_slice(&param.to_be_bytes());
        let sum = checksum(&bytes);
        bytes[CHECKSUM_HI..END].copy_from_slice(&sum.to_be_bytes());
        bytes
    }

    /// Encode this frame into wire bytes.
    #[inline]
    #[must_use]
    pub fn encode(&self) -> RawFrame {
        Self::pack(self.opcode, self.param)
    }

    /// Unpack and validate a received frame.
    ///
    /// The checksum is verified before anything else in the frame is trusted;
    /// a frame failing it is reported as [`FrameError::Checksum`] even if its
    /// framing bytes are also damaged.
    pub fn unpack(bytes: &[u8]) -> Result<Self, FrameError> {
        let bytes: &[u8; FRAME_SIZE] = bytes.try_into().map_err(|_| FrameError::Length)?;

        if !verify_checksum(bytes) {
            return Err(FrameError::Checksum);
        }

        if bytes[START] != FRAME_START || bytes[LENGTH] != FRAME_LENGTH || bytes[END] != FRAME_END
        {
            return Err(FrameError::Malformed);
        }

        let opcode = Opcode::try_from(bytes[COMMAND]).map_err(FrameError::UnknownOpcode)?;
        let param = u16::from_be_bytes([bytes[PARAM_HI], bytes[PARAM_HI + 1]]);

        Ok(Self { opcode, param })
    }

    /// Whether the raw bytes request an acknowledgement.
    #[inline]
    #[must_use]
    pub fn wants_ack(bytes: &RawFrame) -> bool {
        bytes[FEEDBACK] == FEEDBACK_ACK
    }

    /// Version byte of raw frame bytes.
    #[inline]
    #[must_use]
    pub fn version(bytes: &RawFrame) -> u8 {
        bytes[VERSION]
    }
}
