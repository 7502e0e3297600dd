//! Serial protocol for the DFPlayer Mini audio module.
//!
//! The module and its host exchange fixed 10-byte frames in both directions:
//!
//! ```text
//! ┌───────┬─────────┬────────┬─────────┬──────────┬───────────┬──────────┬──────┐
//! │ START │ VERSION │ LENGTH │ COMMAND │ FEEDBACK │ PARAMETER │ CHECKSUM │ END  │
//! │ 0x7E  │ 0xFF    │ 0x06   │ 1B      │ 0x01     │ 2B (BE)   │ 2B (BE)  │ 0xEF │
//! └───────┴─────────┴────────┴─────────┴──────────┴───────────┴──────────┴──────┘
//! ```
//!
//! The checksum is the 16-bit two's complement of the sum of bytes 1 to 6, so
//! the sum of bytes 1 to 8 of a valid frame is zero modulo `0x10000`.
//!
//! - [`frame`]: packing and unpacking ([`Frame`], [`FrameError`])
//! - [`opcode`]: the closed command table ([`Opcode`])
//! - [`checksum`]: the additive frame checksum
//! - [`eq`]: equalizer presets ([`Equalizer`])
//!
//! # Example
//!
//! ```
//! use dfplayer_proto::{Frame, Opcode};
//!
//! let bytes = Frame::pack(Opcode::VolSet, 15);
//! assert_eq!(bytes[3], 0x06);
//! assert_eq!(Frame::unpack(&bytes), Ok(Frame::new(Opcode::VolSet, 15)));
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//! - **`serde`**: Derive serde traits for [`Equalizer`]

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod checksum;
pub mod eq;
pub mod frame;
pub mod opcode;

pub use checksum::{checksum, verify_checksum};
pub use eq::Equalizer;
pub use frame::{
    Frame, FrameError, RawFrame, FEEDBACK_ACK, FRAME_END, FRAME_LENGTH, FRAME_SIZE,
    FRAME_START, FRAME_VERSION,
};
pub use opcode::{Opcode, STORAGE_SD_CARD};

/// Default UART baud rate of the module (8N1).
pub const BAUD_RATE: u32 = 9_600;

/// Highest volume level the module accepts.
pub const VOLUME_MAX: u8 = 30;
