//! Platform-agnostic DFPlayer Mini transport, command engine and player.
//!
//! This crate drives a DFPlayer Mini serial MP3 module without any
//! platform-specific dependencies. UART access goes through the
//! `embedded-io-async` traits and timing through
//! `embedded_hal_async::delay::DelayNs`, so it runs on an Embassy target and
//! in host tests alike.
//!
//! # Overview
//!
//! The crate is organized in layers, leaves first:
//!
//! - [`event`]: Level-triggered set/clear flag ([`Event`])
//! - [`queue`]: Bounded frame FIFO with data/space levels ([`FrameQueue`])
//! - [`transceiver`]: UART halves ([`StreamTx`], [`StreamRx`])
//! - [`handler`]: Protocol engine ([`CommandHandler`])
//! - [`player`]: Volume scaling, cursor and playlists ([`Player`])
//! - [`config`]: Persisted settings ([`PlayerConfig`], [`ConfigStore`])
//! - [`script`]: Text command scripts ([`parse_line`], [`run_script`])
//!
//! # Tasks
//!
//! A running system has three cooperative tasks sharing one handler:
//!
//! ```text
//! rx task:        StreamRx::run(&queue)          UART -> queue
//! consumer task:  CommandHandler::run_consumer()  queue -> state/events
//! app task:       Player / CommandHandler calls   commands -> UART
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting and logging (for embedded targets)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod fmt;

pub mod config;
pub mod event;
pub mod handler;
pub mod player;
pub mod queue;
pub mod script;
pub mod transceiver;

#[cfg(test)]
mod mock;

// Re-export main types at crate root
pub use config::{ConfigError, ConfigStore, MemoryConfigStore, PlayerConfig};
pub use event::Event;
pub use handler::{
    CommandError, CommandHandler, DeviceError, HandlerConfig, PlaybackStatus, Query, RxError, State,
};
pub use player::{Player, PlayerError, USER_VOLUME_MAX};
pub use queue::{FrameQueue, QueueError};
pub use script::{parse_line, run_script, RunError, ScriptCommand, ScriptError, ScriptLine};
pub use transceiver::{LinkError, OverflowPolicy, StreamRx, StreamTx};

pub use dfplayer_proto as proto;
