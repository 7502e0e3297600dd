//! DFPlayer Mini controller for RP2040.
//!
//! Board glue around [`dfplayer_core`]: the UART adapters that feed the
//! frame transceiver and a flash-backed settings store.
//!
//! # Hardware Configuration
//!
//! | Function | GPIO | Description |
//! |----------|------|-------------|
//! | UART0 TX | 0    | To DFPlayer RX (9600 baud, 8N1) |
//! | UART0 RX | 1    | From DFPlayer TX |
//! | LED      | 25   | On-board LED (toggles on device error reports) |
//!
//! # Architecture
//!
//! The firmware runs four Embassy tasks:
//!
//! - **RX Task**: Reads 10-byte frames from UART into the frame queue
//! - **Consumer Task**: Drains the queue into handler state and events
//! - **Player Task**: Loads settings, resets the module and runs the script
//! - **LED Task**: Toggles the on-board LED on every device error report
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent watchdog reset)

#![no_std]

pub use dfplayer_core::{
    run_script, CommandError, CommandHandler, ConfigStore, FrameQueue, HandlerConfig, Player,
    PlayerConfig, PlayerError, StreamRx, USER_VOLUME_MAX,
};

pub mod flash_store;
pub mod uart;

pub use flash_store::FlashConfigStore;
pub use uart::{UartIoError, UartReader, UartWriter};
