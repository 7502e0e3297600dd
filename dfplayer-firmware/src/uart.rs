//! `embedded-io-async` adapters over the RP2040 DMA UART halves.
//!
//! The DFPlayer link runs at 9600 baud, 8N1, no flow control:
//! - GPIO 0: TX (to module RX, through a 1k resistor)
//! - GPIO 1: RX (from module TX)

use embassy_rp::uart::{Async, Error as UartError, UartRx, UartTx};
use embassy_time::Timer;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

/// Busy-flag poll interval while flushing, about one bit at 9600 baud.
const FLUSH_POLL_US: u64 = 100;

/// UART failure as seen by the frame transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum UartIoError {
    Framing,
    Parity,
    Overrun,
    Break,
    Other,
}

impl embedded_io_async::Error for UartIoError {
    fn kind(&self) -> ErrorKind {
        match self {
            UartIoError::Framing | UartIoError::Parity => ErrorKind::InvalidData,
            UartIoError::Overrun => ErrorKind::OutOfMemory,
            UartIoError::Break => ErrorKind::Interrupted,
            UartIoError::Other => ErrorKind::Other,
        }
    }
}

/// Helper instead of a `From` impl: `UartError` belongs to embassy-rp.
#[inline]
fn uart_error_to_io_error(e: UartError) -> UartIoError {
    match e {
        UartError::Framing => UartIoError::Framing,
        UartError::Parity => UartIoError::Parity,
        UartError::Overrun => UartIoError::Overrun,
        UartError::Break => UartIoError::Break,
        _ => UartIoError::Other,
    }
}

/// Receive half. Every `read` fills the whole buffer.
pub struct UartReader<'d> {
    rx: UartRx<'d, Async>,
}

impl<'d> UartReader<'d> {
    #[must_use]
    pub fn new(rx: UartRx<'d, Async>) -> Self {
        Self { rx }
    }
}

impl ErrorType for UartReader<'_> {
    type Error = UartIoError;
}

impl Read for UartReader<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.rx.read(buf).await.map_err(uart_error_to_io_error)?;
        Ok(buf.len())
    }
}

/// Transmit half.
pub struct UartWriter<'d> {
    tx: UartTx<'d, Async>,
}

impl<'d> UartWriter<'d> {
    #[must_use]
    pub fn new(tx: UartTx<'d, Async>) -> Self {
        Self { tx }
    }
}

impl ErrorType for UartWriter<'_> {
    type Error = UartIoError;
}

impl Write for UartWriter<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.write(buf).await.map_err(uart_error_to_io_error)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        // DMA completion leaves bytes in the FIFO. Poll the busy flag at
        // roughly one bit time instead of spinning the executor.
        while self.tx.busy() {
            Timer::after_micros(FLUSH_POLL_US).await;
        }
        Ok(())
    }
}
