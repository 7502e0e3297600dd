//! UART stream transmit and receive halves.
//!
//! [`StreamTx`] writes whole frames and waits for the write to flush.
//! [`StreamRx`] reads fixed-size frames from the UART and feeds them into a
//! [`FrameQueue`]; it is the only producer for that queue.

use dfplayer_proto::{RawFrame, FRAME_SIZE, FRAME_START};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::{Read, ReadExactError, Write};

use crate::queue::FrameQueue;

/// Error type for link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// UART/communication I/O error.
    Io,
    /// Stream ended before a whole frame arrived.
    ShortRead,
    /// No start byte anywhere in the bytes read.
    Misaligned,
}

/// What the receive loop does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverflowPolicy {
    /// Stop reading until the consumer frees a slot.
    #[default]
    Backpressure,
    /// Drop the new frame and keep reading.
    Drop,
}

/// Transmit half: writes frames to the UART.
pub struct StreamTx<W> {
    writer: W,
}

impl<W: Write> StreamTx<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and wait until it has left the buffer.
    pub async fn send(&mut self, frame: &RawFrame) -> Result<(), LinkError> {
        self.writer.write_all(frame).await.map_err(|_| LinkError::Io)?;
        self.writer.flush().await.map_err(|_| LinkError::Io)
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Receive half: reads frames from the UART into a queue.
pub struct StreamRx<R> {
    reader: R,
    policy: OverflowPolicy,
}

impl<R: Read> StreamRx<R> {
    /// Create a receiver that applies backpressure when the queue is full.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self::with_policy(reader, OverflowPolicy::Backpressure)
    }

    #[must_use]
    pub fn with_policy(reader: R, policy: OverflowPolicy) -> Self {
        Self { reader, policy }
    }

    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        self.reader.read_exact(buf).await.map_err(|e| match e {
            ReadExactError::UnexpectedEof => LinkError::ShortRead,
            ReadExactError::Other(_) => LinkError::Io,
        })
    }

    /// Read exactly one frame's worth of bytes.
    ///
    /// If the bytes read do not begin with the start byte, everything before
    /// the next start byte is dropped and the frame is completed with fresh
    /// bytes, so one glitch does not shift every later frame.
    pub async fn read_frame(&mut self) -> Result<RawFrame, LinkError> {
        let mut frame = [0u8; FRAME_SIZE];
        self.fill(&mut frame).await?;

        if frame[0] != FRAME_START {
            let offset = frame
                .iter()
                .position(|&b| b == FRAME_START)
                .ok_or(LinkError::Misaligned)?;
            trace!("resync: dropping {} bytes", offset);
            frame.copy_within(offset.., 0);
            self.fill(&mut frame[FRAME_SIZE - offset..]).await?;
        }

        Ok(frame)
    }

    /// Read one frame and hand it to the queue.
    ///
    /// Returns `Ok(false)` if the frame was dropped because the queue was full
    /// under [`OverflowPolicy::Drop`].
    pub async fn receive_one<M: RawMutex, const N: usize>(
        &mut self,
        queue: &FrameQueue<M, N>,
    ) -> Result<bool, LinkError> {
        let frame = self.read_frame().await?;
        match self.policy {
            OverflowPolicy::Backpressure => {
                queue.push(frame).await;
                Ok(true)
            }
            OverflowPolicy::Drop => match queue.try_push(frame) {
                Ok(()) => Ok(true),
                Err(_) => {
                    warn!("rx queue overflow, frame dropped");
                    Ok(false)
                }
            },
        }
    }

    /// Run the receive loop forever.
    ///
    /// Short reads and misaligned bytes are line glitches and are discarded
    /// quietly; I/O errors are logged and reading continues.
    pub async fn run<M: RawMutex, const N: usize>(&mut self, queue: &FrameQueue<M, N>) -> ! {
        loop {
            match self.receive_one(queue).await {
                Ok(_) => {}
                Err(LinkError::ShortRead) | Err(LinkError::Misaligned) => {
                    trace!("partial frame discarded");
                }
                Err(e) => {
                    warn!("uart read error: {}", e);
                }
            }
        }
    }
}
