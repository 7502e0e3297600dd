//! In-memory UART endpoints and delays for host tests.

extern crate std;

use core::cell::RefCell;
use core::convert::Infallible;
use std::rc::Rc;
use std::vec::Vec;

use dfplayer_proto::{Frame, Opcode, RawFrame, FRAME_SIZE};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

/// A frame as the device would send it.
pub fn device_frame(opcode: Opcode, param: u16) -> RawFrame {
    Frame::pack(opcode, param)
}

/// Records every byte written; clones share the same log.
#[derive(Clone, Default)]
pub struct MockWriter {
    pub written: Rc<RefCell<Vec<u8>>>,
    pub flushes: Rc<RefCell<usize>>,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.written.borrow().len()
    }

    pub fn frame_count(&self) -> usize {
        self.len() / FRAME_SIZE
    }

    /// The `index`-th frame written.
    pub fn frame(&self, index: usize) -> RawFrame {
        let written = self.written.borrow();
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&written[index * FRAME_SIZE..(index + 1) * FRAME_SIZE]);
        frame
    }

    /// The `index`-th frame written, decoded.
    pub fn sent(&self, index: usize) -> Frame {
        Frame::unpack(&self.frame(index)).unwrap()
    }

    pub fn last_sent(&self) -> Frame {
        self.sent(self.frame_count() - 1)
    }
}

impl ErrorType for MockWriter {
    type Error = Infallible;
}

impl Write for MockWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        *self.flushes.borrow_mut() += 1;
        Ok(())
    }
}

/// Hands out scripted chunks, then reports end of stream.
pub struct MockReader {
    chunks: Vec<Result<Vec<u8>, ErrorKind>>,
    current: Vec<u8>,
}

impl MockReader {
    pub fn new(mut chunks: Vec<Result<Vec<u8>, ErrorKind>>) -> Self {
        chunks.reverse();
        Self {
            chunks,
            current: Vec::new(),
        }
    }
}

impl ErrorType for MockReader {
    type Error = ErrorKind;
}

impl Read for MockReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.current.is_empty() {
            match self.chunks.pop() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.drain(..n);
        Ok(n)
    }
}

/// Completes every delay immediately and records the milliseconds asked for.
#[derive(Clone, Default)]
pub struct InstantDelay {
    pub calls: Rc<RefCell<Vec<u32>>>,
}

impl InstantDelay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DelayNs for InstantDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.calls.borrow_mut().push(ms);
    }
}

/// A delay that never elapses.
#[derive(Clone, Copy, Default)]
pub struct NeverDelay;

impl DelayNs for NeverDelay {
    async fn delay_ns(&mut self, _ns: u32) {
        core::future::pending::<()>().await
    }
}
