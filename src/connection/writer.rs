//! Flow-Controlled Request Writer
//!
//! The writer owns one fixed-capacity buffer, sized to the socket's send
//! buffer, and never blocks. Flow control is expressed entirely through the
//! return values of [`prepare`](RequestWriter::prepare) and
//! [`add`](RequestWriter::add):
//!
//! ```text
//!   prepare() ──false──> stop offering commands, keep write interest
//!      │
//!     true
//!      ▼
//!   add(cmd) ──false──> remainder kept for the next prepare()
//!      │
//!     true ──> offer the next command
//!
//!   write() ──partial──> draining: prepare() refuses until it clears
//! ```

use super::buffer::CommandBuffer;
use super::config::DEFAULT_SEND_BUFFER_SIZE;
use bytes::Bytes;
use std::io;
use tokio::net::TcpStream;
use tracing::trace;

/// A socket that can be written to without waiting.
pub trait NonBlockingWrite {
    /// Writes what the OS will take right now. `WouldBlock` when it takes
    /// nothing.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl NonBlockingWrite for TcpStream {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

#[derive(Debug)]
pub struct RequestWriter {
    buffer: Vec<u8>,
    capacity: usize,
    /// Bytes at the front of `buffer` already handed to the socket
    flushed: usize,
    draining: bool,
    /// Tail of a command that did not fit
    pending: Option<Bytes>,
}

impl RequestWriter {
    /// Creates a writer holding at most `capacity` bytes (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            flushed: 0,
            draining: false,
            pending: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True while a previous write left bytes behind.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// True if anything is still waiting to reach the socket.
    pub fn has_pending(&self) -> bool {
        self.flushed < self.buffer.len() || self.pending.is_some()
    }

    /// Returns true if the writer will take another command.
    ///
    /// Resumes buffering the tail of a partially added command first, and
    /// only reports ready once all of it is buffered.
    pub fn prepare(&mut self) -> bool {
        if self.draining {
            return false;
        }

        match self.pending.take() {
            Some(remainder) => self.buffer_bytes(remainder),
            None => self.buffer.len() < self.capacity,
        }
    }

    /// Buffers as much of `command` as fits.
    ///
    /// Returns false if some of it had to be held back; the caller must stop
    /// offering commands until [`prepare`](Self::prepare) says otherwise.
    pub fn add(&mut self, command: &CommandBuffer) -> bool {
        if self.draining || self.pending.is_some() {
            return false;
        }
        self.buffer_bytes(command.request().clone())
    }

    fn buffer_bytes(&mut self, bytes: Bytes) -> bool {
        let room = self.capacity - self.buffer.len();
        if bytes.len() <= room {
            self.buffer.extend_from_slice(&bytes);
            return true;
        }

        self.buffer.extend_from_slice(&bytes[..room]);
        self.pending = Some(bytes.slice(room..));
        false
    }

    /// Makes one non-blocking write attempt.
    ///
    /// # Returns
    ///
    /// The number of bytes the socket took, possibly zero.
    pub fn write<W: NonBlockingWrite + ?Sized>(&mut self, io: &W) -> io::Result<usize> {
        if self.flushed == self.buffer.len() {
            return Ok(0);
        }

        let written = match io.try_write(&self.buffer[self.flushed..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.draining = true;
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        self.flushed += written;
        if self.flushed == self.buffer.len() {
            self.buffer.clear();
            self.flushed = 0;
            self.draining = false;
        } else {
            self.draining = true;
        }

        trace!(
            bytes = written,
            draining = self.draining,
            "Wrote request bytes"
        );
        Ok(written)
    }
}

impl Default for RequestWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_BUFFER_SIZE)
    }
}
