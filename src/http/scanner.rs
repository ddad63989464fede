//! Buffered byte scanner
//!
//! Response decoding needs to switch between line-oriented reads (status
//! line, headers, chunk sizes), single-byte reads (chunk data), and bulk
//! reads (body copies) over the same stream without losing track of how
//! many bytes each operation consumed. Off-the-shelf buffered readers
//! commit to one split discipline up front, so the scanner keeps its own
//! bounded buffer and offers all three access styles over it.

use super::{Error, Result, DEFAULT_BUF_SIZE, MAX_BUF_SIZE, MIN_BUF_SIZE};
use std::io::{self, Read};

/// Buffered scanner over a byte source
///
/// The buffer has a fixed capacity; a read cursor divides it into a
/// consumed region and an unread region. Once the source fails (or hits
/// end of stream) the error is recorded and the remaining buffered bytes
/// can still be drained before the error surfaces.
pub struct BufferedScanner<R> {
    source: R,
    buf: Buffer,
    err: Option<Error>,
}

struct Buffer {
    data: Vec<u8>,
    /// Start of the unread region; `data[..cursor]` has been consumed.
    cursor: usize,
    /// End of the unread region; `data[filled..]` is free space.
    filled: usize,
}

impl<R: Read> BufferedScanner<R> {
    /// Creates a scanner with the default 1 MiB buffer.
    pub fn new(source: R) -> Self {
        Self::with_capacity(source, DEFAULT_BUF_SIZE)
    }

    /// Creates a scanner with a buffer of `size` bytes, clamped into
    /// [`MIN_BUF_SIZE`, `MAX_BUF_SIZE`].
    pub fn with_capacity(source: R, size: usize) -> Self {
        let capacity = size.clamp(MIN_BUF_SIZE, MAX_BUF_SIZE);
        BufferedScanner {
            source,
            buf: Buffer {
                data: vec![0; capacity],
                cursor: 0,
                filled: 0,
            },
            err: None,
        }
    }

    /// Returns the next line with the trailing `\r\n` (or `\n`) stripped,
    /// along with the number of raw bytes consumed including the
    /// terminator.
    ///
    /// Fails with [`Error::LineTooLong`] when the buffer fills up without
    /// a newline in sight, and with [`Error::NoNewLinesLeft`] when the
    /// source ends before the next newline.
    pub fn next_line(&mut self) -> Result<(String, usize)> {
        loop {
            if self.cannot_read_anymore() {
                return Err(self.sticky());
            }
            self.load_empty();

            if let Some(i) = find_newline(&self.buf.data[self.buf.cursor..self.buf.filled]) {
                let raw = &self.buf.data[self.buf.cursor..self.buf.cursor + i];
                let line = String::from_utf8_lossy(raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.buf.cursor += i + 1;
                return Ok((line, i + 1));
            }

            if self.err.is_some() {
                // The source is done and the leftover bytes hold no newline
                return Err(Error::NoNewLinesLeft);
            }
            if self.buf.cursor == 0 && self.buf.filled == self.buf.data.len() {
                return Err(Error::LineTooLong);
            }

            // Discard the consumed region and pull more bytes in, then
            // scan again
            self.load();
        }
    }

    /// Returns the byte at the cursor and advances past it.
    pub fn next_byte(&mut self) -> Result<u8> {
        loop {
            if self.cannot_read_anymore() {
                return Err(self.sticky());
            }
            self.load_empty();

            if self.buf.cursor < self.buf.filled {
                let byte = self.buf.data[self.buf.cursor];
                self.buf.cursor += 1;
                return Ok(byte);
            }
            self.load();
        }
    }

    /// Copies unread bytes into `dst`, reloading from the source until
    /// `dst` is full or the source is exhausted. Returns `Ok(0)` at end
    /// of stream; a non-EOF source error surfaces once the buffered bytes
    /// have been drained.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let mut red = 0;
        while red < dst.len() {
            if self.buf.cursor < self.buf.filled {
                let n = (dst.len() - red).min(self.buf.filled - self.buf.cursor);
                dst[red..red + n]
                    .copy_from_slice(&self.buf.data[self.buf.cursor..self.buf.cursor + n]);
                self.buf.cursor += n;
                red += n;
                continue;
            }
            if self.err.is_some() {
                if red > 0 {
                    return Ok(red);
                }
                return self.sticky().replay();
            }
            self.load();
        }
        Ok(red)
    }

    /// Access to the underlying source, e.g. to close a connection or
    /// adjust its read timeout.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    /// Shared access to the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    fn load_empty(&mut self) {
        if self.buf.cursor == self.buf.filled && self.err.is_none() {
            self.load();
        }
    }

    /// Moves the unread region to the front of the buffer and fills the
    /// tail from the source. A source failure (or end of stream) is
    /// recorded rather than raised so the buffered bytes stay readable.
    fn load(&mut self) {
        self.buf.data.copy_within(self.buf.cursor..self.buf.filled, 0);
        self.buf.filled -= self.buf.cursor;
        self.buf.cursor = 0;

        match self.source.read(&mut self.buf.data[self.buf.filled..]) {
            Ok(0) => self.err = Some(Error::Eof),
            Ok(n) => self.buf.filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => self.err = Some(Error::Io(err)),
        }
    }

    fn cannot_read_anymore(&self) -> bool {
        self.err.is_some() && self.buf.cursor == self.buf.filled
    }

    fn sticky(&self) -> Error {
        self.err.clone().unwrap_or(Error::Eof)
    }
}

/// Position of the next `\n` in the unread region.
fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

impl<R: Read> Read for BufferedScanner<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BufferedScanner::read(self, buf).map_err(io::Error::from)
    }
}
