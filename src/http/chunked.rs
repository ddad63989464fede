//! Chunked transfer coding decoder
//!
//! Decodes an RFC 2616 chunked body: each chunk starts with a
//! hexadecimal size line, a size of zero marks the last chunk, and any
//! trailers after it are drained without being delivered.

use super::connection::Connection;
use super::scanner::BufferedScanner;
use super::{Error, Result};

#[derive(Default)]
struct Chunk {
    len: u64,
    red: u64,
    last: bool,
}

impl Chunk {
    fn done(&self) -> bool {
        self.red == self.len
    }
}

/// Decoder for chunked transfer coding
///
/// Owns the scanner (and through it the connection); closing the reader
/// closes the connection.
pub struct ChunkedReader<C: Connection> {
    scanner: BufferedScanner<C>,
    chunk: Chunk,
    err: Option<Error>,
}

impl<C: Connection> ChunkedReader<C> {
    pub(crate) fn new(scanner: BufferedScanner<C>) -> Self {
        ChunkedReader {
            scanner,
            chunk: Chunk::default(),
            err: None,
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.err {
            return err.replay();
        }

        let mut red = 0;
        while red < dst.len() {
            // After the size-zero chunk, the rest of the message is
            // trailers which the caller never sees
            if self.chunk.last {
                self.drain_trailers();
                return Ok(red);
            }

            if self.chunk.done() {
                if let Err(err) = self.load_next_chunk() {
                    if red > 0 {
                        return Ok(red);
                    }
                    return Err(err);
                }
                continue;
            }

            match self.read_chunk(&mut dst[red..]) {
                Ok(n) => red += n,
                Err(err) => {
                    if red > 0 {
                        return Ok(red);
                    }
                    return Err(err);
                }
            }
        }
        Ok(red)
    }

    /// Copies chunk data byte by byte until the chunk or `dst` is
    /// exhausted, then consumes the CRLF that terminates the chunk data.
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut red = 0;
        while self.chunk.red < self.chunk.len && red < dst.len() {
            match self.scanner.next_byte() {
                Ok(byte) => {
                    dst[red] = byte;
                    red += 1;
                    self.chunk.red += 1;
                }
                Err(err) => {
                    let err = Error::MalformedChunk {
                        source: Box::new(err),
                    };
                    self.err = Some(err.clone());
                    return Err(err);
                }
            }
        }

        if self.chunk.done() {
            self.scanner.next_line().ok();
        }
        Ok(red)
    }

    fn load_next_chunk(&mut self) -> Result<()> {
        let (line, _) = match self.scanner.next_line() {
            Ok(line) => line,
            Err(err) => {
                self.err = Some(err.clone());
                return Err(err);
            }
        };

        // The size is hexadecimal and may carry a ";ext=val" extension
        let size = line.split(';').next().unwrap_or_default().trim();
        let len = match u64::from_str_radix(size, 16) {
            Ok(len) => len,
            Err(_) => {
                let err = Error::MalformedChunk {
                    source: Box::new(Error::InvalidChunkSize(size.to_string())),
                };
                self.err = Some(err.clone());
                return Err(err);
            }
        };

        self.chunk = Chunk {
            len,
            red: 0,
            last: len == 0,
        };
        Ok(())
    }

    /// Consumes trailers and the final empty line, then records end of
    /// stream.
    fn drain_trailers(&mut self) {
        loop {
            match self.scanner.next_line() {
                Ok((line, _)) if line.is_empty() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        self.err = Some(Error::Eof);
    }

    pub fn close(&mut self) -> Result<()> {
        self.err = Some(Error::ResponseBodyClosed);
        self.scanner.get_mut().close()
    }
}
