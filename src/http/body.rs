//! Response body readers
//!
//! The framer picks exactly one way of delimiting the response body and
//! hands it the connection (wrapped in the scanner). The body owns that
//! chain: closing the body closes the connection. Bodies whose transfer
//! length is zero never touch the connection at all.

use super::chunked::ChunkedReader;
use super::connection::Connection;
use super::gzip::GzipReader;
use super::multipart::MultipartByterangesReader;
use super::scanner::BufferedScanner;
use super::{Error, Result};
use std::io::{self, Read};
use std::time::Duration;

/// Grace period for the first byte of a connection-close body.
pub const INITIAL_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle period re-armed after every non-empty read of a connection-close
/// body.
pub const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(5);

type Conn = Box<dyn Connection>;

/// Handle to a response body
///
/// `read` yields `Ok(0)` once the body is fully delivered. After
/// `close`, reads fail with [`Error::ResponseBodyClosed`]. The
/// [`std::io::Read`] implementation allows `read_to_end` and `io::copy`.
pub struct Body {
    inner: BodyKind,
}

/// One decoder per framing mode, plus the gzip layer
enum BodyKind {
    Empty,
    Length(ContentLengthReader<Conn>),
    Chunked(ChunkedReader<Conn>),
    Multipart(MultipartByterangesReader<BufferedScanner<Conn>>),
    Infinite(InfiniteReader<Conn>),
    Gzip(GzipReader),
}

impl Body {
    /// A body with no content; does not hold a connection.
    pub(crate) fn empty() -> Self {
        Body {
            inner: BodyKind::Empty,
        }
    }

    pub(crate) fn length(scanner: BufferedScanner<Conn>, declared: u64) -> Self {
        Body {
            inner: BodyKind::Length(ContentLengthReader::new(scanner, declared)),
        }
    }

    pub(crate) fn chunked(scanner: BufferedScanner<Conn>) -> Self {
        Body {
            inner: BodyKind::Chunked(ChunkedReader::new(scanner)),
        }
    }

    pub(crate) fn multipart(scanner: BufferedScanner<Conn>, boundary: String) -> Self {
        Body {
            inner: BodyKind::Multipart(MultipartByterangesReader::new(scanner, boundary)),
        }
    }

    pub(crate) fn infinite(scanner: BufferedScanner<Conn>) -> Self {
        Body {
            inner: BodyKind::Infinite(InfiniteReader::new(scanner)),
        }
    }

    /// Layers a gzip decoder over this body.
    pub(crate) fn gzipped(self) -> Self {
        Body {
            inner: BodyKind::Gzip(GzipReader::new(self)),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self.inner, BodyKind::Empty)
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            BodyKind::Empty => Ok(0),
            BodyKind::Length(r) => r.read(dst),
            BodyKind::Chunked(r) => r.read(dst),
            BodyKind::Multipart(r) => r.read(dst),
            BodyKind::Infinite(r) => r.read(dst),
            BodyKind::Gzip(r) => r.read(dst),
        }
    }

    /// Closes the body and the connection under it. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        match &mut self.inner {
            BodyKind::Empty => Ok(()),
            BodyKind::Length(r) => r.close(),
            BodyKind::Chunked(r) => r.close(),
            BodyKind::Multipart(r) => r.close(),
            BodyKind::Infinite(r) => r.close(),
            BodyKind::Gzip(r) => r.close(),
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Body::read(self, buf).map_err(io::Error::from)
    }
}

/// Reader bounded by a declared `Content-Length`
pub struct ContentLengthReader<C: Connection> {
    scanner: BufferedScanner<C>,
    declared: u64,
    consumed: u64,
    err: Option<Error>,
}

impl<C: Connection> ContentLengthReader<C> {
    pub(crate) fn new(scanner: BufferedScanner<C>, declared: u64) -> Self {
        ContentLengthReader {
            scanner,
            declared,
            consumed: 0,
            err: None,
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.err {
            return err.replay();
        }

        let remaining = self.declared.saturating_sub(self.consumed);
        if remaining == 0 {
            self.err = Some(Error::Eof);
            return Ok(0);
        }

        let n = remaining.min(dst.len() as u64) as usize;
        let red = self.scanner.read(&mut dst[..n])?;
        self.consumed += red as u64;
        Ok(red)
    }

    pub fn close(&mut self) -> Result<()> {
        self.err = Some(Error::ResponseBodyClosed);
        self.scanner.get_mut().close()
    }
}

/// Reader for responses delimited by the server closing the connection
///
/// The server gets a grace period to produce the first bytes and a
/// shorter idle allowance afterwards; a read that times out is treated
/// as the end of the body.
pub struct InfiniteReader<C: Connection> {
    scanner: BufferedScanner<C>,
    err: Option<Error>,
}

impl<C: Connection> InfiniteReader<C> {
    pub(crate) fn new(scanner: BufferedScanner<C>) -> Self {
        InfiniteReader { scanner, err: None }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.err {
            return err.replay();
        }

        match self.scanner.read(dst) {
            Ok(0) => {
                self.err = Some(Error::Eof);
                Ok(0)
            }
            Ok(n) => {
                // The server produced something; give it another idle
                // allowance
                self.scanner
                    .get_mut()
                    .set_read_timeout(Some(IDLE_READ_TIMEOUT))?;
                Ok(n)
            }
            Err(Error::Io(err))
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                // The peer went quiet; the body is as long as it got
                self.err = Some(Error::Eof);
                Ok(0)
            }
            Err(err) => {
                self.err = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.err = Some(Error::ResponseBodyClosed);
        self.scanner.get_mut().close()
    }
}
