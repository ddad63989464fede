//! Gzip content-encoding decoding
//!
//! Applied by the framer above the transfer-length decoder when the
//! response carries `Content-Encoding: gzip`, so callers always see the
//! decompressed representation. The gzip stream (header included) is
//! parsed lazily; a corrupt stream surfaces as a read error.

use super::body::Body;
use super::{Error, Result};
use flate2::read::GzDecoder;
use std::io::Read;

/// Transparent gzip layer over another body reader
pub struct GzipReader {
    decoder: GzDecoder<Box<Body>>,
    err: Option<Error>,
}

impl GzipReader {
    pub(crate) fn new(inner: Body) -> Self {
        GzipReader {
            decoder: GzDecoder::new(Box::new(inner)),
            err: None,
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if let Some(err) = &self.err {
            return err.replay();
        }
        match self.decoder.read(dst) {
            Ok(0) => {
                self.err = Some(Error::Eof);
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => {
                let err = Error::Io(err);
                self.err = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Closes the wrapped body reader (and with it the connection).
    pub fn close(&mut self) -> Result<()> {
        self.err = Some(Error::ResponseBodyClosed);
        self.decoder.get_mut().close()
    }
}
