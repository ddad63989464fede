//! HTTP/1.1 client speaking directly over TCP
//!
//! This module implements a minimal HTTP/1.1 client that writes requests
//! to a raw socket and decodes responses itself instead of delegating to
//! a high-level HTTP stack. The interesting part is response-body
//! framing: once the status line and headers have been read, exactly one
//! body decoder is attached to the connection according to the RFC 2616
//! transfer-length rules (chunked coding, `Content-Length`,
//! `multipart/byteranges`, or read-until-close), optionally layered with
//! a gzip decoder.
//!
//! # Architecture
//!
//! Bytes flow one direction through a linear chain of owners:
//!
//! connection → [`BufferedScanner`] → status/header parsing → body
//! decoder → optional gzip layer → caller.
//!
//! The scanner owns the connection and the selected decoder owns the
//! scanner, so closing the body closes the socket.
//!
//! # Examples
//!
//! ```no_run
//! use std::io::Read;
//!
//! let mut response = rcurl::http::get("http://example.com/index.html").unwrap();
//! assert_eq!(response.status_code, 200);
//!
//! let mut body = Vec::new();
//! response.body.read_to_end(&mut body).unwrap();
//! ```

pub mod body;
pub mod chunked;
pub mod client;
pub mod connection;
pub mod gzip;
pub mod headers;
pub mod multipart;
pub mod request;
pub mod response;
pub mod scanner;

pub use body::Body;
pub use client::{execute, execute_with_buffer_size, get, post};
pub use connection::{Connection, TcpConnection, TlsConnection};
pub use headers::Headers;
pub use multipart::MultipartByterangesReader;
pub use request::{Method, Request};
pub use response::Response;
pub use scanner::BufferedScanner;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Scanner buffer bounds; requested capacities are clamped into
/// [`MIN_BUF_SIZE`, `MAX_BUF_SIZE`].
pub const MIN_BUF_SIZE: usize = 1 << 6; // 64 B
pub const MAX_BUF_SIZE: usize = 1 << 27; // 128 MiB
pub const DEFAULT_BUF_SIZE: usize = 1 << 20; // 1 MiB

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// HTTP operation errors
///
/// Errors wrap transitively: a multipart decoding failure carries its
/// cause, which may itself carry an I/O error. [`Error::chain`] walks the
/// wrappers outermost-first so callers can ask whether a particular kind
/// is present anywhere, and [`Error::root_cause`] names the leaf.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// End of stream. Replays as a clean zero-length read.
    #[error("end of stream")]
    Eof,

    #[error("line is too long")]
    LineTooLong,

    #[error("no newlines left")]
    NoNewLinesLeft,

    #[error("response body is closed")]
    ResponseBodyClosed,

    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("protocol '{0}' is not supported")]
    UnsupportedProto(String),

    #[error("unsupported http method '{0}'")]
    UnsupportedMethod(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("malformed status line: '{0}'")]
    MalformedStatusLine(String),

    #[error("malformed response headers: {0}")]
    MalformedHeaders(String),

    #[error("invalid chunk size '{0}'")]
    InvalidChunkSize(String),

    #[error("malformed chunk")]
    MalformedChunk {
        source: Box<Error>,
    },

    #[error("malformed byteranges body")]
    MalformedByterange {
        source: Option<Box<Error>>,
    },

    #[error("unexpected end of byteranges body")]
    UnexpectedEof,

    #[error("unexpected symbol 0x{0:02x} in byteranges body")]
    UnexpectedSymbol(u8),

    #[error("boundary length {boundary} exceeds accumulator capacity {capacity}")]
    BoundaryTooLong { boundary: usize, capacity: usize },
}

impl Error {
    /// Walks this error and its typed causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Error> {
        std::iter::successors(Some(self), |err| err.cause())
    }

    /// The innermost error in the chain.
    pub fn root_cause(&self) -> &Error {
        self.chain().last().unwrap_or(self)
    }

    fn cause(&self) -> Option<&Error> {
        match self {
            Error::MalformedChunk { source } => Some(source),
            Error::MalformedByterange { source } => source.as_deref(),
            _ => None,
        }
    }

    /// How a recorded error replays on subsequent reads: end of stream is
    /// a clean zero-length read, anything else repeats the failure.
    pub(crate) fn replay(&self) -> Result<usize> {
        match self {
            Error::Eof => Ok(0),
            err => Err(err.clone()),
        }
    }
}

// The sticky-error slots replay errors on every operation after the
// first failure, so Error must be reproducible; std::io::Error is not
// Clone and is rebuilt from its kind and message.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
            Error::Eof => Error::Eof,
            Error::LineTooLong => Error::LineTooLong,
            Error::NoNewLinesLeft => Error::NoNewLinesLeft,
            Error::ResponseBodyClosed => Error::ResponseBodyClosed,
            Error::InvalidUrl(url) => Error::InvalidUrl(url.clone()),
            Error::UnsupportedProto(proto) => Error::UnsupportedProto(proto.clone()),
            Error::UnsupportedMethod(method) => Error::UnsupportedMethod(method.clone()),
            Error::Tls(msg) => Error::Tls(msg.clone()),
            Error::MalformedStatusLine(line) => Error::MalformedStatusLine(line.clone()),
            Error::MalformedHeaders(msg) => Error::MalformedHeaders(msg.clone()),
            Error::InvalidChunkSize(size) => Error::InvalidChunkSize(size.clone()),
            Error::MalformedChunk { source } => Error::MalformedChunk {
                source: source.clone(),
            },
            Error::MalformedByterange { source } => Error::MalformedByterange {
                source: source.clone(),
            },
            Error::UnexpectedEof => Error::UnexpectedEof,
            Error::UnexpectedSymbol(byte) => Error::UnexpectedSymbol(*byte),
            Error::BoundaryTooLong { boundary, capacity } => Error::BoundaryTooLong {
                boundary: *boundary,
                capacity: *capacity,
            },
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            err => std::io::Error::new(std::io::ErrorKind::Other, err),
        }
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Tls(err.to_string())
    }
}
