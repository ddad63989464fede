//! rcurl — a minimal HTTP/1.1 client
//!
//! Speaks HTTP/1.1 directly over TCP (optionally TLS) and frames
//! response bodies itself: chunked transfer coding, `Content-Length`,
//! `multipart/byteranges`, and read-until-close, with transparent gzip
//! decoding. Ships as a library ([`http`]) and a small curl-like binary
//! ([`cli`]).

pub mod cli;
pub mod http;
