//! Request execution
//!
//! One request maps to one connection: dial, write the request, hand
//! the connection to response framing. There is no connection reuse;
//! callers wanting concurrency issue independent requests.

use super::request::{Method, Request};
use super::response::{read_response, Response};
use super::{connection, Error, Result};
use log::debug;
use std::io::Write;

/// Executes a GET request on `url`.
pub fn get(url: &str) -> Result<Response> {
    execute(&Request::new(Method::Get, url, None)?)
}

/// Executes a POST request on `url` with the given content type and
/// body.
pub fn post(url: &str, content_type: &str, body: Vec<u8>) -> Result<Response> {
    let mut request = Request::new(Method::Post, url, Some(body))?;
    request.headers.insert("Content-Type", content_type);
    execute(&request)
}

/// Executes a request over a fresh connection. Uses HTTP/1.1.
pub fn execute(request: &Request) -> Result<Response> {
    execute_with_buffer_size(request, 0)
}

/// Like [`execute`] with an explicit scanner buffer size (zero means the
/// default). Small buffers force more compactions, which is mostly
/// useful for exercising the decoding pipeline.
pub fn execute_with_buffer_size(request: &Request, buffer_size: usize) -> Result<Response> {
    debug!(
        "{} {}:{}{}",
        request.method, request.host, request.port, request.path
    );
    let mut conn = connection::open(&request.host, request.port, request.is_tls())?;

    if let Err(err) = conn.write_all(&request.to_wire()) {
        conn.close().ok();
        return Err(Error::Io(err));
    }

    read_response(conn, buffer_size)
}
