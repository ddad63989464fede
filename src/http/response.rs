//! Response parsing and body framing
//!
//! Reads the status line and headers off the scanner, then decides how
//! the body is delimited following the RFC 2616 §4.4 transfer-length
//! rules, in priority order:
//!
//! 1. statuses that never carry a body (1xx, 204, 304)
//! 2. `Transfer-Encoding` other than `identity` → chunked coding
//! 3. `Content-Length`
//! 4. `Content-Type: multipart/byteranges` (self-delimiting)
//! 5. read until the server closes the connection
//!
//! Exactly one decoder gets the connection; when no body applies the
//! connection is closed immediately. A `Content-Encoding: gzip` response
//! additionally gets the gzip layer.

use super::body::{Body, INITIAL_READ_TIMEOUT};
use super::connection::Connection;
use super::headers::Headers;
use super::scanner::BufferedScanner;
use super::{Error, Result, DEFAULT_BUF_SIZE};
use log::debug;

/// A decoded HTTP response
///
/// The header block is fixed once framing has run; the body streams on
/// demand.
pub struct Response {
    /// Protocol token from the status line, e.g. "HTTP/1.1"
    pub proto: String,
    pub status_code: u16,
    /// Status code and reason phrase, e.g. "200 OK"
    pub status: String,
    pub headers: Headers,
    pub body: Body,
}

/// Reads a response off `conn`. `buffer_size` of zero means the default
/// scanner capacity.
pub(crate) fn read_response(conn: Box<dyn Connection>, buffer_size: usize) -> Result<Response> {
    let size = if buffer_size == 0 {
        DEFAULT_BUF_SIZE
    } else {
        buffer_size
    };
    let mut scanner = BufferedScanner::with_capacity(conn, size);

    let (proto, status_code, status) = match read_status_line(&mut scanner) {
        Ok(parts) => parts,
        Err(err) => {
            scanner.get_mut().close().ok();
            return Err(err);
        }
    };

    let headers = match read_headers(&mut scanner) {
        Ok(headers) => headers,
        Err(err) => {
            scanner.get_mut().close().ok();
            return Err(err);
        }
    };

    let mut body = frame_body(status_code, &headers, scanner)?;
    if !body.is_empty() && is_gzipped(&headers) {
        debug!("layering gzip decoder over response body");
        body = body.gzipped();
    }

    Ok(Response {
        proto,
        status_code,
        status,
        headers,
        body,
    })
}

/// Splits `HTTP-VERSION SP STATUS-CODE SP REASON-PHRASE`. At least the
/// version and a base-10 status code must be present.
fn read_status_line<C: Connection>(
    scanner: &mut BufferedScanner<C>,
) -> Result<(String, u16, String)> {
    let (line, _) = scanner.next_line()?;
    let tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() < 2 {
        return Err(Error::MalformedStatusLine(line));
    }

    let proto = tokens[0].to_string();
    let status_code = match tokens[1].parse::<u16>() {
        Ok(code) => code,
        Err(_) => return Err(Error::MalformedStatusLine(line)),
    };
    let status = tokens[1..].join(" ");
    Ok((proto, status_code, status))
}

/// Reads header lines up to the blank line. Names are canonicalized and
/// values trimmed; a line without a colon is kept as a header with an
/// empty value.
fn read_headers<C: Connection>(scanner: &mut BufferedScanner<C>) -> Result<Headers> {
    let mut headers = Headers::new();
    loop {
        let line = match scanner.next_line() {
            Ok((line, _)) => line,
            Err(err @ Error::LineTooLong) => return Err(err),
            Err(Error::NoNewLinesLeft) | Err(Error::Eof) => {
                return Err(Error::MalformedHeaders(
                    "header block does not end with a blank line".to_string(),
                ))
            }
            Err(err) => return Err(err),
        };

        if line.is_empty() {
            return Ok(headers);
        }

        match line.split_once(':') {
            Some((name, value)) => headers.insert(name.trim(), value.trim()),
            None => headers.insert(line.trim(), ""),
        }
    }
}

/// Attaches the body decoder that matches the response's framing
/// signals.
fn frame_body(
    status_code: u16,
    headers: &Headers,
    mut scanner: BufferedScanner<Box<dyn Connection>>,
) -> Result<Body> {
    // 1. These statuses never carry a body, whatever the headers claim
    if status_code == 204 || status_code == 304 || (100..=199).contains(&status_code) {
        debug!("status {status_code} has no body");
        scanner.get_mut().close().ok();
        return Ok(Body::empty());
    }

    // 2. Any transfer coding other than identity means chunked
    if let Some(te) = headers.get("Transfer-Encoding") {
        if !te.eq_ignore_ascii_case("identity") {
            debug!("framing body by chunked transfer coding");
            return Ok(Body::chunked(scanner));
        }
    }

    // 3. Content-Length; a value that does not parse is treated as a
    // zero-length transfer
    if let Some(cl) = headers.get("Content-Length") {
        return match cl.trim().parse::<u64>() {
            Ok(0) | Err(_) => {
                debug!("empty or undecipherable Content-Length, dropping body");
                scanner.get_mut().close().ok();
                Ok(Body::empty())
            }
            Ok(length) => {
                debug!("framing body by Content-Length {length}");
                Ok(Body::length(scanner, length))
            }
        };
    }

    // 4. multipart/byteranges delimits its own transfer length
    if let Some(boundary) = byteranges_boundary(headers) {
        debug!("framing body as multipart/byteranges, boundary '{boundary}'");
        return Ok(Body::multipart(scanner, boundary));
    }

    // 5. Read until the server closes the socket, within deadlines
    debug!("no framing signal, reading until the connection closes");
    scanner
        .get_mut()
        .set_read_timeout(Some(INITIAL_READ_TIMEOUT))?;
    Ok(Body::infinite(scanner))
}

/// Extracts the boundary parameter of a `multipart/byteranges` content
/// type. The media type check and the `boundary=` parameter name are
/// case-insensitive; the boundary itself is a run of word characters.
fn byteranges_boundary(headers: &Headers) -> Option<String> {
    let content_type = headers.get("Content-Type")?;
    let lower = content_type.to_ascii_lowercase();
    if !lower.starts_with("multipart/byteranges") {
        return None;
    }

    let at = lower.find("boundary=")? + "boundary=".len();
    let rest = &content_type[at..];
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}

fn is_gzipped(headers: &Headers) -> bool {
    headers
        .get("Content-Encoding")
        .is_some_and(|ce| ce.eq_ignore_ascii_case("gzip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::connection::testing::MockConnection;
    use std::io::Read;

    fn response_from(raw: &[u8]) -> Result<Response> {
        read_response(Box::new(MockConnection::new(raw.to_vec())), 0)
    }

    fn body_string(response: &mut Response) -> String {
        let mut out = String::new();
        Read::read_to_string(&mut response.body, &mut out).unwrap();
        out
    }

    #[test]
    fn test_status_line_and_headers() {
        let mut r = response_from(
            b"HTTP/1.1 404 Not Found\r\ncontent-type: text/plain\r\nContent-Length: 2\r\n\r\nno",
        )
        .unwrap();

        assert_eq!(r.proto, "HTTP/1.1");
        assert_eq!(r.status_code, 404);
        assert_eq!(r.status, "404 Not Found");
        assert_eq!(r.headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(body_string(&mut r), "no");
    }

    #[test]
    fn test_bare_newline_terminators() {
        let mut r =
            response_from(b"HTTP/1.1 200 OK\nContent-Length: 5\n\nhello").unwrap();
        assert_eq!(r.status_code, 200);
        assert_eq!(body_string(&mut r), "hello");
    }

    #[test]
    fn test_malformed_status_line() {
        assert!(matches!(
            response_from(b"HTTP/1.1\r\n\r\n"),
            Err(Error::MalformedStatusLine(_))
        ));
        assert!(matches!(
            response_from(b"HTTP/1.1 abc OK\r\n\r\n"),
            Err(Error::MalformedStatusLine(_))
        ));
    }

    #[test]
    fn test_unterminated_headers() {
        assert!(matches!(
            response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n"),
            Err(Error::MalformedHeaders(_))
        ));
    }

    #[test]
    fn test_header_without_colon_gets_empty_value() {
        let r = response_from(b"HTTP/1.1 200 OK\r\ncontent-length\r\n\r\n").unwrap();
        assert_eq!(r.headers.get("Content-Length"), Some(""));
        // Which then reads as an undecipherable length: empty body
        assert!(r.body.is_empty());
    }

    #[test]
    fn test_no_body_statuses_close_immediately() {
        for status in ["101 Switching Protocols", "204 No Content", "304 Not Modified"] {
            let raw = format!("HTTP/1.1 {status}\r\nContent-Length: 10\r\n\r\nleftover");
            let mut r = response_from(raw.as_bytes()).unwrap();
            assert!(r.body.is_empty(), "expected no body for {status}");
            assert_eq!(body_string(&mut r), "");
        }
    }

    #[test]
    fn test_chunked_beats_content_length() {
        let mut r = response_from(
            b"HTTP/1.1 200 OK\r\n\
              Transfer-Encoding: chunked\r\n\
              Content-Length: 9999\r\n\
              \r\n\
              4\r\nWiki\r\n6\r\npedia \r\nE\r\nin \r\n\r\nchunks.\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(body_string(&mut r), "Wikipedia in \r\n\r\nchunks.");
    }

    #[test]
    fn test_identity_transfer_encoding_falls_through() {
        let mut r = response_from(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: identity\r\nContent-Length: 3\r\n\r\nabcdef",
        )
        .unwrap();
        assert_eq!(body_string(&mut r), "abc");
    }

    #[test]
    fn test_content_length_zero_and_malformed() {
        let r = response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert!(r.body.is_empty());

        let r =
            response_from(b"HTTP/1.1 200 OK\r\nContent-Length: twelve\r\n\r\ndata").unwrap();
        assert!(r.body.is_empty());
    }

    #[test]
    fn test_content_length_beats_multipart() {
        let mut r = response_from(
            b"HTTP/1.1 206 Partial Content\r\n\
              Content-Type: multipart/byteranges; boundary=asd\r\n\
              Content-Length: 7\r\n\
              \r\n\
              --asd\r\nmore bytes the client never sees",
        )
        .unwrap();
        // The byteranges stream is delivered raw, bounded by the length
        assert_eq!(body_string(&mut r), "--asd\r\n");
    }

    #[test]
    fn test_multipart_byteranges_is_decoded() {
        let mut r = response_from(
            b"HTTP/1.1 206 Partial Content\r\n\
              Content-Type: multipart/byteranges; boundary=asd\r\n\
              \r\n\
              --asd\r\nContent-Range: bytes 0-4/10\r\n\r\nfirst\r\n\
              --asd\r\nContent-Range: bytes 5-9/10\r\n\r\n.last\r\n\
              --asd--\r\n",
        )
        .unwrap();
        assert_eq!(body_string(&mut r), "first.last");
    }

    #[test]
    fn test_connection_close_fallback() {
        let mut r = response_from(b"HTTP/1.1 200 OK\r\nServer: none\r\n\r\nuntil close").unwrap();
        assert_eq!(body_string(&mut r), "until close");
    }

    #[test]
    fn test_gzip_layering() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed payload").unwrap();
        let zipped = enc.finish().unwrap();

        let mut raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            zipped.len()
        )
        .into_bytes();
        raw.extend_from_slice(&zipped);

        let mut r = response_from(&raw).unwrap();
        assert_eq!(body_string(&mut r), "compressed payload");
    }

    #[test]
    fn test_byteranges_boundary_extraction() {
        let headers: Headers = [(
            "Content-Type",
            "Multipart/Byteranges; charset=utf-8; BOUNDARY=3d6b6a416f9b5",
        )]
        .into_iter()
        .collect();
        assert_eq!(
            byteranges_boundary(&headers).as_deref(),
            Some("3d6b6a416f9b5")
        );

        let headers: Headers = [("Content-Type", "multipart/byteranges")]
            .into_iter()
            .collect();
        assert_eq!(byteranges_boundary(&headers), None);

        let headers: Headers = [("Content-Type", "text/html; boundary=asd")]
            .into_iter()
            .collect();
        assert_eq!(byteranges_boundary(&headers), None);
    }
}
