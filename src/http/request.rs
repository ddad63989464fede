//! Request construction and serialization

use super::headers::Headers;
use super::{Error, Result, CRLF};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Default port per scheme
const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// HTTP methods the client can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parse a method name (any casing)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(Error::UnsupportedMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An HTTP request bound for one host
///
/// Carries everything needed to open a connection and write the request:
/// method, host, port, path, headers, and an optional body. Built from a
/// URL by [`Request::new`].
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    tls: bool,
}

impl Request {
    /// Creates a request for `url` with the default header set (`Host`,
    /// `Accept`, `User-Agent`, and a computed `Content-Length`).
    pub fn new(method: Method, url: &str, body: Option<Vec<u8>>) -> Result<Request> {
        let target = split_url(url)?;

        let mut headers = Headers::new();
        headers.insert("Host", target.host.clone());
        headers.insert("Accept", "*/*");
        headers.insert(
            "User-Agent",
            concat!("rcurl/", env!("CARGO_PKG_VERSION")),
        );
        headers.insert(
            "Content-Length",
            body.as_ref().map_or(0, Vec::len).to_string(),
        );

        Ok(Request {
            method,
            host: target.host,
            port: target.port,
            path: target.path,
            headers,
            body,
            tls: target.tls,
        })
    }

    /// Whether the request goes over TLS (an `https` URL)
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Serializes the request line, headers, and body into wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        let body = self.body.as_deref().unwrap_or_default();
        let mut wire = BytesMut::with_capacity(256 + body.len());

        wire.put_slice(self.method.as_str().as_bytes());
        wire.put_u8(b' ');
        wire.put_slice(self.path.as_bytes());
        wire.put_slice(b" HTTP/1.1");
        wire.put_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            wire.put_slice(name.as_bytes());
            wire.put_slice(b": ");
            wire.put_slice(value.as_bytes());
            wire.put_slice(CRLF.as_bytes());
        }
        wire.put_slice(CRLF.as_bytes());
        wire.put_slice(body);

        wire.to_vec()
    }
}

struct Target {
    host: String,
    port: u16,
    path: String,
    tls: bool,
}

/// Splits a URL into host, port, path, and TLS flag. Only `http` and
/// `https` schemes are accepted; the port defaults per scheme.
fn split_url(url: &str) -> Result<Target> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;

    let scheme = scheme.to_ascii_lowercase();
    let tls = match scheme.as_str() {
        "http" => false,
        "https" => true,
        _ => return Err(Error::UnsupportedProto(scheme)),
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::InvalidUrl(url.to_string()))?;
            (host, port)
        }
        None => (authority, if tls { HTTPS_PORT } else { HTTP_PORT }),
    };

    if host.is_empty() {
        return Err(Error::InvalidUrl(url.to_string()));
    }

    Ok(Target {
        host: host.to_string(),
        port,
        path: path.to_string(),
        tls,
    })
}
