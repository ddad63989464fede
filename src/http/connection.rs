//! Transport abstraction
//!
//! The connection trait lets the response decoding pipeline stay
//! transparent to the underlying transport: the same scanner and body
//! decoders run over plain TCP and over TLS. Only the capabilities the
//! pipeline needs are exposed — reading, writing, adjusting the read
//! timeout, and closing.

use super::{Error, Result};
use log::debug;
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A bidirectional byte stream with an adjustable read timeout
pub trait Connection: Read + Write {
    /// Sets the timeout for subsequent reads; `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Closes the stream. Idempotent; any read blocked on the stream is
    /// unblocked with an error.
    fn close(&mut self) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Opens a connection to `host:port`, plain or TLS
pub fn open(host: &str, port: u16, tls: bool) -> Result<Box<dyn Connection>> {
    if tls {
        Ok(Box::new(TlsConnection::connect(host, port)?))
    } else {
        Ok(Box::new(TcpConnection::connect(host, port)?))
    }
}

/// Plain TCP connection
pub struct TcpConnection {
    stream: TcpStream,
    closed: bool,
}

impl TcpConnection {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        Ok(TcpConnection {
            stream,
            closed: false,
        })
    }

    /// Wraps an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        TcpConnection {
            stream,
            closed: false,
        }
    }
}

impl Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TcpConnection {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer may already have torn the connection down
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

/// TLS connection over TCP
///
/// Certificate verification is disabled: the client talks to whatever
/// answers, matching the permissive verification mode the tool has
/// always shipped with.
pub struct TlsConnection {
    stream: SslStream<TcpStream>,
    closed: bool,
}

impl TlsConnection {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        builder.set_verify(SslVerifyMode::NONE);
        let connector = builder.build();

        let tcp = TcpStream::connect((host, port))?;
        debug!("negotiating TLS with {host}:{port}");
        let stream = connector
            .connect(host, tcp)
            .map_err(|err| Error::Tls(err.to_string()))?;
        Ok(TlsConnection {
            stream,
            closed: false,
        })
    }
}

impl Read for TlsConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TlsConnection {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Best-effort TLS close-notify, then tear down the socket
        let _ = self.stream.shutdown();
        match self.stream.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_connection_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").unwrap();
        });

        let mut conn = TcpConnection::connect("127.0.0.1", addr.port()).unwrap();
        conn.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");

        conn.close().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });

        let mut conn = TcpConnection::connect("127.0.0.1", addr.port()).unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_read_timeout_unblocks_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut conn = TcpConnection::connect("127.0.0.1", addr.port()).unwrap();
        conn.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let mut buf = [0u8; 1];
        let err = conn.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
        handle.join().unwrap();
    }
}
