//! multipart/byteranges body decoder
//!
//! Produces the concatenation of all part bodies of a
//! `multipart/byteranges` stream, discarding the preamble, the boundary
//! delimiter lines, and the per-part headers. Both `\r\n` and bare `\n`
//! line terminators are accepted.
//!
//! Recognition is driven by a table-compiled state machine. The fixed
//! states cover the preamble, part headers, and part bodies; when a
//! reader is built for a concrete boundary, two runs of
//! boundary-matching states are generated and appended — one for the
//! opening delimiter, one for the delimiter between parts. Body bytes
//! that could still turn out to be the start of a delimiter (a newline
//! followed by dashes and a prefix of the boundary) are parked in an
//! accumulator and only handed to the caller once the machine decides
//! they were data after all; a completed delimiter discards them.

use super::connection::Connection;
use super::scanner::BufferedScanner;
use super::{Error, Result};
use std::collections::HashMap;
use std::io::{self, Read};

/// Accumulator size bounds; requested sizes are clamped into
/// [`MIN_ACC_SIZE`, `MAX_ACC_SIZE`].
pub const MIN_ACC_SIZE: usize = 64;
pub const MAX_ACC_SIZE: usize = 1 << 20;
pub const DEFAULT_ACC_SIZE: usize = 1024;

/// States are plain integers so that the generated boundary-matching
/// states and the fixed states live in one transition table. Ids below
/// `FIXED` belong to the two boundary runs: `0..n` matches the opening
/// boundary, `n..2n` the inter-part boundary, where `n` is the boundary
/// length.
type State = u32;

const FIXED: State = (2 * MAX_ACC_SIZE) as State;

/// Preamble, before anything of the first delimiter has matched.
const START: State = FIXED;
const START_CR: State = FIXED + 1;
const START_NEWLINE: State = FIXED + 2;
const DASH: State = FIXED + 3;
const DASH_DASH: State = FIXED + 4;
/// End of the opening delimiter line.
const BOUNDARY_CR: State = FIXED + 5;
const BOUNDARY_NL: State = FIXED + 6;
/// Inside the part headers, which are discarded.
const HEADERS: State = FIXED + 7;
const HEADERS_NL: State = FIXED + 8;
const HEADERS_NL_CR: State = FIXED + 9;
/// Inside a part body.
const PART: State = FIXED + 10;
const PART_CR: State = FIXED + 11;
const PART_NEWLINE: State = FIXED + 12;
const PART_DASH: State = FIXED + 13;
const PART_DASH_DASH: State = FIXED + 14;
/// After the full inter-part boundary has matched.
const PART_BOUNDARY_DASH: State = FIXED + 15;
const PART_BOUNDARY_CR: State = FIXED + 16;
const PART_BOUNDARY_NL: State = FIXED + 17;
const DONE: State = FIXED + 18;

/// Input column for the wildcard row, consulted when no exact byte entry
/// exists.
const ANY: u32 = 0x100;

/// Transition keys are packed as `(state << 9) | input` where input is a
/// byte value or [`ANY`].
fn key(state: State, input: u32) -> u32 {
    (state << 9) | input
}

#[derive(Default)]
struct Table {
    map: HashMap<u32, State>,
}

impl Table {
    fn on(&mut self, state: State, byte: u8, to: State) {
        self.map.insert(key(state, byte as u32), to);
    }

    fn any(&mut self, state: State, to: State) {
        self.map.insert(key(state, ANY), to);
    }

    fn next(&self, state: State, byte: u8) -> Option<State> {
        self.map
            .get(&key(state, byte as u32))
            .or_else(|| self.map.get(&key(state, ANY)))
            .copied()
    }
}

/// What happens to the input byte that caused a transition
enum Step {
    /// Consume the byte without keeping it (preamble and part headers).
    Skip,
    /// Park the byte; it may be body or it may be delimiter.
    Enqueue,
    /// Everything parked so far turned out to be body; park this byte.
    CommitEnqueue,
    /// Everything parked plus this byte is body.
    CommitEmit,
    /// A delimiter completed: the parked bytes were delimiter, not body.
    Drop,
    /// The closing delimiter completed; the stream is finished.
    Terminate,
}

fn compile(boundary: &[u8]) -> Table {
    let n = boundary.len() as State;
    let mut t = Table::default();

    // Preamble: discard input until a boundary line shows up. A leading
    // newline (or CRLF) before the dashes is tolerated.
    t.on(START, b'-', DASH);
    t.on(START, b'\r', START_CR);
    t.on(START, b'\n', START_NEWLINE);
    t.any(START, START);
    t.on(START_CR, b'\n', START_NEWLINE);
    t.any(START_CR, START);
    t.on(START_NEWLINE, b'-', DASH);
    t.on(START_NEWLINE, b'\r', START_CR);
    t.on(START_NEWLINE, b'\n', START_NEWLINE);
    t.any(START_NEWLINE, START);
    t.on(DASH, b'-', DASH_DASH);
    t.any(DASH, START);
    t.on(DASH_DASH, boundary[0], 0);
    t.any(DASH_DASH, START);

    // Opening-boundary run: states 0..n match the boundary byte by byte;
    // a mismatch falls back to the preamble.
    for i in 0..n {
        if i + 1 < n {
            t.on(i, boundary[(i + 1) as usize], i + 1);
        }
        t.any(i, START);
    }
    t.on(n - 1, b'\r', BOUNDARY_CR);
    t.on(n - 1, b'\n', BOUNDARY_NL);

    // "--boundary" followed by CR admits only a newline; anything else
    // dead-ends the machine.
    t.on(BOUNDARY_CR, b'\n', BOUNDARY_NL);

    // Part headers run to a blank line and are discarded.
    t.on(BOUNDARY_NL, b'\n', PART);
    t.on(BOUNDARY_NL, b'\r', HEADERS_NL_CR);
    t.any(BOUNDARY_NL, HEADERS);
    t.on(HEADERS, b'\n', HEADERS_NL);
    t.any(HEADERS, HEADERS);
    t.on(HEADERS_NL, b'\n', PART);
    t.on(HEADERS_NL, b'\r', HEADERS_NL_CR);
    t.any(HEADERS_NL, HEADERS);
    t.on(HEADERS_NL_CR, b'\n', PART);
    t.any(HEADERS_NL_CR, HEADERS);

    // Part body. A newline (or CRLF) opens the possibility that an
    // inter-part delimiter follows.
    t.on(PART, b'\r', PART_CR);
    t.on(PART, b'\n', PART_NEWLINE);
    t.any(PART, PART);
    t.on(PART_CR, b'\n', PART_NEWLINE);
    t.on(PART_CR, b'\r', PART_CR);
    t.any(PART_CR, PART);
    t.on(PART_NEWLINE, b'-', PART_DASH);
    t.on(PART_NEWLINE, b'\r', PART_CR);
    t.on(PART_NEWLINE, b'\n', PART_NEWLINE);
    t.any(PART_NEWLINE, PART);
    t.on(PART_DASH, b'-', PART_DASH_DASH);
    t.on(PART_DASH, b'\r', PART_CR);
    t.on(PART_DASH, b'\n', PART_NEWLINE);
    t.any(PART_DASH, PART);
    t.on(PART_DASH_DASH, boundary[0], n);
    t.on(PART_DASH_DASH, b'\r', PART_CR);
    t.on(PART_DASH_DASH, b'\n', PART_NEWLINE);
    t.any(PART_DASH_DASH, PART);

    // Inter-part run: states n..2n. A mismatch means the held bytes were
    // body all along.
    for i in 0..n {
        let state = n + i;
        if i + 1 < n {
            t.on(state, boundary[(i + 1) as usize], state + 1);
        }
        t.on(state, b'\r', PART_CR);
        t.on(state, b'\n', PART_NEWLINE);
        t.any(state, PART);
    }
    // The completed inter-part boundary may end the part ("\r\n" / "\n")
    // or, with "--", the whole stream.
    t.on(2 * n - 1, b'-', PART_BOUNDARY_DASH);
    t.on(2 * n - 1, b'\r', PART_BOUNDARY_CR);
    t.on(2 * n - 1, b'\n', PART_BOUNDARY_NL);

    t.on(PART_BOUNDARY_DASH, b'-', DONE);
    t.on(PART_BOUNDARY_CR, b'\n', PART_BOUNDARY_NL);
    t.on(PART_BOUNDARY_NL, b'\n', PART);
    t.on(PART_BOUNDARY_NL, b'\r', HEADERS_NL_CR);
    t.any(PART_BOUNDARY_NL, HEADERS);

    t
}

/// What a transition does with its byte, derived from the states on
/// either side of it.
fn step(prior: State, next: State) -> Step {
    match next {
        DONE => Step::Terminate,
        // A delimiter completed; the held bytes were delimiter
        BOUNDARY_NL | PART_BOUNDARY_NL => Step::Drop,
        // Preamble bytes never reach the caller
        START => Step::Drop,
        HEADERS | HEADERS_NL | HEADERS_NL_CR => Step::Skip,
        PART => match prior {
            // The blank line that ends the part headers
            BOUNDARY_NL | HEADERS_NL | HEADERS_NL_CR | PART_BOUNDARY_NL => Step::Skip,
            _ => Step::CommitEmit,
        },
        // "\r" then "\n" stays tentative; any other route into a body
        // newline confirms the held bytes first
        PART_NEWLINE if prior == PART_CR => Step::Enqueue,
        PART_NEWLINE => Step::CommitEnqueue,
        PART_CR => Step::CommitEnqueue,
        _ => Step::Enqueue,
    }
}

/// Byte queue shared between the machine and the caller
///
/// `base[first..committed]` is output ready to be handed out;
/// `base[committed..]` holds bytes whose meaning is still undecided.
/// Once the committed region is fully consumed the backing vector is
/// compacted to the front.
#[derive(Default)]
struct Accumulator {
    base: Vec<u8>,
    first: usize,
    committed: usize,
}

impl Accumulator {
    fn enqueue(&mut self, byte: u8) {
        self.base.push(byte);
    }

    fn commit(&mut self) {
        self.committed = self.base.len();
    }

    fn drop_tentative(&mut self) {
        self.base.truncate(self.committed);
    }

    fn dequeue(&mut self) -> Option<u8> {
        if self.first == self.committed {
            return None;
        }
        let byte = self.base[self.first];
        self.first += 1;
        if self.first == self.committed {
            self.base.drain(..self.first);
            self.committed = 0;
            self.first = 0;
        }
        Some(byte)
    }
}

/// Decoder for `multipart/byteranges` bodies
///
/// Reads yield the concatenated part bodies. An entirely empty source is
/// a clean end of stream (zero byteranges); an end of stream anywhere
/// after the machine has left its initial state is reported as
/// [`Error::MalformedByterange`] wrapping [`Error::UnexpectedEof`], after
/// any bytes still held in the accumulator have been handed out.
pub struct MultipartByterangesReader<R> {
    reader: R,
    boundary: String,
    accumulator_size: usize,
    table: Option<Table>,
    state: State,
    acc: Accumulator,
    err: Option<Error>,
}

impl<R: Read> MultipartByterangesReader<R> {
    /// Creates a reader with the default accumulator size.
    pub fn new(reader: R, boundary: impl Into<String>) -> Self {
        Self::with_accumulator_size(reader, boundary, DEFAULT_ACC_SIZE)
    }

    /// Creates a reader with an accumulator of `size` bytes, clamped
    /// into [`MIN_ACC_SIZE`, `MAX_ACC_SIZE`]. The boundary must fit in
    /// the accumulator; if it does not, the first read fails with
    /// [`Error::BoundaryTooLong`].
    pub fn with_accumulator_size(reader: R, boundary: impl Into<String>, size: usize) -> Self {
        MultipartByterangesReader {
            reader,
            boundary: boundary.into(),
            accumulator_size: size.clamp(MIN_ACC_SIZE, MAX_ACC_SIZE),
            table: None,
            state: START,
            acc: Accumulator::default(),
            err: None,
        }
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.table.is_none() {
            if let Err(err) = self.load_table() {
                self.err = Some(err.clone());
                return Err(err);
            }
        }

        let mut written = 0;
        while written < dst.len() {
            if let Some(byte) = self.acc.dequeue() {
                dst[written] = byte;
                written += 1;
                continue;
            }
            if let Some(err) = &self.err {
                if written > 0 {
                    return Ok(written);
                }
                return err.replay();
            }
            match self.next_input_byte() {
                Ok(Some(byte)) => self.advance(byte),
                Ok(None) => self.source_ended(None),
                Err(err) => self.source_ended(Some(err)),
            }
        }
        Ok(written)
    }

    fn load_table(&mut self) -> Result<()> {
        if self.boundary.is_empty() || self.boundary.len() > self.accumulator_size {
            return Err(Error::BoundaryTooLong {
                boundary: self.boundary.len(),
                capacity: self.accumulator_size,
            });
        }
        self.table = Some(compile(self.boundary.as_bytes()));
        Ok(())
    }

    /// Feeds one byte through the machine.
    fn advance(&mut self, byte: u8) {
        let Some(table) = self.table.as_ref() else {
            return;
        };
        let Some(next) = table.next(self.state, byte) else {
            self.err = Some(Error::MalformedByterange {
                source: Some(Box::new(Error::UnexpectedSymbol(byte))),
            });
            return;
        };

        match step(self.state, next) {
            Step::Skip => {}
            Step::Enqueue => self.acc.enqueue(byte),
            Step::CommitEnqueue => {
                self.acc.commit();
                self.acc.enqueue(byte);
            }
            Step::CommitEmit => {
                self.acc.enqueue(byte);
                self.acc.commit();
            }
            Step::Drop => self.acc.drop_tentative(),
            Step::Terminate => {
                self.acc.drop_tentative();
                self.err = Some(Error::Eof);
            }
        }
        self.state = next;
    }

    /// Records how the source ended. Mid-parse, whatever the accumulator
    /// still holds is surrendered to the caller before the error
    /// surfaces.
    fn source_ended(&mut self, err: Option<Error>) {
        if err.is_none() && self.state == START {
            // Zero byteranges
            self.err = Some(Error::Eof);
            return;
        }
        self.acc.commit();
        self.err = Some(Error::MalformedByterange {
            source: Some(Box::new(err.unwrap_or(Error::UnexpectedEof))),
        });
    }

    fn next_input_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

impl<C: Connection> MultipartByterangesReader<BufferedScanner<C>> {
    /// Closes the connection under the scanner; later reads fail with
    /// [`Error::ResponseBodyClosed`].
    pub fn close(&mut self) -> Result<()> {
        self.err = Some(Error::ResponseBodyClosed);
        self.reader.get_mut().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a byteranges stream with `\r\n` terminators.
    fn crlf_stream(boundary: &str, parts: &[(&str, &str)], closed: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for (headers, body) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(headers.as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(body.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if closed {
            out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        }
        out
    }

    fn read_all(reader: &mut MultipartByterangesReader<impl Read>) -> (Vec<u8>, Option<Error>) {
        let mut out = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return (out, None),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(err) => return (out, Some(err)),
            }
        }
    }

    #[test]
    fn test_two_part_concatenation() {
        let input = crlf_stream(
            "asd",
            &[
                (
                    "Content-Type: text/html\r\nContent-Range: bytes 0-50/1270\r\n",
                    "<!doctype html>\n<html>\n<head>\n<title>Example Do",
                ),
                (
                    "Content-Type: text/html\r\nContent-Range: bytes 100-150/1270\r\n",
                    "eta http-equiv=\"Content-type\" content=\"text/html; c",
                ),
            ],
            true,
        );

        let mut r = MultipartByterangesReader::new(Cursor::new(input), "asd");
        let (out, err) = read_all(&mut r);
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<!doctype html>\n<html>\n<head>\n<title>Example Do\
             eta http-equiv=\"Content-type\" content=\"text/html; c"
        );
    }

    #[test]
    fn test_four_parts_bare_newlines() {
        let body = "123asd123asd123asd123asd123asd123asd123asd123asd12";
        let mut input = String::new();
        for range in ["0-50", "50-100", "100-150", "150-200"] {
            input.push_str("--asd123asd123\n");
            input.push_str("Content-Type: text/plain\n");
            input.push_str(&format!("Content-Range: bytes {range}/1270\n"));
            input.push('\n');
            input.push_str(body);
            input.push('\n');
        }
        input.push_str("--asd123asd123--\n");

        let mut r = MultipartByterangesReader::new(Cursor::new(input.into_bytes()), "asd123asd123");
        let (out, err) = read_all(&mut r);
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(String::from_utf8(out).unwrap(), body.repeat(4));
    }

    #[test]
    fn test_accumulator_sizes() {
        let input = crlf_stream(
            "asd",
            &[
                ("Content-Type: text/html\r\n", "first part body"),
                ("Content-Type: text/html\r\n", "second part body"),
            ],
            true,
        );

        for size in [0, MIN_ACC_SIZE, 2 * MIN_ACC_SIZE, 10 * MIN_ACC_SIZE, MAX_ACC_SIZE] {
            let mut r = MultipartByterangesReader::with_accumulator_size(
                Cursor::new(input.clone()),
                "asd",
                size,
            );
            let (out, err) = read_all(&mut r);
            assert!(err.is_none(), "unexpected error at size {size}: {err:?}");
            assert_eq!(out, b"first part bodysecond part body");
        }
    }

    #[test]
    fn test_empty_input_is_zero_byteranges() {
        let mut r = MultipartByterangesReader::new(Cursor::new(Vec::new()), "asd");
        let (out, err) = read_all(&mut r);
        assert!(out.is_empty());
        assert!(err.is_none(), "unexpected error: {err:?}");
    }

    #[test]
    fn test_eof_in_part_headers() {
        let input = b"--asd\r\nContent-Type: text/plain\r\nContent-Length: bytes 0-50/100\r\n";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        let err = err.expect("truncated stream must fail");

        assert!(out.is_empty());
        assert!(err
            .chain()
            .any(|e| matches!(e, Error::MalformedByterange { .. })));
        assert!(err.chain().any(|e| matches!(e, Error::UnexpectedEof)));
    }

    #[test]
    fn test_eof_in_body_surrenders_held_bytes() {
        let input = b"--asd\n\nsdsdas\n";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        let err = err.expect("truncated stream must fail");

        assert_eq!(out, b"sdsdas\n");
        assert!(err.chain().any(|e| matches!(e, Error::UnexpectedEof)));
    }

    #[test]
    fn test_eof_on_closing_delimiter() {
        let input = b"--asd\n\nsdsdas\n--asd\n\n123\n--asd-";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        let err = err.expect("truncated stream must fail");

        assert_eq!(out, b"sdsdas123\n--asd-");
        assert!(err
            .chain()
            .any(|e| matches!(e, Error::MalformedByterange { .. })));
        assert!(err.chain().any(|e| matches!(e, Error::UnexpectedEof)));
    }

    #[test]
    fn test_source_error_is_wrapped() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "bad!"))
            }
        }

        let mut r = MultipartByterangesReader::new(FailingReader, "asd");
        let (out, err) = read_all(&mut r);
        let err = err.expect("source failure must surface");

        assert!(out.is_empty());
        assert!(err
            .chain()
            .any(|e| matches!(e, Error::MalformedByterange { .. })));
        assert!(err
            .chain()
            .any(|e| matches!(e, Error::Io(io) if io.kind() == io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn test_boundary_too_long() {
        let boundary = "b".repeat(MIN_ACC_SIZE + 1);
        let mut r = MultipartByterangesReader::with_accumulator_size(
            Cursor::new(b"--irrelevant".to_vec()),
            boundary,
            MIN_ACC_SIZE,
        );
        let err = r.read(&mut [0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::BoundaryTooLong { .. }));
        // And it stays that way
        assert!(r.read(&mut [0u8; 8]).is_err());
    }

    #[test]
    fn test_unexpected_symbol_after_boundary_cr() {
        let input = b"--asd\rX";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        let err = err.expect("dead end must fail");

        assert!(out.is_empty());
        assert!(err
            .chain()
            .any(|e| matches!(e, Error::MalformedByterange { .. })));
        assert!(matches!(err.root_cause(), Error::UnexpectedSymbol(b'X')));
    }

    #[test]
    fn test_body_containing_boundary_lookalikes() {
        // A lone "-boundary" or a "--bogus" run inside the body is data
        let input = b"--asd\n\nkeep -asd and --x\n--asd--\n";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(out, b"keep -asd and --x");
    }

    #[test]
    fn test_empty_part_body() {
        let input = b"--asd\r\nContent-Range: bytes 0-0/10\r\n\r\n\r\n--asd--\r\n";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert!(out.is_empty());
    }

    #[test]
    fn test_junk_preamble_is_discarded() {
        let input = b"junk line\n--asd\r\n\r\nbody\r\n--asd--\r\n";
        let mut r = MultipartByterangesReader::new(Cursor::new(input.to_vec()), "asd");
        let (out, err) = read_all(&mut r);
        assert!(err.is_none(), "unexpected error: {err:?}");
        assert_eq!(out, b"body");
    }
}
