//! Streaming multipart bodies (RFC 2046, section 5.1).

use std::io::{self, BufRead, Read, Write};

use crate::constants::MAX_LINE;
use crate::mime::Header;
use crate::mime::header::trim_eol;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    // Before the first delimiter.
    Preamble,
    // Reading a part's body.
    InPart,
    // Just read a delimiter; the next thing is a part's header.
    BetweenParts,
    // Read the closing delimiter (or gave up).
    Done,
}

/// Reads the parts of a multipart body.
///
/// Call [`MultipartReader::next_part`] to advance to the next part;
/// the part's body is then read using the `Read` implementation,
/// which returns EOF at the end of the part.  The line break before a
/// delimiter belongs to the delimiter, not to the part.
pub struct MultipartReader<R: BufRead> {
    inner: R,
    dash_boundary: Vec<u8>,
    state: State,

    // Body data that has been read, but not yet returned.
    pending: Vec<u8>,
    pending_pos: usize,
    // The line break of the last body line.  We only know whether it
    // is part of the body once we've seen the next line.
    held_eol: Vec<u8>,
    // The current line.  Long lines are read in pieces of at most
    // MAX_LINE bytes.
    line: Vec<u8>,
    // Whether `line` starts at the beginning of a line.
    at_line_start: bool,
    // The current part's header as read.
    raw_header: Vec<u8>,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new<B: AsRef<str>>(inner: R, boundary: B) -> Self {
        let mut dash_boundary = b"--".to_vec();
        dash_boundary.extend_from_slice(boundary.as_ref().as_bytes());

        MultipartReader {
            inner,
            dash_boundary,
            state: State::Preamble,
            pending: Vec::new(),
            pending_pos: 0,
            held_eol: Vec::new(),
            line: Vec::new(),
            at_line_start: true,
            raw_header: Vec::new(),
        }
    }

    /// Advances to the next part and returns its header.
    ///
    /// Any unread data in the current part is skipped.  Returns
    /// `None` after the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<Header>> {
        loop {
            match self.state {
                State::Preamble => {
                    if ! self.read_line()? {
                        // No parts at all.
                        self.state = State::Done;
                        continue;
                    }
                    match self.delimiter() {
                        Some(true) => self.state = State::Done,
                        Some(false) => self.state = State::BetweenParts,
                        None => (),
                    }
                }
                State::InPart => {
                    io::copy(self, &mut io::sink())?;
                }
                State::BetweenParts => {
                    self.raw_header.clear();
                    let header = Header::read_raw(&mut self.inner,
                                                  &mut self.raw_header)?;
                    self.state = State::InPart;
                    self.pending.clear();
                    self.pending_pos = 0;
                    self.held_eol.clear();
                    return Ok(Some(header));
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Returns the current part's header exactly as it appeared on
    /// the wire, including the terminating empty line.
    pub fn raw_header(&self) -> &[u8] {
        &self.raw_header
    }

    /// Returns the underlying reader.
    ///
    /// This is positioned after whatever has been consumed so far.
    pub fn into_inner(self) -> R {
        self.inner
    }

    // Reads the next line, or the next piece of a long line, into
    // self.line.  Returns false on EOF.
    fn read_line(&mut self) -> io::Result<bool> {
        self.at_line_start = self.line.is_empty() || self.line.ends_with(b"\n");
        self.line.clear();

        let n = self.inner.by_ref().take(MAX_LINE)
            .read_until(b'\n', &mut self.line)?;

        // Don't split a CRLF between two pieces.
        if self.line.ends_with(b"\r")
            && self.inner.fill_buf()?.first() == Some(&b'\n')
        {
            self.inner.consume(1);
            self.line.push(b'\n');
        }

        Ok(n > 0)
    }

    // If self.line is a delimiter line, returns whether it is the
    // closing delimiter.
    fn delimiter(&self) -> Option<bool> {
        if ! self.at_line_start {
            return None;
        }
        let rest = self.line.strip_prefix(&self.dash_boundary[..])?;
        let (last, rest) = match rest.strip_prefix(b"--") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };

        // Allow transport padding.
        if rest.iter().all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n')) {
            Some(last)
        } else {
            None
        }
    }
}

impl<R: BufRead> Read for MultipartReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending_pos == self.pending.len() {
            if self.state != State::InPart {
                return Ok(0);
            }

            if ! self.read_line()? {
                self.state = State::Done;
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "multipart: missing closing delimiter"));
            }

            if let Some(last) = self.delimiter() {
                self.held_eol.clear();
                self.state = if last { State::Done } else { State::BetweenParts };
                return Ok(0);
            }

            let content = trim_eol(&self.line);
            self.pending.clear();
            self.pending_pos = 0;
            self.pending.extend_from_slice(&self.held_eol);
            self.pending.extend_from_slice(content);

            self.held_eol.clear();
            self.held_eol.extend_from_slice(&self.line[content.len()..]);
        }

        let n = std::cmp::min(buf.len(), self.pending.len() - self.pending_pos);
        buf[..n].copy_from_slice(
            &self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        Ok(n)
    }
}

/// Writes a multipart body.
///
/// [`MultipartWriter::create_part`] starts a new part; data written
/// using the `Write` implementation goes into the current part.
/// [`MultipartWriter::close`] writes the closing delimiter.
pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
    parts: usize,
    closed: bool,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new<B: Into<String>>(inner: W, boundary: B) -> Self {
        MultipartWriter {
            inner,
            boundary: boundary.into(),
            parts: 0,
            closed: false,
        }
    }

    /// Starts a new part with the given header.
    pub fn create_part(&mut self, header: &Header) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other,
                                      "multipart: writer closed"));
        }

        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(self.inner, "--{}\r\n", self.boundary)?;
        header.write(&mut self.inner)?;
        self.parts += 1;
        Ok(())
    }

    /// Writes the closing delimiter.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(self.inner, "--{}--\r\n", self.boundary)?;
        self.inner.flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for MultipartWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.parts == 0 || self.closed {
            return Err(io::Error::new(io::ErrorKind::Other,
                                      "multipart: no open part"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
