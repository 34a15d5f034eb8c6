//! Captures the header at the start of a written MIME entity.

use std::io::{self, Write};

use crate::mime::{Header, MultipartWriter};
use crate::Error;

/// A writer that starts a new part when it is given its header.
pub(crate) trait PartWriter: Write {
    fn create_part(&mut self, header: &Header) -> io::Result<()>;
}

impl<W: Write> PartWriter for MultipartWriter<W> {
    fn create_part(&mut self, header: &Header) -> io::Result<()> {
        MultipartWriter::create_part(self, header)
    }
}

/// Buffers writes until the entity's header is complete.
///
/// The header ends at the first empty line, terminated by either
/// CRLF or LF.  Once it has been seen, the header is parsed, the
/// inner writer's part is created, and everything else is passed
/// through.  Writes may be split at any byte.
pub(crate) struct HeaderWriter<W: PartWriter> {
    inner: W,
    // The header bytes seen so far.  `None` once the part has been
    // created.
    header: Option<Vec<u8>>,
    // The last three bytes of the header.
    tail: [u8; 3],
    // Set if the header could not be parsed.  Every later write and
    // `finish` fail with this.
    failed: Option<String>,
}

impl<W: PartWriter> HeaderWriter<W> {
    pub fn new(inner: W) -> Self {
        HeaderWriter {
            inner,
            header: Some(Vec::new()),
            // The start of the stream counts as the end of a line so
            // that an entity without fields is recognized.
            tail: [0, 0, b'\n'],
            failed: None,
        }
    }

    /// Returns the inner writer.
    ///
    /// If the header is incomplete, the end of the stream ends it and
    /// the part is created now.
    pub fn finish(mut self) -> io::Result<W> {
        self.start_part()?;
        Ok(self.inner)
    }

    // Returns the number of bytes of `buf` up to and including the
    // header terminator.
    fn scan(&mut self, buf: &[u8]) -> Option<usize> {
        for (i, &b) in buf.iter().enumerate() {
            let [_, prev2, prev] = self.tail;
            self.tail = [prev2, prev, b];

            if b == b'\n' && (prev == b'\n' || (prev == b'\r' && prev2 == b'\n')) {
                return Some(i + 1);
            }
        }
        None
    }

    fn check(&self) -> io::Result<()> {
        match self.failed.as_ref() {
            Some(msg) => Err(Error::MalformedHeader(msg.clone()).into()),
            None => Ok(()),
        }
    }

    fn start_part(&mut self) -> io::Result<()> {
        tracer!(*crate::TRACE, "HeaderWriter::start_part");

        self.check()?;
        let raw = match self.header.take() {
            Some(raw) => raw,
            None => return Ok(()),
        };

        let mut header = match Header::read(&mut &raw[..]) {
            Ok(header) => header,
            Err(err) => {
                t!("Bad header: {}", err);
                let msg = match err {
                    Error::MalformedHeader(msg) => msg,
                    err => err.to_string(),
                };
                self.failed = Some(msg.clone());
                return Err(Error::MalformedHeader(msg).into());
            }
        };
        // Only allowed in the message header.
        header.del("Mime-Version");
        header.terminate();
        t!("Captured {} field(s) in {} bytes", header.len(), raw.len());

        self.inner.create_part(&header)
    }
}

impl<W: PartWriter> Write for HeaderWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        if self.header.is_none() {
            return self.inner.write(buf);
        }

        let end = self.scan(buf);
        let split = end.unwrap_or(buf.len());
        if let Some(header) = self.header.as_mut() {
            header.extend_from_slice(&buf[..split]);
        }

        if end.is_some() {
            self.start_part()?;
            self.inner.write_all(&buf[split..])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
