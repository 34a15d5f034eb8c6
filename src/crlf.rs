//! Line ending canonicalization.
//!
//! OpenPGP armor and canonical text use bare LF internally, but
//! MIME requires CRLF.  [`Canonicalizer`] rewrites every LF that is
//! not preceded by a CR to CRLF, carrying the "previous byte was CR"
//! bit across calls.  [`CrlfWriter`] applies it to a stream.

use std::io::{self, Write};

/// Returned by [`Canonicalizer::transform`] if `dst` is full.
///
/// `written` bytes were stored in `dst` and `consumed` bytes of `src`
/// were processed.  The caller should drain or grow `dst` and call
/// `transform` again with the remaining input.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("output buffer too small ({written} bytes written, {consumed} consumed)")]
pub struct ShortBuffer {
    pub written: usize,
    pub consumed: usize,
}

/// Converts lone LFs to CRLFs.
#[derive(Debug, Default, Clone)]
pub struct Canonicalizer {
    cr: bool,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transforms `src` into `dst`.
    ///
    /// On success, returns `(written, consumed)`, where `consumed`
    /// is always `src.len()`.  A byte is either transformed
    /// completely or not at all; a LF that needs a CR inserted is
    /// only consumed if both bytes fit.
    pub fn transform(&mut self, dst: &mut [u8], src: &[u8])
        -> Result<(usize, usize), ShortBuffer>
    {
        let mut written = 0;

        for (consumed, &c) in src.iter().enumerate() {
            let need = if c == b'\n' && ! self.cr { 2 } else { 1 };
            if written + need > dst.len() {
                return Err(ShortBuffer { written, consumed });
            }

            if need == 2 {
                dst[written] = b'\r';
                written += 1;
            }
            dst[written] = c;
            written += 1;

            self.cr = c == b'\r';
        }

        Ok((written, src.len()))
    }

    /// Forgets whether the last byte was a CR.
    pub fn reset(&mut self) {
        self.cr = false;
    }
}

/// A writer that canonicalizes line endings to CRLF.
pub struct CrlfWriter<W: Write> {
    inner: W,
    canon: Canonicalizer,
    buffer: Vec<u8>,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        CrlfWriter {
            inner,
            canon: Canonicalizer::new(),
            buffer: Vec::new(),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        // In the worst case every byte is a lone LF.
        self.buffer.resize(buf.len() * 2, 0);

        let mut src = buf;
        while ! src.is_empty() {
            let (written, consumed) =
                match self.canon.transform(&mut self.buffer, src) {
                    Ok(r) => r,
                    Err(ShortBuffer { written, consumed }) => {
                        let len = self.buffer.len();
                        self.buffer.resize(len * 2, 0);
                        (written, consumed)
                    }
                };
            self.inner.write_all(&self.buffer[..written])?;
            src = &src[consumed..];
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
