use std::io::{self, BufRead, Read, Write};

use crate::constants::MAX_LINE;
use crate::Error;
use crate::Result;

#[derive(Debug, Clone)]
struct Field {
    name: String,
    value: String,
    // The field's lines as read.  `None` if the field was added.
    raw: Option<Vec<u8>>,
}

impl Field {
    fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        match self.raw.as_ref() {
            Some(raw) => w.write_all(raw),
            None => write!(w, "{}: {}\r\n", self.name, self.value),
        }
    }

    fn ends_line(&self) -> bool {
        self.raw.as_ref().map(|raw| raw.ends_with(b"\n")).unwrap_or(true)
    }
}

/// A MIME header.
///
/// An ordered list of fields.  Lookups are case-insensitive.  Fields
/// are written in the order they were added.
///
/// A header that was read keeps its fields' original bytes, including
/// folding and line endings, and writes unchanged fields back
/// verbatim.
#[derive(Debug, Clone, Default)]
pub struct Header {
    fields: Vec<Field>,
    // The line that ended the header as read, empty if the data
    // ended first.  `None` once the header has been changed.
    end: Option<Vec<u8>>,
}

impl PartialEq for Header {
    fn eq(&self, other: &Header) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Header {}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first field called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Returns the values of all fields called `name`.
    pub fn get_all<'a, 'b>(&'a self, name: &'b str)
        -> impl Iterator<Item = &'a str> + use<'a, 'b>
    {
        self.fields.iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
            .map(|f| &f.value[..])
    }

    /// Returns whether there is a field called `name`.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets the field `name` to `value`.
    ///
    /// If the field is already present, the first instance is
    /// replaced in place and any other instances are removed.
    /// Otherwise, the field is appended.
    pub fn set<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>
    {
        let field = Field {
            name: name.into(),
            value: value.into(),
            raw: None,
        };
        self.end = None;

        match self.fields.iter().position(|f| f.name.eq_ignore_ascii_case(&field.name)) {
            Some(i) => {
                let mut j = 0;
                self.fields.retain(|f| {
                    let keep = j <= i || ! f.name.eq_ignore_ascii_case(&field.name);
                    j += 1;
                    keep
                });
                self.fields[i] = field;
            }
            None => self.fields.push(field),
        }
    }

    /// Appends a field, even if one with the same name exists.
    pub fn add<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>
    {
        self.end = None;
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            raw: None,
        });
    }

    /// Removes all fields called `name`.
    pub fn del(&mut self, name: &str) {
        let len = self.fields.len();
        self.fields.retain(|f| ! f.name.eq_ignore_ascii_case(name));
        if self.fields.len() != len {
            self.end = None;
        }
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns whether the header has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over the fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (&f.name[..], &f.value[..]))
    }

    /// Reads a header.
    ///
    /// Reads up to and including the empty line that terminates the
    /// header.  Both CRLF and bare LF line endings are accepted.  The
    /// end of the stream also terminates the header.  Folded fields
    /// are unfolded.
    pub fn read<R: BufRead>(r: &mut R) -> Result<Header> {
        Self::read_raw(r, &mut Vec::new())
    }

    /// Like [`Header::read`], but also appends the bytes that were
    /// read to `raw`.
    pub fn read_raw<R: BufRead>(r: &mut R, raw: &mut Vec<u8>) -> Result<Header> {
        let malformed = |msg: String| Error::MalformedHeader(msg);

        // Where each field starts in `raw`.
        let mut starts = Vec::new();
        let mut end = Vec::new();

        loop {
            let line = raw.len();
            let n = r.by_ref().take(MAX_LINE).read_until(b'\n', raw)?;
            if n == 0 {
                break;
            }
            if n as u64 == MAX_LINE && raw.last() != Some(&b'\n') {
                return Err(malformed(format!("line exceeds {} bytes", MAX_LINE)));
            }

            let text = &raw[line..];
            if trim_eol(text).is_empty() {
                end = text.to_vec();
                break;
            }

            if text[0] == b' ' || text[0] == b'\t' {
                if starts.is_empty() {
                    return Err(malformed(
                        "continuation line without a field".into()));
                }
            } else if text.contains(&b':') {
                starts.push(line);
            } else {
                return Err(malformed(format!(
                    "missing colon in {:?}",
                    String::from_utf8_lossy(trim_eol(text)))));
            }
        }

        let mut header = Header::new();
        let fields_end = raw.len() - end.len();

        if let Some(&first) = starts.first() {
            let (parsed, _) = mailparse::parse_headers(&raw[first..fields_end])
                .map_err(|err| malformed(err.to_string()))?;
            if parsed.len() != starts.len() {
                return Err(malformed(format!(
                    "expected {} fields, got {}", starts.len(), parsed.len())));
            }

            for (i, field) in parsed.iter().enumerate() {
                let name = field.get_key();
                if name.is_empty()
                    || name.bytes().any(|b| b <= b' ' || b >= 0x7f)
                {
                    return Err(malformed(format!("invalid field name {:?}", name)));
                }

                let to = starts.get(i + 1).copied().unwrap_or(fields_end);
                header.fields.push(Field {
                    name,
                    value: field.get_value().trim().to_string(),
                    raw: Some(raw[starts[i]..to].to_vec()),
                });
            }
        }

        header.end = Some(end);
        Ok(header)
    }

    /// Makes sure the header is followed by an empty line when it is
    /// written, even if it was read from data that ended early.
    pub(crate) fn terminate(&mut self) {
        if self.end.as_ref().map(|end| end.is_empty()).unwrap_or(false) {
            self.end = None;
        }
    }

    /// Writes the header in wire form, followed by the empty line.
    ///
    /// Fields that were read are written as they were read.  An
    /// unchanged header that was read is reproduced exactly.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        for field in self.fields.iter() {
            field.write(w)?;
        }

        match self.end.as_ref() {
            Some(end) => w.write_all(end),
            None => {
                if ! self.fields.last().map(Field::ends_line).unwrap_or(true) {
                    w.write_all(b"\r\n")?;
                }
                w.write_all(b"\r\n")
            }
        }
    }

    /// Writes the header with the fields sorted by name.
    ///
    /// Fields with the same name keep their relative order.  Fields
    /// are written unfolded with CRLF line endings.  This gives a
    /// deterministic serialization independent of the order in which
    /// fields were set.
    pub fn write_sorted<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut fields: Vec<(&str, &str)> = self.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in fields {
            write!(w, "{}: {}\r\n", name, value)?;
        }
        w.write_all(b"\r\n")
    }

    /// Returns the header's wire form.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing to a Vec can't fail.
        let _ = self.write(&mut buf);
        buf
    }
}

// Strips a trailing LF or CRLF.
pub(crate) fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
