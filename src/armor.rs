//! ASCII armor glue.
//!
//! Armor is written with LF line endings.  MIME wants CRLF, so
//! callers route the output through a [`CrlfWriter`].
//!
//! [`CrlfWriter`]: crate::crlf::CrlfWriter

use std::io::{self, BufRead, Read};

use sequoia_openpgp as openpgp;
use openpgp::armor;

use crate::mime::header::trim_eol;
use crate::Result;

const MESSAGE_TAG: &[u8] = b"-----BEGIN PGP MESSAGE-----";

/// Returns whether `data` is an armored OpenPGP message.
///
/// Leading blank lines are skipped.  The first non-blank line must be
/// the armor header line.
pub fn is_armored_message(data: &[u8]) -> bool {
    data.split(|&b| b == b'\n')
        .map(|line| trim_ascii(line))
        .find(|line| ! line.is_empty())
        .map(|line| line == MESSAGE_TAG)
        .unwrap_or(false)
}

/// Reads up to and including the first non-blank line.
///
/// Returns the bytes read and whether the line is the header line of
/// an armored message.  The caller is expected to replay the bytes.
pub(crate) fn sniff_message<R: BufRead>(r: &mut R) -> io::Result<(Vec<u8>, bool)> {
    let mut prefix = Vec::new();
    loop {
        let start = prefix.len();
        if r.read_until(b'\n', &mut prefix)? == 0 {
            return Ok((prefix, false));
        }

        let line = trim_ascii(trim_eol(&prefix[start..]));
        if ! line.is_empty() {
            let armored = line == MESSAGE_TAG;
            return Ok((prefix, armored));
        }
    }
}

/// Returns a reader that strips the armor from an OpenPGP message.
pub(crate) fn message_reader<'a, R>(r: R) -> armor::Reader<'a>
    where R: Read + Send + Sync + 'a
{
    armor::Reader::from_reader(
        r, armor::ReaderMode::Tolerant(Some(armor::Kind::Message)))
}

/// Returns a reader that strips the armor from a detached signature.
///
/// Any armor label is accepted: some implementations label detached
/// signatures `PGP MESSAGE`.
pub(crate) fn signature_reader(bytes: &[u8]) -> armor::Reader<'_> {
    armor::Reader::from_bytes(bytes, armor::ReaderMode::Tolerant(None))
}

/// Armors a detached signature.
pub(crate) fn armor_signature(sig: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut w = wrap_err!(
        armor::Writer::new(Vec::new(), armor::Kind::Signature),
        SignerFailed,
        "Creating armor writer")?;
    w.write_all(sig)?;
    wrap_err!(w.finalize(), SignerFailed, "Finalizing armor")
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}
