//! Decoding PGP/MIME messages.
//!
//! See RFC 3156, sections 4 and 5.

use std::io::{self, BufRead, BufReader, Read};

use sequoia_openpgp as openpgp;
use openpgp::KeyID;

use crate::armor;
use crate::constants::{
    MULTIPART_ENCRYPTED,
    MULTIPART_SIGNED,
    OCTET_STREAM,
    PGP_ENCRYPTED,
    PGP_SIGNATURE,
};
use crate::decrypt::{decryptor, DecryptedBody, Helper};
use crate::details::{MessageDetails, PlainBody};
use crate::mime::{self, Header, MediaType, MultipartReader};
use crate::verify::SignedReader;
use crate::Error;
use crate::KeyRing;
use crate::MicAlg;
use crate::Result;

/// A decoded message.
pub struct Reader<'a> {
    /// The message's header.
    ///
    /// For a signed message that was encrypted (RFC 1847
    /// encapsulation), this is the header of the decrypted
    /// multipart/signed entity.
    pub header: Header,
    pub details: MessageDetails<'a>,
}

/// Reads a message's header and decodes the message.
pub fn read<'a, R>(r: R, keyring: &'a KeyRing) -> Result<Reader<'a>>
    where R: Read + Send + Sync + 'a
{
    let mut r = BufReader::new(r);
    let header = Header::read(&mut r)?;
    Reader::new(header, r, keyring)
}

impl<'a> Reader<'a> {
    /// Decodes a message whose header has already been read.
    ///
    /// Encrypted messages are decrypted using the secret keys in
    /// `keyring`, signatures are checked against its certificates.
    /// Anything that is not PGP/MIME is passed through.
    pub fn new<R>(header: Header, body: R, keyring: &'a KeyRing)
        -> Result<Self>
        where R: BufRead + Send + Sync + 'a
    {
        tracer!(*crate::TRACE, "Reader::new");

        let ct = mime::content_type(&header)?;
        t!("Content-Type: {}", ct);

        if is_pgp_encrypted(&ct) {
            let mr = MultipartReader::new(body, boundary(&ct)?);
            return Self::encrypted(header, mr, keyring);
        }

        if is_pgp_signed(&ct) {
            let mr = MultipartReader::new(body, boundary(&ct)?);
            let signed = SignedReader::new(keyring, mr, micalg(&ct)?)?;
            return Ok(Reader {
                header,
                details: MessageDetails::new(signed),
            });
        }

        let prefix = header.to_vec();
        Ok(Reader {
            header,
            details: MessageDetails::new(PlainBody::new(prefix, body)),
        })
    }

    fn encrypted<R>(header: Header, mut mr: MultipartReader<R>,
                    keyring: &'a KeyRing)
        -> Result<Self>
        where R: BufRead + Send + Sync + 'a
    {
        tracer!(*crate::TRACE, "Reader::encrypted");

        let control = mr.next_part()?.ok_or(Error::MissingPart("control"))?;
        expect_media_type(&control, "control", PGP_ENCRYPTED)?;

        let mut body = Vec::new();
        mr.read_to_end(&mut body)?;
        let fields = Header::read(&mut &body[..])?;
        match fields.get("Version") {
            Some("1") => (),
            version => return Err(Error::UnsupportedVersion(
                version.unwrap_or_default().into())),
        }

        let data = mr.next_part()?
            .ok_or(Error::MissingPart("encrypted data"))?;
        expect_media_type(&data, "encrypted data", OCTET_STREAM)?;

        let decryptor = decryptor(armor::message_reader(mr), keyring)?;
        let inline_signed = decryptor.helper_ref().is_signed();
        t!("Encrypted to {:?}, inline signature: {}",
           decryptor.helper_ref().recipients(), inline_signed);

        let mut plaintext = BufReader::new(decryptor);
        let mut raw = Vec::new();
        let inner = Header::read_raw(&mut plaintext, &mut raw)?;

        // Sign-then-encrypt (RFC 1847, section 6.1).
        if ! inline_signed {
            if let Ok(ct) = mime::content_type(&inner) {
                if is_pgp_signed(&ct) {
                    t!("Encapsulated multipart/signed");
                    let helper = plaintext.get_ref().helper_ref();
                    let recipients = recipients(helper);
                    let mr = MultipartReader::new(plaintext, boundary(&ct)?);
                    let signed = SignedReader::new(keyring, mr, micalg(&ct)?)?;
                    let mut details = MessageDetails::new(signed);
                    if let Some(recipients) = recipients {
                        details = details.encrypted(recipients);
                    }
                    return Ok(Reader {
                        header: inner,
                        details,
                    });
                }
            }
        }

        let recipients = recipients(plaintext.get_ref().helper_ref());
        let mut details = MessageDetails::new(DecryptedBody::new(raw, plaintext));
        if let Some(recipients) = recipients {
            details = details.encrypted(recipients);
        }
        Ok(Reader {
            header,
            details,
        })
    }
}

/// Decrypts a message that is armored, but not PGP/MIME encoded.
///
/// If `r` doesn't start with an armored message, it is passed
/// through.
pub fn decrypt_inline<'a, R>(r: R, keyring: &'a KeyRing)
    -> Result<MessageDetails<'a>>
    where R: Read + Send + Sync + 'a
{
    tracer!(*crate::TRACE, "decrypt_inline");

    let mut r = BufReader::new(r);
    let (prefix, armored) = armor::sniff_message(&mut r)?;
    if ! armored {
        t!("Not armored, passing through");
        return Ok(MessageDetails::new(PlainBody::new(prefix, r)));
    }

    let decryptor = decryptor(
        armor::message_reader(io::Cursor::new(prefix).chain(r)), keyring)?;
    let recipients = recipients(decryptor.helper_ref());
    let mut details = MessageDetails::new(
        DecryptedBody::new(Vec::new(), BufReader::new(decryptor)));
    if let Some(recipients) = recipients {
        details = details.encrypted(recipients);
    }
    Ok(details)
}

// Returns the recipients if the message was encrypted.
fn recipients(helper: &Helper) -> Option<Vec<KeyID>> {
    if helper.decrypted() {
        Some(helper.recipients().to_vec())
    } else {
        None
    }
}

fn is_pgp_encrypted(ct: &MediaType) -> bool {
    ct.is(MULTIPART_ENCRYPTED) && ct.param_is("protocol", PGP_ENCRYPTED)
}

fn is_pgp_signed(ct: &MediaType) -> bool {
    ct.is(MULTIPART_SIGNED) && ct.param_is("protocol", PGP_SIGNATURE)
}

fn boundary(ct: &MediaType) -> Result<&str> {
    match ct.param("boundary") {
        Some(b) if ! b.is_empty() => Ok(b),
        _ => Err(Error::BadContentType(
            format!("{} without a boundary", ct.essence()))),
    }
}

fn micalg(ct: &MediaType) -> Result<MicAlg> {
    MicAlg::from_token(ct.param("micalg").unwrap_or_default())
}

fn expect_media_type(header: &Header, part: &'static str, want: &'static str)
    -> Result<()>
{
    let ct = mime::content_type(header)?;
    if ct.is(want) {
        Ok(())
    } else {
        Err(Error::UnexpectedMediaType {
            part,
            got: ct.essence().into(),
            want,
        })
    }
}
