use std::io::{self, Read};

use sequoia_openpgp as openpgp;
use openpgp::KeyID;

use crate::Error;
use crate::KeyRef;

// Reported for signed messages whose body has not been read to the
// end.
static UNCHECKED: Error = Error::SignatureUnchecked;

// The outcome of checking a message's signatures.
#[derive(Debug, Default)]
pub(crate) struct Verification<'a> {
    // The issuer of the last signature considered.
    pub signed_by_key_id: Option<KeyID>,
    // The key that made a good signature.
    pub signed_by: Option<KeyRef<'a>>,
    pub error: Option<Error>,
}

// A decoded body.
//
// Signatures can only be checked once the whole body has been read.
// Until then, `verification` returns `None`.
pub(crate) trait Body<'a>: Read {
    fn is_signed(&self) -> bool;
    fn verification(&self) -> Option<&Verification<'a>>;
}

// A body that is neither encrypted nor signed: some bytes followed by
// the rest of a stream.
pub(crate) struct PlainBody<R: Read> {
    inner: io::Chain<io::Cursor<Vec<u8>>, R>,
}

impl<R: Read> PlainBody<R> {
    pub fn new(prefix: Vec<u8>, rest: R) -> Self {
        PlainBody {
            inner: io::Cursor::new(prefix).chain(rest),
        }
    }
}

impl<R: Read> Read for PlainBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<'a, R: Read> Body<'a> for PlainBody<R> {
    fn is_signed(&self) -> bool {
        false
    }

    fn verification(&self) -> Option<&Verification<'a>> {
        None
    }
}

/// A decoded message.
///
/// Reading from a `MessageDetails` returns the plaintext.  The
/// plaintext is *not* authenticated while it is being read: a
/// signature covers the whole body, so it can only be checked after
/// the last byte has been read.  Callers that care about
/// authenticity must read the body to the end and then check
/// [`MessageDetails::signature_error`] before trusting the content.
pub struct MessageDetails<'a> {
    is_encrypted: bool,
    encrypted_to_key_ids: Vec<KeyID>,
    body: Box<dyn Body<'a> + 'a>,
}

impl<'a> MessageDetails<'a> {
    pub(crate) fn new<B: Body<'a> + 'a>(body: B) -> Self {
        MessageDetails {
            is_encrypted: false,
            encrypted_to_key_ids: Vec::new(),
            body: Box::new(body),
        }
    }

    // Marks the message as encrypted.
    pub(crate) fn encrypted(mut self, encrypted_to_key_ids: Vec<KeyID>) -> Self {
        self.is_encrypted = true;
        self.encrypted_to_key_ids = encrypted_to_key_ids;
        self
    }

    /// Returns whether the message was encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    /// Returns the key IDs the message was encrypted to.
    ///
    /// This includes recipients that are not in the key ring.
    pub fn encrypted_to_key_ids(&self) -> &[KeyID] {
        &self.encrypted_to_key_ids
    }

    /// Returns whether the message is signed.
    pub fn is_signed(&self) -> bool {
        self.body.is_signed()
    }

    /// Returns the issuer of the signature.
    ///
    /// Only available once the body has been read to the end.
    pub fn signed_by_key_id(&self) -> Option<&KeyID> {
        self.body.verification()
            .and_then(|v| v.signed_by_key_id.as_ref())
    }

    /// Returns the key that made a good signature, if any.
    ///
    /// Only available once the body has been read to the end.
    pub fn signed_by(&self) -> Option<&KeyRef<'a>> {
        self.body.verification()
            .and_then(|v| v.signed_by.as_ref())
    }

    /// Returns why the signature is not valid.
    ///
    /// Returns `None` if the message is not signed, or if it is
    /// signed and a signature checked out.  If the body has not been
    /// read to the end, returns [`Error::SignatureUnchecked`].
    pub fn signature_error(&self) -> Option<&Error> {
        if ! self.body.is_signed() {
            return None;
        }

        match self.body.verification() {
            None => Some(&UNCHECKED),
            Some(v) => v.error.as_ref(),
        }
    }
}

impl<'a> Read for MessageDetails<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain() {
        let mut md = MessageDetails::new(
            PlainBody::new(b"Subject: hi\r\n\r\n".to_vec(), &b"body"[..]));
        assert!(! md.is_encrypted());
        assert!(! md.is_signed());
        assert!(md.signature_error().is_none());

        let mut body = Vec::new();
        md.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"Subject: hi\r\n\r\nbody");
        assert!(md.signature_error().is_none());
        assert!(md.signed_by().is_none());
    }
}
