use std::io;

use sequoia_openpgp as openpgp;
use openpgp::KeyID;
use openpgp::types::HashAlgorithm;

// Transforms an error from some error type to the crate's Error.
macro_rules! wrap_err {
    ($e:expr, $err:ident, $msg:expr) => {
        $e.map_err(|err| {
            let err = anyhow::Error::from(err);
            if *crate::TRACE {
                ::log::trace!("Error: {}: {}\n{:?}",
                              err, $msg, backtrace::Backtrace::new());
            }
            crate::Error::$err(err, String::from($msg))
        })
    }
}

// We use Error rather than anyhow's error so that callers can match
// on what went wrong: a broken message structure, a key problem, or
// a signature that doesn't check out.
pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Structural errors.  These abort decoding.
    #[error("Malformed Content-Type: {0:?}")]
    BadContentType(String),
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Malformed message: {1}")]
    MalformedMessage(#[source] anyhow::Error, String),
    #[error("Missing {0} part")]
    MissingPart(&'static str),
    #[error("{part} part has type {got:?}, not {want}")]
    UnexpectedMediaType {
        part: &'static str,
        got: String,
        want: &'static str,
    },
    #[error("Unsupported PGP/MIME version: {0:?}")]
    UnsupportedVersion(String),

    // Decryption.
    #[error("Decryption failed: no key")]
    DecryptNoKey(#[source] anyhow::Error),
    #[error("Decryption failed: {1}")]
    DecryptFailed(#[source] anyhow::Error, String),
    #[error("Passphrase required")]
    PassphraseRequired,
    #[error("Bad passphrase: {1}")]
    WrongPassphrase(#[source] anyhow::Error, String),

    // Signature verification.  These are recorded, not returned.
    #[error("micalg mismatch: multipart header indicates {header} \
             but signature packet indicates {packet}")]
    MicAlgMismatch {
        header: HashAlgorithm,
        packet: HashAlgorithm,
    },
    #[error("Signature doesn't have an issuer")]
    MissingIssuer,
    #[error("Signature made by unknown key {0:?}")]
    UnknownIssuer(Option<KeyID>),
    #[error("Bad signature from {1}")]
    BadSignature(#[source] anyhow::Error, KeyID),
    #[error("Malformed signature: {1}")]
    MalformedSignature(#[source] anyhow::Error, String),
    #[error("Signature not checked: the body has not been read to the end")]
    SignatureUnchecked,

    // Configuration.
    #[error("Unsupported micalg {0:?}")]
    UnsupportedMicAlg(String),
    #[error("No usable signing key: {1}")]
    NoSigningKey(#[source] anyhow::Error, String),
    #[error("{0} has no usable encryption-capable key")]
    NoEncryptionKey(String),
    #[error("Key unsuitable: {1}")]
    KeyUnsuitable(#[source] anyhow::Error, String),

    // Encoding.
    #[error("Signing failed: {1}")]
    SignerFailed(#[source] anyhow::Error, String),
    #[error("Encryption failed: {1}")]
    EncryptFailed(#[source] anyhow::Error, String),
    #[error("Writer already closed")]
    AlreadyClosed,

    #[error("I/O error")]
    Io(#[source] io::Error),
    #[error("Unknown error: {1}")]
    UnknownError(#[source] anyhow::Error, String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Errors that crossed a Read or Write seam are wrapped in an
        // io::Error.  Unwrap them again.
        if ! err.get_ref().map(|e| e.is::<Error>()).unwrap_or(false) {
            return Error::Io(err);
        }

        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<Error>() {
                Ok(err) => *err,
                Err(inner) => Error::Io(io::Error::new(kind, inner)),
            },
            None => Error::Io(io::Error::from(kind)),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}
