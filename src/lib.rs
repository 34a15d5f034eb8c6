//! PGP/MIME for e-mail bodies.
//!
//! This crate implements [RFC 3156] on top of [Sequoia]:
//!
//!   - [`read`] and [`Reader::new`] decode a message.  A
//!     multipart/encrypted body is decrypted, a multipart/signed body
//!     is verified as it is read, and anything else is passed
//!     through.  Signed content that was then encrypted (RFC 1847,
//!     section 6.1) is handled too.
//!
//!   - [`encrypt`] and [`sign`] return writers that turn a MIME entity
//!     into a multipart/encrypted or a multipart/signed message.
//!
//! Signatures cover the whole signed part, so they are only checked
//! once the body has been read to the end.  Until then,
//! [`MessageDetails::signature_error`] reports
//! [`Error::SignatureUnchecked`].
//!
//! ```no_run
//! # fn main() -> pgpmail::Result<()> {
//! use std::io::Read;
//!
//! let keyring = pgpmail::KeyRing::from_bytes(&std::fs::read("keys.pgp")?)?;
//! let mut r = pgpmail::read(std::fs::File::open("message.eml")?, &keyring)?;
//!
//! let mut body = Vec::new();
//! r.details.read_to_end(&mut body)?;
//! if let Some(err) = r.details.signature_error() {
//!     eprintln!("Not authenticated: {}", err);
//! }
//! # Ok(()) }
//! ```
//!
//! [RFC 3156]: https://www.rfc-editor.org/rfc/rfc3156
//! [Sequoia]: https://sequoia-pgp.org

use std::env;

use sequoia_openpgp as openpgp;
use openpgp::policy::StandardPolicy;

#[macro_use] mod log;
#[macro_use] mod error;
pub use error::{
    Error,
    Result,
};

mod armor;
pub use armor::is_armored_message;
mod config;
pub use config::{
    BoundaryGenerator,
    Config,
    FixedBoundary,
    RandomBoundary,
};
mod constants;
mod crlf;
pub use crlf::{
    Canonicalizer,
    CrlfWriter,
    ShortBuffer,
};
mod decrypt;
mod details;
pub use details::MessageDetails;
mod header_writer;
mod keyring;
pub use keyring::{
    KeyRef,
    KeyRing,
    KeyUsage,
};
mod micalg;
pub use micalg::MicAlg;
pub mod mime;
pub use mime::{
    Header,
    MediaType,
    MultipartReader,
    MultipartWriter,
};
mod reader;
pub use reader::{
    decrypt_inline,
    read,
    Reader,
};
mod signer;
mod verify;
mod writer;
pub use writer::{
    encrypt,
    sign,
    EncryptWriter,
    SignWriter,
};

#[cfg(test)]
mod testing;

// If the PGPMAIL_TRACE environment variable is set or we are built in
// debug mode, then enable tracing.
lazy_static::lazy_static! {
    static ref TRACE: bool = {
        cfg!(debug_assertions) || env::var_os("PGPMAIL_TRACE").is_some()
    };
}

/// The policy used to decide which keys, signatures and algorithms
/// are acceptable.
pub const P: &StandardPolicy = &StandardPolicy::new();
