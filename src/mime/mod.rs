//! The bits of MIME that PGP/MIME needs.
//!
//! Ordered headers, Content-Type parsing and streaming multipart
//! framing.  Transfer encodings and charsets are left to the caller.

pub(crate) mod header;
pub use header::Header;

mod media_type;
pub use media_type::MediaType;

mod multipart;
pub use multipart::{
    MultipartReader,
    MultipartWriter,
};

use crate::Result;

/// Returns the header's parsed Content-Type.
///
/// A missing Content-Type means `text/plain` (RFC 2045, section
/// 5.2).  A malformed one is an error.
pub fn content_type(header: &Header) -> Result<MediaType> {
    match header.get("Content-Type") {
        Some(value) => MediaType::parse(value),
        None => Ok(MediaType::new("text/plain")),
    }
}
