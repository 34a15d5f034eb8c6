// Media types and parameters used by RFC 3156.
pub const MULTIPART_ENCRYPTED: &str = "multipart/encrypted";
pub const MULTIPART_SIGNED: &str = "multipart/signed";
pub const PGP_ENCRYPTED: &str = "application/pgp-encrypted";
pub const PGP_SIGNATURE: &str = "application/pgp-signature";
pub const OCTET_STREAM: &str = "application/octet-stream";

// The body of the application/pgp-encrypted control part.
pub const CONTROL_BODY: &[u8] = b"Version: 1\r\n";

// The number of chunks that may be queued between a sign writer and
// the background signer before writes block.
pub const PIPE_DEPTH: usize = 16;

// The length, in random bytes, of a generated multipart boundary.
// Hex encoded this is well below RFC 2046's 70 character limit.
pub const BOUNDARY_BYTES: usize = 30;

// Lines longer than this are handled in pieces.  RFC 5322 limits a
// line to 998 characters, but bodies are not always compliant.
pub const MAX_LINE: u64 = 8 * 1024;
