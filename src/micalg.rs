//! The `micalg` parameter of multipart/signed.
//!
//! See RFC 3156, section 5.

use std::fmt;
use std::str::FromStr;

use sequoia_openpgp as openpgp;
use openpgp::types::HashAlgorithm;

use crate::Error;
use crate::Result;

// See RFC 4880, section 9.4.
const MICALGS: &[(&str, HashAlgorithm)] = &[
    ("pgp-md5", HashAlgorithm::MD5),
    ("pgp-sha1", HashAlgorithm::SHA1),
    ("pgp-ripemd160", HashAlgorithm::RipeMD),
    ("pgp-sha256", HashAlgorithm::SHA256),
    ("pgp-sha384", HashAlgorithm::SHA384),
    ("pgp-sha512", HashAlgorithm::SHA512),
    ("pgp-sha224", HashAlgorithm::SHA224),
];

/// A `micalg` token and the hash algorithm it names.
///
/// A `MicAlg` can only be constructed for an algorithm that the
/// crypto backend implements, so holding one means the hash is
/// usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MicAlg {
    token: &'static str,
    algo: HashAlgorithm,
}

impl MicAlg {
    /// Looks up a `micalg` token.  Tokens are case-insensitive.
    pub fn from_token(token: &str) -> Result<Self> {
        let (token, algo) = MICALGS.iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(token.trim()))
            .ok_or_else(|| Error::UnsupportedMicAlg(token.into()))?;
        Self::checked(token, *algo)
    }

    /// Returns the `micalg` token for a hash algorithm.
    pub fn from_hash(algo: HashAlgorithm) -> Result<Self> {
        let (token, algo) = MICALGS.iter()
            .find(|(_, a)| *a == algo)
            .ok_or_else(|| Error::UnsupportedMicAlg(algo.to_string()))?;
        Self::checked(token, *algo)
    }

    fn checked(token: &'static str, algo: HashAlgorithm) -> Result<Self> {
        if ! algo.is_supported() {
            return Err(Error::UnsupportedMicAlg(
                format!("{} ({} is not available)", token, algo)));
        }
        Ok(MicAlg { token, algo })
    }

    /// Returns the lowercase token, e.g., `pgp-sha256`.
    pub fn token(&self) -> &'static str {
        self.token
    }

    /// Returns the hash algorithm.
    pub fn hash_algo(&self) -> HashAlgorithm {
        self.algo
    }

    /// Returns all known tokens, whether or not they are available.
    pub fn tokens() -> impl Iterator<Item = &'static str> {
        MICALGS.iter().map(|(t, _)| *t)
    }
}

impl FromStr for MicAlg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s)
    }
}

impl fmt::Display for MicAlg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.token)
    }
}
