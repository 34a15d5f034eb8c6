//! Encoding configuration.
//!
//! Everything that would otherwise make the output of [`encrypt`]
//! and [`sign`] depend on global state (the clock, the multipart
//! boundary) is injected here.
//!
//! [`encrypt`]: crate::encrypt
//! [`sign`]: crate::sign

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use sequoia_openpgp as openpgp;
use openpgp::crypto::Password;
use openpgp::types::HashAlgorithm;

use crate::constants::BOUNDARY_BYTES;

/// Generates multipart boundaries.
///
/// A boundary must be unique within its nesting level, at most 70
/// characters, and consist of characters that may appear in a MIME
/// token.
pub trait BoundaryGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random boundaries drawn from the OpenPGP library's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundaryGenerator for RandomBoundary {
    fn generate(&self) -> String {
        let mut bytes = [0u8; BOUNDARY_BYTES];
        openpgp::crypto::random(&mut bytes[..]);
        openpgp::fmt::hex::encode(bytes)
    }
}

/// Always returns the same boundary.
///
/// Only useful to produce reproducible output, e.g., in tests.
#[derive(Debug, Clone)]
pub struct FixedBoundary(pub String);

impl BoundaryGenerator for FixedBoundary {
    fn generate(&self) -> String {
        self.0.clone()
    }
}

/// Parameters for encrypting and signing.
///
/// There is no randomness source here.  Session keys and signature
/// salts come from the OpenPGP library's own CSPRNG, which can't be
/// replaced, so encrypted output and signatures differ from run to
/// run even with a fixed time and boundary.
#[derive(Clone)]
pub struct Config {
    /// The hash algorithm used for signatures.  This determines the
    /// `micalg` parameter of multipart/signed messages.
    pub hash: HashAlgorithm,
    /// The signature creation time.  If `None`, the current time is
    /// used.
    pub time: Option<DateTime<Utc>>,
    /// The password used to unlock the signer's secret key material,
    /// if it is encrypted.
    pub password: Option<Password>,
    boundary: Arc<dyn BoundaryGenerator>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hash: HashAlgorithm::SHA256,
            time: None,
            password: None,
            boundary: Arc::new(RandomBoundary),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("hash", &self.hash)
            .field("time", &self.time)
            .field("password", &self.password.is_some())
            .finish()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signature hash algorithm.
    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Fixes the signature creation time.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the password for the signer's secret key.
    pub fn with_password<P: Into<Password>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the boundary generator.
    pub fn with_boundary_generator<G>(mut self, generator: G) -> Self
        where G: BoundaryGenerator + 'static
    {
        self.boundary = Arc::new(generator);
        self
    }

    /// Uses `boundary` for every multipart boundary.
    pub fn with_fixed_boundary<B: Into<String>>(self, boundary: B) -> Self {
        self.with_boundary_generator(FixedBoundary(boundary.into()))
    }

    /// Returns a new boundary.
    pub fn boundary(&self) -> String {
        self.boundary.generate()
    }

    /// Returns the creation time to use for signatures, if fixed.
    pub(crate) fn creation_time(&self) -> Option<SystemTime> {
        self.time.map(SystemTime::from)
    }
}
