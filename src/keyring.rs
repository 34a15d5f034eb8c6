//! An in-memory key ring.
//!
//! The decoder looks up signing keys by the issuer of a signature
//! and decryption keys by the recipient of a PKESK.  Key IDs can
//! collide, so lookups return every candidate and the caller tries
//! them in turn.

use std::time::SystemTime;

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::cert::CertParser;
use openpgp::crypto::{
    KeyPair,
    Password,
};
use openpgp::Fingerprint;
use openpgp::KeyHandle;
use openpgp::KeyID;
use openpgp::packet::{
    key,
    Key,
};
use openpgp::parse::Parse;
use openpgp::serialize::stream::Recipient;

use crate::Error;
use crate::Result;

/// What a key is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    /// Making or checking signatures over data.
    Sign,
    /// Encrypting data in transit or at rest.
    Encrypt,
}

/// A key from a [`KeyRing`] and the certificate it belongs to.
#[derive(Debug, Clone)]
pub struct KeyRef<'a> {
    cert: &'a Cert,
    key: Key<key::PublicParts, key::UnspecifiedRole>,
}

impl<'a> KeyRef<'a> {
    pub(crate) fn new(cert: &'a Cert,
                      key: Key<key::PublicParts, key::UnspecifiedRole>)
        -> Self
    {
        KeyRef { cert, key }
    }

    /// Returns the certificate.
    pub fn cert(&self) -> &'a Cert {
        self.cert
    }

    /// Returns the key.  This may be the primary key or a subkey.
    pub fn key(&self) -> &Key<key::PublicParts, key::UnspecifiedRole> {
        &self.key
    }

    pub fn keyid(&self) -> KeyID {
        self.key.keyid()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.key.fingerprint()
    }
}

/// A set of certificates, some possibly with secret key material.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    certs: Vec<Cert>,
    // Used to unlock encrypted secret key material when decrypting.
    password: Option<Password>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a keyring.
    ///
    /// `bytes` may be armored or binary and contain any number of
    /// certificates.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut keyring = KeyRing::new();
        let parser = wrap_err!(
            CertParser::from_bytes(bytes),
            UnknownError,
            "Parsing keyring")?;
        for cert in parser {
            let cert = wrap_err!(cert, UnknownError, "Parsing certificate")?;
            keyring.insert(cert)?;
        }
        Ok(keyring)
    }

    /// Sets the password used to unlock secret keys.
    pub fn with_password<P: Into<Password>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    /// Adds a certificate.
    ///
    /// If a certificate with the same fingerprint is already present,
    /// the two are merged.
    pub fn insert(&mut self, cert: Cert) -> Result<()> {
        let fpr = cert.fingerprint();
        match self.certs.iter().position(|c| c.fingerprint() == fpr) {
            Some(i) => {
                let merged = wrap_err!(
                    self.certs[i].clone().merge_public_and_secret(cert),
                    UnknownError,
                    format!("Merging {}", fpr))?;
                self.certs[i] = merged;
            }
            None => self.certs.push(cert),
        }
        Ok(())
    }

    pub fn certs(&self) -> impl Iterator<Item = &Cert> {
        self.certs.iter()
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Returns the certificates containing a key that matches `kh`.
    ///
    /// Both primary keys and subkeys are considered.
    pub fn certs_by_handle<H: Into<KeyHandle>>(&self, kh: H) -> Vec<&Cert> {
        let kh = kh.into();
        self.certs.iter()
            .filter(|cert| cert.keys().key_handle(kh.clone()).next().is_some())
            .collect()
    }

    /// Returns the keys with key ID `id` that are valid for `usage`
    /// now.
    pub fn keys_by_id_usage(&self, id: &KeyID, usage: KeyUsage)
        -> Vec<KeyRef<'_>>
    {
        self.keys_by_id_usage_at(id, usage, None)
    }

    /// Returns the keys with key ID `id` that are valid for `usage` at
    /// time `t`.
    ///
    /// The keys are returned in the order their certificates were
    /// added.
    pub fn keys_by_id_usage_at(&self, id: &KeyID, usage: KeyUsage,
                               t: Option<SystemTime>)
        -> Vec<KeyRef<'_>>
    {
        tracer!(*crate::TRACE, "KeyRing::keys_by_id_usage");

        let mut found = Vec::new();
        for cert in self.certs.iter() {
            let vc = match cert.with_policy(crate::P, t) {
                Ok(vc) => vc,
                Err(err) => {
                    if cert.keys().key_handle(id.clone()).next().is_some() {
                        t!("{} rejected by policy: {}", cert.fingerprint(), err);
                    }
                    continue;
                }
            };

            let keys = vc.keys().key_handle(id.clone()).revoked(false);
            let keys: Vec<_> = match usage {
                KeyUsage::Sign => keys.for_signing().collect(),
                KeyUsage::Encrypt => keys
                    .for_transport_encryption()
                    .for_storage_encryption()
                    .collect(),
            };

            for ka in keys {
                found.push(KeyRef {
                    cert,
                    key: ka.key().clone(),
                });
            }
        }

        t!("{} {:?} key(s) for {}", found.len(), usage, id);
        found
    }

    /// Returns the secret keys with key ID `id`.
    pub(crate) fn secret_keys_by_id(&self, id: &KeyID)
        -> Vec<(&Cert, Key<key::SecretParts, key::UnspecifiedRole>)>
    {
        self.certs.iter()
            .flat_map(|cert| {
                cert.keys().secret().key_handle(id.clone())
                    .map(move |ka| (cert, ka.key().clone()))
            })
            .collect()
    }

    /// Returns all secret keys.
    pub(crate) fn secret_keys(&self)
        -> Vec<(&Cert, Key<key::SecretParts, key::UnspecifiedRole>)>
    {
        self.certs.iter()
            .flat_map(|cert| {
                cert.keys().secret().map(move |ka| (cert, ka.key().clone()))
            })
            .collect()
    }
}

// Decrypts the key.
//
// On success, returns the decrypted key.
pub(crate) fn decrypted_key(key: Key<key::SecretParts, key::UnspecifiedRole>,
                            pass: Option<&Password>)
    -> Result<Key<key::SecretParts, key::UnspecifiedRole>>
{
    tracer!(*crate::TRACE, "decrypted_key");

    match key.secret() {
        key::SecretKeyMaterial::Unencrypted { .. } => Ok(key),
        key::SecretKeyMaterial::Encrypted { .. } => {
            let fpr = key.fingerprint();
            if let Some(pass) = pass {
                wrap_err!(
                    key.decrypt_secret(pass),
                    WrongPassphrase,
                    format!("Decrypting secret key material for {}", fpr))
            } else {
                t!("Can't decrypt {}: no password configured", fpr);
                Err(Error::PassphraseRequired)
            }
        }
    }
}

// Returns the first key in iter that is already decrypted or can be
// decrypted using `pass`.
pub(crate) fn decrypted_key_iter<'a, I>(iter: I, pass: Option<&Password>)
    -> Result<Key<key::SecretParts, key::UnspecifiedRole>>
    where I: Iterator<Item=&'a Key<key::SecretParts, key::UnspecifiedRole>>
{
    // Return the "best" (most helpful to the user) error.
    let mut bad_pass = None;
    let mut missing_pass = false;
    let mut other_error = None;

    for key in iter {
        match decrypted_key(key.clone(), pass) {
            Ok(key) => return Ok(key),
            Err(err @ Error::WrongPassphrase(_, _)) => bad_pass = Some(err),
            Err(Error::PassphraseRequired) => missing_pass = true,
            Err(err) => other_error = Some(err),
        }
    }

    if let Some(err) = bad_pass {
        Err(err)
    } else if missing_pass {
        Err(Error::PassphraseRequired)
    } else if let Some(err) = other_error {
        Err(err)
    } else {
        Err(Error::NoSigningKey(
            anyhow::anyhow!("no secret key material"),
            "no candidate keys".into()))
    }
}

/// Returns a key pair for `cert`'s signing key.
pub(crate) fn signing_keypair(cert: &Cert, t: Option<SystemTime>,
                              pass: Option<&Password>)
    -> Result<KeyPair>
{
    tracer!(*crate::TRACE, "signing_keypair");

    let vc = wrap_err!(
        cert.with_policy(crate::P, t),
        KeyUnsuitable,
        format!("{} rejected by policy", cert.fingerprint()))?;

    let keys: Vec<Key<key::SecretParts, key::UnspecifiedRole>> = vc.keys()
        .alive().revoked(false).for_signing().secret()
        .map(|ka| ka.key().clone())
        .collect();
    t!("{} has {} signing-capable secret key(s)", cert.fingerprint(), keys.len());

    let key = match decrypted_key_iter(keys.iter(), pass) {
        Err(Error::NoSigningKey(err, _)) => {
            return Err(Error::NoSigningKey(
                err, format!("{} has no usable signing key", cert.fingerprint())));
        }
        r => r?,
    };

    wrap_err!(
        key.into_keypair(),
        NoSigningKey,
        "Creating key pair from signing key")
}

/// Returns the encryption-capable keys of `cert` as recipients.
pub(crate) fn recipients(cert: &Cert, t: Option<SystemTime>)
    -> Result<Vec<Recipient<'_>>>
{
    tracer!(*crate::TRACE, "recipients");

    wrap_err!(
        cert.with_policy(crate::P, t),
        KeyUnsuitable,
        format!("{} rejected by policy", cert.fingerprint()))?;

    let recipients: Vec<Recipient> = cert.keys().with_policy(crate::P, t)
        .alive().revoked(false).for_transport_encryption()
        .map(|ka| ka.into())
        .collect();
    if recipients.is_empty() {
        t!("{} doesn't have any valid encryption-capable subkeys",
           cert.fingerprint());
        return Err(Error::NoEncryptionKey(cert.fingerprint().to_hex()));
    }
    Ok(recipients)
}
