//! Decryption of OpenPGP messages.

use std::io::{self, BufReader, Read};

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::crypto::{
    Password,
    SessionKey,
};
use openpgp::Fingerprint;
use openpgp::KeyHandle;
use openpgp::KeyID;
use openpgp::Packet;
use openpgp::packet::{
    key,
    Key,
    PKESK,
    SKESK,
    Signature,
};
use openpgp::parse::{
    Parse,
    PacketParser,
    stream::{
        DecryptionHelper,
        Decryptor,
        DecryptorBuilder,
        GoodChecksum,
        MessageLayer,
        MessageStructure,
        VerificationHelper,
        VerificationError,
    }
};
use openpgp::types::SymmetricAlgorithm;

use crate::details::{Body, Verification};
use crate::keyring::decrypted_key;
use crate::verify::issuer;
use crate::Error;
use crate::KeyRef;
use crate::KeyRing;
use crate::Result;

// State shared with the decryptor.
pub(crate) struct Helper<'a> {
    keyring: &'a KeyRing,

    // The key IDs of the PKESKs, in order.
    recipients: Vec<KeyID>,
    // Whether we got the session key.
    decrypted: bool,
    // `decrypt` is only called again if the session key didn't work
    // and there are SKESKs to try.
    decrypt_called: bool,

    // Whether a signature packet was seen.
    is_signed: bool,
    // Set once the message has been read to the end.
    verification: Option<Verification<'a>>,
}

impl<'a> Helper<'a> {
    fn new(keyring: &'a KeyRing) -> Self {
        Helper {
            keyring,
            recipients: Vec::new(),
            decrypted: false,
            decrypt_called: false,
            is_signed: false,
            verification: None,
        }
    }

    pub fn recipients(&self) -> &[KeyID] {
        &self.recipients
    }

    pub fn is_signed(&self) -> bool {
        self.is_signed
    }

    pub fn decrypted(&self) -> bool {
        self.decrypted
    }
}

// Returns the signature's digest prefix for the trace output.
fn prefix(sig: &Signature) -> String {
    openpgp::fmt::hex::encode(sig.digest_prefix())
}

impl<'a> VerificationHelper for Helper<'a> {
    fn get_certs(&mut self, ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        let mut certs: Vec<Cert> = Vec::new();
        for cert in ids.iter().flat_map(|id| self.keyring.certs_by_handle(id.clone())) {
            if ! certs.iter().any(|c| c.fingerprint() == cert.fingerprint()) {
                certs.push(cert.clone());
            }
        }
        Ok(certs)
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        tracer!(*crate::TRACE, "Helper::check");

        let keyring = self.keyring;
        let mut v = Verification::default();

        let results = structure.into_iter().flat_map(|layer| match layer {
            MessageLayer::SignatureGroup { results } => results,
            _ => Vec::new(),
        });

        for result in results {
            self.is_signed = true;

            let (sig, err) = match result {
                Ok(GoodChecksum { sig, ka, .. }) => {
                    t!("{}: good signature from {}", prefix(sig), ka.fingerprint());
                    v.signed_by_key_id = Some(issuer(sig).unwrap_or_else(|| ka.keyid()));
                    v.signed_by = keyring.certs_by_handle(ka.fingerprint())
                        .into_iter()
                        .next()
                        .map(|cert| KeyRef::new(cert, ka.key().clone()));
                    v.error = None;
                    // The first good signature wins.
                    break;
                }
                Err(VerificationError::MalformedSignature { sig, error, .. }) =>
                    (sig, Error::MalformedSignature(error, "Inline signature".into())),
                Err(VerificationError::MissingKey { sig, .. }) =>
                    (sig, Error::UnknownIssuer(issuer(sig))),
                Err(VerificationError::UnboundKey { sig, cert, error, .. }) =>
                    (sig, Error::KeyUnsuitable(
                        error, format!("{} is not bound", cert.fingerprint()))),
                Err(VerificationError::BadKey { sig, ka, error, .. }) =>
                    (sig, Error::KeyUnsuitable(
                        error, format!("{} can't sign", ka.fingerprint()))),
                Err(VerificationError::BadSignature { sig, ka, error, .. }) => {
                    let keyid = issuer(sig).unwrap_or_else(|| ka.keyid());
                    (sig, Error::BadSignature(error, keyid))
                }
                #[allow(unreachable_patterns)]
                Err(err) => {
                    t!("Unhandled verification error: {}", err);
                    v.error = Some(Error::MalformedSignature(
                        anyhow::anyhow!("{}", err), "Inline signature".into()));
                    continue;
                }
            };

            t!("{}: allegedly from {:?}: {}", prefix(sig), issuer(sig), err);
            v.signed_by_key_id = issuer(sig);
            v.error = Some(err);
        }

        self.verification = Some(v);
        Ok(())
    }

    fn inspect(&mut self, pp: &PacketParser<'_>) -> openpgp::Result<()> {
        if let Packet::OnePassSig(_) | Packet::Signature(_) = pp.packet {
            self.is_signed = true;
        }
        Ok(())
    }
}

// Why no key decrypted the message.
#[derive(Default)]
struct Failure {
    bad_passphrase: Option<Error>,
    missing_passphrase: bool,
}

impl Failure {
    // Returns the error that is most helpful to the user.
    fn into_error(self) -> Error {
        if let Some(err) = self.bad_passphrase {
            err
        } else if self.missing_passphrase {
            Error::PassphraseRequired
        } else {
            Error::DecryptNoKey(anyhow::anyhow!("No key"))
        }
    }
}

// Unlocks `key` and uses it to decrypt `pkesk`.
fn try_key(pkesk: &PKESK, key: Key<key::SecretParts, key::UnspecifiedRole>,
           password: Option<&Password>, sym_algo: Option<SymmetricAlgorithm>,
           failure: &mut Failure)
    -> Option<(SymmetricAlgorithm, SessionKey)>
{
    tracer!(*crate::TRACE, "try_key");

    let fpr = key.fingerprint();
    let key = match decrypted_key(key, password) {
        Ok(key) => key,
        Err(err @ Error::WrongPassphrase(_, _)) => {
            failure.bad_passphrase = Some(err);
            return None;
        }
        Err(Error::PassphraseRequired) => {
            failure.missing_passphrase = true;
            return None;
        }
        Err(err) => {
            t!("Unlocking {}: {}", fpr, err);
            return None;
        }
    };

    let mut keypair = match key.into_keypair() {
        Ok(keypair) => keypair,
        Err(err) => {
            t!("{} is not usable: {}", fpr, err);
            return None;
        }
    };

    let sk = pkesk.decrypt(&mut keypair, sym_algo);
    if sk.is_none() {
        t!("{} didn't decrypt the PKESK", fpr);
    }
    sk
}

impl<'a> DecryptionHelper for Helper<'a> {
    fn decrypt<D>(&mut self, pkesks: &[PKESK], _: &[SKESK],
                  sym_algo: Option<SymmetricAlgorithm>,
                  mut decrypt: D)
        -> openpgp::Result<Option<Fingerprint>>
        where D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool
    {
        tracer!(*crate::TRACE, "Helper::decrypt");

        if self.decrypt_called {
            // Password-encrypted messages are not supported.
            return Err(anyhow::anyhow!("SKESKs not supported"));
        }
        self.decrypt_called = true;

        let keyring = self.keyring;
        let password = keyring.password();

        self.recipients = pkesks.iter().map(|p| p.recipient().clone()).collect();
        t!("Encrypted to {:?}", self.recipients);

        // Try the keys named by the PKESKs first.  A wildcard PKESK
        // might be for any of our keys.
        let named = pkesks.iter()
            .filter(|p| ! p.recipient().is_wildcard())
            .flat_map(|p| keyring.secret_keys_by_id(p.recipient())
                      .into_iter()
                      .map(move |(cert, key)| (p, cert, key)));
        let wildcards = pkesks.iter()
            .filter(|p| p.recipient().is_wildcard())
            .flat_map(|p| keyring.secret_keys()
                      .into_iter()
                      .map(move |(cert, key)| (p, cert, key)));

        let mut failure = Failure::default();
        for (pkesk, cert, key) in named.chain(wildcards) {
            if let Some((algo, sk)) = try_key(pkesk, key, password, sym_algo,
                                              &mut failure)
            {
                // A wildcard PKESK may decrypt to garbage that
                // happens to pass the checksum.
                if decrypt(algo, &sk) {
                    t!("Decrypted using {}", cert.fingerprint());
                    self.decrypted = true;
                    return Ok(Some(cert.fingerprint()));
                }
            }
        }

        Err(failure.into_error().into())
    }
}

/// Returns a decryptor for the binary OpenPGP message `r`.
///
/// The message's PKESKs are processed before this returns, so the
/// recipients are known and decryption errors are reported here.
pub(crate) fn decryptor<'a, R>(r: R, keyring: &'a KeyRing)
    -> Result<Decryptor<'a, Helper<'a>>>
    where R: Read + Send + Sync + 'a
{
    tracer!(*crate::TRACE, "decryptor");

    let builder = wrap_err!(
        DecryptorBuilder::from_reader(r),
        MalformedMessage,
        "Reading encrypted data")?;

    builder.with_policy(crate::P, None, Helper::new(keyring))
        .map_err(|err| {
            t!("Decryption failed: {}", err);
            match err.downcast::<Error>() {
                Ok(err) => err,
                Err(err) => Error::DecryptFailed(err, "Decrypting message".into()),
            }
        })
}

// Decrypted data, preceded by some already read bytes.
pub(crate) struct DecryptedBody<'a> {
    inner: io::Chain<io::Cursor<Vec<u8>>, BufReader<Decryptor<'a, Helper<'a>>>>,
}

impl<'a> DecryptedBody<'a> {
    pub fn new(prefix: Vec<u8>, rest: BufReader<Decryptor<'a, Helper<'a>>>) -> Self {
        DecryptedBody {
            inner: io::Cursor::new(prefix).chain(rest),
        }
    }

    fn helper(&self) -> &Helper<'a> {
        self.inner.get_ref().1.get_ref().helper_ref()
    }
}

impl<'a> Read for DecryptedBody<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<'a> Body<'a> for DecryptedBody<'a> {
    fn is_signed(&self) -> bool {
        self.helper().is_signed
    }

    fn verification(&self) -> Option<&Verification<'a>> {
        self.helper().verification.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure() {
        assert!(matches!(Failure::default().into_error(),
                         Error::DecryptNoKey(_)));

        let failure = Failure {
            bad_passphrase: None,
            missing_passphrase: true,
        };
        assert!(matches!(failure.into_error(), Error::PassphraseRequired));

        // A wrong passphrase is more useful than a missing one.
        let failure = Failure {
            bad_passphrase: Some(Error::WrongPassphrase(
                anyhow::anyhow!("bad"), "key".into())),
            missing_passphrase: true,
        };
        assert!(matches!(failure.into_error(), Error::WrongPassphrase(_, _)));
    }

    #[test]
    fn not_a_message() {
        let keyring = KeyRing::new();
        assert!(decryptor(&b"definitely not OpenPGP"[..], &keyring).is_err());
    }
}
