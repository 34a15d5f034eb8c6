//! Streaming verification of multipart/signed bodies.
//!
//! See RFC 3156, section 5.

use std::io::{self, BufRead, Read};

use sequoia_openpgp as openpgp;
use openpgp::crypto::hash::Digest;
use openpgp::KeyID;
use openpgp::Packet;
use openpgp::packet::Signature;
use openpgp::parse::{
    Parse,
    PacketParser,
    PacketParserResult,
};
use openpgp::policy::{
    HashAlgoSecurity,
    Policy,
};

use crate::armor;
use crate::constants::PGP_SIGNATURE;
use crate::crlf::{Canonicalizer, ShortBuffer};
use crate::details::{Body, Verification};
use crate::mime::{self, MultipartReader};
use crate::Error;
use crate::KeyRef;
use crate::KeyRing;
use crate::KeyUsage;
use crate::MicAlg;
use crate::Result;

// Returns the first issuer named by the signature.
pub(crate) fn issuer(sig: &Signature) -> Option<KeyID> {
    sig.get_issuers().into_iter().next().map(KeyID::from)
}

// Checks `sig` against each candidate key in turn and returns the
// one that made it.  Key IDs can collide, so there may be several.
fn verify_candidates<'k, H>(sig: &Signature, keys: Vec<KeyRef<'k>>, hash: H)
    -> Result<KeyRef<'k>>
    where H: Fn() -> Box<dyn Digest>
{
    tracer!(*crate::TRACE, "verify_candidates");

    let issuer = issuer(sig).ok_or(Error::MissingIssuer)?;
    let mut last_err = Error::UnknownIssuer(Some(issuer.clone()));

    for key in keys {
        let mut sig = sig.clone();
        let result = sig.verify_hash(key.key(), hash())
            .and_then(|()| crate::P.signature(
                &sig, HashAlgoSecurity::CollisionResistance));
        match result {
            Ok(()) => {
                t!("Good signature from {}", key.fingerprint());
                return Ok(key);
            }
            Err(err) => {
                t!("Bad signature from {}: {}", key.fingerprint(), err);
                last_err = Error::BadSignature(err, issuer.clone());
            }
        }
    }

    Err(last_err)
}

/// Reads the signed part of a multipart/signed body.
///
/// Every byte that is returned is also hashed.  When the signed part
/// has been read to the end, the signature part is read and checked.
/// This happens exactly once.
pub(crate) struct SignedReader<'a, R: BufRead> {
    keyring: &'a KeyRing,
    multipart: MultipartReader<R>,
    micalg: MicAlg,

    // The signed part's header, which is covered by the signature.
    header: io::Cursor<Vec<u8>>,

    // The signature is over the CRLF-canonicalized data.
    hash: Box<dyn Digest>,
    canon: Canonicalizer,
    scratch: Vec<u8>,

    verification: Option<Verification<'a>>,
}

impl<'a, R: BufRead> SignedReader<'a, R> {
    pub fn new(keyring: &'a KeyRing, mut multipart: MultipartReader<R>,
               micalg: MicAlg)
        -> Result<Self>
    {
        tracer!(*crate::TRACE, "SignedReader::new");

        multipart.next_part()?.ok_or(Error::MissingPart("signed"))?;
        let header = multipart.raw_header().to_vec();
        t!("Signed part has a {} byte header, micalg is {}",
           header.len(), micalg);

        let hash = wrap_err!(
            micalg.hash_algo().context(),
            UnknownError,
            format!("Instantiating {}", micalg.hash_algo()))?;

        Ok(SignedReader {
            keyring,
            multipart,
            micalg,
            header: io::Cursor::new(header),
            hash,
            canon: Canonicalizer::new(),
            scratch: Vec::new(),
            verification: None,
        })
    }

    // Hashes `data`.
    fn update(&mut self, data: &[u8]) {
        self.scratch.resize(data.len() * 2, 0);

        let mut src = data;
        while ! src.is_empty() {
            let (written, consumed) =
                match self.canon.transform(&mut self.scratch, src) {
                    Ok(r) => r,
                    Err(ShortBuffer { written, consumed }) => (written, consumed),
                };
            self.hash.update(&self.scratch[..written]);
            src = &src[consumed..];
        }
    }

    fn check(&mut self) -> Verification<'a> {
        let mut v = Verification::default();
        if let Err(err) = self.check_(&mut v) {
            v.error = Some(err);
        }
        v
    }

    fn check_(&mut self, v: &mut Verification<'a>) -> Result<()> {
        tracer!(*crate::TRACE, "SignedReader::check");

        let header = self.multipart.next_part()?
            .ok_or(Error::MissingPart("signature"))?;
        let ct = mime::content_type(&header)?;
        if ! ct.is(PGP_SIGNATURE) {
            return Err(Error::UnexpectedMediaType {
                part: "signature",
                got: ct.essence().into(),
                want: PGP_SIGNATURE,
            });
        }

        let mut armored = Vec::new();
        self.multipart.read_to_end(&mut armored)?;

        let mut sigs = Vec::new();
        wrap_err!(
            armor::signature_reader(&armored).read_to_end(&mut sigs),
            MalformedSignature,
            "Reading armored signature")?;

        let mut last_err = None;
        let mut ppr = wrap_err!(
            PacketParser::from_bytes(&sigs),
            MalformedSignature,
            "Parsing signature")?;
        while let PacketParserResult::Some(pp) = ppr {
            let (packet, next) = wrap_err!(
                pp.next(),
                MalformedSignature,
                "Parsing signature")?;
            ppr = next;

            let sig = match packet {
                Packet::Signature(sig) => sig,
                packet => return Err(Error::MalformedSignature(
                    anyhow::anyhow!("Unexpected {} packet", packet.tag()),
                    "Expected a signature".into())),
            };

            let issuer = issuer(&sig).ok_or(Error::MissingIssuer)?;
            t!("Signature ({:02X}{:02X}) allegedly from {}",
               sig.digest_prefix()[0], sig.digest_prefix()[1], issuer);
            v.signed_by_key_id = Some(issuer.clone());

            if sig.hash_algo() != self.micalg.hash_algo() {
                return Err(Error::MicAlgMismatch {
                    header: self.micalg.hash_algo(),
                    packet: sig.hash_algo(),
                });
            }

            let keys = self.keyring.keys_by_id_usage_at(
                &issuer, KeyUsage::Sign, sig.signature_creation_time());
            if keys.is_empty() {
                t!("No signing key for {}", issuer);
                continue;
            }

            match verify_candidates(&sig, keys, || self.hash.clone()) {
                Ok(key) => {
                    v.signed_by = Some(key);
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(
            || Error::UnknownIssuer(v.signed_by_key_id.clone())))
    }
}

impl<'a, R: BufRead> Read for SignedReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.verification.is_some() {
            return Ok(0);
        }

        let n = if (self.header.position() as usize) < self.header.get_ref().len() {
            self.header.read(buf)?
        } else {
            self.multipart.read(buf)?
        };

        if n == 0 {
            self.verification = Some(self.check());
        } else {
            self.update(&buf[..n]);
        }
        Ok(n)
    }
}

impl<'a, R: BufRead> Body<'a> for SignedReader<'a, R> {
    fn is_signed(&self) -> bool {
        true
    }

    fn verification(&self) -> Option<&Verification<'a>> {
        self.verification.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::time::SystemTime;

    use openpgp::Cert;
    use openpgp::serialize::stream::{
        Message,
        Signer,
    };

    use proptest::prelude::*;
    use openpgp::types::HashAlgorithm;

    use crate::testing;

    const SIGNED: &[u8] = b"Content-Type: text/plain\r\n\r\nHello,\r\nworld!";

    // Returns a binary detached signature over `data`.
    fn binary_sig(cert: &Cert, data: &[u8]) -> Vec<u8> {
        let keypair = cert.primary_key().key().clone()
            .parts_into_secret().unwrap()
            .into_keypair().unwrap();

        let mut sig = Vec::new();
        let message = Message::new(&mut sig);
        let mut signer = Signer::new(message, keypair)
            .detached()
            .hash_algo(HashAlgorithm::SHA256).unwrap()
            .creation_time(SystemTime::from(testing::time()))
            .build().unwrap();
        signer.write_all(data).unwrap();
        signer.finalize().unwrap();
        sig
    }

    // Armors the concatenated signature packets.
    fn armored(sigs: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = openpgp::armor::Writer::new(
            &mut out, openpgp::armor::Kind::Signature).unwrap();
        for sig in sigs {
            w.write_all(sig).unwrap();
        }
        w.finalize().unwrap();
        out
    }

    // Returns an armored detached signature over `data`.
    fn detached_sig(cert: &Cert, data: &[u8]) -> Vec<u8> {
        armored(&[binary_sig(cert, data)])
    }

    fn multipart(signed: &[u8], sig: &[u8]) -> Vec<u8> {
        let mut m = b"--foo\r\n".to_vec();
        m.extend_from_slice(signed);
        m.extend_from_slice(b"\r\n--foo\r\n\
                              Content-Type: application/pgp-signature\r\n\r\n");
        m.extend_from_slice(sig);
        m.extend_from_slice(b"\r\n--foo--\r\n");
        m
    }

    fn verify<'a>(keyring: &'a KeyRing, message: &'a [u8], micalg: &str)
        -> (Vec<u8>, SignedReader<'a, &'a [u8]>)
    {
        let mr = MultipartReader::new(message, "foo");
        let mut sr = SignedReader::new(
            keyring, mr, MicAlg::from_token(micalg).unwrap()).unwrap();
        let mut body = Vec::new();
        sr.read_to_end(&mut body).unwrap();
        (body, sr)
    }

    #[test]
    fn good() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&testing::bob(), &alice]);
        let message = multipart(SIGNED, &detached_sig(&alice, SIGNED));

        let (body, mut sr) = verify(&keyring, &message, "pgp-sha256");
        assert_eq!(body, SIGNED);

        let v = sr.verification().unwrap();
        assert!(v.error.is_none(), "{:?}", v.error);
        assert_eq!(v.signed_by_key_id, Some(alice.keyid()));
        assert_eq!(v.signed_by.as_ref().unwrap().cert().fingerprint(),
                   alice.fingerprint());

        // Reading again doesn't check again.
        let mut buf = [0; 16];
        assert_eq!(sr.read(&mut buf).unwrap(), 0);
        assert!(sr.verification().unwrap().error.is_none());
    }

    #[test]
    fn unchecked_until_eof() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&alice]);
        let message = multipart(SIGNED, &detached_sig(&alice, SIGNED));

        let mr = MultipartReader::new(&message[..], "foo");
        let mut sr = SignedReader::new(
            &keyring, mr, MicAlg::from_token("pgp-sha256").unwrap()).unwrap();
        let mut buf = [0; 8];
        sr.read_exact(&mut buf).unwrap();
        assert!(sr.verification().is_none());
    }

    // A signed part whose line endings were converted to LF in
    // transit still verifies.
    #[test]
    fn lf_transport() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&alice]);
        let sig = detached_sig(&alice, SIGNED);

        let mut message = b"--foo\n\
                            Content-Type: text/plain\n\n\
                            Hello,\nworld!\n\
                            --foo\n\
                            Content-Type: application/pgp-signature\n\n".to_vec();
        message.extend_from_slice(&sig);
        message.extend_from_slice(b"\n--foo--\n");

        let (body, sr) = verify(&keyring, &message, "pgp-sha256");
        assert_eq!(body, b"Content-Type: text/plain\n\nHello,\nworld!");
        let v = sr.verification().unwrap();
        assert!(v.error.is_none(), "{:?}", v.error);
    }

    #[test]
    fn tampered() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&alice]);
        let sig = detached_sig(&alice, SIGNED);

        for i in [0, 10, SIGNED.len() - 1] {
            let mut signed = SIGNED.to_vec();
            signed[i] ^= 0x01;
            let message = multipart(&signed, &sig);

            let (_, sr) = verify(&keyring, &message, "pgp-sha256");
            let v = sr.verification().unwrap();
            assert!(matches!(v.error, Some(Error::BadSignature(_, _))),
                    "flipping byte {}: {:?}", i, v.error);
            assert!(v.signed_by.is_none());
        }
    }

    #[test]
    fn unknown_issuer() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&testing::bob()]);
        let message = multipart(SIGNED, &detached_sig(&alice, SIGNED));

        let (_, sr) = verify(&keyring, &message, "pgp-sha256");
        let v = sr.verification().unwrap();
        match &v.error {
            Some(Error::UnknownIssuer(Some(id))) => assert_eq!(id, &alice.keyid()),
            err => panic!("unexpected: {:?}", err),
        }
    }

    #[test]
    fn micalg_mismatch() {
        let alice = testing::alice();
        let keyring = testing::keyring(&[&alice]);
        let message = multipart(SIGNED, &detached_sig(&alice, SIGNED));

        let (_, sr) = verify(&keyring, &message, "pgp-sha512");
        let v = sr.verification().unwrap();
        assert!(matches!(v.error, Some(Error::MicAlgMismatch {
            header: HashAlgorithm::SHA512,
            packet: HashAlgorithm::SHA256,
        })), "{:?}", v.error);
    }

    #[test]
    fn bad_signature_part() {
        let keyring = testing::keyring(&[&testing::alice()]);

        let message = b"--foo\r\n\r\nhi\r\n--foo--\r\n";
        let (_, sr) = verify(&keyring, message, "pgp-sha256");
        assert!(matches!(sr.verification().unwrap().error,
                         Some(Error::MissingPart("signature"))));

        let message = b"--foo\r\n\r\nhi\r\n\
                        --foo\r\nContent-Type: text/plain\r\n\r\nsig\r\n\
                        --foo--\r\n";
        let (_, sr) = verify(&keyring, message, "pgp-sha256");
        assert!(matches!(sr.verification().unwrap().error,
                         Some(Error::UnexpectedMediaType { part: "signature", .. })));
    }

    // Signatures are tried in order; the first good one wins.
    #[test]
    fn several_signatures() {
        let alice = testing::alice();
        let bob = testing::bob();
        let keyring = testing::keyring(&[&alice]);

        let good = binary_sig(&alice, SIGNED);
        let bad = binary_sig(&alice, b"something else");
        let unknown = binary_sig(&bob, SIGNED);

        for sigs in [vec![unknown.clone(), good.clone()],
                     vec![bad.clone(), good.clone()],
                     vec![good.clone(), bad.clone()],
                     vec![unknown.clone(), bad.clone(), good.clone()]]
        {
            let message = multipart(SIGNED, &armored(&sigs));
            let (body, sr) = verify(&keyring, &message, "pgp-sha256");
            assert_eq!(body, SIGNED);
            let v = sr.verification().unwrap();
            assert!(v.error.is_none(), "{:?}", v.error);
            assert_eq!(v.signed_by.as_ref().unwrap().fingerprint(),
                       alice.fingerprint());
        }

        // Without a good signature, a bad one is worse than an
        // unknown one.
        for sigs in [vec![unknown.clone(), bad.clone()],
                     vec![bad.clone(), unknown.clone()]]
        {
            let message = multipart(SIGNED, &armored(&sigs));
            let (_, sr) = verify(&keyring, &message, "pgp-sha256");
            let v = sr.verification().unwrap();
            assert!(matches!(v.error, Some(Error::BadSignature(_, _))),
                     "{:?}", v.error);
            assert!(v.signed_by.is_none());
        }

        let message = multipart(SIGNED, &armored(&[unknown.clone(), unknown]));
        let (_, sr) = verify(&keyring, &message, "pgp-sha256");
        assert!(matches!(sr.verification().unwrap().error,
                         Some(Error::UnknownIssuer(Some(_)))));
    }

    // Every key with the issuer's key ID is tried.
    #[test]
    fn several_candidates() {
        let alice = testing::alice();
        let bob = testing::bob();
        let sig = match Packet::from_bytes(&binary_sig(&alice, SIGNED)).unwrap() {
            Packet::Signature(sig) => sig,
            p => panic!("expected a signature, got {:?}", p),
        };

        let mut hash: Box<dyn Digest> = HashAlgorithm::SHA256.context().unwrap();
        hash.update(SIGNED);

        fn key(cert: &Cert) -> KeyRef<'_> {
            KeyRef::new(cert, cert.primary_key().key().clone().role_into_unspecified())
        }

        let found = verify_candidates(
            &sig, vec![key(&bob), key(&alice)], || hash.clone()).unwrap();
        assert_eq!(found.fingerprint(), alice.fingerprint());

        assert!(matches!(
            verify_candidates(&sig, vec![key(&bob)], || hash.clone()),
            Err(Error::BadSignature(_, _))));
        assert!(matches!(
            verify_candidates(&sig, Vec::new(), || hash.clone()),
            Err(Error::UnknownIssuer(Some(_)))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Changing any byte of the signed part is detected, either
        // while reading the part or when checking the signature.
        #[test]
        fn any_flip_is_detected(i in 0..SIGNED.len(), mask in 1u8..=255) {
            let alice = testing::alice();
            let keyring = testing::keyring(&[&alice]);

            let mut signed = SIGNED.to_vec();
            signed[i] ^= mask;
            let message = multipart(&signed, &detached_sig(&alice, SIGNED));

            let mr = MultipartReader::new(&message[..], "foo");
            let micalg = MicAlg::from_token("pgp-sha256").unwrap();
            if let Ok(mut sr) = SignedReader::new(&keyring, mr, micalg) {
                if sr.read_to_end(&mut Vec::new()).is_ok() {
                    let v = sr.verification().unwrap();
                    prop_assert!(v.error.is_some());
                    prop_assert!(v.signed_by.is_none());
                }
            }
        }
    }
}
