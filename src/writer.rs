//! Encoding PGP/MIME messages.
//!
//! See RFC 3156, sections 4 and 5.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use sequoia_openpgp as openpgp;
use openpgp::armor;
use openpgp::Cert;
use openpgp::serialize::stream::{
    Armorer,
    Encryptor,
    LiteralWriter,
    Message,
    Recipient,
    Signer,
};

use crate::armor::armor_signature;
use crate::constants::{
    CONTROL_BODY,
    MULTIPART_ENCRYPTED,
    MULTIPART_SIGNED,
    OCTET_STREAM,
    PGP_ENCRYPTED,
    PGP_SIGNATURE,
};
use crate::crlf::CrlfWriter;
use crate::header_writer::{HeaderWriter, PartWriter};
use crate::keyring::{recipients, signing_keypair};
use crate::mime::{Header, MediaType, MultipartWriter};
use crate::signer::DetachedSigner;
use crate::Config;
use crate::Error;
use crate::MicAlg;
use crate::Result;

// Sets the message's Content-Type and writes the header.
fn write_header<W: Write>(w: &mut W, mut header: Header, content_type: MediaType)
    -> Result<()>
{
    header.set("Content-Type", content_type.to_string());
    if ! header.has("Mime-Version") {
        header.set("Mime-Version", "1.0");
    }
    header.write(w)?;
    Ok(())
}

fn part_header(content_type: &str) -> Header {
    let mut header = Header::new();
    header.set("Content-Type", content_type);
    header
}

// Collects the output of the OpenPGP serializer.
//
// The serializer needs to own a `Send + Sync` sink.  It writes into
// the spool, and the spool is drained into the actual output after
// every write.
#[derive(Clone, Default)]
struct Spool(Arc<Mutex<Vec<u8>>>);

impl Spool {
    fn drain_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buffer = self.0.lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "spool poisoned"))?;
        if ! buffer.is_empty() {
            w.write_all(&buffer)?;
            buffer.clear();
        }
        Ok(())
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "spool poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encrypts a message.
///
/// Writes `header` with a multipart/encrypted Content-Type to `w`,
/// followed by the control part and the start of the encrypted data
/// part.  The returned writer takes the MIME entity to encrypt, i.e.,
/// its header, an empty line and its body.  The message is encrypted
/// to every certificate in `to` and, if `signer` is given, signed.
///
/// The message is only complete after [`EncryptWriter::finish`] (or
/// [`EncryptWriter::close`]) has been called.
pub fn encrypt<'a, W: Write>(mut w: W, header: Header, to: &'a [Cert],
                             signer: Option<&Cert>, config: &Config)
    -> Result<EncryptWriter<'a, W>>
{
    tracer!(*crate::TRACE, "encrypt");

    let time = config.creation_time();

    let mut recipient_keys: Vec<Recipient<'a>> = Vec::new();
    for cert in to {
        recipient_keys.extend(recipients(cert, time)?);
    }
    if recipient_keys.is_empty() {
        return Err(Error::NoEncryptionKey("empty recipient list".into()));
    }
    t!("{} certificate(s), {} recipient key(s)", to.len(), recipient_keys.len());

    let keypair = signer
        .map(|cert| signing_keypair(cert, time, config.password.as_ref()))
        .transpose()?;

    let boundary = config.boundary();
    write_header(&mut w, header,
                 MediaType::new(MULTIPART_ENCRYPTED)
                 .with_param("boundary", &boundary)
                 .with_param("protocol", PGP_ENCRYPTED))?;

    let mut multipart = MultipartWriter::new(w, boundary);
    multipart.create_part(&part_header(PGP_ENCRYPTED))?;
    multipart.write_all(CONTROL_BODY)?;
    multipart.create_part(&part_header(OCTET_STREAM))?;

    let spool = Spool::default();
    let message = Message::new(spool.clone());
    let message = wrap_err!(
        Armorer::new(message).kind(armor::Kind::Message).build(),
        EncryptFailed,
        "Setting up armor")?;
    let mut message = wrap_err!(
        Encryptor::for_recipients(message, recipient_keys).build(),
        EncryptFailed,
        "Setting up encryptor")?;
    if let Some(keypair) = keypair {
        let mut builder = wrap_err!(
            Signer::new(message, keypair).hash_algo(config.hash),
            SignerFailed,
            format!("Selecting {}", config.hash))?;
        if let Some(time) = time {
            builder = builder.creation_time(time);
        }
        message = wrap_err!(builder.build(), SignerFailed, "Setting up signer")?;
    }
    let message = wrap_err!(
        LiteralWriter::new(message).build(),
        EncryptFailed,
        "Setting up literal writer")?;

    let mut writer = EncryptWriter {
        message: Some(message),
        spool,
        output: Some(CrlfWriter::new(multipart)),
        done: None,
    };
    writer.pump()?;
    Ok(writer)
}

/// Writes the plaintext of an encrypted message.
///
/// Returned by [`encrypt`].
pub struct EncryptWriter<'a, W: Write> {
    message: Option<Message<'a>>,
    spool: Spool,
    output: Option<CrlfWriter<MultipartWriter<W>>>,
    done: Option<W>,
}

impl<'a, W: Write> EncryptWriter<'a, W> {
    // Moves what the serializer produced to the output.
    fn pump(&mut self) -> io::Result<()> {
        match self.output.as_mut() {
            Some(output) => self.spool.drain_into(output),
            None => Ok(()),
        }
    }

    /// Completes the message.
    ///
    /// The encryptor is finalized first, then the armor and finally
    /// the multipart body.  Closing a second time is an error.
    pub fn close(&mut self) -> Result<()> {
        tracer!(*crate::TRACE, "EncryptWriter::close");

        let message = self.message.take().ok_or(Error::AlreadyClosed)?;
        wrap_err!(message.finalize(), EncryptFailed, "Finalizing message")?;
        self.pump()?;

        let output = self.output.take().ok_or(Error::AlreadyClosed)?;
        let mut multipart = output.into_inner();
        multipart.close()?;
        t!("Closed");

        self.done = Some(multipart.into_inner());
        Ok(())
    }

    /// Completes the message and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if self.message.is_some() {
            self.close()?;
        }
        self.done.take().ok_or(Error::AlreadyClosed)
    }
}

impl<'a, W: Write> Write for EncryptWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let message = self.message.as_mut().ok_or(Error::AlreadyClosed)?;
        let n = message.write(buf)?;
        self.pump()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pump()?;
        match self.output.as_mut() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }
}

// The signed part.  Everything is written to the part and to the
// signer, in the same order.
struct SignedPart<W: Write> {
    multipart: MultipartWriter<W>,
    signer: DetachedSigner,
}

impl<W: Write> PartWriter for SignedPart<W> {
    fn create_part(&mut self, header: &Header) -> io::Result<()> {
        self.multipart.create_part(header)?;
        // The part's header is covered by the signature.
        self.signer.write_all(&header.to_vec())
    }
}

impl<W: Write> Write for SignedPart<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multipart.write_all(buf)?;
        self.signer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.multipart.flush()
    }
}

/// Signs a message.
///
/// Writes `header` with a multipart/signed Content-Type to `w`.  The
/// returned writer takes the MIME entity to sign, i.e., its header,
/// an empty line and its body.  Line endings are converted to CRLF.
///
/// The signature is computed on a background thread as the data is
/// written.  The message is only complete after
/// [`SignWriter::finish`] (or [`SignWriter::close`]) has been called.
/// Dropping the writer without closing it stops the thread and
/// leaves the message incomplete.
pub fn sign<W: Write>(mut w: W, header: Header, signer: &Cert, config: &Config)
    -> Result<SignWriter<W>>
{
    tracer!(*crate::TRACE, "sign");

    let micalg = MicAlg::from_hash(config.hash)?;
    let time = config.creation_time();
    let keypair = signing_keypair(signer, time, config.password.as_ref())?;
    t!("Signing with {} ({})", keypair.public().fingerprint(), micalg);

    let boundary = config.boundary();
    write_header(&mut w, header,
                 MediaType::new(MULTIPART_SIGNED)
                 .with_param("boundary", &boundary)
                 .with_param("micalg", micalg.token())
                 .with_param("protocol", PGP_SIGNATURE))?;

    let part = SignedPart {
        multipart: MultipartWriter::new(w, boundary),
        signer: DetachedSigner::new(keypair, micalg.hash_algo(), time)?,
    };

    Ok(SignWriter {
        inner: Some(CrlfWriter::new(HeaderWriter::new(part))),
        done: None,
    })
}

/// Writes the content of a signed message.
///
/// Returned by [`sign`].
pub struct SignWriter<W: Write> {
    // Canonicalizes line endings, captures the header, then writes to
    // the part and the signer.
    inner: Option<CrlfWriter<HeaderWriter<SignedPart<W>>>>,
    done: Option<W>,
}

impl<W: Write> SignWriter<W> {
    /// Completes the message.
    ///
    /// Waits for the signature, writes the signature part and closes
    /// the multipart body.  Closing a second time is an error.
    pub fn close(&mut self) -> Result<()> {
        tracer!(*crate::TRACE, "SignWriter::close");

        let inner = self.inner.take().ok_or(Error::AlreadyClosed)?;
        let SignedPart { mut multipart, signer } = inner.into_inner().finish()?;

        let sig = signer.finish()?;
        t!("Got a {} byte signature", sig.len());

        multipart.create_part(&part_header(PGP_SIGNATURE))?;
        CrlfWriter::new(&mut multipart).write_all(&armor_signature(&sig)?)?;
        multipart.close()?;

        self.done = Some(multipart.into_inner());
        Ok(())
    }

    /// Completes the message and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if self.inner.is_some() {
            self.close()?;
        }
        self.done.take().ok_or(Error::AlreadyClosed)
    }
}

impl<W: Write> Write for SignWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or(Error::AlreadyClosed)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    use openpgp::types::HashAlgorithm;

    use proptest::prelude::*;

    use crate::testing;
    use crate::read;

    const CONTENT: &[u8] =
        b"Content-Type: text/plain\r\n\r\nThis is an encrypted message!";

    fn header() -> Header {
        let mut header = Header::new();
        header.set("From", "alice@example.org");
        header.set("Subject", "Hi");
        header
    }

    fn config() -> Config {
        Config::new()
            .with_time(testing::time())
            .with_fixed_boundary("foo")
    }

    fn signed(chunks: &[&[u8]], config: &Config) -> Vec<u8> {
        let mut w = sign(Vec::new(), header(), &testing::alice(), config).unwrap();
        for chunk in chunks {
            w.write_all(chunk).unwrap();
        }
        w.finish().unwrap()
    }

    // Returns the part of a signed message before the signature part.
    fn signed_part(message: &[u8]) -> &[u8] {
        let delim = b"\r\n--foo\r\nContent-Type: application/pgp-signature";
        let i = message.windows(delim.len()).position(|w| w == delim).unwrap();
        &message[..i]
    }

    fn decode(message: &[u8], certs: &[&Cert]) -> (Vec<u8>, Option<String>, crate::Reader<'static>) {
        let keyring = Box::leak(Box::new(testing::keyring(certs)));
        let mut r = read(io::Cursor::new(message.to_vec()), keyring).unwrap();
        let mut body = Vec::new();
        r.details.read_to_end(&mut body).unwrap();
        let err = r.details.signature_error().map(|e| e.to_string());
        (body, err, r)
    }

    #[test]
    fn encrypt_framing() {
        let alice = testing::alice();
        let mut w = encrypt(Vec::new(), header(), std::slice::from_ref(&alice),
                            None, &config()).unwrap();
        w.write_all(CONTENT).unwrap();
        let message = w.finish().unwrap();

        let prefix: &[u8] = b"From: alice@example.org\r\n\
            Subject: Hi\r\n\
            Content-Type: multipart/encrypted; boundary=foo; \
            protocol=\"application/pgp-encrypted\"\r\n\
            Mime-Version: 1.0\r\n\
            \r\n\
            --foo\r\n\
            Content-Type: application/pgp-encrypted\r\n\
            \r\n\
            Version: 1\r\n\
            \r\n\
            --foo\r\n\
            Content-Type: application/octet-stream\r\n\
            \r\n\
            -----BEGIN PGP MESSAGE-----\r\n";
        assert!(message.starts_with(prefix),
                "{}", String::from_utf8_lossy(&message));
        assert!(message.ends_with(b"-----END PGP MESSAGE-----\r\n\r\n--foo--\r\n"),
                "{}", String::from_utf8_lossy(&message));

        // Every LF is part of a CRLF.
        for (i, &b) in message.iter().enumerate() {
            if b == b'\n' {
                assert_eq!(message[i - 1], b'\r', "lone LF at {}", i);
            }
        }
    }

    #[test]
    fn encrypt_round_trip() {
        let alice = testing::alice();
        let bob = testing::bob();
        let to = [alice.clone(), bob.clone()];

        let mut w = encrypt(Vec::new(), header(), &to, None, &config()).unwrap();
        // Write in odd sized chunks.
        for chunk in CONTENT.chunks(5) {
            w.write_all(chunk).unwrap();
        }
        let message = w.finish().unwrap();

        let (body, err, r) = decode(&message, &[&bob]);
        assert_eq!(body, CONTENT);
        assert!(err.is_none());
        assert_eq!(r.header.get("Subject"), Some("Hi"));
        assert!(r.details.is_encrypted());
        assert!(! r.details.is_signed());
        let ids = r.details.encrypted_to_key_ids();
        assert!(ids.contains(&testing::encryption_keyid(&alice)));
        assert!(ids.contains(&testing::encryption_keyid(&bob)));
    }

    #[test]
    fn encrypt_and_sign() {
        let alice = testing::alice();
        let bob = testing::bob();

        let mut w = encrypt(Vec::new(), header(), std::slice::from_ref(&bob),
                            Some(&alice), &config()).unwrap();
        w.write_all(CONTENT).unwrap();
        let message = w.finish().unwrap();

        let (body, err, r) = decode(&message, &[&alice, &bob]);
        assert_eq!(body, CONTENT);
        assert!(r.details.is_encrypted());
        assert!(r.details.is_signed());
        assert!(err.is_none(), "{:?}", err);
        assert_eq!(r.details.signed_by_key_id(), Some(&alice.keyid()));
    }

    #[test]
    fn encrypt_errors() {
        let alice = testing::alice();
        let mut out = Vec::new();

        assert!(matches!(encrypt(&mut out, header(), &[], None, &config()),
                         Err(Error::NoEncryptionKey(_))));

        // Carol's key is locked.
        let carol = testing::carol();
        assert!(matches!(encrypt(&mut out, header(),
                                 std::slice::from_ref(&alice),
                                 Some(&carol), &config()),
                         Err(Error::PassphraseRequired)));
        assert!(out.is_empty());
    }

    #[test]
    fn close_twice() {
        let alice = testing::alice();
        let mut w = encrypt(Vec::new(), header(), std::slice::from_ref(&alice),
                            None, &config()).unwrap();
        w.close().unwrap();
        assert!(matches!(w.close(), Err(Error::AlreadyClosed)));
        assert!(w.write_all(b"more").is_err());
        assert!(w.finish().is_ok());

        let mut w = sign(Vec::new(), header(), &alice, &config()).unwrap();
        w.write_all(CONTENT).unwrap();
        w.close().unwrap();
        assert!(matches!(w.close(), Err(Error::AlreadyClosed)));
        assert!(w.write_all(b"more").is_err());
    }

    #[test]
    fn sign_framing() {
        let message = signed(&[CONTENT], &config());

        let prefix: &[u8] = b"From: alice@example.org\r\n\
            Subject: Hi\r\n\
            Content-Type: multipart/signed; boundary=foo; micalg=pgp-sha256; \
            protocol=\"application/pgp-signature\"\r\n\
            Mime-Version: 1.0\r\n\
            \r\n\
            --foo\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            This is an encrypted message!\r\n\
            --foo\r\n\
            Content-Type: application/pgp-signature\r\n\
            \r\n\
            -----BEGIN PGP SIGNATURE-----\r\n";
        assert!(message.starts_with(prefix),
                "{}", String::from_utf8_lossy(&message));
        assert!(message.ends_with(b"-----END PGP SIGNATURE-----\r\n\r\n--foo--\r\n"),
                "{}", String::from_utf8_lossy(&message));
    }

    #[test]
    fn sign_round_trip() {
        let alice = testing::alice();
        let message = signed(&[CONTENT], &config());

        let (body, err, r) = decode(&message, &[&alice]);
        assert_eq!(body, CONTENT);
        assert!(! r.details.is_encrypted());
        assert!(r.details.is_signed());
        assert!(err.is_none(), "{:?}", err);
        assert_eq!(r.details.signed_by_key_id(), Some(&alice.keyid()));
        assert_eq!(r.details.signed_by().unwrap().cert().fingerprint(),
                   alice.fingerprint());
    }

    #[test]
    fn sign_canonicalizes() {
        let alice = testing::alice();
        let message = signed(&[b"Content-Type: text/plain\n\nHello\nworld\n"],
                             &config());

        let (body, err, _) = decode(&message, &[&alice]);
        assert_eq!(body, b"Content-Type: text/plain\r\n\r\nHello\r\nworld\r\n");
        assert!(err.is_none(), "{:?}", err);
    }

    #[test]
    fn sign_other_hash() {
        let alice = testing::alice();
        let config = config().with_hash(HashAlgorithm::SHA512);
        let message = signed(&[CONTENT], &config);
        assert!(message.windows(17).any(|w| w == b"micalg=pgp-sha512"));

        let (_, err, _) = decode(&message, &[&alice]);
        assert!(err.is_none(), "{:?}", err);
    }

    #[test]
    fn sign_chunking() {
        let alice = testing::alice();
        let config = config();

        let whole = signed(&[CONTENT], &config);
        let bytes: Vec<&[u8]> = CONTENT.chunks(1).collect();
        let sevens: Vec<&[u8]> = CONTENT.chunks(7).collect();

        for message in [signed(&bytes, &config), signed(&sevens, &config)] {
            assert_eq!(signed_part(&message), signed_part(&whole));
            let (body, err, _) = decode(&message, &[&alice]);
            assert_eq!(body, CONTENT);
            assert!(err.is_none(), "{:?}", err);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // However the content is split into writes, the signed part
        // is the same and it verifies.
        #[test]
        fn sign_any_chunking(sizes in prop::collection::vec(1usize..48, 1..16)) {
            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut rest = CONTENT;
            for size in sizes.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (chunk, tail) = rest.split_at(std::cmp::min(*size, rest.len()));
                chunks.push(chunk);
                rest = tail;
            }

            let config = config();
            let whole = signed(&[CONTENT], &config);
            let message = signed(&chunks, &config);
            prop_assert_eq!(signed_part(&message), signed_part(&whole));

            let (body, err, _) = decode(&message, &[&testing::alice()]);
            prop_assert_eq!(body, CONTENT);
            prop_assert!(err.is_none(), "{:?}", err);
        }
    }

    // A header that can't be parsed fails the writer for good.
    #[test]
    fn sign_malformed_header() {
        let mut w = sign(Vec::new(), header(), &testing::alice(), &config())
            .unwrap();
        assert!(w.write_all(b"no colon\r\n\r\nx").is_err());
        assert!(w.write_all(b"more").is_err());
        assert!(matches!(w.finish(), Err(Error::MalformedHeader(_))));

        let mut w = sign(Vec::new(), header(), &testing::alice(), &config())
            .unwrap();
        w.write_all(b"no colon").unwrap();
        assert!(matches!(w.close(), Err(Error::MalformedHeader(_))));
        assert!(matches!(w.close(), Err(Error::AlreadyClosed)));
    }

    // The entity's header is emitted as it was written.
    #[test]
    fn sign_keeps_folding() {
        let content = b"Content-Type: text/plain;\r\n  charset=utf-8\r\n\r\nHi";
        let message = signed(&[&content[..]], &config());
        let part = signed_part(&message);
        assert!(part.ends_with(&content[..]), "{:?}", String::from_utf8_lossy(part));

        let (body, err, _) = decode(&message, &[&testing::alice()]);
        assert_eq!(body, &content[..]);
        assert!(err.is_none(), "{:?}", err);
    }

    #[test]
    fn sign_tampered() {
        let alice = testing::alice();
        let message = signed(&[CONTENT], &config());
        let body = signed_part(&message).len() - 3;

        let mut tampered = message.clone();
        tampered[body] ^= 0x20;
        let (_, err, r) = decode(&tampered, &[&alice]);
        assert!(err.is_some());
        assert!(r.details.signed_by().is_none());
    }

    #[test]
    fn sign_errors() {
        let alice = testing::alice();
        let mut out = Vec::new();

        let unknown = config().with_hash(HashAlgorithm::Unknown(99));
        assert!(matches!(sign(&mut out, header(), &alice, &unknown),
                         Err(Error::UnsupportedMicAlg(_))));

        let public = alice.clone().strip_secret_key_material();
        assert!(matches!(sign(&mut out, header(), &public, &config()),
                         Err(Error::NoSigningKey(_, _))));
        assert!(out.is_empty());
    }

    #[test]
    fn sign_locked_key() {
        let carol = testing::carol();

        assert!(matches!(sign(Vec::new(), header(), &carol, &config()),
                         Err(Error::PassphraseRequired)));

        let config = config().with_password(testing::CAROL_PASSWORD);
        let message = signed_with(&carol, &config);
        let (body, err, _) = decode(&message, &[&carol]);
        assert_eq!(body, CONTENT);
        assert!(err.is_none(), "{:?}", err);
    }

    fn signed_with(cert: &Cert, config: &Config) -> Vec<u8> {
        let mut w = sign(Vec::new(), header(), cert, config).unwrap();
        w.write_all(CONTENT).unwrap();
        w.finish().unwrap()
    }

    // Dropping an unfinished writer doesn't leave the signer hanging.
    #[test]
    fn sign_dropped() {
        let mut w = sign(Vec::new(), header(), &testing::alice(), &config())
            .unwrap();
        w.write_all(CONTENT).unwrap();
        drop(w);
    }
}
