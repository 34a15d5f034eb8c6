//! Computes a detached signature on a background thread.
//!
//! The data to sign is pushed through a bounded channel, so a writer
//! can stream the signed content to its destination and to the
//! signer at the same time without buffering the whole message.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam::channel::{bounded, Receiver, Sender};

use sequoia_openpgp as openpgp;
use openpgp::crypto::KeyPair;
use openpgp::serialize::stream::{
    Message,
    Signer,
};
use openpgp::types::HashAlgorithm;

use crate::constants::PIPE_DEPTH;
use crate::Error;
use crate::Result;

enum Chunk {
    Data(Vec<u8>),
    // The producer gave up.  The signature must not be made.
    Abort(String),
}

/// The producer end of the signing pipe.
///
/// Dropping a `DetachedSigner` without calling
/// [`DetachedSigner::finish`] aborts the signer and waits for the
/// thread to exit.
pub(crate) struct DetachedSigner {
    tx: Option<Sender<Chunk>>,
    thread: Option<JoinHandle<Result<Vec<u8>>>>,
}

impl DetachedSigner {
    pub fn new(keypair: KeyPair, hash: HashAlgorithm, time: Option<SystemTime>)
        -> Result<Self>
    {
        tracer!(*crate::TRACE, "DetachedSigner::new");
        t!("Signing with {} using {}", keypair.public().fingerprint(), hash);

        let (tx, rx) = bounded(PIPE_DEPTH);
        let thread = wrap_err!(
            thread::Builder::new()
                .name("pgpmail-signer".into())
                .spawn(move || sign(keypair, hash, time, rx)),
            SignerFailed,
            "Spawning signer thread")?;

        Ok(DetachedSigner {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Signals the end of the data and returns the binary signature.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        // Closing the channel is the end of data.
        drop(self.tx.take());

        let thread = self.thread.take().ok_or(Error::AlreadyClosed)?;
        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(Error::SignerFailed(
                anyhow::anyhow!("signer thread panicked"),
                "Computing signature".into())),
        }
    }
}

impl Write for DetachedSigner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let tx = self.tx.as_ref().ok_or(Error::AlreadyClosed)?;
        // The thread only hangs up early if it failed.  `finish`
        // reports why.
        tx.send(Chunk::Data(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe,
                                        "signer stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for DetachedSigner {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Chunk::Abort("writer dropped".into()));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// The signer thread.
fn sign(keypair: KeyPair, hash: HashAlgorithm, time: Option<SystemTime>,
        rx: Receiver<Chunk>)
    -> Result<Vec<u8>>
{
    tracer!(*crate::TRACE, "signer");

    let mut sig = Vec::new();
    let message = Message::new(&mut sig);

    let builder = Signer::new(message, keypair).detached();
    let mut builder = wrap_err!(
        builder.hash_algo(hash),
        SignerFailed,
        format!("Selecting {}", hash))?;
    if let Some(time) = time {
        builder = builder.creation_time(time);
    }
    let mut signer = wrap_err!(
        builder.build(),
        SignerFailed,
        "Creating signer")?;

    let mut total = 0;
    for chunk in rx.iter() {
        match chunk {
            Chunk::Data(data) => {
                total += data.len();
                wrap_err!(signer.write_all(&data), SignerFailed, "Hashing data")?;
            }
            Chunk::Abort(reason) => {
                ::log::warn!("Signing aborted after {} bytes: {}", total, reason);
                return Err(Error::SignerFailed(
                    anyhow::anyhow!("{}", reason), "Signing aborted".into()));
            }
        }
    }

    wrap_err!(signer.finalize(), SignerFailed, "Finalizing signature")?;
    t!("Signed {} bytes", total);
    Ok(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    use openpgp::Packet;
    use openpgp::parse::Parse;

    use crate::testing;

    fn keypair() -> KeyPair {
        testing::alice().primary_key().key().clone()
            .parts_into_secret().unwrap()
            .into_keypair().unwrap()
    }

    #[test]
    fn sign() {
        let alice = testing::alice();
        let data = b"Hello, world!\r\n".repeat(64);

        let mut signer = DetachedSigner::new(
            keypair(), HashAlgorithm::SHA512,
            Some(SystemTime::from(testing::time()))).unwrap();
        // More writes than the channel holds.
        for chunk in data.chunks(7) {
            signer.write_all(chunk).unwrap();
        }
        let sig = signer.finish().unwrap();

        let mut sig = match Packet::from_bytes(&sig).unwrap() {
            Packet::Signature(sig) => sig,
            p => panic!("expected a signature, got {:?}", p),
        };
        assert_eq!(sig.hash_algo(), HashAlgorithm::SHA512);
        assert_eq!(sig.signature_creation_time(),
                   Some(SystemTime::from(testing::time())));
        sig.verify_message(alice.primary_key().key(), &data).unwrap();
    }

    #[test]
    fn empty() {
        let signer = DetachedSigner::new(
            keypair(), HashAlgorithm::SHA256, None).unwrap();
        let sig = signer.finish().unwrap();
        assert!(matches!(Packet::from_bytes(&sig).unwrap(),
                         Packet::Signature(_)));
    }

    // Dropping the producer stops the thread.
    #[test]
    fn abort() {
        let mut signer = DetachedSigner::new(
            keypair(), HashAlgorithm::SHA256, None).unwrap();
        signer.write_all(b"partial").unwrap();
        drop(signer);
    }
}
