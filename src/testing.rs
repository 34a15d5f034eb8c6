//! Keys and fixtures shared by the unit tests.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};

use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::cert::{CertBuilder, CipherSuite};
use openpgp::KeyID;
use openpgp::types::KeyFlags;

use crate::KeyRing;

pub const CAROL_PASSWORD: &str = "streng geheim";

lazy_static::lazy_static! {
    static ref ALICE: Cert = generate("<alice@example.org>", None);
    static ref BOB: Cert = generate("<bob@example.org>", None);
    static ref CAROL: Cert = generate("<carol@example.org>", Some(CAROL_PASSWORD));
}

/// The time at which test signatures are made.
pub fn time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 2, 13, 12, 0, 0).unwrap()
}

// The primary key signs, a subkey encrypts.  The keys are created a
// day before `time()` and don't expire.
fn generate(userid: &str, password: Option<&str>) -> Cert {
    let created = SystemTime::from(time()) - Duration::from_secs(24 * 60 * 60);
    let (cert, _rev) = CertBuilder::new()
        .set_cipher_suite(CipherSuite::Cv25519)
        .set_creation_time(created)
        .set_validity_period(None::<Duration>)
        .set_primary_key_flags(
            KeyFlags::empty().set_certification().set_signing())
        .add_userid(userid)
        .add_transport_encryption_subkey()
        .set_password(password.map(Into::into))
        .generate()
        .unwrap();
    cert
}

pub fn alice() -> Cert {
    ALICE.clone()
}

pub fn bob() -> Cert {
    BOB.clone()
}

/// A key whose secret key material is encrypted with
/// `CAROL_PASSWORD`.
pub fn carol() -> Cert {
    CAROL.clone()
}

pub fn keyring(certs: &[&Cert]) -> KeyRing {
    let mut keyring = KeyRing::new();
    for cert in certs {
        keyring.insert((*cert).clone()).unwrap();
    }
    keyring
}

/// Returns the key ID of the cert's encryption subkey.
pub fn encryption_keyid(cert: &Cert) -> KeyID {
    cert.keys().subkeys().next().unwrap().keyid()
}
