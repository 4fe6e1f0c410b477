//! Long-term identity keys and the authenticated-box envelope (C1).
//!
//! OSM has no forward secrecy: every message is sealed under the sender's
//! and recipient's long-term X25519 keypairs using the NaCl "box"
//! construction (X25519 + XSalsa20-Poly1305), exactly as `crypto_box`
//! implements it. The wire layout of a sealed payload is `nonce(24) ‖
//! ciphertext`; `seal`/`open` work at the base64 boundary so the envelope
//! router (C7) never has to touch raw box bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Raw nonce length used by the box construction (XSalsa20-Poly1305).
pub const NONCE_LEN: usize = 24;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum CryptoError {
    #[error("bad base64 in sealed payload")]
    BadBase64,
    #[error("sealed payload has the wrong length")]
    BadLength,
    #[error("authentication failed")]
    AuthFail,
}

/// A 32-byte X25519 public key. Safe to log, serialize, and export.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(s.trim()).map_err(|_| CryptoError::BadBase64)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::BadLength)?;
        Ok(PublicKey(arr))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// A 32-byte X25519 secret key. Never printed, never leaves the device
/// except through the explicit `CMD:PRIVKEY` testing backdoor (§9).
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretKey(pub [u8; 32]);

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(s.trim()).map_err(|_| CryptoError::BadBase64)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::BadLength)?;
        Ok(SecretKey(arr))
    }

    pub fn public_key(&self) -> PublicKey {
        let box_sk = BoxSecretKey::from_bytes(self.0);
        PublicKey(*box_sk.public_key().as_bytes())
    }
}

/// The device's long-term keypair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub pk: PublicKey,
    pub sk: SecretKey,
}

impl Identity {
    /// Generates a fresh keypair using the OS RNG, as done on first startup
    /// by C6 when no identity is yet persisted.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let sk = BoxSecretKey::generate(rng);
        let pk = PublicKey(*sk.public_key().as_bytes());
        Identity {
            pk,
            sk: SecretKey(*sk.to_bytes()),
        }
    }

    pub fn from_keypair(pk: PublicKey, sk: SecretKey) -> Self {
        Identity { pk, sk }
    }
}

fn make_box(peer_pk: &PublicKey, my_sk: &SecretKey) -> SalsaBox {
    let their_pk = BoxPublicKey::from(peer_pk.0);
    let our_sk = BoxSecretKey::from_bytes(my_sk.0);
    SalsaBox::new(&their_pk, &our_sk)
}

/// Seals `plaintext` for `peer_pk` using `my_sk`, returning the base64
/// encoding of `nonce(24) ‖ ciphertext` ready for inclusion in an
/// `OSM:MSG:` envelope.
pub fn seal(plaintext: &[u8], peer_pk: &PublicKey, my_sk: &SecretKey) -> String {
    let cbox = make_box(peer_pk, my_sk);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    // crypto_box only fails on an oversized plaintext; OSM bounds plaintext
    // to MAX_MSG_SIZE well below that limit, so this cannot happen here.
    let ciphertext = cbox
        .encrypt(&nonce, plaintext)
        .expect("plaintext within crypto_box's size limit");

    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(nonce.as_slice());
    wire.extend_from_slice(&ciphertext);
    BASE64.encode(wire)
}

/// Attempts to open a base64-encoded `nonce ‖ ciphertext` payload under
/// `peer_pk`/`my_sk`. A single byte of tampering anywhere in the payload
/// yields `AuthFail`.
pub fn open(b64: &str, peer_pk: &PublicKey, my_sk: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let wire = BASE64.decode(b64.trim()).map_err(|_| CryptoError::BadBase64)?;
    if wire.len() < NONCE_LEN {
        return Err(CryptoError::BadLength);
    }
    let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
    let nonce = (*nonce_bytes).into();

    let cbox = make_box(peer_pk, my_sk);
    cbox.decrypt(nonce, ciphertext).map_err(|_| {
        tracing::debug!("box open failed authentication");
        CryptoError::AuthFail
    })
}
