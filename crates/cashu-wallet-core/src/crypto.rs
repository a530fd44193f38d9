//! C1 — low-level cryptographic primitives shared by the BDHKE engine,
//! deterministic derivation and the secure store.
// ----- standard library imports
// ----- extra library imports
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use bitcoin::hashes::{Hash, HashEngine, hmac, sha256, sha512};
use pbkdf2::pbkdf2_hmac;
use secp256k1::{PublicKey, Secp256k1, SecretKey, All};
use subtle::ConstantTimeEq;
// ----- local imports
use crate::error::{Error, Result};

// ----- end imports

/// Process-wide secp256k1 context, shared by every component that needs
/// point/scalar arithmetic. The library's context is internally
/// synchronized, so a single static instance is all the actor-level
/// concurrency model (see orchestrator) needs.
pub static SECP256K1: std::sync::LazyLock<Secp256k1<All>> =
    std::sync::LazyLock::new(Secp256k1::new);

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Override point for deterministic tests; production code should use
/// [`OsRngSource`].
pub trait RngSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngSource;

impl RngSource for OsRngSource {
    fn fill(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rng().fill_bytes(buf);
    }
}

/// Fills and returns `n` random bytes from the platform CSPRNG.
pub fn rand_bytes(n: usize) -> Vec<u8> {
    rand_bytes_from(&OsRngSource, n)
}

pub fn rand_bytes_from(src: &dyn RngSource, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    src.fill(&mut buf);
    buf
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    sha512::Hash::hash(data).to_byte_array()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let hkey = hmac::HmacEngine::<sha256::Hash>::new(key);
    let mut engine = hkey;
    engine.input(data);
    hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array()
}

pub fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let hkey = hmac::HmacEngine::<sha512::Hash>::new(key);
    let mut engine = hkey;
    engine.input(data);
    hmac::Hmac::<sha512::Hash>::from_engine(engine).to_byte_array()
}

pub fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iters: u32, dk_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; dk_len];
    pbkdf2_hmac::<sha2::Sha256>(password, salt, iters, &mut out);
    out
}

pub fn pbkdf2_hmac_sha512(password: &[u8], salt: &[u8], iters: u32, dk_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; dk_len];
    pbkdf2_hmac::<sha2::Sha512>(password, salt, iters, &mut out);
    out
}

/// `a == b` in time independent of where the first differing byte is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ----- secp256k1 point/scalar helpers

pub fn point_from_compressed(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|_| Error::InvalidPoint)
}

pub fn point_to_compressed(p: &PublicKey) -> [u8; 33] {
    p.serialize()
}

pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|_| Error::InvalidScalar)
}

pub fn point_mul_generator(scalar: &SecretKey) -> PublicKey {
    scalar.public_key(&SECP256K1)
}

pub fn point_mul(p: &PublicKey, scalar: &SecretKey) -> Result<PublicKey> {
    p.mul_tweak(&SECP256K1, &scalar.as_scalar())
        .map_err(|_| Error::InvalidPoint)
}

pub fn point_add(a: &PublicKey, b: &PublicKey) -> Result<PublicKey> {
    a.combine(b).map_err(|_| Error::InvalidPoint)
}

pub fn point_negate(p: &PublicKey) -> PublicKey {
    p.negate(&SECP256K1)
}

pub fn scalar_negate(s: &SecretKey) -> SecretKey {
    s.negate()
}

// ----- AES-256-GCM

/// `[nonce(12) || ciphertext||tag(16)]`
pub fn aes_256_gcm_seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRngSource.fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::StoreFailed(e.to_string()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn aes_256_gcm_open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidData);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::RetrievalFailed("decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_identity() {
        let key = [7u8; 32];
        let plaintext = b"some secret bytes, arbitrary length here";
        let sealed = aes_256_gcm_seal(&key, plaintext).unwrap();
        let opened = aes_256_gcm_open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key = [7u8; 32];
        let other = [9u8; 32];
        let sealed = aes_256_gcm_seal(&key, b"payload").unwrap();
        assert!(aes_256_gcm_open(&other, &sealed).is_err());
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn point_mul_generator_matches_scalar_base_mult() {
        let sk = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let p1 = point_mul_generator(&sk);
        let g = point_mul_generator(&SecretKey::from_slice(&[1u8; 32]).unwrap());
        assert_eq!(p1, g);
    }

    #[test]
    fn rand_bytes_returns_requested_length() {
        assert_eq!(rand_bytes(32).len(), 32);
    }
}
