// src/crypto.rs
//! Key agreement and batch ciphers for the encryption handover.
//!
//! The handshake runs on secp384r1. Shared secrets are derived the way the
//! peers derive them: SHA-256 over the base64-decoded salt followed by the raw
//! ECDH shared secret, yielding the 32-byte AES key. The first 16 bytes of
//! that key double as the IV/nonce for both cipher directions.

use crate::error::{ProxyError, Result};
use aes::cipher::consts::U16;
use aes::Aes256;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cfb8::cipher::{AsyncStreamCipher, KeyIvInit};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use rand::Rng as _;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

/// AES-256-GCM with the 16-byte nonce the handshake derives.
type Aes256Gcm16 = AesGcm<Aes256, U16>;
type Aes256Cfb8Enc = cfb8::Encryptor<Aes256>;
type Aes256Cfb8Dec = cfb8::Decryptor<Aes256>;

pub const SECRET_LEN: usize = 32;
const IV_LEN: usize = 16;
const SALT_LEN: usize = 16;

/// A 32-byte batch key derived from salted ECDH.
pub type SharedSecret = [u8; SECRET_LEN];

/// Ephemeral secp384r1 key pair generated at Login interception.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Public key as base64 SPKI DER, the representation JWT payloads carry.
    pub fn public_key_b64(&self) -> String {
        let der = self
            .public
            .to_public_key_der()
            .expect("SPKI encoding of a valid P-384 point cannot fail");
        STANDARD.encode(der.as_bytes())
    }
}

/// Parses a base64 SPKI DER public key as found in `identityPublicKey` and
/// `x5u` fields.
pub fn public_key_from_b64(encoded: &str) -> Result<PublicKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| ProxyError::Crypto(format!("Invalid public key base64: {}", e)))?;
    PublicKey::from_public_key_der(&der)
        .map_err(|e| ProxyError::Crypto(format!("Invalid public key DER: {}", e)))
}

/// Derives the batch key: SHA-256(salt || raw ECDH shared secret).
pub fn diffie_hellman(secret: &SecretKey, peer: &PublicKey, salt_b64: &str) -> Result<SharedSecret> {
    let salt = STANDARD
        .decode(salt_b64)
        .map_err(|e| ProxyError::Crypto(format!("Invalid salt base64: {}", e)))?;
    let shared = p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(shared.raw_secret_bytes());
    Ok(hasher.finalize().into())
}

/// Generates a fresh 16-byte handshake salt, base64-encoded.
pub fn random_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt[..]);
    STANDARD.encode(salt)
}

/// Encrypts a batch body with AES-256-GCM, returning ciphertext || tag.
pub fn encrypt_gcm(secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new_from_slice(secret)
        .map_err(|e| ProxyError::Crypto(format!("GCM key setup failed: {}", e)))?;
    let nonce = aes_gcm::Nonce::from_slice(&secret[..IV_LEN]);
    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ProxyError::Crypto("GCM encryption failed".to_string()))
}

/// Decrypts ciphertext || tag produced by [`encrypt_gcm`].
pub fn decrypt_gcm(secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new_from_slice(secret)
        .map_err(|e| ProxyError::Crypto(format!("GCM key setup failed: {}", e)))?;
    let nonce = aes_gcm::Nonce::from_slice(&secret[..IV_LEN]);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| ProxyError::Crypto("GCM tag mismatch".to_string()))
}

/// Stream-decrypts a batch body with AES-256-CFB8. No authentication.
pub fn decrypt_cfb8(secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let decryptor = Aes256Cfb8Dec::new_from_slices(secret, &secret[..IV_LEN])
        .map_err(|e| ProxyError::Crypto(format!("CFB8 key setup failed: {}", e)))?;
    let mut buffer = ciphertext.to_vec();
    decryptor.decrypt(&mut buffer);
    Ok(buffer)
}

/// Stream-encrypts with AES-256-CFB8; the inverse of [`decrypt_cfb8`], i.e.
/// what the peer runs before the bytes reach the proxy.
pub fn encrypt_cfb8(secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
    let encryptor = Aes256Cfb8Enc::new_from_slices(secret, &secret[..IV_LEN])
        .map_err(|e| ProxyError::Crypto(format!("CFB8 key setup failed: {}", e)))?;
    let mut buffer = plaintext.to_vec();
    encryptor.encrypt(&mut buffer);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diffie_hellman_agreement() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let salt = random_salt();

        let secret_a = diffie_hellman(alice.secret_key(), bob.public_key(), &salt).unwrap();
        let secret_b = diffie_hellman(bob.secret_key(), alice.public_key(), &salt).unwrap();
        assert_eq!(secret_a, secret_b);

        // A different salt produces a different key from the same pair.
        let other = diffie_hellman(alice.secret_key(), bob.public_key(), &random_salt()).unwrap();
        assert_ne!(secret_a, other);
    }

    #[test]
    fn test_public_key_b64_round_trip() {
        let pair = KeyPair::generate();
        let encoded = pair.public_key_b64();
        let decoded = public_key_from_b64(&encoded).unwrap();
        assert_eq!(&decoded, pair.public_key());
    }

    #[test]
    fn test_public_key_rejects_garbage() {
        assert!(public_key_from_b64("not base64 at all!").is_err());
        assert!(public_key_from_b64(&STANDARD.encode(b"not der")).is_err());
    }

    #[test]
    fn test_salt_is_16_bytes() {
        let salt = random_salt();
        assert_eq!(STANDARD.decode(&salt).unwrap().len(), SALT_LEN);
    }

    #[test]
    fn test_gcm_round_trip_and_tamper_detection() {
        let secret: SharedSecret = [7u8; SECRET_LEN];
        let plaintext = b"batch body bytes";

        let mut ciphertext = encrypt_gcm(&secret, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + 16); // tag appended
        assert_eq!(decrypt_gcm(&secret, &ciphertext).unwrap(), plaintext);

        ciphertext[0] ^= 0xFF;
        assert!(matches!(decrypt_gcm(&secret, &ciphertext), Err(ProxyError::Crypto(_))));
    }

    #[test]
    fn test_cfb8_round_trip() {
        let secret: SharedSecret = [3u8; SECRET_LEN];
        let plaintext = b"stream mode has no tag";

        let ciphertext = encrypt_cfb8(&secret, plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(decrypt_cfb8(&secret, &ciphertext).unwrap(), plaintext);
    }
}
