// src/bedrock/jwt.rs
//! Minimal JSON Web Token handling for the handshake chain.
//!
//! The login chain and server handshake carry ES384 tokens keyed through the
//! `x5u` header. Off-the-shelf JWT crates validate against configured keys and
//! hide the raw signature; the proxy needs the opposite (read whatever is
//! there, then re-sign with its own key), so the three base64url segments are
//! handled directly.

use crate::crypto::KeyPair;
use crate::error::{ProxyError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::PublicKey;
use serde_json::{json, Value};

/// A parsed three-part JSON web token.
#[derive(Debug, Clone)]
pub struct JsonWebToken {
    pub header: Value,
    pub payload: Value,
    pub signature: Vec<u8>,
}

impl JsonWebToken {
    /// Splits and decodes `header.payload.signature`.
    pub fn parse(token: &str) -> Result<Self> {
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(ProxyError::Crypto("JWT is not three dot-separated parts".to_string())),
        };

        Ok(Self {
            header: decode_json_segment(header)?,
            payload: decode_json_segment(payload)?,
            signature: URL_SAFE_NO_PAD
                .decode(signature)
                .map_err(|e| ProxyError::Crypto(format!("Invalid JWT signature base64: {}", e)))?,
        })
    }

    /// The signer's public key from the header, base64 SPKI.
    pub fn x5u(&self) -> Option<&str> {
        self.header.get("x5u").and_then(Value::as_str)
    }

    /// The handshake salt from the payload.
    pub fn salt(&self) -> Option<&str> {
        self.payload.get("salt").and_then(Value::as_str)
    }

    /// The `identityPublicKey` claim from the payload.
    pub fn identity_public_key(&self) -> Option<&str> {
        self.payload.get("identityPublicKey").and_then(Value::as_str)
    }

    /// Re-signs the token with `key_pair` and returns the encoded compact
    /// form. The header is rewritten so the token verifies under the new
    /// signer: alg ES384, x5u = the signer's public key.
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<String> {
        self.header = json!({
            "alg": "ES384",
            "x5u": key_pair.public_key_b64(),
        });

        let message = format!(
            "{}.{}",
            encode_json_segment(&self.header)?,
            encode_json_segment(&self.payload)?
        );
        let signing_key = SigningKey::from(key_pair.secret_key());
        let signature: Signature = signing_key.sign(message.as_bytes());
        self.signature = signature.to_bytes().to_vec();

        Ok(format!("{}.{}", message, URL_SAFE_NO_PAD.encode(&self.signature)))
    }

    /// Checks the raw r||s signature over the encoded header and payload.
    pub fn verify(&self, key: &PublicKey) -> bool {
        let Ok(header) = encode_json_segment(&self.header) else {
            return false;
        };
        let Ok(payload) = encode_json_segment(&self.payload) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        let message = format!("{}.{}", header, payload);
        VerifyingKey::from(key).verify(message.as_bytes(), &signature).is_ok()
    }
}

fn decode_json_segment(segment: &str) -> Result<Value> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ProxyError::Crypto(format!("Invalid JWT base64: {}", e)))?;
    serde_json::from_slice(&raw).map_err(|e| ProxyError::Crypto(format!("Invalid JWT JSON: {}", e)))
}

fn encode_json_segment(value: &Value) -> Result<String> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| ProxyError::Crypto(format!("JWT serialization failed: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}
