//! AEAD ciphers for the sealed box (spec §4.7). Two ciphers are supported,
//! matching the wire names carried in the box header: `chacha20-poly1305`
//! and `aes256-gcm`.

use aes_gcm::aead::{Aead, KeyInit as AeadKeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;

use crate::error::{PivError, Result};

/// An AEAD cipher negotiated for a box body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlg {
    /// ChaCha20-Poly1305 (the box default).
    ChaCha20Poly1305,
    /// AES-256-GCM.
    Aes256Gcm,
}

impl AeadAlg {
    /// The wire name carried in the box header.
    pub fn wire_name(self) -> &'static str {
        match self {
            AeadAlg::ChaCha20Poly1305 => "chacha20-poly1305",
            AeadAlg::Aes256Gcm => "aes256-gcm",
        }
    }

    /// Parse a wire name back into an algorithm.
    pub fn from_wire_name(name: &str) -> Result<Self> {
        match name {
            "chacha20-poly1305" => Ok(AeadAlg::ChaCha20Poly1305),
            "aes256-gcm" => Ok(AeadAlg::Aes256Gcm),
            other => Err(PivError::not_supported(format!("unknown box cipher {other:?}"))),
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        32
    }

    /// Nonce length in bytes.
    pub fn nonce_len(self) -> usize {
        12
    }
}

/// Seal `plaintext` under `key`/`nonce`, binding `aad` into the tag.
pub fn seal(alg: AeadAlg, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let payload = Payload { msg: plaintext, aad };
    match alg {
        AeadAlg::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            let nonce = chacha20poly1305::Nonce::from_slice(nonce);
            cipher.encrypt(nonce, payload).map_err(|_| PivError::invalid_data("AEAD seal failed"))
        }
        AeadAlg::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            let nonce = aes_gcm::Nonce::from_slice(nonce);
            cipher.encrypt(nonce, payload).map_err(|_| PivError::invalid_data("AEAD seal failed"))
        }
    }
}

/// Open an AEAD box sealed by [`seal`], verifying `aad`.
pub fn open(alg: AeadAlg, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let payload = Payload { msg: ciphertext, aad };
    match alg {
        AeadAlg::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            let nonce = chacha20poly1305::Nonce::from_slice(nonce);
            cipher.decrypt(nonce, payload).map_err(|_| PivError::invalid_data("AEAD open failed: tag mismatch"))
        }
        AeadAlg::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            let nonce = aes_gcm::Nonce::from_slice(nonce);
            cipher.decrypt(nonce, payload).map_err(|_| PivError::invalid_data("AEAD open failed: tag mismatch"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha20poly1305_round_trips() {
        let key = [0x42u8; 32];
        let nonce = [0x01u8; 12];
        let aad = b"box-header";
        let plaintext = b"sealed payload";
        let ct = seal(AeadAlg::ChaCha20Poly1305, &key, &nonce, aad, plaintext).unwrap();
        let pt = open(AeadAlg::ChaCha20Poly1305, &key, &nonce, aad, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn aes256_gcm_round_trips() {
        let key = [0x07u8; 32];
        let nonce = [0x02u8; 12];
        let aad = b"box-header";
        let plaintext = b"sealed payload";
        let ct = seal(AeadAlg::Aes256Gcm, &key, &nonce, aad, plaintext).unwrap();
        let pt = open(AeadAlg::Aes256Gcm, &key, &nonce, aad, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let key = [0x09u8; 32];
        let nonce = [0x03u8; 12];
        let mut ct = seal(AeadAlg::ChaCha20Poly1305, &key, &nonce, b"aad", b"hello").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(open(AeadAlg::ChaCha20Poly1305, &key, &nonce, b"aad", &ct).is_err());
    }

    #[test]
    fn wire_name_round_trips() {
        assert_eq!(AeadAlg::from_wire_name("chacha20-poly1305").unwrap(), AeadAlg::ChaCha20Poly1305);
        assert_eq!(AeadAlg::from_wire_name("aes256-gcm").unwrap(), AeadAlg::Aes256Gcm);
        assert!(AeadAlg::from_wire_name("rc4").is_err());
    }
}
