//! Key derivation for the sealed box (spec §4.7): a single SHA-512 pass
//! over the shared secret, domain-separated by a fixed label, sliced into
//! the AEAD key and nonce the negotiated cipher needs.

use sha2::{Digest, Sha512};

use crate::crypto::aead::AeadAlg;
use crate::error::{PivError, Result};

const LABEL: &[u8] = b"piv-box";

/// Derive `key || nonce` bytes for `alg` from an ECDH shared secret.
///
/// Matches the construction `SHA-512(len(shared) || shared || "piv-box")`,
/// truncated to `alg.key_len() + alg.nonce_len()` bytes. `len(shared)` is
/// mixed in as a 4-byte big-endian length so a truncated or padded shared
/// secret cannot collide with a differently-sized one.
pub fn derive(alg: AeadAlg, shared_secret: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let needed = alg.key_len() + alg.nonce_len();

    let mut hasher = Sha512::new();
    hasher.update((shared_secret.len() as u32).to_be_bytes());
    hasher.update(shared_secret);
    hasher.update(LABEL);
    let mut output = hasher.finalize().to_vec();

    if needed > output.len() {
        // Extend with additional SHA-512 rounds keyed on a counter, in the
        // unlikely event a future cipher needs more than 64 bytes.
        let mut counter: u32 = 1;
        while output.len() < needed {
            let mut hasher = Sha512::new();
            hasher.update(counter.to_be_bytes());
            hasher.update((shared_secret.len() as u32).to_be_bytes());
            hasher.update(shared_secret);
            hasher.update(LABEL);
            output.extend(hasher.finalize());
            counter += 1;
        }
    }

    if output.len() < needed {
        return Err(PivError::invalid_data("KDF output shorter than cipher requirements"));
    }

    let key = output[..alg.key_len()].to_vec();
    let nonce = output[alg.key_len()..needed].to_vec();
    Ok((key, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_deterministic_key_and_nonce() {
        let shared = [0x11u8; 32];
        let (key_a, nonce_a) = derive(AeadAlg::Aes256Gcm, &shared).unwrap();
        let (key_b, nonce_b) = derive(AeadAlg::Aes256Gcm, &shared).unwrap();
        assert_eq!(key_a, key_b);
        assert_eq!(nonce_a, nonce_b);
        assert_eq!(key_a.len(), 32);
        assert_eq!(nonce_a.len(), 12);
    }

    #[test]
    fn different_shared_secrets_derive_different_keys() {
        let (key_a, _) = derive(AeadAlg::ChaCha20Poly1305, &[0x01u8; 32]).unwrap();
        let (key_b, _) = derive(AeadAlg::ChaCha20Poly1305, &[0x02u8; 32]).unwrap();
        assert_ne!(key_a, key_b);
    }
}
