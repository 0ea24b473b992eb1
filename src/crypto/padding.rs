//! PKCS#1 v1.5 padding for RSA signing (spec §4.6 `sign`): the card signs
//! a raw, already-padded block equal to the modulus length.

use crate::crypto::digest::HashAlg;
use crate::error::{PivError, Result};

/// Pad `digest` (the raw hash output for `hash_alg`) into a PKCS#1 v1.5
/// `EMSA-PKCS1-v1_5` block of exactly `modulus_len` bytes:
/// `0x00 || 0x01 || 0xFF...0xFF || 0x00 || DigestInfo`.
pub fn pkcs1_v15_pad(hash_alg: HashAlg, digest: &[u8], modulus_len: usize) -> Result<Vec<u8>> {
    if digest.len() != hash_alg.output_len() {
        return Err(PivError::argument("digest length does not match hash algorithm"));
    }

    let der_prefix = hash_alg.pkcs1_der_prefix();
    let t_len = der_prefix.len() + digest.len();

    if modulus_len < t_len + 11 {
        return Err(PivError::argument("modulus too small for this hash's PKCS#1 v1.5 encoding"));
    }

    let pad_len = modulus_len - t_len - 3;
    let mut block = Vec::with_capacity(modulus_len);
    block.push(0x00);
    block.push(0x01);
    block.extend(std::iter::repeat(0xFFu8).take(pad_len));
    block.push(0x00);
    block.extend_from_slice(der_prefix);
    block.extend_from_slice(digest);

    debug_assert_eq!(block.len(), modulus_len);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_sha256_digest_to_2048_bit_modulus() {
        let digest = HashAlg::Sha256.digest(b"hello");
        let block = pkcs1_v15_pad(HashAlg::Sha256, &digest, 256).unwrap();
        assert_eq!(block.len(), 256);
        assert_eq!(block[0], 0x00);
        assert_eq!(block[1], 0x01);
        assert_eq!(block[block.len() - digest.len()..], digest[..]);
    }

    #[test]
    fn rejects_modulus_too_small() {
        let digest = HashAlg::Sha512.digest(b"hello");
        assert!(pkcs1_v15_pad(HashAlg::Sha512, &digest, 64).is_err());
    }
}
