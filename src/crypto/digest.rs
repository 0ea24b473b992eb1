//! Hash algorithm selection for `sign`/`sign_prehash` (spec §4.6): the
//! caller may preselect a hash, or the engine infers one from key size.

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{PivError, Result};

/// A hash algorithm usable for PIV signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// SHA-1, retained only for the `0xF0` hash-on-card pseudo-algorithm.
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl HashAlg {
    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }

    /// Hash `data` with this algorithm.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha1 => {
                use sha1::Sha1;
                Sha1::digest(data).to_vec()
            }
            HashAlg::Sha256 => Sha256::digest(data).to_vec(),
            HashAlg::Sha384 => Sha384::digest(data).to_vec(),
            HashAlg::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// The ASN.1 DigestInfo AlgorithmIdentifier DER prefix prepended before
    /// PKCS#1 v1.5 padding (RFC 8017 §9.2 table).
    pub fn pkcs1_der_prefix(self) -> &'static [u8] {
        match self {
            HashAlg::Sha1 => &[
                0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
            ],
            HashAlg::Sha256 => &[
                0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            HashAlg::Sha384 => &[
                0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            HashAlg::Sha512 => &[
                0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }

    /// Choose a default hash for an RSA modulus of `key_bits` bits, absent
    /// caller preselection: SHA-256 below 3072 bits, else SHA-384.
    pub fn default_for_rsa_key_size(key_bits: usize) -> Self {
        if key_bits >= 3072 {
            HashAlg::Sha384
        } else {
            HashAlg::Sha256
        }
    }

    /// Choose the hash whose output matches an EC field size: P-256 →
    /// SHA-256, P-384 → SHA-384.
    pub fn default_for_ec_field_bits(field_bits: usize) -> Result<Self> {
        match field_bits {
            256 => Ok(HashAlg::Sha256),
            384 => Ok(HashAlg::Sha384),
            other => Err(PivError::not_supported(format!("no default hash for a {other}-bit curve"))),
        }
    }
}
