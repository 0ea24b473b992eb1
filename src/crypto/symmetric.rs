//! Single-block symmetric encryption for administrative challenge-response
//! (spec §4.6 `auth_admin`): 3DES-EDE (YubicoPIV default) or AES-128/192/256
//! (YubicoPIV ≥5.4 management-key algorithms). Each challenge is exactly
//! one block; no chaining mode is involved.

use cipher::{BlockEncrypt, KeyInit};

use crate::error::{PivError, Result};
use crate::slot::AlgorithmId;

/// Encrypt one 8- or 16-byte challenge block under `key` using the cipher
/// implied by `algorithm`.
pub fn encrypt_ecb_block(algorithm: AlgorithmId, key: &[u8], block: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        AlgorithmId::ThreeDes => {
            if key.len() != 24 {
                return Err(PivError::argument("3DES management key must be 24 bytes"));
            }
            if block.len() != 8 {
                return Err(PivError::argument("3DES challenge block must be 8 bytes"));
            }
            let cipher = des::TdesEde3::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            let mut buf = cipher::generic_array::GenericArray::clone_from_slice(block);
            cipher.encrypt_block(&mut buf);
            Ok(buf.to_vec())
        }
        AlgorithmId::Aes128 | AlgorithmId::Aes192 | AlgorithmId::Aes256 => {
            if block.len() != 16 {
                return Err(PivError::argument("AES challenge block must be 16 bytes"));
            }
            encrypt_aes_block(algorithm, key, block)
        }
        other => Err(PivError::not_supported(format!("{other:?} is not an admin-auth cipher"))),
    }
}

fn encrypt_aes_block(algorithm: AlgorithmId, key: &[u8], block: &[u8]) -> Result<Vec<u8>> {
    let mut buf = cipher::generic_array::GenericArray::clone_from_slice(block);
    match algorithm {
        AlgorithmId::Aes128 => {
            let cipher = aes::Aes128::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            cipher.encrypt_block(&mut buf);
        }
        AlgorithmId::Aes192 => {
            let cipher = aes::Aes192::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            cipher.encrypt_block(&mut buf);
        }
        AlgorithmId::Aes256 => {
            let cipher = aes::Aes256::new_from_slice(key).map_err(|e| PivError::argument(e.to_string()))?;
            cipher.encrypt_block(&mut buf);
        }
        _ => unreachable!("caller already matched on the AES family"),
    }
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_des_round_trips_a_single_block() {
        let key = [0x01u8; 24];
        let block = [0xAAu8; 8];
        let ct = encrypt_ecb_block(AlgorithmId::ThreeDes, &key, &block).unwrap();
        assert_eq!(ct.len(), 8);
        assert_ne!(ct, block);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let key = [0x01u8; 8];
        let block = [0xAAu8; 8];
        assert!(encrypt_ecb_block(AlgorithmId::ThreeDes, &key, &block).is_err());
    }

    #[test]
    fn aes256_requires_16_byte_block() {
        let key = [0x02u8; 32];
        let block = [0xBBu8; 8];
        assert!(encrypt_ecb_block(AlgorithmId::Aes256, &key, &block).is_err());
    }
}
