//! Signing and ECDH key agreement (spec §4.6: `sign`, `sign_prehash`, `ecdh`).

use tracing::debug;

use crate::crypto::digest::HashAlg;
use crate::crypto::padding::pkcs1_v15_pad;
use crate::error::{PivError, Result};
use crate::piv::{gen_auth, unwrap_dyn_auth, wrap_dyn_auth, TAG_CHALLENGE, TAG_EXPONENTIATION, TAG_RESPONSE};
use crate::slot::AlgorithmId;
use crate::token::TokenDescriptor;
use crate::transport::CardTransport;

impl<T: CardTransport> TokenDescriptor<T> {
    /// Hash `data` and sign it in `slot_id`. `hash_alg` overrides the
    /// default hash choice; `None` picks a default from the slot's key
    /// size/curve.
    pub fn sign(&mut self, slot_id: u8, data: &[u8], hash_alg: Option<HashAlg>) -> Result<Vec<u8>> {
        let algorithm_id = self.slot_algorithm(slot_id)?;
        let hash_alg = match hash_alg {
            Some(h) => h,
            None => default_hash_for(algorithm_id)?,
        };
        let digest = hash_alg.digest(data);
        self.sign_prehash(slot_id, hash_alg, &digest)
    }

    /// Sign an already-computed digest directly, for callers that hash
    /// incrementally or supply an externally-produced digest.
    pub fn sign_prehash(&mut self, slot_id: u8, hash_alg: HashAlg, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.len() != hash_alg.output_len() {
            return Err(PivError::argument("digest length does not match hash_alg"));
        }
        let algorithm_id = self.slot_algorithm(slot_id)?;
        self.ensure_selected()?;

        let to_sign = match algorithm_id {
            AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
                let modulus_len = rsa_modulus_len(algorithm_id);
                pkcs1_v15_pad(hash_alg, digest, modulus_len)?
            }
            AlgorithmId::EccP256 | AlgorithmId::EccP384 => {
                let field_len = ec_field_len(algorithm_id);
                fit_to_field(digest, field_len)
            }
            other => return Err(PivError::not_supported(format!("{other:?} cannot sign"))),
        };

        let request = wrap_dyn_auth(|w| {
            crate::tlv::write_primitive(w, TAG_RESPONSE, &[])?;
            crate::tlv::write_primitive(w, TAG_CHALLENGE, &to_sign)?;
            Ok(())
        })?;
        let reply = gen_auth(self.transport_mut(), algorithm_id.wire_value(), slot_id, &request)?;
        let children = unwrap_dyn_auth(&reply)?;
        let signature = children
            .iter()
            .find(|t| t.tag == TAG_RESPONSE)
            .map(|t| t.value.to_vec())
            .ok_or_else(|| PivError::invalid_data("sign reply missing response tag"))?;

        // EC cards may reply with the raw fixed-width r||s block rather
        // than a pre-wrapped DER signature; detect that by length (a DER
        // SEQUENCE always carries at least a few bytes of overhead) and
        // wrap it ourselves, per spec §4.6.
        let signature = match algorithm_id {
            AlgorithmId::EccP256 | AlgorithmId::EccP384 if signature.len() == 2 * ec_field_len(algorithm_id) => {
                ec_signature_to_der(algorithm_id, &signature)?
            }
            _ => signature,
        };

        debug!(slot = format!("{slot_id:#x}"), algorithm = ?algorithm_id, len = signature.len(), "signed");
        Ok(signature)
    }

    /// ECDH key agreement in `slot_id`: send the peer's uncompressed SEC1
    /// point, receive the X-coordinate shared secret.
    pub fn ecdh(&mut self, slot_id: u8, peer_point: &[u8]) -> Result<Vec<u8>> {
        let algorithm_id = self.slot_algorithm(slot_id)?;
        let expected_len = match algorithm_id {
            AlgorithmId::EccP256 => 65,
            AlgorithmId::EccP384 => 97,
            other => return Err(PivError::not_supported(format!("{other:?} does not support ECDH"))),
        };
        if peer_point.len() != expected_len || peer_point[0] != 0x04 {
            return Err(PivError::argument("peer point must be an uncompressed SEC1 point matching the slot's curve"));
        }
        self.ensure_selected()?;

        let request = wrap_dyn_auth(|w| {
            crate::tlv::write_primitive(w, TAG_RESPONSE, &[])?;
            crate::tlv::write_primitive(w, TAG_EXPONENTIATION, peer_point)?;
            Ok(())
        })?;
        let reply = gen_auth(self.transport_mut(), algorithm_id.wire_value(), slot_id, &request)?;
        let children = unwrap_dyn_auth(&reply)?;
        let shared_secret = children
            .iter()
            .find(|t| t.tag == TAG_RESPONSE)
            .map(|t| t.value.to_vec())
            .ok_or_else(|| PivError::invalid_data("ecdh reply missing response tag"))?;

        debug!(slot = format!("{slot_id:#x}"), len = shared_secret.len(), "ecdh agreed");
        Ok(shared_secret)
    }

    fn slot_algorithm(&self, slot_id: u8) -> Result<AlgorithmId> {
        self.slots
            .get(slot_id)
            .and_then(|s| s.algorithm_id)
            .ok_or_else(|| PivError::not_found(format!("slot {slot_id:#x} has no known algorithm; call read_cert or force_slot first")))
    }
}

fn default_hash_for(algorithm_id: AlgorithmId) -> Result<HashAlg> {
    match algorithm_id {
        AlgorithmId::Rsa1024 => Ok(HashAlg::default_for_rsa_key_size(1024)),
        AlgorithmId::Rsa2048 => Ok(HashAlg::default_for_rsa_key_size(2048)),
        AlgorithmId::EccP256 => HashAlg::default_for_ec_field_bits(256),
        AlgorithmId::EccP384 => HashAlg::default_for_ec_field_bits(384),
        other => Err(PivError::not_supported(format!("no default hash for {other:?}"))),
    }
}

fn rsa_modulus_len(algorithm_id: AlgorithmId) -> usize {
    match algorithm_id {
        AlgorithmId::Rsa1024 => 128,
        AlgorithmId::Rsa2048 => 256,
        _ => unreachable!("caller already matched RSA algorithms"),
    }
}

fn ec_field_len(algorithm_id: AlgorithmId) -> usize {
    match algorithm_id {
        AlgorithmId::EccP256 => 32,
        AlgorithmId::EccP384 => 48,
        _ => unreachable!("caller already matched EC algorithms"),
    }
}

/// DER-wrap a raw fixed-width `r||s` EC signature block into
/// `SEQUENCE(INTEGER r, INTEGER s)`.
fn ec_signature_to_der(algorithm_id: AlgorithmId, raw_rs: &[u8]) -> Result<Vec<u8>> {
    match algorithm_id {
        AlgorithmId::EccP256 => {
            let sig = p256::ecdsa::Signature::from_slice(raw_rs).map_err(|e| PivError::invalid_data(e.to_string()))?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
        AlgorithmId::EccP384 => {
            let sig = p384::ecdsa::Signature::from_slice(raw_rs).map_err(|e| PivError::invalid_data(e.to_string()))?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
        _ => unreachable!("caller already matched EC algorithms"),
    }
}

/// Truncate or left-pad `digest` to exactly `field_len` bytes, per FIPS
/// 186-4's leftmost-bits rule for ECDSA message digests.
fn fit_to_field(digest: &[u8], field_len: usize) -> Vec<u8> {
    match digest.len().cmp(&field_len) {
        std::cmp::Ordering::Equal => digest.to_vec(),
        std::cmp::Ordering::Greater => digest[..field_len].to_vec(),
        std::cmp::Ordering::Less => {
            let mut out = vec![0u8; field_len - digest.len()];
            out.extend_from_slice(digest);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;
    use ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};

    #[test]
    fn sign_produces_a_signature_verifiable_under_the_slot_public_key() {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let verifying_key = P256VerifyingKey::from(&signing_key);

        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        let signature_der = token.sign(0x9A, b"message to sign", None).unwrap();
        let signature = P256Signature::from_der(&signature_der).unwrap();
        verifying_key.verify(b"message to sign", &signature).unwrap();
    }

    #[test]
    fn sign_prehash_rejects_wrong_digest_length() {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        let err = token.sign_prehash(0x9A, HashAlg::Sha256, &[0u8; 10]).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::Argument);
    }

    #[test]
    fn sign_without_a_known_slot_algorithm_is_not_found() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let err = token.sign(0x9A, b"data", None).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::NotFound);
    }

    #[test]
    fn ecdh_rejects_malformed_peer_point() {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        let err = token.ecdh(0x9A, &[0x04; 10]).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::Argument);
    }

    #[test]
    fn sign_der_wraps_a_raw_rs_card_reply() {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let verifying_key = P256VerifyingKey::from(&signing_key);

        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        card.set_raw_ec_signatures(true);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        let signature_der = token.sign(0x9A, b"message to sign", None).unwrap();
        let signature = P256Signature::from_der(&signature_der).unwrap();
        verifying_key.verify(b"message to sign", &signature).unwrap();
    }

    #[test]
    fn ecdh_round_trips_the_peer_point_through_the_mock() {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        let peer_point = [0x04u8; 65];
        let shared = token.ecdh(0x9A, &peer_point).unwrap();
        assert_eq!(shared, peer_point.to_vec());
    }
}
