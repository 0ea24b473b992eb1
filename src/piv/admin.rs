//! Device attestation, factory reset, and retry-counter administration
//! (spec §4.6: `ykpiv_attest`, `ykpiv_reset`, `ykpiv_set_pin_retries`,
//! `auth_key`), all YubicoPIV extensions beyond the base PIV standard.

use ecdsa::signature::hazmat::PrehashVerifier;
use rand::RngCore;
use tracing::{debug, warn};

use crate::crypto::digest::HashAlg;
use crate::error::{PivError, PivErrorKind, Result};
use crate::piv::auth::probe_verify;
use crate::piv::{PinKind, INS_YK_RESET, INS_YK_SET_PIN_RETRIES};
use crate::token::TokenDescriptor;
use crate::transport::CardTransport;

impl<T: CardTransport> TokenDescriptor<T> {
    /// Retrieve `slot_id`'s attestation certificate: an X.509 certificate,
    /// signed by the device's attestation key, binding the slot's public
    /// key to its generation policy. INS 0xF9, P1 = slot id.
    pub fn ykpiv_attest(&mut self, slot_id: u8) -> Result<Vec<u8>> {
        self.ensure_selected()?;
        let (reply, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, crate::piv::INS_YK_ATTEST, slot_id, 0x00, &[], Some(0), false)?;
        crate::apdu::classify_status(sw)?;
        debug!(slot = format!("{slot_id:#x}"), len = reply.len(), "attested slot");
        Ok(reply)
    }

    /// Factory-reset the PIV applet (INS 0xFB), wiping every key, slot, and
    /// the retry counters back to defaults. Refuses unless both the PIN
    /// and the PUK are already blocked, matching YubicoPIV's own
    /// precondition — this is a destructive operation that should not be
    /// reachable by accidentally calling it with a working PIN.
    pub fn ykpiv_reset(&mut self) -> Result<()> {
        self.ensure_selected()?;

        let pin_blocked = is_blocked(probe_verify(self.transport_mut(), PinKind::Pin));
        let puk_blocked = is_blocked(probe_verify(self.transport_mut(), PinKind::Puk));

        if !(pin_blocked && puk_blocked) {
            return Err(PivError::new(
                PivErrorKind::ResetConditions,
                "ykpiv_reset refused: both the PIN and the PUK must be blocked first",
            ));
        }

        let (_, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, INS_YK_RESET, 0x00, 0x00, &[], None, false)?;
        crate::apdu::classify_status(sw)?;
        warn!("applet reset to factory defaults");
        Ok(())
    }

    /// Set new PIN/PUK retry limits (INS 0xFA, P1 = pin tries, P2 = puk
    /// tries). The card requires a prior [`TokenDescriptor::auth_admin`]
    /// and [`TokenDescriptor::verify_pin`] in the same transaction; this
    /// call does not perform either itself.
    pub fn ykpiv_set_pin_retries(&mut self, pin_tries: u8, puk_tries: u8) -> Result<()> {
        if pin_tries == 0 || puk_tries == 0 {
            return Err(PivError::argument("retry counts must be at least 1"));
        }
        self.ensure_selected()?;
        let (_, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, INS_YK_SET_PIN_RETRIES, pin_tries, puk_tries, &[], None, false)?;
        crate::apdu::classify_status(sw)
    }

    /// Verify that `slot_id` holds the private counterpart of
    /// `candidate_pubkey`: first a structural comparison against the
    /// slot's known public key, then a live challenge signed in the slot
    /// and verified under `candidate_pubkey`. Returns [`PivErrorKind::KeyAuth`]
    /// on any mismatch.
    pub fn auth_key(&mut self, slot_id: u8, candidate_pubkey: &ssh_key::PublicKey) -> Result<()> {
        self.ensure_selected()?;

        let slot_pubkey = self
            .slots
            .get(slot_id)
            .and_then(|s| s.public_key.as_ref())
            .ok_or_else(|| PivError::not_found(format!("slot {slot_id:#x} has no known public key; call read_cert first")))?;

        if slot_pubkey.key_data() != candidate_pubkey.key_data() {
            return Err(PivError::new(PivErrorKind::KeyAuth, "supplied public key does not match the slot's certificate"));
        }

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let signature = self.sign(slot_id, &nonce, None)?;

        verify_signature(candidate_pubkey, &nonce, &signature)
    }
}

fn is_blocked(probe_result: Result<()>) -> bool {
    match probe_result {
        Ok(()) => false,
        Err(e) => e.retries() == Some(0),
    }
}

fn verify_signature(pubkey: &ssh_key::PublicKey, message: &[u8], signature_der: &[u8]) -> Result<()> {
    let failed = || PivError::new(PivErrorKind::KeyAuth, "challenge signature did not verify under the supplied key");

    match pubkey.key_data() {
        ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP256(point)) => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_encoded_point(point).map_err(|_| failed())?;
            let signature = p256::ecdsa::Signature::from_der(signature_der).map_err(|_| failed())?;
            let digest = HashAlg::Sha256.digest(message);
            verifying_key.verify_prehash(&digest, &signature).map_err(|_| failed())
        }
        ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP384(point)) => {
            let verifying_key = p384::ecdsa::VerifyingKey::from_encoded_point(point).map_err(|_| failed())?;
            let signature = p384::ecdsa::Signature::from_der(signature_der).map_err(|_| failed())?;
            let digest = HashAlg::Sha384.digest(message);
            verifying_key.verify_prehash(&digest, &signature).map_err(|_| failed())
        }
        ssh_key::public::KeyData::Rsa(rsa) => {
            let n = rsa::BigUint::from_bytes_be(rsa.n.as_bytes());
            let e = rsa::BigUint::from_bytes_be(rsa.e.as_bytes());
            let public_key = rsa::RsaPublicKey::new(n, e).map_err(|_| failed())?;

            use rsa::traits::PublicKeyParts;
            let hash_alg = HashAlg::default_for_rsa_key_size(public_key.size() * 8);
            let digest = hash_alg.digest(message);

            let verified = match hash_alg {
                HashAlg::Sha256 => public_key.verify(rsa::Pkcs1v15Sign::new::<sha2::Sha256>(), &digest, signature_der),
                HashAlg::Sha384 => public_key.verify(rsa::Pkcs1v15Sign::new::<sha2::Sha384>(), &digest, signature_der),
                _ => return Err(PivError::not_supported("unsupported RSA hash for auth_key")),
            };
            verified.map_err(|_| failed())
        }
        _ => Err(PivError::not_supported("unsupported key type for auth_key")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;

    #[test]
    fn ykpiv_reset_refuses_unless_pin_and_puk_blocked() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let err = token.ykpiv_reset().unwrap_err();
        assert_eq!(err.kind(), PivErrorKind::ResetConditions);
    }

    #[test]
    fn ykpiv_set_pin_retries_rejects_zero() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let err = token.ykpiv_set_pin_retries(0, 3).unwrap_err();
        assert_eq!(err.kind(), PivErrorKind::Argument);
    }
}
