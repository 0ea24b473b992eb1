//! PIN-verify-then-sign scenario (spec §8 scenario 2): verify PIN "123456",
//! sign the SHA-256 digest of "hello" in slot 9C, and check the returned DER
//! signature verifies under the slot's own public key.

use ecdsa::signature::Verifier;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use sha2::{Digest, Sha256};

use piv_toolkit::crypto::digest::HashAlg;
use piv_toolkit::piv::PinKind;
use piv_toolkit::slot::AlgorithmId;
use piv_toolkit::token::TokenDescriptor;
use piv_toolkit::transport::mock::MockCard;

#[test]
fn verify_pin_then_sign_produces_a_valid_signature() {
    let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
    let verifying_key = P256VerifyingKey::from(&signing_key);

    let mut card = MockCard::new_blank();
    card.program_ec_slot(0x9C, signing_key, None);

    let mut token = TokenDescriptor::probe(card).unwrap();
    token.slots.force_slot(0x9C, AlgorithmId::EccP256);

    let outcome = token.verify_pin(PinKind::Pin, b"123456", None, false).unwrap();
    assert!(outcome.retries_left.is_none());

    let digest = Sha256::digest(b"hello");
    let signature_der = token.sign_prehash(0x9C, HashAlg::Sha256, &digest).unwrap();

    let signature = P256Signature::from_der(&signature_der).unwrap();
    verifying_key.verify(&digest, &signature).unwrap();
}
