//! Box seal/open scenario (spec §8 scenario 4): P-384, chacha20-poly1305,
//! an 11-byte plaintext.

use piv_toolkit::box_::EcdhBox;
use piv_toolkit::crypto::aead::AeadAlg;

fn p384_ssh_key(signing_key: &p384::ecdsa::SigningKey) -> ssh_key::PublicKey {
    let point = p384::elliptic_curve::sec1::ToEncodedPoint::to_encoded_point(signing_key.verifying_key(), false);
    ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP384(point))
}

#[test]
fn seal_then_open_recovers_the_plaintext() {
    let recipient_secret = p384::SecretKey::random(&mut rand_core::OsRng);
    let signing_key = p384::ecdsa::SigningKey::from(recipient_secret.clone());
    let recipient_pubkey = p384_ssh_key(&signing_key);

    let plaintext = b"hello world";
    assert_eq!(plaintext.len(), 11);

    let sealed = EcdhBox::seal(&recipient_pubkey, plaintext, AeadAlg::ChaCha20Poly1305).unwrap();
    let bytes = sealed.to_bytes().unwrap();

    let parsed = EcdhBox::from_bytes(&bytes).unwrap();
    let opened = parsed.open(&recipient_secret.to_bytes()).unwrap();
    assert_eq!(opened, plaintext);
}
