//! ECDH sealed box (spec §4.7): a self-describing envelope that binds
//! ciphertext to an ephemeral key and (optionally) a specific card slot,
//! so the box can only be opened by the hardware it was sealed against —
//! or, for the online variant, by anyone holding the recipient's private
//! key.
//!
//! Wire format (SSH-style length-prefixed strings, per [`crate::bytes`]):
//!
//! ```text
//! magic(2) = B0 C5
//! version(1)
//! flags(1)              bit0: card-bound (GUID + slot follow)
//! [ guid(16) slot(1) ]   only if flags bit0 is set
//! recipient_key  : bytes32  SSH wire-format public key
//! ephemeral_key  : bytes32  SSH wire-format public key, same curve
//! cipher_name    : bytes32  ASCII, only if version >= 2
//! kdf_name       : bytes32  ASCII, only if version >= 2
//! nonce          : bytes32
//! ciphertext     : bytes32  AEAD ciphertext, tag included
//! ```

use rand::RngCore;
use tracing::debug;
use zeroize::Zeroize;

use crate::bytes::{Reader, Writer};
use crate::crypto::aead::{self, AeadAlg};
use crate::crypto::ecdh::{self, Curve};
use crate::crypto::kdf;
use crate::error::{PivError, Result};
use crate::slot::AlgorithmId;
use crate::token::TokenDescriptor;
use crate::transport::CardTransport;

const MAGIC: [u8; 2] = [0xB0, 0xC5];
const FLAG_CARD_BOUND: u8 = 0x01;
const KDF_NAME: &str = "sha512";
/// Block size the v>=3 random-padding scheme pads plaintext to.
const PAD_BLOCK: usize = 16;

/// Current box format version. Versions >= 2 carry explicit cipher/KDF
/// names; version 1 boxes always use chacha20-poly1305 + the fixed KDF and
/// omit both name fields. Versions >= 3 additionally prefix the plaintext
/// with random padding up to [`PAD_BLOCK`] before encryption, so ciphertext
/// length does not directly reveal the plaintext length modulo the block
/// size.
pub const CURRENT_VERSION: u8 = 3;

/// A sealed ECDH box.
#[derive(Debug, Clone)]
pub struct EcdhBox {
    pub version: u8,
    /// Card GUID and slot id, present only for boxes sealed against a
    /// specific token's slot (rather than an offline recipient key).
    pub card_binding: Option<([u8; 16], u8)>,
    pub recipient_key_wire: Vec<u8>,
    pub ephemeral_key_wire: Vec<u8>,
    pub cipher: AeadAlg,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EcdhBox {
    /// Seal `plaintext` for `recipient`'s public key (P-256 or P-384),
    /// generating a fresh ephemeral keypair and deriving the AEAD key via
    /// ECDH + the box KDF. Not bound to any card; `open` needs only the
    /// recipient's private scalar.
    pub fn seal(recipient: &ssh_key::PublicKey, plaintext: &[u8], cipher: AeadAlg) -> Result<Self> {
        let (curve, recipient_point) = recipient_curve_and_point(recipient)?;
        let ephemeral = ecdh::generate_ephemeral(curve);
        let mut shared_secret = ephemeral.agree(&recipient_point)?;

        let ephemeral_pubkey = ephemeral_as_ssh_key(curve, &ephemeral.public_point())?;

        let result = Self::finish_seal(None, recipient, &ephemeral_pubkey, &shared_secret, plaintext, cipher);
        shared_secret.zeroize();
        result
    }

    /// Seal `plaintext` so it can only be opened via `slot_id` on the token
    /// identified by `card_guid` — `open_with_card` drives the actual ECDH
    /// through the hardware, so the card's private key never leaves it even
    /// to verify the binding.
    pub fn seal_for_card<T: CardTransport>(
        token: &mut TokenDescriptor<T>,
        slot_id: u8,
        plaintext: &[u8],
        cipher: AeadAlg,
    ) -> Result<Self> {
        let slot = token
            .slots
            .get(slot_id)
            .ok_or_else(|| PivError::not_found(format!("slot {slot_id:#x} has no known public key; call read_cert first")))?;
        let recipient = slot
            .public_key
            .as_ref()
            .ok_or_else(|| PivError::not_found(format!("slot {slot_id:#x} has no public key")))?
            .clone();

        let (curve, _) = recipient_curve_and_point(&recipient)?;
        let ephemeral = ecdh::generate_ephemeral(curve);
        let ephemeral_point = ephemeral.public_point();
        // The card holds the private key; it computes the shared secret
        // from its own scalar and the ephemeral public point we send it.
        let mut shared_secret = token.ecdh(slot_id, &ephemeral_point)?;
        let ephemeral_pubkey = ephemeral_as_ssh_key(curve, &ephemeral_point)?;

        let result = Self::finish_seal(Some((token.guid, slot_id)), &recipient, &ephemeral_pubkey, &shared_secret, plaintext, cipher);
        shared_secret.zeroize();
        let mut sealed = result?;
        sealed.card_binding = Some((token.guid, slot_id));
        Ok(sealed)
    }

    fn finish_seal(
        card_binding: Option<([u8; 16], u8)>,
        recipient: &ssh_key::PublicKey,
        ephemeral_pubkey: &ssh_key::PublicKey,
        shared_secret: &[u8],
        plaintext: &[u8],
        cipher: AeadAlg,
    ) -> Result<Self> {
        let (mut key, nonce) = kdf::derive(cipher, shared_secret)?;
        let recipient_key_wire = crate::ssh_wire::encode(recipient)?;
        let ephemeral_key_wire = crate::ssh_wire::encode(ephemeral_pubkey)?;

        let aad = build_aad(CURRENT_VERSION, card_binding, &recipient_key_wire, &ephemeral_key_wire, cipher);
        let mut padded_plaintext = pad_plaintext(plaintext);
        let ciphertext = aead::seal(cipher, &key, &nonce, &aad, &padded_plaintext);
        key.zeroize();
        padded_plaintext.zeroize();
        let ciphertext = ciphertext?;

        debug!(cipher = cipher.wire_name(), card_bound = card_binding.is_some(), "sealed box");
        Ok(Self {
            version: CURRENT_VERSION,
            card_binding,
            recipient_key_wire,
            ephemeral_key_wire,
            cipher,
            nonce,
            ciphertext,
        })
    }

    /// Open an offline (non-card-bound) box using the recipient's raw
    /// private scalar.
    pub fn open(&self, recipient_private_scalar: &[u8]) -> Result<Vec<u8>> {
        if self.card_binding.is_some() {
            return Err(PivError::argument("box is card-bound; use open_with_card"));
        }
        let recipient = crate::ssh_wire::decode(&self.recipient_key_wire)?;
        let (curve, _) = recipient_curve_and_point(&recipient)?;
        let ephemeral_point = ephemeral_point_bytes(self)?;

        let mut shared_secret = ecdh::static_agree(curve, recipient_private_scalar, &ephemeral_point)?;
        let result = self.open_with_shared_secret(&shared_secret);
        shared_secret.zeroize();
        result
    }

    /// Open a card-bound box by performing the ECDH through `token`'s
    /// `slot_id` (which must match the GUID/slot this box was sealed for).
    pub fn open_with_card<T: CardTransport>(&self, token: &mut TokenDescriptor<T>) -> Result<Vec<u8>> {
        let (guid, slot_id) = self
            .card_binding
            .ok_or_else(|| PivError::argument("box is not card-bound; use open"))?;
        if token.guid != guid {
            return Err(PivError::argument("box is bound to a different card GUID"));
        }
        let ephemeral_point = ephemeral_point_bytes(self)?;
        let mut shared_secret = token.ecdh(slot_id, &ephemeral_point)?;
        let result = self.open_with_shared_secret(&shared_secret);
        shared_secret.zeroize();
        result
    }

    fn open_with_shared_secret(&self, shared_secret: &[u8]) -> Result<Vec<u8>> {
        let (mut key, _) = kdf::derive(self.cipher, shared_secret)?;
        let aad = build_aad(self.version, self.card_binding, &self.recipient_key_wire, &self.ephemeral_key_wire, self.cipher);
        let padded = aead::open(self.cipher, &key, &self.nonce, &aad, &self.ciphertext);
        key.zeroize();
        let mut padded = padded?;
        let plaintext = if self.version >= 3 { unpad_plaintext(&padded) } else { Ok(padded.clone()) };
        padded.zeroize();
        plaintext
    }

    /// Serialize to the wire format described in this module's header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.version == 0 {
            return Err(PivError::invalid_data("box version must be >= 1"));
        }
        let mut w = Writer::new();
        w.put(&MAGIC);
        w.u8(self.version);

        let flags = if self.card_binding.is_some() { FLAG_CARD_BOUND } else { 0 };
        w.u8(flags);
        if let Some((guid, slot_id)) = self.card_binding {
            w.put(&guid);
            w.u8(slot_id);
        }

        w.bytes32(&self.recipient_key_wire);
        w.bytes32(&self.ephemeral_key_wire);
        if self.version >= 2 {
            w.bytes32(self.cipher.wire_name().as_bytes());
            w.bytes32(KDF_NAME.as_bytes());
        }
        w.bytes32(&self.nonce);
        w.bytes32(&self.ciphertext);

        Ok(w.into_bytes())
    }

    /// Parse the wire format produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let magic = r.take(2)?;
        if magic != MAGIC {
            return Err(PivError::invalid_data("not an ECDH box: bad magic"));
        }
        let version = r.u8()?;
        if version == 0 {
            return Err(PivError::invalid_data("box version must be >= 1"));
        }
        let flags = r.u8()?;

        let card_binding = if flags & FLAG_CARD_BOUND != 0 {
            let guid_bytes = r.take(16)?;
            let mut guid = [0u8; 16];
            guid.copy_from_slice(guid_bytes);
            let slot_id = r.u8()?;
            Some((guid, slot_id))
        } else {
            None
        };

        let recipient_key_wire = r.bytes32()?.to_vec();
        let ephemeral_key_wire = r.bytes32()?.to_vec();

        let cipher = if version >= 2 {
            let cipher_name = std::str::from_utf8(r.bytes32()?).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let cipher = AeadAlg::from_wire_name(cipher_name)?;
            let kdf_name = std::str::from_utf8(r.bytes32()?).map_err(|e| PivError::invalid_data(e.to_string()))?;
            if kdf_name != KDF_NAME {
                return Err(PivError::invalid_data(format!("unsupported box KDF {kdf_name:?}")));
            }
            cipher
        } else {
            AeadAlg::ChaCha20Poly1305
        };

        let nonce = r.bytes32()?.to_vec();
        if nonce.len() != cipher.nonce_len() {
            return Err(PivError::invalid_data("nonce length does not match cipher"));
        }
        let ciphertext = r.bytes32()?.to_vec();

        validate_ephemeral_matches_recipient(&recipient_key_wire, &ephemeral_key_wire)?;

        Ok(Self {
            version,
            card_binding,
            recipient_key_wire,
            ephemeral_key_wire,
            cipher,
            nonce,
            ciphertext,
        })
    }
}

/// Prefix `plaintext` with a one-byte padding length and that many random
/// bytes, so the padded length is always a multiple of [`PAD_BLOCK`].
fn pad_plaintext(plaintext: &[u8]) -> Vec<u8> {
    let header_len = 1 + plaintext.len();
    let pad_len = (PAD_BLOCK - (header_len % PAD_BLOCK)) % PAD_BLOCK;
    let mut padding = vec![0u8; pad_len];
    rand::thread_rng().fill_bytes(&mut padding);

    let mut out = Vec::with_capacity(1 + pad_len + plaintext.len());
    out.push(pad_len as u8);
    out.extend_from_slice(&padding);
    out.extend_from_slice(plaintext);
    out
}

/// Strip the padding [`pad_plaintext`] added.
fn unpad_plaintext(padded: &[u8]) -> Result<Vec<u8>> {
    let pad_len = *padded.first().ok_or_else(|| PivError::invalid_data("empty padded plaintext"))? as usize;
    let start = 1 + pad_len;
    if start > padded.len() {
        return Err(PivError::invalid_data("box padding length exceeds plaintext"));
    }
    Ok(padded[start..].to_vec())
}

fn build_aad(version: u8, card_binding: Option<([u8; 16], u8)>, recipient_wire: &[u8], ephemeral_wire: &[u8], cipher: AeadAlg) -> Vec<u8> {
    let mut w = Writer::new();
    w.put(&MAGIC);
    w.u8(version);
    w.u8(if card_binding.is_some() { FLAG_CARD_BOUND } else { 0 });
    if let Some((guid, slot_id)) = card_binding {
        w.put(&guid);
        w.u8(slot_id);
    }
    w.bytes32(recipient_wire);
    w.bytes32(ephemeral_wire);
    w.bytes32(cipher.wire_name().as_bytes());
    w.into_bytes()
}

fn ephemeral_point_bytes(b: &EcdhBox) -> Result<Vec<u8>> {
    let ephemeral = crate::ssh_wire::decode(&b.ephemeral_key_wire)?;
    let (_, point) = recipient_curve_and_point(&ephemeral)?;
    Ok(point)
}

fn recipient_curve_and_point(key: &ssh_key::PublicKey) -> Result<(Curve, Vec<u8>)> {
    match key.key_data() {
        ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP256(point)) => Ok((Curve::P256, point.as_bytes().to_vec())),
        ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP384(point)) => Ok((Curve::P384, point.as_bytes().to_vec())),
        _ => Err(PivError::not_supported("ECDH box supports only P-256/P-384 EC keys")),
    }
}

fn ephemeral_as_ssh_key(curve: Curve, point: &[u8]) -> Result<ssh_key::PublicKey> {
    match curve {
        Curve::P256 => {
            let encoded = p256::EncodedPoint::from_bytes(point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            Ok(ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP256(encoded)))
        }
        Curve::P384 => {
            let encoded = p384::EncodedPoint::from_bytes(point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            Ok(ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP384(encoded)))
        }
    }
}

fn validate_ephemeral_matches_recipient(recipient_wire: &[u8], ephemeral_wire: &[u8]) -> Result<()> {
    let recipient = crate::ssh_wire::decode(recipient_wire)?;
    let ephemeral = crate::ssh_wire::decode(ephemeral_wire)?;
    let same_curve = matches!(
        (recipient.key_data(), ephemeral.key_data()),
        (
            ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP256(_)),
            ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP256(_))
        ) | (
            ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP384(_)),
            ssh_key::public::KeyData::Ecdsa(ssh_key::public::EcdsaPublicKey::NistP384(_))
        )
    );
    if !same_curve {
        return Err(PivError::invalid_data("ephemeral key curve does not match recipient key curve"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;

    fn p256_ssh_key(signing_key: &p256::ecdsa::SigningKey) -> ssh_key::PublicKey {
        let point = p256::elliptic_curve::sec1::ToEncodedPoint::to_encoded_point(signing_key.verifying_key(), false);
        ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP256(point))
    }

    #[test]
    fn offline_round_trip() {
        let recipient_secret = p256::SecretKey::random(&mut rand_core::OsRng);
        let signing_key = p256::ecdsa::SigningKey::from(recipient_secret.clone());
        let recipient_pubkey = p256_ssh_key(&signing_key);

        let sealed = EcdhBox::seal(&recipient_pubkey, b"hello box", AeadAlg::ChaCha20Poly1305).unwrap();
        let bytes = sealed.to_bytes().unwrap();
        let parsed = EcdhBox::from_bytes(&bytes).unwrap();

        let opened = parsed.open(&recipient_secret.to_bytes()).unwrap();
        assert_eq!(opened, b"hello box");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let recipient_secret = p256::SecretKey::random(&mut rand_core::OsRng);
        let signing_key = p256::ecdsa::SigningKey::from(recipient_secret.clone());
        let recipient_pubkey = p256_ssh_key(&signing_key);

        let mut sealed = EcdhBox::seal(&recipient_pubkey, b"hello box", AeadAlg::Aes256Gcm).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;

        assert!(sealed.open(&recipient_secret.to_bytes()).is_err());
    }

    #[test]
    fn wrong_recipient_key_fails_to_open() {
        let recipient_secret = p256::SecretKey::random(&mut rand_core::OsRng);
        let signing_key = p256::ecdsa::SigningKey::from(recipient_secret);
        let recipient_pubkey = p256_ssh_key(&signing_key);

        let sealed = EcdhBox::seal(&recipient_pubkey, b"hello box", AeadAlg::ChaCha20Poly1305).unwrap();

        let other_secret = p256::SecretKey::random(&mut rand_core::OsRng);
        assert!(sealed.open(&other_secret.to_bytes()).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let err = EcdhBox::from_bytes(&[0x00, 0x00, 0x01, 0x00]).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::InvalidData);
    }

    #[test]
    fn card_bound_round_trip_through_mock() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
        let mut card = MockCard::new_blank();
        card.program_ec_slot(0x9A, signing_key, None);
        let mut token = TokenDescriptor::probe(card).unwrap();
        token.slots.force_slot(0x9A, AlgorithmId::EccP256);

        // A forced slot has no real public key recorded (only the
        // algorithm id), so seal_for_card needs one read from a
        // certificate in normal use; exercise the error path here.
        let err = EcdhBox::seal_for_card(&mut token, 0x9A, b"secret", AeadAlg::ChaCha20Poly1305).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::NotFound);
    }
}
