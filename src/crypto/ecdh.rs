//! Offline ECDH for the sealed box (spec §4.7): ephemeral-static agreement
//! producing the X coordinate as the shared secret, matching what the
//! card's GENERAL AUTHENTICATE ECDH reply carries (spec §4.6 `ecdh`).

use p256::ecdh::diffie_hellman as p256_dh;
use p384::ecdh::diffie_hellman as p384_dh;

use crate::error::{PivError, Result};

/// The curve an ECDH box or slot key is defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// NIST P-256.
    P256,
    /// NIST P-384.
    P384,
}

/// An ephemeral keypair generated for one `seal` call.
pub enum EphemeralKeypair {
    /// P-256 ephemeral keypair.
    P256(p256::ecdh::EphemeralSecret, p256::PublicKey),
    /// P-384 ephemeral keypair.
    P384(p384::ecdh::EphemeralSecret, p384::PublicKey),
}

/// Generate a fresh ephemeral keypair on `curve`.
pub fn generate_ephemeral(curve: Curve) -> EphemeralKeypair {
    match curve {
        Curve::P256 => {
            let secret = p256::ecdh::EphemeralSecret::random(&mut rand_core::OsRng);
            let public = secret.public_key();
            EphemeralKeypair::P256(secret, public)
        }
        Curve::P384 => {
            let secret = p384::ecdh::EphemeralSecret::random(&mut rand_core::OsRng);
            let public = secret.public_key();
            EphemeralKeypair::P384(secret, public)
        }
    }
}

impl EphemeralKeypair {
    /// This keypair's public key in uncompressed SEC1 form.
    pub fn public_point(&self) -> Vec<u8> {
        match self {
            EphemeralKeypair::P256(_, pk) => pk.to_encoded_point(false).as_bytes().to_vec(),
            EphemeralKeypair::P384(_, pk) => pk.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Compute the shared secret's X coordinate against `recipient_point`
    /// (the recipient's uncompressed SEC1 public point).
    pub fn agree(&self, recipient_point: &[u8]) -> Result<Vec<u8>> {
        match self {
            EphemeralKeypair::P256(secret, _) => {
                let point = p256::EncodedPoint::from_bytes(recipient_point).map_err(|e| PivError::invalid_data(e.to_string()))?;
                let their_public = p256::PublicKey::from_sec1_bytes(point.as_bytes()).map_err(|e| PivError::invalid_data(e.to_string()))?;
                let shared = p256_dh(secret.as_ref(), their_public.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            EphemeralKeypair::P384(secret, _) => {
                let point = p384::EncodedPoint::from_bytes(recipient_point).map_err(|e| PivError::invalid_data(e.to_string()))?;
                let their_public = p384::PublicKey::from_sec1_bytes(point.as_bytes()).map_err(|e| PivError::invalid_data(e.to_string()))?;
                let shared = p384_dh(secret.as_ref(), their_public.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }
}

/// Compute the X coordinate shared secret between a static private scalar
/// and a peer's uncompressed SEC1 point, used when `open`ing a box offline
/// against the recipient's long-term private key.
pub fn static_agree(curve: Curve, private_scalar: &[u8], peer_point: &[u8]) -> Result<Vec<u8>> {
    match curve {
        Curve::P256 => {
            let secret = p256::SecretKey::from_bytes(private_scalar.into()).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let point = p256::EncodedPoint::from_bytes(peer_point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let their_public = p256::PublicKey::from_sec1_bytes(point.as_bytes()).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let shared = p256_dh(secret.to_nonzero_scalar(), their_public.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        Curve::P384 => {
            let secret = p384::SecretKey::from_bytes(private_scalar.into()).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let point = p384::EncodedPoint::from_bytes(peer_point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let their_public = p384::PublicKey::from_sec1_bytes(point.as_bytes()).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let shared = p384_dh(secret.to_nonzero_scalar(), their_public.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    #[test]
    fn ephemeral_p256_agrees_with_static_recipient() {
        let recipient_secret = p256::SecretKey::random(&mut rand_core::OsRng);
        let recipient_point = recipient_secret.public_key().to_encoded_point(false).as_bytes().to_vec();

        let ephemeral = generate_ephemeral(Curve::P256);
        let shared_a = ephemeral.agree(&recipient_point).unwrap();

        let shared_b = static_agree(Curve::P256, &recipient_secret.to_bytes(), &ephemeral.public_point()).unwrap();
        assert_eq!(shared_a, shared_b);
    }
}
