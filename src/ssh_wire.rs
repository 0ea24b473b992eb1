//! SSH wire-format encode/decode for public keys, used by the sealed box's
//! recipient/ephemeral key fields (spec §4.7). This is the same blob format
//! carried in an OpenSSH `authorized_keys` base64 field or an SSH
//! certificate's public-key section.

use crate::error::Result;

/// Encode `key` into its SSH wire-format blob.
pub fn encode(key: &ssh_key::PublicKey) -> Result<Vec<u8>> {
    Ok(key.to_bytes()?)
}

/// Decode an SSH wire-format public key blob.
pub fn decode(bytes: &[u8]) -> Result<ssh_key::PublicKey> {
    Ok(ssh_key::PublicKey::from_bytes(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdsa_p256_key_round_trips_through_wire_form() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
        let point = p256::elliptic_curve::sec1::ToEncodedPoint::to_encoded_point(signing_key.verifying_key(), false);
        let ssh_key = ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP256(point));

        let wire = encode(&ssh_key).unwrap();
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.key_data(), ssh_key.key_data());
    }
}
