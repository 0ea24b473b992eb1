//! Key generation, private-key import, and certificate/key-history
//! provisioning (spec §4.6: `generate`, `ykpiv_import`, `write_cert`,
//! `write_keyhistory`).

use tracing::debug;

use crate::bytes::Writer;
use crate::error::{PivError, Result};
use crate::piv::{INS_GENERATE, INS_PUT_DATA, INS_YK_IMPORT};
use crate::slot::{cert_object_id, AlgorithmId};
use crate::tlv::{self, Scope, Tag};
use crate::token::TokenDescriptor;
use crate::transport::CardTransport;

const TAG_GEN_TEMPLATE: Tag = Tag::new(0xAC);
const TAG_ALGORITHM: Tag = Tag::new(0x80);
const TAG_PIN_POLICY: Tag = Tag::new(0xAA);
const TAG_TOUCH_POLICY: Tag = Tag::new(0xAB);
const TAG_PUBLIC_KEY: Tag = Tag::new(0x7F49);
const TAG_RSA_MODULUS: Tag = Tag::new(0x81);
const TAG_RSA_EXPONENT: Tag = Tag::new(0x82);
const TAG_EC_POINT: Tag = Tag::new(0x86);

const TAG_IMPORT_P: Tag = Tag::new(0x01);
const TAG_IMPORT_Q: Tag = Tag::new(0x02);
const TAG_IMPORT_DP: Tag = Tag::new(0x03);
const TAG_IMPORT_DQ: Tag = Tag::new(0x04);
const TAG_IMPORT_QINV: Tag = Tag::new(0x05);
const TAG_IMPORT_EC_PRIVATE: Tag = Tag::new(0x06);

const TAG_GET_DATA_OBJECT: Tag = Tag::new(0x5C);
const TAG_DATA_CONTAINER: Tag = Tag::new(0x53);
const TAG_CERT: Tag = Tag::new(0x70);
const TAG_CERT_COMPRESS: Tag = Tag::new(0x71);
const TAG_CERT_LRC: Tag = Tag::new(0xFE);

const OBJ_KEYHIST: [u8; 3] = [0x5F, 0xC1, 0x0C];

/// On-card key-pair/touch policies (YubicoPIV extension tags 0xAA/0xAB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPolicy {
    /// Card default.
    Default,
    /// PIN never required to use the key.
    Never,
    /// PIN required once per transaction.
    Once,
    /// PIN required for every use.
    Always,
}

impl PinPolicy {
    fn wire_value(self) -> u8 {
        match self {
            PinPolicy::Default => 0x00,
            PinPolicy::Never => 0x01,
            PinPolicy::Once => 0x02,
            PinPolicy::Always => 0x03,
        }
    }
}

/// On-card touch policy (YubicoPIV extension tag 0xAB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPolicy {
    /// Card default.
    Default,
    /// Touch never required.
    Never,
    /// Touch required for every use.
    Always,
    /// Touch required, cached for 15 seconds.
    Cached,
}

impl TouchPolicy {
    fn wire_value(self) -> u8 {
        match self {
            TouchPolicy::Default => 0x00,
            TouchPolicy::Never => 0x01,
            TouchPolicy::Always => 0x02,
            TouchPolicy::Cached => 0x03,
        }
    }
}

/// RSA private-key components for [`TokenDescriptor::ykpiv_import`], in CRT
/// form (the only form YubicoPIV's import instruction accepts).
pub struct RsaCrtComponents<'a> {
    pub p: &'a [u8],
    pub q: &'a [u8],
    pub dp: &'a [u8],
    pub dq: &'a [u8],
    pub qinv: &'a [u8],
}

/// A private key to import via [`TokenDescriptor::ykpiv_import`].
pub enum ImportKey<'a> {
    /// RSA, as CRT components.
    Rsa(RsaCrtComponents<'a>),
    /// EC, as a raw private scalar.
    Ec(&'a [u8]),
}

impl<T: CardTransport> TokenDescriptor<T> {
    /// Generate a fresh key pair on-card in `slot_id`, returning its public
    /// key in SSH wire form. The card never discloses the private key.
    pub fn generate(
        &mut self,
        slot_id: u8,
        algorithm: AlgorithmId,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<ssh_key::PublicKey> {
        self.ensure_selected()?;

        let mut w = Writer::new();
        let scope = Scope::open(&mut w, TAG_GEN_TEMPLATE);
        tlv::write_primitive(&mut w, TAG_ALGORITHM, &[algorithm.wire_value()])?;
        if pin_policy != PinPolicy::Default {
            tlv::write_primitive(&mut w, TAG_PIN_POLICY, &[pin_policy.wire_value()])?;
        }
        if touch_policy != TouchPolicy::Default {
            tlv::write_primitive(&mut w, TAG_TOUCH_POLICY, &[touch_policy.wire_value()])?;
        }
        scope.close(&mut w)?;
        let command_data = w.into_bytes();

        let (reply, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, INS_GENERATE, 0x00, slot_id, &command_data, Some(0), false)?;
        crate::apdu::classify_status(sw)?;

        let body = tlv::Tlv::expect(&mut crate::bytes::Reader::new(&reply), TAG_PUBLIC_KEY)?;
        let children = tlv::parse_all(body)?;

        let public_key = match algorithm {
            AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
                let modulus = children
                    .iter()
                    .find(|t| t.tag == TAG_RSA_MODULUS)
                    .map(|t| t.value)
                    .ok_or_else(|| PivError::invalid_data("GENERATE reply missing RSA modulus"))?;
                let exponent = children
                    .iter()
                    .find(|t| t.tag == TAG_RSA_EXPONENT)
                    .map(|t| t.value)
                    .ok_or_else(|| PivError::invalid_data("GENERATE reply missing RSA exponent"))?;
                let ssh_rsa = ssh_key::public::RsaPublicKey {
                    e: ssh_key::Mpint::from_bytes(exponent)?,
                    n: ssh_key::Mpint::from_bytes(modulus)?,
                };
                ssh_key::PublicKey::from(ssh_rsa)
            }
            AlgorithmId::EccP256 | AlgorithmId::EccP384 => {
                let point = children
                    .iter()
                    .find(|t| t.tag == TAG_EC_POINT)
                    .map(|t| t.value)
                    .ok_or_else(|| PivError::invalid_data("GENERATE reply missing EC point"))?;
                parse_and_validate_ec_point(algorithm, point)?
            }
            other => return Err(PivError::not_supported(format!("cannot generate a {other:?} key pair"))),
        };

        self.slots.force_slot(slot_id, algorithm);
        debug!(slot = format!("{slot_id:#x}"), algorithm = ?algorithm, "generated key pair");
        Ok(public_key)
    }

    /// Import a private key into `slot_id` (YubicoPIV extension; not part
    /// of the base PIV standard). The card accepts but never discloses it
    /// again.
    pub fn ykpiv_import(
        &mut self,
        slot_id: u8,
        algorithm: AlgorithmId,
        key: ImportKey<'_>,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<()> {
        self.ensure_selected()?;

        let mut w = Writer::new();
        match (&algorithm, &key) {
            (AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048, ImportKey::Rsa(crt)) => {
                tlv::write_primitive(&mut w, TAG_IMPORT_P, crt.p)?;
                tlv::write_primitive(&mut w, TAG_IMPORT_Q, crt.q)?;
                tlv::write_primitive(&mut w, TAG_IMPORT_DP, crt.dp)?;
                tlv::write_primitive(&mut w, TAG_IMPORT_DQ, crt.dq)?;
                tlv::write_primitive(&mut w, TAG_IMPORT_QINV, crt.qinv)?;
            }
            (AlgorithmId::EccP256 | AlgorithmId::EccP384, ImportKey::Ec(scalar)) => {
                tlv::write_primitive(&mut w, TAG_IMPORT_EC_PRIVATE, scalar)?;
            }
            _ => return Err(PivError::argument("import key components do not match algorithm")),
        }
        if pin_policy != PinPolicy::Default {
            tlv::write_primitive(&mut w, TAG_PIN_POLICY, &[pin_policy.wire_value()])?;
        }
        if touch_policy != TouchPolicy::Default {
            tlv::write_primitive(&mut w, TAG_TOUCH_POLICY, &[touch_policy.wire_value()])?;
        }
        let command_data = w.into_bytes();

        let (_, sw) = crate::apdu::exchange(
            self.transport_mut(),
            0x00,
            INS_YK_IMPORT,
            algorithm.wire_value(),
            slot_id,
            &command_data,
            None,
            false,
        )?;
        crate::apdu::classify_status(sw)?;

        self.slots.force_slot(slot_id, algorithm);
        debug!(slot = format!("{slot_id:#x}"), algorithm = ?algorithm, "imported private key");
        Ok(())
    }

    /// Write `cert_der` into `slot_id`'s certificate object via PUT DATA,
    /// gzip-compressing first if the DER exceeds 2000 bytes (matching
    /// YubicoPIV's own threshold for saving APDU buffer space).
    pub fn write_cert(&mut self, slot_id: u8, cert_der: &[u8]) -> Result<()> {
        self.ensure_selected()?;
        let object_id = cert_object_id(slot_id).ok_or_else(|| PivError::argument(format!("slot {slot_id:#x} has no certificate object")))?;

        const COMPRESS_THRESHOLD: usize = 2000;
        let (body, compression) = if cert_der.len() > COMPRESS_THRESHOLD {
            (compress_gzip(cert_der)?, 1u8)
        } else {
            (cert_der.to_vec(), 0u8)
        };

        let mut w = Writer::new();
        tlv::write_primitive(&mut w, TAG_GET_DATA_OBJECT, &object_id)?;
        let container_scope = Scope::open(&mut w, TAG_DATA_CONTAINER);
        tlv::write_primitive(&mut w, TAG_CERT, &body)?;
        tlv::write_primitive(&mut w, TAG_CERT_COMPRESS, &[compression])?;
        tlv::write_primitive(&mut w, TAG_CERT_LRC, &[])?;
        container_scope.close(&mut w)?;
        let command_data = w.into_bytes();

        let (_, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, INS_PUT_DATA, 0x3F, 0xFF, &command_data, None, false)?;
        crate::apdu::classify_status(sw)?;

        debug!(slot = format!("{slot_id:#x}"), compression, len = cert_der.len(), "wrote certificate");
        Ok(())
    }

    /// Write the KEYHIST object: `on_card` and `off_card` retired
    /// key-management key counts, plus `off_card_url` (required if
    /// `off_card > 0`).
    pub fn write_keyhistory(&mut self, on_card: u8, off_card: u8, off_card_url: Option<&str>) -> Result<()> {
        if off_card > 0 && off_card_url.map(str::is_empty).unwrap_or(true) {
            return Err(PivError::argument("off_card_url is required when off_card > 0"));
        }
        self.ensure_selected()?;

        let mut body = vec![on_card, off_card];
        if let Some(url) = off_card_url {
            body.extend_from_slice(url.as_bytes());
        }

        let mut w = Writer::new();
        tlv::write_primitive(&mut w, TAG_GET_DATA_OBJECT, &OBJ_KEYHIST)?;
        let container_scope = Scope::open(&mut w, TAG_DATA_CONTAINER);
        w.put(&body);
        container_scope.close(&mut w)?;
        let command_data = w.into_bytes();

        let (_, sw) = crate::apdu::exchange(self.transport_mut(), 0x00, INS_PUT_DATA, 0x3F, 0xFF, &command_data, None, false)?;
        crate::apdu::classify_status(sw)
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PivError::invalid_data(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| PivError::invalid_data(format!("gzip compression failed: {e}")))
}

fn parse_and_validate_ec_point(algorithm: AlgorithmId, point: &[u8]) -> Result<ssh_key::PublicKey> {
    match algorithm {
        AlgorithmId::EccP256 => {
            let encoded = p256::EncodedPoint::from_bytes(point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let affine: Option<p256::AffinePoint> = p256::elliptic_curve::sec1::FromEncodedPoint::from_encoded_point(&encoded).into();
            if affine.is_none() {
                return Err(PivError::invalid_data("EC public point is not on curve P-256"));
            }
            Ok(ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP256(encoded)))
        }
        AlgorithmId::EccP384 => {
            let encoded = p384::EncodedPoint::from_bytes(point).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let affine: Option<p384::AffinePoint> = p384::elliptic_curve::sec1::FromEncodedPoint::from_encoded_point(&encoded).into();
            if affine.is_none() {
                return Err(PivError::invalid_data("EC public point is not on curve P-384"));
            }
            Ok(ssh_key::PublicKey::from(ssh_key::public::EcdsaPublicKey::NistP384(encoded)))
        }
        other => Err(PivError::not_supported(format!("{other:?} is not an EC algorithm"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;

    #[test]
    fn generate_returns_a_public_key_and_registers_the_slot() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();

        let public_key = token.generate(0x9A, AlgorithmId::EccP256, PinPolicy::Default, TouchPolicy::Default).unwrap();
        assert!(matches!(public_key.key_data(), ssh_key::public::KeyData::Ecdsa(_)));
        assert_eq!(token.slots.get(0x9A).and_then(|s| s.algorithm_id), Some(AlgorithmId::EccP256));
    }

    #[test]
    fn write_keyhistory_requires_url_when_off_card_present() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let err = token.write_keyhistory(1, 2, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::Argument);
    }

    #[test]
    fn write_cert_compresses_large_certificates() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let fake_der = vec![0xAAu8; 3000];
        token.write_cert(0x9A, &fake_der).unwrap();

        let mut w = Writer::new();
        tlv::write_primitive(&mut w, TAG_GET_DATA_OBJECT, &cert_object_id(0x9A).unwrap()).unwrap();
        let command_data = w.into_bytes();
        let (reply, sw) = crate::apdu::exchange(token.transport_mut(), 0x00, 0xCB, 0x3F, 0xFF, &command_data, Some(0), false).unwrap();
        crate::apdu::classify_status(sw).unwrap();
        let container = tlv::Tlv::expect(&mut crate::bytes::Reader::new(&reply), TAG_DATA_CONTAINER).unwrap();
        let children = tlv::parse_all(container).unwrap();
        let compression = children.iter().find(|t| t.tag == TAG_CERT_COMPRESS).unwrap().value[0];
        assert_eq!(compression, 1, "a 3000-byte certificate must be stored gzip-compressed");
    }
}
