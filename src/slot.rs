//! Slot registry: per-token ordered collection of key/certificate slots,
//! lazy certificate read, and forced slot stubs (spec §4.5).

use flate2::read::GzDecoder;
use std::io::Read as _;
use tracing::{debug, warn};

use crate::bytes::Writer;
use crate::error::{PivError, PivErrorKind, Result};
use crate::tlv::{self, Tag};
use crate::transport::CardTransport;

const TAG_GET_DATA_OBJECT: Tag = Tag::new(0x5C);
const TAG_DATA_CONTAINER: Tag = Tag::new(0x53);
const TAG_CERT: Tag = Tag::new(0x70);
const TAG_CERT_COMPRESS: Tag = Tag::new(0x71);
const TAG_CERT_LRC: Tag = Tag::new(0xFE);

/// Key algorithm identifiers per NIST SP 800-78-4, plus the YubicoPIV
/// management-key and hash-on-card pseudo-algorithms the protocol engine
/// also needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmId {
    /// RSA 1024-bit.
    Rsa1024,
    /// RSA 2048-bit.
    Rsa2048,
    /// 3DES-EDE, used for the management/admin key.
    ThreeDes,
    /// EC P-256.
    EccP256,
    /// EC P-384.
    EccP384,
    /// AES-128, as a YubicoPIV 5.4+ management-key algorithm.
    Aes128,
    /// AES-192.
    Aes192,
    /// AES-256.
    Aes256,
    /// Pseudo-algorithm: card performs SHA-1 before signing.
    PinSha1,
    /// Pseudo-algorithm: card performs SHA-256 before signing.
    PinSha256,
}

impl AlgorithmId {
    /// The PIV wire value for this algorithm id.
    pub fn wire_value(self) -> u8 {
        match self {
            AlgorithmId::Rsa1024 => 0x06,
            AlgorithmId::Rsa2048 => 0x07,
            AlgorithmId::ThreeDes => 0x03,
            AlgorithmId::EccP256 => 0x11,
            AlgorithmId::EccP384 => 0x14,
            AlgorithmId::Aes128 => 0x08,
            AlgorithmId::Aes192 => 0x0A,
            AlgorithmId::Aes256 => 0x0C,
            AlgorithmId::PinSha1 => 0xF0,
            AlgorithmId::PinSha256 => 0xF1,
        }
    }

    /// Parse a PIV wire algorithm id byte.
    pub fn from_wire_value(v: u8) -> Result<Self> {
        Ok(match v {
            0x06 => AlgorithmId::Rsa1024,
            0x07 => AlgorithmId::Rsa2048,
            0x03 => AlgorithmId::ThreeDes,
            0x11 => AlgorithmId::EccP256,
            0x14 => AlgorithmId::EccP384,
            0x08 => AlgorithmId::Aes128,
            0x0A => AlgorithmId::Aes192,
            0x0C => AlgorithmId::Aes256,
            0xF0 => AlgorithmId::PinSha1,
            0xF1 => AlgorithmId::PinSha256,
            other => return Err(PivError::not_supported(format!("unknown algorithm id {other:#x}"))),
        })
    }
}

/// Per-slot state (spec §3 "Slot descriptor").
pub struct SlotDescriptor {
    /// 8-bit slot id, drawn from {9A, 9B, 9C, 9D, 9E, 82..95, F9}.
    pub slot_id: u8,
    /// Algorithm id, known once a certificate or a `generate` response has
    /// been read, or supplied directly to [`SlotRegistry::force_slot`].
    pub algorithm_id: Option<AlgorithmId>,
    /// DER certificate bytes, if a certificate has been read.
    pub cert_der: Option<Vec<u8>>,
    /// Subject distinguished name, extracted from the certificate.
    pub subject_dn: Option<String>,
    /// The slot's public key in SSH wire form.
    pub public_key: Option<ssh_key::PublicKey>,
    /// Compression flag recorded when the certificate was read (0 = none,
    /// 1 = gzip).
    pub compression: Option<u8>,
}

impl SlotDescriptor {
    fn forced(slot_id: u8, algorithm_id: AlgorithmId) -> Self {
        Self {
            slot_id,
            algorithm_id: Some(algorithm_id),
            cert_der: None,
            subject_dn: None,
            public_key: None,
            compression: None,
        }
    }
}

/// Fixed slot enumeration `read_all_certs` walks, per spec §4.5.
pub const ALL_SLOT_IDS: &[u8] = &[
    0x9A, 0x9C, 0x9D, 0x9E, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x8D, 0x8E, 0x8F, 0x90,
    0x91, 0x92, 0x93, 0x94, 0x95, 0xF9,
];

/// Map a slot id to its BER-encoded GET/PUT DATA object tag, per the fixed
/// PIV/YubicoPIV table.
pub fn cert_object_id(slot_id: u8) -> Option<[u8; 3]> {
    match slot_id {
        0x9A => Some([0x5F, 0xC1, 0x05]),
        0x9C => Some([0x5F, 0xC1, 0x0A]),
        0x9D => Some([0x5F, 0xC1, 0x0B]),
        0x9E => Some([0x5F, 0xC1, 0x01]),
        0x82..=0x95 => Some([0x5F, 0xC1, 0x0D + (slot_id - 0x82)]),
        0xF9 => Some([0x5F, 0xC1, 0xF9]),
        _ => None,
    }
}

/// An ordered collection of a token's slots.
#[derive(Default)]
pub struct SlotRegistry {
    slots: Vec<SlotDescriptor>,
}

impl SlotRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Every populated slot, in read order.
    pub fn iter(&self) -> impl Iterator<Item = &SlotDescriptor> {
        self.slots.iter()
    }

    /// The slot at `slot_id`, if populated.
    pub fn get(&self, slot_id: u8) -> Option<&SlotDescriptor> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }

    /// Create a slot stub for which `sign`/`ecdh` remain callable but
    /// `cert`/`pubkey` return nothing, for slots that hold a key but no
    /// certificate.
    pub fn force_slot(&mut self, slot_id: u8, algorithm_id: AlgorithmId) {
        self.slots.retain(|s| s.slot_id != slot_id);
        self.slots.push(SlotDescriptor::forced(slot_id, algorithm_id));
    }

    /// Read and parse the certificate in `slot_id` via GET DATA, replacing
    /// any existing descriptor for that slot.
    pub fn read_cert(&mut self, transport: &mut dyn CardTransport, slot_id: u8) -> Result<&SlotDescriptor> {
        let object_id = cert_object_id(slot_id).ok_or_else(|| PivError::argument(format!("slot {slot_id:#x} has no certificate object")))?;

        let mut w = Writer::new();
        tlv::write_primitive(&mut w, TAG_GET_DATA_OBJECT, &object_id)?;
        let command_data = w.into_bytes();

        let (reply, sw) = crate::apdu::exchange(transport, 0x00, 0xCB, 0x3F, 0xFF, &command_data, Some(0), false)?;
        crate::apdu::classify_status(sw)?;

        let container = tlv::Tlv::expect(&mut crate::bytes::Reader::new(&reply), TAG_DATA_CONTAINER)?;
        let children = tlv::parse_all(container)?;

        let cert_der = children
            .iter()
            .find(|t| t.tag == TAG_CERT)
            .map(|t| t.value.to_vec())
            .ok_or_else(|| PivError::invalid_data("certificate container missing 0x70"))?;

        let compression = children
            .iter()
            .find(|t| t.tag == TAG_CERT_COMPRESS)
            .and_then(|t| t.value.first().copied())
            .unwrap_or(0);
        let _lrc = children.iter().find(|t| t.tag == TAG_CERT_LRC);

        let der = if compression == 1 {
            decompress_gzip(&cert_der)?
        } else {
            cert_der.clone()
        };

        let (subject_dn, public_key, algorithm_id) = parse_certificate(&der)?;

        self.slots.retain(|s| s.slot_id != slot_id);
        self.slots.push(SlotDescriptor {
            slot_id,
            algorithm_id: Some(algorithm_id),
            cert_der: Some(cert_der),
            subject_dn: Some(subject_dn),
            public_key: Some(public_key),
            compression: Some(compression),
        });

        debug!(slot = format!("{slot_id:#x}"), compression, "read certificate");
        Ok(self.get(slot_id).expect("just inserted"))
    }

    /// Walk [`ALL_SLOT_IDS`], tolerating `NotFound` and `NotSupported` for
    /// slots without a certificate. Returns the slot ids that were
    /// skipped, per the open question in spec §9.
    pub fn read_all_certs(&mut self, transport: &mut dyn CardTransport) -> Result<Vec<u8>> {
        let mut skipped = Vec::new();
        for &slot_id in ALL_SLOT_IDS {
            match self.read_cert(transport, slot_id) {
                Ok(_) => {}
                Err(e) if matches!(e.kind(), PivErrorKind::NotFound | PivErrorKind::NotSupported) => {
                    skipped.push(slot_id);
                }
                Err(e) if e.kind() == PivErrorKind::Permission => {
                    warn!(slot = format!("{slot_id:#x}"), "certificate read requires PIN; skipping");
                    skipped.push(slot_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(skipped)
    }
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PivError::invalid_data(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

fn parse_certificate(der: &[u8]) -> Result<(String, ssh_key::PublicKey, AlgorithmId)> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| PivError::invalid_data(format!("certificate parse failed: {e}")))?;

    let subject_dn = cert.subject().to_string();
    let spki = cert.public_key();

    let (public_key, algorithm_id) = match spki.parsed().map_err(|e| PivError::invalid_data(e.to_string()))? {
        x509_parser::public_key::PublicKey::EC(ec_point) => {
            let data = ec_point.data();
            parse_ec_point(data)?
        }
        x509_parser::public_key::PublicKey::RSA(rsa) => {
            let n = rsa.modulus;
            let key = rsa::RsaPublicKey::new(
                rsa::BigUint::from_bytes_be(n),
                rsa::BigUint::from_bytes_be(rsa.exponent),
            )
            .map_err(|e| PivError::invalid_data(e.to_string()))?;
            let alg = if key.size() * 8 <= 1024 {
                AlgorithmId::Rsa1024
            } else {
                AlgorithmId::Rsa2048
            };
            let ssh_rsa = ssh_key::public::RsaPublicKey {
                e: ssh_key::Mpint::from_bytes(rsa.exponent).map_err(|e| PivError::invalid_data(e.to_string()))?,
                n: ssh_key::Mpint::from_bytes(n).map_err(|e| PivError::invalid_data(e.to_string()))?,
            };
            (ssh_key::PublicKey::from(ssh_rsa), alg)
        }
        _ => return Err(PivError::not_supported("unsupported certificate public key type")),
    };

    Ok((subject_dn, public_key, algorithm_id))
}

fn parse_ec_point(data: &[u8]) -> Result<(ssh_key::PublicKey, AlgorithmId)> {
    match data.len() {
        // Uncompressed P-256 point: 0x04 || X(32) || Y(32).
        65 => {
            let point = p256::EncodedPoint::from_bytes(data).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let key = ssh_key::public::EcdsaPublicKey::NistP256(point);
            Ok((ssh_key::PublicKey::from(key), AlgorithmId::EccP256))
        }
        // Uncompressed P-384 point: 0x04 || X(48) || Y(48).
        97 => {
            let point = p384::EncodedPoint::from_bytes(data).map_err(|e| PivError::invalid_data(e.to_string()))?;
            let key = ssh_key::public::EcdsaPublicKey::NistP384(point);
            Ok((ssh_key::PublicKey::from(key), AlgorithmId::EccP384))
        }
        other => Err(PivError::invalid_data(format!("unsupported EC point length {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_object_id_covers_fixed_slots() {
        assert_eq!(cert_object_id(0x9A), Some([0x5F, 0xC1, 0x05]));
        assert_eq!(cert_object_id(0x9E), Some([0x5F, 0xC1, 0x01]));
        assert_eq!(cert_object_id(0x82), Some([0x5F, 0xC1, 0x0D]));
        assert_eq!(cert_object_id(0x95), Some([0x5F, 0xC1, 0x20]));
        assert_eq!(cert_object_id(0xF9), Some([0x5F, 0xC1, 0xF9]));
        assert_eq!(cert_object_id(0x00), None);
    }

    #[test]
    fn force_slot_creates_stub_without_cert() {
        let mut reg = SlotRegistry::new();
        reg.force_slot(0x9B, AlgorithmId::ThreeDes);
        let slot = reg.get(0x9B).unwrap();
        assert!(slot.cert_der.is_none());
        assert_eq!(slot.algorithm_id, Some(AlgorithmId::ThreeDes));
    }

    #[test]
    fn algorithm_id_wire_values_match_sp_800_78_4() {
        assert_eq!(AlgorithmId::Rsa2048.wire_value(), 0x07);
        assert_eq!(AlgorithmId::EccP256.wire_value(), 0x11);
        assert_eq!(AlgorithmId::EccP384.wire_value(), 0x14);
        assert_eq!(AlgorithmId::from_wire_value(0x11).unwrap(), AlgorithmId::EccP256);
    }
}
