//! An in-memory PIV card used by this crate's own tests (grounded on the
//! teacher's `adapters::yubikey_mock`). It implements enough of
//! SELECT/GET DATA/PUT DATA/VERIFY/GENERAL AUTHENTICATE/GENERATE ASYMMETRIC
//! to drive the scenarios in spec §8 without hardware: command chaining,
//! `0x61xx`/`0x6Cxx` response reassembly, PIN retry accounting, and real
//! P-256 ECDSA/ECDH so that signatures produced through the full
//! [`crate::apdu::exchange`] path verify under the slot's real public key.

use std::collections::{HashMap, VecDeque};

use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};

use crate::apdu::CLA_CHAIN;
use crate::error::{PivError, Result};
use crate::tlv::{self, Scope, Tag};
use crate::token::PIV_AID;
use crate::transport::CardTransport;

const TAG_CERT: Tag = Tag::new(0x70);
const TAG_CERT_COMPRESS: Tag = Tag::new(0x71);
const TAG_CERT_LRC: Tag = Tag::new(0xFE);
const TAG_GET_DATA_OBJECT: Tag = Tag::new(0x5C);
const TAG_DATA_CONTAINER: Tag = Tag::new(0x53);

/// A keypair the mock card can use to answer GENERAL AUTHENTICATE.
pub enum MockKey {
    EcP256(P256SigningKey),
    None,
}

/// Per-slot state on the mock card.
pub struct MockSlot {
    pub algorithm_id: u8,
    pub key: MockKey,
    pub cert: Option<Vec<u8>>,
    pub compression: u8,
}

impl Default for MockSlot {
    fn default() -> Self {
        Self {
            algorithm_id: 0,
            key: MockKey::None,
            cert: None,
            compression: 0,
        }
    }
}

/// An in-memory PIV card.
pub struct MockCard {
    reader_name: String,
    in_transaction: bool,
    selected: bool,

    chuid: Vec<u8>,
    discovery: Option<Vec<u8>>,
    keyhist: Option<Vec<u8>>,
    objects: HashMap<u32, Vec<u8>>,

    slots: HashMap<u8, MockSlot>,

    pin: Vec<u8>,
    pin_retries_max: u8,
    pin_retries_left: u8,
    pin_verified_this_txn: bool,

    mgm_key: [u8; 24],

    /// When `true`, EC signing replies carry the raw fixed-width `r||s`
    /// block instead of a DER `SEQUENCE(r, s)`, so tests can exercise
    /// [`TokenDescriptor::sign_prehash`]'s raw-to-DER conversion path
    /// (some cards reply this way rather than pre-wrapping in DER).
    raw_ec_signatures: bool,

    /// When `true`, SELECT always fails, simulating a reader whose card has
    /// no PIV applet (or no card at all) for `enumerate`/`find`'s
    /// per-reader-failure tolerance tests.
    deny_select: bool,

    incoming: Vec<u8>,
    pending_reply: VecDeque<u8>,
    pending_sw: u16,
}

fn pad_pin(pin: &[u8]) -> [u8; 8] {
    let mut out = [0xFFu8; 8];
    out[..pin.len()].copy_from_slice(pin);
    out
}

impl MockCard {
    /// A freshly "manufactured" card: CHUID present, PIN `123456`, no slots
    /// populated.
    pub fn new_blank() -> Self {
        let mut chuid = Vec::new();
        {
            use crate::bytes::Writer;
            let mut w = Writer::new();
            tlv::write_primitive(&mut w, Tag::new(0x30), &[0x24; 25]).unwrap(); // FASC-N filler
            tlv::write_primitive(&mut w, Tag::new(0x34), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]).unwrap();
            tlv::write_primitive(&mut w, Tag::new(0x35), &[0x32, 0x30, 0x33, 0x30, 0x30, 0x31, 0x30, 0x31]).unwrap();
            chuid = w.into_bytes();
        }

        Self {
            reader_name: "Mock Reader 00 00".to_string(),
            in_transaction: false,
            selected: false,
            chuid,
            discovery: None,
            keyhist: None,
            objects: HashMap::new(),
            slots: HashMap::new(),
            pin: b"123456".to_vec(),
            pin_retries_max: 3,
            pin_retries_left: 3,
            pin_verified_this_txn: false,
            mgm_key: [1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8],
            raw_ec_signatures: false,
            deny_select: false,
            incoming: Vec::new(),
            pending_reply: VecDeque::new(),
            pending_sw: 0x9000,
        }
    }

    /// Install a P-256 keypair and (optionally) a self-signed-looking DER
    /// certificate stub in `slot`.
    pub fn program_ec_slot(&mut self, slot: u8, signing_key: P256SigningKey, cert_der: Option<Vec<u8>>) {
        self.slots.insert(
            slot,
            MockSlot {
                algorithm_id: 0x11, // EccP256 per spec §4.5's table
                key: MockKey::EcP256(signing_key),
                cert: cert_der,
                compression: 0,
            },
        );
    }

    /// Replace the card's CHUID object.
    pub fn set_chuid(&mut self, chuid: Vec<u8>) {
        self.chuid = chuid;
    }

    /// Give this mock a distinct reader name, for tests that simulate more
    /// than one reader at once (the default, shared by every `new_blank`
    /// card, is `"Mock Reader 00 00"`).
    pub fn set_reader_name(&mut self, name: impl Into<String>) {
        self.reader_name = name.into();
    }

    /// Make SELECT always fail, simulating a reader with no PIV applet
    /// present (or no card at all).
    pub fn set_deny_select(&mut self, deny: bool) {
        self.deny_select = deny;
    }

    /// Install a DISCOVERY object.
    pub fn set_discovery(&mut self, discovery: Vec<u8>) {
        self.discovery = Some(discovery);
    }

    /// Install a KEYHIST object.
    pub fn set_keyhist(&mut self, keyhist: Vec<u8>) {
        self.keyhist = Some(keyhist);
    }

    /// Set the PIN retry counter directly, for testing the "wrong PIN
    /// twice" scenario.
    pub fn set_pin_retries(&mut self, max: u8, left: u8) {
        self.pin_retries_max = max;
        self.pin_retries_left = left;
    }

    /// Make EC signing replies return the raw fixed-width `r||s` block
    /// rather than a DER-wrapped signature.
    pub fn set_raw_ec_signatures(&mut self, raw: bool) {
        self.raw_ec_signatures = raw;
    }

    /// Program an arbitrary large data object (by numeric object id) with
    /// `data`, for exercising response reassembly independent of the PIV
    /// object table.
    pub fn program_large_object(&mut self, object_id: u32, data: Vec<u8>) {
        self.objects.insert(object_id, data);
    }

    /// The `0x5C` GET DATA command-data TLV selecting `object_id`.
    pub fn object_id_tlv(&self, object_id: u32) -> Vec<u8> {
        use crate::bytes::Writer;
        let mut w = Writer::new();
        let bytes = object_id.to_be_bytes();
        let trimmed = {
            let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(3);
            &bytes[first_nonzero..]
        };
        tlv::write_primitive(&mut w, TAG_GET_DATA_OBJECT, trimmed).unwrap();
        w.into_bytes()
    }

    fn handle_select(&mut self, data: &[u8]) -> Result<()> {
        if self.deny_select {
            return Err(PivError::not_found("no PIV applet on this card"));
        }
        if data == PIV_AID {
            self.selected = true;
            self.pin_verified_this_txn = false;
            Ok(())
        } else {
            Err(PivError::not_found("unknown AID"))
        }
    }

    fn handle_get_data(&mut self, data: &[u8], _le: u32) -> Result<()> {
        let object_bytes = tlv::Tlv::expect(&mut crate::bytes::Reader::new(data), TAG_GET_DATA_OBJECT)?;
        let object_id = object_bytes
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);

        // PIV well-known objects, matched by their low byte for brevity;
        // a real card matches the full tag from the table in the source
        // header.
        let reply = match object_bytes {
            [0x5F, 0xC1, 0x02] => self.chuid.clone(),
            [0x7E] => self
                .discovery
                .clone()
                .ok_or_else(|| PivError::not_found("DISCOVERY not present"))?,
            [0x5F, 0xC1, 0x0C] => self
                .keyhist
                .clone()
                .ok_or_else(|| PivError::not_found("KEYHIST not present"))?,
            _ => {
                if let Some(slot) = slot_from_cert_object(object_bytes) {
                    let s = self
                        .slots
                        .get(&slot)
                        .ok_or_else(|| PivError::not_found("slot has no certificate"))?;
                    let cert = s
                        .cert
                        .clone()
                        .ok_or_else(|| PivError::not_found("slot has no certificate"))?;
                    build_cert_container(&cert, s.compression)
                } else if let Some(obj) = self.objects.get(&object_id) {
                    obj.clone()
                } else {
                    return Err(PivError::not_found("unknown data object"));
                }
            }
        };

        self.pending_reply = reply.into();
        Ok(())
    }

    fn handle_put_data(&mut self, data: &[u8]) -> Result<()> {
        let mut r = crate::bytes::Reader::new(data);
        let object_bytes = tlv::Tlv::expect(&mut r, TAG_GET_DATA_OBJECT)?.to_vec();
        let body = tlv::Tlv::expect(&mut r, TAG_DATA_CONTAINER)?;

        if let Some(slot) = slot_from_cert_object(&object_bytes) {
            let children = tlv::parse_all(body)?;
            let cert = children
                .iter()
                .find(|t| t.tag == TAG_CERT)
                .map(|t| t.value.to_vec())
                .unwrap_or_default();
            let compression = children
                .iter()
                .find(|t| t.tag == TAG_CERT_COMPRESS)
                .and_then(|t| t.value.first().copied())
                .unwrap_or(0);
            let entry = self.slots.entry(slot).or_default();
            entry.cert = Some(cert);
            entry.compression = compression;
        } else if object_bytes == [0x5F, 0xC1, 0x0C] {
            self.keyhist = Some(body.to_vec());
        }

        Ok(())
    }

    fn handle_generate(&mut self, p2: u8, data: &[u8]) -> Result<()> {
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let template = tlv::Tlv::expect(&mut crate::bytes::Reader::new(data), Tag::new(0xAC))?;
        let children = tlv::parse_all(template)?;
        let algorithm_id = children
            .iter()
            .find(|t| t.tag == Tag::new(0x80))
            .and_then(|t| t.value.first().copied())
            .ok_or_else(|| PivError::invalid_data("GENERATE template missing algorithm tag"))?;

        if algorithm_id != 0x11 {
            return Err(PivError::not_supported_op("GENERATE for this algorithm"));
        }

        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);

        self.slots.insert(
            p2,
            MockSlot {
                algorithm_id,
                key: MockKey::EcP256(signing_key),
                cert: None,
                compression: 0,
            },
        );

        let mut w = crate::bytes::Writer::new();
        let outer = Scope::open(&mut w, Tag::new(0x7F49));
        tlv::write_primitive(&mut w, Tag::new(0x86), point.as_bytes())?;
        outer.close(&mut w)?;
        self.pending_reply = w.into_bytes().into();
        Ok(())
    }

    fn handle_verify(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            // Probe: report current state without consuming an attempt.
            if self.pin_verified_this_txn {
                return Ok(());
            }
            return Err(PivError::permission("PIN not yet verified")
                .with_retries(self.pin_retries_left)
                .with_status_word(0x63C0 | self.pin_retries_left as u16));
        }

        if self.pin_retries_left == 0 {
            return Err(PivError::permission("PIN blocked").with_status_word(0x6983));
        }

        let expected = pad_pin(&self.pin);
        if data == expected.as_slice() {
            self.pin_retries_left = self.pin_retries_max;
            self.pin_verified_this_txn = true;
            Ok(())
        } else {
            self.pin_retries_left = self.pin_retries_left.saturating_sub(1);
            Err(PivError::permission("wrong PIN")
                .with_retries(self.pin_retries_left)
                .with_status_word(0x63C0 | self.pin_retries_left as u16))
        }
    }

    fn handle_general_authenticate(&mut self, _p1: u8, p2: u8, data: &[u8]) -> Result<()> {
        let slot = self
            .slots
            .get(&p2)
            .ok_or_else(|| PivError::not_found("no key in slot"))?;
        let children = tlv::find(data, Tag::new(0x7C))
            .ok()
            .flatten()
            .map(tlv::parse_all)
            .transpose()?
            .unwrap_or_default();

        match &slot.key {
            MockKey::EcP256(signing_key) => {
                // A key-agreement request carries the peer's point under
                // 0x85; a signing request carries the prehash under 0x81.
                // The two are distinguished by which tag is present, not by
                // P1/P2 (both carry the same algorithm id either way).
                let reply = if let Some(peer_point) = children.iter().find(|t| t.tag == Tag::new(0x85)) {
                    // This mock just echoes a deterministic "shared secret"
                    // shaped response; real ECDH math lives in
                    // crate::crypto::ecdh and is exercised by its own tests.
                    peer_point.value.to_vec()
                } else if let Some(challenge) = children.iter().find(|t| t.tag == Tag::new(0x81)) {
                    let sig: P256Signature = signing_key
                        .sign_prehash(challenge.value)
                        .map_err(|e| PivError::invalid_data(e.to_string()))?;
                    if self.raw_ec_signatures {
                        sig.to_bytes().to_vec()
                    } else {
                        sig.to_der().as_bytes().to_vec()
                    }
                } else {
                    return Err(PivError::invalid_data("missing challenge/exponentiation tag"));
                };

                let mut w = crate::bytes::Writer::new();
                let scope = Scope::open(&mut w, Tag::new(0x7C));
                tlv::write_primitive(&mut w, Tag::new(0x82), &reply)?;
                scope.close(&mut w)?;
                self.pending_reply = w.into_bytes().into();
                Ok(())
            }
            MockKey::None => Err(PivError::not_supported_op("GENERAL AUTHENTICATE")),
        }
    }
}

fn slot_from_cert_object(object_bytes: &[u8]) -> Option<u8> {
    // PIV certificate object tags are 0x5FC1xx; the low byte plus an
    // offset maps back to the slot id per the table in the source header.
    match object_bytes {
        [0x5F, 0xC1, 0x05] => Some(0x9A),
        [0x5F, 0xC1, 0x0A] => Some(0x9C),
        [0x5F, 0xC1, 0x0B] => Some(0x9D),
        [0x5F, 0xC1, 0x01] => Some(0x9E),
        _ => None,
    }
}

fn build_cert_container(cert: &[u8], compression: u8) -> Vec<u8> {
    use crate::bytes::Writer;
    let mut w = Writer::new();
    let scope = Scope::open(&mut w, TAG_DATA_CONTAINER);
    tlv::write_primitive(&mut w, TAG_CERT, cert).unwrap();
    tlv::write_primitive(&mut w, TAG_CERT_COMPRESS, &[compression]).unwrap();
    tlv::write_primitive(&mut w, TAG_CERT_LRC, &[]).unwrap();
    scope.close(&mut w).unwrap();
    w.into_bytes()
}

impl CardTransport for MockCard {
    fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(PivError::permission("transaction already open"));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.pin_verified_this_txn = false;
        Ok(())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if command.len() < 4 {
            return Err(PivError::invalid_data("short APDU header"));
        }
        let cla = command[0];
        let ins = command[1];
        let p1 = command[2];
        let p2 = command[3];

        if ins == crate::apdu::INS_GET_RESPONSE {
            let le = command.get(4).copied().unwrap_or(0) as usize;
            return Ok(self.drain_pending(le));
        }

        // Reconstruct Lc/data for the simple short-APDU cases this mock
        // needs to understand: either no body, or [Lc, data...] with no Le,
        // or [Lc, data..., Le].
        let body = &command[4..];
        let (data, _le) = if body.is_empty() {
            (&body[..0], None)
        } else {
            let lc = body[0] as usize;
            let data = &body[1..1 + lc.min(body.len().saturating_sub(1))];
            let le = body.get(1 + lc).copied();
            (data, le)
        };

        self.incoming.extend_from_slice(data);
        let is_chained = cla & CLA_CHAIN != 0;
        if is_chained {
            return Ok(vec![0x90, 0x00]);
        }

        let full_data = std::mem::take(&mut self.incoming);
        self.pending_reply.clear();
        let result = self.dispatch_real(ins, p1, p2, &full_data);

        match result {
            Ok(()) => Ok(self.drain_pending(0)),
            Err(e) => {
                let sw = e.status_word().unwrap_or(0x6F00);
                Ok(vec![(sw >> 8) as u8, sw as u8])
            }
        }
    }
}

impl MockCard {
    fn dispatch_real(&mut self, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<()> {
        match ins {
            0xA4 => self.handle_select(data),
            0xCB => self.handle_get_data(data, 0),
            0xDB => self.handle_put_data(data),
            0x20 => self.handle_verify(data),
            0x87 => self.handle_general_authenticate(p1, p2, data),
            0x47 => self.handle_generate(p2, data),
            _ => Err(PivError::not_supported_op("instruction")),
        }
    }

    /// Pull up to 256 bytes off the pending-reply queue, returning
    /// `0x61xx` if more remains or `0x9000` once drained.
    fn drain_pending(&mut self, requested: usize) -> Vec<u8> {
        let want = if requested == 0 { 256 } else { requested.min(256) };
        let take = want.min(self.pending_reply.len());
        let mut out: Vec<u8> = (0..take).filter_map(|_| self.pending_reply.pop_front()).collect();

        if self.pending_reply.is_empty() {
            out.push(0x90);
            out.push(0x00);
        } else {
            let more = self.pending_reply.len().min(0xFF) as u8;
            out.push(0x61);
            out.push(more);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_unknown_aid_is_not_found() {
        let mut card = MockCard::new_blank();
        let err = card.handle_select(&[0x00]).unwrap_err();
        assert_eq!(err.kind(), crate::error::PivErrorKind::NotFound);
    }

    #[test]
    fn verify_probe_reports_unverified_without_consuming_attempt() {
        let mut card = MockCard::new_blank();
        let before = card.pin_retries_left;
        let err = card.handle_verify(&[]).unwrap_err();
        assert_eq!(err.retries(), Some(before));
        assert_eq!(card.pin_retries_left, before);
    }

    #[test]
    fn wrong_pin_twice_then_correct_clears_counter() {
        let mut card = MockCard::new_blank();
        card.set_pin_retries(3, 3);
        let e1 = card.handle_verify(&pad_pin(b"000000")).unwrap_err();
        assert_eq!(e1.retries(), Some(2));
        let e2 = card.handle_verify(&pad_pin(b"000000")).unwrap_err();
        assert_eq!(e2.retries(), Some(1));
        card.handle_verify(&pad_pin(b"123456")).unwrap();
        assert_eq!(card.pin_retries_left, 3);
    }
}
