//! Enumerate-then-read scenario (spec §8 scenario 1): a mock card
//! pre-programmed with a CHUID carrying a known GUID and a self-signed
//! P-256 certificate in slot 9A.

use piv_toolkit::bytes::Writer;
use piv_toolkit::error::PivErrorKind;
use piv_toolkit::slot::AlgorithmId;
use piv_toolkit::tlv::{self, Tag};
use piv_toolkit::token::{self, TokenDescriptor};
use piv_toolkit::transport::mock::MockCard;

const TAG_CHUID_FASCN: Tag = Tag::new(0x30);
const TAG_CHUID_GUID: Tag = Tag::new(0x34);

fn build_chuid(guid: [u8; 16]) -> Vec<u8> {
    let mut w = Writer::new();
    tlv::write_primitive(&mut w, TAG_CHUID_FASCN, &[0x24; 25]).unwrap();
    tlv::write_primitive(&mut w, TAG_CHUID_GUID, &guid).unwrap();
    w.into_bytes()
}

fn self_signed_p256_der() -> Vec<u8> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = rcgen::CertificateParams::default();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, "piv-toolkit.test");
    params.distinguished_name = dn;
    let cert = params.self_signed(&key_pair).unwrap();
    cert.der().to_vec()
}

#[test]
fn probe_then_read_finds_the_token_and_its_slot() {
    let guid = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

    let mut card = MockCard::new_blank();
    card.set_chuid(build_chuid(guid));

    let throwaway_key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
    card.program_ec_slot(0x9A, throwaway_key, Some(self_signed_p256_der()));

    let mut token = TokenDescriptor::probe(card).unwrap();
    assert_eq!(token.guid, guid);

    let slot = token.read_cert(0x9A).unwrap();
    assert_eq!(slot.algorithm_id, Some(AlgorithmId::EccP256));
    assert!(slot.public_key.is_some());
    assert!(slot.subject_dn.as_deref().unwrap().contains("piv-toolkit.test"));
}

fn reader(name: &str, guid: [u8; 16]) -> MockCard {
    let mut card = MockCard::new_blank();
    card.set_reader_name(name);
    card.set_chuid(build_chuid(guid));
    card
}

#[test]
fn enumerate_probes_every_reader_and_skips_one_that_fails_select() {
    let guid_a = [0xAA; 16];
    let guid_b = [0xBB; 16];

    let mut unresponsive = MockCard::new_blank();
    unresponsive.set_reader_name("Reader C (no applet)");
    unresponsive.set_deny_select(true);

    let readers = vec![reader("Reader A", guid_a), reader("Reader B", guid_b), unresponsive];

    let tokens = token::enumerate(readers);
    assert_eq!(tokens.len(), 2, "the unresponsive reader is skipped, not fatal to the whole call");
    let guids: Vec<_> = tokens.iter().map(|t| t.guid).collect();
    assert!(guids.contains(&guid_a));
    assert!(guids.contains(&guid_b));
}

#[test]
fn find_with_a_unique_prefix_returns_that_token() {
    let guid_a = [0xAA; 16];
    let guid_b = [0xBB; 16];
    let readers = vec![reader("Reader A", guid_a), reader("Reader B", guid_b)];

    let found = token::find(readers, &[0xAA]).unwrap();
    assert_eq!(found.guid, guid_a);
}

#[test]
fn find_with_an_ambiguous_prefix_reports_duplicate() {
    let guid_a = [0xAA, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let guid_b = [0xAA, 0x22, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let readers = vec![reader("Reader A", guid_a), reader("Reader B", guid_b)];

    let err = token::find(readers, &[0xAA]).unwrap_err();
    assert_eq!(err.kind(), PivErrorKind::Duplicate);
}

#[test]
fn find_with_no_match_is_not_found() {
    let readers = vec![reader("Reader A", [0xAA; 16])];
    let err = token::find(readers, &[0xFF]).unwrap_err();
    assert_eq!(err.kind(), PivErrorKind::NotFound);
}
