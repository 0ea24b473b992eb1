//! Protocol engine: each PIV/YubicoPIV command at design level (spec
//! §4.6). Every operation here is an `impl<T: CardTransport>` block on
//! [`crate::token::TokenDescriptor`], split across submodules by concern —
//! PIN/admin auth, signing/ECDH, key management, and attestation/reset.

mod admin;
mod auth;
mod keys;
mod sign;

pub use admin::*;
pub use auth::*;
pub use keys::*;
pub use sign::*;

use crate::bytes::Writer;
use crate::error::Result;
use crate::tlv::{self, Scope, Tag};
use crate::transport::CardTransport;

/// Dynamic authentication template tag wrapping GENERAL AUTHENTICATE
/// request/response bodies.
pub(crate) const TAG_DYN_AUTH: Tag = Tag::new(0x7C);
/// Witness/challenge tag (0x80) inside the dynamic auth template.
pub(crate) const TAG_WITNESS: Tag = Tag::new(0x80);
/// Challenge tag (0x81).
pub(crate) const TAG_CHALLENGE: Tag = Tag::new(0x81);
/// Response tag (0x82).
pub(crate) const TAG_RESPONSE: Tag = Tag::new(0x82);
/// Exponentiation/peer-public-key tag (0x85), carrying the peer's point in
/// an ECDH key-agreement request — distinct from the 0x81 challenge tag
/// a signing request uses.
pub(crate) const TAG_EXPONENTIATION: Tag = Tag::new(0x85);

/// INS GENERAL AUTHENTICATE.
pub(crate) const INS_GEN_AUTH: u8 = 0x87;
/// INS VERIFY.
pub(crate) const INS_VERIFY: u8 = 0x20;
/// INS CHANGE REFERENCE DATA.
pub(crate) const INS_CHANGE_REFERENCE_DATA: u8 = 0x24;
/// INS RESET RETRY COUNTER.
pub(crate) const INS_RESET_RETRY_COUNTER: u8 = 0x2C;
/// INS GENERATE ASYMMETRIC KEY PAIR.
pub(crate) const INS_GENERATE: u8 = 0x47;
/// INS PUT DATA.
pub(crate) const INS_PUT_DATA: u8 = 0xDB;
/// INS GET DATA.
pub(crate) const INS_GET_DATA: u8 = 0xCB;
/// YubicoPIV INS IMPORT ASYMMETRIC KEY.
pub(crate) const INS_YK_IMPORT: u8 = 0xFE;
/// YubicoPIV INS ATTEST.
pub(crate) const INS_YK_ATTEST: u8 = 0xF9;
/// YubicoPIV INS RESET.
pub(crate) const INS_YK_RESET: u8 = 0xFB;
/// YubicoPIV INS SET PIN RETRIES.
pub(crate) const INS_YK_SET_PIN_RETRIES: u8 = 0xFA;

/// Pad `pin` (1–8 ASCII bytes) to the fixed 8-byte VERIFY/CHANGE REFERENCE
/// DATA payload with trailing `0xFF`.
pub(crate) fn pad_pin(pin: &[u8]) -> [u8; 8] {
    let mut out = [0xFFu8; 8];
    out[..pin.len()].copy_from_slice(pin);
    out
}

/// Which PIN-like reference data a VERIFY/CHANGE/RESET targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// Application PIN (P2 = 0x80).
    Pin,
    /// Global PIN shared across applets (P2 = 0x00).
    GlobalPin,
    /// PIN Unblocking Key (P2 = 0x81).
    Puk,
}

impl PinKind {
    pub(crate) fn p2(self) -> u8 {
        match self {
            PinKind::Pin => 0x80,
            PinKind::GlobalPin => 0x00,
            PinKind::Puk => 0x81,
        }
    }
}

/// Wrap `inner_tlv` (already-encoded child TLVs) in a `0x7C` dynamic
/// authentication template.
pub(crate) fn wrap_dyn_auth(inner: impl FnOnce(&mut Writer) -> Result<()>) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    let scope = Scope::open(&mut w, TAG_DYN_AUTH);
    inner(&mut w)?;
    scope.close(&mut w)?;
    Ok(w.into_bytes())
}

/// Unwrap a `0x7C` dynamic authentication template reply and return its
/// children.
pub(crate) fn unwrap_dyn_auth(reply: &[u8]) -> Result<Vec<tlv::Tlv<'_>>> {
    let body = tlv::Tlv::expect(&mut crate::bytes::Reader::new(reply), TAG_DYN_AUTH)?;
    tlv::parse_all(body)
}

/// Issue one GENERAL AUTHENTICATE exchange against `slot_id`'s algorithm,
/// sending `request` (already wrapped in `0x7C`) and returning the
/// response template's children.
pub(crate) fn gen_auth<T: CardTransport>(
    transport: &mut T,
    algorithm_id: u8,
    slot_id: u8,
    request: &[u8],
) -> Result<Vec<u8>> {
    let (reply, sw) = crate::apdu::exchange(transport, 0x00, INS_GEN_AUTH, algorithm_id, slot_id, request, Some(0), false)?;
    crate::apdu::classify_status(sw)?;
    Ok(reply)
}
