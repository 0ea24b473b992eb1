//! PIN/PUK lifecycle and administrative challenge-response (spec §4.6:
//! `verify_pin`, `change_pin`, `reset_pin`, `auth_admin`).

use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::{PivError, PivErrorKind, Result};
use crate::piv::{pad_pin, PinKind, INS_CHANGE_REFERENCE_DATA, INS_RESET_RETRY_COUNTER, INS_VERIFY};
use crate::slot::AlgorithmId;
use crate::token::TokenDescriptor;
use crate::transport::CardTransport;

/// Outcome of a PIN/PUK verification attempt.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOutcome {
    /// Retries remaining after this attempt (only meaningful on failure;
    /// `None` on success since the card resets the counter to its max).
    pub retries_left: Option<u8>,
}

impl<T: CardTransport> TokenDescriptor<T> {
    /// Verify `pin` (1–8 ASCII bytes, padded with `0xFF`). If `can_skip` is
    /// true, first probes the card's "already verified" state with an
    /// empty-data VERIFY, succeeding without consuming an attempt. If
    /// `retries_floor` is set, the current retry count is read first (via
    /// the same empty-data probe) and the PIN is not attempted if the
    /// count is already below the floor.
    pub fn verify_pin(&mut self, kind: PinKind, pin: &[u8], retries_floor: Option<u8>, can_skip: bool) -> Result<VerifyOutcome> {
        if pin.is_empty() || pin.len() > 8 {
            return Err(PivError::argument("PIN must be 1 to 8 bytes"));
        }
        self.ensure_selected()?;

        if can_skip {
            match probe_verify(self.transport_mut(), kind) {
                Ok(()) => {
                    debug!("PIN already verified; probe satisfied verify_pin");
                    return Ok(VerifyOutcome { retries_left: None });
                }
                Err(e) if e.kind() == PivErrorKind::Permission && e.status_word() == Some(0x6983) => {
                    return Err(e);
                }
                Err(_) => {
                    // Not yet verified (0x63Cx) or card doesn't support the
                    // probe; fall through to an attempt below.
                }
            }
        }

        if let Some(floor) = retries_floor {
            if let Err(e) = probe_verify(self.transport_mut(), kind) {
                if let Some(current) = e.retries() {
                    if current < floor {
                        return Err(PivError::new(
                            PivErrorKind::MinRetries,
                            format!("refusing VERIFY: {current} retries left is below floor {floor}"),
                        ));
                    }
                }
            }
        }

        let mut payload = pad_pin(pin);
        let result = crate::apdu::exchange(self.transport_mut(), 0x00, INS_VERIFY, 0x00, kind.p2(), &payload, None, false);
        payload.zeroize();
        let (_, sw) = result?;
        match crate::apdu::classify_status(sw) {
            Ok(()) => Ok(VerifyOutcome { retries_left: None }),
            Err(e) => Err(e),
        }
    }

    /// CHANGE REFERENCE DATA: `old` (current PIN/PUK) and `new` are each
    /// padded to 8 bytes and concatenated.
    pub fn change_pin(&mut self, kind: PinKind, old: &[u8], new: &[u8]) -> Result<()> {
        if old.is_empty() || old.len() > 8 || new.is_empty() || new.len() > 8 {
            return Err(PivError::argument("old/new PIN must each be 1 to 8 bytes"));
        }
        self.ensure_selected()?;

        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&pad_pin(old));
        payload.extend_from_slice(&pad_pin(new));

        let result = crate::apdu::exchange(self.transport_mut(), 0x00, INS_CHANGE_REFERENCE_DATA, 0x00, kind.p2(), &payload, None, false);
        payload.zeroize();
        let (_, sw) = result?;
        crate::apdu::classify_status(sw)
    }

    /// RESET RETRY COUNTER: `puk` unblocks the PIN, setting it to `new_pin`.
    pub fn reset_pin(&mut self, puk: &[u8], new_pin: &[u8]) -> Result<()> {
        if puk.is_empty() || puk.len() > 8 || new_pin.is_empty() || new_pin.len() > 8 {
            return Err(PivError::argument("PUK/new PIN must each be 1 to 8 bytes"));
        }
        self.ensure_selected()?;

        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&pad_pin(puk));
        payload.extend_from_slice(&pad_pin(new_pin));

        let result = crate::apdu::exchange(self.transport_mut(), 0x00, INS_RESET_RETRY_COUNTER, 0x00, PinKind::Pin.p2(), &payload, None, false);
        payload.zeroize();
        let (_, sw) = result?;
        crate::apdu::classify_status(sw)
    }

    /// Administrative challenge-response using `key` (the raw management
    /// key bytes, length and cipher determined by `algorithm`) against
    /// slot 9B.
    pub fn auth_admin(&mut self, algorithm: AlgorithmId, key: &[u8]) -> Result<()> {
        self.ensure_selected()?;

        let request = crate::piv::wrap_dyn_auth(|w| {
            crate::tlv::write_primitive(w, crate::piv::TAG_WITNESS, &[])?;
            Ok(())
        })?;
        let reply = crate::piv::gen_auth(self.transport_mut(), algorithm.wire_value(), 0x9B, &request)?;
        let children = crate::piv::unwrap_dyn_auth(&reply)?;
        let challenge = children
            .iter()
            .find(|t| t.tag == crate::piv::TAG_WITNESS)
            .map(|t| t.value)
            .ok_or_else(|| PivError::invalid_data("missing witness in challenge reply"))?;

        let encrypted_challenge = crate::crypto::symmetric::encrypt_ecb_block(algorithm, key, challenge)?;
        let mut client_challenge = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);

        let request2 = crate::piv::wrap_dyn_auth(|w| {
            crate::tlv::write_primitive(w, crate::piv::TAG_WITNESS, &encrypted_challenge)?;
            crate::tlv::write_primitive(w, crate::piv::TAG_CHALLENGE, &client_challenge)?;
            Ok(())
        })?;
        let reply2 = crate::piv::gen_auth(self.transport_mut(), algorithm.wire_value(), 0x9B, &request2)?;
        let children2 = crate::piv::unwrap_dyn_auth(&reply2)?;
        let card_response = children2
            .iter()
            .find(|t| t.tag == crate::piv::TAG_RESPONSE)
            .map(|t| t.value)
            .ok_or_else(|| PivError::invalid_data("missing response in mutual-auth reply"))?;

        let expected = crate::crypto::symmetric::encrypt_ecb_block(algorithm, key, &client_challenge)?;
        if card_response != expected.as_slice() {
            warn!("administrative challenge-response mismatch");
            return Err(PivError::permission("administrative key authentication failed"));
        }

        Ok(())
    }
}

pub(crate) fn probe_verify<T: CardTransport>(transport: &mut T, kind: PinKind) -> Result<()> {
    let (_, sw) = crate::apdu::exchange(transport, 0x00, INS_VERIFY, 0x00, kind.p2(), &[], None, false)?;
    crate::apdu::classify_status(sw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCard;

    #[test]
    fn verify_pin_rejects_empty_or_oversized() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        assert_eq!(token.verify_pin(PinKind::Pin, b"", None, false).unwrap_err().kind(), PivErrorKind::Argument);
        assert_eq!(
            token.verify_pin(PinKind::Pin, b"123456789", None, false).unwrap_err().kind(),
            PivErrorKind::Argument
        );
    }

    #[test]
    fn verify_pin_happy_path_clears_retry_counter() {
        let card = MockCard::new_blank();
        let mut token = TokenDescriptor::probe(card).unwrap();
        let outcome = token.verify_pin(PinKind::Pin, b"123456", None, false).unwrap();
        assert!(outcome.retries_left.is_none());
    }

    #[test]
    fn verify_pin_wrong_twice_then_correct() {
        let mut card = MockCard::new_blank();
        card.set_pin_retries(3, 3);
        let mut token = TokenDescriptor::probe(card).unwrap();

        let e1 = token.verify_pin(PinKind::Pin, b"000000", None, false).unwrap_err();
        assert_eq!(e1.retries(), Some(2));
        let e2 = token.verify_pin(PinKind::Pin, b"000000", None, false).unwrap_err();
        assert_eq!(e2.retries(), Some(1));

        token.verify_pin(PinKind::Pin, b"123456", None, false).unwrap();
    }
}
