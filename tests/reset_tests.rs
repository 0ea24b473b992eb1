//! `ykpiv_reset` precondition scenario (spec §8 scenario 6): on a card whose
//! PIN retries have not been exhausted, the reset refuses before sending
//! INS 0xFB.

use piv_toolkit::error::PivErrorKind;
use piv_toolkit::token::TokenDescriptor;
use piv_toolkit::transport::mock::MockCard;

#[test]
fn reset_refuses_unless_pin_and_puk_are_blocked() {
    let card = MockCard::new_blank();
    let mut token = TokenDescriptor::probe(card).unwrap();

    let err = token.ykpiv_reset().unwrap_err();
    assert_eq!(err.kind(), PivErrorKind::ResetConditions);
}
