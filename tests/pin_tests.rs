//! Wrong-PIN-twice scenario (spec §8 scenario 5): two failed VERIFYs report
//! decreasing retry counts, a correct third attempt clears the counter.

use piv_toolkit::error::PivErrorKind;
use piv_toolkit::piv::PinKind;
use piv_toolkit::token::TokenDescriptor;
use piv_toolkit::transport::mock::MockCard;

#[test]
fn wrong_pin_twice_then_correct_pin_clears_the_counter() {
    let mut card = MockCard::new_blank();
    card.set_pin_retries(3, 3);
    let mut token = TokenDescriptor::probe(card).unwrap();

    let err1 = token.verify_pin(PinKind::Pin, b"000000", None, false).unwrap_err();
    assert_eq!(err1.kind(), PivErrorKind::Permission);
    assert_eq!(err1.retries(), Some(2));

    let err2 = token.verify_pin(PinKind::Pin, b"000000", None, false).unwrap_err();
    assert_eq!(err2.kind(), PivErrorKind::Permission);
    assert_eq!(err2.retries(), Some(1));

    let outcome = token.verify_pin(PinKind::Pin, b"123456", None, false).unwrap();
    assert!(outcome.retries_left.is_none());
}
