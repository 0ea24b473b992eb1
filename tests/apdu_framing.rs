//! Chained write_cert scenario (spec §8 scenario 3): a certificate large
//! enough that PUT DATA must chain, verified by recording every frame this
//! crate hands to the transport.

use piv_toolkit::token::TokenDescriptor;
use piv_toolkit::transport::mock::MockCard;
use piv_toolkit::transport::CardTransport;

const INS_PUT_DATA: u8 = 0xDB;
const CLA_CHAIN: u8 = 0x10;

/// Wraps a [`MockCard`], recording the CLA/INS of every frame it is asked
/// to transmit so the test can inspect the chaining shape after the fact.
struct RecordingTransport {
    inner: MockCard,
    frames: Vec<(u8, u8)>,
}

impl CardTransport for RecordingTransport {
    fn reader_name(&self) -> &str {
        self.inner.reader_name()
    }

    fn begin_transaction(&mut self) -> piv_toolkit::Result<()> {
        self.inner.begin_transaction()
    }

    fn end_transaction(&mut self) -> piv_toolkit::Result<()> {
        self.inner.end_transaction()
    }

    fn transmit(&mut self, command: &[u8]) -> piv_toolkit::Result<Vec<u8>> {
        self.frames.push((command[0], command[1]));
        self.inner.transmit(command)
    }
}

#[test]
fn write_cert_of_an_incompressible_certificate_chains_correctly() {
    let card = MockCard::new_blank();
    let mut token = TokenDescriptor::probe(RecordingTransport { inner: card, frames: Vec::new() }).unwrap();

    // Incompressible bytes (a counter, not a repeated value) so gzip cannot
    // shrink this below the chaining threshold.
    let fake_der: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    token.write_cert(0x9A, &fake_der).unwrap();

    let put_data_frames: Vec<u8> = token
        .transport_mut()
        .frames
        .iter()
        .filter(|(_, ins)| *ins == INS_PUT_DATA)
        .map(|(cla, _)| *cla)
        .collect();

    assert!(put_data_frames.len() > 1, "a 3000-byte certificate must not fit in a single APDU");
    let (last, earlier) = put_data_frames.split_last().unwrap();
    assert_eq!(last & CLA_CHAIN, 0, "the final fragment must clear the chain bit");
    assert!(earlier.iter().all(|cla| cla & CLA_CHAIN != 0), "every fragment but the last must carry the chain bit");
}
