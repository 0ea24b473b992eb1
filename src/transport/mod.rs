//! Transport facade: wraps the host PC/SC transmit primitive (spec §4.3).
//!
//! The host smartcard API itself — establish-context, list-readers,
//! connect, begin/end transaction, transmit, disconnect, release-context —
//! is an external collaborator the crate consumes through the
//! [`CardTransport`] trait rather than owns. [`pcsc_impl`] (feature `pcsc`)
//! binds this trait to the real `pcsc` crate; [`mock`] provides an
//! in-memory card for tests and the doctest suite.

use crate::error::{PivError, Result};

#[cfg(feature = "pcsc")]
pub mod pcsc_impl;
pub mod mock;

/// A single ISO-7816 exchange: raw command bytes in, raw reply bytes (data
/// + trailing SW1SW2) out. Implementors own reconnect-on-reset retry (the
/// sole retry this layer performs): on a host-level "reset by peer"
/// indication the implementor reconnects once and retries the same bytes
/// before surfacing an error.
pub trait CardTransport {
    /// The name of the reader this transport is bound to, for logging.
    fn reader_name(&self) -> &str;

    /// Begin an exclusive transaction on the reader. Non-reentrant: calling
    /// this while a transaction is already open is a logic error the
    /// implementor should reject with `Permission`.
    fn begin_transaction(&mut self) -> Result<()>;

    /// End the current transaction.
    fn end_transaction(&mut self) -> Result<()>;

    /// Send `command` (a fully framed APDU) and return the raw reply,
    /// including the trailing two status-word bytes.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;

    /// Disconnect from the card. Implementors may treat this as a no-op if
    /// the underlying handle does not require explicit teardown.
    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Split a raw PC/SC reply into (data, status word). Returns `InvalidData`
/// if the reply is shorter than the two trailing status bytes.
pub fn split_reply(reply: &[u8]) -> Result<(&[u8], u16)> {
    if reply.len() < 2 {
        return Err(PivError::invalid_data("reply shorter than status word"));
    }
    let (data, sw) = reply.split_at(reply.len() - 2);
    Ok((data, u16::from_be_bytes([sw[0], sw[1]])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reply_separates_status() {
        let (data, sw) = split_reply(&[1, 2, 3, 0x90, 0x00]).unwrap();
        assert_eq!(data, &[1, 2, 3]);
        assert_eq!(sw, 0x9000);
    }

    #[test]
    fn split_reply_rejects_too_short() {
        assert!(split_reply(&[0x90]).is_err());
    }
}
