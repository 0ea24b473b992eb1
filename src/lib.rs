//! # piv-toolkit
//!
//! A client library for PIV smartcards (NIST SP 800-73-4) with the
//! YubicoPIV proprietary extensions (GENERATE, IMPORT, ATTEST, RESET, SET
//! PIN RETRIES) and an ECDH sealed-box envelope format built on top of a
//! card's key-agreement slot.
//!
//! ## Architecture
//!
//! - [`transport`]: the [`transport::CardTransport`] trait wrapping the host
//!   PC/SC transmit primitive, with a real binding (feature `pcsc`) and an
//!   in-memory [`transport::mock::MockCard`] for tests.
//! - [`apdu`]: ISO-7816 command framing, command chaining, and
//!   `0x61xx`/`0x6Cxx` response reassembly.
//! - [`tlv`]: BER-TLV parsing/encoding.
//! - [`bytes`]: big-endian primitive reader/writer shared by `tlv` and the
//!   sealed box.
//! - [`token`]: [`token::TokenDescriptor`], discovered via CHUID/DISCOVERY/
//!   KEYHIST.
//! - [`slot`]: [`slot::SlotRegistry`]/[`slot::SlotDescriptor`], a token's
//!   per-slot key/certificate state.
//! - [`piv`]: the protocol engine — PIN/admin auth, signing/ECDH, key
//!   management, attestation/reset — as `impl` blocks on `TokenDescriptor`.
//! - [`crypto`]: RustCrypto primitives consumed (not reimplemented) by the
//!   protocol engine and the sealed box.
//! - [`ssh_wire`]: SSH wire-format public-key encode/decode.
//! - [`box_`]: the ECDH sealed box envelope.
//! - [`config`]: reader/APDU/retry/box policy.
//! - [`error`]: the crate's single [`error::PivError`] type.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod apdu;
pub mod box_;
pub mod bytes;
pub mod config;
pub mod crypto;
pub mod error;
pub mod piv;
pub mod slot;
pub mod ssh_wire;
pub mod tlv;
pub mod token;
pub mod transport;

pub use error::{PivError, PivErrorKind, Result};

/// Convenience re-exports for the common entry points: discover a token,
/// drive its slots, seal or open a box.
pub mod prelude {
    pub use crate::box_::EcdhBox;
    pub use crate::config::Config;
    pub use crate::error::{PivError, PivErrorKind, Result};
    pub use crate::piv::PinKind;
    pub use crate::slot::{AlgorithmId, SlotDescriptor, SlotRegistry};
    pub use crate::token::TokenDescriptor;
    pub use crate::transport::CardTransport;
}
