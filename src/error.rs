//! Error types for the PIV client.
//!
//! A single [`PivError`] carries a coarse [`PivErrorKind`] (the error kinds
//! from the design) plus an optional boxed cause, so the transport, framing,
//! and protocol layers can each add context without losing the underlying
//! source. Top-level callers match on `kind()` rather than downcasting.

use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PivError>;

/// Coarse error classification, independent of the layer that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivErrorKind {
    /// Host transmit failed, card removed, or the underlying reader is gone.
    Io,
    /// Card returned a non-success status word with no more specific kind.
    Apdu,
    /// Object, slot, or token absent.
    NotFound,
    /// Card or slot does not implement the requested operation or algorithm.
    NotSupported,
    /// Security status not satisfied: wrong PIN, wrong admin key.
    Permission,
    /// Card response violates the wire format: truncated TLV, wrong tag,
    /// unparseable certificate, public point not on curve.
    InvalidData,
    /// Caller passed a value outside its defined domain.
    Argument,
    /// Caller's retry floor would be violated by attempting VERIFY.
    MinRetries,
    /// Card reports storage exhaustion.
    DeviceOutOfMemory,
    /// `ykpiv_reset` preconditions unmet.
    ResetConditions,
    /// `auth_key` determined the slot's key does not match.
    KeyAuth,
    /// `find` matched more than one token against a GUID prefix.
    Duplicate,
}

impl fmt::Display for PivErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PivErrorKind::Io => "io",
            PivErrorKind::Apdu => "apdu",
            PivErrorKind::NotFound => "not found",
            PivErrorKind::NotSupported => "not supported",
            PivErrorKind::Permission => "permission",
            PivErrorKind::InvalidData => "invalid data",
            PivErrorKind::Argument => "argument",
            PivErrorKind::MinRetries => "min retries",
            PivErrorKind::DeviceOutOfMemory => "device out of memory",
            PivErrorKind::ResetConditions => "reset conditions",
            PivErrorKind::KeyAuth => "key auth",
            PivErrorKind::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// The crate's error type. Every fallible operation returns this (or a
/// [`Result`] alias of it).
#[derive(thiserror::Error, Debug)]
#[error("{kind}: {message}")]
pub struct PivError {
    kind: PivErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    /// PIN/PUK retries remaining, populated for `Permission` errors raised
    /// from VERIFY/CHANGE REFERENCE DATA/RESET RETRY COUNTER.
    retries: Option<u8>,
    /// Raw status word, populated for `Apdu` errors.
    status_word: Option<u16>,
}

impl PivError {
    /// Construct a new error of `kind` with a human-readable `message`.
    pub fn new(kind: PivErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            retries: None,
            status_word: None,
        }
    }

    /// Attach a cause-chain source to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach remaining PIN/PUK retries (for `Permission` errors).
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Attach the raw status word (for `Apdu` errors).
    pub fn with_status_word(mut self, sw: u16) -> Self {
        self.status_word = Some(sw);
        self
    }

    /// The coarse kind of this error.
    pub fn kind(&self) -> PivErrorKind {
        self.kind
    }

    /// Remaining PIN/PUK retries, if this is a VERIFY/CHANGE/RESET failure.
    pub fn retries(&self) -> Option<u8> {
        self.retries
    }

    /// The raw status word, if this error was raised from a decoded APDU
    /// response.
    pub fn status_word(&self) -> Option<u16> {
        self.status_word
    }

    pub(crate) fn io(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::Io, message)
    }

    pub(crate) fn apdu(sw: u16) -> Self {
        Self::new(PivErrorKind::Apdu, format!("unexpected status word {sw:04X}"))
            .with_status_word(sw)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::NotFound, message)
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::NotSupported, message)
    }

    pub(crate) fn permission(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::Permission, message)
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::InvalidData, message)
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::Argument, message)
    }

    pub(crate) fn not_supported_op(op: &str) -> Self {
        Self::not_supported(format!("{op} is not supported by this card/slot"))
    }

    pub(crate) fn duplicate(message: impl Into<String>) -> Self {
        Self::new(PivErrorKind::Duplicate, message)
    }
}

#[cfg(feature = "pcsc")]
impl From<pcsc::Error> for PivError {
    fn from(e: pcsc::Error) -> Self {
        PivError::io(e.to_string())
    }
}

impl From<ssh_key::Error> for PivError {
    fn from(e: ssh_key::Error) -> Self {
        PivError::new(PivErrorKind::InvalidData, e.to_string())
    }
}

impl From<std::io::Error> for PivError {
    fn from(e: std::io::Error) -> Self {
        PivError::io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_retries_are_retained() {
        let e = PivError::new(PivErrorKind::Permission, "bad pin").with_retries(2);
        assert_eq!(e.kind(), PivErrorKind::Permission);
        assert_eq!(e.retries(), Some(2));
        assert!(e.to_string().contains("bad pin"));
    }

    #[test]
    fn apdu_error_carries_status_word() {
        let e = PivError::apdu(0x6a82);
        assert_eq!(e.kind(), PivErrorKind::Apdu);
        assert_eq!(e.status_word(), Some(0x6a82));
    }
}
