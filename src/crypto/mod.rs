//! Cryptographic primitives consumed (not reimplemented) from the
//! RustCrypto ecosystem, per spec §6: digest selection for signing, the
//! legacy symmetric ciphers used by administrative challenge-response,
//! PKCS#1 v1.5 padding, offline ECDH, AEAD for the sealed box, and its KDF.

pub mod aead;
pub mod digest;
pub mod ecdh;
pub mod kdf;
pub mod padding;
pub mod symmetric;
