//! License issuance over canonical JWTs.
//!
//! The crate turns a [`licmgr_core::ClaimSet`] into a signed three-segment
//! token (`header.payload.signature`, unpadded base64url) and verifies such
//! tokens against a single configured public key.
//!
//! # Modules
//!
//! - `rsa_keys` - in-process RSA key store: generation, PEM import from
//!   bytes or files
//! - `signer` - canonical serialization, the local [`RsaSigner`], token
//!   parsing and the [`Validator`]
//! - `generator` - issuer defaults, pre-populated claim sets, the fluent
//!   [`LicenseBuilder`] facade
//! - `pem_writer` - `<name>-private.pem` / `<name>-public.pem` emission
//!
//! Signature bytes are delegated through [`licmgr_core::LicenseSigner`], so
//! a remote key-service signer (see `licmgr-kms`) drops in without touching
//! the canonical form.

pub mod generator;
pub mod pem_writer;
pub mod rsa_keys;
pub mod signer;

pub use generator::{Generator, LicenseBuilder};
pub use pem_writer::write_rsa_keys;
pub use rsa_keys::RsaKeyStore;
pub use signer::{
    decode_token, encode_payload, encode_payload_indent, sign_claims, signing_input,
    verify_rsa_signature, JoseHeader, RsaSigner, Validator,
};
