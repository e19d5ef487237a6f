//! Core license model shared by the issuance and policy crates.
//!
//! This crate holds the pieces that every other `licmgr` crate agrees on:
//!
//! - `claims` - the [`ClaimSet`] that becomes the JWT payload, with the
//!   canonical member order and omit-empty rules baked into the type
//! - `keys` - the [`KeyPair`] and [`LicenseSigner`] capability traits plus
//!   the closed algorithm and key-type sets
//! - `scope` - space-separated feature token algebra ([`ScopeSet`])
//! - `error` - the shared error taxonomy ([`LicenseError`])
//!
//! The crate is deliberately free of cryptography and I/O; concrete key
//! stores and signers live in `licmgr-jwt` (local RSA) and `licmgr-kms`
//! (remote key management service).

pub mod claims;
pub mod error;
pub mod keys;
pub mod scope;

pub use claims::{ClaimSet, Feature};
pub use error::{LicenseError, LicenseResult};
pub use keys::{KeyPair, KeyType, LicenseSigner, SigningAlgorithm};
pub use scope::ScopeSet;

/// Minimum RSA modulus size accepted anywhere in the workspace, in bits.
pub const MIN_RSA_BITS: usize = 2048;
