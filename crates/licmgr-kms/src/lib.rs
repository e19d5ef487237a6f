//! Remote key-management-service integration.
//!
//! The private key never exists in this process: signing round-trips to the
//! service, and only the public key can be fetched for local verification.
//!
//! # Modules
//!
//! - `api` - the abstract service surface ([`KmsApi`]) plus the remote
//!   algorithm / key-spec vocabularies
//! - `keystore` - [`KmsKeyStore`]: a `KeyPair` whose private identifier is
//!   the remote key reference, with a cached, single-flight public-key fetch
//! - `manager` - fluent [`KmsManager`] for key lifecycle operations
//!   (create, verify, schedule deletion)
//! - `signer` - [`KmsSigner`]: the remote `LicenseSigner` implementation
//!
//! All remote-reaching operations take the ambient request context (a
//! [`tokio_util::sync::CancellationToken`]) and abandon work promptly when
//! it fires, surfacing `LicenseError::Cancelled`.

pub mod api;
pub mod keystore;
pub mod manager;
pub mod signer;

pub use api::{KeyOrigin, KeySpec, KeyUsage, KmsApi, MessageType, RemoteSigningAlgorithm};
pub use keystore::KmsKeyStore;
pub use manager::KmsManager;
pub use signer::KmsSigner;
