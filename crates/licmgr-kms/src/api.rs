//! Abstract surface of the remote key management service.
//!
//! Cloud SDK wiring stays outside this crate; implementations adapt a
//! concrete SDK client to [`KmsApi`]. Names follow the service's own
//! registry (`RSA_2048`, `RSASSA_PKCS1_V1_5_SHA_256`, ...), built exactly
//! the way the issuing side expects them.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use licmgr_core::{KeyType, LicenseError, LicenseResult, SigningAlgorithm};

/// Key specification for remote key creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Key family to create.
    pub key_type: KeyType,
    /// Modulus or curve length in bits.
    pub bits: usize,
}

impl KeySpec {
    /// Spec for an RSA key of the given size.
    pub fn rsa(bits: usize) -> Self {
        Self {
            key_type: KeyType::Rsa,
            bits,
        }
    }

    /// The service's spec string, e.g. `RSA_2048`, `ECC_NIST_P384`,
    /// `ECC_SECG_P256K1`.
    pub fn spec_string(&self) -> String {
        match self.key_type {
            KeyType::Rsa => format!("RSA_{}", self.bits),
            KeyType::EccNist => format!("ECC_NIST_P{}", self.bits),
            KeyType::EccSecg => format!("ECC_SECG_P{}K1", self.bits),
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec_string())
    }
}

/// Where the key material originates. License keys are created inside the
/// service so they can be policy-administered and audited there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrigin {
    /// Generated and held by the key service.
    #[default]
    Service,
}

impl KeyOrigin {
    /// Service wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyOrigin::Service => "SERVICE",
        }
    }
}

/// Intended key usage. License keys are always signing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyUsage {
    /// Sign and verify.
    #[default]
    SignVerify,
}

impl KeyUsage {
    /// Service wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyUsage::SignVerify => "SIGN_VERIFY",
        }
    }
}

/// Whether the message passed to sign/verify is raw or pre-digested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// The service hashes the raw message itself.
    #[default]
    Raw,
    /// The message is already a digest.
    Digest,
}

impl MessageType {
    /// Service wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Raw => "RAW",
            MessageType::Digest => "DIGEST",
        }
    }
}

/// Signing algorithm names in the remote service's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteSigningAlgorithm {
    /// RSASSA PKCS#1 v1.5 with SHA-256/384/512.
    RsassaPkcs1V15Sha256,
    RsassaPkcs1V15Sha384,
    RsassaPkcs1V15Sha512,
    /// RSASSA-PSS with SHA-256/384/512.
    RsassaPssSha256,
    RsassaPssSha384,
    RsassaPssSha512,
    /// ECDSA with SHA-256/384/512.
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
}

impl RemoteSigningAlgorithm {
    /// Service wire name, e.g. `RSASSA_PKCS1_V1_5_SHA_256`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RsassaPkcs1V15Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
            Self::RsassaPkcs1V15Sha384 => "RSASSA_PKCS1_V1_5_SHA_384",
            Self::RsassaPkcs1V15Sha512 => "RSASSA_PKCS1_V1_5_SHA_512",
            Self::RsassaPssSha256 => "RSASSA_PSS_SHA_256",
            Self::RsassaPssSha384 => "RSASSA_PSS_SHA_384",
            Self::RsassaPssSha512 => "RSASSA_PSS_SHA_512",
            Self::EcdsaSha256 => "ECDSA_SHA_256",
            Self::EcdsaSha384 => "ECDSA_SHA_384",
            Self::EcdsaSha512 => "ECDSA_SHA_512",
        }
    }
}

impl From<SigningAlgorithm> for RemoteSigningAlgorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::RS256 => Self::RsassaPkcs1V15Sha256,
            SigningAlgorithm::RS384 => Self::RsassaPkcs1V15Sha384,
            SigningAlgorithm::RS512 => Self::RsassaPkcs1V15Sha512,
            SigningAlgorithm::PS256 => Self::RsassaPssSha256,
            SigningAlgorithm::PS384 => Self::RsassaPssSha384,
            SigningAlgorithm::PS512 => Self::RsassaPssSha512,
            SigningAlgorithm::ES256 => Self::EcdsaSha256,
            SigningAlgorithm::ES384 => Self::EcdsaSha384,
            SigningAlgorithm::ES512 => Self::EcdsaSha512,
        }
    }
}

impl fmt::Display for RemoteSigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote key service operations this workspace consumes.
///
/// `sign` returns the signature exactly as the service response carries it:
/// standard base64 text. The signer turns that into the URL-safe token
/// segment. Remote failures are surfaced verbatim as
/// [`LicenseError::Remote`].
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Create a signing key; returns the remote key reference (e.g. an ARN).
    async fn create_key(
        &self,
        cancel: &CancellationToken,
        spec: KeySpec,
        origin: KeyOrigin,
        usage: KeyUsage,
        description: &str,
        tags: &BTreeMap<String, String>,
        policy: Option<&str>,
    ) -> LicenseResult<String>;

    /// Sign `message` with the remote private key. Returns the signature as
    /// standard base64 text.
    async fn sign(
        &self,
        cancel: &CancellationToken,
        key_ref: &str,
        message: &[u8],
        algorithm: RemoteSigningAlgorithm,
        message_type: MessageType,
    ) -> LicenseResult<String>;

    /// Verify `signature` over `message` inside the service. Use when no
    /// public key has been fetched locally.
    async fn verify(
        &self,
        cancel: &CancellationToken,
        key_ref: &str,
        message: &[u8],
        signature: &[u8],
        algorithm: RemoteSigningAlgorithm,
        message_type: MessageType,
    ) -> LicenseResult<bool>;

    /// Fetch the public key half as PEM bytes.
    async fn get_public_key(
        &self,
        cancel: &CancellationToken,
        key_ref: &str,
    ) -> LicenseResult<Vec<u8>>;

    /// Schedule deletion of the remote key after `pending_days` (the caller
    /// clamps into the service's 7..=30 window).
    async fn schedule_key_deletion(
        &self,
        cancel: &CancellationToken,
        key_ref: &str,
        pending_days: i32,
    ) -> LicenseResult<()>;
}

/// Run a remote call under the ambient context, abandoning it promptly on
/// cancellation.
pub(crate) async fn with_cancellation<T>(
    cancel: &CancellationToken,
    operation: &'static str,
    fut: impl std::future::Future<Output = LicenseResult<T>>,
) -> LicenseResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LicenseError::Cancelled(operation.to_string())),
        result = fut => result,
    }
}
